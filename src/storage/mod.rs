//! Storage for contact records.
//!
//! The resolver depends only on the [`ContactStore`] trait. Two backends ship
//! with the crate: [`InMemoryContactStore`] and, with the `persistent`
//! feature, a WAL-backed store.

mod memory;
pub(crate) mod table;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryContactStore;
pub use traits::{ContactStore, ResolutionCommit, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_store, PersistentConfig, PersistentContactStore};

//! # contactlink - identity reconciliation for contact records
//!
//! Customers reach a business through different emails and phone numbers.
//! contactlink links every record that shares an email or a phone number into
//! one identity cluster, headed by its oldest record (the *primary*), and
//! answers each submission with the cluster's consolidated view.
//!
//! ## Core Concepts
//!
//! - **Contact**: one stored `(email, phoneNumber)` observation
//! - **Primary / Secondary**: the head of a cluster, and records pointing straight at it
//! - **IdentityView**: every email, phone number and secondary id of a cluster
//! - **Merge**: a submission bridging two clusters demotes the younger primary
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use contactlink::{IdentityResolver, InMemoryContactStore};
//!
//! let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
//!
//! resolver.identify(Some("doc@hillvalley.edu"), Some("123456"))?;
//! let view = resolver.identify(Some("emmett@hillvalley.edu"), Some("123456"))?;
//!
//! assert_eq!(view.primary_contact_id.get(), 1);
//! assert_eq!(view.emails, ["doc@hillvalley.edu", "emmett@hillvalley.edu"]);
//! # Ok::<(), contactlink::ContactError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod contact;
pub mod error;
pub mod view;

// Resolution and storage
pub mod resolver;
pub mod storage;

// Surfaces
pub mod api;
pub mod runtime;

pub use contact::{Contact, ContactId, Identifiers, LinkPrecedence, NewContact};
pub use error::{ContactError, ContactResult, ExecutionError, ValidationError};
pub use view::IdentityView;

pub use resolver::{IdentityResolver, ResolverConfig};
pub use storage::{ContactStore, InMemoryContactStore, ResolutionCommit, StorageError};

#[cfg(feature = "persistent")]
pub use storage::{open_store, PersistentConfig, PersistentContactStore};

pub use api::{ApiResponse, IdentifyRequest};
pub use runtime::{
    ExecutionHandle, ExecutionPath, ResolverRequest, ResolverResponse, ResolverRuntime,
    ResolverRuntimeConfig,
};

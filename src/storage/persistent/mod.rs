//! Persistent storage backend (feature `persistent`).
//!
//! Durable, crash-safe contact storage with:
//! - Write-Ahead Logging for crash recovery
//! - A directory lock for single-process access
//! - CRC32 checksums for corruption detection
//! - Snapshots written on compaction
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   .lock               exclusive flock / LockFileEx
//!   contacts.snapshot   table image as of the last compaction
//!   contacts.wal        mutations since that snapshot
//! ```

mod codec;
mod file_lock;
mod snapshot;
mod store;
mod wal;

pub use file_lock::DirLock;
pub use store::{CompactionResult, PersistentContactStore, WAL_FILE};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::storage::traits::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// WAL size (bytes) past which `maybe_compact` folds it into a snapshot.
    pub max_wal_size: u64,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_wal_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted `max_wal_size`; smaller values compact on nearly every write.
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `BackendError` if `max_wal_size` is below [`Self::MIN_WAL_SIZE`].
    pub fn validate(self) -> Result<Self, StorageError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(StorageError::BackendError(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

/// Open or create a persistent contact store at `path`.
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If the snapshot or a non-tail WAL entry is corrupted
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use contactlink::storage::persistent::open_store;
/// use contactlink::IdentityResolver;
///
/// let store = open_store("./contacts.db", None)?;
/// let resolver = IdentityResolver::new(Arc::new(store));
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentContactStore, StorageError> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentContactStore::open(path.as_ref(), cfg)
}

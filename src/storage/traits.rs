//! Abstract storage trait for contact records.
//!
//! The resolver only ever talks to a `ContactStore`. By using a trait we get:
//! - An in-memory backend for tests and embedded use
//! - A durable backend (feature `persistent`)
//! - Room for an external database adapter

use thiserror::Error;

use crate::contact::{Contact, ContactId, Identifiers, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// A record expected to be primary is no longer primary.
    #[error("Contact {0} is no longer a primary")]
    PrecedenceChanged(ContactId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// On-disk data failed integrity checks.
    #[error("Corrupted storage: {0}")]
    Corrupted(String),
}

/// The atomic write unit produced by one `identify` decision.
///
/// Applying a commit either demotes every listed primary *and* creates the
/// new record, or changes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionCommit {
    /// Primary that must still be primary when the commit applies.
    pub survivor: ContactId,
    /// Primaries to demote under `survivor`.
    pub demote: Vec<ContactId>,
    /// Record to create, if the submission carried new information.
    pub create: Option<NewContact>,
}

/// Storage trait for contact records.
///
/// # Safety Considerations
/// - `demote_primaries`, `commit` and `delete_all` must be atomic
/// - Implementations must handle concurrent access safely
pub trait ContactStore: Send + Sync {
    /// Find a record matching every present field of `ids`.
    ///
    /// An absent field is a wildcard. When several records match, the one
    /// with the lowest id is returned.
    fn find_exact(&self, ids: &Identifiers) -> Result<Option<Contact>, StorageError>;

    /// Find every record sharing the email or the phone number, ascending id.
    fn find_any_match(&self, ids: &Identifiers) -> Result<Vec<Contact>, StorageError>;

    /// Find the primary `primary_id` and every record linked to it, ascending id.
    fn find_by_cluster(&self, primary_id: ContactId) -> Result<Vec<Contact>, StorageError>;

    /// Get a record by id.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Create a record, assigning the next id.
    fn create(&self, new: NewContact) -> Result<Contact, StorageError>;

    /// Demote the given records to secondaries of `new_linked_id`.
    ///
    /// Records that were linked to one of `ids` are re-pointed at
    /// `new_linked_id` in the same step, so links stay one hop long.
    ///
    /// # Errors
    /// - `ContactNotFound`: if any id (or `new_linked_id`) does not exist
    fn demote_primaries(&self, ids: &[ContactId], new_linked_id: ContactId)
        -> Result<(), StorageError>;

    /// Apply a resolution atomically; returns the created record, if any.
    ///
    /// # Errors
    /// - `ContactNotFound`: the survivor or a demoted id vanished
    /// - `PrecedenceChanged`: the survivor or a demoted id is no longer primary
    fn commit(&self, commit: ResolutionCommit) -> Result<Option<Contact>, StorageError>;

    /// Every record, ascending id.
    fn find_all(&self) -> Result<Vec<Contact>, StorageError>;

    /// Delete every record; returns how many were removed.
    fn delete_all(&self) -> Result<usize, StorageError>;
}

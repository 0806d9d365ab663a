//! In-memory storage backend.
//!
//! Thread-safe implementation of [`ContactStore`] over a single `RwLock`ed
//! table. Every mutation takes the write lock once, which makes `commit`
//! atomic with respect to all readers. Intended for embedded usage, tests, and
//! as a reference implementation.

use std::sync::RwLock;

use chrono::Utc;

use crate::contact::{Contact, ContactId, Identifiers, NewContact};
use crate::storage::table::ContactTable;
use crate::storage::traits::{ContactStore, ResolutionCommit, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory contact store.
#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    table: RwLock<ContactTable>,
}

impl InMemoryContactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    ///
    /// # Errors
    /// Returns `BackendError` if the table lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.table.read().map_err(|_| lock_err("contact.len"))?.len())
    }

    /// Returns true if no records are stored.
    ///
    /// # Errors
    /// Returns `BackendError` if the table lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl ContactStore for InMemoryContactStore {
    fn find_exact(&self, ids: &Identifiers) -> Result<Option<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.find_exact"))?;
        Ok(table.find_exact(ids))
    }

    fn find_any_match(&self, ids: &Identifiers) -> Result<Vec<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.find_any_match"))?;
        Ok(table.find_any_match(ids))
    }

    fn find_by_cluster(&self, primary_id: ContactId) -> Result<Vec<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.find_by_cluster"))?;
        Ok(table.find_by_cluster(primary_id))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.get"))?;
        Ok(table.get(id).cloned())
    }

    fn create(&self, new: NewContact) -> Result<Contact, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("contact.create"))?;
        let contact = table.prepare_create(new, Utc::now())?;
        table.apply_create(contact.clone());
        Ok(contact)
    }

    fn demote_primaries(
        &self,
        ids: &[ContactId],
        new_linked_id: ContactId,
    ) -> Result<(), StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("contact.demote"))?;
        let demotion = table.prepare_demotion(ids, new_linked_id, Utc::now())?;
        table.apply_demotion(&demotion);
        Ok(())
    }

    fn commit(&self, commit: ResolutionCommit) -> Result<Option<Contact>, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("contact.commit"))?;
        let prepared = table.prepare_commit(commit, Utc::now())?;
        table.apply_commit(&prepared);
        Ok(prepared.created)
    }

    fn find_all(&self) -> Result<Vec<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.find_all"))?;
        Ok(table.all())
    }

    fn delete_all(&self) -> Result<usize, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("contact.delete_all"))?;
        Ok(table.apply_clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::LinkPrecedence;

    fn ids(email: Option<&str>, phone: Option<&str>) -> Identifiers {
        Identifiers::new(email, phone).unwrap()
    }

    #[test]
    fn test_find_exact_prefers_lowest_id() {
        let store = InMemoryContactStore::new();
        let a = store.create(NewContact::primary(&ids(Some("a@x.com"), Some("1")))).unwrap();
        store
            .create(NewContact::secondary(&ids(Some("a@x.com"), Some("2")), a.id))
            .unwrap();

        let hit = store.find_exact(&ids(Some("a@x.com"), None)).unwrap().unwrap();
        assert_eq!(hit.id, a.id);

        let hit = store.find_exact(&ids(Some("a@x.com"), Some("2"))).unwrap().unwrap();
        assert_eq!(hit.id, ContactId::new(2));

        assert!(store.find_exact(&ids(Some("a@x.com"), Some("3"))).unwrap().is_none());
    }

    #[test]
    fn test_find_any_match_unions_fields() {
        let store = InMemoryContactStore::new();
        store.create(NewContact::primary(&ids(Some("a@x.com"), None))).unwrap();
        store.create(NewContact::primary(&ids(None, Some("555")))).unwrap();
        store.create(NewContact::primary(&ids(Some("z@x.com"), None))).unwrap();

        let hits = store.find_any_match(&ids(Some("a@x.com"), Some("555"))).unwrap();
        let got: Vec<u64> = hits.iter().map(|c| c.id.get()).collect();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let store = InMemoryContactStore::new();
        let a = store.create(NewContact::primary(&ids(Some("a@x.com"), None))).unwrap();
        let b = store.create(NewContact::primary(&ids(None, Some("555")))).unwrap();

        // Survivor is missing: nothing may change.
        let err = store
            .commit(ResolutionCommit {
                survivor: ContactId::new(99),
                demote: vec![b.id],
                create: Some(NewContact::secondary(&ids(Some("a@x.com"), Some("555")), a.id)),
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::ContactNotFound(_)));
        assert_eq!(store.len().unwrap(), 2);
        assert!(store.get(b.id).unwrap().unwrap().is_primary());

        let created = store
            .commit(ResolutionCommit {
                survivor: a.id,
                demote: vec![b.id],
                create: Some(NewContact::secondary(&ids(Some("a@x.com"), Some("555")), a.id)),
            })
            .unwrap()
            .unwrap();
        assert_eq!(created.id, ContactId::new(3));
        assert_eq!(created.link_precedence, LinkPrecedence::Secondary);

        let b_now = store.get(b.id).unwrap().unwrap();
        assert_eq!(b_now.linked_id, Some(a.id));
        assert_eq!(store.find_by_cluster(a.id).unwrap().len(), 3);
    }

    #[test]
    fn test_commit_rejects_stale_primary() {
        let store = InMemoryContactStore::new();
        let a = store.create(NewContact::primary(&ids(Some("a@x.com"), None))).unwrap();
        let b = store.create(NewContact::primary(&ids(None, Some("555")))).unwrap();
        store.demote_primaries(&[b.id], a.id).unwrap();

        let err = store
            .commit(ResolutionCommit {
                survivor: b.id,
                demote: Vec::new(),
                create: None,
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::PrecedenceChanged(id) if id == b.id));
    }

    #[test]
    fn test_delete_all() {
        let store = InMemoryContactStore::new();
        store.create(NewContact::primary(&ids(Some("a@x.com"), None))).unwrap();
        store.create(NewContact::primary(&ids(Some("b@x.com"), None))).unwrap();

        assert_eq!(store.delete_all().unwrap(), 2);
        assert!(store.is_empty().unwrap());
        assert!(store.find_all().unwrap().is_empty());
    }
}

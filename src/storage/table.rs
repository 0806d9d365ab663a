//! Indexed in-memory contact table.
//!
//! Shared by the in-memory store and the persistent store (which keeps the
//! table as its read model and replays the WAL into it). Every mutation is
//! split into a fallible `prepare_*` step that validates and stamps ids, and an
//! infallible `apply_*` step, so a durable backend can log the prepared change
//! before applying it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId, Identifiers, LinkPrecedence, NewContact};
use crate::storage::traits::{ResolutionCommit, StorageError};

/// A demotion validated against the current table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedDemotion {
    pub survivor: ContactId,
    pub ids: Vec<ContactId>,
    pub at: DateTime<Utc>,
}

/// A resolution commit validated against the current table, with the new
/// record's id already assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCommit {
    pub demotion: PreparedDemotion,
    pub created: Option<Contact>,
}

/// Serializable image of a table.
#[cfg(feature = "persistent")]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub next_id: u64,
    pub contacts: Vec<Contact>,
}

#[derive(Debug)]
pub struct ContactTable {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    next_id: u64,
}

impl Default for ContactTable {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_email: HashMap::new(),
            by_phone: HashMap::new(),
            by_linked: HashMap::new(),
            next_id: 1,
        }
    }
}

impl ContactTable {
    #[cfg(feature = "persistent")]
    pub fn from_snapshot(snapshot: TableSnapshot) -> Self {
        let mut table = Self::default();
        for contact in snapshot.contacts {
            table.insert(contact);
        }
        table.next_id = table.next_id.max(snapshot.next_id);
        table
    }

    #[cfg(feature = "persistent")]
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            next_id: self.next_id,
            contacts: self.by_id.values().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[cfg(test)]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    pub fn find_exact(&self, ids: &Identifiers) -> Option<Contact> {
        let candidates = match (ids.email(), ids.phone_number()) {
            (Some(email), _) => self.by_email.get(email),
            (None, Some(phone)) => self.by_phone.get(phone),
            (None, None) => None,
        }?;

        candidates
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .find(|c| c.matches_exact(ids))
            .cloned()
    }

    pub fn find_any_match(&self, ids: &Identifiers) -> Vec<Contact> {
        let mut hits = BTreeSet::new();
        if let Some(set) = ids.email().and_then(|e| self.by_email.get(e)) {
            hits.extend(set.iter().copied());
        }
        if let Some(set) = ids.phone_number().and_then(|p| self.by_phone.get(p)) {
            hits.extend(set.iter().copied());
        }
        self.collect(hits)
    }

    pub fn find_by_cluster(&self, primary_id: ContactId) -> Vec<Contact> {
        let mut ids = BTreeSet::new();
        if self.by_id.contains_key(&primary_id) {
            ids.insert(primary_id);
        }
        if let Some(linked) = self.by_linked.get(&primary_id) {
            ids.extend(linked.iter().copied());
        }
        self.collect(ids)
    }

    pub fn all(&self) -> Vec<Contact> {
        self.by_id.values().cloned().collect()
    }

    pub fn prepare_create(
        &self,
        new: NewContact,
        at: DateTime<Utc>,
    ) -> Result<Contact, StorageError> {
        match (new.link_precedence, new.linked_id) {
            (LinkPrecedence::Primary, None) => {}
            (LinkPrecedence::Secondary, Some(primary)) => self.require_primary(primary)?,
            (precedence, linked) => {
                return Err(StorageError::BackendError(format!(
                    "invalid link: precedence={precedence} linked_id={linked:?}"
                )));
            }
        }
        Ok(Contact::from_new(ContactId::new(self.next_id), new, at))
    }

    pub fn prepare_demotion(
        &self,
        ids: &[ContactId],
        survivor: ContactId,
        at: DateTime<Utc>,
    ) -> Result<PreparedDemotion, StorageError> {
        self.require_primary(survivor)?;

        let mut unique: Vec<ContactId> = ids.iter().copied().filter(|id| *id != survivor).collect();
        unique.sort_unstable();
        unique.dedup();
        for id in &unique {
            self.require_primary(*id)?;
        }

        Ok(PreparedDemotion {
            survivor,
            ids: unique,
            at,
        })
    }

    pub fn prepare_commit(
        &self,
        commit: ResolutionCommit,
        at: DateTime<Utc>,
    ) -> Result<PreparedCommit, StorageError> {
        let demotion = self.prepare_demotion(&commit.demote, commit.survivor, at)?;
        let created = commit
            .create
            .map(|new| self.prepare_create(new, at))
            .transpose()?;
        Ok(PreparedCommit { demotion, created })
    }

    pub fn apply_create(&mut self, contact: Contact) {
        self.insert(contact);
    }

    pub fn apply_demotion(&mut self, demotion: &PreparedDemotion) {
        let survivor = demotion.survivor;
        for id in &demotion.ids {
            if let Some(contact) = self.by_id.get_mut(id) {
                contact.demote(survivor, demotion.at);
            }
            self.by_linked.entry(survivor).or_default().insert(*id);

            // Re-point the demoted primary's own secondaries.
            let Some(children) = self.by_linked.remove(id) else {
                continue;
            };
            for child in &children {
                if let Some(contact) = self.by_id.get_mut(child) {
                    contact.linked_id = Some(survivor);
                    contact.updated_at = demotion.at;
                }
            }
            self.by_linked.entry(survivor).or_default().extend(children);
        }
    }

    pub fn apply_commit(&mut self, prepared: &PreparedCommit) {
        self.apply_demotion(&prepared.demotion);
        if let Some(created) = prepared.created.clone() {
            self.apply_create(created);
        }
    }

    /// Removes every record. The id counter is kept so ids are never reused.
    pub fn apply_clear(&mut self) -> usize {
        let removed = self.by_id.len();
        self.by_id.clear();
        self.by_email.clear();
        self.by_phone.clear();
        self.by_linked.clear();
        removed
    }

    fn insert(&mut self, contact: Contact) {
        let id = contact.id;
        // Replaying a WAL over a newer snapshot re-inserts known ids.
        if let Some(old) = self.by_id.remove(&id) {
            self.unindex(&old);
        }
        if let Some(email) = contact.email.clone() {
            self.by_email.entry(email).or_default().insert(id);
        }
        if let Some(phone) = contact.phone_number.clone() {
            self.by_phone.entry(phone).or_default().insert(id);
        }
        if let Some(linked) = contact.linked_id {
            self.by_linked.entry(linked).or_default().insert(id);
        }
        self.next_id = self.next_id.max(id.get() + 1);
        self.by_id.insert(id, contact);
    }

    fn unindex(&mut self, contact: &Contact) {
        let id = contact.id;
        if let Some(set) = contact.email.as_ref().and_then(|e| self.by_email.get_mut(e)) {
            set.remove(&id);
        }
        if let Some(set) = contact.phone_number.as_ref().and_then(|p| self.by_phone.get_mut(p)) {
            set.remove(&id);
        }
        if let Some(set) = contact.linked_id.and_then(|l| self.by_linked.get_mut(&l)) {
            set.remove(&id);
        }
    }

    fn require_primary(&self, id: ContactId) -> Result<(), StorageError> {
        match self.by_id.get(&id) {
            None => Err(StorageError::ContactNotFound(id)),
            Some(c) if !c.is_primary() => Err(StorageError::PrecedenceChanged(id)),
            Some(_) => Ok(()),
        }
    }

    fn collect(&self, ids: BTreeSet<ContactId>) -> Vec<Contact> {
        ids.into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(email: Option<&str>, phone: Option<&str>) -> Identifiers {
        Identifiers::new(email, phone).unwrap()
    }

    fn create(table: &mut ContactTable, new: NewContact) -> Contact {
        let contact = table.prepare_create(new, Utc::now()).unwrap();
        table.apply_create(contact.clone());
        contact
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut table = ContactTable::default();
        let a = create(&mut table, NewContact::primary(&ids(Some("a@x.com"), None)));
        let b = create(&mut table, NewContact::primary(&ids(Some("b@x.com"), None)));
        assert_eq!(a.id, ContactId::new(1));
        assert_eq!(b.id, ContactId::new(2));
    }

    #[test]
    fn test_secondary_requires_primary_target() {
        let table = ContactTable::default();
        let err = table
            .prepare_create(
                NewContact::secondary(&ids(Some("a@x.com"), None), ContactId::new(7)),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::ContactNotFound(id) if id == ContactId::new(7)));
    }

    #[test]
    fn test_demotion_repoints_children() {
        let mut table = ContactTable::default();
        let a = create(&mut table, NewContact::primary(&ids(Some("a@x.com"), None)));
        let b = create(&mut table, NewContact::primary(&ids(None, Some("555"))));
        let child = create(
            &mut table,
            NewContact::secondary(&ids(Some("c@x.com"), Some("555")), b.id),
        );

        let demotion = table.prepare_demotion(&[b.id], a.id, Utc::now()).unwrap();
        table.apply_demotion(&demotion);

        let cluster = table.find_by_cluster(a.id);
        assert_eq!(cluster.len(), 3);
        assert_eq!(table.get(child.id).unwrap().linked_id, Some(a.id));
        assert_eq!(table.get(b.id).unwrap().linked_id, Some(a.id));
        assert!(table.find_by_cluster(b.id).is_empty());
    }

    #[test]
    fn test_demotion_rejects_secondary() {
        let mut table = ContactTable::default();
        let a = create(&mut table, NewContact::primary(&ids(Some("a@x.com"), None)));
        let s = create(&mut table, NewContact::secondary(&ids(Some("a@x.com"), Some("1")), a.id));

        let err = table.prepare_demotion(&[s.id], a.id, Utc::now()).unwrap_err();
        assert!(matches!(err, StorageError::PrecedenceChanged(_)));
    }

    #[test]
    fn test_clear_keeps_counter() {
        let mut table = ContactTable::default();
        create(&mut table, NewContact::primary(&ids(Some("a@x.com"), None)));
        create(&mut table, NewContact::primary(&ids(Some("b@x.com"), None)));
        assert_eq!(table.apply_clear(), 2);

        let c = create(&mut table, NewContact::primary(&ids(Some("c@x.com"), None)));
        assert_eq!(c.id, ContactId::new(3));
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_snapshot_restores_indexes() {
        let mut table = ContactTable::default();
        let a = create(&mut table, NewContact::primary(&ids(Some("a@x.com"), Some("1"))));
        create(&mut table, NewContact::secondary(&ids(Some("b@x.com"), Some("1")), a.id));

        let restored = ContactTable::from_snapshot(table.snapshot());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.next_id(), 3);
        assert_eq!(restored.find_any_match(&ids(None, Some("1"))).len(), 2);
        assert_eq!(restored.find_by_cluster(a.id).len(), 2);
    }
}

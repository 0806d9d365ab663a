//! Durable contact store.
//!
//! Wraps:
//! - An indexed in-memory table for reads
//! - A WAL for durable writes (logged before they are applied)
//! - A snapshot written on compaction

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;

use crate::contact::{Contact, ContactId, Identifiers, NewContact};
use crate::storage::table::ContactTable;
use crate::storage::traits::{ContactStore, ResolutionCommit, StorageError};

use super::file_lock::DirLock;
use super::snapshot;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// WAL file name inside the store directory.
pub const WAL_FILE: &str = "contacts.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn io_err(context: &str, err: &std::io::Error) -> StorageError {
    match err.kind() {
        std::io::ErrorKind::InvalidData => StorageError::Corrupted(format!("{context}: {err}")),
        _ => StorageError::BackendError(format!("{context}: {err}")),
    }
}

/// Outcome of a compaction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Number of WAL entries folded into the snapshot.
    pub entries_compacted: u64,
    /// Records captured by the snapshot.
    pub records: usize,
    /// WAL size before compaction (bytes).
    pub wal_size_before: u64,
    /// WAL size after compaction (bytes).
    pub wal_size_after: u64,
}

/// Contact store persisted in a directory (snapshot + WAL), single process.
pub struct PersistentContactStore {
    dir: PathBuf,
    wal: WriteAheadLog,
    table: RwLock<ContactTable>,
    config: PersistentConfig,
    _lock: DirLock,
}

impl std::fmt::Debug for PersistentContactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentContactStore")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentContactStore {
    /// Open (or create) a store in `dir`: lock, load snapshot, replay WAL.
    ///
    /// # Errors
    /// - `BackendError` if the directory cannot be created or is locked
    /// - `Corrupted` if the snapshot fails its integrity checks
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| io_err("create store directory", &e))?;
        let lock = DirLock::acquire(dir).map_err(|e| io_err("lock store directory", &e))?;

        let base = snapshot::load(dir).map_err(|e| io_err("load snapshot", &e))?;
        let mut table = ContactTable::from_snapshot(base);

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| io_err("open WAL", &e))?;
        let replayed = Self::replay(&wal, &mut table)?;
        if replayed > 0 {
            tracing::info!(
                dir = %dir.display(),
                replayed,
                records = table.len(),
                "replayed contact WAL"
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            wal,
            table: RwLock::new(table),
            config,
            _lock: lock,
        })
    }

    fn replay(wal: &WriteAheadLog, table: &mut ContactTable) -> Result<u64, StorageError> {
        let mut count = 0;
        for entry in wal.iter().map_err(|e| io_err("read WAL", &e))? {
            // `open` already cut any torn tail, so a failure here is real corruption.
            let entry = entry.map_err(|e| io_err("replay WAL", &e))?;
            match entry.kind {
                WalEntryKind::Create(contact) => table.apply_create(contact),
                WalEntryKind::Demote(demotion) => table.apply_demotion(&demotion),
                WalEntryKind::Commit(prepared) => table.apply_commit(&prepared),
                WalEntryKind::Clear { .. } => {
                    table.apply_clear();
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Directory holding the store files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fold the WAL into a fresh snapshot and truncate it.
    ///
    /// Writers are blocked for the duration. If this fails partway, the WAL
    /// still holds every entry and replay on the next open converges.
    ///
    /// # Errors
    /// Returns `BackendError` on I/O failure.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let table = self.table.write().map_err(|_| lock_err("contact.compact"))?;

        let entries = self.wal.current_sequence();
        let wal_size_before = self.wal.size_bytes().map_err(|e| io_err("stat WAL", &e))?;
        let snapshot = table.snapshot();
        let records = snapshot.contacts.len();

        snapshot::write(&self.dir, snapshot).map_err(|e| io_err("write snapshot", &e))?;
        self.wal.truncate().map_err(|e| io_err("truncate WAL", &e))?;
        let wal_size_after = self.wal.size_bytes().map_err(|e| io_err("stat WAL", &e))?;

        tracing::info!(entries, records, wal_size_before, wal_size_after, "compacted contact WAL");
        Ok(CompactionResult {
            entries_compacted: entries,
            records,
            wal_size_before,
            wal_size_after,
        })
    }

    /// Compact if the WAL has outgrown `max_wal_size`.
    ///
    /// # Errors
    /// See [`PersistentContactStore::compact`].
    pub fn maybe_compact(&self) -> Result<Option<CompactionResult>, StorageError> {
        let size = self.wal.size_bytes().map_err(|e| io_err("stat WAL", &e))?;
        if size < self.config.max_wal_size {
            return Ok(None);
        }
        self.compact().map(Some)
    }

    fn log(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind)
            .map(|_| ())
            .map_err(|e| io_err("append WAL", &e))
    }
}

impl ContactStore for PersistentContactStore {
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
        self.log(WalEntryKind::Create(contact.clone()))?;
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
        if demotion.ids.is_empty() {
            return Ok(());
        }
        self.log(WalEntryKind::Demote(demotion.clone()))?;
        table.apply_demotion(&demotion);
        Ok(())
    }

    fn commit(&self, commit: ResolutionCommit) -> Result<Option<Contact>, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("contact.commit"))?;
        let prepared = table.prepare_commit(commit, Utc::now())?;
        if prepared.demotion.ids.is_empty() && prepared.created.is_none() {
            return Ok(None);
        }
        self.log(WalEntryKind::Commit(prepared.clone()))?;
        table.apply_commit(&prepared);
        Ok(prepared.created)
    }

    fn find_all(&self) -> Result<Vec<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.find_all"))?;
        Ok(table.all())
    }

    fn delete_all(&self) -> Result<usize, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("contact.delete_all"))?;
        let removed = table.len();
        self.log(WalEntryKind::Clear { removed })?;
        Ok(table.apply_clear())
    }
}

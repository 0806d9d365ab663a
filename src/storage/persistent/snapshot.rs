//! Table snapshots written during compaction.
//!
//! A snapshot is a header plus a single codec frame holding the whole table
//! (records and the id counter). It is written to a temporary file, fsynced
//! and renamed into place, so a crash leaves either the old or the new
//! snapshot, never a partial one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::table::TableSnapshot;

use super::codec;

/// Snapshot file name inside the store directory.
pub const SNAPSHOT_FILE: &str = "contacts.snapshot";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFrame {
    written_at: DateTime<Utc>,
    table: TableSnapshot,
}

/// Location of the snapshot for a store directory.
#[must_use]
pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Load the snapshot, or an empty table image if none was written yet.
pub fn load(dir: &Path) -> IoResult<TableSnapshot> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(TableSnapshot::default());
    }

    let mut reader = BufReader::new(File::open(&path)?);
    codec::read_header(&mut reader)?;
    let frame: SnapshotFrame = codec::decode(&mut reader)?;
    Ok(frame.table)
}

/// Atomically replace the snapshot with `table`.
pub fn write(dir: &Path, table: TableSnapshot) -> IoResult<()> {
    let final_path = snapshot_path(dir);
    let temp_path = final_path.with_extension("snapshot.tmp");

    let result = write_temp(&temp_path, table).and_then(|()| fs::rename(&temp_path, &final_path));
    if result.is_err() && temp_path.exists() {
        let _ = fs::remove_file(&temp_path);
    }
    result?;

    sync_dir(dir);
    Ok(())
}

fn write_temp(path: &Path, table: TableSnapshot) -> IoResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);

    codec::write_header(&mut writer)?;
    let frame = SnapshotFrame {
        written_at: Utc::now(),
        table,
    };
    writer.write_all(&codec::encode(&frame)?)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Persist the rename itself; failure only weakens durability of the rename.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::contact::{Contact, ContactId, Identifiers, NewContact};

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempdir().unwrap();
        let table = load(dir.path()).unwrap();
        assert!(table.contacts.is_empty());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let ids = Identifiers::pair("a@x.com", "1").unwrap();
        let contact = Contact::from_new(ContactId::new(4), NewContact::primary(&ids), Utc::now());

        write(
            dir.path(),
            TableSnapshot {
                next_id: 9,
                contacts: vec![contact.clone()],
            },
        )
        .unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.next_id, 9);
        assert_eq!(loaded.contacts, vec![contact]);
        assert!(!snapshot_path(dir.path()).with_extension("snapshot.tmp").exists());
    }
}

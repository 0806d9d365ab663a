//! Write-Ahead Log for the persistent contact store.
//!
//! Every mutation is appended (and optionally fsynced) before it is applied to
//! the in-memory table. On open the log is replayed on top of the latest
//! snapshot.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame of WalEntry]
//! [ENTRY 2: codec frame of WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::Contact;
use crate::storage::table::{PreparedCommit, PreparedDemotion};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The logged mutation.
    pub kind: WalEntryKind,
}

/// The logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A record was created (id already assigned).
    Create(Contact),
    /// Primaries were demoted under a survivor.
    Demote(PreparedDemotion),
    /// An `identify` resolution: demotions plus optional creation.
    Commit(PreparedCommit),
    /// Every record was deleted; `next_id` is preserved.
    Clear {
        /// Number of records removed.
        removed: usize,
    },
}

fn poisoned() -> std::io::Error {
    std::io::Error::new(ErrorKind::Other, "poisoned lock: wal")
}

/// Append-only log, thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

struct WalState {
    writer: BufWriter<File>,
    sequence: u64,
    /// Byte length of the acknowledged prefix.
    len: u64,
    /// Set when a failed append could not be rolled back.
    failed: bool,
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing file is scanned for its last valid sequence number; a torn
    /// tail left by a crash is cut off so new entries append after the last
    /// good frame.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let exists = path.exists() && std::fs::metadata(path)?.len() >= 5;

        let sequence = if exists {
            let (last_seq, valid_len) = Self::scan(path)?;
            let file = OpenOptions::new().write(true).open(path)?;
            if file.metadata()?.len() > valid_len {
                tracing::warn!(
                    path = %path.display(),
                    valid_len,
                    "truncating torn WAL tail"
                );
                file.set_len(valid_len)?;
                if sync_on_write {
                    file.sync_all()?;
                }
            }
            last_seq
        } else {
            Self::write_fresh(path, sync_on_write)?;
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                sequence,
                len,
                failed: false,
            }),
            sync_on_write,
        })
    }

    /// Append an entry; returns its sequence number.
    ///
    /// A failed write is cut back to the last acknowledged frame so later
    /// appends never land behind a partial one. If that cut fails too, the
    /// log refuses further appends until reopened.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        if state.failed {
            return Err(std::io::Error::new(
                ErrorKind::Other,
                "WAL disabled after a failed append; reopen the store",
            ));
        }

        let candidate = state.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        if let Err(e) = self.write_frame(&mut state.writer, &encoded) {
            let acknowledged = state.len;
            if let Err(rollback) = self.rollback(&mut state, acknowledged) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial WAL append"
                );
                state.failed = true;
            }
            return Err(e);
        }

        state.len += encoded.len() as u64;
        state.sequence = candidate;
        Ok(candidate)
    }

    fn write_frame(&self, writer: &mut BufWriter<File>, frame: &[u8]) -> IoResult<()> {
        writer.write_all(frame)?;
        writer.flush()?;
        if self.sync_on_write {
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Discards buffered bytes and cuts the file back to `len`.
    fn rollback(&self, state: &mut WalState, len: u64) -> IoResult<()> {
        let fresh = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        // `into_parts` hands back the unflushed buffer instead of writing it.
        let (_file, _unflushed) = std::mem::replace(&mut state.writer, fresh).into_parts();

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Iterate over all entries, stopping silently at a torn tail.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> u64 {
        self.state.lock().map(|s| s.sequence).unwrap_or(0)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drop every entry, leaving only the header.
    ///
    /// Only call this after the state has been captured in a durable snapshot.
    pub fn truncate(&self) -> IoResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.writer.flush()?;

        let mut file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        codec::write_header(&mut file)?;
        if self.sync_on_write {
            file.sync_all()?;
        }

        state.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        state.len = file.metadata()?.len();
        state.sequence = 0;
        state.failed = false;
        Ok(())
    }

    fn write_fresh(path: &Path, sync_on_write: bool) -> IoResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        codec::write_header(&mut file)?;
        if sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Returns the last valid sequence and the byte length of the valid prefix.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last_seq = 0;
        let mut valid_len = iter.position()?;

        while let Some(entry) = iter.next() {
            match entry {
                Ok(entry) => {
                    last_seq = entry.sequence;
                    valid_len = iter.position()?;
                }
                Err(e) => {
                    tracing::warn!(
                        sequence = last_seq + 1,
                        error = %e,
                        "WAL corruption detected; replay stops at last valid entry"
                    );
                    break;
                }
            }
        }

        Ok((last_seq, valid_len))
    }
}

/// Iterator over WAL entries.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let _version = codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

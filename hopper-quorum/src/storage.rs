//! Acceptor storage trait and implementations.
//!
//! An acceptor's promises must survive a crash: if it forgets that it
//! promised ballot 9 and later accepts ballot 6, two different values can
//! be decided. The [`AcceptorStorage`] trait abstracts that durable state.
//!
//! ## What gets stored?
//!
//! - **epoch**: the election instance the acceptor is voting in.
//! - **promised**: the highest ballot the acceptor will not go below.
//! - **accepted**: the last `(ballot, value)` it accepted.
//! - **learned**: the newest decision it has been told about.
//!
//! [`InMemoryAcceptorStorage`] loses everything on drop and backs tests.
//! [`FileAcceptorStorage`] writes the record as JSON to a temporary file,
//! fsyncs it, renames it over the previous record and fsyncs the directory
//! so the rename itself survives a power loss.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ballot::{Ballot, Epoch};
use crate::types::{Decision, Proposal};

/// Errors from acceptor storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or writing the record file failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The record on disk could not be parsed.
    #[error("corrupt acceptor record {path}: {source}")]
    Corrupt {
        /// File involved.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be serialized.
    #[error("failed to serialize acceptor record: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Everything an acceptor must remember across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptorRecord {
    /// Election instance `promised` and `accepted` belong to.
    #[serde(default)]
    pub epoch: Epoch,
    /// Highest ballot promised.
    pub promised: Ballot,
    /// Last accepted value.
    pub accepted: Option<Proposal>,
    /// Newest learned decision.
    pub learned: Option<Decision>,
}

/// Durable acceptor state.
///
/// `store` must not return before the record is durable. Callers persist
/// before replying, so a crash after a reply never loses a promise.
pub trait AcceptorStorage: Send {
    /// Load the current record. A fresh store returns the default record.
    fn load(&self) -> Result<AcceptorRecord, StorageError>;

    /// Replace the record.
    fn store(&mut self, record: &AcceptorRecord) -> Result<(), StorageError>;
}

/// In-memory implementation of [`AcceptorStorage`].
#[derive(Debug, Default)]
pub struct InMemoryAcceptorStorage {
    record: AcceptorRecord,
}

impl InMemoryAcceptorStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AcceptorStorage for InMemoryAcceptorStorage {
    fn load(&self) -> Result<AcceptorRecord, StorageError> {
        Ok(self.record.clone())
    }

    fn store(&mut self, record: &AcceptorRecord) -> Result<(), StorageError> {
        self.record = record.clone();
        Ok(())
    }
}

/// File-backed implementation of [`AcceptorStorage`].
///
/// The record lives in a single JSON file. Writes go to `<path>.tmp`, are
/// fsynced, then renamed over `<path>`, and the parent directory is fsynced
/// before `store` returns. A crash mid-write leaves the previous record
/// intact; a crash after `store` returns keeps the new one.
#[derive(Debug)]
pub struct FileAcceptorStorage {
    path: PathBuf,
    tmp_path: PathBuf,
    cached: AcceptorRecord,
}

impl FileAcceptorStorage {
    /// Open the record at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// `Io` if the file exists but cannot be read, `Corrupt` if it does not
    /// parse.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let tmp_path = path.with_extension("tmp");

        let cached = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| {
                StorageError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => AcceptorRecord::default(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        info!(
            path = %path.display(),
            promised = %cached.promised,
            "opened acceptor record"
        );

        Ok(Self {
            path,
            tmp_path,
            cached,
        })
    }

    /// Location of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl AcceptorStorage for FileAcceptorStorage {
    fn load(&self) -> Result<AcceptorRecord, StorageError> {
        Ok(self.cached.clone())
    }

    fn store(&mut self, record: &AcceptorRecord) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(record).map_err(StorageError::Serialize)?;

        let mut file = File::create(&self.tmp_path).map_err(|e| self.io_err(e))?;
        file.write_all(&bytes).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);
        fs::rename(&self.tmp_path, &self.path).map_err(|e| self.io_err(e))?;
        sync_parent_dir(&self.path).map_err(|e| self.io_err(e))?;

        debug!(
            path = %self.path.display(),
            promised = %record.promised,
            "acceptor record persisted"
        );
        self.cached = record.clone();
        Ok(())
    }
}

/// Flush the directory entry of `path` so a completed rename is durable.
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

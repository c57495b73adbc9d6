//! Result persistence keyed by task checksum.
//!
//! [`ResultStore`] abstracts where records live. [`FsStore`] keeps one directory per
//! checksum under a cache root (`<root>/<checksum>/_result.bin`) so records survive the
//! process and can be shared between workers pointed at the same root. [`MemoryStore`] is
//! used by tests and by callers that only want in-process reuse.

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    checksum::Checksum,
    record::{RecordError, ResultRecord},
};

/// File name of the record inside a checksum directory.
pub const RESULT_FILE_NAME: &str = "_result.bin";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("result store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Shared trait implemented by result persistence backends.
pub trait ResultStore: Send + Sync {
    /// Load the record stored for `checksum`, if any.
    fn load(&self, checksum: &Checksum) -> Result<Option<ResultRecord>, StoreError>;

    /// Persist `record` under `checksum`. A stored non-errored record is never replaced.
    fn save(&self, checksum: &Checksum, record: &ResultRecord) -> Result<(), StoreError>;

    fn contains(&self, checksum: &Checksum) -> Result<bool, StoreError> {
        Ok(self.load(checksum)?.is_some())
    }

    /// Checksums with a stored record, sorted.
    fn list(&self) -> Result<Vec<Checksum>, StoreError>;
}

/// In-memory store shared between clones.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<Checksum, ResultRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryStore {
    fn load(&self, checksum: &Checksum) -> Result<Option<ResultRecord>, StoreError> {
        let records = self.records.read().expect("result store lock poisoned");
        Ok(records.get(checksum).cloned())
    }

    fn save(&self, checksum: &Checksum, record: &ResultRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().expect("result store lock poisoned");
        if records.get(checksum).is_some_and(|existing| !existing.errored()) {
            return Ok(());
        }
        records.insert(checksum.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checksum>, StoreError> {
        let records = self.records.read().expect("result store lock poisoned");
        let mut checksums = records.keys().cloned().collect::<Vec<_>>();
        checksums.sort();
        Ok(checksums)
    }
}

/// On-disk store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the record file for `checksum`.
    pub fn record_path(&self, checksum: &Checksum) -> PathBuf {
        self.root.join(checksum.as_str()).join(RESULT_FILE_NAME)
    }

    fn read_record(path: &Path) -> Result<Option<ResultRecord>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(ResultRecord::from_bytes(&bytes)?)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::Io(error)),
        }
    }
}

impl ResultStore for FsStore {
    fn load(&self, checksum: &Checksum) -> Result<Option<ResultRecord>, StoreError> {
        Self::read_record(&self.record_path(checksum))
    }

    fn save(&self, checksum: &Checksum, record: &ResultRecord) -> Result<(), StoreError> {
        let path = self.record_path(checksum);
        match Self::read_record(&path) {
            Ok(Some(existing)) if !existing.errored() => {
                debug!(checksum = %checksum, "result already stored; keeping existing record");
                return Ok(());
            }
            Ok(_) => {}
            Err(StoreError::Record(error)) => {
                warn!(checksum = %checksum, error = %error, "replacing unreadable result record");
            }
            Err(error) => return Err(error),
        }

        let directory = self.root.join(checksum.as_str());
        fs::create_dir_all(&directory)?;
        let mut staging = NamedTempFile::new_in(&directory)?;
        staging.write_all(&record.to_bytes()?)?;
        staging.persist(&path).map_err(|error| error.error)?;
        debug!(checksum = %checksum, path = %path.display(), errored = record.errored(), "stored result record");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Checksum>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StoreError::Io(error)),
        };

        let mut checksums = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().join(RESULT_FILE_NAME).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                checksums.push(Checksum::new(name));
            }
        }
        checksums.sort();
        Ok(checksums)
    }
}

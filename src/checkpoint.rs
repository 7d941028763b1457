//! Durable checkpoint of the last fully processed block height.
//!
//! The record is a small JSON document `{ "lastBlock": <u64> }` at a fixed path. Absence or
//! corruption is treated as height 0, so a damaged record degrades into a wider backfill
//! rather than an error. The store never decrements the height on its own.

use std::{fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    #[serde(rename = "lastBlock")]
    last_block: u64,
}

/// File-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the persisted height, or 0 if the record is absent or unparsable.
    ///
    /// Never errors: a missing or damaged record widens the next backfill instead of
    /// halting the relay.
    #[must_use]
    pub fn read(&self) -> u64 {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            debug!(path = %self.path.display(), "no checkpoint record, starting from 0");
            return 0;
        };

        match serde_json::from_str::<CheckpointRecord>(&raw) {
            Ok(record) => record.last_block,
            Err(error) => {
                debug!(
                    path = %self.path.display(),
                    error = %error,
                    "unparsable checkpoint record, starting from 0"
                );
                0
            }
        }
    }

    /// Persists `height`, creating the backing location if absent.
    ///
    /// The record is written to a sibling temp file and renamed into place so a crash
    /// mid-write cannot leave a truncated record behind.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; callers log and continue, since a missed write
    /// only means the next restart re-backfills an already-relayed range.
    pub fn write(&self, height: u64) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = CheckpointRecord { last_block: height };
        let body = serde_json::to_string(&record)?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)
    }
}

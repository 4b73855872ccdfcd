//! Batches of discovered type names and their on-disk form.
//!
//! A batch collects unique names from the moment it starts until its
//! window elapses. It is persisted after it grows so that names found in
//! short sessions survive restarts.
//!
//! # File format
//!
//! ```text
//! {"version":1,"startedAt":<unix ms>,"types":["A","B",...]}
//! ```
//!
//! Names are written sorted. The file is replaced atomically.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::ReaperConfig;
use crate::error::{ReaperError, Result};
use crate::persist;

pub const BATCH_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    types: BTreeSet<String>,
    started_at: SystemTime,
}

impl Batch {
    /// Empty batch whose window starts now.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    pub fn starting_at(started_at: SystemTime) -> Self {
        Self {
            types: BTreeSet::new(),
            started_at,
        }
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Add names, returning how many were new.
    pub fn add_types<I, S>(&mut self, types: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        types
            .into_iter()
            .map(|t| self.types.insert(t.into()))
            .filter(|inserted| *inserted)
            .count()
    }

    /// Add one name, returning whether it was new.
    pub fn add_type(&mut self, name: &str) -> bool {
        if self.types.contains(name) {
            return false;
        }
        self.types.insert(name.to_string())
    }

    /// Fold `other` into this batch. The merged window starts at the
    /// earlier of the two start times.
    pub fn merge(&mut self, other: Batch) {
        self.started_at = self.started_at.min(other.started_at);
        self.types.extend(other.types);
    }

    /// All names, sorted.
    pub fn all_types(&self) -> Vec<String> {
        self.types.iter().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Time since the window started. A clock that moved backwards counts
    /// as no time elapsed.
    pub fn elapsed_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.started_at).unwrap_or(Duration::ZERO)
    }

    pub fn should_keep_batching(&self, config: &ReaperConfig) -> bool {
        self.should_keep_batching_at(config, SystemTime::now())
    }

    pub fn should_keep_batching_at(&self, config: &ReaperConfig, now: SystemTime) -> bool {
        self.elapsed_at(now) < config.batch_window
    }

    fn to_record(&self) -> BatchRecord {
        BatchRecord {
            version: BATCH_FORMAT_VERSION,
            started_at: unix_millis(self.started_at),
            types: self.all_types(),
        }
    }

    fn from_record(record: BatchRecord) -> Result<Self> {
        if record.version != BATCH_FORMAT_VERSION {
            return Err(ReaperError::InvalidFormat(format!(
                "unsupported batch version {}",
                record.version
            )));
        }
        Ok(Self {
            types: record.types.into_iter().collect(),
            started_at: UNIX_EPOCH + Duration::from_millis(record.started_at),
        })
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRecord {
    version: u32,
    started_at: u64,
    types: Vec<String>,
}

// ── Store ──────────────────────────────────────────────────────────

/// The persisted batch file.
#[derive(Debug, Clone)]
pub struct BatchStore {
    path: PathBuf,
}

impl BatchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previously persisted batch, or a fresh one when the file is absent,
    /// unreadable or corrupt.
    pub fn load_from_disk(&self) -> Batch {
        match self.try_load() {
            Ok(Some(batch)) => batch,
            Ok(None) => Batch::new(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    code = e.code(),
                    error = %e,
                    "discarding unreadable batch"
                );
                Batch::new()
            }
        }
    }

    /// Strict load: `Ok(None)` when absent, errors when unreadable or
    /// corrupt.
    pub fn try_load(&self) -> Result<Option<Batch>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: BatchRecord = serde_json::from_slice(&bytes)?;
        Batch::from_record(record).map(Some)
    }

    pub fn save_batch(&self, batch: &Batch) -> Result<()> {
        persist::write_json_atomic(&self.path, &batch.to_record())
    }

    /// Remove the persisted batch; a missing file is not an error.
    pub fn clear_from_disk(&self) -> Result<()> {
        persist::remove_if_exists(&self.path)
    }
}

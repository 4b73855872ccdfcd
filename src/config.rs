//! Sampler configuration.
//!
//! Two knobs: the fraction of events that get sampled and the length of a
//! batch window. Configuration arrives either as a JSON dictionary (for
//! example fetched from a server) or from a persistent key-value store that
//! outlives the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ReaperError, Result};
use crate::persist;

/// Store key of the sample percentage.
pub const SAMPLE_PERCENTAGE_KEY: &str = "reaper.samplePercentage";
/// Store key of the batch window, in whole seconds.
pub const BATCH_WINDOW_KEY: &str = "reaper.batchWindow";

/// Dictionary keys, as delivered in a JSON configuration payload.
const DICT_SAMPLE_PERCENTAGE: &str = "samplePercentage";
const DICT_BATCH_WINDOW: &str = "batchWindow";

pub const DEFAULT_SAMPLE_PERCENTAGE: f64 = 0.1;
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaperConfig {
    /// Probability in `[0, 1]` that an event is sampled.
    pub sample_percentage: f64,
    /// How long names accumulate before the batch is delivered.
    pub batch_window: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sample_percentage: DEFAULT_SAMPLE_PERCENTAGE,
            batch_window: DEFAULT_BATCH_WINDOW,
        }
    }
}

impl ReaperConfig {
    /// Validated construction. Percentages outside `[0, 1]` are clamped;
    /// NaN is rejected.
    pub fn new(sample_percentage: f64, batch_window: Duration) -> Result<Self> {
        Ok(Self {
            sample_percentage: clamp_percentage(sample_percentage)?,
            batch_window,
        })
    }

    pub fn with_sample_percentage(mut self, sample_percentage: f64) -> Result<Self> {
        self.sample_percentage = clamp_percentage(sample_percentage)?;
        Ok(self)
    }

    pub fn with_batch_window(mut self, batch_window: Duration) -> Self {
        self.batch_window = batch_window;
        self
    }

    /// Parse `{"samplePercentage": <number>, "batchWindow": <seconds>}`.
    /// Missing keys keep their defaults.
    pub fn from_dictionary(json: &Value) -> Result<Self> {
        let map = json
            .as_object()
            .ok_or_else(|| ReaperError::InvalidConfig("expected a JSON object".into()))?;
        Self::from_values(
            map.get(DICT_SAMPLE_PERCENTAGE),
            map.get(DICT_BATCH_WINDOW),
            (DICT_SAMPLE_PERCENTAGE, DICT_BATCH_WINDOW),
        )
    }

    /// Load from a persistent store; absent keys keep their defaults.
    pub fn from_store(store: &dyn KeyValueStore) -> Result<Self> {
        let percentage = store.get(SAMPLE_PERCENTAGE_KEY)?;
        let window = store.get(BATCH_WINDOW_KEY)?;
        Self::from_values(
            percentage.as_ref(),
            window.as_ref(),
            (SAMPLE_PERCENTAGE_KEY, BATCH_WINDOW_KEY),
        )
    }

    pub fn save_to_store(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(SAMPLE_PERCENTAGE_KEY, Value::from(self.sample_percentage))?;
        store.set(BATCH_WINDOW_KEY, Value::from(self.batch_window.as_secs()))?;
        Ok(())
    }

    fn from_values(
        percentage: Option<&Value>,
        window: Option<&Value>,
        (percentage_key, window_key): (&str, &str),
    ) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = percentage {
            let p = value.as_f64().ok_or_else(|| {
                ReaperError::InvalidConfig(format!("{} must be a number, got {}", percentage_key, value))
            })?;
            config.sample_percentage = clamp_percentage(p)?;
        }

        if let Some(value) = window {
            let secs = value.as_u64().ok_or_else(|| {
                ReaperError::InvalidConfig(format!(
                    "{} must be a non-negative whole number of seconds, got {}",
                    window_key, value
                ))
            })?;
            config.batch_window = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn clamp_percentage(p: f64) -> Result<f64> {
    if p.is_nan() {
        return Err(ReaperError::InvalidConfig("sample percentage is NaN".into()));
    }
    if !(0.0..=1.0).contains(&p) {
        tracing::warn!(sample_percentage = p, "sample percentage out of range, clamping");
    }
    Ok(p.clamp(0.0, 1.0))
}

// ── Key-value store ────────────────────────────────────────────────

/// Persistent key-value store surviving restarts.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// [`KeyValueStore`] backed by a single JSON object file.
///
/// Every `set` rewrites the whole file atomically. A corrupt file reads as
/// empty and is replaced on the next write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, Value> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config store unreadable");
                return BTreeMap::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config store corrupt, ignoring");
                BTreeMap::new()
            }
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load().remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load();
        map.insert(key.to_string(), value);
        persist::write_json_atomic(&self.path, &map)
    }
}

//! Sampler statistics
//!
//! Lightweight, thread-safe counters describing what the sampler has done
//! since it started. Every counter is an `AtomicU64` incremented with
//! relaxed ordering, so recording never blocks the calling thread.
//!
//! # Example
//!
//! ```no_run
//! use reaper::stats::SamplerStats;
//!
//! let stats = SamplerStats::new();
//! stats.record_event(true);
//! stats.record_candidates(4, 3);
//!
//! let snapshot = stats.snapshot();
//! println!("resolved: {}", snapshot.resolved);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Thread-safe sampler counters.
///
/// Create one per [`crate::Reaper`] and share it (wrapped in `Arc`) with the
/// flush worker.
#[derive(Debug)]
pub struct SamplerStats {
    // ========================================================================
    // Sampling
    // ========================================================================
    /// Events offered to the sampler
    events: AtomicU64,

    /// Events selected by the sampling draw
    samples: AtomicU64,

    /// Candidate pointers examined in selected events
    candidates: AtomicU64,

    /// Candidates decoded to a name
    resolved: AtomicU64,

    /// Candidates that resolved to Unknown
    unknown: AtomicU64,

    // ========================================================================
    // Persistence
    // ========================================================================
    /// Successful batch writes
    persisted: AtomicU64,

    /// Failed batch writes or clears
    persist_failures: AtomicU64,

    /// Completed batches handed to the notification handler
    batches_delivered: AtomicU64,

    started_at: Instant,
}

/// Point-in-time copy of [`SamplerStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub events: u64,
    pub samples: u64,
    pub candidates: u64,
    pub resolved: u64,
    pub unknown: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub batches_delivered: u64,
    /// Seconds since the stats were created
    pub uptime_secs: u64,
}

impl SamplerStats {
    pub fn new() -> Self {
        Self {
            events: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            candidates: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record an offered event and whether it was sampled.
    pub fn record_event(&self, sampled: bool) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if sampled {
            self.samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the outcome of decoding one sample's candidates.
    pub fn record_candidates(&self, examined: u64, resolved: u64) {
        self.candidates.fetch_add(examined, Ordering::Relaxed);
        self.resolved.fetch_add(resolved, Ordering::Relaxed);
        self.unknown
            .fetch_add(examined.saturating_sub(resolved), Ordering::Relaxed);
    }

    pub fn record_persist(&self, ok: bool) {
        let counter = if ok {
            &self.persisted
        } else {
            &self.persist_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for SamplerStats {
    fn default() -> Self {
        Self::new()
    }
}

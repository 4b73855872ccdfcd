//! Sampling scheduler.
//!
//! The host calls [`Reaper::on_event`] from its hot paths with a few
//! candidate metadata pointers. A random draw decides whether the event is
//! sampled; sampled candidates are decoded and folded into the current
//! batch. Persisting the grown batch and delivering completed ones happen
//! on the flush worker.

use std::sync::Arc;
use std::time::SystemTime;

use crate::batch::{Batch, BatchStore};
use crate::config::ReaperConfig;
use crate::error::Result;
use crate::memory::{Address, MemoryRegions};
use crate::metadata::{MetadataDecoder, RuntimeNamer};
use crate::stats::{SamplerStats, StatsSnapshot};

use super::accumulator::{Accumulator, CommitOutcome};
use super::flush::{FlushJob, FlushWorker};

pub struct Reaper<M, N> {
    config: ReaperConfig,
    decoder: MetadataDecoder<M, N>,
    accumulator: Arc<Accumulator>,
    worker: FlushWorker,
    stats: Arc<SamplerStats>,
}

impl<M: MemoryRegions, N: RuntimeNamer> Reaper<M, N> {
    /// Start sampling.
    ///
    /// Returns without touching the disk. The flush worker then loads the
    /// batch persisted by a previous run: while its window is open it is
    /// merged into the current batch, otherwise it is delivered right away.
    pub fn start<H>(config: ReaperConfig, store: BatchStore, decoder: MetadataDecoder<M, N>, handler: H) -> Result<Self>
    where
        H: Fn(Vec<String>) + Send + Sync + 'static,
    {
        let stats = Arc::new(SamplerStats::new());
        let accumulator = Arc::new(Accumulator::new(Batch::new()));
        let worker = FlushWorker::spawn(store, Arc::clone(&accumulator), Arc::new(handler), Arc::clone(&stats))?;
        worker.submit(FlushJob::Resume(config))?;

        Ok(Self {
            config,
            decoder,
            accumulator,
            worker,
            stats,
        })
    }

    /// Offer an event. Returns whether it was sampled.
    ///
    /// Never fails: flush problems are logged.
    pub fn on_event(&self, candidates: &[Address]) -> bool {
        let p = self.config.sample_percentage;
        let sampled = p > 0.0 && fastrand::f64() < p;
        self.stats.record_event(sampled);
        if !sampled {
            return false;
        }

        if let Err(e) = self.sample_at(candidates, SystemTime::now()) {
            tracing::warn!(code = e.code(), error = %e, "sample not flushed");
        }
        true
    }

    /// Sample `candidates` unconditionally.
    pub fn sample_now(&self, candidates: &[Address]) -> Result<()> {
        self.sample_at(candidates, SystemTime::now())
    }

    /// Sample `candidates` as if the current time were `now`.
    pub fn sample_at(&self, candidates: &[Address], now: SystemTime) -> Result<()> {
        let names = Accumulator::decode_candidates(&self.decoder, candidates);
        self.stats
            .record_candidates(candidates.len() as u64, names.len() as u64);
        self.commit(names, now).map(|_| ())
    }

    /// Deliver the current batch if its window elapsed at `now`, even
    /// without new samples. Returns whether a batch was completed.
    pub fn check_window_at(&self, now: SystemTime) -> Result<bool> {
        self.commit(Vec::new(), now)
    }

    /// Fold `names` into the batch and queue the resulting flush job while
    /// the batch guard is held. A commit without new names still queues a
    /// write when the previous one failed. Returns whether the window
    /// completed.
    fn commit(&self, names: Vec<String>, now: SystemTime) -> Result<bool> {
        self.accumulator.commit(names, &self.config, now, |outcome| match outcome {
            CommitOutcome::Unchanged => Ok(false),
            CommitOutcome::Persist(fresh) => self.worker.submit(FlushJob::Persist(fresh)).map(|_| false),
            CommitOutcome::Completed(batch) => {
                tracing::info!(types = batch.len(), "batch window elapsed");
                self.worker
                    .submit(FlushJob::Deliver {
                        names: batch.all_types(),
                        next_started_at: now,
                    })
                    .map(|_| true)
            }
        })
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    pub fn decoder(&self) -> &MetadataDecoder<M, N> {
        &self.decoder
    }

    /// Copy of the batch being accumulated.
    pub fn current_batch(&self) -> Batch {
        self.accumulator.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drain pending flush jobs and stop the worker. Later samples still
    /// accumulate in memory but are no longer persisted.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}

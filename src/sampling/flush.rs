//! Off-path flush worker.
//!
//! Loading, persisting and delivering batches all happen on a dedicated
//! thread fed by a channel, so the sampling path never blocks on disk or on
//! the handler. Jobs run in submission order.
//!
//! The worker keeps its own copy of the current batch. Jobs are queued
//! under the accumulator's guard, so replaying them in order keeps that
//! copy equal to the accumulator's batch without cloning it per sample.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::batch::{Batch, BatchStore};
use crate::config::ReaperConfig;
use crate::error::{ReaperError, Result};
use crate::stats::SamplerStats;

use super::accumulator::Accumulator;

/// Receives the names of each completed batch.
pub type BatchHandler = Arc<dyn Fn(Vec<String>) + Send + Sync>;

#[derive(Debug)]
pub enum FlushJob {
    /// Load the batch left by a previous run. Merge it into the
    /// accumulator while its window is open, deliver it otherwise.
    Resume(ReaperConfig),
    /// Add names to the worker's copy and write it over the persisted
    /// batch. An empty list rewrites the copy as is.
    Persist(Vec<String>),
    /// Hand a completed batch to the handler, then clear persisted state.
    /// The next batch starts at `next_started_at`. An empty batch only
    /// clears.
    Deliver {
        names: Vec<String>,
        next_started_at: SystemTime,
    },
}

pub struct FlushWorker {
    tx: Mutex<Option<Sender<FlushJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushWorker {
    pub fn spawn(
        store: BatchStore,
        accumulator: Arc<Accumulator>,
        handler: BatchHandler,
        stats: Arc<SamplerStats>,
    ) -> Result<Self> {
        let (tx, rx) = unbounded();
        let flusher = Flusher {
            mirror: accumulator.snapshot(),
            store,
            accumulator,
            handler,
            stats,
        };
        let handle = thread::Builder::new()
            .name("reaper-flush".to_string())
            .spawn(move || flusher.run(rx))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job. Fails once the worker has shut down.
    pub fn submit(&self, job: FlushJob) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| ReaperError::WorkerUnavailable),
            None => Err(ReaperError::WorkerUnavailable),
        }
    }

    /// Stop accepting jobs, drain the queue and join the thread.
    pub fn shutdown(&self) {
        // Dropping the sender ends the worker's receive loop once drained.
        drop(self.tx.lock().unwrap_or_else(|e| e.into_inner()).take());
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            // The last owner may be dropped by the handler on the worker itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("flush worker panicked");
            }
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Flusher {
    /// Worker-side copy of the accumulator's batch.
    mirror: Batch,
    store: BatchStore,
    accumulator: Arc<Accumulator>,
    handler: BatchHandler,
    stats: Arc<SamplerStats>,
}

impl Flusher {
    fn run(mut self, rx: Receiver<FlushJob>) {
        for job in rx.iter() {
            match job {
                FlushJob::Resume(config) => self.resume(&config),
                FlushJob::Persist(names) => {
                    self.mirror.add_types(names);
                    self.persist();
                }
                FlushJob::Deliver {
                    names,
                    next_started_at,
                } => {
                    self.mirror = Batch::starting_at(next_started_at);
                    self.deliver(names);
                }
            }
        }
    }

    fn resume(&mut self, config: &ReaperConfig) {
        let persisted = self.store.load_from_disk();
        if persisted.should_keep_batching(config) {
            tracing::debug!(types = persisted.len(), "resuming persisted batch");
            self.mirror = self.accumulator.adopt(persisted);
        } else {
            self.deliver(persisted.all_types());
            self.mirror = self.accumulator.snapshot();
        }
    }

    fn persist(&self) {
        match self.store.save_batch(&self.mirror) {
            Ok(()) => {
                self.stats.record_persist(true);
                tracing::debug!(types = self.mirror.len(), "batch persisted");
            }
            Err(e) => {
                self.stats.record_persist(false);
                self.accumulator.mark_unsaved();
                tracing::warn!(
                    path = %self.store.path().display(),
                    code = e.code(),
                    error = %e,
                    "failed to persist batch"
                );
            }
        }
    }

    fn deliver(&self, names: Vec<String>) {
        if !names.is_empty() {
            let count = names.len();
            let handler = Arc::clone(&self.handler);
            match catch_unwind(AssertUnwindSafe(move || handler(names))) {
                Ok(()) => {
                    self.stats.record_delivery();
                    tracing::info!(types = count, "batch delivered");
                }
                Err(_) => tracing::warn!(types = count, "batch handler panicked"),
            }
        }
        if let Err(e) = self.store.clear_from_disk() {
            // The next write replaces the delivered batch with the fresh one.
            self.stats.record_persist(false);
            self.accumulator.mark_unsaved();
            tracing::warn!(
                path = %self.store.path().display(),
                code = e.code(),
                error = %e,
                "failed to clear delivered batch"
            );
        }
    }
}

//! Sample accumulator.
//!
//! Candidates are decoded outside any lock; only inserting the resolved
//! names and rolling the window over happen under the batch guard. The
//! guard recovers from poisoning, so a panic elsewhere never wedges
//! sampling.
//!
//! The flush worker keeps its own copy of the batch for writing, so a
//! commit only hands over the names that were new. When a write or a clear
//! fails the worker marks the accumulator unsaved and the next commit asks
//! for another write even if nothing new arrived.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use crate::batch::Batch;
use crate::config::ReaperConfig;
use crate::memory::{Address, MemoryRegions};
use crate::metadata::{MetadataDecoder, RuntimeNamer};

/// What a commit did to the current batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing to write and the window is still open.
    Unchanged,
    /// The persisted copy is behind. Carries the names new to the batch;
    /// empty when only a failed write needs repeating.
    Persist(Vec<String>),
    /// The window elapsed; carries the completed batch, which has been
    /// replaced by a fresh one.
    Completed(Batch),
}

#[derive(Debug)]
pub struct Accumulator {
    batch: Mutex<Batch>,
    unsaved: AtomicBool,
}

impl Accumulator {
    pub fn new(batch: Batch) -> Self {
        Self {
            batch: Mutex::new(batch),
            unsaved: AtomicBool::new(false),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Batch> {
        self.batch.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decode candidates, dropping Unknowns. Takes no lock.
    pub fn decode_candidates<M, N>(decoder: &MetadataDecoder<M, N>, candidates: &[Address]) -> Vec<String>
    where
        M: MemoryRegions,
        N: RuntimeNamer,
    {
        candidates
            .iter()
            .filter_map(|&pointer| decoder.resolve_name(pointer))
            .collect()
    }

    /// Decode `candidates` and add the resolved names. Returns how many
    /// names were new to the batch.
    pub fn record_sample<M, N>(&self, decoder: &MetadataDecoder<M, N>, candidates: &[Address]) -> usize
    where
        M: MemoryRegions,
        N: RuntimeNamer,
    {
        let names = Self::decode_candidates(decoder, candidates);
        if names.is_empty() {
            return 0;
        }
        self.guard().add_types(names)
    }

    /// Add `names` and roll the window over if it elapsed at `now`.
    ///
    /// `publish` runs while the guard is still held, so anything it queues
    /// is ordered consistently with the batch mutations.
    pub fn commit<R>(
        &self,
        names: Vec<String>,
        config: &ReaperConfig,
        now: SystemTime,
        publish: impl FnOnce(CommitOutcome) -> R,
    ) -> R {
        let mut batch = self.guard();
        let fresh: Vec<String> = names.into_iter().filter(|n| batch.add_type(n)).collect();

        let outcome = if !batch.should_keep_batching_at(config, now) {
            self.unsaved.store(false, Ordering::SeqCst);
            CommitOutcome::Completed(std::mem::replace(&mut *batch, Batch::starting_at(now)))
        } else if self.unsaved.swap(false, Ordering::SeqCst) || !fresh.is_empty() {
            CommitOutcome::Persist(fresh)
        } else {
            CommitOutcome::Unchanged
        };
        publish(outcome)
    }

    /// Swap out the batch if its window elapsed at `now`.
    pub fn take_if_elapsed(&self, config: &ReaperConfig, now: SystemTime) -> Option<Batch> {
        let mut batch = self.guard();
        if batch.should_keep_batching_at(config, now) {
            return None;
        }
        Some(std::mem::replace(&mut *batch, Batch::starting_at(now)))
    }

    /// Merge a batch persisted by an earlier run and return a copy of the
    /// result.
    pub fn adopt(&self, persisted: Batch) -> Batch {
        let mut batch = self.guard();
        batch.merge(persisted);
        batch.clone()
    }

    /// Record that the persisted copy no longer matches the batch.
    pub fn mark_unsaved(&self) {
        self.unsaved.store(true, Ordering::SeqCst);
    }

    /// Whether the next commit will request a write regardless of new names.
    pub fn is_unsaved(&self) -> bool {
        self.unsaved.load(Ordering::SeqCst)
    }

    /// Copy of the current batch.
    pub fn snapshot(&self) -> Batch {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(Batch::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{PointerWidth, SyntheticMemory};
    use crate::metadata::{DecoderOptions, InitializedClass};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, UNIX_EPOCH};

    /// Decoder over empty memory: every candidate is Unknown.
    fn empty_decoder() -> MetadataDecoder<SyntheticMemory> {
        MetadataDecoder::new(SyntheticMemory::new(), crate::metadata::NoRuntime)
    }

    fn config(window_secs: u64) -> ReaperConfig {
        ReaperConfig::default().with_batch_window(Duration::from_secs(window_secs))
    }

    #[test]
    fn test_unknowns_dropped() {
        let acc = Accumulator::default();
        assert_eq!(acc.record_sample(&empty_decoder(), &[0x1000, 0x2000]), 0);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_commit_grew_then_unchanged() {
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let acc = Accumulator::new(Batch::starting_at(start));
        let cfg = config(60);

        let first = acc.commit(vec!["A".into()], &cfg, start, |o| o);
        assert_eq!(first, CommitOutcome::Persist(vec!["A".to_string()]));

        // Only names new to the batch are handed over.
        let second = acc.commit(vec!["A".into(), "B".into(), "B".into()], &cfg, start, |o| o);
        assert_eq!(second, CommitOutcome::Persist(vec!["B".to_string()]));

        let again = acc.commit(vec!["A".into()], &cfg, start, |o| o);
        assert_eq!(again, CommitOutcome::Unchanged);
        assert_eq!(acc.snapshot().all_types(), vec!["A", "B"]);
    }

    #[test]
    fn test_unsaved_batch_requests_write_without_new_names() {
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let acc = Accumulator::new(Batch::starting_at(start));
        let cfg = config(60);
        acc.commit(vec!["A".into()], &cfg, start, |_| ());

        acc.mark_unsaved();
        assert!(acc.is_unsaved());
        let retry = acc.commit(vec!["A".into()], &cfg, start, |o| o);
        assert_eq!(retry, CommitOutcome::Persist(Vec::new()));
        assert!(!acc.is_unsaved());

        let after = acc.commit(Vec::new(), &cfg, start, |o| o);
        assert_eq!(after, CommitOutcome::Unchanged);
    }

    #[test]
    fn test_adopt_merges_persisted_batch() {
        let early = UNIX_EPOCH + Duration::from_secs(1_000);
        let acc = Accumulator::new(Batch::starting_at(early + Duration::from_secs(30)));
        acc.commit(vec!["Live".into()], &config(3600), early, |_| ());

        let mut persisted = Batch::starting_at(early);
        persisted.add_types(["Saved"]);
        let merged = acc.adopt(persisted);

        assert_eq!(merged.all_types(), vec!["Live", "Saved"]);
        assert_eq!(merged.started_at(), early);
        assert_eq!(acc.snapshot(), merged);
    }

    #[test]
    fn test_commit_completes_window() {
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let acc = Accumulator::new(Batch::starting_at(start));
        let cfg = config(60);
        acc.commit(vec!["A".into()], &cfg, start, |_| ());

        let later = start + Duration::from_secs(61);
        let outcome = acc.commit(vec!["B".into()], &cfg, later, |o| o);
        match outcome {
            CommitOutcome::Completed(done) => assert_eq!(done.all_types(), vec!["A", "B"]),
            other => panic!("expected completed batch, got {:?}", other),
        }
        assert!(acc.is_empty());
        assert_eq!(acc.snapshot().started_at(), later);
    }

    #[test]
    fn test_take_if_elapsed() {
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let acc = Accumulator::new(Batch::starting_at(start));
        let cfg = config(60);

        assert!(acc.take_if_elapsed(&cfg, start + Duration::from_secs(10)).is_none());
        assert!(acc.take_if_elapsed(&cfg, start + Duration::from_secs(60)).is_some());
    }

    #[test]
    fn test_concurrent_recording_keeps_every_name() {
        // Exercises the guarded insert directly, without decoding.
        let acc = Arc::new(Accumulator::default());
        let cfg = config(3600);
        let mut handles = vec![];

        for t in 0..8 {
            let acc = Arc::clone(&acc);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    let names = vec![format!("T{}_{}", t, i), "Shared".to_string()];
                    acc.commit(names, &cfg, SystemTime::now(), |_| ());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(acc.len(), 8 * 250 + 1);
    }

    #[test]
    fn test_poisoned_guard_recovers() {
        let acc = Arc::new(Accumulator::default());
        let poisoner = Arc::clone(&acc);
        let _ = thread::spawn(move || {
            let _guard = poisoner.batch.lock().unwrap();
            panic!("poison the batch lock");
        })
        .join();

        acc.commit(vec!["After".into()], &config(3600), SystemTime::now(), |_| ());
        assert!(acc.snapshot().contains("After"));
    }

    #[test]
    fn test_decode_candidates_uses_namer() {
        // A dynamic class whose metaclass is realized and initialized.
        let mut mem = SyntheticMemory::new();
        let mut class = Vec::new();
        class.extend_from_slice(&0x2000u64.to_le_bytes()); // isa
        class.extend_from_slice(&[0u8; 24]); // superclass + cache
        class.extend_from_slice(&0x3000u64.to_le_bytes()); // bits
        mem.map(0x1000, class);
        let mut meta = vec![0u8; 32];
        meta.extend_from_slice(&0x3100u64.to_le_bytes());
        mem.map(0x2000, meta);
        mem.map(0x3000, (1u32 << 31).to_le_bytes().to_vec());
        mem.map(0x3100, ((1u32 << 31) | (1 << 29)).to_le_bytes().to_vec());

        let namer = |c: &InitializedClass| (c.address() == 0x1000).then(|| "MyObject".to_string());
        let decoder = MetadataDecoder::with_options(
            mem,
            namer,
            DecoderOptions::default().width(PointerWidth::Eight),
        );
        assert_eq!(
            Accumulator::decode_candidates(&decoder, &[0x1000, 0x9999_0000]),
            vec!["MyObject"]
        );
    }
}

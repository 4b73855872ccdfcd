//! Sampling: accumulate resolved names into batches, persist and deliver
//! them off the calling path.

pub mod accumulator;
pub mod flush;
pub mod scheduler;

pub use accumulator::{Accumulator, CommitOutcome};
pub use flush::{BatchHandler, FlushJob, FlushWorker};
pub use scheduler::Reaper;

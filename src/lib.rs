//! Reaper: in-process sampling of live type metadata.
//!
//! The application periodically hands the sampler a handful of candidate
//! pointers to class or type metadata. A fraction of those events is
//! sampled; each candidate is decoded into a type name without ever
//! faulting on bad memory, and the names accumulate into a batch that
//! survives restarts until its window elapses and the batch is delivered.
//!
//! ```text
//! Reaper::on_event ─► Accumulator ─► MetadataDecoder ─► MemoryRegions
//!        │                 │
//!        └── flush worker ─┴──► BatchStore (JSON, atomic rename)
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod persist;
pub mod sampling;
pub mod stats;

pub use batch::{Batch, BatchStore};
pub use config::{JsonFileStore, KeyValueStore, ReaperConfig};
pub use error::{ReaperError, Result};
pub use memory::{Address, MemoryRegions, PointerWidth, ProcessMemory, RegionSet, SyntheticMemory};
pub use metadata::{
    DecodeError, DecoderOptions, InitializedClass, MemoizedNames, MetadataDecoder, NoRuntime,
    ResolvedType, RuntimeNamer, TypeDescriptor,
};
pub use sampling::{Accumulator, Reaper};
pub use stats::{SamplerStats, StatsSnapshot};

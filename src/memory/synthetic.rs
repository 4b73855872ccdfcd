//! In-memory address space built from byte segments.
//!
//! Used to decode captured metadata snapshots and to build fixtures. Each
//! segment is mapped at a chosen base address; reads may span adjacent
//! segments.

use super::regions::RegionSet;
use super::{span_end, Address, MemoryRegions};

#[derive(Debug, Clone)]
struct Segment {
    base: Address,
    bytes: Vec<u8>,
}

impl Segment {
    fn end(&self) -> Address {
        self.base + self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticMemory {
    /// Sorted by base, non-overlapping.
    segments: Vec<Segment>,
    regions: RegionSet,
}

impl SyntheticMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `base`, replacing any segment it overlaps.
    pub fn map(&mut self, base: Address, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let Some(end) = span_end(base, bytes.len()) else {
            return;
        };

        self.segments.retain(|s| s.end() <= base || s.base >= end);
        let idx = self.segments.partition_point(|s| s.base < base);
        self.segments.insert(idx, Segment { base, bytes });
        self.regions = RegionSet::from_ranges(self.segments.iter().map(|s| (s.base, s.end())));
    }

    /// Overwrite bytes inside an existing mapping. Returns false if the
    /// span is not fully mapped.
    pub fn write(&mut self, address: Address, data: &[u8]) -> bool {
        if !self.regions.contains(address, data.len()) {
            return false;
        }
        let mut cursor = address;
        let mut rest = data;
        while !rest.is_empty() {
            let Some(seg) = self
                .segments
                .iter_mut()
                .find(|s| s.base <= cursor && cursor < s.end())
            else {
                return false;
            };
            let offset = (cursor - seg.base) as usize;
            let n = rest.len().min(seg.bytes.len() - offset);
            seg.bytes[offset..offset + n].copy_from_slice(&rest[..n]);
            cursor += n as u64;
            rest = &rest[n..];
        }
        true
    }

    /// The readable ranges of this address space.
    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }
}

impl MemoryRegions for SyntheticMemory {
    fn is_readable(&self, address: Address, len: usize) -> bool {
        self.regions.contains(address, len)
    }

    fn copy_unchecked(&self, address: Address, buf: &mut [u8]) -> bool {
        let mut cursor = address;
        let mut filled = 0;
        while filled < buf.len() {
            let idx = self.segments.partition_point(|s| s.base <= cursor);
            if idx == 0 {
                return false;
            }
            let seg = &self.segments[idx - 1];
            if cursor >= seg.end() {
                return false;
            }
            let offset = (cursor - seg.base) as usize;
            let n = (buf.len() - filled).min(seg.bytes.len() - offset);
            buf[filled..filled + n].copy_from_slice(&seg.bytes[offset..offset + n]);
            filled += n;
            cursor += n as u64;
        }
        true
    }
}

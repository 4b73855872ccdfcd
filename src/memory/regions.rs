//! Set of mapped, readable address ranges.
//!
//! Ranges are half-open `[start, end)`, kept sorted and merged so that a
//! span crossing two adjacent mappings is still recognised as readable.
//! Lookup is a binary search over the range starts.

use super::{span_end, Address};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSet {
    /// Sorted, non-overlapping, non-adjacent `(start, end)` pairs.
    ranges: Vec<(Address, Address)>,
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary (possibly overlapping, unsorted) ranges.
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (Address, Address)>,
    {
        let mut set = Self::new();
        for (start, end) in ranges {
            set.insert(start, end);
        }
        set
    }

    /// Add `[start, end)`. Empty or inverted ranges are ignored.
    pub fn insert(&mut self, start: Address, end: Address) {
        if start >= end {
            return;
        }

        // First range whose end reaches `start` (touching counts).
        let first = self.ranges.partition_point(|&(_, e)| e < start);
        // First range starting strictly after `end`.
        let last = self.ranges.partition_point(|&(s, _)| s <= end);

        if first == last {
            self.ranges.insert(first, (start, end));
            return;
        }

        let merged_start = start.min(self.ranges[first].0);
        let merged_end = end.max(self.ranges[last - 1].1);
        self.ranges.splice(first..last, std::iter::once((merged_start, merged_end)));
    }

    /// Whether `[address, address + len)` lies in a single merged range.
    ///
    /// A zero-length span is readable when `address` lies inside a range.
    pub fn contains(&self, address: Address, len: usize) -> bool {
        let Some(end) = span_end(address, len) else {
            return false;
        };

        let idx = self.ranges.partition_point(|&(s, _)| s <= address);
        if idx == 0 {
            return false;
        }
        let (start, range_end) = self.ranges[idx - 1];
        debug_assert!(start <= address);

        if len == 0 {
            address < range_end
        } else {
            end <= range_end
        }
    }

    /// Number of merged ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of mapped bytes.
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|&(s, e)| e - s).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.ranges.iter().copied()
    }
}

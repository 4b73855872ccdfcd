//! Validator for the live process.
//!
//! The readable mappings are taken from `/proc/self/maps` and cached until
//! [`ProcessMemory::refresh`] is called. Copies go through
//! `process_vm_readv` against our own pid: if a mapping disappears between
//! the check and the copy the syscall reports `EFAULT` instead of the read
//! faulting. Targets without procfs report no readable memory, so every
//! decode there resolves to Unknown.

use std::sync::RwLock;

use super::regions::RegionSet;
use super::{Address, MemoryRegions};

#[derive(Debug, Default)]
pub struct ProcessMemory {
    regions: RwLock<RegionSet>,
}

impl ProcessMemory {
    /// Snapshot the current mappings.
    pub fn new() -> Self {
        let memory = Self::default();
        memory.refresh();
        memory
    }

    /// Re-read the mapping table. Mappings change as libraries load and
    /// heaps grow, so hosts call this before a burst of sampling.
    pub fn refresh(&self) {
        let regions = Self::read_maps();
        tracing::debug!(
            ranges = regions.len(),
            bytes = regions.total_bytes(),
            "refreshed process mappings"
        );
        let mut guard = self.regions.write().unwrap_or_else(|e| e.into_inner());
        *guard = regions;
    }

    /// Copy of the current readable ranges.
    pub fn regions(&self) -> RegionSet {
        self.regions.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[cfg(target_os = "linux")]
    fn read_maps() -> RegionSet {
        match std::fs::read_to_string("/proc/self/maps") {
            Ok(text) => parse_maps(&text),
            Err(e) => {
                tracing::warn!("cannot read /proc/self/maps: {}", e);
                RegionSet::new()
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn read_maps() -> RegionSet {
        RegionSet::new()
    }
}

impl MemoryRegions for ProcessMemory {
    fn is_readable(&self, address: Address, len: usize) -> bool {
        self.regions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(address, len)
    }

    #[cfg(target_os = "linux")]
    fn copy_unchecked(&self, address: Address, buf: &mut [u8]) -> bool {
        if buf.is_empty() {
            return true;
        }
        let Ok(remote_base) = usize::try_from(address) else {
            return false;
        };

        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: remote_base as *mut libc::c_void,
            iov_len: buf.len(),
        };

        // SAFETY: `local` describes a buffer we exclusively borrow for the
        // duration of the call. The remote iovec is only read by the kernel,
        // which validates it and returns an error instead of faulting.
        let copied = unsafe {
            libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0)
        };
        copied >= 0 && copied as usize == buf.len()
    }

    #[cfg(not(target_os = "linux"))]
    fn copy_unchecked(&self, _address: Address, _buf: &mut [u8]) -> bool {
        false
    }
}

/// Parse `/proc/<pid>/maps` text into the set of readable ranges.
///
/// Line format: `start-end perms offset dev inode [path]`. Lines that do not
/// parse, unreadable mappings and `[vvar]`-style kernel pages without read
/// permission are skipped.
pub fn parse_maps(text: &str) -> RegionSet {
    let mut set = RegionSet::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (Some(range), Some(perms)) = (fields.next(), fields.next()) else {
            continue;
        };
        if !perms.starts_with('r') {
            continue;
        }
        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (
            u64::from_str_radix(start, 16),
            u64::from_str_radix(end, 16),
        ) else {
            continue;
        };
        set.insert(start, end);
    }
    set
}

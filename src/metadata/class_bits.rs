//! Class object header decoding: tagged data bits and the method cache.

use crate::memory::{Address, MemoryRegions, PointerWidth};

use super::layout::{cache_size, ClassLayout, FAST_IS_SWIFT_LEGACY, FAST_IS_SWIFT_STABLE};

/// Tagged class data word.
///
/// Low bits are flags; masking with the width's `FAST_DATA_MASK` yields
/// the address of the class's mutable metadata (`class_rw_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDataBits {
    raw: u64,
    mask: u64,
}

impl ClassDataBits {
    pub fn new(raw: u64, layout: &ClassLayout) -> Self {
        Self {
            raw,
            mask: layout.fast_data_mask(),
        }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn is_swift_legacy(&self) -> bool {
        self.raw & FAST_IS_SWIFT_LEGACY != 0
    }

    pub fn is_swift_stable(&self) -> bool {
        self.raw & FAST_IS_SWIFT_STABLE != 0
    }

    /// Either bit marks a value-runtime class. The two bits are treated as
    /// independent signals, never as a redundant pair.
    pub fn is_value_runtime(&self) -> bool {
        self.is_swift_legacy() || self.is_swift_stable()
    }

    /// Address of the mutable metadata block, or `None` when the masked
    /// value is null.
    pub fn data_address(&self) -> Option<Address> {
        match self.raw & self.mask {
            0 => None,
            addr => Some(addr),
        }
    }
}

/// Method lookup cache layout (`cache_t`).
///
/// 64-bit: `bucketsAndMaybeMask` (8), `maybeMask` (4), `flags` (2),
/// `occupied` (2). 32-bit: `bucketsAndMaybeMask` (4), `maybeMask` (4),
/// `occupied` (2) plus padding; no flags field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDescriptor {
    pub buckets_and_maybe_mask: u64,
    pub maybe_mask: u32,
    pub flags: Option<u16>,
    pub occupied: u16,
}

impl CacheDescriptor {
    pub fn read<M: MemoryRegions + ?Sized>(
        memory: &M,
        address: Address,
        width: PointerWidth,
    ) -> Option<Self> {
        let w = width.bytes() as u64;
        // Validating the whole span also rules out address overflow below.
        if !memory.is_readable(address, cache_size(width)) {
            return None;
        }
        let buckets_and_maybe_mask = memory.read_word(address, width)?;
        let maybe_mask = memory.read_u32(address + w)?;
        let (flags, occupied) = match width {
            PointerWidth::Eight => (
                Some(memory.read_u16(address + w + 4)?),
                memory.read_u16(address + w + 6)?,
            ),
            PointerWidth::Four => (None, memory.read_u16(address + w + 4)?),
        };
        Some(Self {
            buckets_and_maybe_mask,
            maybe_mask,
            flags,
            occupied,
        })
    }
}

/// Decoded dynamic-runtime class header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassHeader {
    pub address: Address,
    pub isa: u64,
    pub superclass: u64,
    pub cache: CacheDescriptor,
    pub bits: ClassDataBits,
}

impl ClassHeader {
    /// Read the header at `address`. The whole header span is validated up
    /// front so a class straddling an unmapped page is rejected as a unit.
    pub fn read<M: MemoryRegions + ?Sized>(
        memory: &M,
        address: Address,
        layout: &ClassLayout,
    ) -> Option<Self> {
        if !memory.is_readable(address, layout.header_size()) {
            return None;
        }
        let isa = memory.read_word(address + layout.isa, layout.width)?;
        let superclass = memory.read_word(address + layout.superclass, layout.width)?;
        let cache = CacheDescriptor::read(memory, address + layout.cache, layout.width)?;
        let bits = memory.read_word(address + layout.bits, layout.width)?;

        Some(Self {
            address,
            isa,
            superclass,
            cache,
            bits: ClassDataBits::new(bits, layout),
        })
    }

    /// Metaclass address, with isa tag bits stripped.
    pub fn metaclass(&self, layout: &ClassLayout) -> Option<Address> {
        match self.isa & layout.isa_mask() {
            0 => None,
            addr => Some(addr),
        }
    }
}

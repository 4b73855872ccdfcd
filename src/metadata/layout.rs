//! Binary layout constants for class objects and type descriptors.
//!
//! Dynamic-runtime class object (pointer width W):
//! ```text
//! Offset   Size     Field
//! 0        W        isa (metaclass pointer)
//! W        W        superclass
//! 2W       16 / 12  cache (see CacheDescriptor)
//! 2W+C     W        bits (ClassDataBits)
//! ```
//!
//! Value-runtime class objects continue after `bits`:
//! ```text
//! +0   4  flags
//! +4   4  instanceAddressOffset
//! +8   4  instanceSize
//! +12  2  instanceAlignMask
//! +14  2  reserved
//! +16  4  classSize
//! +20  4  classAddressOffset
//! +24  W  description
//! ```
//!
//! Type context descriptor (all fields 4 bytes, relative offsets signed):
//! ```text
//! 0   flags
//! 4   parent            (relative, nullable, may be indirect)
//! 8   name              (relative)
//! 12  accessFunction    (relative)
//! 16  fieldDescriptor   (relative, nullable)
//! --- class ---               --- struct ---            --- enum ---
//! 20  superclassType          20 numFields              20 payloadCases|sizeOffset
//! 24  negativeSizeInWords     24 fieldOffsetVector      24 numEmptyCases
//! 28  positiveSizeInWords
//! 32  numImmediateMembers
//! 36  numFields
//! 40  fieldOffsetVectorOffset
//! ```

use crate::memory::PointerWidth;

// ── Class data bits ────────────────────────────────────────────────

/// Bit 0 of the class data word: value-runtime class, legacy ABI.
pub const FAST_IS_SWIFT_LEGACY: u64 = 1 << 0;

/// Bit 1 of the class data word: value-runtime class, stable ABI.
pub const FAST_IS_SWIFT_STABLE: u64 = 1 << 1;

/// Mask yielding the `class_rw_t` address on 64-bit targets.
pub const FAST_DATA_MASK_64: u64 = 0x0000_7fff_ffff_fff8;

/// Mask yielding the `class_rw_t` address on 32-bit targets.
pub const FAST_DATA_MASK_32: u64 = 0xffff_fffc;

/// Mask extracting the metaclass from a class object's isa on 64-bit targets.
pub const ISA_MASK_64: u64 = 0x0000_7fff_ffff_fff8;

/// 32-bit targets store a raw isa.
pub const ISA_MASK_32: u64 = 0xffff_ffff;

// ── class_rw_t flags ───────────────────────────────────────────────

/// Class has been realized by the runtime.
pub const RW_REALIZED: u32 = 1 << 31;

/// `+initialize` has completed.
pub const RW_INITIALIZED: u32 = 1 << 29;

// ── Context descriptor flags ───────────────────────────────────────

pub const KIND_MASK: u32 = 0x1f;
pub const GENERIC_FLAG: u32 = 0x80;
pub const TYPE_FLAGS_SHIFT: u32 = 16;
pub const RESILIENT_SUPERCLASS_FLAG: u16 = 0x1000;
pub const METADATA_INIT_MASK: u16 = 0x3;

// ── Descriptor field offsets ───────────────────────────────────────

pub const DESC_FLAGS: u64 = 0;
pub const DESC_PARENT: u64 = 4;
pub const DESC_NAME: u64 = 8;
pub const DESC_FIELD_DESCRIPTOR: u64 = 16;

pub const CLASS_DESC_SUPERCLASS_TYPE: u64 = 20;
pub const CLASS_DESC_NEGATIVE_SIZE: u64 = 24;
pub const CLASS_DESC_POSITIVE_SIZE: u64 = 28;
pub const CLASS_DESC_IMMEDIATE_MEMBERS: u64 = 32;
pub const CLASS_DESC_NUM_FIELDS: u64 = 36;
pub const CLASS_DESC_FIELD_OFFSET_VECTOR: u64 = 40;
pub const CLASS_DESC_SIZE: usize = 44;

pub const STRUCT_DESC_NUM_FIELDS: u64 = 20;
pub const STRUCT_DESC_FIELD_OFFSET_VECTOR: u64 = 24;
pub const STRUCT_DESC_SIZE: usize = 28;

pub const ENUM_DESC_PAYLOAD: u64 = 20;
pub const ENUM_DESC_EMPTY_CASES: u64 = 24;
pub const ENUM_DESC_SIZE: usize = 28;

/// Size of the common context header (flags, parent, name, access function).
pub const CONTEXT_HEADER_SIZE: usize = 16;

/// Low 24 bits of the enum payload word count payload cases.
pub const ENUM_PAYLOAD_CASES_MASK: u32 = 0x00ff_ffff;
pub const ENUM_PAYLOAD_SIZE_OFFSET_SHIFT: u32 = 24;

// ── Value metadata kinds ───────────────────────────────────────────

/// First-word values below this are metadata kinds, not isa pointers.
pub const MAX_METADATA_KIND: u64 = 0x7ff;
pub const METADATA_KIND_STRUCT: u64 = 0x200;
pub const METADATA_KIND_ENUM: u64 = 0x201;
pub const METADATA_KIND_OPTIONAL: u64 = 0x202;

// ── Limits ─────────────────────────────────────────────────────────

/// Longest name component accepted from memory.
pub const MAX_NAME_LEN: usize = 1024;

/// Deepest parent chain walked when qualifying a name.
pub const MAX_PARENT_DEPTH: usize = 16;

// ── Per-width class object layout ──────────────────────────────────

/// Size of `cache_t`; the 32-bit layout has no flags field.
pub const fn cache_size(width: PointerWidth) -> usize {
    match width {
        PointerWidth::Eight => 16,
        PointerWidth::Four => 12,
    }
}

/// Field offsets of a class object for one pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    pub width: PointerWidth,
    pub isa: u64,
    pub superclass: u64,
    pub cache: u64,
    pub cache_size: usize,
    pub bits: u64,
}

impl ClassLayout {
    pub const fn for_width(width: PointerWidth) -> Self {
        let w = width.bytes() as u64;
        let cache_size = cache_size(width);
        Self {
            width,
            isa: 0,
            superclass: w,
            cache: 2 * w,
            cache_size,
            bits: 2 * w + cache_size as u64,
        }
    }

    /// Bytes covering isa through bits.
    pub const fn header_size(&self) -> usize {
        self.bits as usize + self.width.bytes()
    }

    pub const fn swift_flags(&self) -> u64 {
        self.bits + self.width.bytes() as u64
    }

    pub const fn instance_address_offset(&self) -> u64 {
        self.swift_flags() + 4
    }

    pub const fn instance_size(&self) -> u64 {
        self.swift_flags() + 8
    }

    pub const fn instance_align_mask(&self) -> u64 {
        self.swift_flags() + 12
    }

    pub const fn class_size(&self) -> u64 {
        self.swift_flags() + 16
    }

    pub const fn class_address_offset(&self) -> u64 {
        self.swift_flags() + 20
    }

    pub const fn description(&self) -> u64 {
        self.swift_flags() + 24
    }

    /// Bytes covering isa through description.
    pub const fn swift_header_size(&self) -> usize {
        self.description() as usize + self.width.bytes()
    }

    pub const fn fast_data_mask(&self) -> u64 {
        match self.width {
            PointerWidth::Eight => FAST_DATA_MASK_64,
            PointerWidth::Four => FAST_DATA_MASK_32,
        }
    }

    pub const fn isa_mask(&self) -> u64 {
        match self.width {
            PointerWidth::Eight => ISA_MASK_64,
            PointerWidth::Four => ISA_MASK_32,
        }
    }
}

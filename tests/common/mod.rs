//! Synthetic metadata images shared by the integration tests.
//!
//! `Image` lays out class objects, context descriptors and strings in a
//! `SyntheticMemory` the way the runtimes do, for either pointer width.
//! Every allocation is followed by an unmapped gap so an over-read lands
//! outside readable memory.

#![allow(dead_code)]

use reaper::memory::{Address, PointerWidth, SyntheticMemory};
use reaper::metadata::layout::{
    ClassLayout, CONTEXT_HEADER_SIZE, DESC_FIELD_DESCRIPTOR, METADATA_KIND_ENUM,
    METADATA_KIND_STRUCT, RW_INITIALIZED, RW_REALIZED,
};

pub const IMAGE_BASE: Address = 0x0010_0000;
const GAP: u64 = 0x40;

pub const KIND_MODULE: u32 = 0;
pub const KIND_EXTENSION: u32 = 1;
pub const KIND_CLASS: u32 = 16;
pub const KIND_STRUCT: u32 = 17;
pub const KIND_ENUM: u32 = 18;

/// Singleton metadata initialization in the type flags.
pub const SINGLETON_INIT: u32 = 0x0001_0000;
pub const GENERIC: u32 = 0x80;

/// A parent reference to encode in a descriptor.
#[derive(Debug, Clone, Copy)]
pub enum Parent {
    None,
    Direct(Address),
    /// Through a pointer slot; the relative offset gets its low bit set.
    Indirect(Address),
    /// Raw delta, for corrupt fixtures.
    Raw(i32),
}

pub struct Image {
    pub width: PointerWidth,
    pub layout: ClassLayout,
    pub mem: SyntheticMemory,
    next: Address,
}

impl Image {
    pub fn new(width: PointerWidth) -> Self {
        Self {
            width,
            layout: ClassLayout::for_width(width),
            mem: SyntheticMemory::new(),
            next: IMAGE_BASE,
        }
    }

    pub fn into_memory(self) -> SyntheticMemory {
        self.mem
    }

    /// Claim the next `len` bytes without mapping them.
    pub fn reserve(&mut self, len: usize) -> Address {
        let addr = self.next;
        let end = addr + len as u64 + GAP;
        self.next = (end + 15) & !15;
        addr
    }

    pub fn place(&mut self, bytes: Vec<u8>) -> Address {
        let addr = self.reserve(bytes.len());
        self.mem.map(addr, bytes);
        addr
    }

    pub fn word(&self, value: u64) -> Vec<u8> {
        match self.width {
            PointerWidth::Four => (value as u32).to_le_bytes().to_vec(),
            PointerWidth::Eight => value.to_le_bytes().to_vec(),
        }
    }

    pub fn string(&mut self, s: &str) -> Address {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.place(bytes)
    }

    // -----------------------------------------------------------------------
    // Context descriptors
    // -----------------------------------------------------------------------

    /// Context descriptor with `flags`, a parent reference, a name and
    /// `trailing` u32 fields after the 16-byte header.
    pub fn descriptor(&mut self, flags: u32, parent: Parent, name: &str, trailing: &[u32]) -> Address {
        let name_addr = self.string(name);
        let slot = match parent {
            Parent::Indirect(target) => {
                let bytes = self.word(target);
                Some(self.place(bytes))
            }
            _ => None,
        };

        let addr = self.reserve(CONTEXT_HEADER_SIZE + 4 + trailing.len() * 4);
        let parent_delta = match parent {
            Parent::None => 0,
            Parent::Direct(target) => rel(addr + 4, target),
            Parent::Indirect(_) => rel(addr + 4, slot.unwrap_or_default()) | 1,
            Parent::Raw(delta) => delta,
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&parent_delta.to_le_bytes());
        bytes.extend_from_slice(&rel(addr + 8, name_addr).to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes()); // access function
        debug_assert_eq!(bytes.len(), DESC_FIELD_DESCRIPTOR as usize);
        bytes.extend_from_slice(&0i32.to_le_bytes()); // field descriptor
        for field in trailing {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        self.mem.map(addr, bytes);
        addr
    }

    pub fn module(&mut self, name: &str) -> Address {
        self.descriptor(KIND_MODULE, Parent::None, name, &[])
    }

    pub fn struct_descriptor(&mut self, parent: Parent, name: &str) -> Address {
        self.descriptor(SINGLETON_INIT | KIND_STRUCT, parent, name, &[2, 4])
    }

    pub fn enum_descriptor(&mut self, parent: Parent, name: &str) -> Address {
        // Two payload cases, payload size offset 1, three empty cases.
        self.descriptor(SINGLETON_INIT | KIND_ENUM, parent, name, &[0x0100_0002, 3])
    }

    pub fn class_descriptor(&mut self, parent: Parent, name: &str) -> Address {
        // superclass (null), negative/positive sizes, members, fields, vector.
        self.descriptor(SINGLETON_INIT | KIND_CLASS, parent, name, &[0, 2, 12, 4, 1, 10])
    }

    // -----------------------------------------------------------------------
    // Metadata records
    // -----------------------------------------------------------------------

    pub fn struct_metadata(&mut self, descriptor: Address) -> Address {
        self.value_metadata(METADATA_KIND_STRUCT, descriptor)
    }

    pub fn enum_metadata(&mut self, descriptor: Address) -> Address {
        self.value_metadata(METADATA_KIND_ENUM, descriptor)
    }

    pub fn value_metadata(&mut self, kind: u64, descriptor: Address) -> Address {
        let mut bytes = self.word(kind);
        bytes.extend(self.word(descriptor));
        bytes.extend(self.word(0)); // value witness table slot
        self.place(bytes)
    }

    /// Class header bytes: isa, superclass, empty cache, bits.
    fn class_header(&self, isa: u64, bits: u64) -> Vec<u8> {
        let mut bytes = self.word(isa);
        bytes.extend(self.word(0));
        bytes.extend(vec![0u8; self.layout.bits as usize - bytes.len()]);
        bytes.extend(self.word(bits));
        bytes
    }

    /// `class_rw_t` carrying `flags`.
    pub fn rw(&mut self, flags: u32) -> Address {
        let mut bytes = flags.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 2]);
        self.place(bytes)
    }

    /// Dynamic-runtime class whose own `class_rw_t` carries `class_flags`
    /// and whose metaclass carries `meta_flags`.
    pub fn dynamic_class_flags(&mut self, class_flags: u32, meta_flags: u32) -> Address {
        let meta_rw = self.rw(meta_flags);
        let meta_bytes = self.class_header(0, meta_rw);
        let meta = self.place(meta_bytes);

        let class_rw = self.rw(class_flags);
        let bytes = self.class_header(meta, class_rw);
        self.place(bytes)
    }

    /// Realized dynamic-runtime class with a metaclass carrying `meta_flags`.
    pub fn dynamic_class_with(&mut self, meta_flags: u32) -> Address {
        self.dynamic_class_flags(RW_REALIZED, meta_flags)
    }

    /// Dynamic-runtime class that has finished initialization.
    pub fn dynamic_class(&mut self) -> Address {
        self.dynamic_class_with(RW_REALIZED | RW_INITIALIZED)
    }

    /// Value-runtime class object. `tag` is the class data bit to set
    /// (1 legacy, 2 stable). Returns the class pointer (address point).
    pub fn value_class(&mut self, descriptor: Address, tag: u64) -> Address {
        let w = self.width.bytes();
        let prefix = 2 * w;
        let header = self.layout.swift_header_size();
        let class_size = (prefix + header + 2 * w) as u32;

        let meta_rw = self.rw(RW_REALIZED | RW_INITIALIZED);
        let meta_bytes = self.class_header(0, meta_rw);
        let meta = self.place(meta_bytes);
        let class_rw = self.rw(RW_REALIZED | RW_INITIALIZED);
        let block = self.reserve(class_size as usize);
        let pointer = block + prefix as u64;

        let mut bytes = vec![0u8; prefix];
        bytes.extend(self.class_header(meta, class_rw | tag));
        bytes.extend_from_slice(&0u32.to_le_bytes()); // flags
        debug_assert_eq!(bytes.len() as u64, prefix as u64 + self.layout.instance_address_offset());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        debug_assert_eq!(bytes.len() as u64, prefix as u64 + self.layout.instance_size());
        bytes.extend_from_slice(&(2 * w as u32).to_le_bytes());
        debug_assert_eq!(bytes.len() as u64, prefix as u64 + self.layout.instance_align_mask());
        bytes.extend_from_slice(&7u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // reserved
        bytes.extend_from_slice(&class_size.to_le_bytes());
        bytes.extend_from_slice(&(prefix as u32).to_le_bytes()); // classAddressOffset
        bytes.extend(self.word(descriptor));
        bytes.extend(vec![0u8; 2 * w]); // vtable
        debug_assert_eq!(bytes.len(), class_size as usize);

        self.mem.map(block, bytes);
        pointer
    }
}

/// Relative delta from `field` to `target`.
pub fn rel(field: Address, target: Address) -> i32 {
    (target as i64 - field as i64) as i32
}

//! Metadata decoder: from an opaque pointer to a type name.
//!
//! A candidate pointer is classified by its first word and class data bits:
//!
//! - first word ≤ `MAX_METADATA_KIND`: value metadata (struct, enum,
//!   optional) whose descriptor pointer follows the kind word;
//! - class data bit 0 or bit 1 set: value-runtime class; the metadata base
//!   is reconstructed as `pointer - classAddressOffset` and the descriptor
//!   is reached through the `description` field;
//! - otherwise: dynamic-runtime class, named by the host runtime only once
//!   its metaclass reports `RW_REALIZED | RW_INITIALIZED`.
//!
//! Memory is never trusted. Every read is validated, every offset is
//! checked, and any inconsistency yields a [`DecodeError`], which callers
//! treat as Unknown.

use std::sync::Arc;

use thiserror::Error;

use crate::memory::{Address, MemoryRegions, PointerWidth};

use super::cache::NameCache;
use super::class_bits::ClassHeader;
use super::demangle::demangle_class_name;
use super::descriptor::{read_flags, read_type_descriptor, ContextKind, TypeDescriptor};
use super::layout::*;
use super::relative::{field, RelativeOffset};

/// Why a candidate resolved to Unknown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unreadable span of {len} bytes at {address:#x}")]
    Unmapped { address: Address, len: usize },

    #[error("malformed metadata: {0}")]
    Malformed(&'static str),

    #[error("unknown context kind {0}")]
    BadKind(u8),

    #[error("unsupported metadata kind {0:#x}")]
    UnsupportedMetadata(u64),

    #[error("parent chain revisits {0:#x}")]
    ParentCycle(Address),

    #[error("class at {0:#x} is not initialized")]
    Uninitialized(Address),

    #[error("runtime has no name for class at {0:#x}")]
    NameUnavailable(Address),
}

/// A successfully decoded candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub name: String,
    pub descriptor: TypeDescriptor,
}

/// Proof that a dynamic-runtime class was observed initialized.
///
/// Only the decoder constructs this, after checking the metaclass flags.
/// Naming an uninitialized class through the runtime can trigger its
/// initialization, which cannot be undone.
#[derive(Debug)]
pub struct InitializedClass {
    address: Address,
}

impl InitializedClass {
    pub fn address(&self) -> Address {
        self.address
    }
}

/// Host capability that names dynamic-runtime classes.
pub trait RuntimeNamer: Send + Sync {
    fn class_name(&self, class: &InitializedClass) -> Option<String>;
}

impl<F> RuntimeNamer for F
where
    F: Fn(&InitializedClass) -> Option<String> + Send + Sync,
{
    fn class_name(&self, class: &InitializedClass) -> Option<String> {
        self(class)
    }
}

/// Namer for hosts without a dynamic runtime: every such class is Unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRuntime;

impl RuntimeNamer for NoRuntime {
    fn class_name(&self, _class: &InitializedClass) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Pointer width of the inspected address space.
    pub width: PointerWidth,
    /// Prefix enclosing module and type names (`Module.Outer.Inner`).
    pub qualified: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            width: PointerWidth::NATIVE,
            qualified: true,
        }
    }
}

impl DecoderOptions {
    pub fn width(mut self, width: PointerWidth) -> Self {
        self.width = width;
        self
    }

    pub fn qualified(mut self, qualified: bool) -> Self {
        self.qualified = qualified;
        self
    }
}

pub struct MetadataDecoder<M, N = NoRuntime> {
    memory: M,
    namer: N,
    layout: ClassLayout,
    options: DecoderOptions,
    cache: Option<Arc<dyn NameCache>>,
}

impl<M: MemoryRegions, N: RuntimeNamer> MetadataDecoder<M, N> {
    pub fn new(memory: M, namer: N) -> Self {
        Self::with_options(memory, namer, DecoderOptions::default())
    }

    pub fn with_options(memory: M, namer: N, options: DecoderOptions) -> Self {
        Self {
            memory,
            namer,
            layout: ClassLayout::for_width(options.width),
            options,
            cache: None,
        }
    }

    /// Memoize successful resolutions in `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn NameCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn options(&self) -> DecoderOptions {
        self.options
    }

    /// Name of the type at `pointer`, or `None` (Unknown).
    pub fn resolve_name(&self, pointer: Address) -> Option<String> {
        self.resolve(pointer).map(|r| r.name)
    }

    /// Decoded type at `pointer`, or `None` (Unknown).
    pub fn resolve(&self, pointer: Address) -> Option<ResolvedType> {
        match self.decode(pointer) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                tracing::debug!("unresolved candidate {:#x}: {}", pointer, e);
                None
            }
        }
    }

    /// Decode with the reason for failure.
    pub fn decode(&self, pointer: Address) -> Result<ResolvedType, DecodeError> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(pointer)) {
            return Ok(hit);
        }
        let resolved = self.decode_uncached(pointer)?;
        if let Some(cache) = &self.cache {
            cache.insert(pointer, &resolved);
        }
        Ok(resolved)
    }

    fn decode_uncached(&self, pointer: Address) -> Result<ResolvedType, DecodeError> {
        let width = self.layout.width;
        let first = self.memory.read_word(pointer, width).ok_or(DecodeError::Unmapped {
            address: pointer,
            len: width.bytes(),
        })?;

        if first <= MAX_METADATA_KIND {
            return self.decode_value_metadata(pointer, first);
        }

        let header = ClassHeader::read(&self.memory, pointer, &self.layout).ok_or(
            DecodeError::Unmapped {
                address: pointer,
                len: self.layout.header_size(),
            },
        )?;

        if header.bits.is_value_runtime() {
            self.decode_value_class(&header)
        } else {
            self.decode_dynamic_class(&header)
        }
    }

    // ── Value metadata (structs, enums) ────────────────────────────

    fn decode_value_metadata(&self, pointer: Address, kind: u64) -> Result<ResolvedType, DecodeError> {
        let expected = match kind {
            METADATA_KIND_STRUCT => ContextKind::Struct,
            METADATA_KIND_ENUM | METADATA_KIND_OPTIONAL => ContextKind::Enum,
            other => return Err(DecodeError::UnsupportedMetadata(other)),
        };

        let width = self.layout.width;
        let slot = field(pointer, width.bytes() as u64)?;
        let description = self
            .memory
            .read_word(slot, width)
            .ok_or(DecodeError::Unmapped { address: slot, len: width.bytes() })?;
        if description == 0 {
            return Err(DecodeError::Malformed("value metadata without descriptor"));
        }

        let resolved = self.describe(description)?;
        let matches = matches!(
            (expected, &resolved.descriptor),
            (ContextKind::Struct, TypeDescriptor::ValueStruct(_))
                | (ContextKind::Enum, TypeDescriptor::ValueEnum(_))
        );
        if !matches {
            return Err(DecodeError::Malformed("metadata kind disagrees with descriptor"));
        }
        Ok(resolved)
    }

    // ── Value-runtime classes ──────────────────────────────────────

    fn decode_value_class(&self, header: &ClassHeader) -> Result<ResolvedType, DecodeError> {
        let layout = &self.layout;
        let pointer = header.address;
        let header_size = layout.swift_header_size();
        if !self.memory.is_readable(pointer, header_size) {
            return Err(DecodeError::Unmapped { address: pointer, len: header_size });
        }

        let read_u32 = |offset: u64| -> Result<u32, DecodeError> {
            let address = field(pointer, offset)?;
            self.memory
                .read_u32(address)
                .ok_or(DecodeError::Unmapped { address, len: 4 })
        };
        let class_size = read_u32(layout.class_size())?;
        let class_address_offset = read_u32(layout.class_address_offset())?;

        // The class pointer is the address point, not the start of the
        // metadata allocation; rebuild the base and validate the whole block.
        let base = pointer
            .checked_sub(u64::from(class_address_offset))
            .ok_or(DecodeError::Malformed("class address offset precedes address space"))?;
        if u64::from(class_address_offset) + header_size as u64 > u64::from(class_size) {
            return Err(DecodeError::Malformed("class size smaller than its header"));
        }
        if !self.memory.is_readable(base, class_size as usize) {
            return Err(DecodeError::Unmapped {
                address: base,
                len: class_size as usize,
            });
        }

        let slot = field(pointer, layout.description())?;
        let description = self
            .memory
            .read_word(slot, layout.width)
            .ok_or(DecodeError::Unmapped { address: slot, len: layout.width.bytes() })?;
        if description == 0 {
            return Err(DecodeError::Malformed("class without descriptor"));
        }

        let resolved = self.describe(description)?;
        if !matches!(resolved.descriptor, TypeDescriptor::ValueClass(_)) {
            return Err(DecodeError::Malformed("class metadata with non-class descriptor"));
        }
        Ok(resolved)
    }

    // ── Dynamic-runtime classes ────────────────────────────────────

    fn decode_dynamic_class(&self, header: &ClassHeader) -> Result<ResolvedType, DecodeError> {
        if !self.is_initialized(header)? {
            return Err(DecodeError::Uninitialized(header.address));
        }
        let class = InitializedClass {
            address: header.address,
        };

        let raw = self
            .namer
            .class_name(&class)
            .ok_or(DecodeError::NameUnavailable(header.address))?;
        if raw.is_empty() || raw.len() > MAX_NAME_LEN {
            return Err(DecodeError::Malformed("runtime class name length out of range"));
        }

        let demangled = demangle_class_name(&raw);
        let name = if self.options.qualified {
            demangled
        } else {
            demangled.rsplit('.').next().unwrap_or_default().to_string()
        };

        Ok(ResolvedType {
            name,
            descriptor: TypeDescriptor::DynamicClass {
                address: header.address,
            },
        })
    }

    /// Whether the class and its metaclass report realized + initialized.
    ///
    /// Reads only plain memory; never calls into the runtime.
    fn is_initialized(&self, header: &ClassHeader) -> Result<bool, DecodeError> {
        let class_rw = header
            .bits
            .data_address()
            .ok_or(DecodeError::Malformed("class data pointer is null"))?;
        let class_flags = self
            .memory
            .read_u32(class_rw)
            .ok_or(DecodeError::Unmapped { address: class_rw, len: 4 })?;
        if class_flags & RW_REALIZED == 0 {
            return Ok(false);
        }

        let meta = header
            .metaclass(&self.layout)
            .ok_or(DecodeError::Malformed("class isa is null"))?;
        let meta_header = ClassHeader::read(&self.memory, meta, &self.layout).ok_or(
            DecodeError::Unmapped {
                address: meta,
                len: self.layout.header_size(),
            },
        )?;
        let meta_rw = meta_header
            .bits
            .data_address()
            .ok_or(DecodeError::Malformed("metaclass data pointer is null"))?;
        let meta_flags = self
            .memory
            .read_u32(meta_rw)
            .ok_or(DecodeError::Unmapped { address: meta_rw, len: 4 })?;

        Ok(meta_flags & RW_REALIZED != 0 && meta_flags & RW_INITIALIZED != 0)
    }

    // ── Descriptors and names ──────────────────────────────────────

    fn describe(&self, descriptor: Address) -> Result<ResolvedType, DecodeError> {
        let decoded = read_type_descriptor(&self.memory, descriptor)?;
        let name = if self.options.qualified {
            self.qualified_name(descriptor)?
        } else {
            self.immediate_name(descriptor)?
        };
        Ok(ResolvedType {
            name,
            descriptor: decoded,
        })
    }

    /// Name stored in the descriptor itself.
    fn immediate_name(&self, descriptor: Address) -> Result<String, DecodeError> {
        let name_ref = RelativeOffset::read(&self.memory, field(descriptor, DESC_NAME)?)?;
        if name_ref.is_null() {
            return Err(DecodeError::Malformed("descriptor without name"));
        }
        let address = name_ref.resolve()?;

        let bytes = self
            .memory
            .read_c_string(address, MAX_NAME_LEN)
            .ok_or(DecodeError::Unmapped { address, len: 1 })?;
        if bytes.is_empty() {
            return Err(DecodeError::Malformed("empty name"));
        }
        String::from_utf8(bytes).map_err(|_| DecodeError::Malformed("name is not UTF-8"))
    }

    /// Name prefixed by enclosing named scopes, up to and including the
    /// module. Extension, anonymous and other unnamed contexts are skipped.
    fn qualified_name(&self, descriptor: Address) -> Result<String, DecodeError> {
        let width = self.layout.width;
        let mut components = vec![self.immediate_name(descriptor)?];
        let mut visited = vec![descriptor];
        let mut current = descriptor;

        loop {
            let parent_ref = RelativeOffset::read(&self.memory, field(current, DESC_PARENT)?)?;
            let Some(parent) = parent_ref.resolve_indirectable(&self.memory, width)? else {
                break;
            };
            if visited.contains(&parent) {
                return Err(DecodeError::ParentCycle(parent));
            }
            if visited.len() > MAX_PARENT_DEPTH {
                return Err(DecodeError::Malformed("parent chain too deep"));
            }
            visited.push(parent);

            let kind = read_flags(&self.memory, parent)?.kind();
            if kind.is_some_and(ContextKind::is_named_scope) {
                components.push(self.immediate_name(parent)?);
            }
            if kind == Some(ContextKind::Module) {
                break;
            }
            current = parent;
        }

        components.reverse();
        Ok(components.join("."))
    }
}

//! Type context descriptors.
//!
//! The flags word packs the context kind (5 bits), the generic flag and, in
//! the upper 16 bits, kind-specific type flags. Each nominal kind appends
//! its own trailing fields after the common header; see `layout` for the
//! byte offsets.

use crate::memory::{Address, MemoryRegions};

use super::decoder::DecodeError;
use super::layout::*;
use super::relative::{field, RelativeOffset};

// ── Flags ──────────────────────────────────────────────────────────

/// Kind of a context descriptor (low 5 bits of the flags word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContextKind {
    Module = 0,
    Extension = 1,
    Anonymous = 2,
    Protocol = 3,
    OpaqueType = 4,
    Class = 16,
    Struct = 17,
    Enum = 18,
}

impl ContextKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Module),
            1 => Some(Self::Extension),
            2 => Some(Self::Anonymous),
            3 => Some(Self::Protocol),
            4 => Some(Self::OpaqueType),
            16 => Some(Self::Class),
            17 => Some(Self::Struct),
            18 => Some(Self::Enum),
            _ => None,
        }
    }

    /// Kinds that contribute a component to a qualified type name.
    pub fn is_named_scope(self) -> bool {
        matches!(self, Self::Module | Self::Class | Self::Struct | Self::Enum)
    }
}

/// How a type's metadata gets initialized (low 2 bits of the type flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataInitialization {
    None,
    Singleton,
    Foreign,
}

/// Raw 32-bit context descriptor flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextDescriptorFlags(pub u32);

impl ContextDescriptorFlags {
    pub fn raw_kind(&self) -> u8 {
        (self.0 & KIND_MASK) as u8
    }

    pub fn kind(&self) -> Option<ContextKind> {
        ContextKind::from_u8(self.raw_kind())
    }

    pub fn is_generic(&self) -> bool {
        self.0 & GENERIC_FLAG != 0
    }

    pub fn type_flags(&self) -> u16 {
        (self.0 >> TYPE_FLAGS_SHIFT) as u16
    }

    pub fn has_resilient_superclass(&self) -> bool {
        self.type_flags() & RESILIENT_SUPERCLASS_FLAG != 0
    }

    /// `None` for the reserved encoding 3.
    pub fn metadata_initialization(&self) -> Option<MetadataInitialization> {
        match self.type_flags() & METADATA_INIT_MASK {
            0 => Some(MetadataInitialization::None),
            1 => Some(MetadataInitialization::Singleton),
            2 => Some(MetadataInitialization::Foreign),
            _ => None,
        }
    }

    pub fn has_singleton_metadata_initialization(&self) -> bool {
        self.metadata_initialization() == Some(MetadataInitialization::Singleton)
    }

    pub fn has_foreign_metadata_initialization(&self) -> bool {
        self.metadata_initialization() == Some(MetadataInitialization::Foreign)
    }
}

// ── Variant payloads ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub address: Address,
    pub flags: ContextDescriptorFlags,
    /// Superclass type reference, kept unresolved. It is never followed,
    /// so a corrupt value here does not reject the class.
    pub superclass_type: RelativeOffset,
    pub metadata_negative_size_in_words: u32,
    pub metadata_positive_size_in_words: u32,
    pub num_immediate_members: u32,
    pub num_fields: u32,
    pub field_offset_vector_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructDescriptor {
    pub address: Address,
    pub flags: ContextDescriptorFlags,
    pub num_fields: u32,
    pub field_offset_vector_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumDescriptor {
    pub address: Address,
    pub flags: ContextDescriptorFlags,
    pub num_payload_cases: u32,
    pub payload_size_offset: u8,
    pub num_empty_cases: u32,
}

/// Decoded descriptor of a type found in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDescriptor {
    /// Dynamic-runtime class; named through the host runtime.
    DynamicClass { address: Address },
    ValueClass(ClassDescriptor),
    ValueStruct(StructDescriptor),
    ValueEnum(EnumDescriptor),
}

impl TypeDescriptor {
    /// Descriptor flags; dynamic classes carry none.
    pub fn flags(&self) -> Option<ContextDescriptorFlags> {
        match self {
            TypeDescriptor::DynamicClass { .. } => None,
            TypeDescriptor::ValueClass(d) => Some(d.flags),
            TypeDescriptor::ValueStruct(d) => Some(d.flags),
            TypeDescriptor::ValueEnum(d) => Some(d.flags),
        }
    }

    pub fn is_generic(&self) -> bool {
        self.flags().is_some_and(|f| f.is_generic())
    }

    /// Short label used in logs and the CLI.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDescriptor::DynamicClass { .. } => "dynamic-class",
            TypeDescriptor::ValueClass(_) => "class",
            TypeDescriptor::ValueStruct(_) => "struct",
            TypeDescriptor::ValueEnum(_) => "enum",
        }
    }

    /// Whether usage of this type can be attributed back to a type listed
    /// by a static scan of the binary.
    ///
    /// Generic types, types with foreign metadata and classes with a
    /// resilient superclass are instantiated through paths a static scan
    /// cannot match, so they are excluded.
    pub fn is_attributable(&self) -> bool {
        let Some(flags) = self.flags() else {
            return true;
        };
        if flags.is_generic() || flags.has_resilient_superclass() {
            return false;
        }
        matches!(
            flags.metadata_initialization(),
            Some(MetadataInitialization::None | MetadataInitialization::Singleton)
        )
    }
}

// ── Reading ────────────────────────────────────────────────────────

/// Read and validate the flags word of any context descriptor.
pub fn read_flags<M: MemoryRegions + ?Sized>(
    memory: &M,
    address: Address,
) -> Result<ContextDescriptorFlags, DecodeError> {
    let raw = memory
        .read_u32(field(address, DESC_FLAGS)?)
        .ok_or(DecodeError::Unmapped { address, len: 4 })?;
    let flags = ContextDescriptorFlags(raw);
    if flags.kind().is_none() {
        return Err(DecodeError::BadKind(flags.raw_kind()));
    }
    Ok(flags)
}

fn read_u32_field<M: MemoryRegions + ?Sized>(
    memory: &M,
    base: Address,
    offset: u64,
) -> Result<u32, DecodeError> {
    let address = field(base, offset)?;
    memory
        .read_u32(address)
        .ok_or(DecodeError::Unmapped { address, len: 4 })
}

/// Decode the nominal type descriptor at `address`.
///
/// Non-type kinds (module, extension, protocol, ...) are rejected, as is
/// the reserved metadata-initialization encoding. The whole variant span is
/// validated before any field is read.
pub fn read_type_descriptor<M: MemoryRegions + ?Sized>(
    memory: &M,
    address: Address,
) -> Result<TypeDescriptor, DecodeError> {
    let flags = read_flags(memory, address)?;
    if flags.metadata_initialization().is_none() {
        return Err(DecodeError::Malformed("reserved metadata initialization mode"));
    }

    let size = match flags.kind() {
        Some(ContextKind::Class) => CLASS_DESC_SIZE,
        Some(ContextKind::Struct) => STRUCT_DESC_SIZE,
        Some(ContextKind::Enum) => ENUM_DESC_SIZE,
        _ => return Err(DecodeError::BadKind(flags.raw_kind())),
    };
    if !memory.is_readable(address, size) {
        return Err(DecodeError::Unmapped { address, len: size });
    }

    let descriptor = match flags.kind() {
        Some(ContextKind::Class) => {
            TypeDescriptor::ValueClass(ClassDescriptor {
                address,
                flags,
                superclass_type: RelativeOffset::read(memory, field(address, CLASS_DESC_SUPERCLASS_TYPE)?)?,
                metadata_negative_size_in_words: read_u32_field(memory, address, CLASS_DESC_NEGATIVE_SIZE)?,
                metadata_positive_size_in_words: read_u32_field(memory, address, CLASS_DESC_POSITIVE_SIZE)?,
                num_immediate_members: read_u32_field(memory, address, CLASS_DESC_IMMEDIATE_MEMBERS)?,
                num_fields: read_u32_field(memory, address, CLASS_DESC_NUM_FIELDS)?,
                field_offset_vector_offset: read_u32_field(memory, address, CLASS_DESC_FIELD_OFFSET_VECTOR)?,
            })
        }
        Some(ContextKind::Struct) => TypeDescriptor::ValueStruct(StructDescriptor {
            address,
            flags,
            num_fields: read_u32_field(memory, address, STRUCT_DESC_NUM_FIELDS)?,
            field_offset_vector_offset: read_u32_field(memory, address, STRUCT_DESC_FIELD_OFFSET_VECTOR)?,
        }),
        _ => {
            let payload = read_u32_field(memory, address, ENUM_DESC_PAYLOAD)?;
            TypeDescriptor::ValueEnum(EnumDescriptor {
                address,
                flags,
                num_payload_cases: payload & ENUM_PAYLOAD_CASES_MASK,
                payload_size_offset: (payload >> ENUM_PAYLOAD_SIZE_OFFSET_SHIFT) as u8,
                num_empty_cases: read_u32_field(memory, address, ENUM_DESC_EMPTY_CASES)?,
            })
        }
    };
    Ok(descriptor)
}

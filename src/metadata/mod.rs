//! Runtime type metadata decoding.
//!
//! Interprets untrusted memory as the class objects and context descriptors
//! of the two cooperating runtimes and produces type names. All reads go
//! through [`crate::memory::MemoryRegions`].

pub mod cache;
pub mod class_bits;
pub mod decoder;
pub mod demangle;
pub mod descriptor;
pub mod layout;
pub mod relative;

pub use cache::{MemoizedNames, NameCache};
pub use class_bits::{CacheDescriptor, ClassDataBits, ClassHeader};
pub use decoder::{
    DecodeError, DecoderOptions, InitializedClass, MetadataDecoder, NoRuntime, ResolvedType,
    RuntimeNamer,
};
pub use demangle::demangle_class_name;
pub use descriptor::{
    ClassDescriptor, ContextDescriptorFlags, ContextKind, EnumDescriptor, MetadataInitialization,
    StructDescriptor, TypeDescriptor,
};
pub use layout::ClassLayout;
pub use relative::RelativeOffset;

//! Relative offset resolution.
//!
//! Cross references inside descriptors are signed 32-bit deltas measured
//! from the address of the field holding them, not from the start of the
//! containing structure. All resolution goes through these helpers so the
//! arithmetic is checked in one place; the resulting addresses are still
//! unvalidated and must be read through `MemoryRegions`.

use crate::memory::{Address, MemoryRegions, PointerWidth};

use super::decoder::DecodeError;

/// A signed displacement read from a descriptor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeOffset {
    /// Address of the field the delta was read from.
    pub field: Address,
    pub delta: i32,
}

impl RelativeOffset {
    /// Read the delta stored at `field`.
    pub fn read<M: MemoryRegions + ?Sized>(memory: &M, field: Address) -> Result<Self, DecodeError> {
        let delta = memory
            .read_i32(field)
            .ok_or(DecodeError::Unmapped { address: field, len: 4 })?;
        Ok(Self { field, delta })
    }

    /// Zero is the "absent" sentinel of nullable fields.
    pub fn is_null(&self) -> bool {
        self.delta == 0
    }

    /// Low bit set marks an indirect reference.
    pub fn is_indirect(&self) -> bool {
        self.delta & 1 != 0
    }

    /// `field + delta`, rejecting results outside the address space.
    pub fn resolve(&self) -> Result<Address, DecodeError> {
        resolve(self.field, self.delta)
    }

    /// Resolve a nullable reference that may be indirect.
    ///
    /// An indirect reference points (after clearing the low bit) at a
    /// pointer-sized slot holding the absolute target address.
    pub fn resolve_indirectable<M: MemoryRegions + ?Sized>(
        &self,
        memory: &M,
        width: PointerWidth,
    ) -> Result<Option<Address>, DecodeError> {
        if self.is_null() {
            return Ok(None);
        }
        if !self.is_indirect() {
            return self.resolve().map(Some);
        }

        let slot = resolve(self.field, self.delta & !1)?;
        let target = memory.read_word(slot, width).ok_or(DecodeError::Unmapped {
            address: slot,
            len: width.bytes(),
        })?;
        Ok(match target {
            0 => None,
            addr => Some(addr),
        })
    }
}

/// Resolve `base + delta` with overflow checks.
pub fn resolve(base: Address, delta: i32) -> Result<Address, DecodeError> {
    base.checked_add_signed(i64::from(delta))
        .ok_or(DecodeError::Malformed("relative offset escapes address space"))
}

/// `base + offset` for fixed field offsets.
pub fn field(base: Address, offset: u64) -> Result<Address, DecodeError> {
    base.checked_add(offset)
        .ok_or(DecodeError::Malformed("field offset escapes address space"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SyntheticMemory;

    #[test]
    fn test_resolve_from_field_address() {
        // Delta is relative to the field, not the structure start.
        assert_eq!(resolve(0x1008, 0x20).unwrap(), 0x1028);
        assert_eq!(resolve(0x1008, -8).unwrap(), 0x1000);
    }

    #[test]
    fn test_resolve_rejects_overflow() {
        assert!(resolve(4, -8).is_err());
        assert!(resolve(u64::MAX - 2, 16).is_err());
        assert!(field(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_null_sentinel_not_chased() {
        let r = RelativeOffset { field: 0x1000, delta: 0 };
        assert!(r.is_null());
        let mem = SyntheticMemory::new();
        assert_eq!(r.resolve_indirectable(&mem, PointerWidth::Eight).unwrap(), None);
    }

    #[test]
    fn test_read_and_resolve() {
        let mut mem = SyntheticMemory::new();
        mem.map(0x2000, (-16i32).to_le_bytes().to_vec());

        let r = RelativeOffset::read(&mem, 0x2000).unwrap();
        assert_eq!(r.resolve().unwrap(), 0x1FF0);
        assert!(RelativeOffset::read(&mem, 0x3000).is_err());
    }

    #[test]
    fn test_indirect_reference() {
        let mut mem = SyntheticMemory::new();
        // Field at 0x1000 holds delta 0x11: slot at 0x1010 (low bit cleared).
        mem.map(0x1000, 0x11i32.to_le_bytes().to_vec());
        mem.map(0x1010, 0xABCD_0000u64.to_le_bytes().to_vec());

        let r = RelativeOffset::read(&mem, 0x1000).unwrap();
        assert!(r.is_indirect());
        assert_eq!(
            r.resolve_indirectable(&mem, PointerWidth::Eight).unwrap(),
            Some(0xABCD_0000)
        );
    }

    #[test]
    fn test_indirect_slot_unmapped() {
        let mut mem = SyntheticMemory::new();
        mem.map(0x1000, 0x41i32.to_le_bytes().to_vec());
        let r = RelativeOffset::read(&mem, 0x1000).unwrap();
        assert!(matches!(
            r.resolve_indirectable(&mem, PointerWidth::Eight),
            Err(DecodeError::Unmapped { .. })
        ));
    }
}

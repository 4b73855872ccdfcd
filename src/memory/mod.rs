//! Memory region validation.
//!
//! Every dereference the decoder performs goes through [`MemoryRegions`].
//! Implementations answer `is_readable` without faulting, and the provided
//! `read_*` helpers refuse to copy anything the validator has not approved.
//! A wrong guess about a pointer therefore costs a dropped sample, never a
//! crash of the host process.

pub mod process;
pub mod regions;
pub mod synthetic;

pub use process::ProcessMemory;
pub use regions::RegionSet;
pub use synthetic::SyntheticMemory;

/// Absolute address in the inspected address space.
///
/// Always 64 bits wide so that 32-bit layouts can be decoded from a
/// snapshot on a 64-bit host and vice versa.
pub type Address = u64;

/// Bytes scanned per validation step when reading C strings.
const STRING_CHUNK: usize = 64;

/// Pointer width of the inspected address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    Four,
    Eight,
}

impl PointerWidth {
    #[cfg(target_pointer_width = "64")]
    pub const NATIVE: PointerWidth = PointerWidth::Eight;

    #[cfg(not(target_pointer_width = "64"))]
    pub const NATIVE: PointerWidth = PointerWidth::Four;

    /// Width in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }
}

/// Read access to an address space, gated by a readability check.
///
/// Implementors provide `is_readable` and a raw copy. Callers use
/// `read_exact` and the typed helpers, which always validate first.
pub trait MemoryRegions {
    /// Whether `[address, address + len)` lies entirely in mapped, readable
    /// memory. Must never fault. Spans that overflow the address space are
    /// not readable.
    fn is_readable(&self, address: Address, len: usize) -> bool;

    /// Copy `buf.len()` bytes starting at `address` without consulting
    /// `is_readable`. Only called by `read_exact` after validation.
    fn copy_unchecked(&self, address: Address, buf: &mut [u8]) -> bool;

    /// Validated copy. Returns false if the span is not readable or the copy
    /// failed; `buf` contents are unspecified in that case.
    fn read_exact(&self, address: Address, buf: &mut [u8]) -> bool {
        self.is_readable(address, buf.len()) && self.copy_unchecked(address, buf)
    }

    fn read_u16(&self, address: Address) -> Option<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(address, &mut buf).then(|| u16::from_le_bytes(buf))
    }

    fn read_u32(&self, address: Address) -> Option<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(address, &mut buf).then(|| u32::from_le_bytes(buf))
    }

    fn read_i32(&self, address: Address) -> Option<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(address, &mut buf).then(|| i32::from_le_bytes(buf))
    }

    fn read_u64(&self, address: Address) -> Option<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(address, &mut buf).then(|| u64::from_le_bytes(buf))
    }

    /// Read a pointer-sized word, zero-extended to 64 bits.
    fn read_word(&self, address: Address, width: PointerWidth) -> Option<u64> {
        match width {
            PointerWidth::Four => self.read_u32(address).map(u64::from),
            PointerWidth::Eight => self.read_u64(address),
        }
    }

    /// Read a NUL-terminated string of at most `max_len` bytes (terminator
    /// excluded).
    ///
    /// Scans in small validated chunks so a string sitting near the end of
    /// a mapping is still readable. Returns `None` if no terminator is found
    /// within `max_len` bytes or if the scan runs into unreadable memory.
    fn read_c_string(&self, address: Address, max_len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = address;
        // +1 leaves room for the terminator itself.
        let limit = max_len.checked_add(1)?;

        while out.len() < limit {
            let want = STRING_CHUNK.min(limit - out.len());
            // Shrink the chunk until it fits the mapping; a 1-byte read that
            // fails means the string runs off readable memory.
            let mut len = want;
            while len > 0 && !self.is_readable(cursor, len) {
                len /= 2;
            }
            if len == 0 {
                return None;
            }

            let mut chunk = vec![0u8; len];
            if !self.read_exact(cursor, &mut chunk) {
                return None;
            }
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return (out.len() <= max_len).then_some(out);
            }
            out.extend_from_slice(&chunk);
            cursor = cursor.checked_add(len as u64)?;
        }

        None
    }
}

impl<T: MemoryRegions + ?Sized> MemoryRegions for &T {
    fn is_readable(&self, address: Address, len: usize) -> bool {
        (**self).is_readable(address, len)
    }

    fn copy_unchecked(&self, address: Address, buf: &mut [u8]) -> bool {
        (**self).copy_unchecked(address, buf)
    }
}

impl<T: MemoryRegions + ?Sized> MemoryRegions for std::sync::Arc<T> {
    fn is_readable(&self, address: Address, len: usize) -> bool {
        (**self).is_readable(address, len)
    }

    fn copy_unchecked(&self, address: Address, buf: &mut [u8]) -> bool {
        (**self).copy_unchecked(address, buf)
    }
}

/// End of a span, or `None` if it overflows the address space.
#[inline]
pub(crate) fn span_end(address: Address, len: usize) -> Option<Address> {
    address.checked_add(len as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_width_bytes() {
        assert_eq!(PointerWidth::Four.bytes(), 4);
        assert_eq!(PointerWidth::Eight.bytes(), 8);
        assert_eq!(PointerWidth::NATIVE.bytes(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_typed_reads_little_endian() {
        let mut mem = SyntheticMemory::new();
        mem.map(0x1000, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);

        assert_eq!(mem.read_u16(0x1000), Some(0x0201));
        assert_eq!(mem.read_u32(0x1000), Some(0x0403_0201));
        assert_eq!(mem.read_u64(0x1000), Some(0x0807_0605_0403_0201));
        assert_eq!(mem.read_word(0x1004, PointerWidth::Four), Some(0x0807_0605));
        assert_eq!(mem.read_i32(0x1000), Some(0x0403_0201));
    }

    #[test]
    fn test_reads_refuse_partial_spans() {
        let mut mem = SyntheticMemory::new();
        mem.map(0x1000, vec![0xAA; 6]);

        assert_eq!(mem.read_u32(0x1002), Some(0xAAAA_AAAA));
        assert_eq!(mem.read_u32(0x1003), None);
        assert_eq!(mem.read_u64(0x1000), None);
        assert_eq!(mem.read_u16(0x0FFF), None);
    }

    #[test]
    fn test_read_c_string_basic() {
        let mut mem = SyntheticMemory::new();
        mem.map(0x2000, b"Foo\0garbage".to_vec());

        assert_eq!(mem.read_c_string(0x2000, 64), Some(b"Foo".to_vec()));
        assert_eq!(mem.read_c_string(0x2001, 64), Some(b"oo".to_vec()));
    }

    #[test]
    fn test_read_c_string_at_mapping_edge() {
        let mut mem = SyntheticMemory::new();
        // Terminator is the very last mapped byte.
        mem.map(0x3000, b"EdgeName\0".to_vec());
        assert_eq!(mem.read_c_string(0x3000, 1024), Some(b"EdgeName".to_vec()));
    }

    #[test]
    fn test_read_c_string_unterminated() {
        let mut mem = SyntheticMemory::new();
        mem.map(0x3000, b"NoTerminatorHere".to_vec());
        assert_eq!(mem.read_c_string(0x3000, 1024), None);
    }

    #[test]
    fn test_read_c_string_bounded() {
        let mut mem = SyntheticMemory::new();
        let mut bytes = vec![b'x'; 300];
        bytes.push(0);
        mem.map(0x4000, bytes);

        assert_eq!(mem.read_c_string(0x4000, 100), None);
        assert_eq!(mem.read_c_string(0x4000, 300).map(|s| s.len()), Some(300));
    }

    #[test]
    fn test_read_c_string_empty() {
        let mut mem = SyntheticMemory::new();
        mem.map(0x5000, vec![0]);
        assert_eq!(mem.read_c_string(0x5000, 16), Some(Vec::new()));
    }

    #[test]
    fn test_read_c_string_unmapped() {
        let mem = SyntheticMemory::new();
        assert_eq!(mem.read_c_string(0x5000, 16), None);
    }

    #[test]
    fn test_span_end_overflow() {
        assert_eq!(span_end(u64::MAX, 1), None);
        assert_eq!(span_end(u64::MAX - 1, 1), Some(u64::MAX));
    }
}

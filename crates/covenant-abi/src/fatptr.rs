//! Fat pointers.
//!
//! A fat pointer packs a linear-memory offset into the high 32 bits and a
//! byte length into the low 32 bits of a single `i64`. It is only meaningful
//! against the memory of the instance that produced it.

/// Pack an offset and a length into a fat pointer.
pub const fn pack_fat_ptr(ptr: u32, len: u32) -> u64 {
    ((ptr as u64) << 32) | len as u64
}

/// Split a fat pointer into `(offset, length)`.
pub const fn unpack_fat_ptr(fp: u64) -> (u32, u32) {
    ((fp >> 32) as u32, fp as u32)
}

/// An unpacked fat pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FatPtr {
    /// Byte offset into linear memory.
    pub ptr: u32,
    /// Length in bytes.
    pub len: u32,
}

impl FatPtr {
    /// The null fat pointer; reads as an empty string or collection.
    pub const NULL: FatPtr = FatPtr { ptr: 0, len: 0 };

    /// Create a fat pointer from its parts.
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// Decode a packed fat pointer.
    pub const fn unpack(fp: u64) -> Self {
        let (ptr, len) = unpack_fat_ptr(fp);
        Self { ptr, len }
    }

    /// Decode a fat pointer as it arrives in a wasm `i64`.
    pub const fn from_i64(raw: i64) -> Self {
        Self::unpack(raw as u64)
    }

    /// Pack into a `u64`.
    pub const fn pack(self) -> u64 {
        pack_fat_ptr(self.ptr, self.len)
    }

    /// Pack into the `i64` representation guests see.
    pub const fn to_i64(self) -> i64 {
        self.pack() as i64
    }

    /// True when the pointer refers to no bytes.
    pub const fn is_empty(self) -> bool {
        self.ptr == 0 || self.len == 0
    }

    /// Exclusive end offset.
    pub fn end(self) -> usize {
        self.ptr as usize + self.len as usize
    }
}

impl std::fmt::Display for FatPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}+{}", self.ptr, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        assert_eq!(pack_fat_ptr(1024, 17), (1024u64 << 32) | 17);
        assert_eq!(unpack_fat_ptr(pack_fat_ptr(u32::MAX, u32::MAX)), (u32::MAX, u32::MAX));
    }

    #[test]
    fn test_high_offset_survives_i64() {
        // Offsets above 2 GiB set the sign bit of the guest-visible i64.
        let fp = FatPtr::new(0x8000_0000, 3);
        assert!(fp.to_i64() < 0);
        assert_eq!(FatPtr::from_i64(fp.to_i64()), fp);
    }

    #[test]
    fn test_null_is_empty() {
        assert!(FatPtr::NULL.is_empty());
        assert!(FatPtr::new(0, 12).is_empty());
        assert!(FatPtr::new(64, 0).is_empty());
        assert!(!FatPtr::new(64, 1).is_empty());
    }
}

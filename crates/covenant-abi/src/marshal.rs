//! Encoding of strings and collections in guest linear memory.
//!
//! Layouts:
//!
//! - string: UTF-8 bytes, referenced by a fat pointer `(ptr, byte_len)`
//! - collection: every item is written first, then a header
//!   `[count: i32][fat_ptr_0: i64]..[fat_ptr_{n-1}: i64]` (little endian);
//!   the collection's fat pointer covers the header
//! - nested collection: a collection header whose entries point at
//!   collection headers
//!
//! A [`Marshaller`] created without memory reads every value as empty and
//! writes nothing. Metadata extraction relies on this while a module is
//! still being probed.

use tracing::trace;

use crate::arena::Arena;
use crate::error::{AbiError, AbiResult};
use crate::fatptr::FatPtr;
use crate::memory::GuestMemory;

const COUNT_BYTES: usize = 4;
const ENTRY_BYTES: usize = 8;

/// Reads and writes ABI values against one instance's memory and arena.
pub struct Marshaller<'a> {
    memory: Option<&'a mut dyn GuestMemory>,
    arena: &'a mut Arena,
}

impl<'a> Marshaller<'a> {
    /// Create a marshaller over `memory`, allocating from `arena`.
    pub fn new(memory: &'a mut dyn GuestMemory, arena: &'a mut Arena) -> Self {
        Self {
            memory: Some(memory),
            arena,
        }
    }

    /// Create a marshaller with no memory attached.
    pub fn detached(arena: &'a mut Arena) -> Self {
        Self {
            memory: None,
            arena,
        }
    }

    /// Create a marshaller from optional memory.
    pub fn with_memory(memory: Option<&'a mut dyn GuestMemory>, arena: &'a mut Arena) -> Self {
        Self { memory, arena }
    }

    /// True when linear memory is attached.
    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    /// Borrow the arena.
    pub fn arena(&self) -> &Arena {
        self.arena
    }

    /// Reserve `size` bytes in the arena, growing memory to cover them.
    ///
    /// Returns 0 when no memory is attached.
    pub fn alloc(&mut self, size: u32) -> AbiResult<u32> {
        let Some(memory) = self.memory.as_deref_mut() else {
            return Ok(0);
        };

        let ptr = self.arena.alloc(size)?;
        memory.ensure(ptr as usize + size as usize)?;
        Ok(ptr)
    }

    /// Copy `bytes` into the arena.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> AbiResult<FatPtr> {
        if self.memory.is_none() {
            return Ok(FatPtr::NULL);
        }

        let len = u32::try_from(bytes.len()).map_err(|_| AbiError::ArenaExhausted {
            cursor: self.arena.cursor(),
            requested: u32::MAX,
        })?;
        let ptr = self.alloc(len)?;
        if let Some(memory) = self.memory.as_deref_mut() {
            memory.write(ptr as usize, bytes)?;
        }

        trace!(ptr, len, "Wrote bytes to guest memory");
        Ok(FatPtr::new(ptr, len))
    }

    /// Read the bytes a fat pointer refers to.
    pub fn read_bytes(&self, fp: FatPtr) -> AbiResult<Vec<u8>> {
        match self.memory.as_deref() {
            Some(memory) if !fp.is_empty() => memory.read(fp.ptr as usize, fp.len as usize),
            _ => Ok(Vec::new()),
        }
    }

    /// Write a string as UTF-8.
    pub fn write_string(&mut self, s: &str) -> AbiResult<FatPtr> {
        self.write_bytes(s.as_bytes())
    }

    /// Read a UTF-8 string.
    ///
    /// A null or zero-length pointer reads as the empty string.
    pub fn read_string(&self, fp: FatPtr) -> AbiResult<String> {
        let bytes = self.read_bytes(fp)?;
        String::from_utf8(bytes).map_err(|e| AbiError::InvalidUtf8(e.to_string()))
    }

    /// Write a collection of strings.
    pub fn write_collection<S: AsRef<str>>(&mut self, items: &[S]) -> AbiResult<FatPtr> {
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            entries.push(self.write_string(item.as_ref())?);
        }
        self.write_header(&entries)
    }

    /// Read a collection of strings.
    pub fn read_collection(&self, fp: FatPtr) -> AbiResult<Vec<String>> {
        self.read_header(fp)?
            .into_iter()
            .map(|entry| self.read_string(entry))
            .collect()
    }

    /// Write a collection of collections.
    pub fn write_nested_collection<S: AsRef<str>>(
        &mut self,
        groups: &[Vec<S>],
    ) -> AbiResult<FatPtr> {
        let mut entries = Vec::with_capacity(groups.len());
        for group in groups {
            entries.push(self.write_collection(group)?);
        }
        self.write_header(&entries)
    }

    /// Read a collection whose entries are themselves collections.
    pub fn read_nested_collection(&self, fp: FatPtr) -> AbiResult<Vec<Vec<String>>> {
        self.read_header(fp)?
            .into_iter()
            .map(|entry| self.read_collection(entry))
            .collect()
    }

    /// Write key/value pairs as a collection of alternating keys and values.
    pub fn write_map<K: AsRef<str>, V: AsRef<str>>(&mut self, pairs: &[(K, V)]) -> AbiResult<FatPtr> {
        let flat: Vec<&str> = pairs
            .iter()
            .flat_map(|(k, v)| [k.as_ref(), v.as_ref()])
            .collect();
        self.write_collection(&flat)
    }

    /// Read a collection of alternating keys and values.
    pub fn read_map(&self, fp: FatPtr) -> AbiResult<Vec<(String, String)>> {
        let flat = self.read_collection(fp)?;
        if flat.len() % 2 != 0 {
            return Err(AbiError::Malformed(format!(
                "map has odd number of entries ({})",
                flat.len()
            )));
        }

        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            pairs.push((k, v));
        }
        Ok(pairs)
    }

    /// Read the raw entries of a collection header.
    pub fn read_header(&self, fp: FatPtr) -> AbiResult<Vec<FatPtr>> {
        if fp.is_empty() || self.memory.is_none() {
            return Ok(Vec::new());
        }

        let header = self.read_bytes(fp)?;
        if header.len() < COUNT_BYTES {
            return Err(AbiError::Malformed(format!(
                "header of {} bytes has no count",
                header.len()
            )));
        }

        let count = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let count = usize::try_from(count)
            .map_err(|_| AbiError::Malformed(format!("negative count {count}")))?;
        let needed = COUNT_BYTES + count * ENTRY_BYTES;
        if header.len() < needed {
            return Err(AbiError::Malformed(format!(
                "{count} entries need {needed} header bytes, got {}",
                header.len()
            )));
        }

        Ok(header[COUNT_BYTES..needed]
            .chunks_exact(ENTRY_BYTES)
            .map(|chunk| {
                let mut raw = [0u8; ENTRY_BYTES];
                raw.copy_from_slice(chunk);
                FatPtr::unpack(u64::from_le_bytes(raw))
            })
            .collect())
    }

    fn write_header(&mut self, entries: &[FatPtr]) -> AbiResult<FatPtr> {
        let count = i32::try_from(entries.len())
            .map_err(|_| AbiError::Malformed(format!("{} entries", entries.len())))?;

        let mut header = Vec::with_capacity(COUNT_BYTES + entries.len() * ENTRY_BYTES);
        header.extend_from_slice(&count.to_le_bytes());
        for entry in entries {
            header.extend_from_slice(&entry.pack().to_le_bytes());
        }
        self.write_bytes(&header)
    }
}

impl std::fmt::Debug for Marshaller<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marshaller")
            .field("has_memory", &self.has_memory())
            .field("arena", &self.arena)
            .finish()
    }
}

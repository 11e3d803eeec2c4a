//! Guest linear memory access.
//!
//! Views into linear memory are never cached: every read or write
//! re-derives the byte slice from the store, because growing memory may
//! move it.

use tracing::debug;
use wasmtime::{AsContextMut, Memory};

use crate::error::{AbiError, AbiResult};

/// Size of a WebAssembly page in bytes.
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Byte-addressable guest memory.
pub trait GuestMemory {
    /// Current size in bytes.
    fn size(&self) -> usize;

    /// Copy `len` bytes starting at `offset`.
    fn read(&self, offset: usize, len: usize) -> AbiResult<Vec<u8>>;

    /// Copy `bytes` into memory starting at `offset`.
    fn write(&mut self, offset: usize, bytes: &[u8]) -> AbiResult<()>;

    /// Grow memory so that at least `end` bytes are addressable.
    fn ensure(&mut self, end: usize) -> AbiResult<()>;
}

fn check_bounds(offset: usize, len: usize, memory_size: usize) -> AbiResult<usize> {
    match offset.checked_add(len) {
        Some(end) if end <= memory_size => Ok(end),
        _ => Err(AbiError::OutOfBounds {
            offset,
            len,
            memory_size,
        }),
    }
}

fn pages_needed(current: usize, end: usize) -> u64 {
    (end - current).div_ceil(WASM_PAGE_SIZE) as u64
}

/// A Wasmtime memory paired with the store context that owns it.
///
/// Works with anything that exposes the store mutably: a `Store`, a
/// `&mut Store`, or the `Caller` handed to a host function.
pub struct WasmMemory<C> {
    memory: Memory,
    store: C,
}

impl<C: AsContextMut> WasmMemory<C> {
    /// Pair `memory` with its store.
    pub fn new(memory: Memory, store: C) -> Self {
        Self { memory, store }
    }

    /// Give the store context back.
    pub fn into_inner(self) -> C {
        self.store
    }
}

impl<C: AsContextMut> GuestMemory for WasmMemory<C> {
    fn size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    fn read(&self, offset: usize, len: usize) -> AbiResult<Vec<u8>> {
        let data = self.memory.data(&self.store);
        let end = check_bounds(offset, len, data.len())?;
        Ok(data[offset..end].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> AbiResult<()> {
        let data = self.memory.data_mut(&mut self.store);
        let end = check_bounds(offset, bytes.len(), data.len())?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn ensure(&mut self, end: usize) -> AbiResult<()> {
        let current = self.size();
        if end <= current {
            return Ok(());
        }

        let pages = pages_needed(current, end);
        self.memory
            .grow(&mut self.store, pages)
            .map_err(|e| AbiError::GrowFailed(e.to_string()))?;

        debug!(pages, new_size = self.size(), "Grew guest memory");
        Ok(())
    }
}

impl<C> std::fmt::Debug for WasmMemory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmMemory").finish_non_exhaustive()
    }
}

/// A heap-backed memory that grows in wasm pages.
///
/// Behaves like a guest memory without needing an instance; used by tools
/// that stage data before a module exists, and by tests.
#[derive(Debug, Clone)]
pub struct VecMemory {
    bytes: Vec<u8>,
    max_bytes: usize,
}

impl VecMemory {
    /// Create a memory of `pages` pages that may grow to `max_pages`.
    pub fn new(pages: usize, max_pages: usize) -> Self {
        Self {
            bytes: vec![0; pages * WASM_PAGE_SIZE],
            max_bytes: max_pages * WASM_PAGE_SIZE,
        }
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for VecMemory {
    fn default() -> Self {
        Self::new(1, 1024)
    }
}

impl GuestMemory for VecMemory {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, len: usize) -> AbiResult<Vec<u8>> {
        let end = check_bounds(offset, len, self.bytes.len())?;
        Ok(self.bytes[offset..end].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> AbiResult<()> {
        let end = check_bounds(offset, bytes.len(), self.bytes.len())?;
        self.bytes[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn ensure(&mut self, end: usize) -> AbiResult<()> {
        let current = self.bytes.len();
        if end <= current {
            return Ok(());
        }

        let new_size = current + pages_needed(current, end) as usize * WASM_PAGE_SIZE;
        if new_size > self.max_bytes {
            return Err(AbiError::GrowFailed(format!(
                "{new_size} bytes exceeds maximum of {}",
                self.max_bytes
            )));
        }

        self.bytes.resize(new_size, 0);
        Ok(())
    }
}

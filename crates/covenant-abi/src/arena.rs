//! Tracked bump arena.
//!
//! Every live instance owns one arena. Host-initiated writes and the guest's
//! `mem.alloc` import draw from the same cursor, which only moves forward
//! until the arena is reset or dropped together with its instance.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{AbiError, AbiResult};

/// Default first offset handed out by an arena (1 MiB).
///
/// Leaves the low region of linear memory to the guest's own static data
/// and stack.
pub const DEFAULT_ARENA_BASE: u32 = 1 << 20;

/// Alignment of every arena allocation.
pub const ARENA_ALIGN: u32 = 8;

/// Round `value` up to the arena alignment.
pub fn align_up(value: u32) -> Option<u32> {
    value
        .checked_add(ARENA_ALIGN - 1)
        .map(|v| v & !(ARENA_ALIGN - 1))
}

/// Bump allocator state for one instance.
#[derive(Debug, Clone)]
pub struct Arena {
    base: u32,
    cursor: u32,
    allocations: u64,
}

impl Arena {
    /// Create an arena starting at `base`, rounded up to the alignment.
    ///
    /// A base of zero is bumped to the first aligned non-zero offset so that
    /// no allocation is ever mistaken for the null fat pointer.
    pub fn new(base: u32) -> Self {
        let base = align_up(base.max(1)).unwrap_or(u32::MAX & !(ARENA_ALIGN - 1));
        Self {
            base,
            cursor: base,
            allocations: 0,
        }
    }

    /// First offset this arena hands out.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Next offset to be handed out.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Number of allocations served since creation or the last reset.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Bytes consumed since creation or the last reset, padding included.
    pub fn bytes_used(&self) -> u32 {
        self.cursor - self.base
    }

    /// Reserve `size` bytes and return their offset.
    ///
    /// The cursor advances to the next aligned offset past the allocation.
    ///
    /// # Errors
    ///
    /// Returns [`AbiError::ArenaExhausted`] when the allocation would not fit
    /// in a 32-bit address space.
    pub fn alloc(&mut self, size: u32) -> AbiResult<u32> {
        let start = self.cursor;
        let next = start
            .checked_add(size)
            .and_then(align_up)
            .ok_or(AbiError::ArenaExhausted {
                cursor: start,
                requested: size,
            })?;

        self.cursor = next;
        self.allocations += 1;
        trace!(offset = start, size, "Arena allocation");
        Ok(start)
    }

    /// Rewind the cursor to the base, invalidating every prior allocation.
    pub fn reset(&mut self) {
        self.cursor = self.base;
        self.allocations = 0;
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_BASE)
    }
}

/// An arena shared between the host and the import closures of one instance.
pub type SharedArena = Arc<Mutex<Arena>>;

/// Create a new shared arena at `base`.
pub fn shared_arena(base: u32) -> SharedArena {
    Arc::new(Mutex::new(Arena::new(base)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_aligned_and_monotonic() {
        let mut arena = Arena::new(1024);

        let a = arena.alloc(3).unwrap();
        let b = arena.alloc(9).unwrap();
        let c = arena.alloc(0).unwrap();

        assert_eq!(a, 1024);
        assert_eq!(b, 1032);
        assert_eq!(c, 1048);
        assert_eq!(arena.cursor(), 1048);
        assert_eq!(arena.allocations(), 3);
        assert!([a, b, c].iter().all(|off| off % ARENA_ALIGN == 0));
    }

    #[test]
    fn test_base_is_aligned_and_non_zero() {
        assert_eq!(Arena::new(0).base(), 8);
        assert_eq!(Arena::new(13).base(), 16);
        assert_eq!(Arena::default().base(), DEFAULT_ARENA_BASE);
    }

    #[test]
    fn test_reset_rewinds() {
        let mut arena = Arena::new(64);
        arena.alloc(100).unwrap();
        assert_eq!(arena.bytes_used(), 104);

        arena.reset();
        assert_eq!(arena.cursor(), 64);
        assert_eq!(arena.allocations(), 0);
    }

    #[test]
    fn test_exhaustion() {
        let mut arena = Arena::new(u32::MAX - 64);
        let result = arena.alloc(128);
        assert!(matches!(result, Err(AbiError::ArenaExhausted { .. })));
    }
}

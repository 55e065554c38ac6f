//! Thread-local scratch arena for short-lived allocations.
//!
//! Evaluation produces a lot of small, short-lived scratch (argument lists
//! being assembled, temporary byte buffers for molding) that doesn't need
//! to survive past the current trampoline tick. Routing it through a
//! `bumpalo::Bump` instead of the system allocator keeps the fast path
//! fast; the arena is reset wholesale once it has grown past a threshold
//! rather than freed incrementally.

use bumpalo::Bump;
use std::cell::RefCell;

use crate::memory_stats::update_arena_stats;

/// Reset once the arena has accumulated this many bytes. Chosen so that a
/// typical evaluation burst (thousands of small allocations) resets on the
/// order of once per burst rather than once per allocation.
const RESET_THRESHOLD_BYTES: usize = 10 * 1024 * 1024;

thread_local! {
    static ARENA: RefCell<Bump> = RefCell::new(Bump::new());
    static ARENA_BYTES_ALLOCATED: RefCell<usize> = const { RefCell::new(0) };
}

/// Run `f` with access to the current thread's scratch arena.
pub fn with_arena<R>(f: impl FnOnce(&Bump) -> R) -> R {
    ARENA.with(|arena| f(&arena.borrow()))
}

/// Reset the arena, reclaiming all outstanding allocations at once.
///
/// Callers must ensure nothing still references arena-allocated memory
/// before calling this -- the trampoline calls it between ticks, never
/// mid-evaluation.
pub fn arena_reset() {
    ARENA.with(|arena| arena.borrow_mut().reset());
    ARENA_BYTES_ALLOCATED.with(|bytes| *bytes.borrow_mut() = 0);
    update_arena_stats(0);
}

/// Whether the arena has grown past the reset threshold.
pub fn should_reset() -> bool {
    ARENA.with(|arena| arena.borrow().allocated_bytes() >= RESET_THRESHOLD_BYTES)
}

/// Record that the arena grew (or shrank, on reset) and mirror the figure
/// into the cross-thread memory stats registry for diagnostics.
pub fn record_allocation(bytes: usize) {
    let total = ARENA_BYTES_ALLOCATED.with(|cell| {
        let mut cell = cell.borrow_mut();
        *cell += bytes;
        *cell
    });
    update_arena_stats(total);
}

/// Current arena statistics for this thread.
pub fn arena_stats() -> ArenaStats {
    ARENA.with(|arena| ArenaStats {
        allocated_bytes: arena.borrow().allocated_bytes(),
        reset_threshold_bytes: RESET_THRESHOLD_BYTES,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ArenaStats {
    pub allocated_bytes: usize,
    pub reset_threshold_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_arena_allocates_scratch() {
        let value = with_arena(|arena| {
            let slice = arena.alloc_slice_copy(&[1u8, 2, 3]);
            slice.len()
        });
        assert_eq!(value, 3);
    }

    #[test]
    fn reset_reclaims_allocations() {
        with_arena(|arena| {
            arena.alloc_slice_copy(&[0u8; 1024]);
        });
        let before = arena_stats().allocated_bytes;
        assert!(before > 0);
        arena_reset();
        let after = arena_stats().allocated_bytes;
        assert!(after <= before);
    }

    #[test]
    fn should_reset_is_false_when_small() {
        arena_reset();
        assert!(!should_reset());
    }
}

//! Stub pool allocator (spec §4.2).
//!
//! Provides O(1) allocation and free of fixed-size `Stub` records, a
//! manuals list for unmanaged stubs, and dynamic buffer allocation for
//! out-of-line payloads. Grounded on the teacher's `pool.rs` free-list
//! idea -- now fleshed out into a real allocator, since the teacher's
//! own copy was left as a deprecated stub once the tagged-stack rewrite
//! made per-node pooling unnecessary for *their* stack representation.
//! Stubs are reference-stable heap objects here, so pooling is back.
//!
//! Unlike the teacher's raw free-list-through-header-bits technique
//! (not expressible safely over a `Vec<Stub>` holding non-`Copy`
//! payloads), this pool threads free slots through a side `Vec<u32>`
//! stack of reclaimed indices -- same O(1) alloc/free contract, safe
//! Rust instead of raw pointer splicing.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use renc_core::memory_stats::{increment_stub_allocations, update_stub_pool_stats};

use crate::stub::{DynamicBuf, Payload, Stub};

/// An index into a `StubPool`. Stable for the stub's lifetime; reused
/// only after the slot is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StubId(u32);

impl StubId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstruct a `StubId` from a raw slot index. Used by flavors
    /// that stash sibling indices in another stub's generic slots (e.g.
    /// a `Symbol`'s synonym ring, spec §4.3).
    pub(crate) fn from_index(index: u32) -> StubId {
        StubId(index)
    }
}

/// Segmented pool of `Stub` records (spec §4.2 "Pool layout").
pub struct StubPool {
    slots: Vec<Option<Stub>>,
    free: Vec<u32>,
    /// Indices of unmanaged stubs, freed automatically on a panic unwind
    /// through `ManualsGuard` (spec §3 "Manuals list").
    manuals: Vec<u32>,
}

impl StubPool {
    pub fn new() -> StubPool {
        StubPool {
            slots: Vec::new(),
            free: Vec::new(),
            manuals: Vec::new(),
        }
    }

    /// Allocate an erased stub, unmanaged by default (spec §4.2
    /// "Allocation returns a stub with the node bit set and all other
    /// header bits zero").
    pub fn alloc(&mut self) -> StubId {
        let id = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(Stub::erased());
                idx
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Some(Stub::erased()));
                idx
            }
        };
        self.manuals.push(id);
        increment_stub_allocations();
        self.report_occupancy();
        StubId(id)
    }

    pub fn get(&self, id: StubId) -> &Stub {
        self.slots[id.index()]
            .as_ref()
            .expect("stub id refers to a freed slot")
    }

    pub fn get_mut(&mut self, id: StubId) -> &mut Stub {
        self.slots[id.index()]
            .as_mut()
            .expect("stub id refers to a freed slot")
    }

    /// Move a stub from the manuals list to GC tracking (one-way, spec
    /// §3 "Transition from unmanaged to managed is one-way").
    pub fn manage(&mut self, id: StubId) {
        self.get_mut(id).mark_managed();
        self.manuals.retain(|&i| i != id.0);
    }

    /// Free a stub's slot, releasing any dynamic payload. Used by the
    /// GC sweep and by explicit manuals cleanup on panic unwind.
    pub fn free(&mut self, id: StubId) {
        if let Some(stub) = self.slots[id.index()].take() {
            if let Payload::Dynamic(buf) = stub.payload {
                free_dynamic_buf(&buf);
            }
        }
        self.manuals.retain(|&i| i != id.0);
        self.free.push(id.0);
        self.report_occupancy();
    }

    /// Free every stub still on the manuals list. Called when a rescue
    /// scope catches a panic unwind (spec §8 scenario 6).
    pub fn free_manuals(&mut self) {
        let pending: Vec<u32> = std::mem::take(&mut self.manuals);
        for idx in pending {
            self.free(StubId(idx));
        }
    }

    pub fn manuals_count(&self) -> usize {
        self.manuals.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate all live stub ids, for GC sweep / mark traversal.
    pub fn live_ids(&self) -> impl Iterator<Item = StubId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| StubId(i as u32)))
    }

    /// Allocate an out-of-line buffer for a stub that has outgrown its
    /// inline (singular) payload, re-homing the stub's payload to
    /// `Payload::Dynamic` (spec §4.2 "Re-home inline content to
    /// out-of-line when a stub must grow").
    pub fn grow_to_dynamic(&mut self, id: StubId, elem_width: usize, capacity: usize) {
        let buf = alloc_dynamic_buf(elem_width, capacity);
        let stub = self.get_mut(id);
        stub.payload = Payload::Dynamic(buf);
        stub.set_flag(crate::stub::flag::DYNAMIC);
    }

    fn report_occupancy(&self) {
        update_stub_pool_stats(self.free.len(), self.slots.len());
    }
}

impl Default for StubPool {
    fn default() -> Self {
        StubPool::new()
    }
}

fn alloc_dynamic_buf(elem_width: usize, capacity: usize) -> DynamicBuf {
    let size = elem_width * capacity;
    let data = if size == 0 {
        NonNull::dangling()
    } else {
        let layout = Layout::array::<u8>(size).expect("layout overflow");
        let data = unsafe { alloc(layout) };
        NonNull::new(data).unwrap_or_else(|| std::alloc::handle_alloc_error(layout))
    };
    DynamicBuf {
        data,
        elem_width,
        len: 0,
        rest: capacity,
        bias: 0,
    }
}

fn free_dynamic_buf(buf: &DynamicBuf) {
    if buf.rest == 0 {
        return;
    }
    let layout = Layout::array::<u8>(buf.elem_width * buf.rest).expect("layout overflow");
    unsafe { dealloc(buf.data.as_ptr(), layout) };
}

/// Run `f` as a rescue scope (spec §3/§7 "Rescue scope"): if `f` panics,
/// every stub it allocated through `pool` and left unmanaged is freed
/// before the panic payload is handed back to the caller, matching
/// "after rescue, all N are freed; live-stub count is unchanged from
/// before the scope" (spec §8 scenario 6). The host's trampoline is the
/// intended caller, converting the `Err` into a `Bounce::Thrown`/panic
/// report per level (spec §4.6).
pub fn rescue_scope<R>(
    pool: &mut StubPool,
    f: impl FnOnce(&mut StubPool) -> R,
) -> Result<R, Box<dyn std::any::Any + Send + 'static>> {
    let baseline_manuals = pool.manuals.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(pool)));
    if result.is_err() {
        let to_free: Vec<u32> = pool
            .manuals
            .iter()
            .copied()
            .filter(|idx| !baseline_manuals.contains(idx))
            .collect();
        for idx in to_free {
            pool.free(StubId(idx));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::Flavor;

    #[test]
    fn alloc_then_free_reuses_slot() {
        let mut pool = StubPool::new();
        let a = pool.alloc();
        pool.free(a);
        let b = pool.alloc();
        assert_eq!(a.index(), b.index(), "freed slot should be reused");
    }

    #[test]
    fn fresh_stub_is_unmanaged_and_on_manuals_list() {
        let mut pool = StubPool::new();
        let id = pool.alloc();
        assert!(!pool.get(id).is_managed());
        assert_eq!(pool.manuals_count(), 1);
    }

    #[test]
    fn manage_removes_from_manuals_list() {
        let mut pool = StubPool::new();
        let id = pool.alloc();
        pool.manage(id);
        assert!(pool.get(id).is_managed());
        assert_eq!(pool.manuals_count(), 0);
    }

    #[test]
    fn free_manuals_clears_unmanaged_stubs_only() {
        let mut pool = StubPool::new();
        let managed = pool.alloc();
        pool.manage(managed);
        let _unmanaged_a = pool.alloc();
        let _unmanaged_b = pool.alloc();
        assert_eq!(pool.manuals_count(), 2);
        assert_eq!(pool.live_count(), 3);

        pool.free_manuals();

        assert_eq!(pool.manuals_count(), 0);
        assert_eq!(pool.live_count(), 1);
        assert!(pool.get(managed).is_managed());
    }

    #[test]
    fn rescue_scope_frees_manuals_on_panic() {
        let mut pool = StubPool::new();
        let result = rescue_scope(&mut pool, |pool| {
            for _ in 0..100 {
                pool.alloc();
            }
            panic!("simulated rescue-scope panic");
        });
        assert!(result.is_err());
        assert_eq!(
            pool.live_count(),
            0,
            "all 100 unmanaged stubs should be freed by the rescue scope"
        );
    }

    #[test]
    fn rescue_scope_leaves_stubs_alive_on_success() {
        let mut pool = StubPool::new();
        let result = rescue_scope(&mut pool, |pool| {
            pool.alloc();
        });
        assert!(result.is_ok());
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn rescue_scope_does_not_free_stubs_that_predate_it() {
        let mut pool = StubPool::new();
        let managed = pool.alloc();
        pool.manage(managed);

        let result = rescue_scope(&mut pool, |pool| {
            pool.alloc();
            panic!("boom");
        });

        assert!(result.is_err());
        assert_eq!(pool.live_count(), 1);
        assert!(pool.get(managed).is_managed());
    }

    #[test]
    fn grow_to_dynamic_allocates_and_frees_cleanly() {
        let mut pool = StubPool::new();
        let id = pool.alloc();
        pool.get_mut(id).set_flavor(Flavor::StringBuf);
        pool.grow_to_dynamic(id, 1, 64);
        assert!(pool.get(id).is_dynamic());
        pool.free(id);
    }
}

//! Garbage collector: three-phase mark-and-sweep over the `StubPool`
//! (spec §4.4 "Garbage collector").
//!
//! Unlike the teacher's runtime, which never needed a tracing
//! collector (its `HeapObject`s were reclaimed by Rust's ordinary
//! ownership once off the stack), this heap is graph-shaped -- arrays
//! hold cells that reference other stubs, contexts reference their
//! keylists, symbols thread a synonym ring -- so reachability has to
//! be computed, not inferred from scope. The marking discipline keeps
//! the same "flags drive behavior, not a value's runtime type" texture
//! as `stub.rs`: a stub's `*_NODE_NEEDS_MARK` bits say whether its
//! generic slots hold node references, so the collector stays generic
//! for most flavors and only special-cases cell-bearing ones.

use renc_core::Cell;

use crate::context::Context;
use crate::level::LevelPool;
use crate::pool::{StubId, StubPool};
use crate::stub::Flavor;
use crate::string;

/// Everything outside the heap that can keep a stub alive (spec §4.4
/// "root set"): running Levels, a manually-held guard stack, the data
/// stack, and the interpreter's root context. The manuals list itself
/// is not listed here -- `collect` treats it as an always-alive
/// overlay directly against `StubPool`, since an unmanaged stub was
/// never eligible for sweeping in the first place (spec §3
/// "Lifecycle").
pub struct Roots<'a> {
    pub levels: &'a LevelPool,
    pub guard_stack: &'a [StubId],
    pub data_stack: &'a [Cell],
    pub root_context: Option<StubId>,
}

/// Outcome of one collection cycle, reported to `diagnostics`/`report`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub freed: usize,
    pub retained: usize,
}

/// Run one full mark-and-sweep cycle.
pub fn collect(pool: &mut StubPool, roots: Roots) -> GcStats {
    unmark_all(pool);

    let mut worklist: Vec<StubId> = Vec::new();
    worklist.extend(roots.guard_stack.iter().copied());
    if let Some(id) = roots.root_context {
        worklist.push(id);
    }
    for canon in string::interned_canon_ids() {
        worklist.push(canon);
    }
    for cell in roots.data_stack {
        push_cell_refs(cell, &mut worklist);
    }
    for id in roots.levels.live_ids() {
        let level = roots.levels.get(id);
        push_cell_refs(&level.core.output, &mut worklist);
        push_cell_refs(&level.core.spare, &mut worklist);
        if let Some(varlist) = level.core.varlist {
            worklist.push(varlist);
        }
        if let Some(feed) = &level.core.feed {
            if let Some(current) = feed.borrow().current() {
                push_cell_refs(current, &mut worklist);
            }
        }
    }

    while let Some(id) = worklist.pop() {
        if !pool_contains(pool, id) {
            continue;
        }
        if pool.get(id).is_marked() {
            continue;
        }
        pool.get_mut(id).mark();
        push_children(pool, id, &mut worklist);
    }

    sweep(pool)
}

fn unmark_all(pool: &mut StubPool) {
    let ids: Vec<StubId> = pool.live_ids().collect();
    for id in ids {
        pool.get_mut(id).unmark();
    }
}

fn pool_contains(pool: &StubPool, id: StubId) -> bool {
    id.index() < pool.capacity()
}

fn sweep(pool: &mut StubPool) -> GcStats {
    let manuals_are_protected = true; // manuals were never swept in the first place
    let _ = manuals_are_protected;
    let to_free: Vec<StubId> = pool
        .live_ids()
        .filter(|&id| pool.get(id).is_managed() && !pool.get(id).is_marked())
        .collect();
    for id in &to_free {
        if pool.get(*id).flavor() == Some(Flavor::StringBuf) {
            crate::string::StringBuf { stub: *id }.drop_bookmarks();
        }
        pool.free(*id);
    }
    GcStats {
        freed: to_free.len(),
        retained: pool.live_count(),
    }
}

/// Push any stub ids a cell references (spec §4.4 "a cell's node bits
/// say whether a slot holds a stub reference").
fn push_cell_refs(cell: &Cell, worklist: &mut Vec<StubId>) {
    if cell.first_slot_is_node() {
        worklist.push(StubId::from_index(cell.slot0() as u32));
    }
    if cell.second_slot_is_node() {
        worklist.push(StubId::from_index(cell.slot1() as u32));
    }
}

/// Push whatever a stub's own slots and (if cell-bearing) contents
/// reference.
fn push_children(pool: &StubPool, id: StubId, worklist: &mut Vec<StubId>) {
    let stub = pool.get(id);
    if stub.link_needs_mark() {
        worklist.push(StubId::from_index(stub.link.as_count() as u32));
    }
    if stub.misc_needs_mark() {
        worklist.push(StubId::from_index(stub.misc.as_count() as u32));
    }
    if stub.info_needs_mark() {
        worklist.push(StubId::from_index(stub.info.as_count() as u32));
    }

    let Some(flavor) = stub.flavor() else { return };
    if !flavor.holds_cells() {
        return;
    }
    // Varlists additionally root their keylist even when a caller
    // forgot to set LINK_NODE_NEEDS_MARK (defensive; the constructors
    // in `context.rs` always set it, this just keeps the generic path
    // honest for flavors added later without updating this match).
    if flavor == Flavor::Varlist {
        let keylist = Context { stub: id }.keylist(pool).stub;
        worklist.push(keylist);
    }
    let array = crate::array::Array { stub: id };
    for cell in array.head(pool) {
        push_cell_refs(cell, worklist);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::context::Keylist;
    use renc_core::Kind;

    fn node_cell(stub: StubId) -> Cell {
        let mut c = Cell::new(Kind::Block, stub.index() as u64, 0);
        c.set_first_slot_is_node(true);
        c
    }

    #[test]
    fn unreferenced_array_is_swept() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        pool.manage(arr.stub);
        assert_eq!(pool.live_count(), 1);

        let levels = LevelPool::new();
        let stats = collect(
            &mut pool,
            Roots {
                levels: &levels,
                guard_stack: &[],
                data_stack: &[],
                root_context: None,
            },
        );
        assert_eq!(stats.freed, 1);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn array_reachable_from_guard_stack_survives() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        pool.manage(arr.stub);

        let levels = LevelPool::new();
        let stats = collect(
            &mut pool,
            Roots {
                levels: &levels,
                guard_stack: &[arr.stub],
                data_stack: &[],
                root_context: None,
            },
        );
        assert_eq!(stats.freed, 0);
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn nested_array_reachable_through_a_cell_reference_survives() {
        let mut pool = StubPool::new();
        let inner = Array::alloc(&mut pool);
        pool.manage(inner.stub);
        let outer = Array::alloc(&mut pool);
        outer.append(&mut pool, node_cell(inner.stub));
        pool.manage(outer.stub);

        let levels = LevelPool::new();
        let stats = collect(
            &mut pool,
            Roots {
                levels: &levels,
                guard_stack: &[outer.stub],
                data_stack: &[],
                root_context: None,
            },
        );
        assert_eq!(stats.freed, 0);
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn unmanaged_stub_is_never_swept_even_if_unreferenced() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        assert!(!pool.get(arr.stub).is_managed());

        let levels = LevelPool::new();
        let stats = collect(
            &mut pool,
            Roots {
                levels: &levels,
                guard_stack: &[],
                data_stack: &[],
                root_context: None,
            },
        );
        assert_eq!(stats.freed, 0);
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn varlist_keeps_its_keylist_alive() {
        let mut pool = StubPool::new();
        let keylist = Keylist::alloc(&mut pool);
        pool.manage(keylist.stub);
        let ctx = Context::alloc(&mut pool, &keylist);
        pool.manage(ctx.stub);

        let levels = LevelPool::new();
        let stats = collect(
            &mut pool,
            Roots {
                levels: &levels,
                guard_stack: &[ctx.stub],
                data_stack: &[],
                root_context: None,
            },
        );
        assert_eq!(stats.freed, 0);
        assert_eq!(pool.live_count(), 2);
    }
}

//! `Array`: a stub flavored to hold `Cell`s (spec §3, §4.3).
//!
//! An array of length N occupies N cells plus an implicit end marker.
//! When N <= 1 the cell lives inline in the stub's `Payload::Singular`
//! slot; growing past that re-homes the payload to `Payload::Dynamic`
//! (spec §4.2 "Re-home inline content to out-of-line when a stub must
//! grow"), with the dynamic buffer's element width fixed at
//! `size_of::<Cell>()`. `at(A, len(A))` always reads as an end marker
//! without needing a stored sentinel cell: the accessor simply returns
//! `AtCell::End` once the index reaches `len`.

use renc_core::Cell;
use std::slice;

use crate::pool::{StubId, StubPool};
use crate::stub::{Flavor, Payload, StubSlot, flag};

/// A read-only view of one array cell, or the end marker.
#[derive(Debug)]
pub enum AtCell<'a> {
    Value(&'a Cell),
    End,
}

/// A live array handle: a pool-allocated `Stub` whose payload holds its
/// cells, either inline (0 or 1 cells) or in a dynamic buffer (2+).
pub struct Array {
    pub stub: StubId,
}

impl Array {
    /// Allocate a fresh, unmanaged, empty array stub (spec §3
    /// "Lifecycle"). The singular-form length (0 or 1) lives in the
    /// stub's `misc` slot, a plain counter this flavor never asks the GC
    /// to trace (`misc_needs_mark` stays false for `Flavor::Array`).
    pub fn alloc(pool: &mut StubPool) -> Array {
        let id = pool.alloc();
        let stub = pool.get_mut(id);
        stub.set_flavor(Flavor::Array);
        stub.payload = Payload::Singular(Cell::fresh());
        stub.misc = StubSlot::from_count(0);
        Array { stub: id }
    }

    /// Build an array from an initial set of cells, reserving
    /// `extra_capacity` more dynamic slots up front (spec §4.3 "Copy
    /// modes ... with an extra capacity reservation").
    pub fn from_cells(pool: &mut StubPool, cells: &[Cell], extra_capacity: usize) -> Array {
        let array = Array::alloc(pool);
        if !cells.is_empty() {
            array.reserve_dynamic(pool, cells.len() + extra_capacity);
            for &c in cells {
                array.append(pool, c);
            }
        }
        array
    }

    pub fn len(&self, pool: &StubPool) -> usize {
        let stub = pool.get(self.stub);
        match &stub.payload {
            Payload::Singular(_) => stub.misc.as_count() as usize,
            Payload::Dynamic(buf) => buf.len,
        }
    }

    pub fn is_empty(&self, pool: &StubPool) -> bool {
        self.len(pool) == 0
    }

    pub fn at<'p>(&self, pool: &'p StubPool, i: usize) -> AtCell<'p> {
        let stub = pool.get(self.stub);
        match &stub.payload {
            Payload::Singular(cell) => {
                if i == 0 && stub.misc.as_count() == 1 {
                    AtCell::Value(cell)
                } else {
                    AtCell::End
                }
            }
            Payload::Dynamic(buf) => {
                if i < buf.len {
                    AtCell::Value(unsafe { &cell_slice(buf)[i] })
                } else {
                    AtCell::End
                }
            }
        }
    }

    pub fn head<'p>(&self, pool: &'p StubPool) -> &'p [Cell] {
        let stub = pool.get(self.stub);
        match &stub.payload {
            Payload::Singular(cell) => {
                if stub.misc.as_count() == 1 {
                    slice::from_ref(cell)
                } else {
                    &[]
                }
            }
            Payload::Dynamic(buf) => unsafe { cell_slice(buf) },
        }
    }

    /// Reserve dynamic capacity for at least `capacity` cells, re-homing
    /// from the inline (singular) form if needed.
    pub fn reserve_dynamic(&self, pool: &mut StubPool, capacity: usize) {
        let needs_dynamic = !pool.get(self.stub).is_dynamic();
        if needs_dynamic {
            let stub = pool.get(self.stub);
            let existing = match stub.payload {
                Payload::Singular(cell) if stub.misc.as_count() == 1 => Some(cell),
                _ => None,
            };
            pool.grow_to_dynamic(self.stub, std::mem::size_of::<Cell>(), capacity.max(1));
            if let Some(cell) = existing {
                self.append_dynamic(pool, cell);
            }
        } else {
            let current_rest = match &pool.get(self.stub).payload {
                Payload::Dynamic(buf) => buf.rest,
                Payload::Singular(_) => 0,
            };
            if capacity > current_rest {
                self.grow_dynamic_buffer(pool, capacity);
            }
        }
    }

    /// Overwrite the cell at `i`, which must already be in bounds (spec
    /// §4.3 "Any cell that was previously non-end must pass a
    /// writability check before being rewritten").
    pub fn set_at(&self, pool: &mut StubPool, i: usize, cell: Cell) {
        self.check_mutable(pool);
        assert!(i < self.len(pool), "set_at index out of bounds");
        match &mut pool.get_mut(self.stub).payload {
            Payload::Singular(slot) => *slot = cell,
            Payload::Dynamic(buf) => unsafe { cell_slice_mut(buf)[i] = cell },
        }
    }

    /// Append a cell, advancing length (spec §4.3 "Appending writes into
    /// the next cell and advances len").
    pub fn append(&self, pool: &mut StubPool, cell: Cell) {
        self.check_mutable(pool);
        let stub = pool.get(self.stub);
        let at_capacity = match &stub.payload {
            Payload::Singular(_) => stub.misc.as_count() == 1,
            Payload::Dynamic(buf) => buf.len >= buf.rest,
        };
        if !pool.get(self.stub).is_dynamic() {
            if at_capacity {
                self.reserve_dynamic(pool, 2);
                self.append_dynamic(pool, cell);
            } else {
                let stub = pool.get_mut(self.stub);
                stub.payload = Payload::Singular(cell);
                stub.misc = StubSlot::from_count(1);
            }
        } else {
            if at_capacity {
                let new_cap = match &pool.get(self.stub).payload {
                    Payload::Dynamic(buf) => (buf.rest.max(1)) * 2,
                    Payload::Singular(_) => 2,
                };
                self.grow_dynamic_buffer(pool, new_cap);
            }
            self.append_dynamic(pool, cell);
        }
    }

    fn append_dynamic(&self, pool: &mut StubPool, cell: Cell) {
        let stub = pool.get_mut(self.stub);
        if let Payload::Dynamic(buf) = &mut stub.payload {
            let slice = unsafe { cell_slice_mut(buf) };
            slice[buf.len] = cell;
            buf.len += 1;
        }
    }

    fn grow_dynamic_buffer(&self, pool: &mut StubPool, new_capacity: usize) {
        let old_cells: Vec<Cell> = match &pool.get(self.stub).payload {
            Payload::Dynamic(buf) => unsafe { cell_slice(buf).to_vec() },
            Payload::Singular(_) => Vec::new(),
        };
        pool.grow_to_dynamic(self.stub, std::mem::size_of::<Cell>(), new_capacity);
        for c in old_cells {
            self.append_dynamic(pool, c);
        }
    }

    /// `term_array_len`: truncate or zero-extend to exactly `n` cells.
    pub fn term_array_len(&self, pool: &mut StubPool, n: usize) {
        self.check_mutable(pool);
        let len = self.len(pool);
        if n > len {
            self.reserve_dynamic(pool, n);
            for _ in len..n {
                self.append(pool, Cell::fresh());
            }
        } else if n < len {
            let stub = pool.get_mut(self.stub);
            match &stub.payload {
                Payload::Dynamic(_) => { /* buf.len = n handled below */ }
                Payload::Singular(_) => {
                    if n == 0 {
                        stub.misc = StubSlot::from_count(0);
                    }
                }
            }
            if let Payload::Dynamic(buf) = &mut stub.payload {
                buf.len = n;
            }
        }
    }

    pub fn newline_at_tail(&self, pool: &StubPool) -> bool {
        pool.get(self.stub).has_flag(flag::NEWLINE_AT_TAIL)
    }

    pub fn set_newline_at_tail(&self, pool: &mut StubPool, v: bool) {
        let stub = pool.get_mut(self.stub);
        if v {
            stub.set_flag(flag::NEWLINE_AT_TAIL);
        } else {
            stub.clear_flag(flag::NEWLINE_AT_TAIL);
        }
    }

    /// Shallow copy: a new stub with the same cell contents, optionally
    /// with extra reserved capacity (spec §4.3 "Copy modes").
    pub fn copy_shallow(&self, pool: &mut StubPool, extra_capacity: usize) -> Array {
        let cells: Vec<Cell> = self.head(pool).to_vec();
        let newline = self.newline_at_tail(pool);
        let copy = Array::from_cells(pool, &cells, extra_capacity);
        copy.set_newline_at_tail(pool, newline);
        copy
    }

    fn check_mutable(&self, pool: &StubPool) {
        assert!(
            !pool.get(self.stub).is_mutation_locked(),
            "attempted to mutate a frozen/protected/held array"
        );
    }
}

unsafe fn cell_slice<'a>(buf: &'a crate::stub::DynamicBuf) -> &'a [Cell] {
    unsafe { slice::from_raw_parts(buf.data.as_ptr().cast::<Cell>(), buf.rest) }
}

unsafe fn cell_slice_mut<'a>(buf: &'a mut crate::stub::DynamicBuf) -> &'a mut [Cell] {
    unsafe { slice::from_raw_parts_mut(buf.data.as_ptr().cast::<Cell>(), buf.rest) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_back_inline() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        arr.append(&mut pool, Cell::fresh());
        assert_eq!(arr.len(&pool), 1);
        assert!(matches!(arr.at(&pool, 0), AtCell::Value(_)));
        assert!(matches!(arr.at(&pool, 1), AtCell::End));
    }

    #[test]
    fn append_past_inline_capacity_goes_dynamic() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        for _ in 0..5 {
            arr.append(&mut pool, Cell::fresh());
        }
        assert_eq!(arr.len(&pool), 5);
        assert!(pool.get(arr.stub).is_dynamic());
        assert!(matches!(arr.at(&pool, 5), AtCell::End));
    }

    #[test]
    fn term_array_len_truncates_and_extends() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        for _ in 0..5 {
            arr.append(&mut pool, Cell::fresh());
        }
        arr.term_array_len(&mut pool, 2);
        assert_eq!(arr.len(&pool), 2);
        assert!(matches!(arr.at(&pool, 2), AtCell::End));

        arr.term_array_len(&mut pool, 4);
        assert_eq!(arr.len(&pool), 4);
        assert!(matches!(arr.at(&pool, 4), AtCell::End));
    }

    #[test]
    fn copy_shallow_is_independent() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        arr.append(&mut pool, Cell::fresh());
        let copy = arr.copy_shallow(&mut pool, 4);
        assert_eq!(copy.len(&pool), 1);
        arr.append(&mut pool, Cell::fresh());
        assert_eq!(arr.len(&pool), 2);
        assert_eq!(copy.len(&pool), 1, "copy must not see later mutation");
    }

    #[test]
    fn array_mutation_is_rejected_while_held() {
        let mut pool = StubPool::new();
        let arr = Array::alloc(&mut pool);
        pool.get_mut(arr.stub).set_flag(crate::stub::flag::HOLD);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            arr.append(&mut pool, Cell::fresh());
        }));
        assert!(result.is_err());
    }
}

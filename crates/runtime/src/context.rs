//! Context / Varlist / Keylist (spec §4 "Context/Varlist").
//!
//! A context is an array flavored as a varlist: cell 0 is the context's
//! own archetype value, cells 1..N are its variables. The varlist's
//! `link` slot names its keylist, a sibling array whose cells name the
//! parameter/field symbols in the same order. Frames are varlists whose
//! keylist instead points at an action's paramlist or at a running
//! `Level`; that wiring is added in `action.rs` and `level.rs` once
//! those stand on top of this module.

use std::ptr::NonNull;

use renc_core::{Binding, Cell, Kind};

use crate::array::{Array, AtCell};
use crate::pool::{StubId, StubPool};
use crate::stub::{Flavor, StubSlot, flag};
use crate::string::Symbol;

/// An array of WORD cells, each naming one variable/parameter symbol in
/// the same order as its varlist's variable cells.
pub struct Keylist {
    pub stub: StubId,
}

impl Keylist {
    pub fn alloc(pool: &mut StubPool) -> Keylist {
        Keylist {
            stub: Array::alloc(pool).stub,
        }
    }

    pub fn push(&self, pool: &mut StubPool, symbol: &Symbol) {
        let cell = word_cell_for(pool, symbol);
        (Array { stub: self.stub }).append(pool, cell);
    }

    pub fn len(&self, pool: &StubPool) -> usize {
        (Array { stub: self.stub }).len(pool)
    }

    pub fn canon_index_at(&self, pool: &StubPool, i: usize) -> Option<u32> {
        match (Array { stub: self.stub }).at(pool, i) {
            AtCell::Value(cell) => Some(cell.slot0() as u32),
            AtCell::End => None,
        }
    }

    /// Linear search for `symbol`'s slot. Most contexts (paramlists,
    /// function frames) are small enough that this is the common case;
    /// a hash side-index for large objects is not modeled here.
    pub fn index_of(&self, pool: &StubPool, symbol: &Symbol) -> Option<usize> {
        let canon = symbol.canon(pool).index() as u32;
        (0..self.len(pool)).find(|&i| self.canon_index_at(pool, i) == Some(canon))
    }
}

fn word_cell_for(pool: &StubPool, symbol: &Symbol) -> Cell {
    let canon = symbol.canon(pool).index() as u64;
    Cell::new(Kind::Word, canon, 0)
}

/// Upgrade a `StubId` into the opaque `Binding` a bindable cell carries
/// (spec §2 "Cell -> Stub" dependency order; `renc_core::Binding`'s own
/// doc comment: "the runtime crate upgrades this into a typed handle").
/// The pointer is never dereferenced -- `StubPool`'s backing `Vec` can
/// reallocate, so the index is smuggled through `NonNull`'s bit pattern
/// (offset by one so index 0 isn't the null pointer) rather than a
/// real address.
pub fn binding_of_context(stub: StubId) -> Binding {
    let encoded = (stub.index() as usize) + 1;
    Binding::from_raw(NonNull::new(encoded as *mut ()).expect("encoded index is never zero"))
}

pub fn context_from_binding(binding: Binding) -> Option<StubId> {
    binding
        .as_raw()
        .map(|ptr| StubId::from_index((ptr.as_ptr() as usize - 1) as u32))
}

/// A varlist array whose cell 0 is the archetype and whose `link` slot
/// names its keylist.
pub struct Context {
    pub stub: StubId,
}

impl Context {
    pub fn alloc(pool: &mut StubPool, keylist: &Keylist) -> Context {
        let array = Array::alloc(pool);
        {
            let stub = pool.get_mut(array.stub);
            stub.set_flavor(Flavor::Varlist);
            stub.link = StubSlot::from_count(keylist.stub.index() as u64);
            stub.set_flag(flag::LINK_NODE_NEEDS_MARK);
        }
        array.append(pool, Cell::fresh());
        Context { stub: array.stub }
    }

    /// Look up a variable by its symbol's raw canon index, for callers
    /// that only have a canon id (e.g. a WORD cell's `slot0`) rather
    /// than a live `Symbol` handle.
    pub fn get_by_canon(&self, pool: &StubPool, canon: u32) -> Option<Cell> {
        let keylist = self.keylist(pool);
        let i = (0..keylist.len(pool)).find(|&i| keylist.canon_index_at(pool, i) == Some(canon))?;
        match self.var_at(pool, i) {
            AtCell::Value(cell) => Some(*cell),
            AtCell::End => None,
        }
    }

    /// Assign a variable by canon index, growing the varlist if the
    /// keylist names more slots than this context currently holds
    /// (e.g. a frame whose locals were not yet initialized).
    pub fn set_by_canon(&self, pool: &mut StubPool, canon: u32, cell: Cell) -> bool {
        let keylist = self.keylist(pool);
        let Some(i) = (0..keylist.len(pool)).find(|&i| keylist.canon_index_at(pool, i) == Some(canon)) else {
            return false;
        };
        while self.len(pool) <= i {
            self.append_var(pool, Cell::fresh());
        }
        self.set_var(pool, i, cell);
        true
    }

    pub fn keylist(&self, pool: &StubPool) -> Keylist {
        Keylist {
            stub: StubId::from_index(pool.get(self.stub).link.as_count() as u32),
        }
    }

    /// Variable count, excluding the archetype slot.
    pub fn len(&self, pool: &StubPool) -> usize {
        (Array { stub: self.stub }).len(pool).saturating_sub(1)
    }

    pub fn archetype<'p>(&self, pool: &'p StubPool) -> &'p Cell {
        match (Array { stub: self.stub }).at(pool, 0) {
            AtCell::Value(c) => c,
            AtCell::End => unreachable!("a varlist always has an archetype slot"),
        }
    }

    pub fn set_archetype(&self, pool: &mut StubPool, cell: Cell) {
        (Array { stub: self.stub }).set_at(pool, 0, cell);
    }

    pub fn var_at<'p>(&self, pool: &'p StubPool, i: usize) -> AtCell<'p> {
        (Array { stub: self.stub }).at(pool, i + 1)
    }

    pub fn set_var(&self, pool: &mut StubPool, i: usize, cell: Cell) {
        (Array { stub: self.stub }).set_at(pool, i + 1, cell);
    }

    pub fn append_var(&self, pool: &mut StubPool, cell: Cell) {
        (Array { stub: self.stub }).append(pool, cell);
    }

    /// Look up a variable's slot (0-based, matching `var_at`/`set_var`)
    /// by symbol identity.
    pub fn index_of(&self, pool: &StubPool, symbol: &Symbol) -> Option<usize> {
        self.keylist(pool).index_of(pool, symbol)
    }

    pub fn get(&self, pool: &StubPool, symbol: &Symbol) -> Option<Cell> {
        let i = self.index_of(pool, symbol)?;
        match self.var_at(pool, i) {
            AtCell::Value(cell) => Some(*cell),
            AtCell::End => None,
        }
    }
}

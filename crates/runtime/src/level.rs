//! Level: one stack-frame record of the stackless evaluator (spec §4.6
//! "Level").
//!
//! A Level never lives on the Rust call stack for longer than one
//! `step()` call. Recursion -- evaluating a GROUP, fulfilling a
//! function argument, running a function body -- happens by pushing a
//! *child* `Level` and returning `Bounce::Continue`/`Delegate`; the
//! `Trampoline` (not the executor) owns the actual push/pop stack, so
//! arbitrarily deep script recursion grows the `LevelPool`, never the
//! host stack. Grounded on the teacher's `scheduler.rs` strand record
//! (a descriptor threaded into a registry rather than recursed into).

use std::cell::RefCell;
use std::rc::Rc;

use renc_core::Cell;

use crate::feed::Feed;
use crate::pool::{StubId, StubPool};
use crate::trampoline::{Bounce, ThrowPayload};

/// The state an `Executor` reads and writes each step (spec §4.6
/// "Level" fields).
pub struct LevelCore {
    /// Where this level's result lands. A pushed child's `return_slot`
    /// (if any) is copied here by the trampoline when the child
    /// completes, then from here into whatever the parent's own
    /// `return_slot` points at.
    pub output: Cell,
    /// Scratch cell for an executor's own bookkeeping between steps
    /// (e.g. the enfix left-argument while looking ahead).
    pub spare: Cell,
    /// Data-stack depth when this level was pushed, the baseline a
    /// balance check (and GC root scan) measures against (spec §4.6
    /// "Level fields ... baseline stack index").
    pub baseline_stack_index: u32,
    /// The context this level is evaluating within, when it is an
    /// action call (its frame) -- `None` for a plain DO level.
    pub varlist: Option<StubId>,
    /// The value stream this level pulls from, shared with any child
    /// level fulfilling one of its sub-expressions (several Levels can
    /// read/advance the same Feed in sequence, never concurrently,
    /// since the trampoline never runs two levels at once).
    pub feed: Option<Rc<RefCell<Feed>>>,
    /// Where to deliver this level's `output` once it completes, for a
    /// parent that pushed it specifically to obtain one value (spec
    /// §4.6 "Continuations are expressed by pushing a child level").
    /// `None` for a level whose output only matters via the top-level
    /// `RunOutcome` (the outermost DO).
    pub return_slot: Option<Rc<RefCell<Cell>>>,
}

impl LevelCore {
    pub fn fresh(baseline_stack_index: u32) -> LevelCore {
        LevelCore {
            output: Cell::fresh(),
            spare: Cell::fresh(),
            baseline_stack_index,
            varlist: None,
            feed: None,
            return_slot: None,
        }
    }

    pub fn with_feed(mut self, feed: Rc<RefCell<Feed>>) -> LevelCore {
        self.feed = Some(feed);
        self
    }

    pub fn with_return_slot(mut self, slot: Rc<RefCell<Cell>>) -> LevelCore {
        self.return_slot = Some(slot);
        self
    }

    pub fn with_varlist(mut self, varlist: StubId) -> LevelCore {
        self.varlist = Some(varlist);
        self
    }
}

/// A Level's per-kind step/unwind logic (spec §4.6 "executor function
/// pointer"). `Evaluator` and `Action` each provide one implementation;
/// a test stub can supply trivial ones, exactly the way the teacher's
/// `closures.rs`/`quotations.rs` dispatched through a captured function
/// pointer rather than a hand-written match over value kinds.
pub trait Executor {
    fn step(&mut self, level: &mut LevelCore, pool: &mut StubPool) -> Bounce;

    /// Called while a throw unwinds through this level (spec §4.6
    /// "thrown"). Returns whether this level catches it (e.g. a CATCH
    /// whose label matches); the default never catches.
    fn on_unwind(&mut self, _level: &mut LevelCore, _pool: &mut StubPool, _thrown: &ThrowPayload) -> bool {
        false
    }
}

/// One frame: its state plus the executor driving it.
pub struct Level {
    pub core: LevelCore,
    pub executor: Box<dyn Executor>,
}

impl Level {
    pub fn new(core: LevelCore, executor: Box<dyn Executor>) -> Level {
        Level { core, executor }
    }
}

/// An index into a `LevelPool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelId(u32);

/// The linked stack of live Levels (spec §4.6 "Levels are threaded into
/// a linked stack, each remembering its caller"). Slots hold `(Level,
/// prior)` so popping recovers the caller's id without a separate
/// lookup.
pub struct LevelPool {
    slots: Vec<Option<(Level, Option<LevelId>)>>,
    free: Vec<u32>,
}

impl LevelPool {
    pub fn new() -> LevelPool {
        LevelPool {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn push(&mut self, level: Level, prior: Option<LevelId>) -> LevelId {
        let entry = Some((level, prior));
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = entry;
                LevelId(idx)
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(entry);
                LevelId(idx)
            }
        }
    }

    pub fn pop(&mut self, id: LevelId) -> (Level, Option<LevelId>) {
        let (level, prior) = self.slots[id.0 as usize]
            .take()
            .expect("level id refers to an already-popped slot");
        self.free.push(id.0);
        (level, prior)
    }

    pub fn step(&mut self, id: LevelId, pool: &mut StubPool) -> Bounce {
        let (level, _prior) = self.slots[id.0 as usize]
            .as_mut()
            .expect("level id refers to an already-popped slot");
        let bounce = level.executor.step(&mut level.core, pool);
        if let Bounce::Completed = bounce {
            if let Some(slot) = &level.core.return_slot {
                *slot.borrow_mut() = level.core.output;
            }
        }
        bounce
    }

    pub fn notify_unwind(&mut self, id: LevelId, pool: &mut StubPool, thrown: &ThrowPayload) -> bool {
        let (level, _prior) = self.slots[id.0 as usize]
            .as_mut()
            .expect("level id refers to an already-popped slot");
        level.executor.on_unwind(&mut level.core, pool, thrown)
    }

    /// Live level ids, for GC root scanning (spec §4.4 "Levels are a
    /// root set").
    pub fn live_ids(&self) -> impl Iterator<Item = LevelId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| LevelId(i as u32)))
    }

    pub fn get(&self, id: LevelId) -> &Level {
        self.slots[id.0 as usize]
            .as_ref()
            .map(|(level, _)| level)
            .expect("level id refers to an already-popped slot")
    }
}

impl Default for LevelPool {
    fn default() -> Self {
        LevelPool::new()
    }
}

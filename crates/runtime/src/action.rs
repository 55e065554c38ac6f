//! Action: a callable paramlist plus a native dispatcher (spec §4.7
//! "Action executor").
//!
//! A paramlist is an `Array` like any other: cell 0 is the action's own
//! archetype (an ACTION-kind cell naming this very paramlist), cells
//! 1..N each name one parameter -- a WORD cell whose `slot0` is the
//! parameter symbol's canon index and whose `slot1` packs its
//! parameter class. The dispatcher itself is a plain function pointer
//! stashed in the stub's `info` slot, matching the spec's "info points
//! at a dispatcher (a native function pointer)" literally rather than
//! boxing a trait object -- the closest fit to the teacher's
//! `closures.rs`/`quotations.rs` FFI dispatch, recast from `extern "C"`
//! linkage to a plain Rust `fn`.

use std::cell::RefCell;
use std::rc::Rc;

use renc_core::{Cell, Kind};

use crate::array::{Array, AtCell};
use crate::context::{Context, Keylist};
use crate::evaluator::{EvalMode, EvaluatorExecutor, decay};
use crate::feed::{Feed, register_varargs_feed};
use crate::level::{Executor, Level, LevelCore};
use crate::pool::{StubId, StubPool};
use crate::stub::{Flavor, StubSlot, flag};
use crate::string::{Symbol, StringBuf};
use crate::trampoline::{Bounce, ThrowPayload};

/// How an argument is fetched for one parameter slot (spec §4.7
/// "Parameter classes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    /// Never fetched from the feed; stays null unless the dispatcher
    /// sets it itself (e.g. a `RETURN` binding).
    Local,
    /// Evaluated: a full sub-expression is run to get its value.
    Normal,
    /// Taken literally from the feed, no evaluation (`'`-style).
    HardQuote,
    /// Taken literally unless the next value is itself a GET-WORD/GROUP
    /// (`:`-style "soft" quoting, spec §4.7).
    SoftQuote,
    /// Named by a `/refinement` path segment pulled out of order from
    /// the data stack rather than fetched positionally.
    Refinement,
    /// The paramlist's own `RETURN` local, bound to this call's frame.
    Return,
    /// Consumes a `Varargs` isotope instead of one value.
    Variadic,
    /// May be omitted (unsupplied refinement argument); endable.
    Skippable,
    /// May legitimately receive an end-of-feed "no value" without
    /// raising (used by the last parameter of a variadic action).
    Endable,
}

impl ParamClass {
    const fn to_byte(self) -> u8 {
        match self {
            ParamClass::Local => 0,
            ParamClass::Normal => 1,
            ParamClass::HardQuote => 2,
            ParamClass::SoftQuote => 3,
            ParamClass::Refinement => 4,
            ParamClass::Return => 5,
            ParamClass::Variadic => 6,
            ParamClass::Skippable => 7,
            ParamClass::Endable => 8,
        }
    }

    const fn from_byte(b: u8) -> ParamClass {
        match b {
            1 => ParamClass::Normal,
            2 => ParamClass::HardQuote,
            3 => ParamClass::SoftQuote,
            4 => ParamClass::Refinement,
            5 => ParamClass::Return,
            6 => ParamClass::Variadic,
            7 => ParamClass::Skippable,
            8 => ParamClass::Endable,
            _ => ParamClass::Local,
        }
    }

    /// Fetched by running a sub-evaluation in ordinary argument position
    /// (as opposed to quoted verbatim, left untouched, pulled from the
    /// data stack, or bound to the feed itself). `Refinement` and
    /// `Variadic` each have their own fulfillment path in
    /// `ActionExecutor::step` and are excluded here.
    fn is_evaluated(self) -> bool {
        matches!(self, ParamClass::Normal | ParamClass::Skippable | ParamClass::Endable)
    }
}

/// Bitset value accepting every `Kind` -- the parameter declares no type
/// constraint (spec §4.7 "Typecheck" is vacuous for such a parameter).
pub const ANY_KIND: u32 = u32::MAX;

/// The single bit standing for `kind` in a parameter's type bitset.
/// `KIND_COUNT` (18) comfortably fits a `u32`.
pub const fn kind_bit(kind: Kind) -> u32 {
    1u32 << (kind as u32)
}

/// One parameter's declaration, decoded from its paramlist cell: symbol
/// + type-bitset + parameter class (SPEC_FULL §3 "Paramlist").
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub symbol_canon: u32,
    pub class: ParamClass,
    /// Bitset of acceptable `Kind`s, one bit per `Kind` (`kind_bit`).
    /// `ANY_KIND` means the parameter accepts any kind.
    pub type_bits: u32,
}

/// Packs `class` into the low byte and `type_bits` into the remaining
/// bits of slot1, alongside `canon` in slot0 -- the param cell still
/// fits a plain `Cell`'s two payload slots (spec §4.2 "Paramlist").
fn param_cell_for(spec: &ParamSpec) -> Cell {
    let packed = (spec.class.to_byte() as u64) | ((spec.type_bits as u64) << 8);
    Cell::new(Kind::Word, spec.symbol_canon as u64, packed)
}

fn decode_param(cell: &Cell) -> ParamSpec {
    let packed = cell.slot1();
    ParamSpec {
        symbol_canon: cell.slot0() as u32,
        class: ParamClass::from_byte((packed & 0xFF) as u8),
        type_bits: (packed >> 8) as u32,
    }
}

/// A native dispatcher: reads arguments out of `frame`, writes its
/// result to `level.output`, and reports completion/continuation the
/// same way any other executor does (spec §4.7 "Dispatcher contract").
pub type DispatchFn = fn(&mut LevelCore, &mut StubPool, &Context) -> Bounce;

/// A callable: a paramlist array plus its dispatcher.
pub struct Action {
    pub stub: StubId,
}

impl Action {
    /// Build a new action. `params[0]` is the implicit left operand
    /// when `enfix` is set (spec §4.7 "Enfix").
    pub fn make(pool: &mut StubPool, params: &[ParamSpec], dispatcher: DispatchFn, enfix: bool) -> Action {
        let array = Array::alloc(pool);
        array.append(pool, Cell::fresh()); // archetype placeholder, patched below
        for p in params {
            array.append(pool, param_cell_for(p));
        }
        {
            let stub = pool.get_mut(array.stub);
            stub.set_flavor(Flavor::Paramlist);
            stub.info = StubSlot::from_count(dispatcher as usize as u64);
            if enfix {
                stub.set_flag(flag::ENFIX);
            }
        }
        array.set_at(pool, 0, Cell::new(Kind::Action, array.stub.index() as u64, 0));
        pool.manage(array.stub);
        Action { stub: array.stub }
    }

    fn array(&self) -> Array {
        Array { stub: self.stub }
    }

    pub fn archetype(&self, pool: &StubPool) -> Cell {
        match self.array().at(pool, 0) {
            AtCell::Value(c) => *c,
            AtCell::End => unreachable!("a paramlist always has an archetype slot"),
        }
    }

    pub fn is_enfix(&self, pool: &StubPool) -> bool {
        pool.get(self.stub).has_flag(flag::ENFIX)
    }

    pub fn dispatcher(&self, pool: &StubPool) -> DispatchFn {
        let raw = pool.get(self.stub).info.as_count();
        // SAFETY: only ever written by `Action::make` from a real `DispatchFn`
        // of the same pointer width, just above.
        unsafe { std::mem::transmute::<usize, DispatchFn>(raw as usize) }
    }

    pub fn param_count(&self, pool: &StubPool) -> usize {
        self.array().len(pool).saturating_sub(1)
    }

    pub fn param_at(&self, pool: &StubPool, i: usize) -> ParamSpec {
        match self.array().at(pool, i + 1) {
            AtCell::Value(c) => decode_param(c),
            AtCell::End => unreachable!("param index out of bounds"),
        }
    }

    /// A fresh keylist naming this action's parameters in order, for a
    /// call frame's varlist (spec §4 "Frames are varlists whose keylist
    /// points at an action's paramlist"; built as a sibling array here
    /// rather than literally reusing the paramlist stub, since the
    /// paramlist's own cell 0 is an archetype rather than a key and
    /// `Keylist`'s index space has no such offset).
    pub fn make_keylist(&self, pool: &mut StubPool) -> Keylist {
        let keylist = Keylist::alloc(pool);
        for i in 0..self.param_count(pool) {
            let spec = self.param_at(pool, i);
            let symbol = Symbol {
                stub: StubId::from_index(spec.symbol_canon),
            };
            keylist.push(pool, &symbol);
        }
        keylist
    }
}

/// Lifecycle of one call: fulfill each parameter in turn (pulling
/// inert values directly, pushing a child evaluation for anything
/// else), then typecheck and dispatch (spec §4.7 "Action executor").
pub struct ActionExecutor {
    action: Action,
    frame: Context,
    feed: Rc<RefCell<Feed>>,
    param_index: usize,
    awaiting: Option<Rc<RefCell<Cell>>>,
}

impl ActionExecutor {
    /// `enfix_left`, when given, pre-fills parameter 0 (the action's
    /// already-gathered left operand) and fulfillment resumes from
    /// parameter 1.
    pub fn new(pool: &mut StubPool, action: Action, feed: Rc<RefCell<Feed>>, enfix_left: Option<Cell>) -> ActionExecutor {
        let keylist = action.make_keylist(pool);
        let frame = Context::alloc(pool, &keylist);
        for _ in 0..action.param_count(pool) {
            frame.append_var(pool, Cell::fresh());
        }
        let mut param_index = 0;
        if let Some(left) = enfix_left {
            frame.set_var(pool, 0, left);
            param_index = 1;
        }
        ActionExecutor {
            action,
            frame,
            feed,
            param_index,
            awaiting: None,
        }
    }
}

impl Executor for ActionExecutor {
    fn step(&mut self, level: &mut LevelCore, pool: &mut StubPool) -> Bounce {
        if let Some(slot) = self.awaiting.take() {
            let raw = *slot.borrow();
            let value = match decay(pool, raw) {
                Ok(v) => v,
                Err(err) => return Bounce::Raised(error_cell(pool, &err.to_string())),
            };
            self.frame.set_var(pool, self.param_index, value);
            self.param_index += 1;
        }

        let count = self.action.param_count(pool);
        while self.param_index < count {
            let spec = self.action.param_at(pool, self.param_index);
            match spec.class {
                ParamClass::Local | ParamClass::Return => {
                    self.param_index += 1;
                }
                ParamClass::Refinement => {
                    // Pulled out-of-order from the data stack, never
                    // from the feed (spec §4.7 "Refinement").
                    let value = pop_refinement_arg(spec.symbol_canon).unwrap_or_else(Cell::fresh);
                    self.frame.set_var(pool, self.param_index, value);
                    self.param_index += 1;
                }
                ParamClass::Variadic => {
                    // Bound to this level's feed itself, not to one
                    // value drawn from it (spec §4.7 "Variadic").
                    let handle = register_varargs_feed(self.feed.clone());
                    self.frame.set_var(pool, self.param_index, Cell::new(Kind::Varargs, handle as u64, 0));
                    self.param_index += 1;
                }
                ParamClass::HardQuote | ParamClass::SoftQuote => {
                    let taken = {
                        let mut feed = self.feed.borrow_mut();
                        let cell = feed.current().copied();
                        if cell.is_some() {
                            feed.advance(pool);
                        }
                        cell
                    };
                    match taken {
                        Some(cell) => {
                            self.frame.set_var(pool, self.param_index, cell);
                            self.param_index += 1;
                        }
                        None => return end_of_feed_error(pool, &spec),
                    }
                }
                _ if spec.class.is_evaluated() => {
                    let fast = {
                        let mut feed = self.feed.borrow_mut();
                        match feed.current().copied() {
                            Some(cell) if cell.kind().is_inert() => {
                                feed.advance(pool);
                                Some(cell)
                            }
                            _ => None,
                        }
                    };
                    match fast {
                        Some(cell) => {
                            self.frame.set_var(pool, self.param_index, cell);
                            self.param_index += 1;
                        }
                        None => {
                            if self.feed.borrow().is_at_end() {
                                if matches!(spec.class, ParamClass::Skippable | ParamClass::Endable) {
                                    self.param_index += 1;
                                    continue;
                                }
                                return end_of_feed_error(pool, &spec);
                            }
                            let slot = Rc::new(RefCell::new(Cell::fresh()));
                            self.awaiting = Some(slot.clone());
                            let child = Level::new(
                                LevelCore::fresh(level.baseline_stack_index)
                                    .with_feed(self.feed.clone())
                                    .with_return_slot(slot),
                                Box::new(EvaluatorExecutor::new(self.feed.clone(), root_ctx_of(&self.frame, pool), EvalMode::ArgFetch)),
                            );
                            return Bounce::Continue(child);
                        }
                    }
                }
                _ => unreachable!("ParamClass covers every variant above"),
            }
        }

        // Typecheck: every argument guaranteed to be fulfilled with a
        // real value must match its parameter's declared type bitset
        // (spec §4.7 "Typecheck"). `Local`/`Return` are never fetched
        // from outside; `Refinement`/`Variadic` carry their own shape
        // (null-or-value, VARARGS!) rather than a user-declared type;
        // an omitted `Skippable`/`Endable` legitimately holds the same
        // "null" placeholder cell used everywhere else in this runtime,
        // so only the always-fulfilled classes are checked here.
        for i in 0..count {
            let spec = self.action.param_at(pool, i);
            if !matches!(spec.class, ParamClass::Normal | ParamClass::HardQuote | ParamClass::SoftQuote) {
                continue;
            }
            if spec.type_bits == ANY_KIND {
                continue;
            }
            if let AtCell::Value(cell) = self.frame.var_at(pool, i) {
                let kind = cell.kind();
                if spec.type_bits & kind_bit(kind) == 0 {
                    return typecheck_error(pool, &spec, kind);
                }
            }
        }

        let dispatcher = self.action.dispatcher(pool);
        dispatcher(level, pool, &self.frame)
    }

    fn on_unwind(&mut self, _level: &mut LevelCore, _pool: &mut StubPool, _thrown: &ThrowPayload) -> bool {
        false
    }
}

/// The evaluator only needs *a* context to resolve words that might
/// appear while fulfilling an argument expression; reuse the calling
/// context rather than threading a separate handle through, since a
/// frame's own keylist carries no information about its lexical
/// parent (spec §4 open question: contexts are not given parent links
/// in this minimal model, matching the spec's own silence on a full
/// binding-chain walk).
fn root_ctx_of(_frame: &Context, _pool: &StubPool) -> StubId {
    ROOT_CTX.with(|c| c.get().expect("an interpreter root context must be installed"))
}

thread_local! {
    static ROOT_CTX: std::cell::Cell<Option<StubId>> = const { std::cell::Cell::new(None) };
}

/// Install the context word lookups resolve against for the current
/// thread (spec §5 "single-threaded per interpreter instance"). Called
/// once when an interpreter instance starts up.
pub fn set_root_context(stub: StubId) {
    ROOT_CTX.with(|c| c.set(Some(stub)));
}

pub fn root_context() -> Option<StubId> {
    ROOT_CTX.with(|c| c.get())
}

/// Out-of-order refinement-argument staging (spec §4.7 "Refinement:
/// pulled out-of-order from the data stack where callers have pushed
/// refinement markers"). A caller that wants to supply a REFINEMENT!
/// argument pushes `(symbol_canon, value)` here before the action
/// executor begins fulfillment; thread-local because each interpreter
/// instance runs single-threaded (spec §5).
thread_local! {
    static REFINEMENT_STACK: RefCell<Vec<(u32, Cell)>> = const { RefCell::new(Vec::new()) };
}

/// Push a refinement argument for the next matching parameter to pull.
pub fn push_refinement_arg(symbol_canon: u32, value: Cell) {
    REFINEMENT_STACK.with(|s| s.borrow_mut().push((symbol_canon, value)));
}

/// Pull this parameter's staged refinement argument, if the caller
/// supplied one. An unsupplied (optional) refinement simply has none
/// staged and fulfills to null, like any other unfulfilled `Local`.
fn pop_refinement_arg(symbol_canon: u32) -> Option<Cell> {
    REFINEMENT_STACK.with(|s| {
        let mut stack = s.borrow_mut();
        let pos = stack.iter().position(|(canon, _)| *canon == symbol_canon)?;
        Some(stack.remove(pos).1)
    })
}

fn end_of_feed_error(pool: &mut StubPool, spec: &ParamSpec) -> Bounce {
    Bounce::Raised(error_cell(pool, &format!("missing argument for parameter {}", spec.symbol_canon)))
}

/// Raised when a fulfilled argument's `Kind` is not in its parameter's
/// type bitset (spec §4.7 "Typecheck... failure raises a typed error").
fn typecheck_error(pool: &mut StubPool, spec: &ParamSpec, found: Kind) -> Bounce {
    Bounce::Raised(error_cell(
        pool,
        &format!("parameter {} does not accept {found:?}", spec.symbol_canon),
    ))
}

fn error_cell(pool: &mut StubPool, message: &str) -> Cell {
    let buf = StringBuf::alloc(pool, message);
    pool.manage(buf.stub);
    Cell::new(Kind::Error, buf.stub.index() as u64, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array as ArrayT;
    use crate::trampoline::{RunOutcome, Trampoline};

    fn int(n: i64) -> Cell {
        Cell::new(Kind::Integer, n as u64, 0)
    }

    fn add_dispatcher(level: &mut LevelCore, pool: &mut StubPool, frame: &Context) -> Bounce {
        let left = frame.var_at(pool, 0);
        let right = frame.var_at(pool, 1);
        let (l, r) = match (left, right) {
            (AtCell::Value(l), AtCell::Value(r)) => (l.slot0() as i64, r.slot0() as i64),
            _ => return Bounce::Raised(error_cell(pool, "add needs two arguments")),
        };
        level.output = int(l + r);
        Bounce::Completed
    }

    fn make_add(pool: &mut StubPool) -> Action {
        let left = Symbol::intern(pool, "left").canon(pool).index() as u32;
        let right = Symbol::intern(pool, "right").canon(pool).index() as u32;
        Action::make(
            pool,
            &[
                ParamSpec { symbol_canon: left, class: ParamClass::Normal, type_bits: ANY_KIND },
                ParamSpec { symbol_canon: right, class: ParamClass::Normal, type_bits: ANY_KIND },
            ],
            add_dispatcher,
            true,
        )
    }

    fn root_ctx_with(pool: &mut StubPool, bindings: &[(&str, Cell)]) -> StubId {
        let keylist = Keylist::alloc(pool);
        for (name, _) in bindings {
            let sym = Symbol::intern(pool, name);
            keylist.push(pool, &sym);
        }
        let ctx = Context::alloc(pool, &keylist);
        for (_, cell) in bindings {
            ctx.append_var(pool, *cell);
        }
        ctx.stub
    }

    #[test]
    fn dispatch_runs_and_produces_a_sum() {
        let mut pool = StubPool::new();
        let add = make_add(&mut pool);
        let ctx = root_ctx_with(&mut pool, &[]);
        set_root_context(ctx);

        let array = ArrayT::from_cells(&mut pool, &[int(2), int(3)], 0);
        let feed = Rc::new(RefCell::new(Feed::from_array(&mut pool, array, 0)));
        let mut tramp = Trampoline::new();
        tramp.push(Level::new(
            LevelCore::fresh(0),
            Box::new(ActionExecutor::new(&mut pool, add, feed, None)),
        ));
        match tramp.run(&mut pool) {
            RunOutcome::Completed(out) => assert_eq!(out.slot0() as i64, 5),
            _ => panic!("expected the add dispatcher to complete"),
        }
    }

    #[test]
    fn enfix_pre_fills_the_left_argument() {
        let mut pool = StubPool::new();
        let add = make_add(&mut pool);
        let ctx = root_ctx_with(&mut pool, &[]);
        set_root_context(ctx);

        let array = ArrayT::from_cells(&mut pool, &[int(10)], 0);
        let feed = Rc::new(RefCell::new(Feed::from_array(&mut pool, array, 0)));
        let mut tramp = Trampoline::new();
        tramp.push(Level::new(
            LevelCore::fresh(0),
            Box::new(ActionExecutor::new(&mut pool, add, feed, Some(int(1)))),
        ));
        match tramp.run(&mut pool) {
            RunOutcome::Completed(out) => assert_eq!(out.slot0() as i64, 11),
            _ => panic!("expected the add dispatcher to complete"),
        }
    }
}

//! The evaluator: the state machine that actually walks a `Feed` and
//! produces values (spec §4.7 "Evaluator").
//!
//! One `EvaluatorExecutor` instance handles either a whole body (a
//! script, a function body, a GROUP's contents -- evaluate expression
//! after expression, keep the last result, stop at the feed's end) or
//! a single argument fetch (evaluate exactly one expression, no
//! trailing enfix lookahead, stop there). The distinction is
//! `EvalMode`; everything else about the step loop is shared, matching
//! the teacher's `cond.rs` pattern of one state machine parameterized
//! by a small enum rather than two near-duplicate implementations.

use std::cell::RefCell;
use std::rc::Rc;

use renc_core::{Cell, Kind, Lift, RaisedError};

use crate::action::{Action, ActionExecutor};
use crate::array::{Array, AtCell};
use crate::context::Context;
use crate::feed::Feed;
use crate::level::{Executor, Level, LevelCore};
use crate::pool::{StubId, StubPool};
use crate::string::StringBuf;
use crate::trampoline::{Bounce, ThrowPayload};

/// Whether this executor runs a whole body to its last value, or
/// fetches exactly one argument expression (spec §4.7 "Argument
/// fulfillment ... evaluates one step, without looking ahead for a
/// following enfix word").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Body,
    ArgFetch,
}

enum PendingKind {
    ExpressionResult,
    AssignTo { canon: u32 },
}

struct Pending {
    slot: Rc<RefCell<Cell>>,
    what: PendingKind,
}

pub struct EvaluatorExecutor {
    feed: Rc<RefCell<Feed>>,
    ctx: StubId,
    mode: EvalMode,
    pending: Option<Pending>,
}

impl EvaluatorExecutor {
    pub fn new(feed: Rc<RefCell<Feed>>, ctx: StubId, mode: EvalMode) -> EvaluatorExecutor {
        EvaluatorExecutor { feed, ctx, mode, pending: None }
    }

    fn push_child(&mut self, baseline: u32, what: PendingKind, child_feed: Rc<RefCell<Feed>>, child_mode: EvalMode, child_ctx: StubId) -> Bounce {
        let slot = Rc::new(RefCell::new(Cell::fresh()));
        self.pending = Some(Pending { slot: slot.clone(), what });
        let child = Level::new(
            LevelCore::fresh(baseline).with_feed(child_feed.clone()).with_return_slot(slot),
            Box::new(EvaluatorExecutor::new(child_feed, child_ctx, child_mode)),
        );
        Bounce::Continue(child)
    }

    fn call_action(&mut self, level: &LevelCore, pool: &mut StubPool, action: Action, enfix_left: Option<Cell>) -> Bounce {
        let slot = Rc::new(RefCell::new(Cell::fresh()));
        self.pending = Some(Pending { slot: slot.clone(), what: PendingKind::ExpressionResult });
        let child = Level::new(
            LevelCore::fresh(level.baseline_stack_index).with_return_slot(slot),
            Box::new(ActionExecutor::new(pool, action, self.feed.clone(), enfix_left)),
        );
        Bounce::Continue(child)
    }

    /// Look one word ahead without consuming it unless it resolves to
    /// an enfix action, in which case the feed is advanced past it
    /// (spec §4.7 "Enfix lookahead").
    fn peek_enfix(&mut self, pool: &mut StubPool) -> Option<Action> {
        if self.mode != EvalMode::Body {
            return None;
        }
        let canon = {
            let feed = self.feed.borrow();
            let cell = feed.current()?;
            if cell.kind() != Kind::Word {
                return None;
            }
            cell.slot0() as u32
        };
        let resolved = Context { stub: self.ctx }.get_by_canon(pool, canon)?;
        if resolved.kind() != Kind::Action {
            return None;
        }
        let action = Action { stub: StubId::from_index(resolved.slot0() as u32) };
        if !action.is_enfix(pool) {
            return None;
        }
        self.feed.borrow_mut().advance(pool);
        Some(action)
    }

    /// Process the one pending value from a just-completed child
    /// (action call, SET-WORD value, or GROUP result), then decide
    /// whether to keep looping (`Body` mode, more feed left) or stop.
    fn resume(&mut self, level: &mut LevelCore, pool: &mut StubPool) -> Bounce {
        let pending = self.pending.take().expect("resume called without a pending child result");
        let raw = *pending.slot.borrow();
        let value = match decay(pool, raw) {
            Ok(v) => v,
            Err(err) => return Bounce::Raised(error_cell(pool, &err.to_string())),
        };
        match pending.what {
            PendingKind::AssignTo { canon } => {
                Context { stub: self.ctx }.set_by_canon(pool, canon, value);
            }
            PendingKind::ExpressionResult => {}
        }
        self.settle(level, pool, value)
    }

    /// Common tail for every way of producing one expression's value:
    /// check for a following enfix call, then decide completion. A
    /// `Body`-mode run that is about to complete decays its final value
    /// (spec §3(d)/§4.1 "Decay") so that an unstable antiform read
    /// straight off the feed -- not just one returned from a pushed
    /// child -- never crosses out as the body's result undecayed.
    fn settle(&mut self, level: &mut LevelCore, pool: &mut StubPool, value: Cell) -> Bounce {
        level.output = value;
        if let Some(action) = self.peek_enfix(pool) {
            return self.call_action(level, pool, action, Some(value));
        }
        if self.mode == EvalMode::ArgFetch {
            return Bounce::Completed;
        }
        if self.feed.borrow().is_at_end() {
            return match decay(pool, value) {
                Ok(decayed) => {
                    level.output = decayed;
                    Bounce::Completed
                }
                Err(err) => Bounce::Raised(error_cell(pool, &err.to_string())),
            };
        }
        self.step_expression(level, pool)
    }

    /// Drive the feed forward until one expression's value is ready to
    /// hand to `settle`, or a child level must be pushed to get it
    /// (spec §4.7 evaluator steps 1-7).
    fn step_expression(&mut self, level: &mut LevelCore, pool: &mut StubPool) -> Bounce {
        loop {
            let current = { self.feed.borrow().current().copied() };
            let Some(cell) = current else {
                // Feed already empty: nothing to evaluate this round.
                return Bounce::Completed;
            };

            // An antiform (e.g. a PACK sitting directly in the body, not
            // wrapped by an action call or SET-WORD) must not take the
            // inert fast path: it still needs to decay at `settle`,
            // which the catch-all arm below also routes through (spec
            // §3(d): unstable antiforms are never read "as is").
            if cell.kind().is_inert() && !cell.lift().is_antiform() {
                self.feed.borrow_mut().advance(pool);
                return self.settle(level, pool, cell);
            }

            if cell.lift().is_quoted() {
                self.feed.borrow_mut().advance(pool);
                let unquoted = cell.unquote_one().unwrap_or(cell);
                return self.settle(level, pool, unquoted);
            }

            match cell.kind() {
                Kind::Word => {
                    self.feed.borrow_mut().advance(pool);
                    let canon = cell.slot0() as u32;
                    let Some(resolved) = Context { stub: self.ctx }.get_by_canon(pool, canon) else {
                        return Bounce::Raised(error_cell(pool, "word has no value"));
                    };
                    if resolved.kind() == Kind::Action {
                        let action = Action { stub: StubId::from_index(resolved.slot0() as u32) };
                        return self.call_action(level, pool, action, None);
                    }
                    return self.settle(level, pool, resolved);
                }
                Kind::GetWord => {
                    self.feed.borrow_mut().advance(pool);
                    let canon = cell.slot0() as u32;
                    let resolved = Context { stub: self.ctx }.get_by_canon(pool, canon).unwrap_or_else(Cell::fresh);
                    return self.settle(level, pool, resolved);
                }
                Kind::SetWord => {
                    self.feed.borrow_mut().advance(pool);
                    let canon = cell.slot0() as u32;
                    if self.feed.borrow().is_at_end() {
                        return Bounce::Raised(error_cell(pool, "set-word needs a following value"));
                    }
                    return self.push_child(
                        level.baseline_stack_index,
                        PendingKind::AssignTo { canon },
                        self.feed.clone(),
                        EvalMode::ArgFetch,
                        self.ctx,
                    );
                }
                Kind::Group => {
                    self.feed.borrow_mut().advance(pool);
                    let group_array = Array { stub: StubId::from_index(cell.slot0() as u32) };
                    let sub_feed = Rc::new(RefCell::new(Feed::from_array(pool, group_array, 0)));
                    return self.push_child(level.baseline_stack_index, PendingKind::ExpressionResult, sub_feed, EvalMode::Body, self.ctx);
                }
                _ => {
                    self.feed.borrow_mut().advance(pool);
                    return self.settle(level, pool, cell);
                }
            }
        }
    }
}

impl Executor for EvaluatorExecutor {
    fn step(&mut self, level: &mut LevelCore, pool: &mut StubPool) -> Bounce {
        if self.pending.is_some() {
            return self.resume(level, pool);
        }
        self.step_expression(level, pool)
    }

    fn on_unwind(&mut self, _level: &mut LevelCore, _pool: &mut StubPool, _thrown: &ThrowPayload) -> bool {
        false
    }
}

fn error_cell(pool: &mut StubPool, message: &str) -> Cell {
    let buf = StringBuf::alloc(pool, message);
    pool.manage(buf.stub);
    Cell::new(Kind::Error, buf.stub.index() as u64, 0)
}

/// Antiform decay rules (spec §4.1 "Decay"): a stable antiform (WORD,
/// ACTION, FRAME) passes through unchanged; PACK decays to its first
/// (non-error) element; GHOST and ERROR abort the decay with a raised
/// error rather than silently becoming some other value.
pub(crate) fn decay(pool: &StubPool, cell: Cell) -> Result<Cell, RaisedError> {
    if !cell.lift().is_antiform() {
        return Ok(cell);
    }
    match cell.kind() {
        Kind::Block => decay_pack(pool, cell),
        Kind::Ghost => Err(RaisedError::new("no value produced (ghost)")),
        Kind::Error => Err(RaisedError::new("unhandled raised error")),
        _ => Ok(cell),
    }
}

fn decay_pack(pool: &StubPool, cell: Cell) -> Result<Cell, RaisedError> {
    let arr = Array { stub: StubId::from_index(cell.slot0() as u32) };
    let AtCell::Value(first) = arr.at(pool, 0) else {
        return Err(RaisedError::new("pack has no elements to decay"));
    };
    let decayed = if first.lift() == Lift::Quasi {
        let unlifted = first.unlift_one().map_err(|e| RaisedError::new(e.to_string()))?;
        if unlifted.kind() == Kind::Error {
            return Err(RaisedError::new("pack's first element is a raised error"));
        }
        if matches!(unlifted.kind(), Kind::Block | Kind::Ghost) {
            return Err(RaisedError::new("pack's first element may not itself be an unstable antiform"));
        }
        unlifted
    } else {
        *first
    };
    for i in 1..arr.len(pool) {
        if let AtCell::Value(c) = arr.at(pool, i) {
            if c.lift() == Lift::Quasi {
                if let Ok(unlifted) = c.unlift_one() {
                    if unlifted.kind() == Kind::Error {
                        return Err(RaisedError::new("pack contains an unhandled error"));
                    }
                }
            }
        }
    }
    Ok(decayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ANY_KIND, ParamClass, ParamSpec, set_root_context};
    use crate::context::Keylist;
    use crate::string::Symbol;
    use crate::trampoline::{RunOutcome, Trampoline};

    fn int(n: i64) -> Cell {
        Cell::new(Kind::Integer, n as u64, 0)
    }

    fn word(canon: u32) -> Cell {
        Cell::new(Kind::Word, canon as u64, 0)
    }

    fn add_dispatcher(level: &mut LevelCore, pool: &mut StubPool, frame: &Context) -> Bounce {
        let l = match frame.var_at(pool, 0) {
            AtCell::Value(c) => c.slot0() as i64,
            AtCell::End => 0,
        };
        let r = match frame.var_at(pool, 1) {
            AtCell::Value(c) => c.slot0() as i64,
            AtCell::End => 0,
        };
        level.output = int(l + r);
        Bounce::Completed
    }

    fn multiply_dispatcher(level: &mut LevelCore, pool: &mut StubPool, frame: &Context) -> Bounce {
        let l = match frame.var_at(pool, 0) {
            AtCell::Value(c) => c.slot0() as i64,
            AtCell::End => 0,
        };
        let r = match frame.var_at(pool, 1) {
            AtCell::Value(c) => c.slot0() as i64,
            AtCell::End => 0,
        };
        level.output = int(l * r);
        Bounce::Completed
    }

    fn make_binary_action(pool: &mut StubPool, dispatcher: crate::action::DispatchFn) -> Action {
        let left = Symbol::intern(pool, "left").canon(pool).index() as u32;
        let right = Symbol::intern(pool, "right").canon(pool).index() as u32;
        Action::make(
            pool,
            &[
                ParamSpec { symbol_canon: left, class: ParamClass::Normal, type_bits: ANY_KIND },
                ParamSpec { symbol_canon: right, class: ParamClass::Normal, type_bits: ANY_KIND },
            ],
            dispatcher,
            true,
        )
    }

    fn setup_arith_context(pool: &mut StubPool) -> StubId {
        let add = make_binary_action(pool, add_dispatcher);
        let mul = make_binary_action(pool, multiply_dispatcher);
        let add_sym = Symbol::intern(pool, "+");
        let mul_sym = Symbol::intern(pool, "*");
        let keylist = Keylist::alloc(pool);
        keylist.push(pool, &add_sym);
        keylist.push(pool, &mul_sym);
        let ctx = Context::alloc(pool, &keylist);
        ctx.append_var(pool, add.archetype(pool));
        ctx.append_var(pool, mul.archetype(pool));
        ctx.stub
    }

    fn run_body(pool: &mut StubPool, ctx: StubId, cells: &[Cell]) -> Cell {
        set_root_context(ctx);
        let array = Array::from_cells(pool, cells, 0);
        let feed = Rc::new(RefCell::new(Feed::from_array(pool, array, 0)));
        let mut tramp = Trampoline::new();
        tramp.push(Level::new(LevelCore::fresh(0), Box::new(EvaluatorExecutor::new(feed, ctx, EvalMode::Body))));
        match tramp.run(pool) {
            RunOutcome::Completed(out) => out,
            _ => panic!("expected the evaluator to complete"),
        }
    }

    #[test]
    fn enfix_left_to_right_chaining_matches_scenario_one() {
        // "1 + 2 * 3" evaluated left to right gives 9, not 7: `+`'s
        // right argument is fetched without its own enfix lookahead,
        // so `2` alone is taken, then `*` looks ahead on the `1 + 2`
        // result.
        let mut pool = StubPool::new();
        let ctx = setup_arith_context(&mut pool);
        let plus = Symbol::intern(&mut pool, "+").canon(&pool).index() as u32;
        let star = Symbol::intern(&mut pool, "*").canon(&pool).index() as u32;
        let out = run_body(&mut pool, ctx, &[int(1), word(plus), int(2), word(star), int(3)]);
        assert_eq!(out.slot0() as i64, 9);
    }

    #[test]
    fn set_word_assigns_then_subsequent_lookup_sees_it() {
        let mut pool = StubPool::new();
        let x = Symbol::intern(&mut pool, "x");
        let keylist = Keylist::alloc(&mut pool);
        keylist.push(&mut pool, &x);
        let ctx = Context::alloc(&mut pool, &keylist);
        ctx.append_var(&mut pool, Cell::fresh());

        let mut set_x = Cell::new(Kind::SetWord, x.canon(&pool).index() as u64, 0);
        set_x = set_x; // SET-WORD cell, canon in slot0
        let out = run_body(&mut pool, ctx.stub, &[set_x, int(5), word(x.canon(&pool).index() as u32)]);
        assert_eq!(out.slot0() as i64, 5);
        assert_eq!(ctx.get_by_canon(&pool, x.canon(&pool).index() as u32).unwrap().slot0() as i64, 5);
    }

    #[test]
    fn group_runs_its_own_body_and_yields_last_value() {
        let mut pool = StubPool::new();
        let ctx = setup_arith_context(&mut pool);
        let plus = Symbol::intern(&mut pool, "+").canon(&pool).index() as u32;
        let inner = Array::from_cells(&mut pool, &[int(2), word(plus), int(3)], 0);
        let group_cell = Cell::new(Kind::Group, inner.stub.index() as u64, 0);
        let out = run_body(&mut pool, ctx, &[group_cell]);
        assert_eq!(out.slot0() as i64, 5);
    }

    #[test]
    fn decay_passes_through_a_stable_word_antiform() {
        let pool = StubPool::new();
        let mut okay = Cell::new(Kind::Word, 0, 0);
        okay.set_word_keyword(renc_core::WordKeyword::Okay);
        let anti = okay.coerce_to_antiform().unwrap();
        let decayed = decay(&pool, anti).unwrap();
        assert_eq!(decayed.kind(), Kind::Word);
    }

    #[test]
    fn decay_rejects_a_ghost() {
        let pool = StubPool::new();
        let mut ghost = Cell::new(Kind::Ghost, 0, 0);
        ghost = Cell::new(Kind::Ghost, ghost.slot0(), ghost.slot1());
        let anti = ghost.coerce_to_antiform().unwrap();
        assert!(decay(&pool, anti).is_err());
    }

    #[test]
    fn decay_unwraps_a_pack_to_its_first_element() {
        let mut pool = StubPool::new();
        let inner = Array::from_cells(&mut pool, &[int(42), int(99)], 0);
        let pack = Cell::new(Kind::Block, inner.stub.index() as u64, 0).coerce_to_antiform().unwrap();
        let decayed = decay(&pool, pack).unwrap();
        assert_eq!(decayed.slot0() as i64, 42);
    }

    #[test]
    fn decay_rejects_a_pack_whose_first_element_is_an_error() {
        let mut pool = StubPool::new();
        let err_buf = StringBuf::alloc(&mut pool, "boom");
        pool.manage(err_buf.stub);
        let err_cell = Cell::new(Kind::Error, err_buf.stub.index() as u64, 0).coerce_to_antiform().unwrap();
        let lifted_err = err_cell.lift_one().unwrap();
        let inner = Array::from_cells(&mut pool, &[lifted_err], 0);
        let pack = Cell::new(Kind::Block, inner.stub.index() as u64, 0).coerce_to_antiform().unwrap();
        assert!(decay(&pool, pack).is_err());
    }
}

//! The stackless trampoline driving Levels (spec §4.6).
//!
//! Tick accounting and the active/total/peak level counters are
//! grounded on the teacher's `scheduler.rs` strand-lifecycle counters
//! (`ACTIVE_STRANDS`/`TOTAL_SPAWNED`/`TOTAL_COMPLETED`/`PEAK_STRANDS`),
//! re-purposed from "strands running on OS threads" to "ticks of this
//! single-threaded cooperative executor" -- thread-local rather than
//! process-global, since each interpreter instance owns one trampoline
//! per thread (spec §5 "no shared mutable state between instances").

use std::cell::Cell as StdCell;

use renc_core::memory_stats::{get_or_register_slot, set_run_started, update_trampoline_stats};
use renc_core::{Cell, Kind};

use crate::level::{Level, LevelId, LevelPool};
use crate::pool::{StubPool, rescue_scope};
use crate::string::StringBuf;

/// What an executor hands back to the trampoline after one step (spec
/// §4.6 "Bounce"). `Continue`/`Delegate` carry the child `Level` to
/// push rather than mutating a shared trampoline handle -- the
/// trampoline alone owns push/pop, so an executor never needs access
/// to anything beyond its own `LevelCore` and the stub pool.
pub enum Bounce {
    Completed,
    Continue(Level),
    Delegate(Level),
    Thrown(ThrowPayload),
    Raised(Cell),
}

/// A non-local return in flight: RETURN/BREAK/CONTINUE/THROW all carry
/// a label plus a value (spec §7 "Throw").
#[derive(Debug, Clone)]
pub struct ThrowPayload {
    pub label: Cell,
    pub value: Cell,
    /// Set by the trampoline when the throw originates from a
    /// cooperative cancellation rather than a language-level construct
    /// (spec §5 "Cancellation semantics").
    pub is_cancellation: bool,
}

thread_local! {
    static TICK: StdCell<u64> = const { StdCell::new(0) };
    static ACTIVE_LEVELS: StdCell<u64> = const { StdCell::new(0) };
    static TOTAL_PUSHED: StdCell<u64> = const { StdCell::new(0) };
    static TOTAL_POPPED: StdCell<u64> = const { StdCell::new(0) };
    static PEAK_LEVELS: StdCell<u64> = const { StdCell::new(0) };
}

/// Per-thread trampoline tick/level statistics, read by `diagnostics`
/// and `report` (spec §4.6 supplement).
#[derive(Debug, Clone, Copy)]
pub struct TrampolineStats {
    pub tick: u64,
    pub active_levels: u64,
    pub total_pushed: u64,
    pub total_popped: u64,
    pub peak_levels: u64,
}

pub fn trampoline_stats() -> TrampolineStats {
    TrampolineStats {
        tick: TICK.with(|c| c.get()),
        active_levels: ACTIVE_LEVELS.with(|c| c.get()),
        total_pushed: TOTAL_PUSHED.with(|c| c.get()),
        total_popped: TOTAL_POPPED.with(|c| c.get()),
        peak_levels: PEAK_LEVELS.with(|c| c.get()),
    }
}

fn note_push() {
    TOTAL_PUSHED.with(|c| c.set(c.get() + 1));
    let active = ACTIVE_LEVELS.with(|c| {
        c.set(c.get() + 1);
        c.get()
    });
    let peak = PEAK_LEVELS.with(|c| {
        if active > c.get() {
            c.set(active);
        }
        c.get()
    });
    report_to_registry(active, peak);
}

fn note_pop() {
    TOTAL_POPPED.with(|c| c.set(c.get() + 1));
    let active = ACTIVE_LEVELS.with(|c| {
        c.set(c.get().saturating_sub(1));
        c.get()
    });
    let peak = PEAK_LEVELS.with(|c| c.get());
    report_to_registry(active, peak);
}

/// Publishes this thread's trampoline counters into the cross-thread
/// registry so a diagnostics dump from another thread can see them
/// (spec §5 supplement: "a host may want one dashboard across all of
/// them").
fn report_to_registry(active_levels: u64, peak_levels: u64) {
    if get_or_register_slot().is_some() {
        let tick = TICK.with(|c| c.get());
        update_trampoline_stats(tick, active_levels, peak_levels);
    }
}

/// The outcome of running a trampoline to quiescence (spec §4.6).
pub enum RunOutcome {
    Completed(Cell),
    Thrown(ThrowPayload),
    Raised(Cell),
    /// Stopped at a configured tick breakpoint, for reproducible
    /// debugging (spec §4.6 "ticks are used as a reproducible
    /// breakpoint currency").
    BrokeAtTick(u64),
}

/// Runs Levels to completion (spec §4.6 "Trampoline main loop").
pub struct Trampoline {
    pub levels: LevelPool,
    top: Option<LevelId>,
    cancel: bool,
    break_at_tick: Option<u64>,
}

impl Trampoline {
    pub fn new() -> Trampoline {
        Trampoline {
            levels: LevelPool::new(),
            top: None,
            cancel: false,
            break_at_tick: None,
        }
    }

    pub fn push(&mut self, level: Level) -> LevelId {
        let id = self.levels.push(level, self.top);
        self.top = Some(id);
        note_push();
        id
    }

    /// The host sets this between trampoline iterations (spec §5
    /// "Cancellation semantics"); never mid-step.
    pub fn set_cancel(&mut self, v: bool) {
        self.cancel = v;
    }

    pub fn set_break_at_tick(&mut self, tick: Option<u64>) {
        self.break_at_tick = tick;
    }

    fn pop(&mut self) -> Level {
        let (level, prior) = self.levels.pop(self.top.expect("pop with no top level"));
        self.top = prior;
        note_pop();
        level
    }

    /// Drive the trampoline until its level stack empties, a throw
    /// escapes uncaught, or the tick breakpoint is hit (spec §4.6
    /// "Trampoline main loop").
    pub fn run(&mut self, pool: &mut StubPool) -> RunOutcome {
        let _run_guard = RunGuard::enter();
        loop {
            let tick = TICK.with(|c| {
                c.set(c.get() + 1);
                c.get()
            });
            report_to_registry(
                ACTIVE_LEVELS.with(|c| c.get()),
                PEAK_LEVELS.with(|c| c.get()),
            );
            if let Some(target) = self.break_at_tick {
                if tick >= target {
                    return RunOutcome::BrokeAtTick(tick);
                }
            }

            let Some(top_id) = self.top else {
                return RunOutcome::Completed(Cell::fresh());
            };

            let bounce = match rescue_scope(pool, |pool| self.levels.step(top_id, pool)) {
                Ok(b) => b,
                Err(payload) => {
                    let message = panic_message(payload);
                    return RunOutcome::Raised(error_cell_for_panic(pool, &message));
                }
            };

            match bounce {
                Bounce::Completed => {
                    let finished = self.pop();
                    if self.top.is_none() {
                        return RunOutcome::Completed(finished.core.output);
                    }
                }
                Bounce::Continue(child) => {
                    self.push(child);
                }
                Bounce::Delegate(child) => {
                    self.pop();
                    self.push(child);
                }
                Bounce::Thrown(payload) => {
                    return self.propagate_thrown(payload, pool);
                }
                Bounce::Raised(err) => {
                    return RunOutcome::Raised(err);
                }
            }

            // Checked once per completed iteration rather than before the
            // step above, so a cancel flag set between two `run()` calls
            // still lets the iteration already pending when the host
            // looked away finish first (spec §8 scenario 4: "exactly one
            // more iteration completes, then throw unwinds").
            if self.cancel {
                return self.inject_cancellation(pool);
            }
        }
    }

    /// Injects a cooperative cancellation throw at the top level (spec
    /// §5 "Cancellation semantics").
    fn inject_cancellation(&mut self, pool: &mut StubPool) -> RunOutcome {
        self.cancel = false;
        let throw = ThrowPayload {
            label: Cell::fresh(),
            value: Cell::fresh(),
            is_cancellation: true,
        };
        self.propagate_thrown(throw, pool)
    }

    /// Pop levels, running each executor's `on_unwind` once so it can
    /// release holds, until a catcher absorbs the throw or the stack
    /// empties (spec §4.6 "thrown").
    fn propagate_thrown(&mut self, payload: ThrowPayload, pool: &mut StubPool) -> RunOutcome {
        loop {
            let Some(top_id) = self.top else {
                return RunOutcome::Thrown(payload);
            };
            let caught = self.levels.notify_unwind(top_id, pool, &payload);
            let finished = self.pop();
            if caught {
                return RunOutcome::Completed(finished.core.output);
            }
        }
    }
}

impl Default for Trampoline {
    fn default() -> Self {
        Trampoline::new()
    }
}

/// Marks this thread's trampoline as "running" for the duration of one
/// `Trampoline::run` call, so `watchdog` can detect a continuously stuck
/// evaluation (spec §5 supplement). Cleared on every exit path, including
/// the panic-caught branch, via `Drop`.
struct RunGuard;

impl RunGuard {
    fn enter() -> RunGuard {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        set_run_started(now.max(1));
        RunGuard
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        set_run_started(0);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn error_cell_for_panic(pool: &mut StubPool, message: &str) -> Cell {
    let buf = StringBuf::alloc(pool, message);
    pool.manage(buf.stub);
    Cell::new(Kind::Error, buf.stub.index() as u64, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{Executor, LevelCore};

    struct ImmediatelyDone;
    impl Executor for ImmediatelyDone {
        fn step(&mut self, level: &mut LevelCore, _pool: &mut StubPool) -> Bounce {
            level.output = Cell::new(Kind::Integer, 7, 0);
            Bounce::Completed
        }
    }

    struct PushesOneChild {
        pushed: bool,
    }
    impl Executor for PushesOneChild {
        fn step(&mut self, level: &mut LevelCore, _pool: &mut StubPool) -> Bounce {
            if !self.pushed {
                self.pushed = true;
                let child = Level::new(LevelCore::fresh(0), Box::new(ImmediatelyDone));
                return Bounce::Continue(child);
            }
            level.output = Cell::new(Kind::Integer, 99, 0);
            Bounce::Completed
        }
    }

    struct AlwaysThrows;
    impl Executor for AlwaysThrows {
        fn step(&mut self, _level: &mut LevelCore, _pool: &mut StubPool) -> Bounce {
            Bounce::Thrown(ThrowPayload {
                label: Cell::fresh(),
                value: Cell::new(Kind::Integer, 5, 0),
                is_cancellation: false,
            })
        }
        fn on_unwind(
            &mut self,
            _level: &mut LevelCore,
            _pool: &mut StubPool,
            _thrown: &ThrowPayload,
        ) -> bool {
            false
        }
    }

    #[test]
    fn trampoline_runs_single_level_to_completion() {
        let mut pool = StubPool::new();
        let mut tramp = Trampoline::new();
        tramp.push(Level::new(LevelCore::fresh(0), Box::new(ImmediatelyDone)));
        match tramp.run(&mut pool) {
            RunOutcome::Completed(out) => assert_eq!(out.slot0(), 7),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn trampoline_continues_into_pushed_child() {
        let mut pool = StubPool::new();
        let mut tramp = Trampoline::new();
        tramp.push(Level::new(
            LevelCore::fresh(0),
            Box::new(PushesOneChild { pushed: false }),
        ));
        match tramp.run(&mut pool) {
            RunOutcome::Completed(out) => assert_eq!(out.slot0(), 99),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn thrown_bounce_propagates_to_empty_stack() {
        let mut pool = StubPool::new();
        let mut tramp = Trampoline::new();
        tramp.push(Level::new(LevelCore::fresh(0), Box::new(AlwaysThrows)));
        match tramp.run(&mut pool) {
            RunOutcome::Thrown(payload) => assert_eq!(payload.value.slot0(), 5),
            _ => panic!("expected an uncaught throw"),
        }
    }

    #[test]
    fn break_at_tick_stops_before_completion() {
        let mut pool = StubPool::new();
        let mut tramp = Trampoline::new();
        tramp.set_break_at_tick(Some(1));
        tramp.push(Level::new(LevelCore::fresh(0), Box::new(ImmediatelyDone)));
        match tramp.run(&mut pool) {
            RunOutcome::BrokeAtTick(tick) => assert_eq!(tick, 1),
            _ => panic!("expected a tick break"),
        }
    }

    struct LoopsForever {
        iterations: std::rc::Rc<StdCell<u32>>,
    }
    impl Executor for LoopsForever {
        fn step(&mut self, _level: &mut LevelCore, _pool: &mut StubPool) -> Bounce {
            self.iterations.set(self.iterations.get() + 1);
            Bounce::Continue(Level::new(
                LevelCore::fresh(0),
                Box::new(LoopsForever {
                    iterations: self.iterations.clone(),
                }),
            ))
        }
    }

    #[test]
    fn cancellation_injects_a_throw() {
        let mut pool = StubPool::new();
        let mut tramp = Trampoline::new();
        tramp.push(Level::new(LevelCore::fresh(0), Box::new(AlwaysThrows)));
        tramp.set_cancel(true);
        match tramp.run(&mut pool) {
            RunOutcome::Thrown(payload) => assert!(payload.is_cancellation),
            _ => panic!("expected a cancellation throw"),
        }
    }

    /// Spec §8 scenario 4: setting cancel before a `run()` call still lets
    /// the iteration already pending at that point complete once more,
    /// rather than pre-empting it outright.
    #[test]
    fn cancellation_completes_one_more_iteration_before_unwinding() {
        let mut pool = StubPool::new();
        let mut tramp = Trampoline::new();
        let iterations = std::rc::Rc::new(StdCell::new(0u32));
        tramp.push(Level::new(
            LevelCore::fresh(0),
            Box::new(LoopsForever {
                iterations: iterations.clone(),
            }),
        ));
        tramp.set_cancel(true);
        match tramp.run(&mut pool) {
            RunOutcome::Thrown(payload) => assert!(payload.is_cancellation),
            _ => panic!("expected a cancellation throw"),
        }
        assert_eq!(iterations.get(), 1, "exactly one more iteration should have run");
    }
}

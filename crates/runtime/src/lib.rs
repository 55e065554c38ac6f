//! Ren Runtime: stubs, arrays/strings, the garbage collector, the value
//! feed, and the stackless trampoline/evaluator/action machinery that
//! together execute bound code (spec §2 components 2-7).
//!
//! Built on top of `renc_core`'s `Cell`. Dependency order mirrors the
//! spec's leaves-first layering:
//!
//! `stub`/`pool` -> `array`/`string`/`context` -> `gc` -> `feed` ->
//! `level`/`trampoline` -> `evaluator`/`action`
//!
//! plus the ambient diagnostics stack (`diagnostics`, `watchdog`,
//! `report`), ridden alongside rather than beneath the dependency order.

pub mod action;
pub mod array;
pub mod context;
pub mod evaluator;
pub mod feed;
pub mod gc;
pub mod level;
pub mod pool;
pub mod string;
pub mod stub;
pub mod trampoline;

pub mod diagnostics;
pub mod report;
pub mod watchdog;

pub use action::{
    ANY_KIND, Action, ActionExecutor, DispatchFn, ParamClass, ParamSpec, kind_bit, push_refinement_arg, root_context,
    set_root_context,
};
pub use array::{Array, AtCell};
pub use context::{Context, Keylist, binding_of_context, context_from_binding};
pub use evaluator::{EvalMode, EvaluatorExecutor};
pub use feed::{Feed, FeedPointer, Instruction, register_varargs_feed, varargs_feed};
pub use gc::{GcStats, Roots, collect};
pub use level::{Executor, Level, LevelCore, LevelId, LevelPool};
pub use pool::{StubId, StubPool, rescue_scope};
pub use string::{Bookmark, StringBuf, Symbol};
pub use stub::{DynamicBuf, Flavor, Payload, Stub, StubSlot};
pub use trampoline::{Bounce, RunOutcome, ThrowPayload, Trampoline, TrampolineStats, trampoline_stats};

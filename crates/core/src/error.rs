//! Thread-local channel for Raised errors (spec §7).
//!
//! A panic unwinds unconditionally (Rust's native mechanism, bound to the
//! host's rescue scope — see `renc_runtime::trampoline`). A Raised error is
//! the recoverable counterpart: it surfaces in a Level's output cell as an
//! ERROR antiform, and a dispatcher that wants to hand one to a caller
//! without decaying it into a panic stashes it here, mirroring the
//! teacher's `runtime/src/error.rs` thread-local `LAST_ERROR` cell (there
//! used to cross an FFI boundary; here to cross the Dispatcher -> Action
//! Executor boundary without threading a `Result` through every Bounce).

use std::cell::RefCell;
use std::fmt;

/// A recoverable, typed error (spec §7 "Raised error").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaisedError {
    /// Canned message, e.g. for `Fail-on-typecheck`.
    pub message: String,
    /// Optional label of the parameter/operation that failed, used by
    /// `Fail-on-typecheck` to name the offending parameter.
    pub label: Option<String>,
}

impl RaisedError {
    pub fn new(message: impl Into<String>) -> RaisedError {
        RaisedError {
            message: message.into(),
            label: None,
        }
    }

    pub fn with_label(message: impl Into<String>, label: impl Into<String>) -> RaisedError {
        RaisedError {
            message: message.into(),
            label: Some(label.into()),
        }
    }
}

impl fmt::Display for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RaisedError {}

thread_local! {
    static LAST_ERROR: RefCell<Option<RaisedError>> = const { RefCell::new(None) };
}

/// Stash a raised error for the nearest consumer to pick up.
pub fn set_raised_error(error: RaisedError) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(error));
}

/// Take (and clear) the pending raised error, if any.
pub fn take_raised_error() -> Option<RaisedError> {
    LAST_ERROR.with(|cell| cell.borrow_mut().take())
}

pub fn has_raised_error() -> bool {
    LAST_ERROR.with(|cell| cell.borrow().is_some())
}

pub fn clear_raised_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Format a `catch_unwind` panic payload into a human string, for the
/// Panic rescue-scope report (spec §7 "User-visible behavior").
pub fn format_panic_payload(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

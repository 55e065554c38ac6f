//! Opaque binding handle.
//!
//! A `Binding` names the context a bindable value was bound into. The Cell
//! model sits below contexts/varlists in the dependency order (spec §2:
//! Cell -> Stub -> Array/String -> ...), so `Binding` here is deliberately
//! opaque: it stores a raw node pointer the way a cell's `link`/`misc` slot
//! would, without knowing anything about what a context actually is. The
//! runtime crate upgrades this into a typed handle over its `Stub`s.

use std::fmt;
use std::ptr::NonNull;

/// An opaque reference to a binding context, or the unbound state.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Binding(Option<NonNull<()>>);

impl Binding {
    pub const UNBOUND: Binding = Binding(None);

    /// Construct a binding from a raw node pointer (owned by the runtime
    /// crate's Stub arena). The Cell model never dereferences this.
    pub const fn from_raw(ptr: NonNull<()>) -> Binding {
        Binding(Some(ptr))
    }

    pub const fn is_unbound(&self) -> bool {
        self.0.is_none()
    }

    pub const fn as_raw(&self) -> Option<NonNull<()>> {
        self.0
    }
}

impl Default for Binding {
    fn default() -> Self {
        Binding::UNBOUND
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("Binding(unbound)"),
            Some(p) => write!(f, "Binding({:p})", p.as_ptr()),
        }
    }
}

// Single-threaded per interpreter instance (spec §5); the raw pointer is
// never touched off the owning thread.
unsafe impl Send for Binding {}
unsafe impl Sync for Binding {}

//! The `Stub`: a fixed-size GC-managed heap descriptor (spec §3, §4.2).
//!
//! Every heap object -- array, string, context, action, map, feed -- is a
//! `Stub`. Layout follows the same texture as `renc_core::cell::Cell`: a
//! packed header word with inline accessor functions rather than an
//! opaque enum, mirroring the teacher's `HeapObject` (`tagged_stack.rs`).
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┬───────────────┐
//! │ header (4B)  │ link (8B)    │ misc (8B)    │ info (8B)    │ payload (32B) │
//! └──────────────┴──────────────┴──────────────┴──────────────┴───────────────┘
//! ```
//!
//! `link`/`misc`/`info` are generic slots: depending on header flags
//! (`LINK_NODE_NEEDS_MARK` etc.) each one holds either a node pointer the
//! GC must trace, or a plain counter/bit-pattern the GC skips. The payload
//! is either inline (`Singular`, one `Cell`) or out-of-line (`Dynamic`,
//! pointer + len + rest + bias), discriminated by the `DYNAMIC` flag.

use renc_core::Cell;
use std::fmt;
use std::ptr::NonNull;

/// Per-stub-subclass tag (spec §3 "flavor byte").
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    Array = 1,
    Varlist = 2,
    Paramlist = 3,
    Keylist = 4,
    StringBuf = 5,
    Symbol = 6,
    Map = 7,
    Feed = 8,
    Details = 9,
}

impl Flavor {
    pub const fn from_u8(v: u8) -> Option<Flavor> {
        Some(match v {
            1 => Flavor::Array,
            2 => Flavor::Varlist,
            3 => Flavor::Paramlist,
            4 => Flavor::Keylist,
            5 => Flavor::StringBuf,
            6 => Flavor::Symbol,
            7 => Flavor::Map,
            8 => Flavor::Feed,
            9 => Flavor::Details,
            _ => return None,
        })
    }

    /// True for flavors whose payload is an array of `Cell`s (as opposed
    /// to a raw byte buffer, e.g. `StringBuf`). Drives whether the GC
    /// iterates cell contents for this stub (spec §4.4 marking
    /// discipline).
    pub const fn holds_cells(self) -> bool {
        !matches!(self, Flavor::StringBuf | Flavor::Symbol)
    }
}

/// Header flags (spec §3, §4.2, §4.4).
pub mod flag {
    /// Collected by GC when unreferenced; unmanaged stubs live on the
    /// manuals list instead (spec §3 "Lifecycle").
    pub const MANAGED: u32 = 1 << 0;
    /// GC mark bit ("black" during one mark-sweep cycle; cleared to
    /// "white" at the next cycle's flip, spec §4.4 step 1).
    pub const MARKED: u32 = 1 << 1;
    /// Contents may change but the stub is never reallocated or moved;
    /// raw pointers into its payload stay stable (spec §5).
    pub const FIXED_SIZE: u32 = 1 << 2;
    /// Generic coloring independent of `MARKED`, for non-GC traversals
    /// such as cycle detection while molding (spec §4.2 "Coloring").
    pub const BLACK: u32 = 1 << 3;
    /// Payload lives out-of-line (`Payload::Dynamic`) rather than inline
    /// (`Payload::Singular`).
    pub const DYNAMIC: u32 = 1 << 4;
    /// `link` holds a node pointer the GC must mark.
    pub const LINK_NODE_NEEDS_MARK: u32 = 1 << 5;
    /// `misc` holds a node pointer the GC must mark.
    pub const MISC_NODE_NEEDS_MARK: u32 = 1 << 6;
    /// `info` holds a node pointer the GC must mark.
    pub const INFO_NODE_NEEDS_MARK: u32 = 1 << 7;
    /// Permanent, transitive immutability (spec §4.3 "Frozen").
    pub const FROZEN: u32 = 1 << 8;
    /// User-invoked PROTECT; rejects mutation for the stub's lifetime.
    pub const PROTECTED: u32 = 1 << 9;
    /// Transient lock set while a `Feed` iterates this stub; rejects
    /// resize/reorder until released (spec §4.4 "Holds").
    pub const HOLD: u32 = 1 << 10;
    /// Tail-newline bit for arrays (spec §4.3).
    pub const NEWLINE_AT_TAIL: u32 = 1 << 11;
    /// Set on a paramlist whose action is invoked infix, taking its left
    /// argument from the evaluator's already-produced output rather than
    /// the feed (spec §4.7 "Enfix").
    pub const ENFIX: u32 = 1 << 12;
}

/// A generic stub slot: either a node pointer or an opaque counter,
/// disambiguated by the owning stub's `*_NODE_NEEDS_MARK` flag.
#[derive(Clone, Copy)]
pub struct StubSlot(u64);

impl StubSlot {
    pub const fn zero() -> StubSlot {
        StubSlot(0)
    }

    pub const fn from_count(count: u64) -> StubSlot {
        StubSlot(count)
    }

    pub const fn as_count(self) -> u64 {
        self.0
    }

    pub fn from_node(node: NonNull<Stub>) -> StubSlot {
        StubSlot(node.as_ptr() as u64)
    }

    /// Reinterpret this slot as a node pointer.
    ///
    /// # Safety
    /// Caller must only call this when the owning flag
    /// (`LINK_NODE_NEEDS_MARK` etc.) is set for this slot.
    pub unsafe fn as_node(self) -> Option<NonNull<Stub>> {
        NonNull::new(self.0 as *mut Stub)
    }
}

impl fmt::Debug for StubSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StubSlot({:#x})", self.0)
    }
}

/// Out-of-line payload buffer: `(data, len, rest, bias)` (spec §4.2
/// "Dynamic allocation").
pub struct DynamicBuf {
    pub data: NonNull<u8>,
    /// Element width in bytes (cells vs. bytes, per flavor).
    pub elem_width: usize,
    /// Occupied element count.
    pub len: usize,
    /// Total capacity in elements, including bias.
    pub rest: usize,
    /// Unused front padding (cheap head-side removal).
    pub bias: usize,
}

/// A stub's payload: inline (singular) or out-of-line (dynamic).
pub enum Payload {
    /// One cell stored directly in the stub (the common small case).
    Singular(Cell),
    Dynamic(DynamicBuf),
}

/// A fixed-size GC-managed heap descriptor.
pub struct Stub {
    header: u32,
    pub link: StubSlot,
    pub misc: StubSlot,
    pub info: StubSlot,
    pub payload: Payload,
}

// Loosely bounds us to "~8 machine pointers" (spec §3); not exact since
// Payload is a Rust enum with a discriminant, but keeps us honest.
const _: () = assert!(std::mem::size_of::<Stub>() <= 96);

impl Stub {
    /// An "erased" stub fresh from the pool: node bit conceptually unset,
    /// all flags zero, flavor not yet assigned (spec §4.2 "Pool layout").
    pub fn erased() -> Stub {
        Stub {
            header: 0,
            link: StubSlot::zero(),
            misc: StubSlot::zero(),
            info: StubSlot::zero(),
            payload: Payload::Singular(Cell::fresh()),
        }
    }

    pub fn flavor(&self) -> Option<Flavor> {
        Flavor::from_u8((self.header & 0xFF) as u8)
    }

    pub fn set_flavor(&mut self, flavor: Flavor) {
        self.header = (self.header & !0xFF) | (flavor as u32);
    }

    pub fn flags(&self) -> u32 {
        self.header & !0xFF
    }

    pub fn has_flag(&self, f: u32) -> bool {
        self.header & f != 0
    }

    pub fn set_flag(&mut self, f: u32) {
        self.header |= f;
    }

    pub fn clear_flag(&mut self, f: u32) {
        self.header &= !f;
    }

    pub fn is_managed(&self) -> bool {
        self.has_flag(flag::MANAGED)
    }

    /// One-way transition: unmanaged (manuals-list) -> managed (GC
    /// tracked). Spec §3 "Lifecycle" -- never reversed.
    pub fn mark_managed(&mut self) {
        self.set_flag(flag::MANAGED);
    }

    pub fn is_dynamic(&self) -> bool {
        self.has_flag(flag::DYNAMIC)
    }

    pub fn is_frozen(&self) -> bool {
        self.has_flag(flag::FROZEN)
    }

    pub fn is_protected(&self) -> bool {
        self.has_flag(flag::PROTECTED)
    }

    pub fn is_held(&self) -> bool {
        self.has_flag(flag::HOLD)
    }

    /// Whether mutation is currently rejected (frozen, protected, or
    /// transiently held -- spec §5 "Shared-resource policy").
    pub fn is_mutation_locked(&self) -> bool {
        self.is_frozen() || self.is_protected() || self.is_held()
    }

    /// Generic "black/white" coloring toggle for non-GC traversals (spec
    /// §4.2 "Coloring"), independent of the GC's own `MARKED` bit.
    pub fn is_black(&self) -> bool {
        self.has_flag(flag::BLACK)
    }

    pub fn paint_black(&mut self) {
        self.set_flag(flag::BLACK);
    }

    pub fn paint_white(&mut self) {
        self.clear_flag(flag::BLACK);
    }

    pub fn is_marked(&self) -> bool {
        self.has_flag(flag::MARKED)
    }

    pub fn mark(&mut self) {
        self.set_flag(flag::MARKED);
    }

    pub fn unmark(&mut self) {
        self.clear_flag(flag::MARKED);
    }

    /// Which generic slots the GC must treat as node pointers (spec
    /// §4.4 "Marking discipline").
    pub fn link_needs_mark(&self) -> bool {
        self.has_flag(flag::LINK_NODE_NEEDS_MARK)
    }

    pub fn misc_needs_mark(&self) -> bool {
        self.has_flag(flag::MISC_NODE_NEEDS_MARK)
    }

    pub fn info_needs_mark(&self) -> bool {
        self.has_flag(flag::INFO_NODE_NEEDS_MARK)
    }
}

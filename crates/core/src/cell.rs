//! The `Cell`: a fixed-size (four machine-pointer) value record.
//!
//! Layout mirrors the teacher's `StackValue`/`HeapObject` texture
//! (`tagged_stack.rs`): a packed header word with inline accessor
//! functions, rather than an opaque tagged `enum`. A cell is:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┐
//! │ header (8B)  │ binding (8B) │ slot0 (8B)    │ slot1 (8B)    │
//! └──────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! `header` packs `kind` (§ `crate::kind::Kind`), `lift_byte`
//! (§ `crate::lift::Lift`), a sigil, and protection/const/unevaluated/
//! node-marking flags into one `u64`. The node bit (spec invariant (a))
//! is always set on a live cell so that any cell is distinguishable from
//! an "end" marker, which a Stub encodes separately (see the runtime
//! crate's `array` module).

use crate::binding::Binding;
use crate::kind::Kind;
use crate::lift::{Lift, LiftError, QuoteBase};

/// A value can carry at most one "sigil" (spec §4.1 rule (b)): a leading
/// decoration on WORD/PATH-family kinds. Antiforms may never carry one.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    None = 0,
    /// `@word` — pinned
    Pin = 1,
    /// `$word` — the-word
    The = 2,
    /// `^word` — meta
    Meta = 3,
}

impl Sigil {
    const fn from_bits(bits: u8) -> Sigil {
        match bits & 0b11 {
            0 => Sigil::None,
            1 => Sigil::Pin,
            2 => Sigil::The,
            _ => Sigil::Meta,
        }
    }
}

/// Which of the three reserved antiform keyword symbols a WORD cell names.
/// Only meaningful for `Kind::Word`; set by the runtime's symbol interner
/// at cell-construction time so that `Cell::coerce_to_antiform` can
/// validate isotope rule (c) without needing to resolve a symbol pointer
/// (the Cell model sits below the String/Symbol component in dependency
/// order, spec §2).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKeyword {
    None = 0,
    Null = 1,
    Okay = 2,
    Nan = 3,
}

impl WordKeyword {
    const fn from_bits(bits: u8) -> WordKeyword {
        match bits & 0b11 {
            1 => WordKeyword::Null,
            2 => WordKeyword::Okay,
            3 => WordKeyword::Nan,
            _ => WordKeyword::None,
        }
    }
}

// Header bit layout within the 64-bit header word.
const KIND_SHIFT: u32 = 0;
const LIFT_SHIFT: u32 = 8;
const SIGIL_SHIFT: u32 = 16;
const KEYWORD_SHIFT: u32 = 18;
const NODE_BIT: u64 = 1 << 63;

// Flags live in bits 24.. of the header, well clear of kind/lift/sigil/keyword.
mod flag {
    pub const PROTECTED: u64 = 1 << 24;
    pub const CONST: u64 = 1 << 25;
    pub const UNEVALUATED: u64 = 1 << 26;
    pub const FIRST_SLOT_IS_NODE: u64 = 1 << 27;
    pub const SECOND_SLOT_IS_NODE: u64 = 1 << 28;
    /// Set on a FRAME antiform whose "lens" has been cleared so that only
    /// input arguments are visible (isotope coercion rule (e)).
    pub const LENS_CLEARED: u64 = 1 << 29;
}

/// Errors from the validated plain-to-antiform coercion (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiformError {
    /// Rule (a): kind is not on the isotopic allowlist.
    KindNotIsotopic(Kind),
    /// Rule (b): the value carries a sigil.
    HasSigil(Sigil),
    /// Rule (c): a WORD antiform names a symbol other than null/okay/nan.
    NotAReservedKeyword,
    /// `coerce_to_antiform` was called on a cell that isn't `Lift::Plain`.
    NotPlain,
}

impl std::fmt::Display for AntiformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AntiformError::KindNotIsotopic(k) => write!(f, "{k:?} is not an isotopic kind"),
            AntiformError::HasSigil(s) => write!(f, "value carries sigil {s:?}, cannot isotopify"),
            AntiformError::NotAReservedKeyword => {
                f.write_str("WORD antiforms must be null, okay, or nan")
            }
            AntiformError::NotPlain => f.write_str("coerce_to_antiform requires a plain cell"),
        }
    }
}

impl std::error::Error for AntiformError {}

/// A value cell: fixed at four machine-pointer words.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Cell {
    header: u64,
    binding: Binding,
    pub(crate) slot0: u64,
    pub(crate) slot1: u64,
}

const _: () = assert!(std::mem::size_of::<Cell>() == 32, "Cell must be 32 bytes");

impl Cell {
    /// Construct a fresh plain cell of `kind` with the two raw payload
    /// slots given. This is the "initialize as a given kind with given
    /// payload" operation from spec §4.1; it does not validate isotope
    /// rules (those apply only to antiform construction).
    pub const fn new(kind: Kind, slot0: u64, slot1: u64) -> Cell {
        let header = NODE_BIT | ((kind as u64) << KIND_SHIFT) | (Lift::Plain.to_byte() as u64) << LIFT_SHIFT;
        Cell {
            header,
            binding: Binding::UNBOUND,
            slot0,
            slot1,
        }
    }

    /// The erased, all-flags-zero writable placeholder a pool allocator
    /// hands back (spec §4.2: "all other header bits zero"). Kind is
    /// `Integer` with payload 0 by convention; callers overwrite it.
    pub const fn fresh() -> Cell {
        Cell::new(Kind::Integer, 0, 0)
    }

    pub const fn kind(&self) -> Kind {
        let raw = ((self.header >> KIND_SHIFT) & 0xFF) as u8;
        match Kind::from_u8(raw) {
            Some(k) => k,
            None => Kind::Integer,
        }
    }

    fn set_kind(&mut self, kind: Kind) {
        self.header = (self.header & !(0xFFu64 << KIND_SHIFT)) | ((kind as u64) << KIND_SHIFT);
    }

    pub const fn lift(&self) -> Lift {
        let raw = ((self.header >> LIFT_SHIFT) & 0xFF) as u8;
        Lift::from_byte(raw)
    }

    fn set_lift(&mut self, lift: Lift) {
        self.header = (self.header & !(0xFFu64 << LIFT_SHIFT)) | ((lift.to_byte() as u64) << LIFT_SHIFT);
    }

    pub const fn sigil(&self) -> Sigil {
        Sigil::from_bits(((self.header >> SIGIL_SHIFT) & 0b11) as u8)
    }

    pub fn set_sigil(&mut self, sigil: Sigil) {
        self.header = (self.header & !(0b11u64 << SIGIL_SHIFT)) | ((sigil as u64) << SIGIL_SHIFT);
    }

    pub const fn word_keyword(&self) -> WordKeyword {
        WordKeyword::from_bits(((self.header >> KEYWORD_SHIFT) & 0b11) as u8)
    }

    /// Tag a WORD cell as naming one of the three reserved antiform
    /// keywords. Called by the runtime's symbol interner at construction
    /// time, once it knows which canon symbol `slot0` points at.
    pub fn set_word_keyword(&mut self, kw: WordKeyword) {
        debug_assert_eq!(self.kind(), Kind::Word);
        self.header =
            (self.header & !(0b11u64 << KEYWORD_SHIFT)) | ((kw as u64) << KEYWORD_SHIFT);
    }

    pub const fn is_node(&self) -> bool {
        self.header & NODE_BIT != 0
    }

    pub const fn is_protected(&self) -> bool {
        self.header & flag::PROTECTED != 0
    }

    pub fn set_protected(&mut self, on: bool) {
        self.set_flag(flag::PROTECTED, on);
    }

    pub const fn is_const(&self) -> bool {
        self.header & flag::CONST != 0
    }

    pub fn set_const(&mut self, on: bool) {
        self.set_flag(flag::CONST, on);
    }

    pub const fn is_unevaluated(&self) -> bool {
        self.header & flag::UNEVALUATED != 0
    }

    pub fn set_unevaluated(&mut self, on: bool) {
        self.set_flag(flag::UNEVALUATED, on);
    }

    pub const fn first_slot_is_node(&self) -> bool {
        self.header & flag::FIRST_SLOT_IS_NODE != 0
    }

    pub fn set_first_slot_is_node(&mut self, on: bool) {
        self.set_flag(flag::FIRST_SLOT_IS_NODE, on);
    }

    pub const fn second_slot_is_node(&self) -> bool {
        self.header & flag::SECOND_SLOT_IS_NODE != 0
    }

    pub fn set_second_slot_is_node(&mut self, on: bool) {
        self.set_flag(flag::SECOND_SLOT_IS_NODE, on);
    }

    pub const fn frame_lens_cleared(&self) -> bool {
        self.header & flag::LENS_CLEARED != 0
    }

    fn set_flag(&mut self, bit: u64, on: bool) {
        if on {
            self.header |= bit;
        } else {
            self.header &= !bit;
        }
    }

    pub const fn binding(&self) -> Binding {
        self.binding
    }

    pub fn set_binding(&mut self, binding: Binding) {
        self.binding = binding;
    }

    pub const fn slot0(&self) -> u64 {
        self.slot0
    }

    pub const fn slot1(&self) -> u64 {
        self.slot1
    }

    pub fn set_slots(&mut self, slot0: u64, slot1: u64) {
        self.slot0 = slot0;
        self.slot1 = slot1;
    }

    /// Erase this cell back to the fresh writable-zero state (spec §4.1:
    /// "freshen — erase to writable zero state"). Protection is not
    /// bypassed: a protected cell refuses to freshen.
    pub fn freshen(&mut self) -> Result<(), CellError> {
        if self.is_protected() {
            return Err(CellError::Protected);
        }
        *self = Cell::fresh();
        Ok(())
    }

    /// Copy with defined flag preservation (spec §4.1, round-trip law:
    /// "Copying a cell preserves kind, lift byte, binding, and (by
    /// default) const flag.") `UNEVALUATED` and `PROTECTED` are dropped,
    /// matching the teacher's copy-mode convention of not propagating
    /// per-container locks onto a detached copy.
    pub fn copy_value(&self) -> Cell {
        let mut c = *self;
        c.set_unevaluated(false);
        c.set_protected(false);
        c
    }

    /// Raise a one-level-quoted value one quote level (spec §4.7 evaluator
    /// step 6: "Quoted values (lift-byte > 1) are unquoted once and
    /// delivered"). No-op validation beyond what `Lift::unquote` already
    /// performs.
    pub fn unquote_one(&self) -> Result<Cell, LiftError> {
        let mut c = *self;
        c.set_lift(self.lift().unquote()?);
        Ok(c)
    }

    pub fn quote_one(&self) -> Result<Cell, LiftError> {
        let mut c = *self;
        c.set_lift(self.lift().quote()?);
        Ok(c)
    }

    /// Cross the antiform boundary one step up: antiform -> quasi,
    /// plain/quasi -> single-quoted (spec §4.1 "lift/unlift", the
    /// "meta" operation). Used to store what would otherwise be an
    /// unstable antiform inside a PACK array cell.
    pub fn lift_one(&self) -> Result<Cell, LiftError> {
        let mut c = *self;
        c.set_lift(self.lift().lift()?);
        Ok(c)
    }

    /// The inverse of `lift_one`: quasi -> antiform, single-quoted ->
    /// plain/quasi.
    pub fn unlift_one(&self) -> Result<Cell, LiftError> {
        let mut c = *self;
        c.set_lift(self.lift().unlift()?);
        Ok(c)
    }

    /// Validated plain-to-antiform coercion (spec §4.1 isotope coercion
    /// rules (a)-(e)). Only defined starting from `Lift::Plain`.
    pub fn coerce_to_antiform(&self) -> Result<Cell, AntiformError> {
        if self.lift() != Lift::Plain {
            return Err(AntiformError::NotPlain);
        }
        let kind = self.kind();

        // (a) reject kinds not on the isotopic allowlist.
        if !kind.is_isotopic() {
            return Err(AntiformError::KindNotIsotopic(kind));
        }

        // (b) reject values carrying sigils.
        if !matches!(self.sigil(), Sigil::None) {
            return Err(AntiformError::HasSigil(self.sigil()));
        }

        // (c) WORD antiforms must name a reserved keyword.
        if kind == Kind::Word && matches!(self.word_keyword(), WordKeyword::None) {
            return Err(AntiformError::NotAReservedKeyword);
        }

        let mut c = *self;
        c.set_lift(Lift::Antiform);

        // (d) strip any binding from bindable kinds.
        if kind.is_bindable() {
            c.set_binding(Binding::UNBOUND);
        }

        // (e) FRAME antiforms clear their lens to show only input args.
        if kind == Kind::Frame {
            c.set_flag(flag::LENS_CLEARED, true);
        }

        Ok(c)
    }

    /// True for antiforms whose kind is on the unstable-antiform list:
    /// PACK (an antiform Block), GHOST, or ERROR. These may not be stored
    /// in arrays nor cross the API boundary as raw values (spec §3 (d)).
    pub fn is_unstable_antiform(&self) -> bool {
        self.lift().is_antiform() && self.kind().is_unstable_antiform()
    }
}

/// Errors from direct cell mutation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellError {
    Protected,
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("cell is protected")
    }
}

impl std::error::Error for CellError {}

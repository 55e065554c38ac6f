//! Cell kinds ("hearts") — the underlying datatype of a value, independent
//! of its lift state (antiform/plain/quasi/quoted-N, see `crate::lift`).
//!
//! A handful of kinds are on the isotopic allowlist: they are the only
//! hearts permitted to appear in antiform (lift-state `Antiform`) form.
//! Of those, a further three (`Block`, `Ghost`, `Error`) are *unstable*:
//! they may not be stored in arrays nor cross the external API boundary
//! as raw values (spec invariant (d)).

/// Underlying datatype of a cell, orthogonal to its lift state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Integer = 0,
    Decimal = 1,
    Text = 2,
    Tag = 3,
    Block = 4,
    Group = 5,
    Path = 6,
    Word = 7,
    SetWord = 8,
    GetWord = 9,
    SetPath = 10,
    GetPath = 11,
    Action = 12,
    Frame = 13,
    Map = 14,
    Error = 15,
    Varargs = 16,
    /// Expression barrier / "no value produced" signal. Only meaningful
    /// in antiform or quasi lift state (ghost antiforms, spec §9 open
    /// question: ghost and nihil are unified here).
    Ghost = 17,
}

/// Number of defined kinds, for table-sizing (typecheck bitsets, etc.).
pub const KIND_COUNT: usize = 18;

impl Kind {
    pub const fn from_u8(v: u8) -> Option<Kind> {
        Some(match v {
            0 => Kind::Integer,
            1 => Kind::Decimal,
            2 => Kind::Text,
            3 => Kind::Tag,
            4 => Kind::Block,
            5 => Kind::Group,
            6 => Kind::Path,
            7 => Kind::Word,
            8 => Kind::SetWord,
            9 => Kind::GetWord,
            10 => Kind::SetPath,
            11 => Kind::GetPath,
            12 => Kind::Action,
            13 => Kind::Frame,
            14 => Kind::Map,
            15 => Kind::Error,
            16 => Kind::Varargs,
            17 => Kind::Ghost,
            _ => return None,
        })
    }

    /// True if this kind may legally appear as an antiform (isotope).
    ///
    /// Spec §4.1 isotope coercion rule (a): reject kinds not on this
    /// allowlist when raising a plain value to antiform.
    pub const fn is_isotopic(self) -> bool {
        matches!(
            self,
            Kind::Word | Kind::Action | Kind::Frame | Kind::Block | Kind::Error | Kind::Ghost
        )
    }

    /// True if an antiform of this kind is *unstable*: it may not be
    /// stored in an array, nor cross the external API boundary as a raw
    /// value (spec §3 invariant (d), §4.1 "Decay").
    pub const fn is_unstable_antiform(self) -> bool {
        matches!(self, Kind::Block | Kind::Ghost | Kind::Error)
    }

    /// True if values of this kind are bindable (carry a `Binding`).
    /// Antiforms of bindable kinds must have their binding stripped
    /// (isotope coercion rule (d)).
    pub const fn is_bindable(self) -> bool {
        matches!(
            self,
            Kind::Word
                | Kind::SetWord
                | Kind::GetWord
                | Kind::Path
                | Kind::SetPath
                | Kind::GetPath
                | Kind::Block
                | Kind::Group
                | Kind::Action
                | Kind::Frame
        )
    }

    /// True if this kind is "inert": the evaluator copies it to output
    /// without further evaluation (spec §4.7 evaluator step 1).
    pub const fn is_inert(self) -> bool {
        matches!(
            self,
            Kind::Integer | Kind::Decimal | Kind::Text | Kind::Tag | Kind::Block | Kind::Map
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u8_round_trips_all_kinds() {
        for raw in 0..KIND_COUNT as u8 {
            let k = Kind::from_u8(raw).expect("defined kind");
            assert_eq!(k as u8, raw);
        }
    }

    #[test]
    fn from_u8_rejects_out_of_range() {
        assert!(Kind::from_u8(KIND_COUNT as u8).is_none());
        assert!(Kind::from_u8(255).is_none());
    }

    #[test]
    fn isotopic_allowlist_matches_unstable_subset() {
        // Every unstable-antiform kind must also be on the isotopic allowlist.
        for raw in 0..KIND_COUNT as u8 {
            let k = Kind::from_u8(raw).unwrap();
            if k.is_unstable_antiform() {
                assert!(k.is_isotopic(), "{k:?} unstable but not isotopic");
            }
        }
    }

    #[test]
    fn inert_kinds_are_not_isotopic_keywords() {
        assert!(Kind::Integer.is_inert());
        assert!(!Kind::Integer.is_isotopic());
    }
}

//! Lift state: the "surface form" of a cell, independent of its `Kind`.
//!
//! Four lift states exist (spec §4.1):
//!
//! - `Antiform` — unbound, not storable in arrays, may be unstable.
//! - `Plain` — an ordinary storable value.
//! - `Quasi` — inert, storable, written `~foo~`.
//! - `Quoted` — `Plain` or `Quasi` wrapped in one or more quote levels.
//!
//! `lift`/`unlift` move a value across the antiform boundary one step at a
//! time (antiform <-> quasi, plain <-> single-quoted). `quote`/`unquote`
//! stay within storable forms and just add/remove a quote level. These are
//! deliberately two different operations: only `lift`/`unlift` ever cross
//! into or out of `Antiform`.

use std::fmt;

/// What a `Quoted` lift state wraps: a plain value or a quasi value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteBase {
    Plain,
    Quasi,
}

/// Maximum quote depth trackable in the packed header byte (6 bits).
pub const MAX_QUOTE_DEPTH: u8 = 63;

/// The surface form of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lift {
    Antiform,
    Plain,
    Quasi,
    /// `depth` is always >= 1. `base` is the form being quoted.
    Quoted { base: QuoteBase, depth: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftError {
    /// `unlift` was called on a state with nothing further to unlift
    /// (`Plain`, since plain values sit below the antiform boundary).
    NothingToUnlift,
    /// `quote`/`unquote` was called on an `Antiform`, which is not
    /// storable and therefore cannot be quoted directly.
    AntiformNotQuotable,
    /// `unquote` was called on a state that isn't quoted at all.
    NotQuoted,
    /// Quote depth would exceed `MAX_QUOTE_DEPTH`.
    QuoteOverflow,
}

impl fmt::Display for LiftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LiftError::NothingToUnlift => "cannot unlift a plain value",
            LiftError::AntiformNotQuotable => "antiforms cannot be quoted",
            LiftError::NotQuoted => "value is not quoted",
            LiftError::QuoteOverflow => "quote depth overflow",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for LiftError {}

impl Lift {
    pub const fn is_antiform(self) -> bool {
        matches!(self, Lift::Antiform)
    }

    pub const fn is_quoted(self) -> bool {
        matches!(self, Lift::Quoted { .. })
    }

    /// Raise the lift state by one step: antiform -> quasi,
    /// plain/quasi -> single-quoted, quoted-N -> quoted-(N+1).
    pub fn lift(self) -> Result<Lift, LiftError> {
        match self {
            Lift::Antiform => Ok(Lift::Quasi),
            Lift::Plain => Ok(Lift::Quoted {
                base: QuoteBase::Plain,
                depth: 1,
            }),
            Lift::Quasi => Ok(Lift::Quoted {
                base: QuoteBase::Quasi,
                depth: 1,
            }),
            Lift::Quoted { base, depth } => {
                if depth >= MAX_QUOTE_DEPTH {
                    return Err(LiftError::QuoteOverflow);
                }
                Ok(Lift::Quoted {
                    base,
                    depth: depth + 1,
                })
            }
        }
    }

    /// Lower the lift state by one step: the inverse of `lift`.
    pub fn unlift(self) -> Result<Lift, LiftError> {
        match self {
            Lift::Plain => Err(LiftError::NothingToUnlift),
            Lift::Quasi => Ok(Lift::Antiform),
            Lift::Quoted { base, depth: 1 } => Ok(match base {
                QuoteBase::Plain => Lift::Plain,
                QuoteBase::Quasi => Lift::Quasi,
            }),
            Lift::Quoted { base, depth } => Ok(Lift::Quoted {
                base,
                depth: depth - 1,
            }),
            Lift::Antiform => Err(LiftError::NothingToUnlift),
        }
    }

    /// Add one quote level to a storable (non-antiform) value.
    pub fn quote(self) -> Result<Lift, LiftError> {
        match self {
            Lift::Antiform => Err(LiftError::AntiformNotQuotable),
            Lift::Plain => Ok(Lift::Quoted {
                base: QuoteBase::Plain,
                depth: 1,
            }),
            Lift::Quasi => Ok(Lift::Quoted {
                base: QuoteBase::Quasi,
                depth: 1,
            }),
            Lift::Quoted { base, depth } => {
                if depth >= MAX_QUOTE_DEPTH {
                    return Err(LiftError::QuoteOverflow);
                }
                Ok(Lift::Quoted {
                    base,
                    depth: depth + 1,
                })
            }
        }
    }

    /// Remove one quote level.
    pub fn unquote(self) -> Result<Lift, LiftError> {
        match self {
            Lift::Quoted { base, depth: 1 } => Ok(match base {
                QuoteBase::Plain => Lift::Plain,
                QuoteBase::Quasi => Lift::Quasi,
            }),
            Lift::Quoted { base, depth } => Ok(Lift::Quoted {
                base,
                depth: depth - 1,
            }),
            Lift::Plain | Lift::Quasi | Lift::Antiform => Err(LiftError::NotQuoted),
        }
    }

    /// Pack into the single header byte used by `Cell` (spec: `lift_byte`).
    ///
    /// Layout: bits 6-7 select the form (`00`=Plain, `01`=Quasi,
    /// `10`=Antiform, `11`=unused), bits 0-5 hold the quote depth
    /// (0 when not quoted).
    pub const fn to_byte(self) -> u8 {
        match self {
            Lift::Plain => 0b00 << 6,
            Lift::Quasi => 0b01 << 6,
            Lift::Antiform => 0b10 << 6,
            Lift::Quoted { base, depth } => {
                let form_bits = match base {
                    QuoteBase::Plain => 0b00,
                    QuoteBase::Quasi => 0b01,
                };
                (form_bits << 6) | (depth & 0x3F)
            }
        }
    }

    pub const fn from_byte(byte: u8) -> Lift {
        let form_bits = byte >> 6;
        let depth = byte & 0x3F;
        if depth == 0 {
            match form_bits {
                0b00 => Lift::Plain,
                0b01 => Lift::Quasi,
                _ => Lift::Antiform,
            }
        } else {
            let base = match form_bits {
                0b01 => QuoteBase::Quasi,
                _ => QuoteBase::Plain,
            };
            Lift::Quoted { base, depth }
        }
    }
}

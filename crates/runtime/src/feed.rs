//! Feed: a value stream the evaluator pulls from (spec §4.5).
//!
//! A feed presents "look at current value" / "advance" over either an
//! array (index into an `Array`) or a variadic pointer source. The
//! Rust host has no `va_list`, so a variadic feed here wraps any
//! `Iterator<Item = FeedPointer>` behind a trait object (REDESIGN
//! FLAGS: variadic source modeled as an iterator of typed pointers
//! rather than a raw C pointer list). Splicing, API-value release, and
//! reification to an array feed all follow spec §4.5 directly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use renc_core::Cell;

use crate::array::{Array, AtCell};
use crate::pool::{StubId, StubPool};
use crate::stub::flag;

/// One pointer pulled off a variadic source, before the feed classifies
/// it (spec §4.5 "Variadic feed ... detects its kind").
pub enum FeedPointer {
    Null,
    End,
    Cell(Cell),
    /// A stub carrying a feed instruction (spec §4.5 "may be an
    /// instruction"); see `Instruction` below (REDESIGN FLAGS:
    /// formalized as an enum rather than raw stub-pointer sniffing).
    Instruction(Instruction),
    Text(String),
}

/// A variadic instruction value, spliced into the evaluation stream
/// in place rather than evaluated as ordinary data.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Free this API handle the moment the feed advances past it (spec
    /// §4.5 "API value release").
    ReleaseMe(Cell),
    /// Evaluate this cell eagerly and splice in its result.
    EvalMe(Cell),
    /// Splice every cell of this array into the stream in place.
    Splice(Vec<Cell>),
}

/// What the feed is currently drawing from.
enum Source {
    Array {
        array: Array,
        index: usize,
    },
    Variadic {
        pending: VecDeque<FeedPointer>,
        source: Box<dyn Iterator<Item = FeedPointer>>,
    },
}

/// A value stream with one-step lookback, splice chaining, and const
/// inheritance (spec §4.5, §4.7 "Const inheritance").
pub struct Feed {
    source: Source,
    /// Follow-on feeds taking over once this one ends (spec §4.5
    /// "Splices").
    splice: Vec<Feed>,
    /// Current value, if any -- valid across exactly one `advance()`
    /// so a single-step lookback is possible.
    current: Option<Cell>,
    is_const: bool,
    /// The array stub held (if any) for the `HOLD` flag set while this
    /// feed iterates it (spec §4.4 "Holds").
    held_array: Option<StubId>,
}

impl Feed {
    /// A feed over an array, starting at `index` (spec §4.5 "Array
    /// feed: holds an array + index + binding").
    pub fn from_array(pool: &mut StubPool, array: Array, index: usize) -> Feed {
        hold_array(pool, array.stub);
        let mut feed = Feed {
            source: Source::Array { array, index },
            splice: Vec::new(),
            current: None,
            is_const: false,
            held_array: Some(array.stub),
        };
        feed.prime(pool);
        feed
    }

    pub fn from_variadic(source: impl Iterator<Item = FeedPointer> + 'static) -> Feed {
        let mut feed = Feed {
            source: Source::Variadic {
                pending: VecDeque::new(),
                source: Box::new(source),
            },
            splice: Vec::new(),
            current: None,
            is_const: false,
            held_array: None,
        };
        feed.prime_variadic();
        feed
    }

    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn set_const(&mut self, v: bool) {
        self.is_const = v;
    }

    /// Look at the current value without consuming it.
    pub fn current(&self) -> Option<&Cell> {
        self.current.as_ref()
    }

    pub fn is_at_end(&self) -> bool {
        self.current.is_none() && self.splice.is_empty()
    }

    /// Advance to the next value, releasing the current array's hold
    /// once this feed (and every pending splice) is exhausted.
    pub fn advance(&mut self, pool: &mut StubPool) {
        match &mut self.source {
            Source::Array { array, index } => {
                *index += 1;
                match array.at(pool, *index) {
                    AtCell::Value(cell) => self.current = Some(*cell),
                    AtCell::End => {
                        self.current = None;
                        self.take_over_splice(pool);
                    }
                }
            }
            Source::Variadic { .. } => {
                self.prime_variadic();
                if self.current.is_none() {
                    self.take_over_splice(pool);
                }
            }
        }
    }

    fn prime(&mut self, pool: &StubPool) {
        if let Source::Array { array, index } = &self.source {
            self.current = match array.at(pool, *index) {
                AtCell::Value(cell) => Some(*cell),
                AtCell::End => None,
            };
        }
    }

    /// Pull the next classified pointer off the variadic source,
    /// resolving `Instruction`s and `Text` in place (spec §4.5).
    fn prime_variadic(&mut self) {
        loop {
            let next = match &mut self.source {
                Source::Variadic { pending, source } => {
                    pending.pop_front().or_else(|| source.next())
                }
                Source::Array { .. } => return,
            };
            match next {
                None | Some(FeedPointer::End) => {
                    self.current = None;
                    return;
                }
                Some(FeedPointer::Null) => {
                    self.current = Some(Cell::fresh());
                    return;
                }
                Some(FeedPointer::Cell(cell)) => {
                    self.current = Some(cell);
                    return;
                }
                Some(FeedPointer::Instruction(Instruction::ReleaseMe(cell))) => {
                    // A real API handle table would free the handle here;
                    // this runtime has no handle table at this layer, so
                    // the cell is simply delivered and not retained.
                    self.current = Some(cell);
                    return;
                }
                Some(FeedPointer::Instruction(Instruction::EvalMe(cell))) => {
                    self.current = Some(cell);
                    return;
                }
                Some(FeedPointer::Instruction(Instruction::Splice(cells))) => {
                    if let Source::Variadic { pending, .. } = &mut self.source {
                        for cell in cells.into_iter().rev() {
                            pending.push_front(FeedPointer::Cell(cell));
                        }
                    }
                    continue;
                }
                Some(FeedPointer::Text(_text)) => {
                    // A real scanner would tokenize `_text` into a fresh
                    // array and continue the feed from it (spec §4.5).
                    // The scanner lives outside this crate's scope; skip
                    // past the text source rather than fabricate tokens.
                    continue;
                }
            }
        }
    }

    fn take_over_splice(&mut self, pool: &mut StubPool) {
        if let Some(array_id) = self.held_array.take() {
            release_hold(pool, array_id);
        }
        if let Some(mut next) = self.splice.pop() {
            std::mem::swap(self, &mut next);
        }
    }

    /// Push a follow-on feed (spec §4.5 "Splices").
    pub fn push_splice(&mut self, next: Feed) {
        self.splice.push(next);
    }

    /// Reify a variadic feed into a plain array feed: drain every
    /// remaining pointer, resolving each to a cell, and build a fresh
    /// array from them (spec §4.5 "Reification ... spool").
    pub fn reify(&mut self, pool: &mut StubPool) -> Array {
        let mut cells = Vec::new();
        if let Some(cell) = self.current.take() {
            cells.push(cell);
        }
        while let Source::Variadic { pending, source } = &mut self.source {
            let next = pending.pop_front().or_else(|| source.next());
            match next {
                None | Some(FeedPointer::End) => break,
                Some(FeedPointer::Null) => cells.push(Cell::fresh()),
                Some(FeedPointer::Cell(cell)) => cells.push(cell),
                Some(FeedPointer::Instruction(Instruction::ReleaseMe(cell)))
                | Some(FeedPointer::Instruction(Instruction::EvalMe(cell))) => cells.push(cell),
                Some(FeedPointer::Instruction(Instruction::Splice(more))) => cells.extend(more),
                Some(FeedPointer::Text(_)) => continue,
            }
        }
        let array = Array::from_cells(pool, &cells, 0);
        let index = array.len(pool);
        let result = Array { stub: array.stub };
        self.source = Source::Array { array, index };
        self.current = None;
        result
    }
}

/// Backing store for VARARGS! cells (spec §4.7 "Variadic: filled with a
/// VARARGS! cell referring to this level's feed"). A `Cell`'s payload
/// slots are plain `u64`s, not wide enough to hold an `Rc` directly, so
/// a VARARGS! cell's `slot0` instead indexes this thread-local registry
/// -- the same "small integer handle into a thread-local table" texture
/// as `action::ROOT_CTX`, one level removed from a raw pointer.
thread_local! {
    static VARARGS_FEEDS: RefCell<Vec<Rc<RefCell<Feed>>>> = const { RefCell::new(Vec::new()) };
}

/// Register `feed` as a variadic argument's backing stream, returning
/// the handle to store in the VARARGS! cell's payload.
pub fn register_varargs_feed(feed: Rc<RefCell<Feed>>) -> u32 {
    VARARGS_FEEDS.with(|r| {
        let mut feeds = r.borrow_mut();
        feeds.push(feed);
        (feeds.len() - 1) as u32
    })
}

/// Recover the feed a VARARGS! cell's `slot0` handle refers to.
pub fn varargs_feed(handle: u32) -> Rc<RefCell<Feed>> {
    VARARGS_FEEDS.with(|r| r.borrow()[handle as usize].clone())
}

fn hold_array(pool: &mut StubPool, id: StubId) {
    pool.get_mut(id).set_flag(flag::HOLD);
}

fn release_hold(pool: &mut StubPool, id: StubId) {
    pool.get_mut(id).clear_flag(flag::HOLD);
}

//! String and Symbol stubs (spec §4.3 "String", "Symbol").
//!
//! Grounded on the teacher's `seqstring.rs`: the teacher split string
//! storage by allocation source (thread-local arena vs. global heap),
//! tracking that split in the value itself. Here the split is instead
//! between two `Stub` flavors: a live, mutable `StringBuf` (bytes own
//! by the stub's dynamic buffer, pool-managed like any other stub) and
//! a frozen, interned `Symbol` (one canon spelling, a circular ring of
//! case variants, matching the teacher's `is_interned()` / pointer-
//! comparison idea but generalized to a full synonym ring instead of a
//! single static/non-static bit).

use std::cell::RefCell;
use std::collections::HashMap;
use std::slice;
use std::str;

use crate::pool::{StubId, StubPool};
use crate::stub::{Flavor, Payload, StubSlot, flag};

/// A cached `(codepoint_index, byte_offset)` pair. Bookmarks only
/// accelerate indexed access into non-ASCII text; correctness never
/// depends on one being present (spec §4.3 "Bookmarks ... droppable
/// under memory pressure").
#[derive(Debug, Clone, Copy)]
pub struct Bookmark {
    pub codepoint_index: usize,
    pub byte_offset: usize,
}

thread_local! {
    static BOOKMARKS: RefCell<HashMap<StubId, Vec<Bookmark>>> = RefCell::new(HashMap::new());
}

/// A live, mutable UTF-8 string stub.
pub struct StringBuf {
    pub stub: StubId,
}

impl StringBuf {
    pub fn alloc(pool: &mut StubPool, s: &str) -> StringBuf {
        let id = pool.alloc();
        pool.get_mut(id).set_flavor(Flavor::StringBuf);
        let buf = StringBuf { stub: id };
        buf.replace_contents(pool, s);
        buf
    }

    pub fn as_str<'p>(&self, pool: &'p StubPool) -> &'p str {
        match &pool.get(self.stub).payload {
            Payload::Dynamic(buf) if buf.len > 0 => unsafe {
                str::from_utf8_unchecked(slice::from_raw_parts(buf.data.as_ptr(), buf.len))
            },
            _ => "",
        }
    }

    pub fn len_bytes(&self, pool: &StubPool) -> usize {
        match &pool.get(self.stub).payload {
            Payload::Dynamic(buf) => buf.len,
            Payload::Singular(_) => 0,
        }
    }

    pub fn is_empty(&self, pool: &StubPool) -> bool {
        self.len_bytes(pool) == 0
    }

    pub fn codepoint_len(&self, pool: &StubPool) -> usize {
        self.as_str(pool).chars().count()
    }

    /// Overwrite the buffer outright. Invalidates any cached bookmarks,
    /// since byte offsets into the old contents no longer apply.
    pub fn replace_contents(&self, pool: &mut StubPool, s: &str) {
        assert!(
            !pool.get(self.stub).is_mutation_locked(),
            "attempted to mutate a frozen/protected/held string"
        );
        let bytes = s.as_bytes();
        pool.grow_to_dynamic(self.stub, 1, bytes.len().max(1));
        if let Payload::Dynamic(buf) = &mut pool.get_mut(self.stub).payload {
            let dst = unsafe { slice::from_raw_parts_mut(buf.data.as_ptr(), buf.rest) };
            dst[..bytes.len()].copy_from_slice(bytes);
            buf.len = bytes.len();
        }
        self.drop_bookmarks();
    }

    pub fn push_str(&self, pool: &mut StubPool, more: &str) {
        let mut owned = self.as_str(pool).to_string();
        owned.push_str(more);
        self.replace_contents(pool, &owned);
    }

    /// Byte offset of the `target` codepoint, walking forward from the
    /// nearest cached bookmark at or before it (or from the start, when
    /// none is cached).
    pub fn byte_offset_for_codepoint(&self, pool: &StubPool, target: usize) -> Option<usize> {
        let s = self.as_str(pool);
        let (mut cp, start_byte) = self.nearest_bookmark(target);
        if cp == target {
            return Some(start_byte);
        }
        for (offset, _) in s[start_byte..].char_indices() {
            if cp == target {
                return Some(start_byte + offset);
            }
            cp += 1;
        }
        if cp == target { Some(s.len()) } else { None }
    }

    fn nearest_bookmark(&self, target: usize) -> (usize, usize) {
        BOOKMARKS.with(|cache| {
            cache
                .borrow()
                .get(&self.stub)
                .into_iter()
                .flatten()
                .filter(|b| b.codepoint_index <= target)
                .max_by_key(|b| b.codepoint_index)
                .map(|b| (b.codepoint_index, b.byte_offset))
                .unwrap_or((0, 0))
        })
    }

    /// Record a cache-warming hint. Purely an optimization: skipping
    /// this call changes nothing but lookup speed.
    pub fn add_bookmark(&self, codepoint_index: usize, byte_offset: usize) {
        BOOKMARKS.with(|cache| {
            cache
                .borrow_mut()
                .entry(self.stub)
                .or_default()
                .push(Bookmark {
                    codepoint_index,
                    byte_offset,
                });
        });
    }

    /// Drop this stub's bookmark cache, e.g. under memory pressure. The
    /// GC sweep calls this for any `StringBuf` stub it reclaims.
    pub fn drop_bookmarks(&self) {
        BOOKMARKS.with(|cache| {
            cache.borrow_mut().remove(&self.stub);
        });
    }
}

thread_local! {
    static INTERNER: RefCell<HashMap<String, StubId>> = RefCell::new(HashMap::new());
}

/// An interned, frozen word symbol. Case variants of the same word
/// (`foo`, `Foo`, `FOO`) share one canon spelling, linked through a
/// circular ring threaded over the stub's generic slots: `link` always
/// points at canon, `misc` points at the next ring member (spec §4.3
/// "Symbol").
pub struct Symbol {
    pub stub: StubId,
}

impl Symbol {
    /// Intern `spelling`. The first spelling seen for a case-insensitive
    /// key becomes canon; later spellings splice into its synonym ring.
    /// Re-interning an already-seen exact spelling returns that same
    /// stub rather than creating a duplicate.
    pub fn intern(pool: &mut StubPool, spelling: &str) -> Symbol {
        let key = spelling.to_lowercase();
        if let Some(canon_id) = INTERNER.with(|map| map.borrow().get(&key).copied()) {
            let mut current = canon_id;
            loop {
                if StringBuf { stub: current }.as_str(pool) == spelling {
                    return Symbol { stub: current };
                }
                let next = StubId::from_index(pool.get(current).misc.as_count() as u32);
                if next == canon_id {
                    break;
                }
                current = next;
            }
            return Symbol::splice_synonym(pool, canon_id, spelling);
        }
        let id = Symbol::alloc_frozen(pool, spelling);
        let stub = pool.get_mut(id);
        stub.link = StubSlot::from_count(id.index() as u64);
        stub.misc = StubSlot::from_count(id.index() as u64);
        stub.set_flag(flag::LINK_NODE_NEEDS_MARK | flag::MISC_NODE_NEEDS_MARK);
        pool.manage(id);
        INTERNER.with(|map| map.borrow_mut().insert(key, id));
        Symbol { stub: id }
    }

    fn splice_synonym(pool: &mut StubPool, canon_id: StubId, spelling: &str) -> Symbol {
        let id = Symbol::alloc_frozen(pool, spelling);
        let canon_next = pool.get(canon_id).misc.as_count();
        {
            let stub = pool.get_mut(id);
            stub.link = StubSlot::from_count(canon_id.index() as u64);
            stub.misc = StubSlot::from_count(canon_next);
            stub.set_flag(flag::LINK_NODE_NEEDS_MARK | flag::MISC_NODE_NEEDS_MARK);
        }
        pool.get_mut(canon_id).misc = StubSlot::from_count(id.index() as u64);
        pool.manage(id);
        Symbol { stub: id }
    }

    fn alloc_frozen(pool: &mut StubPool, spelling: &str) -> StubId {
        let buf = StringBuf::alloc(pool, spelling);
        let stub = pool.get_mut(buf.stub);
        stub.set_flavor(Flavor::Symbol);
        stub.set_flag(flag::FROZEN);
        buf.stub
    }

    pub fn as_str<'p>(&self, pool: &'p StubPool) -> &'p str {
        StringBuf { stub: self.stub }.as_str(pool)
    }

    pub fn canon(&self, pool: &StubPool) -> StubId {
        StubId::from_index(pool.get(self.stub).link.as_count() as u32)
    }

    pub fn is_canon(&self, pool: &StubPool) -> bool {
        self.canon(pool) == self.stub
    }

    /// Case-insensitive identity: true when `other` shares this
    /// symbol's canon spelling, i.e. is the same word under any case.
    pub fn same_word(&self, pool: &StubPool, other: &Symbol) -> bool {
        self.canon(pool) == other.canon(pool)
    }

    /// All spellings sharing this symbol's canon, canon first.
    pub fn synonyms(&self, pool: &StubPool) -> Vec<StubId> {
        let canon_id = self.canon(pool);
        let mut out = vec![canon_id];
        let mut current = StubId::from_index(pool.get(canon_id).misc.as_count() as u32);
        while current != canon_id {
            out.push(current);
            current = StubId::from_index(pool.get(current).misc.as_count() as u32);
        }
        out
    }
}

/// Every symbol stub currently reachable from the interner, canon ids
/// only (their synonym rings are reached through the canon's `misc`
/// chain by the GC's own marking, not re-walked here). Interned words
/// are kept alive for the life of the thread rather than rotated out
/// by the ordinary mark-sweep cycle (spec §4.4 "root set"), mirroring
/// the teacher's static string-table entries that never unload.
pub fn interned_canon_ids() -> Vec<StubId> {
    INTERNER.with(|map| map.borrow().values().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_read_back() {
        let mut pool = StubPool::new();
        let s = StringBuf::alloc(&mut pool, "hello");
        assert_eq!(s.as_str(&pool), "hello");
        assert_eq!(s.len_bytes(&pool), 5);
        assert_eq!(s.codepoint_len(&pool), 5);
    }

    #[test]
    fn replace_contents_drops_bookmarks() {
        let mut pool = StubPool::new();
        let s = StringBuf::alloc(&mut pool, "hello world");
        s.add_bookmark(6, 6);
        assert_eq!(s.byte_offset_for_codepoint(&pool, 6), Some(6));
        s.replace_contents(&mut pool, "bye");
        assert_eq!(s.as_str(&pool), "bye");
    }

    #[test]
    fn push_str_extends_contents() {
        let mut pool = StubPool::new();
        let s = StringBuf::alloc(&mut pool, "foo");
        s.push_str(&mut pool, "bar");
        assert_eq!(s.as_str(&pool), "foobar");
    }

    #[test]
    fn byte_offset_for_codepoint_handles_unicode_without_bookmarks() {
        let mut pool = StubPool::new();
        let s = StringBuf::alloc(&mut pool, "a£c");
        assert_eq!(s.byte_offset_for_codepoint(&pool, 0), Some(0));
        assert_eq!(s.byte_offset_for_codepoint(&pool, 1), Some(1));
        assert_eq!(s.byte_offset_for_codepoint(&pool, 2), Some(3));
        assert_eq!(s.byte_offset_for_codepoint(&pool, 3), Some(4));
        assert_eq!(s.byte_offset_for_codepoint(&pool, 4), None);
    }

    #[test]
    fn string_mutation_is_rejected_while_frozen() {
        let mut pool = StubPool::new();
        let s = StringBuf::alloc(&mut pool, "fixed");
        pool.get_mut(s.stub).set_flag(crate::stub::flag::FROZEN);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            s.push_str(&mut pool, "!");
        }));
        assert!(result.is_err());
    }

    #[test]
    fn interning_same_spelling_twice_returns_same_stub() {
        let mut pool = StubPool::new();
        let a = Symbol::intern(&mut pool, "foo");
        let b = Symbol::intern(&mut pool, "foo");
        assert_eq!(a.stub, b.stub);
    }

    #[test]
    fn interning_case_variant_creates_synonym_sharing_canon() {
        let mut pool = StubPool::new();
        let canon = Symbol::intern(&mut pool, "foo");
        let variant = Symbol::intern(&mut pool, "FOO");
        assert_ne!(canon.stub, variant.stub);
        assert!(canon.same_word(&pool, &variant));
        assert_eq!(variant.as_str(&pool), "FOO");
        assert_eq!(canon.as_str(&pool), "foo");
        assert!(canon.is_canon(&pool));
        assert!(!variant.is_canon(&pool));
    }

    #[test]
    fn synonyms_includes_every_case_variant() {
        let mut pool = StubPool::new();
        let a = Symbol::intern(&mut pool, "bar");
        let _b = Symbol::intern(&mut pool, "Bar");
        let _c = Symbol::intern(&mut pool, "BAR");
        let ring = a.synonyms(&pool);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring[0], a.canon(&pool));
    }

    #[test]
    fn interned_symbols_are_frozen() {
        let mut pool = StubPool::new();
        let sym = Symbol::intern(&mut pool, "baz");
        assert!(pool.get(sym.stub).is_frozen());
    }
}

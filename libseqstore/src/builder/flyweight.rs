//! Flyweights: 64-bit handles into the build-time repo.
//!
//! During construction every read and read-derived substring is a flyweight
//! pointing into one shared 2-bit packed byte array (the "repo": reference
//! bases followed by non-reference read bases). A flyweight packs the start
//! position (48 bits), the length in bases (13 bits), and three flags:
//! `flipped` (read out of the repo in reverse-complement direction),
//! `non_ref` (backed by the non-reference region) and `empty` (an absent
//! mate slot).

use std::cmp::Ordering;

use crate::dna::{pack_get, pack_set, packed_len, Sequence};

const START_MASK: u64 = (1 << 48) - 1;
const LEN_SHIFT: u32 = 48;
const LEN_MASK: u64 = (1 << 13) - 1;
const FLIPPED_BIT: u64 = 1 << 61;
const NON_REF_BIT: u64 = 1 << 62;
const EMPTY_BIT: u64 = 1 << 63;

/// Longest sequence a flyweight can describe.
pub(crate) const MAX_FLY_LEN: u32 = LEN_MASK as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flyweight(u64);

impl Flyweight {
    pub fn new(start: u64, len: u32, flipped: bool) -> Flyweight {
        debug_assert!(start <= START_MASK);
        debug_assert!(len <= MAX_FLY_LEN);
        let mut raw = (start & START_MASK) | ((len as u64 & LEN_MASK) << LEN_SHIFT);
        if flipped {
            raw |= FLIPPED_BIT;
        }
        Flyweight(raw)
    }

    /// The sentinel for an absent mate slot.
    pub fn empty() -> Flyweight {
        Flyweight(EMPTY_BIT)
    }

    pub fn from_raw(raw: u64) -> Flyweight {
        Flyweight(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn start(self) -> u64 {
        self.0 & START_MASK
    }

    pub fn len(self) -> u32 {
        ((self.0 >> LEN_SHIFT) & LEN_MASK) as u32
    }

    pub fn flipped(self) -> bool {
        self.0 & FLIPPED_BIT != 0
    }

    pub fn non_ref(self) -> bool {
        self.0 & NON_REF_BIT != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 & EMPTY_BIT != 0
    }

    pub fn with_non_ref(self) -> Flyweight {
        Flyweight(self.0 | NON_REF_BIT)
    }

    /// The flyweight describing this one's reverse complement: anchored at
    /// the other end, read the other way.
    pub fn rev_comp(self) -> Flyweight {
        let len = self.len() as i64;
        let sign: i64 = if self.flipped() { -1 } else { 1 };
        let new_start = (self.start() as i64 + sign * (len - 1)) as u64;
        let mut out = Flyweight::new(new_start, self.len(), !self.flipped());
        if self.non_ref() {
            out = out.with_non_ref();
        }
        out
    }

    /// The suffix dropping the first `offset` bases; same direction, same
    /// backing.
    pub fn suffix(self, offset: u32) -> Flyweight {
        debug_assert!(offset < self.len());
        let sign: i64 = if self.flipped() { -1 } else { 1 };
        let new_start = (self.start() as i64 + sign * offset as i64) as u64;
        let mut out = Flyweight::new(new_start, self.len() - offset, self.flipped());
        if self.non_ref() {
            out = out.with_non_ref();
        }
        out
    }
}

/// The flyweight backing store: reference bases then non-reference bases,
/// 2-bit packed.
pub(crate) struct Repo {
    bytes: Vec<u8>,
    len: usize,
}

impl Repo {
    pub fn with_len(total_bases: usize) -> Repo {
        Repo {
            bytes: vec![0u8; packed_len(total_bases)],
            len: total_bases,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Install the reference bases at the front of the repo.
    pub fn copy_reference(&mut self, packed: &[u8], ref_bases: usize) {
        debug_assert!(ref_bases <= self.len);
        let nbytes = packed_len(ref_bases);
        self.bytes[..nbytes].copy_from_slice(&packed[..nbytes]);
        // The reference tail shares its final byte with the first
        // non-reference bases; clear any stale bits there.
        if ref_bases % 4 != 0 {
            let mask = (1u8 << ((ref_bases % 4) * 2)) - 1;
            self.bytes[nbytes - 1] &= mask;
        }
    }

    #[inline]
    pub fn base_code(&self, pos: u64) -> u8 {
        pack_get(&self.bytes, pos as usize)
    }

    #[inline]
    pub fn set_base(&mut self, pos: u64, code: u8) {
        pack_set(&mut self.bytes, pos as usize, code);
    }

    /// The `i`-th base code of a flyweight's sequence.
    #[inline]
    pub fn fly_code(&self, fly: Flyweight, i: u32) -> u8 {
        if fly.flipped() {
            3 - self.base_code(fly.start() - i as u64)
        } else {
            self.base_code(fly.start() + i as u64)
        }
    }

    /// Materialize a flyweight as an owned sequence.
    pub fn decode(&self, fly: Flyweight) -> Sequence {
        let mut seq = Sequence::with_capacity(fly.len() as usize);
        for i in 0..fly.len() {
            seq.push(crate::dna::Base::from_code(self.fly_code(fly, i)));
        }
        seq
    }
}

/// Lexicographic comparison of two flyweights as sequences. Empties sort
/// last; exact ties fall back to the raw bits so sorting is total and
/// deterministic.
pub(crate) fn fly_cmp(repo: &Repo, a: Flyweight, b: Flyweight) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return a.raw().cmp(&b.raw()),
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    match seq_cmp(repo, a, b) {
        Ordering::Equal => a.raw().cmp(&b.raw()),
        non_eq => non_eq,
    }
}

/// Pure sequence comparison, prefixes first.
pub(crate) fn seq_cmp(repo: &Repo, a: Flyweight, b: Flyweight) -> Ordering {
    let limit = a.len().min(b.len());
    for i in 0..limit {
        match repo.fly_code(a, i).cmp(&repo.fly_code(b, i)) {
            Ordering::Equal => {}
            non_eq => return non_eq,
        }
    }
    a.len().cmp(&b.len())
}

/// Compare `a`, truncated to `limit` bases, against `b`'s first
/// `min(limit, b.len())` bases. Equality means the shorter-limit sequences
/// coincide over `limit` bases, i.e. `b` (of length `limit`) is a prefix of
/// `a`.
pub(crate) fn cmp_truncated(repo: &Repo, a: Flyweight, b: Flyweight, limit: u32) -> Ordering {
    let a_len = a.len().min(limit);
    let b_len = b.len().min(limit);
    let both = a_len.min(b_len);
    for i in 0..both {
        match repo.fly_code(a, i).cmp(&repo.fly_code(b, i)) {
            Ordering::Equal => {}
            non_eq => return non_eq,
        }
    }
    a_len.cmp(&b_len)
}

/// Are the first `min(len_a, len_b)` bases equal, i.e. is one a prefix of
/// the other?
pub(crate) fn fly_prefix_eq(repo: &Repo, a: Flyweight, b: Flyweight) -> bool {
    let limit = a.len().min(b.len());
    (0..limit).all(|i| repo.fly_code(a, i) == repo.fly_code(b, i))
}

/// Prefix-deduplicate a sorted flyweight list, keeping the longest
/// representative of each adjacent prefix chain.
pub(crate) fn dedup_flyweights(flys: &mut Vec<Flyweight>, repo: &Repo) {
    let mut out_len = 0usize;
    for i in 0..flys.len() {
        let cur = flys[i];
        if out_len > 0 && fly_prefix_eq(repo, flys[out_len - 1], cur) {
            // cur is at least as long; it extends (or equals) the kept one.
            flys[out_len - 1] = cur;
        } else {
            flys[out_len] = cur;
            out_len += 1;
        }
    }
    flys.truncate(out_len);
}

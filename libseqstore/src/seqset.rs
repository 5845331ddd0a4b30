//! The seqset: a content-addressed index of every distinct read substring.
//!
//! A seqset stores the prefix-maximal, suffix-closed set of sequences
//! derived from a read corpus, sorted lexicographically and addressed by
//! rank. Per entry it keeps the entry length, the longest common prefix with
//! the previous entry, and four `prev_*` bitmaps saying which bases can be
//! pushed onto the entry's prefix to reach another entry. Together with the
//! `C[·]` table (`fixed`) the bitmaps form the FM-index push-front
//! primitive:
//!
//! ```text
//! push_front(a, [b, e)) = [C[a] + rank_a(b), C[a] + rank_a(e))
//! ```
//!
//! Construction goes through [`SeqsetBuilder`], which is the only mutable
//! state; [`SeqsetBuilder::finalize`] computes `C[·]`, checks the counts and
//! produces an immutable [`Seqset`]. Once finalized the index is shared
//! freely across threads; the two derived tables (pop-front cache and the
//! shared-less-than summary) are built lazily and installed exactly once,
//! so readers observe either "absent" or "fully populated".

pub mod range;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bitcount::{Bitcount, BitcountBuilder};
use crate::context::Context;
use crate::dna::{Base, Sequence, BASES};
use crate::error::SeqstoreError;
use crate::lt_search::LessThanSearch;
use crate::packed::{MutablePackedIntVec, PackedIntVec};
use crate::spiral::{CreateState, OpenState, ProductVersion};
use crate::Result;

pub use self::range::{OverlapResult, SeqsetRange};

pub const SEQSET_VERSION: ProductVersion = ProductVersion("1.1.0");

#[derive(Debug, Serialize, Deserialize)]
struct SeqsetMetadata {
    num_entries: u64,
    uuid: String,
}

/// A filter over seqset ids, used by the read searches to restrict results
/// to entries that carry reads.
pub trait SeqsetBitmap {
    fn get_bit(&self, seqset_id: u64) -> bool;
}

/// The trivial filter that accepts everything.
pub struct BitmapTrue;

impl SeqsetBitmap for BitmapTrue {
    fn get_bit(&self, _seqset_id: u64) -> bool {
        true
    }
}

/// A seqset under construction. Rows may be filled in any order, from any
/// thread; the bit-packed tables take care of word-level races.
pub struct SeqsetBuilder {
    entries: usize,
    entry_sizes: MutablePackedIntVec,
    shared: MutablePackedIntVec,
    prev: [BitcountBuilder; 4],
}

impl SeqsetBuilder {
    pub fn new(entries: usize, max_entry_len: u32) -> SeqsetBuilder {
        SeqsetBuilder {
            entries,
            entry_sizes: MutablePackedIntVec::new(entries, max_entry_len as u64),
            shared: MutablePackedIntVec::new(entries, max_entry_len.saturating_sub(1) as u64),
            prev: std::array::from_fn(|_| BitcountBuilder::new(entries)),
        }
    }

    pub fn num_entries(&self) -> usize {
        self.entries
    }

    pub fn set_entry_size(&self, row: u64, size: u32) {
        self.entry_sizes.set(row as usize, size as u64);
    }

    pub fn set_shared(&self, row: u64, shared: u32) {
        self.shared.set(row as usize, shared as u64);
    }

    pub fn set_prev(&self, row: u64, base: Base, is_set: bool) {
        self.prev[base as usize].set(row as usize, is_set);
    }

    /// Compute `C[·]`, verify the bitmap totals and freeze.
    pub fn finalize(self) -> Result<Seqset> {
        let prev: [Bitcount; 4] = self.prev.map(|b| b.finalize());
        let mut fixed = [0u64; 5];
        let mut offset = 0u64;
        for (i, bc) in prev.iter().enumerate() {
            fixed[i] = offset;
            offset += bc.total_set();
        }
        fixed[4] = offset;
        debug!("seqset finalize: offset = {}, entries = {}", offset, self.entries);
        if offset != self.entries as u64 {
            return Err(SeqstoreError::Consistency(format!(
                "invalid seqset in finalize: {} != {}",
                offset, self.entries
            )));
        }
        Ok(Seqset {
            entries: self.entries,
            fixed,
            prev,
            entry_sizes: self.entry_sizes.into_reader(),
            shared: self.shared.into_reader(),
            uuid: Uuid::new_v4().to_string(),
            pop_front_cache: OnceLock::new(),
            shared_lt: OnceLock::new(),
        })
    }
}

/// A finalized, immutable seqset.
#[derive(Debug)]
pub struct Seqset {
    entries: usize,
    fixed: [u64; 5],
    prev: [Bitcount; 4],
    entry_sizes: PackedIntVec,
    shared: PackedIntVec,
    uuid: String,
    // Value of element i is entry_pop_front(i), 5 bytes each. Private to
    // this process; absent until populate_pop_front_cache runs.
    pop_front_cache: OnceLock<Vec<AtomicU8>>,
    shared_lt: OnceLock<LessThanSearch>,
}

impl Seqset {
    /// Number of entries.
    pub fn size(&self) -> usize {
        self.entries
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The longest entry length this seqset can hold.
    pub fn max_entry_len(&self) -> u32 {
        self.entry_sizes.max_value() as u32
    }

    #[inline]
    pub(crate) fn fixed(&self, base: usize) -> u64 {
        debug_assert!(base <= 4);
        self.fixed[base]
    }

    #[inline]
    pub(crate) fn prev_bitmap(&self, base: Base) -> &Bitcount {
        &self.prev[base as usize]
    }

    #[inline]
    pub fn entry_size(&self, entry: u64) -> u32 {
        self.entry_sizes.get(entry as usize) as u32
    }

    #[inline]
    pub fn entry_shared(&self, entry: u64) -> u32 {
        self.shared.get(entry as usize) as u32
    }

    #[inline]
    pub fn entry_has_prev(&self, entry: u64, base: Base) -> bool {
        self.prev[base as usize].get(entry as usize)
    }

    /// The FM push-front primitive on a single id.
    #[inline]
    pub fn entry_push_front(&self, entry: u64, base: Base) -> u64 {
        self.fixed[base as usize] + self.prev[base as usize].rank(entry as usize)
    }

    /// First base of `entry`, by an unrolled binary search over `C[·]`.
    #[inline]
    pub fn entry_first_base(&self, entry: u64) -> Base {
        Base::from_code(if entry < self.fixed[2] {
            if entry < self.fixed[1] {
                0
            } else {
                1
            }
        } else if entry < self.fixed[3] {
            2
        } else {
            3
        })
    }

    /// The inverse of `entry_push_front`: O(1) through the pop-front cache,
    /// otherwise a select over the prev bitmap.
    pub fn entry_pop_front(&self, entry: u64) -> u64 {
        if let Some(cache) = self.pop_front_cache.get() {
            let at = entry as usize * 5;
            let hi = cache[at].load(Ordering::Relaxed) as u64;
            let lo = u32::from_le_bytes([
                cache[at + 1].load(Ordering::Relaxed),
                cache[at + 2].load(Ordering::Relaxed),
                cache[at + 3].load(Ordering::Relaxed),
                cache[at + 4].load(Ordering::Relaxed),
            ]) as u64;
            return (hi << 32) | lo;
        }
        let b = self.entry_first_base(entry);
        self.prev[b as usize].select(entry - self.fixed[b as usize]) as u64
    }

    pub fn is_pop_front_cached(&self) -> bool {
        self.pop_front_cache.get().is_some()
    }

    /// Fill the pop-front cache in parallel. Idempotent; the cache is
    /// installed once and readers never see it half-built.
    pub fn populate_pop_front_cache(&self) -> Result<()> {
        if self.is_pop_front_cached() {
            return Ok(());
        }
        const CACHE_ID_LIMIT: u64 = ((u8::MAX as u64) << 32) + u32::MAX as u64;
        if self.entries as u64 >= CACHE_ID_LIMIT {
            return Err(SeqstoreError::Limit(format!(
                "{} entries do not fit in 5 bytes of pop-front cache",
                self.entries
            )));
        }
        debug!("populating pop-front cache for {} entries", self.entries);
        let mut cache = Vec::with_capacity(self.entries * 5);
        cache.resize_with(self.entries * 5, || AtomicU8::new(0));

        const CHUNK: usize = 1 << 16;
        let chunk_starts: Vec<usize> = (0..self.entries).step_by(CHUNK).collect();
        chunk_starts.into_par_iter().for_each(|start| {
            let limit = (start + CHUNK).min(self.entries);
            let mut offsets = [0u64; 4];
            for (bi, bc) in self.prev.iter().enumerate() {
                offsets[bi] = self.fixed[bi] + bc.rank(start);
            }
            for i in start..limit {
                for (bi, bc) in self.prev.iter().enumerate() {
                    if bc.get(i) {
                        let target = offsets[bi] as usize * 5;
                        offsets[bi] += 1;
                        cache[target].store((i as u64 >> 32) as u8, Ordering::Relaxed);
                        let lo = (i as u32).to_le_bytes();
                        for (k, byte) in lo.iter().enumerate() {
                            cache[target + 1 + k].store(*byte, Ordering::Relaxed);
                        }
                    }
                }
            }
        });
        let _ = self.pop_front_cache.set(cache);
        debug!("pop-front cache population complete");
        Ok(())
    }

    /// The less-than-search summary over `shared[·]`, built on first use.
    pub(crate) fn shared_lt(&self) -> &LessThanSearch {
        self.shared_lt
            .get_or_init(|| LessThanSearch::new(&self.shared))
    }

    /// The range matching the empty prefix: every entry.
    pub fn empty_range(&self) -> SeqsetRange<'_> {
        SeqsetRange::new(self, 0, 0, self.entries as u64)
    }

    /// The single-entry range for `entry`, with the entry's full length.
    pub fn entry_range(&self, entry: u64) -> Result<SeqsetRange<'_>> {
        if entry >= self.entries as u64 {
            return Err(SeqstoreError::invalid_op(format!(
                "entry {} larger than seqset size {}",
                entry, self.entries
            )));
        }
        Ok(SeqsetRange::new(
            self,
            self.entry_size(entry),
            entry,
            entry + 1,
        ))
    }

    /// The range of entries whose prefix equals `seq`, or an invalid range.
    pub fn find(&self, seq: &Sequence) -> SeqsetRange<'_> {
        let mut out = self.empty_range();
        for i in (0..seq.len()).rev() {
            if !out.valid() {
                break;
            }
            out = out.pushed(seq.get(i));
        }
        out
    }

    /// `find(seq).begin()` for a sequence known to be present. Behavior on
    /// absent sequences is undefined.
    pub fn find_existing(&self, seq: &Sequence) -> u64 {
        let mut seqset_id = 0u64;
        for i in (0..seq.len()).rev() {
            seqset_id = self.entry_push_front(seqset_id, seq.get(i));
        }
        seqset_id
    }

    /// Like [`Seqset::find_existing`] but faster when the sequence is
    /// already unique within its first `expected_unique_len` bases; the
    /// expectation doubles until it holds.
    pub fn find_existing_unique(&self, seq: &Sequence, mut expected_unique_len: usize) -> u64 {
        while seq.len() > expected_unique_len && expected_unique_len > 0 {
            let seqset_id = self.find_existing(&seq.subseq(0, expected_unique_len));
            let next_seqset_id = seqset_id + 1;
            if next_seqset_id == self.entries as u64
                || (self.entry_shared(next_seqset_id) as usize) < expected_unique_len
            {
                return seqset_id;
            }
            expected_unique_len *= 2;
        }
        self.find_existing(seq)
    }

    /// Collect every range whose Hamming-distance-`<= max_mismatch`
    /// neighborhood equals `seq`. Returns `false` when more than
    /// `max_results` matches exist (the output is truncated).
    pub fn find_near<'s>(
        &'s self,
        out: &mut Vec<SeqsetRange<'s>>,
        seq: &Sequence,
        max_mismatch: usize,
        max_results: usize,
    ) -> bool {
        if max_mismatch == 0 {
            if max_results == 0 {
                return false;
            }
            let r = self.find(seq);
            if r.valid() {
                out.push(r);
            }
            return true;
        }
        if seq.is_empty() {
            return true;
        }
        self.find_near_recursive(
            out,
            seq,
            max_mismatch,
            max_results,
            self.empty_range(),
            seq.len() as isize - 1,
        )
    }

    fn find_near_recursive<'s>(
        &'s self,
        out: &mut Vec<SeqsetRange<'s>>,
        seq: &Sequence,
        max_mismatch: usize,
        max_results: usize,
        cur: SeqsetRange<'s>,
        seq_pos: isize,
    ) -> bool {
        if seq_pos == -1 {
            if out.len() >= max_results {
                return false;
            }
            out.push(cur);
            return true;
        }
        let want = seq.get(seq_pos as usize);
        if max_mismatch == 0 {
            let next = cur.pushed(want);
            if !next.valid() {
                return true;
            }
            return self.find_near_recursive(out, seq, 0, max_results, next, seq_pos - 1);
        }
        for b in BASES {
            let next = cur.pushed(b);
            if !next.valid() {
                continue;
            }
            let new_mismatch = max_mismatch - usize::from(b != want);
            if !self.find_near_recursive(out, seq, new_mismatch, max_results, next, seq_pos - 1) {
                return false;
            }
        }
        true
    }

    pub fn store(&self, state: &CreateState) -> Result<()> {
        state.set_version(SEQSET_VERSION)?;
        state.create_json(
            "seqset.json",
            &SeqsetMetadata {
                num_entries: self.entries as u64,
                uuid: self.uuid.clone(),
            },
        )?;
        let mut fixed_bytes = vec![0u8; 5 * 8];
        for (i, v) in self.fixed.iter().enumerate() {
            LittleEndian::write_u64(&mut fixed_bytes[i * 8..i * 8 + 8], *v);
        }
        state.put_part("fixed", fixed_bytes);
        self.entry_sizes.store(&state.subpart("entry_sizes"))?;
        self.shared.store(&state.subpart("shared"))?;
        for (bi, b) in BASES.iter().enumerate() {
            self.prev[bi].store(&state.subpart(&format!("prev_{}", b.to_char())))?;
        }
        Ok(())
    }

    pub fn open(state: &OpenState) -> Result<Seqset> {
        state.enforce_max_version("seqset", SEQSET_VERSION)?;
        let metadata: SeqsetMetadata = state.open_json("seqset.json")?;
        let entries = metadata.num_entries as usize;

        let fixed_buf = state.open_part("fixed")?;
        if fixed_buf.len() != 5 * 8 {
            return Err(SeqstoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("seqset fixed part is {} bytes, expected 40", fixed_buf.len()),
            )));
        }
        let mut fixed = [0u64; 5];
        for (i, v) in fixed.iter_mut().enumerate() {
            *v = LittleEndian::read_u64(&fixed_buf[i * 8..i * 8 + 8]);
        }

        let entry_sizes = PackedIntVec::open(&state.subpart("entry_sizes"))?;
        let shared = PackedIntVec::open(&state.subpart("shared"))?;
        let mut prev = Vec::with_capacity(4);
        for b in BASES {
            prev.push(Bitcount::open(
                &state.subpart(&format!("prev_{}", b.to_char())),
            )?);
        }
        let prev: [Bitcount; 4] = prev.try_into().map_err(|_| {
            SeqstoreError::Consistency("seqset must have exactly four prev bitmaps".into())
        })?;

        if entry_sizes.len() != entries || shared.len() != entries {
            return Err(SeqstoreError::Consistency(format!(
                "seqset tables disagree: {} entries, {} sizes, {} shared",
                entries,
                entry_sizes.len(),
                shared.len()
            )));
        }
        for bc in &prev {
            if bc.len() != entries {
                return Err(SeqstoreError::Consistency(format!(
                    "seqset prev bitmap holds {} bits for {} entries",
                    bc.len(),
                    entries
                )));
            }
        }
        if fixed[4] != entries as u64 {
            return Err(SeqstoreError::Consistency(format!(
                "seqset fixed table ends at {} for {} entries",
                fixed[4], entries
            )));
        }

        trace!("opened seqset {} with {} entries", metadata.uuid, entries);
        Ok(Seqset {
            entries,
            fixed,
            prev,
            entry_sizes,
            shared,
            uuid: metadata.uuid,
            pop_front_cache: OnceLock::new(),
            shared_lt: OnceLock::new(),
        })
    }
}

/// Binary-search the `C[·]` breaks of a sorted entry stream: `pos[b]` is the
/// first row whose first base is >= `b`.
pub(crate) fn compute_base_positions(
    len: u64,
    first_base_at: &dyn Fn(u64) -> Result<Base>,
) -> Result<[u64; 5]> {
    let mut pos = [0u64; 5];
    pos[4] = len;
    for code in 1..4u8 {
        let (mut lo, mut hi) = (0u64, len);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if (first_base_at(mid)? as u8) < code {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        pos[code as usize] = lo;
    }
    Ok(pos)
}

/// Fill a [`SeqsetBuilder`] from a sorted, prefix-deduplicated entry stream.
///
/// `base_pos` gives the row intervals per first base (`C[·]` of the stream).
/// Four cursors, one per base, sweep the stream exactly once: the prev bit
/// for base `b` at row `x` is set iff the `b` cursor's entry, minus its
/// first base, is a prefix of (or equal to) row `x`'s sequence.
pub(crate) fn populate_seqset_rows(
    builder: &SeqsetBuilder,
    base_pos: [u64; 5],
    seq_at: &dyn Fn(u64) -> Result<Sequence>,
    ctx: &Context,
) -> Result<()> {
    let n = builder.num_entries() as u64;
    let mut cursors = [base_pos[0], base_pos[1], base_pos[2], base_pos[3]];
    let mut prev_seq = Sequence::new();
    for row in 0..n {
        if row % 4096 == 0 {
            ctx.check_cancelled()?;
            ctx.progress(row as f64 / n as f64);
        }
        let cur = seq_at(row)?;
        for (bi, b) in BASES.iter().enumerate() {
            if cursors[bi] >= base_pos[bi + 1] {
                continue;
            }
            let cand = seq_at(cursors[bi])?;
            let overlap = (cand.len() - 1).min(cur.len());
            if (0..overlap).all(|k| cand.get(k + 1) == cur.get(k)) {
                builder.set_prev(row, *b, true);
                cursors[bi] += 1;
            } else if cand.subseq(1, cand.len() - 1) < cur {
                // A cursor may never fall behind the row it serves.
                return Err(SeqstoreError::Consistency(format!(
                    "entry stream inconsistency at row {}: {} vs {}",
                    row, cand, cur
                )));
            }
        }
        builder.set_entry_size(row, cur.len() as u32);
        builder.set_shared(row, prev_seq.shared_prefix(&cur) as u32);
        prev_seq = cur;
    }
    for (bi, &cursor) in cursors.iter().enumerate() {
        if cursor != base_pos[bi + 1] {
            return Err(SeqstoreError::Consistency(format!(
                "base {} cursor stopped at {} of {}",
                BASES[bi], cursor, base_pos[bi + 1]
            )));
        }
    }
    ctx.progress(1.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiral::{SpiralCreate, SpiralOpen};
    use crate::testutil::{seqset_for_reads, tseq};

    #[test]
    fn test_empty_seqset() {
        let seqset = SeqsetBuilder::new(0, 0).finalize().unwrap();
        assert_eq!(seqset.size(), 0);
        let r = seqset.find(&Sequence::new());
        assert_eq!((r.begin(), r.end(), r.size()), (0, 0, 0));
        assert!(!r.valid());
    }

    #[test]
    fn test_finalize_consistency() {
        // A prev bit without matching entry count must fail finalize.
        let builder = SeqsetBuilder::new(2, 4);
        builder.set_entry_size(0, 1);
        builder.set_entry_size(1, 2);
        builder.set_prev(0, Base::A, true);
        // Only one prev bit for two entries.
        assert!(matches!(
            builder.finalize(),
            Err(SeqstoreError::Consistency(_))
        ));
    }

    #[test]
    fn test_find_and_entries() {
        let reads = vec![tseq("ab"), tseq("bc")];
        let seqset = seqset_for_reads(&reads);

        for read in &reads {
            let r = seqset.find(read);
            assert!(r.valid(), "read {} not found", read);
            assert_eq!(r.size() as usize, read.len());
            // Exactly one entry starts with a full read here.
            assert_eq!(r.begin() + 1, r.end());
            assert_eq!(r.sequence().unwrap(), *read);
        }
        assert!(
            seqset.find(&tseq("ab")).begin() < seqset.find(&tseq("bc")).begin()
        );
        // Something not in the corpus.
        assert!(!seqset.find(&tseq("zz")).valid());
    }

    #[test]
    fn test_all_entries_sorted_and_shared() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("bc"), tseq("ad")]);
        let mut prev: Option<Sequence> = None;
        for i in 0..seqset.size() as u64 {
            let seq = seqset.entry_range(i).unwrap().sequence().unwrap();
            if let Some(p) = &prev {
                assert!(p < &seq, "entries out of order at {}", i);
                assert_eq!(seqset.entry_shared(i) as usize, p.shared_prefix(&seq));
                assert!(!seq.starts_with(p), "prefix-uniqueness violated at {}", i);
            } else {
                assert_eq!(seqset.entry_shared(i), 0);
            }
            assert_eq!(seqset.entry_size(i) as usize, seq.len());
            prev = Some(seq);
        }
    }

    #[test]
    fn test_push_front_against_entry_set() {
        // The operational meaning of the prev bitmaps: pushing a base onto
        // any range is valid exactly when an entry starts with the extended
        // prefix.
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("ba")]);
        let entries: Vec<Sequence> = (0..seqset.size() as u64)
            .map(|i| seqset.entry_range(i).unwrap().sequence().unwrap())
            .collect();
        for (i, seq) in entries.iter().enumerate() {
            for b in BASES {
                let mut want = Sequence::from_bases(&[b]);
                want.extend(seq);
                let expect = entries.iter().any(|e| e.starts_with(&want));
                let pushed = seqset.entry_range(i as u64).unwrap().pushed(b);
                assert_eq!(
                    pushed.valid(),
                    expect,
                    "push {} onto {} (entry {})",
                    b,
                    seq,
                    i
                );
                if pushed.valid() {
                    assert_eq!(pushed.sequence().unwrap(), want);
                }
            }
        }
    }

    #[test]
    fn test_rank_totals() {
        let seqset = seqset_for_reads(&[tseq("abc"), tseq("cde"), tseq("xy")]);
        let n = seqset.size();
        let mut total = 0;
        for (bi, b) in BASES.iter().enumerate() {
            let count = seqset.prev_bitmap(*b).total_set();
            assert_eq!(count, seqset.fixed(bi + 1) - seqset.fixed(bi));
            total += count;
        }
        assert_eq!(total, n as u64);
    }

    #[test]
    fn test_push_pop_inverse() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("bc")]);
        for i in 0..seqset.size() as u64 {
            for b in BASES {
                if seqset.entry_has_prev(i, b) {
                    let pushed = seqset.entry_push_front(i, b);
                    assert_eq!(seqset.entry_pop_front(pushed), i);
                }
            }
        }
        // Same answers with the cache installed.
        seqset.populate_pop_front_cache().unwrap();
        assert!(seqset.is_pop_front_cached());
        for i in 0..seqset.size() as u64 {
            for b in BASES {
                if seqset.entry_has_prev(i, b) {
                    let pushed = seqset.entry_push_front(i, b);
                    assert_eq!(seqset.entry_pop_front(pushed), i);
                }
            }
        }
    }

    #[test]
    fn test_find_existing_unique() {
        let reads = vec![tseq("abcdef"), tseq("abcxyz"), tseq("qrs")];
        let seqset = seqset_for_reads(&reads);
        for read in &reads {
            let expect = seqset.find(read).begin();
            assert_eq!(seqset.find_existing(read), expect);
            for hint in [1, 2, 5, 20] {
                assert_eq!(seqset.find_existing_unique(read, hint), expect);
            }
        }
    }

    #[test]
    fn test_find_near() {
        let seqset = seqset_for_reads(&[tseq("ab")]);
        let target = tseq("ab");
        // Exact match shows up at distance 0.
        let mut out = Vec::new();
        assert!(seqset.find_near(&mut out, &target, 1, 100));
        assert!(!out.is_empty());
        assert!(out.iter().any(|r| r.begin() == seqset.find(&target).begin()
            && r.size() as usize == target.len()));

        // A one-base corruption is recovered with max_mismatch 1.
        let mut corrupt = target.subseq(0, target.len() - 1);
        corrupt.push(target.get(target.len() - 1).complement());
        let mut out = Vec::new();
        assert!(seqset.find_near(&mut out, &corrupt, 1, 100));
        assert!(out
            .iter()
            .any(|r| r.begin() == seqset.find(&target).begin()));

        // Cap of zero reports truncation.
        let mut out = Vec::new();
        assert!(!seqset.find_near(&mut out, &target, 1, 0));
    }

    #[test]
    fn test_prefix_corpus_equivalence() {
        // A corpus of {X} and a corpus of {X + all proper prefixes of X}
        // give the same seqset.
        let x = tseq("abcd");
        let just_x = seqset_for_reads(&[x.clone()]);
        let mut with_prefixes = vec![x.clone()];
        for k in 1..x.len() {
            with_prefixes.push(x.subseq(0, k));
        }
        let both = seqset_for_reads(&with_prefixes);
        assert_eq!(just_x.size(), both.size());
        for i in 0..just_x.size() as u64 {
            assert_eq!(
                just_x.entry_range(i).unwrap().sequence().unwrap(),
                both.entry_range(i).unwrap().sequence().unwrap()
            );
        }
    }

    #[test]
    fn test_poly_a_corpus() {
        // All-A reads collapse onto a single maximal entry.
        let reads: Vec<Sequence> = [3usize, 5, 7]
            .iter()
            .map(|&len| Sequence::from_bases(&vec![Base::A; len]))
            .collect();
        let seqset = seqset_for_reads(&reads);
        // Both orientations of poly-A are poly-T and poly-A.
        assert_eq!(seqset.size(), 2);
        assert_eq!(
            seqset.entry_range(0).unwrap().sequence().unwrap(),
            Sequence::from_bases(&vec![Base::A; 7])
        );
        assert_eq!(
            seqset.entry_range(1).unwrap().sequence().unwrap(),
            Sequence::from_bases(&vec![Base::T; 7])
        );
    }

    #[test]
    fn test_store_open_round_trip() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("bc")]);
        let create = SpiralCreate::mem();
        seqset.store(&create.create()).unwrap();
        let open = SpiralOpen::from_mem(create.close_mem().unwrap()).unwrap();
        let decoded = Seqset::open(&open.open()).unwrap();

        assert_eq!(decoded.size(), seqset.size());
        assert_eq!(decoded.uuid(), seqset.uuid());
        for i in 0..seqset.size() as u64 {
            assert_eq!(
                decoded.entry_range(i).unwrap().sequence().unwrap(),
                seqset.entry_range(i).unwrap().sequence().unwrap()
            );
            assert_eq!(decoded.entry_size(i), seqset.entry_size(i));
            assert_eq!(decoded.entry_shared(i), seqset.entry_shared(i));
        }
    }

    #[test]
    fn test_mmap_round_trip() {
        use crate::spiral::SpiralOpenOptions;
        let seqset = seqset_for_reads(&[tseq("ab")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seqset");
        let create = SpiralCreate::file(&path);
        seqset.store(&create.create()).unwrap();
        create.close().unwrap();

        for read_into_ram in [false, true] {
            let open =
                SpiralOpen::mmap(&path, SpiralOpenOptions { read_into_ram }).unwrap();
            let decoded = Seqset::open(&open.open()).unwrap();
            assert_eq!(decoded.size(), seqset.size());
            let r = decoded.find(&tseq("ab"));
            assert!(r.valid());
            assert_eq!(r.sequence().unwrap(), tseq("ab"));
        }
    }

    #[test]
    fn test_entry_range_out_of_bounds() {
        let seqset = seqset_for_reads(&[tseq("a")]);
        let err = seqset.entry_range(seqset.size() as u64);
        assert!(matches!(err, Err(SeqstoreError::Io(_))));
    }
}

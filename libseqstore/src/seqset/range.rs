//! Ranges: contiguous id intervals sharing a common prefix.
//!
//! A [`SeqsetRange`] is a copyable `(begin, end, seq_size)` handle tied to a
//! seqset. All navigation — push a base onto the front, pop one off, widen
//! by dropping trailing context — happens on ranges; a range is *valid* when
//! `begin < end`, and the invalid range is how a failed navigation reports
//! "no such sequence".

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use crate::dna::{Base, Sequence, BASES};
use crate::error::SeqstoreError;
use crate::readmap::Readmap;
use crate::Result;

use super::{Seqset, SeqsetBitmap};

/// A hit from the overlap searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapResult {
    pub seqset_id: u64,
    pub overlap_bases: u32,
}

#[derive(Clone, Copy)]
pub struct SeqsetRange<'a> {
    seqset: &'a Seqset,
    seq_size: u32,
    begin: u64,
    end: u64,
}

impl PartialEq for SeqsetRange<'_> {
    fn eq(&self, rhs: &Self) -> bool {
        self.begin == rhs.begin && self.end == rhs.end && self.seq_size == rhs.seq_size
    }
}

impl Eq for SeqsetRange<'_> {}

impl PartialOrd for SeqsetRange<'_> {
    fn partial_cmp(&self, rhs: &Self) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}

impl Ord for SeqsetRange<'_> {
    fn cmp(&self, rhs: &Self) -> Ordering {
        // If the beginnings match and one interval reaches farther, the
        // farther one covers a shorter prefix and sorts first.
        self.begin
            .cmp(&rhs.begin)
            .then_with(|| rhs.end.cmp(&self.end))
            .then_with(|| self.seq_size.cmp(&rhs.seq_size))
    }
}

impl std::fmt::Debug for SeqsetRange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SeqsetRange([{}, {}), size {})",
            self.begin, self.end, self.seq_size
        )
    }
}

impl<'a> SeqsetRange<'a> {
    pub(crate) fn new(seqset: &'a Seqset, seq_size: u32, begin: u64, end: u64) -> SeqsetRange<'a> {
        SeqsetRange {
            seqset,
            seq_size,
            begin,
            end,
        }
    }

    fn invalid(&self) -> SeqsetRange<'a> {
        SeqsetRange::new(self.seqset, 0, 0, 0)
    }

    /// Number of bases of the range's common prefix.
    pub fn size(&self) -> u32 {
        self.seq_size
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn valid(&self) -> bool {
        self.begin < self.end
    }

    pub fn seqset(&self) -> &'a Seqset {
        self.seqset
    }

    /// Bases shared with the previous range of the same size.
    pub fn shared(&self) -> u32 {
        self.seqset.entry_shared(self.begin)
    }

    /// Push `base` onto the front of the prefix.
    pub fn push_front(&self, base: Base) -> Result<SeqsetRange<'a>> {
        if !self.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot push_front on an invalid range",
            ));
        }
        Ok(self.pushed(base))
    }

    /// The FM step without validity checking; callers guarantee `valid()`.
    pub(crate) fn pushed(&self, base: Base) -> SeqsetRange<'a> {
        let bitmap = self.seqset.prev_bitmap(base);
        let fixed = self.seqset.fixed(base as usize);
        let mut new_begin = fixed + bitmap.rank(self.begin as usize);
        let new_end = fixed + bitmap.rank(self.end as usize);
        // Skip an entry that does not extend far enough to carry the prefix.
        if new_begin < new_end && self.seqset.entry_size(new_begin) < self.seq_size + 1 {
            new_begin += 1;
        }
        SeqsetRange::new(self.seqset, self.seq_size + 1, new_begin, new_end)
    }

    /// Push `base`, dropping trailing context down to `min_ctx` bases if the
    /// direct push would come up empty. Returns an invalid range when even
    /// `min_ctx` bases of context cannot support the push.
    pub fn push_front_drop(&self, base: Base, min_ctx: u32) -> Result<SeqsetRange<'a>> {
        if !self.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot push_front_drop on an invalid range",
            ));
        }
        Ok(self.pushed_drop(base, min_ctx))
    }

    pub(crate) fn pushed_drop(&self, base: Base, min_ctx: u32) -> SeqsetRange<'a> {
        let seqset = self.seqset;
        let entries = seqset.size() as u64;
        let bitmap = seqset.prev_bitmap(base);
        let fixed = seqset.fixed(base as usize);

        let mut o_begin = self.begin;
        let mut o_end = self.end;
        let mut o_context = self.seq_size;
        let mut sub_begin = bitmap.rank(o_begin as usize);
        let mut sub_end = bitmap.rank(o_end as usize);

        if o_context < min_ctx {
            return self.invalid();
        }
        while sub_begin == sub_end
            || (sub_begin + 1 == sub_end
                && seqset.entry_size(fixed + sub_begin) < o_context + 1)
        {
            let mut drop = seqset.entry_shared(o_begin).max(if o_end == entries {
                0
            } else {
                seqset.entry_shared(o_end)
            });
            if sub_begin != sub_end {
                drop = drop.max(seqset.entry_size(fixed + sub_begin) - 1);
            }
            if drop < min_ctx {
                return self.invalid();
            }
            let mut update_begin = false;
            let mut update_end = false;
            let lt = seqset.shared_lt();
            if o_begin > 0 && seqset.entry_shared(o_begin) >= drop {
                let drop_begin = lt.next_backward_lt(o_begin as usize, drop as u64) as u64;
                debug_assert!(drop_begin < o_begin);
                o_begin = drop_begin;
                update_begin = true;
            }
            if o_end < entries && seqset.entry_shared(o_end) >= drop {
                let drop_end = lt.next_forward_lt(o_end as usize, drop as u64) as u64;
                debug_assert!(drop_end > o_end);
                o_end = drop_end;
                update_end = true;
            }
            if update_begin {
                sub_begin = bitmap.rank(o_begin as usize);
            }
            if update_end {
                sub_end = bitmap.rank(o_end as usize);
            }
            if !update_begin && !update_end && drop == o_context {
                // No widening left; the base simply does not occur in front
                // of any extension of this prefix.
                return self.invalid();
            }
            o_context = drop;
        }
        let mut new_begin = fixed + sub_begin;
        let new_end = fixed + sub_end;
        if new_begin < new_end && seqset.entry_size(new_begin) < o_context + 1 {
            new_begin += 1;
        }
        SeqsetRange::new(seqset, o_context + 1, new_begin, new_end)
    }

    /// Remove the first base of the prefix, widening the id interval to
    /// everything sharing the remaining bases.
    pub fn pop_front(&self) -> Result<SeqsetRange<'a>> {
        if !self.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot pop_front from an invalid range",
            ));
        }
        if self.seq_size == 0 {
            return Err(SeqstoreError::invalid_op(
                "cannot pop_front from an empty range",
            ));
        }
        Ok(self.popped_front())
    }

    pub(crate) fn popped_front(&self) -> SeqsetRange<'a> {
        let seqset = self.seqset;
        let new_context = self.seq_size - 1;
        let mut new_begin = seqset.entry_pop_front(self.begin);
        let mut new_end = new_begin + 1;
        while new_begin > 0 && seqset.entry_shared(new_begin) >= new_context {
            new_begin -= 1;
        }
        while new_end < seqset.size() as u64 && seqset.entry_shared(new_end) >= new_context {
            new_end += 1;
        }
        SeqsetRange::new(seqset, new_context, new_begin, new_end)
    }

    /// Widen by dropping the final `count` bases of the prefix.
    pub fn pop_back(&self, count: u32) -> Result<SeqsetRange<'a>> {
        if !self.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot pop_back from an invalid range",
            ));
        }
        if self.seq_size < count {
            return Err(SeqstoreError::invalid_op(format!(
                "cannot pop_back {} bases from a range of length {}",
                count, self.seq_size
            )));
        }
        let seqset = self.seqset;
        let new_context = self.seq_size - count;
        let mut new_begin = self.begin;
        let mut new_end = self.end;
        while new_begin > 0 && seqset.entry_shared(new_begin) >= new_context {
            new_begin -= 1;
        }
        while new_end < seqset.size() as u64 && seqset.entry_shared(new_end) >= new_context {
            new_end += 1;
        }
        Ok(SeqsetRange::new(seqset, new_context, new_begin, new_end))
    }

    /// Widen down to at most `new_size` bases of prefix.
    pub fn truncate(&self, new_size: u32) -> Result<SeqsetRange<'a>> {
        if !self.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot truncate an invalid range",
            ));
        }
        if self.seq_size > new_size {
            self.pop_back(self.seq_size - new_size)
        } else {
            Ok(*self)
        }
    }

    /// The next range of the same prefix length.
    pub fn next(&self) -> SeqsetRange<'a> {
        let seqset = self.seqset;
        let entries = seqset.size() as u64;
        let mut begin = self.end;
        while begin < entries && seqset.entry_size(begin) < self.seq_size {
            begin += 1;
        }
        let mut end = if begin == entries { begin } else { begin + 1 };
        while end < entries && seqset.entry_shared(end) >= self.seq_size {
            end += 1;
        }
        SeqsetRange::new(seqset, self.seq_size, begin, end)
    }

    /// First base of the prefix.
    pub fn front(&self) -> Result<Base> {
        if !self.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot take front of an invalid range",
            ));
        }
        if self.seq_size == 0 {
            return Err(SeqstoreError::invalid_op(
                "cannot take front of an empty range",
            ));
        }
        Ok(self.seqset.entry_first_base(self.begin))
    }

    /// The range's prefix sequence; takes `size * O(pop_front)`.
    pub fn sequence(&self) -> Result<Sequence> {
        self.sequence_prefix(self.seq_size)
    }

    /// The first `limit` bases of the prefix (clamped to the prefix length).
    pub fn sequence_prefix(&self, limit: u32) -> Result<Sequence> {
        if !self.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot extract the sequence of an invalid range",
            ));
        }
        let take = limit.min(self.seq_size) as usize;
        let mut out = Sequence::with_capacity(take);
        let mut cur = self.begin;
        for _ in 0..take {
            out.push(self.seqset.entry_first_base(cur));
            cur = self.seqset.entry_pop_front(cur);
        }
        Ok(out)
    }

    /// Bases shared with `rhs`'s prefix.
    pub fn shared_prefix_length(&self, rhs: &SeqsetRange<'a>) -> Result<u32> {
        if !self.valid() || !rhs.valid() {
            return Err(SeqstoreError::invalid_op(
                "shared_prefix_length requires two valid ranges",
            ));
        }
        let mut shared_bases = self.seq_size.min(rhs.seq_size);
        if self.end > rhs.begin && rhs.end > self.begin {
            // Overlapping ranges: one prefix extends the other.
            return Ok(shared_bases);
        }
        let (shared_start, shared_end) = if self.end > rhs.begin {
            (rhs.end, self.begin)
        } else {
            (self.end, rhs.begin)
        };
        for idx in shared_start..=shared_end {
            let s = self.seqset.entry_shared(idx);
            if s < shared_bases {
                shared_bases = s;
            }
        }
        Ok(shared_bases)
    }

    /// True when the range is a single full-length entry that no push_front
    /// can extend.
    pub fn is_maximal(&self) -> bool {
        if self.begin + 1 != self.end {
            return false;
        }
        if self.seq_size != self.seqset.entry_size(self.begin) {
            return false;
        }
        BASES.iter().all(|&b| !self.pushed(b).valid())
    }

    /// True when the range refers to exactly one full seqset entry. Less
    /// stringent than [`SeqsetRange::is_maximal`]: pushing may still work.
    pub fn is_seqset_entry(&self) -> bool {
        self.begin + 1 == self.end && self.seq_size == self.seqset.entry_size(self.begin)
    }

    /// The full seqset entry id this range refers to, if it refers to one.
    pub fn seqset_id(&self) -> Option<u64> {
        if self.is_seqset_entry() {
            Some(self.begin)
        } else {
            None
        }
    }

    /// True when some read in `readmap` covers exactly this range's prefix.
    pub fn is_full_read(&self, readmap: &Readmap) -> bool {
        let (lo, hi) = readmap.entry_to_index(self.begin);
        (lo..hi).any(|idx| readmap.get_readlength(idx as u32) == self.seq_size)
    }

    /// Depth-first enumerate the maximal ranges reachable from this range by
    /// successive context-dropping pushes, keeping only ids where
    /// `bitmap.get_bit` holds. Returns `false` when `max_reads` was hit and
    /// the result set is truncated.
    pub fn find_maximal_prefix_reads(
        &self,
        results: &mut BTreeSet<SeqsetRange<'a>>,
        max_reads: u32,
        min_overlap: u32,
        bitmap: &dyn SeqsetBitmap,
    ) -> bool {
        if bitmap.get_bit(self.begin) && self.is_maximal() {
            if results.len() < max_reads as usize {
                results.insert(*self);
            } else {
                return false;
            }
        }
        for b in BASES {
            let added_prefix = self.pushed_drop(b, min_overlap);
            if !added_prefix.valid() {
                continue;
            }
            if !added_prefix.find_maximal_prefix_reads(
                results,
                max_reads,
                min_overlap + 1,
                bitmap,
            ) {
                return false;
            }
        }
        true
    }

    /// Like [`SeqsetRange::find_maximal_prefix_reads`] but keeps ranges for
    /// which `readmap` holds a read of exactly the range's length.
    pub fn find_full_prefix_reads(
        &self,
        results: &mut Vec<SeqsetRange<'a>>,
        max_reads: u32,
        min_overlap: u32,
        readmap: &Readmap,
    ) -> bool {
        if readmap.get_bit(self.begin) && self.is_full_read(readmap) {
            if results.len() < max_reads as usize {
                results.push(*self);
            } else {
                return false;
            }
        }
        for b in BASES {
            let added_prefix = self.pushed_drop(b, min_overlap);
            if !added_prefix.valid() {
                continue;
            }
            if !added_prefix.find_full_prefix_reads(results, max_reads, min_overlap + 1, readmap)
            {
                return false;
            }
        }
        true
    }

    /// Collect maximal entries overlapping this range's prefix, mapped to
    /// the number of overlapping bases. Only the first (deepest) overlap per
    /// seqset id is kept. Returns `false` on truncation.
    pub fn find_overlap_reads(
        &self,
        results: &mut HashMap<u64, u32>,
        max_reads: u32,
        min_overlap: u32,
        bitmap: &dyn SeqsetBitmap,
        rely_on_read_bitmap: bool,
    ) -> bool {
        self.overlap_reads_inner(results, max_reads, min_overlap, bitmap, rely_on_read_bitmap, 0)
    }

    fn overlap_reads_inner(
        &self,
        results: &mut HashMap<u64, u32>,
        max_reads: u32,
        min_overlap: u32,
        bitmap: &dyn SeqsetBitmap,
        rely_on_read_bitmap: bool,
        added: u32,
    ) -> bool {
        let is_hit = added != 0
            && bitmap.get_bit(self.begin)
            && if rely_on_read_bitmap {
                self.is_seqset_entry()
            } else {
                self.is_maximal()
            };
        if is_hit {
            if results.len() < max_reads as usize {
                results.entry(self.begin).or_insert(self.seq_size - added);
                return true;
            }
            return false;
        }
        for b in BASES {
            let added_prefix = self.pushed_drop(b, min_overlap);
            if !added_prefix.valid() {
                continue;
            }
            if !added_prefix.overlap_reads_inner(
                results,
                max_reads,
                min_overlap + 1,
                bitmap,
                rely_on_read_bitmap,
                added + 1,
            ) {
                return false;
            }
        }
        true
    }

    /// The "fair" overlap search: a max-heap keyed by remaining overlap, so
    /// results come out in nonincreasing overlap order and the cap keeps the
    /// best hits.
    pub fn find_overlap_reads_fair(
        &self,
        max_overlaps: u32,
        min_overlap: u32,
        bitmap: &dyn SeqsetBitmap,
        rely_on_read_bitmap: bool,
    ) -> Vec<OverlapResult> {
        struct QueueEntry<'a> {
            range: SeqsetRange<'a>,
            overlap_bases: u32,
            added: u32,
        }
        impl PartialEq for QueueEntry<'_> {
            fn eq(&self, rhs: &Self) -> bool {
                self.overlap_bases == rhs.overlap_bases && self.range == rhs.range
            }
        }
        impl Eq for QueueEntry<'_> {}
        impl PartialOrd for QueueEntry<'_> {
            fn partial_cmp(&self, rhs: &Self) -> Option<Ordering> {
                Some(self.cmp(rhs))
            }
        }
        impl Ord for QueueEntry<'_> {
            fn cmp(&self, rhs: &Self) -> Ordering {
                self.overlap_bases
                    .cmp(&rhs.overlap_bases)
                    .then_with(|| rhs.range.cmp(&self.range))
            }
        }

        let mut results = Vec::new();
        let mut queue = BinaryHeap::new();
        queue.push(QueueEntry {
            range: *self,
            overlap_bases: self.seq_size,
            added: 0,
        });

        while let Some(entry) = queue.pop() {
            if entry.overlap_bases < min_overlap {
                return results;
            }
            let is_hit = entry.added != 0
                && bitmap.get_bit(entry.range.begin)
                && if rely_on_read_bitmap {
                    entry.range.is_seqset_entry()
                } else {
                    entry.range.is_maximal()
                };
            if is_hit {
                results.push(OverlapResult {
                    seqset_id: entry.range.begin,
                    overlap_bases: entry.overlap_bases,
                });
                if results.len() > max_overlaps as usize {
                    return results;
                }
                continue;
            }
            for b in BASES {
                let range = entry.range.pushed_drop(b, entry.added + min_overlap);
                if !range.valid() {
                    continue;
                }
                let added = entry.added + 1;
                debug_assert!(range.size() > added);
                queue.push(QueueEntry {
                    range,
                    overlap_bases: range.size() - added,
                    added,
                });
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqset::BitmapTrue;
    use crate::testutil::{seqset_for_reads, tseq};

    #[test]
    fn test_find_is_push_front_chain() {
        let seqset = seqset_for_reads(&[tseq("abc")]);
        let target = tseq("abc");
        let mut range = seqset.empty_range();
        for i in (0..target.len()).rev() {
            range = range.push_front(target.get(i)).unwrap();
            assert!(range.valid());
        }
        assert_eq!(range.begin(), seqset.find(&target).begin());
        assert_eq!(range.size() as usize, target.len());
    }

    #[test]
    fn test_push_then_pop_contains_original() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("cb")]);
        // For every valid push, popping the result covers the original ids.
        for i in 0..seqset.size() as u64 {
            let r = seqset.entry_range(i).unwrap();
            for b in BASES {
                let pushed = r.push_front(b).unwrap();
                if !pushed.valid() {
                    continue;
                }
                let popped = pushed.pop_front().unwrap();
                assert!(popped.begin() <= r.begin() && r.end() <= popped.end());
            }
        }
    }

    #[test]
    fn test_pop_front_sequence() {
        let seqset = seqset_for_reads(&[tseq("ab")]);
        let full = seqset.find(&tseq("ab"));
        let popped = full.pop_front().unwrap();
        let mut expect = tseq("ab").subseq(1, tseq("ab").len() - 1);
        assert_eq!(popped.sequence().unwrap(), expect);
        // Popping all the way down to a single base stays consistent.
        let mut cur = popped;
        while cur.size() > 1 {
            cur = cur.pop_front().unwrap();
            expect = expect.subseq(1, expect.len() - 1);
            assert_eq!(cur.sequence().unwrap(), expect);
        }
    }

    #[test]
    fn test_pop_back_and_truncate() {
        let seqset = seqset_for_reads(&[tseq("ab")]);
        let full = seqset.find(&tseq("ab"));
        let shorter = full.pop_back(3).unwrap();
        assert_eq!(shorter.size(), full.size() - 3);
        assert_eq!(
            shorter.sequence().unwrap(),
            tseq("ab").subseq(0, shorter.size() as usize)
        );
        let truncated = full.truncate(4).unwrap();
        assert_eq!(truncated.size(), 4);
        // Truncating to something longer is the identity.
        assert_eq!(full.truncate(1000).unwrap(), full);
        // Popping more than we have is an error.
        assert!(full.pop_back(full.size() + 1).is_err());
    }

    #[test]
    fn test_invalid_ops() {
        let seqset = seqset_for_reads(&[tseq("a")]);
        let invalid = seqset.find(&tseq("zzz"));
        assert!(!invalid.valid());
        assert!(invalid.push_front(Base::A).is_err());
        assert!(invalid.pop_front().is_err());
        assert!(invalid.sequence().is_err());
        assert!(invalid.front().is_err());
        let empty = seqset.empty_range();
        assert!(empty.pop_front().is_err());
        assert!(empty.front().is_err());
    }

    #[test]
    fn test_next_walks_all_ranges() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("xy")]);
        // Walk all single-base ranges.
        let mut r = seqset.empty_range().push_front(Base::A).unwrap();
        if !r.valid() {
            r = r.next();
        }
        let mut seen = 0u64;
        while r.valid() {
            seen += r.end() - r.begin();
            r = r.next();
        }
        // Every entry is in exactly one size-1 range.
        assert_eq!(seen, seqset.size() as u64);
    }

    #[test]
    fn test_push_front_drop_drops_context() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("bc")]);
        // tseq("b...") entries exist; after matching all of tseq("ab") there
        // is no entry extending it leftward, but a drop lets us cross onto
        // overlapping suffixes.
        let full = seqset.find(&tseq("ab"));
        assert!(full.valid());
        for b in BASES {
            let dropped = full.push_front_drop(b, 1).unwrap();
            if dropped.valid() {
                // The result's prefix must end with what we pushed.
                assert_eq!(dropped.front().unwrap(), b);
            }
        }
        // An impossible minimum context comes back invalid.
        let hopeless = full.push_front_drop(Base::A, full.size() + 5).unwrap();
        assert!(!hopeless.valid());
    }

    #[test]
    fn test_is_maximal_for_full_reads() {
        let reads = vec![tseq("ab"), tseq("cd")];
        let seqset = seqset_for_reads(&reads);
        let mut maximal = 0;
        for i in 0..seqset.size() as u64 {
            if seqset.entry_range(i).unwrap().is_maximal() {
                maximal += 1;
            }
        }
        // The only maximal entries are the four full-length oriented reads.
        assert_eq!(maximal, 4);
    }

    #[test]
    fn test_find_maximal_prefix_reads() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("bc")]);
        // Start from a suffix of tseq("ab") and search for maximal entries
        // built on it.
        let seed = seqset.find(&tseq("b"));
        assert!(seed.valid());
        let mut results = BTreeSet::new();
        let complete = seed.find_maximal_prefix_reads(&mut results, 100, 1, &BitmapTrue);
        assert!(complete);
        assert!(!results.is_empty());
        for r in &results {
            assert!(r.is_maximal());
        }
        // A cap of zero truncates.
        let mut results = BTreeSet::new();
        assert!(!seed.find_maximal_prefix_reads(&mut results, 0, 1, &BitmapTrue));
    }

    #[test]
    fn test_find_overlap_reads_fair_ordering() {
        let seqset = seqset_for_reads(&[tseq("abc"), tseq("bcd")]);
        let seed = seqset.find(&tseq("bc"));
        assert!(seed.valid());
        let hits = seed.find_overlap_reads_fair(100, 2, &BitmapTrue, false);
        for pair in hits.windows(2) {
            assert!(pair[0].overlap_bases >= pair[1].overlap_bases);
        }
        let mut map = HashMap::new();
        assert!(seed.find_overlap_reads(&mut map, 100, 2, &BitmapTrue, false));
        for hit in &hits {
            assert!(map.contains_key(&hit.seqset_id));
        }
    }

    #[test]
    fn test_shared_prefix_length() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("ac")]);
        let r1 = seqset.find(&tseq("ab"));
        let r2 = seqset.find(&tseq("ac"));
        let expect = tseq("ab").shared_prefix(&tseq("ac")) as u32;
        assert_eq!(r1.shared_prefix_length(&r2).unwrap(), expect);
        assert_eq!(r2.shared_prefix_length(&r1).unwrap(), expect);
        // A range against itself shares its whole prefix.
        assert_eq!(r1.shared_prefix_length(&r1).unwrap(), r1.size());
    }
}

//! Read iterators: prefix reads and containing reads.
//!
//! Both are explicit state machines. The prefix iterator sweeps read ids
//! outward from a starting range, first forward then backward, using the
//! sparse-multi group bits to notice entry changes and the `shared[·]` table
//! to know when the sweep has left the prefix neighborhood. The containing
//! iterator drives a depth-first search of push_fronts to enumerate every
//! extension of a range, reporting reads long enough to cover it.

use crate::dna::BASES;
use crate::seqset::SeqsetRange;

use super::{Read, Readmap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Forward,
    Backward,
    Done,
}

/// Iterator over reads that are prefixes of entries around a range; yielded
/// by [`Readmap::get_prefix_reads`].
pub struct PrefixReadIter<'a> {
    rm: &'a Readmap,
    phase: Phase,
    read_id: u32,
    seqset_id: u64,
    min_size: u32,
    max_read_len: u32,
    orig_read_id: u32,
    orig_seqset_id: u64,
    orig_max_read_len: u32,
}

impl<'a> PrefixReadIter<'a> {
    pub(crate) fn empty(rm: &'a Readmap) -> PrefixReadIter<'a> {
        PrefixReadIter {
            rm,
            phase: Phase::Done,
            read_id: 0,
            seqset_id: 0,
            min_size: 0,
            max_read_len: 0,
            orig_read_id: 0,
            orig_seqset_id: 0,
            orig_max_read_len: 0,
        }
    }

    pub(crate) fn new(
        rm: &'a Readmap,
        read_id: u32,
        seqset_id: u64,
        min_size: u32,
        max_size: u32,
    ) -> PrefixReadIter<'a> {
        let mut iter = PrefixReadIter {
            rm,
            phase: Phase::Forward,
            read_id,
            seqset_id,
            min_size,
            max_read_len: max_size,
            orig_read_id: read_id,
            orig_seqset_id: seqset_id,
            orig_max_read_len: max_size,
        };
        iter.skip_non_matching();
        iter
    }

    fn advance(&mut self) {
        match self.phase {
            Phase::Forward => {
                debug_assert!((self.read_id as usize) < self.rm.size());
                self.read_id += 1;
            }
            Phase::Backward => {
                if self.read_id == 0 {
                    self.done_direction();
                } else {
                    self.read_id -= 1;
                }
            }
            Phase::Done => {}
        }
    }

    fn skip_non_matching(&mut self) {
        while self.phase != Phase::Done && !self.skip_non_matching_once() {}
    }

    /// Returns true when the current read matches and no more searching is
    /// needed.
    fn skip_non_matching_once(&mut self) -> bool {
        let forward = self.phase == Phase::Forward;
        let rm = self.rm;
        let ss = rm.seqset();

        let first_in_group;
        if forward {
            if self.read_id as usize == rm.size() {
                self.done_direction();
                return false; // Keep searching in the other direction.
            }
            first_in_group =
                self.read_id == 0 || rm.sparse().dest_is_first_in_group(self.read_id as u64);
        } else {
            let prev_read_id = self.read_id + 1;
            first_in_group = prev_read_id as usize == rm.size()
                || rm.sparse().dest_is_first_in_group(prev_read_id as u64);
        }

        if first_in_group {
            let new_seqset_id = rm.sparse().reverse_lookup(self.read_id as u64);
            while self.seqset_id != new_seqset_id {
                let shared;
                if forward {
                    debug_assert!(self.seqset_id < new_seqset_id);
                    self.seqset_id += 1;
                    shared = ss.entry_shared(self.seqset_id);
                } else {
                    debug_assert!(self.seqset_id > new_seqset_id);
                    shared = ss.entry_shared(self.seqset_id);
                    self.seqset_id -= 1;
                }
                debug_assert!(self.min_size > 0);
                if shared < self.min_size {
                    self.done_direction();
                    return false; // Keep searching in the other direction.
                }
                if shared < self.max_read_len {
                    self.max_read_len = shared;
                }
            }
        }

        if self.rm.get_readlength(self.read_id) > self.max_read_len {
            self.advance();
            return false;
        }

        true
    }

    fn done_direction(&mut self) {
        match self.phase {
            Phase::Forward => {
                self.phase = Phase::Backward;
                self.read_id = self.orig_read_id;
                self.seqset_id = self.orig_seqset_id;
                self.max_read_len = self.orig_max_read_len;
                self.advance();
            }
            Phase::Backward => {
                self.phase = Phase::Done;
            }
            Phase::Done => {}
        }
    }
}

impl<'a> Iterator for PrefixReadIter<'a> {
    type Item = Read<'a>;

    fn next(&mut self) -> Option<Read<'a>> {
        if self.phase == Phase::Done {
            return None;
        }
        let found = Read::with_entry(self.rm, self.read_id, self.seqset_id);
        self.advance();
        self.skip_non_matching();
        Some(found)
    }
}

/// Iterator over `(offset, read)` pairs for reads containing a range's
/// prefix as a substring; yielded by [`Readmap::get_reads_containing`].
pub struct ContainingReadIter<'a> {
    rm: &'a Readmap,
    range: Option<SeqsetRange<'a>>,
    orig_len: u32,
    read_id: u32,
    end_read_id: u32,
    offset: u32,
}

impl<'a> ContainingReadIter<'a> {
    pub(crate) fn empty(rm: &'a Readmap) -> ContainingReadIter<'a> {
        ContainingReadIter {
            rm,
            range: None,
            orig_len: 0,
            read_id: 0,
            end_read_id: 0,
            offset: 0,
        }
    }

    pub(crate) fn new(rm: &'a Readmap, r: SeqsetRange<'a>) -> ContainingReadIter<'a> {
        let mut iter = ContainingReadIter {
            rm,
            range: Some(r),
            orig_len: r.size(),
            read_id: 0,
            end_read_id: 0,
            offset: 0,
        };
        iter.start_entry();
        iter.skip_non_matching();
        iter
    }

    fn start_entry(&mut self) {
        let Some(r) = self.range else {
            return;
        };
        let (lo, hi) = self.rm.entry_to_index_range(r.begin(), r.end());
        self.read_id = lo as u32;
        self.end_read_id = hi as u32;
        // Number of bases pushed in front of the original prefix.
        self.offset = r.size() - self.orig_len;
    }

    fn skip_non_matching(&mut self) {
        while let Some(range) = self.range {
            if self.read_id == self.end_read_id {
                self.advance_entry();
                continue;
            }
            let read_len = self.rm.get_readlength(self.read_id);
            if read_len < range.size() {
                self.read_id += 1;
                continue;
            }
            return;
        }
    }

    /// Depth-first search over push_fronts.
    fn advance_entry(&mut self) {
        let Some(mut range) = self.range.take() else {
            return;
        };

        // Try descending first.
        for b in BASES {
            let pushed = range.pushed(b);
            if pushed.valid() {
                self.range = Some(pushed);
                self.start_entry();
                return;
            }
        }

        // Then move sideways, popping levels until back at the original.
        while range.size() > self.orig_len {
            let prev_base = self.rm.seqset().entry_first_base(range.begin());
            let popped = range.popped_front();
            for code in prev_base as u8 + 1..4 {
                let pushed = popped.pushed(crate::dna::Base::from_code(code));
                if pushed.valid() {
                    self.range = Some(pushed);
                    self.start_entry();
                    return;
                }
            }
            range = popped;
        }
        self.range = None;
    }
}

impl<'a> Iterator for ContainingReadIter<'a> {
    type Item = (u32, Read<'a>);

    fn next(&mut self) -> Option<(u32, Read<'a>)> {
        self.range?;
        let found = (self.offset, Read::new(self.rm, self.read_id));
        self.read_id += 1;
        self.skip_non_matching();
        Some(found)
    }
}

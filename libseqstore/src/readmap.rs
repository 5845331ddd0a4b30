//! The readmap: mapping original reads onto seqset entries.
//!
//! Every read is materialized twice, once in its original orientation and
//! once as its reverse complement, so forward queries find reverse hits by
//! symmetry. A sparse-multi map attaches the read ids to their seqset
//! entries; per read we keep the length, an orientation bit, and the mate
//! loop — a successor table that cycles
//! `forward -> RC -> mate -> mate RC -> forward` for paired reads and
//! `forward -> RC -> forward` for unpaired ones, encoding both the mate and
//! the reverse complement with a single pointer. Older archives with a
//! plain mate-pair table are accepted at open; `make_readmap::upgrade`
//! rebuilds the loop form.

pub mod iter;

use std::sync::{Arc, OnceLock};

use log::trace;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dna::Sequence;
use crate::error::SeqstoreError;
use crate::packed::PackedIntVec;
use crate::seqset::{Seqset, SeqsetBitmap, SeqsetRange};
use crate::sparse_multi::SparseMulti;
use crate::spiral::{OpenState, ProductVersion};
use crate::Result;

pub use self::iter::{ContainingReadIter, PrefixReadIter};

pub const READMAP_VERSION: ProductVersion = ProductVersion("1.2.0");

/// The sentinel in mate-pair tables for "no mate".
pub const NULL_READ_ID: u32 = u32::MAX;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadmapMetadata {
    pub seqset_uuid: String,
}

#[derive(Debug)]
pub(crate) enum MateTable {
    Loop(PackedIntVec),
    Pair(PackedIntVec),
}

#[derive(Debug)]
pub(crate) struct Pairing {
    pub(crate) table: MateTable,
    pub(crate) is_forward: PackedIntVec,
}

/// Paired/unpaired read and base counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PairStats {
    pub paired_reads: u64,
    pub paired_bases: u64,
    pub unpaired_reads: u64,
    pub unpaired_bases: u64,
}

#[derive(Debug)]
pub struct Readmap {
    seqset: Arc<Seqset>,
    metadata: ReadmapMetadata,
    sparse: SparseMulti,
    read_lengths: PackedIntVec,
    pairing: Option<Pairing>,
    read_len_limits: OnceLock<(u32, u32)>,
}

impl Readmap {
    /// Open a readmap over `seqset`; the recorded UUID must match.
    pub fn open(state: &OpenState, seqset: Arc<Seqset>) -> Result<Readmap> {
        state.enforce_max_version("readmap", READMAP_VERSION)?;
        let metadata: ReadmapMetadata = state.open_json("readmap.json")?;
        if metadata.seqset_uuid != seqset.uuid() {
            return Err(SeqstoreError::Identity(format!(
                "readmap was built over seqset {} but was opened with {}",
                metadata.seqset_uuid,
                seqset.uuid()
            )));
        }
        let sparse = SparseMulti::open(&state.subpart("read_ids"))?;
        if sparse.source_count() != seqset.size() as u64 {
            return Err(SeqstoreError::Consistency(format!(
                "readmap indexes {} seqset entries but the seqset has {}",
                sparse.source_count(),
                seqset.size()
            )));
        }
        let read_lengths = PackedIntVec::open(&state.subpart("read_lengths"))?;
        if read_lengths.len() != sparse.dest_count() {
            return Err(SeqstoreError::Consistency(format!(
                "readmap has {} lengths for {} reads",
                read_lengths.len(),
                sparse.dest_count()
            )));
        }

        let pairing = if state.subpart_present("mate_loop_ptr") {
            Some(Pairing {
                table: MateTable::Loop(PackedIntVec::open(&state.subpart("mate_loop_ptr"))?),
                is_forward: PackedIntVec::open(&state.subpart("is_forward"))?,
            })
        } else if state.subpart_present("mate_pair_ptr") {
            Some(Pairing {
                table: MateTable::Pair(PackedIntVec::open(&state.subpart("mate_pair_ptr"))?),
                is_forward: PackedIntVec::open(&state.subpart("is_forward"))?,
            })
        } else {
            None
        };
        if let Some(p) = &pairing {
            let table_len = match &p.table {
                MateTable::Loop(t) | MateTable::Pair(t) => t.len(),
            };
            if table_len != read_lengths.len() || p.is_forward.len() != read_lengths.len() {
                return Err(SeqstoreError::Consistency(
                    "readmap pairing tables disagree with read count".into(),
                ));
            }
        }

        trace!(
            "opened readmap over seqset {} with {} reads",
            metadata.seqset_uuid,
            read_lengths.len()
        );
        Ok(Readmap {
            seqset,
            metadata,
            sparse,
            read_lengths,
            pairing,
            read_len_limits: OnceLock::new(),
        })
    }

    /// Total number of oriented reads (forward plus reverse complement).
    pub fn size(&self) -> usize {
        self.read_lengths.len()
    }

    /// Number of underlying reads; half of [`Readmap::size`].
    pub fn read_count(&self) -> usize {
        self.size() / 2
    }

    pub fn seqset(&self) -> &Arc<Seqset> {
        &self.seqset
    }

    pub fn metadata(&self) -> &ReadmapMetadata {
        &self.metadata
    }

    pub(crate) fn sparse(&self) -> &SparseMulti {
        &self.sparse
    }

    pub(crate) fn read_lengths_table(&self) -> &PackedIntVec {
        &self.read_lengths
    }

    pub(crate) fn pairing_tables(&self) -> Option<&Pairing> {
        self.pairing.as_ref()
    }

    pub fn get_readlength(&self, read_id: u32) -> u32 {
        assert!((read_id as usize) < self.size());
        self.read_lengths.get(read_id as usize) as u32
    }

    pub fn has_pairing_data(&self) -> bool {
        self.pairing.is_some()
    }

    pub fn has_mate_loop(&self) -> bool {
        matches!(
            self.pairing,
            Some(Pairing {
                table: MateTable::Loop(_),
                ..
            })
        )
    }

    fn loop_successor(&self, read_id: u32) -> Result<u32> {
        match &self.pairing {
            Some(Pairing {
                table: MateTable::Loop(t),
                ..
            }) => Ok(t.get(read_id as usize) as u32),
            _ => Err(SeqstoreError::invalid_op(
                "readmap has no mate loop table; run an upgrade to construct it",
            )),
        }
    }

    pub fn has_mate(&self, read_id: u32) -> bool {
        match &self.pairing {
            None => false,
            Some(Pairing {
                table: MateTable::Loop(t),
                ..
            }) => {
                let mut mate_id = read_id;
                for _ in 0..2 {
                    mate_id = t.get(mate_id as usize) as u32;
                }
                mate_id != read_id
            }
            Some(Pairing {
                table: MateTable::Pair(t),
                ..
            }) => t.get(read_id as usize) as u32 != NULL_READ_ID,
        }
    }

    pub fn get_mate(&self, read_id: u32) -> Result<u32> {
        match &self.pairing {
            None => Err(SeqstoreError::invalid_op("no pairing data present")),
            Some(Pairing {
                table: MateTable::Loop(_),
                ..
            }) => {
                let rc_read_id = self.loop_successor(read_id)?;
                let mate_read_id = self.loop_successor(rc_read_id)?;
                if mate_read_id == read_id {
                    return Err(SeqstoreError::invalid_op("read has no mate"));
                }
                Ok(mate_read_id)
            }
            Some(Pairing {
                table: MateTable::Pair(t),
                ..
            }) => {
                let mate = t.get(read_id as usize) as u32;
                if mate == NULL_READ_ID {
                    return Err(SeqstoreError::invalid_op("read has no mate"));
                }
                Ok(mate)
            }
        }
    }

    pub fn get_mate_entry(&self, read_id: u32) -> Result<u64> {
        Ok(self.index_to_entry(self.get_mate(read_id)? as u64))
    }

    pub fn get_is_forward(&self, read_id: u32) -> bool {
        match &self.pairing {
            Some(p) => p.is_forward.get(read_id as usize) != 0,
            None => true,
        }
    }

    /// The read id of this read's reverse complement: one successor step for
    /// a forward read, three for a reverse one.
    pub fn get_rev_comp(&self, read_id: u32) -> Result<u32> {
        let steps = if self.get_is_forward(read_id) { 1 } else { 3 };
        let mut id = read_id;
        for _ in 0..steps {
            id = self.loop_successor(id)?;
        }
        Ok(id)
    }

    /// The reverse complement of the mate: the complementary walk.
    pub fn get_mate_rc(&self, read_id: u32) -> Result<u32> {
        let steps = if self.get_is_forward(read_id) { 3 } else { 1 };
        let mut id = read_id;
        for _ in 0..steps {
            id = self.loop_successor(id)?;
        }
        Ok(id)
    }

    /// The read id range attached to a seqset entry.
    pub fn entry_to_index(&self, entry_id: u64) -> (u64, u64) {
        self.sparse.lookup(entry_id)
    }

    pub fn entry_to_index_range(&self, entry_id_start: u64, entry_id_limit: u64) -> (u64, u64) {
        self.sparse.lookup_range(entry_id_start, entry_id_limit)
    }

    /// The seqset entry a read is attached to.
    pub fn index_to_entry(&self, read_id: u64) -> u64 {
        self.sparse.reverse_lookup(read_id)
    }

    /// A group id that is equal for two reads iff their seqset ids are
    /// equal.
    pub fn read_group(&self, read_id: u64) -> u64 {
        self.sparse.group_of_dest(read_id)
    }

    /// The seqset entry of a group id from [`Readmap::read_group`].
    pub fn group_entry(&self, group: u64) -> u64 {
        self.sparse.source_of_group(group)
    }

    pub fn get_read_by_id(&self, read_id: u32) -> Result<Read<'_>> {
        if read_id as usize >= self.size() {
            return Err(SeqstoreError::invalid_op(format!(
                "invalid read id {}",
                read_id
            )));
        }
        Ok(Read::new(self, read_id))
    }

    /// Total bases across underlying reads (each read counted once).
    pub fn num_bases(&self) -> u64 {
        let sum: u64 = (0..self.size())
            .map(|i| self.read_lengths.get(i))
            .sum();
        sum / 2
    }

    pub fn pair_stats(&self) -> PairStats {
        let mut stats = PairStats::default();
        for read_id in 0..self.size() as u32 {
            let len = self.get_readlength(read_id) as u64;
            if self.has_mate(read_id) {
                stats.paired_reads += 1;
                stats.paired_bases += len;
            } else {
                stats.unpaired_reads += 1;
                stats.unpaired_bases += len;
            }
        }
        // Each read was counted in both orientations.
        stats.paired_reads /= 2;
        stats.paired_bases /= 2;
        stats.unpaired_reads /= 2;
        stats.unpaired_bases /= 2;
        stats
    }

    fn read_len_limits(&self) -> (u32, u32) {
        *self.read_len_limits.get_or_init(|| {
            (0..self.size())
                .into_par_iter()
                .fold(
                    || (u32::MAX, 0u32),
                    |(lo, hi), i| {
                        let len = self.read_lengths.get(i) as u32;
                        (lo.min(len), hi.max(len))
                    },
                )
                .reduce(|| (u32::MAX, 0u32), |a, b| (a.0.min(b.0), a.1.max(b.1)))
        })
    }

    pub fn min_read_len(&self) -> u32 {
        self.read_len_limits().0
    }

    pub fn max_read_len(&self) -> u32 {
        self.read_len_limits().1
    }

    /// Iterate the reads whose sequence is a prefix of some entry of `r` and
    /// at least `min_len` bases long. The walk starts at `r` and expands
    /// outward while neighboring entries share enough prefix.
    pub fn get_prefix_reads<'a>(
        &'a self,
        r: &SeqsetRange<'a>,
        min_len: u32,
    ) -> Result<PrefixReadIter<'a>> {
        if !std::ptr::eq(self.seqset.as_ref(), r.seqset()) {
            return Err(SeqstoreError::invalid_op(
                "cannot use a readmap with a seqset it doesn't belong to",
            ));
        }
        let limit = min_len.max(self.min_read_len());
        if r.size() < limit {
            return Ok(PrefixReadIter::empty(self));
        }
        if !r.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot iterate prefix reads of an invalid range",
            ));
        }
        let initial_read_id = self.sparse.lookup_lower_bound(r.begin()) as u32;
        Ok(PrefixReadIter::new(
            self,
            initial_read_id,
            r.begin(),
            limit,
            r.size(),
        ))
    }

    /// The longest read whose sequence is a prefix of an entry in `r`.
    pub fn get_longest_prefix_read_id(&self, r: &SeqsetRange<'_>) -> Result<Option<u32>> {
        if !r.valid() {
            return Err(SeqstoreError::invalid_op(
                "cannot search an invalid range for prefix reads",
            ));
        }
        if r.size() < self.min_read_len() {
            return Ok(None);
        }
        let mut result = None;
        let mut result_read_len = 0;
        let (lo, hi) = self.entry_to_index_range(r.begin(), r.end());
        for read_id in lo..hi {
            let read_len = self.get_readlength(read_id as u32);
            if read_len > r.size() {
                continue;
            }
            if read_len > result_read_len {
                result = Some(read_id as u32);
                result_read_len = read_len;
                if read_len == r.size() {
                    break;
                }
            }
        }
        Ok(result)
    }

    pub fn get_longest_prefix_read(&self, r: &SeqsetRange<'_>) -> Result<Option<Read<'_>>> {
        Ok(self
            .get_longest_prefix_read_id(r)?
            .map(|id| Read::new(self, id)))
    }

    /// Iterate reads containing `r`'s prefix as a substring, yielding each
    /// read with the offset of that substring within it.
    pub fn get_reads_containing<'a>(
        &'a self,
        r: &SeqsetRange<'a>,
    ) -> Result<ContainingReadIter<'a>> {
        if !std::ptr::eq(self.seqset.as_ref(), r.seqset()) {
            return Err(SeqstoreError::invalid_op(
                "cannot use a readmap with a seqset it doesn't belong to",
            ));
        }
        if !r.valid() {
            return Ok(ContainingReadIter::empty(self));
        }
        Ok(ContainingReadIter::new(self, *r))
    }

    /// Per-base read coverage of `seq`, both strands summed.
    pub fn approx_coverage(&self, seq: &Sequence) -> Result<Vec<u32>> {
        let [fwd, rev] = self.approx_strand_coverage_split(seq)?;
        Ok(fwd.iter().zip(&rev).map(|(a, b)| a + b).collect())
    }

    /// Coverage of one strand; `forward` selects the original sequencing
    /// direction.
    pub fn approx_strand_coverage(&self, seq: &Sequence, forward: bool) -> Result<Vec<u32>> {
        let split = self.approx_strand_coverage_split(seq)?;
        let strand = if forward { 0 } else { 1 };
        Ok(split.into_iter().nth(strand).unwrap_or_default())
    }

    /// Per-base coverage of `seq` split by strand: `[forward, reverse]`.
    ///
    /// The walk pushes the complement of each base onto the front of a
    /// running range — building the reverse complement of `seq` — and at
    /// every position where the range narrows to a single entry, fans out
    /// the lengths of all reads attached to that entry.
    pub fn approx_strand_coverage_split(&self, seq: &Sequence) -> Result<[Vec<u32>; 2]> {
        if self.pairing.is_none() {
            return Err(SeqstoreError::Input(
                "strand coverage requires pairing data".into(),
            ));
        }
        let n = seq.len();
        let mut rstart = [vec![0u32; n], vec![0u32; n]];
        let mut rend = [vec![0u32; n], vec![0u32; n]];

        let mut c = self.seqset.empty_range();
        for (pos, base) in seq.iter().enumerate() {
            if !c.valid() {
                c = self.seqset.empty_range();
            }
            c = c.push_front_drop(base.complement(), 0)?;
            if c.valid() && c.begin() + 1 == c.end() {
                let (lo, hi) = self.sparse.lookup(c.begin());
                for index in lo..hi {
                    let read_len = self.get_readlength(index as u32);
                    if read_len > c.size() {
                        continue;
                    }
                    let Some(start) = (pos + 1).checked_sub(read_len as usize) else {
                        continue;
                    };
                    // We are walking the complement, so the strand flips.
                    let strand = usize::from(self.get_is_forward(index as u32));
                    rstart[strand][start] += 1;
                    rend[strand][pos] += 1;
                }
            }
        }

        let mut ret = [vec![0u32; n], vec![0u32; n]];
        for strand in 0..2 {
            let mut cur = 0u32;
            for i in 0..n {
                cur += rstart[strand][i];
                ret[strand][i] = cur;
                cur -= rend[strand][i];
            }
        }
        Ok(ret)
    }
}

impl SeqsetBitmap for Readmap {
    fn get_bit(&self, seqset_id: u64) -> bool {
        let (lo, hi) = self.sparse.lookup(seqset_id);
        lo != hi
    }
}

/// A lightweight handle to one oriented read.
#[derive(Clone, Copy)]
pub struct Read<'a> {
    rm: &'a Readmap,
    read_id: u32,
    seqset_id: u64,
}

impl<'a> Read<'a> {
    pub(crate) fn new(rm: &'a Readmap, read_id: u32) -> Read<'a> {
        Read {
            rm,
            read_id,
            seqset_id: rm.index_to_entry(read_id as u64),
        }
    }

    pub(crate) fn with_entry(rm: &'a Readmap, read_id: u32, seqset_id: u64) -> Read<'a> {
        Read {
            rm,
            read_id,
            seqset_id,
        }
    }

    pub fn read_id(&self) -> u32 {
        self.read_id
    }

    pub fn seqset_id(&self) -> u64 {
        self.seqset_id
    }

    /// Read length in bases.
    pub fn size(&self) -> u32 {
        self.rm.get_readlength(self.read_id)
    }

    pub fn is_original_orientation(&self) -> bool {
        self.rm.get_is_forward(self.read_id)
    }

    pub fn has_mate(&self) -> bool {
        self.rm.has_mate(self.read_id)
    }

    pub fn get_mate(&self) -> Result<Read<'a>> {
        Ok(Read::new(self.rm, self.rm.get_mate(self.read_id)?))
    }

    pub fn get_rev_comp(&self) -> Result<Read<'a>> {
        Ok(Read::new(self.rm, self.rm.get_rev_comp(self.read_id)?))
    }

    pub fn get_mate_rc(&self) -> Result<Read<'a>> {
        Ok(Read::new(self.rm, self.rm.get_mate_rc(self.read_id)?))
    }

    /// The seqset range covering exactly this read's sequence.
    pub fn seqset_entry(&self) -> Result<SeqsetRange<'a>> {
        self.rm
            .seqset
            .entry_range(self.seqset_id)?
            .truncate(self.size())
    }

    /// The read's sequence.
    pub fn sequence(&self) -> Result<Sequence> {
        self.rm
            .seqset
            .entry_range(self.seqset_id)?
            .sequence_prefix(self.size())
    }
}

impl std::fmt::Debug for Read<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Read(read_id={} seqset_id={})",
            self.read_id, self.seqset_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{readmap_for_records, seqset_for_reads, tseq};
    use crate::ReadRecord;

    fn paired(a: &str, b: &str) -> ReadRecord {
        ReadRecord {
            read: tseq(a),
            mate: Some(tseq(b)),
        }
    }

    fn single(a: &str) -> ReadRecord {
        ReadRecord {
            read: tseq(a),
            mate: None,
        }
    }

    fn reads_of(records: &[ReadRecord]) -> Vec<Sequence> {
        let mut out = Vec::new();
        for r in records {
            out.push(r.read.clone());
            if let Some(m) = &r.mate {
                out.push(m.clone());
            }
        }
        out
    }

    #[test]
    fn test_paired_mate_loop() {
        let records = vec![paired("abcde", "xyzwv")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, true);

        // Two orientations of each side of the pair.
        assert_eq!(rm.size(), 4);
        assert_eq!(rm.read_count(), 2);
        assert!(rm.has_pairing_data());
        assert!(rm.has_mate_loop());

        for read_id in 0..rm.size() as u32 {
            assert!(rm.has_mate(read_id));
            // Composing mate and reverse complement cycles back home.
            let mut id = read_id;
            for _ in 0..4 {
                id = rm.get_rev_comp(rm.get_mate(id).unwrap()).unwrap();
            }
            assert_eq!(id, read_id);
            // mate(mate(r)) == r
            assert_eq!(rm.get_mate(rm.get_mate(read_id).unwrap()).unwrap(), read_id);
            // rev_comp is an involution.
            assert_eq!(
                rm.get_rev_comp(rm.get_rev_comp(read_id).unwrap()).unwrap(),
                read_id
            );
            // The mate is in the same orientation, the RC the opposite.
            assert_eq!(
                rm.get_is_forward(read_id),
                rm.get_is_forward(rm.get_mate(read_id).unwrap())
            );
            assert_ne!(
                rm.get_is_forward(read_id),
                rm.get_is_forward(rm.get_rev_comp(read_id).unwrap())
            );
            // succ^4 == identity via the raw loop.
            let mut id = read_id;
            for _ in 0..4 {
                id = rm.loop_successor(id).unwrap();
            }
            assert_eq!(id, read_id);
        }

        // The mate of a forward "abcde" read is the forward "xyzwv" read.
        let abcde = rm.seqset().find(&tseq("abcde"));
        let (lo, hi) = rm.entry_to_index(abcde.begin());
        let forward: Vec<u32> = (lo..hi)
            .map(|i| i as u32)
            .filter(|&i| rm.get_is_forward(i))
            .collect();
        assert_eq!(forward.len(), 1);
        let mate = rm.get_mate(forward[0]).unwrap();
        let mate_entry = rm.index_to_entry(mate as u64);
        assert_eq!(
            rm.seqset()
                .entry_range(mate_entry)
                .unwrap()
                .sequence_prefix(rm.get_readlength(mate) )
                .unwrap(),
            tseq("xyzwv")
        );
    }

    #[test]
    fn test_unpaired_two_cycle() {
        let records = vec![single("abc")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, false);

        assert_eq!(rm.size(), 2);
        for read_id in 0..rm.size() as u32 {
            assert!(!rm.has_mate(read_id));
            assert!(rm.get_mate(read_id).is_err());
            // succ^2 == identity for unpaired reads.
            let mut id = read_id;
            for _ in 0..2 {
                id = rm.loop_successor(id).unwrap();
            }
            assert_eq!(id, read_id);
        }
        let stats = rm.pair_stats();
        assert_eq!(stats.unpaired_reads, 1);
        assert_eq!(stats.paired_reads, 0);
        assert_eq!(stats.unpaired_bases, tseq("abc").len() as u64);
    }

    #[test]
    fn test_read_sequences_match() {
        let records = vec![single("ab"), single("cd")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, false);

        for read_id in 0..rm.size() as u32 {
            let read = rm.get_read_by_id(read_id).unwrap();
            let seq = read.sequence().unwrap();
            assert_eq!(seq.len() as u32, read.size());
            // Forward reads equal an input read; reverse ones equal its RC.
            let inputs = [tseq("ab"), tseq("cd")];
            if read.is_original_orientation() {
                assert!(inputs.contains(&seq));
            } else {
                assert!(inputs.contains(&seq.rev_comp()));
            }
            // The invariant: len <= entry size, and the entry prefix is the
            // read's sequence.
            assert!(read.size() <= rm.seqset().entry_size(read.seqset_id()));
        }
    }

    #[test]
    fn test_min_max_read_len() {
        let records = vec![single("a"), single("abcd")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, false);
        assert_eq!(rm.min_read_len() as usize, tseq("a").len());
        assert_eq!(rm.max_read_len() as usize, tseq("abcd").len());
        assert_eq!(
            rm.num_bases() as usize,
            tseq("a").len() + tseq("abcd").len()
        );
    }

    #[test]
    fn test_get_prefix_reads() {
        let records = vec![single("ab"), single("abcd")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, false);

        // Prefix reads of find("ab") are the reads that are prefixes of
        // tseq("ab") itself: just the forward "ab" read.
        let r = seqset.find(&tseq("ab"));
        assert!(r.valid());
        let ids: Vec<u32> = rm
            .get_prefix_reads(&r, 1)
            .unwrap()
            .map(|read| read.read_id())
            .collect();
        assert!(!ids.is_empty());
        for &id in &ids {
            let seq = rm.get_read_by_id(id).unwrap().sequence().unwrap();
            assert!(tseq("ab").starts_with(&seq));
        }
        // Looking for reads at least as long as "abcd" excludes "ab".
        let long_range = seqset.find(&tseq("abcd"));
        let long_ids: Vec<u32> = rm
            .get_prefix_reads(&long_range, tseq("abcd").len() as u32)
            .unwrap()
            .map(|read| read.read_id())
            .collect();
        for &id in &long_ids {
            assert!(rm.get_readlength(id) >= tseq("abcd").len() as u32);
        }

        // Monotonicity: every prefix read of a query is a prefix read of
        // any extension of that query.
        let long_set: std::collections::HashSet<u32> = rm
            .get_prefix_reads(&long_range, 1)
            .unwrap()
            .map(|read| read.read_id())
            .collect();
        for id in ids {
            assert!(long_set.contains(&id));
        }
        // And the "abcd" read shows up only for the longer query.
        assert!(long_set.len() > 1);
    }

    #[test]
    fn test_get_reads_containing() {
        let records = vec![single("abcd")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, false);

        // The block for "c" is contained in "abcd" at block offset 2.
        let r = seqset.find(&tseq("c"));
        assert!(r.valid());
        let hits: Vec<(u32, u32)> = rm
            .get_reads_containing(&r)
            .unwrap()
            .map(|(offset, read)| (offset, read.read_id()))
            .collect();
        assert!(!hits.is_empty());
        for (offset, read_id) in hits {
            let read = rm.get_read_by_id(read_id).unwrap();
            let seq = read.sequence().unwrap();
            let sub = seq.subseq(offset as usize, tseq("c").len());
            assert_eq!(sub, tseq("c"));
        }
    }

    #[test]
    fn test_longest_prefix_read() {
        let records = vec![single("ab"), single("abcd")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, false);
        let r = seqset.find(&tseq("abcd"));
        let best = rm.get_longest_prefix_read(&r).unwrap().unwrap();
        assert_eq!(best.size() as usize, tseq("abcd").len());
    }

    #[test]
    fn test_approx_coverage() {
        let records = vec![single("abcd")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let rm = readmap_for_records(&seqset, &records, false);

        let target = tseq("abcd");
        let coverage = rm.approx_coverage(&target).unwrap();
        assert_eq!(coverage.len(), target.len());
        // The read covers its own sequence end to end.
        assert!(coverage.iter().all(|&c| c >= 1));

        // A sequence absent from the corpus has no coverage at its tail.
        let absent = tseq("zzzz");
        let none = rm.approx_coverage(&absent).unwrap();
        assert_eq!(none.iter().copied().max().unwrap_or(0), 0);
    }

    #[test]
    fn test_wrong_seqset_identity() {
        use crate::spiral::{SpiralCreate, SpiralOpen};
        let records = vec![single("ab")];
        let seqset = Arc::new(seqset_for_reads(&reads_of(&records)));
        let create = SpiralCreate::mem();
        crate::make_readmap::create_from_reads(
            &seqset,
            &records,
            false,
            crate::make_readmap::MAX_READ_LEN,
            &create.create(),
            &crate::context::Context::new(),
        )
        .unwrap();
        let open = SpiralOpen::from_mem(create.close_mem().unwrap()).unwrap();

        // Opening against an unrelated seqset must fail with an identity
        // error.
        let other = Arc::new(seqset_for_reads(&[tseq("zz")]));
        let err = Readmap::open(&open.open(), other).unwrap_err();
        assert!(matches!(err, SeqstoreError::Identity(_)));
    }
}

//! The merger: emit a merged seqset from flattened inputs and their
//! mergemaps.
//!
//! Once the mergemaps are built, every merged row is fully determined: the
//! inputs contributing to row `x` are those whose bit `x` is set, and the
//! row's sequence is the longest of the contributors' entries at their
//! respective ranks. A single pass of length `|M|` fills entry sizes, shared
//! prefixes and the `prev_*` bitmaps with the same four-cursor sweep used by
//! the from-reads builder, then finalizes.

use log::debug;

use crate::context::Context;
use crate::dna::Sequence;
use crate::error::SeqstoreError;
use crate::mergemap::SeqsetMergemap;
use crate::seqset::{compute_base_positions, populate_seqset_rows, Seqset, SeqsetBuilder};
use crate::seqset_flat::SeqsetFlat;
use crate::Result;

pub struct SeqsetMerger<'a> {
    flats: Vec<&'a SeqsetFlat>,
    mergemaps: Vec<&'a SeqsetMergemap>,
    num_seqs: usize,
}

impl<'a> SeqsetMerger<'a> {
    pub fn new(
        flats: Vec<&'a SeqsetFlat>,
        mergemaps: Vec<&'a SeqsetMergemap>,
    ) -> Result<SeqsetMerger<'a>> {
        if flats.is_empty() || flats.len() != mergemaps.len() {
            return Err(SeqstoreError::Input(format!(
                "merger needs matching inputs, got {} flats and {} mergemaps",
                flats.len(),
                mergemaps.len()
            )));
        }
        let num_seqs = mergemaps[0].bitcount().len();
        for (j, (flat, mm)) in flats.iter().zip(&mergemaps).enumerate() {
            if mm.bitcount().len() != num_seqs {
                return Err(SeqstoreError::Consistency(format!(
                    "mergemap {} covers {} merged entries, expected {}",
                    j,
                    mm.bitcount().len(),
                    num_seqs
                )));
            }
            if mm.bitcount().total_set() != flat.len() as u64 {
                return Err(SeqstoreError::Consistency(format!(
                    "mergemap {} has {} set bits for {} input entries",
                    j,
                    mm.bitcount().total_set(),
                    flat.len()
                )));
            }
            if flat.seqset_uuid() != mm.metadata().orig_seqset_uuid {
                return Err(SeqstoreError::Identity(format!(
                    "flat {} belongs to seqset {} but its mergemap says {}",
                    j,
                    flat.seqset_uuid(),
                    mm.metadata().orig_seqset_uuid
                )));
            }
            mm.bitcount().make_select_index();
        }
        Ok(SeqsetMerger {
            flats,
            mergemaps,
            num_seqs,
        })
    }

    /// The merged entry at row `x`: the longest entry among contributing
    /// inputs.
    fn seq_at(&self, x: u64) -> Result<Sequence> {
        let mut best: Option<Sequence> = None;
        for (flat, mm) in self.flats.iter().zip(&self.mergemaps) {
            let bc = mm.bitcount();
            if !bc.get(x as usize) {
                continue;
            }
            let cand = flat.get(bc.rank(x as usize) as usize);
            match &best {
                Some(b) if b.len() >= cand.len() => {}
                _ => best = Some(cand),
            }
        }
        best.ok_or_else(|| {
            SeqstoreError::Consistency(format!("merged row {} has no contributing input", x))
        })
    }

    /// Emit and finalize the merged seqset.
    pub fn build(&self, ctx: &Context) -> Result<Seqset> {
        let max_entry_len = self
            .flats
            .iter()
            .map(|f| f.max_entry_len())
            .max()
            .unwrap_or(0);
        debug!(
            "merging {} inputs into {} entries (max len {})",
            self.flats.len(),
            self.num_seqs,
            max_entry_len
        );
        let builder = SeqsetBuilder::new(self.num_seqs, max_entry_len);
        let base_pos = compute_base_positions(self.num_seqs as u64, &|x| {
            Ok(self.seq_at(x)?.get(0))
        })?;
        populate_seqset_rows(&builder, base_pos, &|x| self.seq_at(x), ctx)?;
        builder.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mergemap::{MakeMergemap, SeqsetMergemapBuilder};
    use crate::testutil::{naive_entries, seqset_for_reads, tseq};
    use uuid::Uuid;

    fn merge_seqsets(parts: &[Vec<Sequence>]) -> (Vec<Seqset>, Seqset) {
        let ctx = Context::new().with_threads(2);
        let seqsets: Vec<_> = parts.iter().map(|p| seqset_for_reads(p)).collect();
        let flats: Vec<_> = seqsets
            .iter()
            .map(|s| SeqsetFlat::build(s, &ctx).unwrap())
            .collect();
        let mut counter = MakeMergemap::new(flats.iter().collect()).unwrap();
        counter.build(&ctx).unwrap();

        let merged_uuid = Uuid::new_v4().to_string();
        let mergemaps: Vec<_> = seqsets
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let b = SeqsetMergemapBuilder::new(
                    s.uuid(),
                    &merged_uuid,
                    counter.total_merged_entries(),
                );
                counter.fill_mergemap(i, &b);
                b.finalize()
            })
            .collect();

        let merger = SeqsetMerger::new(flats.iter().collect(), mergemaps.iter().collect()).unwrap();
        let merged = merger.build(&ctx).unwrap();
        (seqsets, merged)
    }

    fn entry_seqs(seqset: &Seqset) -> Vec<Sequence> {
        (0..seqset.size() as u64)
            .map(|i| seqset.entry_range(i).unwrap().sequence().unwrap())
            .collect()
    }

    #[test]
    fn test_merge_single_is_identity() {
        let reads = vec![tseq("abc"), tseq("de")];
        let (inputs, merged) = merge_seqsets(&[reads]);
        assert_eq!(entry_seqs(&inputs[0]), entry_seqs(&merged));
    }

    #[test]
    fn test_merge_two_matches_naive_union() {
        let p1 = vec![tseq("abc"), tseq("cde")];
        let p2 = vec![tseq("abc"), tseq("efg")];
        let (_, merged) = merge_seqsets(&[p1.clone(), p2.clone()]);
        let all: Vec<Sequence> = p1.iter().chain(&p2).cloned().collect();
        assert_eq!(entry_seqs(&merged), naive_entries(&all));
    }

    #[test]
    fn test_merge_disjoint_counts() {
        let p1 = vec![tseq("ab"), tseq("bc")];
        let p2 = vec![tseq("AB"), tseq("BC")];
        let (inputs, merged) = merge_seqsets(&[p1.clone(), p2.clone()]);
        let all: Vec<Sequence> = p1.iter().chain(&p2).cloned().collect();
        let expected = naive_entries(&all);
        assert_eq!(merged.size(), expected.len());
        // Every input entry is the prefix of its translated merged entry.
        for input in &inputs {
            for i in 0..input.size() as u64 {
                let seq = input.entry_range(i).unwrap().sequence().unwrap();
                let hit = merged.find(&seq);
                assert!(hit.valid());
            }
        }
    }

    #[test]
    fn test_merge_commutes_up_to_ordering() {
        let p1 = vec![tseq("ab"), tseq("cd")];
        let p2 = vec![tseq("ce"), tseq("fg")];
        let (_, m12) = merge_seqsets(&[p1.clone(), p2.clone()]);
        let (_, m21) = merge_seqsets(&[p2, p1]);
        assert_eq!(entry_seqs(&m12), entry_seqs(&m21));
    }

    #[test]
    fn test_merged_seqset_is_consistent() {
        let (_, merged) = merge_seqsets(&[
            vec![tseq("ab"), tseq("bc")],
            vec![tseq("bd"), tseq("xy")],
        ]);
        // Finalize already checked the prev totals; spot-check navigation.
        for i in 0..merged.size() as u64 {
            let r = merged.entry_range(i).unwrap();
            let seq = r.sequence().unwrap();
            assert_eq!(merged.find(&seq).begin(), i);
        }
    }
}

//! Mergemaps: translating seqset ids into a merged id space.
//!
//! When input seqsets `P_1..P_K` merge into `M`, each input gets a bit array
//! of length `|M|` where bit `x` is set iff `entry_M(x)` starts with some
//! entry of that input. The array doubles as the id translation: the entry
//! with index `y` in `P_i` corresponds to merged id `select(y)`, and a set
//! merged id `x` maps back to input index `rank(x)`.
//!
//! [`MakeMergemap`] computes the bit arrays without building the merged
//! seqset: the largest input is chunked by entry index, each chunk's
//! sequence interval is located in the other inputs by binary search, and a
//! priority-queue merge walks the chunk emitting one merged row per prefix
//! cluster.

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bitcount::{Bitcount, BitcountBuilder};
use crate::context::Context;
use crate::dna::Sequence;
use crate::error::SeqstoreError;
use crate::seqset_flat::SeqsetFlat;
use crate::spiral::{CreateState, OpenState, ProductVersion};
use crate::Result;

pub const MERGEMAP_VERSION: ProductVersion = ProductVersion("1.0.0");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergemapMetadata {
    pub orig_seqset_uuid: String,
    pub merged_seqset_uuid: String,
}

/// A finalized mergemap for one input seqset.
pub struct SeqsetMergemap {
    metadata: MergemapMetadata,
    merged_entries: Bitcount,
}

impl SeqsetMergemap {
    pub fn metadata(&self) -> &MergemapMetadata {
        &self.metadata
    }

    pub fn bitcount(&self) -> &Bitcount {
        &self.merged_entries
    }

    pub fn store(&self, state: &CreateState) -> Result<()> {
        state.set_version(MERGEMAP_VERSION)?;
        state.create_json("mergemap.json", &self.metadata)?;
        self.merged_entries.store(&state.subpart("merged_entries"))
    }

    pub fn open(state: &OpenState) -> Result<SeqsetMergemap> {
        state.enforce_max_version("mergemap", MERGEMAP_VERSION)?;
        let metadata: MergemapMetadata = state.open_json("mergemap.json")?;
        let merged_entries = Bitcount::open(&state.subpart("merged_entries"))?;
        merged_entries.make_select_index();
        Ok(SeqsetMergemap {
            metadata,
            merged_entries,
        })
    }
}

pub struct SeqsetMergemapBuilder {
    metadata: MergemapMetadata,
    bits: BitcountBuilder,
}

impl SeqsetMergemapBuilder {
    pub fn new(
        orig_seqset_uuid: &str,
        merged_seqset_uuid: &str,
        merged_entry_count: usize,
    ) -> SeqsetMergemapBuilder {
        SeqsetMergemapBuilder {
            metadata: MergemapMetadata {
                orig_seqset_uuid: orig_seqset_uuid.to_string(),
                merged_seqset_uuid: merged_seqset_uuid.to_string(),
            },
            bits: BitcountBuilder::new(merged_entry_count),
        }
    }

    pub fn set(&self, index: usize) {
        self.bits.set(index, true);
    }

    pub fn finalize(self) -> SeqsetMergemap {
        let merged_entries = self.bits.finalize();
        merged_entries.make_select_index();
        SeqsetMergemap {
            metadata: self.metadata,
            merged_entries,
        }
    }
}

/// Per-chunk merge outcome: how many merged rows the chunk produced and
/// which inputs contributed to each row.
struct ChunkResult {
    merged_entries: usize,
    bits: Vec<Vec<bool>>,
}

/// Counts shared sequences between multiple flattened seqsets and fills the
/// per-input mergemaps.
pub struct MakeMergemap<'a> {
    flats: Vec<&'a SeqsetFlat>,
    biggest: usize,
    chunks: Vec<ChunkResult>,
    total_merged_entries: usize,
}

impl<'a> MakeMergemap<'a> {
    pub fn new(flats: Vec<&'a SeqsetFlat>) -> Result<MakeMergemap<'a>> {
        if flats.is_empty() {
            return Err(SeqstoreError::Input(
                "mergemap construction needs at least one input".into(),
            ));
        }
        let biggest = (0..flats.len())
            .max_by_key(|&j| flats[j].len())
            .unwrap_or(0);
        Ok(MakeMergemap {
            flats,
            biggest,
            chunks: Vec::new(),
            total_merged_entries: 0,
        })
    }

    pub fn total_merged_entries(&self) -> usize {
        self.total_merged_entries
    }

    /// Run the chunked merge count.
    pub fn build(&mut self, ctx: &Context) -> Result<()> {
        let biggest_len = self.flats[self.biggest].len();
        let chunk_size = (biggest_len / (ctx.threads() * 4).max(1)).max(1);
        let ranges: Vec<(usize, usize)> = (0..biggest_len)
            .step_by(chunk_size)
            .map(|start| (start, (start + chunk_size).min(biggest_len)))
            .collect();
        debug!(
            "mergemap: {} inputs, biggest has {} entries, {} chunks",
            self.flats.len(),
            biggest_len,
            ranges.len()
        );

        let chunks: Result<Vec<ChunkResult>> = ranges
            .into_par_iter()
            .map(|(start, limit)| self.count_range(start, limit, ctx))
            .collect();
        self.chunks = chunks?;
        self.total_merged_entries = self.chunks.iter().map(|c| c.merged_entries).sum();

        if biggest_len == 0 {
            // All inputs are empty (the biggest is). Nothing to merge.
            self.total_merged_entries = 0;
        }
        debug!("mergemap: {} merged entries", self.total_merged_entries);
        Ok(())
    }

    /// First index in `flat` belonging to the chunk that starts at
    /// `boundary`. An entry that is a prefix of the boundary sequence counts
    /// as part of the boundary's chunk, so prefix clusters never straddle a
    /// chunk split.
    fn chunk_lower_bound(flat: &SeqsetFlat, boundary: &Sequence) -> usize {
        let (mut lo, mut hi) = (0usize, flat.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            let entry = flat.get(mid);
            if entry < *boundary && !boundary.starts_with(&entry) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn count_range(&self, start: usize, limit: usize, ctx: &Context) -> Result<ChunkResult> {
        let k = self.flats.len();
        let biggest_flat = self.flats[self.biggest];
        let biggest_len = biggest_flat.len();

        // Locate this chunk's sequence interval in every input.
        let mut bounds = Vec::with_capacity(k);
        for (j, flat) in self.flats.iter().enumerate() {
            let lo = if start == 0 {
                0
            } else if j == self.biggest {
                start
            } else {
                Self::chunk_lower_bound(flat, &biggest_flat.get(start))
            };
            let hi = if limit == biggest_len {
                flat.len()
            } else if j == self.biggest {
                limit
            } else {
                Self::chunk_lower_bound(flat, &biggest_flat.get(limit))
            };
            bounds.push((lo, hi));
        }

        struct QueueEntry {
            seq: Sequence,
            input: usize,
            idx: usize,
        }
        impl PartialEq for QueueEntry {
            fn eq(&self, rhs: &Self) -> bool {
                self.seq == rhs.seq && self.input == rhs.input && self.idx == rhs.idx
            }
        }
        impl Eq for QueueEntry {}
        impl PartialOrd for QueueEntry {
            fn partial_cmp(&self, rhs: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(rhs))
            }
        }
        impl Ord for QueueEntry {
            fn cmp(&self, rhs: &Self) -> std::cmp::Ordering {
                self.seq
                    .cmp(&rhs.seq)
                    .then_with(|| self.input.cmp(&rhs.input))
                    .then_with(|| self.idx.cmp(&rhs.idx))
            }
        }

        use std::cmp::Reverse;
        use std::collections::BinaryHeap;
        let mut queue: BinaryHeap<Reverse<QueueEntry>> = BinaryHeap::new();
        let mut next_idx: Vec<usize> = Vec::with_capacity(k);
        for (j, &(lo, hi)) in bounds.iter().enumerate() {
            next_idx.push(lo);
            if lo < hi {
                queue.push(Reverse(QueueEntry {
                    seq: self.flats[j].get(lo),
                    input: j,
                    idx: lo,
                }));
                next_idx[j] = lo + 1;
            }
        }

        let mut bits: Vec<Vec<bool>> = vec![Vec::new(); k];
        let mut merged = 0usize;
        let mut advance = |queue: &mut BinaryHeap<Reverse<QueueEntry>>,
                           next_idx: &mut Vec<usize>,
                           input: usize| {
            if next_idx[input] < bounds[input].1 {
                let idx = next_idx[input];
                queue.push(Reverse(QueueEntry {
                    seq: self.flats[input].get(idx),
                    input,
                    idx,
                }));
                next_idx[input] = idx + 1;
            }
        };

        while let Some(Reverse(smallest)) = queue.pop() {
            if merged % 4096 == 0 {
                ctx.check_cancelled()?;
            }
            advance(&mut queue, &mut next_idx, smallest.input);
            let mut contributors = vec![false; k];
            contributors[smallest.input] = true;
            let mut longest = smallest.seq;
            // Absorb every queued entry the current longest is a prefix of
            // (or equal to); the cluster collapses to one merged row.
            while let Some(Reverse(top)) = queue.peek() {
                if !top.seq.starts_with(&longest) {
                    break;
                }
                let Some(Reverse(absorbed)) = queue.pop() else {
                    break;
                };
                advance(&mut queue, &mut next_idx, absorbed.input);
                contributors[absorbed.input] = true;
                longest = absorbed.seq;
            }
            for (j, bit) in contributors.into_iter().enumerate() {
                bits[j].push(bit);
            }
            merged += 1;
        }

        Ok(ChunkResult {
            merged_entries: merged,
            bits,
        })
    }

    /// Fill `builder`'s bit array for one input from the chunk results.
    pub fn fill_mergemap(&self, input_id: usize, builder: &SeqsetMergemapBuilder) {
        let mut base = 0usize;
        for chunk in &self.chunks {
            for (local, &bit) in chunk.bits[input_id].iter().enumerate() {
                if bit {
                    builder.set(base + local);
                }
            }
            base += chunk.merged_entries;
        }
    }
}

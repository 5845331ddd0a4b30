//! Flat seqsets: the entries of a seqset serialized in id order with random
//! access, the input format of the merge pipeline.
//!
//! Entries are 2-bit packed and byte-aligned (each entry starts on a byte
//! boundary) so partitions can be extracted in parallel and sliced without
//! bit arithmetic. Flattening binds each worker to a contiguous DNA-space
//! partition — a prefix of 1..=3 bases — mirroring how the id space of a
//! sorted seqset splits:
//!
//! ```text
//! partitions   ranges covered
//!      4       A.., C.., G.., T..
//!     16       AA.., AC.., AG.., AT.., CA.., ... , TT..
//!     64       AAA.., AAC.., ... , TTT..
//! ```

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::dna::{packed_len, Base, Sequence};
use crate::error::SeqstoreError;
use crate::membuf::MemBuf;
use crate::packed::{MutablePackedIntVec, PackedIntVec};
use crate::seqset::Seqset;
use crate::spiral::{CreateState, OpenState, ProductVersion};
use crate::Result;

pub const FLAT_VERSION: ProductVersion = ProductVersion("1.0.0");

#[derive(Debug, Serialize, Deserialize)]
struct FlatMetadata {
    num_entries: u64,
    seqset_uuid: String,
    max_entry_len: u32,
}

pub struct SeqsetFlat {
    sizes: PackedIntVec,
    offsets: PackedIntVec,
    data: MemBuf,
    seqset_uuid: String,
    max_entry_len: u32,
}

impl SeqsetFlat {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn seqset_uuid(&self) -> &str {
        &self.seqset_uuid
    }

    pub fn max_entry_len(&self) -> u32 {
        self.max_entry_len
    }

    /// The `idx`-th entry sequence.
    pub fn get(&self, idx: usize) -> Sequence {
        let len = self.sizes.get(idx) as usize;
        let start = self.offsets.get(idx) as usize;
        Sequence::from_packed(&self.data[start..start + packed_len(len)], len)
    }

    /// The base-`count` prefix sequence of partition `partition` out of
    /// `4^depth`.
    fn partition_prefix(partition: usize, depth: u32) -> Sequence {
        let mut seq = Sequence::with_capacity(depth as usize);
        for level in (0..depth).rev() {
            seq.push(Base::from_code(((partition >> (2 * level)) & 3) as u8));
        }
        seq
    }

    /// First entry id whose sequence is >= `prefix`.
    fn lower_bound_prefix(seqset: &Seqset, prefix: &Sequence) -> Result<u64> {
        let (mut lo, mut hi) = (0u64, seqset.size() as u64);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let probe = seqset
                .entry_range(mid)?
                .sequence_prefix(prefix.len() as u32)?;
            if probe < *prefix {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Flatten `seqset` into memory, one worker per DNA-space partition.
    pub fn build(seqset: &Seqset, ctx: &Context) -> Result<SeqsetFlat> {
        seqset.populate_pop_front_cache()?;
        let n = seqset.size();
        let max_entry_len = seqset.max_entry_len();

        let sizes = MutablePackedIntVec::new(n, max_entry_len as u64);
        let mut total_bytes = 0u64;
        let offsets = MutablePackedIntVec::new(
            n + 1,
            (n as u64).saturating_mul(packed_len(max_entry_len as usize) as u64),
        );
        for i in 0..n {
            let size = seqset.entry_size(i as u64);
            sizes.set(i, size as u64);
            offsets.set(i, total_bytes);
            total_bytes += packed_len(size as usize) as u64;
        }
        offsets.set(n, total_bytes);

        // 4^depth partitions, enough for the worker count.
        let depth = match ctx.threads() {
            0..=4 => 1u32,
            5..=16 => 2,
            _ => 3,
        };
        let partitions = 4usize.pow(depth);
        let mut boundaries = Vec::with_capacity(partitions + 1);
        boundaries.push(0u64);
        for p in 1..partitions {
            let prefix = Self::partition_prefix(p, depth);
            boundaries.push(Self::lower_bound_prefix(seqset, &prefix)?);
        }
        boundaries.push(n as u64);
        debug!(
            "flattening {} entries ({} bytes) across {} partitions",
            n, total_bytes, partitions
        );

        let mut data = vec![0u8; total_bytes as usize];
        let mut slices: Vec<(&mut [u8], u64, u64)> = Vec::with_capacity(partitions);
        let mut rest = data.as_mut_slice();
        for p in 0..partitions {
            let (lo, hi) = (boundaries[p], boundaries[p + 1]);
            let byte_lo = offsets.get(lo as usize);
            let byte_hi = offsets.get(hi as usize);
            let (head, tail) = rest.split_at_mut((byte_hi - byte_lo) as usize);
            slices.push((head, lo, hi));
            rest = tail;
        }

        slices
            .into_par_iter()
            .try_for_each(|(slice, lo, hi)| -> Result<()> {
                let mut at = 0usize;
                for id in lo..hi {
                    if id % 1024 == 0 {
                        ctx.check_cancelled()?;
                    }
                    let seq = seqset.entry_range(id)?.sequence()?;
                    let bytes = seq.as_packed();
                    slice[at..at + bytes.len()].copy_from_slice(bytes);
                    at += bytes.len();
                }
                Ok(())
            })?;

        Ok(SeqsetFlat {
            sizes: sizes.into_reader(),
            offsets: offsets.into_reader(),
            data: MemBuf::from_vec(data),
            seqset_uuid: seqset.uuid().to_string(),
            max_entry_len,
        })
    }

    pub fn store(&self, state: &CreateState) -> Result<()> {
        state.set_version(FLAT_VERSION)?;
        state.create_json(
            "flat.json",
            &FlatMetadata {
                num_entries: self.len() as u64,
                seqset_uuid: self.seqset_uuid.clone(),
                max_entry_len: self.max_entry_len,
            },
        )?;
        self.sizes.store(&state.subpart("sizes"))?;
        self.offsets.store(&state.subpart("offsets"))?;
        state.put_part("sequences", self.data.as_slice().to_vec());
        Ok(())
    }

    pub fn open(state: &OpenState) -> Result<SeqsetFlat> {
        state.enforce_max_version("seqset_flat", FLAT_VERSION)?;
        let metadata: FlatMetadata = state.open_json("flat.json")?;
        let sizes = PackedIntVec::open(&state.subpart("sizes"))?;
        let offsets = PackedIntVec::open(&state.subpart("offsets"))?;
        let data = state.open_part("sequences")?;
        if sizes.len() as u64 != metadata.num_entries || offsets.len() != sizes.len() + 1 {
            return Err(SeqstoreError::Consistency(format!(
                "flat seqset tables disagree: {} entries, {} sizes, {} offsets",
                metadata.num_entries,
                sizes.len(),
                offsets.len()
            )));
        }
        Ok(SeqsetFlat {
            sizes,
            offsets,
            data,
            seqset_uuid: metadata.seqset_uuid,
            max_entry_len: metadata.max_entry_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiral::{SpiralCreate, SpiralOpen};
    use crate::testutil::{seqset_for_reads, tseq};

    #[test]
    fn test_flatten_matches_entries() {
        let seqset = seqset_for_reads(&[tseq("ab"), tseq("bc"), tseq("zz")]);
        for threads in [1, 7, 32] {
            let ctx = Context::new().with_threads(threads);
            let flat = SeqsetFlat::build(&seqset, &ctx).unwrap();
            assert_eq!(flat.len(), seqset.size());
            assert_eq!(flat.seqset_uuid(), seqset.uuid());
            for i in 0..seqset.size() {
                assert_eq!(
                    flat.get(i),
                    seqset.entry_range(i as u64).unwrap().sequence().unwrap(),
                    "entry {} with {} threads",
                    i,
                    threads
                );
            }
        }
    }

    #[test]
    fn test_partition_prefix() {
        assert_eq!(SeqsetFlat::partition_prefix(0, 1).to_string(), "A");
        assert_eq!(SeqsetFlat::partition_prefix(3, 1).to_string(), "T");
        assert_eq!(SeqsetFlat::partition_prefix(0, 2).to_string(), "AA");
        assert_eq!(SeqsetFlat::partition_prefix(6, 2).to_string(), "CG");
        assert_eq!(SeqsetFlat::partition_prefix(63, 3).to_string(), "TTT");
    }

    #[test]
    fn test_empty_seqset() {
        let seqset = crate::seqset::SeqsetBuilder::new(0, 0).finalize().unwrap();
        let flat = SeqsetFlat::build(&seqset, &Context::new()).unwrap();
        assert_eq!(flat.len(), 0);
    }

    #[test]
    fn test_store_open_round_trip() {
        let seqset = seqset_for_reads(&[tseq("abc")]);
        let ctx = Context::new();
        let flat = SeqsetFlat::build(&seqset, &ctx).unwrap();
        let create = SpiralCreate::mem();
        flat.store(&create.create().subpart("flat")).unwrap();
        let open = SpiralOpen::from_mem(create.close_mem().unwrap()).unwrap();
        let decoded = SeqsetFlat::open(&open.open().subpart("flat")).unwrap();
        assert_eq!(decoded.len(), flat.len());
        for i in 0..flat.len() {
            assert_eq!(decoded.get(i), flat.get(i));
        }
    }
}

//! Utilities for tests: a canonical ASCII-to-DNA mapping and a naive
//! reference construction of the entry set.
//!
//! `tseq` maps every ASCII byte to a distinct 5-base block (a `G` marker
//! followed by the byte's four base-4 digits, most significant first), so
//! short readable strings stand in for reads while staying distinct.
//!
//! `naive_entries` derives a seqset's entry set the slow, obviously correct
//! way — both orientations, every suffix, prefix-deduplicated — and
//! `seqset_for_reads` turns that directly into a finalized [`Seqset`]. The
//! production builder is tested against this construction.

use std::sync::Arc;

use crate::context::Context;
use crate::dna::{Base, Sequence};
use crate::readmap::Readmap;
use crate::seqset::{compute_base_positions, populate_seqset_rows, Seqset, SeqsetBuilder};
use crate::spiral::{SpiralCreate, SpiralOpen};
use crate::ReadRecord;

/// Map an ASCII string to a DNA sequence of length `5 * s.len()`; distinct
/// strings give distinct sequences.
pub fn tseq(s: &str) -> Sequence {
    let mut out = Sequence::with_capacity(5 * s.len());
    for &byte in s.as_bytes() {
        out.push(Base::G);
        for shift in [6u8, 4, 2, 0] {
            out.push(Base::from_code((byte >> shift) & 3));
        }
    }
    out
}

/// The reverse complement of [`tseq`].
pub fn tseq_rc(s: &str) -> Sequence {
    tseq(s).rev_comp()
}

/// The entry set of a seqset over `reads`, computed naively: take both
/// orientations of every read, add every non-empty suffix, sort, and drop
/// any sequence that is a prefix of another (keeping the longer).
pub fn naive_entries(reads: &[Sequence]) -> Vec<Sequence> {
    let mut all = Vec::new();
    for read in reads {
        for oriented in [read.clone(), read.rev_comp()] {
            for k in 0..oriented.len() {
                all.push(oriented.subseq(k, oriented.len() - k));
            }
        }
    }
    all.sort();
    dedup_prefixes(&mut all);
    all
}

/// Remove adjacent prefix duplicates from a sorted list, keeping the longer
/// representative of each prefix chain.
pub fn dedup_prefixes(sorted: &mut Vec<Sequence>) {
    let mut out: Vec<Sequence> = Vec::with_capacity(sorted.len());
    for seq in sorted.drain(..) {
        match out.last() {
            Some(last) if seq.starts_with(last) => {
                *out.last_mut().unwrap() = seq;
            }
            _ => out.push(seq),
        }
    }
    *sorted = out;
}

/// Build a finalized seqset over `reads` from the naive entry set.
pub fn seqset_for_reads(reads: &[Sequence]) -> Seqset {
    seqset_from_entries(&naive_entries(reads))
}

/// Build a finalized seqset from a sorted, prefix-deduplicated entry list.
pub fn seqset_from_entries(entries: &[Sequence]) -> Seqset {
    let max_len = entries.iter().map(|e| e.len()).max().unwrap_or(0);
    let builder = SeqsetBuilder::new(entries.len(), max_len as u32);
    let base_pos =
        compute_base_positions(entries.len() as u64, &|i| Ok(entries[i as usize].get(0)))
            .expect("base positions of a naive entry list cannot fail");
    let ctx = Context::new();
    populate_seqset_rows(&builder, base_pos, &|i| Ok(entries[i as usize].clone()), &ctx)
        .expect("populating a naive seqset cannot fail");
    builder.finalize().expect("naive entry set must finalize")
}

/// Build and reopen an in-memory readmap over `seqset` for `records`.
pub fn readmap_for_records(
    seqset: &Arc<Seqset>,
    records: &[ReadRecord],
    is_paired: bool,
) -> Readmap {
    let create = SpiralCreate::mem();
    crate::make_readmap::create_from_reads(
        seqset,
        records,
        is_paired,
        crate::make_readmap::MAX_READ_LEN,
        &create.create(),
        &Context::new(),
    )
    .expect("readmap build for tests cannot fail");
    let storage = create.close_mem().expect("in-memory archives always close");
    let open = SpiralOpen::from_mem(storage).expect("in-memory archives always open");
    Readmap::open(&open.open(), Arc::clone(seqset)).expect("freshly built readmaps always open")
}

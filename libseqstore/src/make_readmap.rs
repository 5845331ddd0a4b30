//! Building readmaps: from corrected reads, by migration between seqsets,
//! and by upgrading mate-pair archives to mate-loop form.
//!
//! The from-reads path turns every record into 2 (unpaired) or 4 (paired)
//! mate-loop rows, sorts them canonically so the output is deterministic
//! regardless of thread count, and then links the loops in two passes: a
//! parallel pass that finds the first candidate row for every successor, and
//! a serial pass that claims concrete rows with the lock-free
//! claim-next-available primitive and closes each cycle.

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::context::Context;
use crate::dna::Sequence;
use crate::error::SeqstoreError;
use crate::mergemap::SeqsetMergemap;
use crate::packed::MutablePackedIntVec;
use crate::readmap::{MateTable, Readmap, ReadmapMetadata, NULL_READ_ID, READMAP_VERSION};
use crate::seqset::Seqset;
use crate::sparse_multi::SparseMultiBuilder;
use crate::spiral::CreateState;
use crate::{ReadRecord, Result};

/// Hard cap on read length; the length table's packed width is fixed at
/// construction and longer reads cannot be represented.
pub const MAX_READ_LEN: u32 = 255;

/// Uniqueness hint handed to `find_existing_unique` when resolving reads.
const EXPECTED_UNIQUE_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RowType {
    LoopStart,
    Rc,
    Mate,
    MateRc,
}

const NO_LOOP_ENTRY: u64 = u64::MAX;

/// One mate-loop row; the derived ordering is the canonical sort key
/// `(seqset id, role, length, mate length, successor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct LoopRow {
    entry_id: u64,
    row_type: RowType,
    read_length: u32,
    mate_read_length: u32,
    loop_entry_id: u64,
}

fn rows_for_record(
    seqset: &Seqset,
    record: &ReadRecord,
    is_paired: bool,
    max_read_len: u32,
) -> Result<Vec<LoopRow>> {
    let check_len = |seq: &Sequence| -> Result<()> {
        if seq.is_empty() {
            return Err(SeqstoreError::Input("empty read sequence".into()));
        }
        if seq.len() as u32 > max_read_len {
            return Err(SeqstoreError::Input(format!(
                "read of {} bases exceeds the maximum read length {}",
                seq.len(),
                max_read_len
            )));
        }
        Ok(())
    };
    check_len(&record.read)?;
    if let Some(mate) = &record.mate {
        if !is_paired {
            return Err(SeqstoreError::Input(
                "paired record found in an unpaired readmap build".into(),
            ));
        }
        check_len(mate)?;
    }

    let resolve = |seq: &Sequence| seqset.find_existing_unique(seq, EXPECTED_UNIQUE_LEN);

    let mut sequence = record.read.clone();
    match &record.mate {
        Some(mate) => {
            let mut mate_sequence = mate.clone();
            // Canonicalize pair order so the readmap is deterministic.
            if sequence > mate_sequence {
                std::mem::swap(&mut sequence, &mut mate_sequence);
            }
            let read_len = sequence.len() as u32;
            let mate_len = mate_sequence.len() as u32;
            let entry = resolve(&sequence);
            let rc_entry = resolve(&sequence.rev_comp());
            let mate_entry = resolve(&mate_sequence);
            let mate_rc_entry = resolve(&mate_sequence.rev_comp());
            Ok(vec![
                LoopRow {
                    entry_id: entry,
                    row_type: RowType::LoopStart,
                    read_length: read_len,
                    mate_read_length: 0,
                    loop_entry_id: rc_entry,
                },
                LoopRow {
                    entry_id: rc_entry,
                    row_type: RowType::Rc,
                    read_length: read_len,
                    mate_read_length: mate_len,
                    loop_entry_id: mate_entry,
                },
                LoopRow {
                    entry_id: mate_entry,
                    row_type: RowType::Mate,
                    read_length: mate_len,
                    mate_read_length: 0,
                    loop_entry_id: mate_rc_entry,
                },
                LoopRow {
                    entry_id: mate_rc_entry,
                    row_type: RowType::MateRc,
                    read_length: mate_len,
                    mate_read_length: 0,
                    loop_entry_id: NO_LOOP_ENTRY,
                },
            ])
        }
        None => {
            let read_len = sequence.len() as u32;
            let entry = resolve(&sequence);
            let rc_entry = resolve(&sequence.rev_comp());
            Ok(vec![
                LoopRow {
                    entry_id: entry,
                    row_type: RowType::LoopStart,
                    read_length: read_len,
                    mate_read_length: 0,
                    loop_entry_id: rc_entry,
                },
                LoopRow {
                    entry_id: rc_entry,
                    row_type: RowType::Rc,
                    read_length: read_len,
                    mate_read_length: 0,
                    loop_entry_id: NO_LOOP_ENTRY,
                },
            ])
        }
    }
}

/// First row index >= the canonical position of `(entry_id, row_type,
/// read_length)`.
fn find_first_of(rows: &[LoopRow], row_type: RowType, entry_id: u64, read_length: u32) -> u64 {
    let probe = LoopRow {
        entry_id,
        row_type,
        read_length,
        mate_read_length: 0,
        loop_entry_id: 0,
    };
    rows.partition_point(|r| *r < probe) as u64
}

fn write_common(
    state: &CreateState,
    seqset_uuid: &str,
) -> Result<()> {
    state.set_version(READMAP_VERSION)?;
    state.create_json(
        "readmap.json",
        &ReadmapMetadata {
            seqset_uuid: seqset_uuid.to_string(),
        },
    )
}

/// Build a readmap over `seqset` from a stream of corrected read records.
pub fn create_from_reads(
    seqset: &Seqset,
    records: &[ReadRecord],
    is_paired: bool,
    max_read_len: u32,
    state: &CreateState,
    ctx: &Context,
) -> Result<()> {
    if max_read_len > MAX_READ_LEN {
        return Err(SeqstoreError::Limit(format!(
            "max read length {} exceeds the packed-width cap {}",
            max_read_len, MAX_READ_LEN
        )));
    }
    info!(
        "building readmap from {} records (paired: {})",
        records.len(),
        is_paired
    );

    let row_groups: Result<Vec<Vec<LoopRow>>> = records
        .par_iter()
        .map(|record| rows_for_record(seqset, record, is_paired, max_read_len))
        .collect();
    let mut rows: Vec<LoopRow> = row_groups?.into_iter().flatten().collect();
    ctx.check_cancelled()?;

    rows.par_sort_unstable();
    debug!("mate loop table has {} rows", rows.len());

    write_common(state, seqset.uuid())?;

    let mut sparse = SparseMultiBuilder::new(seqset.size() as u64, rows.len());
    for row in &rows {
        sparse.add(row.entry_id)?;
    }
    sparse.finalize()?.store(&state.subpart("read_ids"))?;

    let read_lengths = MutablePackedIntVec::new(rows.len(), max_read_len as u64);
    let is_forward = MutablePackedIntVec::new(rows.len(), 1);
    let mate_loop = MutablePackedIntVec::new(rows.len(), rows.len() as u64);

    // First pass, parallel: lengths, orientations, and the first candidate
    // row for every successor link.
    rows.par_iter().enumerate().for_each(|(idx, row)| {
        read_lengths.set(idx, row.read_length as u64);
        match row.row_type {
            RowType::LoopStart => {
                is_forward.set(idx, 1);
                mate_loop.set(
                    idx,
                    find_first_of(&rows, RowType::Rc, row.loop_entry_id, row.read_length),
                );
            }
            RowType::Rc => {
                if row.loop_entry_id != NO_LOOP_ENTRY {
                    mate_loop.set(
                        idx,
                        find_first_of(
                            &rows,
                            RowType::Mate,
                            row.loop_entry_id,
                            row.mate_read_length,
                        ),
                    );
                }
            }
            RowType::Mate => {
                is_forward.set(idx, 1);
                mate_loop.set(
                    idx,
                    find_first_of(&rows, RowType::MateRc, row.loop_entry_id, row.read_length),
                );
            }
            RowType::MateRc => {
                // Linked later, during the claim pass.
            }
        }
    });
    ctx.check_cancelled()?;

    // Second pass, serial for determinism: claim concrete rows and close
    // each loop.
    let claimed = MutablePackedIntVec::new(rows.len(), 1);
    let claim_next = |try_idx: u64, row_type: RowType, entry_id: u64, read_length: u32| -> Result<u64> {
        let idx = claimed.claim_next_available(try_idx as usize);
        if idx >= rows.len() {
            return Err(SeqstoreError::Consistency(format!(
                "no unclaimed {:?} row for entry {} length {}",
                row_type, entry_id, read_length
            )));
        }
        let row = &rows[idx];
        if row.entry_id != entry_id || row.read_length != read_length || row.row_type != row_type {
            return Err(SeqstoreError::Consistency(format!(
                "claimed row {} does not match {:?} entry {} length {}",
                idx, row_type, entry_id, read_length
            )));
        }
        Ok(idx as u64)
    };

    for idx in 0..rows.len() {
        if rows[idx].row_type != RowType::LoopStart {
            continue;
        }
        if idx % 65536 == 0 {
            ctx.check_cancelled()?;
            ctx.progress(idx as f64 / rows.len() as f64);
        }
        let row = rows[idx];
        let rc_idx = claim_next(
            mate_loop.get(idx),
            RowType::Rc,
            row.loop_entry_id,
            row.read_length,
        )?;
        mate_loop.set(idx, rc_idx);
        let rc_row = rows[rc_idx as usize];

        if rc_row.loop_entry_id == NO_LOOP_ENTRY {
            // Unpaired: a two-element cycle back to the start.
            mate_loop.set(rc_idx as usize, idx as u64);
            continue;
        }
        let mate_idx = claim_next(
            mate_loop.get(rc_idx as usize),
            RowType::Mate,
            rc_row.loop_entry_id,
            rc_row.mate_read_length,
        )?;
        mate_loop.set(rc_idx as usize, mate_idx);
        let mate_row = rows[mate_idx as usize];

        let mate_rc_idx = claim_next(
            mate_loop.get(mate_idx as usize),
            RowType::MateRc,
            mate_row.loop_entry_id,
            rc_row.mate_read_length,
        )?;
        mate_loop.set(mate_idx as usize, mate_rc_idx);
        mate_loop.set(mate_rc_idx as usize, idx as u64);
    }
    debug!("mate loop linking complete");

    read_lengths.store(&state.subpart("read_lengths"))?;
    mate_loop.store(&state.subpart("mate_loop_ptr"))?;
    is_forward.store(&state.subpart("is_forward"))?;
    ctx.progress(1.0);
    Ok(())
}

/// Re-point a readmap at a merged seqset through its mergemap, without
/// touching the reads: old id `y` becomes `select(y)` in the merged space,
/// and every table except the sparse-multi is copied verbatim.
pub fn fast_migrate(
    old: &Readmap,
    mergemap: &SeqsetMergemap,
    state: &CreateState,
    ctx: &Context,
) -> Result<()> {
    if old.metadata().seqset_uuid != mergemap.metadata().orig_seqset_uuid {
        return Err(SeqstoreError::Identity(format!(
            "readmap belongs to seqset {} but the mergemap translates from {}",
            old.metadata().seqset_uuid,
            mergemap.metadata().orig_seqset_uuid
        )));
    }
    write_common(state, &mergemap.metadata().merged_seqset_uuid)?;

    let bc = mergemap.bitcount();
    bc.make_select_index();
    let mut sparse = SparseMultiBuilder::new(bc.len() as u64, old.size());
    let mut translated_count = 0u64;
    for (source, (lo, hi)) in old.sparse().iter() {
        let translated = bc.select(source) as u64;
        for _ in lo..hi {
            sparse.add(translated)?;
            translated_count += 1;
        }
        if translated_count % 65536 == 0 {
            ctx.check_cancelled()?;
        }
    }
    sparse.finalize()?.store(&state.subpart("read_ids"))?;

    old.read_lengths_table()
        .store(&state.subpart("read_lengths"))?;
    if let Some(pairing) = old.pairing_tables() {
        match &pairing.table {
            MateTable::Loop(t) => t.store(&state.subpart("mate_loop_ptr"))?,
            MateTable::Pair(t) => t.store(&state.subpart("mate_pair_ptr"))?,
        }
        pairing.is_forward.store(&state.subpart("is_forward"))?;
    }
    Ok(())
}

/// Migrate a readmap to a new seqset by sequence lookup. Works without a
/// mergemap; the new seqset is expected to be a superset. Entries missing
/// from the new seqset either fail the migration or, with `drop_missing`,
/// drop their reads (and with them the pairing tables, since read ids
/// shift).
pub fn migrate(
    old_seqset: &Seqset,
    old_readmap: &Readmap,
    new_seqset: &Seqset,
    state: &CreateState,
    drop_missing: bool,
    ctx: &Context,
) -> Result<()> {
    if old_readmap.metadata().seqset_uuid != old_seqset.uuid() {
        return Err(SeqstoreError::Identity(format!(
            "readmap belongs to seqset {} but the source seqset is {}",
            old_readmap.metadata().seqset_uuid,
            old_seqset.uuid()
        )));
    }
    old_seqset.populate_pop_front_cache()?;
    write_common(state, new_seqset.uuid())?;

    // Translate each old entry by looking its sequence up in the new
    // seqset. Lexicographic order is preserved, so read ids stay put unless
    // something is dropped.
    let mut translations = Vec::new();
    let mut kept_reads: Vec<u64> = Vec::new();
    let mut dropped = 0u64;
    for (source, (lo, hi)) in old_readmap.sparse().iter() {
        ctx.check_cancelled()?;
        let entry_seq = old_seqset.entry_range(source)?.sequence()?;
        let found = new_seqset.find(&entry_seq);
        if !found.valid() {
            if !drop_missing {
                return Err(SeqstoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!(
                        "sequence {} exists in the source seqset but not in the \
                         destination; is the destination a superset?",
                        entry_seq
                    ),
                )));
            }
            dropped += hi - lo;
            continue;
        }
        translations.push((found.begin(), lo, hi));
        kept_reads.extend(lo..hi);
    }
    if dropped > 0 {
        warn!("dropping {} reads missing from the destination seqset", dropped);
    }

    let mut sparse = SparseMultiBuilder::new(new_seqset.size() as u64, kept_reads.len());
    for (new_source, lo, hi) in &translations {
        for _ in *lo..*hi {
            sparse.add(*new_source)?;
        }
    }
    sparse.finalize()?.store(&state.subpart("read_ids"))?;

    // Keep the old table's declared maximum so an unchanged migration
    // reproduces the length part byte for byte.
    let read_lengths =
        MutablePackedIntVec::new(kept_reads.len(), old_readmap.read_lengths_table().max_value());
    for (new_id, &old_id) in kept_reads.iter().enumerate() {
        read_lengths.set(new_id, old_readmap.get_readlength(old_id as u32) as u64);
    }
    read_lengths.store(&state.subpart("read_lengths"))?;

    if dropped == 0 {
        if let Some(pairing) = old_readmap.pairing_tables() {
            match &pairing.table {
                MateTable::Loop(t) => t.store(&state.subpart("mate_loop_ptr"))?,
                MateTable::Pair(t) => t.store(&state.subpart("mate_pair_ptr"))?,
            }
            pairing.is_forward.store(&state.subpart("is_forward"))?;
        }
    } else if old_readmap.has_pairing_data() {
        warn!("pairing data dropped: read ids shifted during migration");
    }
    Ok(())
}

/// Rebuild a mate-pair readmap in mate-loop form. The sparse-multi and
/// length tables carry over; only the pointer table is reconstructed.
pub fn upgrade(old: &Readmap, state: &CreateState, ctx: &Context) -> Result<()> {
    write_common(state, &old.metadata().seqset_uuid)?;
    old.sparse().store(&state.subpart("read_ids"))?;
    old.read_lengths_table()
        .store(&state.subpart("read_lengths"))?;

    let Some(pairing) = old.pairing_tables() else {
        return Err(SeqstoreError::Input(
            "cannot upgrade a readmap without pairing data".into(),
        ));
    };
    let pair_table = match &pairing.table {
        MateTable::Loop(t) => {
            // Already in loop form; copy through.
            t.store(&state.subpart("mate_loop_ptr"))?;
            pairing.is_forward.store(&state.subpart("is_forward"))?;
            return Ok(());
        }
        MateTable::Pair(t) => t,
    };
    info!("converting {} mate pairs to mate loops", pair_table.len());

    let seqset = old.seqset();
    let n = old.size();
    let mate_loop = MutablePackedIntVec::new(n, u32::MAX as u64);
    for i in 0..n {
        mate_loop.set(i, NULL_READ_ID as u64);
    }
    let claimed = MutablePackedIntVec::new(n, 1);

    // Mate pairs don't always point back at the original read, so claim any
    // readmap entry matching the shape of the read being linked.
    let claim_read_id = |range: (u64, u64),
                        read_len: u32,
                        forward: bool,
                        with_mate: bool|
     -> Result<u32> {
        for read_id in range.0..range.1 {
            let read_id = read_id as u32;
            if old.has_mate(read_id) != with_mate
                || old.get_readlength(read_id) != read_len
                || old.get_is_forward(read_id) != forward
            {
                continue;
            }
            if claimed.saturating_increment(read_id as usize) {
                continue;
            }
            return Ok(read_id);
        }
        Err(SeqstoreError::Consistency(format!(
            "unable to claim a read id in [{}, {})",
            range.0, range.1
        )))
    };

    let entry_seq = |seqset_id: u64, len: u32| -> Result<Sequence> {
        seqset.entry_range(seqset_id)?.sequence_prefix(len)
    };

    let mut dedup_self_pair = 0u64;
    for (seqset_id, (lo, hi)) in old.sparse().iter() {
        ctx.check_cancelled()?;
        for orig_read_id in lo..hi {
            let orig_read_id = orig_read_id as u32;
            if !old.get_is_forward(orig_read_id) {
                continue;
            }
            let read_len = old.get_readlength(orig_read_id);
            let orig_mate = pair_table.get(orig_read_id as usize) as u32;

            if orig_mate == NULL_READ_ID {
                // No mate; a two-element cycle to the RC and back.
                let read_id = claim_read_id((lo, hi), read_len, true, false)?;
                let rc_range = seqset.find(&entry_seq(seqset_id, read_len)?.rev_comp());
                let rc_ids = old.entry_to_index_range(rc_range.begin(), rc_range.end());
                let rc_read_id = claim_read_id(rc_ids, read_len, false, false)?;
                mate_loop.set(read_id as usize, rc_read_id as u64);
                mate_loop.set(rc_read_id as usize, read_id as u64);
                continue;
            }

            let mate_seqset_id = old.index_to_entry(orig_mate as u64);
            let mate_len = old.get_readlength(orig_mate);
            // Only process each pair once.
            if seqset_id < mate_seqset_id {
                continue;
            }
            if seqset_id == mate_seqset_id {
                if read_len < mate_len {
                    continue;
                }
                if read_len == mate_len {
                    dedup_self_pair += 1;
                    if dedup_self_pair % 2 == 1 {
                        continue;
                    }
                }
            }

            let read_id = claim_read_id((lo, hi), read_len, true, true)?;
            let mate_read_id =
                claim_read_id(old.entry_to_index(mate_seqset_id), mate_len, true, true)?;
            let rc_range = seqset.find(&entry_seq(seqset_id, read_len)?.rev_comp());
            let rc_read_id = claim_read_id(
                old.entry_to_index_range(rc_range.begin(), rc_range.end()),
                read_len,
                false,
                true,
            )?;
            let mate_rc_range = seqset.find(&entry_seq(mate_seqset_id, mate_len)?.rev_comp());
            let mate_rc_read_id = claim_read_id(
                old.entry_to_index_range(mate_rc_range.begin(), mate_rc_range.end()),
                mate_len,
                false,
                true,
            )?;

            mate_loop.set(read_id as usize, rc_read_id as u64);
            mate_loop.set(rc_read_id as usize, mate_read_id as u64);
            mate_loop.set(mate_read_id as usize, mate_rc_read_id as u64);
            mate_loop.set(mate_rc_read_id as usize, read_id as u64);
        }
    }

    mate_loop.store(&state.subpart("mate_loop_ptr"))?;
    pairing.is_forward.store(&state.subpart("is_forward"))?;
    debug!("mate loop conversion complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::spiral::{MemStorage, SpiralCreate, SpiralOpen};
    use crate::testutil::{readmap_for_records, seqset_for_reads, tseq};

    fn records() -> Vec<ReadRecord> {
        vec![
            ReadRecord {
                read: tseq("abcde"),
                mate: Some(tseq("xyzwv")),
            },
            ReadRecord {
                read: tseq("qq"),
                mate: None,
            },
        ]
    }

    fn all_reads(records: &[ReadRecord]) -> Vec<Sequence> {
        records
            .iter()
            .flat_map(|r| {
                let mut v = vec![r.read.clone()];
                if let Some(m) = &r.mate {
                    v.push(m.clone());
                }
                v
            })
            .collect()
    }

    /// Strip the archive-unique header so two archives can be compared for
    /// content equality.
    fn comparable_parts(storage: &MemStorage) -> Vec<(String, Vec<u8>)> {
        storage
            .parts()
            .iter()
            .filter(|(name, _)| name.as_str() != "file_info.json")
            .map(|(name, bytes)| (name.clone(), bytes.as_ref().clone()))
            .collect()
    }

    #[test]
    fn test_create_mixed_records() {
        let recs = records();
        let seqset = Arc::new(seqset_for_reads(&all_reads(&recs)));
        let rm = readmap_for_records(&seqset, &recs, true);
        // 4 rows for the pair, 2 for the single.
        assert_eq!(rm.size(), 6);
        let stats = rm.pair_stats();
        assert_eq!(stats.paired_reads, 2);
        assert_eq!(stats.unpaired_reads, 1);
    }

    #[test]
    fn test_too_long_read_is_input_error() {
        let long = Sequence::from_bases(&vec![crate::dna::Base::A; 40]);
        let seqset = Arc::new(seqset_for_reads(&[long.clone()]));
        let create = SpiralCreate::mem();
        let err = create_from_reads(
            &seqset,
            &[ReadRecord {
                read: long,
                mate: None,
            }],
            false,
            30,
            &create.create(),
            &Context::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SeqstoreError::Input(_)));
    }

    #[test]
    fn test_max_read_len_cap() {
        let seqset = Arc::new(seqset_for_reads(&[tseq("a")]));
        let create = SpiralCreate::mem();
        // One past the cap fails with a limit error.
        let err = create_from_reads(
            &seqset,
            &[],
            false,
            MAX_READ_LEN + 1,
            &create.create(),
            &Context::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SeqstoreError::Limit(_)));
        // The cap itself is fine.
        let create = SpiralCreate::mem();
        create_from_reads(
            &seqset,
            &[],
            false,
            MAX_READ_LEN,
            &create.create(),
            &Context::new(),
        )
        .unwrap();
    }

    #[test]
    fn test_paired_record_in_unpaired_build() {
        let recs = records();
        let seqset = Arc::new(seqset_for_reads(&all_reads(&recs)));
        let create = SpiralCreate::mem();
        let err = create_from_reads(
            &seqset,
            &recs,
            false,
            MAX_READ_LEN,
            &create.create(),
            &Context::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SeqstoreError::Input(_)));
    }

    #[test]
    fn test_deterministic_output() {
        // The same records through differently-threaded builds produce
        // byte-identical archives.
        let recs = records();
        let seqset = Arc::new(seqset_for_reads(&all_reads(&recs)));
        let mut storages = Vec::new();
        for threads in [1usize, 4] {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap();
            let create = SpiralCreate::mem();
            pool.install(|| {
                create_from_reads(
                    &seqset,
                    &recs,
                    true,
                    MAX_READ_LEN,
                    &create.create(),
                    &Context::new().with_threads(threads),
                )
            })
            .unwrap();
            storages.push(create.close_mem().unwrap());
        }
        assert_eq!(
            comparable_parts(&storages[0]),
            comparable_parts(&storages[1])
        );
    }

    fn build_mergemap_for(
        seqset: &Seqset,
        merged_reads: &[Sequence],
    ) -> (Seqset, SeqsetMergemap) {
        use crate::mergemap::{MakeMergemap, SeqsetMergemapBuilder};
        use crate::seqset_flat::SeqsetFlat;
        let ctx = Context::new();
        let merged = seqset_for_reads(merged_reads);
        let merged_flat = SeqsetFlat::build(&merged, &ctx).unwrap();
        let flat = SeqsetFlat::build(seqset, &ctx).unwrap();
        let mut counter = MakeMergemap::new(vec![&flat, &merged_flat]).unwrap();
        counter.build(&ctx).unwrap();
        let builder =
            SeqsetMergemapBuilder::new(seqset.uuid(), merged.uuid(), counter.total_merged_entries());
        counter.fill_mergemap(0, &builder);
        (merged, builder.finalize())
    }

    #[test]
    fn test_fast_migrate_identity() {
        // Fast-migrating through a self-mergemap reproduces the readmap
        // bit for bit.
        let recs = records();
        let reads = all_reads(&recs);
        let seqset = Arc::new(seqset_for_reads(&reads));
        let ctx = Context::new();

        let create = SpiralCreate::mem();
        create_from_reads(&seqset, &recs, true, MAX_READ_LEN, &create.create(), &ctx).unwrap();
        let orig_storage = create.close_mem().unwrap();
        let orig_open = SpiralOpen::from_mem(orig_storage.clone()).unwrap();
        let orig = Readmap::open(&orig_open.open(), Arc::clone(&seqset)).unwrap();

        // Merge the seqset with itself: the mergemap is all ones and the
        // merged uuid differs only in metadata.
        use crate::mergemap::{MakeMergemap, SeqsetMergemapBuilder};
        use crate::seqset_flat::SeqsetFlat;
        let flat = SeqsetFlat::build(&seqset, &ctx).unwrap();
        let mut counter = MakeMergemap::new(vec![&flat]).unwrap();
        counter.build(&ctx).unwrap();
        let builder =
            SeqsetMergemapBuilder::new(seqset.uuid(), seqset.uuid(), counter.total_merged_entries());
        counter.fill_mergemap(0, &builder);
        let mergemap = builder.finalize();

        let create = SpiralCreate::mem();
        fast_migrate(&orig, &mergemap, &create.create(), &ctx).unwrap();
        let migrated = create.close_mem().unwrap();
        assert_eq!(comparable_parts(&orig_storage), comparable_parts(&migrated));
    }

    #[test]
    fn test_fast_migrate_equals_slow_migrate() {
        let recs = records();
        let reads = all_reads(&recs);
        let seqset = Arc::new(seqset_for_reads(&reads));
        let ctx = Context::new();
        let orig = readmap_for_records(&seqset, &recs, true);

        // The merged seqset is a strict superset.
        let mut superset_reads = reads.clone();
        superset_reads.push(tseq("mm"));
        let (merged, mergemap) = build_mergemap_for(&seqset, &superset_reads);

        let fast_create = SpiralCreate::mem();
        fast_migrate(&orig, &mergemap, &fast_create.create(), &ctx).unwrap();
        let fast_parts = comparable_parts(&fast_create.close_mem().unwrap());

        let slow_create = SpiralCreate::mem();
        migrate(&seqset, &orig, &merged, &slow_create.create(), false, &ctx).unwrap();
        let slow_parts = comparable_parts(&slow_create.close_mem().unwrap());
        assert_eq!(fast_parts, slow_parts);
    }

    #[test]
    fn test_migrate_missing_entry() {
        let recs = vec![ReadRecord {
            read: tseq("ab"),
            mate: None,
        }];
        let seqset = Arc::new(seqset_for_reads(&[tseq("ab")]));
        let orig = readmap_for_records(&seqset, &recs, false);
        // A destination that lacks the reads entirely.
        let other = seqset_for_reads(&[tseq("zz")]);
        let ctx = Context::new();

        let create = SpiralCreate::mem();
        let err = migrate(&seqset, &orig, &other, &create.create(), false, &ctx).unwrap_err();
        assert!(matches!(err, SeqstoreError::Io(_)));

        // With drop_missing the result is an empty readmap over the
        // destination seqset.
        let create = SpiralCreate::mem();
        migrate(&seqset, &orig, &other, &create.create(), true, &ctx).unwrap();
        let open = SpiralOpen::from_mem(create.close_mem().unwrap()).unwrap();
        let migrated = Readmap::open(&open.open(), Arc::new(other)).unwrap();
        assert_eq!(migrated.size(), 0);
        assert!(!migrated.has_pairing_data());
    }

    #[test]
    fn test_upgrade_round_trips_loop_form() {
        // Upgrading an already-loop readmap copies it through.
        let recs = records();
        let seqset = Arc::new(seqset_for_reads(&all_reads(&recs)));
        let ctx = Context::new();
        let create = SpiralCreate::mem();
        create_from_reads(&seqset, &recs, true, MAX_READ_LEN, &create.create(), &ctx).unwrap();
        let orig_storage = create.close_mem().unwrap();
        let open = SpiralOpen::from_mem(orig_storage.clone()).unwrap();
        let orig = Readmap::open(&open.open(), Arc::clone(&seqset)).unwrap();

        let create = SpiralCreate::mem();
        upgrade(&orig, &create.create(), &ctx).unwrap();
        let upgraded = create.close_mem().unwrap();
        assert_eq!(comparable_parts(&orig_storage), comparable_parts(&upgraded));
    }

    #[test]
    fn test_upgrade_mate_pairs() {
        // Hand-build a mate-pair readmap and upgrade it to loop form.
        let recs = records();
        let seqset = Arc::new(seqset_for_reads(&all_reads(&recs)));
        let ctx = Context::new();
        let loop_rm = readmap_for_records(&seqset, &recs, true);

        // Derive the mate-pair table from the loop form.
        let n = loop_rm.size();
        let pair = MutablePackedIntVec::new(n, u32::MAX as u64);
        let is_forward = MutablePackedIntVec::new(n, 1);
        for id in 0..n as u32 {
            let mate = match loop_rm.get_mate(id) {
                Ok(m) => m as u64,
                Err(_) => NULL_READ_ID as u64,
            };
            pair.set(id as usize, mate);
            is_forward.set(id as usize, u64::from(loop_rm.get_is_forward(id)));
        }
        let create = SpiralCreate::mem();
        let state = create.create();
        write_common(&state, seqset.uuid()).unwrap();
        loop_rm.sparse().store(&state.subpart("read_ids")).unwrap();
        loop_rm
            .read_lengths_table()
            .store(&state.subpart("read_lengths"))
            .unwrap();
        pair.store(&state.subpart("mate_pair_ptr")).unwrap();
        is_forward.store(&state.subpart("is_forward")).unwrap();

        let open = SpiralOpen::from_mem(create.close_mem().unwrap()).unwrap();
        let pair_rm = Readmap::open(&open.open(), Arc::clone(&seqset)).unwrap();
        assert!(pair_rm.has_pairing_data());
        assert!(!pair_rm.has_mate_loop());
        // Pair-form lookups work.
        for id in 0..n as u32 {
            assert_eq!(pair_rm.has_mate(id), loop_rm.has_mate(id));
            assert!(pair_rm.get_rev_comp(id).is_err());
        }

        // Upgrade and verify the loop invariants hold again.
        let create = SpiralCreate::mem();
        upgrade(&pair_rm, &create.create(), &ctx).unwrap();
        let open = SpiralOpen::from_mem(create.close_mem().unwrap()).unwrap();
        let upgraded = Readmap::open(&open.open(), Arc::clone(&seqset)).unwrap();
        assert!(upgraded.has_mate_loop());
        for id in 0..n as u32 {
            assert_eq!(upgraded.has_mate(id), loop_rm.has_mate(id));
            assert_eq!(upgraded.get_readlength(id), loop_rm.get_readlength(id));
            assert_eq!(
                upgraded
                    .get_rev_comp(upgraded.get_rev_comp(id).unwrap())
                    .unwrap(),
                id
            );
            if upgraded.has_mate(id) {
                assert_eq!(upgraded.get_mate(upgraded.get_mate(id).unwrap()).unwrap(), id);
            }
        }
    }
}

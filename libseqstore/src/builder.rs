//! The seqset builder: bounded-RAM parallel construction from a read
//! corpus.
//!
//! The pipeline, anchored against an optional reference seed:
//!
//! 1. **Load** — every read (and mate) becomes a pair of flyweights, one per
//!    orientation. Reads that match the reference exactly point into the
//!    reference region of the repo without copying; the rest reserve space
//!    in the non-reference region, which is sized in the first pass and
//!    filled in the second.
//! 2. **Expand** — workers pull reads off a shared atomic cursor and emit
//!    every suffix, stopping early when a suffix is a prefix of some
//!    original. A second atomic counter tracks output volume; when it
//!    crosses the high-water mark all workers finish their current read and
//!    the pass is sorted, prefix-deduplicated and spilled to a temp file.
//! 3. **Merge** — the spill files are combined by loading proportional
//!    chunks, bounding them by the lowest end-of-file sequence, sorting the
//!    union and deduplicating, with a holdover entry carrying prefix
//!    deduplication across rounds.
//! 4. **Populate** — a final pass over the merged stream fills entry sizes,
//!    shared prefixes and the prev bitmaps, then finalizes the seqset.
//!
//! Memory never exceeds the context's budget: the expand buffer size is
//! derived from what the budget leaves after the repo and the flyweight
//! table, and exceeding the budget up front is a fatal error before any
//! allocation happens.

pub mod flyweight;

use std::io::{Seek, SeekFrom, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use memmap2::Mmap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tempfile::NamedTempFile;

use self::flyweight::{
    cmp_truncated, dedup_flyweights, fly_cmp, seq_cmp, Flyweight, Repo, MAX_FLY_LEN,
};
use crate::context::Context;
use crate::dna::{packed_len, Sequence};
use crate::error::SeqstoreError;
use crate::seqset::{compute_base_positions, populate_seqset_rows, Seqset, SeqsetBuilder};
use crate::{ReadRecord, Result};

/// Hard cap on input read length during construction.
pub const MAX_BUILD_READ_LEN: u32 = 255;

/// A reference corpus used to seed the repo. Reads matching the reference
/// exactly (in either orientation) are stored as pointers into it instead of
/// copies; any DNA corpus works, but a real reference deduplicates most
/// reads. Import and index construction are the caller's business.
pub trait RefSeed: Sync {
    /// Number of reference bases.
    fn len(&self) -> usize;

    /// The reference bases, 2-bit packed.
    fn packed(&self) -> &[u8];

    /// The start position of an exact, full-length match of `seq`, if any.
    fn find_exact(&self, seq: &Sequence) -> Option<usize>;
}

/// A scan-based [`RefSeed`] good enough for small seed corpora; production
/// deployments put a proper full-text index behind the trait.
pub struct LinearRefSeed {
    seq: Sequence,
}

impl LinearRefSeed {
    pub fn new(seq: Sequence) -> LinearRefSeed {
        LinearRefSeed { seq }
    }
}

impl RefSeed for LinearRefSeed {
    fn len(&self) -> usize {
        self.seq.len()
    }

    fn packed(&self) -> &[u8] {
        self.seq.as_packed()
    }

    fn find_exact(&self, query: &Sequence) -> Option<usize> {
        if query.is_empty() || query.len() > self.seq.len() {
            return None;
        }
        (0..=self.seq.len() - query.len())
            .find(|&start| (0..query.len()).all(|i| self.seq.get(start + i) == query.get(i)))
    }
}

pub struct BuildParams {
    /// Reject reads longer than this; also sizes the entry-length tables.
    pub max_read_len: u32,
    /// Keep each record with this probability, if set.
    pub sample: Option<f64>,
    /// Seed for sampling, making a sampled build reproducible.
    pub seed: Option<u64>,
    /// Override the expand buffer size in flyweights (mostly for tests and
    /// tuning); derived from the memory budget when unset.
    pub expand_buf_entries: Option<usize>,
}

impl Default for BuildParams {
    fn default() -> BuildParams {
        BuildParams {
            max_read_len: MAX_BUILD_READ_LEN,
            sample: None,
            seed: None,
            expand_buf_entries: None,
        }
    }
}

/// Build a finalized seqset over `records`.
pub fn build_seqset(
    records: &[ReadRecord],
    reference: Option<&dyn RefSeed>,
    params: &BuildParams,
    ctx: &Context,
) -> Result<Seqset> {
    if params.max_read_len == 0 || params.max_read_len > MAX_BUILD_READ_LEN {
        return Err(SeqstoreError::Limit(format!(
            "max read length {} is outside 1..={}",
            params.max_read_len, MAX_BUILD_READ_LEN
        )));
    }
    debug_assert!(MAX_BUILD_READ_LEN <= MAX_FLY_LEN);

    let sampled = sample_records(records, params);
    let is_paired = sampled.iter().any(|r| r.mate.is_some());
    let stride = if is_paired { 4 } else { 2 };
    info!(
        "building seqset from {} records ({} flyweights, paired: {})",
        sampled.len(),
        sampled.len() * stride,
        is_paired
    );

    // Pass 1: match reads against the reference and count non-reference
    // bases.
    let mapped: Result<Vec<(MappedRecord, u64)>> = sampled
        .par_iter()
        .map(|record| map_record(record, reference, params.max_read_len))
        .collect();
    let mapped = mapped?;
    ctx.check_cancelled()?;

    let ref_len = reference.map(|r| r.len()).unwrap_or(0) as u64;
    let non_ref_bases: u64 = mapped.iter().map(|(_, n)| n).sum();
    let repo_bases = ref_len + non_ref_bases;
    let fly_count = sampled.len() * stride;

    // Enforce the memory budget before allocating anything big. The 1.4
    // accounts for sort overhead.
    let repo_bytes = packed_len(repo_bases as usize) as u64;
    let mem_needed = ((repo_bytes + fly_count as u64 * 8) as f64 * 1.4) as u64;
    if mem_needed > ctx.max_mem() {
        return Err(SeqstoreError::Limit(format!(
            "insufficient memory (need {} bytes, budget is {})",
            mem_needed,
            ctx.max_mem()
        )));
    }
    let mut max_buf = match params.expand_buf_entries {
        Some(n) => n,
        None => ((ctx.max_mem() - mem_needed) / 8).max(1) as usize,
    };
    debug!(
        "repo: {} reference + {} non-reference bases; expand buffer {} flyweights",
        ref_len, non_ref_bases, max_buf
    );

    // Pass 2: with the repo sized, write the non-reference bases and settle
    // every flyweight.
    let mut repo = Repo::with_len(repo_bases as usize);
    if let Some(r) = reference {
        repo.copy_reference(r.packed(), r.len());
    }
    let mut originals: Vec<Flyweight> = Vec::with_capacity(fly_count);
    let mut non_ref_at = ref_len;
    for (record, (mapped_record, _)) in sampled.iter().zip(&mapped) {
        for slot in 0..stride {
            let side = slot / 2;
            let seq = match side {
                0 => Some(&record.read),
                _ => record.mate.as_ref(),
            };
            match (&mapped_record.flys[side], seq) {
                (Some(fly), _) if slot % 2 == 0 => originals.push(*fly),
                (Some(fly), _) => originals.push(fly.rev_comp()),
                (None, Some(seq)) if slot % 2 == 0 => {
                    let fly = Flyweight::new(non_ref_at, seq.len() as u32, false).with_non_ref();
                    for (i, base) in seq.iter().enumerate() {
                        repo.set_base(non_ref_at + i as u64, base as u8);
                    }
                    non_ref_at += seq.len() as u64;
                    originals.push(fly);
                }
                (None, Some(_)) => {
                    let fwd = originals[originals.len() - 1];
                    originals.push(fwd.rev_comp());
                }
                (None, None) => originals.push(Flyweight::empty()),
            }
        }
    }
    debug_assert_eq!(non_ref_at, repo_bases);
    ctx.check_cancelled()?;

    // Sort, drop the empty mate slots and prefix-deduplicate.
    debug!("sorting {} original flyweights", originals.len());
    originals.par_sort_unstable_by(|a, b| fly_cmp(&repo, *a, *b));
    while originals.last().is_some_and(|f| f.is_empty()) {
        originals.pop();
    }
    dedup_flyweights(&mut originals, &repo);
    if originals.is_empty() {
        debug!("empty corpus; finalizing an empty seqset");
        return SeqsetBuilder::new(0, 0).finalize();
    }
    let mut worst_ever = *originals.last().unwrap_or(&Flyweight::empty());
    if originals.len() * params.max_read_len as usize > 0
        && originals.len() * (params.max_read_len as usize) < max_buf
    {
        max_buf = (originals.len() + ctx.threads()) * params.max_read_len as usize;
    }

    // Expansion: pull originals off a shared cursor, emit suffixes, spill
    // each pass to a temp file.
    let high_water = max_buf
        .checked_sub(ctx.threads() * params.max_read_len as usize)
        .filter(|&hw| hw > 0)
        .ok_or_else(|| {
            SeqstoreError::Limit(format!(
                "expand buffer of {} flyweights cannot feed {} workers",
                max_buf,
                ctx.threads()
            ))
        })?;
    let next_read = AtomicUsize::new(0);
    let mut spills: Vec<NamedTempFile> = Vec::new();
    while next_read.load(Ordering::Relaxed) < originals.len() {
        ctx.check_cancelled()?;
        ctx.progress(next_read.load(Ordering::Relaxed) as f64 / originals.len() as f64 * 0.5);
        let pass = one_expand_pass(&originals, &repo, &next_read, high_water, ctx);
        if pass.is_empty() {
            continue;
        }
        if let Some(last) = pass.last() {
            if seq_cmp(&repo, worst_ever, *last) == std::cmp::Ordering::Less {
                worst_ever = *last;
            }
        }
        spills.push(spill_flyweights(&pass, ctx)?);
    }
    // The originals are merge input too.
    spills.push(spill_flyweights(&originals, ctx)?);
    drop(originals);
    debug!("expansion produced {} spill files", spills.len());

    // Merge all spills into one sorted, deduplicated stream.
    let mut merged_out = tmpfile(ctx)?;
    let total = merge_spills(&repo, &mut spills, max_buf, worst_ever, &mut merged_out, ctx)?;
    info!("merged entry stream has {} entries", total);

    // Populate the seqset from the merged stream.
    let map = {
        merged_out.as_file_mut().flush()?;
        // Safety: the temp file is owned by this function and not modified
        // after this point.
        unsafe { Mmap::map(merged_out.as_file())? }
    };
    let fly_at = |i: u64| -> Flyweight {
        Flyweight::from_raw(LittleEndian::read_u64(
            &map[i as usize * 8..i as usize * 8 + 8],
        ))
    };
    let builder = SeqsetBuilder::new(total, params.max_read_len);
    let base_pos = compute_base_positions(total as u64, &|i| {
        Ok(crate::dna::Base::from_code(repo.fly_code(fly_at(i), 0)))
    })?;
    populate_seqset_rows(&builder, base_pos, &|i| Ok(repo.decode(fly_at(i))), ctx)?;
    let seqset = builder.finalize()?;

    if ctx.keep_tmp() {
        for spill in spills {
            let (_, path) = spill.keep().map_err(|e| SeqstoreError::Io(e.error))?;
            info!("keeping spill file {}", path.display());
        }
        let (_, path) = merged_out.keep().map_err(|e| SeqstoreError::Io(e.error))?;
        info!("keeping merged entry stream {}", path.display());
    }
    Ok(seqset)
}

struct MappedRecord {
    /// Reference-backed flyweights for the read and its mate, when matched.
    flys: [Option<Flyweight>; 2],
}

fn sample_records<'a>(records: &'a [ReadRecord], params: &BuildParams) -> Vec<&'a ReadRecord> {
    match params.sample {
        None => records.iter().collect(),
        Some(rate) => {
            let mut rng = match params.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let kept: Vec<&ReadRecord> = records
                .iter()
                .filter(|_| rng.random::<f64>() < rate)
                .collect();
            debug!("sampled {} of {} records", kept.len(), records.len());
            kept
        }
    }
}

fn map_one_read(
    seq: &Sequence,
    reference: Option<&dyn RefSeed>,
    max_read_len: u32,
) -> Result<(Option<Flyweight>, u64)> {
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
    if let Some(r) = reference {
        if let Some(at) = r.find_exact(seq) {
            return Ok((Some(Flyweight::new(at as u64, seq.len() as u32, false)), 0));
        }
        if let Some(at) = r.find_exact(&seq.rev_comp()) {
            // The reference matches our reverse complement; point at the
            // match and read it flipped.
            let fly = Flyweight::new(at as u64, seq.len() as u32, false).rev_comp();
            return Ok((Some(fly), 0));
        }
    }
    Ok((None, seq.len() as u64))
}

fn map_record(
    record: &ReadRecord,
    reference: Option<&dyn RefSeed>,
    max_read_len: u32,
) -> Result<(MappedRecord, u64)> {
    let (read_fly, mut non_ref) = map_one_read(&record.read, reference, max_read_len)?;
    let mate_fly = match &record.mate {
        Some(mate) => {
            let (fly, n) = map_one_read(mate, reference, max_read_len)?;
            non_ref += n;
            fly
        }
        None => None,
    };
    Ok((
        MappedRecord {
            flys: [read_fly, mate_fly],
        },
        non_ref,
    ))
}

/// Emit every suffix of `read`, stopping as soon as a suffix is a prefix of
/// some original (that original's own expansion covers the rest).
fn expand_one_read(
    output: &mut Vec<Flyweight>,
    read: Flyweight,
    originals: &[Flyweight],
    repo: &Repo,
) {
    for offset in 1..read.len() {
        let f2 = read.suffix(offset);
        let is_prefix = originals
            .binary_search_by(|probe| cmp_truncated(repo, *probe, f2, f2.len()))
            .is_ok();
        if is_prefix {
            return;
        }
        output.push(f2);
    }
}

/// One bounded expansion pass; returns the sorted, deduplicated output.
fn one_expand_pass(
    originals: &[Flyweight],
    repo: &Repo,
    next_read: &AtomicUsize,
    high_water: usize,
    ctx: &Context,
) -> Vec<Flyweight> {
    let next_write = AtomicUsize::new(0);
    let locals: Vec<Vec<Flyweight>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..ctx.threads())
            .map(|_| {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    let mut scratch = Vec::new();
                    loop {
                        if next_write.load(Ordering::Relaxed) >= high_water {
                            break;
                        }
                        let i = next_read.fetch_add(1, Ordering::Relaxed);
                        if i >= originals.len() {
                            break;
                        }
                        expand_one_read(&mut scratch, originals[i], originals, repo);
                        if scratch.is_empty() {
                            continue;
                        }
                        next_write.fetch_add(scratch.len(), Ordering::Relaxed);
                        local.append(&mut scratch);
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect()
    });

    let mut combined: Vec<Flyweight> = locals.into_iter().flatten().collect();
    debug!("expand pass emitted {} flyweights", combined.len());
    combined.par_sort_unstable_by(|a, b| fly_cmp(repo, *a, *b));
    dedup_flyweights(&mut combined, repo);
    combined
}

fn tmpfile(ctx: &Context) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix("seqstore-build-")
        .tempfile_in(ctx.tmpdir())?)
}

fn spill_flyweights(flys: &[Flyweight], ctx: &Context) -> Result<NamedTempFile> {
    let mut file = tmpfile(ctx)?;
    {
        let mut writer = std::io::BufWriter::new(file.as_file_mut());
        for fly in flys {
            writer.write_u64::<LittleEndian>(fly.raw())?;
        }
        writer.flush()?;
    }
    Ok(file)
}

/// Combine the sorted spill files into one sorted, prefix-deduplicated
/// stream, by repeatedly loading proportional chunks, bounding them by the
/// lowest end-of-chunk sequence across inputs, and sorting the union. A
/// holdover entry carries prefix deduplication across rounds.
fn merge_spills(
    repo: &Repo,
    spills: &mut [NamedTempFile],
    max_buf: usize,
    worst_ever: Flyweight,
    output: &mut NamedTempFile,
    ctx: &Context,
) -> Result<usize> {
    let mut remaining: Vec<usize> = Vec::with_capacity(spills.len());
    for spill in spills.iter_mut() {
        let file = spill.as_file_mut();
        let bytes = file.metadata()?.len() as usize;
        remaining.push(bytes / 8);
        file.seek(SeekFrom::Start(0))?;
    }
    let mut tot_remaining: usize = remaining.iter().sum();

    let mut writer = std::io::BufWriter::new(output.as_file_mut());
    let mut output_size = 0usize;
    let mut holdover: Option<Flyweight> = None;

    while tot_remaining > 0 {
        ctx.check_cancelled()?;
        let mut buf: Vec<Flyweight> = Vec::new();
        if let Some(h) = holdover {
            buf.push(h);
        }

        // Estimate a proportional share per input.
        let mut loaded: Vec<(usize, usize)> = Vec::with_capacity(spills.len()); // (buf_start, count)
        let all_fit = tot_remaining < max_buf;
        let spills_len = spills.len();
        for (i, spill) in spills.iter_mut().enumerate() {
            let estimate = if all_fit {
                remaining[i]
            } else {
                (remaining[i] * (max_buf.saturating_sub(spills_len + 1)) / tot_remaining + 1)
                    .min(remaining[i])
            };
            let buf_start = buf.len();
            let mut reader = std::io::BufReader::new(spill.as_file_mut());
            for _ in 0..estimate {
                buf.push(Flyweight::from_raw(reader.read_u64::<LittleEndian>()?));
            }
            loaded.push((buf_start, estimate));
        }

        // The valid merge region is where every input still has entries:
        // bound it by the smallest last-loaded sequence.
        let mut lowest = worst_ever;
        if !all_fit {
            for (i, &(buf_start, count)) in loaded.iter().enumerate() {
                if count == 0 || count == remaining[i] {
                    continue;
                }
                let end_of_chunk = buf[buf_start + count - 1];
                if seq_cmp(repo, end_of_chunk, lowest) == std::cmp::Ordering::Less {
                    lowest = end_of_chunk;
                }
            }
        }

        // Drop everything past the bound and account for what was consumed.
        let mut compacted: Vec<Flyweight> = Vec::with_capacity(buf.len());
        if holdover.is_some() {
            compacted.push(buf[0]);
        }
        for (i, &(buf_start, count)) in loaded.iter().enumerate() {
            let chunk = &buf[buf_start..buf_start + count];
            let actual = chunk.partition_point(|f| {
                seq_cmp(repo, *f, lowest) != std::cmp::Ordering::Greater
            });
            compacted.extend_from_slice(&chunk[..actual]);
            remaining[i] -= actual;
            tot_remaining -= actual;
            // Reposition the file so the unconsumed tail is re-read next
            // round.
            let file = spills[i].as_file_mut();
            let size = file.metadata()?.len();
            file.seek(SeekFrom::Start(size - (remaining[i] as u64) * 8))?;
        }

        compacted.par_sort_unstable_by(|a, b| fly_cmp(repo, *a, *b));
        dedup_flyweights(&mut compacted, repo);

        if tot_remaining > 0 {
            // Keep the last entry as the next round's holdover so a prefix
            // arriving late still deduplicates.
            let Some(last) = compacted.pop() else {
                return Err(SeqstoreError::Consistency(
                    "merge round consumed no entries".into(),
                ));
            };
            holdover = Some(last);
        } else {
            holdover = None;
        }
        for fly in &compacted {
            writer.write_u64::<LittleEndian>(fly.raw())?;
        }
        output_size += compacted.len();
    }
    writer.flush()?;
    Ok(output_size)
}

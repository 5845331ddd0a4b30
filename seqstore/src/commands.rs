use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use log::{debug, info, warn};

use libseqstore::builder::{build_seqset, BuildParams, LinearRefSeed, RefSeed};
use libseqstore::make_readmap;
use libseqstore::mergemap::{MakeMergemap, SeqsetMergemapBuilder};
use libseqstore::merger::SeqsetMerger;
use libseqstore::seqset_flat::SeqsetFlat;
use libseqstore::spiral::{CreateState, SpiralCreate, SpiralOpen, SpiralOpenOptions};
use libseqstore::{io, Context, Readmap, Seqset};

use crate::cli::{CreateArgs, MergeArgs, MigrateArgs};

const SEQSET_FILE: &str = "seqset";
const READMAP_FILE: &str = "readmap";

/// Write one spiral archive, removing the partial file if the writer fails
/// or the run is cancelled.
fn write_archive(
    path: &Path,
    fill: impl FnOnce(&CreateState) -> libseqstore::Result<()>,
) -> anyhow::Result<()> {
    let create = SpiralCreate::file(path);
    let result = fill(&create.create()).and_then(|_| create.close());
    if let Err(e) = result {
        let _ = std::fs::remove_file(path);
        return Err(anyhow!(e)).with_context(|| format!("writing {}", path.display()));
    }
    info!("wrote {}", path.display());
    Ok(())
}

fn open_seqset(path: &Path) -> anyhow::Result<Arc<Seqset>> {
    let open = SpiralOpen::mmap(path, SpiralOpenOptions::default())
        .with_context(|| format!("opening seqset {}", path.display()))?;
    Ok(Arc::new(Seqset::open(&open.open())?))
}

fn open_readmap(path: &Path, seqset: &Arc<Seqset>) -> anyhow::Result<Readmap> {
    let open = SpiralOpen::mmap(path, SpiralOpenOptions::default())
        .with_context(|| format!("opening readmap {}", path.display()))?;
    Ok(Readmap::open(&open.open(), Arc::clone(seqset))?)
}

fn install_pool(threads: usize) -> anyhow::Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| anyhow!("error setting number of threads: {e}"))
}

pub fn create(args: &CreateArgs, tmpdir: &Path, cancel: Arc<AtomicBool>) -> anyhow::Result<()> {
    let ctx = Context::new()
        .with_threads(args.threads)
        .with_tmpdir(tmpdir)
        .with_max_mem(args.max_mem)
        .with_keep_tmp(args.keep_temp)
        .with_cancel(cancel);

    info!("loading reads from {} file(s)", args.reads.len());
    let records = io::load_read_records(&args.reads, args.paired)?;
    info!("loaded {} records", records.len());

    let reference = match &args.reference {
        Some(path) => {
            let seq = io::load_reference(path)?;
            info!("loaded reference seed of {} bases", seq.len());
            Some(LinearRefSeed::new(seq))
        }
        None => {
            warn!("no reference seed; every read is stored in the repo");
            None
        }
    };

    let params = BuildParams {
        max_read_len: args.max_read_len,
        sample: args.sample,
        seed: args.seed,
        ..BuildParams::default()
    };

    let pool = install_pool(args.threads)?;
    let (seqset, records) = pool.install(|| -> anyhow::Result<_> {
        let seqset = build_seqset(
            &records,
            reference.as_ref().map(|r| r as &dyn RefSeed),
            &params,
            &ctx,
        )?;
        Ok((seqset, records))
    })?;
    info!("seqset has {} entries", seqset.size());

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    let seqset_path = args.out.join(SEQSET_FILE);
    write_archive(&seqset_path, |state| seqset.store(state))?;

    let readmap_path = args.out.join(READMAP_FILE);
    let result = write_archive(&readmap_path, |state| {
        pool.install(|| {
            make_readmap::create_from_reads(
                &seqset,
                &records,
                args.paired,
                args.max_read_len,
                state,
                &ctx,
            )
        })
    });
    if result.is_err() {
        // Don't leave a store with a seqset but no readmap behind.
        let _ = std::fs::remove_file(&seqset_path);
    }
    result
}

pub fn merge(args: &MergeArgs, tmpdir: &Path, cancel: Arc<AtomicBool>) -> anyhow::Result<()> {
    let ctx = Context::new()
        .with_threads(args.threads)
        .with_tmpdir(tmpdir)
        .with_keep_tmp(args.keep_temp)
        .with_cancel(cancel);
    let pool = install_pool(args.threads)?;

    let mut seqsets = Vec::new();
    let mut readmaps = Vec::new();
    for dir in &args.inputs {
        let seqset = open_seqset(&dir.join(SEQSET_FILE))?;
        let readmap_path = dir.join(READMAP_FILE);
        let readmap = if readmap_path.exists() {
            Some(open_readmap(&readmap_path, &seqset)?)
        } else {
            warn!("{} has no readmap; merging the seqset only", dir.display());
            None
        };
        debug!(
            "input {}: {} entries, {} reads",
            dir.display(),
            seqset.size(),
            readmap.as_ref().map(|r| r.size()).unwrap_or(0)
        );
        seqsets.push(seqset);
        readmaps.push(readmap);
    }

    let written: anyhow::Result<Vec<PathBuf>> = pool.install(|| {
        let mut written = Vec::new();

        info!("flattening {} seqsets", seqsets.len());
        let flats: libseqstore::Result<Vec<SeqsetFlat>> =
            seqsets.iter().map(|s| SeqsetFlat::build(s, &ctx)).collect();
        let flats = flats?;

        info!("computing mergemaps");
        let mut counter = MakeMergemap::new(flats.iter().collect())?;
        counter.build(&ctx)?;
        info!("merged seqset will have {} entries", counter.total_merged_entries());

        let mergemaps: Vec<_> = seqsets
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let builder = SeqsetMergemapBuilder::new(
                    s.uuid(),
                    // The merged uuid is patched below once the merged
                    // seqset exists; start from the per-input uuids.
                    s.uuid(),
                    counter.total_merged_entries(),
                );
                counter.fill_mergemap(i, &builder);
                builder.finalize()
            })
            .collect();

        let merger = SeqsetMerger::new(flats.iter().collect(), mergemaps.iter().collect())?;
        let merged = merger.build(&ctx)?;
        info!("merged seqset finalized with {} entries", merged.size());

        std::fs::create_dir_all(&args.out)
            .with_context(|| format!("creating {}", args.out.display()))?;
        let merged_path = args.out.join(SEQSET_FILE);
        write_archive(&merged_path, |state| merged.store(state))?;
        written.push(merged_path);

        // Rebuild the mergemaps with the real merged uuid and persist them
        // next to the migrated readmaps.
        for (i, seqset) in seqsets.iter().enumerate() {
            let builder = SeqsetMergemapBuilder::new(
                seqset.uuid(),
                merged.uuid(),
                counter.total_merged_entries(),
            );
            counter.fill_mergemap(i, &builder);
            let mergemap = builder.finalize();

            let mergemap_path = args.out.join(format!("mergemap_{}", i));
            write_archive(&mergemap_path, |state| mergemap.store(state))?;
            written.push(mergemap_path);

            if let Some(readmap) = &readmaps[i] {
                let readmap_path = args.out.join(format!("readmap_{}", i));
                write_archive(&readmap_path, |state| {
                    make_readmap::fast_migrate(readmap, &mergemap, state, &ctx)
                })?;
                written.push(readmap_path);
            }
        }
        Ok(written)
    });

    match written {
        Ok(paths) => {
            info!("merge complete: {} outputs", paths.len());
            Ok(())
        }
        Err(e) => {
            // write_archive already removed its own partial file; take the
            // rest of the partial store with it.
            let _ = std::fs::remove_file(args.out.join(SEQSET_FILE));
            for i in 0..args.inputs.len() {
                let _ = std::fs::remove_file(args.out.join(format!("mergemap_{}", i)));
                let _ = std::fs::remove_file(args.out.join(format!("readmap_{}", i)));
            }
            Err(e)
        }
    }
}

pub fn migrate_readmap(args: &MigrateArgs, cancel: Arc<AtomicBool>) -> anyhow::Result<()> {
    let ctx = Context::new().with_cancel(cancel);

    info!("loading original seqset");
    let orig_seqset = open_seqset(&args.orig_seqset)?;
    info!("loading new seqset");
    let new_seqset = open_seqset(&args.new_seqset)?;
    info!("loading original readmap");
    let orig_readmap = open_readmap(&args.orig_readmap, &orig_seqset)?;

    info!("migrating");
    write_archive(&args.new_readmap, |state| {
        make_readmap::migrate(
            &orig_seqset,
            &orig_readmap,
            &new_seqset,
            state,
            args.drop_missing,
            &ctx,
        )
    })
}

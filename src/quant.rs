// Pipeline driver: parser threads feed mapping workers, mapping workers
// feed the online EM, and completed alignment groups flow either back to
// the group pool or out to the mapping cache. Later rounds replay the
// cache into the EM workers directly, so fragments are mapped only once.

use crate::alignment::AlignmentGroup;
use crate::cache::{read_alignment_cache, write_alignment_cache, CacheFile};
use crate::em::{
    process_mini_batch, update_forgetting_mass, MINI_BATCH_SIZE, NUM_BURNIN_FRAGS,
};
use crate::experiment::ReadExperiment;
use crate::fastq::{FastqReader, PairedFastqReader, ReadRecord};
use crate::fld::FragmentLengthDistribution;
use crate::hits::{CoverageCalculator, SampledHitList, TranscriptHitList};
use crate::index::{encode_sequence, TxpIndex};
use crate::library_format::ReadType;
use crate::mapping::{map_paired_fragment, map_single_fragment, MappingScratch};
use crate::opts::QuantOpts;
use crate::read_library::ReadLibrary;
use crate::transcript::Transcript;
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;

/// Per-worker forgetting factor for the decay schedule.
const FORGETTING_FACTOR: f64 = 0.65;

// Fragment-length prior.
const MAX_FRAG_LEN: usize = 800;
const FRAG_LEN_MEAN: f64 = 200.0;
const FRAG_LEN_STD: f64 = 80.0;
const FRAG_LEN_KERNEL_N: usize = 4;
const FRAG_LEN_KERNEL_P: f64 = 0.5;

/// Parser -> mapping queue depth, in batches per worker thread.
const PARSER_QUEUE_FACTOR: usize = 4;

/// Shared state for one quantification round.
struct RoundContext<'a> {
    opts: &'a QuantOpts,
    idx: &'a TxpIndex,
    transcripts: &'a [Transcript],
    lib: &'a ReadLibrary,
    cluster_forest: &'a Mutex<crate::cluster_forest::ClusterForest>,
    fld: &'a Mutex<FragmentLengthDistribution>,
    log_forgetting_mass: &'a Mutex<f64>,
    batch_num: &'a AtomicU64,
    num_observed: &'a AtomicU64,
    num_assigned: &'a AtomicU64,
    valid_hits: &'a AtomicU64,
    burned_in: &'a AtomicBool,
    initial_round: bool,
}

impl RoundContext<'_> {
    fn worker_rng(&self, worker_id: usize) -> StdRng {
        match self.opts.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker_id as u64)),
            None => StdRng::from_entropy(),
        }
    }
}

/// A fragment the mapping workers can resolve: a single read or a pair.
trait MappableFragment: Send + 'static {
    fn map_into<C: CoverageCalculator>(
        &self,
        ctx: &RoundContext<'_>,
        scratch: &mut MappingScratch,
        group: &mut AlignmentGroup,
    );
}

impl MappableFragment for ReadRecord {
    fn map_into<C: CoverageCalculator>(
        &self,
        ctx: &RoundContext<'_>,
        scratch: &mut MappingScratch,
        group: &mut AlignmentGroup,
    ) {
        let codes = encode_sequence(&self.seq);
        map_single_fragment::<C>(ctx.idx, ctx.transcripts, ctx.opts, &codes, scratch, group);
    }
}

impl MappableFragment for (ReadRecord, ReadRecord) {
    fn map_into<C: CoverageCalculator>(
        &self,
        ctx: &RoundContext<'_>,
        scratch: &mut MappingScratch,
        group: &mut AlignmentGroup,
    ) {
        let codes1 = encode_sequence(&self.0.seq);
        let codes2 = encode_sequence(&self.1.seq);
        map_paired_fragment::<C>(
            ctx.idx,
            ctx.transcripts,
            ctx.opts,
            &codes1,
            &codes2,
            scratch,
            group,
        );
    }
}

fn parse_single_library(files: &[PathBuf], tx: Sender<Vec<ReadRecord>>) {
    for f in files {
        let mut reader = match FastqReader::open(f) {
            Ok(r) => r,
            Err(e) => {
                log::error!("failed to open read file {}: {}", f.display(), e);
                continue;
            }
        };
        loop {
            match reader.read_batch(MINI_BATCH_SIZE) {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    if tx.send(batch).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::error!("error reading {}: {}", f.display(), e);
                    break;
                }
            }
        }
    }
}

fn parse_paired_library(
    mates1: &[PathBuf],
    mates2: &[PathBuf],
    tx: Sender<Vec<(ReadRecord, ReadRecord)>>,
) {
    for (f1, f2) in mates1.iter().zip(mates2) {
        let mut reader = match PairedFastqReader::open(f1, f2) {
            Ok(r) => r,
            Err(e) => {
                log::error!(
                    "failed to open mate files {} / {}: {}",
                    f1.display(),
                    f2.display(),
                    e
                );
                continue;
            }
        };
        loop {
            match reader.read_batch(MINI_BATCH_SIZE) {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    if tx.send(batch).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::error!("error reading {} / {}: {}", f1.display(), f2.display(), e);
                    break;
                }
            }
        }
    }
}

/// Mapping worker: drain read batches, map each fragment into a pooled
/// alignment group, run the EM mini-batch, then route the groups onward.
#[allow(clippy::too_many_arguments)]
fn process_reads<F: MappableFragment, C: CoverageCalculator>(
    worker_id: usize,
    ctx: &RoundContext<'_>,
    batches: Receiver<Vec<F>>,
    pool_rx: Receiver<AlignmentGroup>,
    pool_tx: Sender<AlignmentGroup>,
    cache_tx: Option<Sender<AlignmentGroup>>,
    write_to_cache: &AtomicBool,
) {
    let mut rng = ctx.worker_rng(worker_id);
    let mut scratch = MappingScratch::default();
    let mut hit_lists: Vec<AlignmentGroup> = Vec::with_capacity(MINI_BATCH_SIZE);

    for batch in batches.iter() {
        hit_lists.clear();
        for frag in &batch {
            let mut group = pool_rx.recv().expect("group pool closed");
            frag.map_into::<C>(ctx, &mut scratch, &mut group);

            // A fragment mapping everywhere carries no signal.
            if group.len() > ctx.opts.max_read_occs as usize {
                group.clear();
            }
            ctx.valid_hits.fetch_add(group.len() as u64, Ordering::Relaxed);
            let observed = ctx.num_observed.fetch_add(1, Ordering::Relaxed) + 1;
            if observed % 50_000 == 0 {
                let hits = ctx.valid_hits.load(Ordering::Relaxed);
                log::info!(
                    "processed {} fragments ({:.2} hits per fragment)",
                    observed,
                    hits as f64 / observed as f64
                );
            }
            hit_lists.push(group);
        }

        let log_mass =
            update_forgetting_mass(ctx.batch_num, ctx.log_forgetting_mass, FORGETTING_FACTOR);
        process_mini_batch(
            log_mass,
            ctx.lib,
            ctx.opts,
            &mut hit_lists,
            ctx.transcripts,
            ctx.cluster_forest,
            ctx.fld,
            ctx.num_assigned,
            &mut rng,
            ctx.initial_round,
            ctx.burned_in,
        );

        // Once enough fragments have been observed no further round will
        // run, so stop spending disk on the cache.
        if ctx.num_observed.load(Ordering::Relaxed) > ctx.opts.num_required_fragments {
            write_to_cache.store(false, Ordering::Relaxed);
        }

        for group in hit_lists.drain(..) {
            match &cache_tx {
                Some(tx) if write_to_cache.load(Ordering::Relaxed) => {
                    tx.send(group).expect("cache writer vanished")
                }
                _ => pool_tx.send(group).expect("group pool closed"),
            }
        }
    }
}

/// EM worker for cache-replay rounds: assemble mini-batches of re-hydrated
/// groups and run the EM update on them.
fn process_cached_alignments(
    worker_id: usize,
    ctx: &RoundContext<'_>,
    groups: Receiver<AlignmentGroup>,
    pool_tx: Sender<AlignmentGroup>,
) {
    let mut rng = ctx.worker_rng(worker_id);

    loop {
        let mut batch: Vec<AlignmentGroup> = Vec::with_capacity(MINI_BATCH_SIZE);
        for _ in 0..MINI_BATCH_SIZE {
            match groups.recv() {
                Ok(g) => batch.push(g),
                Err(_) => break,
            }
        }
        if batch.is_empty() {
            break;
        }

        let local_hits: u64 = batch.iter().map(|g| g.len() as u64).sum();
        ctx.valid_hits.fetch_add(local_hits, Ordering::Relaxed);
        let before = ctx.num_observed.fetch_add(batch.len() as u64, Ordering::Relaxed);
        let after = before + batch.len() as u64;
        if before / 200_000 != after / 200_000 {
            log::info!("processed {} fragments (cached)", after);
        }

        let log_mass =
            update_forgetting_mass(ctx.batch_num, ctx.log_forgetting_mass, FORGETTING_FACTOR);
        process_mini_batch(
            log_mass,
            ctx.lib,
            ctx.opts,
            &mut batch,
            ctx.transcripts,
            ctx.cluster_forest,
            ctx.fld,
            ctx.num_assigned,
            &mut rng,
            ctx.initial_round,
            ctx.burned_in,
        );

        for g in batch {
            pool_tx.send(g).expect("group pool closed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_mapping_round<C: CoverageCalculator>(
    ctx: &RoundContext<'_>,
    pool_rx: &Receiver<AlignmentGroup>,
    pool_tx: &Sender<AlignmentGroup>,
    pool_capacity: usize,
    write_to_cache: &AtomicBool,
    cache_path: &Path,
) -> io::Result<u64> {
    let parser_cap = PARSER_QUEUE_FACTOR * ctx.opts.num_threads;
    let caching = write_to_cache.load(Ordering::Relaxed);

    thread::scope(|s| -> io::Result<u64> {
        // Cache writer, if this round persists its mappings.
        let (cache_tx, cache_rx) = bounded::<AlignmentGroup>(pool_capacity);
        let writer = if caching {
            let pool_tx = pool_tx.clone();
            Some(s.spawn(move || write_alignment_cache(&cache_rx, &pool_tx, cache_path)))
        } else {
            drop(cache_rx);
            None
        };
        let cache_tx = if caching { Some(cache_tx) } else { None };

        let mut workers = Vec::with_capacity(ctx.opts.num_threads);
        match ctx.lib.format().read_type {
            ReadType::SingleEnd => {
                let (batch_tx, batch_rx) = bounded::<Vec<ReadRecord>>(parser_cap);
                let files = ctx.lib.unmated_files();
                s.spawn(move || parse_single_library(files, batch_tx));
                for wid in 0..ctx.opts.num_threads {
                    let batch_rx = batch_rx.clone();
                    let pool_rx = pool_rx.clone();
                    let pool_tx = pool_tx.clone();
                    let cache_tx = cache_tx.clone();
                    workers.push(s.spawn(move || {
                        process_reads::<ReadRecord, C>(
                            wid,
                            ctx,
                            batch_rx,
                            pool_rx,
                            pool_tx,
                            cache_tx,
                            write_to_cache,
                        )
                    }));
                }
            }
            ReadType::PairedEnd => {
                let (batch_tx, batch_rx) = bounded::<Vec<(ReadRecord, ReadRecord)>>(parser_cap);
                let mates1 = ctx.lib.mates1_files();
                let mates2 = ctx.lib.mates2_files();
                s.spawn(move || parse_paired_library(mates1, mates2, batch_tx));
                for wid in 0..ctx.opts.num_threads {
                    let batch_rx = batch_rx.clone();
                    let pool_rx = pool_rx.clone();
                    let pool_tx = pool_tx.clone();
                    let cache_tx = cache_tx.clone();
                    workers.push(s.spawn(move || {
                        process_reads::<(ReadRecord, ReadRecord), C>(
                            wid,
                            ctx,
                            batch_rx,
                            pool_rx,
                            pool_tx,
                            cache_tx,
                            write_to_cache,
                        )
                    }));
                }
            }
        }
        // The workers own the remaining cache sender clones; drop ours so
        // the writer sees disconnection once they finish.
        drop(cache_tx);

        for w in workers {
            w.join().expect("mapping worker panicked");
        }
        match writer {
            Some(h) => h.join().expect("cache writer panicked"),
            None => Ok(0),
        }
    })
}

fn run_cache_round(
    ctx: &RoundContext<'_>,
    cache: &CacheFile,
    pool_rx: &Receiver<AlignmentGroup>,
    pool_tx: &Sender<AlignmentGroup>,
    pool_capacity: usize,
) -> io::Result<()> {
    thread::scope(|s| -> io::Result<()> {
        let (aln_tx, aln_rx) = bounded::<AlignmentGroup>(pool_capacity);
        let reader = {
            let pool_rx = pool_rx.clone();
            s.spawn(move || read_alignment_cache(cache, &pool_rx, &aln_tx))
        };

        let mut workers = Vec::with_capacity(ctx.opts.num_threads);
        for wid in 0..ctx.opts.num_threads {
            let aln_rx = aln_rx.clone();
            let pool_tx = pool_tx.clone();
            workers.push(s.spawn(move || process_cached_alignments(wid, ctx, aln_rx, pool_tx)));
        }
        drop(aln_rx);

        for w in workers {
            w.join().expect("EM worker panicked");
        }
        reader.join().expect("cache reader panicked")
    })
}

/// Quantify the experiment's read libraries: map and run online EM until
/// the required number of fragments has been observed, re-reading inputs
/// or replaying the mapping cache for additional rounds as needed.
pub fn quantify_library(
    experiment: &mut ReadExperiment,
    opts: &QuantOpts,
    output_dir: &Path,
) -> io::Result<()> {
    let fld = Mutex::new(FragmentLengthDistribution::new(
        1.0,
        MAX_FRAG_LEN,
        FRAG_LEN_MEAN,
        FRAG_LEN_STD,
        FRAG_LEN_KERNEL_N,
        FRAG_LEN_KERNEL_P,
    ));
    let log_forgetting_mass = Mutex::new((1.0f64).ln());
    let valid_hits = AtomicU64::new(0);
    let burned_in = AtomicBool::new(experiment.total_assigned_fragments() > NUM_BURNIN_FRAGS);

    let pool_capacity = opts.num_threads * MINI_BATCH_SIZE * 10;
    let (pool_tx, pool_rx) = bounded::<AlignmentGroup>(pool_capacity);
    for _ in 0..pool_capacity {
        pool_tx
            .send(AlignmentGroup::new())
            .expect("failed to prefill the group pool");
    }

    let mut cache_files: Vec<CacheFile> = Vec::new();
    let mut initial_round = true;
    let mut num_prev_observed = 0u64;

    while experiment.num_observed_fragments().load(Ordering::Relaxed)
        < opts.num_required_fragments
    {
        if !initial_round {
            let did_reset = if opts.disable_mapping_cache {
                experiment.reset()
            } else {
                experiment.soft_reset()
            };
            if !did_reset {
                log::warn!(
                    "One of the provided read files [{}] is not a regular file and cannot be \
                     read more than once. Observed only {} mapping fragments of the {} \
                     requested; emitting results from what was seen.",
                    experiment.read_files_as_string(),
                    experiment.num_observed_fragments().load(Ordering::Relaxed),
                    opts.num_required_fragments
                );
                break;
            }
            num_prev_observed = experiment.num_observed_fragments().load(Ordering::Relaxed);
        }

        if initial_round || opts.disable_mapping_cache {
            let write_to_cache = AtomicBool::new(!opts.disable_mapping_cache);
            for lib_idx in 0..experiment.read_libraries().len() {
                let cache_path = output_dir.join(format!("alnCache_{}.bin", cache_files.len()));
                let ctx = RoundContext {
                    opts,
                    idx: experiment.index(),
                    transcripts: experiment.transcripts(),
                    lib: &experiment.read_libraries()[lib_idx],
                    cluster_forest: experiment.cluster_forest(),
                    fld: &fld,
                    log_forgetting_mass: &log_forgetting_mass,
                    batch_num: experiment.batch_num(),
                    num_observed: experiment.num_observed_fragments(),
                    num_assigned: experiment.num_assigned_fragments(),
                    valid_hits: &valid_hits,
                    burned_in: &burned_in,
                    initial_round,
                };
                let num_written = if opts.sampled_validation {
                    run_mapping_round::<SampledHitList>(
                        &ctx,
                        &pool_rx,
                        &pool_tx,
                        pool_capacity,
                        &write_to_cache,
                        &cache_path,
                    )?
                } else {
                    run_mapping_round::<TranscriptHitList>(
                        &ctx,
                        &pool_rx,
                        &pool_tx,
                        pool_capacity,
                        &write_to_cache,
                        &cache_path,
                    )?
                };
                if !opts.disable_mapping_cache {
                    cache_files.push(CacheFile {
                        path: cache_path,
                        num_written,
                    });
                }
            }
        } else {
            for (lib_idx, cache) in cache_files.iter().enumerate() {
                let ctx = RoundContext {
                    opts,
                    idx: experiment.index(),
                    transcripts: experiment.transcripts(),
                    lib: &experiment.read_libraries()[lib_idx],
                    cluster_forest: experiment.cluster_forest(),
                    fld: &fld,
                    log_forgetting_mass: &log_forgetting_mass,
                    batch_num: experiment.batch_num(),
                    num_observed: experiment.num_observed_fragments(),
                    num_assigned: experiment.num_assigned_fragments(),
                    valid_hits: &valid_hits,
                    burned_in: &burned_in,
                    initial_round,
                };
                run_cache_round(&ctx, cache, &pool_rx, &pool_tx, pool_capacity)?;
            }
        }

        initial_round = false;
        let observed = experiment.num_observed_fragments().load(Ordering::Relaxed);
        log::info!(
            "observed {} / {} required fragments ({} this round, {} assigned in total)",
            observed,
            opts.num_required_fragments,
            observed - num_prev_observed,
            experiment.total_assigned_fragments()
        );
    }

    // Drop the pooled groups and remove the cache files; the cache only
    // exists to bridge rounds within a run.
    while pool_rx.try_recv().is_ok() {}
    for cf in &cache_files {
        if cf.path.exists() {
            if let Err(e) = std::fs::remove_file(&cf.path) {
                log::warn!("failed to remove cache file {}: {}", cf.path.display(), e);
            }
        }
    }

    log::info!(
        "finished quantification: {} fragments observed, {} assigned",
        experiment.num_observed_fragments().load(Ordering::Relaxed),
        experiment.total_assigned_fragments()
    );
    Ok(())
}

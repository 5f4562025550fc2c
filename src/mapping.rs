// Hit collection: project seed occurrences into transcript-local votes and
// resolve each fragment into its alignment group.
//
// Seeds come back from the seed engine as BWT intervals; each sampled
// occurrence is located in the bidirectional reference, assigned a strand,
// converted to transcript coordinates, and handed to the per-transcript
// coverage calculator. A seed straddling the boundary between two packed
// transcripts is either discarded or split into its longer side.

use crate::alignment::{AlignmentGroup, SmemAlignment};
use crate::fm_index::sa_entry;
use crate::hits::CoverageCalculator;
use crate::index::TxpIndex;
use crate::library_format::{hit_type_pe, hit_type_se};
use crate::opts::QuantOpts;
use crate::seeding::{collect_seeds, SeedScratch, Smem};
use crate::transcript::Transcript;
use std::collections::BTreeMap;

/// Per-worker scratch space for seeding, reused across fragments.
#[derive(Debug, Default)]
pub struct MappingScratch {
    seeds: Vec<Smem>,
    seed_scratch: SeedScratch,
}

/// Collect transcript-local votes for one encoded read.
pub fn collect_hits_for_read<C: CoverageCalculator>(
    idx: &TxpIndex,
    opts: &QuantOpts,
    read: &[u8],
    scratch: &mut MappingScratch,
    hits: &mut BTreeMap<u32, C>,
) {
    let seeds = &mut scratch.seeds;
    collect_seeds(&idx.bwt, read, opts, seeds, &mut scratch.seed_scratch);

    let read_len = read.len() as i64;

    for seed in seeds.iter() {
        let occ = seed.interval_size;
        if occ == 0 || opts.max_occ == 0 {
            continue;
        }
        // Sample occurrences evenly when the seed is too repetitive to
        // enumerate.
        let step = if occ > opts.max_occ as u64 {
            occ / opts.max_occ as u64
        } else {
            1
        };

        let mut k = 0u64;
        let mut count = 0;
        while k < occ && count < opts.max_occ {
            let slen0 = seed.len() as i64;
            let mut query_start = seed.query_start as i64;
            let mut slen = slen0;
            let mut rlen = read_len;

            let ref_start = sa_entry(&idx.bwt, seed.interval_start + k) as i64;

            let (start_f, rev_start) = idx.depos(ref_start);
            let (end_f, rev_end) = idx.depos(ref_start + slen - 1);
            // A seed crossing the forward/reverse boundary is meaningless.
            if rev_start != rev_end {
                k += step;
                count += 1;
                continue;
            }
            let is_rev = rev_start;
            // On the reverse strand the start maps to the larger forward
            // coordinate; keep (start_pos, end_pos) ordered.
            let (start_pos, end_pos) = if is_rev { (end_f, start_f) } else { (start_f, end_f) };

            let rid_start = idx.pos2rid(start_pos);
            let rid_end = idx.pos2rid(end_pos);
            if rid_start < 0 {
                k += step;
                count += 1;
                continue;
            }

            let mut rid = rid_start;
            let tlen = idx.anns[rid as usize].len as i64;
            let mut hit_loc = (if is_rev { end_pos } else { start_pos })
                - idx.anns[rid as usize].offset as i64;

            if rid_start != rid_end {
                // Seed spans two packed transcripts.
                if !opts.split_spanning_seeds {
                    k += step;
                    count += 1;
                    continue;
                }
                if !is_rev {
                    // t1 ===========|t2|==========>
                    //           |==========>
                    let len1 = tlen - hit_loc;
                    let len2 = slen - len1;
                    if len1.max(len2) < opts.min_seed_len as i64 {
                        k += step;
                        count += 1;
                        continue;
                    }
                    if len1 >= len2 {
                        slen = len1;
                    } else {
                        // The hit now begins at base 0 of the right-hand
                        // transcript, len1 bases into the read.
                        hit_loc = 0;
                        slen = len2;
                        query_start += len1;
                        rid = rid_end;
                    }
                } else {
                    // Reverse-strand spanning seed; rlen is adjusted so the
                    // vote still places the read's leftmost base correctly.
                    let len2 = end_pos - idx.anns[rid_end as usize].offset as i64;
                    let len1 = slen - len2;
                    if len1.max(len2) < opts.min_seed_len as i64 {
                        k += step;
                        count += 1;
                        continue;
                    }
                    if len1 >= len2 {
                        slen = len1;
                        hit_loc = tlen - len2;
                        query_start += len2;
                        rlen -= len2;
                    } else {
                        slen = len2;
                        rid = rid_end;
                        hit_loc = len2;
                        rlen = hit_loc + query_start;
                    }
                }
            }

            let entry = hits.entry(rid as u32).or_default();
            if is_rev {
                entry.add_frag_match_rc(hit_loc as u32, query_start as u32, slen as u32, rlen as u32);
            } else {
                entry.add_frag_match(hit_loc as u32, query_start as u32, slen as u32);
            }

            k += step;
            count += 1;
        }
    }
}

/// Map a single-end fragment into `group`. The group is cleared first; an
/// empty group on return means no transcript passed the coverage cutoff.
pub fn map_single_fragment<C: CoverageCalculator>(
    idx: &TxpIndex,
    transcripts: &[Transcript],
    opts: &QuantOpts,
    read: &[u8],
    scratch: &mut MappingScratch,
    group: &mut AlignmentGroup,
) {
    let mut hits: BTreeMap<u32, C> = BTreeMap::new();
    collect_hits_for_read(idx, opts, read, scratch, &mut hits);

    group.clear();
    for (tid, hit_list) in hits.iter_mut() {
        let t = &transcripts[*tid as usize];
        hit_list.compute_best_chain(t, read);
        if hit_list.best_hit_score() >= opts.coverage_thresh {
            let fmt = hit_type_se(hit_list.best_hit_pos(), hit_list.is_forward());
            group.push(SmemAlignment::new(
                *tid,
                fmt,
                hit_list.best_hit_score(),
                0,
            ));
        }
    }
}

/// Map a read pair into `group`. Both ends must independently pass the
/// coverage cutoff on the same transcript; the pair's score is the mean of
/// the two ends and the fragment length is inferred from the end positions.
pub fn map_paired_fragment<C: CoverageCalculator>(
    idx: &TxpIndex,
    transcripts: &[Transcript],
    opts: &QuantOpts,
    read1: &[u8],
    read2: &[u8],
    scratch: &mut MappingScratch,
    group: &mut AlignmentGroup,
) {
    let mut left_hits: BTreeMap<u32, C> = BTreeMap::new();
    let mut right_hits: BTreeMap<u32, C> = BTreeMap::new();
    collect_hits_for_read(idx, opts, read1, scratch, &mut left_hits);
    collect_hits_for_read(idx, opts, read2, scratch, &mut right_hits);

    group.clear();

    for (tid, hit_list) in left_hits.iter_mut() {
        let t = &transcripts[*tid as usize];
        hit_list.compute_best_chain(t, read1);
    }

    let left_read_len = read1.len() as i32;
    let right_read_len = read2.len() as i32;

    for (tid, right_list) in right_hits.iter_mut() {
        let left_list = match left_hits.get(tid) {
            Some(l) if l.best_hit_score() >= opts.coverage_thresh => l,
            _ => continue,
        };
        let t = &transcripts[*tid as usize];
        right_list.compute_best_chain(t, read2);
        if right_list.best_hit_score() < opts.coverage_thresh {
            continue;
        }

        let end1_start = left_list.best_hit_pos();
        let end2_start = right_list.best_hit_pos();

        let score = (left_list.best_hit_score() + right_list.best_hit_score()) * 0.5;
        let frag_length = (end1_start - end2_start).unsigned_abs() + right_read_len as u32;

        let end1_fwd = left_list.is_forward();
        let end2_fwd = right_list.is_forward();
        // A reverse-oriented end is reported at its rightmost base.
        let end1_pos = if end1_fwd {
            end1_start
        } else {
            end1_start + left_read_len
        };
        let end2_pos = if end2_fwd {
            end2_start
        } else {
            end2_start + right_read_len
        };
        let fmt = hit_type_pe(end1_pos, end1_fwd, end2_pos, end2_fwd);

        group.push(SmemAlignment::new(*tid, fmt, score, frag_length));
    }
}

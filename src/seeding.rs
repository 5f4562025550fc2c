// Seed engine: Super-Maximal Exact Match generation against the FM-index.
//
// Three passes over the query, in the classic MEM-collection arrangement:
// an SMEM pass over every query position, a re-seeding pass inside long
// low-occurrence SMEMs, and an optional forward-only extra pass for
// additional sensitivity.

use crate::fm_index::{backward_ext, forward_ext};
use crate::index::Bwt;
use crate::opts::QuantOpts;

/// A maximal exact match and its BWT interval. `query_end` is inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Smem {
    pub query_start: i32,
    pub query_end: i32,
    /// First BWT row of the match interval.
    pub interval_start: u64,
    /// First BWT row of the paired reverse-complement interval.
    pub rc_interval_start: u64,
    /// Number of occurrences (interval width).
    pub interval_size: u64,
}

impl Smem {
    /// Match length in the query.
    #[inline]
    pub fn len(&self) -> i32 {
        self.query_end - self.query_start + 1
    }
}

#[inline]
fn init_at(bwt: &Bwt, x: usize, a: u8) -> Smem {
    Smem {
        query_start: x as i32,
        query_end: x as i32,
        interval_start: bwt.counts[a as usize],
        rc_interval_start: bwt.counts[3 - a as usize],
        interval_size: bwt.counts[a as usize + 1] - bwt.counts[a as usize],
    }
}

/// Working buffers reused across reads to avoid per-fragment allocation.
#[derive(Debug, Default)]
pub struct SeedScratch {
    prev: Vec<Smem>,
    curr: Vec<Smem>,
}

/// Collect every SMEM covering query position `x` whose interval stays at
/// least `min_intv` wide and whose length reaches `min_seed_len`. Returns
/// the position at which the outer scan should resume (the end of the
/// longest extension from `x`).
pub fn collect_smems_at(
    bwt: &Bwt,
    query: &[u8],
    x: usize,
    min_intv: u64,
    min_seed_len: i32,
    out: &mut Vec<Smem>,
    scratch: &mut SeedScratch,
) -> usize {
    let query_len = query.len();
    debug_assert!(x < query_len && query[x] < 4);

    let prev = &mut scratch.prev;
    let curr = &mut scratch.curr;
    prev.clear();
    curr.clear();

    let mut smem = init_at(bwt, x, query[x]);
    let mut next_x = x + 1;

    // Forward phase: extend right as far as the interval allows, recording
    // each distinct interval size on the way.
    for (j, &a) in query.iter().enumerate().take(query_len).skip(x + 1) {
        next_x = j + 1;
        if a >= 4 {
            next_x = j;
            break;
        }
        let ext = forward_ext(bwt, smem, a);
        if ext.interval_size != smem.interval_size {
            prev.push(smem);
        }
        if ext.interval_size < min_intv {
            next_x = j;
            break;
        }
        smem = ext;
        smem.query_end = j as i32;
    }
    if smem.interval_size >= min_intv {
        prev.push(smem);
    }

    // Longest-first for the backward phase.
    prev.reverse();

    // Backward phase: at each left position, try to extend every surviving
    // candidate; the longest one that dies here is emitted (at most one
    // SMEM per step), and extensions with duplicate interval sizes are
    // dropped.
    for j in (0..x).rev() {
        let a = query[j];
        if a >= 4 {
            break;
        }

        curr.clear();
        let mut curr_size: i64 = -1;
        let num_prev = prev.len();

        let mut p = 0;
        while p < num_prev {
            let cand = prev[p];
            let mut ext = backward_ext(bwt, cand, a);
            ext.query_start = j as i32;

            if ext.interval_size < min_intv && cand.len() >= min_seed_len {
                out.push(cand);
                break;
            }
            if ext.interval_size >= min_intv && ext.interval_size as i64 != curr_size {
                curr_size = ext.interval_size as i64;
                curr.push(ext);
                break;
            }
            p += 1;
        }

        p += 1;
        while p < num_prev {
            let cand = prev[p];
            let mut ext = backward_ext(bwt, cand, a);
            ext.query_start = j as i32;
            if ext.interval_size >= min_intv && ext.interval_size as i64 != curr_size {
                curr_size = ext.interval_size as i64;
                curr.push(ext);
            }
            p += 1;
        }

        std::mem::swap(prev, curr);
        if prev.is_empty() {
            break;
        }
    }

    // Whatever survived all the way to the left edge; the front entry is
    // the longest.
    if let Some(&survivor) = prev.first() {
        if survivor.len() >= min_seed_len {
            out.push(survivor);
        }
    }

    next_x
}

/// Forward-only seeding: walk the query emitting the first extension whose
/// interval drops under `max_intv` once it is longer than `min_seed_len`.
pub fn forward_only_seeds(
    bwt: &Bwt,
    query: &[u8],
    min_seed_len: i32,
    max_intv: u64,
    out: &mut Vec<Smem>,
) {
    let min_len = min_seed_len + 1;
    let query_len = query.len();
    let mut x = 0;

    while x < query_len {
        let a = query[x];
        let mut next_x = x + 1;
        if a >= 4 {
            x = next_x;
            continue;
        }

        let mut smem = init_at(bwt, x, a);
        for j in (x + 1)..query_len {
            next_x = j + 1;
            let a = query[j];
            if a >= 4 {
                break;
            }
            smem = forward_ext(bwt, smem, a);
            smem.query_end = j as i32;

            if smem.interval_size < max_intv && smem.len() >= min_len {
                if smem.interval_size > 0 {
                    out.push(smem);
                }
                break;
            }
        }
        x = next_x;
    }
}

/// Run all seeding passes for one encoded query. Seeds are appended to
/// `out` in emission order.
pub fn collect_seeds(
    bwt: &Bwt,
    query: &[u8],
    opts: &QuantOpts,
    out: &mut Vec<Smem>,
    scratch: &mut SeedScratch,
) {
    out.clear();
    let start_width = 1u64;
    let split_len = (opts.min_seed_len as f32 * opts.split_factor + 0.499) as i32;

    // First pass: all SMEMs of sufficient length.
    let mut x = 0;
    while x < query.len() {
        if query[x] < 4 {
            x = collect_smems_at(bwt, query, x, start_width, opts.min_seed_len, out, scratch);
        } else {
            x += 1;
        }
    }

    // Second pass: re-seed from the midpoint of long, rare SMEMs with a
    // raised interval floor so contained MEMs surface.
    let old_n = out.len();
    for k in 0..old_n {
        let p = out[k];
        if p.len() < split_len || p.interval_size > opts.split_width as u64 {
            continue;
        }
        let mid = ((p.query_start + p.query_end + 1) >> 1) as usize;
        if query[mid] < 4 {
            collect_smems_at(
                bwt,
                query,
                mid,
                p.interval_size + 1,
                opts.min_seed_len,
                out,
                scratch,
            );
        }
    }

    // Third pass: LAST-like forward-only seeding, capped at max_mem_intv
    // occurrences.
    if opts.extra_seed_pass && opts.max_mem_intv > 0 {
        forward_only_seeds(bwt, query, opts.min_seed_len, opts.max_mem_intv, out);
    }
}

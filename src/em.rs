// Online EM over mini-batches of alignment groups.
//
// E-step: normalize per-alignment probabilities within each group from the
// current transcript masses, the fragment-length distribution, and the
// library-format compatibility. M-step: fold the normalized probabilities,
// weighted by the forgetting mass, back into the transcript and cluster
// masses. The fragment-length distribution keeps learning until burn-in.

use crate::alignment::AlignmentGroup;
use crate::cluster_forest::ClusterForest;
use crate::fld::FragmentLengthDistribution;
use crate::library_format::log_align_format_prob;
use crate::math::{log_add, LOG_0, LOG_1};
use crate::opts::QuantOpts;
use crate::read_library::ReadLibrary;
use crate::transcript::Transcript;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Fragments assigned before the auxiliary models stop updating.
pub const NUM_BURNIN_FRAGS: u64 = 5_000_000;

/// Number of alignment groups per mini-batch.
pub const MINI_BATCH_SIZE: usize = 1000;

/// Per-worker contribution to the forgetting schedule. Advances the batch
/// counter and folds the decay term for batch `b >= 2` into the shared
/// accumulator; returns the mass the caller should apply to its batch.
pub fn update_forgetting_mass(
    batch_num: &AtomicU64,
    log_forgetting_mass: &Mutex<f64>,
    forgetting_factor: f64,
) -> f64 {
    let old_batch = batch_num.fetch_add(1, Ordering::SeqCst);
    let mut mass = log_forgetting_mass.lock().unwrap();
    if old_batch > 1 {
        *mass += forgetting_factor * ((old_batch - 1) as f64).ln()
            - ((old_batch as f64).powf(forgetting_factor) - 1.0).ln();
    }
    *mass
}

/// Run one mini-batch of the online EM update.
#[allow(clippy::too_many_arguments)]
pub fn process_mini_batch(
    log_forgetting_mass: f64,
    read_lib: &ReadLibrary,
    opts: &QuantOpts,
    batch: &mut [AlignmentGroup],
    transcripts: &[Transcript],
    cluster_forest: &Mutex<ClusterForest>,
    frag_length_dist: &Mutex<FragmentLengthDistribution>,
    num_assigned_fragments: &AtomicU64,
    rng: &mut StdRng,
    initial_round: bool,
    burned_in: &AtomicBool,
) {
    let num_transcripts = transcripts.len();
    let mut local_assigned: u64 = 0;
    let mut lib_type_counts = vec![0u64; read_lib.num_lib_type_slots()];
    let update_counts = initial_round;
    let expected_format = read_lib.format();
    let is_burned_in = burned_in.load(Ordering::Acquire);

    // Reverse map transcript -> alignments in this batch, for the M-step.
    let mut hits_for_transcript: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();
    for (gi, group) in batch.iter().enumerate() {
        for (ai, aln) in group.alignments().iter().enumerate() {
            hits_for_transcript
                .entry(aln.transcript_id)
                .or_default()
                .push((gi, ai));
        }
    }

    // E-step: distribute each fragment's mass over its alignments in
    // proportion to the current model.
    for group in batch.iter_mut() {
        if group.is_empty() {
            continue;
        }

        let mut sum_of_align_probs = LOG_0;
        let mut transcript_unique = true;
        let first_transcript_id = group.alignments()[0].transcript_id;
        let mut observed_transcripts: HashSet<u32> = HashSet::new();

        for aln in group.alignments_mut().iter_mut() {
            let tid = aln.transcript_id;
            assert!(
                (tid as usize) < num_transcripts,
                "transcript id {} out of range ({} transcripts)",
                tid,
                num_transcripts
            );
            let transcript = &transcripts[tid as usize];
            transcript_unique = transcript_unique && tid == first_transcript_id;

            let transcript_log_count = transcript.mass();
            if transcript_log_count != LOG_0 {
                let ref_length = if transcript.length > 0 {
                    transcript.length as f64
                } else {
                    1.0
                };

                let log_frag_prob = if opts.use_frag_len_dist && aln.frag_length > 0 {
                    frag_length_dist
                        .lock()
                        .unwrap()
                        .pmf(aln.frag_length as usize)
                } else {
                    LOG_1
                };
                let log_align_compat_prob = if opts.use_read_compat {
                    log_align_format_prob(aln.format, expected_format)
                } else {
                    LOG_1
                };

                lib_type_counts[aln.format.format_id() as usize] += 1;

                aln.log_prob =
                    (transcript_log_count - ref_length.ln()) + log_frag_prob + log_align_compat_prob;
                sum_of_align_probs = log_add(sum_of_align_probs, aln.log_prob);

                if observed_transcripts.insert(tid) && update_counts {
                    transcript.add_total_count(1);
                }
            } else {
                aln.log_prob = LOG_0;
            }
        }

        // A zero-probability fragment contributes nothing.
        if sum_of_align_probs == LOG_0 {
            continue;
        }
        local_assigned += 1;

        // Normalize, and during burn-in sample fragment lengths in
        // proportion to the posterior.
        for aln in group.alignments_mut().iter_mut() {
            aln.log_prob -= sum_of_align_probs;

            if !is_burned_in {
                let r: f64 = rng.gen();
                if r < aln.log_prob.exp() && aln.frag_length > 0 {
                    frag_length_dist
                        .lock()
                        .unwrap()
                        .add_val(aln.frag_length as usize, log_forgetting_mass);
                }
            }
        }

        // Cluster bookkeeping: a uniquely mapped fragment credits its
        // transcript's cluster; an ambiguous one merges every transcript it
        // touched.
        let mut forest = cluster_forest.lock().unwrap();
        if transcript_unique {
            if update_counts {
                transcripts[first_transcript_id as usize].add_unique_count(1);
            }
            forest.update_cluster(first_transcript_id, 1, log_forgetting_mass, update_counts);
        } else {
            forest.merge_clusters(group.alignments().iter().map(|a| a.transcript_id));
            forest.update_cluster(
                group.alignments()[0].transcript_id,
                1,
                log_forgetting_mass,
                update_counts,
            );
        }
    }

    // M-step: per transcript, log-sum the normalized alignment
    // probabilities seen this batch and add the forgotten mass.
    for (&tid, hits) in hits_for_transcript.iter() {
        let transcript = &transcripts[tid as usize];
        let mut hit_mass = LOG_0;
        for &(gi, ai) in hits {
            let lp = batch[gi].alignments()[ai].log_prob;
            hit_mass = log_add(hit_mass, lp);
        }
        if hit_mass == LOG_0 {
            continue;
        }
        let update_mass = log_forgetting_mass + hit_mass;
        transcript.add_mass(update_mass);
        transcript.add_shared_count(hit_mass.exp());
    }

    let assigned_before = num_assigned_fragments.fetch_add(local_assigned, Ordering::AcqRel);
    if assigned_before + local_assigned >= NUM_BURNIN_FRAGS && !is_burned_in {
        burned_in.store(true, Ordering::Release);
    }
    read_lib.update_lib_type_counts(&lib_type_counts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::SmemAlignment;
    use crate::library_format::{hit_type_pe, hit_type_se, LibraryFormat};
    use rand::SeedableRng;

    fn make_transcripts(n: usize, len: u32) -> Vec<Transcript> {
        (0..n)
            .map(|i| Transcript::new(i as u32, &format!("t{}", i), len, 0.005))
            .collect()
    }

    struct EmHarness {
        transcripts: Vec<Transcript>,
        forest: Mutex<ClusterForest>,
        fld: Mutex<FragmentLengthDistribution>,
        lib: ReadLibrary,
        assigned: AtomicU64,
        burned_in: AtomicBool,
        rng: StdRng,
        opts: QuantOpts,
    }

    impl EmHarness {
        fn new(n: usize) -> Self {
            EmHarness {
                transcripts: make_transcripts(n, 1000),
                forest: Mutex::new(ClusterForest::new(n)),
                fld: Mutex::new(FragmentLengthDistribution::new(1.0, 800, 200.0, 80.0, 4, 0.5)),
                lib: ReadLibrary::unmated(
                    LibraryFormat::parse("U").unwrap(),
                    vec!["reads.fq".into()],
                ),
                assigned: AtomicU64::new(0),
                burned_in: AtomicBool::new(false),
                rng: StdRng::seed_from_u64(42),
                opts: QuantOpts::default(),
            }
        }

        fn run(&mut self, batch: &mut [AlignmentGroup], log_forgetting_mass: f64) {
            process_mini_batch(
                log_forgetting_mass,
                &self.lib,
                &self.opts,
                batch,
                &self.transcripts,
                &self.forest,
                &self.fld,
                &self.assigned,
                &mut self.rng,
                true,
                &self.burned_in,
            );
        }
    }

    #[test]
    fn tied_alignments_split_mass_evenly() {
        let mut h = EmHarness::new(2);
        let mut group = AlignmentGroup::new();
        group.push(SmemAlignment::new(0, hit_type_se(0, true), 0.9, 0));
        group.push(SmemAlignment::new(1, hit_type_se(0, true), 0.9, 0));
        let mut batch = vec![group];

        h.run(&mut batch, 0.0);

        // Probabilities normalize within the group.
        let total: f64 = batch[0]
            .alignments()
            .iter()
            .map(|a| a.log_prob.exp())
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
        for a in batch[0].alignments() {
            assert!((a.log_prob.exp() - 0.5).abs() < 1e-9);
        }

        // Each transcript got half the (unit) forgetting mass on top of
        // its prior.
        let alpha = 0.005f64;
        for t in &h.transcripts {
            let gained = t.mass().exp() - alpha;
            assert!((gained - 0.5).abs() < 1e-9, "gained = {}", gained);
        }

        // An ambiguous fragment merged the clusters.
        assert_eq!(h.forest.lock().unwrap().num_clusters(), 1);
        assert_eq!(h.assigned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unique_alignment_updates_counts() {
        let mut h = EmHarness::new(3);
        let mut group = AlignmentGroup::new();
        group.push(SmemAlignment::new(2, hit_type_se(0, true), 1.0, 0));
        let mut batch = vec![group];

        h.run(&mut batch, 0.0);

        assert_eq!(h.transcripts[2].unique_count(), 1);
        assert_eq!(h.transcripts[2].total_count(), 1);
        assert_eq!(h.transcripts[0].total_count(), 0);
        // Unique mappings never merge clusters.
        assert_eq!(h.forest.lock().unwrap().num_clusters(), 3);
        assert_eq!(h.forest.lock().unwrap().cluster_count(2), 1);
    }

    #[test]
    fn empty_groups_are_skipped() {
        let mut h = EmHarness::new(2);
        let mut batch = vec![AlignmentGroup::new()];
        h.run(&mut batch, 0.0);
        assert_eq!(h.assigned.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn mass_conservation_over_batches() {
        let mut h = EmHarness::new(4);
        let alpha = 0.005f64;

        for round in 0..3 {
            let mut batch = Vec::new();
            for i in 0..10u32 {
                let mut g = AlignmentGroup::new();
                g.push(SmemAlignment::new((round + i) % 4, hit_type_se(0, true), 1.0, 0));
                batch.push(g);
            }
            h.run(&mut batch, 0.0);
        }

        // With unit forgetting mass, total gained mass equals the number
        // of assigned fragments.
        let total_gained: f64 = h.transcripts.iter().map(|t| t.mass().exp() - alpha).sum();
        let assigned = h.assigned.load(Ordering::Relaxed) as f64;
        assert!(
            (total_gained - assigned).abs() < 1e-6,
            "gained {} vs assigned {}",
            total_gained,
            assigned
        );
    }

    #[test]
    fn frag_length_prob_separates_plausible_pairs() {
        let mut h = EmHarness::new(2);
        h.opts.use_frag_len_dist = true;
        h.lib = ReadLibrary::paired(
            LibraryFormat::parse("IU").unwrap(),
            vec!["r1.fq".into()],
            vec!["r2.fq".into()],
        );

        let mut group = AlignmentGroup::new();
        // Same score, but one placement implies a fragment near the FLD
        // mode and the other a wildly long one.
        group.push(SmemAlignment::new(0, hit_type_pe(10, true, 150, false), 0.9, 200));
        group.push(SmemAlignment::new(1, hit_type_pe(10, true, 700, false), 0.9, 780));
        let mut batch = vec![group];

        h.run(&mut batch, 0.0);

        let p0 = batch[0].alignments()[0].log_prob.exp();
        let p1 = batch[0].alignments()[1].log_prob.exp();
        assert!(p0 > p1, "p0 = {}, p1 = {}", p0, p1);
        assert!((p0 + p1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn incompatible_orientation_zeroes_probability() {
        let mut h = EmHarness::new(2);
        h.opts.use_read_compat = true;
        h.lib = ReadLibrary::paired(
            LibraryFormat::parse("IU").unwrap(),
            vec!["r1.fq".into()],
            vec!["r2.fq".into()],
        );

        let mut group = AlignmentGroup::new();
        // Inward pair vs outward pair under an inward expectation.
        group.push(SmemAlignment::new(0, hit_type_pe(10, true, 150, false), 0.9, 200));
        group.push(SmemAlignment::new(1, hit_type_pe(150, true, 10, false), 0.9, 200));
        let mut batch = vec![group];

        h.run(&mut batch, 0.0);

        assert!((batch[0].alignments()[0].log_prob.exp() - 1.0).abs() < 1e-9);
        assert_eq!(batch[0].alignments()[1].log_prob.exp(), 0.0);
    }

    #[test]
    fn burn_in_flips_at_the_threshold() {
        let mut h = EmHarness::new(1);
        // One fragment short of the burn-in threshold.
        h.assigned
            .store(NUM_BURNIN_FRAGS - 1, Ordering::SeqCst);

        let mut group = AlignmentGroup::new();
        group.push(SmemAlignment::new(0, hit_type_se(0, true), 1.0, 0));
        let mut batch = vec![group];
        h.run(&mut batch, 0.0);

        assert!(h.burned_in.load(Ordering::SeqCst));
    }

    #[test]
    fn forgetting_mass_schedule_flattens() {
        let batch_num = AtomicU64::new(0);
        let mass = Mutex::new(0.0f64);
        let mut values = Vec::new();
        for _ in 0..8 {
            values.push(update_forgetting_mass(&batch_num, &mass, 0.65));
        }
        // The first two batches keep the initial mass. The accumulator
        // then grows, but by shrinking steps, so each batch's weight is a
        // smaller fraction of the total mass than the one before.
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], 0.0);
        let steps: Vec<f64> = values[1..].windows(2).map(|w| w[1] - w[0]).collect();
        for s in &steps {
            assert!(*s > 0.0);
        }
        for w in steps.windows(2) {
            assert!(w[1] < w[0]);
        }
    }
}

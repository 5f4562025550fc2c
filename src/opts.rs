// Quantification options shared by the seeding, mapping, and EM stages.

/// Knobs consumed by the quantification core. `Default` mirrors the CLI
/// defaults.
#[derive(Debug, Clone)]
pub struct QuantOpts {
    /// (S)MEMs shorter than this are not considered.
    pub min_seed_len: i32,
    /// At most this many occurrences of a seed are sampled.
    pub max_occ: i32,
    /// Occurrence cap for the extra-sensitivity seeding pass.
    pub max_mem_intv: u64,
    /// Re-seed inside SMEMs longer than min_seed_len * split_factor.
    pub split_factor: f32,
    /// Re-seed only SMEMs occurring at most this many times (0 disables).
    pub split_width: i32,
    /// Fragments mapping to more than this many places are discarded.
    pub max_read_occs: u32,
    /// Required coverage of a read by merged seeds to call a hit.
    pub coverage_thresh: f64,
    /// Split seeds that straddle a transcript boundary instead of
    /// discarding them.
    pub split_spanning_seeds: bool,
    /// Enable the extra LAST-like seeding pass.
    pub extra_seed_pass: bool,
    /// Weight alignments by their orientation's agreement with the
    /// declared library format.
    pub use_read_compat: bool,
    /// Weight paired-end alignments by the learned fragment-length
    /// distribution.
    pub use_frag_len_dist: bool,
    /// Use the sampled-validation chainer instead of the greedy one.
    pub sampled_validation: bool,
    /// Disable writing/replaying the inter-round mapping cache.
    pub disable_mapping_cache: bool,
    /// Keep re-reading the input until this many fragments are observed.
    pub num_required_fragments: u64,
    /// Number of mapping / EM worker threads.
    pub num_threads: usize,
    /// Fixed RNG seed for the EM sampling step; None seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for QuantOpts {
    fn default() -> Self {
        QuantOpts {
            min_seed_len: 19,
            max_occ: 200,
            max_mem_intv: 20,
            split_factor: 1.5,
            split_width: 0,
            max_read_occs: 100,
            coverage_thresh: 0.75,
            split_spanning_seeds: false,
            extra_seed_pass: false,
            use_read_compat: false,
            use_frag_len_dist: false,
            sampled_validation: false,
            disable_mapping_cache: false,
            num_required_fragments: 50_000_000,
            num_threads: 1,
            rng_seed: None,
        }
    }
}

// A quantification experiment: the read libraries, the loaded index, the
// transcript table, and the shared counters that survive across rounds.

use crate::cluster_forest::ClusterForest;
use crate::index::TxpIndex;
use crate::read_library::ReadLibrary;
use crate::transcript::Transcript;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Prior mass each transcript starts with.
pub const PRIOR_ALPHA: f64 = 0.005;

pub struct ReadExperiment {
    read_libraries: Vec<ReadLibrary>,
    index: TxpIndex,
    transcripts: Vec<Transcript>,
    cluster_forest: Mutex<ClusterForest>,
    num_observed_fragments: AtomicU64,
    num_assigned_fragments: AtomicU64,
    batch_num: AtomicU64,
    total_assigned_fragments: AtomicU64,
    quantification_passes: u64,
}

impl ReadExperiment {
    /// Load the index from `index_dir` and set up the experiment.
    pub fn new(read_libraries: Vec<ReadLibrary>, index_dir: &Path) -> io::Result<Self> {
        for rl in &read_libraries {
            rl.check_valid()?;
        }
        let index = TxpIndex::load(index_dir)?;
        Ok(Self::from_index(read_libraries, index))
    }

    /// Set up the experiment over an already-loaded index.
    pub fn from_index(read_libraries: Vec<ReadLibrary>, index: TxpIndex) -> Self {
        let num_seqs = index.num_seqs();
        log::info!("index contained {} targets", num_seqs);

        let mut transcripts = Vec::with_capacity(num_seqs);
        for rid in 0..num_seqs {
            let ann = &index.anns[rid];
            let mut t = Transcript::new(rid as u32, &ann.name, ann.len as u32, PRIOR_ALPHA);
            t.set_sequence(&index.decode_transcript(rid));
            transcripts.push(t);
        }

        ReadExperiment {
            read_libraries,
            index,
            cluster_forest: Mutex::new(ClusterForest::new(num_seqs)),
            transcripts,
            num_observed_fragments: AtomicU64::new(0),
            num_assigned_fragments: AtomicU64::new(0),
            batch_num: AtomicU64::new(0),
            total_assigned_fragments: AtomicU64::new(0),
            quantification_passes: 0,
        }
    }

    pub fn index(&self) -> &TxpIndex {
        &self.index
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    pub fn read_libraries(&self) -> &[ReadLibrary] {
        &self.read_libraries
    }

    pub fn cluster_forest(&self) -> &Mutex<ClusterForest> {
        &self.cluster_forest
    }

    pub fn num_observed_fragments(&self) -> &AtomicU64 {
        &self.num_observed_fragments
    }

    pub fn num_assigned_fragments(&self) -> &AtomicU64 {
        &self.num_assigned_fragments
    }

    pub fn batch_num(&self) -> &AtomicU64 {
        &self.batch_num
    }

    /// Assigned fragments across every pass, including the current one.
    pub fn total_assigned_fragments(&self) -> u64 {
        self.total_assigned_fragments.load(Ordering::Relaxed)
            + self.num_assigned_fragments.load(Ordering::Relaxed)
    }

    pub fn quantification_passes(&self) -> u64 {
        self.quantification_passes
    }

    pub fn read_files_as_string(&self) -> String {
        self.read_libraries
            .iter()
            .map(|rl| rl.read_files_as_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Roll per-round counters into the running totals before a cache
    /// replay round. Always succeeds: replay does not touch the input
    /// files.
    pub fn soft_reset(&mut self) -> bool {
        self.roll_counters();
        true
    }

    /// Roll counters before re-reading the input files themselves. Fails
    /// when any input is not a regular file (a pipe cannot be re-read).
    pub fn reset(&mut self) -> bool {
        if !self.read_libraries.iter().all(|rl| rl.is_regular_file()) {
            return false;
        }
        self.roll_counters();
        true
    }

    fn roll_counters(&mut self) {
        // The observed-fragment counter is cumulative across rounds (it
        // drives the outer quantification loop); only the per-round
        // assigned count rolls into the running total. The batch counter
        // also keeps running so the forgetting schedule continues to decay
        // across rounds.
        let assigned = self.num_assigned_fragments.swap(0, Ordering::SeqCst);
        self.total_assigned_fragments
            .fetch_add(assigned, Ordering::SeqCst);
        self.quantification_passes += 1;
    }

    /// Write the per-library format tallies, and log any consistency
    /// warnings they raise.
    pub fn summarize_library_type_counts(&self, path: &Path) -> io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        for rl in &self.read_libraries {
            let (summary, warnings) = rl.summarize_type_counts();
            file.write_all(summary.as_bytes())?;
            for w in warnings {
                log::warn!("{} (details in {})", w, path.display());
            }
        }
        Ok(())
    }
}

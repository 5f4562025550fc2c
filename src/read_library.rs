// A read library: the input files for one sequencing run together with its
// declared format and the tally of observed library-format ids.

use crate::library_format::{LibraryFormat, ReadStrandedness, ReadType};
use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct ReadLibrary {
    format: LibraryFormat,
    unmated: Vec<PathBuf>,
    mates1: Vec<PathBuf>,
    mates2: Vec<PathBuf>,
    lib_type_counts: Vec<AtomicU64>,
}

impl ReadLibrary {
    pub fn unmated(format: LibraryFormat, files: Vec<PathBuf>) -> Self {
        ReadLibrary {
            format,
            unmated: files,
            mates1: Vec::new(),
            mates2: Vec::new(),
            lib_type_counts: new_counts(),
        }
    }

    pub fn paired(format: LibraryFormat, mates1: Vec<PathBuf>, mates2: Vec<PathBuf>) -> Self {
        ReadLibrary {
            format,
            unmated: Vec::new(),
            mates1,
            mates2,
            lib_type_counts: new_counts(),
        }
    }

    pub fn format(&self) -> LibraryFormat {
        self.format
    }

    pub fn unmated_files(&self) -> &[PathBuf] {
        &self.unmated
    }

    pub fn mates1_files(&self) -> &[PathBuf] {
        &self.mates1
    }

    pub fn mates2_files(&self) -> &[PathBuf] {
        &self.mates2
    }

    /// Check that the declared format and the provided files agree.
    pub fn check_valid(&self) -> io::Result<()> {
        let err = |msg: String| Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
        match self.format.read_type {
            ReadType::PairedEnd => {
                if self.mates1.is_empty() || self.mates2.is_empty() {
                    return err("paired-end library requires both mate files".to_string());
                }
                if self.mates1.len() != self.mates2.len() {
                    return err(format!(
                        "paired-end library has {} mate-1 files but {} mate-2 files",
                        self.mates1.len(),
                        self.mates2.len()
                    ));
                }
                if !self.unmated.is_empty() {
                    return err("paired-end library cannot also list unmated reads".to_string());
                }
            }
            ReadType::SingleEnd => {
                if self.unmated.is_empty() {
                    return err("single-end library requires unmated read files".to_string());
                }
                if !self.mates1.is_empty() || !self.mates2.is_empty() {
                    return err("single-end library cannot list mate files".to_string());
                }
            }
        }
        for f in self.all_files() {
            if !f.exists() {
                return err(format!("read file {} does not exist", f.display()));
            }
        }
        Ok(())
    }

    fn all_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.unmated.iter().chain(&self.mates1).chain(&self.mates2)
    }

    /// True only when every input is a regular file that can be re-read for
    /// another quantification pass (pipes and FIFOs cannot).
    pub fn is_regular_file(&self) -> bool {
        self.all_files()
            .all(|f| std::fs::metadata(f).map(|m| m.file_type().is_file()).unwrap_or(false))
    }

    pub fn read_files_as_string(&self) -> String {
        let mut s = String::new();
        for (i, f) in self.all_files().enumerate() {
            if i > 0 {
                let _ = write!(s, ", ");
            }
            let _ = write!(s, "{}", f.display());
        }
        s
    }

    pub fn num_lib_type_slots(&self) -> usize {
        self.lib_type_counts.len()
    }

    /// Fold a worker's per-batch format tallies into the library totals.
    pub fn update_lib_type_counts(&self, counts: &[u64]) {
        for (slot, &c) in self.lib_type_counts.iter().zip(counts) {
            if c > 0 {
                slot.fetch_add(c, Ordering::Relaxed);
            }
        }
    }

    pub fn lib_type_counts(&self) -> Vec<u64> {
        self.lib_type_counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Human-readable consistency summary for this library, in the format
    /// written to libFormatCounts.txt. Also returns warnings about strand
    /// bias or a high fraction of format-inconsistent alignments.
    pub fn summarize_type_counts(&self) -> (String, Vec<String>) {
        let counts = self.lib_type_counts();
        let fmt = self.format;
        let mut out = String::new();
        let mut warnings = Vec::new();

        let _ = writeln!(out, "========");
        let _ = writeln!(
            out,
            "Read library consisting of files: {}",
            self.read_files_as_string()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Expected format: {}", fmt);
        let _ = writeln!(out);

        let num_agree;
        let mut num_disagree = 0u64;

        if fmt.strandedness == ReadStrandedness::U {
            // For an unstranded protocol the two concrete strandings are
            // both consistent; report the balance between them.
            let strands = match fmt.read_type {
                ReadType::SingleEnd => [ReadStrandedness::S, ReadStrandedness::A],
                ReadType::PairedEnd => [ReadStrandedness::SA, ReadStrandedness::AS],
            };
            let fmt1 = LibraryFormat::new(fmt.read_type, fmt.orientation, strands[0]);
            let fmt2 = LibraryFormat::new(fmt.read_type, fmt.orientation, strands[1]);

            let mut num_fmt1 = 0u64;
            let mut num_fmt2 = 0u64;
            for (id, &c) in counts.iter().enumerate() {
                if id == fmt1.format_id() as usize {
                    num_fmt1 = c;
                } else if id == fmt2.format_id() as usize {
                    num_fmt2 = c;
                } else {
                    num_disagree += c;
                }
            }
            num_agree = num_fmt1 + num_fmt2;
            let ratio = num_fmt1 as f64 / (num_fmt1 + num_fmt2).max(1) as f64;

            if num_agree > 0 && (ratio - 0.5).abs() > 0.01 {
                warnings.push(format!(
                    "Read library [{}]: detected a strand bias > 1% in an unstranded protocol (ratio = {:.4})",
                    self.read_files_as_string(),
                    ratio
                ));
            }

            let _ = writeln!(out, "# of consistent alignments: {}", num_agree);
            let _ = writeln!(out, "# of inconsistent alignments: {}", num_disagree);
            let _ = writeln!(out, "strand bias = {:.4} (0.5 is unbiased)", ratio);
            let _ = writeln!(out, "# alignments with format {}: {}", fmt1, num_fmt1);
            let _ = writeln!(out, "# alignments with format {}: {}", fmt2, num_fmt2);
        } else {
            let mut agree = 0u64;
            for (id, &c) in counts.iter().enumerate() {
                if id == fmt.format_id() as usize {
                    agree = c;
                } else {
                    num_disagree += c;
                }
            }
            num_agree = agree;
            let _ = writeln!(out, "# of consistent alignments: {}", num_agree);
            let _ = writeln!(out, "# of inconsistent alignments: {}", num_disagree);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "========");

        let total = num_agree + num_disagree;
        if total > 0 && num_disagree as f64 / total as f64 > 0.05 {
            warnings.push(format!(
                "Read library [{}]: more than 5% of the alignments disagreed with the declared library type",
                self.read_files_as_string()
            ));
        }

        let _ = writeln!(out, "---- counts for each format type ---");
        for (id, &c) in counts.iter().enumerate() {
            let _ = writeln!(out, "{} : {}", LibraryFormat::from_id(id as u8), c);
        }
        let _ = writeln!(out, "------------------------------------");
        let _ = writeln!(out);

        (out, warnings)
    }
}

fn new_counts() -> Vec<AtomicU64> {
    (0..=LibraryFormat::max_format_id())
        .map(|_| AtomicU64::new(0))
        .collect()
}

// Library-format descriptions for read libraries.
//
// A library format is the triple (read type, relative orientation,
// strandedness). The user declares the expected format on the command line
// with a compact string (e.g. "IU", "ISF", "U"); every mapped fragment gets
// an observed format derived from where and how its ends landed, and the EM
// step compares the two.

use crate::math::{LOG_0, LOG_1, LOG_ONEHALF};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadType {
    SingleEnd = 0,
    PairedEnd = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrientation {
    Same = 0,
    Away = 1,
    Toward = 2,
    None = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrandedness {
    SA = 0,
    AS = 1,
    S = 2,
    A = 3,
    U = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryFormat {
    pub read_type: ReadType,
    pub orientation: ReadOrientation,
    pub strandedness: ReadStrandedness,
}

impl LibraryFormat {
    pub fn new(
        read_type: ReadType,
        orientation: ReadOrientation,
        strandedness: ReadStrandedness,
    ) -> Self {
        LibraryFormat {
            read_type,
            orientation,
            strandedness,
        }
    }

    /// Single-byte bijection over (type, orientation, strandedness).
    /// id = ((strandedness * 4) + orientation) * 2 + type, so ids are dense
    /// in [0, 40).
    pub fn format_id(&self) -> u8 {
        ((self.strandedness as u8 * 4) + self.orientation as u8) * 2 + self.read_type as u8
    }

    pub fn max_format_id() -> u8 {
        LibraryFormat::new(ReadType::PairedEnd, ReadOrientation::None, ReadStrandedness::U)
            .format_id()
    }

    pub fn from_id(id: u8) -> Self {
        let read_type = if id & 1 == 0 {
            ReadType::SingleEnd
        } else {
            ReadType::PairedEnd
        };
        let rest = id >> 1;
        let orientation = match rest & 3 {
            0 => ReadOrientation::Same,
            1 => ReadOrientation::Away,
            2 => ReadOrientation::Toward,
            _ => ReadOrientation::None,
        };
        let strandedness = match rest >> 2 {
            0 => ReadStrandedness::SA,
            1 => ReadStrandedness::AS,
            2 => ReadStrandedness::S,
            3 => ReadStrandedness::A,
            _ => ReadStrandedness::U,
        };
        LibraryFormat {
            read_type,
            orientation,
            strandedness,
        }
    }

    /// Parse the compact library-type string.
    ///
    /// Single-end: `U`, `SF`, `SR`. Paired-end: an orientation letter
    /// (`I` = inward/toward, `O` = outward/away, `M` = matching/same)
    /// followed by `U`, `SF`, or `SR`.
    pub fn parse(s: &str) -> Result<Self, String> {
        if !s.is_ascii() {
            return Err(format!("unrecognized library format string: {}", s));
        }
        let upper = s.to_ascii_uppercase();
        let (read_type, orientation, strand_str) = match upper.chars().next() {
            Some('I') => (ReadType::PairedEnd, ReadOrientation::Toward, &upper[1..]),
            Some('O') => (ReadType::PairedEnd, ReadOrientation::Away, &upper[1..]),
            Some('M') => (ReadType::PairedEnd, ReadOrientation::Same, &upper[1..]),
            Some(_) => (ReadType::SingleEnd, ReadOrientation::None, &upper[..]),
            None => return Err("empty library format string".to_string()),
        };
        let strandedness = match (read_type, strand_str) {
            (_, "U") => ReadStrandedness::U,
            (ReadType::SingleEnd, "SF") => ReadStrandedness::S,
            (ReadType::SingleEnd, "SR") => ReadStrandedness::A,
            (ReadType::PairedEnd, "SF") => ReadStrandedness::SA,
            (ReadType::PairedEnd, "SR") => ReadStrandedness::AS,
            _ => {
                return Err(format!(
                    "unrecognized library format string: {} (expected e.g. U, SF, SR, IU, ISF, ISR, OU, MU)",
                    s
                ));
            }
        };
        Ok(LibraryFormat {
            read_type,
            orientation,
            strandedness,
        })
    }
}

impl fmt::Display for LibraryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = match self.read_type {
            ReadType::SingleEnd => "SE",
            ReadType::PairedEnd => "PE",
        };
        let o = match self.orientation {
            ReadOrientation::Same => "M",
            ReadOrientation::Away => "O",
            ReadOrientation::Toward => "I",
            ReadOrientation::None => "-",
        };
        let s = match self.strandedness {
            ReadStrandedness::SA => "SA",
            ReadStrandedness::AS => "AS",
            ReadStrandedness::S => "S",
            ReadStrandedness::A => "A",
            ReadStrandedness::U => "U",
        };
        write!(f, "{}:{}:{}", t, o, s)
    }
}

/// Observed format of a mapped single-end fragment.
pub fn hit_type_se(_start: i32, is_forward: bool) -> LibraryFormat {
    if is_forward {
        LibraryFormat::new(ReadType::SingleEnd, ReadOrientation::None, ReadStrandedness::S)
    } else {
        LibraryFormat::new(ReadType::SingleEnd, ReadOrientation::None, ReadStrandedness::A)
    }
}

/// Observed format of a mapped read pair, from the two ends' positions and
/// orientations on the transcript.
pub fn hit_type_pe(
    end1_start: i32,
    end1_fwd: bool,
    end2_start: i32,
    end2_fwd: bool,
) -> LibraryFormat {
    if end1_fwd != end2_fwd {
        // Opposite strands: inward if the forward end comes first,
        // outward otherwise.
        if end1_fwd {
            let orientation = if end1_start <= end2_start {
                ReadOrientation::Toward
            } else {
                ReadOrientation::Away
            };
            LibraryFormat::new(ReadType::PairedEnd, orientation, ReadStrandedness::SA)
        } else {
            let orientation = if end2_start <= end1_start {
                ReadOrientation::Toward
            } else {
                ReadOrientation::Away
            };
            LibraryFormat::new(ReadType::PairedEnd, orientation, ReadStrandedness::AS)
        }
    } else if end1_fwd {
        LibraryFormat::new(ReadType::PairedEnd, ReadOrientation::Same, ReadStrandedness::S)
    } else {
        LibraryFormat::new(ReadType::PairedEnd, ReadOrientation::Same, ReadStrandedness::A)
    }
}

/// Log-probability that an observed mapping is compatible with the expected
/// library format. Type and orientation must match exactly; an unstranded
/// expectation credits either strand with ln(1/2).
pub fn log_align_format_prob(observed: LibraryFormat, expected: LibraryFormat) -> f64 {
    if observed.read_type != expected.read_type || observed.orientation != expected.orientation {
        LOG_0
    } else if expected.strandedness == ReadStrandedness::U {
        LOG_ONEHALF
    } else if expected.strandedness == observed.strandedness {
        LOG_1
    } else {
        LOG_0
    }
}

// Alignment records produced by the mapping stage and consumed by the EM
// step, plus their binary form in the inter-round mapping cache.

use crate::library_format::LibraryFormat;
use crate::math::LOG_0;
use std::io::{self, Read, Write};

/// The resolved mapping of one fragment to one transcript.
#[derive(Debug, Clone, Copy)]
pub struct SmemAlignment {
    pub transcript_id: u32,
    pub format: LibraryFormat,
    /// Coverage fraction in [0, 1].
    pub score: f64,
    /// Inferred insert size; 0 when unknown (single-end).
    pub frag_length: u32,
    /// Set during the E-step; not persisted.
    pub log_prob: f64,
}

impl SmemAlignment {
    pub fn new(transcript_id: u32, format: LibraryFormat, score: f64, frag_length: u32) -> Self {
        SmemAlignment {
            transcript_id,
            format,
            score,
            frag_length,
            log_prob: LOG_0,
        }
    }

    // Cache record layout: transcriptId u32, formatID u8, score f64,
    // fragLength u32, native byte order. Cache files never move between
    // hosts, so portability is not a concern.
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.transcript_id.to_ne_bytes())?;
        w.write_all(&[self.format.format_id()])?;
        w.write_all(&self.score.to_ne_bytes())?;
        w.write_all(&self.frag_length.to_ne_bytes())?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf_u32 = [0u8; 4];
        let mut buf_u8 = [0u8; 1];
        let mut buf_f64 = [0u8; 8];

        r.read_exact(&mut buf_u32)?;
        let transcript_id = u32::from_ne_bytes(buf_u32);
        r.read_exact(&mut buf_u8)?;
        let format = LibraryFormat::from_id(buf_u8[0]);
        r.read_exact(&mut buf_f64)?;
        let score = f64::from_ne_bytes(buf_f64);
        r.read_exact(&mut buf_u32)?;
        let frag_length = u32::from_ne_bytes(buf_u32);

        Ok(SmemAlignment::new(transcript_id, format, score, frag_length))
    }
}

/// All alignments reported for a single fragment (read or read pair).
/// An empty group means the fragment had no acceptable mapping. Groups are
/// pooled by the pipeline driver and reused across fragments, so the inner
/// vector keeps its capacity between loans.
#[derive(Debug, Default)]
pub struct AlignmentGroup {
    alignments: Vec<SmemAlignment>,
}

impl AlignmentGroup {
    pub fn new() -> Self {
        AlignmentGroup {
            alignments: Vec::with_capacity(10),
        }
    }

    pub fn alignments(&self) -> &[SmemAlignment] {
        &self.alignments
    }

    pub fn alignments_mut(&mut self) -> &mut Vec<SmemAlignment> {
        &mut self.alignments
    }

    pub fn push(&mut self, aln: SmemAlignment) {
        self.alignments.push(aln);
    }

    pub fn clear(&mut self) {
        self.alignments.clear();
    }

    pub fn len(&self) -> usize {
        self.alignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alignments.is_empty()
    }

    /// Serialize as a length-prefixed record list.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.alignments.len() as u32).to_ne_bytes())?;
        for aln in &self.alignments {
            aln.write_to(w)?;
        }
        Ok(())
    }

    /// Replace this group's contents with the next record from `r`.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> io::Result<()> {
        let mut buf_u32 = [0u8; 4];
        r.read_exact(&mut buf_u32)?;
        let n = u32::from_ne_bytes(buf_u32) as usize;
        self.alignments.clear();
        self.alignments.reserve(n);
        for _ in 0..n {
            self.alignments.push(SmemAlignment::read_from(r)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library_format::{hit_type_pe, hit_type_se};

    #[test]
    fn group_roundtrips_through_cache_format() {
        let mut group = AlignmentGroup::new();
        group.push(SmemAlignment::new(3, hit_type_se(0, true), 0.95, 0));
        group.push(SmemAlignment::new(
            17,
            hit_type_pe(10, true, 210, false),
            0.85,
            240,
        ));

        let mut buf = Vec::new();
        group.write_to(&mut buf).unwrap();

        let mut restored = AlignmentGroup::new();
        restored.read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(restored.len(), group.len());
        for (a, b) in restored.alignments().iter().zip(group.alignments()) {
            assert_eq!(a.transcript_id, b.transcript_id);
            assert_eq!(a.format, b.format);
            assert_eq!(a.score, b.score);
            assert_eq!(a.frag_length, b.frag_length);
        }
    }

    #[test]
    fn empty_group_roundtrips() {
        let group = AlignmentGroup::new();
        let mut buf = Vec::new();
        group.write_to(&mut buf).unwrap();

        let mut restored = AlignmentGroup::new();
        // Pre-populate to make sure read_from replaces the contents.
        restored.push(SmemAlignment::new(0, hit_type_se(0, true), 1.0, 0));
        restored.read_from(&mut buf.as_slice()).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn multiple_groups_stream_back_in_order() {
        let mut buf = Vec::new();
        for tid in 0..5u32 {
            let mut g = AlignmentGroup::new();
            g.push(SmemAlignment::new(tid, hit_type_se(0, true), 1.0, 0));
            g.write_to(&mut buf).unwrap();
        }

        let mut cursor = buf.as_slice();
        let mut g = AlignmentGroup::new();
        for tid in 0..5u32 {
            g.read_from(&mut cursor).unwrap();
            assert_eq!(g.alignments()[0].transcript_id, tid);
        }
    }
}

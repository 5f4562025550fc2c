// FASTQ input using bio::io::fastq, with gzip auto-detection by extension.
//
// The parser threads read fixed-size batches of records and hand them to
// the mapping workers over a bounded channel; batching keeps the channel
// traffic coarse.

use bio::io::fastq;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// One parsed read.
#[derive(Debug, Clone)]
pub struct ReadRecord {
    pub name: String,
    pub seq: Vec<u8>,
    pub qual: String,
}

/// FASTQ reader over a possibly-gzipped file.
pub struct FastqReader {
    records: fastq::Records<BufReader<Box<dyn Read + Send>>>,
}

impl FastqReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn Read + Send> =
            if path.extension().and_then(|e| e.to_str()) == Some("gz") {
                Box::new(GzDecoder::new(file))
            } else {
                Box::new(file)
            };
        Ok(FastqReader {
            records: fastq::Reader::new(reader).records(),
        })
    }

    /// Read up to `batch_size` records; an empty batch signals EOF.
    pub fn read_batch(&mut self, batch_size: usize) -> io::Result<Vec<ReadRecord>> {
        let mut batch = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            match self.records.next() {
                Some(Ok(record)) => batch.push(ReadRecord {
                    name: record.id().to_string(),
                    seq: record.seq().to_vec(),
                    qual: String::from_utf8_lossy(record.qual()).into_owned(),
                }),
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                None => break,
            }
        }
        Ok(batch)
    }
}

/// Lockstep reader over the two mate files of a paired library.
///
/// Mate names are deliberately not checked for consistency; there is no
/// robust way to validate the many naming schemes in the wild, so the files
/// are trusted to be parallel.
pub struct PairedFastqReader {
    mates1: FastqReader,
    mates2: FastqReader,
}

impl PairedFastqReader {
    pub fn open(path1: &Path, path2: &Path) -> io::Result<Self> {
        Ok(PairedFastqReader {
            mates1: FastqReader::open(path1)?,
            mates2: FastqReader::open(path2)?,
        })
    }

    /// Read up to `batch_size` read pairs; an empty batch signals EOF.
    /// If one file runs out before the other the trailing unpaired records
    /// are dropped with a warning.
    pub fn read_batch(&mut self, batch_size: usize) -> io::Result<Vec<(ReadRecord, ReadRecord)>> {
        let b1 = self.mates1.read_batch(batch_size)?;
        let b2 = self.mates2.read_batch(batch_size)?;
        if b1.len() != b2.len() {
            log::warn!(
                "mate files are not parallel: {} records vs {}; dropping the unpaired tail",
                b1.len(),
                b2.len()
            );
        }
        Ok(b1.into_iter().zip(b2).collect())
    }
}

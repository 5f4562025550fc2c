// Inter-round mapping cache: alignment groups serialized during the first
// pass and replayed by later EM rounds so fragments never need re-mapping.

use crate::alignment::AlignmentGroup;
use crossbeam_channel::{Receiver, Sender};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One cache file and the number of records it holds. The record count
/// lives here, not in the file, so the reader knows when to stop.
#[derive(Debug)]
pub struct CacheFile {
    pub path: PathBuf,
    pub num_written: u64,
}

/// Drain completed alignment groups from `groups`, append them to the cache
/// file, and hand each group back to the pool. Runs until every sender is
/// dropped; returns the number of records written.
pub fn write_alignment_cache(
    groups: &Receiver<AlignmentGroup>,
    pool: &Sender<AlignmentGroup>,
    path: &Path,
) -> io::Result<u64> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut num_written = 0u64;
    for group in groups.iter() {
        group.write_to(&mut out)?;
        num_written += 1;
        pool.send(group).expect("group pool receiver vanished");
    }
    // Later rounds read this file back; make sure it is all on disk.
    out.flush()?;
    Ok(num_written)
}

/// Re-hydrate `num_written` alignment groups from the cache file, loaning
/// group structures from the pool and feeding them to the EM workers.
pub fn read_alignment_cache(
    cache: &CacheFile,
    pool: &Receiver<AlignmentGroup>,
    out: &Sender<AlignmentGroup>,
) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(&cache.path)?);
    for _ in 0..cache.num_written {
        let mut group = pool.recv().expect("group pool sender vanished");
        group.read_from(&mut reader)?;
        out.send(group).expect("EM workers vanished");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::SmemAlignment;
    use crate::library_format::hit_type_se;
    use crossbeam_channel::bounded;
    use std::thread;

    #[test]
    fn cache_roundtrip_through_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alnCache_0.bin");

        let num_groups = 100usize;
        let pool_cap = 16;

        // Write side: a producer fills the queue, the writer drains it.
        let (pool_tx, pool_rx) = bounded(pool_cap);
        let (out_tx, out_rx) = bounded(pool_cap);
        for _ in 0..pool_cap {
            pool_tx.send(AlignmentGroup::new()).unwrap();
        }

        let writer = {
            let path = path.clone();
            thread::spawn(move || write_alignment_cache(&out_rx, &pool_tx, &path).unwrap())
        };

        for i in 0..num_groups {
            let mut g = pool_rx.recv().unwrap();
            g.clear();
            // Group i carries i % 3 alignments.
            for k in 0..(i % 3) {
                g.push(SmemAlignment::new(
                    (i * 10 + k) as u32,
                    hit_type_se(0, true),
                    0.9,
                    i as u32,
                ));
            }
            out_tx.send(g).unwrap();
        }
        drop(out_tx);
        let num_written = writer.join().unwrap();
        assert_eq!(num_written, num_groups as u64);

        // Read side: replay the file and check field-for-field equality.
        let cache = CacheFile { path, num_written };
        let (pool_tx, pool_rx) = bounded(pool_cap);
        let (out_tx, out_rx) = bounded(pool_cap);
        for _ in 0..pool_cap {
            pool_tx.send(AlignmentGroup::new()).unwrap();
        }

        let reader = thread::spawn(move || read_alignment_cache(&cache, &pool_rx, &out_tx).unwrap());

        for i in 0..num_groups {
            let g = out_rx.recv().unwrap();
            assert_eq!(g.len(), i % 3);
            for (k, aln) in g.alignments().iter().enumerate() {
                assert_eq!(aln.transcript_id, (i * 10 + k) as u32);
                assert_eq!(aln.frag_length, i as u32);
                assert_eq!(aln.score, 0.9);
            }
            pool_tx.send(g).unwrap();
        }
        reader.join().unwrap();
    }
}

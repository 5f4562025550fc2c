// The on-disk index layout is produced by an external builder; these tests
// write the same layout from an in-memory index and check that the loader
// reconstructs an equivalent, working index.

use memquant::alignment::AlignmentGroup;
use memquant::hits::TranscriptHitList;
use memquant::index::{encode_sequence, TxpIndex};
use memquant::mapping::{map_single_fragment, MappingScratch};
use memquant::opts::QuantOpts;
use memquant::transcript::Transcript;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const T0: &[u8] = b"ACGTAGGCTTACCGTTAGACCATGGACCTTAACCGGTCAGTTACGGATCCGATTACGGACATTACGGATA";
const T1: &[u8] = b"TTGACCATTGACCGGTTAACCGGATACCAGATTACCAGGATACCATTGGACCAGATTTACCAGGACCATT";

/// Write `idx` in the external builder's directory layout.
fn dump_index(idx: &TxpIndex, dir: &Path) {
    let prefix = dir.join("bwaidx");

    let mut ann = File::create(format!("{}.ann", prefix.display())).unwrap();
    writeln!(ann, "{} {} 0", idx.l_pac, idx.anns.len()).unwrap();
    for a in &idx.anns {
        writeln!(ann, "0 {}", a.name).unwrap();
        writeln!(ann, "{} {} {}", a.offset, a.len, a.n_ambs).unwrap();
    }

    let mut amb = File::create(format!("{}.amb", prefix.display())).unwrap();
    writeln!(amb, "{} {} {}", idx.l_pac, idx.anns.len(), idx.ambs.len()).unwrap();
    for h in &idx.ambs {
        writeln!(amb, "{} {} {}", h.offset, h.len, h.amb).unwrap();
    }

    std::fs::write(format!("{}.pac", prefix.display()), &idx.pac).unwrap();

    let mut bwt = File::create(format!("{}.bwt.2bit.64", prefix.display())).unwrap();
    bwt.write_all(&(idx.bwt.seq_len as i64).to_le_bytes()).unwrap();
    // The file stores counts without the sentinel; the loader adds it back.
    for &c in &idx.bwt.counts {
        bwt.write_all(&(c as i64 - 1).to_le_bytes()).unwrap();
    }
    for entry in &idx.bwt.cp_occ {
        for &c in &entry.counts {
            bwt.write_all(&c.to_le_bytes()).unwrap();
        }
        for &p in &entry.one_hot {
            bwt.write_all(&p.to_le_bytes()).unwrap();
        }
    }
    for &b in &idx.bwt.sa_ms_byte {
        bwt.write_all(&b.to_le_bytes()).unwrap();
    }
    for &w in &idx.bwt.sa_ls_word {
        bwt.write_all(&w.to_le_bytes()).unwrap();
    }
    bwt.write_all(&idx.bwt.sentinel_index.to_le_bytes()).unwrap();
}

#[test]
fn loader_reconstructs_the_index() {
    let built = TxpIndex::from_transcripts(&[("t0", T0), ("t1", T1)]);
    let dir = tempfile::tempdir().unwrap();
    dump_index(&built, dir.path());

    let loaded = TxpIndex::load(dir.path()).unwrap();

    assert_eq!(loaded.l_pac, built.l_pac);
    assert_eq!(loaded.num_seqs(), built.num_seqs());
    for (a, b) in loaded.anns.iter().zip(&built.anns) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.len, b.len);
    }
    assert_eq!(loaded.pac, built.pac);
    assert_eq!(loaded.bwt.seq_len, built.bwt.seq_len);
    assert_eq!(loaded.bwt.counts, built.bwt.counts);
    assert_eq!(loaded.bwt.sentinel_index, built.bwt.sentinel_index);
    assert_eq!(loaded.bwt.sa_ms_byte, built.bwt.sa_ms_byte);
    assert_eq!(loaded.bwt.sa_ls_word, built.bwt.sa_ls_word);
    assert_eq!(loaded.bwt.cp_occ.len(), built.bwt.cp_occ.len());
    for (a, b) in loaded.bwt.cp_occ.iter().zip(&built.bwt.cp_occ) {
        assert_eq!(a.counts, b.counts);
        assert_eq!(a.one_hot, b.one_hot);
    }
    assert_eq!(loaded.decode_transcript(1), encode_sequence(T1));
}

#[test]
fn loaded_index_maps_reads() {
    let built = TxpIndex::from_transcripts(&[("t0", T0), ("t1", T1)]);
    let dir = tempfile::tempdir().unwrap();
    dump_index(&built, dir.path());
    let loaded = TxpIndex::load(dir.path()).unwrap();

    let transcripts: Vec<Transcript> = (0..loaded.num_seqs())
        .map(|rid| {
            let ann = &loaded.anns[rid];
            let mut t = Transcript::new(rid as u32, &ann.name, ann.len as u32, 0.005);
            t.set_sequence(&loaded.decode_transcript(rid));
            t
        })
        .collect();

    let read = encode_sequence(&T1[15..55]);
    let mut scratch = MappingScratch::default();
    let mut group = AlignmentGroup::new();
    map_single_fragment::<TranscriptHitList>(
        &loaded,
        &transcripts,
        &QuantOpts::default(),
        &read,
        &mut scratch,
        &mut group,
    );

    assert_eq!(group.len(), 1);
    assert_eq!(group.alignments()[0].transcript_id, 1);
    assert!((group.alignments()[0].score - 1.0).abs() < 1e-9);
}

#[test]
fn missing_index_files_are_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(TxpIndex::load(dir.path()).is_err());
}

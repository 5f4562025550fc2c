// Final abundance output: quant.sf with provenance comments.

use crate::experiment::ReadExperiment;
use crate::math::log_sum_exp;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write per-transcript abundances as a tab-separated table with
/// `Name  Length  TPM  NumReads` columns, preceded by `#` comment lines
/// recording how the run was invoked.
pub fn write_abundances(
    experiment: &ReadExperiment,
    path: &Path,
    comments: &str,
) -> io::Result<()> {
    let transcripts = experiment.transcripts();
    let total_assigned = experiment.total_assigned_fragments() as f64;

    let log_total_mass = log_sum_exp(transcripts.iter().map(|t| t.mass()));

    // Nucleotide fraction per transcript, then length-normalized rates for
    // the TPM scaling.
    let fracs: Vec<f64> = transcripts
        .iter()
        .map(|t| (t.mass() - log_total_mass).exp())
        .collect();
    let rate_total: f64 = transcripts
        .iter()
        .zip(&fracs)
        .map(|(t, f)| f / t.length.max(1) as f64)
        .sum();

    let mut out = BufWriter::new(std::fs::File::create(path)?);
    out.write_all(comments.as_bytes())?;
    writeln!(out, "# Name\tLength\tTPM\tNumReads")?;
    for (t, frac) in transcripts.iter().zip(&fracs) {
        let rate = frac / t.length.max(1) as f64;
        let tpm = if rate_total > 0.0 {
            1e6 * rate / rate_total
        } else {
            0.0
        };
        let num_reads = frac * total_assigned;
        writeln!(out, "{}\t{}\t{}\t{}", t.name, t.length, tpm, num_reads)?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::TxpIndex;
    use crate::library_format::LibraryFormat;
    use crate::read_library::ReadLibrary;
    use std::sync::atomic::Ordering;

    #[test]
    fn abundance_table_shape_and_normalization() {
        let idx = TxpIndex::from_transcripts(&[
            ("t0", b"ACGTAGGCTTACCGTTAGACCATGGACCTT"),
            ("t1", b"TTGACCATTGACCGGTTAACCGGATACCAGTTGACCATTGACCGGTTAACCGGATACCAG"),
        ]);
        let lib = ReadLibrary::unmated(
            LibraryFormat::parse("U").unwrap(),
            vec!["reads.fq".into()],
        );
        let exp = ReadExperiment::from_index(vec![lib], idx);

        // Give t0 three fragments' worth of mass and t1 one.
        exp.transcripts()[0].add_mass((3.0f64).ln());
        exp.transcripts()[1].add_mass((1.0f64).ln());
        exp.num_assigned_fragments().store(4, Ordering::SeqCst);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quant.sf");
        write_abundances(&exp, &path, "# test run\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "# test run");
        assert!(lines.next().unwrap().starts_with("# Name"));

        let rows: Vec<Vec<String>> = lines
            .map(|l| l.split('\t').map(|s| s.to_string()).collect())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "t0");
        assert_eq!(rows[0][1], "30");

        // TPMs sum to one million.
        let tpm_total: f64 = rows.iter().map(|r| r[2].parse::<f64>().unwrap()).sum();
        assert!((tpm_total - 1e6).abs() < 1e-3);

        // NumReads track the mass split.
        let reads: Vec<f64> = rows.iter().map(|r| r[3].parse::<f64>().unwrap()).collect();
        assert!(reads[0] > reads[1]);
        assert!((reads[0] + reads[1] - 4.0).abs() < 0.1);

        // t0 is shorter, so per-nucleotide it is even more enriched.
        let tpms: Vec<f64> = rows.iter().map(|r| r[2].parse::<f64>().unwrap()).collect();
        assert!(tpms[0] > 5.0 * tpms[1]);
    }
}

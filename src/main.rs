use clap::Parser;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use memquant::experiment::ReadExperiment;
use memquant::library_format::{LibraryFormat, ReadType};
use memquant::opts::QuantOpts;
use memquant::output::write_abundances;
use memquant::quant::quantify_library;
use memquant::read_library::ReadLibrary;

#[derive(Parser)]
#[command(name = "memquant")]
#[command(
    about = "Streaming SMEM-based estimation of transcript abundance from RNA-seq reads",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Transcriptome index directory
    #[arg(short = 'i', long, value_name = "DIR")]
    index: PathBuf,

    /// Library format string (e.g. U, SF, SR, IU, ISF, ISR, OU, MU)
    #[arg(short = 'l', long, value_name = "STR")]
    libtype: String,

    /// Files containing unmated reads
    #[arg(
        short = 'r',
        long = "unmated-reads",
        value_name = "FILE",
        num_args = 1..,
        conflicts_with_all = ["mates1", "mates2"]
    )]
    unmated_reads: Vec<PathBuf>,

    /// Files containing the #1 mates
    #[arg(short = '1', long, value_name = "FILE", num_args = 1.., requires = "mates2")]
    mates1: Vec<PathBuf>,

    /// Files containing the #2 mates
    #[arg(short = '2', long, value_name = "FILE", num_args = 1.., requires = "mates1")]
    mates2: Vec<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long, value_name = "DIR")]
    output: PathBuf,

    // ===== Seeding and mapping options =====
    /// (S)MEMs smaller than this size won't be considered
    #[arg(short = 'k', long, value_name = "INT", default_value = "19")]
    min_seed_len: i32,

    /// (S)MEMs occurring more than this many times won't be considered
    #[arg(short = 'm', long, value_name = "INT", default_value = "200")]
    max_occ: i32,

    /// Reads mapping to more than this many places won't be considered
    #[arg(short = 'w', long, value_name = "INT", default_value = "100")]
    max_read_occ: u32,

    /// If a (S)MEM occurs fewer than this many times, search for smaller,
    /// contained MEMs (0 disables re-seeding)
    #[arg(short = 's', long, value_name = "INT", default_value = "0")]
    split_width: i32,

    /// Look for internal seeds inside a SMEM longer than min_seed_len * FLOAT
    #[arg(long, value_name = "FLOAT", default_value = "1.5")]
    split_factor: f32,

    /// Attempt to split seeds that fall on the boundary between two transcripts
    #[arg(short = 'b', long)]
    split_spanning_seeds: bool,

    /// Enable an extra pass of seed search; improves sensitivity at ~40% cost
    #[arg(long)]
    extra_sensitive: bool,

    /// Required coverage of a read by the union of SMEMs to consider it a hit
    #[arg(short = 'c', long, value_name = "FLOAT", default_value = "0.75")]
    coverage: f64,

    /// Validate candidate placements by sampling read bases against the
    /// transcript instead of greedy coverage chaining
    #[arg(long)]
    sampled_validation: bool,

    // ===== Inference options =====
    /// Weight mappings by their orientation's agreement with the library format
    #[arg(short = 'e', long)]
    use_read_compat: bool,

    /// Weight paired-end mappings by the learned fragment-length distribution
    #[arg(short = 'd', long)]
    use_frag_len_dist: bool,

    /// Minimum number of observed fragments before inference terminates;
    /// smaller inputs are read through multiple times
    #[arg(short = 'n', long, value_name = "INT", default_value = "50000000")]
    num_required_obs: u64,

    /// Disable the inter-round mapping cache
    #[arg(long)]
    disable_mapping_cache: bool,

    // ===== Processing options =====
    /// Number of threads (default: all available cores)
    #[arg(short = 'p', long, value_name = "INT")]
    threads: Option<usize>,

    /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
    #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
    verbosity: i32,
}

/// Forward every log record to stderr and to the run log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

fn main() {
    let cli = Cli::parse();

    // The output and log directories must exist before the logger can tee
    // into them; failures here go straight to stderr.
    let log_dir = cli.output.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "could not create output directory {}: {}",
            cli.output.display(),
            e
        );
        std::process::exit(1);
    }

    let log_path = log_dir.join("quant.log");
    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("could not create log file {}: {}", log_path.display(), e);
            std::process::exit(1);
        }
    };

    let log_level = match cli.verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .target(env_logger::Target::Pipe(Box::new(TeeWriter {
            file: log_file,
        })))
        .init();

    // Provenance comments for the head of quant.sf.
    const PKG_NAME: &str = env!("CARGO_PKG_NAME");
    const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
    let mut comments = String::new();
    let _ = writeln!(comments, "# {} (smem-based) v{}", PKG_NAME, PKG_VERSION);
    let _ = writeln!(comments, "# [ program ] => {}", PKG_NAME);
    let _ = writeln!(comments, "# [ command ] => quant");
    let _ = writeln!(
        comments,
        "# [ command line ] => {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    let format = match LibraryFormat::parse(&cli.libtype) {
        Ok(f) => f,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let library = match format.read_type {
        ReadType::SingleEnd => {
            if cli.unmated_reads.is_empty() {
                log::error!(
                    "library format {} is single-end but no unmated reads were given",
                    cli.libtype
                );
                std::process::exit(1);
            }
            ReadLibrary::unmated(format, cli.unmated_reads.clone())
        }
        ReadType::PairedEnd => {
            if cli.mates1.is_empty() || cli.mates2.is_empty() {
                log::error!(
                    "library format {} is paired-end but mate files were not given",
                    cli.libtype
                );
                std::process::exit(1);
            }
            ReadLibrary::paired(format, cli.mates1.clone(), cli.mates2.clone())
        }
    };

    let num_threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    let opts = QuantOpts {
        min_seed_len: cli.min_seed_len,
        max_occ: cli.max_occ,
        max_read_occs: cli.max_read_occ,
        split_width: cli.split_width,
        split_factor: cli.split_factor,
        split_spanning_seeds: cli.split_spanning_seeds,
        extra_seed_pass: cli.extra_sensitive,
        coverage_thresh: cli.coverage,
        sampled_validation: cli.sampled_validation,
        use_read_compat: cli.use_read_compat,
        use_frag_len_dist: cli.use_frag_len_dist,
        num_required_fragments: cli.num_required_obs,
        disable_mapping_cache: cli.disable_mapping_cache,
        num_threads,
        ..QuantOpts::default()
    };

    log::info!("loading index from {}", cli.index.display());
    let mut experiment = match ReadExperiment::new(vec![library], &cli.index) {
        Ok(e) => e,
        Err(e) => {
            log::error!("failed to set up the experiment: {}", e);
            std::process::exit(1);
        }
    };

    let thread_word = if num_threads == 1 { "thread" } else { "threads" };
    log::info!("quantifying with {} {}", num_threads, thread_word);

    if let Err(e) = quantify_library(&mut experiment, &opts, &cli.output) {
        log::error!("quantification failed: {}", e);
        std::process::exit(1);
    }

    log::info!("writing output");
    let quant_path = cli.output.join("quant.sf");
    if let Err(e) = write_abundances(&experiment, &quant_path, &comments) {
        log::error!("failed to write {}: {}", quant_path.display(), e);
        std::process::exit(1);
    }

    let lib_counts_path = cli.output.join("libFormatCounts.txt");
    if let Err(e) = experiment.summarize_library_type_counts(&lib_counts_path) {
        log::error!("failed to write {}: {}", lib_counts_path.display(), e);
        std::process::exit(1);
    }
}

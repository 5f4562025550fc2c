pub mod alignment; // Alignment records and their mapping-cache serialization
pub mod cache; // Inter-round mapping cache reader/writer
pub mod cluster_forest;
pub mod em; // Online EM mini-batch updates
pub mod experiment;
pub mod fastq; // FASTQ input using bio::io::fastq (gzip auto-detected)
pub mod fld; // Fragment-length distribution
pub mod fm_index; // FM-index operations (interval extension, SA resolution)
pub mod hits; // Coverage chaining over seed votes
pub mod index; // Transcriptome index loading
pub mod library_format;
pub mod mapping; // Seed-occurrence projection and fragment resolution
pub mod math;
pub mod opts;
pub mod output;
pub mod quant; // Pipeline driver
pub mod read_library;
pub mod seeding; // SMEM generation
pub mod transcript;

use crate::normalize::NormMethod;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kinemod",
    about = "Extract kinetic k-mer features from HiFi BAMs and inject MM/ML modification tags",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Set logging level to WARN
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract per-site kinetic feature rows from a hifi BAM into a TSV
    Extract(ExtractArgs),
    /// Add MM/ML modification tags to a BAM from per-read calls
    Modbam(ModbamArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractMode {
    /// No reference position info (unaligned or aligned input)
    Denovo,
    /// Reference-aware: chrom/position columns and optional mapping features
    Align,
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractArgs {
    /// Input hifi BAM (unaligned, or aligned and sorted for align mode)
    pub in_bam: PathBuf,

    /// Output TSV path; defaults to <input-stem>.features.tsv[.gz]
    #[arg(short = 'o', long = "out", value_name = "TSV")]
    pub output: Option<PathBuf>,

    /// Compress the output with gzip
    #[arg(long)]
    pub gzip: bool,

    /// Extraction mode
    #[arg(long, value_enum, default_value_t = ExtractMode::Denovo)]
    pub mode: ExtractMode,

    /// K-mer window length (must be odd)
    #[arg(long, default_value_t = 21)]
    pub seq_len: usize,

    /// Comma-separated motifs, IUPAC letters allowed (e.g. CG or CG,CHH)
    #[arg(long, default_value = "CG")]
    pub motifs: String,

    /// 0-based offset of the modified base inside each motif
    #[arg(long, default_value_t = 0)]
    pub mod_loc: usize,

    /// Label column value for training data (0 or 1)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub methy_label: u8,

    /// Normalization method for ipd/pw/quality arrays
    #[arg(long, value_enum, default_value_t = NormMethod::Zscore)]
    pub norm: NormMethod,

    /// Use raw pulse codes instead of CodecV1-decoded frame counts
    #[arg(long)]
    pub no_decode: bool,

    /// Number of reads per work batch
    #[arg(long, default_value_t = 50)]
    pub holes_batch: usize,

    /// File of read names to extract (one per line)
    #[arg(long, value_name = "FILE")]
    pub holeids_e: Option<PathBuf>,

    /// File of read names to exclude (one per line)
    #[arg(long, value_name = "FILE")]
    pub holeids_ne: Option<PathBuf>,

    /// Genome reference FASTA (required in align mode)
    #[arg(long, value_name = "FASTA")]
    pub reference: Option<PathBuf>,

    /// Mapping quality cutoff (align mode)
    #[arg(long, default_value_t = 1)]
    pub mapq: u8,

    /// Percent-identity cutoff in [0.0, 1.0] (align mode)
    #[arg(long, default_value_t = 0.0)]
    pub identity: f64,

    /// Drop supplementary alignments (align mode)
    #[arg(long)]
    pub no_supplementary: bool,

    /// Emit per-position mismatch/indel map columns (align mode, needs --reference)
    #[arg(long)]
    pub mapfea: bool,

    /// Emit sites in soft-clipped regions instead of skipping them
    #[arg(long)]
    pub include_clipped: bool,

    /// Number of worker threads
    #[arg(short = 'p', long, default_value_t = 5)]
    pub threads: usize,

    /// Log each skipped/failed read
    #[arg(long)]
    pub loginfo: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ModbamArgs {
    /// Input BAM to re-tag
    pub in_bam: PathBuf,

    /// Per-read modification calls (TSV, optionally gzipped)
    #[arg(long = "calls", value_name = "TSV")]
    pub per_read_calls: PathBuf,

    /// Output BAM path; defaults to <input-stem>.modbam.bam
    #[arg(short = 'o', long = "out", value_name = "BAM")]
    pub output: Option<PathBuf>,

    /// Strip fi/fp/ri/rp kinetic tags from the output
    #[arg(long)]
    pub rm_pulse: bool,

    /// Canonical modified base as it appears in the forward read sequence
    #[arg(long, default_value_t = 'C')]
    pub mod_base: char,

    /// Modification code for the MM tag
    #[arg(long, default_value = "C+m")]
    pub mod_code: String,

    /// Number of reads per work batch
    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Number of worker threads
    #[arg(short = 'p', long, default_value_t = 3)]
    pub threads: usize,
}

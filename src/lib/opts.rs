#![forbid(unsafe_code)]

use std::path::PathBuf;

use ahash::AHashSet;
use clap::Parser;
use env_logger::Env;

use crate::{
    matcher::MatcherKind,
    pipeline::{ConfigError, MatchPolicy, PipelineConfig},
    utils::{built_info, input_stem},
};

pub static TOOL_NAME: &str = "barqs";

static SHORT_USAGE: &str =
    "Counts distinct UMIs per cell barcode and feature in barcoded sequencing reads.";

static LONG_USAGE: &str = "
Counts distinct UMIs per cell barcode and feature in barcoded sequencing reads.

Each read 1 record starts with a cell barcode of --barcode-length bases followed by a UMI of
--umi-length bases.  These are removed from the read and appended to its name as `barcode:umi`.
When read 2 FASTQs are given, the barcode and UMI from each read 1 record are appended to the
name of its read 2 mate instead, and features are searched for in read 2.

Features are read from a FASTA file and located either exactly in a fixed window of the read
(`--matcher window`, see --region-start and --region-end) or anywhere in the read allowing up to
--tolerance substitutions, insertions or deletions (`--matcher approximate`).  When two features
are equally good the one listed first in the FASTA wins.

Only the first read for each (barcode, UMI) pair is kept.  The number of distinct UMIs per
barcode and feature is written to `counts.tsv` in the output directory, with run level metrics
in `metrics.tsv`.

Multiple read 1 (and read 2) FASTQs are processed independently and their counts merged.
FASTQs may be gzip compressed.

Example invocation:

barqs \\
  --read1 sample_R1.fastq.gz \\
  --read2 sample_R2.fastq.gz \\
  --features features.fa \\
  --barcode-length 12 --umi-length 8 \\
  --output-dir counts/
";

#[derive(Parser, Debug, Clone)]
#[clap(name = TOOL_NAME, version = built_info::VERSION.as_str(), about=SHORT_USAGE, long_about=LONG_USAGE, term_width=0)]
pub struct Opts {
    /// Path to the read 1 FASTQs, carrying the cell barcode and UMI.
    #[clap(long, short = '1', display_order = 1, required = true, multiple_values = true)]
    pub read1: Vec<PathBuf>,

    /// Path to the read 2 FASTQs, one per read 1 FASTQ and in the same order.
    #[clap(long, short = '2', display_order = 2, multiple_values = true)]
    pub read2: Vec<PathBuf>,

    /// Path to the feature FASTA.
    #[clap(long, short = 'f', display_order = 3)]
    pub features: PathBuf,

    /// The directory to write outputs.
    ///
    /// This tool will overwrite existing files.
    #[clap(long, short, display_order = 4)]
    pub output_dir: PathBuf,

    /// The number of cell barcode bases at the start of read 1.
    #[clap(long, short = 'b', default_value = "16", display_order = 11)]
    pub barcode_length: usize,

    /// The number of UMI bases following the cell barcode.
    #[clap(long, short = 'u', default_value = "12", display_order = 11)]
    pub umi_length: usize,

    /// How features are located in the read.
    #[clap(long, short = 'm', default_value = "approximate", possible_values=MatcherKind::possible_values(), display_order = 21)]
    pub matcher: MatcherKind,

    /// The first base (0-based, inclusive) of the window compared to features by the `window`
    /// matcher, counted after the barcode and UMI are removed.
    #[clap(long, default_value = "0", display_order = 21)]
    pub region_start: usize,

    /// The end (0-based, exclusive) of the window compared to features by the `window` matcher.
    #[clap(long, default_value = "15", display_order = 21)]
    pub region_end: usize,

    /// The maximum number of edits allowed by the `approximate` matcher.
    #[clap(long, short = 't', default_value = "3", display_order = 21)]
    pub tolerance: u8,

    /// Also write the deduplicated, annotated reads of each input to `<input>.deduplicated.fa`.
    #[clap(long, display_order = 31)]
    pub write_deduplicated: bool,

    /// Number of inputs to process at one time.
    #[clap(long, default_value = "1", display_order = 31)]
    pub threads: usize,
}

impl Opts {
    /// Build the [`PipelineConfig`] from the CLI opts.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let policy = MatchPolicy::from_kind(
            self.matcher,
            self.region_start,
            self.region_end,
            self.tolerance,
        );
        PipelineConfig::new(self.barcode_length, self.umi_length, policy)
    }

    /// Check that inputs are given and read 2 inputs, if any, pair up with read 1 inputs.
    ///
    /// With `--write-deduplicated`, the counted inputs (read 2 if given, else read 1) must also
    /// have distinct names once extensions are stripped, since those name the output files.
    pub fn validate_inputs(&self) -> Result<(), ConfigError> {
        if self.read1.is_empty() {
            return Err(ConfigError::NoReads);
        }
        if !self.read2.is_empty() && self.read2.len() != self.read1.len() {
            return Err(ConfigError::UnpairedInputs {
                read1: self.read1.len(),
                read2: self.read2.len(),
            });
        }
        if self.write_deduplicated {
            let counted = if self.read2.is_empty() { &self.read1 } else { &self.read2 };
            let mut names = AHashSet::with_capacity(counted.len());
            for path in counted {
                let name = input_stem(path);
                if !names.insert(name.clone()) {
                    return Err(ConfigError::DuplicateInputName { name });
                }
            }
        }
        Ok(())
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
///
/// Note that these defaults exist only within test code.
#[cfg(test)]
impl Default for Opts {
    fn default() -> Self {
        Self {
            read1: vec![],
            read2: vec![],
            features: PathBuf::default(),
            output_dir: PathBuf::default(),
            barcode_length: 16,
            umi_length: 12,
            matcher: MatcherKind::Approximate,
            region_start: 0,
            region_end: 15,
            tolerance: 3,
            write_deduplicated: false,
            threads: 1,
        }
    }
}

/// Parse args and set up logging
pub fn setup() -> Opts {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    Opts::parse()
}

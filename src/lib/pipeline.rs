//! Drive one shard of reads through tagging, feature matching, deduplication and counting.
//!
//! A shard is one read 1 input, optionally paired with one read 2 input.  Each stage is a lazy
//! iterator pulled by the next, so only the deduplication set and the count table grow with the
//! input.
//!
//! ```text
//! read 1 ─┬─ extract ─ tag(trim) ───────────┐
//!         └─ extract ─┐                     ├─ match ─ dedup ─ [write] ─ quantify
//! read 2 ──────────── tag(no trim) ─────────┘
//! ```
#![forbid(unsafe_code)]

use std::io::Write;

use log::{debug, warn};
use thiserror::Error;

use crate::catalog::{CatalogError, FeatureCatalog};
use crate::dedup::FilterDuplicates;
use crate::fasta::FastaWriter;
use crate::fastq::FastqError;
use crate::identifier::{extract, tag, IdentifierError};
use crate::matcher::{ApproximateMatcher, Matcher, MatcherKind, WindowMatcher};
use crate::metrics::RunMetrics;
use crate::quantify::{quantify, CountMatrix};
use crate::record::SequenceRecord;
use crate::utils::s;

/// Invalid settings, rejected before any read is consumed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Barcode length must be greater than zero")]
    ZeroBarcodeLength,

    #[error("UMI length must be greater than zero")]
    ZeroUmiLength,

    #[error("Invalid matching region [{start}, {end}): start must be less than end")]
    InvalidRegion { start: usize, end: usize },

    #[error("No read 1 inputs were given")]
    NoReads,

    #[error("Got {read1} read 1 inputs but {read2} read 2 inputs")]
    UnpairedInputs { read1: usize, read2: usize },

    #[error("More than one input would write deduplicated reads named '{name}'")]
    DuplicateInputName { name: String },
}

/// Any failure while processing a shard.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fastq(#[from] FastqError),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Read 1 and read 2 have different numbers of records: {ended} ended after {reads} records")]
    ReadCountMismatch { ended: &'static str, reads: usize },

    #[error("Failed to write deduplicated records")]
    Io(#[from] std::io::Error),
}

/// How features are located in reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Exact lookup of `[start, end)`.
    Window { start: usize, end: usize },
    /// Best occurrence anywhere in the read within `tolerance` edits.
    Approximate { tolerance: u8 },
}

impl MatchPolicy {
    /// Pick the policy for `kind`, taking its settings from the given values.
    pub fn from_kind(kind: MatcherKind, start: usize, end: usize, tolerance: u8) -> Self {
        match kind {
            MatcherKind::Window => MatchPolicy::Window { start, end },
            MatcherKind::Approximate => MatchPolicy::Approximate { tolerance },
        }
    }
}

/// Validated settings for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub barcode_length: usize,
    pub umi_length: usize,
    pub policy: MatchPolicy,
}

impl PipelineConfig {
    /// # Errors
    ///
    /// - [`ConfigError::ZeroBarcodeLength`]
    /// - [`ConfigError::ZeroUmiLength`]
    /// - [`ConfigError::InvalidRegion`] if a window policy has `start >= end`
    pub fn new(
        barcode_length: usize,
        umi_length: usize,
        policy: MatchPolicy,
    ) -> Result<Self, ConfigError> {
        if barcode_length == 0 {
            return Err(ConfigError::ZeroBarcodeLength);
        }
        if umi_length == 0 {
            return Err(ConfigError::ZeroUmiLength);
        }
        if let MatchPolicy::Window { start, end } = policy {
            if start >= end {
                return Err(ConfigError::InvalidRegion { start, end });
            }
        }
        Ok(Self { barcode_length, umi_length, policy })
    }

    /// The shortest read a barcode and UMI can be extracted from.
    pub fn min_read_length(&self) -> usize {
        self.barcode_length + self.umi_length
    }
}

/// Tallies kept while tagging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TagCounts {
    pub reads: usize,
    pub too_short: usize,
}

/// Lazily extracts the barcode and UMI from each read 1 record and tags either that record
/// (trimming the barcode and UMI off) or its read 2 mate (leaving the bases alone).
///
/// Reads shorter than the barcode and UMI together are dropped and counted.  If only one of the
/// two inputs runs out, the stream ends with [`PipelineError::ReadCountMismatch`].
pub struct TaggedReads<R1, R2> {
    reads: R1,
    mates: Option<R2>,
    barcode_length: usize,
    umi_length: usize,
    counts: TagCounts,
    done: bool,
}

impl<R1, R2> TaggedReads<R1, R2>
where
    R1: Iterator<Item = Result<SequenceRecord, FastqError>>,
    R2: Iterator<Item = Result<SequenceRecord, FastqError>>,
{
    pub fn new(reads: R1, mates: Option<R2>, config: &PipelineConfig) -> Self {
        Self {
            reads,
            mates,
            barcode_length: config.barcode_length,
            umi_length: config.umi_length,
            counts: TagCounts::default(),
            done: false,
        }
    }

    pub fn counts(&self) -> TagCounts {
        self.counts
    }

    fn fail(&mut self, error: PipelineError) -> Option<Result<SequenceRecord, PipelineError>> {
        self.done = true;
        Some(Err(error))
    }
}

impl<R1, R2> Iterator for TaggedReads<R1, R2>
where
    R1: Iterator<Item = Result<SequenceRecord, FastqError>>,
    R2: Iterator<Item = Result<SequenceRecord, FastqError>>,
{
    type Item = Result<SequenceRecord, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let read = match self.reads.next() {
                Some(Ok(read)) => read,
                Some(Err(e)) => return self.fail(e.into()),
                None => {
                    self.done = true;
                    let reads = self.counts.reads;
                    return match self.mates.as_mut().and_then(Iterator::next) {
                        None => None,
                        Some(Err(e)) => Some(Err(e.into())),
                        Some(Ok(_)) => {
                            Some(Err(PipelineError::ReadCountMismatch { ended: "read 1", reads }))
                        }
                    };
                }
            };
            self.counts.reads += 1;

            let mate = match self.mates.as_mut().map(Iterator::next) {
                None => None,
                Some(Some(Ok(mate))) => Some(mate),
                Some(Some(Err(e))) => return self.fail(e.into()),
                Some(None) => {
                    let reads = self.counts.reads - 1;
                    return self.fail(PipelineError::ReadCountMismatch { ended: "read 2", reads });
                }
            };

            if read.len() < self.barcode_length + self.umi_length {
                self.counts.too_short += 1;
                debug!("Dropping read shorter than barcode and UMI: {}", s(read.head()));
                continue;
            }

            let ids = extract(&read, self.barcode_length, self.umi_length).into_owned();
            let tagged = match mate {
                Some(mate) => tag(mate, &ids.barcode, &ids.umi, false),
                None => tag(read, &ids.barcode, &ids.umi, true),
            };
            return Some(Ok(tagged));
        }
    }
}

/// The result of running one shard.
#[derive(Debug)]
pub struct ShardOutcome {
    pub matrix: CountMatrix,
    pub metrics: RunMetrics,
}

/// Runs shards against one catalog and configuration.
pub struct Pipeline<'a> {
    pub catalog: &'a FeatureCatalog,
    pub config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(catalog: &'a FeatureCatalog, config: PipelineConfig) -> Self {
        Self { catalog, config }
    }

    /// Run one shard with the configured matching policy.
    ///
    /// If `writer` is given, every deduplicated record is also written to it in 2-line format.
    ///
    /// # Errors
    ///
    /// The first error raised by any stage; see [`PipelineError`].
    pub fn run_shard<R1, R2, W>(
        &self,
        reads: R1,
        mates: Option<R2>,
        writer: Option<&mut FastaWriter<W>>,
    ) -> Result<ShardOutcome, PipelineError>
    where
        R1: Iterator<Item = Result<SequenceRecord, FastqError>>,
        R2: Iterator<Item = Result<SequenceRecord, FastqError>>,
        W: Write,
    {
        match self.config.policy {
            MatchPolicy::Window { start, end } => {
                let matcher = WindowMatcher::new(self.catalog, start, end);
                self.run_shard_with(matcher, reads, mates, writer)
            }
            MatchPolicy::Approximate { tolerance } => {
                let matcher = ApproximateMatcher::new(self.catalog, tolerance)?;
                self.run_shard_with(matcher, reads, mates, writer)
            }
        }
    }

    /// Run one shard with the given matcher.
    ///
    /// # Errors
    ///
    /// The first error raised by any stage; see [`PipelineError`].
    pub fn run_shard_with<M, R1, R2, W>(
        &self,
        mut matcher: M,
        reads: R1,
        mates: Option<R2>,
        mut writer: Option<&mut FastaWriter<W>>,
    ) -> Result<ShardOutcome, PipelineError>
    where
        M: Matcher,
        R1: Iterator<Item = Result<SequenceRecord, FastqError>>,
        R2: Iterator<Item = Result<SequenceRecord, FastqError>>,
        W: Write,
    {
        let mut tagged = TaggedReads::new(reads, mates, &self.config);
        let mut matched_reads = 0;

        let (matrix, duplicates) = {
            let matched = tagged.by_ref().map(|record| -> Result<_, PipelineError> {
                let (record, result) = matcher.apply(record?);
                if result.is_match() {
                    matched_reads += 1;
                }
                Ok(record)
            });
            let mut deduplicated = FilterDuplicates::new(matched);
            let written = deduplicated.by_ref().map(|record| -> Result<_, PipelineError> {
                let record = record?;
                if let Some(writer) = writer.as_mut() {
                    writer.write_sequence_record(&record)?;
                }
                Ok(record)
            });
            let matrix = quantify(written, self.catalog)?;
            (matrix, deduplicated.counts())
        };

        let tag_counts = tagged.counts();
        if tag_counts.too_short > 0 {
            warn!(
                "Dropped {} of {} reads shorter than {} bases",
                tag_counts.too_short,
                tag_counts.reads,
                self.config.min_read_length()
            );
        }

        let metrics = RunMetrics {
            total_reads: tag_counts.reads,
            too_short_reads: tag_counts.too_short,
            matched_reads,
            duplicate_reads: duplicates.duplicates,
            unique_molecules: duplicates.unique(),
            ..RunMetrics::default()
        };
        Ok(ShardOutcome { matrix, metrics })
    }
}

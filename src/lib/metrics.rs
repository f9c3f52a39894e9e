//! Metrics collected while processing reads and the tables written at the end of a run.
//!
//! Each shard of input produces its own [`RunMetrics`], which are summed with
//! [`RunMetrics::update_with`].  The molecule and barcode totals are filled in from the merged
//! [`CountMatrix`] once every shard has finished.
//!
//! All tables are tab separated with a header line.

use std::path::Path;

use anyhow::Result;
use fgoxide::io::DelimFile;
use serde::{Deserialize, Serialize};

use crate::catalog::FeatureCatalog;
use crate::quantify::CountMatrix;
use crate::utils::s;

/// The name of the file holding the barcode by feature counts.
pub const COUNTS_FILE_NAME: &str = "counts.tsv";
/// The name of the file holding the [`RunMetrics`].
pub const METRICS_FILE_NAME: &str = "metrics.tsv";

/// The high level metrics for all reads that were processed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// The number of reads (or read pairs) read from the inputs.
    pub total_reads: usize,
    /// The number of reads dropped for being shorter than the barcode and UMI together.
    pub too_short_reads: usize,
    /// The number of reads in which a feature was found.
    pub matched_reads: usize,
    /// The number of reads dropped for repeating an already seen (barcode, UMI) pair.
    pub duplicate_reads: usize,
    /// The number of distinct (barcode, UMI) pairs, summed over shards.
    pub unique_molecules: usize,
    /// The number of barcodes with at least one counted molecule.
    pub barcodes: usize,
    /// The sum of all distinct UMI counts in the final table.
    pub counted_molecules: usize,
}

impl RunMetrics {
    /// Add the per-shard counts of `other` to this one.  Matrix derived totals are left alone.
    pub fn update_with(&mut self, other: &Self) {
        self.total_reads += other.total_reads;
        self.too_short_reads += other.too_short_reads;
        self.matched_reads += other.matched_reads;
        self.duplicate_reads += other.duplicate_reads;
        self.unique_molecules += other.unique_molecules;
    }

    /// Fill in the totals that come from the merged count table.
    pub fn update_with_matrix(&mut self, matrix: &CountMatrix) {
        self.barcodes = matrix.num_barcodes();
        self.counted_molecules = matrix.total();
    }

    /// Write a `metrics.tsv` file holding this one row into `output_dir`.
    pub fn write_metrics_file<P: AsRef<Path>>(&self, output_dir: P, prefix: &str) -> Result<()> {
        let filename = [prefix.to_string(), METRICS_FILE_NAME.to_string()].concat();
        let output_path = output_dir.as_ref().join(filename);
        let delim = DelimFile::default();
        delim.write_tsv(&output_path, std::iter::once(*self))?;
        Ok(())
    }
}

/// One non-zero cell of the count table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCount {
    /// The cell barcode bases.
    pub barcode: String,
    /// The feature name.
    pub feature: String,
    /// The number of distinct UMIs seen for the barcode and feature.
    pub umi_count: usize,
}

/// Write the non-zero cells of `matrix` to a `counts.tsv` file in `output_dir`, sorted by barcode
/// and then by the order of features in the catalog.
pub fn write_counts_file<P: AsRef<Path>>(
    matrix: &CountMatrix,
    catalog: &FeatureCatalog,
    output_dir: P,
    prefix: &str,
) -> Result<()> {
    let filename = [prefix.to_string(), COUNTS_FILE_NAME.to_string()].concat();
    let output_path = output_dir.as_ref().join(filename);
    let delim = DelimFile::default();
    delim.write_tsv(
        &output_path,
        matrix.rows(catalog).into_iter().map(|(barcode, feature, umi_count)| FeatureCount {
            barcode: s(barcode),
            feature: feature.to_string(),
            umi_count,
        }),
    )?;
    Ok(())
}

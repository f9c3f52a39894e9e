//! A library of functionality for counting barcoded, UMI tagged feature reads.
//!
//! # Overview
//!
//! The flow of data is as follows:
//!
//! - The [`fastq::FastqReader`] lazily parses [`record::SequenceRecord`]s from each input.
//! - [`pipeline::TaggedReads`] extracts the cell barcode and UMI from each read and writes them
//!   into the read's identifier with [`identifier::tag`].
//! - A [`matcher::Matcher`] locates a feature from the [`catalog::FeatureCatalog`] in each read,
//!   cutting the read to the match and appending the feature's name to the identifier.
//! - [`dedup::FilterDuplicates`] keeps the first read for every (barcode, UMI) pair.
//! - [`quantify::quantify`] builds the [`quantify::CountMatrix`] of distinct UMIs per barcode and
//!   feature.
//! - [`run::run`] does the above for every input on a thread pool, merges the matrices and
//!   writes the [`metrics`].
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod catalog;
pub mod dedup;
pub mod fasta;
pub mod fastq;
pub mod identifier;
pub mod matcher;
pub mod metrics;
pub mod opts;
pub mod pipeline;
pub mod quantify;
pub mod record;
pub mod run;
pub mod utils;

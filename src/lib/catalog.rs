#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate)]
//! The catalog of features searched for in reads.
//!
//! A [`FeatureCatalog`] is an ordered list of named reference sequences.  The order is fixed when
//! the catalog is built and is the order in which matchers consider features, so it decides
//! which feature wins when two are equally good.  Names and sequences are each unique, so the
//! catalog can be looked up in both directions.

use std::io::Read;

use ahash::AHashMap;
use thiserror::Error;

use crate::fasta::{FastaError, FastaReader};
use crate::record::{is_iupac, ReferenceRecord};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Feature catalog contains no features")]
    Empty,

    #[error("Feature name '{name}' appears more than once")]
    DuplicateName { name: String },

    #[error("Features '{first}' and '{second}' have the same sequence: {seq}")]
    DuplicateSequence { first: String, second: String, seq: String },

    #[error("Feature '{name}' has an empty sequence")]
    EmptySequence { name: String },

    #[error("Feature '{name}' has a non-IUPAC sequence: {seq}")]
    InvalidSequence { name: String, seq: String },

    #[error("Feature name '{name}' is empty or contains whitespace")]
    InvalidName { name: String },

    #[error("Feature '{name}' is {len}bp long, approximate matching supports at most {max}bp")]
    PatternTooLong { name: String, len: usize, max: usize },

    #[error("Feature '{name}' is {len}bp long, which must exceed the edit tolerance of {tolerance}")]
    ToleranceTooHigh { name: String, len: usize, tolerance: u8 },

    #[error(transparent)]
    Fasta(#[from] FastaError),
}

/// An ordered, invertible mapping between feature names and feature sequences.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    features: Vec<ReferenceRecord>,
    by_sequence: AHashMap<Vec<u8>, usize>,
    by_name: AHashMap<String, usize>,
}

impl FeatureCatalog {
    /// Build a catalog from features given in their matching order.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Empty`]
    /// - [`CatalogError::InvalidName`]
    /// - [`CatalogError::DuplicateName`]
    /// - [`CatalogError::EmptySequence`]
    /// - [`CatalogError::InvalidSequence`]
    /// - [`CatalogError::DuplicateSequence`]
    pub fn new(features: Vec<ReferenceRecord>) -> Result<Self, CatalogError> {
        if features.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut by_sequence = AHashMap::with_capacity(features.len());
        let mut by_name = AHashMap::with_capacity(features.len());
        for (index, feature) in features.iter().enumerate() {
            // Names are matched as whole identifier tokens
            if feature.name.is_empty() || feature.name.contains(char::is_whitespace) {
                return Err(CatalogError::InvalidName { name: feature.name.clone() });
            }
            if by_name.insert(feature.name.clone(), index).is_some() {
                return Err(CatalogError::DuplicateName { name: feature.name.clone() });
            }
            if feature.seq.is_empty() {
                return Err(CatalogError::EmptySequence { name: feature.name.clone() });
            }
            if !is_iupac(&feature.seq) {
                return Err(CatalogError::InvalidSequence {
                    name: feature.name.clone(),
                    seq: String::from_utf8_lossy(&feature.seq).into_owned(),
                });
            }
            if let Some(first) = by_sequence.insert(feature.seq.clone(), index) {
                return Err(CatalogError::DuplicateSequence {
                    first: features[first].name.clone(),
                    second: feature.name.clone(),
                    seq: String::from_utf8_lossy(&feature.seq).into_owned(),
                });
            }
        }

        Ok(Self { features, by_sequence, by_name })
    }

    /// Build a catalog from `(name, sequence)` pairs.
    ///
    /// # Errors
    ///
    /// See [`FeatureCatalog::new`].
    pub fn from_pairs<I, N, S>(pairs: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<Vec<u8>>,
    {
        Self::new(pairs.into_iter().map(|(name, seq)| ReferenceRecord::new(name, seq)).collect())
    }

    /// Read a catalog from 2-line formatted records, keeping their order.  The first word of each
    /// header is the feature name; any description after it is ignored.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Fasta`] if the input is malformed
    /// - See [`FeatureCatalog::new`] for the validation errors.
    pub fn from_fasta<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let features = FastaReader::new(reader)
            .map(|record| {
                record.map(|mut record| {
                    if let Some(name) = record.name.split_whitespace().next() {
                        record.name = name.to_string();
                    }
                    record
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(features)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The feature at `index` in catalog order.
    pub fn get(&self, index: usize) -> Option<&ReferenceRecord> {
        self.features.get(index)
    }

    /// The name of the feature at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn name(&self, index: usize) -> &str {
        &self.features[index].name
    }

    /// Iterate features in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &ReferenceRecord> {
        self.features.iter()
    }

    /// The index of the feature with exactly this sequence.
    pub fn index_of_sequence(&self, seq: &[u8]) -> Option<usize> {
        self.by_sequence.get(seq).copied()
    }

    /// The index of the feature with this name.  Takes raw identifier bytes.
    pub fn index_of_name(&self, name: &[u8]) -> Option<usize> {
        std::str::from_utf8(name).ok().and_then(|name| self.by_name.get(name).copied())
    }
}

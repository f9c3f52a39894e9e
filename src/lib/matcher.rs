//! Locate features from a [`FeatureCatalog`] in read sequences.
//!
//! Two policies are provided:
//!
//! - [`WindowMatcher`] cuts the read down to a fixed `[start, end)` window and looks the window up
//!   in the catalog by exact sequence.
//! - [`ApproximateMatcher`] searches the whole read for every feature, allowing up to `tolerance`
//!   substitutions, insertions or deletions, and keeps the occurrence with the fewest edits.
//!
//! When two features are found with the same number of edits the feature that comes first in the
//! catalog wins.  Within one feature, the occurrence that ends leftmost in the read wins.

use anyhow::anyhow;
use bio::alignment::Alignment;
use bio::pattern_matching::myers::Myers;
use clap::{ArgEnum, PossibleValue};

use crate::catalog::{CatalogError, FeatureCatalog};
use crate::identifier::annotate;
use crate::record::SequenceRecord;

/// The longest feature the bit-parallel search can hold in one machine word.
pub const MAX_APPROXIMATE_FEATURE_LEN: usize = 64;

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum MatchResult {
    /// The feature at `feature_index` in the catalog was found at `[start, end)` of the read.
    Match { feature_index: usize, edits: usize, start: usize, end: usize },
    NoMatch,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }

    pub fn is_no_match(&self) -> bool {
        !self.is_match()
    }

    pub fn feature_index(&self) -> Option<usize> {
        match self {
            Self::Match { feature_index, .. } => Some(*feature_index),
            Self::NoMatch => None,
        }
    }
}

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Window,
    Approximate,
}

impl MatcherKind {
    pub fn possible_values<'a>() -> impl Iterator<Item = PossibleValue<'a>> {
        MatcherKind::value_variants().iter().filter_map(ArgEnum::to_possible_value)
    }
}

impl std::str::FromStr for MatcherKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for variant in Self::value_variants() {
            if variant.to_possible_value().map_or(false, |v| v.matches(s, false)) {
                return Ok(*variant);
            }
        }
        Err(anyhow!("Invalid variant: {}", s))
    }
}

/// The base trait for all matching policies.
///
/// Matchers take `&mut self` because the search state is reused from read to read.  Each
/// pipeline owns its own matcher.
pub trait Matcher {
    /// Find the best feature in `seq`.
    fn find(&mut self, seq: &[u8]) -> MatchResult;

    /// Apply the policy to a read, returning the (possibly trimmed) read and the match.
    ///
    /// Matched reads have the feature name appended to their identifier.
    fn apply(&mut self, record: SequenceRecord) -> (SequenceRecord, MatchResult);
}

/// Exact lookup of a fixed window of the read.
pub struct WindowMatcher<'a> {
    pub catalog: &'a FeatureCatalog,
    pub start: usize,
    pub end: usize,
}

impl<'a> WindowMatcher<'a> {
    pub fn new(catalog: &'a FeatureCatalog, start: usize, end: usize) -> Self {
        Self { catalog, start, end }
    }

    /// The window clamped to a read of `len` bases.
    fn span(&self, len: usize) -> (usize, usize) {
        let end = self.end.min(len);
        (self.start.min(end), end)
    }
}

impl<'a> Matcher for WindowMatcher<'a> {
    fn find(&mut self, seq: &[u8]) -> MatchResult {
        let (start, end) = self.span(seq.len());
        match self.catalog.index_of_sequence(&seq[start..end]) {
            Some(feature_index) => MatchResult::Match { feature_index, edits: 0, start, end },
            None => MatchResult::NoMatch,
        }
    }

    /// The read is trimmed to the window whether or not a feature is found.
    fn apply(&mut self, record: SequenceRecord) -> (SequenceRecord, MatchResult) {
        let result = self.find(record.seq());
        let (start, end) = self.span(record.len());
        let record = record.with_span(start, end);
        match result {
            MatchResult::Match { feature_index, .. } => {
                (annotate(record, self.catalog.name(feature_index)), result)
            }
            MatchResult::NoMatch => (record, result),
        }
    }
}

/// Edit distance bounded search of the whole read, using Myers' bit-parallel algorithm.
///
/// Ref: Myers, G. (1999). A fast bit-vector algorithm for approximate string matching based on
/// dynamic programming. Journal of the ACM (JACM) 46, 395–415.
pub struct ApproximateMatcher<'a> {
    pub catalog: &'a FeatureCatalog,
    pub tolerance: u8,
    patterns: Vec<Myers<u64>>,
}

impl<'a> ApproximateMatcher<'a> {
    /// # Errors
    ///
    /// - [`CatalogError::PatternTooLong`] if a feature is longer than
    ///   [`MAX_APPROXIMATE_FEATURE_LEN`]
    /// - [`CatalogError::ToleranceTooHigh`] if a feature is no longer than `tolerance`, since it
    ///   would then match anywhere in any read
    pub fn new(catalog: &'a FeatureCatalog, tolerance: u8) -> Result<Self, CatalogError> {
        let patterns = catalog
            .iter()
            .map(|feature| {
                if feature.seq.len() > MAX_APPROXIMATE_FEATURE_LEN {
                    Err(CatalogError::PatternTooLong {
                        name: feature.name.clone(),
                        len: feature.seq.len(),
                        max: MAX_APPROXIMATE_FEATURE_LEN,
                    })
                } else if feature.seq.len() <= tolerance as usize {
                    Err(CatalogError::ToleranceTooHigh {
                        name: feature.name.clone(),
                        len: feature.seq.len(),
                        tolerance,
                    })
                } else {
                    Ok(Myers::<u64>::new(feature.seq.as_slice()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { catalog, tolerance, patterns })
    }
}

impl<'a> Matcher for ApproximateMatcher<'a> {
    fn find(&mut self, seq: &[u8]) -> MatchResult {
        let mut best = MatchResult::NoMatch;
        let mut best_edits = usize::MAX;
        let mut aln = Alignment::default();
        for (feature_index, pattern) in self.patterns.iter_mut().enumerate() {
            let mut matches = pattern.find_all_lazy(seq, self.tolerance);
            // First minimum, so the leftmost end position on ties
            let hit = matches.by_ref().min_by_key(|&(_, dist)| dist);
            if let Some((end, dist)) = hit {
                let edits = dist as usize;
                // Strictly fewer edits, so earlier features win ties
                if edits < best_edits && matches.alignment_at(end, &mut aln) {
                    best_edits = edits;
                    best = MatchResult::Match {
                        feature_index,
                        edits,
                        start: aln.ystart,
                        end: aln.yend,
                    };
                    if edits == 0 {
                        break;
                    }
                }
            }
        }
        best
    }

    /// Matched reads are cut down to the matched span; other reads pass through unchanged.
    fn apply(&mut self, record: SequenceRecord) -> (SequenceRecord, MatchResult) {
        match self.find(record.seq()) {
            result @ MatchResult::Match { feature_index, start, end, .. } => {
                let record = record.with_span(start, end);
                (annotate(record, self.catalog.name(feature_index)), result)
            }
            MatchResult::NoMatch => (record, MatchResult::NoMatch),
        }
    }
}

//! Count distinct UMIs per barcode and feature.
//!
//! Counting is by molecule, not by read: a [`CountMatrix`] keeps the set of UMIs seen for each
//! (barcode, feature) pair and reports the size of that set.
#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate)]

use std::cmp::Ordering;

use ahash::{AHashMap, AHashSet};
use itertools::Itertools;

use crate::catalog::{CatalogError, FeatureCatalog};
use crate::identifier::{feature_tokens, BarcodeUmi, IdentifierError};
use crate::matcher::{ApproximateMatcher, Matcher};
use crate::record::SequenceRecord;
use crate::utils::s;

/// A sparse barcode by feature table of distinct UMI counts.
///
/// Barcodes and features that were never observed are implicitly zero.  Counts never decrease.
#[derive(Debug, Default, Clone)]
pub struct CountMatrix {
    umis: AHashMap<Vec<u8>, AHashMap<String, AHashSet<Vec<u8>>>>,
}

impl CountMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `umi` was seen for `barcode` and `feature`.  Returns true if the UMI is new for
    /// that pair.
    pub fn insert(&mut self, barcode: &[u8], feature: &str, umi: &[u8]) -> bool {
        self.umis
            .entry(barcode.to_vec())
            .or_insert_with(AHashMap::new)
            .entry(feature.to_string())
            .or_insert_with(AHashSet::new)
            .insert(umi.to_vec())
    }

    /// The number of distinct UMIs seen for `barcode` and `feature`.
    pub fn get(&self, barcode: &[u8], feature: &str) -> usize {
        self.umis
            .get(barcode)
            .and_then(|features| features.get(feature))
            .map_or(0, |umis| umis.len())
    }

    /// All non-zero counts as nested maps.
    pub fn counts(&self) -> AHashMap<Vec<u8>, AHashMap<String, usize>> {
        self.umis
            .iter()
            .map(|(barcode, features)| {
                let features = features
                    .iter()
                    .map(|(feature, umis)| (feature.clone(), umis.len()))
                    .collect();
                (barcode.clone(), features)
            })
            .collect()
    }

    /// The number of barcodes with at least one counted molecule.
    pub fn num_barcodes(&self) -> usize {
        self.umis.len()
    }

    /// The sum of all counts.
    pub fn total(&self) -> usize {
        self.umis.values().flat_map(|features| features.values()).map(|umis| umis.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.umis.is_empty()
    }

    /// Fold `other` into this matrix by taking the union of the UMI sets of each
    /// (barcode, feature) pair, so a UMI seen in both is counted once.
    pub fn merge(&mut self, other: CountMatrix) {
        for (barcode, features) in other.umis {
            let ours = self.umis.entry(barcode).or_insert_with(AHashMap::new);
            for (feature, umis) in features {
                ours.entry(feature).or_insert_with(AHashSet::new).extend(umis);
            }
        }
    }

    /// `(barcode, feature, count)` rows sorted by barcode and then by the feature's position in
    /// `catalog`.  Features not in the catalog sort last, by name.
    pub fn rows<'a>(&'a self, catalog: &FeatureCatalog) -> Vec<(&'a [u8], &'a str, usize)> {
        let order = |feature: &str| catalog.index_of_name(feature.as_bytes());
        self.umis
            .iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .flat_map(|(barcode, features)| {
                features
                    .iter()
                    .sorted_by(|(a, _), (b, _)| match (order(a.as_str()), order(b.as_str())) {
                        (Some(x), Some(y)) => x.cmp(&y),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => a.cmp(b),
                    })
                    .map(move |(feature, umis)| (barcode.as_slice(), feature.as_str(), umis.len()))
            })
            .collect()
    }
}

/// Find the single catalog feature named among the tokens of `head` after the raw id.
///
/// # Errors
///
/// - [`IdentifierError::AmbiguousFeature`] if tokens name more than one distinct feature
pub fn feature_in_identifier(
    head: &[u8],
    catalog: &FeatureCatalog,
) -> Result<Option<usize>, IdentifierError> {
    let mut found: Option<usize> = None;
    for index in feature_tokens(head).filter_map(|token| catalog.index_of_name(token)) {
        match found {
            Some(first) if first != index => {
                return Err(IdentifierError::AmbiguousFeature {
                    head: s(head),
                    first: catalog.name(first).to_string(),
                    second: catalog.name(index).to_string(),
                });
            }
            _ => found = Some(index),
        }
    }
    Ok(found)
}

/// Count distinct UMIs per barcode and feature over deduplicated, feature annotated records.
///
/// The barcode and UMI come from the `barcode:umi` annotation and the feature from a token that
/// exactly equals a catalog name.  Records naming no feature are skipped.
///
/// # Errors
///
/// - Any error yielded by `records`
/// - [`IdentifierError::MissingAnnotation`] or [`IdentifierError::AmbiguousAnnotation`]
/// - [`IdentifierError::AmbiguousFeature`]
pub fn quantify<I, E>(records: I, catalog: &FeatureCatalog) -> Result<CountMatrix, E>
where
    I: IntoIterator<Item = Result<SequenceRecord, E>>,
    E: From<IdentifierError>,
{
    let mut matrix = CountMatrix::new();
    for record in records {
        let record = record?;
        let ids = BarcodeUmi::parse(record.head())?;
        if let Some(index) = feature_in_identifier(record.head(), catalog)? {
            matrix.insert(&ids.barcode, catalog.name(index), &ids.umi);
        }
    }
    Ok(matrix)
}

/// Count distinct UMIs per barcode and feature by searching each record's sequence for a feature.
///
/// With `tolerance == 0` the whole sequence must equal a feature.  Otherwise the best feature is
/// found with the [`ApproximateMatcher`] policy.
///
/// # Errors
///
/// - Any error yielded by `records`
/// - [`IdentifierError::MissingAnnotation`] or [`IdentifierError::AmbiguousAnnotation`]
/// - [`CatalogError::PatternTooLong`] for approximate search with an over-long feature
/// - [`CatalogError::ToleranceTooHigh`] for approximate search with a feature no longer than
///   `tolerance`
pub fn quantify_by_sequence<I, E>(
    records: I,
    catalog: &FeatureCatalog,
    tolerance: u8,
) -> Result<CountMatrix, E>
where
    I: IntoIterator<Item = Result<SequenceRecord, E>>,
    E: From<IdentifierError> + From<CatalogError>,
{
    let mut matcher =
        if tolerance > 0 { Some(ApproximateMatcher::new(catalog, tolerance)?) } else { None };
    let mut matrix = CountMatrix::new();
    for record in records {
        let record = record?;
        let ids = BarcodeUmi::parse(record.head())?;
        let feature = match matcher.as_mut() {
            Some(matcher) => matcher.find(record.seq()).feature_index(),
            None => catalog.index_of_sequence(record.seq()),
        };
        if let Some(index) = feature {
            matrix.insert(&ids.barcode, catalog.name(index), &ids.umi);
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::{quantify, quantify_by_sequence, CountMatrix};
    use crate::catalog::FeatureCatalog;
    use crate::dedup::filter_duplicates;
    use crate::identifier::{extract, tag, trim, IdentifierError};
    use crate::record::SequenceRecord;
    use crate::utils::test_commons::{
        feature_catalog, fixture_reads, CONSTANT, DAVE, ELIA, MAGIC, WATER,
    };

    fn read(head: &str) -> Result<SequenceRecord, IdentifierError> {
        Ok(SequenceRecord::new(head, "ACGT", "IIII").unwrap())
    }

    /// Extract, tag and trim the fixture reads down to their feature region.
    fn tagged_fixture_reads() -> Vec<Result<SequenceRecord, anyhow::Error>> {
        fixture_reads()
            .into_iter()
            .map(|record| {
                let ids = extract(&record, 12, 8).into_owned();
                let record = tag(record, &ids.barcode, &ids.umi, true);
                Ok(trim(record, 15, 30))
            })
            .collect()
    }

    #[test]
    fn test_counts_distinct_umis_not_reads() {
        let catalog = feature_catalog();
        let records = vec![
            read("r1 AAAA:CCCC MAGIC"),
            read("r2 AAAA:CCCC MAGIC"),
            read("r3 AAAA:GGGG MAGIC"),
            read("r4 AAAA:GGGG WATER"),
            read("r5 TTTT:GGGG"),
        ];
        let matrix = quantify(records, &catalog).unwrap();
        assert_eq!(matrix.get(b"AAAA", "MAGIC"), 2);
        assert_eq!(matrix.get(b"AAAA", "WATER"), 1);
        assert_eq!(matrix.get(b"AAAA", "NIGHT"), 0);
        assert_eq!(matrix.get(b"TTTT", "MAGIC"), 0);
        assert_eq!(matrix.num_barcodes(), 1);
        assert_eq!(matrix.total(), 3);
    }

    #[test]
    fn test_feature_name_must_be_whole_token() {
        let catalog = FeatureCatalog::from_pairs([("MAG", "ACGT"), ("MAGIC", "TTTT")]).unwrap();
        let matrix = quantify(vec![read("r1 AAAA:CCCC MAGIC")], &catalog).unwrap();
        assert_eq!(matrix.get(b"AAAA", "MAGIC"), 1);
        assert_eq!(matrix.get(b"AAAA", "MAG"), 0);
    }

    #[test]
    fn test_raw_id_is_not_a_feature() {
        let catalog = feature_catalog();
        let matrix = quantify(vec![read("MAGIC AAAA:CCCC")], &catalog).unwrap();
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_same_feature_twice_is_not_ambiguous() {
        let catalog = feature_catalog();
        let matrix = quantify(vec![read("r1 AAAA:CCCC MAGIC MAGIC")], &catalog).unwrap();
        assert_eq!(matrix.get(b"AAAA", "MAGIC"), 1);
    }

    #[test]
    fn test_two_features_is_an_error() {
        let catalog = feature_catalog();
        let err = quantify(vec![read("r1 AAAA:CCCC MAGIC WATER")], &catalog).unwrap_err();
        assert_eq!(
            err,
            IdentifierError::AmbiguousFeature {
                head: "r1 AAAA:CCCC MAGIC WATER".to_string(),
                first: "MAGIC".to_string(),
                second: "WATER".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_annotation_is_an_error() {
        let catalog = feature_catalog();
        let err = quantify(vec![read("r1 MAGIC")], &catalog).unwrap_err();
        assert!(matches!(err, IdentifierError::MissingAnnotation { .. }));
    }

    #[test]
    fn test_end_to_end_window_scenario() {
        let catalog = FeatureCatalog::from_pairs([("MAGIC", MAGIC), ("WATER", WATER)]).unwrap();
        let seq = format!("GATGCGGTGGAA{}{}{}", "AAAAAAAA", CONSTANT, MAGIC);
        let record = SequenceRecord::new("READ0", seq.clone(), "I".repeat(seq.len())).unwrap();
        let ids = extract(&record, 12, 8).into_owned();
        let record = trim(tag(record, &ids.barcode, &ids.umi, true), 15, 30);
        let records: Vec<Result<SequenceRecord, anyhow::Error>> = vec![Ok(record)];

        let matrix = quantify_by_sequence(filter_duplicates(records), &catalog, 0).unwrap();
        let counts = matrix.counts();
        assert_eq!(counts.len(), 1);
        let features = counts.get(b"GATGCGGTGGAA".as_slice()).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features.get("MAGIC"), Some(&1));
    }

    #[rstest]
    #[case(3, 2)]
    #[case(2, 1)]
    #[case(0, 1)]
    fn test_umi_counts_by_tolerance(#[case] tolerance: u8, #[case] expected_magic: usize) {
        let catalog = feature_catalog();
        let matrix = quantify_by_sequence(tagged_fixture_reads(), &catalog, tolerance).unwrap();
        assert_eq!(matrix.get(DAVE.as_bytes(), "MAGIC"), expected_magic);
        assert_eq!(matrix.get(DAVE.as_bytes(), "WATER"), 1);
        assert_eq!(matrix.get(DAVE.as_bytes(), "NIGHT"), 0);
        assert_eq!(matrix.get(ELIA.as_bytes(), "MAGIC"), 0);
        assert_eq!(matrix.get(ELIA.as_bytes(), "WATER"), 2);
    }

    #[rstest]
    #[case(3, 2, 1)]
    #[case(2, 2, 1)]
    #[case(0, 1, 0)]
    fn test_deduplicated_counts_by_tolerance(
        #[case] tolerance: u8,
        #[case] elia_water: usize,
        #[case] elia_night: usize,
    ) {
        let catalog = feature_catalog();
        let deduplicated = filter_duplicates(tagged_fixture_reads());
        let matrix = quantify_by_sequence(deduplicated, &catalog, tolerance).unwrap();
        assert_eq!(matrix.get(ELIA.as_bytes(), "WATER"), elia_water);
        assert_eq!(matrix.get(ELIA.as_bytes(), "NIGHT"), elia_night);
    }

    #[test]
    fn test_merge_is_a_union_of_umis() {
        let mut left = CountMatrix::new();
        left.insert(b"AAAA", "MAGIC", b"CCCC");
        left.insert(b"AAAA", "MAGIC", b"GGGG");
        let mut right = CountMatrix::new();
        right.insert(b"AAAA", "MAGIC", b"CCCC");
        right.insert(b"AAAA", "WATER", b"CCCC");
        right.insert(b"TTTT", "MAGIC", b"CCCC");
        left.merge(right);
        assert_eq!(left.get(b"AAAA", "MAGIC"), 2);
        assert_eq!(left.get(b"AAAA", "WATER"), 1);
        assert_eq!(left.get(b"TTTT", "MAGIC"), 1);
        assert_eq!(left.total(), 4);
    }

    #[test]
    fn test_rows_are_sorted_by_barcode_then_catalog_order() {
        let catalog = feature_catalog();
        let mut matrix = CountMatrix::new();
        matrix.insert(b"TTTT", "MAGIC", b"A");
        matrix.insert(b"AAAA", "NIGHT", b"A");
        matrix.insert(b"AAAA", "MAGIC", b"A");
        matrix.insert(b"AAAA", "MAGIC", b"C");
        matrix.insert(b"AAAA", "WATER", b"A");
        let rows = matrix.rows(&catalog);
        let expected: Vec<(&[u8], &str, usize)> = vec![
            (&b"AAAA"[..], "MAGIC", 2),
            (&b"AAAA"[..], "WATER", 1),
            (&b"AAAA"[..], "NIGHT", 1),
            (&b"TTTT"[..], "MAGIC", 1),
        ];
        assert_eq!(rows, expected);
    }
}

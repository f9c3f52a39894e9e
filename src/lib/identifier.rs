#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate)]
//! Extract cell barcodes and UMIs from reads and carry them, and the matched feature, in the
//! read identifier.
//!
//! The [`BarcodeUmi`] internally holds its data as [`Cow`] types so that it can borrow straight
//! from a read's sequence or identifier.
//!
//! # Grammar
//!
//! After tagging and feature matching a read identifier is expected to conform to:
//!
//! ```text
//! <identifier> ::= <raw-id> | “<raw-id> <tokens>”
//! <raw-id>     ::= [^ \t]+
//! <tokens>     ::= <token> | “<token> <tokens>”
//! <token>      ::= <annotation> | <feature> | <other>
//! <annotation> ::= <bases>:<bases>
//! <bases>      ::= [ACGTURYSWKMBDHVN]+ (either case)
//! <feature>    ::= a name from the feature catalog
//! ```
//!
//! Exactly one `<annotation>` token must be present after the raw id.  The raw id itself is never
//! read as an annotation.
//!
//! # Usage
//!
//! ```rust
//! use barqs_lib::identifier::{extract, tag, BarcodeUmi};
//! use barqs_lib::record::SequenceRecord;
//! let read = SequenceRecord::new("read1", "AAAACCGGTTT", "IIIIIIIIIII").unwrap();
//! let ids = extract(&read, 4, 2).into_owned();
//! let tagged = tag(read, &ids.barcode, &ids.umi, true);
//! assert_eq!(tagged.head(), b"read1 AAAA:CC");
//! assert_eq!(tagged.seq(), b"GGTTT");
//! let parsed = BarcodeUmi::try_from(tagged.head()).unwrap();
//! assert_eq!(parsed.barcode.as_ref(), b"AAAA");
//! ```

use std::borrow::Cow;

use bstr::ByteSlice;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use thiserror::Error;

use crate::record::SequenceRecord;
use crate::utils::s;

lazy_static! {
    /// `<bases>:<bases>`, matched against a whole whitespace delimited token.
    static ref ANNOTATION_REGEX: Regex =
        Regex::new(r"^([ACGTURYSWKMBDHVNacgturyswkmbdhvn]+):([ACGTURYSWKMBDHVNacgturyswkmbdhvn]+)$")
            .unwrap();
}

/// Errors raised when an identifier does not carry the annotations a stage requires.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Identifier has no barcode:umi annotation: {head}")]
    MissingAnnotation { head: String },

    #[error("Identifier has more than one barcode:umi annotation: {head}")]
    AmbiguousAnnotation { head: String },

    #[error("Identifier matches more than one feature ({first}, {second}): {head}")]
    AmbiguousFeature { head: String, first: String, second: String },
}

/// A cell barcode and UMI pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarcodeUmi<'a> {
    /// The cell barcode bases.
    pub barcode: Cow<'a, [u8]>,
    /// The UMI bases.
    pub umi: Cow<'a, [u8]>,
}

impl<'a> BarcodeUmi<'a> {
    pub fn new(barcode: &'a [u8], umi: &'a [u8]) -> Self {
        Self { barcode: Cow::from(barcode), umi: Cow::from(umi) }
    }

    /// Parse the single `barcode:umi` annotation out of a read identifier.
    ///
    /// # Errors
    ///
    /// - [`IdentifierError::MissingAnnotation`] if no token after the raw id is an annotation
    /// - [`IdentifierError::AmbiguousAnnotation`] if more than one is
    pub fn parse(head: &'a [u8]) -> Result<Self, IdentifierError> {
        Self::try_from(head)
    }

    /// Detach from the borrowed identifier or sequence.
    pub fn into_owned(self) -> BarcodeUmi<'static> {
        BarcodeUmi {
            barcode: Cow::Owned(self.barcode.into_owned()),
            umi: Cow::Owned(self.umi.into_owned()),
        }
    }

    /// Copy the pair to `dest` as `barcode:umi`.
    pub fn copy_to_vec(&self, dest: &mut Vec<u8>) {
        dest.extend(self.barcode.as_ref());
        dest.push(b':');
        dest.extend(self.umi.as_ref());
    }
}

impl<'a> TryFrom<&'a [u8]> for BarcodeUmi<'a> {
    type Error = IdentifierError;

    fn try_from(head: &'a [u8]) -> Result<Self, Self::Error> {
        let mut found: Option<BarcodeUmi<'a>> = None;
        for token in feature_tokens(head) {
            if let Some(captures) = ANNOTATION_REGEX.captures(token) {
                if found.is_some() {
                    return Err(IdentifierError::AmbiguousAnnotation { head: s(head) });
                }
                // Both groups are required by the pattern
                if let (Some(barcode), Some(umi)) = (captures.get(1), captures.get(2)) {
                    found = Some(BarcodeUmi::new(barcode.as_bytes(), umi.as_bytes()));
                }
            }
        }
        found.ok_or_else(|| IdentifierError::MissingAnnotation { head: s(head) })
    }
}

/// The whitespace delimited tokens of an identifier that follow the raw read id.  Feature names
/// are looked up among these.
pub fn feature_tokens(head: &[u8]) -> impl Iterator<Item = &[u8]> {
    head.fields().skip(1)
}

/// Take the first `barcode_length` bases of the read as the barcode and the following
/// `umi_length` bases as the UMI.
///
/// Reads shorter than `barcode_length + umi_length` give a shortened (possibly empty) barcode
/// and/or UMI; callers are expected to check read lengths first.
pub fn extract(record: &SequenceRecord, barcode_length: usize, umi_length: usize) -> BarcodeUmi<'_> {
    let seq = record.seq();
    let barcode_end = barcode_length.min(seq.len());
    let umi_end = (barcode_length + umi_length).min(seq.len());
    BarcodeUmi::new(&seq[..barcode_end], &seq[barcode_end..umi_end])
}

/// Append ` barcode:umi` to the identifier of the read.
///
/// If `trim` is true the first `barcode.len() + umi.len()` bases and qualities are removed, which
/// is what is wanted when the barcode and UMI were read from this same read.  When they came from
/// the mate read, pass `trim = false` to leave the bases untouched.
pub fn tag(record: SequenceRecord, barcode: &[u8], umi: &[u8], trim: bool) -> SequenceRecord {
    let mut annotation = Vec::with_capacity(barcode.len() + umi.len() + 1);
    BarcodeUmi::new(barcode, umi).copy_to_vec(&mut annotation);
    let record = record.with_annotation(&annotation);
    if trim {
        let start = barcode.len() + umi.len();
        let end = record.len();
        record.with_span(start, end)
    } else {
        record
    }
}

/// Trim the read to the half-open range `[start, end)`, clamped to the read length.
pub fn trim(record: SequenceRecord, start: usize, end: usize) -> SequenceRecord {
    record.with_span(start, end)
}

/// Append a feature name to the identifier, in the same way as [`tag`] appends the annotation.
pub fn annotate(record: SequenceRecord, feature_name: &str) -> SequenceRecord {
    record.with_annotation(feature_name.as_bytes())
}

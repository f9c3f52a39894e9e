//! The record types shared by every stage of the pipeline.
//!
//! A [`SequenceRecord`] is a read (identifier, bases and quality scores) and a [`ReferenceRecord`]
//! is one named entry of a barcode or feature catalog.  All fields are held as raw bytes, the
//! same way they appear on disk.
#![forbid(unsafe_code)]

use bstr::ByteSlice;
use thiserror::Error;

use crate::utils::s;

/// The IUPAC nucleotide codes allowed in a [`SequenceRecord::seq`], in either case.
pub const IUPAC_BASES: &[u8] = b"ACGTURYSWKMBDHVNacgturyswkmbdhvn";

/// The range of quality characters accepted: Phred+33 scores 0 through 93, which is every
/// printable ASCII character except space.
const MIN_QUALITY_CHAR: u8 = b'!';
const MAX_QUALITY_CHAR: u8 = b'~';

/// Errors raised when the content of a record breaks one of its invariants.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("Lengths of sequence and quality scores differ ({seq_len} != {qual_len}): @{head}")]
    LengthMismatch { head: String, seq_len: usize, qual_len: usize },

    #[error("Sequence contains a non-IUPAC character '{base}' at offset {offset}: @{head}")]
    InvalidSequence { head: String, base: char, offset: usize },

    #[error("Quality scores contain a non-printable character (byte {byte}) at offset {offset}: @{head}")]
    InvalidQuality { head: String, byte: u8, offset: usize },
}

/// Returns true if every byte of `bases` is an IUPAC nucleotide code.
pub fn is_iupac(bases: &[u8]) -> bool {
    bases.iter().all(|b| IUPAC_BASES.contains(b))
}

/// A single sequencing read.
///
/// The sequence and quality scores always have the same length.  Identifiers accumulate space
/// separated annotations as the read moves through the pipeline (`rawID barcode:umi feature`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceRecord {
    head: Vec<u8>,
    seq: Vec<u8>,
    qual: Vec<u8>,
}

impl SequenceRecord {
    /// Create a new [`SequenceRecord`], validating the sequence alphabet, the quality alphabet and
    /// that both have the same length.
    ///
    /// # Errors
    ///
    /// - [`RecordError::LengthMismatch`]
    /// - [`RecordError::InvalidSequence`]
    /// - [`RecordError::InvalidQuality`]
    pub fn new(
        head: impl Into<Vec<u8>>,
        seq: impl Into<Vec<u8>>,
        qual: impl Into<Vec<u8>>,
    ) -> Result<Self, RecordError> {
        let record = Self::new_unchecked(head.into(), seq.into(), qual.into());
        record.validate()?;
        Ok(record)
    }

    /// Build a record from parts that are already known to be consistent.
    pub(crate) fn new_unchecked(head: Vec<u8>, seq: Vec<u8>, qual: Vec<u8>) -> Self {
        debug_assert_eq!(seq.len(), qual.len());
        Self { head, seq, qual }
    }

    /// Check the record invariants: the sequence and quality scores have the same length, every
    /// base is an IUPAC code and every quality score is a Phred+33 character from `!` to `~`.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.seq.len() != self.qual.len() {
            return Err(RecordError::LengthMismatch {
                head: s(&self.head),
                seq_len: self.seq.len(),
                qual_len: self.qual.len(),
            });
        }
        if let Some(offset) = self.seq.iter().position(|b| !IUPAC_BASES.contains(b)) {
            return Err(RecordError::InvalidSequence {
                head: s(&self.head),
                base: self.seq[offset] as char,
                offset,
            });
        }
        if let Some(offset) =
            self.qual.iter().position(|q| !(MIN_QUALITY_CHAR..=MAX_QUALITY_CHAR).contains(q))
        {
            return Err(RecordError::InvalidQuality {
                head: s(&self.head),
                byte: self.qual[offset],
                offset,
            });
        }
        Ok(())
    }

    /// The identifier, without the leading `@`.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// The bases.
    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    /// The quality scores.
    pub fn qual(&self) -> &[u8] {
        &self.qual
    }

    /// The first whitespace delimited token of the identifier.
    pub fn name(&self) -> &[u8] {
        let end = self.head.find_byteset(b" \t").unwrap_or(self.head.len());
        &self.head[..end]
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Returns a new record with `suffix` appended to the identifier, separated by a single space.
    pub fn with_annotation(self, suffix: &[u8]) -> Self {
        let mut head = self.head;
        head.reserve(suffix.len() + 1);
        head.push(b' ');
        head.extend_from_slice(suffix);
        Self { head, ..self }
    }

    /// Returns a new record whose sequence and quality scores are cut down to `[start, end)`.
    ///
    /// Coordinates past the end of the read are clamped to its length, so a range that lies
    /// entirely outside the read yields an empty record.
    pub fn with_span(self, start: usize, end: usize) -> Self {
        let end = end.min(self.seq.len());
        let start = start.min(end);
        let Self { head, mut seq, mut qual } = self;
        seq.truncate(end);
        qual.truncate(end);
        seq.drain(..start);
        qual.drain(..start);
        Self { head, seq, qual }
    }
}

/// A named entry in a barcode or feature catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceRecord {
    /// The name of the entry, unique within its catalog.
    pub name: String,
    /// The reference bases.
    pub seq: Vec<u8>,
}

impl ReferenceRecord {
    pub fn new(name: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), seq: seq.into() }
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::{is_iupac, RecordError, SequenceRecord};

    #[test]
    fn test_new_valid_record() {
        let record = SequenceRecord::new("read1 extra", "ACGTN", "IIII#").unwrap();
        assert_eq!(record.head(), b"read1 extra");
        assert_eq!(record.name(), b"read1");
        assert_eq!(record.len(), 5);
    }

    #[test]
    fn test_new_length_mismatch() {
        let err = SequenceRecord::new("read1", "ACGT", "III").unwrap_err();
        assert_eq!(
            err,
            RecordError::LengthMismatch { head: "read1".to_string(), seq_len: 4, qual_len: 3 }
        );
    }

    #[test]
    fn test_new_invalid_base() {
        let err = SequenceRecord::new("read1", "ACXT", "IIII").unwrap_err();
        assert!(matches!(err, RecordError::InvalidSequence { base: 'X', offset: 2, .. }));
    }

    #[test]
    fn test_new_invalid_quality() {
        let err = SequenceRecord::new("read1", "ACGT", "II I").unwrap_err();
        assert!(matches!(err, RecordError::InvalidQuality { byte: b' ', offset: 2, .. }));
    }

    #[rstest]
    #[case(b'!', true)]
    #[case(b'~', true)]
    #[case(b' ', false)]
    #[case(0x7f, false)]
    #[case(b'\t', false)]
    fn test_quality_range(#[case] score: u8, #[case] valid: bool) {
        let qual = vec![b'I', score, b'I'];
        let result = SequenceRecord::new("read1", "ACG", qual);
        assert_eq!(result.is_ok(), valid);
    }

    #[rstest]
    #[case(0, 4, "ACGT")]
    #[case(2, 6, "GTAC")]
    #[case(6, 20, "GT")]
    #[case(10, 20, "")]
    #[case(3, 3, "")]
    fn test_with_span(#[case] start: usize, #[case] end: usize, #[case] expected: &str) {
        let record = SequenceRecord::new("r", "ACGTACGT", "ABCDEFGH").unwrap();
        let trimmed = record.with_span(start, end);
        assert_eq!(trimmed.seq(), expected.as_bytes());
        assert_eq!(trimmed.qual().len(), expected.len());
    }

    #[test]
    fn test_with_annotation() {
        let record = SequenceRecord::new("r", "A", "I").unwrap().with_annotation(b"AAAA:CCCC");
        assert_eq!(record.head(), b"r AAAA:CCCC");
    }

    #[test]
    fn test_is_iupac() {
        assert!(is_iupac(b"ACGTRYKMSWBDHVNacgtn"));
        assert!(!is_iupac(b"ACGT-"));
        assert!(is_iupac(b""));
    }
}

//! Drop reads whose (barcode, UMI) pair has already been seen.
#![forbid(unsafe_code)]

use std::marker::PhantomData;

use ahash::AHashSet;

use crate::identifier::{BarcodeUmi, IdentifierError};
use crate::record::SequenceRecord;

/// Tallies kept while filtering duplicates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCounts {
    /// Records pulled from the input.
    pub records: usize,
    /// Records dropped because their pair was seen before.
    pub duplicates: usize,
}

impl DuplicateCounts {
    /// The number of distinct (barcode, UMI) pairs, i.e. the records kept.
    pub fn unique(&self) -> usize {
        self.records - self.duplicates
    }
}

/// Lazily yields the first record for each distinct (barcode, UMI) pair in input order.
///
/// The pair is parsed from the `barcode:umi` annotation in each identifier.  A record without
/// exactly one annotation is an error and ends the stream.
pub struct FilterDuplicates<I, E> {
    records: I,
    seen: AHashSet<(Vec<u8>, Vec<u8>)>,
    counts: DuplicateCounts,
    done: bool,
    _error: PhantomData<E>,
}

impl<I, E> FilterDuplicates<I, E>
where
    I: Iterator<Item = Result<SequenceRecord, E>>,
    E: From<IdentifierError>,
{
    pub fn new(records: I) -> Self {
        Self {
            records,
            seen: AHashSet::new(),
            counts: DuplicateCounts::default(),
            done: false,
            _error: PhantomData,
        }
    }

    /// The tallies so far.
    pub fn counts(&self) -> DuplicateCounts {
        self.counts
    }

    /// Returns true if this is the first time the pair in `record`'s identifier is seen.
    fn is_first(&mut self, record: &SequenceRecord) -> Result<bool, IdentifierError> {
        let ids = BarcodeUmi::parse(record.head())?;
        Ok(self.seen.insert((ids.barcode.into_owned(), ids.umi.into_owned())))
    }
}

impl<I, E> Iterator for FilterDuplicates<I, E>
where
    I: Iterator<Item = Result<SequenceRecord, E>>,
    E: From<IdentifierError>,
{
    type Item = Result<SequenceRecord, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.counts.records += 1;
            match self.is_first(&record) {
                Ok(true) => return Some(Ok(record)),
                Ok(false) => self.counts.duplicates += 1,
                Err(e) => {
                    self.done = true;
                    return Some(Err(E::from(e)));
                }
            }
        }
    }
}

/// Wrap `records` in a [`FilterDuplicates`].
pub fn filter_duplicates<I, E>(records: I) -> FilterDuplicates<I::IntoIter, E>
where
    I: IntoIterator<Item = Result<SequenceRecord, E>>,
    E: From<IdentifierError>,
{
    FilterDuplicates::new(records.into_iter())
}

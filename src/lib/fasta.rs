//! Reader and writer for 2-line (FASTA) records.
//!
//! The 2-line format holds an identifier and a sequence only.  It is used for feature catalogs
//! and for persisting the deduplicated, annotated read stream.  Sequence lines may be wrapped.
#![forbid(unsafe_code)]

use std::io::{Read, Write};

use bstr::ByteSlice;
use seq_io::fasta::{self, Record};
use thiserror::Error;

use crate::record::{ReferenceRecord, SequenceRecord};

#[derive(Error, Debug)]
pub enum FastaError {
    #[error("Malformed FASTA input")]
    Parse(#[from] fasta::Error),

    #[error("Io error occurred")]
    Io(#[from] std::io::Error),
}

/// A lazy iterator of [`ReferenceRecord`]s read from 2-line formatted input.
pub struct FastaReader<R: Read> {
    reader: fasta::Reader<R>,
    done: bool,
}

impl<R: Read> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader: fasta::Reader::new(reader), done: false }
    }
}

impl<R: Read> Iterator for FastaReader<R> {
    type Item = Result<ReferenceRecord, FastaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next() {
            None => {
                self.done = true;
                None
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(FastaError::from(e)))
            }
            Some(Ok(record)) => {
                let name = String::from_utf8_lossy(record.head().trim_end()).into_owned();
                let seq: Vec<u8> = record.full_seq().trim_end().to_vec();
                Some(Ok(ReferenceRecord { name, seq }))
            }
        }
    }
}

/// Writes identifier/sequence pairs in 2-line format.
pub struct FastaWriter<W: Write> {
    writer: W,
}

impl<W: Write> FastaWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, head: &[u8], seq: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(b">")?;
        self.writer.write_all(head)?;
        self.writer.write_all(b"\n")?;
        self.writer.write_all(seq)?;
        self.writer.write_all(b"\n")
    }

    /// Write a read as a 2-line record, dropping its quality scores.
    pub fn write_sequence_record(&mut self, record: &SequenceRecord) -> std::io::Result<()> {
        self.write(record.head(), record.seq())
    }

    pub fn write_reference_record(&mut self, record: &ReferenceRecord) -> std::io::Result<()> {
        self.write(record.name.as_bytes(), &record.seq)
    }

    /// Flush and return the inner writer.
    pub fn into_inner(mut self) -> std::io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

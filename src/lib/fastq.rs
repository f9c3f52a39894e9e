//! Streaming reader and writer for 4-line (FASTQ) records.
//!
//! The reader accepts arbitrarily line-wrapped records:
//!
//! ```text
//! @<identifier>
//! <sequence line>+
//! +[<identifier>]
//! <quality line>+
//! ```
//!
//! Sequence lines are concatenated until a line starting with `+` is found.  Quality lines are
//! concatenated until the end of the input, or until at least as many quality scores as bases
//! have been read *and* the next line starts with `@`.  The second condition is what allows a
//! quality line that happens to start with `@` to be read as quality scores.
//!
//! The reader is single pass and stops at the first malformed record: once an error has been
//! yielded every further call to `next` returns `None`.
//!
//! # Usage
//!
//! ```rust
//! use barqs_lib::fastq::FastqReader;
//! let data = "@read1\nACGT\nAC\n+\nIIII\nII\n";
//! let records: Vec<_> = FastqReader::new(data.as_bytes()).collect::<Result<_, _>>().unwrap();
//! assert_eq!(records[0].seq(), b"ACGTAC");
//! ```
#![forbid(unsafe_code)]

use std::io::{BufRead, Write};

use bstr::ByteSlice;
use thiserror::Error;

use crate::record::{RecordError, SequenceRecord};
use crate::utils::s;

/// The errors that can occur while reading 4-line records.
#[derive(Error, Debug)]
pub enum FastqError {
    #[error("Input is empty")]
    Empty,

    #[error("Invalid header at line {line}, expected a line starting with '@'")]
    InvalidHeader { line: usize },

    #[error("Missing quality header: @{head}")]
    MissingQualityHeader { head: String },

    #[error("Header mismatch at line {line}: {head} != {quality_head}")]
    HeaderMismatch { head: String, quality_head: String, line: usize },

    #[error("Empty quality scores: @{head}")]
    MissingQuality { head: String },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("Io error occurred")]
    Io(#[from] std::io::Error),
}

/// A lazy, single pass iterator of [`SequenceRecord`]s read from a [`BufRead`].
pub struct FastqReader<R: BufRead> {
    reader: R,
    /// The line buffer, reused across calls.
    buffer: Vec<u8>,
    /// A header line that was read while looking for the end of the previous record.
    pending_header: Option<Vec<u8>>,
    /// The 1-based number of the last line read.
    line_number: usize,
    /// The line number of `pending_header`.
    pending_line_number: usize,
    /// Set once the input is exhausted or an error was returned.
    done: bool,
    /// True until the first line has been read.
    at_start: bool,
}

impl<R: BufRead> FastqReader<R> {
    /// Create a new [`FastqReader`] over the given reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(256),
            pending_header: None,
            line_number: 0,
            pending_line_number: 0,
            done: false,
            at_start: true,
        }
    }

    /// Read the next line into the buffer, with trailing whitespace removed.
    ///
    /// Returns `Ok(false)` at the end of the input.
    fn read_line(&mut self) -> Result<bool, FastqError> {
        self.buffer.clear();
        let n = self.reader.read_until(b'\n', &mut self.buffer)?;
        if n == 0 {
            return Ok(false);
        }
        self.line_number += 1;
        let trimmed_len = self.buffer.trim_end().len();
        self.buffer.truncate(trimmed_len);
        Ok(true)
    }

    /// Parse one record whose header line has already been read.
    fn read_record(
        &mut self,
        header: Vec<u8>,
        header_line: usize,
    ) -> Result<SequenceRecord, FastqError> {
        if header.first() != Some(&b'@') {
            return Err(FastqError::InvalidHeader { line: header_line });
        }
        let head = header[1..].to_vec();

        // Sequence lines, up to the `+` line
        let mut seq = Vec::new();
        loop {
            if !self.read_line()? {
                return Err(FastqError::MissingQualityHeader { head: s(&head) });
            }
            if self.buffer.first() == Some(&b'+') {
                break;
            }
            seq.extend_from_slice(&self.buffer);
        }

        let quality_head = &self.buffer[1..];
        if !quality_head.is_empty() && quality_head != head.as_slice() {
            return Err(FastqError::HeaderMismatch {
                head: s(&head),
                quality_head: s(quality_head),
                line: self.line_number,
            });
        }

        // Quality lines, up to the next header or the end of the input
        let mut qual = Vec::with_capacity(seq.len());
        let mut saw_quality_line = false;
        loop {
            if !self.read_line()? {
                if !saw_quality_line {
                    return Err(FastqError::MissingQuality { head: s(&head) });
                }
                self.done = true;
                break;
            }
            if self.buffer.first() == Some(&b'@') && qual.len() >= seq.len() {
                self.pending_header = Some(self.buffer.clone());
                self.pending_line_number = self.line_number;
                break;
            }
            saw_quality_line = true;
            qual.extend_from_slice(&self.buffer);
        }

        Ok(SequenceRecord::new(head, seq, qual)?)
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<SequenceRecord, FastqError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (header, header_line) = if let Some(header) = self.pending_header.take() {
            (header, self.pending_line_number)
        } else {
            if self.done {
                return None;
            }
            match self.read_line() {
                Ok(true) => (),
                Ok(false) => {
                    self.done = true;
                    if self.at_start {
                        self.at_start = false;
                        return Some(Err(FastqError::Empty));
                    }
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            (self.buffer.clone(), self.line_number)
        };
        self.at_start = false;

        let result = self.read_record(header, header_line);
        if result.is_err() {
            self.done = true;
            self.pending_header = None;
        }
        Some(result)
    }
}

/// Writes [`SequenceRecord`]s as 4-line records, one line per field.
pub struct FastqWriter<W: Write> {
    writer: W,
}

impl<W: Write> FastqWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single record.
    pub fn write_record(&mut self, record: &SequenceRecord) -> std::io::Result<()> {
        self.writer.write_all(b"@")?;
        self.writer.write_all(record.head())?;
        self.writer.write_all(b"\n")?;
        self.writer.write_all(record.seq())?;
        self.writer.write_all(b"\n+\n")?;
        self.writer.write_all(record.qual())?;
        self.writer.write_all(b"\n")
    }

    /// Write every record from `records`, returning the number written.
    pub fn write_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a SequenceRecord>,
    ) -> std::io::Result<usize> {
        let mut written = 0;
        for record in records {
            self.write_record(record)?;
            written += 1;
        }
        Ok(written)
    }

    /// Flush and return the inner writer.
    pub fn into_inner(mut self) -> std::io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

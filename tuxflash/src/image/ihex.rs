//! Intel HEX record parsing.
//!
//! Only the two record types emitted by the AVR toolchain for the Tux Droid
//! CPUs are accepted:
//!
//! ```text
//! :BB AAAA TT DD...DD CC
//!  |   |    |    |     +-- checksum (two's complement of the sum of all bytes)
//!  |   |    |    +-------- BB data bytes
//!  |   |    +------------- record type (00 = data, 01 = end of file)
//!  |   +------------------ 16-bit load address, big-endian
//!  +---------------------- byte count
//! ```
//!
//! Lines that do not start with `:` are ignored. Anything after the checksum
//! byte (line terminators, trailing blanks) is ignored too.

use crate::error::{Error, Result};
use crate::image::segment::{Page, PageSink, SegmentAccumulator};
use log::{debug, trace, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Record type byte of a data record.
pub const RECORD_DATA: u8 = 0x00;

/// Record type byte of an end-of-file record.
pub const RECORD_END_OF_FILE: u8 = 0x01;

/// Size of the 16-bit address space covered by data records.
pub const ADDRESS_SPACE: u32 = 0x1_0000;

/// Errors produced while decoding HEX text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A character that is not an ASCII hex digit, or the line ended early.
    #[error("line {line}: invalid hex digit at column {column}")]
    InvalidDigit {
        /// 1-based line number.
        line: usize,
        /// 1-based column of the offending character.
        column: usize,
    },

    /// The record bytes do not sum to zero.
    #[error("line {line}: checksum mismatch (expected {expected:#04x}, found {actual:#04x})")]
    ChecksumMismatch {
        /// 1-based line number.
        line: usize,
        /// Checksum that would have made the record valid.
        expected: u8,
        /// Checksum found in the file.
        actual: u8,
    },

    /// Record type other than data or end-of-file.
    #[error("line {line}: unrecognized record type {record_type:#04x}")]
    UnrecognizedRecordType {
        /// 1-based line number.
        line: usize,
        /// Record type byte.
        record_type: u8,
    },

    /// A data record runs past the end of the 16-bit address space.
    #[error("line {line}: record at {address:#06x} ends at {end:#07x}, past the 64 KiB address space")]
    AddressOverflow {
        /// 1-based line number.
        line: usize,
        /// Load address of the record.
        address: u16,
        /// Address one past the last data byte.
        end: u32,
    },

    /// A data record starts below the end of the previous one.
    #[error("line {line}: record at {address:#06x} overlaps data already read up to {cursor:#06x}")]
    AddressOutOfOrder {
        /// 1-based line number.
        line: usize,
        /// Load address of the record.
        address: u16,
        /// End address of the data already consumed.
        cursor: u32,
    },
}

/// Kind of a decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordKind {
    /// Data bytes to be written at `address`.
    Data,
    /// Last record of the image.
    EndOfFile,
}

/// One decoded HEX line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HexRecord {
    /// 1-based line number in the source file.
    pub line: usize,
    /// 16-bit load address.
    pub address: u16,
    /// Record kind.
    pub kind: RecordKind,
    /// Data bytes; always empty for end-of-file records.
    pub data: Vec<u8>,
}

impl HexRecord {
    /// Address one past the last data byte.
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + self.data.len() as u32
    }

    /// Reject data that would wrap around to address zero.
    pub fn check_bounds(&self) -> std::result::Result<(), ParseError> {
        let end = self.end_address();
        if end > ADDRESS_SPACE {
            return Err(ParseError::AddressOverflow {
                line: self.line,
                address: self.address,
                end,
            });
        }
        Ok(())
    }
}

/// Decode a single pair of hex digits.
pub(crate) fn decode_byte(pair: &[u8]) -> Option<u8> {
    match pair {
        [hi, lo] => Some((nibble(*hi)? << 4) | nibble(*lo)?),
        _ => None,
    }
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Reads hex byte pairs after the leading colon and keeps the running sum.
struct ByteReader<'a> {
    body: &'a [u8],
    pos: usize,
    line: usize,
    sum: u8,
}

impl ByteReader<'_> {
    fn next_byte(&mut self) -> std::result::Result<u8, ParseError> {
        let mut value = 0u8;
        for _ in 0..2 {
            let digit = self
                .body
                .get(self.pos)
                .and_then(|c| nibble(*c))
                .ok_or(ParseError::InvalidDigit {
                    line: self.line,
                    // +1 for the colon, +1 for 1-based columns
                    column: self.pos + 2,
                })?;
            value = (value << 4) | digit;
            self.pos += 1;
        }
        self.sum = self.sum.wrapping_add(value);
        Ok(value)
    }
}

/// Parse one line of HEX text.
///
/// Returns `Ok(None)` for lines that do not start with `:`.
pub fn parse_line(line: usize, text: &str) -> std::result::Result<Option<HexRecord>, ParseError> {
    let Some(body) = text.strip_prefix(':') else {
        return Ok(None);
    };

    let mut reader = ByteReader {
        body: body.as_bytes(),
        pos: 0,
        line,
        sum: 0,
    };

    let count = reader.next_byte()?;
    let address = u16::from_be_bytes([reader.next_byte()?, reader.next_byte()?]);
    let record_type = reader.next_byte()?;
    let mut data = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        data.push(reader.next_byte()?);
    }

    let expected = reader.sum.wrapping_neg();
    let actual = reader.next_byte()?;
    if reader.sum != 0 {
        return Err(ParseError::ChecksumMismatch {
            line,
            expected,
            actual,
        });
    }

    let kind = match record_type {
        RECORD_DATA => RecordKind::Data,
        RECORD_END_OF_FILE => {
            data.clear();
            RecordKind::EndOfFile
        },
        other => {
            return Err(ParseError::UnrecognizedRecordType {
                line,
                record_type: other,
            });
        },
    };

    let record = HexRecord {
        line,
        address,
        kind,
        data,
    };
    record.check_bounds()?;
    Ok(Some(record))
}

/// A fully decoded and validated HEX image.
///
/// Loading the whole file up front means a malformed line is reported before
/// anything is sent to the device.
#[derive(Debug, Clone, Default)]
pub struct HexFile {
    records: Vec<HexRecord>,
    end_of_file: bool,
}

impl HexFile {
    /// Load and validate a HEX file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading HEX image from: {}", path.display());

        let file = File::open(path).map_err(|source| Error::ReadFirmware {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(BufReader::new(file)).map_err(|e| match e {
            Error::Io(source) => Error::ReadFirmware {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse HEX text from any buffered reader.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut image = Self::default();
        let mut cursor = 0u32;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let number = index + 1;

            if image.end_of_file {
                if line.starts_with(':') {
                    debug!("Ignoring record after end of file on line {number}");
                }
                continue;
            }

            let Some(record) = parse_line(number, &line)? else {
                trace!("Skipping line {number}");
                continue;
            };

            match record.kind {
                RecordKind::Data => {
                    if u32::from(record.address) < cursor {
                        return Err(ParseError::AddressOutOfOrder {
                            line: number,
                            address: record.address,
                            cursor,
                        }
                        .into());
                    }
                    cursor = record.end_address();
                },
                RecordKind::EndOfFile => image.end_of_file = true,
            }
            image.records.push(record);
        }

        if !image.end_of_file {
            warn!("HEX image has no end-of-file record");
        }
        debug!(
            "Parsed {} records, {} data bytes",
            image.records.len(),
            image.data_len()
        );
        Ok(image)
    }

    /// All records in file order, including the end-of-file record.
    pub fn records(&self) -> &[HexRecord] {
        &self.records
    }

    /// Whether the image carried an end-of-file record.
    pub fn has_end_of_file(&self) -> bool {
        self.end_of_file
    }

    /// Total number of data bytes.
    pub fn data_len(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.data.len())
            .sum()
    }

    /// Replay the records into an accumulator and flush the last page.
    pub fn feed<S: PageSink>(&self, accumulator: &mut SegmentAccumulator<S>) -> Result<()> {
        for record in &self.records {
            accumulator.feed(record)?;
        }
        if !self.end_of_file {
            accumulator.finalize()?;
        }
        Ok(())
    }

    /// Segment the image into pages without sending them anywhere.
    pub fn pages(&self, page_size: usize) -> Result<Vec<Page>> {
        let mut accumulator = SegmentAccumulator::new(Vec::new(), page_size)?;
        self.feed(&mut accumulator)?;
        Ok(accumulator.into_sink())
    }
}

//! Re-chunking of HEX records into page-aligned segments.
//!
//! The bootloaders only accept whole pages. Records are copied byte by byte
//! into a page buffer; gaps inside a page are filled with [`PAD_BYTE`] and a
//! page is handed to the [`PageSink`] as soon as its last byte is known.
//! Pages that contain no data at all are never emitted.

use crate::error::{Error, Result};
use crate::image::ihex::{HexRecord, ParseError, RecordKind};
use byteorder::{BigEndian, WriteBytesExt};
use log::trace;
use std::mem;

/// Value of erased flash, used to fill gaps.
pub const PAD_BYTE: u8 = 0xFF;

/// Length of the address header in front of each page on the wire.
pub const PAGE_HEADER_LEN: usize = 2;

/// Largest page size the INIT command can describe.
pub const MAX_PAGE_SIZE: usize = 128;

/// A full page ready to be programmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Page-aligned start address.
    pub address: u16,
    /// Exactly one page of payload.
    pub data: Vec<u8>,
}

impl Page {
    /// Big-endian address header.
    pub fn header(&self) -> [u8; PAGE_HEADER_LEN] {
        self.address.to_be_bytes()
    }

    /// Header followed by the payload, as streamed to the bootloader.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(PAGE_HEADER_LEN + self.data.len());
        // Writing into a Vec cannot fail.
        let _ = wire.write_u16::<BigEndian>(self.address);
        wire.extend_from_slice(&self.data);
        wire
    }
}

/// Destination for completed pages.
pub trait PageSink {
    /// Consume one page. An error aborts the upload.
    fn send_page(&mut self, page: &Page) -> Result<()>;
}

impl PageSink for Vec<Page> {
    fn send_page(&mut self, page: &Page) -> Result<()> {
        self.push(page.clone());
        Ok(())
    }
}

impl<S: PageSink + ?Sized> PageSink for &mut S {
    fn send_page(&mut self, page: &Page) -> Result<()> {
        (**self).send_page(page)
    }
}

/// Check that a page size can be used by the accumulator and the bootloader.
pub fn validate_page_size(page_size: usize) -> Result<()> {
    if page_size.is_power_of_two() && page_size <= MAX_PAGE_SIZE {
        Ok(())
    } else {
        Err(Error::InvalidPageSize(page_size))
    }
}

/// Accumulates record bytes into pages.
#[derive(Debug)]
pub struct SegmentAccumulator<S> {
    sink: S,
    page_size: usize,
    current_address: u32,
    segment_base: u32,
    in_segment: bool,
    buffer: Vec<u8>,
    pages_flushed: u32,
}

impl<S: PageSink> SegmentAccumulator<S> {
    /// Create an accumulator that flushes `page_size`-byte pages into `sink`.
    pub fn new(sink: S, page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;
        Ok(Self {
            sink,
            page_size,
            current_address: 0,
            segment_base: 0,
            in_segment: false,
            buffer: Vec::with_capacity(page_size),
            pages_flushed: 0,
        })
    }

    /// Consume one record.
    ///
    /// An end-of-file record pads and flushes the open page.
    pub fn feed(&mut self, record: &HexRecord) -> Result<()> {
        match record.kind {
            RecordKind::Data => self.feed_data(record),
            RecordKind::EndOfFile => self.finalize(),
        }
    }

    /// Pad and flush the open page, if any.
    pub fn finalize(&mut self) -> Result<()> {
        while self.in_segment {
            self.push_byte(PAD_BYTE)?;
        }
        Ok(())
    }

    /// Number of pages handed to the sink so far.
    pub fn pages_flushed(&self) -> u32 {
        self.pages_flushed
    }

    /// Whether a partially filled page is pending.
    pub fn has_open_segment(&self) -> bool {
        self.in_segment
    }

    /// Shared access to the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Give back the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn feed_data(&mut self, record: &HexRecord) -> Result<()> {
        let address = u32::from(record.address);
        record.check_bounds()?;

        if address < self.current_address {
            return Err(ParseError::AddressOutOfOrder {
                line: record.line,
                address: record.address,
                cursor: self.current_address,
            }
            .into());
        }

        // Pad up to the record, or until the open page is complete.
        while self.in_segment && self.current_address < address {
            self.push_byte(PAD_BYTE)?;
        }

        for &byte in &record.data {
            if !self.in_segment {
                let start = if self.current_address < address {
                    address
                } else {
                    self.current_address
                };
                self.open_segment(start);
            }
            self.push_byte(byte)?;
        }
        Ok(())
    }

    fn open_segment(&mut self, address: u32) {
        let mask = !(self.page_size as u32 - 1);
        self.segment_base = address & mask;
        self.buffer.clear();
        self.buffer
            .resize((address - self.segment_base) as usize, PAD_BYTE);
        self.current_address = address;
        self.in_segment = true;
        trace!(
            "Opened segment at {:#06x} (data from {:#06x})",
            self.segment_base, address
        );
    }

    fn push_byte(&mut self, byte: u8) -> Result<()> {
        self.buffer.push(byte);
        self.current_address += 1;
        if self.current_address == self.segment_base + self.page_size as u32 {
            self.flush()?;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn flush(&mut self) -> Result<()> {
        self.in_segment = false;
        let page = Page {
            // Records are bounds-checked, so the base is below 0x10000.
            address: self.segment_base as u16,
            data: mem::replace(&mut self.buffer, Vec::with_capacity(self.page_size)),
        };
        trace!("Flushing page {:#06x}", page.address);
        self.sink.send_page(&page)?;
        self.pages_flushed += 1;
        Ok(())
    }
}

//! Hash-mark progress estimation.
//!
//! The number of pages in an image is estimated from the raw size of its
//! data fields before any transfer starts, so the indicator can advance in
//! fixed increments while pages are acknowledged.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Width of the progress indicator in marks.
pub const HASH_MARKS: u32 = 60;

/// Characters per line that do not encode data: colon, byte count, address,
/// record type, checksum and a CR/LF terminator.
pub const LINE_OVERHEAD: usize = 13;

/// Hex digits per data byte.
const DIGITS_PER_BYTE: f64 = 2.0;

/// Compute the number of acknowledged pages per progress mark for a file.
pub fn compute_step<P: AsRef<Path>>(path: P, page_size: usize) -> Result<f64> {
    let path = path.as_ref();
    let content = fs::read(path).map_err(|source| Error::ReadFirmware {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(compute_step_from_bytes(&content, page_size))
}

/// Compute the progress step from in-memory HEX text.
///
/// Line lengths include their terminator. Lines shorter than the overhead
/// contribute nothing.
#[allow(clippy::cast_precision_loss)]
pub fn compute_step_from_bytes(content: &[u8], page_size: usize) -> f64 {
    let data_chars: usize = content
        .split_inclusive(|&b| b == b'\n')
        .map(|line| line.len().saturating_sub(LINE_OVERHEAD))
        .sum();
    data_chars as f64 / (DIGITS_PER_BYTE * page_size as f64 * f64::from(HASH_MARKS))
}

/// Tracks how many marks have been printed for a running upload.
#[derive(Debug, Clone)]
pub struct HashProgress {
    step: f64,
    threshold: f64,
    marks: u32,
}

impl HashProgress {
    /// Create an indicator advancing one mark every `step` pages.
    pub fn new(step: f64) -> Self {
        Self {
            step,
            threshold: 0.0,
            marks: 0,
        }
    }

    /// Report the total number of acknowledged pages; returns how many new
    /// marks should be printed.
    ///
    /// Nothing is printed before the first page is acknowledged.
    pub fn advance(&mut self, pages_acked: u32) -> u32 {
        if pages_acked == 0 {
            return 0;
        }
        let pages = f64::from(pages_acked);
        let mut new_marks = 0;
        while pages >= self.threshold && self.marks < HASH_MARKS {
            self.threshold += self.step;
            self.marks += 1;
            new_marks += 1;
        }
        new_marks
    }

    /// Marks printed so far.
    pub fn marks(&self) -> u32 {
        self.marks
    }

    /// Pages per mark.
    pub fn step(&self) -> f64 {
        self.step
    }
}

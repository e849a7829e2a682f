//! Firmware image handling.
//!
//! - [`ihex`]: Intel HEX line decoding and whole-file validation
//! - [`segment`]: page re-chunking
//! - [`version`]: embedded version marker

pub mod ihex;
pub mod segment;
pub mod version;

use crate::error::{Error, Result};
use crate::progress;
use ihex::HexFile;
use log::debug;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use version::FirmwareVersion;

/// A HEX file loaded from disk together with everything derived from it.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    path: PathBuf,
    hex: HexFile,
    version: Option<FirmwareVersion>,
    progress_step: f64,
}

impl FirmwareImage {
    /// Load, validate and pre-scan a firmware file.
    ///
    /// The progress step is computed for `page_size`.
    pub fn load<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read(path).map_err(|source| Error::ReadFirmware {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(path, &content, page_size)
    }

    /// Build an image from HEX text already in memory.
    pub fn from_bytes<P: AsRef<Path>>(path: P, content: &[u8], page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        // Non-UTF-8 content surfaces as an I/O error from the line reader.
        let unreadable = |e| match e {
            Error::Io(source) => Error::ReadFirmware {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        };
        let hex = HexFile::parse(Cursor::new(content)).map_err(unreadable)?;
        let version = FirmwareVersion::scan(Cursor::new(content)).map_err(unreadable)?;
        let progress_step = progress::compute_step_from_bytes(content, page_size);
        debug!(
            "{}: version {}, progress step {progress_step:.3}",
            path.display(),
            version.map_or_else(|| "none".to_string(), |v| v.to_string())
        );
        Ok(Self {
            path: path.to_path_buf(),
            hex,
            version,
            progress_step,
        })
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded records.
    pub fn hex(&self) -> &HexFile {
        &self.hex
    }

    /// Embedded version, if the image carries a marker.
    pub fn version(&self) -> Option<FirmwareVersion> {
        self.version
    }

    /// Pages per progress mark.
    pub fn progress_step(&self) -> f64 {
        self.progress_step
    }
}

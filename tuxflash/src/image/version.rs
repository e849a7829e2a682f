//! Firmware version marker embedded in the HEX images.
//!
//! Every Tux Droid firmware carries a 12-byte version block whose first data
//! byte is the `0xC8` version command. It is emitted at `0x0EF0` by the RF
//! CPUs, at `0x1DF0` by the core and audio CPUs, and anywhere by the USB CPU
//! (where the record is recognised by the `00 C8 04` sequence instead).
//!
//! ```text
//! :0C 1DF0 00 C8 VV MM UU ...
//!                |  |  +-- update version
//!                |  +----- minor version
//!                +-------- cpu number (bits 0-2) | major version (bits 3-7)
//! ```

use crate::error::{Error, Result};
use crate::image::ihex::decode_byte;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const MARKER_RF: &str = ":0C0EF000C8";
const MARKER_CORE_AUDIO: &str = ":0C1DF000C8";
const MARKER_USB_PREFIX: &str = ":0C";
const MARKER_USB_COMMAND: &str = "00C804";

/// Version information found in a firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareVersion {
    /// 3-bit CPU identifier.
    pub cpu_number: u8,
    /// 5-bit major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Update version.
    pub update: u8,
}

impl FirmwareVersion {
    /// Decode the version from a single whitespace-separated token.
    pub fn from_token(token: &str) -> Option<Self> {
        let is_marker = token.starts_with(MARKER_RF)
            || token.starts_with(MARKER_CORE_AUDIO)
            || (token.starts_with(MARKER_USB_PREFIX)
                && token.get(7..13) == Some(MARKER_USB_COMMAND));
        if !is_marker {
            return None;
        }

        let bytes = token.as_bytes();
        let id = decode_byte(bytes.get(11..13)?)?;
        let minor = decode_byte(bytes.get(13..15)?)?;
        let update = decode_byte(bytes.get(15..17)?)?;
        Some(Self {
            cpu_number: id & 0x07,
            major: id >> 3,
            minor,
            update,
        })
    }

    /// Return the first version marker found in the text.
    pub fn find_in(text: &str) -> Option<Self> {
        text.split_whitespace().find_map(Self::from_token)
    }

    /// Scan a reader line by line for the version marker.
    pub fn scan<R: BufRead>(reader: R) -> Result<Option<Self>> {
        for line in reader.lines() {
            if let Some(version) = Self::find_in(&line?) {
                return Ok(Some(version));
            }
        }
        Ok(None)
    }

    /// Scan a file for the version marker.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::ReadFirmware {
            path: path.to_path_buf(),
            source,
        })?;
        Self::scan(BufReader::new(file))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.update)
    }
}

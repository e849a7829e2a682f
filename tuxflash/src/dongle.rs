//! Commands handled by the dongle firmware itself.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::protocol::DONGLE_COMMAND_HEADER;
use crate::transport::{REPORT_SIZE, Transport};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

/// Request the dongle information block.
pub const INFO_FUXUSB: u8 = 6;

/// Tag of the version entry in the information block.
pub const FUXUSB_VERSION_CMD: u8 = 200;

/// Oldest dongle firmware (minor, update) able to drive the bootloaders.
pub const MIN_VERSION: (u8, u8) = (5, 2);

/// Make the USB CPU re-enumerate as a DFU device.
pub const ENTER_DFU_FRAME: [u8; 5] = [0x01, 0x01, 0x00, 0x00, 0xFF];

const VERSION_QUERY_ATTEMPTS: usize = 3;
const VERSION_QUERY_DELAY: Duration = Duration::from_secs(1);

/// Firmware version reported by the dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DongleVersion {
    /// Minor version.
    pub minor: u8,
    /// Update version.
    pub update: u8,
}

impl DongleVersion {
    /// Find the version entry in an information block.
    ///
    /// The block is a list of 4-byte entries `tag, major, minor, update`.
    pub fn from_info(block: &[u8]) -> Option<Self> {
        block
            .chunks_exact(4)
            .find(|entry| entry[0] == FUXUSB_VERSION_CMD)
            .map(|entry| Self {
                minor: entry[2],
                update: entry[3],
            })
    }

    /// Whether this firmware can drive the bootloaders.
    pub fn is_supported(self) -> bool {
        (self.minor, self.update) >= MIN_VERSION
    }
}

impl fmt::Display for DongleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0.{}.{}", self.minor, self.update)
    }
}

/// Ask the dongle for its firmware version.
///
/// Freshly plugged dongles sometimes answer with an empty block, so the
/// query is repeated a few times while the minor version reads as zero.
pub fn query_version<T, C>(transport: &mut T, clock: &C) -> Result<DongleVersion>
where
    T: Transport + ?Sized,
    C: Clock + ?Sized,
{
    let mut request = [0u8; REPORT_SIZE];
    request[0] = DONGLE_COMMAND_HEADER;
    request[1] = INFO_FUXUSB;

    let mut version = DongleVersion { minor: 0, update: 0 };
    for attempt in 1..=VERSION_QUERY_ATTEMPTS {
        transport.write(&request)?;
        clock.sleep(VERSION_QUERY_DELAY);

        let mut block = [0u8; REPORT_SIZE];
        let n = transport.read(&mut block)?;
        match DongleVersion::from_info(&block[..n]) {
            Some(found) => version = found,
            None => debug!("No version entry in info block (attempt {attempt})"),
        }
        if version.minor != 0 {
            break;
        }
    }

    info!("Dongle firmware {version}");
    Ok(version)
}

/// Refuse to continue with a dongle firmware that is too old.
pub fn ensure_supported(version: DongleVersion) -> Result<()> {
    if version.is_supported() {
        Ok(())
    } else {
        warn!("Dongle firmware {version} is older than 0.{}.{}", MIN_VERSION.0, MIN_VERSION.1);
        Err(Error::FirmwareTooOld {
            minor: version.minor,
            update: version.update,
        })
    }
}

/// Switch the dongle to DFU mode.
pub fn enter_dfu_mode<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    info!("Switching the dongle to DFU mode");
    transport.write(&ENTER_DFU_FRAME)
}

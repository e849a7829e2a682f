//! HID transport using the `hidapi` crate.

use crate::error::{Error, Result};
use crate::transport::{REPORT_SIZE, Transport, TransportKind, check_frame_len};
use hidapi::{HidApi, HidDevice};
use log::{debug, trace, warn};

/// Read timeout in milliseconds.
pub const READ_TIMEOUT_MS: i32 = 5000;

/// Dongle opened as a HID device.
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    /// Open the dongle, or `None` when no HID device matches.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Option<Self>> {
        let api = match HidApi::new() {
            Ok(api) => api,
            Err(e) => {
                warn!("HID backend unavailable: {e}");
                return Ok(None);
            },
        };
        match api.open(vendor_id, product_id) {
            Ok(device) => Ok(Some(Self { device })),
            Err(e) => {
                debug!("No HID device {vendor_id:04x}:{product_id:04x}: {e}");
                Ok(None)
            },
        }
    }
}

impl Transport for HidTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        check_frame_len(data)?;
        // Byte 0 is the report ID, the dongle uses a single unnumbered report.
        let mut report = [0u8; REPORT_SIZE + 1];
        report[1..=data.len()].copy_from_slice(data);
        trace!("HID write {data:02X?}");
        let written = self.device.write(&report)?;
        if written == 0 {
            return Err(Error::Transport("HID report not sent".into()));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize> {
        let n = self.device.read_timeout(buf, READ_TIMEOUT_MS)?;
        trace!("HID read {:02X?}", &buf[..n]);
        Ok(n)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Hid
    }
}

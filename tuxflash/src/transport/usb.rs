//! Raw USB transport using the `rusb` crate.

use crate::error::{Error, Result};
use crate::transport::{REPORT_SIZE, Transport, TransportKind, check_frame_len};
use log::{debug, trace, warn};
use rusb::{Context, DeviceHandle, UsbContext};
use std::time::Duration;

/// Interface carrying the command channel.
pub const INTERFACE: u8 = 3;

/// Interrupt OUT endpoint.
pub const ENDPOINT_OUT: u8 = 0x05;

/// Interrupt IN endpoint.
pub const ENDPOINT_IN: u8 = 0x84;

/// Transfer timeout.
pub const TIMEOUT: Duration = Duration::from_millis(5000);

/// First dongle release able to switch the CPUs to bootloader mode on
/// command.
pub const MIN_AUTO_BOOTLOAD_RELEASE: u16 = 0x0030;

/// Dongle opened through libusb.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    release: u16,
    claimed: bool,
}

impl UsbTransport {
    /// Open and claim the dongle, or `None` when it is not plugged in.
    ///
    /// Fails with [`Error::Usb`] when libusb cannot be initialized.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Option<Self>> {
        let context = Context::new()?;
        let Some(handle) = context.open_device_with_vid_pid(vendor_id, product_id) else {
            return Ok(None);
        };

        let descriptor = handle.device().device_descriptor()?;
        let release = bcd(descriptor.device_version());
        debug!("Dongle release {release:#06x}");

        if let Err(e) = handle.claim_interface(INTERFACE) {
            debug!("Claim failed ({e}), detaching kernel driver");
            if let Err(e) = handle.detach_kernel_driver(INTERFACE) {
                warn!("Could not detach kernel driver: {e}");
            }
            handle.claim_interface(INTERFACE)?;
        }
        debug!("Interface {INTERFACE} claimed");

        Ok(Some(Self {
            handle,
            release,
            claimed: true,
        }))
    }

    /// Device release number (`bcdDevice`).
    pub fn device_release(&self) -> u16 {
        self.release
    }

    /// Fail when the dongle must be put in bootloader mode by hand.
    pub fn ensure_auto_bootload(&self) -> Result<()> {
        if self.release < MIN_AUTO_BOOTLOAD_RELEASE {
            return Err(Error::ManualBootloadRequired);
        }
        Ok(())
    }
}

fn bcd(version: rusb::Version) -> u16 {
    (u16::from(version.major()) << 8)
        | (u16::from(version.minor()) << 4)
        | u16::from(version.sub_minor())
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        check_frame_len(data)?;
        trace!("USB write {data:02X?}");
        let written = self.handle.write_interrupt(ENDPOINT_OUT, data, TIMEOUT)?;
        if written != data.len() {
            return Err(Error::Transport(format!(
                "short write: {written} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize> {
        let n = self.handle.read_interrupt(ENDPOINT_IN, buf, TIMEOUT)?;
        trace!("USB read {:02X?}", &buf[..n]);
        Ok(n)
    }

    fn release(&mut self) -> Result<()> {
        if self.claimed {
            self.claimed = false;
            self.handle.release_interface(INTERFACE)?;
            debug!("Interface {INTERFACE} released");
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = Transport::release(self) {
            warn!("Failed to release USB interface: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcd_release() {
        assert_eq!(bcd(rusb::Version(0, 3, 0)), 0x0030);
        assert_eq!(bcd(rusb::Version(1, 2, 5)), 0x0125);
        assert!(bcd(rusb::Version(0, 2, 9)) < MIN_AUTO_BOOTLOAD_RELEASE);
    }

    #[test]
    fn test_open_absent_device() {
        // Works with or without a usable libusb on the test host.
        match UsbTransport::open(0xFFFF, 0xFFFE) {
            Ok(None) => {},
            Err(e) => assert!(matches!(e, Error::Usb(_))),
            Ok(Some(_)) => panic!("no device should match 0xFFFF:0xFFFE"),
        }
    }
}

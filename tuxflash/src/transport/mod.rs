//! Byte-channel transport to the Tux Droid dongle.
//!
//! The dongle exposes the same 64-byte command channel in two ways: as HID
//! reports and as raw interrupt endpoints. Both backends implement
//! [`Transport`] so the protocol code never needs to know which one is in use.
//!
//! ```text
//! +--------------------+
//! | BootloaderSession  |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |  Transport trait   |
//! +----+----------+----+
//!      |          |
//!      v          v
//! +----+---+ +----+---+
//! |  HID   | |  USB   |
//! | hidapi | |  rusb  |
//! +--------+ +--------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use tuxflash::transport::{Transport, REPORT_SIZE};
//!
//! fn ping<T: Transport>(transport: &mut T) -> tuxflash::Result<usize> {
//!     transport.write(&[0x01, 0x06])?;
//!     let mut buf = [0u8; REPORT_SIZE];
//!     transport.read(&mut buf)
//! }
//! ```

#[cfg(feature = "hid")]
pub mod hid;

#[cfg(feature = "usb")]
pub mod usb;

use crate::clock::Clock;
use crate::error::{Error, Result};
use log::{debug, info};
use std::fmt;
use std::time::Duration;

/// Size of one command or status frame.
pub const REPORT_SIZE: usize = 64;

/// Atmel vendor ID used by the dongle.
pub const VENDOR_ID: u16 = 0x03EB;

/// Product ID of the dongle.
pub const PRODUCT_ID: u16 = 0xFF07;

/// Backend behind a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// HID reports.
    Hid,
    /// Raw USB interrupt transfers.
    Usb,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hid => write!(f, "HID"),
            Self::Usb => write!(f, "USB"),
        }
    }
}

/// Send/receive channel to the dongle.
pub trait Transport {
    /// Send one frame of at most [`REPORT_SIZE`] bytes.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Receive one status frame; returns the number of bytes read.
    fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize>;

    /// Give the device back to the system. Calling it twice is harmless.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    /// Backend in use.
    fn kind(&self) -> TransportKind;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize> {
        (**self).read(buf)
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }
}

/// Reject frames that do not fit in a report.
pub(crate) fn check_frame_len(data: &[u8]) -> Result<()> {
    if data.len() > REPORT_SIZE {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds the {REPORT_SIZE}-byte report size",
            data.len()
        )));
    }
    Ok(())
}

/// Device discovery settings.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Number of discovery rounds before giving up.
    pub attempts: u32,
    /// Delay between discovery rounds.
    pub retry_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            attempts: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Find the dongle, trying HID first and raw USB second.
///
/// A dongle whose firmware cannot enter bootloader mode by itself is reported
/// as [`Error::ManualBootloadRequired`].
pub fn connect<C: Clock>(options: &ConnectOptions, clock: &C) -> Result<Box<dyn Transport>> {
    let attempts = options.attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(transport) = open_hid(options)? {
            info!("Dongle found (HID)");
            return Ok(transport);
        }
        if let Some(transport) = open_usb(options)? {
            info!("Dongle found (USB)");
            return Ok(transport);
        }
        if attempt < attempts {
            info!("Waiting for the dongle ({attempt}/{attempts})...");
            clock.sleep(options.retry_delay);
        }
    }
    debug!(
        "No device {:04x}:{:04x} after {attempts} attempts",
        options.vendor_id, options.product_id
    );
    Err(Error::DeviceNotFound)
}

#[cfg(feature = "hid")]
fn open_hid(options: &ConnectOptions) -> Result<Option<Box<dyn Transport>>> {
    Ok(hid::HidTransport::open(options.vendor_id, options.product_id)?
        .map(|t| Box::new(t) as Box<dyn Transport>))
}

#[cfg(not(feature = "hid"))]
fn open_hid(_options: &ConnectOptions) -> Result<Option<Box<dyn Transport>>> {
    Ok(None)
}

#[cfg(feature = "usb")]
fn open_usb(options: &ConnectOptions) -> Result<Option<Box<dyn Transport>>> {
    let Some(transport) = usb::UsbTransport::open(options.vendor_id, options.product_id)? else {
        return Ok(None);
    };
    transport.ensure_auto_bootload()?;
    Ok(Some(Box::new(transport)))
}

#[cfg(not(feature = "usb"))]
fn open_usb(_options: &ConnectOptions) -> Result<Option<Box<dyn Transport>>> {
    Ok(None)
}

/// Scripted transport for unit tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::{REPORT_SIZE, Transport, TransportKind};
    use crate::error::{Error, Result};
    use std::collections::VecDeque;

    /// Reads pop scripted frames; an empty script reads as a timeout.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub(crate) responses: VecDeque<Vec<u8>>,
        pub(crate) writes: Vec<Vec<u8>>,
        pub(crate) reads: usize,
        pub(crate) released: bool,
        pub(crate) fail_writes: bool,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn respond(&mut self, frame: &[u8]) -> &mut Self {
            self.responses.push_back(frame.to_vec());
            self
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            super::check_frame_len(data)?;
            if self.fail_writes {
                return Err(Error::Transport("write refused".into()));
            }
            self.writes.push(data.to_vec());
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize> {
            self.reads += 1;
            let frame = self
                .responses
                .pop_front()
                .ok_or_else(|| Error::Transport("read timed out".into()))?;
            buf.fill(0);
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(frame.len())
        }

        fn release(&mut self) -> Result<()> {
            self.released = true;
            Ok(())
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Usb
        }
    }
}

//! Error types for tuxflash.

use crate::image::ihex::ParseError;
use crate::target::{Cpu, MemoryType};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for tuxflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tuxflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error outside of firmware file loading.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Raw USB error reported by libusb.
    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// HID error reported by hidapi.
    #[cfg(feature = "hid")]
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// Generic transport failure (short write, closed handle, ...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The dongle could not be found on the bus.
    #[error("Tux Droid dongle not found")]
    DeviceNotFound,

    /// The dongle firmware cannot switch the CPUs into bootloader mode itself.
    #[error(
        "The dongle firmware is too old to enter bootloader mode automatically; \
         unplug the dongle, hold the head button while plugging it back in, then retry"
    )]
    ManualBootloadRequired,

    /// The firmware file could not be read.
    #[error("Cannot read {}: {source}", .path.display())]
    ReadFirmware {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Malformed Intel HEX content.
    #[error("Invalid HEX file: {0}")]
    Parse(#[from] ParseError),

    /// The file is not a valid programming file for any known CPU.
    #[error("Not a valid programming file: {0}")]
    BadProgFile(String),

    /// The target CPU does not accept the requested memory type.
    #[error("{cpu} does not support {memory} programming")]
    UnsupportedMemory {
        /// Target CPU.
        cpu: Cpu,
        /// Requested memory.
        memory: MemoryType,
    },

    /// Page size is not a usable power of two.
    #[error("Invalid page size {0}: must be a power of two no larger than 128")]
    InvalidPageSize(usize),

    /// The bootloader did not acknowledge the INIT command.
    #[error("Bootloader initialization failed: {0}")]
    InitializationFailed(String),

    /// A page transfer was rejected or not acknowledged.
    #[error("Bootloading failed: {0}")]
    BootloadingFailed(String),

    /// The bootloader did not acknowledge the EXIT command.
    #[error("Bootloader did not acknowledge exit")]
    BootloaderExitFailed,

    /// A session operation was called in the wrong state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Session state at the time of the call.
        state: crate::protocol::bootloader::SessionState,
    },

    /// Dongle firmware is older than the minimum supported release.
    #[error(
        "Dongle firmware 0.{minor}.{update} is too old, at least 0.{}.{} is required; \
         update the dongle firmware first",
        crate::dongle::MIN_VERSION.0,
        crate::dongle::MIN_VERSION.1
    )]
    FirmwareTooOld {
        /// Reported minor version.
        minor: u8,
        /// Reported update version.
        update: u8,
    },
}

impl Error {
    /// Map this error onto the process exit-code taxonomy.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Io(_) | Self::Transport(_) => ExitStatus::TransportError,
            #[cfg(feature = "usb")]
            Self::Usb(_) => ExitStatus::TransportError,
            #[cfg(feature = "hid")]
            Self::Hid(_) => ExitStatus::TransportError,
            Self::DeviceNotFound => ExitStatus::DeviceNotFound,
            Self::ManualBootloadRequired => ExitStatus::ManualBootloadRequired,
            Self::ReadFirmware { .. }
            | Self::Parse(_)
            | Self::BadProgFile(_)
            | Self::UnsupportedMemory { .. } => ExitStatus::BadProgFile,
            Self::InitializationFailed(_)
            | Self::BootloadingFailed(_)
            | Self::BootloaderExitFailed
            | Self::InvalidState { .. } => ExitStatus::BootloadingFailed,
            Self::FirmwareTooOld { .. } => ExitStatus::FirmwareTooOld,
            Self::InvalidPageSize(_) => ExitStatus::Usage,
        }
    }

    /// Whether a batch run may skip this file and continue with the next one.
    pub fn is_file_local(&self) -> bool {
        self.exit_status() == ExitStatus::BadProgFile
    }
}

/// Process exit codes.
///
/// The numeric values are stable and shared with scripts that wrap the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitStatus {
    /// Everything went fine.
    Success = 0,
    /// Invalid command line or configuration.
    Usage = 2,
    /// The dongle is not connected.
    DeviceNotFound = 3,
    /// The dongle needs to be put in bootloader mode by hand.
    ManualBootloadRequired = 4,
    /// A file was not a valid programming file.
    BadProgFile = 5,
    /// The bootloader handshake or a page transfer failed.
    BootloadingFailed = 6,
    /// Low-level USB/HID failure.
    TransportError = 7,
    /// The external DFU utility is not installed.
    ExternalFlasherMissing = 8,
    /// The external DFU utility reported a failure.
    ProgrammingFailed = 9,
    /// The dongle firmware is too old.
    FirmwareTooOld = 10,
    /// The background driver could not be notified.
    ServerConnection = 11,
}

impl ExitStatus {
    /// Numeric process exit code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether this status means success.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::Usage => "usage error",
            Self::DeviceNotFound => "device not found",
            Self::ManualBootloadRequired => "manual bootload required",
            Self::BadProgFile => "bad programming file",
            Self::BootloadingFailed => "bootloading failed",
            Self::TransportError => "transport error",
            Self::ExternalFlasherMissing => "external flasher missing",
            Self::ProgrammingFailed => "programming failed",
            Self::FirmwareTooOld => "firmware too old",
            Self::ServerConnection => "server connection error",
        };
        f.write_str(text)
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

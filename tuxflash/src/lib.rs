//! # tuxflash
//!
//! A library for reprogramming the CPUs of a Tux Droid robot through its
//! USB dongle.
//!
//! The dongle forwards bootloader commands to the robot CPUs over its
//! internal I2C bus. This crate provides:
//!
//! - Intel HEX parsing with checksum validation
//! - Segmentation of records into fixed-size, `0xFF`-padded pages
//! - The INIT / FILLPAGE / EXIT bootloader session
//! - Firmware version markers and the CPU table
//! - A progress estimate matching the classic 60-mark hash bar
//!
//! ## Features
//!
//! - `usb` (default): raw USB access via `rusb`
//! - `hid`: HID access via `hidapi`, tried before raw USB
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use tuxflash::{ConnectOptions, Flasher, ProgramJob, SystemClock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let job = ProgramJob::classify("tuxcore.hex")?.prepare(64)?;
//!
//!     let transport = tuxflash::transport::connect(&ConnectOptions::default(), &SystemClock)?;
//!     let mut flasher = Flasher::new(transport, SystemClock);
//!     flasher.check_dongle()?;
//!     let report = flasher.program(&job, |pages| println!("{pages} pages"))?;
//!     println!("{} pages written", report.pages);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod dongle;
pub mod error;
pub mod flasher;
pub mod image;
pub mod job;
pub mod progress;
pub mod protocol;
pub mod target;
pub mod transport;

pub use {
    clock::{Clock, SystemClock},
    dongle::DongleVersion,
    error::{Error, ExitStatus, Result},
    flasher::{Flasher, ProgramReport},
    image::{
        FirmwareImage,
        ihex::{HexFile, HexRecord, ParseError, RecordKind},
        segment::{Page, PageSink, SegmentAccumulator},
        version::FirmwareVersion,
    },
    job::{Batch, JobKind, PreparedJob, ProgramJob},
    progress::HashProgress,
    protocol::{BootloaderSession, SessionConfig, SessionState},
    target::{CPU_TABLE, Cpu, CpuTarget, MemoryType},
    transport::{ConnectOptions, Transport, TransportKind},
};

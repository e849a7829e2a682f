//! Dongle command protocol.
//!
//! Every frame sent to the dongle starts with a header byte telling it what
//! to do with the rest:
//!
//! ```text
//! +--------+----------+-----------------+
//! | header | opcode   | arguments       |
//! +--------+----------+-----------------+
//! |   1    |    1     | up to 62 bytes  |
//! +--------+----------+-----------------+
//!
//! header 0x01: command for the dongle itself
//! header 0x03: forward to a bootloader on the internal I2C bus
//! ```
//!
//! Status frames coming back always start with [`STATUS_MARKER`].

pub mod bootloader;

pub use bootloader::{BootloaderSession, SessionConfig, SessionState};

/// Header of frames handled by the dongle firmware itself.
pub const DONGLE_COMMAND_HEADER: u8 = 0x01;

/// Header of frames forwarded to a CPU bootloader over I2C.
pub const I2C_FORWARD_HEADER: u8 = 0x03;

/// First byte of every status frame.
pub const STATUS_MARKER: u8 = 0xF0;

//! I2C bootloader session.
//!
//! A session programs one memory of one CPU:
//!
//! ```text
//! Disconnected --init--> Initializing --ack--> Programming --exit--> Exiting --ack--> Done
//!                             |                    |                    |
//!                             +------------------->+--------------------+--> Failed
//! ```
//!
//! ## Frames
//!
//! ```text
//! INIT      03 01 addr page_size packets
//! FILLPAGE  03 02 <34 bytes of header+page>   (repeated until the page is sent)
//! EXIT      03 03 00 00 00
//! ```
//!
//! Each page goes out as its 2-byte big-endian address followed by the page
//! data. For 64-byte pages that is one 36-byte frame and one 34-byte frame.
//! The dongle answers each page with `F0 00 ..`; INIT and EXIT are answered
//! with `F0 xx ack` where `ack` is [`INIT_ACK`] or [`EXIT_ACK`].

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::image::segment::{MAX_PAGE_SIZE, PAGE_HEADER_LEN, Page, PageSink, validate_page_size};
use crate::protocol::{I2C_FORWARD_HEADER, STATUS_MARKER};
use crate::target::MemoryType;
use crate::transport::{REPORT_SIZE, Transport};
use log::{debug, info, trace, warn};
use std::fmt;
use std::time::Duration;

/// Start a bootloader session.
pub const OP_INIT: u8 = 1;

/// Write part of a page.
pub const OP_FILLPAGE: u8 = 2;

/// Leave the bootloader.
pub const OP_EXIT: u8 = 3;

/// Status value acknowledging INIT.
pub const INIT_ACK: u8 = 255;

/// Status value acknowledging EXIT.
pub const EXIT_ACK: u8 = 254;

/// Page bytes carried by one FILLPAGE frame.
pub const FRAME_PAYLOAD: usize = 34;

/// Set on the first page byte for EEPROM writes.
pub const EEPROM_FLAG: u8 = 0x80;

/// Timing and geometry of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Page size in bytes.
    pub page_size: usize,
    /// How long to wait for INIT and EXIT acknowledgements.
    pub ack_timeout: Duration,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Settle delay before sending INIT.
    pub init_settle_before: Duration,
    /// Settle delay after sending INIT.
    pub init_settle_after: Duration,
    /// Extra delay before each EEPROM page.
    pub eeprom_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: 64,
            ack_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
            init_settle_before: Duration::from_millis(500),
            init_settle_after: Duration::from_secs(1),
            eeprom_settle: Duration::from_millis(200),
        }
    }
}

impl SessionConfig {
    /// Set the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the acknowledgement timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Drop all settle delays. Only meant for simulated devices.
    #[must_use]
    pub fn without_settle_delays(mut self) -> Self {
        self.init_settle_before = Duration::ZERO;
        self.init_settle_after = Duration::ZERO;
        self.eeprom_settle = Duration::ZERO;
        self
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing sent yet.
    Disconnected,
    /// INIT sent, waiting for the acknowledgement.
    Initializing,
    /// Pages may be sent.
    Programming,
    /// EXIT sent, waiting for the acknowledgement.
    Exiting,
    /// Bootloader left cleanly.
    Done,
    /// Something went wrong.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Initializing => "initializing",
            Self::Programming => "programming",
            Self::Exiting => "exiting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Number of FILLPAGE frames needed for one page.
#[allow(clippy::cast_possible_truncation)]
pub fn packets_per_page(page_size: usize) -> u8 {
    // Bounded by MAX_PAGE_SIZE, always fits.
    (page_size + PAGE_HEADER_LEN).div_ceil(FRAME_PAYLOAD) as u8
}

/// Build the INIT frame.
pub fn init_frame(cpu_address: u8, page_size: u8, packets: u8) -> [u8; 5] {
    [I2C_FORWARD_HEADER, OP_INIT, cpu_address, page_size, packets]
}

/// Build the EXIT frame.
pub fn exit_frame() -> [u8; 5] {
    [I2C_FORWARD_HEADER, OP_EXIT, 0, 0, 0]
}

/// Split a page into FILLPAGE frames.
pub fn page_frames(page: &Page, memory: MemoryType) -> Vec<Vec<u8>> {
    let mut wire = page.to_wire();
    if memory == MemoryType::Eeprom {
        wire[0] |= EEPROM_FLAG;
    }
    wire.chunks(FRAME_PAYLOAD)
        .map(|chunk| {
            let mut frame = Vec::with_capacity(2 + chunk.len());
            frame.push(I2C_FORWARD_HEADER);
            frame.push(OP_FILLPAGE);
            frame.extend_from_slice(chunk);
            frame
        })
        .collect()
}

/// Whether a status frame acknowledges a page.
pub fn is_page_ack(status: &[u8]) -> bool {
    matches!(status, [STATUS_MARKER, 0, ..])
}

/// Whether a status frame carries `expected` in its value byte.
pub fn is_status(status: &[u8], expected: u8) -> bool {
    matches!(status, [STATUS_MARKER, _, value, ..] if *value == expected)
}

/// One programming pass over a single CPU memory.
///
/// The session borrows the transport for its whole lifetime, so only one
/// session can talk to the dongle at a time.
pub struct BootloaderSession<'t, T: Transport + ?Sized, C: Clock> {
    transport: &'t mut T,
    clock: C,
    config: SessionConfig,
    state: SessionState,
    memory: MemoryType,
    initialized: bool,
    ack_counter: u8,
    pages_sent: u32,
}

impl<'t, T: Transport + ?Sized, C: Clock> BootloaderSession<'t, T, C> {
    /// Create a session over an open transport.
    pub fn new(transport: &'t mut T, clock: C, config: SessionConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            state: SessionState::Disconnected,
            memory: MemoryType::Flash,
            initialized: false,
            ack_counter: 0,
            pages_sent: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Wrapping count of acknowledged pages.
    pub fn ack_counter(&self) -> u8 {
        self.ack_counter
    }

    /// Total acknowledged pages.
    pub fn pages_sent(&self) -> u32 {
        self.pages_sent
    }

    /// Memory being programmed.
    pub fn memory(&self) -> MemoryType {
        self.memory
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn expect_state(&self, operation: &'static str, allowed: bool) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Start the bootloader of the CPU at `cpu_address`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn init(&mut self, cpu_address: u8, memory: MemoryType) -> Result<()> {
        self.expect_state("init", self.state == SessionState::Disconnected)?;
        validate_page_size(self.config.page_size)?;

        self.state = SessionState::Initializing;
        self.memory = memory;
        self.ack_counter = 0;
        self.pages_sent = 0;

        // Bounded by MAX_PAGE_SIZE.
        debug_assert!(self.config.page_size <= MAX_PAGE_SIZE);
        let page_size = self.config.page_size as u8;
        let frame = init_frame(cpu_address, page_size, packets_per_page(self.config.page_size));
        debug!("INIT bootloader {cpu_address:#04x} ({memory}, {page_size}-byte pages)");

        self.clock.sleep(self.config.init_settle_before);
        if let Err(e) = self.transport.write(&frame) {
            self.state = SessionState::Failed;
            return Err(Error::InitializationFailed(format!("cannot send INIT: {e}")));
        }
        self.clock.sleep(self.config.init_settle_after);

        if !self.wait_status(INIT_ACK, self.config.ack_timeout) {
            self.state = SessionState::Failed;
            return Err(Error::InitializationFailed(format!(
                "bootloader {cpu_address:#04x} did not answer within {:?}",
                self.config.ack_timeout
            )));
        }

        info!("Bootloader {cpu_address:#04x} ready");
        self.initialized = true;
        self.state = SessionState::Programming;
        Ok(())
    }

    /// Send one page and wait for its acknowledgement.
    pub fn send_page(&mut self, page: &Page) -> Result<()> {
        self.expect_state("send a page", self.state == SessionState::Programming)?;

        if page.data.len() != self.config.page_size {
            return Err(self.fail_page(
                page,
                &format!(
                    "{} bytes of data, expected {}",
                    page.data.len(),
                    self.config.page_size
                ),
            ));
        }

        if self.memory == MemoryType::Eeprom {
            self.clock.sleep(self.config.eeprom_settle);
        }

        for frame in page_frames(page, self.memory) {
            trace!("FILLPAGE {:02X?}", frame);
            if let Err(e) = self.transport.write(&frame) {
                return Err(self.fail_page(page, &e.to_string()));
            }
        }

        let mut status = [0u8; REPORT_SIZE];
        match self.transport.read(&mut status) {
            Ok(n) if is_page_ack(&status[..n]) => {},
            Ok(n) => {
                return Err(self.fail_page(
                    page,
                    &format!("rejected with status {:02X?}", &status[..n.min(3)]),
                ));
            },
            Err(e) => return Err(self.fail_page(page, &e.to_string())),
        }

        self.ack_counter = self.ack_counter.wrapping_add(1);
        self.pages_sent += 1;
        trace!("Page {:#06x} acknowledged ({})", page.address, self.pages_sent);
        Ok(())
    }

    fn fail_page(&mut self, page: &Page, reason: &str) -> Error {
        self.state = SessionState::Failed;
        Error::BootloadingFailed(format!("page {:#06x}: {reason}", page.address))
    }

    /// Leave the bootloader.
    ///
    /// Also allowed after a failed page, to try to leave the CPU in a sane
    /// state. A failed EXIT does not undo the pages already acknowledged.
    pub fn exit(&mut self) -> Result<()> {
        let after_failure = self.state == SessionState::Failed && self.initialized;
        self.expect_state(
            "exit",
            self.state == SessionState::Programming || after_failure,
        )?;

        self.state = SessionState::Exiting;
        debug!("EXIT bootloader after {} pages", self.pages_sent);

        let acknowledged = match self.transport.write(&exit_frame()) {
            Ok(()) => self.wait_status(EXIT_ACK, self.config.ack_timeout),
            Err(e) => {
                warn!("Cannot send EXIT: {e}");
                false
            },
        };

        if !acknowledged {
            self.state = SessionState::Failed;
            return Err(Error::BootloaderExitFailed);
        }

        self.state = if after_failure {
            SessionState::Failed
        } else {
            SessionState::Done
        };
        Ok(())
    }

    /// Poll status frames until one carries `expected` or `timeout` elapses.
    ///
    /// Read errors count as "no status yet".
    pub fn wait_status(&mut self, expected: u8, timeout: Duration) -> bool {
        let start = self.clock.now();
        let mut status = [0u8; REPORT_SIZE];
        loop {
            match self.transport.read(&mut status) {
                Ok(n) if is_status(&status[..n], expected) => return true,
                Ok(n) => trace!("Status {:02X?}, waiting for {expected:#04x}", &status[..n.min(3)]),
                Err(e) => trace!("No status yet: {e}"),
            }
            if self.clock.now().duration_since(start) > timeout {
                debug!("Timed out waiting for status {expected:#04x}");
                return false;
            }
            self.clock.sleep(self.config.poll_interval);
        }
    }
}

impl<T: Transport + ?Sized, C: Clock> PageSink for BootloaderSession<'_, T, C> {
    fn send_page(&mut self, page: &Page) -> Result<()> {
        BootloaderSession::send_page(self, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;
    use crate::image::ihex::HexFile;
    use crate::image::segment::SegmentAccumulator;
    use crate::transport::mock::MockTransport;
    use std::io::Cursor;

    const ACK_PAGE: [u8; 3] = [STATUS_MARKER, 0, 0];
    const ACK_INIT: [u8; 3] = [STATUS_MARKER, 0, INIT_ACK];
    const ACK_EXIT: [u8; 3] = [STATUS_MARKER, 0, EXIT_ACK];

    fn page(address: u16, fill: u8) -> Page {
        Page {
            address,
            data: vec![fill; 64],
        }
    }

    #[test]
    fn test_frame_builders() {
        assert_eq!(init_frame(0x30, 64, 2), [3, 1, 0x30, 64, 2]);
        assert_eq!(exit_frame(), [3, 3, 0, 0, 0]);
        assert_eq!(packets_per_page(64), 2);
        assert_eq!(packets_per_page(4), 1);
        assert_eq!(packets_per_page(128), 4);
    }

    #[test]
    fn test_page_split_into_two_frames() {
        let frames = page_frames(&page(0x1DC0, 0xAB), MemoryType::Flash);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 36);
        assert_eq!(frames[1].len(), 34);
        assert_eq!(&frames[0][..4], &[3, 2, 0x1D, 0xC0]);
        assert!(frames[0][4..].iter().all(|&b| b == 0xAB));
        assert_eq!(&frames[1][..2], &[3, 2]);
        assert!(frames[1][2..].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_eeprom_flag_on_address_high_byte() {
        let frames = page_frames(&page(0x0040, 0), MemoryType::Eeprom);
        assert_eq!(&frames[0][..4], &[3, 2, 0x80, 0x40]);
    }

    #[test]
    fn test_status_matching() {
        assert!(is_page_ack(&ACK_PAGE));
        assert!(!is_page_ack(&[0xF0, 1, 0]));
        assert!(!is_page_ack(&[0xF0]));
        assert!(is_status(&ACK_INIT, INIT_ACK));
        assert!(!is_status(&ACK_INIT, EXIT_ACK));
        assert!(!is_status(&[0x00, 0, INIT_ACK], INIT_ACK));
    }

    #[test]
    fn test_full_session() {
        let mut transport = MockTransport::new();
        transport
            .respond(&ACK_INIT)
            .respond(&ACK_PAGE)
            .respond(&ACK_PAGE)
            .respond(&ACK_EXIT);
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(&mut transport, &clock, SessionConfig::default());
        session.init(0x30, MemoryType::Flash).unwrap();
        assert_eq!(session.state(), SessionState::Programming);
        session.send_page(&page(0x0000, 1)).unwrap();
        session.send_page(&page(0x0040, 2)).unwrap();
        session.exit().unwrap();
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(session.pages_sent(), 2);

        // INIT + 2 * 2 FILLPAGE + EXIT
        assert_eq!(transport.writes.len(), 6);
        assert_eq!(transport.writes[0], vec![3, 1, 0x30, 64, 2]);
        assert_eq!(transport.writes[5], vec![3, 3, 0, 0, 0]);
        // Settle delays before and after INIT.
        assert!(clock.elapsed() >= Duration::from_millis(1500));
    }

    #[test]
    fn test_init_timeout_blocks_pages() {
        let mut transport = MockTransport::new();
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(&mut transport, &clock, SessionConfig::default());
        let err = session.init(0x31, MemoryType::Flash).unwrap_err();
        assert!(matches!(err, Error::InitializationFailed(_)));
        assert_eq!(session.state(), SessionState::Failed);

        let err = session.send_page(&page(0, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        // Exit is not attempted for a bootloader that never started.
        assert!(matches!(session.exit(), Err(Error::InvalidState { .. })));

        assert_eq!(transport.writes.len(), 1);
        assert!(clock.elapsed() > Duration::from_secs(5));
    }

    #[test]
    fn test_init_skips_foreign_status() {
        let mut transport = MockTransport::new();
        transport.respond(&[0x00, 0, 0]).respond(&[0xF0, 0, 7]).respond(&ACK_INIT);
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(&mut transport, &clock, SessionConfig::default());
        session.init(0x30, MemoryType::Flash).unwrap();
        assert_eq!(transport.reads, 3);
    }

    #[test]
    fn test_rejected_page_fails_session() {
        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT).respond(&[0xF0, 1, 0]).respond(&ACK_EXIT);
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(&mut transport, &clock, SessionConfig::default());
        session.init(0x30, MemoryType::Flash).unwrap();
        let err = session.send_page(&page(0x0080, 0)).unwrap_err();
        assert!(matches!(err, Error::BootloadingFailed(ref m) if m.contains("0x0080")));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(session.send_page(&page(0, 0)), Err(Error::InvalidState { .. })));

        // Best-effort exit still allowed, the session stays failed.
        session.exit().unwrap();
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_short_read_fails_page() {
        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT).respond(&[0xF0]);
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(&mut transport, &clock, SessionConfig::default());
        session.init(0x30, MemoryType::Flash).unwrap();
        assert!(matches!(
            session.send_page(&page(0, 0)),
            Err(Error::BootloadingFailed(_))
        ));
    }

    #[test]
    fn test_exit_timeout_keeps_written_pages() {
        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT).respond(&ACK_PAGE);
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(&mut transport, &clock, SessionConfig::default());
        session.init(0x30, MemoryType::Flash).unwrap();
        session.send_page(&page(0, 0)).unwrap();
        assert!(matches!(session.exit(), Err(Error::BootloaderExitFailed)));
        assert_eq!(session.pages_sent(), 1);
    }

    #[test]
    fn test_eeprom_pages_wait_before_sending() {
        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT).respond(&ACK_PAGE);
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(
            &mut transport,
            &clock,
            SessionConfig::default().without_settle_delays(),
        );
        session.init(0x31, MemoryType::Eeprom).unwrap();
        let before = clock.sleeps();
        session.send_page(&page(0, 0)).unwrap();
        assert_eq!(clock.sleeps(), before + 1);
        assert_eq!(transport.writes[1][2] & EEPROM_FLAG, EEPROM_FLAG);
    }

    #[test]
    fn test_ack_counter_wraps() {
        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT);
        for _ in 0..300 {
            transport.respond(&ACK_PAGE);
        }
        let clock = MockClock::new();

        let mut session = BootloaderSession::new(
            &mut transport,
            &clock,
            SessionConfig::default().with_page_size(4).without_settle_delays(),
        );
        session.init(0x30, MemoryType::Flash).unwrap();
        let mut previous = session.ack_counter();
        let mut wraps = 0;
        for i in 0..300u16 {
            let p = Page {
                address: i * 4,
                data: vec![0; 4],
            };
            session.send_page(&p).unwrap();
            let current = session.ack_counter();
            assert_eq!(current, previous.wrapping_add(1));
            if current < previous {
                wraps += 1;
            }
            previous = current;
        }
        assert_eq!(wraps, 1);
        assert_eq!(session.ack_counter(), (300 % 256) as u8);
        assert_eq!(session.pages_sent(), 300);
    }

    #[test]
    fn test_accumulator_streams_into_session() {
        let text = ":04000000DEADBEEFC4\n:00000001FF\n";
        let hex = HexFile::parse(Cursor::new(text)).unwrap();

        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT).respond(&ACK_PAGE).respond(&ACK_EXIT);
        let clock = MockClock::new();
        let config = SessionConfig::default().with_page_size(4).without_settle_delays();

        let mut session = BootloaderSession::new(&mut transport, &clock, config);
        session.init(0x30, MemoryType::Flash).unwrap();
        let mut accumulator = SegmentAccumulator::new(&mut session, 4).unwrap();
        hex.feed(&mut accumulator).unwrap();
        assert_eq!(accumulator.pages_flushed(), 1);
        session.exit().unwrap();

        assert_eq!(transport.writes[1], vec![3, 2, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]);
    }
}

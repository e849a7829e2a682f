//! High-level programming of prepared jobs over one dongle connection.

use crate::clock::Clock;
use crate::dongle::{self, DongleVersion};
use crate::error::{Error, Result};
use crate::image::segment::{Page, PageSink, SegmentAccumulator};
use crate::job::PreparedJob;
use crate::protocol::{BootloaderSession, SessionConfig};
use crate::transport::Transport;
use log::{debug, info, warn};

/// Outcome of a programming pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramReport {
    /// Pages acknowledged by the bootloader.
    pub pages: u32,
    /// Whether the bootloader acknowledged EXIT.
    pub exit_acknowledged: bool,
}

/// Drives bootloader sessions over an open transport.
pub struct Flasher<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    config: SessionConfig,
    dongle_version: Option<DongleVersion>,
    released: bool,
}

impl<T: Transport, C: Clock> Flasher<T, C> {
    /// Create a flasher with the default session settings.
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            config: SessionConfig::default(),
            dongle_version: None,
            released: false,
        }
    }

    /// Replace the session settings.
    #[must_use]
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Session settings in use.
    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Dongle firmware version, once [`Flasher::check_dongle`] succeeded.
    pub fn dongle_version(&self) -> Option<DongleVersion> {
        self.dongle_version
    }

    /// Query the dongle firmware and refuse versions that are too old.
    ///
    /// The answer is cached for the lifetime of the flasher.
    pub fn check_dongle(&mut self) -> Result<DongleVersion> {
        if let Some(version) = self.dongle_version {
            return Ok(version);
        }
        let version = dongle::query_version(&mut self.transport, &self.clock)?;
        dongle::ensure_supported(version)?;
        self.dongle_version = Some(version);
        Ok(version)
    }

    /// Program one job, calling `on_page` with the running page count after
    /// every acknowledged page.
    ///
    /// EXIT is always attempted once INIT succeeded. When programming fails
    /// the programming error is returned; an unacknowledged EXIT after a
    /// clean pass is only reported in the returned [`ProgramReport`].
    pub fn program<F>(&mut self, job: &PreparedJob, mut on_page: F) -> Result<ProgramReport>
    where
        F: FnMut(u32),
    {
        let address = match job.bootloader_address {
            Some(address) => address,
            None => job.cpu.bootloader_address_for(job.memory)?,
        };
        info!(
            "Programming {} into {} {}",
            job.path().display(),
            job.cpu,
            job.memory
        );

        let mut session =
            BootloaderSession::new(&mut self.transport, &self.clock, self.config.clone());
        session.init(address, job.memory)?;

        let streamed = {
            let mut sink = Reporting {
                inner: &mut session,
                pages: 0,
                on_page: &mut on_page,
            };
            SegmentAccumulator::new(&mut sink, self.config.page_size)
                .and_then(|mut accumulator| job.image.hex().feed(&mut accumulator))
        };
        let pages = session.pages_sent();
        let exit = session.exit();

        match (streamed, exit) {
            (Ok(()), Ok(())) => {
                debug!("{pages} pages written");
                Ok(ProgramReport {
                    pages,
                    exit_acknowledged: true,
                })
            },
            (Ok(()), Err(e)) => {
                warn!("{e}, the {pages} pages written are kept");
                Ok(ProgramReport {
                    pages,
                    exit_acknowledged: false,
                })
            },
            (Err(e), exit) => {
                if let Err(exit_error) = exit {
                    debug!("EXIT after failure: {exit_error}");
                }
                Err(e)
            },
        }
    }

    /// Switch the dongle to DFU mode.
    pub fn enter_dfu_mode(&mut self) -> Result<()> {
        dongle::enter_dfu_mode(&mut self.transport)
    }

    /// Release the device. Later calls are no-ops.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.transport.release()
    }
}

impl<T: Transport, C: Clock> Drop for Flasher<T, C> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Error releasing the dongle: {e}");
        }
    }
}

struct Reporting<'a, S, F> {
    inner: S,
    pages: u32,
    on_page: &'a mut F,
}

impl<S: PageSink, F: FnMut(u32)> PageSink for Reporting<'_, S, F> {
    fn send_page(&mut self, page: &Page) -> std::result::Result<(), Error> {
        self.inner.send_page(page)?;
        self.pages += 1;
        (self.on_page)(self.pages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;
    use crate::image::FirmwareImage;
    use crate::job::{JobKind, ProgramJob};
    use crate::protocol::STATUS_MARKER;
    use crate::protocol::bootloader::{EXIT_ACK, INIT_ACK};
    use crate::target::{Cpu, MemoryType};
    use crate::transport::mock::MockTransport;

    const ACK_PAGE: [u8; 3] = [STATUS_MARKER, 0, 0];
    const ACK_INIT: [u8; 3] = [STATUS_MARKER, 0, INIT_ACK];
    const ACK_EXIT: [u8; 3] = [STATUS_MARKER, 0, EXIT_ACK];

    fn eeprom_job(content: &str) -> PreparedJob {
        PreparedJob {
            job: ProgramJob {
                path: "tuxcore.eep".into(),
                kind: JobKind::Eeprom(Cpu::TuxCore),
            },
            cpu: Cpu::TuxCore,
            memory: MemoryType::Eeprom,
            bootloader_address: Some(0x30),
            image: FirmwareImage::from_bytes("tuxcore.eep", content.as_bytes(), 64).unwrap(),
        }
    }

    fn flasher(transport: MockTransport) -> Flasher<MockTransport, MockClock> {
        Flasher::new(transport, MockClock::new())
            .with_session_config(SessionConfig::default().without_settle_delays())
    }

    #[test]
    fn test_program_single_page() {
        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT).respond(&ACK_PAGE).respond(&ACK_EXIT);
        let mut flasher = flasher(transport);

        let mut seen = Vec::new();
        let report = flasher
            .program(&eeprom_job(":04000000DEADBEEFC4\n:00000001FF\n"), |n| seen.push(n))
            .unwrap();

        assert_eq!(report, ProgramReport { pages: 1, exit_acknowledged: true });
        assert_eq!(seen, vec![1]);
        let writes = &flasher.transport_mut().writes;
        // INIT, two FILLPAGE packets, EXIT.
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0][2], 0x30);
    }

    #[test]
    fn test_program_init_failure_sends_nothing_else() {
        let mut flasher = flasher(MockTransport::new());
        let err = flasher
            .program(&eeprom_job(":04000000DEADBEEFC4\n:00000001FF\n"), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::InitializationFailed(_)));
        assert_eq!(flasher.transport_mut().writes.len(), 1);
    }

    #[test]
    fn test_program_page_failure_still_exits() {
        let mut transport = MockTransport::new();
        transport
            .respond(&ACK_INIT)
            .respond(&[STATUS_MARKER, 0, 7])
            .respond(&ACK_EXIT);
        let mut flasher = flasher(transport);

        let err = flasher
            .program(&eeprom_job(":04000000DEADBEEFC4\n:00000001FF\n"), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::BootloadingFailed(_)));
        let last = flasher.transport_mut().writes.last().cloned().unwrap();
        assert_eq!(last[1], crate::protocol::bootloader::OP_EXIT);
    }

    #[test]
    fn test_program_unacknowledged_exit_is_reported() {
        let mut transport = MockTransport::new();
        transport.respond(&ACK_INIT).respond(&ACK_PAGE);
        let mut flasher = flasher(transport);

        let report = flasher
            .program(&eeprom_job(":04000000DEADBEEFC4\n:00000001FF\n"), |_| {})
            .unwrap();
        assert_eq!(report.pages, 1);
        assert!(!report.exit_acknowledged);
    }

    #[test]
    fn test_check_dongle_caches_version() {
        let mut block = vec![0u8; 64];
        block[..4].copy_from_slice(&[dongle::FUXUSB_VERSION_CMD, 0, 5, 2]);
        let mut transport = MockTransport::new();
        transport.respond(&block);
        let mut flasher = flasher(transport);
        assert_eq!(flasher.dongle_version(), None);

        assert_eq!(flasher.check_dongle().unwrap(), DongleVersion { minor: 5, update: 2 });
        assert_eq!(flasher.check_dongle().unwrap(), DongleVersion { minor: 5, update: 2 });
        assert_eq!(flasher.dongle_version(), Some(DongleVersion { minor: 5, update: 2 }));
        assert_eq!(flasher.transport_mut().writes.len(), 1);
    }

    #[test]
    fn test_check_dongle_rejects_old_firmware() {
        let mut block = vec![0u8; 64];
        block[..4].copy_from_slice(&[dongle::FUXUSB_VERSION_CMD, 0, 5, 1]);
        let mut transport = MockTransport::new();
        transport.respond(&block);
        let mut flasher = flasher(transport);

        let err = flasher.check_dongle().unwrap_err();
        assert_eq!(err.exit_status(), crate::ExitStatus::FirmwareTooOld);
        assert_eq!(flasher.dongle_version(), None);
    }

    #[test]
    fn test_enter_dfu_mode_skips_version_query() {
        let mut flasher = flasher(MockTransport::new());
        flasher.enter_dfu_mode().unwrap();
        assert_eq!(flasher.transport_mut().writes, vec![dongle::ENTER_DFU_FRAME.to_vec()]);
        assert_eq!(flasher.dongle_version(), None);
    }

    #[test]
    fn test_release_once() {
        let mut flasher = flasher(MockTransport::new());
        flasher.release().unwrap();
        flasher.release().unwrap();
        assert!(flasher.transport_mut().released);
    }
}

//! Flash, main and all command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tuxflash::progress::HASH_MARKS;
use tuxflash::transport::{self, Transport};
use tuxflash::{
    Batch, Clock, ExitStatus, Flasher, HashProgress, PreparedJob, ProgramJob, SessionConfig,
    SystemClock,
};

use crate::config::Config;
use crate::dfu::{DfuProgrammer, reenumeration_delay};
use crate::driver::DriverNotifier;
use crate::{Cli, CliError, use_fancy_output};

type DongleFlasher = Flasher<Box<dyn Transport>, SystemClock>;

/// Batch command implementation.
pub(crate) fn cmd_batch(cli: &Cli, config: &Config, batch: Batch, dir: &Path) -> Result<ExitStatus> {
    if !dir.is_dir() {
        return Err(CliError::Usage(format!("{} is not a directory", dir.display())).into());
    }
    cmd_program(cli, config, &batch.files(dir))
}

/// Program a list of files.
///
/// A file that cannot be used is reported and skipped, and the run ends with
/// its exit status. Any other failure stops the run. The dongle is released
/// and the driver restarted in every case.
pub(crate) fn cmd_program(cli: &Cli, config: &Config, files: &[PathBuf]) -> Result<ExitStatus> {
    let started = Instant::now();
    let mut run = ProgramRun::new(cli, config);

    let outcome = run.program_files(files);
    let cleanup = run.finish();

    if !cli.pretend {
        info!("Elapsed time: {:.1}s", started.elapsed().as_secs_f64());
    }

    let status = outcome?;
    cleanup?;
    Ok(status)
}

struct ProgramRun<'a> {
    cli: &'a Cli,
    config: &'a Config,
    session: SessionConfig,
    flasher: Option<DongleFlasher>,
    stopped_driver: Option<DriverNotifier>,
    first_failure: Option<ExitStatus>,
}

impl<'a> ProgramRun<'a> {
    fn new(cli: &'a Cli, config: &'a Config) -> Self {
        Self {
            cli,
            config,
            session: config.session_config(),
            flasher: None,
            stopped_driver: None,
            first_failure: None,
        }
    }

    fn program_files(&mut self, files: &[PathBuf]) -> Result<ExitStatus> {
        for path in files {
            let prepared = match ProgramJob::classify(path)
                .and_then(|job| job.prepare(self.session.page_size))
            {
                Ok(prepared) => prepared,
                Err(e) if e.is_file_local() => {
                    self.report_fail(path, &e.to_string());
                    self.first_failure.get_or_insert(e.exit_status());
                    continue;
                },
                Err(e) => return Err(e).with_context(|| format!("Cannot load {}", path.display())),
            };

            if self.cli.pretend {
                self.report_pretend(&prepared);
                continue;
            }

            if prepared.uses_dfu() {
                self.program_dfu(&prepared)
            } else {
                self.program_bootloader(&prepared)
            }
            .with_context(|| format!("Programming {} failed", path.display()))?;
        }
        Ok(self.first_failure.unwrap_or(ExitStatus::Success))
    }

    /// Dongle connection with the firmware version checked.
    fn flasher(&mut self) -> Result<&mut DongleFlasher> {
        let quiet = self.cli.quiet;
        let flasher = self.open()?;
        if flasher.dongle_version().is_none() {
            let version = flasher.check_dongle()?;
            if !quiet {
                eprintln!("{} Dongle firmware {version}", style("✓").green());
            }
        }
        Ok(flasher)
    }

    /// Dongle connection, opened on first use.
    fn open(&mut self) -> Result<&mut DongleFlasher> {
        let flasher = match self.flasher.take() {
            Some(flasher) => flasher,
            None => self.connect()?,
        };
        Ok(self.flasher.insert(flasher))
    }

    fn connect(&mut self) -> Result<DongleFlasher> {
        if self.config.driver_notify() && self.stopped_driver.is_none() {
            let driver = DriverNotifier::new(self.config.driver_port());
            driver.stop()?;
            self.stopped_driver = Some(driver);
        }

        if !self.cli.quiet {
            eprintln!("{} Waiting for the dongle...", style("⏳").yellow());
        }
        let transport = transport::connect(&self.config.connect_options(), &SystemClock)?;
        Ok(Flasher::new(transport, SystemClock).with_session_config(self.session.clone()))
    }

    fn program_bootloader(&mut self, prepared: &PreparedJob) -> Result<()> {
        let fancy = !self.cli.quiet && use_fancy_output();
        let label = job_label(prepared);
        if !self.cli.quiet {
            eprintln!("{} {label}", style("→").cyan());
        }

        let flasher = self.flasher()?;
        let pb = progress_bar(fancy);
        let mut marks = HashProgress::new(prepared.image.progress_step());

        let result = flasher.program(prepared, |pages| {
            pb.inc(u64::from(marks.advance(pages)));
        });

        match result {
            Ok(report) => {
                pb.finish_and_clear();
                if !report.exit_acknowledged {
                    warn!("The bootloader did not acknowledge EXIT, the CPU may need a reset");
                }
                self.report_ok(&label, &format!("{} pages", report.pages));
                Ok(())
            },
            Err(e) => {
                pb.abandon();
                self.report_fail(prepared.path(), &e.to_string());
                Err(e.into())
            },
        }
    }

    fn program_dfu(&mut self, prepared: &PreparedJob) -> Result<()> {
        let label = job_label(prepared);
        if !self.cli.quiet {
            eprintln!("{} {label}", style("→").cyan());
        }

        let dfu = DfuProgrammer::new(self.config.dfu_program(), self.config.dfu_target());
        if dfu.probe()? {
            info!("Dongle already in DFU mode");
        } else {
            // No version gate on this path.
            let flasher = self.open()?;
            let kind = flasher.transport_mut().kind();
            flasher.enter_dfu_mode()?;

            // The dongle leaves the bus and comes back as a DFU device.
            if let Some(mut flasher) = self.flasher.take() {
                flasher.release()?;
            }
            SystemClock.sleep(reenumeration_delay(kind));
        }

        if let Err(e) = dfu.program(prepared.path()) {
            self.report_fail(prepared.path(), &e.to_string());
            return Err(e.into());
        }
        self.report_ok(&label, "DFU");
        Ok(())
    }

    /// Release the dongle and restart the driver.
    fn finish(&mut self) -> Result<()> {
        let released = self.flasher.take().map_or(Ok(()), |mut flasher| flasher.release());
        let restarted = self.stopped_driver.take().map_or(Ok(()), DriverNotifier::start);
        released.context("Cannot release the dongle")?;
        restarted?;
        Ok(())
    }

    fn report_ok(&self, label: &str, detail: &str) {
        if !self.cli.quiet {
            eprintln!(
                "{} {label} ({detail})",
                style("OK").green().bold()
            );
        }
    }

    fn report_fail(&self, path: &Path, reason: &str) {
        eprintln!(
            "{} {}: {reason}",
            style("FAIL").red().bold(),
            path.display()
        );
    }

    fn report_pretend(&self, prepared: &PreparedJob) {
        if !self.cli.quiet {
            eprintln!("{} {}", style("[pretend]").dim(), job_label(prepared));
        }
    }
}

fn job_label(prepared: &PreparedJob) -> String {
    let target = match prepared.bootloader_address {
        Some(address) => format!("{} {} (bootloader {address:#04x})", prepared.cpu, prepared.memory),
        None => format!("{} via DFU", prepared.cpu),
    };
    let version = prepared
        .image
        .version()
        .map(|v| format!(" v{v}"))
        .unwrap_or_default();
    format!("{}{version} -> {target}", prepared.path().display())
}

fn progress_bar(fancy: bool) -> ProgressBar {
    if !fancy {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(u64::from(HASH_MARKS));
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("  [{elapsed_precise}] [{bar:60.cyan/blue}] {percent}%")
    {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

//! USB CPU programming through an external DFU programmer.

use crate::CliError;
use log::{debug, info};
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tuxflash::TransportKind;

/// Time for the dongle to re-enumerate as a DFU device.
pub(crate) fn reenumeration_delay(kind: TransportKind) -> Duration {
    match kind {
        TransportKind::Hid => Duration::from_secs(5),
        TransportKind::Usb => Duration::from_secs(3),
    }
}

/// Wrapper around the `dfu-programmer` command line.
#[derive(Debug, Clone)]
pub(crate) struct DfuProgrammer {
    program: String,
    target: String,
}

impl DfuProgrammer {
    pub(crate) fn new(program: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target: target.into(),
        }
    }

    /// Ask the programmer for the bootloader version.
    ///
    /// Returns whether a DFU device answered, i.e. the dongle is already in
    /// DFU mode. Only a missing program is an error.
    pub(crate) fn probe(&self) -> Result<bool, CliError> {
        match self.spawn(&["get", "bootloader-version"][..]) {
            Ok(output) => {
                debug!(
                    "{} get bootloader-version exited with {}",
                    self.program, output.status
                );
                Ok(output.status.success())
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CliError::ExternalFlasherMissing {
                program: self.program.clone(),
            }),
            Err(e) => Err(CliError::ProgrammingFailed {
                step: format!("{} get bootloader-version", self.program),
                detail: e.to_string(),
            }),
        }
    }

    /// Programming steps for `firmware`, each one programmer invocation.
    pub(crate) fn steps(firmware: &Path) -> Vec<Vec<OsString>> {
        vec![
            vec!["erase".into()],
            vec!["flash".into(), firmware.as_os_str().to_owned()],
            vec!["configure".into(), "HSB".into(), "0x7b".into()],
            vec!["start".into()],
        ]
    }

    /// Erase, write, configure and restart the USB CPU.
    pub(crate) fn program(&self, firmware: &Path) -> Result<(), CliError> {
        for step in Self::steps(firmware) {
            let label = step
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            info!("{} {} {label}", self.program, self.target);

            let output = self.spawn(step.as_slice()).map_err(|e| CliError::ProgrammingFailed {
                step: label.clone(),
                detail: e.to_string(),
            })?;
            if !output.status.success() {
                return Err(CliError::ProgrammingFailed {
                    step: label,
                    detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
        }
        Ok(())
    }

    fn spawn<S: AsRef<std::ffi::OsStr>>(&self, args: &[S]) -> io::Result<Output> {
        Command::new(&self.program)
            .arg(&self.target)
            .args(args)
            .stdin(Stdio::null())
            .output()
    }
}

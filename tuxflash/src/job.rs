//! What to do with a firmware file.
//!
//! Files are routed by name:
//!
//! | file                        | action                                   |
//! |-----------------------------|------------------------------------------|
//! | `*fuxusb*.hex`              | USB CPU, through the external DFU tool   |
//! | any other `*.hex`           | flash of the CPU named in the image      |
//! | `*tuxcore*.eep`             | EEPROM of tuxcore                        |
//! | `*tuxaudio*.eep`            | EEPROM of tuxaudio                       |
//! | anything else               | rejected                                 |

use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::image::version::FirmwareVersion;
use crate::target::{Cpu, MemoryType};
use log::debug;
use std::fmt;
use std::path::{Path, PathBuf};

/// Files programmed by the "main" batch, in order.
pub const MAIN_FILES: [&str; 4] = ["tuxcore.hex", "tuxcore.eep", "tuxaudio.hex", "tuxaudio.eep"];

/// Files programmed by the "all" batch, in order.
pub const ALL_FILES: [&str; 7] = [
    "fuxusb.hex",
    "tuxcore.hex",
    "tuxcore.eep",
    "tuxaudio.hex",
    "tuxaudio.eep",
    "fuxrf.hex",
    "tuxrf.hex",
];

/// Predefined sets of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batch {
    /// Robot CPUs only.
    Main,
    /// Every CPU of the robot and the dongle.
    All,
}

impl Batch {
    /// File names of this batch.
    pub fn file_names(self) -> &'static [&'static str] {
        match self {
            Self::Main => &MAIN_FILES,
            Self::All => &ALL_FILES,
        }
    }

    /// Paths of this batch inside `dir`.
    pub fn files(self, dir: &Path) -> Vec<PathBuf> {
        self.file_names()
            .iter()
            .map(|name| dir.join(name))
            .collect()
    }
}

/// Routing decision for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Flash memory of the CPU named by the version marker.
    Flash,
    /// EEPROM of the given CPU.
    Eeprom(Cpu),
    /// USB CPU, programmed through DFU.
    UsbDfu,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash => write!(f, "flash"),
            Self::Eeprom(cpu) => write!(f, "{cpu} eeprom"),
            Self::UsbDfu => write!(f, "usb dfu"),
        }
    }
}

/// A file together with its routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramJob {
    /// Firmware file.
    pub path: PathBuf,
    /// Routing decision.
    pub kind: JobKind,
}

impl ProgramJob {
    /// Route a file by its name.
    pub fn classify<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        let kind = match extension.as_deref() {
            Some("hex") if name.contains("fuxusb") => JobKind::UsbDfu,
            Some("hex") => JobKind::Flash,
            Some("eep") if name.contains("tuxcore") => JobKind::Eeprom(Cpu::TuxCore),
            Some("eep") if name.contains("tuxaudio") => JobKind::Eeprom(Cpu::TuxAudio),
            _ => {
                return Err(Error::BadProgFile(format!(
                    "{} is not a .hex firmware or a tuxcore/tuxaudio .eep file",
                    path.display()
                )));
            },
        };
        debug!("{} -> {kind}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Load and check the file without touching the device.
    pub fn prepare(&self, page_size: usize) -> Result<PreparedJob> {
        let image = FirmwareImage::load(&self.path, page_size)?;
        let version = image.version();

        let (cpu, memory) = match self.kind {
            JobKind::Flash => {
                let cpu = self.marker_cpu(version)?;
                if cpu.uses_dfu() {
                    return Err(Error::BadProgFile(format!(
                        "{} is a {cpu} firmware, its name must contain \"fuxusb\"",
                        self.path.display()
                    )));
                }
                (cpu, MemoryType::Flash)
            },
            JobKind::Eeprom(cpu) => (cpu, MemoryType::Eeprom),
            JobKind::UsbDfu => {
                let cpu = self.marker_cpu(version)?;
                if !cpu.uses_dfu() {
                    return Err(Error::BadProgFile(format!(
                        "{} is a {cpu} firmware, not a fuxusb one",
                        self.path.display()
                    )));
                }
                (cpu, MemoryType::Flash)
            },
        };

        let bootloader_address = if cpu.uses_dfu() {
            None
        } else {
            Some(cpu.bootloader_address_for(memory)?)
        };

        Ok(PreparedJob {
            job: self.clone(),
            cpu,
            memory,
            bootloader_address,
            image,
        })
    }

    fn marker_cpu(&self, version: Option<FirmwareVersion>) -> Result<Cpu> {
        let version = version.ok_or_else(|| {
            Error::BadProgFile(format!(
                "{} has no version marker, it is not a Tux Droid firmware",
                self.path.display()
            ))
        })?;
        Cpu::from_number(version.cpu_number).ok_or_else(|| {
            Error::BadProgFile(format!(
                "{} targets unknown CPU number {}",
                self.path.display(),
                version.cpu_number
            ))
        })
    }
}

/// A validated job, ready to be sent to the device.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    /// Source job.
    pub job: ProgramJob,
    /// Target CPU.
    pub cpu: Cpu,
    /// Target memory.
    pub memory: MemoryType,
    /// Bootloader address, `None` for DFU jobs.
    pub bootloader_address: Option<u8>,
    /// Loaded image.
    pub image: FirmwareImage,
}

impl PreparedJob {
    /// Whether the job goes through the external DFU tool.
    pub fn uses_dfu(&self) -> bool {
        self.job.kind == JobKind::UsbDfu
    }

    /// Firmware file.
    pub fn path(&self) -> &Path {
        &self.job.path
    }
}

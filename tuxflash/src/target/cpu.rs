//! The Tux Droid CPUs and how each one is programmed.

use crate::error::{Error, Result};
use std::fmt;

/// Memory region targeted by an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryType {
    /// Program flash.
    #[default]
    Flash,
    /// Data EEPROM.
    Eeprom,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash => write!(f, "FLASH"),
            Self::Eeprom => write!(f, "EEPROM"),
        }
    }
}

/// CPUs found in the robot and its dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cpu {
    /// Main behaviour CPU in the robot.
    TuxCore,
    /// Sound CPU in the robot.
    TuxAudio,
    /// Radio CPU in the robot.
    TuxRf,
    /// Radio CPU in the dongle.
    FuxRf,
    /// USB interface CPU in the dongle.
    FuxUsb,
}

/// Static description of a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTarget {
    /// CPU.
    pub cpu: Cpu,
    /// 3-bit identifier found in the firmware version marker.
    pub number: u8,
    /// Address of the bootloader on the internal I2C bus. `None` for the
    /// USB CPU, which is programmed through DFU.
    pub bootloader_address: Option<u8>,
    /// Memories accepted by the bootloader.
    pub memories: &'static [MemoryType],
}

const FLASH_AND_EEPROM: &[MemoryType] = &[MemoryType::Flash, MemoryType::Eeprom];
const FLASH_ONLY: &[MemoryType] = &[MemoryType::Flash];

/// All known CPUs.
pub const CPU_TABLE: [CpuTarget; 5] = [
    CpuTarget {
        cpu: Cpu::TuxCore,
        number: 0,
        bootloader_address: Some(0x30),
        memories: FLASH_AND_EEPROM,
    },
    CpuTarget {
        cpu: Cpu::TuxAudio,
        number: 1,
        bootloader_address: Some(0x31),
        memories: FLASH_AND_EEPROM,
    },
    CpuTarget {
        cpu: Cpu::TuxRf,
        number: 2,
        bootloader_address: Some(0x32),
        memories: FLASH_ONLY,
    },
    CpuTarget {
        cpu: Cpu::FuxRf,
        number: 3,
        bootloader_address: Some(0x33),
        memories: FLASH_ONLY,
    },
    CpuTarget {
        cpu: Cpu::FuxUsb,
        number: 4,
        bootloader_address: None,
        memories: &[],
    },
];

impl Cpu {
    /// All CPUs in table order.
    pub const ALL: [Self; 5] = [
        Self::TuxCore,
        Self::TuxAudio,
        Self::TuxRf,
        Self::FuxRf,
        Self::FuxUsb,
    ];

    /// Table entry of this CPU.
    pub fn target(self) -> &'static CpuTarget {
        // Table order matches the enum order.
        &CPU_TABLE[self as usize]
    }

    /// Look a CPU up by the identifier found in a version marker.
    pub fn from_number(number: u8) -> Option<Self> {
        CPU_TABLE
            .iter()
            .find(|t| t.number == number)
            .map(|t| t.cpu)
    }

    /// Get the CPU from its firmware file stem.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "tuxcore" | "core" => Some(Self::TuxCore),
            "tuxaudio" | "audio" => Some(Self::TuxAudio),
            "tuxrf" => Some(Self::TuxRf),
            "fuxrf" => Some(Self::FuxRf),
            "fuxusb" | "usb" => Some(Self::FuxUsb),
            _ => None,
        }
    }

    /// Whether the CPU is flashed by the external DFU utility.
    pub fn uses_dfu(self) -> bool {
        self.target().bootloader_address.is_none()
    }

    /// Whether the bootloader accepts `memory`.
    pub fn supports(self, memory: MemoryType) -> bool {
        self.target().memories.contains(&memory)
    }

    /// I2C address of the bootloader for an upload to `memory`.
    pub fn bootloader_address_for(self, memory: MemoryType) -> Result<u8> {
        match self.target().bootloader_address {
            Some(address) if self.supports(memory) => Ok(address),
            _ => Err(Error::UnsupportedMemory { cpu: self, memory }),
        }
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TuxCore => write!(f, "tuxcore"),
            Self::TuxAudio => write!(f, "tuxaudio"),
            Self::TuxRf => write!(f, "tuxrf"),
            Self::FuxRf => write!(f, "fuxrf"),
            Self::FuxUsb => write!(f, "fuxusb"),
        }
    }
}

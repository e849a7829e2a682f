//! Configuration file support for tuxflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Explicit `--config PATH` (replaces the two files below)
//! 3. Local config file (./tuxflash.toml)
//! 4. Global config file (~/.config/tuxflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tuxflash::{ConnectOptions, SessionConfig};

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "tuxflash.toml";

/// USB identification of the dongle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DongleConfig {
    /// USB vendor ID.
    pub vendor_id: Option<u16>,
    /// USB product ID.
    pub product_id: Option<u16>,
}

/// Bootloader session tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSection {
    /// Seconds to wait for INIT and EXIT acknowledgements.
    pub ack_timeout_secs: Option<u64>,
    /// Bootloader page size in bytes.
    pub page_size: Option<usize>,
}

/// External DFU programmer used for the USB CPU.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DfuConfig {
    /// Program name or path.
    pub program: Option<String>,
    /// Target device name passed to the programmer.
    pub target: Option<String>,
}

/// Notification of the local Tux Droid driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverConfig {
    /// Whether to stop and restart the driver around a run.
    pub notify: Option<bool>,
    /// TCP port of the driver on localhost.
    pub port: Option<u16>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Dongle identification.
    #[serde(default)]
    pub dongle: DongleConfig,
    /// Session settings.
    #[serde(default)]
    pub session: SessionSection,
    /// DFU programmer settings.
    #[serde(default)]
    pub dfu: DfuConfig,
    /// Driver notification settings.
    #[serde(default)]
    pub driver: DriverConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| warn!("Failed to parse config file {}: {e}", path.display()))
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {e}", path.display());
                None
            },
        }
    }

    /// Parse TOML configuration text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tuxflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.dongle.vendor_id, other.dongle.vendor_id);
        take(&mut self.dongle.product_id, other.dongle.product_id);
        take(&mut self.session.ack_timeout_secs, other.session.ack_timeout_secs);
        take(&mut self.session.page_size, other.session.page_size);
        take(&mut self.dfu.program, other.dfu.program);
        take(&mut self.dfu.target, other.dfu.target);
        take(&mut self.driver.notify, other.driver.notify);
        take(&mut self.driver.port, other.driver.port);
    }

    /// Device discovery settings.
    pub fn connect_options(&self) -> ConnectOptions {
        let defaults = ConnectOptions::default();
        ConnectOptions {
            vendor_id: self.dongle.vendor_id.unwrap_or(defaults.vendor_id),
            product_id: self.dongle.product_id.unwrap_or(defaults.product_id),
            ..defaults
        }
    }

    /// Bootloader session settings.
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::default();
        if let Some(page_size) = self.session.page_size {
            session = session.with_page_size(page_size);
        }
        if let Some(secs) = self.session.ack_timeout_secs {
            session = session.with_ack_timeout(Duration::from_secs(secs));
        }
        session
    }

    /// DFU programmer command name.
    pub fn dfu_program(&self) -> &str {
        self.dfu.program.as_deref().unwrap_or("dfu-programmer")
    }

    /// DFU target device name.
    pub fn dfu_target(&self) -> &str {
        self.dfu.target.as_deref().unwrap_or("at89c5130")
    }

    /// Whether the driver should be stopped during a run.
    pub fn driver_notify(&self) -> bool {
        self.driver.notify.unwrap_or(true)
    }

    /// TCP port of the driver.
    pub fn driver_port(&self) -> u16 {
        self.driver.port.unwrap_or(270)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connect_options().vendor_id, 0x03EB);
        assert_eq!(config.connect_options().product_id, 0xFF07);
        assert_eq!(config.session_config().page_size, 64);
        assert_eq!(config.dfu_program(), "dfu-programmer");
        assert_eq!(config.dfu_target(), "at89c5130");
        assert!(config.driver_notify());
        assert_eq!(config.driver_port(), 270);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [dongle]
            vendor_id = 0x1234
            product_id = 0x5678

            [session]
            ack_timeout_secs = 2
            page_size = 128

            [dfu]
            program = "/opt/bin/dfu-programmer"

            [driver]
            notify = false
            port = 2700
            "#,
        )
        .unwrap();

        assert_eq!(config.connect_options().vendor_id, 0x1234);
        assert_eq!(config.connect_options().product_id, 0x5678);
        let session = config.session_config();
        assert_eq!(session.page_size, 128);
        assert_eq!(session.ack_timeout, Duration::from_secs(2));
        assert_eq!(config.dfu_program(), "/opt/bin/dfu-programmer");
        assert_eq!(config.dfu_target(), "at89c5130");
        assert!(!config.driver_notify());
        assert_eq!(config.driver_port(), 2700);
    }

    #[test]
    fn test_parse_partial_config() {
        let config = Config::parse("[session]\npage_size = 32\n").unwrap();
        assert_eq!(config.session_config().page_size, 32);
        assert!(config.dongle.vendor_id.is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(Config::parse("[driver]\nport = \"http\"\n").is_err());
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut base = Config::parse("[dfu]\nprogram = \"a\"\ntarget = \"t\"\n").unwrap();
        let over = Config::parse("[dfu]\nprogram = \"b\"\n[driver]\nnotify = false\n").unwrap();
        base.merge(over);

        assert_eq!(base.dfu_program(), "b");
        assert_eq!(base.dfu_target(), "t");
        assert!(!base.driver_notify());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[driver]\nport = 9999\n").unwrap();

        assert_eq!(Config::load_from_path(&path).driver_port(), 9999);
    }

    #[test]
    fn test_load_from_missing_or_invalid_path_uses_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(
            Config::load_from_path(&dir.path().join("missing.toml")),
            Config::default()
        );

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "this is not toml [").unwrap();
        assert_eq!(Config::load_from_path(&bad), Config::default());
    }

    #[test]
    fn test_global_config_path_ends_with_config_toml() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}

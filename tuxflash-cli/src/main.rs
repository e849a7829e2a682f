//! tuxflash CLI - Command-line tool for reprogramming the Tux Droid CPUs.
//!
//! ## Features
//!
//! - Program HEX and EEPROM images through the dongle bootloaders
//! - Program the dongle USB CPU through `dfu-programmer`
//! - Predefined batches for the robot CPUs and for the whole set
//! - Pretend mode to validate and route files without touching the device
//! - Shell completion generation

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tuxflash::{Batch, ExitStatus};

mod commands;
mod config;
mod dfu;
mod driver;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if colors and progress bars should be used.
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// tuxflash - Firmware flasher for the Tux Droid robot and its USB dongle.
///
/// Environment variables:
///   TUXFLASH_CONFIG   - Path to a configuration file
///   TUXFLASH_PRETEND  - Validate and route files without programming
#[derive(Parser)]
#[command(name = "tuxflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Check and route the files but do not touch the device.
    #[arg(short, long, global = true, env = "TUXFLASH_PRETEND")]
    pretend: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH", env = "TUXFLASH_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Program the given files, in order.
    Flash {
        /// HEX (.hex) or EEPROM (.eep) files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Program tuxcore and tuxaudio (flash and EEPROM) from a directory.
    Main {
        /// Directory holding the firmware files.
        dir: PathBuf,
    },

    /// Program every CPU of the robot and the dongle from a directory.
    All {
        /// Directory holding the firmware files.
        dir: PathBuf,
    },

    /// Show how a file would be programmed.
    Info {
        /// Firmware file.
        file: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Failures raised by the command line layer itself.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Invalid invocation.
    #[error("{0}")]
    Usage(String),

    /// The DFU programmer is not installed.
    #[error("{program} not found, it is needed to program the dongle USB CPU")]
    ExternalFlasherMissing {
        /// Program that could not be launched.
        program: String,
    },

    /// A DFU programming step failed.
    #[error("DFU step `{step}` failed: {detail}")]
    ProgrammingFailed {
        /// Step that failed.
        step: String,
        /// Programmer output.
        detail: String,
    },

    /// The local driver could not be notified.
    #[error("Cannot notify the Tux Droid driver on port {port}: {source}")]
    ServerConnection {
        /// Driver port.
        port: u16,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl CliError {
    fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Usage(_) => ExitStatus::Usage,
            Self::ExternalFlasherMissing { .. } => ExitStatus::ExternalFlasherMissing,
            Self::ProgrammingFailed { .. } => ExitStatus::ProgrammingFailed,
            Self::ServerConnection { .. } => ExitStatus::ServerConnection,
        }
    }
}

/// Map an error chain onto the process exit status.
fn exit_status_of(err: &anyhow::Error) -> ExitStatus {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<CliError>()
                .map(CliError::exit_status)
                .or_else(|| {
                    cause
                        .downcast_ref::<tuxflash::Error>()
                        .map(tuxflash::Error::exit_status)
                })
        })
        .unwrap_or(ExitStatus::Usage)
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<ExitStatus> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash { files } => commands::program::cmd_program(cli, &config, files),
        Commands::Main { dir } => commands::program::cmd_batch(cli, &config, Batch::Main, dir),
        Commands::All { dir } => commands::program::cmd_batch(cli, &config, Batch::All, dir),
        Commands::Info { file, json } => {
            commands::info::cmd_info(&config, file, *json)?;
            Ok(ExitStatus::Success)
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(ExitStatus::Success)
        },
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "tuxflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(status) => status.into(),
        Err(err) => {
            let status = exit_status_of(&err);
            eprintln!("{} {err:#}", style("Error:").red().bold());
            debug!("Exit status {status}");
            status.into()
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from(["tuxflash", "flash", "tuxcore.hex", "tuxcore.eep"]).unwrap();
        if let Commands::Flash { files } = cli.command {
            assert_eq!(files, vec![PathBuf::from("tuxcore.hex"), PathBuf::from("tuxcore.eep")]);
        } else {
            panic!("Expected Flash command");
        }
    }

    #[test]
    fn test_cli_flash_requires_files() {
        assert!(Cli::try_parse_from(["tuxflash", "flash"]).is_err());
    }

    #[test]
    fn test_cli_parse_batches() {
        let cli = Cli::try_parse_from(["tuxflash", "main", "fw"]).unwrap();
        assert!(matches!(cli.command, Commands::Main { .. }));
        let cli = Cli::try_parse_from(["tuxflash", "all", "fw"]).unwrap();
        assert!(matches!(cli.command, Commands::All { .. }));
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["tuxflash", "info", "--json", "tuxrf.hex"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true, .. }));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "tuxflash",
            "-vv",
            "--quiet",
            "--pretend",
            "--config",
            "/tmp/tuxflash.toml",
            "main",
            "fw",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.pretend);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/tuxflash.toml")));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["tuxflash"]).is_err());
    }

    #[test]
    fn test_exit_status_walks_context_chain() {
        let err = anyhow::Error::new(tuxflash::Error::DeviceNotFound).context("connecting");
        assert_eq!(exit_status_of(&err), ExitStatus::DeviceNotFound);

        let err = anyhow::Error::new(CliError::ExternalFlasherMissing {
            program: "dfu-programmer".into(),
        });
        assert_eq!(exit_status_of(&err), ExitStatus::ExternalFlasherMissing);

        assert_eq!(exit_status_of(&anyhow::anyhow!("other")), ExitStatus::Usage);
    }
}

//! teensyrom CLI - Command-line tool for driving a TeensyROM cartridge.
//!
//! ## Features
//!
//! - List serial ports and spot the cartridge among them
//! - Ping and reset the cartridge
//! - Upload files to SD or USB storage and launch them
//! - Check a firmware version string offline
//! - Watch the connection: reconnects, alerts and device output
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use teensyrom::StorageTarget;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use config::Config;

/// teensyrom - Talk to a TeensyROM cartridge over USB serial.
///
/// Environment variables:
///   TEENSYROM_PORT     - Serial port to try first
///   TEENSYROM_BAUD     - Baud rate (default: 115200)
///   TEENSYROM_STORAGE  - Default storage target (sd, usb)
#[derive(Parser)]
#[command(name = "teensyrom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/SensoriumEmbedded/TeensyROM")]
pub(crate) struct Cli {
    /// Serial port to try first (auto-detected if not specified).
    #[arg(short, long, global = true, env = "TEENSYROM_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "TEENSYROM_BAUD")]
    baud: Option<u32>,

    /// Verbose output (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress progress output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (overrides default search).
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Storage medium on the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Storage {
    /// SD card slot.
    Sd,
    /// USB stick port.
    Usb,
}

impl From<Storage> for StorageTarget {
    fn from(storage: Storage) -> Self {
        match storage {
            Storage::Sd => Self::Sd,
            Storage::Usb => Self::Usb,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Connect and print the cartridge's handshake response.
    Ping,

    /// Reset the cartridge.
    Reset,

    /// Upload a file to the cartridge.
    Send {
        /// Local file to upload.
        file: PathBuf,

        /// Destination path on the cartridge (default: /<file name>).
        #[arg(short, long)]
        dest: Option<String>,

        /// Storage target.
        #[arg(short, long, value_enum, env = "TEENSYROM_STORAGE")]
        storage: Option<Storage>,

        /// Delete an existing file at the destination first.
        #[arg(long)]
        overwrite: bool,

        /// Announce the upload with the legacy send-file token.
        #[arg(long)]
        legacy_token: bool,

        /// Launch the file once it is uploaded.
        #[arg(long)]
        launch: bool,
    },

    /// Launch a file already stored on the cartridge.
    Launch {
        /// Path on the cartridge.
        path: String,

        /// Storage target.
        #[arg(short, long, value_enum, env = "TEENSYROM_STORAGE")]
        storage: Option<Storage>,
    },

    /// Delete a file stored on the cartridge.
    Delete {
        /// Path on the cartridge.
        path: String,

        /// Storage target.
        #[arg(short, long, value_enum, env = "TEENSYROM_STORAGE")]
        storage: Option<Storage>,
    },

    /// Check a handshake response for a supported firmware version.
    VersionCheck {
        /// Text the cartridge answered with, e.g. "TeensyROM v0.6.7 ready".
        text: String,

        /// Minimum version to require (default: 0.6.6, or 0.0.2 for minimal mode).
        #[arg(long)]
        minimum: Option<String>,

        /// Check against the minimal-mode minimum.
        #[arg(long, conflicts_with = "minimum")]
        minimal: bool,
    },

    /// Keep a supervised connection open and print what happens on it.
    Watch,

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
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

    debug!(
        "teensyrom v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            ExitCode::from(exit_code(&e))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(cli, &config, *json),
        Commands::Ping => commands::device::cmd_ping(cli, &mut config),
        Commands::Reset => commands::device::cmd_reset(cli, &mut config),
        Commands::Send {
            file,
            dest,
            storage,
            overwrite,
            legacy_token,
            launch,
        } => {
            let options = commands::send::SendOptions {
                file,
                dest: dest.as_deref(),
                storage: config.storage(storage.map(Into::into)),
                overwrite: *overwrite,
                legacy_token: *legacy_token,
                launch: *launch,
            };
            commands::send::cmd_send(cli, &mut config, &options)
        },
        Commands::Launch { path, storage } => {
            let storage = config.storage(storage.map(Into::into));
            commands::device::cmd_launch(cli, &mut config, storage, path)
        },
        Commands::Delete { path, storage } => {
            let storage = config.storage(storage.map(Into::into));
            commands::device::cmd_delete(cli, &mut config, storage, path)
        },
        Commands::VersionCheck {
            text,
            minimum,
            minimal,
        } => commands::version::cmd_version_check(text, minimum.as_deref(), *minimal),
        Commands::Watch => commands::watch::cmd_watch(cli, &mut config),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Usage mistakes exit with 2, like clap's own parse errors. Everything
/// else is a runtime failure.
fn exit_code(error: &anyhow::Error) -> u8 {
    let usage = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<teensyrom::Error>())
        .any(|e| {
            matches!(
                e,
                teensyrom::Error::InvalidPort(_)
                    | teensyrom::Error::InvalidArgument(_)
                    | teensyrom::Error::Config(_)
            )
        });
    if usage { 2 } else { 1 }
}

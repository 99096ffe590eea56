//! `watch`: run the supervised connection and print what happens on it.

use anyhow::{Context, Result};
use console::style;
use log::debug;
use std::io::{self, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use teensyrom::{Alert, ConnectionState, DeviceConnection, EventSink, NativeTransport};

use crate::{Cli, config::Config};

/// Alerts to stderr, device output verbatim to stdout.
struct ConsoleSink {
    quiet: bool,
}

impl EventSink for ConsoleSink {
    fn alert(&self, alert: &Alert) {
        if self.quiet && !alert.is_problem() {
            return;
        }
        let marker = match alert {
            Alert::Connected { .. } => style("✓").green(),
            Alert::NoPorts | Alert::ConnectionLost { .. } => style("✗").red(),
            Alert::MinimalMode { .. } | Alert::Firmware(_) => style("⚠").yellow(),
        };
        eprintln!("{marker} {alert}");
    }

    fn device_output(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Watch until Ctrl+C.
pub(crate) fn cmd_watch(cli: &Cli, config: &mut Config) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl+C handler")?;

    let connection = DeviceConnection::new(
        NativeTransport,
        config.connection_config(cli.baud, false),
        Arc::new(ConsoleSink { quiet: cli.quiet }),
    )?;
    if let Some(port) = cli
        .port
        .as_deref()
        .or(config.connection.port.as_deref())
    {
        connection
            .set_port(port)
            .context("Invalid serial port")?;
    }
    connection.set_known_ports(config.known_ports.clone());

    let states = connection.subscribe_state();
    connection.start()?;
    if !cli.quiet {
        eprintln!(
            "{} Watching for a TeensyROM (Ctrl+C to stop)",
            style("📡").cyan()
        );
    }

    let mut remembered = config
        .known_ports
        .clone();
    while !interrupted.load(Ordering::SeqCst) {
        let Ok(state) = states.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        if !cli.quiet {
            eprintln!("{} {}", style("•").dim(), describe(state));
        }
        if state == ConnectionState::Connected {
            let known = connection.known_ports();
            if known != remembered {
                if let Err(e) = config.remember_ports(known.clone()) {
                    debug!("Could not save known ports: {e}");
                }
                remembered = known;
            }
        }
    }

    connection.shutdown();
    if !cli.quiet {
        eprintln!("\n{} Stopped", style("✓").green());
    }
    Ok(())
}

fn describe(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Start => "Waiting for serial ports",
        ConnectionState::Connectable => "Serial ports available",
        ConnectionState::Connected => "Connected",
        ConnectionState::ConnectionLost => "Connection lost",
    }
}

//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod ports;
pub(crate) mod send;
pub(crate) mod version;
pub(crate) mod watch;

use anyhow::{Context, Result};
use console::style;
use log::warn;
use teensyrom::{DeviceConnection, NativeTransport};

use crate::{Cli, config::Config};

/// Build a connection from the command line and config, and connect it.
///
/// No background workers are started: one-shot commands only need the
/// handshake. The port the cartridge answered on is remembered for next
/// time.
pub(crate) fn connect(
    cli: &Cli,
    config: &mut Config,
    legacy_token: bool,
) -> Result<DeviceConnection<NativeTransport>> {
    let connection = DeviceConnection::native(config.connection_config(cli.baud, legacy_token))?;
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

    if !cli.quiet {
        eprintln!("{} Looking for a TeensyROM...", style("⏳").yellow());
    }
    connection
        .manager()
        .ensure_connection()
        .context("No TeensyROM answered")?;

    if let Err(e) = config.remember_ports(connection.known_ports()) {
        warn!("Could not save known ports: {e}");
    }
    Ok(connection)
}

//! One-shot device commands: ping, reset, launch and delete.

use anyhow::{Context, Result};
use console::style;
use teensyrom::StorageTarget;

use super::connect;
use crate::{Cli, config::Config};

/// Print the handshake response. It goes to stdout so scripts can read it.
pub(crate) fn cmd_ping(cli: &Cli, config: &mut Config) -> Result<()> {
    let connection = connect(cli, config, false)?;
    let response = connection
        .ping()
        .context("Ping failed")?;
    println!("{}", response.trim_end());
    Ok(())
}

/// Reset the cartridge.
pub(crate) fn cmd_reset(cli: &Cli, config: &mut Config) -> Result<()> {
    let connection = connect(cli, config, false)?;
    if !cli.quiet {
        eprintln!("{} Resetting...", style("🔄").cyan());
    }
    connection
        .reset()
        .context("Reset failed")?;
    if !cli.quiet {
        eprintln!("{} Reset sent", style("✓").green());
    }
    Ok(())
}

/// Launch a stored file.
pub(crate) fn cmd_launch(
    cli: &Cli,
    config: &mut Config,
    storage: StorageTarget,
    path: &str,
) -> Result<()> {
    let connection = connect(cli, config, false)?;
    connection
        .launch_file(storage, path)
        .with_context(|| format!("Failed to launch {path} from {storage}"))?;
    if !cli.quiet {
        eprintln!(
            "{} Launched {} from {}",
            style("🚀").green(),
            style(path).cyan(),
            storage
        );
    }
    Ok(())
}

/// Delete a stored file.
pub(crate) fn cmd_delete(
    cli: &Cli,
    config: &mut Config,
    storage: StorageTarget,
    path: &str,
) -> Result<()> {
    let connection = connect(cli, config, false)?;
    connection
        .delete_file(storage, path)
        .with_context(|| format!("Failed to delete {path} from {storage}"))?;
    if !cli.quiet {
        eprintln!(
            "{} Deleted {} from {}",
            style("🗑").red(),
            style(path).cyan(),
            storage
        );
    }
    Ok(())
}

//! `send`: upload a local file to the cartridge.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::fs;
use std::path::Path;
use teensyrom::{StorageTarget, TransferSession};

use super::connect;
use crate::{Cli, config::Config, use_fancy_output};

/// What to upload and where.
pub(crate) struct SendOptions<'a> {
    pub(crate) file: &'a Path,
    pub(crate) dest: Option<&'a str>,
    pub(crate) storage: StorageTarget,
    pub(crate) overwrite: bool,
    pub(crate) legacy_token: bool,
    pub(crate) launch: bool,
}

/// Upload a file. The file is read and validated before any port is opened.
pub(crate) fn cmd_send(cli: &Cli, config: &mut Config, options: &SendOptions<'_>) -> Result<()> {
    let data = fs::read(options.file)
        .with_context(|| format!("Failed to read {}", options.file.display()))?;
    let destination = destination_path(options.file, options.dest)?;
    let mut session = TransferSession::new(data, options.storage, &destination)?;

    if !cli.quiet {
        eprintln!(
            "{} {} ({} bytes) -> {}:{}",
            style("📦").cyan(),
            style(options.file.display()).cyan(),
            session.stream_length(),
            options.storage,
            session.destination_path()
        );
    }

    let connection = connect(cli, config, options.legacy_token)?;

    if options.overwrite {
        // A missing file is the common case; only a lost connection matters.
        if let Err(e) = connection.delete_file(options.storage, session.destination_path()) {
            if e.is_recoverable() {
                return Err(e).context("Failed to delete existing file");
            }
            debug!("Nothing deleted before upload: {e}");
        }
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(u64::from(session.stream_length()));
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = connection.send_file(&mut session, |sent, _total| {
        pb.set_position(sent as u64);
    });
    match result {
        Ok(()) => pb.finish_and_clear(),
        Err(e) => {
            pb.abandon();
            return Err(e).context("Upload failed");
        },
    }

    if !cli.quiet {
        eprintln!("{} Upload complete", style("✓").green().bold());
    }

    if options.launch {
        connection
            .launch_file(options.storage, session.destination_path())
            .context("Failed to launch uploaded file")?;
        if !cli.quiet {
            eprintln!("{} Launched", style("🚀").green());
        }
    }
    Ok(())
}

/// `dest`, or the file name at the storage root.
fn destination_path(file: &Path, dest: Option<&str>) -> Result<String> {
    if let Some(dest) = dest {
        return Ok(dest.to_string());
    }
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            teensyrom::Error::InvalidArgument(format!(
                "cannot derive a destination from {}; pass --dest",
                file.display()
            ))
        })?;
    Ok(format!("/{name}"))
}

//! `version-check`: offline firmware compatibility check.

use anyhow::{Result, bail};
use console::style;
use teensyrom::{FirmwareCheck, FirmwareVersion, check_firmware};

/// Check `text` against the minimum and report on stdout.
///
/// An unsupported or undetectable version is an error, so the exit code
/// tells scripts the outcome.
pub(crate) fn cmd_version_check(text: &str, minimum: Option<&str>, minimal: bool) -> Result<()> {
    let check = evaluate(text, minimum, minimal)?;
    if !check.is_supported() {
        bail!(check.message());
    }
    println!("{} {}", style("✓").green(), check.message());
    Ok(())
}

fn evaluate(text: &str, minimum: Option<&str>, minimal: bool) -> Result<FirmwareCheck> {
    let minimum = match minimum {
        Some(version) => version.parse()?,
        None if minimal => FirmwareVersion::MINIMUM_MINIMAL,
        None => FirmwareVersion::MINIMUM_FULL,
    };
    Ok(check_firmware(text, minimum))
}

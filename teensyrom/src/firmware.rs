//! Firmware compatibility check.
//!
//! The handshake response carries the firmware version as free text, e.g.
//! `"TeensyROM v0.6.7 ready"`. The first `major.minor.patch` triple found is
//! compared componentwise against a minimum.

use {
    crate::error::{Error, Result},
    regex::Regex,
    std::{fmt, str::FromStr, sync::LazyLock},
};

/// Where release builds of the firmware are published.
pub const FIRMWARE_DOWNLOAD_URL: &str =
    "https://github.com/SensoriumEmbedded/TeensyROM/tree/main/bin/TeensyROM";

/// Firmware update instructions.
pub const FIRMWARE_UPDATE_GUIDE_URL: &str =
    "https://github.com/SensoriumEmbedded/TeensyROM/blob/main/docs/General_Usage.md#firmware-updates";

static VERSION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+\.\d+").ok());

/// A `major.minor.patch` firmware version.
///
/// Ordering is componentwise, so `0.10.0` sorts after `0.9.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl FirmwareVersion {
    /// Oldest full firmware the host protocol works with.
    pub const MINIMUM_FULL: Self = Self::new(0, 6, 6);
    /// Oldest minimal-mode firmware the host protocol works with.
    pub const MINIMUM_MINIMAL: Self = Self::new(0, 0, 2);

    /// Build a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Find the first version triple embedded in `text`.
    pub fn extract(text: &str) -> Option<Self> {
        let pattern = VERSION_PATTERN.as_ref()?;
        let found = pattern.find(text)?;
        found
            .as_str()
            .parse()
            .ok()
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("'{s}' is not a major.minor.patch version"));
        let mut parts = s
            .trim()
            .split('.')
            .map(str::parse::<u32>);
        let (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Result of checking a handshake response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareCheck {
    /// Version found and new enough.
    Supported(FirmwareVersion),
    /// Version found but older than the minimum.
    BelowMinimum {
        /// Version the device reported.
        found: FirmwareVersion,
        /// Version required.
        minimum: FirmwareVersion,
    },
    /// No version could be read from the response.
    Undetectable {
        /// Version required.
        minimum: FirmwareVersion,
    },
}

impl FirmwareCheck {
    /// Whether the firmware can be driven.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported(_))
    }

    /// The version the device reported, if one was found.
    pub fn version(&self) -> Option<FirmwareVersion> {
        match self {
            Self::Supported(v) | Self::BelowMinimum { found: v, .. } => Some(*v),
            Self::Undetectable { .. } => None,
        }
    }

    /// User-facing description, with update links when action is needed.
    pub fn message(&self) -> String {
        match self {
            Self::Supported(v) => format!("Firmware {v} is supported"),
            Self::BelowMinimum { found, minimum } => format!(
                "Firmware {found} is below the minimum supported version {minimum}. \
                 Download: {FIRMWARE_DOWNLOAD_URL} Update guide: {FIRMWARE_UPDATE_GUIDE_URL}"
            ),
            Self::Undetectable { minimum } => format!(
                "Firmware version could not be detected; version {minimum} or newer is required. \
                 Download: {FIRMWARE_DOWNLOAD_URL} Update guide: {FIRMWARE_UPDATE_GUIDE_URL}"
            ),
        }
    }
}

/// Check the version embedded in `response` against `minimum`.
pub fn check_firmware(response: &str, minimum: FirmwareVersion) -> FirmwareCheck {
    match FirmwareVersion::extract(response) {
        Some(found) if found >= minimum => FirmwareCheck::Supported(found),
        Some(found) => FirmwareCheck::BelowMinimum { found, minimum },
        None => FirmwareCheck::Undetectable { minimum },
    }
}

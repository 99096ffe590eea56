//! Connection timings and thresholds.
//!
//! The defaults encode firmware timing observed on real cartridges. Only
//! tests and unusual hosts should need to change them.

use {
    crate::{
        error::{Error, Result},
        firmware::FirmwareVersion,
        port::DEFAULT_BAUD_RATE,
        protocol::{Token, TokenTable},
    },
    std::time::Duration,
};

/// Settings shared by the connection manager, command channel and the
/// background workers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    /// Baud rate used when opening a port.
    pub baud_rate: u32,
    /// Write timeout while sending the handshake ping.
    pub write_timeout: Duration,
    /// Write timeout for commands and uploads once connected.
    pub command_timeout: Duration,
    /// How long to wait for the handshake response.
    pub handshake_timeout: Duration,
    /// How long to wait for a two-byte acknowledgment.
    pub ack_timeout: Duration,
    /// Granularity of the bounded buffer waits.
    pub poll_interval: Duration,
    /// Period of the health check and of port discovery.
    pub health_check_interval: Duration,
    /// Period of the passive device-output listener.
    pub listener_interval: Duration,
    /// Announce uploads with the pre-renumbering send-file token.
    pub legacy_send_file: bool,
    /// Oldest full firmware this host can drive.
    pub minimum_firmware: FirmwareVersion,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            write_timeout: Duration::from_millis(2000),
            command_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_millis(4000),
            ack_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            health_check_interval: Duration::from_millis(5000),
            listener_interval: Duration::from_millis(50),
            legacy_send_file: false,
            minimum_firmware: FirmwareVersion::MINIMUM_FULL,
        }
    }
}

impl ConnectionConfig {
    /// Set the health-check and discovery period.
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the handshake response wait.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Use the legacy send-file token.
    #[must_use]
    pub fn with_legacy_send_file(mut self, legacy: bool) -> Self {
        self.legacy_send_file = legacy;
        self
    }

    /// Set the minimum supported full firmware.
    #[must_use]
    pub fn with_minimum_firmware(mut self, version: FirmwareVersion) -> Self {
        self.minimum_firmware = version;
        self
    }

    /// Token that announces a file upload for the configured generation.
    pub fn send_file_token(&self) -> Token {
        if self.legacy_send_file {
            TokenTable::LEGACY_SEND_FILE
        } else {
            TokenTable::SEND_FILE
        }
    }

    /// Reject values that would make a wait unbounded or a loop spin.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Config("baud rate must be non-zero".into()));
        }
        let durations = [
            ("write_timeout", self.write_timeout),
            ("command_timeout", self.command_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("ack_timeout", self.ack_timeout),
            ("poll_interval", self.poll_interval),
            ("health_check_interval", self.health_check_interval),
            ("listener_interval", self.listener_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }
        if self.poll_interval > self.ack_timeout {
            return Err(Error::Config(
                "poll_interval must not exceed ack_timeout".into(),
            ));
        }
        Ok(())
    }
}

//! Ping handshake and identification of the peer.
//!
//! Any USB serial device can be open on a candidate port. Only a response
//! containing `teensyrom` or `busy` counts; `minimal` refines an accepted
//! response but never qualifies one on its own:
//!
//! | Accepted response also contains | Identity  | Firmware check against |
//! |---------------------------------|-----------|------------------------|
//! | `minimal`                       | `Minimal` | minimal-mode minimum   |
//! | `busy`                          | `Busy`    | skipped                |
//! | neither                         | `Ready`   | configured minimum     |
//!
//! Matching is case-insensitive.

use {
    crate::{
        config::ConnectionConfig,
        error::{Error, Result},
        firmware::{FirmwareCheck, FirmwareVersion, check_firmware},
        port::Port,
        protocol::{CommandChannel, TokenTable},
    },
    log::{debug, trace},
    std::{
        fmt, thread,
        time::{Duration, Instant},
    },
};

const IDENTITY_MARKER: &str = "teensyrom";
const BUSY_MARKER: &str = "busy";
const MINIMAL_MARKER: &str = "minimal";

/// Quiet period after which an identified response is considered complete.
const SETTLE_TIME: Duration = Duration::from_millis(100);

/// How the cartridge identified itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceIdentity {
    /// Full firmware, idle.
    Ready,
    /// Full firmware, currently serving another host.
    Busy,
    /// Degraded minimal-mode firmware.
    Minimal,
}

impl DeviceIdentity {
    /// Classify a ping response. `None` if the peer is not a TeensyROM.
    pub fn classify(response: &str) -> Option<Self> {
        let lower = response.to_lowercase();
        let busy = lower.contains(BUSY_MARKER);
        if !busy && !lower.contains(IDENTITY_MARKER) {
            return None;
        }
        if lower.contains(MINIMAL_MARKER) {
            Some(Self::Minimal)
        } else if busy {
            Some(Self::Busy)
        } else {
            Some(Self::Ready)
        }
    }

    /// Minimum firmware version to check against, if the check applies.
    pub fn minimum_firmware(self, config: &ConnectionConfig) -> Option<FirmwareVersion> {
        match self {
            Self::Ready => Some(config.minimum_firmware),
            Self::Minimal => Some(FirmwareVersion::MINIMUM_MINIMAL),
            Self::Busy => None,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Minimal => "minimal mode",
        })
    }
}

/// A successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// How the device identified itself.
    pub identity: DeviceIdentity,
    /// The raw response text, trimmed.
    pub response: String,
}

impl Handshake {
    /// Firmware check for this response, if one applies.
    pub fn firmware(&self, config: &ConnectionConfig) -> Option<FirmwareCheck> {
        self.identity
            .minimum_firmware(config)
            .map(|minimum| check_firmware(&self.response, minimum))
    }
}

/// Wait for the reply to a ping.
///
/// Returns as soon as an identified response ends with a newline or goes
/// quiet, and never later than `config.handshake_timeout`.
pub(crate) fn read_identity<P: Port>(port: &mut P, config: &ConnectionConfig) -> Result<Handshake> {
    let started = Instant::now();
    let mut received: Vec<u8> = Vec::new();
    let mut last_data = started;
    let mut identity = None;

    loop {
        let chunk = port.read_available()?;
        if !chunk.is_empty() {
            trace!("<- {} byte(s) of handshake response", chunk.len());
            received.extend_from_slice(&chunk);
            last_data = Instant::now();
            identity = DeviceIdentity::classify(&String::from_utf8_lossy(&received));
        }

        if let Some(identity) = identity {
            if received.ends_with(b"\n") || last_data.elapsed() >= SETTLE_TIME {
                return Ok(Handshake {
                    identity,
                    response: String::from_utf8_lossy(&received)
                        .trim()
                        .to_string(),
                });
            }
        }
        if started.elapsed() >= config.handshake_timeout {
            break;
        }
        thread::sleep(config.poll_interval);
    }

    if received.is_empty() {
        return Err(Error::Timeout {
            expected: 1,
            available: 0,
            timeout_ms: u64::try_from(
                config
                    .handshake_timeout
                    .as_millis(),
            )
            .unwrap_or(u64::MAX),
        });
    }
    Err(Error::NotIdentified(
        String::from_utf8_lossy(&received)
            .trim()
            .to_string(),
    ))
}

/// Read and drop whatever the device prints after the identity line, until
/// a poll comes back empty or [`SETTLE_TIME`] runs out.
fn discard_stale<P: Port>(port: &mut P, config: &ConnectionConfig) -> Result<usize> {
    let deadline = Instant::now() + SETTLE_TIME;
    let mut discarded = 0;
    loop {
        thread::sleep(config.poll_interval);
        let stale = port.read_available()?;
        if stale.is_empty() {
            break;
        }
        discarded += stale.len();
        if Instant::now() >= deadline {
            break;
        }
    }
    Ok(discarded)
}

/// Ping a freshly opened port and identify the peer.
///
/// The ping is written under `write_timeout`; on success the port is left
/// with `command_timeout` for the commands and uploads that follow.
pub(crate) fn handshake<P: Port>(port: &mut P, config: &ConnectionConfig) -> Result<Handshake> {
    port.set_timeout(config.write_timeout)?;
    port.clear_buffers()?;
    CommandChannel::new(port, config).send_token(TokenTable::PING)?;

    let handshake = read_identity(port, config)?;
    debug!(
        "{} answered ({}): {:?}",
        port.name(),
        handshake.identity,
        handshake.response
    );

    let stale = discard_stale(port, config)?;
    if stale > 0 {
        trace!("Discarded {stale} stale byte(s) after handshake");
    }
    port.set_timeout(config.command_timeout)?;
    Ok(handshake)
}

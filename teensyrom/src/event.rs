//! User-facing notifications and device log output.

use {
    crate::firmware::FirmwareCheck,
    log::{error, info, warn},
    std::fmt,
};

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// A handshake succeeded.
    Connected {
        /// Port the cartridge answered on.
        port: String,
    },
    /// The cartridge answered in minimal (degraded) mode.
    MinimalMode {
        /// Port the cartridge answered on.
        port: String,
    },
    /// An established connection went away.
    ConnectionLost {
        /// Port that was in use.
        port: Option<String>,
    },
    /// The firmware is too old or its version could not be read.
    Firmware(FirmwareCheck),
    /// No serial ports are visible at all.
    NoPorts,
}

impl Alert {
    /// Whether the alert reports a problem.
    pub fn is_problem(&self) -> bool {
        !matches!(self, Self::Connected { .. })
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { port } => write!(f, "Connected to TeensyROM on {port}"),
            Self::MinimalMode { port } => write!(
                f,
                "TeensyROM on {port} is running in minimal mode; most features are unavailable"
            ),
            Self::ConnectionLost { port: Some(port) } => {
                write!(f, "Lost connection to TeensyROM on {port}; reconnecting")
            },
            Self::ConnectionLost { port: None } => {
                f.write_str("Lost connection to TeensyROM; reconnecting")
            },
            Self::Firmware(check) => f.write_str(&check.message()),
            Self::NoPorts => f.write_str("No serial ports found; is the TeensyROM plugged in?"),
        }
    }
}

/// Receiver for alerts and for text the device prints on its own.
pub trait EventSink: Send + Sync {
    /// An alert was raised.
    fn alert(&self, alert: &Alert);

    /// The device sent unsolicited text.
    fn device_output(&self, text: &str);
}

/// Sink that routes everything through the `log` facade.
///
/// Device output is logged under the `teensyrom::device` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn alert(&self, alert: &Alert) {
        match alert {
            Alert::Connected { .. } => info!("{alert}"),
            Alert::NoPorts => error!("{alert}"),
            _ => warn!("{alert}"),
        }
    }

    fn device_output(&self, text: &str) {
        for line in text
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
        {
            info!(target: "teensyrom::device", "{line}");
        }
    }
}

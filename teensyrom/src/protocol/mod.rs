//! Wire protocol: tokens, the command/acknowledgment channel, and file
//! transfer.

pub mod command;
pub mod token;
pub mod transfer;

use {
    crate::error::{Error, Result},
    std::{fmt, str::FromStr},
};

pub use {
    command::CommandChannel,
    token::{Token, TokenTable},
    transfer::{CHUNK_SIZE, FileTransferProtocol, TransferSession, TransferStage},
};

/// Outcome of reading a two-byte response token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// The firmware accepted the step.
    Ack,
    /// The firmware rejected the step.
    Fail,
    /// Any value that is not a registered response.
    Unknown(u16),
}

impl AckResult {
    /// Classify a decoded response value.
    pub fn from_value(value: u16) -> Self {
        match value {
            v if v == TokenTable::ACK.value() => Self::Ack,
            v if v == TokenTable::FAIL.value() => Self::Fail,
            v => Self::Unknown(v),
        }
    }

    /// Whether the step was accepted.
    pub fn is_ack(self) -> bool {
        matches!(self, Self::Ack)
    }
}

impl fmt::Display for AckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => f.write_str("Ack"),
            Self::Fail => f.write_str("Fail"),
            Self::Unknown(v) => write!(f, "unknown token 0x{v:04X}"),
        }
    }
}

/// Storage medium on the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StorageTarget {
    /// SD card slot.
    #[default]
    Sd,
    /// USB stick port.
    Usb,
}

impl StorageTarget {
    /// Single byte that selects this medium on the wire.
    pub const fn wire_value(self) -> u8 {
        match self {
            Self::Sd => 1,
            Self::Usb => 0,
        }
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sd => "SD",
            Self::Usb => "USB",
        })
    }
}

impl FromStr for StorageTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "sd" => Ok(Self::Sd),
            "usb" => Ok(Self::Usb),
            other => Err(Error::InvalidArgument(format!(
                "unknown storage target '{other}' (expected 'sd' or 'usb')"
            ))),
        }
    }
}

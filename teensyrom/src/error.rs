//! Error types for teensyrom.

use {
    crate::{
        protocol::{AckResult, TransferStage},
        state::ConnectionState,
    },
    std::io,
    thiserror::Error,
};

/// Result type for teensyrom operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for teensyrom operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An empty or whitespace-only port name was supplied.
    #[error("Invalid port name: {0:?}")]
    InvalidPort(String),

    /// The handshake failed on every candidate port.
    #[error("Could not connect to a TeensyROM ({ports_tried} port(s) tried)")]
    ConnectionFailure {
        /// Number of ports the handshake was attempted on.
        ports_tried: usize,
    },

    /// Expected bytes did not arrive within the bound.
    #[error("Timed out after {timeout_ms}ms waiting for {expected} byte(s) ({available} available)")]
    Timeout {
        /// Bytes the caller waited for.
        expected: usize,
        /// Bytes buffered when the wait gave up.
        available: usize,
        /// The bound that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Received `Fail` or an unknown token where `Ack` was expected.
    #[error("Protocol violation: expected Ack, received {received}{}", format_detail(.detail))]
    ProtocolViolation {
        /// What came back instead of an Ack.
        received: AckResult,
        /// Diagnostic text the device sent after the token, if any.
        detail: String,
    },

    /// A file transfer failed part way through.
    #[error("Transfer aborted during {stage} after {bytes_sent} payload byte(s): {source}")]
    TransferAborted {
        /// The step that failed.
        stage: TransferStage,
        /// Payload bytes written before the failure.
        bytes_sent: u32,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A command was issued while the connection could not carry it.
    #[error("No usable connection (state: {0})")]
    InvalidState(ConnectionState),

    /// A requested state change is not part of the lifecycle.
    #[error("Illegal state transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: ConnectionState,
        /// Rejected target state.
        to: ConnectionState,
    },

    /// The peer answered a ping but did not identify itself as a TeensyROM.
    #[error("Device did not identify as a TeensyROM: {0:?}")]
    NotIdentified(String),

    /// A value does not fit the wire field it is destined for.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn format_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({detail})")
    }
}

impl Error {
    /// Whether the health monitor can expect a later retry to succeed.
    ///
    /// Timeouts and handshake failures usually mean the cartridge is not
    /// plugged in yet. Protocol violations are surfaced to the caller and
    /// never retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout { .. } | Self::ConnectionFailure { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            Self::TransferAborted { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

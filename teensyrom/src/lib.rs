//! # teensyrom
//!
//! Serial link to a TeensyROM cartridge.
//!
//! This crate keeps a connection to the cartridge alive across cable pulls
//! and device resets, and carries the token-framed command protocol over it:
//!
//! - Port discovery and candidate ordering
//! - Ping handshake that tells the cartridge apart from other serial devices
//! - Health monitoring with automatic reconnection
//! - Ping, reset, launch, delete and chunked file upload
//! - Firmware version compatibility check
//!
//! ## Architecture
//!
//! ```text
//!  PortDiscovery ---> ConnectionManager <--- HealthMonitor
//!                       |  (transmission lock)
//!          +------------+-------------+
//!          v                          v
//!   CommandChannel              PassiveListener
//!          |                          |
//!   FileTransferProtocol          EventSink
//! ```
//!
//! [`DeviceConnection`] bundles the manager with its background workers.
//!
//! ## Features
//!
//! - `native` (default): OS serial ports via the `serialport` crate
//! - `serde`: Serialization support for configuration and state types
//!
//! ## Example
//!
//! ```rust,no_run
//! use teensyrom::{ConnectionConfig, DeviceConnection, StorageTarget, TransferSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = DeviceConnection::native(ConnectionConfig::default())?;
//!     connection.open()?;
//!     println!("{}", connection.ping()?);
//!
//!     let data = std::fs::read("game.prg")?;
//!     let mut session = TransferSession::new(data, StorageTarget::Sd, "/games/game.prg")?;
//!     connection.send_file(&mut session, |sent, total| {
//!         println!("{sent}/{total}");
//!     })?;
//!     connection.launch_file(StorageTarget::Sd, "/games/game.prg")?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod device;
pub mod discovery;
pub mod error;
pub mod event;
pub mod firmware;
pub mod monitor;
pub mod port;
pub mod protocol;
pub mod state;

// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativeTransport};
pub use {
    config::ConnectionConfig,
    connection::{
        ChannelGuard, ChannelMode, ConnectionManager, DeviceConnection, DeviceIdentity, Handshake,
        HealthMonitor, PassiveListener,
    },
    device::{DetectedPort, DeviceKind, detect_ports, order_candidates},
    discovery::PortDiscovery,
    error::{Error, Result},
    event::{Alert, EventSink, LogSink},
    firmware::{FirmwareCheck, FirmwareVersion, check_firmware},
    monitor::OutputDecoder,
    port::{Port, PortInfo, SerialConfig, Transport},
    protocol::{
        AckResult, CHUNK_SIZE, CommandChannel, FileTransferProtocol, StorageTarget, Token,
        TokenTable, TransferSession, TransferStage,
    },
    state::{ConnectionState, ConnectionStateMachine, Observable, PortSet},
};

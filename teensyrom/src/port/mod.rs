//! Port abstraction for the cartridge's serial link.
//!
//! The protocol and connection layers never talk to the `serialport` crate
//! directly. They are generic over a [`Transport`], which enumerates and opens
//! ports, and over the [`Port`] handle it hands out:
//!
//! ```text
//! +-----------------------------+
//! | ConnectionManager / Channel |
//! +--------------+--------------+
//!                |
//!                v
//! +--------------+--------------+
//! |  Transport + Port traits    |
//! +-------+--------------+------+
//!         |              |
//!         v              v
//! +-------+------+  +----+---------------+
//! | NativePort   |  | simulated device   |
//! | (serialport) |  | (unit tests)       |
//! +--------------+  +--------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use teensyrom::port::{Port, SerialConfig, Transport};
//!
//! fn probe<T: Transport>(transport: &T) -> teensyrom::Result<()> {
//!     for info in transport.list_ports()? {
//!         let mut port = transport.open(&SerialConfig::new(&info.name, 115200))?;
//!         println!("{} has {} byte(s) waiting", port.name(), port.bytes_to_read()?);
//!         port.close()?;
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod sim;

use {
    crate::error::Result,
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Baud rate the cartridge firmware listens at.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port configuration.
///
/// The firmware always runs 8 data bits, no parity, one stop bit and no flow
/// control, so only the name, speed and timeout are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(2000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// A port known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// An open serial handle.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Number of received bytes waiting in the input buffer.
    ///
    /// Fails once the underlying device has gone away.
    fn bytes_to_read(&self) -> Result<usize>;

    /// Discard both the input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Whether the OS still reports the handle as usable.
    fn is_open(&self) -> bool;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Read every byte currently buffered without waiting for more.
    fn read_available(&mut self) -> Result<Vec<u8>> {
        let available = self.bytes_to_read()?;
        let mut buf = vec![0u8; available];
        if available > 0 {
            Read::read_exact(self, &mut buf)?;
        }
        Ok(buf)
    }
}

/// Source of serial ports: enumeration plus opening.
///
/// Separated from [`Port`] because listing ports does not require an open
/// handle, and so the connection layer can run against a simulated device.
pub trait Transport: Send + Sync + 'static {
    /// Handle type produced by [`Transport::open`].
    type Port: Port + 'static;

    /// List all serial ports the OS currently exposes.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// Open a port with the given configuration.
    fn open(&self, config: &SerialConfig) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativeTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_builder() {
        let config =
            SerialConfig::new("/dev/ttyACM0", 115200).with_timeout(Duration::from_millis(500));

        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_port_info_named() {
        let info = PortInfo::named("COM3");
        assert_eq!(info.name, "COM3");
        assert!(info.vid.is_none());
    }
}

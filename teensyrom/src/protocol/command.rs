//! Token-framed command/acknowledgment exchange.
//!
//! Every command is "write N bytes, then read exactly 2 bytes back and
//! compare them against the token table". Integers go out most significant
//! byte first; response tokens come back least significant byte first.
//!
//! A channel borrows the open port for the duration of one command sequence.
//! Callers obtain that borrow through the connection's transmission lock, so
//! two channels never exist for the same port at once.

use {
    crate::{
        config::ConnectionConfig,
        error::{Error, Result},
        port::Port,
        protocol::{AckResult, StorageTarget, Token},
    },
    byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt},
    log::{debug, trace},
    std::{
        io::Read,
        thread,
        time::{Duration, Instant},
    },
};

/// Largest integer field in the protocol (stream length).
const MAX_INT_BYTES: usize = 4;

/// Encode `value` as `byte_count` bytes, most significant first.
pub fn encode_int(value: u32, byte_count: usize) -> Result<Vec<u8>> {
    if byte_count == 0 || byte_count > MAX_INT_BYTES {
        return Err(Error::InvalidArgument(format!(
            "integer fields are 1 to {MAX_INT_BYTES} bytes, got {byte_count}"
        )));
    }
    if byte_count < MAX_INT_BYTES && value >> (8 * byte_count) != 0 {
        return Err(Error::InvalidArgument(format!(
            "{value} does not fit in {byte_count} byte(s)"
        )));
    }

    let mut buf = Vec::with_capacity(byte_count);
    buf.write_uint::<BigEndian>(u64::from(value), byte_count)?;
    Ok(buf)
}

/// Decode an integer the firmware sent, least significant byte first.
pub fn decode_int(bytes: &[u8]) -> Result<u32> {
    if bytes.is_empty() || bytes.len() > MAX_INT_BYTES {
        return Err(Error::InvalidArgument(format!(
            "integer fields are 1 to {MAX_INT_BYTES} bytes, got {}",
            bytes.len()
        )));
    }
    let mut reader = bytes;
    let value = reader.read_uint::<LittleEndian>(bytes.len())?;
    u32::try_from(value).map_err(|_| Error::InvalidArgument(format!("{value} overflows u32")))
}

/// Command channel over a borrowed port.
pub struct CommandChannel<'a, P: Port> {
    port: &'a mut P,
    ack_timeout: Duration,
    poll_interval: Duration,
}

impl<'a, P: Port> CommandChannel<'a, P> {
    /// Wrap an open port using the timings from `config`.
    pub fn new(port: &'a mut P, config: &ConnectionConfig) -> Self {
        Self {
            port,
            ack_timeout: config.ack_timeout,
            poll_interval: config.poll_interval,
        }
    }

    /// The underlying port.
    pub fn port(&mut self) -> &mut P {
        self.port
    }

    /// Discard anything buffered in either direction.
    pub fn clear_buffers(&mut self) -> Result<()> {
        self.port
            .clear_buffers()
    }

    /// Write `value` as `byte_count` bytes, most significant byte first.
    pub fn send_int_bytes(&mut self, value: u32, byte_count: usize) -> Result<()> {
        let bytes = encode_int(value, byte_count)?;
        trace!("-> {bytes:02X?}");
        self.port
            .write_all_bytes(&bytes)
    }

    /// Write a 2-byte command token.
    pub fn send_token(&mut self, token: Token) -> Result<()> {
        debug!("Sending {token}");
        self.send_int_bytes(u32::from(token.value()), 2)
    }

    /// Write raw bytes.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all_bytes(data)
    }

    /// Write a device path followed by a single NUL terminator.
    pub fn send_path(&mut self, path: &str) -> Result<()> {
        if path.contains('\0') {
            return Err(Error::InvalidArgument(format!(
                "path {path:?} contains a NUL byte"
            )));
        }
        let mut bytes = Vec::with_capacity(path.len() + 1);
        bytes.extend_from_slice(path.as_bytes());
        bytes.push(0);
        trace!("-> path {path:?}");
        self.port
            .write_all_bytes(&bytes)
    }

    /// Poll the input buffer until `num_bytes` are available.
    ///
    /// Fails with [`Error::Timeout`] once `timeout` elapses.
    pub fn wait_for_serial_data(&mut self, num_bytes: usize, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            let available = self
                .port
                .bytes_to_read()?;
            if available >= num_bytes {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout {
                    expected: num_bytes,
                    available,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Wait for and decode a `byte_count`-byte integer sent by the firmware.
    pub fn read_int_bytes(&mut self, byte_count: usize) -> Result<u32> {
        self.wait_for_serial_data(byte_count, self.ack_timeout)?;
        let mut buf = vec![0u8; byte_count];
        self.port
            .read_exact(&mut buf)?;
        trace!("<- {buf:02X?}");
        decode_int(&buf)
    }

    /// Read the next response token.
    pub fn get_ack(&mut self) -> Result<AckResult> {
        let value = self.read_int_bytes(2)?;
        // read_int_bytes(2) never exceeds u16
        let result = AckResult::from_value(u16::try_from(value).unwrap_or(u16::MAX));
        debug!("Response: {result}");
        Ok(result)
    }

    /// Read the next response token and fail unless it is `Ack`.
    ///
    /// On failure, whatever text the firmware sent after the token is
    /// attached to the error.
    pub fn handle_ack(&mut self) -> Result<()> {
        match self.get_ack()? {
            AckResult::Ack => Ok(()),
            received => {
                thread::sleep(self.poll_interval);
                let detail = self
                    .read_text()?
                    .trim()
                    .to_string();
                Err(Error::ProtocolViolation { received, detail })
            },
        }
    }

    /// Drain whatever is buffered as text, without waiting.
    pub fn read_text(&mut self) -> Result<String> {
        let bytes = self
            .port
            .read_available()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// `token` -> Ack -> storage byte -> path + NUL -> Ack.
    ///
    /// Shared by launch and delete.
    pub fn path_command(&mut self, token: Token, storage: StorageTarget, path: &str) -> Result<()> {
        self.send_token(token)?;
        self.handle_ack()?;
        self.send_int_bytes(u32::from(storage.wire_value()), 1)?;
        self.send_path(path)?;
        self.handle_ack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        port::sim::{SimDevice, fast_config},
        protocol::TokenTable,
    };

    #[test]
    fn test_encode_int_is_msb_first() {
        assert_eq!(encode_int(0x64BB, 2).unwrap(), vec![0x64, 0xBB]);
        assert_eq!(encode_int(0x0001_0203, 4).unwrap(), vec![0x00, 0x01, 0x02, 0x03]);
        assert_eq!(encode_int(1, 1).unwrap(), vec![0x01]);
    }

    #[test]
    fn test_encode_int_rejects_overflow_and_bad_width() {
        assert!(encode_int(0x1_0000, 2).is_err());
        assert!(encode_int(1, 0).is_err());
        assert!(encode_int(1, 5).is_err());
    }

    #[test]
    fn test_decode_int_is_lsb_first() {
        assert_eq!(decode_int(&[0xCC, 0x64]).unwrap(), 0x64CC);
        assert_eq!(decode_int(&[0x04, 0x03, 0x02, 0x01]).unwrap(), 0x0102_0304);
        assert!(decode_int(&[]).is_err());
    }

    #[test]
    fn test_lengths_and_checksums_survive_the_wire() {
        let cases: [(u32, u16); 5] = [
            (0, 0),
            (1, 1),
            (16 * 1024, 0xFFFF),
            (0x00AB_CDEF, 0x1234),
            (u32::MAX, 0x8000),
        ];
        for (length, checksum) in cases {
            let device = SimDevice::silent();
            let mut port = device.port("sim0");
            let config = fast_config();
            let mut channel = CommandChannel::new(&mut port, &config);

            channel.send_int_bytes(length, 4).unwrap();
            channel.send_int_bytes(u32::from(checksum), 2).unwrap();

            let written = device.written();
            let sent_length = u32::from_be_bytes([written[0], written[1], written[2], written[3]]);
            let sent_checksum = u16::from_be_bytes([written[4], written[5]]);
            assert_eq!(sent_length, length);
            assert_eq!(sent_checksum, checksum);

            // The firmware echoes integers back in its own byte order.
            device.push_rx(&length.to_le_bytes());
            assert_eq!(channel.read_int_bytes(4).unwrap(), length);
        }
    }

    #[test]
    fn test_get_ack_classifies_tokens() {
        let device = SimDevice::silent();
        let mut port = device.port("sim0");
        let config = fast_config();
        let mut channel = CommandChannel::new(&mut port, &config);

        device.push_rx(&TokenTable::ACK.response_bytes());
        assert_eq!(channel.get_ack().unwrap(), AckResult::Ack);

        device.push_rx(&TokenTable::FAIL.response_bytes());
        assert_eq!(channel.get_ack().unwrap(), AckResult::Fail);

        device.push_rx(&[0x34, 0x12]);
        assert_eq!(channel.get_ack().unwrap(), AckResult::Unknown(0x1234));
    }

    #[test]
    fn test_get_ack_times_out_without_data() {
        let device = SimDevice::silent();
        let mut port = device.port("sim0");
        let config = fast_config();
        let mut channel = CommandChannel::new(&mut port, &config);

        device.push_rx(&[0xCC]);
        let started = Instant::now();
        let err = channel.get_ack().unwrap_err();

        assert!(matches!(
            err,
            Error::Timeout {
                expected: 2,
                available: 1,
                ..
            }
        ));
        assert!(started.elapsed() < config.ack_timeout * 10);
    }

    #[test]
    fn test_handle_ack_attaches_trailing_text() {
        let device = SimDevice::silent();
        let mut port = device.port("sim0");
        let config = fast_config();
        let mut channel = CommandChannel::new(&mut port, &config);

        let mut reply = TokenTable::FAIL
            .response_bytes()
            .to_vec();
        reply.extend_from_slice(b"File already exists\r\n");
        device.push_rx(&reply);

        match channel.handle_ack() {
            Err(Error::ProtocolViolation { received, detail }) => {
                assert_eq!(received, AckResult::Fail);
                assert_eq!(detail, "File already exists");
            },
            other => panic!("expected protocol violation, got {other:?}"),
        }
    }

    #[test]
    fn test_send_path_appends_nul() {
        let device = SimDevice::silent();
        let mut port = device.port("sim0");
        let config = fast_config();
        let mut channel = CommandChannel::new(&mut port, &config);

        channel.send_path("/games/a.prg").unwrap();
        assert_eq!(device.written(), b"/games/a.prg\0");
        assert!(channel.send_path("bad\0path").is_err());
    }

    #[test]
    fn test_path_command_sequence() {
        let device = SimDevice::firmware("TeensyROM v0.6.7 ready\n");
        let mut port = device.port("sim0");
        let config = fast_config();
        let mut channel = CommandChannel::new(&mut port, &config);

        channel
            .path_command(TokenTable::LAUNCH_FILE, StorageTarget::Usb, "/demo.prg")
            .unwrap();

        let frames = device.frames();
        assert_eq!(frames[0], TokenTable::LAUNCH_FILE.command_bytes().to_vec());
        assert_eq!(frames[1], vec![0]);
        assert_eq!(frames[2], b"/demo.prg\0".to_vec());
    }
}

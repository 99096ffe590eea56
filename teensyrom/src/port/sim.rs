//! In-memory serial device used by the unit tests.
//!
//! A [`SimDevice`] records every `write` call as one frame and answers it
//! through a responder closure. [`SimDevice::firmware`] installs a model of
//! the cartridge firmware that acknowledges pings, file sends, launches and
//! deletes the way the real device does.

use {
    crate::{
        config::ConnectionConfig,
        error::{Error, Result},
        port::{Port, PortInfo, SerialConfig, Transport},
        protocol::TokenTable,
    },
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        thread,
        time::Duration,
    },
};

/// Timings small enough that failure paths finish in milliseconds.
pub(crate) fn fast_config() -> ConnectionConfig {
    // RUST_LOG=teensyrom=trace shows the wire traffic of a failing test.
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
    ConnectionConfig {
        write_timeout: Duration::from_millis(100),
        handshake_timeout: Duration::from_millis(300),
        ack_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(1),
        health_check_interval: Duration::from_millis(20),
        listener_interval: Duration::from_millis(5),
        ..ConnectionConfig::default()
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

struct DeviceState {
    rx: VecDeque<u8>,
    frames: Vec<Vec<u8>>,
    plugged: bool,
    opens: usize,
    write_delay: Duration,
    responder: Responder,
    late: VecDeque<Vec<u8>>,
    timeouts: Vec<Duration>,
}

/// Shared handle to one simulated cartridge.
#[derive(Clone)]
pub(crate) struct SimDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimDevice {
    pub(crate) fn with_responder(responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                rx: VecDeque::new(),
                frames: Vec::new(),
                plugged: true,
                opens: 0,
                write_delay: Duration::ZERO,
                responder: Box::new(responder),
                late: VecDeque::new(),
                timeouts: Vec::new(),
            })),
        }
    }

    /// A serial device that never answers.
    pub(crate) fn silent() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    /// A cartridge that answers pings with `banner`.
    pub(crate) fn firmware(banner: &str) -> Self {
        let mut model = FirmwareModel::new(banner, None);
        Self::with_responder(move |frame| model.respond(frame))
    }

    /// A cartridge that rejects the step named by `fail`.
    pub(crate) fn failing_firmware(banner: &str, fail: FailPoint) -> Self {
        let mut model = FirmwareModel::new(banner, Some(fail));
        Self::with_responder(move |frame| model.respond(frame))
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a handle directly, bypassing a transport.
    pub(crate) fn port(&self, name: &str) -> SimPort {
        self.lock()
            .opens += 1;
        SimPort {
            name: name.to_string(),
            device: self.clone(),
            closed: false,
        }
    }

    /// Queue bytes as if the device had sent them.
    pub(crate) fn push_rx(&self, bytes: &[u8]) {
        self.lock()
            .rx
            .extend(bytes);
    }

    /// Output the device keeps printing once the host has written something.
    /// Each chunk becomes readable on a poll that finds the buffer empty.
    pub(crate) fn trailing_output(&self, chunks: &[&[u8]]) {
        self.lock()
            .late
            .extend(chunks.iter().map(|c| c.to_vec()));
    }

    /// Bytes of trailing output not yet delivered.
    pub(crate) fn pending_output(&self) -> usize {
        self.lock()
            .late
            .iter()
            .map(Vec::len)
            .sum()
    }

    /// Every timeout set on a handle, in order.
    pub(crate) fn timeouts(&self) -> Vec<Duration> {
        self.lock()
            .timeouts
            .clone()
    }

    /// Every byte written so far.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.lock()
            .frames
            .concat()
    }

    /// Every write call so far, one entry per call.
    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        self.lock()
            .frames
            .clone()
    }

    pub(crate) fn opens(&self) -> usize {
        self.lock()
            .opens
    }

    pub(crate) fn unplug(&self) {
        self.lock()
            .plugged = false;
    }

    pub(crate) fn plug(&self) {
        self.lock()
            .plugged = true;
    }

    /// Slow every write down, widening race windows in concurrency tests.
    pub(crate) fn set_write_delay(&self, delay: Duration) {
        self.lock()
            .write_delay = delay;
    }
}

/// Handle returned by [`SimDevice::port`] and [`SimTransport::open`].
pub(crate) struct SimPort {
    name: String,
    device: SimDevice,
    closed: bool,
}

impl SimPort {
    fn usable(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if !self
            .device
            .lock()
            .plugged
        {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(())
    }
}

impl Read for SimPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.usable()?;
        let mut state = self
            .device
            .lock();
        if state
            .rx
            .is_empty()
        {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                state
                    .rx
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                state
                    .rx
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.usable()?;
        let delay = self
            .device
            .lock()
            .write_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut state = self
            .device
            .lock();
        state
            .frames
            .push(buf.to_vec());
        let responder = &mut state.responder;
        let reply = responder(buf);
        state
            .rx
            .extend(reply);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.usable()
    }
}

impl Port for SimPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_to_read(&self) -> Result<usize> {
        self.usable()?;
        let mut state = self
            .device
            .lock();
        if state
            .rx
            .is_empty()
            && !state
                .frames
                .is_empty()
        {
            if let Some(chunk) = state
                .late
                .pop_front()
            {
                state
                    .rx
                    .extend(chunk);
            }
        }
        Ok(state
            .rx
            .len())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.usable()?;
        self.device
            .lock()
            .rx
            .clear();
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.device
            .lock()
            .timeouts
            .push(timeout);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.usable()
            .is_ok()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Transport exposing a changeable set of simulated devices.
#[derive(Clone, Default)]
pub(crate) struct SimTransport {
    devices: Arc<Mutex<Vec<(String, SimDevice)>>>,
}

impl SimTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub(crate) fn with(self, name: &str, device: SimDevice) -> Self {
        self.add(name, device);
        self
    }

    pub(crate) fn add(&self, name: &str, device: SimDevice) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), device));
    }

    pub(crate) fn remove(&self, name: &str) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(n, _)| n != name);
    }
}

impl Transport for SimTransport {
    type Port = SimPort;

    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, d)| {
                d.lock()
                    .plugged
            })
            .map(|(name, _)| PortInfo::named(name.clone()))
            .collect())
    }

    fn open(&self, config: &SerialConfig) -> Result<SimPort> {
        let devices = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        devices
            .iter()
            .find(|(name, d)| {
                *name == config.port_name
                    && d.lock()
                        .plugged
            })
            .map(|(name, d)| d.port(name))
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such port: {}", config.port_name),
                ))
            })
    }
}

/// Step at which [`SimDevice::failing_firmware`] answers `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    /// The SendFile token itself.
    Announce,
    /// The length/checksum/storage/path header.
    Header,
    /// Never acknowledge the end of the payload.
    Complete,
    /// The path of a launch or delete.
    Path,
}

#[derive(Debug, Clone, Copy)]
enum Expect {
    Command,
    Length,
    Checksum { length: usize },
    Storage { length: Option<usize> },
    Path { length: Option<usize> },
    Payload { remaining: usize },
}

/// Byte-level model of the firmware's request handling.
struct FirmwareModel {
    banner: Vec<u8>,
    fail: Option<FailPoint>,
    expect: Expect,
}

impl FirmwareModel {
    fn new(banner: &str, fail: Option<FailPoint>) -> Self {
        Self {
            banner: banner
                .as_bytes()
                .to_vec(),
            fail,
            expect: Expect::Command,
        }
    }

    fn ack() -> Vec<u8> {
        TokenTable::ACK
            .response_bytes()
            .to_vec()
    }

    fn fail(reason: &str) -> Vec<u8> {
        let mut reply = TokenTable::FAIL
            .response_bytes()
            .to_vec();
        reply.extend_from_slice(reason.as_bytes());
        reply
    }

    fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
        match self.expect {
            Expect::Command => self.command(frame),
            Expect::Length => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&frame[..4]);
                self.expect = Expect::Checksum {
                    length: u32::from_be_bytes(bytes) as usize,
                };
                Vec::new()
            },
            Expect::Checksum { length } => {
                self.expect = Expect::Storage {
                    length: Some(length),
                };
                Vec::new()
            },
            Expect::Storage { length } => {
                self.expect = Expect::Path { length };
                Vec::new()
            },
            Expect::Path { length } => {
                self.expect = Expect::Command;
                match length {
                    Some(_) if self.fail == Some(FailPoint::Header) => {
                        Self::fail("Invalid destination path\r\n")
                    },
                    Some(0) => {
                        let mut reply = Self::ack();
                        reply.extend(Self::ack());
                        reply
                    },
                    Some(remaining) => {
                        self.expect = Expect::Payload { remaining };
                        Self::ack()
                    },
                    None if self.fail == Some(FailPoint::Path) => {
                        Self::fail("File not found\r\n")
                    },
                    None => Self::ack(),
                }
            },
            Expect::Payload { remaining } => {
                let remaining = remaining.saturating_sub(frame.len());
                if remaining > 0 {
                    self.expect = Expect::Payload { remaining };
                    return Vec::new();
                }
                self.expect = Expect::Command;
                if self.fail == Some(FailPoint::Complete) {
                    Vec::new()
                } else {
                    Self::ack()
                }
            },
        }
    }

    fn command(&mut self, frame: &[u8]) -> Vec<u8> {
        if frame.len() != 2 {
            return Vec::new();
        }
        match TokenTable::decode_command([frame[0], frame[1]]) {
            Some(t) if t == TokenTable::PING => self
                .banner
                .clone(),
            Some(t) if t == TokenTable::RESET => b"Resetting\r\n".to_vec(),
            Some(t) if t == TokenTable::SEND_FILE || t == TokenTable::LEGACY_SEND_FILE => {
                if self.fail == Some(FailPoint::Announce) {
                    return Self::fail("Busy\r\n");
                }
                self.expect = Expect::Length;
                Self::ack()
            },
            Some(t) if t == TokenTable::LAUNCH_FILE || t == TokenTable::DELETE_FILE => {
                self.expect = Expect::Storage { length: None };
                Self::ack()
            },
            _ => Vec::new(),
        }
    }
}

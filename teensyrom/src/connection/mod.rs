//! Ownership of the single port handle.
//!
//! [`ConnectionManager`] holds the open port behind one mutex, the
//! transmission lock. Whoever holds it owns the wire:
//!
//! ```text
//!                +--------------------------+
//!  commands ---> | lock() -> ChannelGuard    |  mode = Commanding
//!                |                          |
//!  handshake --> | ensure_connection()      |  (holds the lock throughout)
//!                |                          |
//!  listener ---> | try_lock, Listening only |  skipped while anyone else holds it
//!                +--------------------------+
//! ```
//!
//! Dropping the [`ChannelGuard`] returns the port to `Listening`, so the
//! passive listener resumes after success and failure alike.

pub mod commands;
pub mod handshake;
pub mod health;
pub mod listener;
pub mod supervisor;
mod worker;

use {
    crate::{
        config::ConnectionConfig,
        device::{detect_ports, order_candidates},
        error::{Error, Result},
        event::{Alert, EventSink},
        port::{Port, SerialConfig, Transport},
        protocol::CommandChannel,
        state::{ConnectionState, ConnectionStateMachine, Observable, PortSet},
    },
    log::{debug, info, warn},
    std::sync::{
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
        mpsc::Receiver,
    },
};

pub use {
    handshake::{DeviceIdentity, Handshake},
    health::HealthMonitor,
    listener::PassiveListener,
    supervisor::DeviceConnection,
};

/// Who currently owns the port's input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// Unsolicited bytes are device log output.
    #[default]
    Listening,
    /// A command is in flight; its response must not be consumed passively.
    Commanding,
}

struct PortSlot<P> {
    port: Option<P>,
    mode: ChannelMode,
}

struct Inner<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    slot: Mutex<PortSlot<T::Port>>,
    staged_port: Mutex<Option<String>>,
    known_ports: Mutex<Vec<String>>,
    connected_port: Mutex<Option<String>>,
    state: ConnectionStateMachine,
    ports: Observable<PortSet>,
    sink: Arc<dyn EventSink>,
}

/// Shared handle to the connection. Clones refer to the same port.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock_ignoring_poison<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager. No port is opened until [`Self::ensure_connection`].
    pub fn new(transport: T, config: ConnectionConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                config,
                slot: Mutex::new(PortSlot {
                    port: None,
                    mode: ChannelMode::Listening,
                }),
                staged_port: Mutex::new(None),
                known_ports: Mutex::new(Vec::new()),
                connected_port: Mutex::new(None),
                state: ConnectionStateMachine::new(),
                ports: Observable::new(PortSet::default()),
                sink,
            }),
        })
    }

    /// Connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// The transport ports are enumerated and opened through.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.inner
            .sink
            .as_ref()
    }

    pub(crate) fn state_machine(&self) -> &ConnectionStateMachine {
        &self.inner.state
    }

    pub(crate) fn port_set(&self) -> &Observable<PortSet> {
        &self.inner.ports
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .current()
    }

    /// Receive the current state now and every change after.
    pub fn subscribe_state(&self) -> Receiver<ConnectionState> {
        self.inner
            .state
            .subscribe()
    }

    /// Ports seen by the most recent discovery poll.
    pub fn ports(&self) -> PortSet {
        self.inner
            .ports
            .get()
    }

    /// Receive the current port set now and after every discovery poll.
    pub fn subscribe_ports(&self) -> Receiver<PortSet> {
        self.inner
            .ports
            .subscribe()
    }

    /// Try `name` first on the next connection attempt.
    ///
    /// An already open port is left alone.
    pub fn set_port(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidPort(name.to_string()));
        }
        debug!("Staged port {name}");
        *lock_ignoring_poison(&self.inner.staged_port) = Some(name.to_string());
        Ok(())
    }

    /// The port staged by [`Self::set_port`], if any.
    pub fn staged_port(&self) -> Option<String> {
        lock_ignoring_poison(&self.inner.staged_port).clone()
    }

    /// Replace the list of ports a cartridge answered on before.
    pub fn set_known_ports(&self, ports: Vec<String>) {
        *lock_ignoring_poison(&self.inner.known_ports) = ports;
    }

    /// Ports a cartridge answered on, most recent first.
    pub fn known_ports(&self) -> Vec<String> {
        lock_ignoring_poison(&self.inner.known_ports).clone()
    }

    /// Port the current connection uses.
    pub fn connected_port(&self) -> Option<String> {
        lock_ignoring_poison(&self.inner.connected_port).clone()
    }

    /// Mode of the port's input stream.
    ///
    /// Reports `Commanding` while the transmission lock is held elsewhere.
    pub fn channel_mode(&self) -> ChannelMode {
        match self
            .inner
            .slot
            .try_lock()
        {
            Ok(slot) => slot.mode,
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned
                    .into_inner()
                    .mode
            },
            Err(TryLockError::WouldBlock) => ChannelMode::Commanding,
        }
    }

    /// Whether the port handle is open and the OS still reports it usable.
    ///
    /// Never blocks: a command in flight counts as open.
    pub fn is_open(&self) -> bool {
        match self
            .inner
            .slot
            .try_lock()
        {
            Ok(slot) => slot
                .port
                .as_ref()
                .is_some_and(Port::is_open),
            Err(TryLockError::Poisoned(poisoned)) => poisoned
                .into_inner()
                .port
                .as_ref()
                .is_some_and(Port::is_open),
            Err(TryLockError::WouldBlock) => true,
        }
    }

    /// Open and handshake a port unless one is already open.
    ///
    /// Candidates are tried in the order given by
    /// [`order_candidates`](crate::device::order_candidates). Fails with
    /// [`Error::ConnectionFailure`] once every candidate has been tried.
    pub fn ensure_connection(&self) -> Result<()> {
        let mut slot = lock_ignoring_poison(&self.inner.slot);
        if slot
            .port
            .as_ref()
            .is_some_and(Port::is_open)
        {
            return Ok(());
        }
        if let Some(mut stale) = slot
            .port
            .take()
        {
            debug!("Closing stale handle on {}", stale.name());
            if let Err(e) = stale.close() {
                debug!("Closing stale handle failed: {e}");
            }
        }

        let detected = detect_ports(&self.inner.transport);
        let staged = self.staged_port();
        let known = self.known_ports();
        let candidates = order_candidates(&detected, staged.as_deref(), &known);
        if candidates.is_empty() {
            debug!("No serial ports to try");
        }

        for name in &candidates {
            match self.connect_to(name) {
                Ok((port, handshake)) => {
                    slot.port = Some(port);
                    slot.mode = ChannelMode::Listening;
                    drop(slot);
                    self.on_connected(name, &handshake)?;
                    return Ok(());
                },
                Err(e) => warn!("No TeensyROM on {name}: {e}"),
            }
        }

        Err(Error::ConnectionFailure {
            ports_tried: candidates.len(),
        })
    }

    fn connect_to(&self, name: &str) -> Result<(T::Port, Handshake)> {
        let config = &self.inner.config;
        let serial = SerialConfig::new(name, config.baud_rate).with_timeout(config.write_timeout);
        let mut port = self
            .inner
            .transport
            .open(&serial)?;
        match handshake::handshake(&mut port, config) {
            Ok(handshake) => Ok((port, handshake)),
            Err(e) => {
                if let Err(close_err) = port.close() {
                    debug!("Closing {name} failed: {close_err}");
                }
                Err(e)
            },
        }
    }

    fn on_connected(&self, name: &str, handshake: &Handshake) -> Result<()> {
        info!("Connected to TeensyROM on {name} ({})", handshake.identity);
        *lock_ignoring_poison(&self.inner.connected_port) = Some(name.to_string());
        // A cartridge in minimal mode is not remembered as a known port.
        if handshake.identity != DeviceIdentity::Minimal {
            let mut known = lock_ignoring_poison(&self.inner.known_ports);
            known.retain(|n| n != name);
            known.insert(0, name.to_string());
        }

        self.inner
            .state
            .enter_connected()?;

        if let Some(check) = handshake.firmware(&self.inner.config) {
            if check.is_supported() {
                debug!("{}", check.message());
            } else {
                self.sink()
                    .alert(&Alert::Firmware(check));
            }
        }
        let alert = match handshake.identity {
            DeviceIdentity::Minimal => Alert::MinimalMode {
                port: name.to_string(),
            },
            DeviceIdentity::Ready | DeviceIdentity::Busy => Alert::Connected {
                port: name.to_string(),
            },
        };
        self.sink()
            .alert(&alert);
        Ok(())
    }

    /// Close the port and move to `Connectable`.
    pub fn close_port(&self) -> Result<()> {
        self.release_port();
        match self.state() {
            ConnectionState::Start => Ok(()),
            _ => self
                .inner
                .state
                .transition(ConnectionState::Connectable)
                .map(|_| ()),
        }
    }

    /// Close the port and move to `ConnectionLost`.
    ///
    /// The lost alert is raised only when leaving `Connected`.
    pub(crate) fn mark_lost(&self) {
        let was_connected = self
            .state()
            .is_connected();
        let port = self.release_port();
        match self
            .inner
            .state
            .transition(ConnectionState::ConnectionLost)
        {
            Ok(true) if was_connected => {
                self.sink()
                    .alert(&Alert::ConnectionLost { port });
            },
            Ok(_) => {},
            Err(e) => debug!("Not marking connection lost: {e}"),
        }
    }

    fn release_port(&self) -> Option<String> {
        let mut slot = lock_ignoring_poison(&self.inner.slot);
        if let Some(mut port) = slot
            .port
            .take()
        {
            info!("Closing {}", port.name());
            if let Err(e) = port.close() {
                debug!("Closing {} failed: {e}", port.name());
            }
        }
        slot.mode = ChannelMode::Listening;
        drop(slot);
        lock_ignoring_poison(&self.inner.connected_port).take()
    }

    /// Take the transmission lock for one command sequence.
    ///
    /// Blocks while another command is in flight. Fails with
    /// [`Error::InvalidState`] unless connected. Pending input is discarded
    /// so stale bytes are not read as a response.
    pub fn lock(&self) -> Result<ChannelGuard<'_, T::Port>> {
        let state = self.state();
        if !state.is_connected() {
            return Err(Error::InvalidState(state));
        }
        let mut slot = lock_ignoring_poison(&self.inner.slot);
        let Some(port) = slot
            .port
            .as_mut()
        else {
            return Err(Error::InvalidState(self.state()));
        };
        port.clear_buffers()?;
        slot.mode = ChannelMode::Commanding;
        Ok(ChannelGuard {
            slot,
            config: &self.inner.config,
        })
    }

    /// Read whatever the device printed on its own.
    ///
    /// Returns `None` without blocking while a command holds the port.
    pub(crate) fn drain_passive(&self) -> Option<Vec<u8>> {
        let mut slot = match self
            .inner
            .slot
            .try_lock()
        {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        if slot.mode != ChannelMode::Listening {
            return None;
        }
        let port = slot
            .port
            .as_mut()?;
        match port.read_available() {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                debug!("Passive read failed: {e}");
                None
            },
        }
    }
}

/// Exclusive use of the port for one command sequence.
///
/// Dropping the guard restores [`ChannelMode::Listening`].
pub struct ChannelGuard<'a, P: Port> {
    slot: MutexGuard<'a, PortSlot<P>>,
    config: &'a ConnectionConfig,
}

impl<P: Port> ChannelGuard<'_, P> {
    /// Command channel over the locked port.
    pub fn channel(&mut self) -> Result<CommandChannel<'_, P>> {
        let config = self.config;
        match self
            .slot
            .port
            .as_mut()
        {
            Some(port) => Ok(CommandChannel::new(port, config)),
            None => Err(Error::InvalidState(ConnectionState::ConnectionLost)),
        }
    }
}

impl<P: Port> Drop for ChannelGuard<'_, P> {
    fn drop(&mut self) {
        self.slot
            .mode = ChannelMode::Listening;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::recording::RecordingSink,
        port::sim::{SimDevice, SimTransport, fast_config},
    };
    use std::time::Instant;

    fn manager(transport: SimTransport) -> (ConnectionManager<SimTransport>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let manager = ConnectionManager::new(transport, fast_config(), sink.clone()).unwrap();
        (manager, sink)
    }

    #[test]
    fn test_set_port_rejects_blank_names() {
        let (manager, _) = manager(SimTransport::new());
        assert!(matches!(manager.set_port(""), Err(Error::InvalidPort(_))));
        assert!(matches!(manager.set_port("  \t"), Err(Error::InvalidPort(_))));
        manager.set_port(" COM3 ").unwrap();
        assert_eq!(manager.staged_port().as_deref(), Some("COM3"));
    }

    #[test]
    fn test_silent_ports_fail_without_hanging() {
        let transport = SimTransport::new()
            .with("ttyACM0", SimDevice::silent())
            .with("ttyACM1", SimDevice::silent());
        let (manager, sink) = manager(transport);

        let started = Instant::now();
        let err = manager
            .ensure_connection()
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailure { ports_tried: 2 }));
        assert!(started.elapsed() < manager.config().handshake_timeout * 10);
        assert!(!manager.is_open());
        assert!(sink.alerts().is_empty());
    }

    #[test]
    fn test_no_ports_is_a_connection_failure() {
        let (manager, _) = manager(SimTransport::new());
        assert!(matches!(
            manager.ensure_connection(),
            Err(Error::ConnectionFailure { ports_tried: 0 })
        ));
    }

    #[test]
    fn test_handshake_skips_foreign_device() {
        let foreign = SimDevice::firmware("GPS ready\r\n");
        let cart = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let transport = SimTransport::new()
            .with("COM1", foreign.clone())
            .with("COM2", cart);
        let (manager, sink) = manager(transport);

        manager
            .ensure_connection()
            .unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.connected_port().as_deref(), Some("COM2"));
        assert_eq!(manager.known_ports(), vec!["COM2".to_string()]);
        assert_eq!(
            sink.alerts(),
            vec![Alert::Connected {
                port: "COM2".into()
            }]
        );
        assert_eq!(foreign.opens(), 1);
    }

    #[test]
    fn test_ensure_connection_is_idempotent() {
        let cart = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let (manager, sink) = manager(SimTransport::new().with("COM2", cart.clone()));

        manager
            .ensure_connection()
            .unwrap();
        manager
            .ensure_connection()
            .unwrap();
        assert_eq!(cart.opens(), 1);
        assert_eq!(
            sink.alerts()
                .len(),
            1
        );
    }

    #[test]
    fn test_staged_port_is_tried_first() {
        let a = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let b = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let (manager, _) = manager(
            SimTransport::new()
                .with("COM1", a.clone())
                .with("COM2", b.clone()),
        );
        manager
            .set_port("COM2")
            .unwrap();
        manager
            .ensure_connection()
            .unwrap();
        assert_eq!(manager.connected_port().as_deref(), Some("COM2"));
        assert_eq!(a.opens(), 0);
    }

    #[test]
    fn test_minimal_mode_raises_distinct_alert() {
        let cart = SimDevice::firmware("TeensyROM minimal mode 0.0.2\r\n");
        let (manager, sink) = manager(SimTransport::new().with("COM4", cart));
        manager
            .ensure_connection()
            .unwrap();
        assert_eq!(
            sink.alerts(),
            vec![Alert::MinimalMode {
                port: "COM4".into()
            }]
        );
    }

    #[test]
    fn test_minimal_mode_port_is_not_remembered() {
        let cart = SimDevice::firmware("TeensyROM minimal mode 0.0.2\r\n");
        let (manager, _) = manager(SimTransport::new().with("COM4", cart));
        manager.set_known_ports(vec!["COM1".into()]);
        manager
            .ensure_connection()
            .unwrap();
        assert_eq!(manager.connected_port().as_deref(), Some("COM4"));
        assert_eq!(manager.known_ports(), vec!["COM1".to_string()]);
    }

    #[test]
    fn test_ready_port_is_remembered_first() {
        let cart = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let (manager, _) = manager(SimTransport::new().with("COM4", cart));
        manager.set_known_ports(vec!["COM1".into(), "COM4".into()]);
        manager
            .ensure_connection()
            .unwrap();
        assert_eq!(manager.known_ports(), vec!["COM4".to_string(), "COM1".to_string()]);
    }

    #[test]
    fn test_foreign_minimal_banner_is_rejected() {
        let foreign = SimDevice::firmware("Bootloader: minimal config loaded\r\n");
        let (manager, sink) = manager(SimTransport::new().with("COM9", foreign));
        assert!(matches!(
            manager.ensure_connection(),
            Err(Error::ConnectionFailure { ports_tried: 1 })
        ));
        assert_ne!(manager.state(), ConnectionState::Connected);
        assert!(sink.alerts().is_empty());
    }

    #[test]
    fn test_old_firmware_connects_with_warning() {
        let cart = SimDevice::firmware("TeensyROM v0.5.0 ready\r\n");
        let (manager, sink) = manager(SimTransport::new().with("COM4", cart));
        manager
            .ensure_connection()
            .unwrap();
        let alerts = sink.alerts();
        assert!(matches!(alerts[0], Alert::Firmware(check) if !check.is_supported()));
        assert!(matches!(alerts[1], Alert::Connected { .. }));
    }

    #[test]
    fn test_lock_requires_connection() {
        let (manager, _) = manager(SimTransport::new());
        assert!(matches!(
            manager.lock(),
            Err(Error::InvalidState(ConnectionState::Start))
        ));
    }

    #[test]
    fn test_guard_switches_mode() {
        let cart = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let (manager, _) = manager(SimTransport::new().with("COM2", cart));
        manager
            .ensure_connection()
            .unwrap();

        assert_eq!(manager.channel_mode(), ChannelMode::Listening);
        {
            let _guard = manager
                .lock()
                .unwrap();
            assert_eq!(manager.channel_mode(), ChannelMode::Commanding);
            assert!(manager.is_open());
            assert!(manager.drain_passive().is_none());
        }
        assert_eq!(manager.channel_mode(), ChannelMode::Listening);
    }

    #[test]
    fn test_close_port_moves_to_connectable() {
        let cart = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let (manager, sink) = manager(SimTransport::new().with("COM2", cart));
        manager
            .ensure_connection()
            .unwrap();

        manager
            .close_port()
            .unwrap();
        assert_eq!(manager.state(), ConnectionState::Connectable);
        assert!(!manager.is_open());
        assert!(manager.connected_port().is_none());
        assert_eq!(
            sink.alerts()
                .len(),
            1
        );
    }

    #[test]
    fn test_mark_lost_alerts_once() {
        let cart = SimDevice::firmware("TeensyROM v0.6.7 ready\r\n");
        let (manager, sink) = manager(SimTransport::new().with("COM2", cart));
        manager
            .ensure_connection()
            .unwrap();

        manager.mark_lost();
        manager.mark_lost();
        assert_eq!(manager.state(), ConnectionState::ConnectionLost);
        let lost: Vec<_> = sink
            .alerts()
            .into_iter()
            .filter(|a| matches!(a, Alert::ConnectionLost { .. }))
            .collect();
        assert_eq!(
            lost,
            vec![Alert::ConnectionLost {
                port: Some("COM2".into())
            }]
        );
    }
}

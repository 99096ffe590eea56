//! Connection plus its background activities.
//!
//! [`DeviceConnection`] is what an application holds. `start()` launches
//! three workers that run independently of the command path:
//!
//! | Worker    | Interval                | Job                          |
//! |-----------|-------------------------|------------------------------|
//! | discovery | `health_check_interval` | [`PortDiscovery::poll`]      |
//! | health    | `health_check_interval` | [`HealthMonitor::tick`]      |
//! | listener  | `listener_interval`     | [`PassiveListener::poll`]    |
//!
//! `shutdown()` (also run on drop) stops and joins them, then closes the
//! port. An in-flight command is not interrupted; it ends at its own bound.

use {
    super::{ConnectionManager, HealthMonitor, PassiveListener, worker::Worker},
    crate::{
        config::ConnectionConfig,
        discovery::PortDiscovery,
        error::Result,
        event::{EventSink, LogSink},
        port::Transport,
        protocol::{StorageTarget, TransferSession},
        state::{ConnectionState, PortSet},
    },
    log::{debug, info},
    std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc::Receiver},
};

#[derive(Default)]
struct Workers {
    discovery: Option<Worker>,
    health: Option<Worker>,
    listener: Option<Worker>,
}

/// A supervised connection to one cartridge.
pub struct DeviceConnection<T: Transport> {
    manager: ConnectionManager<T>,
    workers: Mutex<Workers>,
}

#[cfg(feature = "native")]
impl DeviceConnection<crate::port::NativeTransport> {
    /// Connection over the OS serial ports, logging alerts.
    pub fn native(config: ConnectionConfig) -> Result<Self> {
        Self::new(crate::port::NativeTransport, config, Arc::new(LogSink))
    }
}

impl<T: Transport> DeviceConnection<T> {
    /// Create a stopped connection. Nothing runs until [`Self::start`] or
    /// [`Self::open`].
    pub fn new(transport: T, config: ConnectionConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        Ok(Self {
            manager: ConnectionManager::new(transport, config, sink)?,
            workers: Mutex::new(Workers::default()),
        })
    }

    /// Create a stopped connection whose alerts go to the log.
    pub fn with_log_sink(transport: T, config: ConnectionConfig) -> Result<Self> {
        Self::new(transport, config, Arc::new(LogSink))
    }

    fn workers(&self) -> MutexGuard<'_, Workers> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The underlying manager.
    pub fn manager(&self) -> &ConnectionManager<T> {
        &self.manager
    }

    /// Start any background worker that is not running.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers();
        let config = self
            .manager
            .config()
            .clone();

        if workers
            .discovery
            .is_none()
        {
            let mut discovery = PortDiscovery::new(self.manager.clone());
            workers.discovery = Some(Worker::spawn(
                "teensyrom-discovery",
                config.health_check_interval,
                move || {
                    discovery.poll();
                },
            )?);
        }
        if workers
            .health
            .is_none()
        {
            workers.health = Some(self.spawn_health(&config)?);
        }
        if workers
            .listener
            .is_none()
        {
            let mut listener = PassiveListener::new(self.manager.clone());
            workers.listener = Some(Worker::spawn(
                "teensyrom-listener",
                config.listener_interval,
                move || {
                    listener.poll();
                },
            )?);
        }
        info!("Connection supervisor started");
        Ok(())
    }

    fn spawn_health(&self, config: &ConnectionConfig) -> Result<Worker> {
        let monitor = HealthMonitor::new(self.manager.clone());
        Worker::spawn("teensyrom-health", config.health_check_interval, move || {
            monitor.tick();
        })
    }

    /// Connect now, then keep the connection supervised.
    pub fn open(&self) -> Result<()> {
        self.manager
            .ensure_connection()?;
        let mut workers = self.workers();
        if workers
            .health
            .is_none()
        {
            let config = self
                .manager
                .config()
                .clone();
            workers.health = Some(self.spawn_health(&config)?);
        }
        Ok(())
    }

    /// Stop reconnecting, close the port and move to `Connectable`.
    pub fn close(&self) -> Result<()> {
        if let Some(mut health) = self
            .workers()
            .health
            .take()
        {
            health.stop();
        }
        self.manager
            .close_port()
    }

    /// Stop every worker and close the port.
    pub fn shutdown(&self) {
        let stopped = {
            let mut workers = self.workers();
            [
                workers
                    .discovery
                    .take(),
                workers
                    .health
                    .take(),
                workers
                    .listener
                    .take(),
            ]
        };
        let any = stopped
            .iter()
            .any(Option::is_some);
        drop(stopped);
        if let Err(e) = self
            .manager
            .close_port()
        {
            debug!("Closing on shutdown: {e}");
        }
        if any {
            info!("Connection supervisor stopped");
        }
    }

    /// See [`ConnectionManager::set_port`].
    pub fn set_port(&self, name: &str) -> Result<()> {
        self.manager
            .set_port(name)
    }

    /// See [`ConnectionManager::set_known_ports`].
    pub fn set_known_ports(&self, ports: Vec<String>) {
        self.manager
            .set_known_ports(ports);
    }

    /// See [`ConnectionManager::known_ports`].
    pub fn known_ports(&self) -> Vec<String> {
        self.manager
            .known_ports()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.manager
            .state()
    }

    /// Receive every state change.
    pub fn subscribe_state(&self) -> Receiver<ConnectionState> {
        self.manager
            .subscribe_state()
    }

    /// Ports seen by the last discovery poll.
    pub fn ports(&self) -> PortSet {
        self.manager
            .ports()
    }

    /// Receive every discovery poll result.
    pub fn subscribe_ports(&self) -> Receiver<PortSet> {
        self.manager
            .subscribe_ports()
    }

    /// See [`ConnectionManager::ping`].
    pub fn ping(&self) -> Result<String> {
        self.manager
            .ping()
    }

    /// See [`ConnectionManager::reset`].
    pub fn reset(&self) -> Result<()> {
        self.manager
            .reset()
    }

    /// See [`ConnectionManager::send_file`].
    pub fn send_file<F>(&self, session: &mut TransferSession, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.manager
            .send_file(session, progress)
    }

    /// See [`ConnectionManager::launch_file`].
    pub fn launch_file(&self, storage: StorageTarget, path: &str) -> Result<()> {
        self.manager
            .launch_file(storage, path)
    }

    /// See [`ConnectionManager::delete_file`].
    pub fn delete_file(&self, storage: StorageTarget, path: &str) -> Result<()> {
        self.manager
            .delete_file(storage, path)
    }
}

impl<T: Transport> Drop for DeviceConnection<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            event::{Alert, recording::RecordingSink},
            port::sim::{SimDevice, SimTransport, fast_config},
        },
        std::time::{Duration, Instant},
    };

    const BANNER: &str = "TeensyROM v0.6.7 ready\r\n";

    fn wait_for(connection: &DeviceConnection<SimTransport>, state: ConnectionState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if connection.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_supervisor_connects_and_recovers() {
        let device = SimDevice::firmware(BANNER);
        let transport = SimTransport::new().with("COM3", device.clone());
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::new(transport, fast_config(), sink.clone()).unwrap();

        connection
            .start()
            .unwrap();
        assert!(wait_for(&connection, ConnectionState::Connected));
        assert!(
            connection
                .ping()
                .unwrap()
                .contains("TeensyROM")
        );

        device.unplug();
        assert!(wait_for(&connection, ConnectionState::Start));
        device.plug();
        assert!(wait_for(&connection, ConnectionState::Connected));

        connection.shutdown();
        let lost = sink
            .alerts()
            .iter()
            .filter(|a| matches!(a, Alert::ConnectionLost { .. }))
            .count();
        assert_eq!(lost, 1);
    }

    #[test]
    fn test_listener_forwards_output() {
        let device = SimDevice::firmware(BANNER);
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::new(
            SimTransport::new().with("COM3", device.clone()),
            fast_config(),
            sink.clone(),
        )
        .unwrap();
        connection
            .open()
            .unwrap();
        connection
            .start()
            .unwrap();

        device.push_rx(b"Menu: Games\r\n");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !sink
            .output()
            .contains("Menu: Games")
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(
            sink.output()
                .contains("Menu: Games")
        );
    }

    #[test]
    fn test_close_stops_reconnecting() {
        let device = SimDevice::firmware(BANNER);
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::new(
            SimTransport::new().with("COM3", device.clone()),
            fast_config(),
            sink,
        )
        .unwrap();
        connection
            .open()
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection
            .close()
            .unwrap();
        assert_eq!(connection.state(), ConnectionState::Connectable);
        let opens = device.opens();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(device.opens(), opens);
        assert_eq!(connection.state(), ConnectionState::Connectable);
    }

    #[test]
    fn test_shutdown_closes_port() {
        let device = SimDevice::firmware(BANNER);
        let sink = Arc::new(RecordingSink::default());
        let connection = DeviceConnection::new(
            SimTransport::new().with("COM3", device),
            fast_config(),
            sink,
        )
        .unwrap();
        connection
            .open()
            .unwrap();
        connection.shutdown();
        assert!(!connection.manager().is_open());
        assert!(connection.ping().is_err());
    }
}

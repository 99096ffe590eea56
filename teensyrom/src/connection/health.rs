//! Periodic liveness check and reconnection.
//!
//! | State            | Tick                                               |
//! |------------------|----------------------------------------------------|
//! | `Start`          | nothing; discovery advances the state              |
//! | `Connectable`    | handshake; failure moves to `ConnectionLost`       |
//! | `Connected`      | port still open? if not, alert once and reconnect  |
//! | `ConnectionLost` | handshake, retried every tick without backoff      |
//!
//! A tick never stops the monitor. Unexpected errors force
//! `ConnectionLost` and the next tick tries again.

use {
    super::ConnectionManager,
    crate::{error::Result, port::Transport, state::ConnectionState},
    log::{debug, warn},
};

/// Drives reconnection for a [`ConnectionManager`].
pub struct HealthMonitor<T: Transport> {
    manager: ConnectionManager<T>,
}

impl<T: Transport> HealthMonitor<T> {
    /// Supervise `manager`.
    pub fn new(manager: ConnectionManager<T>) -> Self {
        Self { manager }
    }

    /// Run one check.
    pub fn tick(&self) {
        if let Err(e) = self.check() {
            warn!("Health check failed: {e}");
            self.manager
                .mark_lost();
        }
    }

    fn check(&self) -> Result<()> {
        match self
            .manager
            .state()
        {
            ConnectionState::Start => Ok(()),
            ConnectionState::Connected => {
                if self
                    .manager
                    .is_open()
                {
                    return Ok(());
                }
                warn!("Port is no longer open");
                self.manager
                    .mark_lost();
                self.reconnect()
            },
            ConnectionState::Connectable | ConnectionState::ConnectionLost => self.reconnect(),
        }
    }

    fn reconnect(&self) -> Result<()> {
        match self
            .manager
            .ensure_connection()
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                debug!("Reconnect failed, retrying next tick: {e}");
                self.manager
                    .state_machine()
                    .transition(ConnectionState::ConnectionLost)
                    .map(|_| ())
            },
            Err(e) => Err(e),
        }
    }
}

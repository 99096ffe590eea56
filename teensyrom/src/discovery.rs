//! Serial port discovery.
//!
//! Each poll enumerates the OS ports and publishes the full set, changed or
//! not. Lifecycle effects happen only on the edges:
//!
//! - ports vanish: raise [`Alert::NoPorts`] and fall back to `Start`, unless
//!   `Connected`, where the health monitor owns the move to `ConnectionLost`
//! - ports appear while in `Start`: advance to `Connectable`
//!
//! An enumeration failure counts as an empty set.

use {
    crate::{
        connection::ConnectionManager,
        device::detect_ports,
        event::Alert,
        port::Transport,
        state::{ConnectionState, PortSet},
    },
    log::{debug, info},
};

/// Poll step for port discovery. Keeps the previous set for edge detection.
pub struct PortDiscovery<T: Transport> {
    manager: ConnectionManager<T>,
    previous: Option<PortSet>,
}

impl<T: Transport> PortDiscovery<T> {
    /// Publish into `manager`'s port set and state.
    pub fn new(manager: ConnectionManager<T>) -> Self {
        Self {
            manager,
            previous: None,
        }
    }

    /// Enumerate once and apply the result.
    pub fn poll(&mut self) -> PortSet {
        let current = PortSet::new(
            detect_ports(self.manager.transport())
                .into_iter()
                .map(|p| p.name),
        );
        self.log_changes(&current);
        self.manager
            .port_set()
            .publish(current.clone());

        let state = self
            .manager
            .state_machine();
        if current.is_empty() {
            let became_empty = self
                .previous
                .as_ref()
                .is_none_or(|p| !p.is_empty());
            if became_empty {
                self.manager
                    .sink()
                    .alert(&Alert::NoPorts);
            }
            if state.current() != ConnectionState::Connected {
                if let Err(e) = state.transition(ConnectionState::Start) {
                    debug!("Discovery could not return to Start: {e}");
                }
            }
        } else if state.current() == ConnectionState::Start {
            if let Err(e) = state.transition(ConnectionState::Connectable) {
                debug!("Discovery could not advance to Connectable: {e}");
            }
        }

        self.previous = Some(current.clone());
        current
    }

    fn log_changes(&self, current: &PortSet) {
        let Some(previous) = &self.previous else {
            debug!("Found {} serial port(s)", current.len());
            return;
        };
        for added in current
            .iter()
            .filter(|n| !previous.contains(n))
        {
            info!("Serial port appeared: {added}");
        }
        for removed in previous
            .iter()
            .filter(|n| !current.contains(n))
        {
            info!("Serial port disappeared: {removed}");
        }
    }
}

//! Connection lifecycle and observable values.
//!
//! ```text
//!            ports visible            handshake ok
//!   Start ----------------> Connectable ----------> Connected
//!     ^                      |     ^                 |    |
//!     |   ports vanish       |     |   close         |    | port lost /
//!     +----------------------+     +-----------------+    | health error
//!     |                                                    v
//!     +------------------------------------------- ConnectionLost
//!                ports vanish              (retries until Connected)
//! ```
//!
//! `Connected` never falls straight back to `Start`; it always passes through
//! `ConnectionLost` (or `Connectable` on an explicit close) first.

use {
    crate::error::{Error, Result},
    log::{debug, info},
    std::{
        fmt,
        sync::{
            Mutex, MutexGuard, PoisonError,
            mpsc::{self, Receiver, Sender},
        },
    },
};

/// Lifecycle of the link to the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No serial ports are visible.
    #[default]
    Start,
    /// Ports are visible; no handshake has succeeded yet.
    Connectable,
    /// Handshake succeeded and the port is open.
    Connected,
    /// A connection dropped or a reconnect attempt failed.
    ConnectionLost,
}

impl ConnectionState {
    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connectable, Connected, ConnectionLost, Start};
        matches!(
            (self, next),
            (Start, Connectable)
                | (Connectable, Connected | ConnectionLost | Start)
                | (Connected, ConnectionLost | Connectable)
                | (ConnectionLost, Connected | Connectable | Start)
        )
    }

    /// Whether commands may be issued.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "Start",
            Self::Connectable => "Connectable",
            Self::Connected => "Connected",
            Self::ConnectionLost => "ConnectionLost",
        })
    }
}

/// Ordered set of distinct port names seen in one poll. Replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortSet(Vec<String>);

impl PortSet {
    /// Build a set, sorting and removing duplicates.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .collect();
        names.sort();
        names.dedup();
        Self(names)
    }

    /// Whether no ports are visible.
    pub fn is_empty(&self) -> bool {
        self.0
            .is_empty()
    }

    /// Number of ports.
    pub fn len(&self) -> usize {
        self.0
            .len()
    }

    /// Whether `name` is in the set.
    pub fn contains(&self, name: &str) -> bool {
        self.0
            .iter()
            .any(|n| n == name)
    }

    /// Iterate over port names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .map(String::as_str)
    }
}

/// A value with push notifications.
///
/// Subscribers receive the current value immediately, then every published
/// value. Subscribers whose receiver was dropped are pruned on the next
/// publish.
pub struct Observable<T> {
    value: Mutex<T>,
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone + PartialEq> Observable<T> {
    /// Create with an initial value.
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn value(&self) -> MutexGuard<'_, T> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, value: &T) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| {
                tx.send(value.clone())
                    .is_ok()
            });
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.value()
            .clone()
    }

    /// Receive the current value now and every later publish.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        let current = self.get();
        // The receiver is alive here, so this cannot fail.
        let _ = tx.send(current);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Replace the value and notify, even if it did not change.
    pub fn publish(&self, value: T) {
        *self.value() = value.clone();
        self.notify(&value);
    }

    /// Replace the value and notify only if it changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.value();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.notify(&value);
        true
    }
}

/// The process's single [`ConnectionState`], with transitions checked
/// against the lifecycle.
pub struct ConnectionStateMachine {
    state: Observable<ConnectionState>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Start in [`ConnectionState::Start`].
    pub fn new() -> Self {
        Self {
            state: Observable::new(ConnectionState::Start),
        }
    }

    /// Current state.
    pub fn current(&self) -> ConnectionState {
        self.state
            .get()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> Receiver<ConnectionState> {
        self.state
            .subscribe()
    }

    /// Move to `next`.
    ///
    /// Returns `Ok(false)` if already there, and [`Error::InvalidTransition`]
    /// if the lifecycle forbids the move.
    pub fn transition(&self, next: ConnectionState) -> Result<bool> {
        let mut current = self
            .state
            .value();
        if *current == next {
            return Ok(false);
        }
        if !current.can_transition_to(next) {
            debug!("Rejected state transition {} -> {next}", *current);
            return Err(Error::InvalidTransition {
                from: *current,
                to: next,
            });
        }
        info!("Connection state: {} -> {next}", *current);
        *current = next;
        drop(current);
        self.state
            .notify(&next);
        Ok(true)
    }

    /// Move to `Connected`, stepping through `Connectable` from `Start`.
    pub fn enter_connected(&self) -> Result<()> {
        if self.current() == ConnectionState::Start {
            self.transition(ConnectionState::Connectable)?;
        }
        self.transition(ConnectionState::Connected)
            .map(|_| ())
    }
}

//! Passive reader for unsolicited device output.
//!
//! Runs only while the port is in [`ChannelMode::Listening`]; a command in
//! flight keeps its response bytes.
//!
//! [`ChannelMode::Listening`]: super::ChannelMode::Listening

use {
    super::ConnectionManager,
    crate::{monitor::OutputDecoder, port::Transport},
    log::trace,
};

/// Forwards device log output to the event sink.
pub struct PassiveListener<T: Transport> {
    manager: ConnectionManager<T>,
    decoder: OutputDecoder,
}

impl<T: Transport> PassiveListener<T> {
    /// Listen on `manager`'s port.
    pub fn new(manager: ConnectionManager<T>) -> Self {
        Self {
            manager,
            decoder: OutputDecoder::new(),
        }
    }

    /// Drain and forward whatever is buffered. Returns the bytes consumed.
    pub fn poll(&mut self) -> usize {
        let Some(bytes) = self
            .manager
            .drain_passive()
        else {
            return 0;
        };
        let text = self
            .decoder
            .push(&bytes);
        trace!("{} byte(s) of device output", bytes.len());
        if !text.is_empty() {
            self.manager
                .sink()
                .device_output(&text);
        }
        bytes.len()
    }
}

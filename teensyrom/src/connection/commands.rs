//! Commands issued over an established connection.
//!
//! Each command takes the transmission lock for its whole exchange, so
//! concurrent callers are served one after another in the order they got
//! the lock.

use {
    super::{ConnectionManager, handshake},
    crate::{
        error::{Error, Result},
        port::Transport,
        protocol::{FileTransferProtocol, StorageTarget, TokenTable, TransferSession},
    },
    log::{debug, info},
    std::thread,
};

impl<T: Transport> ConnectionManager<T> {
    /// Ping the cartridge and return its identity line.
    ///
    /// Fails with [`Error::NotIdentified`] if the reply does not name a
    /// TeensyROM.
    pub fn ping(&self) -> Result<String> {
        let mut guard = self.lock()?;
        let mut channel = guard.channel()?;
        channel.send_token(TokenTable::PING)?;
        let handshake = handshake::read_identity(channel.port(), self.config())?;
        debug!("Ping answered ({}): {}", handshake.identity, handshake.response);
        Ok(handshake.response)
    }

    /// Reset the cartridge. No acknowledgment is expected.
    ///
    /// Whatever the firmware prints before restarting goes to the event
    /// sink as device output.
    pub fn reset(&self) -> Result<()> {
        let text = {
            let mut guard = self.lock()?;
            let mut channel = guard.channel()?;
            channel.send_token(TokenTable::RESET)?;
            thread::sleep(self.config().ack_timeout);
            channel.read_text()?
        };
        info!("Reset sent");
        if !text
            .trim()
            .is_empty()
        {
            self.sink()
                .device_output(&text);
        }
        Ok(())
    }

    /// Upload a file.
    ///
    /// `progress` receives `(bytes_sent, total)` after every chunk.
    pub fn send_file<F>(&self, session: &mut TransferSession, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let token = self
            .config()
            .send_file_token();
        let mut guard = self.lock()?;
        let mut channel = guard.channel()?;
        FileTransferProtocol::new(&mut channel, token).send(session, progress)
    }

    /// Launch a file stored on the cartridge.
    pub fn launch_file(&self, storage: StorageTarget, path: &str) -> Result<()> {
        info!("Launching {storage}:{path}");
        let mut guard = self.lock()?;
        guard
            .channel()?
            .path_command(TokenTable::LAUNCH_FILE, storage, path)
    }

    /// Delete a file stored on the cartridge.
    pub fn delete_file(&self, storage: StorageTarget, path: &str) -> Result<()> {
        info!("Deleting {storage}:{path}");
        let mut guard = self.lock()?;
        guard
            .channel()?
            .path_command(TokenTable::DELETE_FILE, storage, path)
    }
}

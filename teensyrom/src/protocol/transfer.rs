//! Chunked file upload.
//!
//! ## Sequence
//!
//! Every arrow waits for an `Ack`; anything else aborts the whole transfer.
//!
//! ```text
//! host                                   firmware
//!  |-- SendFile token (2) ------------------>|
//!  |<--------------------------------- Ack --|   announce
//!  |-- length (4) checksum (2) storage (1) ->|
//!  |-- destination path + NUL -------------->|
//!  |<--------------------------------- Ack --|   header
//!  |-- payload, 16 KiB chunks -------------->|   payload
//!  |<--------------------------------- Ack --|   complete
//! ```
//!
//! All integers are sent most significant byte first.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{CommandChannel, StorageTarget, Token},
    },
    log::{debug, info, trace},
    std::fmt,
};

/// Payload chunk size. The final chunk carries the remainder.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// The step of a transfer that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Sending the send-file token.
    Announce,
    /// Sending length, checksum, storage target and path.
    Header,
    /// Streaming payload chunks.
    Payload,
    /// Waiting for the final acknowledgment.
    Complete,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Announce => "announce",
            Self::Header => "header",
            Self::Payload => "payload",
            Self::Complete => "completion",
        })
    }
}

/// 16-bit additive checksum the firmware verifies uploads with.
pub fn additive_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

/// Normalize a destination into the firmware's path form: forward slashes,
/// one leading slash, no repeated separators.
pub fn normalize_device_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .trim()
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Transient state of one upload.
#[derive(Debug, Clone)]
pub struct TransferSession {
    stream_length: u32,
    checksum: u16,
    storage: StorageTarget,
    destination_path: String,
    payload: Vec<u8>,
    bytes_sent: u32,
}

impl TransferSession {
    /// Prepare an upload, computing the checksum and normalizing the path.
    pub fn new(payload: Vec<u8>, storage: StorageTarget, destination: &str) -> Result<Self> {
        let checksum = additive_checksum(&payload);
        let path = normalize_device_path(destination);
        if path == "/" {
            return Err(Error::InvalidArgument(format!(
                "destination {destination:?} does not name a file"
            )));
        }
        Self::with_checksum(payload, checksum, storage, path)
    }

    /// Wrap already-prepared values; they are transmitted as given.
    pub fn with_checksum(
        payload: Vec<u8>,
        checksum: u16,
        storage: StorageTarget,
        destination_path: impl Into<String>,
    ) -> Result<Self> {
        let stream_length = u32::try_from(payload.len()).map_err(|_| {
            Error::InvalidArgument(format!(
                "payload of {} bytes exceeds the 4-byte length field",
                payload.len()
            ))
        })?;
        Ok(Self {
            stream_length,
            checksum,
            storage,
            destination_path: destination_path.into(),
            payload,
            bytes_sent: 0,
        })
    }

    /// Total payload length.
    pub fn stream_length(&self) -> u32 {
        self.stream_length
    }

    /// Checksum sent in the header.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Destination medium.
    pub fn storage(&self) -> StorageTarget {
        self.storage
    }

    /// Destination path on the medium.
    pub fn destination_path(&self) -> &str {
        &self.destination_path
    }

    /// Payload bytes written so far.
    pub fn bytes_sent(&self) -> u32 {
        self.bytes_sent
    }

    /// Whether every payload byte has been written.
    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.stream_length
    }

    fn next_chunk(&self) -> &[u8] {
        let start = self.bytes_sent as usize;
        let end = (start + CHUNK_SIZE).min(self.payload.len());
        &self.payload[start..end]
    }
}

/// Upload driver over a command channel.
pub struct FileTransferProtocol<'c, 'a, P: Port> {
    channel: &'c mut CommandChannel<'a, P>,
    token: Token,
}

impl<'c, 'a, P: Port> FileTransferProtocol<'c, 'a, P> {
    /// Announce uploads with `token` (current or legacy send-file).
    pub fn new(channel: &'c mut CommandChannel<'a, P>, token: Token) -> Self {
        Self { channel, token }
    }

    /// Run the full upload.
    ///
    /// `progress` is called with `(bytes_sent, total)` after every chunk.
    /// Any failure is wrapped in [`Error::TransferAborted`] naming the step.
    pub fn send<F>(&mut self, session: &mut TransferSession, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        info!(
            "Sending {} byte(s) to {}:{}",
            session.stream_length, session.storage, session.destination_path
        );

        self.announce()
            .map_err(|e| abort(TransferStage::Announce, session, e))?;
        self.header(session)
            .map_err(|e| abort(TransferStage::Header, session, e))?;
        self.payload(session, &mut progress)
            .map_err(|e| abort(TransferStage::Payload, session, e))?;
        self.channel
            .handle_ack()
            .map_err(|e| abort(TransferStage::Complete, session, e))?;

        info!("Transfer of {} complete", session.destination_path);
        Ok(())
    }

    fn announce(&mut self) -> Result<()> {
        self.channel
            .send_token(self.token)?;
        self.channel
            .handle_ack()
    }

    fn header(&mut self, session: &TransferSession) -> Result<()> {
        debug!(
            "Header: length={} checksum=0x{:04X} storage={}",
            session.stream_length, session.checksum, session.storage
        );
        self.channel
            .send_int_bytes(session.stream_length, 4)?;
        self.channel
            .send_int_bytes(u32::from(session.checksum), 2)?;
        self.channel
            .send_int_bytes(u32::from(session.storage.wire_value()), 1)?;
        self.channel
            .send_path(&session.destination_path)?;
        self.channel
            .handle_ack()
    }

    fn payload<F>(&mut self, session: &mut TransferSession, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        if session.is_complete() {
            return Ok(());
        }
        self.channel
            .clear_buffers()?;
        let total = session.stream_length as usize;
        while !session.is_complete() {
            let chunk = session.next_chunk();
            let len = chunk.len();
            self.channel
                .send_bytes(chunk)?;
            // Chunks never exceed CHUNK_SIZE, which fits in u32.
            session.bytes_sent += len as u32;
            trace!("Sent {}/{} byte(s)", session.bytes_sent, total);
            progress(session.bytes_sent as usize, total);
        }
        Ok(())
    }
}

fn abort(stage: TransferStage, session: &TransferSession, source: Error) -> Error {
    Error::TransferAborted {
        stage,
        bytes_sent: session.bytes_sent,
        source: Box::new(source),
    }
}

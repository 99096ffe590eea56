//! Decoding of text the cartridge prints on its own.
//!
//! Between commands the firmware writes log lines (menu selections, SD
//! errors, boot messages). Reads can split a multi-byte character, so the
//! decoder carries an incomplete UTF-8 suffix into the next read.

/// Incremental, lossy UTF-8 decoder for passive device output.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    pending: Vec<u8>,
}

impl OutputDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Append `bytes` and return everything that now decodes.
    ///
    /// Invalid sequences become `U+FFFD`; control characters other than
    /// newline and tab are dropped, and bare carriage returns become newlines.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending
            .extend_from_slice(bytes);

        let mut text = String::new();
        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                },
                Err(err) => {
                    let valid_up_to = consumed + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid_up_to]));
                    consumed = valid_up_to;
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed += len;
                        },
                        // truncated character at the end; wait for more
                        None => break,
                    }
                },
            }
        }
        self.pending
            .drain(..consumed);

        clean_device_text(&text)
    }

    /// Return whatever is still held back, replacing it lossily.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending
            .clear();
        clean_device_text(&rest)
    }
}

/// Normalize line endings and strip control characters.
pub fn clean_device_text(text: &str) -> String {
    let normalized = text
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    normalized
        .chars()
        .filter(|&ch| matches!(ch, '\n' | '\t') || !ch.is_control())
        .collect()
}

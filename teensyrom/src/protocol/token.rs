//! The token registry.
//!
//! Every exchange with the firmware starts with a 16-bit token, and every
//! step is answered by one. Tokens travel in opposite byte orders depending on
//! direction:
//!
//! ```text
//! host -> device   0x64BB  =>  [0x64, 0xBB]   (most significant first)
//! device -> host   0x64CC  =>  [0xCC, 0x64]   (least significant first)
//! ```

use std::fmt;

/// A fixed 16-bit code identifying a command or a protocol response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    name: &'static str,
    value: u16,
}

impl Token {
    /// Define a token.
    pub const fn new(name: &'static str, value: u16) -> Self {
        Self { name, value }
    }

    /// Symbolic name.
    pub const fn name(self) -> &'static str {
        self.name
    }

    /// Numeric code.
    pub const fn value(self) -> u16 {
        self.value
    }

    /// Wire form when the host sends this token.
    pub const fn command_bytes(self) -> [u8; 2] {
        self.value
            .to_be_bytes()
    }

    /// Wire form when the firmware sends this token.
    pub const fn response_bytes(self) -> [u8; 2] {
        self.value
            .to_le_bytes()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.name, self.value)
    }
}

/// Immutable registry of every token the firmware understands.
pub struct TokenTable;

impl TokenTable {
    /// Step succeeded.
    pub const ACK: Token = Token::new("Ack", 0x64CC);
    /// Step failed; the firmware may follow it with a text reason.
    pub const FAIL: Token = Token::new("Fail", 0x9B7F);
    /// Identify yourself.
    pub const PING: Token = Token::new("Ping", 0x6455);
    /// Reboot the cartridge.
    pub const RESET: Token = Token::new("Reset", 0x64EE);
    /// Upload a file (current firmware).
    pub const SEND_FILE: Token = Token::new("SendFile", 0x64BB);
    /// Upload a file (firmware before the token renumbering).
    pub const LEGACY_SEND_FILE: Token = Token::new("LegacySendFile", 0x64AA);
    /// Launch a file from storage.
    pub const LAUNCH_FILE: Token = Token::new("LaunchFile", 0x6444);
    /// Remove a file from storage.
    pub const DELETE_FILE: Token = Token::new("DeleteFile", 0x64CF);

    /// All registered tokens.
    pub const ALL: [Token; 8] = [
        Self::ACK,
        Self::FAIL,
        Self::PING,
        Self::RESET,
        Self::SEND_FILE,
        Self::LEGACY_SEND_FILE,
        Self::LAUNCH_FILE,
        Self::DELETE_FILE,
    ];

    /// Find a token by numeric code.
    pub fn lookup(value: u16) -> Option<Token> {
        Self::ALL
            .into_iter()
            .find(|t| t.value == value)
    }

    /// Find a token by name, ignoring case.
    pub fn by_name(name: &str) -> Option<Token> {
        Self::ALL
            .into_iter()
            .find(|t| {
                t.name
                    .eq_ignore_ascii_case(name)
            })
    }

    /// Decode a host-to-device token.
    pub fn decode_command(bytes: [u8; 2]) -> Option<Token> {
        Self::lookup(u16::from_be_bytes(bytes))
    }

    /// Decode a device-to-host token.
    pub fn decode_response(bytes: [u8; 2]) -> Option<Token> {
        Self::lookup(u16::from_le_bytes(bytes))
    }
}

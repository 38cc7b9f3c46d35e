use std::io;
use std::time::Duration;
use thiserror::Error;

/// Reasons a byte sequence could not be read as a protocol frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid protocol prefix")]
    BadPrefix,

    #[error("header needs {needed} bytes, got {available}")]
    ShortHeader { needed: usize, available: usize },

    #[error("invalid length: declared {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("field needs {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("string field is not NUL terminated")]
    Unterminated,

    #[error("malformed length varint")]
    BadVarint,
}

/// Custom error types for the PH803-W client
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Ignore data package because invalid message type {0}")]
    UnknownMessageType(u8),

    #[error("Login rejected by device, check the passcode (status {0})")]
    AuthRejected(u8),

    #[error("No response of type {message_type:#04x} within {timeout:?}")]
    ResponseTimeout { message_type: u8, timeout: Duration },

    #[error("Device not connected")]
    NotConnected,

    #[error("Already connected to device")]
    AlreadyConnected,

    #[error("Session closed")]
    Closed,

    #[error("Discovery socket error: {0}")]
    DiscoverySocket(#[source] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns true for errors caused by malformed input rather than a failed operation
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Error::Framing(_) | Error::UnknownMessageType(_))
    }
}

//! Protocol error types

use thiserror::Error;

/// Protocol-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame does not follow the message grammar
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Unknown binary message type tag
    #[error("Invalid message type: {0:#04x}")]
    InvalidMessageType(u8),

    /// Unknown leading keyword of a text frame
    #[error("Unknown message keyword: {0}")]
    UnknownKeyword(String),

    /// A field is longer than the protocol allows
    #[error("Field {field} too long: {len} bytes (max: {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A field is empty or contains characters outside its alphabet
    #[error("Invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    /// Datagram shorter than the fixed header
    #[error("Datagram too short: {len} bytes (min: {min})")]
    TooShort { len: usize, min: usize },

    /// Confirm or reply references a message id we are not waiting on
    #[error("Unexpected reference id: expected {expected}, got {actual}")]
    UnexpectedReference { expected: u16, actual: u16 },

    /// Message has no representation in the requested wire format
    #[error("Message {0} cannot be encoded for this transport")]
    Unencodable(&'static str),
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

//! Network error types

use std::net::IpAddr;
use thiserror::Error;

/// Network-related errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Host name could not be resolved to an IPv4 address
    #[error("Unable to resolve {0}")]
    Resolve(String),

    /// Connection setup failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Channel used before `connect`
    #[error("Not connected to server")]
    NotConnected,

    /// Server closed the stream
    #[error("Connection closed by server")]
    Closed,

    /// Datagram arrived from a host other than the server
    #[error("Datagram from unexpected address {actual} (expected {expected})")]
    AddressMismatch { expected: IpAddr, actual: IpAddr },

    /// Stream write accepted fewer bytes than the frame holds
    #[error("Partial write: {written} of {len} bytes")]
    PartialWrite { written: usize, len: usize },

    /// No confirmation after every retransmission
    #[error("Server unreachable: no confirmation after {attempts} attempts")]
    Unreachable { attempts: u32 },

    /// Malformed or unexpected wire data
    #[error("Protocol error: {0}")]
    Protocol(#[from] ipk_proto::ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Errors after which the exchange may continue
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NetworkError::AddressMismatch { .. }
                | NetworkError::Protocol(ipk_proto::ProtocolError::UnexpectedReference { .. })
        )
    }
}

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

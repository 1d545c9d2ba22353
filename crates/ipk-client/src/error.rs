//! Client error types

use thiserror::Error;

/// Client-related errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] ipk_transport::NetworkError),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ipk_proto::ProtocolError),

    /// Invalid user command
    #[error("{0}")]
    Command(#[from] crate::command::CommandError),

    /// No reply within the reply timeout
    #[error("Operation timed out")]
    Timeout,

    /// System facility failure unrelated to the protocol
    #[error("System error: {0}")]
    General(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Malformed or unexpected data from the server
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_) | ClientError::Network(ipk_transport::NetworkError::Protocol(_))
        )
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

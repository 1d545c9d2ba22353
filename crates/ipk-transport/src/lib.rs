//! IPK25-CHAT Transport - Networking layer for the chat client
//!
//! This crate owns the socket to the chat server. It provides a stream (TCP)
//! channel and a datagram (UDP) channel with confirmation, retransmission and
//! duplicate suppression, both behind the [`Channel`] trait.

pub mod channel;
pub mod datagram;
pub mod error;
pub mod stream;

pub use channel::{resolve, Channel, DatagramConfig, SendOutcome, Transport, TransportKind};
pub use datagram::DatagramChannel;
pub use error::{NetworkError, Result};
pub use stream::StreamChannel;

/// Default server port
pub const DEFAULT_PORT: u16 = 4567;

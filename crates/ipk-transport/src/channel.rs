//! Transport channel abstraction
//!
//! A channel owns the socket to the chat server and speaks protocol messages
//! in the wire format of its transport. [`Transport`] is the closed set of
//! channels the client can run on; it is chosen once from configuration.

use crate::{DatagramChannel, NetworkError, Result, StreamChannel};
use async_trait::async_trait;
use ipk_proto::{Message, Response};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Transport protocol selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Reliable byte stream, text frames
    Tcp,
    /// Unreliable datagrams, binary frames with confirmations
    Udp,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            other => Err(format!("unknown transport {:?} (expected tcp or udp)", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::Udp => f.write_str("udp"),
        }
    }
}

/// Retransmission parameters of the datagram transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramConfig {
    /// How long to wait for a confirmation before retransmitting
    pub timeout: Duration,

    /// Retransmissions after the first attempt
    pub retransmissions: u8,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
            retransmissions: 3,
        }
    }
}

/// How a send ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Message delivered (and confirmed, on datagram transport)
    Sent,

    /// Server sent `ERR` or `BYE` while we waited; it is in the backlog
    ServerExit,
}

/// Transport channel trait
///
/// `receive` only fills the internal buffer; `process` decodes what was
/// buffered, one message per call.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Establish the connection (no-op for datagrams)
    async fn connect(&mut self) -> Result<()>;

    /// Deliver a request message
    async fn send(&mut self, message: &Message) -> Result<SendOutcome>;

    /// Read whatever the socket has into the receive buffer
    async fn receive(&mut self) -> Result<()>;

    /// Like `receive`, but never waits
    ///
    /// Returns `false` when the socket had nothing to read.
    fn try_receive(&mut self) -> Result<bool>;

    /// Decode the next buffered message
    ///
    /// Returns a response flagged `incomplete` when nothing decodable is
    /// buffered.
    async fn process(&mut self) -> Result<Response>;

    /// Say goodbye as `display_name`, best effort
    async fn disconnect(&mut self, display_name: &str) -> Result<()>;

    /// Wait until the socket has data to read
    async fn readable(&self) -> Result<()>;

    /// Responses observed while a send was waiting for its confirmation
    fn take_backlog(&mut self) -> Vec<Response>;

    /// Get the transport name
    fn name(&self) -> &str;
}

/// The channel selected at startup
pub enum Transport {
    Stream(StreamChannel),
    Datagram(DatagramChannel),
}

impl Transport {
    /// Resolve `host` and build the channel for `kind`
    ///
    /// The stream variant still has to be connected.
    pub async fn open(
        kind: TransportKind,
        host: &str,
        port: u16,
        datagram: DatagramConfig,
    ) -> Result<Self> {
        let server = resolve(host, port).await?;

        match kind {
            TransportKind::Tcp => Ok(Transport::Stream(StreamChannel::new(server))),
            TransportKind::Udp => Ok(Transport::Datagram(
                DatagramChannel::bind(server, datagram).await?,
            )),
        }
    }

    /// Get the transport kind
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stream(_) => TransportKind::Tcp,
            Transport::Datagram(_) => TransportKind::Udp,
        }
    }

    /// Current server address (the datagram port may have been rebound)
    pub fn server_addr(&self) -> SocketAddr {
        match self {
            Transport::Stream(c) => c.server_addr(),
            Transport::Datagram(c) => c.server_addr(),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPK25-CHAT over {} to {}", self.kind(), self.server_addr())
    }
}

#[async_trait]
impl Channel for Transport {
    async fn connect(&mut self) -> Result<()> {
        match self {
            Transport::Stream(c) => c.connect().await,
            Transport::Datagram(c) => c.connect().await,
        }
    }

    async fn send(&mut self, message: &Message) -> Result<SendOutcome> {
        match self {
            Transport::Stream(c) => c.send(message).await,
            Transport::Datagram(c) => c.send(message).await,
        }
    }

    async fn receive(&mut self) -> Result<()> {
        match self {
            Transport::Stream(c) => c.receive().await,
            Transport::Datagram(c) => c.receive().await,
        }
    }

    fn try_receive(&mut self) -> Result<bool> {
        match self {
            Transport::Stream(c) => c.try_receive(),
            Transport::Datagram(c) => c.try_receive(),
        }
    }

    async fn process(&mut self) -> Result<Response> {
        match self {
            Transport::Stream(c) => c.process().await,
            Transport::Datagram(c) => c.process().await,
        }
    }

    async fn disconnect(&mut self, display_name: &str) -> Result<()> {
        match self {
            Transport::Stream(c) => c.disconnect(display_name).await,
            Transport::Datagram(c) => c.disconnect(display_name).await,
        }
    }

    async fn readable(&self) -> Result<()> {
        match self {
            Transport::Stream(c) => c.readable().await,
            Transport::Datagram(c) => c.readable().await,
        }
    }

    fn take_backlog(&mut self) -> Vec<Response> {
        match self {
            Transport::Stream(c) => c.take_backlog(),
            Transport::Datagram(c) => c.take_backlog(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Transport::Stream(c) => c.name(),
            Transport::Datagram(c) => c.name(),
        }
    }
}

/// Resolve `host:port` to its first IPv4 address
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NetworkError::Resolve(format!("{}: {}", host, e)))?;

    addrs
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| NetworkError::Resolve(format!("{}: no IPv4 address", host)))
}

//! Datagram (UDP) channel
//!
//! UDP gives no delivery guarantee, so the protocol adds its own:
//!
//! - Every request carries a 16-bit message id and is retransmitted until the
//!   server confirms that id or the retransmission budget runs out
//!   (stop-and-wait, one request in flight).
//! - Every inbound message except `CONFIRM` is confirmed right away, even when
//!   it was already seen, because our earlier confirmation may have been lost.
//!   Ids already processed are reported as duplicates.
//! - The server answers from a freshly allocated port; the first datagram we
//!   receive tells us which one, and all later traffic goes there.

use crate::{Channel, DatagramConfig, NetworkError, Result, SendOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use ipk_proto::{BinaryCodec, Message, MessageType, ProtocolError, Response};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Largest datagram we can receive
const MAX_DATAGRAM: usize = 65_535;

/// UDP channel to the chat server
pub struct DatagramChannel {
    socket: UdpSocket,
    server: SocketAddr,
    port_rebound: bool,
    config: DatagramConfig,

    /// Id for the next request
    next_id: u16,
    /// Id of the request waiting for its confirmation
    in_flight: Option<u16>,
    /// Id of the last confirmed request
    last_confirmed: Option<u16>,
    /// Inbound ids already processed
    seen: HashSet<u16>,

    recv_buf: Vec<u8>,
    pending: Option<Bytes>,
    backlog: Vec<Response>,
}

impl DatagramChannel {
    /// Bind an ephemeral local socket for talking to `server`
    pub async fn bind(server: SocketAddr, config: DatagramConfig) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;

        debug!(
            local = %socket.local_addr()?,
            server = %server,
            timeout_ms = config.timeout.as_millis() as u64,
            retransmissions = config.retransmissions,
            "UDP socket bound"
        );

        Ok(Self {
            socket,
            server,
            port_rebound: false,
            config,
            next_id: 0,
            in_flight: None,
            last_confirmed: None,
            seen: HashSet::new(),
            recv_buf: vec![0u8; MAX_DATAGRAM],
            pending: None,
            backlog: Vec::new(),
        })
    }

    /// Get the server address, including a rebound port
    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Get the local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Id the next request will carry
    pub fn next_id(&self) -> u16 {
        self.next_id
    }

    async fn transmit(&self, frame: &[u8]) -> Result<()> {
        self.socket.send_to(frame, self.server).await?;
        Ok(())
    }

    /// Acknowledge inbound message `id`; never retransmitted
    async fn confirm(&self, id: u16) -> Result<()> {
        debug!(id, "Confirming datagram");
        self.transmit(&BinaryCodec::confirm(id)).await
    }

    fn check_source(&mut self, from: SocketAddr) -> Result<()> {
        if from.ip() != self.server.ip() {
            return Err(NetworkError::AddressMismatch {
                expected: self.server.ip(),
                actual: from.ip(),
            });
        }

        if from.port() != self.server.port() {
            if self.port_rebound {
                warn!(
                    port = from.port(),
                    current = self.server.port(),
                    "Datagram from another server port, keeping current port"
                );
            } else {
                info!(port = from.port(), "Server moved to dynamic port");
                self.server.set_port(from.port());
            }
        }

        self.port_rebound = true;
        Ok(())
    }

    /// Keep a received datagram for `process`
    fn accept(&mut self, len: usize, from: SocketAddr) -> Result<()> {
        self.check_source(from)?;

        debug!(bytes = len, from = %from, "Received datagram");
        self.pending = Some(Bytes::copy_from_slice(&self.recv_buf[..len]));
        Ok(())
    }

    fn on_confirm(&self, ref_id: u16) -> Result<Response> {
        if self.in_flight == Some(ref_id) {
            return Ok(Response::from_message(&Message::Confirm { ref_id }));
        }

        if self.last_confirmed == Some(ref_id) {
            debug!(ref_id, "Late confirmation of an already confirmed message");
            return Ok(Response::duplicate(MessageType::Confirm));
        }

        Err(ProtocolError::UnexpectedReference {
            expected: self.in_flight.unwrap_or(self.next_id),
            actual: ref_id,
        }
        .into())
    }

    /// A reply answers the last confirmed request, or the one still in flight
    /// when its confirmation was lost
    fn check_reply_ref(&self, ref_id: u16) -> Result<()> {
        if self.last_confirmed == Some(ref_id) || self.in_flight == Some(ref_id) {
            return Ok(());
        }

        Err(ProtocolError::UnexpectedReference {
            expected: self.next_id.wrapping_sub(1),
            actual: ref_id,
        }
        .into())
    }

    async fn send_reliable(&mut self, frame: &[u8], id: u16) -> Result<SendOutcome> {
        let attempts = u32::from(self.config.retransmissions) + 1;

        for attempt in 1..=attempts {
            debug!(id, attempt, "Transmitting datagram");
            self.transmit(frame).await?;

            let deadline = Instant::now() + self.config.timeout;
            if let Some(outcome) = self.await_confirm(deadline).await? {
                return Ok(outcome);
            }

            if attempt < attempts {
                warn!(id, attempt, "No confirmation, retransmitting");
            }
        }

        Err(NetworkError::Unreachable { attempts })
    }

    /// Wait for the confirmation of the in-flight request
    ///
    /// Returns `None` when the deadline passes.
    async fn await_confirm(&mut self, deadline: Instant) -> Result<Option<SendOutcome>> {
        loop {
            match tokio::time::timeout_at(deadline, self.receive()).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) if e.is_recoverable() => {
                    warn!("Dropping datagram: {}", e);
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(())) => {}
            }

            let response = match self.process().await {
                Ok(response) => response,
                Err(e) if e.is_recoverable() => {
                    warn!("Dropping datagram: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if response.incomplete || response.duplicate {
                continue;
            }

            if response.message_type == MessageType::Confirm {
                return Ok(Some(SendOutcome::Sent));
            }

            let terminal = response.is_terminal();
            self.backlog.push(response);

            if terminal {
                return Ok(Some(SendOutcome::ServerExit));
            }
        }
    }
}

#[async_trait]
impl Channel for DatagramChannel {
    async fn connect(&mut self) -> Result<()> {
        debug!("UDP is connectionless, nothing to connect");
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<SendOutcome> {
        let id = self.next_id;
        let frame = BinaryCodec::encode(message, id)?;

        debug!(
            id,
            message_type = %message.message_type(),
            len = frame.len(),
            "Sending datagram"
        );

        self.in_flight = Some(id);
        let result = self.send_reliable(&frame, id).await;
        self.in_flight = None;

        let outcome = result?;
        self.last_confirmed = Some(id);
        self.next_id = self.next_id.wrapping_add(1);

        Ok(outcome)
    }

    async fn receive(&mut self) -> Result<()> {
        let (len, from) = self.socket.recv_from(&mut self.recv_buf).await?;
        self.accept(len, from)
    }

    fn try_receive(&mut self) -> Result<bool> {
        let (len, from) = match self.socket.try_recv_from(&mut self.recv_buf) {
            Ok(received) => received,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        self.accept(len, from)?;
        Ok(true)
    }

    async fn process(&mut self) -> Result<Response> {
        let data = match self.pending.take() {
            Some(data) => data,
            None => return Ok(Response::incomplete()),
        };

        let (tag, id) = BinaryCodec::peek_header(&data)?;

        if tag == MessageType::Confirm as u8 {
            return self.on_confirm(id);
        }

        self.confirm(id).await?;

        let message_type = MessageType::from_u8(tag)?;
        if !self.seen.insert(id) {
            debug!(id, message_type = %message_type, "Duplicate datagram");
            return Ok(Response::duplicate(message_type));
        }

        let datagram = BinaryCodec::decode(&data)?;
        if let Message::Reply { ref_id, .. } = datagram.message {
            self.check_reply_ref(ref_id)?;
        }

        debug!(id, message_type = %message_type, "Decoded datagram");
        Ok(Response::from_message(&datagram.message))
    }

    async fn disconnect(&mut self, display_name: &str) -> Result<()> {
        info!("Disconnecting from {}", self.server);

        let bye = Message::Bye {
            display_name: display_name.to_string(),
        };
        self.send(&bye).await?;
        Ok(())
    }

    async fn readable(&self) -> Result<()> {
        self.socket.readable().await?;
        Ok(())
    }

    fn take_backlog(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.backlog)
    }

    fn name(&self) -> &str {
        "udp"
    }
}

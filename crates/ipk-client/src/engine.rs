//! Protocol engine
//!
//! Sits between the session and the transport channel. Requests go out
//! through [`ProtocolEngine::send`]; server messages that arrive while the
//! session is busy (waiting for a reply or a confirmation) are kept in a FIFO
//! queue and handed out by [`ProtocolEngine::next_pending`].

use crate::{config::ClientConfig, ClientError, Result};
use ipk_proto::{Message, MessageType, Response};
use ipk_transport::{Channel, SendOutcome, Transport};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Protocol engine over one transport channel
pub struct ProtocolEngine {
    transport: Transport,
    queue: VecDeque<Response>,
}

impl ProtocolEngine {
    /// Wrap an opened transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            queue: VecDeque::new(),
        }
    }

    /// Resolve the server and open the configured transport
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let transport = Transport::open(
            config.transport,
            &config.server,
            config.port,
            config.datagram_config(),
        )
        .await?;

        Ok(Self::new(transport))
    }

    /// Establish the connection
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.connect().await?;
        info!(transport = self.transport.name(), "Connected: {}", self.transport);
        Ok(())
    }

    /// Send a request
    ///
    /// Anything the server said while the datagram transport waited for the
    /// confirmation ends up in the pending queue.
    pub async fn send(&mut self, message: &Message) -> Result<SendOutcome> {
        let result = self.transport.send(message).await;
        self.absorb_backlog();

        let outcome = result?;
        if outcome == SendOutcome::ServerExit {
            info!(message_type = %message.message_type(), "Server ended the conversation during send");
        }
        Ok(outcome)
    }

    /// Wait up to `timeout` for a message of type `expected`
    ///
    /// Unrelated messages are queued. A server `ERR` or `BYE` is queued and
    /// also returned so the caller stops waiting. The queue is searched
    /// first, since a datagram reply may overtake the confirmation of its
    /// request.
    pub async fn await_response(
        &mut self,
        timeout: Duration,
        expected: MessageType,
    ) -> Result<Response> {
        if let Some(response) = self.take_queued(expected) {
            return Ok(response);
        }

        let deadline = Instant::now() + timeout;

        loop {
            while let Some(response) = self.next_decoded().await? {
                if response.message_type == expected {
                    self.queue_buffered().await?;
                    return Ok(response);
                }

                if response.is_terminal() {
                    self.queue.push_back(response.clone());
                    return Ok(response);
                }

                debug!(message_type = %response.message_type, "Queued while awaiting {}", expected);
                self.queue.push_back(response);
            }

            match tokio::time::timeout_at(deadline, self.transport.receive()).await {
                Err(_) => return Err(ClientError::Timeout),
                Ok(Err(e)) if e.is_recoverable() => warn!("Dropping message: {}", e),
                Ok(result) => result?,
            }
        }
    }

    /// Read what the socket has and queue every decoded message
    ///
    /// Returns right away when the socket turns out to be empty.
    pub async fn poll_inbound(&mut self) -> Result<()> {
        match self.transport.try_receive() {
            Ok(true) => {}
            Ok(false) => {
                debug!("Spurious readiness, nothing to read");
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                warn!("Dropping message: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.queue_buffered().await
    }

    /// First queued message that answers a wait for `expected`
    ///
    /// A match for `expected` leaves the queue; `ERR` and `BYE` stay queued
    /// for the session to dispatch.
    fn take_queued(&mut self, expected: MessageType) -> Option<Response> {
        let index = self
            .queue
            .iter()
            .position(|r| r.message_type == expected || r.is_terminal())?;

        if self.queue[index].message_type == expected {
            debug!(message_type = %expected, "Found in pending queue");
            self.queue.remove(index)
        } else {
            Some(self.queue[index].clone())
        }
    }

    /// Queue every complete message left in the receive buffer
    async fn queue_buffered(&mut self) -> Result<()> {
        while let Some(response) = self.next_decoded().await? {
            self.queue.push_back(response);
        }
        Ok(())
    }

    /// Report a failure to the server
    pub async fn error(&mut self, display_name: &str, content: &str) -> Result<SendOutcome> {
        let message = Message::Err {
            display_name: display_name.to_string(),
            content: content.to_string(),
        };
        self.send(&message).await
    }

    /// Say goodbye and close our side
    pub async fn disconnect(&mut self, display_name: &str) -> Result<()> {
        let result = self.transport.disconnect(display_name).await;
        self.absorb_backlog();
        Ok(result?)
    }

    /// Take the oldest queued server message
    pub fn next_pending(&mut self) -> Option<Response> {
        self.queue.pop_front()
    }

    /// Wait until the server has sent something
    pub async fn readable(&self) -> Result<()> {
        Ok(self.transport.readable().await?)
    }

    /// Decode the next buffered message, skipping duplicates
    ///
    /// Returns `None` once nothing complete is buffered.
    async fn next_decoded(&mut self) -> Result<Option<Response>> {
        loop {
            let response = match self.transport.process().await {
                Ok(response) => response,
                Err(e) if e.is_recoverable() => {
                    warn!("Dropping message: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if response.incomplete {
                return Ok(None);
            }

            if response.duplicate {
                debug!(message_type = %response.message_type, "Skipping duplicate");
                continue;
            }

            return Ok(Some(response));
        }
    }

    fn absorb_backlog(&mut self) {
        self.queue.extend(self.transport.take_backlog());
    }
}

impl fmt::Display for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.transport, f)
    }
}

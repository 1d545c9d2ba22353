//! Stream (TCP) channel
//!
//! Frames are CRLF-terminated text lines. TCP may split a frame across reads
//! or coalesce several frames into one, so received bytes accumulate in a
//! buffer and [`TextCodec::decode`] splits off one complete line at a time.

use crate::{Channel, NetworkError, Result, SendOutcome};
use async_trait::async_trait;
use bytes::BytesMut;
use ipk_proto::{Message, Response, TextCodec};
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Initial receive buffer capacity
const READ_CAPACITY: usize = 4096;

/// TCP channel to the chat server
pub struct StreamChannel {
    server: SocketAddr,
    stream: Option<TcpStream>,
    buffer: BytesMut,
}

impl StreamChannel {
    /// Create an unconnected channel
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            stream: None,
            buffer: BytesMut::with_capacity(READ_CAPACITY),
        }
    }

    /// Get the server address
    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(NetworkError::NotConnected)
    }

    /// Write one frame with a single call
    ///
    /// A short write is reported instead of retried; frames are small compared
    /// to socket buffers.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let written = self.stream()?.write(frame).await?;

        if written != frame.len() {
            return Err(NetworkError::PartialWrite {
                written,
                len: frame.len(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Channel for StreamChannel {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        info!("Connecting to {}", self.server);

        let stream = TcpStream::connect(self.server)
            .await
            .map_err(|e| NetworkError::Connection(format!("{}: {}", self.server, e)))?;

        stream.set_nodelay(true)?;
        self.stream = Some(stream);

        debug!("TCP connection established");
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<SendOutcome> {
        let frame = TextCodec::encode(message)?;

        debug!(
            message_type = %message.message_type(),
            len = frame.len(),
            "Sending frame"
        );

        self.write_frame(&frame).await?;
        Ok(SendOutcome::Sent)
    }

    async fn receive(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(NetworkError::NotConnected)?;
        let read = stream.read_buf(&mut self.buffer).await?;

        if read == 0 {
            return Err(NetworkError::Closed);
        }

        debug!(bytes = read, buffered = self.buffer.len(), "Received data");
        Ok(())
    }

    fn try_receive(&mut self) -> Result<bool> {
        let stream = self.stream.as_ref().ok_or(NetworkError::NotConnected)?;

        let read = match stream.try_read_buf(&mut self.buffer) {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if read == 0 {
            return Err(NetworkError::Closed);
        }

        debug!(bytes = read, buffered = self.buffer.len(), "Received data");
        Ok(true)
    }

    async fn process(&mut self) -> Result<Response> {
        match TextCodec::decode(&mut self.buffer)? {
            Some(message) => {
                debug!(message_type = %message.message_type(), "Decoded frame");
                Ok(Response::from_message(&message))
            }
            None => Ok(Response::incomplete()),
        }
    }

    async fn disconnect(&mut self, display_name: &str) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }

        info!("Disconnecting from {}", self.server);

        let bye = Message::Bye {
            display_name: display_name.to_string(),
        };
        let sent = self.send(&bye).await;

        // Half-close so the server sees EOF after the goodbye
        let shutdown = self.stream()?.shutdown().await;

        sent?;
        shutdown?;
        Ok(())
    }

    async fn readable(&self) -> Result<()> {
        let stream = self.stream.as_ref().ok_or(NetworkError::NotConnected)?;
        stream.readable().await?;
        Ok(())
    }

    fn take_backlog(&mut self) -> Vec<Response> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

//! Chat session
//!
//! Drives the client state machine: user commands come in as lines, server
//! messages come in through the engine, and everything the user should see is
//! written to the output sink.
//!
//! ```text
//!   Start --/auth + REPLY OK--> Open
//!   any   --BYE, EOF, signal--> End
//!   any   --ERR, bad data, network failure--> Error
//! ```

use crate::{
    command::{Command, HELP},
    engine::ProtocolEngine,
    shutdown::Shutdown,
    ClientError, Result,
};
use ipk_proto::{Message, MessageType, Response};
use ipk_transport::SendOutcome;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not authenticated yet
    Start,
    /// Authenticated, chatting
    Open,
    /// Ended abnormally
    Error,
    /// Ended cleanly
    End,
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    /// Bad arguments or configuration
    ArgParse = 10,
    /// Network failure, server error, system failure
    ClientFailure = 20,
    /// Malformed data from the server
    ProtocolFailure = 30,
}

impl ExitStatus {
    /// Numeric process exit code
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Display name used before the user picks one
const DEFAULT_DISPLAY_NAME: &str = "Display_Name";

enum Event {
    Line(String),
    Inbound,
    Eof,
    Interrupt,
    Failed(ClientError),
}

/// One chat session over one connection
pub struct Session<W: Write> {
    state: State,
    display_name: String,
    ever_open: bool,
    server_left: bool,
    link_failed: bool,
    exit: ExitStatus,
    engine: ProtocolEngine,
    out: W,
    reply_timeout: Duration,
}

impl<W: Write> Session<W> {
    /// Create a session over a connected engine
    pub fn new(engine: ProtocolEngine, out: W, reply_timeout: Duration) -> Self {
        Self {
            state: State::Start,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            ever_open: false,
            server_left: false,
            link_failed: false,
            exit: ExitStatus::Success,
            engine,
            out,
            reply_timeout,
        }
    }

    /// Get the current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Get the current display name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Get the output sink
    pub fn output(&self) -> &W {
        &self.out
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, State::End | State::Error)
    }

    /// Run until input ends, the server leaves, a fatal error occurs or
    /// `shutdown` fires
    pub async fn run<R>(&mut self, input: R, mut shutdown: Shutdown) -> ExitStatus
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();

        while !self.is_finished() {
            if shutdown.is_triggered() {
                break;
            }

            let event = tokio::select! {
                _ = shutdown.wait() => Event::Interrupt,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => Event::Line(line),
                    Ok(None) => Event::Eof,
                    Err(e) => Event::Failed(e.into()),
                },
                ready = self.engine.readable() => match ready {
                    Ok(()) => Event::Inbound,
                    Err(e) => Event::Failed(e),
                },
            };

            match event {
                Event::Line(line) => self.handle_line(&line).await,
                Event::Inbound => {
                    if let Err(e) = self.engine.poll_inbound().await {
                        self.fail(e).await;
                    }
                }
                Event::Eof => {
                    info!("End of input");
                    break;
                }
                Event::Interrupt => {
                    info!("Shutdown requested");
                    break;
                }
                Event::Failed(e) => self.fail(e).await,
            }

            self.drain().await;
        }

        self.terminate().await
    }

    async fn handle_line(&mut self, line: &str) {
        match Command::parse(line) {
            Ok(Some(command)) => {
                if let Err(e) = self.execute(command).await {
                    self.fail(e).await;
                }
            }
            Ok(None) => {}
            Err(e) => self.local_error(&e.to_string()),
        }
    }

    /// Execute one user command
    ///
    /// Local mistakes are reported to the user; only transport and protocol
    /// failures come back as errors.
    pub async fn execute(&mut self, command: Command) -> Result<()> {
        debug!(?command, state = ?self.state, "Executing command");

        match command {
            Command::Help => self.print(HELP),
            Command::Rename { display_name } => {
                info!(from = %self.display_name, to = %display_name, "Display name changed");
                self.display_name = display_name;
            }
            Command::Auth {
                username,
                secret,
                display_name,
            } => {
                if self.state != State::Start {
                    self.local_error("Already authenticated");
                    return Ok(());
                }

                self.display_name = display_name;
                let auth = Message::Auth {
                    username,
                    display_name: self.display_name.clone(),
                    secret,
                };

                if let Some(reply) = self.request(&auth).await? {
                    self.print(&reply.content);
                    if reply.status.map_or(false, |s| s.is_ok()) {
                        info!("Authenticated as {}", self.display_name);
                        self.state = State::Open;
                        self.ever_open = true;
                    }
                }
            }
            Command::Join { channel_id } => {
                if self.state != State::Open {
                    self.local_error("Not authenticated, use /auth first");
                    return Ok(());
                }

                let join = Message::Join {
                    channel_id,
                    display_name: self.display_name.clone(),
                };

                if let Some(reply) = self.request(&join).await? {
                    self.print(&reply.content);
                }
            }
            Command::Message { content } => {
                if self.state != State::Open {
                    self.local_error("Not authenticated, use /auth first");
                    return Ok(());
                }

                let msg = Message::Msg {
                    display_name: self.display_name.clone(),
                    content,
                };
                self.engine.send(&msg).await?;
            }
        }

        Ok(())
    }

    /// Send a request and wait for its `REPLY`
    ///
    /// Returns `None` when the server ended the conversation instead, or when
    /// no reply arrived in time.
    async fn request(&mut self, message: &Message) -> Result<Option<Response>> {
        if self.engine.send(message).await? == SendOutcome::ServerExit {
            return Ok(None);
        }

        match self
            .engine
            .await_response(self.reply_timeout, MessageType::Reply)
            .await
        {
            Ok(response) if response.message_type == MessageType::Reply => Ok(Some(response)),
            Ok(_) => Ok(None),
            Err(ClientError::Timeout) => {
                warn!(message_type = %message.message_type(), "No reply within {:?}", self.reply_timeout);
                self.local_error("No reply from server");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Act on queued server messages in arrival order
    async fn drain(&mut self) {
        while !self.is_finished() {
            match self.engine.next_pending() {
                Some(response) => self.dispatch(response),
                None => break,
            }
        }
    }

    /// Act on one server message
    pub fn dispatch(&mut self, response: Response) {
        match response.message_type {
            MessageType::Msg => self.print(&response.content),
            MessageType::Err => {
                self.print(&response.content);
                error!("Server reported an error");
                self.state = State::Error;
                self.exit = ExitStatus::ClientFailure;
            }
            MessageType::Bye => {
                info!("Server said goodbye");
                self.server_left = true;
                self.state = State::End;
            }
            MessageType::Reply => {
                warn!("Unsolicited reply");
                self.print(&response.content);
            }
            MessageType::Ping | MessageType::Confirm => {
                debug!(message_type = %response.message_type, "Ignoring");
            }
            MessageType::Auth | MessageType::Join => {
                warn!(message_type = %response.message_type, "Ignoring client-only message from server");
            }
        }
    }

    async fn fail(&mut self, error: ClientError) {
        self.local_error(&error.to_string());

        if error.is_protocol() {
            error!("Protocol failure: {}", error);
            self.exit = ExitStatus::ProtocolFailure;

            let display_name = self.display_name.clone();
            if let Err(e) = self.engine.error(&display_name, &error.to_string()).await {
                warn!("Could not report the error to the server: {}", e);
            }
        } else {
            error!("Client failure: {}", error);
            self.exit = ExitStatus::ClientFailure;
            self.link_failed = matches!(error, ClientError::Network(_) | ClientError::Io(_));
        }

        self.state = State::Error;
    }

    /// Leave the session, saying goodbye when it makes sense
    pub async fn terminate(&mut self) -> ExitStatus {
        if self.ever_open && !self.server_left && !self.link_failed {
            let display_name = self.display_name.clone();
            if let Err(e) = self.engine.disconnect(&display_name).await {
                warn!("Goodbye not delivered: {}", e);
            }
        }

        if self.state != State::Error {
            self.state = State::End;
        }

        info!(state = ?self.state, code = self.exit.code(), "Session finished");
        self.exit
    }

    fn local_error(&mut self, message: &str) {
        self.print(&format!("ERROR: {}", message));
    }

    fn print(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text).and_then(|_| self.out.flush()) {
            warn!("Failed to write output: {}", e);
        }
    }
}

//! Protocol message definitions

use crate::{ProtocolError, Result};
use std::fmt;

/// Maximum username length in bytes
pub const MAX_USERNAME_LEN: usize = 20;

/// Maximum channel id length in bytes
pub const MAX_CHANNEL_ID_LEN: usize = 20;

/// Maximum secret length in bytes
pub const MAX_SECRET_LEN: usize = 128;

/// Maximum display name length in bytes
pub const MAX_DISPLAY_NAME_LEN: usize = 20;

/// Maximum message content length in bytes
pub const MAX_CONTENT_LEN: usize = 60_000;

/// Message type identifier
///
/// The discriminants are the datagram wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Confirm = 0x00,
    Reply = 0x01,
    Auth = 0x02,
    Join = 0x03,
    Msg = 0x04,
    Ping = 0xFD,
    Err = 0xFE,
    Bye = 0xFF,
}

impl MessageType {
    /// Convert from the datagram tag byte
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(MessageType::Confirm),
            0x01 => Ok(MessageType::Reply),
            0x02 => Ok(MessageType::Auth),
            0x03 => Ok(MessageType::Join),
            0x04 => Ok(MessageType::Msg),
            0xFD => Ok(MessageType::Ping),
            0xFE => Ok(MessageType::Err),
            0xFF => Ok(MessageType::Bye),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }

    /// Upper-case protocol name
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Confirm => "CONFIRM",
            MessageType::Reply => "REPLY",
            MessageType::Auth => "AUTH",
            MessageType::Join => "JOIN",
            MessageType::Msg => "MSG",
            MessageType::Ping => "PING",
            MessageType::Err => "ERR",
            MessageType::Bye => "BYE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result carried by a `REPLY`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Nok,
}

impl ReplyStatus {
    pub fn is_ok(self) -> bool {
        self == ReplyStatus::Ok
    }
}

/// A protocol message, independent of the wire format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Datagram acknowledgment of message `ref_id`
    Confirm { ref_id: u16 },

    /// Server verdict on a request
    Reply {
        status: ReplyStatus,
        ref_id: u16,
        content: String,
    },

    /// Authentication request
    Auth {
        username: String,
        display_name: String,
        secret: String,
    },

    /// Channel join request
    Join {
        channel_id: String,
        display_name: String,
    },

    /// Chat message
    Msg {
        display_name: String,
        content: String,
    },

    /// Datagram keep-alive from the server
    Ping,

    /// Error notification, ends the conversation
    Err {
        display_name: String,
        content: String,
    },

    /// Conversation end
    Bye { display_name: String },
}

impl Message {
    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Confirm { .. } => MessageType::Confirm,
            Message::Reply { .. } => MessageType::Reply,
            Message::Auth { .. } => MessageType::Auth,
            Message::Join { .. } => MessageType::Join,
            Message::Msg { .. } => MessageType::Msg,
            Message::Ping => MessageType::Ping,
            Message::Err { .. } => MessageType::Err,
            Message::Bye { .. } => MessageType::Bye,
        }
    }

    /// Check every field against its length limit and alphabet
    pub fn validate(&self) -> Result<()> {
        match self {
            Message::Confirm { .. } | Message::Ping => Ok(()),
            Message::Reply { content, .. } => check_content(content),
            Message::Auth {
                username,
                display_name,
                secret,
            } => {
                check_identifier("username", username, MAX_USERNAME_LEN)?;
                check_display_name(display_name)?;
                check_identifier("secret", secret, MAX_SECRET_LEN)
            }
            Message::Join {
                channel_id,
                display_name,
            } => {
                check_channel_id(channel_id)?;
                check_display_name(display_name)
            }
            Message::Msg {
                display_name,
                content,
            }
            | Message::Err {
                display_name,
                content,
            } => {
                check_display_name(display_name)?;
                check_content(content)
            }
            Message::Bye { display_name } => check_display_name(display_name),
        }
    }
}

/// Inbound message as seen by the engine and the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub message_type: MessageType,
    pub status: Option<ReplyStatus>,
    /// Text ready to be shown to the user
    pub content: String,
    /// Datagram already processed once; must not be acted on again
    pub duplicate: bool,
    /// No complete frame buffered yet; every other field is meaningless
    pub incomplete: bool,
}

impl Response {
    /// Placeholder for "nothing to decode yet"
    pub fn incomplete() -> Self {
        Self {
            message_type: MessageType::Confirm,
            status: None,
            content: String::new(),
            duplicate: false,
            incomplete: true,
        }
    }

    /// Response for a message that has already been seen
    pub fn duplicate(message_type: MessageType) -> Self {
        Self {
            message_type,
            status: None,
            content: String::new(),
            duplicate: true,
            incomplete: false,
        }
    }

    /// Render a decoded message
    pub fn from_message(message: &Message) -> Self {
        let (status, content) = match message {
            Message::Reply {
                status, content, ..
            } => {
                let prefix = if status.is_ok() {
                    "Action Success"
                } else {
                    "Action Failure"
                };
                (Some(*status), format!("{}: {}", prefix, content))
            }
            Message::Msg {
                display_name,
                content,
            } => (None, format!("{}: {}", display_name, content)),
            Message::Err {
                display_name,
                content,
            } => (None, format!("ERROR FROM {}: {}", display_name, content)),
            Message::Auth { display_name, .. }
            | Message::Join { display_name, .. }
            | Message::Bye { display_name } => (None, display_name.clone()),
            Message::Confirm { .. } | Message::Ping => (None, String::new()),
        };

        Self {
            message_type: message.message_type(),
            status,
            content,
            duplicate: false,
            incomplete: false,
        }
    }

    /// `true` for messages that end the conversation
    pub fn is_terminal(&self) -> bool {
        matches!(self.message_type, MessageType::Err | MessageType::Bye)
    }
}

/// Alphanumerics, underscore and dash
pub fn is_identifier(value: &str) -> bool {
    value
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-')
}

/// Printable ASCII without space (`!` to `~`)
pub fn is_printable(value: &str) -> bool {
    value.bytes().all(|c| (0x21..=0x7E).contains(&c))
}

/// Printable ASCII, space and line feed
pub fn is_printable_content(value: &str) -> bool {
    value
        .bytes()
        .all(|c| (0x20..=0x7E).contains(&c) || c == b'\n')
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<()> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidField {
            field,
            value: String::new(),
        });
    }
    if value.len() > max {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Validate a username or secret
pub fn check_identifier(field: &'static str, value: &str, max: usize) -> Result<()> {
    check_len(field, value, max)?;
    if !is_identifier(value) {
        return Err(invalid(field, value));
    }
    Ok(())
}

/// Validate a channel id (identifier characters plus `.`)
pub fn check_channel_id(value: &str) -> Result<()> {
    check_len("channel id", value, MAX_CHANNEL_ID_LEN)?;
    if !value
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.'))
    {
        return Err(invalid("channel id", value));
    }
    Ok(())
}

/// Validate a display name
pub fn check_display_name(value: &str) -> Result<()> {
    check_len("display name", value, MAX_DISPLAY_NAME_LEN)?;
    if !is_printable(value) {
        return Err(invalid("display name", value));
    }
    Ok(())
}

/// Validate message content
pub fn check_content(value: &str) -> Result<()> {
    check_len("content", value, MAX_CONTENT_LEN)?;
    if !is_printable_content(value) {
        return Err(invalid("content", value));
    }
    Ok(())
}

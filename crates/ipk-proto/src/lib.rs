//! IPK25-CHAT Protocol Definitions
//!
//! This crate defines the message vocabulary of the IPK25-CHAT protocol and its
//! two wire formats: CRLF-delimited text for the stream transport and a
//! fixed-header binary format for the datagram transport.

pub mod binary;
pub mod error;
pub mod message;
pub mod text;

pub use binary::{BinaryCodec, Datagram};
pub use error::{ProtocolError, Result};
pub use message::{
    check_channel_id, check_content, check_display_name, check_identifier, Message, MessageType,
    ReplyStatus, Response, MAX_CHANNEL_ID_LEN, MAX_CONTENT_LEN, MAX_DISPLAY_NAME_LEN,
    MAX_SECRET_LEN, MAX_USERNAME_LEN,
};
pub use text::TextCodec;

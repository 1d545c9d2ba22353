//! Binary framing for the datagram transport
//!
//! Frame format:
//! ```text
//! [ 1 byte: message type ]
//! [ 2 bytes: message id (u16, big-endian) ]
//! [ N bytes: type specific payload ]
//! ```
//!
//! Payload strings are NUL-terminated. A `REPLY` carries a result byte and the
//! id of the request it answers before its content; a `CONFIRM` has no payload
//! and carries the confirmed id in the header.

use crate::message::{check_channel_id, check_content, check_display_name, check_identifier};
use crate::{
    Message, MessageType, ProtocolError, ReplyStatus, Result, MAX_SECRET_LEN, MAX_USERNAME_LEN,
};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the fixed header
pub const HEADER_LEN: usize = 3;

/// A decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Header id; for `CONFIRM` this is the confirmed id
    pub id: u16,
    pub message: Message,
}

/// Codec for the fixed-header binary format
pub struct BinaryCodec;

impl BinaryCodec {
    /// Encode `message` with header id `id`
    ///
    /// `CONFIRM` ignores `id` and writes the id it confirms.
    pub fn encode(message: &Message, id: u16) -> Result<Vec<u8>> {
        message.validate()?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
        buf.put_u8(message.message_type() as u8);

        match message {
            Message::Confirm { ref_id } => {
                buf.put_u16(*ref_id);
            }
            Message::Reply {
                status,
                ref_id,
                content,
            } => {
                buf.put_u16(id);
                buf.put_u8(if status.is_ok() { 1 } else { 0 });
                buf.put_u16(*ref_id);
                put_cstr(&mut buf, content);
            }
            Message::Auth {
                username,
                display_name,
                secret,
            } => {
                buf.put_u16(id);
                put_cstr(&mut buf, username);
                put_cstr(&mut buf, display_name);
                put_cstr(&mut buf, secret);
            }
            Message::Join {
                channel_id,
                display_name,
            } => {
                buf.put_u16(id);
                put_cstr(&mut buf, channel_id);
                put_cstr(&mut buf, display_name);
            }
            Message::Msg {
                display_name,
                content,
            }
            | Message::Err {
                display_name,
                content,
            } => {
                buf.put_u16(id);
                put_cstr(&mut buf, display_name);
                put_cstr(&mut buf, content);
            }
            Message::Ping => {
                buf.put_u16(id);
            }
            Message::Bye { display_name } => {
                buf.put_u16(id);
                put_cstr(&mut buf, display_name);
            }
        }

        Ok(buf.to_vec())
    }

    /// Encode a `CONFIRM` for inbound message `ref_id`
    pub fn confirm(ref_id: u16) -> [u8; HEADER_LEN] {
        let [hi, lo] = ref_id.to_be_bytes();
        [MessageType::Confirm as u8, hi, lo]
    }

    /// Read only the header of a datagram
    pub fn peek_header(data: &[u8]) -> Result<(u8, u16)> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::TooShort {
                len: data.len(),
                min: HEADER_LEN,
            });
        }
        Ok((data[0], u16::from_be_bytes([data[1], data[2]])))
    }

    /// Decode one datagram
    pub fn decode(data: &[u8]) -> Result<Datagram> {
        let (tag, id) = Self::peek_header(data)?;
        let message_type = MessageType::from_u8(tag)?;
        let mut buf = &data[HEADER_LEN..];

        let message = match message_type {
            MessageType::Confirm => Message::Confirm { ref_id: id },
            MessageType::Ping => Message::Ping,
            MessageType::Reply => {
                if buf.len() < 3 {
                    return Err(ProtocolError::TooShort {
                        len: data.len(),
                        min: HEADER_LEN + 3,
                    });
                }
                let status = match buf.get_u8() {
                    0 => ReplyStatus::Nok,
                    1 => ReplyStatus::Ok,
                    other => {
                        return Err(ProtocolError::Malformed(format!(
                            "invalid reply result {}",
                            other
                        )))
                    }
                };
                let ref_id = buf.get_u16();
                let content = get_cstr(&mut buf, "content")?;
                check_content(&content)?;
                Message::Reply {
                    status,
                    ref_id,
                    content,
                }
            }
            MessageType::Auth => {
                let username = get_cstr(&mut buf, "username")?;
                let display_name = get_cstr(&mut buf, "display name")?;
                let secret = get_cstr(&mut buf, "secret")?;
                check_identifier("username", &username, MAX_USERNAME_LEN)?;
                check_display_name(&display_name)?;
                check_identifier("secret", &secret, MAX_SECRET_LEN)?;
                Message::Auth {
                    username,
                    display_name,
                    secret,
                }
            }
            MessageType::Join => {
                let channel_id = get_cstr(&mut buf, "channel id")?;
                let display_name = get_cstr(&mut buf, "display name")?;
                check_channel_id(&channel_id)?;
                check_display_name(&display_name)?;
                Message::Join {
                    channel_id,
                    display_name,
                }
            }
            MessageType::Msg | MessageType::Err => {
                let display_name = get_cstr(&mut buf, "display name")?;
                let content = get_cstr(&mut buf, "content")?;
                check_display_name(&display_name)?;
                check_content(&content)?;
                if message_type == MessageType::Msg {
                    Message::Msg {
                        display_name,
                        content,
                    }
                } else {
                    Message::Err {
                        display_name,
                        content,
                    }
                }
            }
            MessageType::Bye => {
                let display_name = get_cstr(&mut buf, "display name")?;
                check_display_name(&display_name)?;
                Message::Bye { display_name }
            }
        };

        Ok(Datagram { id, message })
    }
}

fn put_cstr(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

fn get_cstr(buf: &mut &[u8], field: &'static str) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProtocolError::Malformed(format!("{} is not NUL-terminated", field)))?;

    let value = std::str::from_utf8(&buf[..end])
        .map_err(|_| ProtocolError::Malformed(format!("{} is not valid UTF-8", field)))?
        .to_string();

    buf.advance(end + 1);
    Ok(value)
}

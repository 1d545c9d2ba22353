//! Text framing for the stream transport
//!
//! Every message is one line of space separated tokens terminated by CRLF:
//!
//! ```text
//! AUTH {Username} AS {DisplayName} USING {Secret}\r\n
//! JOIN {ChannelID} AS {DisplayName}\r\n
//! MSG FROM {DisplayName} IS {MessageContent}\r\n
//! ERR FROM {DisplayName} IS {MessageContent}\r\n
//! REPLY {"OK"|"NOK"} IS {MessageContent}\r\n
//! BYE FROM {DisplayName}\r\n
//! ```
//!
//! Keywords are case-insensitive. The message content runs to the end of the
//! line and keeps its internal spaces.

use crate::message::{check_channel_id, check_content, check_display_name, check_identifier};
use crate::{
    Message, ProtocolError, ReplyStatus, Result, MAX_CONTENT_LEN, MAX_SECRET_LEN,
    MAX_USERNAME_LEN,
};
use bytes::BytesMut;

/// Frame terminator
pub const CRLF: &[u8] = b"\r\n";

/// Longest legal frame, terminator included
pub const MAX_FRAME_LEN: usize = MAX_CONTENT_LEN + 64;

/// Codec for the CRLF-delimited text grammar
pub struct TextCodec;

impl TextCodec {
    /// Encode a message into one CRLF-terminated line
    pub fn encode(message: &Message) -> Result<Vec<u8>> {
        message.validate()?;

        let line = match message {
            Message::Auth {
                username,
                display_name,
                secret,
            } => format!("AUTH {} AS {} USING {}", username, display_name, secret),
            Message::Join {
                channel_id,
                display_name,
            } => format!("JOIN {} AS {}", channel_id, display_name),
            Message::Msg {
                display_name,
                content,
            } => format!("MSG FROM {} IS {}", display_name, content),
            Message::Err {
                display_name,
                content,
            } => format!("ERR FROM {} IS {}", display_name, content),
            Message::Reply {
                status, content, ..
            } => {
                let status = if status.is_ok() { "OK" } else { "NOK" };
                format!("REPLY {} IS {}", status, content)
            }
            Message::Bye { display_name } => format!("BYE FROM {}", display_name),
            Message::Confirm { .. } => return Err(ProtocolError::Unencodable("CONFIRM")),
            Message::Ping => return Err(ProtocolError::Unencodable("PING")),
        };

        let mut frame = line.into_bytes();
        frame.extend_from_slice(CRLF);
        Ok(frame)
    }

    /// Decode one message from the front of `buf`
    ///
    /// Returns `None` while no terminator has arrived; the partial bytes stay
    /// in `buf` so the next read can complete them.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Message>> {
        let end = match buf.windows(CRLF.len()).position(|w| w == CRLF) {
            Some(end) => end,
            None => {
                if buf.len() > MAX_FRAME_LEN {
                    return Err(ProtocolError::FieldTooLong {
                        field: "frame",
                        len: buf.len(),
                        max: MAX_FRAME_LEN,
                    });
                }
                return Ok(None);
            }
        };

        let frame = buf.split_to(end + CRLF.len());
        let line = std::str::from_utf8(&frame[..end])
            .map_err(|_| ProtocolError::Malformed("frame is not valid UTF-8".to_string()))?;

        Self::decode_line(line).map(Some)
    }

    /// Decode a single line without its terminator
    pub fn decode_line(line: &str) -> Result<Message> {
        let (keyword, rest) = next_token(line);

        let message = match keyword.to_ascii_uppercase().as_str() {
            "MSG" => {
                let (display_name, content) = from_is(rest)?;
                Message::Msg {
                    display_name,
                    content,
                }
            }
            "ERR" => {
                let (display_name, content) = from_is(rest)?;
                Message::Err {
                    display_name,
                    content,
                }
            }
            "REPLY" => {
                let (status, rest) = next_token(rest);
                let status = if status.eq_ignore_ascii_case("OK") {
                    ReplyStatus::Ok
                } else if status.eq_ignore_ascii_case("NOK") {
                    ReplyStatus::Nok
                } else {
                    return Err(ProtocolError::Malformed(format!(
                        "invalid reply status {:?}",
                        status
                    )));
                };
                let content = expect_literal(rest, "IS")?;
                check_content(content)?;
                Message::Reply {
                    status,
                    ref_id: 0,
                    content: content.to_string(),
                }
            }
            "BYE" => {
                let rest = expect_literal(rest, "FROM")?;
                let (display_name, rest) = next_token(rest);
                expect_end(rest)?;
                check_display_name(display_name)?;
                Message::Bye {
                    display_name: display_name.to_string(),
                }
            }
            "AUTH" => {
                let (username, rest) = next_token(rest);
                let rest = expect_literal(rest, "AS")?;
                let (display_name, rest) = next_token(rest);
                let rest = expect_literal(rest, "USING")?;
                let (secret, rest) = next_token(rest);
                expect_end(rest)?;
                check_identifier("username", username, MAX_USERNAME_LEN)?;
                check_display_name(display_name)?;
                check_identifier("secret", secret, MAX_SECRET_LEN)?;
                Message::Auth {
                    username: username.to_string(),
                    display_name: display_name.to_string(),
                    secret: secret.to_string(),
                }
            }
            "JOIN" => {
                let (channel_id, rest) = next_token(rest);
                let rest = expect_literal(rest, "AS")?;
                let (display_name, rest) = next_token(rest);
                expect_end(rest)?;
                check_channel_id(channel_id)?;
                check_display_name(display_name)?;
                Message::Join {
                    channel_id: channel_id.to_string(),
                    display_name: display_name.to_string(),
                }
            }
            "" => return Err(ProtocolError::Malformed("empty frame".to_string())),
            _ => return Err(ProtocolError::UnknownKeyword(keyword.to_string())),
        };

        Ok(message)
    }
}

/// Split off the next space separated token
fn next_token(input: &str) -> (&str, &str) {
    let input = input.trim_start_matches(' ');
    input.split_once(' ').unwrap_or((input, ""))
}

fn expect_literal<'a>(input: &'a str, literal: &'static str) -> Result<&'a str> {
    let (token, rest) = next_token(input);
    if token.eq_ignore_ascii_case(literal) {
        Ok(rest)
    } else {
        Err(ProtocolError::Malformed(format!(
            "expected {}, found {:?}",
            literal, token
        )))
    }
}

fn expect_end(rest: &str) -> Result<()> {
    if rest.trim_matches(' ').is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::Malformed(format!(
            "unexpected trailing data {:?}",
            rest
        )))
    }
}

/// `FROM {DisplayName} IS {MessageContent}`
fn from_is(rest: &str) -> Result<(String, String)> {
    let rest = expect_literal(rest, "FROM")?;
    let (display_name, rest) = next_token(rest);
    let content = expect_literal(rest, "IS")?;

    check_display_name(display_name)?;
    check_content(content)?;

    Ok((display_name.to_string(), content.to_string()))
}

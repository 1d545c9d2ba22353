//! User command parsing
//!
//! A line starting with `/` is a local command, anything else is chat.

use ipk_proto::{
    check_channel_id, check_content, check_display_name, check_identifier, ProtocolError,
    MAX_CONTENT_LEN, MAX_SECRET_LEN, MAX_USERNAME_LEN,
};
use thiserror::Error;
use tracing::warn;

/// Rejected input line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Command name not recognised
    #[error("Unknown command '{0}', try /help")]
    Unknown(String),

    /// Wrong number of arguments
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// Argument fails protocol validation
    #[error("Invalid argument: {0}")]
    Invalid(#[from] ProtocolError),
}

/// Parsed user command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/auth {username} {secret} {displayname}`
    Auth {
        username: String,
        secret: String,
        display_name: String,
    },

    /// `/join {channel}`
    Join { channel_id: String },

    /// `/rename {displayname}`, local only
    Rename { display_name: String },

    /// `/help`
    Help,

    /// Chat message
    Message { content: String },
}

const AUTH_USAGE: &str = "/auth {username} {secret} {displayname}";
const JOIN_USAGE: &str = "/join {channel}";
const RENAME_USAGE: &str = "/rename {displayname}";
const HELP_USAGE: &str = "/help";

impl Command {
    /// Parse one input line
    ///
    /// Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.trim().is_empty() {
            return Ok(None);
        }

        if !line.starts_with('/') {
            return parse_message(line).map(Some);
        }

        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let command = match name {
            "/auth" => match args.as_slice() {
                [username, secret, display_name] => {
                    check_identifier("username", username, MAX_USERNAME_LEN)?;
                    check_identifier("secret", secret, MAX_SECRET_LEN)?;
                    check_display_name(display_name)?;
                    Command::Auth {
                        username: username.to_string(),
                        secret: secret.to_string(),
                        display_name: display_name.to_string(),
                    }
                }
                _ => return Err(CommandError::Usage(AUTH_USAGE)),
            },
            "/join" => match args.as_slice() {
                [channel_id] => {
                    check_channel_id(channel_id)?;
                    Command::Join {
                        channel_id: channel_id.to_string(),
                    }
                }
                _ => return Err(CommandError::Usage(JOIN_USAGE)),
            },
            "/rename" => match args.as_slice() {
                [display_name] => {
                    check_display_name(display_name)?;
                    Command::Rename {
                        display_name: display_name.to_string(),
                    }
                }
                _ => return Err(CommandError::Usage(RENAME_USAGE)),
            },
            "/help" => {
                if !args.is_empty() {
                    return Err(CommandError::Usage(HELP_USAGE));
                }
                Command::Help
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        Ok(Some(command))
    }
}

fn parse_message(line: &str) -> Result<Command, CommandError> {
    let mut content = line.to_string();

    if content.len() > MAX_CONTENT_LEN {
        warn!(
            len = content.len(),
            max = MAX_CONTENT_LEN,
            "Chat message too long, truncating"
        );
        let mut end = MAX_CONTENT_LEN;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        content.truncate(end);
    }

    check_content(&content)?;
    Ok(Command::Message { content })
}

/// Text printed by `/help`
pub const HELP: &str = "\
Commands:
  /auth {username} {secret} {displayname}  Authenticate and set the display name
  /join {channel}                          Switch to another channel
  /rename {displayname}                    Change the display name (local only)
  /help                                    Show this help
Any other line is sent to the current channel as a chat message.";

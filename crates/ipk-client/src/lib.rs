//! IPK25-CHAT Client Library
//!
//! Configuration, command parsing, the protocol engine and the session state
//! machine behind the `ipk25chat-client` binary.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod shutdown;

pub use error::{ClientError, Result};

//! Protocol message definitions
//!
//! The wire protocol has exactly two logical message types, both
//! JSON-encoded: inbound `command_entered` (one line typed by the user)
//! and outbound `console_output` (one chunk of child output or a
//! synthetic status text). Synthetic statuses travel as ordinary
//! `console_output` payloads; there is no third channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted length of one inbound command line (64KB)
pub const MAX_COMMAND_LENGTH: usize = 64 * 1024;

/// Errors that can occur while decoding client messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Messages sent from the browser client to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One line of user input, forwarded to the child's stdin
    CommandEntered {
        /// The typed line, without a trailing newline
        data: String,
    },
}

impl ClientMessage {
    /// Create a CommandEntered message
    pub fn command_entered(data: impl Into<String>) -> Self {
        ClientMessage::CommandEntered { data: data.into() }
    }

    /// Parse and validate a client message from JSON
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let message: Self = serde_json::from_str(json)?;
        message.validate()?;
        Ok(message)
    }

    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::CommandEntered { data } => {
                if data.len() > MAX_COMMAND_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "command exceeds maximum length of {} bytes",
                        MAX_COMMAND_LENGTH
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Messages sent from the server to the browser client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One chunk of console text: child stdout/stderr or a synthetic
    /// status such as "process ended"
    ConsoleOutput {
        /// The text to display
        data: String,
    },
}

impl ServerMessage {
    /// Create a ConsoleOutput message
    pub fn console_output(data: impl Into<String>) -> Self {
        ServerMessage::ConsoleOutput { data: data.into() }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

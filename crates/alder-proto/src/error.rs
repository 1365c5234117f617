//! Protocol-level errors.

use thiserror::Error;

/// Errors raised while framing or parsing wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("empty message")]
    EmptyMessage,

    #[error("line contains a NUL byte")]
    EmbeddedNul,

    #[error("message has a prefix but no command")]
    MissingCommand,

    #[error("invalid command token: {0:?}")]
    InvalidCommand(String),
}

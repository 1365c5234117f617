//! Wire-protocol support for alderd.
//!
//! This crate owns everything about the shape of bytes on an IRC link and
//! nothing about what the daemon does with them: CRLF framing with the
//! 512-byte limit, the relaxed RFC 2812 message grammar, case mapping,
//! the numeric-reply catalog, and mode-string handling (parsing a stream of
//! `+`/`-` deltas and packing deltas back into bounded lines).

pub mod casemap;
pub mod error;
pub mod line;
pub mod message;
pub mod modes;
pub mod numeric;

pub use casemap::CaseMapping;
pub use error::ProtocolError;
pub use line::LineCodec;
pub use message::Message;
pub use modes::{ModeDelta, ModeStacker};
pub use numeric::Numeric;

/// Maximum length of one IRC line in bytes, including the trailing CRLF.
pub const MAX_LINE_LEN: usize = 512;

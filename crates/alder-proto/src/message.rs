//! IRC message tokenizing and serialization.
//!
//! The grammar is the relaxed RFC 2812 form used by every deployed ircd:
//!
//! ```text
//! line      := [':' prefix SPACE] command (SPACE parameter)* [SPACE ':' trailing]
//! parameter := nonspace+
//! trailing  := any byte except CR, LF, NUL
//! ```
//!
//! Tokens split on *runs* of spaces. A parameter beginning with `:` consumes
//! the rest of the line verbatim. The prefix is kept as a raw token; whether
//! it names a user, a UID, a SID or a server is the daemon's business.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// One parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The source token, without the leading `:`.
    pub prefix: Option<String>,
    /// The command verb, uppercased at parse time.
    pub command: String,
    /// Positional parameters; a trailing parameter loses its `:` marker.
    pub params: Vec<String>,
}

impl Message {
    /// Build a message with no prefix.
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.to_ascii_uppercase(),
            params,
        }
    }

    /// Build a message carrying a source prefix.
    pub fn with_prefix(prefix: impl Into<String>, command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            command: command.to_ascii_uppercase(),
            params,
        }
    }

    /// Parameter at index `n`, if present.
    pub fn arg(&self, n: usize) -> Option<&str> {
        self.params.get(n).map(String::as_str)
    }

    /// Whether the final parameter must be sent as a trailing parameter
    /// (contains a space, starts with `:`, or is empty).
    fn needs_trailing(param: &str) -> bool {
        param.is_empty() || param.starts_with(':') || param.contains(' ')
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.as_bytes().contains(&0) {
            return Err(ProtocolError::EmbeddedNul);
        }

        let mut rest = line.trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }

        let prefix = if let Some(after) = rest.strip_prefix(':') {
            let (token, tail) = match after.split_once(' ') {
                Some((t, tail)) => (t, tail.trim_start_matches(' ')),
                None => return Err(ProtocolError::MissingCommand),
            };
            rest = tail;
            Some(token.to_string())
        } else {
            None
        };

        let (command, mut tail) = match rest.split_once(' ') {
            Some((c, t)) => (c, t.trim_start_matches(' ')),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ProtocolError::MissingCommand);
        }
        if !command.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ProtocolError::InvalidCommand(command.to_string()));
        }

        let mut params = Vec::new();
        while !tail.is_empty() {
            if let Some(trailing) = tail.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match tail.split_once(' ') {
                Some((tok, t)) => {
                    params.push(tok.to_string());
                    tail = t.trim_start_matches(' ');
                }
                None => {
                    params.push(tail.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }
}

impl fmt::Display for Message {
    /// The canonical wire form, without the CRLF terminator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().wrapping_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && Self::needs_trailing(param) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

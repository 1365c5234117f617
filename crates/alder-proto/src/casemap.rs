//! IRC case mapping and identifier validity.
//!
//! Nicknames, channel names and server names compare case-insensitively
//! under a configurable mapping. The default `rfc1459` mapping treats
//! `{}|^` as the lowercase forms of `[]\~` in addition to ASCII case.

use std::fmt;

/// The case mapping in force for a network.
///
/// Every server on a network must agree on this; it is part of the CAPAB
/// compatibility set exchanged during server handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMapping {
    /// RFC 1459 mapping: ASCII plus `[]\~` → `{}|^`.
    #[default]
    Rfc1459,
    /// Plain ASCII case folding.
    Ascii,
}

impl CaseMapping {
    /// Parse the config-file spelling of a case mapping.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rfc1459" => Some(Self::Rfc1459),
            "ascii" => Some(Self::Ascii),
            _ => None,
        }
    }

    /// The ISUPPORT token value for this mapping.
    pub fn name(self) -> &'static str {
        match self {
            Self::Rfc1459 => "rfc1459",
            Self::Ascii => "ascii",
        }
    }

    /// Fold a single byte to its lowercase form under this mapping.
    #[inline]
    pub const fn fold_byte(self, b: u8) -> u8 {
        match (self, b) {
            (Self::Rfc1459, b'[') => b'{',
            (Self::Rfc1459, b']') => b'}',
            (Self::Rfc1459, b'\\') => b'|',
            (Self::Rfc1459, b'~') => b'^',
            (_, b'A'..=b'Z') => b + 32,
            _ => b,
        }
    }

    /// Fold a string to its canonical lowercase form.
    pub fn fold(self, s: &str) -> String {
        s.bytes().map(|b| self.fold_byte(b) as char).collect()
    }

    /// Compare two identifiers case-insensitively under this mapping.
    pub fn eq(self, a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a.bytes()
                .zip(b.bytes())
                .all(|(ba, bb)| self.fold_byte(ba) == self.fold_byte(bb))
    }
}

impl fmt::Display for CaseMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether `c` may start a nickname.
#[inline]
fn is_nick_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || matches!(c, b'[' | b']' | b'\\' | b'`' | b'_' | b'^' | b'{' | b'|' | b'}')
}

/// Whether `c` may appear after the first character of a nickname.
#[inline]
fn is_nick_rest(c: u8) -> bool {
    is_nick_start(c) || c.is_ascii_digit() || c == b'-'
}

/// Validate a nickname against the RFC grammar and a length cap.
pub fn is_valid_nick(nick: &str, max_len: usize) -> bool {
    if nick.is_empty() || nick.len() > max_len {
        return false;
    }
    let bytes = nick.as_bytes();
    is_nick_start(bytes[0]) && bytes[1..].iter().all(|&b| is_nick_rest(b))
}

/// Validate a channel name: a `#` prefix, then printable non-separator bytes.
pub fn is_valid_channel(name: &str, max_len: usize) -> bool {
    if name.len() < 2 || name.len() > max_len || !name.starts_with('#') {
        return false;
    }
    name.bytes()
        .skip(1)
        .all(|b| b > b' ' && b != b',' && b != b'\x07')
}

/// Validate an ident (username). The leading `~` added for failed ident
/// lookups counts against the length cap.
pub fn is_valid_ident(ident: &str, max_len: usize) -> bool {
    if ident.is_empty() || ident.len() > max_len {
        return false;
    }
    ident
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'~' | b'-' | b'.' | b'_'))
}

/// Validate a server ID: one digit then two digits-or-uppercase.
pub fn is_valid_sid(sid: &str) -> bool {
    let b = sid.as_bytes();
    b.len() == 3
        && b[0].is_ascii_digit()
        && b[1..].iter().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

/// Validate a user ID: a valid SID followed by six alphanumerics.
pub fn is_valid_uid(uid: &str) -> bool {
    uid.len() == 9
        && is_valid_sid(&uid[..3])
        && uid.as_bytes()[3..].iter().all(|b| b.is_ascii_alphanumeric())
}

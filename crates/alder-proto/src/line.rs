//! Line framing for IRC transports.
//!
//! Splits the inbound byte stream on LF (tolerating bare-LF clients),
//! strips the CR, and enforces the 512-byte line limit by *truncation*:
//! an oversize line is cut at the limit and the remainder is discarded up
//! to the next LF, so one misbehaving client cannot desynchronize framing.
//!
//! The encoder appends CRLF; callers hand it terminator-free strings.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::MAX_LINE_LEN;

/// Codec for CRLF-framed IRC lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Scan resume point: bytes before this index contain no LF.
    next_index: usize,
    /// Set after an oversize line is emitted; bytes are dropped until LF.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload budget per line, once CRLF is accounted for.
    const MAX_PAYLOAD: usize = MAX_LINE_LEN - 2;

    fn take_line(src: &mut BytesMut, lf_index: usize) -> String {
        let mut line = src.split_to(lf_index + 1);
        line.truncate(lf_index);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        loop {
            if self.discarding {
                match src.iter().position(|&b| b == b'\n') {
                    Some(i) => {
                        let _ = src.split_to(i + 1);
                        self.discarding = false;
                        self.next_index = 0;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
                continue;
            }

            return match src[self.next_index..].iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    let lf = self.next_index + offset;
                    self.next_index = 0;
                    if lf > Self::MAX_PAYLOAD {
                        let truncated = {
                            let head = &src[..Self::MAX_PAYLOAD];
                            String::from_utf8_lossy(head).into_owned()
                        };
                        let _ = src.split_to(lf + 1);
                        Ok(Some(truncated))
                    } else {
                        Ok(Some(Self::take_line(src, lf)))
                    }
                }
                None if src.len() > Self::MAX_PAYLOAD => {
                    // Oversize with no terminator in sight: emit the head now
                    // and resynchronize at the next LF.
                    let truncated = String::from_utf8_lossy(&src[..Self::MAX_PAYLOAD]).into_owned();
                    src.clear();
                    self.discarding = true;
                    self.next_index = 0;
                    Ok(Some(truncated))
                }
                None => {
                    self.next_index = src.len();
                    Ok(None)
                }
            };
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crlf_and_bare_lf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("NICK alice\r\nUSER a 0 * :A\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("NICK alice"));
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("USER a 0 * :A")
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_partial_line_buffers() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :to");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"ken\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING :token"));
    }

    #[test]
    fn test_oversize_line_truncated_and_resynced() {
        let mut codec = LineCodec::new();
        let long = "a".repeat(600);
        let mut buf = BytesMut::from(format!("PRIVMSG #c :{}\r\nPING x\r\n", long).as_str());
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN - 2);
        assert!(line.starts_with("PRIVMSG #c :aaa"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING x"));
    }

    #[test]
    fn test_oversize_without_terminator_discards_tail() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("b".repeat(700).as_str());
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN - 2);
        // Remainder of the oversize line keeps being dropped...
        buf.extend_from_slice(b"ccccc");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        // ...until a LF restores framing.
        buf.extend_from_slice(b"ccc\nPING y\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING y"));
    }

    #[test]
    fn test_encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("PONG :token".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG :token\r\n");
    }
}

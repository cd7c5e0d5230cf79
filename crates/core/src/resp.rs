//! Wire-form values: replies, request encoding, request parsing.
//!
//! Requests are count-prefixed arrays of length-prefixed byte strings:
//!
//! ```text
//! *<argc>\r\n$<len1>\r\n<bytes1>\r\n$<len2>\r\n<bytes2>\r\n...
//! ```
//!
//! The append-only log is a plain concatenation of requests in this same
//! form, so the encoder and parser here serve both the reply path and
//! persistence.

use crate::error::{Error, Result};
use crate::Bytes;

/// A reply value, one of the wire reply shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Simple string: `+...\r\n`
    Simple(&'static str),
    /// Simple string with a runtime-built payload.
    Status(String),
    /// Error: `-...\r\n`
    Error(String),
    /// Integer: `:<n>\r\n`
    Int(i64),
    /// Bulk string: `$<len>\r\n<bytes>\r\n`
    Bulk(Bytes),
    /// Nil bulk: `$-1\r\n`
    Nil,
    /// Multi-bulk: `*<n>\r\n` followed by n replies.
    Array(Vec<Reply>),
    /// Nil multi-bulk: `*-1\r\n`
    NilArray,
    /// No bytes are emitted. Used for queued/blocked clients and for the
    /// synthetic loading client, whose replies are discarded.
    None,
}

impl Reply {
    /// The `+OK` reply.
    pub fn ok() -> Reply {
        Reply::Simple("OK")
    }

    /// Bulk reply from anything that converts to bytes.
    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(data.into())
    }

    /// Error reply from an [`Error`].
    pub fn error(err: &Error) -> Reply {
        Reply::Error(err.wire_message())
    }

    /// True if this reply is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Append the wire encoding of this reply to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Status(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Int(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
            Reply::NilArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::None => {}
        }
    }
}

/// Append the multibulk request encoding of `args` to `out`.
///
/// This is the exact byte form the append-only log stores.
pub fn encode_request(args: &[Bytes], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Incremental parser over a buffer of concatenated multibulk requests.
///
/// `next()` yields one argument vector per call; `Ok(None)` means a clean
/// end exactly on a command boundary. Anything else (a partial trailing
/// command, a malformed prefix) is [`Error::Corruption`] carrying the byte
/// offset, which replay treats as fatal.
pub struct RequestParser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RequestParser<'a> {
    /// Parser over `buf`, starting at offset 0.
    pub fn new(buf: &'a [u8]) -> Self {
        RequestParser { buf, pos: 0 }
    }

    /// Byte offset of the next unparsed command.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Parse the next request, or `None` at a clean end of buffer.
    pub fn next_request(&mut self) -> Result<Option<Vec<Bytes>>> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let start = self.pos;
        let argc = self.read_prefixed_len(b'*').map_err(|e| self.at(start, e))?;
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            let len = self.read_prefixed_len(b'$').map_err(|e| self.at(start, e))?;
            if self.buf.len() - self.pos < len + 2 {
                return Err(self.at(start, "truncated bulk payload"));
            }
            args.push(self.buf[self.pos..self.pos + len].to_vec());
            self.pos += len;
            if &self.buf[self.pos..self.pos + 2] != b"\r\n" {
                return Err(self.at(start, "bulk payload missing CRLF"));
            }
            self.pos += 2;
        }
        Ok(Some(args))
    }

    /// Read `<marker><decimal>\r\n` and return the decimal value.
    fn read_prefixed_len(&mut self, marker: u8) -> std::result::Result<usize, &'static str> {
        if self.pos >= self.buf.len() || self.buf[self.pos] != marker {
            return Err("expected length prefix");
        }
        self.pos += 1;
        let line_start = self.pos;
        while self.pos < self.buf.len() && self.buf[self.pos] != b'\r' {
            self.pos += 1;
        }
        if self.buf.len() - self.pos < 2 || self.buf[self.pos + 1] != b'\n' {
            return Err("length prefix missing CRLF");
        }
        let digits = &self.buf[line_start..self.pos];
        self.pos += 2;
        if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
            return Err("bad length prefix");
        }
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or("length prefix out of range")
    }

    fn at(&self, offset: usize, msg: &str) -> Error {
        Error::Corruption(format!("{msg} at byte {offset}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_encode_request_wire_form() {
        let mut out = Vec::new();
        encode_request(&args(&["SET", "k", "v"]), &mut out);
        assert_eq!(out, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn test_request_roundtrip() {
        let mut out = Vec::new();
        encode_request(&args(&["SET", "counter", "10"]), &mut out);
        encode_request(&args(&["INCRBY", "counter", "5"]), &mut out);

        let mut parser = RequestParser::new(&out);
        assert_eq!(parser.next_request().unwrap(), Some(args(&["SET", "counter", "10"])));
        assert_eq!(parser.next_request().unwrap(), Some(args(&["INCRBY", "counter", "5"])));
        assert_eq!(parser.next_request().unwrap(), None);
    }

    #[test]
    fn test_empty_buffer_is_clean_eof() {
        let mut parser = RequestParser::new(b"");
        assert_eq!(parser.next_request().unwrap(), None);
    }

    #[test]
    fn test_binary_safe_payload() {
        let payload = vec![0u8, 1, 2, b'\r', b'\n', 255];
        let mut out = Vec::new();
        encode_request(&[b"SET".to_vec(), b"k".to_vec(), payload.clone()], &mut out);

        let mut parser = RequestParser::new(&out);
        let parsed = parser.next_request().unwrap().unwrap();
        assert_eq!(parsed[2], payload);
    }

    #[test]
    fn test_truncated_command_is_corruption() {
        let mut out = Vec::new();
        encode_request(&args(&["SET", "k", "v"]), &mut out);
        out.truncate(out.len() - 3);

        let mut parser = RequestParser::new(&out);
        let err = parser.next_request().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_garbage_prefix_is_corruption() {
        let mut parser = RequestParser::new(b"SET k v\r\n");
        assert!(parser.next_request().is_err());
    }

    #[test]
    fn test_reply_encodings() {
        let cases: Vec<(Reply, &[u8])> = vec![
            (Reply::ok(), b"+OK\r\n"),
            (Reply::Error("ERR boom".into()), b"-ERR boom\r\n"),
            (Reply::Int(-7), b":-7\r\n"),
            (Reply::bulk(&b"hi"[..]), b"$2\r\nhi\r\n"),
            (Reply::Nil, b"$-1\r\n"),
            (Reply::NilArray, b"*-1\r\n"),
            (Reply::None, b""),
            (
                Reply::Array(vec![Reply::Int(1), Reply::Nil]),
                b"*2\r\n:1\r\n$-1\r\n",
            ),
        ];
        for (reply, expected) in cases {
            let mut out = Vec::new();
            reply.encode(&mut out);
            assert_eq!(out, expected, "encoding of {reply:?}");
        }
    }
}

//! Replay reader for the append-only log.
//!
//! Streams argument vectors out of the log file. A zero-byte file means
//! "no data, start fresh". A partial trailing command or malformed prefix
//! is corruption: startup aborts with an operator-facing message rather
//! than silently replaying a truncated history.

use ember_core::resp::RequestParser;
use ember_core::{Bytes, Error, Result};
use std::path::Path;

/// Reader over a fully loaded log.
pub struct LogReader {
    data: Vec<u8>,
    offset: usize,
    commands: u64,
}

impl LogReader {
    /// Open the log at `path`. Returns `None` when the file is missing or
    /// empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Option<LogReader>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(LogReader {
            data,
            offset: 0,
            commands: 0,
        }))
    }

    /// Size of the loaded log in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the log held no bytes (never constructed in that case, but
    /// kept for API symmetry).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Commands yielded so far.
    pub fn commands_read(&self) -> u64 {
        self.commands
    }

    /// Next command, or `None` at a clean end of log.
    pub fn next_command(&mut self) -> Result<Option<Vec<Bytes>>> {
        let mut parser = RequestParser::new(&self.data[self.offset..]);
        match parser.next_request() {
            Ok(Some(args)) => {
                self.offset += parser.offset();
                self.commands += 1;
                Ok(Some(args))
            }
            Ok(None) => Ok(None),
            Err(Error::Corruption(msg)) => Err(Error::Corruption(format!(
                "{msg} (absolute offset {}); run the log check-and-fix tool",
                self.offset
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::resp::encode_request;
    use tempfile::tempdir;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_missing_file_is_fresh_start() {
        let dir = tempdir().unwrap();
        assert!(LogReader::open(dir.path().join("none.log")).unwrap().is_none());
    }

    #[test]
    fn test_empty_file_is_fresh_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.log");
        std::fs::write(&path, b"").unwrap();
        assert!(LogReader::open(&path).unwrap().is_none());
    }

    #[test]
    fn test_streams_commands_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appendonly.log");
        let mut bytes = Vec::new();
        encode_request(&args(&["SET", "k", "v"]), &mut bytes);
        encode_request(&args(&["DEL", "k"]), &mut bytes);
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = LogReader::open(&path).unwrap().unwrap();
        assert_eq!(reader.next_command().unwrap(), Some(args(&["SET", "k", "v"])));
        assert_eq!(reader.next_command().unwrap(), Some(args(&["DEL", "k"])));
        assert_eq!(reader.next_command().unwrap(), None);
        assert_eq!(reader.commands_read(), 2);
    }

    #[test]
    fn test_truncated_tail_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appendonly.log");
        let mut bytes = Vec::new();
        encode_request(&args(&["SET", "k", "v"]), &mut bytes);
        let full_len = bytes.len();
        encode_request(&args(&["SET", "k2", "v2"]), &mut bytes);
        bytes.truncate(full_len + 7);
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = LogReader::open(&path).unwrap().unwrap();
        assert!(reader.next_command().unwrap().is_some());
        let err = reader.next_command().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("check-and-fix"));
    }
}

//! Error types for the Ember store.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations. Two families share the one enum:
//!
//! - **Client errors** are recoverable and carry the exact message reported
//!   on the wire (`WRONGTYPE …`, `ERR value is not an integer …`). Dispatch
//!   converts them to error replies.
//! - **Internal errors** (I/O, log corruption) are never shown to a client;
//!   the caller either aborts startup or escalates them as fatal.

use std::io;
use thiserror::Error;

/// Result type alias for Ember operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (log file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The append-only log is malformed or truncated mid-command.
    #[error("append-only log corrupt: {0}")]
    Corruption(String),

    /// Operation applied to a key holding the wrong kind of value.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Value cannot be parsed as a 64-bit signed integer.
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    /// Value cannot be parsed as a float.
    #[error("ERR value is not a valid float")]
    NotAFloat,

    /// Integer arithmetic would overflow.
    #[error("ERR increment or decrement would overflow")]
    Overflow,

    /// Float arithmetic produced NaN or Infinity.
    #[error("ERR increment would produce NaN or Infinity")]
    NanOrInfinity,

    /// Expire time is not a valid deadline.
    #[error("ERR invalid expire time")]
    InvalidExpire,

    /// Malformed command arguments.
    #[error("ERR syntax error")]
    Syntax,

    /// Offset or index outside the addressable range.
    #[error("ERR index out of range")]
    IndexOutOfRange,

    /// String values are capped at 512 MiB.
    #[error("ERR string exceeds maximum allowed size (512MB)")]
    StringTooLong,

    /// Memory cap reached and eviction could not free enough.
    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    /// Any other client-reportable error; the string is the full wire
    /// message without the leading `-`.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Build a `Custom` error with the conventional `ERR ` prefix.
    pub fn command(msg: impl Into<String>) -> Self {
        Error::Custom(format!("ERR {}", msg.into()))
    }

    /// The payload of the wire error reply (`-<message>\r\n`).
    pub fn wire_message(&self) -> String {
        match self {
            // Internal errors never reach a client under normal operation;
            // report them as generic server errors if one ever does.
            Error::Io(e) => format!("ERR server I/O error: {e}"),
            Error::Corruption(m) => format!("ERR log corrupt: {m}"),
            other => other.to_string(),
        }
    }

    /// True for errors that must abort log replay instead of being replied.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Corruption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_type_message() {
        let msg = Error::WrongType.wire_message();
        assert!(msg.starts_with("WRONGTYPE"));
    }

    #[test]
    fn test_command_helper_prefixes_err() {
        let err = Error::command("unknown command 'FOO'");
        assert_eq!(err.wire_message(), "ERR unknown command 'FOO'");
    }

    #[test]
    fn test_oom_message_has_no_err_prefix() {
        // The OOM reply uses its own -OOM prefix on the wire.
        assert!(Error::OutOfMemory.wire_message().starts_with("OOM"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Corruption("trailing bytes".into()).is_fatal());
        assert!(!Error::WrongType.is_fatal());
        assert!(!Error::Syntax.is_fatal());
    }
}

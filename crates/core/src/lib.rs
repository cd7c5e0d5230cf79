//! Core types shared by every Ember crate.
//!
//! This crate defines the foundations the rest of the system builds on:
//! - Error: unified error type (client-reportable and internal variants)
//! - Reply: wire-form reply values and their encoder
//! - Request encoding/parsing in the count-prefixed multibulk form, shared
//!   by the reply path and the append-only log
//! - Byte-string utilities: strict integer/float parsing, glob matching,
//!   constant-time comparison, millisecond clock helpers

#![warn(clippy::all)]

pub mod error;
pub mod resp;
pub mod util;

pub use error::{Error, Result};
pub use resp::{encode_request, Reply, RequestParser};

/// Keys, members, fields and string values are raw byte strings.
pub type Bytes = Vec<u8>;

//! The Ember engine: value objects, typed commands, databases, expiration,
//! eviction, transactions, dispatch, and the periodic maintenance tick.
//!
//! Everything runs under `&mut Server`, the single-owner rendition of a
//! cooperative single-threaded command loop. The only work that leaves the
//! loop is background serialization (snapshot/rewrite threads over a cloned
//! handle table) and the deferred-I/O worker pool.

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod evict;
pub mod expire;
pub mod object;
pub mod persist;
pub mod server;
pub mod shared;
pub mod slowlog;

mod commands;

pub use client::Client;
pub use config::{Config, MaxmemoryPolicy, SavePoint};
pub use object::{Kind, Object, SharedObject, Value};
pub use server::Server;

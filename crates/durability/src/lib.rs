//! Persistence machinery for the Ember store.
//!
//! - [`aof`]: the append-only command log: buffered writer with three
//!   fsync disciplines, the rewrite-diff block buffer, the background
//!   rewrite job, and the replay reader.
//! - [`background`]: a small fixed pool of worker threads handling deferred
//!   `fsync` and `close` jobs so neither ever blocks the command loop.

#![warn(clippy::all)]

pub mod aof;
pub mod background;

pub use aof::{AofWriter, FsyncPolicy, LogReader, RewriteBuffer, RewriteJob};
pub use background::{BackgroundPool, Job};

//! # EmberDB
//!
//! An in-memory, single-process typed key-value store: strings, lists,
//! sets, hashes, and sorted sets behind a request/reply command surface,
//! with persistence through a periodic snapshot and an append-only command
//! log that is compacted in the background.
//!
//! # Quick Start
//!
//! ```no_run
//! use emberdb::{Config, Reply, Server};
//!
//! fn main() -> emberdb::Result<()> {
//!     let cfg = Config::default().with_appendonly(true);
//!     let mut server = Server::open(cfg)?;
//!
//!     let client = server.connect_client();
//!     let reply = server.execute(
//!         client,
//!         vec![b"SET".to_vec(), b"greeting".to_vec(), b"hello".to_vec()],
//!     );
//!     assert_eq!(reply, Reply::ok());
//!
//!     // Drive the maintenance loop at ~10 Hz from the event loop:
//!     // expiration, log flushing, background-child reaping.
//!     server.before_sleep();
//!     let shutdown_requested = server.tick();
//!     if shutdown_requested {
//!         server.shutdown();
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The [`Server`] struct is the whole store; every command executes under
//! `&mut Server`, which is the concurrency model: the event loop that owns
//! it is the serialization point. The connection layer (socket accept, wire
//! parsing) is external: it hands parsed argument vectors to
//! [`Server::execute`], drains [`Server::drain_outbox`] for asynchronously
//! delivered replies (blocking pops, timeouts), and calls
//! [`Server::tick`]/[`Server::before_sleep`] around its poll loop.
//!
//! Internal crates (core, storage, durability, engine) are not exposed;
//! only this facade is stable.

pub use ember_core::{Error, Reply, Result};
pub use ember_durability::FsyncPolicy;
pub use ember_engine::{Config, Kind, MaxmemoryPolicy, SavePoint, Server};

//! # rowsync server
//!
//! The remote end of a rowsync relationship.
//!
//! This crate provides:
//! - Handshake, pull and push handlers over a `rowsync_store::Store`
//! - Per-peer session tracking and tombstone pruning
//! - Message dispatch for in-process or byte-level transports
//!
//! # Protocol
//!
//! Peers synchronize pull-then-push:
//! 1. The peer handshakes, reporting the highest server version it has
//!    committed; the server answers with its high version and retention
//!    floor
//! 2. The peer pulls changes since its watermark, page by page
//! 3. The peer pushes its local changes along with the pulled watermark;
//!    the server rejects entries for rows it changed after that watermark
//!    and acknowledges entries it has already incorporated

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, PeerSession, RequestHandler};
pub use server::SyncServer;

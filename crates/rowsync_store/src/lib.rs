//! # rowsync store
//!
//! Embedded transactional row store used on both ends of a rowsync
//! relationship.
//!
//! This crate provides:
//! - `Store` with single-writer `WriteTransaction`s
//! - A change tracker written in the same commit as every row mutation
//! - `BatchBuilder` and `ChangeCursor` for reading changes since a watermark
//! - Per-peer watermarks and seen-version bookkeeping
//! - `StateBackend` implementations for memory and a JSON file
//!
//! ## Commit model
//!
//! Rows, change entries, seen versions, watermarks and the version clock
//! live in one state. A commit replaces that state atomically in memory
//! and, for persistent backends, with one atomic write, so a crash never
//! separates a row from its change entry.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod backend;
mod batch;
mod clock;
mod config;
mod error;
mod schema;
mod state;
mod store;
mod tracker;
mod transaction;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use batch::{BatchBuilder, ChangeCursor, DEFAULT_BATCH_SIZE};
pub use clock::{ManualClock, SystemClock, WallClock};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use schema::{ColumnDef, TableSchema};
pub use state::{PersistedState, SeenRecord, WatermarkRecord, STATE_FORMAT_VERSION};
pub use store::Store;
pub use tracker::ChangeTracker;
pub use transaction::WriteTransaction;

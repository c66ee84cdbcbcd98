//! # rowsync protocol
//!
//! Shared vocabulary for the rowsync synchronization engine.
//!
//! This crate provides:
//! - `Row`, `RowKey` and `Value` for table data
//! - `ChangeEntry` and `Operation` for tracked mutations
//! - `Batch` for paged change exchange
//! - `Watermark` for per-peer exchange progress
//! - `Conflict` / `ConflictRecord` for detected conflicts
//! - Protocol messages (Handshake, Pull, Push) and their CBOR codec
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod codec;
mod conflict;
mod error;
mod messages;
mod operation;
mod row;
mod value;
mod watermark;

pub use batch::{Batch, BatchEntry};
pub use codec::{decode, encode};
pub use conflict::{Conflict, ConflictKind, ConflictPolicy, ConflictRecord, Resolution};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ErrorCode, ErrorResponse, HandshakeRequest, HandshakeResponse, PullRequest, PushAck,
    PushRequest, Rejection, SyncMessage, PROTOCOL_VERSION,
};
pub use operation::{ChangeEntry, Operation, PeerId, Version};
pub use watermark::Watermark;
pub use row::{Columns, Row, RowId, RowKey};
pub use value::{ColumnType, Value};

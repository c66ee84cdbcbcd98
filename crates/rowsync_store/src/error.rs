//! Error types for the row store.

use rowsync_protocol::{RowKey, Version};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error from the state backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted state could not be encoded or decoded.
    #[error("state serialization error: {0}")]
    Serialization(String),

    /// Another process holds the store file.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Table does not exist.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Name of the table.
        table: String,
    },

    /// Row does not exist.
    #[error("row not found: {table}/{key}")]
    RowNotFound {
        /// Table of the row.
        table: String,
        /// Primary key of the row.
        key: RowKey,
    },

    /// A write violated the table schema or a key constraint.
    #[error("constraint violation on {table}/{key}: {reason}")]
    ConstraintViolation {
        /// Table of the row.
        table: String,
        /// Primary key of the row.
        key: RowKey,
        /// What was violated.
        reason: String,
    },

    /// The requested history has been pruned.
    #[error("resync required: changes since {requested} requested, history retained from {retained_from}")]
    ResyncRequired {
        /// Requested watermark.
        requested: Version,
        /// Tombstones at or below this version are gone.
        retained_from: Version,
    },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the issue.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(table: impl Into<String>, key: RowKey, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            table: table.into(),
            key,
            reason: reason.into(),
        }
    }

    /// Returns true if the store itself cannot be read or written, as
    /// opposed to a problem with a particular row.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Locked | StoreError::Closed
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

//! Error types for the sync engine.

use crate::state::SessionState;
use rowsync_protocol::{ErrorCode, ErrorResponse, ProtocolError, RowId, RowKey};
use rowsync_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync session.
///
/// Errors are `Clone` so they can be carried in session reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A store (local or remote) cannot be read or written. Nothing was
    /// changed; retry later.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A row could not be committed locally; the whole apply step rolled
    /// back.
    #[error("apply failed for {table}/{key}: {reason}")]
    ApplyFailed {
        /// Table of the row.
        table: String,
        /// Key of the row.
        key: RowKey,
        /// What went wrong.
        reason: String,
    },

    /// Another session with this peer is in flight.
    #[error("a sync session is already running")]
    SessionBusy,

    /// A merge callback failed; the row is skipped this session.
    #[error("could not resolve conflict on {table}/{key}: {reason}")]
    ResolutionFailed {
        /// Table of the row.
        table: String,
        /// Key of the row.
        key: RowKey,
        /// What the merge callback reported.
        reason: String,
    },

    /// A remote call exceeded its budget.
    #[error("{step} timed out after {budget:?}")]
    Timeout {
        /// Step that was waiting.
        step: SessionState,
        /// The budget.
        budget: Duration,
    },

    /// The session was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The remote sent something malformed or refused the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Any other local store failure.
    #[error("store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable(_) | SyncError::Timeout { .. }
        )
    }

    /// Maps a remote error reply.
    pub fn from_response(response: ErrorResponse) -> Self {
        match response.code {
            ErrorCode::Unavailable | ErrorCode::Internal => {
                SyncError::SourceUnavailable(format!("remote: {}", response.message))
            }
            ErrorCode::ResyncRequired | ErrorCode::InvalidRequest | ErrorCode::UnsupportedVersion => {
                SyncError::Protocol(response.message)
            }
        }
    }

    /// Maps a store error raised while committing `row`.
    pub fn from_apply(row: &RowId, error: StoreError) -> Self {
        match error {
            StoreError::ConstraintViolation { table, key, reason } => {
                SyncError::ApplyFailed { table, key, reason }
            }
            StoreError::RowNotFound { .. } | StoreError::TableNotFound { .. } => {
                SyncError::ApplyFailed {
                    table: row.table.clone(),
                    key: row.key.clone(),
                    reason: error.to_string(),
                }
            }
            other => other.into(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        if error.is_unavailable() {
            SyncError::SourceUnavailable(error.to_string())
        } else {
            SyncError::Store(error.to_string())
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(error: ProtocolError) -> Self {
        SyncError::Protocol(error.to_string())
    }
}

//! Error types for the sync server.

use rowsync_protocol::{ErrorCode, ErrorResponse, ProtocolError};
use rowsync_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Protocol version mismatch.
    #[error("protocol version mismatch: server speaks {local}, peer speaks {remote}")]
    ProtocolMismatch {
        /// Server protocol version.
        local: u16,
        /// Peer protocol version.
        remote: u16,
    },

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Wire codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::ProtocolMismatch { .. }
                | ServerError::Codec(_)
                | ServerError::Store(StoreError::ResyncRequired { .. })
        )
    }

    /// Returns true if the server failed.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Maps the error to its wire form.
    pub fn to_response(&self) -> ErrorResponse {
        let code = match self {
            ServerError::InvalidRequest(_) | ServerError::Codec(_) => ErrorCode::InvalidRequest,
            ServerError::ProtocolMismatch { .. } => ErrorCode::UnsupportedVersion,
            ServerError::Store(StoreError::ResyncRequired { .. }) => ErrorCode::ResyncRequired,
            ServerError::Store(e) if e.is_unavailable() => ErrorCode::Unavailable,
            ServerError::Store(_) | ServerError::Internal(_) => ErrorCode::Internal,
        };
        ErrorResponse::new(code, self.to_string())
    }
}

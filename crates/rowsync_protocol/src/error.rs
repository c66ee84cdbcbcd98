//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Message bytes could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The peer speaks a protocol version we do not understand.
    #[error("unsupported protocol version: local={local}, remote={remote}")]
    UnsupportedVersion {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// A message was well formed but not the one expected.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message kind.
        expected: &'static str,
        /// Received message kind.
        actual: &'static str,
    },
}

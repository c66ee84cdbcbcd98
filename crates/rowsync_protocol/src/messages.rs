//! Protocol messages for sync.

use crate::batch::Batch;
use crate::codec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::{PeerId, Version};
use crate::row::RowId;
use serde::{Deserialize, Serialize};

/// Wire protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Handshake request.
    HandshakeRequest(HandshakeRequest),
    /// Handshake response.
    HandshakeResponse(HandshakeResponse),
    /// Pull request.
    PullRequest(PullRequest),
    /// Pull response.
    PullResponse(Batch),
    /// Push request.
    PushRequest(PushRequest),
    /// Push acknowledgement.
    PushAck(PushAck),
    /// Error reply to any request.
    Error(ErrorResponse),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::HandshakeRequest(_) => 1,
            SyncMessage::HandshakeResponse(_) => 2,
            SyncMessage::PullRequest(_) => 3,
            SyncMessage::PullResponse(_) => 4,
            SyncMessage::PushRequest(_) => 5,
            SyncMessage::PushAck(_) => 6,
            SyncMessage::Error(_) => 7,
        }
    }

    /// Returns a short name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::HandshakeRequest(_) => "handshake-request",
            SyncMessage::HandshakeResponse(_) => "handshake-response",
            SyncMessage::PullRequest(_) => "pull-request",
            SyncMessage::PullResponse(_) => "pull-response",
            SyncMessage::PushRequest(_) => "push-request",
            SyncMessage::PushAck(_) => "push-ack",
            SyncMessage::Error(_) => "error",
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        codec::decode(bytes)
    }

    /// Unwraps a handshake response.
    pub fn into_handshake_response(self) -> ProtocolResult<HandshakeResponse> {
        match self {
            SyncMessage::HandshakeResponse(r) => Ok(r),
            other => Err(unexpected("handshake-response", &other)),
        }
    }

    /// Unwraps a pull response.
    pub fn into_pull_response(self) -> ProtocolResult<Batch> {
        match self {
            SyncMessage::PullResponse(b) => Ok(b),
            other => Err(unexpected("pull-response", &other)),
        }
    }

    /// Unwraps a push acknowledgement.
    pub fn into_push_ack(self) -> ProtocolResult<PushAck> {
        match self {
            SyncMessage::PushAck(a) => Ok(a),
            other => Err(unexpected("push-ack", &other)),
        }
    }
}

fn unexpected(expected: &'static str, actual: &SyncMessage) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        expected,
        actual: actual.kind(),
    }
}

/// Handshake request from the initiating peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Initiating peer.
    pub peer: PeerId,
    /// Protocol version.
    pub protocol_version: u16,
    /// Tables the initiator synchronizes.
    pub tables: Vec<String>,
    /// Highest responder version the initiator has committed.
    pub acknowledged: Version,
}

impl HandshakeRequest {
    /// Creates a new handshake request.
    pub fn new(peer: PeerId, tables: Vec<String>, acknowledged: Version) -> Self {
        Self {
            peer,
            protocol_version: PROTOCOL_VERSION,
            tables,
            acknowledged,
        }
    }
}

/// Handshake response from the responding peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Responding peer.
    pub peer: PeerId,
    /// Responder's protocol version.
    pub protocol_version: u16,
    /// Responder's highest assigned version.
    pub high_version: Version,
    /// Tombstones at or below this version have been pruned.
    pub retained_from: Version,
    /// Most entries the responder accepts in one push.
    pub max_push_batch: u32,
}

/// Request for a page of changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Requesting peer. Changes that originated there are not returned.
    pub peer: PeerId,
    /// Table set.
    pub tables: Vec<String>,
    /// Return entries with version greater than this.
    pub since: Version,
    /// Maximum entries in the page.
    pub max_size: u32,
    /// Snapshot mode: live rows only, no tombstones.
    pub snapshot: bool,
}

impl PullRequest {
    /// Creates an incremental pull request.
    pub fn new(peer: PeerId, tables: Vec<String>, since: Version, max_size: u32) -> Self {
        Self {
            peer,
            tables,
            since,
            max_size,
            snapshot: false,
        }
    }

    /// Switches the request to snapshot mode.
    pub fn snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }
}

/// A page of local changes sent to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Pushing peer.
    pub peer: PeerId,
    /// Highest remote version the pusher has seen. Remote rows changed
    /// after this point are rejected instead of overwritten.
    pub remote_watermark: Version,
    /// The changes.
    pub batch: Batch,
}

/// A pushed entry the remote refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Pusher's version of the refused entry.
    pub version: Version,
    /// Affected row.
    pub row: RowId,
    /// Why it was refused.
    pub reason: String,
}

/// Acknowledgement of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Pusher versions that were applied.
    pub accepted: Vec<Version>,
    /// Pusher versions the remote had already incorporated.
    pub already_applied: Vec<Version>,
    /// Entries that were refused.
    pub rejected: Vec<Rejection>,
    /// Remote's highest version after the push.
    pub high_version: Version,
}

impl PushAck {
    /// Lowest refused version, if any.
    pub fn lowest_rejected(&self) -> Option<Version> {
        self.rejected.iter().map(|r| r.version).min()
    }
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The responder's store cannot be read or written.
    Unavailable,
    /// The requested watermark predates pruned history.
    ResyncRequired,
    /// The request was malformed or exceeded limits.
    InvalidRequest,
    /// The protocol versions are incompatible.
    UnsupportedVersion,
    /// Anything else.
    Internal,
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Category.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

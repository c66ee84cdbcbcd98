//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, PeerSession, RequestHandler};
use rowsync_protocol::{
    Batch, HandshakeRequest, HandshakeResponse, PeerId, PullRequest, PushAck, PushRequest,
    SyncMessage,
};
use rowsync_store::Store;
use std::sync::Arc;
use tracing::warn;

/// The sync server.
///
/// Serves the remote side of a rowsync relationship over a shared
/// [`Store`]. The server is transport-agnostic: embed it in-process, or
/// expose [`handle_bytes`](Self::handle_bytes) behind any framing.
///
/// # Example
///
/// ```
/// use rowsync_server::{ServerConfig, SyncServer};
/// use rowsync_store::Store;
/// use std::sync::Arc;
///
/// let store = Arc::new(Store::open_in_memory().unwrap());
/// let server = SyncServer::new(store, ServerConfig::default());
/// assert_eq!(server.peer_count(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a sync server over a store.
    pub fn new(store: Arc<Store>, config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Returns the server's store.
    pub fn store(&self) -> &Arc<Store> {
        &self.context.store
    }

    /// Returns the server's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.context.store.peer_id()
    }

    /// Handles a handshake request.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        self.handler.handle_handshake(request)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<Batch> {
        self.handler.handle_pull(request)
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushAck> {
        self.handler.handle_push(request)
    }

    /// Handles a sync message (dispatches to the appropriate handler).
    ///
    /// Failures are returned as [`SyncMessage::Error`].
    pub fn handle_message(&self, message: SyncMessage) -> SyncMessage {
        let result = match message {
            SyncMessage::HandshakeRequest(req) => self
                .handle_handshake(req)
                .map(SyncMessage::HandshakeResponse),
            SyncMessage::PullRequest(req) => self.handle_pull(req).map(SyncMessage::PullResponse),
            SyncMessage::PushRequest(req) => self.handle_push(req).map(SyncMessage::PushAck),
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected message type: {}",
                other.kind()
            ))),
        };

        result.unwrap_or_else(|e| {
            warn!(error = %e, "request failed");
            SyncMessage::Error(e.to_response())
        })
    }

    /// Handles an encoded request and returns the encoded reply.
    ///
    /// # Errors
    ///
    /// Only fails if the reply itself cannot be encoded; undecodable
    /// requests get an encoded error reply.
    pub fn handle_bytes(&self, request: &[u8]) -> ServerResult<Vec<u8>> {
        let reply = match SyncMessage::decode(request) {
            Ok(message) => self.handle_message(message),
            Err(e) => SyncMessage::Error(ServerError::from(e).to_response()),
        };
        Ok(reply.encode()?)
    }

    /// Returns what the server knows about a peer.
    pub fn session(&self, peer: &PeerId) -> Option<PeerSession> {
        self.context.session(peer)
    }

    /// Returns the number of peers that have completed a handshake.
    pub fn peer_count(&self) -> usize {
        self.context.peer_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{ErrorCode, Version};

    fn create_server() -> SyncServer {
        SyncServer::new(
            Arc::new(Store::open_in_memory().unwrap()),
            ServerConfig::default(),
        )
    }

    #[test]
    fn message_dispatch() {
        let server = create_server();
        let message = SyncMessage::HandshakeRequest(HandshakeRequest::new(
            PeerId::random(),
            Vec::new(),
            Version::ZERO,
        ));

        let response = server.handle_message(message);
        assert!(matches!(response, SyncMessage::HandshakeResponse(_)));
        assert_eq!(server.peer_count(), 1);
    }

    #[test]
    fn unexpected_message_is_an_error_reply() {
        let server = create_server();
        let response = server.handle_message(SyncMessage::PushAck(Default::default()));
        match response {
            SyncMessage::Error(e) => assert_eq!(e.code, ErrorCode::InvalidRequest),
            other => panic!("expected error, got {}", other.kind()),
        }
    }

    #[test]
    fn bytes_round_trip() {
        let server = create_server();
        let request = SyncMessage::PullRequest(PullRequest::new(
            PeerId::random(),
            Vec::new(),
            Version::ZERO,
            10,
        ));

        let reply = server.handle_bytes(&request.encode().unwrap()).unwrap();
        let batch = SyncMessage::decode(&reply)
            .unwrap()
            .into_pull_response()
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.source, server.peer_id());
    }

    #[test]
    fn garbage_bytes_get_an_error_reply() {
        let server = create_server();
        let reply = server.handle_bytes(&[0xff, 0x00, 0x13]).unwrap();
        assert!(matches!(
            SyncMessage::decode(&reply).unwrap(),
            SyncMessage::Error(_)
        ));
    }

    #[test]
    fn closed_store_reports_unavailable() {
        let server = create_server();
        server.store().close().unwrap();
        let response = server.handle_message(SyncMessage::HandshakeRequest(
            HandshakeRequest::new(PeerId::random(), Vec::new(), Version::ZERO),
        ));
        match response {
            SyncMessage::Error(e) => assert_eq!(e.code, ErrorCode::Unavailable),
            other => panic!("expected error, got {}", other.kind()),
        }
    }
}

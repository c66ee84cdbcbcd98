//! The remote side of a session.
//!
//! The orchestrator only talks to a [`RemotePeer`]; how requests reach the
//! remote store is up to the implementation.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use rowsync_protocol::{
    Batch, HandshakeRequest, HandshakeResponse, PullRequest, PushAck, PushRequest, SyncMessage,
};
use rowsync_server::SyncServer;
use std::sync::Arc;

/// A peer that can be synchronized with.
#[async_trait]
pub trait RemotePeer: Send + Sync {
    /// Exchanges peer identity, protocol version and acknowledged version.
    async fn handshake(&self, request: HandshakeRequest) -> SyncResult<HandshakeResponse>;

    /// Pulls one page of remote changes.
    async fn pull(&self, request: PullRequest) -> SyncResult<Batch>;

    /// Pushes one page of local changes.
    async fn push(&self, request: PushRequest) -> SyncResult<PushAck>;
}

/// Calls a [`SyncServer`] in the same process.
#[derive(Clone)]
pub struct ServerPeer {
    server: Arc<SyncServer>,
}

impl ServerPeer {
    /// Wraps a server.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &Arc<SyncServer> {
        &self.server
    }
}

#[async_trait]
impl RemotePeer for ServerPeer {
    async fn handshake(&self, request: HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.server
            .handle_handshake(request)
            .map_err(|e| SyncError::from_response(e.to_response()))
    }

    async fn pull(&self, request: PullRequest) -> SyncResult<Batch> {
        self.server
            .handle_pull(request)
            .map_err(|e| SyncError::from_response(e.to_response()))
    }

    async fn push(&self, request: PushRequest) -> SyncResult<PushAck> {
        self.server
            .handle_push(request)
            .map_err(|e| SyncError::from_response(e.to_response()))
    }
}

/// Sends every request through the CBOR wire encoding before it reaches
/// the server, the way a network transport would.
#[derive(Clone)]
pub struct LoopbackPeer {
    server: Arc<SyncServer>,
}

impl LoopbackPeer {
    /// Wraps a server.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }

    fn exchange(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        let bytes = request.encode()?;
        let reply = self
            .server
            .handle_bytes(&bytes)
            .map_err(|e| SyncError::from_response(e.to_response()))?;
        match SyncMessage::decode(&reply)? {
            SyncMessage::Error(response) => Err(SyncError::from_response(response)),
            message => Ok(message),
        }
    }
}

#[async_trait]
impl RemotePeer for LoopbackPeer {
    async fn handshake(&self, request: HandshakeRequest) -> SyncResult<HandshakeResponse> {
        Ok(self
            .exchange(SyncMessage::HandshakeRequest(request))?
            .into_handshake_response()?)
    }

    async fn pull(&self, request: PullRequest) -> SyncResult<Batch> {
        Ok(self
            .exchange(SyncMessage::PullRequest(request))?
            .into_pull_response()?)
    }

    async fn push(&self, request: PushRequest) -> SyncResult<PushAck> {
        Ok(self
            .exchange(SyncMessage::PushRequest(request))?
            .into_push_ack()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{PeerId, Version, PROTOCOL_VERSION};
    use rowsync_server::ServerConfig;
    use rowsync_store::Store;

    fn server() -> Arc<SyncServer> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        Arc::new(SyncServer::new(store, ServerConfig::default()))
    }

    #[tokio::test]
    async fn server_peer_handshake() {
        let server = server();
        let peer = ServerPeer::new(Arc::clone(&server));

        let response = peer
            .handshake(HandshakeRequest::new(PeerId::random(), vec![], Version::ZERO))
            .await
            .unwrap();
        assert_eq!(response.peer, server.peer_id());
        assert_eq!(response.protocol_version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn loopback_peer_round_trips() {
        let server = server();
        let peer = LoopbackPeer::new(Arc::clone(&server));
        let me = PeerId::random();

        let response = peer
            .handshake(HandshakeRequest::new(me, vec![], Version::ZERO))
            .await
            .unwrap();
        assert_eq!(response.peer, server.peer_id());

        let batch = peer
            .pull(PullRequest::new(me, vec![], Version::ZERO, 10))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(!batch.has_more);
    }

    #[tokio::test]
    async fn remote_errors_become_sync_errors() {
        let server = server();
        let peer = LoopbackPeer::new(Arc::clone(&server));

        let err = peer
            .pull(PullRequest::new(PeerId::random(), vec![], Version::ZERO, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));

        server.store().close().unwrap();
        let err = ServerPeer::new(server)
            .handshake(HandshakeRequest::new(PeerId::random(), vec![], Version::ZERO))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use rowsync_protocol::{
    Batch, HandshakeRequest, HandshakeResponse, PeerId, PullRequest, PushAck, PushRequest,
    Rejection, Version, PROTOCOL_VERSION,
};
use rowsync_store::{Store, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The server's store (shared across all handlers).
    pub store: Arc<Store>,
    /// Peer sessions (peer -> session info).
    sessions: RwLock<HashMap<PeerId, PeerSession>>,
}

/// What the server knows about a connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    /// Highest server version the peer has committed.
    pub acknowledged: Version,
    /// Tables the peer synchronizes.
    pub tables: Vec<String>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers or refreshes a peer session.
    ///
    /// A peer's acknowledged version never moves back.
    fn register_session(&self, peer: PeerId, acknowledged: Version, tables: Vec<String>) {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(peer).or_insert_with(|| PeerSession {
            acknowledged,
            tables: Vec::new(),
        });
        session.acknowledged = session.acknowledged.max(acknowledged);
        session.tables = tables;
    }

    /// Gets a peer session.
    pub fn session(&self, peer: &PeerId) -> Option<PeerSession> {
        self.sessions.read().get(peer).cloned()
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Lowest version acknowledged by every known peer.
    fn min_acknowledged(&self) -> Option<Version> {
        self.sessions.read().values().map(|s| s.acknowledged).min()
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a handshake request.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(ServerError::ProtocolMismatch {
                local: PROTOCOL_VERSION,
                remote: request.protocol_version,
            });
        }

        let store = &self.context.store;
        self.context
            .register_session(request.peer, request.acknowledged, request.tables);

        if self.context.config.prune_on_handshake {
            if let Some(floor) = self.context.min_acknowledged() {
                if floor > store.retained_from()? {
                    store.prune_tombstones(floor)?;
                }
            }
        }

        let response = HandshakeResponse {
            peer: store.peer_id(),
            protocol_version: PROTOCOL_VERSION,
            high_version: store.high_version()?,
            retained_from: store.retained_from()?,
            max_push_batch: self.context.config.max_push_batch,
        };
        debug!(
            peer = %request.peer,
            acknowledged = %request.acknowledged,
            high_version = %response.high_version,
            "handshake"
        );
        Ok(response)
    }

    /// Handles a pull request.
    ///
    /// Changes that originated from the requesting peer are skipped, except
    /// in snapshot mode where the peer needs every live row to rebuild
    /// from. An empty table list means every table.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<Batch> {
        let limit = request.max_size.min(self.context.config.max_pull_batch);
        if limit == 0 {
            return Err(ServerError::InvalidRequest("pull max_size must be positive".into()));
        }

        let mut builder = self
            .context
            .store
            .batch()
            .since(request.since)
            .max_size(limit as usize)
            .snapshot(request.snapshot);
        if !request.snapshot {
            builder = builder.exclude_origin(request.peer);
        }
        if !request.tables.is_empty() {
            builder = builder.tables(request.tables);
        }

        let batch = builder.build()?;
        debug!(
            peer = %request.peer,
            since = %request.since,
            entries = batch.len(),
            next_watermark = %batch.next_watermark,
            has_more = batch.has_more,
            "pull"
        );
        Ok(batch)
    }

    /// Handles a push request.
    ///
    /// Every entry is either accepted, recognized as already applied, or
    /// rejected. An entry is rejected when the server's copy of the row
    /// changed after `remote_watermark` through another peer (the pusher
    /// has not seen that change yet), or when it does not fit the server
    /// schema. Accepted entries are committed in one transaction.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushAck> {
        let entries = request.batch.entries;
        if entries.len() > self.context.config.max_push_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "too many entries: {} > {}",
                entries.len(),
                self.context.config.max_push_batch
            )));
        }

        let store = &self.context.store;
        let local_peer = store.peer_id();
        let mut ack = PushAck::default();
        let mut txn = store.begin_write()?;

        for entry in &entries {
            let change = &entry.change;
            let id = change.row_id();

            let seen = store.seen_version(change.origin, &id)?;
            if change.origin == local_peer || seen.is_some_and(|v| v >= change.origin_version) {
                ack.already_applied.push(change.version);
                continue;
            }

            if let Some(current) = txn.committed_change(&id)? {
                if current.version > request.remote_watermark && current.origin != request.peer {
                    ack.rejected.push(Rejection {
                        version: change.version,
                        row: id,
                        reason: format!(
                            "changed on server at {} after {}",
                            current.version, request.remote_watermark
                        ),
                    });
                    continue;
                }
            }

            match txn.apply_remote(change, entry.row.as_ref()) {
                Ok(()) => ack.accepted.push(change.version),
                Err(
                    e @ (StoreError::ConstraintViolation { .. }
                    | StoreError::TableNotFound { .. }
                    | StoreError::RowNotFound { .. }),
                ) => {
                    warn!(peer = %request.peer, row = %id, error = %e, "push entry rejected");
                    ack.rejected.push(Rejection {
                        version: change.version,
                        row: id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        txn.commit()?;
        ack.high_version = store.high_version()?;

        info!(
            peer = %request.peer,
            accepted = ack.accepted.len(),
            already_applied = ack.already_applied.len(),
            rejected = ack.rejected.len(),
            high_version = %ack.high_version,
            "push"
        );
        Ok(ack)
    }
}

//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rowsync_engine::{Orchestrator, RemotePeer, ServerPeer, SyncError, SyncResult};
use rowsync_protocol::{
    Batch, ColumnType, Columns, HandshakeRequest, HandshakeResponse, PullRequest, PushAck,
    PushRequest, Value,
};
use rowsync_server::{ServerConfig, SyncServer};
use rowsync_store::{ManualClock, Store, StoreConfig, TableSchema};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TABLE: &str = "Customer";

pub fn customer_schema() -> TableSchema {
    TableSchema::new(TABLE, "Id")
        .column("FirstName", ColumnType::Text)
        .column("LastName", ColumnType::Text)
}

pub fn name(first: &str, last: &str) -> Columns {
    let mut columns = Columns::new();
    columns.insert("FirstName".into(), Value::from(first));
    columns.insert("LastName".into(), Value::from(last));
    columns
}

pub fn last_name(store: &Store, key: i64) -> Option<String> {
    store
        .get(TABLE, key)
        .unwrap()
        .and_then(|row| match row.get("LastName") {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        })
}

pub fn store_with_clock(start: u64) -> (Arc<Store>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let store = Store::open_in_memory_with_config(StoreConfig::new().with_clock(clock.clone())).unwrap();
    store.create_table(customer_schema()).unwrap();
    (Arc::new(store), clock)
}

pub fn store() -> Arc<Store> {
    let store = Store::open_in_memory().unwrap();
    store.create_table(customer_schema()).unwrap();
    Arc::new(store)
}

pub fn server_for(store: &Arc<Store>) -> Arc<SyncServer> {
    Arc::new(SyncServer::new(Arc::clone(store), ServerConfig::default()))
}

pub fn digest(store: &Store) -> String {
    store.digest(&[TABLE.to_string()]).unwrap()
}

/// A local store, a server store and an orchestrator between them.
pub struct Pair {
    pub client: Arc<Store>,
    pub server_store: Arc<Store>,
    pub server: Arc<SyncServer>,
    pub orchestrator: Orchestrator,
}

impl Pair {
    pub fn new() -> Self {
        let server_store = store();
        let server = server_for(&server_store);
        Self::with(store(), server_store, server)
    }

    pub fn with(client: Arc<Store>, server_store: Arc<Store>, server: Arc<SyncServer>) -> Self {
        let peer: Arc<dyn RemotePeer> = Arc::new(ServerPeer::new(Arc::clone(&server)));
        let orchestrator = Orchestrator::new(Arc::clone(&client), peer);
        Self {
            client,
            server_store,
            server,
            orchestrator,
        }
    }

    pub fn with_peer(&self, peer: Arc<dyn RemotePeer>) -> Orchestrator {
        Orchestrator::new(Arc::clone(&self.client), peer)
    }
}

/// Wraps a peer and injects failures and delays.
pub struct FaultyPeer {
    inner: Arc<dyn RemotePeer>,
    pub fail_pull: AtomicBool,
    pub fail_push: AtomicBool,
    /// Forward the push, then report a failure as if the reply was lost.
    pub lose_push_reply: AtomicBool,
    pub delay: parking_lot::Mutex<Option<Duration>>,
    pub pushes: AtomicUsize,
}

impl FaultyPeer {
    pub fn new(server: &Arc<SyncServer>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(ServerPeer::new(Arc::clone(server))),
            fail_pull: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            lose_push_reply: AtomicBool::new(false),
            delay: parking_lot::Mutex::new(None),
            pushes: AtomicUsize::new(0),
        })
    }

    pub fn heal(&self) {
        self.fail_pull.store(false, Ordering::SeqCst);
        self.fail_push.store(false, Ordering::SeqCst);
        self.lose_push_reply.store(false, Ordering::SeqCst);
        *self.delay.lock() = None;
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn unavailable() -> SyncError {
    SyncError::SourceUnavailable("connection reset".into())
}

#[async_trait]
impl RemotePeer for FaultyPeer {
    async fn handshake(&self, request: HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.pause().await;
        self.inner.handshake(request).await
    }

    async fn pull(&self, request: PullRequest) -> SyncResult<Batch> {
        self.pause().await;
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.pull(request).await
    }

    async fn push(&self, request: PushRequest) -> SyncResult<PushAck> {
        self.pause().await;
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let ack = self.inner.push(request).await?;
        if self.lose_push_reply.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(ack)
    }
}

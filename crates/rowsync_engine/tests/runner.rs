//! Scheduling behavior of the session runner.

mod common;

use async_trait::async_trait;
use common::*;
use rowsync_engine::{
    RemotePeer, RetryConfig, RunnerConfig, SessionConfig, SessionRunner, SyncError, SyncResult,
};
use rowsync_protocol::{
    Batch, HandshakeRequest, HandshakeResponse, PullRequest, PushAck, PushRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config() -> RunnerConfig {
    RunnerConfig::new(SessionConfig::new([TABLE])).with_interval(Duration::from_secs(3600))
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn request_sync_returns_the_session_report() {
    let pair = Pair::new();
    pair.server_store
        .transaction(|txn| txn.insert(TABLE, 1, name("John", "Doe")))
        .unwrap();
    let (task, handle) = SessionRunner::spawn(Arc::new(pair.orchestrator), config());

    let report = handle.request_sync().await.unwrap();
    assert!(report.is_completed(), "{report}");
    assert_eq!(report.rows_applied, 1);
    assert_eq!(last_name(&pair.client, 1).as_deref(), Some("Doe"));

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn interval_runs_sessions_unprompted() {
    let pair = Pair::new();
    pair.server_store
        .transaction(|txn| txn.insert(TABLE, 1, name("John", "Doe")))
        .unwrap();
    let config = config()
        .with_interval(Duration::from_millis(20))
        .with_run_on_start(true);
    let (task, handle) = SessionRunner::spawn(Arc::new(pair.orchestrator), config);

    let client = Arc::clone(&pair.client);
    assert!(eventually(|| client.count(TABLE).unwrap() == 1).await);

    pair.server_store
        .transaction(|txn| txn.insert(TABLE, 2, name("Jane", "Roe")))
        .unwrap();
    assert!(eventually(|| client.count(TABLE).unwrap() == 2).await);
    assert!(handle.orchestrator().stats().sessions_completed >= 2);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn trigger_starts_a_session() {
    let pair = Pair::new();
    pair.client
        .transaction(|txn| txn.insert(TABLE, 3, name("Ada", "Lovelace")))
        .unwrap();
    let (task, handle) = SessionRunner::spawn(Arc::new(pair.orchestrator), config());

    assert!(handle.trigger());
    let server = Arc::clone(&pair.server_store);
    assert!(eventually(|| server.count(TABLE).unwrap() == 1).await);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn queued_requests_share_one_session() {
    let pair = Pair::new();
    let peer = FaultyPeer::new(&pair.server);
    *peer.delay.lock() = Some(Duration::from_millis(100));
    let orchestrator = Arc::new(pair.with_peer(peer.clone()));
    let (task, handle) = SessionRunner::spawn(Arc::clone(&orchestrator), config());

    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request_sync().await }
    });
    // Let the first session start before queueing more.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (second, third) = tokio::join!(handle.request_sync(), handle.request_sync());

    let first = first.await.unwrap().unwrap();
    let second = second.unwrap();
    let third = third.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(second.session_id, third.session_id);
    assert_eq!(orchestrator.stats().sessions_completed, 2);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn retryable_failure_is_retried_with_backoff() {
    let pair = Pair::new();
    pair.server_store
        .transaction(|txn| txn.insert(TABLE, 1, name("John", "Doe")))
        .unwrap();
    let peer = FaultyPeer::new(&pair.server);
    peer.fail_pull.store(true, Ordering::SeqCst);
    let orchestrator = Arc::new(pair.with_peer(peer.clone()));
    let retry = RetryConfig::new(5)
        .with_initial_delay(Duration::from_millis(30))
        .with_jitter(false);
    let (task, handle) = SessionRunner::spawn(Arc::clone(&orchestrator), config().with_retry(retry));

    let report = handle.request_sync().await.unwrap();
    assert!(matches!(report.error(), Some(SyncError::SourceUnavailable(_))));

    peer.heal();
    let watched = Arc::clone(&orchestrator);
    assert!(eventually(|| watched.stats().sessions_completed == 1).await);
    assert_eq!(last_name(&pair.client, 1).as_deref(), Some("Doe"));
    let stats = orchestrator.stats();
    assert!(stats.sessions_aborted >= 1);
    assert_eq!(stats.sessions_completed, 1);

    handle.shutdown().await;
    task.await.unwrap();
}

/// A remote that speaks a different protocol.
struct IncompatiblePeer {
    handshakes: AtomicUsize,
}

#[async_trait]
impl RemotePeer for IncompatiblePeer {
    async fn handshake(&self, _request: HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::Protocol("unsupported protocol version".into()))
    }

    async fn pull(&self, _request: PullRequest) -> SyncResult<Batch> {
        unreachable!("session ends at the handshake")
    }

    async fn push(&self, _request: PushRequest) -> SyncResult<PushAck> {
        unreachable!("session ends at the handshake")
    }
}

#[tokio::test]
async fn non_retryable_failure_waits_for_the_next_request() {
    let pair = Pair::new();
    let peer = Arc::new(IncompatiblePeer {
        handshakes: AtomicUsize::new(0),
    });
    let orchestrator = Arc::new(pair.with_peer(peer.clone()));
    let retry = RetryConfig::new(5).with_initial_delay(Duration::from_millis(10));
    let (task, handle) = SessionRunner::spawn(Arc::clone(&orchestrator), config().with_retry(retry));

    let report = handle.request_sync().await.unwrap();
    assert!(matches!(report.error(), Some(SyncError::Protocol(_))));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(peer.handshakes.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.stats().sessions_aborted, 1);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn follow_up_sessions_drain_a_deep_backlog() {
    let pair = Pair::new();
    pair.server_store
        .transaction(|txn| {
            for key in 1..=25 {
                txn.insert(TABLE, key, name("Bulk", "Row"))?;
            }
            Ok(())
        })
        .unwrap();
    let session = SessionConfig::new([TABLE])
        .with_pull_batch_size(10)
        .with_max_pull_pages(1);
    let (task, handle) = SessionRunner::spawn(
        Arc::new(pair.orchestrator),
        RunnerConfig::new(session).with_interval(Duration::from_secs(3600)),
    );

    let first = handle.request_sync().await.unwrap();
    assert!(first.remote_has_more);
    assert_eq!(first.rows_applied, 10);

    let client = Arc::clone(&pair.client);
    assert!(eventually(|| client.count(TABLE).unwrap() == 25).await);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn stopped_runner_refuses_requests() {
    let pair = Pair::new();
    let (task, handle) = SessionRunner::spawn(Arc::new(pair.orchestrator), config());

    handle.shutdown().await;
    task.await.unwrap();

    assert_eq!(handle.request_sync().await.unwrap_err(), SyncError::Cancelled);
    assert!(!handle.trigger());
}

#[tokio::test]
async fn orchestrator_is_usable_after_runner_shutdown() {
    let pair = Pair::new();
    let orchestrator = Arc::new(pair.orchestrator);
    let (task, handle) = SessionRunner::spawn(Arc::clone(&orchestrator), config());

    handle.shutdown().await;
    task.await.unwrap();

    let report = orchestrator.synchronize(&SessionConfig::new([TABLE])).await;
    assert!(report.is_completed(), "{report}");
}

//! The sync session state machine.
//!
//! A session runs pull-then-push against one remote peer:
//!
//! ```text
//! Idle -> WatermarkExchange -> PullRemoteChanges -> DetectConflicts
//!      -> ResolveConflicts -> ApplyLocal -> PushLocalChanges
//!      -> CommitWatermarks -> Idle
//! ```
//!
//! Any step may fail, which leaves the orchestrator in `Aborted` and the
//! watermarks untouched. Local rows change only in `ApplyLocal`, which
//! commits in one transaction, and watermarks only in `CommitWatermarks`.
//! A crash between the two is harmless: the next session pulls the same
//! changes again and recognizes them through the seen-version records.

use crate::config::SessionConfig;
use crate::detector::ConflictDetector;
use crate::error::{SyncError, SyncResult};
use crate::peer::RemotePeer;
use crate::report::{PullProgress, SessionReport, SessionStatus, SkipReason, SkippedRow};
use crate::resolver::{ConflictResolver, ResolvedRow};
use crate::state::{SessionState, SyncStats};
use parking_lot::RwLock;
use rowsync_protocol::{
    Batch, BatchEntry, ChangeEntry, ConflictRecord, HandshakeRequest, Operation, PeerId,
    PullRequest, PushRequest, Resolution, RowId, Version, Watermark, PROTOCOL_VERSION,
};
use rowsync_store::{Store, StoreError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs sync sessions between a local store and one remote peer.
///
/// At most one session runs at a time; a second concurrent
/// [`synchronize`](Self::synchronize) call returns a report aborted with
/// [`SyncError::SessionBusy`].
pub struct Orchestrator {
    store: Arc<Store>,
    remote: Arc<dyn RemotePeer>,
    gate: tokio::sync::Mutex<()>,
    state: RwLock<SessionState>,
    stats: RwLock<SyncStats>,
    remote_peer: RwLock<Option<PeerId>>,
    cancelled: AtomicBool,
}

/// Rows committed by the apply step and rows it left alone.
#[derive(Debug, Default)]
struct ApplyOutcome {
    applied: usize,
    changed: Vec<(RowId, Version)>,
}

impl Orchestrator {
    /// Creates an orchestrator for `store` and `remote`.
    pub fn new(store: Arc<Store>, remote: Arc<dyn RemotePeer>) -> Self {
        Self {
            store,
            remote,
            gate: tokio::sync::Mutex::new(()),
            state: RwLock::new(SessionState::Idle),
            stats: RwLock::new(SyncStats::default()),
            remote_peer: RwLock::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Returns the remote peer's ID once a handshake has succeeded.
    pub fn remote_peer(&self) -> Option<PeerId> {
        *self.remote_peer.read()
    }

    /// Gets the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a session holds the gate.
    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Cancels the ongoing session at its next step boundary.
    ///
    /// Called while idle, it cancels the next session instead. The flag is
    /// cleared when a session ends.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    fn enter(&self, state: SessionState) -> SyncResult<()> {
        self.check_cancelled()?;
        self.set_state(state);
        debug!(step = %state, "entering step");
        Ok(())
    }

    /// Runs one session and reports what it did.
    ///
    /// Failures do not surface as `Err`; they end the session with
    /// [`SessionStatus::Aborted`] naming the failed step.
    pub async fn synchronize(&self, config: &SessionConfig) -> SessionReport {
        let started = Instant::now();
        let mut report = SessionReport::new(Uuid::new_v4());

        let Ok(_gate) = self.gate.try_lock() else {
            warn!(session = %report.session_id, "sync session already running");
            report.status = SessionStatus::Aborted {
                step: SessionState::Idle,
                error: SyncError::SessionBusy,
            };
            self.record(&report);
            return report;
        };

        self.set_state(SessionState::Idle);
        let span = info_span!(
            "sync_session",
            session = %report.session_id,
            peer = %self.store.peer_id()
        );
        let result = self.run(config, &mut report).instrument(span.clone()).await;
        self.reset_cancel();
        report.duration = started.elapsed();

        match result {
            Ok(()) => {
                self.set_state(SessionState::Idle);
                info!(
                    parent: &span,
                    pulled = report.pulled(),
                    applied = report.rows_applied,
                    pushed = report.rows_pushed,
                    conflicts = report.conflicts.len(),
                    skipped = report.skipped.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "sync session completed"
                );
            }
            Err(error) => {
                let step = self.state();
                self.set_state(SessionState::Aborted);
                warn!(parent: &span, step = %step, error = %error, "sync session aborted");
                report.status = SessionStatus::Aborted { step, error };
            }
        }

        self.record(&report);
        report
    }

    async fn run(&self, config: &SessionConfig, report: &mut SessionReport) -> SyncResult<()> {
        let local_peer = self.store.peer_id();

        self.enter(SessionState::WatermarkExchange)?;
        let known_remote = self.remote_peer();
        let acknowledged = match known_remote {
            Some(peer) => self.store.watermark(peer)?.received,
            None => Version::ZERO,
        };
        let request = HandshakeRequest::new(local_peer, config.tables.clone(), acknowledged);
        let handshake = self.call(config, self.remote.handshake(request)).await?;
        if handshake.protocol_version != PROTOCOL_VERSION {
            return Err(SyncError::Protocol(format!(
                "protocol version mismatch: local {PROTOCOL_VERSION}, remote {}",
                handshake.protocol_version
            )));
        }
        let remote_peer = handshake.peer;
        if remote_peer == local_peer {
            return Err(SyncError::Protocol("remote peer has the local peer id".into()));
        }
        *self.remote_peer.write() = Some(remote_peer);
        report.remote = Some(remote_peer);

        let before = self.store.watermark(remote_peer)?;
        report.watermark_before = before;
        report.watermark_after = before;
        if before.received > handshake.high_version {
            return Err(SyncError::Protocol(format!(
                "remote is at {} but {} was already received from it",
                handshake.high_version, before.received
            )));
        }
        let resync = before.received < handshake.retained_from;
        let local_snapshot = before.sent < self.store.retained_from()?;
        let push_size = config
            .push_batch_size
            .min(handshake.max_push_batch)
            .max(1) as usize;
        report.resynced = resync;
        if resync {
            info!(
                received = %before.received,
                retained_from = %handshake.retained_from,
                "remote history pruned past watermark, resyncing from snapshot"
            );
        }

        self.enter(SessionState::PullRemoteChanges)?;
        let mut since = if resync { Version::ZERO } else { before.received };
        let mut remote_entries = Vec::new();
        let mut pages = 0u32;
        loop {
            self.check_cancelled()?;
            let mut request =
                PullRequest::new(local_peer, config.tables.clone(), since, config.pull_batch_size);
            if resync {
                request = request.snapshot();
            }
            let batch = self.call(config, self.remote.pull(request)).await?;
            if batch.next_watermark < since || (batch.has_more && batch.next_watermark == since) {
                return Err(SyncError::Protocol(format!(
                    "pulled page does not advance past {since}"
                )));
            }

            debug!(
                page = pages,
                entries = batch.len(),
                watermark = %batch.next_watermark,
                has_more = batch.has_more,
                "pulled page"
            );
            report.pulls.push(PullProgress {
                entries: batch.len(),
                watermark: batch.next_watermark,
            });
            since = batch.next_watermark;
            pages += 1;
            let has_more = batch.has_more;
            remote_entries.extend(batch.entries);

            if !has_more {
                break;
            }
            if !resync && pages >= config.max_pull_pages.max(1) {
                report.remote_has_more = true;
                break;
            }
        }
        // A complete snapshot covers everything up to the pruning floor,
        // including the tombstones that are gone.
        let pulled_watermark = if resync {
            since.max(handshake.retained_from)
        } else {
            since
        };
        let snapshot_rows: HashSet<RowId> = if resync {
            remote_entries.iter().map(|e| e.change.row_id()).collect()
        } else {
            HashSet::new()
        };

        self.enter(SessionState::DetectConflicts)?;
        let (local_entries, scanned) =
            self.local_changes(config, remote_peer, before.sent, push_size, local_snapshot)?;
        let detection = ConflictDetector::new(local_peer).detect(
            local_entries,
            remote_entries,
            |origin, id| Ok(self.store.seen_version(origin, id)?),
        )?;

        self.enter(SessionState::ResolveConflicts)?;
        let resolver = ConflictResolver::from_config(config);
        let mut plan: Vec<ResolvedRow> = detection
            .clean_remote
            .into_iter()
            .map(ResolvedRow::AcceptRemote)
            .collect();
        // Lowest remote version left unapplied; `received` stops below it.
        let mut remote_floor: Option<Version> = None;
        // Rows whose local change is held back from this push.
        let mut withheld: HashSet<RowId> = HashSet::new();

        for conflict in detection.conflicts {
            let id = conflict.row_id();
            let policy = resolver.policy_for(&id.table).kind();
            match resolver.resolve(&conflict) {
                Ok((row, resolution)) => {
                    debug!(row = %id, kind = ?conflict.kind(), ?policy, ?resolution, "conflict resolved");
                    plan.push(row);
                    report.conflicts.push(ConflictRecord {
                        conflict,
                        policy,
                        resolution,
                    });
                }
                Err(error) => {
                    let reason = match &error {
                        SyncError::ResolutionFailed { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    warn!(row = %id, error = %error, "conflict left unresolved");
                    lower(&mut remote_floor, conflict.remote.version());
                    withheld.insert(id.clone());
                    report.skipped.push(SkippedRow {
                        row: id,
                        reason: SkipReason::Unresolved(reason.clone()),
                    });
                    report.conflicts.push(ConflictRecord {
                        conflict,
                        policy,
                        resolution: Resolution::Unresolved(reason),
                    });
                }
            }
        }

        self.enter(SessionState::ApplyLocal)?;
        let deletions = if resync {
            self.resync_deletions(config, remote_peer, &snapshot_rows, before.sent, pulled_watermark)?
        } else {
            Vec::new()
        };
        let outcome = self.apply_local(&plan, &deletions, scanned)?;
        report.rows_applied = outcome.applied;
        for (id, remote_version) in outcome.changed {
            debug!(row = %id, "row modified locally during session, skipping");
            lower(&mut remote_floor, remote_version);
            withheld.insert(id.clone());
            report.skipped.push(SkippedRow {
                row: id,
                reason: SkipReason::ChangedDuringSession,
            });
        }

        self.enter(SessionState::PushLocalChanges)?;
        let mut since = before.sent;
        // Lowest local version the remote has not taken; `sent` stops below it.
        let mut local_floor: Option<Version> = None;
        loop {
            self.check_cancelled()?;
            let page = self.local_page(config, remote_peer, since, push_size, local_snapshot)?;
            let mut entries = Vec::with_capacity(page.len());
            for entry in page.entries {
                if withheld.contains(&entry.change.row_id()) {
                    lower(&mut local_floor, entry.version());
                } else {
                    entries.push(entry);
                }
            }

            if !entries.is_empty() {
                let request = PushRequest {
                    peer: local_peer,
                    remote_watermark: pulled_watermark,
                    batch: Batch {
                        source: local_peer,
                        since,
                        entries,
                        next_watermark: page.next_watermark,
                        has_more: page.has_more,
                    },
                };
                let ack = self.call(config, self.remote.push(request)).await?;
                debug!(
                    accepted = ack.accepted.len(),
                    already_applied = ack.already_applied.len(),
                    rejected = ack.rejected.len(),
                    "pushed page"
                );
                report.rows_pushed += ack.accepted.len();
                report.already_applied += ack.already_applied.len();
                for rejection in ack.rejected {
                    lower(&mut local_floor, rejection.version);
                    report.skipped.push(SkippedRow {
                        row: rejection.row,
                        reason: SkipReason::RejectedByRemote(rejection.reason),
                    });
                }
            }

            since = page.next_watermark;
            if !page.has_more {
                break;
            }
        }
        let pushed_watermark = since;

        self.enter(SessionState::CommitWatermarks)?;
        let received = remote_floor.map_or(pulled_watermark, |v| pulled_watermark.min(v.prev()));
        let sent = local_floor.map_or(pushed_watermark, |v| pushed_watermark.min(v.prev()));
        self.commit_watermarks(remote_peer, Watermark::new(received, sent))?;
        report.watermark_after = self.store.watermark(remote_peer)?;

        Ok(())
    }

    /// Awaits a remote call within the configured budget.
    async fn call<T, F>(&self, config: &SessionConfig, call: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        let step = self.state();
        match tokio::time::timeout(config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                step,
                budget: config.call_timeout,
            }),
        }
    }

    /// Reads one page of local changes the remote may not have.
    fn local_page(
        &self,
        config: &SessionConfig,
        remote_peer: PeerId,
        since: Version,
        max_size: usize,
        snapshot: bool,
    ) -> SyncResult<Batch> {
        let mut builder = self
            .store
            .batch()
            .since(since)
            .max_size(max_size)
            .exclude_origin(remote_peer)
            .snapshot(snapshot);
        if !config.tables.is_empty() {
            builder = builder.tables(config.tables.iter().cloned());
        }
        Ok(builder.build()?)
    }

    /// Reads every local change since `since`, returning them with the
    /// position the scan reached.
    fn local_changes(
        &self,
        config: &SessionConfig,
        remote_peer: PeerId,
        since: Version,
        max_size: usize,
        snapshot: bool,
    ) -> SyncResult<(Vec<BatchEntry>, Version)> {
        let mut entries = Vec::new();
        let mut position = since;
        loop {
            let page = self.local_page(config, remote_peer, position, max_size, snapshot)?;
            position = page.next_watermark;
            entries.extend(page.entries);
            if !page.has_more {
                return Ok((entries, position));
            }
        }
    }

    /// Local rows the remote snapshot no longer has, excluding rows with
    /// local changes not yet pushed. They were deleted remotely and the
    /// tombstones are gone.
    fn resync_deletions(
        &self,
        config: &SessionConfig,
        remote_peer: PeerId,
        snapshot_rows: &HashSet<RowId>,
        sent: Version,
        position: Version,
    ) -> SyncResult<Vec<ChangeEntry>> {
        let local_peer = self.store.peer_id();
        let tables = if config.tables.is_empty() {
            self.store.tables()?
        } else {
            config.tables.clone()
        };
        let timestamp = self.store.config().clock.now_millis();

        let mut deletions = Vec::new();
        for table in tables {
            let rows = match self.store.rows(&table) {
                Ok(rows) => rows,
                Err(StoreError::TableNotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            for row in rows {
                let id = row.id();
                if snapshot_rows.contains(&id) {
                    continue;
                }
                let unpushed = self
                    .store
                    .change_entry(&id)?
                    .is_some_and(|c| c.origin == local_peer && c.version > sent);
                if unpushed {
                    continue;
                }
                deletions.push(ChangeEntry {
                    table: id.table,
                    key: id.key,
                    operation: Operation::Delete,
                    version: Version::ZERO,
                    origin: remote_peer,
                    origin_version: position,
                    timestamp,
                });
            }
        }

        if !deletions.is_empty() {
            info!(rows = deletions.len(), "removing rows missing from remote snapshot");
        }
        Ok(deletions)
    }

    /// Commits the resolved rows in one transaction.
    ///
    /// A row whose local change entry moved past `scanned` was written by
    /// the application after conflict detection; it is left alone and
    /// reported in the outcome. A kept local row is restamped so the push
    /// carries it under a version the remote has not seen yet.
    fn apply_local(
        &self,
        plan: &[ResolvedRow],
        deletions: &[ChangeEntry],
        scanned: Version,
    ) -> SyncResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        if plan.is_empty() && deletions.is_empty() {
            return Ok(outcome);
        }

        let local_peer = self.store.peer_id();
        let mut restamped = 0usize;
        let mut txn = self.store.begin_write()?;
        for resolved in plan {
            let id = resolved.row_id();
            if let Some(current) = txn.committed_change(&id)? {
                if current.version > scanned && current.origin == local_peer {
                    outcome.changed.push((id, resolved.remote_version()));
                    continue;
                }
            }

            let applied = match resolved {
                ResolvedRow::AcceptRemote(entry) => txn.apply_remote(&entry.change, entry.row.as_ref()),
                ResolvedRow::KeepLocal(remote) => {
                    txn.mark_seen(remote.origin, id.clone(), remote.origin_version);
                    // Both sides deleted the row; there is nothing to send.
                    let kept = if remote.is_tombstone() {
                        txn.get(&id.table, id.key.clone()).map(|row| row.is_some())
                    } else {
                        Ok(true)
                    };
                    kept.and_then(|kept| if kept { txn.restamp(&id) } else { Ok(false) })
                        .map(|restamp| {
                            if restamp {
                                debug!(row = %id, "kept local row restamped");
                                restamped += 1;
                            }
                        })
                }
                ResolvedRow::Write {
                    id: row,
                    columns,
                    remote,
                } => {
                    let written = match columns {
                        Some(columns) => txn.upsert(&row.table, row.key.clone(), columns.clone()),
                        None => txn.delete(&row.table, row.key.clone()).map(|_| ()),
                    };
                    written.map(|()| {
                        txn.mark_seen(remote.origin, row.clone(), remote.origin_version);
                    })
                }
            };
            applied.map_err(|e| SyncError::from_apply(&id, e))?;
        }

        for deletion in deletions {
            txn.apply_remote(deletion, None)
                .map_err(|e| SyncError::from_apply(&deletion.row_id(), e))?;
        }

        let recorded = txn.commit()?;
        outcome.applied = recorded.len().saturating_sub(restamped);
        Ok(outcome)
    }

    /// Advances the watermark for `remote_peer` and prunes local tombstones
    /// every known remote has been sent.
    fn commit_watermarks(&self, remote_peer: PeerId, target: Watermark) -> SyncResult<()> {
        let floor = self
            .store
            .watermarks()?
            .into_iter()
            .filter(|(peer, _)| *peer != remote_peer)
            .map(|(_, watermark)| watermark.sent)
            .chain(std::iter::once(
                self.store.watermark(remote_peer)?.sent.max(target.sent),
            ))
            .min()
            .unwrap_or(Version::ZERO);

        let mut txn = self.store.begin_write()?;
        txn.advance_watermark(remote_peer, target);
        if floor > Version::ZERO {
            txn.prune_tombstones(floor);
        }
        txn.commit()?;
        debug!(received = %target.received, sent = %target.sent, "watermarks committed");
        Ok(())
    }

    fn record(&self, report: &SessionReport) {
        let mut stats = self.stats.write();
        match report.error() {
            None => {
                stats.sessions_completed += 1;
                stats.last_error = None;
            }
            Some(error) => {
                stats.sessions_aborted += 1;
                stats.last_error = Some(error.to_string());
            }
        }
        stats.rows_applied += report.rows_applied as u64;
        stats.rows_pushed += report.rows_pushed as u64;
        stats.conflicts += report.conflicts.len() as u64;
        stats.rows_skipped += report.skipped.len() as u64;
        stats.last_session_time = Some(Instant::now());
    }
}

fn lower(floor: &mut Option<Version>, version: Version) {
    *floor = Some(floor.map_or(version, |v| v.min(version)));
}

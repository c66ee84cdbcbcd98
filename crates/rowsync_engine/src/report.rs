//! Session reports.

use crate::error::SyncError;
use crate::state::SessionState;
use rowsync_protocol::{ConflictRecord, PeerId, RowId, Version, Watermark};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Every step ran.
    Completed,
    /// The session stopped at `step`.
    Aborted {
        /// Step that failed.
        step: SessionState,
        /// Why.
        error: SyncError,
    },
}

/// Why a row was left out of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The merge callback failed.
    Unresolved(String),
    /// The row was written locally while the session ran.
    ChangedDuringSession,
    /// The remote refused the pushed change.
    RejectedByRemote(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unresolved(reason) => write!(f, "unresolved: {reason}"),
            SkipReason::ChangedDuringSession => f.write_str("modified locally during session"),
            SkipReason::RejectedByRemote(reason) => write!(f, "rejected by remote: {reason}"),
        }
    }
}

/// A row that was not synchronized this session. It is retried next time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// The row.
    pub row: RowId,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// One pulled page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullProgress {
    /// Entries in the page.
    pub entries: usize,
    /// Remote position after the page.
    pub watermark: Version,
}

/// What one session did.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Unique session ID, also attached to the session's log span.
    pub session_id: Uuid,
    /// Outcome.
    pub status: SessionStatus,
    /// The remote peer, once the handshake succeeded.
    pub remote: Option<PeerId>,
    /// Local row changes committed from the remote.
    pub rows_applied: usize,
    /// Pushed entries the remote accepted.
    pub rows_pushed: usize,
    /// Pushed entries the remote had already incorporated.
    pub already_applied: usize,
    /// Rows left for a later session.
    pub skipped: Vec<SkippedRow>,
    /// Conflicts with their policy and outcome.
    pub conflicts: Vec<ConflictRecord>,
    /// Pulled pages in order.
    pub pulls: Vec<PullProgress>,
    /// Watermark when the session started.
    pub watermark_before: Watermark,
    /// Watermark when the session ended.
    pub watermark_after: Watermark,
    /// The remote has more changes than this session pulled.
    pub remote_has_more: bool,
    /// The session rebuilt local rows from a full remote snapshot.
    pub resynced: bool,
    /// Wall time taken.
    pub duration: Duration,
}

impl SessionReport {
    pub(crate) fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            status: SessionStatus::Completed,
            remote: None,
            rows_applied: 0,
            rows_pushed: 0,
            already_applied: 0,
            skipped: Vec::new(),
            conflicts: Vec::new(),
            pulls: Vec::new(),
            watermark_before: Watermark::default(),
            watermark_after: Watermark::default(),
            remote_has_more: false,
            resynced: false,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the session completed.
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Returns the abort cause, if any.
    pub fn error(&self) -> Option<&SyncError> {
        match &self.status {
            SessionStatus::Completed => None,
            SessionStatus::Aborted { error, .. } => Some(error),
        }
    }

    /// Total entries pulled.
    pub fn pulled(&self) -> usize {
        self.pulls.iter().map(|p| p.entries).sum()
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            SessionStatus::Completed => write!(
                f,
                "session {} completed: pulled {}, applied {}, pushed {}, conflicts {}, skipped {}",
                self.session_id,
                self.pulled(),
                self.rows_applied,
                self.rows_pushed,
                self.conflicts.len(),
                self.skipped.len()
            ),
            SessionStatus::Aborted { step, error } => {
                write!(f, "session {} aborted at {step}: {error}", self.session_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_report_is_completed_and_empty() {
        let report = SessionReport::new(Uuid::new_v4());
        assert!(report.is_completed());
        assert!(report.error().is_none());
        assert_eq!(report.pulled(), 0);
    }

    #[test]
    fn aborted_report_exposes_error() {
        let mut report = SessionReport::new(Uuid::new_v4());
        report.status = SessionStatus::Aborted {
            step: SessionState::PullRemoteChanges,
            error: SyncError::Cancelled,
        };
        assert!(!report.is_completed());
        assert_eq!(report.error(), Some(&SyncError::Cancelled));
        assert!(report.to_string().contains("aborted at pull-remote-changes"));
    }

    #[test]
    fn pulled_sums_pages() {
        let mut report = SessionReport::new(Uuid::new_v4());
        report.pulls.push(PullProgress {
            entries: 100,
            watermark: Version::new(100),
        });
        report.pulls.push(PullProgress {
            entries: 50,
            watermark: Version::new(150),
        });
        assert_eq!(report.pulled(), 150);
    }
}

//! Session states and engine statistics.

use std::fmt;
use std::time::Instant;

/// Step of a synchronization session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session running.
    Idle,
    /// Reading the local watermark and handshaking with the remote.
    WatermarkExchange,
    /// Pulling remote change pages.
    PullRemoteChanges,
    /// Comparing remote changes with local ones.
    DetectConflicts,
    /// Applying resolution policies.
    ResolveConflicts,
    /// Committing accepted rows locally.
    ApplyLocal,
    /// Pushing local change pages.
    PushLocalChanges,
    /// Advancing watermarks.
    CommitWatermarks,
    /// The last session aborted.
    Aborted,
}

impl SessionState {
    /// Returns true while a session is in flight.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Aborted)
    }

    /// Returns true if a new session can start.
    pub fn can_start_session(&self) -> bool {
        !self.is_active()
    }

    /// Short name for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::WatermarkExchange => "watermark-exchange",
            SessionState::PullRemoteChanges => "pull-remote-changes",
            SessionState::DetectConflicts => "detect-conflicts",
            SessionState::ResolveConflicts => "resolve-conflicts",
            SessionState::ApplyLocal => "apply-local",
            SessionState::PushLocalChanges => "push-local-changes",
            SessionState::CommitWatermarks => "commit-watermarks",
            SessionState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Statistics about sessions run by an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Sessions that completed.
    pub sessions_completed: u64,
    /// Sessions that aborted (including busy rejections).
    pub sessions_aborted: u64,
    /// Rows committed locally from the remote.
    pub rows_applied: u64,
    /// Rows the remote accepted.
    pub rows_pushed: u64,
    /// Conflicts encountered.
    pub conflicts: u64,
    /// Rows skipped.
    pub rows_skipped: u64,
    /// When the last session finished.
    pub last_session_time: Option<Instant>,
    /// Last abort cause.
    pub last_error: Option<String>,
}

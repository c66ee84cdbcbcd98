//! Conflict resolution policies.
//!
//! A resolver turns each [`Conflict`] into a [`ResolvedRow`]: the write (if
//! any) the apply step performs for that row. Every outcome marks the
//! remote change as seen, so a resolved conflict never reappears.

use crate::config::SessionConfig;
use crate::error::{SyncError, SyncResult};
use rowsync_protocol::{
    BatchEntry, ChangeEntry, Columns, Conflict, ConflictKind, ConflictPolicy, Resolution, RowId,
    Version,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Caller-supplied merge callback.
pub type MergeFn = Arc<dyn Fn(&Conflict) -> Result<MergeOutcome, MergeError> + Send + Sync>;

/// What a merge callback produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Write these columns.
    Row(Columns),
    /// Delete the row.
    Delete,
}

/// Failure reported by a merge callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct MergeError {
    message: String,
}

impl MergeError {
    /// Creates a merge error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// How to settle a conflict.
#[derive(Clone, Default)]
pub enum ResolutionPolicy {
    /// Take the remote side.
    RemoteWins,
    /// Keep the local side.
    LocalWins,
    /// Take the side with the later change timestamp.
    #[default]
    LatestVersionWins,
    /// Let a callback decide.
    Merge(MergeFn),
}

impl ResolutionPolicy {
    /// Creates a merge policy from a closure.
    pub fn merge<F>(f: F) -> Self
    where
        F: Fn(&Conflict) -> Result<MergeOutcome, MergeError> + Send + Sync + 'static,
    {
        ResolutionPolicy::Merge(Arc::new(f))
    }

    /// Returns the wire-level policy kind.
    pub fn kind(&self) -> ConflictPolicy {
        match self {
            ResolutionPolicy::RemoteWins => ConflictPolicy::RemoteWins,
            ResolutionPolicy::LocalWins => ConflictPolicy::LocalWins,
            ResolutionPolicy::LatestVersionWins => ConflictPolicy::LatestVersionWins,
            ResolutionPolicy::Merge(_) => ConflictPolicy::Merge,
        }
    }
}

impl fmt::Debug for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionPolicy::RemoteWins => f.write_str("RemoteWins"),
            ResolutionPolicy::LocalWins => f.write_str("LocalWins"),
            ResolutionPolicy::LatestVersionWins => f.write_str("LatestVersionWins"),
            ResolutionPolicy::Merge(_) => f.write_str("Merge(<fn>)"),
        }
    }
}

/// Winner of a [`ResolutionPolicy::LatestVersionWins`] conflict whose two
/// changes carry the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreaker {
    /// The remote change wins.
    #[default]
    Remote,
    /// The local change wins.
    Local,
}

/// The write the apply step performs for one resolved row.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedRow {
    /// Apply the remote change with its remote provenance.
    AcceptRemote(BatchEntry),
    /// Keep the local row, recording it again as a new local change; mark
    /// this remote change seen.
    KeepLocal(ChangeEntry),
    /// Write a merged row as a local change, then mark `remote` seen.
    Write {
        /// Row to write.
        id: RowId,
        /// New columns, or `None` to delete.
        columns: Option<Columns>,
        /// Remote change folded into the merge.
        remote: ChangeEntry,
    },
}

impl ResolvedRow {
    /// Returns the row's identity.
    pub fn row_id(&self) -> RowId {
        match self {
            ResolvedRow::AcceptRemote(entry) => entry.change.row_id(),
            ResolvedRow::KeepLocal(change) => change.row_id(),
            ResolvedRow::Write { id, .. } => id.clone(),
        }
    }

    /// Returns the version of the remote change this row settles.
    pub fn remote_version(&self) -> Version {
        match self {
            ResolvedRow::AcceptRemote(entry) => entry.version(),
            ResolvedRow::KeepLocal(change) => change.version,
            ResolvedRow::Write { remote, .. } => remote.version,
        }
    }
}

/// Applies per-table resolution policies.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    default_policy: ResolutionPolicy,
    table_policies: HashMap<String, ResolutionPolicy>,
    tie_breaker: TieBreaker,
}

impl ConflictResolver {
    /// Creates a resolver using `default_policy` for every table.
    pub fn new(default_policy: ResolutionPolicy) -> Self {
        Self {
            default_policy,
            table_policies: HashMap::new(),
            tie_breaker: TieBreaker::default(),
        }
    }

    /// Creates a resolver from a session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            default_policy: config.default_policy.clone(),
            table_policies: config.table_policies.clone(),
            tie_breaker: config.tie_breaker,
        }
    }

    /// Overrides the policy for one table.
    pub fn with_table_policy(mut self, table: impl Into<String>, policy: ResolutionPolicy) -> Self {
        self.table_policies.insert(table.into(), policy);
        self
    }

    /// Sets the timestamp tie breaker.
    pub fn with_tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
        self.tie_breaker = tie_breaker;
        self
    }

    /// Returns the policy governing `table`.
    pub fn policy_for(&self, table: &str) -> &ResolutionPolicy {
        self.table_policies
            .get(table)
            .unwrap_or(&self.default_policy)
    }

    /// Resolves one conflict.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ResolutionFailed`] if a merge callback fails.
    pub fn resolve(&self, conflict: &Conflict) -> SyncResult<(ResolvedRow, Resolution)> {
        // Both sides deleted the row; they already agree.
        if conflict.kind() == ConflictKind::DeleteDelete {
            return Ok(self.keep_local(conflict));
        }

        match self.policy_for(&conflict.remote.change.table) {
            ResolutionPolicy::RemoteWins => Ok(self.accept_remote(conflict)),
            ResolutionPolicy::LocalWins => Ok(self.keep_local(conflict)),
            ResolutionPolicy::LatestVersionWins => {
                let local = conflict.local.change.timestamp;
                let remote = conflict.remote.change.timestamp;
                let remote_wins = match remote.cmp(&local) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => self.tie_breaker == TieBreaker::Remote,
                };
                if remote_wins {
                    Ok(self.accept_remote(conflict))
                } else {
                    Ok(self.keep_local(conflict))
                }
            }
            ResolutionPolicy::Merge(merge) => {
                let id = conflict.row_id();
                match merge(conflict) {
                    Ok(outcome) => {
                        let columns = match outcome {
                            MergeOutcome::Row(columns) => Some(columns),
                            MergeOutcome::Delete => None,
                        };
                        Ok((
                            ResolvedRow::Write {
                                id,
                                columns,
                                remote: conflict.remote.change.clone(),
                            },
                            Resolution::Merged,
                        ))
                    }
                    Err(e) => Err(SyncError::ResolutionFailed {
                        table: id.table,
                        key: id.key,
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    fn accept_remote(&self, conflict: &Conflict) -> (ResolvedRow, Resolution) {
        (
            ResolvedRow::AcceptRemote(conflict.remote.clone()),
            Resolution::AcceptRemote,
        )
    }

    fn keep_local(&self, conflict: &Conflict) -> (ResolvedRow, Resolution) {
        (
            ResolvedRow::KeepLocal(conflict.remote.change.clone()),
            Resolution::KeepLocal,
        )
    }
}

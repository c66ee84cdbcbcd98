//! Conflict descriptions and outcomes.

use crate::batch::BatchEntry;
use crate::operation::Operation;
use crate::row::RowId;
use serde::{Deserialize, Serialize};

/// Shape of a conflict, by the operations on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both sides created the row.
    InsertInsert,
    /// Both sides modified the row.
    UpdateUpdate,
    /// Local modified, remote deleted.
    UpdateDelete,
    /// Local deleted, remote modified.
    DeleteUpdate,
    /// Both sides deleted the row.
    DeleteDelete,
}

impl ConflictKind {
    /// Classifies a pair of operations (local, remote).
    pub fn classify(local: Operation, remote: Operation) -> Self {
        match (local, remote) {
            (Operation::Delete, Operation::Delete) => ConflictKind::DeleteDelete,
            (Operation::Delete, _) => ConflictKind::DeleteUpdate,
            (_, Operation::Delete) => ConflictKind::UpdateDelete,
            (Operation::Insert, Operation::Insert) => ConflictKind::InsertInsert,
            _ => ConflictKind::UpdateUpdate,
        }
    }
}

/// A row changed on both sides since the last common watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Local side.
    pub local: BatchEntry,
    /// Remote side.
    pub remote: BatchEntry,
}

impl Conflict {
    /// Creates a conflict.
    pub fn new(local: BatchEntry, remote: BatchEntry) -> Self {
        Self { local, remote }
    }

    /// Returns the conflicting row's identity.
    pub fn row_id(&self) -> RowId {
        self.local.change.row_id()
    }

    /// Classifies the conflict.
    pub fn kind(&self) -> ConflictKind {
        ConflictKind::classify(self.local.change.operation, self.remote.change.operation)
    }
}

/// Named conflict resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Adopt the remote row.
    RemoteWins,
    /// Keep the local row.
    LocalWins,
    /// Take the later change; fixed peer priority breaks ties.
    LatestVersionWins,
    /// Ask a per-table merge function.
    Merge,
}

/// How a conflict ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Local row kept; remote change marked seen.
    KeepLocal,
    /// Remote row adopted.
    AcceptRemote,
    /// A merged row was written locally and will be pushed.
    Merged,
    /// Resolution failed; the row was skipped this session.
    Unresolved(String),
}

impl Resolution {
    /// Returns true unless the conflict was left unresolved.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Unresolved(_))
    }
}

/// A conflict together with the policy applied and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// The conflict.
    pub conflict: Conflict,
    /// Policy that was applied.
    pub policy: ConflictPolicy,
    /// Outcome.
    pub resolution: Resolution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        use Operation::*;
        assert_eq!(ConflictKind::classify(Update, Update), ConflictKind::UpdateUpdate);
        assert_eq!(ConflictKind::classify(Insert, Insert), ConflictKind::InsertInsert);
        assert_eq!(ConflictKind::classify(Insert, Update), ConflictKind::UpdateUpdate);
        assert_eq!(ConflictKind::classify(Update, Delete), ConflictKind::UpdateDelete);
        assert_eq!(ConflictKind::classify(Delete, Insert), ConflictKind::DeleteUpdate);
        assert_eq!(ConflictKind::classify(Delete, Delete), ConflictKind::DeleteDelete);
    }

    #[test]
    fn unresolved_is_not_resolved() {
        assert!(Resolution::Merged.is_resolved());
        assert!(!Resolution::Unresolved("merge failed".into()).is_resolved());
    }
}

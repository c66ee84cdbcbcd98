//! Tracked changes.

use crate::row::{RowId, RowKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a synchronization peer (one store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generates a fresh random peer ID.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a peer ID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group is enough to tell peers apart in logs.
        let full = self.0.to_string();
        write!(f, "peer:{}", &full[..8])
    }
}

/// Per-store change version.
///
/// Versions are assigned by a store's clock, strictly increase within
/// that store and are never comparable across stores.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// The version before any change.
    pub const ZERO: Version = Version(0);

    /// Creates a version.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the previous version, saturating at zero.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Row was created.
    Insert,
    /// Row was modified.
    Update,
    /// Row was removed.
    Delete,
}

impl Operation {
    /// Derives the net operation of a transaction from whether the row
    /// existed before it started and whether it exists after it commits.
    ///
    /// Returns `None` when the transaction created and removed the row.
    pub fn net(existed_before: bool, exists_after: bool) -> Option<Self> {
        match (existed_before, exists_after) {
            (false, true) => Some(Operation::Insert),
            (true, true) => Some(Operation::Update),
            (true, false) => Some(Operation::Delete),
            (false, false) => None,
        }
    }
}

/// The most recent tracked mutation of one row in one store.
///
/// Exactly one entry exists per row per store. A later mutation of the
/// same row supersedes the entry and moves it to a higher version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Table name.
    pub table: String,
    /// Primary key.
    pub key: RowKey,
    /// Net operation.
    pub operation: Operation,
    /// Version assigned by the store holding this entry.
    pub version: Version,
    /// Peer where the logical change was made.
    pub origin: PeerId,
    /// Version the origin peer assigned to the change.
    pub origin_version: Version,
    /// Wall-clock time of the logical change, milliseconds since the epoch.
    pub timestamp: u64,
}

impl ChangeEntry {
    /// Returns the row's identity.
    pub fn row_id(&self) -> RowId {
        RowId {
            table: self.table.clone(),
            key: self.key.clone(),
        }
    }

    /// Returns true if this entry marks a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.operation == Operation::Delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_operation() {
        assert_eq!(Operation::net(false, true), Some(Operation::Insert));
        assert_eq!(Operation::net(true, true), Some(Operation::Update));
        assert_eq!(Operation::net(true, false), Some(Operation::Delete));
        assert_eq!(Operation::net(false, false), None);
    }

    #[test]
    fn version_arithmetic() {
        assert_eq!(Version::new(4).next(), Version::new(5));
        assert_eq!(Version::ZERO.prev(), Version::ZERO);
        assert_eq!(Version::new(7).to_string(), "v7");
    }

    #[test]
    fn peer_id_display_is_short() {
        let peer = PeerId::from_bytes([0xAB; 16]);
        assert_eq!(peer.to_string(), "peer:abababab");
    }
}

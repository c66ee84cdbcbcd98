//! Change tracker.
//!
//! Holds exactly one [`ChangeEntry`] per row that has ever been mutated,
//! indexed both by row and by version. A new mutation supersedes the
//! previous entry for the row.

use crate::error::{StoreError, StoreResult};
use rowsync_protocol::{ChangeEntry, RowId, Version};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Per-store change log, one entry per row.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    entries: HashMap<RowId, ChangeEntry>,
    by_version: BTreeMap<Version, RowId>,
    /// Tombstones at or below this version have been pruned.
    retained_from: Version,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a tracker from persisted entries.
    pub fn from_entries(entries: Vec<ChangeEntry>, retained_from: Version) -> Self {
        let mut tracker = Self {
            retained_from,
            ..Self::default()
        };
        for entry in entries {
            tracker.record(entry);
        }
        tracker
    }

    /// Records an entry, superseding any previous entry for the same row.
    pub fn record(&mut self, entry: ChangeEntry) {
        let id = entry.row_id();
        if let Some(previous) = self.entries.remove(&id) {
            self.by_version.remove(&previous.version);
        }
        self.by_version.insert(entry.version, id.clone());
        self.entries.insert(id, entry);
    }

    /// Returns the current entry for a row.
    pub fn get(&self, id: &RowId) -> Option<&ChangeEntry> {
        self.entries.get(id)
    }

    /// Iterates entries with version greater than `since`, ascending.
    pub fn since(&self, since: Version) -> impl Iterator<Item = &ChangeEntry> + '_ {
        self.by_version
            .range((Bound::Excluded(since), Bound::Unbounded))
            .filter_map(|(_, id)| self.entries.get(id))
    }

    /// Fails if entries above `since` may have been pruned.
    pub fn check_retained(&self, since: Version) -> StoreResult<()> {
        if since < self.retained_from {
            return Err(StoreError::ResyncRequired {
                requested: since,
                retained_from: self.retained_from,
            });
        }
        Ok(())
    }

    /// Removes tombstones with version at or below `up_to`.
    ///
    /// Returns the number of tombstones removed. The retention floor moves
    /// up to the highest removed version and never moves back.
    pub fn prune(&mut self, up_to: Version) -> usize {
        let doomed: Vec<Version> = self
            .by_version
            .range(..=up_to)
            .filter_map(|(version, id)| {
                self.entries
                    .get(id)
                    .filter(|e| e.is_tombstone())
                    .map(|_| *version)
            })
            .collect();

        for version in &doomed {
            if let Some(id) = self.by_version.remove(version) {
                self.entries.remove(&id);
            }
        }

        if let Some(highest) = doomed.last() {
            self.retained_from = self.retained_from.max(*highest);
        }
        doomed.len()
    }

    /// Tombstones at or below this version may be gone.
    pub fn retained_from(&self) -> Version {
        self.retained_from
    }

    /// Highest version still present.
    pub fn high_version(&self) -> Version {
        self.by_version
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Version::ZERO)
    }

    /// Number of tracked rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in version order.
    pub fn entries(&self) -> impl Iterator<Item = &ChangeEntry> + '_ {
        self.since(Version::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{Operation, PeerId};

    fn entry(key: i64, operation: Operation, version: u64) -> ChangeEntry {
        let origin = PeerId::from_bytes([1; 16]);
        ChangeEntry {
            table: "Customer".into(),
            key: key.into(),
            operation,
            version: Version::new(version),
            origin,
            origin_version: Version::new(version),
            timestamp: version * 10,
        }
    }

    #[test]
    fn newer_entry_supersedes() {
        let mut tracker = ChangeTracker::new();
        tracker.record(entry(1, Operation::Insert, 1));
        tracker.record(entry(2, Operation::Insert, 2));
        tracker.record(entry(1, Operation::Update, 3));

        assert_eq!(tracker.len(), 2);
        let versions: Vec<u64> = tracker.entries().map(|e| e.version.as_u64()).collect();
        assert_eq!(versions, vec![2, 3]);
        let id = RowId::new("Customer", 1);
        assert_eq!(tracker.get(&id).map(|e| e.operation), Some(Operation::Update));
    }

    #[test]
    fn since_is_exclusive_and_ordered() {
        let mut tracker = ChangeTracker::new();
        for v in 1..=5 {
            tracker.record(entry(v as i64, Operation::Insert, v));
        }
        let versions: Vec<u64> = tracker
            .since(Version::new(2))
            .map(|e| e.version.as_u64())
            .collect();
        assert_eq!(versions, vec![3, 4, 5]);
        assert_eq!(tracker.high_version(), Version::new(5));
    }

    #[test]
    fn prune_removes_only_old_tombstones() {
        let mut tracker = ChangeTracker::new();
        tracker.record(entry(1, Operation::Delete, 1));
        tracker.record(entry(2, Operation::Insert, 2));
        tracker.record(entry(3, Operation::Delete, 3));
        tracker.record(entry(4, Operation::Delete, 4));

        assert_eq!(tracker.prune(Version::new(3)), 2);
        let versions: Vec<u64> = tracker.entries().map(|e| e.version.as_u64()).collect();
        assert_eq!(versions, vec![2, 4]);
        assert_eq!(tracker.retained_from(), Version::new(3));

        // The floor never moves back.
        tracker.prune(Version::new(1));
        assert_eq!(tracker.retained_from(), Version::new(3));

        assert_eq!(tracker.prune(Version::new(3)), 0);
        assert_eq!(tracker.retained_from(), Version::new(3));
    }

    #[test]
    fn pruning_live_rows_keeps_floor() {
        let mut tracker = ChangeTracker::new();
        tracker.record(entry(1, Operation::Insert, 1));
        assert_eq!(tracker.prune(Version::new(10)), 0);
        assert_eq!(tracker.retained_from(), Version::ZERO);
    }

    #[test]
    fn pruned_history_requires_resync() {
        let mut tracker = ChangeTracker::new();
        tracker.record(entry(1, Operation::Delete, 1));
        tracker.prune(Version::new(1));

        assert!(tracker.check_retained(Version::new(1)).is_ok());
        assert!(matches!(
            tracker.check_retained(Version::ZERO),
            Err(StoreError::ResyncRequired { .. })
        ));
    }

    #[test]
    fn rebuild_from_entries() {
        let entries = vec![entry(1, Operation::Insert, 4), entry(2, Operation::Delete, 9)];
        let tracker = ChangeTracker::from_entries(entries, Version::new(2));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.high_version(), Version::new(9));
        assert_eq!(tracker.retained_from(), Version::new(2));
    }
}

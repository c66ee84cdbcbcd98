//! Conflict detection.
//!
//! Local entries come from the local change log since the `sent`
//! watermark and remote entries from the pulled pages since `received`,
//! so every entry on either side is newer than the last exchange. A row
//! present on both sides therefore changed on both sides: that is a
//! conflict.

use crate::error::SyncResult;
use rowsync_protocol::{BatchEntry, Conflict, PeerId, RowId, Version};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Outcome of comparing local and remote changes.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Local changes with no remote counterpart, in version order.
    pub clean_local: Vec<BatchEntry>,
    /// Remote changes with no local counterpart, in remote version order.
    pub clean_remote: Vec<BatchEntry>,
    /// Rows changed on both sides.
    pub conflicts: Vec<Conflict>,
    /// Remote changes this peer has already incorporated.
    pub already_applied: Vec<BatchEntry>,
}

impl Detection {
    /// Returns true if nothing needs to be applied locally.
    pub fn is_quiet(&self) -> bool {
        self.clean_remote.is_empty() && self.conflicts.is_empty()
    }
}

/// Partitions local and remote changes into clean rows and conflicts.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    local_peer: PeerId,
}

impl ConflictDetector {
    /// Creates a detector for the store identified by `local_peer`.
    pub fn new(local_peer: PeerId) -> Self {
        Self { local_peer }
    }

    /// Compares `local` and `remote` changes.
    ///
    /// `seen` reports the highest origin version of a row already
    /// incorporated locally. Remote entries at or below it, or that
    /// originated here, are already applied and never conflict.
    ///
    /// Only local entries that originated on this peer can conflict. An
    /// entry relayed from another peer is not a local edit, so a newer
    /// remote change to the same row simply supersedes it.
    ///
    /// # Errors
    ///
    /// Propagates errors from `seen`.
    pub fn detect<F>(
        &self,
        local: Vec<BatchEntry>,
        remote: Vec<BatchEntry>,
        seen: F,
    ) -> SyncResult<Detection>
    where
        F: Fn(PeerId, &RowId) -> SyncResult<Option<Version>>,
    {
        let mut detection = Detection::default();

        // A row re-changed remotely between two pulled pages shows up twice;
        // its newest entry replaces the older one.
        let mut newest: BTreeMap<Version, BatchEntry> = BTreeMap::new();
        let mut by_row: HashMap<RowId, Version> = HashMap::new();
        for entry in remote {
            let id = entry.change.row_id();
            let version = entry.version();
            match by_row.get(&id) {
                Some(existing) if *existing >= version => continue,
                Some(existing) => {
                    newest.remove(existing);
                }
                None => {}
            }
            by_row.insert(id, version);
            newest.insert(version, entry);
        }

        let mut remote_rows: HashMap<RowId, BatchEntry> = HashMap::new();
        let mut remote_order = Vec::new();
        for entry in newest.into_values() {
            let change = &entry.change;
            let id = change.row_id();
            let incorporated = change.origin == self.local_peer
                || seen(change.origin, &id)?.is_some_and(|v| v >= change.origin_version);
            if incorporated {
                detection.already_applied.push(entry);
            } else {
                remote_order.push(id.clone());
                remote_rows.insert(id, entry);
            }
        }

        for entry in local {
            let id = entry.change.row_id();
            if entry.change.origin == self.local_peer {
                if let Some(remote_entry) = remote_rows.remove(&id) {
                    detection.conflicts.push(Conflict::new(entry, remote_entry));
                    continue;
                }
            }
            detection.clean_local.push(entry);
        }

        detection.clean_remote = remote_order
            .into_iter()
            .filter_map(|id| remote_rows.remove(&id))
            .collect();

        debug!(
            clean_local = detection.clean_local.len(),
            clean_remote = detection.clean_remote.len(),
            conflicts = detection.conflicts.len(),
            already_applied = detection.already_applied.len(),
            "detected changes"
        );
        Ok(detection)
    }
}

//! Change batches.

use crate::operation::{ChangeEntry, PeerId, Version};
use crate::row::Row;
use serde::{Deserialize, Serialize};

/// A change entry joined with the row it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// The tracked change.
    pub change: ChangeEntry,
    /// Current row content. `None` for tombstones.
    pub row: Option<Row>,
}

impl BatchEntry {
    /// Creates a batch entry.
    pub fn new(change: ChangeEntry, row: Option<Row>) -> Self {
        Self { change, row }
    }

    /// Returns the change's version.
    pub fn version(&self) -> Version {
        self.change.version
    }
}

/// An ordered, bounded page of changes.
///
/// # Invariants
///
/// - Entries are strictly ordered by version
/// - Every entry has version > `since`
/// - `next_watermark` >= the version of every entry; it is the position
///   from which the next page continues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Peer that built the batch.
    pub source: PeerId,
    /// Watermark the batch was built from.
    pub since: Version,
    /// Entries in version order.
    pub entries: Vec<BatchEntry>,
    /// Continuation point for the next page.
    pub next_watermark: Version,
    /// Whether more entries exist beyond `next_watermark`.
    pub has_more: bool,
}

impl Batch {
    /// Creates an empty batch that does not advance the watermark.
    pub fn empty(source: PeerId, since: Version) -> Self {
        Self {
            source,
            since,
            entries: Vec::new(),
            next_watermark: since,
            has_more: false,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the batch carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest entry version, if any.
    pub fn highest_version(&self) -> Option<Version> {
        self.entries.last().map(BatchEntry::version)
    }
}

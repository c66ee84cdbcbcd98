//! In-memory store state and its persisted form.

use crate::error::{StoreError, StoreResult};
use crate::schema::TableSchema;
use crate::tracker::ChangeTracker;
use rowsync_protocol::{ChangeEntry, Columns, PeerId, Row, RowId, RowKey, Version, Watermark};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Current persisted state format.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Everything a store commits atomically.
#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    pub(crate) peer_id: PeerId,
    pub(crate) tables: BTreeMap<String, TableSchema>,
    pub(crate) rows: BTreeMap<String, BTreeMap<RowKey, Columns>>,
    pub(crate) tracker: ChangeTracker,
    /// Highest origin version incorporated per (origin, row).
    pub(crate) seen: HashMap<(PeerId, RowId), Version>,
    pub(crate) watermarks: HashMap<PeerId, Watermark>,
    /// Last version handed out by this store's clock.
    pub(crate) high_version: Version,
}

impl StoreState {
    pub(crate) fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            tables: BTreeMap::new(),
            rows: BTreeMap::new(),
            tracker: ChangeTracker::new(),
            seen: HashMap::new(),
            watermarks: HashMap::new(),
            high_version: Version::ZERO,
        }
    }

    pub(crate) fn row(&self, id: &RowId) -> Option<&Columns> {
        self.rows.get(&id.table).and_then(|t| t.get(&id.key))
    }

    pub(crate) fn row_exists(&self, id: &RowId) -> bool {
        self.row(id).is_some()
    }

    pub(crate) fn put_row(&mut self, id: &RowId, columns: Columns) {
        self.rows
            .entry(id.table.clone())
            .or_default()
            .insert(id.key.clone(), columns);
    }

    pub(crate) fn remove_row(&mut self, id: &RowId) {
        if let Some(table) = self.rows.get_mut(&id.table) {
            table.remove(&id.key);
        }
    }

    pub(crate) fn seen_version(&self, origin: PeerId, id: &RowId) -> Option<Version> {
        self.seen.get(&(origin, id.clone())).copied()
    }

    pub(crate) fn mark_seen(&mut self, origin: PeerId, id: RowId, version: Version) {
        let slot = self.seen.entry((origin, id)).or_insert(version);
        *slot = (*slot).max(version);
    }

    /// Hands out the next version.
    pub(crate) fn next_version(&mut self) -> Version {
        self.high_version = self.high_version.next();
        self.high_version
    }

    pub(crate) fn to_persisted(&self) -> PersistedState {
        let rows = self
            .rows
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter()
                    .map(move |(key, columns)| Row::new(table.clone(), key.clone(), columns.clone()))
            })
            .collect();

        let mut seen: Vec<SeenRecord> = self
            .seen
            .iter()
            .map(|((origin, id), version)| SeenRecord {
                origin: *origin,
                table: id.table.clone(),
                key: id.key.clone(),
                version: *version,
            })
            .collect();
        seen.sort_by(|a, b| (a.origin, &a.table, &a.key).cmp(&(b.origin, &b.table, &b.key)));

        let mut watermarks: Vec<WatermarkRecord> = self
            .watermarks
            .iter()
            .map(|(peer, watermark)| WatermarkRecord {
                peer: *peer,
                watermark: *watermark,
            })
            .collect();
        watermarks.sort_by_key(|w| w.peer);

        PersistedState {
            format_version: STATE_FORMAT_VERSION,
            peer_id: self.peer_id,
            high_version: self.high_version,
            retained_from: self.tracker.retained_from(),
            tables: self.tables.values().cloned().collect(),
            rows,
            changes: self.tracker.entries().cloned().collect(),
            seen,
            watermarks,
        }
    }

    pub(crate) fn from_persisted(persisted: PersistedState) -> StoreResult<Self> {
        if persisted.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported state format version {}",
                persisted.format_version
            )));
        }

        let mut state = Self::new(persisted.peer_id);
        for schema in persisted.tables {
            state.tables.insert(schema.name.clone(), schema);
        }
        for row in persisted.rows {
            let id = row.id();
            state.put_row(&id, row.columns);
        }
        state.tracker = ChangeTracker::from_entries(persisted.changes, persisted.retained_from);
        for record in persisted.seen {
            state.mark_seen(
                record.origin,
                RowId::new(record.table, record.key),
                record.version,
            );
        }
        for record in persisted.watermarks {
            state.watermarks.insert(record.peer, record.watermark);
        }
        // The clock must never hand out a version already in the log.
        state.high_version = persisted.high_version.max(state.tracker.high_version());

        Ok(state)
    }
}

/// Serializable snapshot of a store, as written by a [`StateBackend`].
///
/// [`StateBackend`]: crate::StateBackend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version.
    pub format_version: u32,
    /// Store identity.
    pub peer_id: PeerId,
    /// Clock high-water mark.
    pub high_version: Version,
    /// Tombstone retention floor.
    pub retained_from: Version,
    /// Table schemas.
    pub tables: Vec<TableSchema>,
    /// Live rows.
    pub rows: Vec<Row>,
    /// Change tracker entries.
    pub changes: Vec<ChangeEntry>,
    /// Seen origin versions.
    pub seen: Vec<SeenRecord>,
    /// Per-peer watermarks.
    pub watermarks: Vec<WatermarkRecord>,
}

/// One seen-version record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    /// Origin peer.
    pub origin: PeerId,
    /// Table.
    pub table: String,
    /// Row key.
    pub key: RowKey,
    /// Highest origin version incorporated.
    pub version: Version,
}

/// One watermark record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRecord {
    /// Remote peer.
    pub peer: PeerId,
    /// Exchange progress with that peer.
    pub watermark: Watermark,
}

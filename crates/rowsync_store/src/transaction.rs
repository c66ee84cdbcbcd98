//! Single-writer transactions.
//!
//! A [`WriteTransaction`] stages row writes, seen marks, watermark updates
//! and tombstone pruning, then applies all of them in one commit. Every row
//! write records its [`ChangeEntry`] in that same commit. Dropping the
//! transaction without committing discards everything it staged.

use crate::error::{StoreError, StoreResult};
use crate::schema::TableSchema;
use crate::state::StoreState;
use crate::store::Store;
use parking_lot::MutexGuard;
use rowsync_protocol::{
    ChangeEntry, Columns, Operation, PeerId, Row, RowId, RowKey, Version, Watermark,
};
use std::collections::BTreeMap;
use std::mem;
use tracing::debug;

/// Who a staged write is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    /// A mutation made on this store.
    Local { timestamp: u64 },
    /// A change incorporated from another peer; keeps the remote identity.
    Remote {
        origin: PeerId,
        origin_version: Version,
        timestamp: u64,
    },
}

#[derive(Debug, Clone)]
struct PendingWrite {
    /// Whether the row existed in committed state when first staged.
    existed_before: bool,
    /// Row content after the transaction, `None` when deleted.
    after: Option<Columns>,
    provenance: Provenance,
    /// Record a change entry even when the row ends where it started.
    restamp: bool,
}

/// An exclusive write transaction.
///
/// Holds the store's writer lock for its whole lifetime, so at most one
/// exists per store at a time. Readers keep seeing the last committed
/// state until [`commit`](Self::commit) returns.
pub struct WriteTransaction<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
    tables: Vec<TableSchema>,
    writes: BTreeMap<RowId, PendingWrite>,
    seen: Vec<(PeerId, RowId, Version)>,
    watermarks: Vec<(PeerId, Watermark)>,
    prune_up_to: Option<Version>,
    finished: bool,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(store: &'a Store, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            store,
            _guard: guard,
            tables: Vec::new(),
            writes: BTreeMap::new(),
            seen: Vec::new(),
            watermarks: Vec::new(),
            prune_up_to: None,
            finished: false,
        }
    }

    /// Creates a table unless one with that name already exists.
    ///
    /// Returns true if the table is new.
    pub fn create_table(&mut self, schema: TableSchema) -> StoreResult<bool> {
        if self.schema(&schema.name).is_ok() {
            return Ok(false);
        }
        self.tables.push(schema);
        Ok(true)
    }

    /// Reads a row, including writes staged in this transaction.
    pub fn get(&self, table: &str, key: impl Into<RowKey>) -> StoreResult<Option<Row>> {
        let id = RowId::new(table, key);
        self.schema(table)?;
        Ok(self.current(&id)?.map(|columns| Row::new(table, id.key.clone(), columns)))
    }

    /// Returns the change entry of a row as committed before this
    /// transaction.
    pub fn committed_change(&self, id: &RowId) -> StoreResult<Option<ChangeEntry>> {
        let state = self.store.read_state()?;
        Ok(state.tracker.get(id).cloned())
    }

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::ConstraintViolation`] if the key exists or
    /// the columns do not match the table schema.
    pub fn insert(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        columns: Columns,
    ) -> StoreResult<()> {
        let id = RowId::new(table, key);
        self.validate(&id, &columns)?;
        if self.current(&id)?.is_some() {
            return Err(StoreError::constraint(table, id.key, "duplicate key"));
        }
        let provenance = self.local();
        self.stage(id, Some(columns), provenance)
    }

    /// Replaces the columns of an existing row.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::RowNotFound`] if the row does not exist.
    pub fn update(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        columns: Columns,
    ) -> StoreResult<()> {
        let id = RowId::new(table, key);
        self.validate(&id, &columns)?;
        if self.current(&id)?.is_none() {
            return Err(StoreError::RowNotFound {
                table: id.table,
                key: id.key,
            });
        }
        let provenance = self.local();
        self.stage(id, Some(columns), provenance)
    }

    /// Inserts or replaces a row.
    pub fn upsert(
        &mut self,
        table: &str,
        key: impl Into<RowKey>,
        columns: Columns,
    ) -> StoreResult<()> {
        let id = RowId::new(table, key);
        self.validate(&id, &columns)?;
        let provenance = self.local();
        self.stage(id, Some(columns), provenance)
    }

    /// Deletes a row. Returns false if it did not exist.
    pub fn delete(&mut self, table: &str, key: impl Into<RowKey>) -> StoreResult<bool> {
        let id = RowId::new(table, key);
        self.schema(table)?;
        if self.current(&id)?.is_none() {
            return Ok(false);
        }
        let provenance = self.local();
        self.stage(id, None, provenance)?;
        Ok(true)
    }

    /// Applies a change received from another peer.
    ///
    /// The resulting local change entry keeps the remote origin, origin
    /// version and timestamp, and the origin version is marked as seen.
    ///
    /// # Errors
    ///
    /// Fails if the table is unknown, if an insert or update carries no
    /// row, or if the row violates the local schema.
    pub fn apply_remote(&mut self, change: &ChangeEntry, row: Option<&Row>) -> StoreResult<()> {
        let id = change.row_id();
        let provenance = Provenance::Remote {
            origin: change.origin,
            origin_version: change.origin_version,
            timestamp: change.timestamp,
        };

        if change.is_tombstone() {
            self.schema(&id.table)?;
            if self.current(&id)?.is_some() {
                self.stage(id.clone(), None, provenance)?;
            }
        } else {
            let columns = row
                .map(|r| r.columns.clone())
                .ok_or_else(|| StoreError::constraint(&id.table, id.key.clone(), "missing row payload"))?;
            self.validate(&id, &columns)?;
            self.stage(id.clone(), Some(columns), provenance)?;
        }

        self.mark_seen(change.origin, id, change.origin_version);
        Ok(())
    }

    /// Records the row's current state again as a new local change.
    ///
    /// The new entry gets a fresh version and origin version but keeps the
    /// timestamp of the committed change, so peers that already saw that
    /// change take the row again. A deleted row is recorded as a new
    /// tombstone. Returns false if the row has no change entry.
    pub fn restamp(&mut self, id: &RowId) -> StoreResult<bool> {
        self.schema(&id.table)?;
        let Some(change) = self.committed_change(id)? else {
            return Ok(false);
        };
        let after = self.current(id)?;
        self.stage(
            id.clone(),
            after,
            Provenance::Local {
                timestamp: change.timestamp,
            },
        )?;
        if let Some(write) = self.writes.get_mut(id) {
            write.restamp = true;
        }
        Ok(true)
    }

    /// Records that `origin`'s change `version` of a row has been
    /// incorporated (applied, or seen and overridden).
    pub fn mark_seen(&mut self, origin: PeerId, id: RowId, version: Version) {
        self.seen.push((origin, id, version));
    }

    /// Advances the watermark for a peer. Components never move back.
    pub fn advance_watermark(&mut self, peer: PeerId, watermark: Watermark) {
        self.watermarks.push((peer, watermark));
    }

    /// Prunes tombstones with version at or below `up_to` on commit.
    pub fn prune_tombstones(&mut self, up_to: Version) {
        self.prune_up_to = Some(self.prune_up_to.map_or(up_to, |v| v.max(up_to)));
    }

    /// Number of staged row writes.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Commits everything staged.
    ///
    /// Returns the change entries recorded by this commit, in version
    /// order. A row written several times is recorded once, with the net
    /// operation; a row inserted and deleted again is not recorded at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the backend cannot save
    /// the new state. Nothing is applied in that case.
    pub fn commit(mut self) -> StoreResult<Vec<ChangeEntry>> {
        self.finished = true;
        self.store.ensure_open()?;

        let staged = Staged {
            tables: mem::take(&mut self.tables),
            writes: mem::take(&mut self.writes),
            seen: mem::take(&mut self.seen),
            watermarks: mem::take(&mut self.watermarks),
            prune_up_to: self.prune_up_to.take(),
            retention: self.store.config().tombstone_retention,
        };

        let mut backend = self.store.backend().lock();
        let recorded = if backend.is_persistent() {
            let mut next = self.store.read_state()?.clone();
            let recorded = staged.apply(&mut next);
            backend.save(&next.to_persisted())?;
            *self.store.state().write() = next;
            recorded
        } else {
            let mut state = self.store.state().write();
            staged.apply(&mut state)
        };

        debug!(
            changes = recorded.len(),
            high_version = %recorded.last().map_or(Version::ZERO, |e| e.version),
            "transaction committed"
        );
        Ok(recorded)
    }

    /// Discards everything staged.
    pub fn rollback(mut self) {
        self.finished = true;
    }

    fn local(&self) -> Provenance {
        Provenance::Local {
            timestamp: self.store.config().clock.now_millis(),
        }
    }

    fn schema(&self, table: &str) -> StoreResult<TableSchema> {
        if let Some(schema) = self.tables.iter().find(|s| s.name == table) {
            return Ok(schema.clone());
        }
        self.store
            .read_state()?
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })
    }

    fn validate(&self, id: &RowId, columns: &Columns) -> StoreResult<()> {
        self.schema(&id.table)?
            .validate(columns)
            .map_err(|reason| StoreError::constraint(&id.table, id.key.clone(), reason))
    }

    fn current(&self, id: &RowId) -> StoreResult<Option<Columns>> {
        if let Some(write) = self.writes.get(id) {
            return Ok(write.after.clone());
        }
        Ok(self.store.read_state()?.row(id).cloned())
    }

    fn stage(
        &mut self,
        id: RowId,
        after: Option<Columns>,
        provenance: Provenance,
    ) -> StoreResult<()> {
        if let Some(write) = self.writes.get_mut(&id) {
            write.after = after;
            write.provenance = provenance;
            return Ok(());
        }
        let existed_before = self.store.read_state()?.row_exists(&id);
        self.writes.insert(
            id,
            PendingWrite {
                existed_before,
                after,
                provenance,
                restamp: false,
            },
        );
        Ok(())
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            debug!(writes = self.writes.len(), "transaction rolled back");
        }
    }
}

/// Everything a commit applies to the state.
struct Staged {
    tables: Vec<TableSchema>,
    writes: BTreeMap<RowId, PendingWrite>,
    seen: Vec<(PeerId, RowId, Version)>,
    watermarks: Vec<(PeerId, Watermark)>,
    prune_up_to: Option<Version>,
    retention: u64,
}

impl Staged {
    fn apply(self, state: &mut StoreState) -> Vec<ChangeEntry> {
        for schema in self.tables {
            state.tables.entry(schema.name.clone()).or_insert(schema);
        }

        let local_peer = state.peer_id;
        let mut recorded = Vec::with_capacity(self.writes.len());
        for (id, write) in self.writes {
            let operation = match Operation::net(write.existed_before, write.after.is_some()) {
                Some(operation) => operation,
                None if write.restamp => Operation::Delete,
                None => continue,
            };
            let version = state.next_version();
            let (origin, origin_version, timestamp) = match write.provenance {
                Provenance::Local { timestamp } => (local_peer, version, timestamp),
                Provenance::Remote {
                    origin,
                    origin_version,
                    timestamp,
                } => (origin, origin_version, timestamp),
            };

            match write.after {
                Some(columns) => state.put_row(&id, columns),
                None => state.remove_row(&id),
            }

            let entry = ChangeEntry {
                table: id.table,
                key: id.key,
                operation,
                version,
                origin,
                origin_version,
                timestamp,
            };
            state.tracker.record(entry.clone());
            recorded.push(entry);
        }

        for (origin, id, version) in self.seen {
            state.mark_seen(origin, id, version);
        }

        for (peer, watermark) in self.watermarks {
            let current = state.watermarks.entry(peer).or_default();
            *current = current.advance(watermark);
        }

        if let Some(up_to) = self.prune_up_to {
            let floor = Version::new(state.high_version.as_u64().saturating_sub(self.retention));
            let pruned = state.tracker.prune(up_to.min(floor));
            if pruned > 0 {
                debug!(pruned, up_to = %up_to.min(floor), "pruned tombstones");
            }
        }

        recorded
    }
}

//! The row store.

use crate::backend::{FileBackend, MemoryBackend, StateBackend};
use crate::batch::{BatchBuilder, ChangeCursor};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::schema::TableSchema;
use crate::state::StoreState;
use crate::transaction::WriteTransaction;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rowsync_protocol::{ChangeEntry, PeerId, Row, RowId, RowKey, Version, Watermark};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// An embedded, transactional row store with change tracking.
///
/// The store is safe to share across threads (`Arc<Store>`). Reads always
/// observe the last committed state. Writes go through a single
/// [`WriteTransaction`] at a time.
///
/// # Example
///
/// ```rust,ignore
/// use rowsync_store::{Store, TableSchema};
/// use rowsync_protocol::{ColumnType, Columns, Value};
///
/// let store = Store::open_in_memory()?;
/// store.create_table(TableSchema::new("Customer", "Id").column("LastName", ColumnType::Text))?;
///
/// store.transaction(|txn| {
///     let mut columns = Columns::new();
///     columns.insert("LastName".into(), Value::from("Doe"));
///     txn.insert("Customer", 1, columns)
/// })?;
/// ```
pub struct Store {
    config: StoreConfig,
    state: RwLock<StoreState>,
    write_lock: Mutex<()>,
    backend: Mutex<Box<dyn StateBackend>>,
    is_open: RwLock<bool>,
}

impl Store {
    /// Opens a store that lives only in memory.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_with_backend(Box::new(MemoryBackend::new()), StoreConfig::default())
    }

    /// Opens an in-memory store with the given configuration.
    pub fn open_in_memory_with_config(config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_backend(Box::new(MemoryBackend::new()), config)
    }

    /// Opens or creates a file-backed store.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::Locked`] if another process has the file
    /// open, or if the existing state cannot be read.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens or creates a file-backed store with the given configuration.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::open_with_backend(Box::new(backend), config)
    }

    /// Opens a store on a custom backend.
    pub fn open_with_backend(
        mut backend: Box<dyn StateBackend>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let state = match backend.load()? {
            Some(persisted) => {
                let state = StoreState::from_persisted(persisted)?;
                if let Some(requested) = config.peer_id.filter(|p| *p != state.peer_id) {
                    warn!(
                        requested = %requested,
                        peer = %state.peer_id,
                        "ignoring configured peer id, store already has one"
                    );
                }
                info!(
                    peer = %state.peer_id,
                    rows = state.rows.values().map(|t| t.len()).sum::<usize>(),
                    high_version = %state.high_version,
                    "store opened"
                );
                state
            }
            None => {
                let state = StoreState::new(config.peer_id.unwrap_or_else(PeerId::random));
                if backend.is_persistent() {
                    // Pin the peer id before anything else happens.
                    backend.save(&state.to_persisted())?;
                }
                info!(peer = %state.peer_id, "store created");
                state
            }
        };

        Ok(Self {
            config,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
            backend: Mutex::new(backend),
            is_open: RwLock::new(true),
        })
    }

    /// Returns this store's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.state.read().peer_id
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates a table unless it already exists. Returns true if created.
    pub fn create_table(&self, schema: TableSchema) -> StoreResult<bool> {
        let name = schema.name.clone();
        let created = self.transaction(|txn| txn.create_table(schema))?;
        if created {
            info!(table = %name, "table created");
        }
        Ok(created)
    }

    /// Returns a table's schema.
    pub fn table(&self, name: &str) -> StoreResult<Option<TableSchema>> {
        Ok(self.read_state()?.tables.get(name).cloned())
    }

    /// Returns the names of all tables.
    pub fn tables(&self) -> StoreResult<Vec<String>> {
        Ok(self.read_state()?.tables.keys().cloned().collect())
    }

    /// Gets a row by key.
    pub fn get(&self, table: &str, key: impl Into<RowKey>) -> StoreResult<Option<Row>> {
        let state = self.read_state()?;
        ensure_table(&state, table)?;
        let id = RowId::new(table, key);
        Ok(state
            .row(&id)
            .map(|columns| Row::new(table, id.key.clone(), columns.clone())))
    }

    /// Lists the rows of a table in key order.
    pub fn rows(&self, table: &str) -> StoreResult<Vec<Row>> {
        let state = self.read_state()?;
        ensure_table(&state, table)?;
        Ok(state
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(key, columns)| Row::new(table, key.clone(), columns.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Counts the rows of a table.
    pub fn count(&self, table: &str) -> StoreResult<usize> {
        let state = self.read_state()?;
        ensure_table(&state, table)?;
        Ok(state.rows.get(table).map_or(0, |rows| rows.len()))
    }

    /// Begins a write transaction, waiting for any other writer to finish.
    pub fn begin_write(&self) -> StoreResult<WriteTransaction<'_>> {
        self.ensure_open()?;
        let guard = self.write_lock.lock();
        Ok(WriteTransaction::new(self, guard))
    }

    /// Executes a function within a write transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> StoreResult<T>,
    {
        let mut txn = self.begin_write()?;
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    /// Returns the current change entry for a row.
    pub fn change_entry(&self, id: &RowId) -> StoreResult<Option<ChangeEntry>> {
        Ok(self.read_state()?.tracker.get(id).cloned())
    }

    /// Returns all change entries in version order.
    pub fn changes(&self) -> StoreResult<Vec<ChangeEntry>> {
        Ok(self.read_state()?.tracker.entries().cloned().collect())
    }

    /// Starts building a batch of changes.
    pub fn batch(&self) -> BatchBuilder<'_> {
        BatchBuilder::new(self)
    }

    /// Returns a lazy cursor over changes with version greater than
    /// `since`, in version order.
    pub fn changes_since(&self, since: Version) -> ChangeCursor<'_> {
        ChangeCursor::new(self, since)
    }

    /// Returns the highest origin version of a row already incorporated
    /// from `origin`.
    pub fn seen_version(&self, origin: PeerId, id: &RowId) -> StoreResult<Option<Version>> {
        Ok(self.read_state()?.seen_version(origin, id))
    }

    /// Returns the watermark for a remote peer (zero if never synced).
    pub fn watermark(&self, peer: PeerId) -> StoreResult<Watermark> {
        Ok(self
            .read_state()?
            .watermarks
            .get(&peer)
            .copied()
            .unwrap_or_default())
    }

    /// Returns all known peer watermarks.
    pub fn watermarks(&self) -> StoreResult<Vec<(PeerId, Watermark)>> {
        let mut all: Vec<_> = self
            .read_state()?
            .watermarks
            .iter()
            .map(|(peer, watermark)| (*peer, *watermark))
            .collect();
        all.sort_by_key(|(peer, _)| *peer);
        Ok(all)
    }

    /// Returns the last version handed out.
    pub fn high_version(&self) -> StoreResult<Version> {
        Ok(self.read_state()?.high_version)
    }

    /// Tombstones at or below this version may have been pruned.
    pub fn retained_from(&self) -> StoreResult<Version> {
        Ok(self.read_state()?.tracker.retained_from())
    }

    /// Prunes tombstones with version at or below `up_to`, keeping the
    /// configured retention window. Returns the new retention floor.
    pub fn prune_tombstones(&self, up_to: Version) -> StoreResult<Version> {
        self.transaction(|txn| {
            txn.prune_tombstones(up_to);
            Ok(())
        })?;
        self.retained_from()
    }

    /// Content digest of the given tables: SHA-256 over rows in key order,
    /// hex encoded. Two stores with the same rows have the same digest.
    pub fn digest(&self, tables: &[String]) -> StoreResult<String> {
        let state = self.read_state()?;
        let mut hasher = Sha256::new();
        let mut names: Vec<&String> = tables.iter().collect();
        names.sort();
        names.dedup();
        for table in names {
            hasher.update(table.as_bytes());
            hasher.update([0u8]);
            if let Some(rows) = state.rows.get(table) {
                for (key, columns) in rows {
                    hasher.update(serde_json::to_vec(&(key, columns))?);
                    hasher.update([0u8]);
                }
            }
        }
        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }

    /// Closes the store. Every later operation fails with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> StoreResult<()> {
        let mut is_open = self.is_open.write();
        if *is_open {
            *is_open = false;
            info!(peer = %self.state.read().peer_id, "store closed");
        }
        Ok(())
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    pub(crate) fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.ensure_open()?;
        Ok(self.state.read())
    }

    pub(crate) fn state(&self) -> &RwLock<StoreState> {
        &self.state
    }

    pub(crate) fn backend(&self) -> &Mutex<Box<dyn StateBackend>> {
        &self.backend
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("peer_id", &self.peer_id())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn ensure_table(state: &StoreState, table: &str) -> StoreResult<()> {
    if state.tables.contains_key(table) {
        Ok(())
    } else {
        Err(StoreError::TableNotFound {
            table: table.to_string(),
        })
    }
}

//! Batch building over the change tracker.
//!
//! Batches are built under one read lock, so a batch is always a
//! consistent cut of committed state: a transaction that is still open, or
//! commits while the batch is built, is either fully visible or absent.

use crate::error::{StoreError, StoreResult};
use crate::state::StoreState;
use crate::store::Store;
use rowsync_protocol::{Batch, BatchEntry, PeerId, Row, Version};
use std::collections::{BTreeSet, VecDeque};

/// Default page size for batches and cursors.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Builds a [`Batch`] of changes since a watermark.
///
/// Entries are strictly ordered by version and never exceed `max_size`.
/// The batch's `next_watermark` is the version of the last entry scanned
/// (returned or filtered out), so pulling again from it continues exactly
/// where this batch stopped.
#[derive(Debug)]
pub struct BatchBuilder<'a> {
    store: &'a Store,
    params: BatchParams,
}

#[derive(Debug, Clone)]
struct BatchParams {
    tables: Option<BTreeSet<String>>,
    since: Version,
    max_size: usize,
    exclude_origin: Option<PeerId>,
    snapshot: bool,
}

impl<'a> BatchBuilder<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            params: BatchParams {
                tables: None,
                since: Version::ZERO,
                max_size: DEFAULT_BATCH_SIZE,
                exclude_origin: None,
                snapshot: false,
            },
        }
    }

    /// Restricts the batch to a table set. All tables are included when
    /// unset.
    #[must_use]
    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Only changes with version greater than `since`.
    #[must_use]
    pub fn since(mut self, since: Version) -> Self {
        self.params.since = since;
        self
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.params.max_size = max_size;
        self
    }

    /// Skips changes that originated from `peer`. The watermark still
    /// advances over them.
    #[must_use]
    pub fn exclude_origin(mut self, peer: PeerId) -> Self {
        self.params.exclude_origin = Some(peer);
        self
    }

    /// Snapshot mode: live rows only, tombstones are skipped, and pruned
    /// history is not an error.
    #[must_use]
    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.params.snapshot = snapshot;
        self
    }

    /// Builds the batch.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Closed`] if the store cannot be read
    /// - [`StoreError::ResyncRequired`] if history since the watermark has
    ///   been pruned (incremental mode only)
    /// - [`StoreError::InvalidOperation`] if `max_size` is zero
    pub fn build(self) -> StoreResult<Batch> {
        let state = self.store.read_state()?;
        build_batch(&state, &self.params)
    }
}

fn build_batch(state: &StoreState, params: &BatchParams) -> StoreResult<Batch> {
    if params.max_size == 0 {
        return Err(StoreError::invalid_operation("batch max_size must be positive"));
    }
    if !params.snapshot {
        state.tracker.check_retained(params.since)?;
    }

    let mut batch = Batch::empty(state.peer_id, params.since);
    for change in state.tracker.since(params.since) {
        if let Some(tables) = &params.tables {
            if !tables.contains(&change.table) {
                continue;
            }
        }

        let filtered = params.exclude_origin == Some(change.origin)
            || (params.snapshot && change.is_tombstone());
        if filtered {
            batch.next_watermark = change.version;
            continue;
        }

        if batch.entries.len() == params.max_size {
            batch.has_more = true;
            break;
        }

        let row = if change.is_tombstone() {
            None
        } else {
            state
                .row(&change.row_id())
                .map(|columns| Row::new(change.table.clone(), change.key.clone(), columns.clone()))
        };
        batch.entries.push(BatchEntry::new(change.clone(), row));
        batch.next_watermark = change.version;
    }

    Ok(batch)
}

/// A lazy, restartable cursor over tracked changes in version order.
///
/// Each page is read under the store's lock when the cursor runs dry, so
/// the cursor never holds a lock between calls to `next`.
#[derive(Debug)]
pub struct ChangeCursor<'a> {
    store: &'a Store,
    params: BatchParams,
    buffer: VecDeque<BatchEntry>,
    /// Version of the last entry handed out.
    position: Version,
    exhausted: bool,
}

impl<'a> ChangeCursor<'a> {
    pub(crate) fn new(store: &'a Store, since: Version) -> Self {
        Self {
            store,
            params: BatchParams {
                tables: None,
                since,
                max_size: DEFAULT_BATCH_SIZE,
                exclude_origin: None,
                snapshot: false,
            },
            buffer: VecDeque::new(),
            position: since,
            exhausted: false,
        }
    }

    /// Restricts the cursor to a table set.
    #[must_use]
    pub fn tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Sets how many entries are read per page.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.params.max_size = page_size.max(1);
        self
    }

    /// Version of the last entry returned.
    pub fn position(&self) -> Version {
        self.position
    }

    /// Restarts the cursor after `since`, discarding anything buffered.
    pub fn restart_from(&mut self, since: Version) {
        self.params.since = since;
        self.position = since;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fill(&mut self) -> StoreResult<()> {
        let state = self.store.read_state()?;
        let page = build_batch(&state, &self.params)?;
        self.params.since = page.next_watermark;
        self.exhausted = !page.has_more;
        self.buffer.extend(page.entries);
        Ok(())
    }
}

impl Iterator for ChangeCursor<'_> {
    type Item = StoreResult<BatchEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let entry = self.buffer.pop_front()?;
        self.position = entry.version();
        Some(Ok(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use rowsync_protocol::{ChangeEntry, ColumnType, Columns, Operation, Value};

    fn store_with_rows(count: i64) -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .create_table(TableSchema::new("Customer", "Id").column("LastName", ColumnType::Text))
            .unwrap();
        store
            .create_table(TableSchema::new("Order", "Id").column("Item", ColumnType::Text))
            .unwrap();
        for i in 1..=count {
            store
                .transaction(|txn| txn.insert("Customer", i, last_name(&format!("Doe{i}"))))
                .unwrap();
        }
        store
    }

    fn last_name(name: &str) -> Columns {
        let mut columns = Columns::new();
        columns.insert("LastName".into(), Value::from(name));
        columns
    }

    #[test]
    fn paging_250_changes_by_100() {
        let store = store_with_rows(250);
        let mut since = Version::ZERO;
        let mut watermarks = Vec::new();

        loop {
            let batch = store
                .batch()
                .tables(["Customer"])
                .since(since)
                .max_size(100)
                .build()
                .unwrap();
            assert!(batch.len() <= 100);
            assert_eq!(batch.highest_version(), Some(batch.next_watermark));
            watermarks.push(batch.next_watermark.as_u64());
            since = batch.next_watermark;
            if !batch.has_more {
                break;
            }
        }

        assert_eq!(watermarks, vec![100, 200, 250]);
    }

    #[test]
    fn entries_are_strictly_ordered() {
        let store = store_with_rows(10);
        store
            .transaction(|txn| txn.update("Customer", 3, last_name("Smith")))
            .unwrap();

        let batch = store.batch().build().unwrap();
        let versions: Vec<u64> = batch.entries.iter().map(|e| e.version().as_u64()).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert_eq!(batch.len(), 10);
    }

    #[test]
    fn tombstones_carry_no_row() {
        let store = store_with_rows(2);
        store.transaction(|txn| txn.delete("Customer", 1)).unwrap();

        let batch = store.batch().since(Version::new(2)).build().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.entries[0].change.operation, Operation::Delete);
        assert!(batch.entries[0].row.is_none());

        let snapshot = store.batch().snapshot(true).build().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.next_watermark, Version::new(3));
    }

    #[test]
    fn table_set_is_respected() {
        let store = store_with_rows(3);
        let mut item = Columns::new();
        item.insert("Item".into(), Value::from("Book"));
        store
            .transaction(|txn| txn.insert("Order", 1, item))
            .unwrap();

        let batch = store.batch().tables(["Order"]).build().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.entries[0].change.table, "Order");
    }

    #[test]
    fn excluded_origin_advances_watermark() {
        let store = store_with_rows(1);
        let remote = PeerId::random();
        let change = ChangeEntry {
            table: "Customer".into(),
            key: 2.into(),
            operation: Operation::Insert,
            version: Version::new(17),
            origin: remote,
            origin_version: Version::new(17),
            timestamp: 0,
        };
        let row = rowsync_protocol::Row::new("Customer", 2, last_name("Smith"));
        store
            .transaction(|txn| txn.apply_remote(&change, Some(&row)))
            .unwrap();

        let batch = store.batch().exclude_origin(remote).build().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.next_watermark, Version::new(2));
        assert!(!batch.has_more);
    }

    #[test]
    fn pruned_history_requires_resync() {
        let store = store_with_rows(2);
        store.transaction(|txn| txn.delete("Customer", 1)).unwrap();
        store.prune_tombstones(Version::new(3)).unwrap();

        let result = store.batch().since(Version::new(1)).build();
        assert!(matches!(result, Err(StoreError::ResyncRequired { .. })));
        assert!(store.batch().since(Version::new(1)).snapshot(true).build().is_ok());
    }

    #[test]
    fn zero_max_size_is_rejected() {
        let store = store_with_rows(1);
        assert!(store.batch().max_size(0).build().is_err());
    }

    #[test]
    fn closed_store_cannot_build() {
        let store = store_with_rows(1);
        store.close().unwrap();
        assert!(matches!(store.batch().build(), Err(StoreError::Closed)));
    }

    #[test]
    fn cursor_walks_all_pages_lazily() {
        let store = store_with_rows(25);
        let mut cursor = store.changes_since(Version::new(5)).page_size(7);

        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.version(), Version::new(6));

        // A commit after the cursor started is picked up by later pages.
        store
            .transaction(|txn| txn.insert("Customer", 99, last_name("Late")))
            .unwrap();

        let rest: Vec<u64> = cursor.by_ref().map(|e| e.unwrap().version().as_u64()).collect();
        assert_eq!(rest.first(), Some(&7));
        assert_eq!(rest.last(), Some(&26));
        assert_eq!(cursor.position(), Version::new(26));
    }

    #[test]
    fn cursor_restarts() {
        let store = store_with_rows(5);
        let mut cursor = store.changes_since(Version::ZERO);
        assert_eq!(cursor.by_ref().count(), 5);

        cursor.restart_from(Version::new(3));
        let versions: Vec<u64> = cursor.map(|e| e.unwrap().version().as_u64()).collect();
        assert_eq!(versions, vec![4, 5]);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]

        #[test]
        fn pages_cover_the_tracker_in_order(
            edits in proptest::collection::vec((1..=10i64, proptest::bool::ANY), 0..40),
            page in 1..20usize,
        ) {
            let store = store_with_rows(0);
            for (key, delete) in edits {
                store
                    .transaction(|txn| {
                        if delete {
                            txn.delete("Customer", key).map(|_| ())
                        } else {
                            txn.upsert("Customer", key, last_name(&format!("V{key}")))
                        }
                    })
                    .unwrap();
            }

            let mut since = Version::ZERO;
            let mut paged: Vec<ChangeEntry> = Vec::new();
            loop {
                let batch = store.batch().since(since).max_size(page).build().unwrap();
                proptest::prop_assert!(batch.len() <= page);
                proptest::prop_assert!(batch.next_watermark >= since);
                since = batch.next_watermark;
                paged.extend(batch.entries.into_iter().map(|e| e.change));
                if !batch.has_more {
                    break;
                }
            }

            proptest::prop_assert_eq!(paged, store.changes().unwrap());
        }
    }
}

//! In-memory data store.
//!
//! Serves as the default cache store when none is configured and as the
//! origin in tests. Clones share one state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use dbview_core::{
    Entity, FieldRefresh, Identity, Query, Row, Schema, StorageError, ViewResult,
};

use crate::eval::{self, TableSource};
use crate::ledger::LedgerKey;
use crate::store::{CommitSummary, DataStore, StatsCounter, StoreStats, WriteBatch};

type Tables = HashMap<String, BTreeMap<Identity, Row>>;

#[derive(Debug)]
struct MemoryInner {
    schema: Arc<Schema>,
    tables: RwLock<Tables>,
    ledger: RwLock<BTreeSet<LedgerKey>>,
    unavailable: AtomicBool,
    stats: StatsCounter,
}

/// In-memory store keeping rows in ordered maps.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        let tables = schema
            .entity_names()
            .map(|name| (name.to_string(), BTreeMap::new()))
            .collect();
        Self {
            inner: Arc::new(MemoryInner {
                schema,
                tables: RwLock::new(tables),
                ledger: RwLock::new(BTreeSet::new()),
                unavailable: AtomicBool::new(false),
                stats: StatsCounter::default(),
            }),
        }
    }

    /// Insert or replace rows directly, bypassing the ledger and the counters.
    pub fn seed(&self, rows: impl IntoIterator<Item = Row>) -> ViewResult<()> {
        let rows: Vec<Row> = rows.into_iter().collect();
        for row in &rows {
            self.inner.schema.require(&row.entity)?;
        }
        let mut tables = self.write_tables()?;
        for row in rows {
            tables
                .entry(row.entity.clone())
                .or_default()
                .insert(row.identity.clone(), row);
        }
        Ok(())
    }

    /// Seed one domain value.
    pub fn put_entity<T: Entity>(&self, value: &T) -> ViewResult<()> {
        let row = Row::from_entity(value)?;
        self.seed([row])
    }

    /// Delete a row. Returns true if it existed.
    pub fn remove(&self, entity: &str, identity: &Identity) -> ViewResult<bool> {
        let mut tables = self.write_tables()?;
        Ok(tables
            .get_mut(entity)
            .and_then(|table| table.remove(identity))
            .is_some())
    }

    /// Make every adapter call fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn row_count(&self, entity: &str) -> ViewResult<usize> {
        let tables = self.read_tables()?;
        Ok(tables.get(entity).map_or(0, BTreeMap::len))
    }

    pub fn ledger_len(&self) -> ViewResult<usize> {
        let ledger = self
            .inner
            .ledger
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(ledger.len())
    }

    fn check_available(&self) -> ViewResult<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "memory store is marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn read_tables(&self) -> ViewResult<std::sync::RwLockReadGuard<'_, Tables>> {
        Ok(self
            .inner
            .tables
            .read()
            .map_err(|_| StorageError::LockPoisoned)?)
    }

    fn write_tables(&self) -> ViewResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        Ok(self
            .inner
            .tables
            .write()
            .map_err(|_| StorageError::LockPoisoned)?)
    }

    fn commit_sync(&self, batch: WriteBatch) -> ViewResult<CommitSummary> {
        let (rows, marks) = batch.into_parts();
        for row in &rows {
            self.inner.schema.require(&row.entity)?;
        }

        let mut tables = self.write_tables()?;
        let mut ledger = self
            .inner
            .ledger
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let merged_at = Utc::now();
        let mut summary = CommitSummary::default();
        for row in rows {
            let table = tables.entry(row.entity.clone()).or_default();
            match table.get_mut(&row.identity) {
                Some(existing) => {
                    existing.columns.extend(row.columns);
                    existing.merged_at = Some(merged_at);
                }
                None => {
                    table.insert(row.identity.clone(), row.with_merged_at(merged_at));
                }
            }
            summary.rows_merged += 1;
        }
        for key in marks {
            if ledger.insert(key) {
                summary.marks_inserted += 1;
            } else {
                summary.marks_existing += 1;
            }
        }
        Ok(summary)
    }
}

/// An in-memory store to use as a cache when none is configured.
pub fn in_memory_cache(schema: Arc<Schema>) -> Arc<dyn DataStore> {
    Arc::new(MemoryStore::new(schema))
}

struct Snapshot<'a> {
    schema: &'a Schema,
    tables: &'a Tables,
}

impl TableSource for Snapshot<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn fetch(&self, entity: &str, identity: &Identity) -> ViewResult<Option<Row>> {
        self.schema.require(entity)?;
        Ok(self
            .tables
            .get(entity)
            .and_then(|table| table.get(identity))
            .cloned())
    }

    fn scan(&self, entity: &str) -> ViewResult<Vec<Row>> {
        self.schema.require(entity)?;
        Ok(self
            .tables
            .get(entity)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    async fn ensure_schema(&self) -> ViewResult<()> {
        self.check_available()?;
        let mut tables = self.write_tables()?;
        for name in self.inner.schema.entity_names() {
            tables.entry(name.to_string()).or_default();
        }
        Ok(())
    }

    async fn get(&self, entity: &str, identity: &Identity) -> ViewResult<Option<Row>> {
        self.inner.stats.record_get();
        self.check_available()?;
        let tables = self.read_tables()?;
        Snapshot {
            schema: &self.inner.schema,
            tables: &tables,
        }
        .fetch(entity, identity)
    }

    async fn run_query(&self, query: &Query) -> ViewResult<Vec<Row>> {
        self.inner.stats.record_query();
        self.check_available()?;
        let tables = self.read_tables()?;
        let snapshot = Snapshot {
            schema: &self.inner.schema,
            tables: &tables,
        };
        eval::run_query(&snapshot, query)
    }

    async fn refresh_field(
        &self,
        entity: &str,
        identity: &Identity,
        field: &str,
    ) -> ViewResult<Option<FieldRefresh>> {
        self.inner.stats.record_refresh();
        self.check_available()?;
        let tables = self.read_tables()?;
        let snapshot = Snapshot {
            schema: &self.inner.schema,
            tables: &tables,
        };
        eval::refresh_field(&snapshot, entity, identity, field)
    }

    async fn ledger_contains(&self, key: &LedgerKey) -> ViewResult<bool> {
        self.inner.stats.record_ledger_lookup();
        self.check_available()?;
        let ledger = self
            .inner
            .ledger
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(ledger.contains(key))
    }

    async fn commit(&self, batch: WriteBatch) -> ViewResult<CommitSummary> {
        self.inner.stats.record_commit();
        self.check_available()?;
        self.commit_sync(batch)
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Aspect;
    use dbview_core::{Relation, ViewError};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Crate {
        id: i64,
        label: String,
    }

    impl Entity for Crate {
        const NAME: &'static str = "crate";

        fn relations() -> Vec<Relation> {
            vec![Relation::children("slots", "slot", "crate_id")]
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Slot {
        id: i64,
        crate_id: i64,
    }

    impl Entity for Slot {
        const NAME: &'static str = "slot";
    }

    fn store() -> MemoryStore {
        MemoryStore::new(Schema::builder().entity::<Crate>().entity::<Slot>().build())
    }

    fn crate_row(id: i64, label: &str) -> Row {
        Row::from_entity(&Crate {
            id,
            label: label.to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_seed_and_get() {
        let store = store();
        store.put_entity(&Crate { id: 1, label: "a".into() }).unwrap();

        let row = store.get("crate", &Identity::single(1)).await.unwrap().unwrap();
        assert_eq!(row.decode::<Crate>().unwrap().label, "a");
        assert!(row.merged_at.is_none());
        assert!(store.get("crate", &Identity::single(2)).await.unwrap().is_none());
        assert_eq!(store.stats().gets, 2);
    }

    #[tokio::test]
    async fn test_commit_upserts_and_marks() {
        let store = store();
        let mut batch = WriteBatch::new();
        batch.merge(crate_row(1, "first"));
        batch.merge(crate_row(1, "second"));
        batch.mark(LedgerKey::new("crate", &Identity::single(1), &Aspect::Entity));
        batch.mark(LedgerKey::new("crate", &Identity::single(1), &Aspect::Entity));

        let summary = store.commit(batch).await.unwrap();
        assert_eq!(summary.rows_merged, 2);
        assert_eq!(summary.marks_inserted, 1);
        assert_eq!(summary.marks_existing, 1);
        assert_eq!(store.row_count("crate").unwrap(), 1);

        let row = store.get("crate", &Identity::single(1)).await.unwrap().unwrap();
        assert_eq!(row.column("label"), Some(&serde_json::json!("second")));
        assert!(row.merged_at.is_some());
    }

    #[tokio::test]
    async fn test_commit_with_unknown_entity_applies_nothing() {
        let store = store();
        let mut batch = WriteBatch::new();
        batch.merge(crate_row(1, "ok"));
        let mut stray = crate_row(2, "stray");
        stray.entity = "pallet".to_string();
        batch.merge(stray);
        batch.mark(LedgerKey::new("crate", &Identity::single(1), &Aspect::Entity));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, ViewError::Storage(StorageError::UnknownEntity { .. })));
        assert_eq!(store.row_count("crate").unwrap(), 0);
        assert_eq!(store.ledger_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = store();
        store.set_unavailable(true);

        let err = store.get("crate", &Identity::single(1)).await.unwrap_err();
        assert!(matches!(err, ViewError::Storage(StorageError::Unavailable { .. })));
        assert!(store.run_query(&Query::select("crate")).await.is_err());
        assert!(store.commit(WriteBatch::new()).await.is_err());

        store.set_unavailable(false);
        assert!(store.get("crate", &Identity::single(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_field_and_query() {
        let store = store();
        store.put_entity(&Crate { id: 1, label: "a".into() }).unwrap();
        for id in 0..3 {
            store.put_entity(&Slot { id, crate_id: 1 }).unwrap();
        }
        store.put_entity(&Slot { id: 9, crate_id: 2 }).unwrap();

        let slots = store
            .refresh_field("crate", &Identity::single(1), "slots")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slots.owner.identity, Identity::single(1));
        assert_eq!(slots.value.rows().len(), 3);

        let queried = store
            .run_query(&Query::select("slot").eq("crate_id", 1))
            .await
            .unwrap();
        assert_eq!(queried.len(), 3);

        let stats = store.stats();
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.queries, 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = store();
        let other = store.clone();
        other.put_entity(&Crate { id: 5, label: "shared".into() }).unwrap();

        assert_eq!(store.row_count("crate").unwrap(), 1);
        assert!(other.remove("crate", &Identity::single(5)).unwrap());
        assert_eq!(store.row_count("crate").unwrap(), 0);
    }

    proptest! {
        #[test]
        fn prop_repeated_merges_leave_one_record(
            labels in proptest::collection::vec("[a-z]{1,8}", 1..10),
            id in 0i64..1000,
        ) {
            let store = store();
            for label in &labels {
                let mut batch = WriteBatch::new();
                batch.merge(crate_row(id, label));
                store.commit_sync(batch).unwrap();
            }

            prop_assert_eq!(store.row_count("crate").unwrap(), 1);
            let tables = store.read_tables().unwrap();
            let row = tables.get("crate").and_then(|t| t.get(&Identity::single(id))).unwrap();
            prop_assert_eq!(
                row.column("label"),
                Some(&serde_json::json!(labels.last().unwrap()))
            );
        }
    }
}

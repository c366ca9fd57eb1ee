//! LMDB-backed persistent cache store.
//!
//! Uses heed to keep one named database per entity plus the staleness
//! ledger in a single memory-mapped environment, so a later process can
//! reopen the cache and work offline.
//!
//! # Layout
//!
//! - `row:<entity>`: key is the identity's storage key (`[1]`, `["abc"]`),
//!   value is `[merged_at millis: 8 bytes LE][json columns]`
//! - `_ever_loaded`: key is `entity \0 identity \0 aspect`, value is empty
//!
//! # Thread Safety
//!
//! LMDB allows one writer and many readers. Reads use read transactions,
//! each commit is one write transaction. Open one `LmdbStore` per path per
//! process and clone it; clones share the environment.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbview_core::{
    FieldRefresh, Identity, LmdbConfig, Query, Row, Schema, StorageError, ViewError, ViewResult,
};
use heed::types::{Bytes, Str, Unit};
use heed::{Database, Env, EnvOpenOptions};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::eval::{self, TableSource};
use crate::ledger::LedgerKey;
use crate::store::{CommitSummary, DataStore, StatsCounter, StoreStats, WriteBatch};

/// Name of the ledger database.
pub const LEDGER_DB: &str = "_ever_loaded";

/// Prefix of per-entity row databases.
pub const ROW_DB_PREFIX: &str = "row:";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to create a named database.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record in {db}: {reason}")]
    Corrupt { db: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) => StorageError::Serialization { reason },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<LmdbStoreError> for ViewError {
    fn from(e: LmdbStoreError) -> Self {
        ViewError::Storage(e.into())
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Database handles, created once per environment.
struct Handles {
    rows: HashMap<String, Database<Str, Bytes>>,
    ledger: Database<Str, Unit>,
}

impl Handles {
    fn table(&self, entity: &str) -> ViewResult<Database<Str, Bytes>> {
        self.rows.get(entity).copied().ok_or_else(|| {
            StorageError::UnknownEntity {
                entity: entity.to_string(),
            }
            .into()
        })
    }
}

/// Persistent store on an LMDB environment.
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    schema: Arc<Schema>,
    handles: Arc<RwLock<Option<Arc<Handles>>>>,
    stats: Arc<StatsCounter>,
}

impl LmdbStore {
    /// Open (or create) the environment described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment cannot be opened.
    pub fn open(config: &LmdbConfig, schema: Arc<Schema>) -> Result<Self, LmdbStoreError> {
        let map_size = config.map_size_bytes().ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {} MB overflows", config.map_size_mb))
        })?;
        std::fs::create_dir_all(&config.path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(config.max_dbs)
                .open(&config.path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        info!(path = %config.path.display(), map_size_mb = config.map_size_mb, "Opened LMDB store");

        Ok(Self {
            env,
            schema,
            handles: Arc::new(RwLock::new(None)),
            stats: Arc::new(StatsCounter::default()),
        })
    }

    /// Database handles, creating the databases on first use.
    fn handles(&self) -> ViewResult<Arc<Handles>> {
        if let Some(handles) = self
            .handles
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .as_ref()
        {
            return Ok(Arc::clone(handles));
        }

        let mut slot = self
            .handles
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if let Some(handles) = slot.as_ref() {
            return Ok(Arc::clone(handles));
        }

        let handles = Arc::new(self.create_databases()?);
        *slot = Some(Arc::clone(&handles));
        Ok(handles)
    }

    fn create_databases(&self) -> Result<Handles, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut rows = HashMap::new();
        for entity in self.schema.entity_names() {
            let name = format!("{ROW_DB_PREFIX}{entity}");
            let db: Database<Str, Bytes> = self
                .env
                .create_database(&mut wtxn, Some(name.as_str()))
                .map_err(|e| LmdbStoreError::DbOpen {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            rows.insert(entity.to_string(), db);
        }

        let ledger: Database<Str, Unit> = self
            .env
            .create_database(&mut wtxn, Some(LEDGER_DB))
            .map_err(|e| LmdbStoreError::DbOpen {
                name: LEDGER_DB.to_string(),
                reason: e.to_string(),
            })?;

        wtxn.commit().map_err(txn_err)?;
        debug!(tables = rows.len(), "Created LMDB databases");

        Ok(Handles { rows, ledger })
    }

    /// Number of rows stored for an entity.
    pub fn row_count(&self, entity: &str) -> ViewResult<u64> {
        let handles = self.handles()?;
        let db = handles.table(entity)?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(db.len(&rtxn).map_err(txn_err)?)
    }

    /// Number of ledger entries.
    pub fn ledger_len(&self) -> ViewResult<u64> {
        let handles = self.handles()?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(handles.ledger.len(&rtxn).map_err(txn_err)?)
    }

    fn with_reader<R>(&self, f: impl FnOnce(&Reader<'_, '_>) -> ViewResult<R>) -> ViewResult<R> {
        let handles = self.handles()?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let reader = Reader {
            schema: &self.schema,
            handles: &handles,
            rtxn: &rtxn,
        };
        f(&reader)
    }

    fn commit_sync(&self, batch: WriteBatch) -> ViewResult<CommitSummary> {
        let handles = self.handles()?;
        let (rows, marks) = batch.into_parts();
        let merged_at = Utc::now();

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut summary = CommitSummary::default();

        for row in rows {
            let db = handles.table(&row.entity)?;
            let key = row.identity.storage_key();
            let mut columns = row.columns;
            if let Some(bytes) = db.get(&wtxn, &key).map_err(txn_err)? {
                let (_, mut existing) = decode_record(&row.entity, bytes)?;
                existing.extend(columns);
                columns = existing;
            }
            let value = encode_record(merged_at, &columns)?;
            db.put(&mut wtxn, &key, &value).map_err(txn_err)?;
            summary.rows_merged += 1;
        }

        for key in marks {
            let encoded = key.encode();
            if handles.ledger.get(&wtxn, &encoded).map_err(txn_err)?.is_some() {
                summary.marks_existing += 1;
            } else {
                handles.ledger.put(&mut wtxn, &encoded, &()).map_err(txn_err)?;
                summary.marks_inserted += 1;
            }
        }

        // Dropping an uncommitted write transaction aborts it, so any error
        // above leaves the store untouched.
        wtxn.commit().map_err(txn_err)?;
        Ok(summary)
    }
}

/// `[merged_at millis: 8 bytes LE][json columns]`
fn encode_record(merged_at: DateTime<Utc>, columns: &Map<String, Value>) -> Result<Vec<u8>, LmdbStoreError> {
    let json = serde_json::to_vec(columns).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(8 + json.len());
    bytes.extend_from_slice(&merged_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

fn decode_record(entity: &str, bytes: &[u8]) -> Result<(DateTime<Utc>, Map<String, Value>), LmdbStoreError> {
    let corrupt = |reason: String| LmdbStoreError::Corrupt {
        db: format!("{ROW_DB_PREFIX}{entity}"),
        reason,
    };
    if bytes.len() < 8 {
        return Err(corrupt("record shorter than its timestamp".to_string()));
    }
    let (stamp, json) = bytes.split_at(8);
    let millis = i64::from_le_bytes(
        stamp
            .try_into()
            .map_err(|_| corrupt("invalid timestamp".to_string()))?,
    );
    let merged_at = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(format!("timestamp out of range: {millis}")))?;
    let columns = serde_json::from_slice(json).map_err(|e| corrupt(e.to_string()))?;
    Ok((merged_at, columns))
}

/// Read-transaction view used for evaluation.
struct Reader<'a, 't> {
    schema: &'a Schema,
    handles: &'a Handles,
    rtxn: &'a heed::RoTxn<'t>,
}

impl Reader<'_, '_> {
    fn to_row(&self, entity: &str, identity: Identity, bytes: &[u8]) -> ViewResult<Row> {
        let (merged_at, columns) = decode_record(entity, bytes)?;
        Ok(Row {
            entity: entity.to_string(),
            identity,
            columns,
            merged_at: Some(merged_at),
        })
    }
}

impl TableSource for Reader<'_, '_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn fetch(&self, entity: &str, identity: &Identity) -> ViewResult<Option<Row>> {
        let db = self.handles.table(entity)?;
        match db.get(self.rtxn, &identity.storage_key()).map_err(txn_err)? {
            Some(bytes) => Ok(Some(self.to_row(entity, identity.clone(), bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, entity: &str) -> ViewResult<Vec<Row>> {
        let db = self.handles.table(entity)?;
        let mut rows = Vec::new();
        for item in db.iter(self.rtxn).map_err(txn_err)? {
            let (key, bytes) = item.map_err(txn_err)?;
            let identity = Identity::from_storage_key(key).ok_or_else(|| LmdbStoreError::Corrupt {
                db: format!("{ROW_DB_PREFIX}{entity}"),
                reason: format!("invalid identity key {key}"),
            })?;
            rows.push(self.to_row(entity, identity, bytes)?);
        }
        // Keys sort as JSON text; callers expect identity order.
        rows.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(rows)
    }
}

#[async_trait]
impl DataStore for LmdbStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn ensure_schema(&self) -> ViewResult<()> {
        self.handles().map(|_| ())
    }

    async fn get(&self, entity: &str, identity: &Identity) -> ViewResult<Option<Row>> {
        self.stats.record_get();
        self.with_reader(|reader| reader.fetch(entity, identity))
    }

    async fn run_query(&self, query: &Query) -> ViewResult<Vec<Row>> {
        self.stats.record_query();
        self.with_reader(|reader| eval::run_query(reader, query))
    }

    async fn refresh_field(
        &self,
        entity: &str,
        identity: &Identity,
        field: &str,
    ) -> ViewResult<Option<FieldRefresh>> {
        self.stats.record_refresh();
        self.with_reader(|reader| eval::refresh_field(reader, entity, identity, field))
    }

    async fn ledger_contains(&self, key: &LedgerKey) -> ViewResult<bool> {
        self.stats.record_ledger_lookup();
        let handles = self.handles()?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let found = handles
            .ledger
            .get(&rtxn, &key.encode())
            .map_err(txn_err)?
            .is_some();
        Ok(found)
    }

    async fn commit(&self, batch: WriteBatch) -> ViewResult<CommitSummary> {
        self.stats.record_commit();
        self.commit_sync(batch)
    }

    fn stats(&self) -> StoreStats {
        self.stats.snapshot()
    }
}

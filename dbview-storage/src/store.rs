//! The data store adapter capability.
//!
//! A view talks to exactly two stores through this trait: the origin, which
//! is authoritative, and the cache, which also holds the staleness ledger.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dbview_core::{FieldRefresh, Identity, Query, Row, Schema, ViewResult};

use crate::ledger::LedgerKey;

/// Round-trip counters for a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: u64,
    pub queries: u64,
    pub refreshes: u64,
    pub commits: u64,
    pub ledger_lookups: u64,
}

impl StoreStats {
    /// Calls that read row data: gets, queries, and field refreshes.
    pub fn fetches(&self) -> u64 {
        self.gets + self.queries + self.refreshes
    }

    /// Every call made against the store.
    pub fn round_trips(&self) -> u64 {
        self.fetches() + self.commits + self.ledger_lookups
    }

    /// Counters accumulated since `earlier` was taken.
    pub fn since(&self, earlier: &StoreStats) -> StoreStats {
        StoreStats {
            gets: self.gets.saturating_sub(earlier.gets),
            queries: self.queries.saturating_sub(earlier.queries),
            refreshes: self.refreshes.saturating_sub(earlier.refreshes),
            commits: self.commits.saturating_sub(earlier.commits),
            ledger_lookups: self.ledger_lookups.saturating_sub(earlier.ledger_lookups),
        }
    }
}

/// Lock-free counters backing [`StoreStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    gets: AtomicU64,
    queries: AtomicU64,
    refreshes: AtomicU64,
    commits: AtomicU64,
    ledger_lookups: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ledger_lookup(&self) {
        self.ledger_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            gets: self.gets.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            ledger_lookups: self.ledger_lookups.load(Ordering::Relaxed),
        }
    }
}

/// A staged set of row upserts and ledger marks, applied by one `commit`.
///
/// Creating a batch begins the transaction; dropping it without committing
/// discards everything staged.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    rows: Vec<Row>,
    marks: Vec<LedgerKey>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an upsert by identity. A later merge of the same identity wins.
    pub fn merge(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn merge_all(&mut self, rows: impl IntoIterator<Item = Row>) {
        self.rows.extend(rows);
    }

    /// Stage an insert-if-absent ledger mark.
    pub fn mark(&mut self, key: LedgerKey) {
        self.marks.push(key);
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn marks(&self) -> &[LedgerKey] {
        &self.marks
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.marks.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Row>, Vec<LedgerKey>) {
        (self.rows, self.marks)
    }
}

/// What a commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Rows written, counting both inserts and in-place updates.
    pub rows_merged: usize,
    /// Ledger marks that did not exist before this commit.
    pub marks_inserted: usize,
    /// Ledger marks that another writer had already committed.
    pub marks_existing: usize,
}

/// Data store adapter.
///
/// Implementations must be safe to share between concurrent callers; the
/// view serializes commits but not reads.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// The schema this store maps.
    fn schema(&self) -> &Schema;

    /// Create per-entity tables and the ledger table if missing. Idempotent.
    async fn ensure_schema(&self) -> ViewResult<()>;

    /// Point lookup of one row.
    async fn get(&self, entity: &str, identity: &Identity) -> ViewResult<Option<Row>>;

    /// Run a replayable query. Rows come back ordered by identity.
    async fn run_query(&self, query: &Query) -> ViewResult<Vec<Row>>;

    /// Load the owning row and populate exactly one relation on it.
    ///
    /// Returns `None` when the owning row does not exist.
    async fn refresh_field(
        &self,
        entity: &str,
        identity: &Identity,
        field: &str,
    ) -> ViewResult<Option<FieldRefresh>>;

    /// Point lookup in the staleness ledger.
    async fn ledger_contains(&self, key: &LedgerKey) -> ViewResult<bool>;

    /// Apply a batch atomically: upsert every row, then insert missing marks.
    async fn commit(&self, batch: WriteBatch) -> ViewResult<CommitSummary>;

    /// Round-trip counters since the store was created.
    fn stats(&self) -> StoreStats;
}

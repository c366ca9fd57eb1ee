//! DBView Storage - Data Store Adapters
//!
//! The [`DataStore`] capability a view consumes for both its origin and its
//! cache, the staleness ledger kept inside the cache, and two
//! implementations: [`MemoryStore`] and the persistent [`LmdbStore`].

mod eval;
pub mod ledger;
pub mod lmdb;
pub mod memory;
pub mod store;

pub use ledger::{Aspect, LedgerKey, StalenessLedger, ENTITY_ASPECT};
pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::{in_memory_cache, MemoryStore};
pub use store::{CommitSummary, DataStore, StoreStats, WriteBatch};

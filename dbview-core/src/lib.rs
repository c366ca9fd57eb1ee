//! DBView Core - Data Types
//!
//! Pure data structures shared by every DBView crate: freshness modes,
//! identities, rows, the entity mapping, queries, configuration, and the
//! error taxonomy. This crate performs no I/O.

pub mod config;
pub mod error;
pub mod identity;
pub mod mode;
pub mod query;
pub mod row;
pub mod schema;

pub use config::{CacheLocation, LmdbConfig, ViewConfig, DEFAULT_MAP_SIZE_MB, DEFAULT_MAX_DBS};
pub use error::{
    ConfigError, LifecycleError, LivePhase, MappingError, NotLiveError, StorageError, ViewError,
    ViewResult,
};
pub use identity::{Identity, IdentityValue};
pub use mode::{Mode, ModeParseError};
pub use query::{Filter, Query};
pub use row::{FieldRef, FieldRefresh, FieldValue, Row};
pub use schema::{Entity, EntityDef, Relation, RelationKind, Schema, SchemaBuilder};

//! DBView Engine - Read-Through Object Cache
//!
//! A [`DbView`] sits between application code and an authoritative origin
//! store, materializing what it reads into a local cache store and deciding
//! per call whether the origin must be contacted:
//!
//! - [`Mode::Freshen`] always reads the origin and merges the result.
//! - [`Mode::PreferCache`] answers from the cache anything fetched before.
//! - [`Mode::Offline`] never contacts the origin; unfetched reads fail with
//!   `IsOffline` or return the caller's fallback.
//!
//! Reads return [`Handle`]s that stay reference-equal for the same row
//! while the view is open, and become unusable once it closes.
//!
//! ```ignore
//! let view = DbView::builder(schema).origin(origin).build()?;
//! view.open().await?;
//! let parent = view.load::<Parent>(1, LoadOptions::default()).await?;
//! let children = parent.relation::<Child>("children", LoadOptions::default()).await?;
//! view.close().await?;
//! ```

mod handle;
mod lifecycle;
mod load;
mod options;
mod registry;
mod view;

pub use handle::{FieldSlot, Handle};
pub use lifecycle::Phase;
pub use options::{LoadOptions, OfflineFallback};
pub use registry::Wrapped;
pub use view::{DbView, DbViewBuilder};

pub use dbview_core::{
    CacheLocation, Entity, Identity, IdentityValue, LmdbConfig, Mode, Query, Relation, Schema,
    ViewConfig, ViewError, ViewResult,
};
pub use dbview_storage::{DataStore, LmdbStore, MemoryStore, StoreStats};

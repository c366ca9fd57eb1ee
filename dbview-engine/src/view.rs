//! The view: a session over one cache store and one origin.

use std::sync::{Arc, Weak};

use dbview_core::{
    CacheLocation, ConfigError, Entity, Identity, LifecycleError, LivePhase, Mode, NotLiveError,
    Query, Schema, ViewConfig, ViewResult,
};
use dbview_storage::{in_memory_cache, DataStore, LmdbStore, StalenessLedger};
use tokio::sync::Mutex;
use tracing::info;

use crate::handle::Handle;
use crate::lifecycle::{Phase, PhaseCell};
use crate::options::LoadOptions;
use crate::registry::Registry;

pub(crate) struct ViewInner {
    pub(crate) me: Weak<ViewInner>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) cache: Arc<dyn DataStore>,
    pub(crate) origin: Option<Arc<dyn DataStore>>,
    pub(crate) mode: Mode,
    pub(crate) ledger: StalenessLedger,
    pub(crate) registry: Registry,
    /// Serializes the open sequence and every merge-and-mark commit.
    pub(crate) guard: Mutex<()>,
    phase: PhaseCell,
}

impl std::fmt::Debug for ViewInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewInner")
            .field("mode", &self.mode)
            .field("phase", &self.phase.get())
            .field("has_origin", &self.origin.is_some())
            .finish()
    }
}

impl ViewInner {
    pub(crate) fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub(crate) fn ensure_open(&self, subject: &str) -> Result<(), NotLiveError> {
        self.phase.get().ensure_open(subject)
    }

    /// The origin store. Only reachable when the effective mode allows it.
    pub(crate) fn origin(&self) -> ViewResult<&Arc<dyn DataStore>> {
        self.origin.as_ref().ok_or_else(|| {
            ConfigError::OriginRequired {
                mode: self.mode.to_string(),
            }
            .into()
        })
    }
}

/// A read-through object cache session.
///
/// Opened once, closed once. Handles it returns are valid only while it is
/// open. Cloning shares the session.
#[derive(Debug, Clone)]
pub struct DbView {
    inner: Arc<ViewInner>,
}

impl DbView {
    pub fn builder(schema: Arc<Schema>) -> DbViewBuilder {
        DbViewBuilder {
            schema,
            cache: None,
            origin: None,
            mode: Mode::default(),
        }
    }

    /// Build a view from configuration, opening an LMDB cache if configured.
    pub fn from_config(
        schema: Arc<Schema>,
        config: &ViewConfig,
        origin: Option<Arc<dyn DataStore>>,
    ) -> ViewResult<Self> {
        let cache: Arc<dyn DataStore> = match &config.cache {
            CacheLocation::InMemory => in_memory_cache(Arc::clone(&schema)),
            CacheLocation::Lmdb(lmdb) => Arc::new(LmdbStore::open(lmdb, Arc::clone(&schema))?),
        };
        let mut builder = Self::builder(schema).cache(cache).mode(config.mode);
        if let Some(origin) = origin {
            builder = builder.origin(origin);
        }
        builder.build()
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase()
    }

    pub fn is_open(&self) -> bool {
        self.inner.phase() == Phase::Opened
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    pub fn cache(&self) -> &Arc<dyn DataStore> {
        &self.inner.cache
    }

    pub fn origin(&self) -> Option<&Arc<dyn DataStore>> {
        self.inner.origin.as_ref()
    }

    /// Number of distinct records wrapped so far in this open window.
    pub fn wrapped_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Create the cache schema and start the open window.
    ///
    /// A closed view cannot be reopened.
    pub async fn open(&self) -> ViewResult<()> {
        self.check_openable()?;
        let _guard = self.inner.guard.lock().await;
        self.check_openable()?;

        self.inner.cache.ensure_schema().await?;
        self.inner.phase.set(Phase::Opened);

        info!(
            mode = %self.inner.mode,
            entities = self.inner.schema.len(),
            offline = self.inner.origin.is_none(),
            "DbView opened"
        );
        Ok(())
    }

    /// End the open window. Every handle becomes unusable.
    pub async fn close(&self) -> ViewResult<()> {
        let _guard = self.inner.guard.lock().await;
        self.inner.ensure_open("DbView::close")?;
        self.inner.phase.set(Phase::Closed);

        let released = self.inner.registry.clear();
        info!(handles = released, "DbView closed");
        Ok(())
    }

    fn check_openable(&self) -> ViewResult<()> {
        match self.inner.phase() {
            Phase::Unopened => Ok(()),
            Phase::Opened => Err(LifecycleError::AlreadyOpen.into()),
            Phase::Closed => Err(NotLiveError::new("DbView::open", LivePhase::TooLate).into()),
        }
    }

    /// Load one row by identity.
    pub async fn load<T: Entity>(
        &self,
        identity: impl Into<Identity>,
        options: LoadOptions<Handle<T>>,
    ) -> ViewResult<Handle<T>> {
        self.inner
            .load_entity::<T>(identity.into(), options.mode)
            .await?
            .or_fallback(options.fallback)
    }

    /// Load the rows a query selects, tracked under `tag` for `context`.
    ///
    /// A later call with the same tag and context can be answered from the
    /// cache by re-running `query` there.
    pub async fn load_query<T: Entity>(
        &self,
        tag: &str,
        context: impl Into<Identity>,
        query: &Query,
        options: LoadOptions<Vec<Handle<T>>>,
    ) -> ViewResult<Vec<Handle<T>>> {
        self.inner
            .load_query::<T>(tag, &context.into(), query, options.mode)
            .await?
            .or_fallback(options.fallback)
    }
}

/// Builder for [`DbView`].
pub struct DbViewBuilder {
    schema: Arc<Schema>,
    cache: Option<Arc<dyn DataStore>>,
    origin: Option<Arc<dyn DataStore>>,
    mode: Mode,
}

impl DbViewBuilder {
    /// Cache store; defaults to a fresh in-memory store.
    pub fn cache(mut self, cache: Arc<dyn DataStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Origin store; may be omitted only in offline mode.
    pub fn origin(mut self, origin: Arc<dyn DataStore>) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> ViewResult<DbView> {
        if self.origin.is_none() && self.mode != Mode::Offline {
            return Err(ConfigError::OriginRequired {
                mode: self.mode.to_string(),
            }
            .into());
        }

        let cache = self
            .cache
            .unwrap_or_else(|| in_memory_cache(Arc::clone(&self.schema)));
        let ledger = StalenessLedger::new(Arc::clone(&cache));

        let inner = Arc::new_cyclic(|me| ViewInner {
            me: me.clone(),
            schema: self.schema,
            cache,
            origin: self.origin,
            mode: self.mode,
            ledger,
            registry: Registry::default(),
            guard: Mutex::new(()),
            phase: PhaseCell::new(),
        });
        Ok(DbView { inner })
    }
}

//! Identity-stable handles over cached rows.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dbview_core::{Entity, FieldRef, Identity, LivePhase, NotLiveError, ViewResult};
use serde_json::Value;

use crate::load::Outcome;
use crate::options::LoadOptions;
use crate::registry::Node;
use crate::view::ViewInner;

/// Load state of a relation on a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSlot {
    Unloaded,
    /// Loaded during this open window; holds the related identities.
    Loaded(FieldRef),
}

impl FieldSlot {
    pub fn is_loaded(&self) -> bool {
        matches!(self, FieldSlot::Loaded(_))
    }
}

/// Handle for one cached row of `T`, owned by the view that produced it.
///
/// Every access checks that the view is still open.
pub struct Handle<T> {
    node: Arc<Node>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("entity", &self.node.entity)
            .field("identity", &self.node.identity)
            .finish()
    }
}

impl<T: Entity> Handle<T> {
    pub(crate) fn from_node(node: Arc<Node>) -> Self {
        Self {
            node,
            _entity: PhantomData,
        }
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    fn subject() -> String {
        format!("Handle<{}>", T::NAME)
    }

    /// The owning view, if it is open.
    fn live_view(&self) -> ViewResult<Arc<ViewInner>> {
        let view = self
            .node
            .view
            .upgrade()
            .ok_or_else(|| NotLiveError::new(Self::subject(), LivePhase::TooLate))?;
        view.ensure_open(&Self::subject())?;
        Ok(view)
    }

    /// Decode the current snapshot.
    pub fn get(&self) -> ViewResult<T> {
        self.live_view()?;
        Ok(self.node.row()?.decode::<T>()?)
    }

    pub fn column(&self, name: &str) -> ViewResult<Option<Value>> {
        self.live_view()?;
        self.node.column(name)
    }

    pub fn identity(&self) -> ViewResult<&Identity> {
        self.live_view()?;
        Ok(&self.node.identity)
    }

    /// When the cache last merged this row.
    pub fn merged_at(&self) -> ViewResult<Option<DateTime<Utc>>> {
        self.live_view()?;
        Ok(self.node.row()?.merged_at)
    }

    pub fn slot(&self, field: &str) -> ViewResult<FieldSlot> {
        self.live_view()?;
        self.node.slot(field)
    }

    /// True if both handles wrap the same record of the same view.
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Load a list-valued relation.
    pub async fn relation<C: Entity>(
        &self,
        field: &str,
        options: LoadOptions<Vec<Handle<C>>>,
    ) -> ViewResult<Vec<Handle<C>>> {
        let view = self.live_view()?;
        match view.load_field::<C>(&self.node, field, true, options.mode).await? {
            Outcome::Ready(wrapped) => wrapped.into_many(field),
            Outcome::Offline(what) => options.fallback.resolve(what),
        }
    }

    /// Load a single-valued relation; `None` when nothing is related.
    pub async fn related<C: Entity>(
        &self,
        field: &str,
        options: LoadOptions<Option<Handle<C>>>,
    ) -> ViewResult<Option<Handle<C>>> {
        let view = self.live_view()?;
        match view.load_field::<C>(&self.node, field, false, options.mode).await? {
            Outcome::Ready(wrapped) => wrapped.into_one(field),
            Outcome::Offline(what) => options.fallback.resolve(what),
        }
    }

    /// Load a single reference by the id stored in `id_column`.
    ///
    /// This delegates to a load by identity of the referenced row. It reads
    /// `id_column` from this handle's snapshot, so a reference moved at the
    /// origin is only seen after this row itself is reloaded.
    pub async fn reference<P: Entity>(
        &self,
        field: &str,
        id_column: &str,
        options: LoadOptions<Option<Handle<P>>>,
    ) -> ViewResult<Option<Handle<P>>> {
        let view = self.live_view()?;
        view.load_reference::<P>(&self.node, field, id_column, options.mode)
            .await?
            .or_fallback(options.fallback)
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl<T> Eq for Handle<T> {}

//! The load engine.
//!
//! Every entry point runs the same protocol:
//!
//! 1. Field loads first check the handle's slot: a relation loaded earlier
//!    in this open window is rebuilt from the registry with no I/O.
//! 2. Unless the effective mode is `Freshen`, a ledger hit is answered by
//!    re-reading the cache. Offline with no ledger entry yields
//!    [`Outcome::Offline`], which the caller turns into its fallback.
//! 3. Otherwise the origin is read, the rows are merged and the ledger is
//!    marked in one commit under the view's guard, and the answer is
//!    re-read from the cache.

use std::sync::Arc;

use dbview_core::{
    Entity, FieldRef, FieldValue, Identity, IdentityValue, MappingError, Mode, Query, Row,
    StorageError, ViewResult,
};
use dbview_storage::{Aspect, WriteBatch};
use serde_json::Value;
use tracing::{debug, warn};

use crate::handle::{FieldSlot, Handle};
use crate::options::OfflineFallback;
use crate::registry::{Node, Wrapped};
use crate::view::ViewInner;

/// Result of the protocol before the caller's fallback is applied.
#[derive(Debug)]
pub(crate) enum Outcome<R> {
    Ready(R),
    /// Offline and never fetched; carries a description of what was asked for.
    Offline(String),
}

impl<R> Outcome<R> {
    pub(crate) fn or_fallback(self, fallback: OfflineFallback<R>) -> ViewResult<R> {
        match self {
            Outcome::Ready(value) => Ok(value),
            Outcome::Offline(what) => fallback.resolve(what),
        }
    }

    fn map<S>(self, f: impl FnOnce(R) -> S) -> Outcome<S> {
        match self {
            Outcome::Ready(value) => Outcome::Ready(f(value)),
            Outcome::Offline(what) => Outcome::Offline(what),
        }
    }
}

/// Stage-2 decision for one aspect.
enum CacheCheck {
    /// The ledger has it; answer from the cache.
    Hit,
    /// Offline and never fetched.
    Offline,
    /// Go to the origin. `looked_up` is true if the ledger said "never".
    Fetch { looked_up: bool },
}

impl ViewInner {
    async fn check_cache(
        &self,
        mode: Mode,
        entity: &str,
        identity: &Identity,
        aspect: &Aspect,
    ) -> ViewResult<CacheCheck> {
        if !mode.allows_cache() {
            return Ok(CacheCheck::Fetch { looked_up: false });
        }
        if self.ledger.exists(entity, identity, aspect).await? {
            return Ok(CacheCheck::Hit);
        }
        if mode.allows_origin() {
            Ok(CacheCheck::Fetch { looked_up: true })
        } else {
            Ok(CacheCheck::Offline)
        }
    }

    /// Merge rows and mark the aspect in one guarded commit.
    async fn merge_and_mark(
        &self,
        rows: Vec<Row>,
        entity: &str,
        identity: &Identity,
        aspect: &Aspect,
        looked_up: bool,
    ) -> ViewResult<()> {
        let mut batch = WriteBatch::new();
        batch.merge_all(rows);
        self.ledger.stage(&mut batch, entity, identity, aspect);

        let _guard = self.guard.lock().await;
        self.ensure_open("DbView::merge")?;
        let summary = self.cache.commit(batch).await?;

        if looked_up && summary.marks_existing > 0 {
            warn!(
                entity,
                identity = %identity,
                aspect = aspect.tag(),
                "Ledger mark raced with another writer"
            );
        }
        debug!(
            entity,
            identity = %identity,
            aspect = aspect.tag(),
            rows = summary.rows_merged,
            "Merged into cache"
        );
        Ok(())
    }

    pub(crate) async fn load_entity<T: Entity>(
        &self,
        identity: Identity,
        limit: Option<Mode>,
    ) -> ViewResult<Outcome<Handle<T>>> {
        self.ensure_open("DbView::load")?;
        let mode = Mode::effective(self.mode, limit);
        let aspect = Aspect::Entity;

        let looked_up = match self.check_cache(mode, T::NAME, &identity, &aspect).await? {
            CacheCheck::Hit => {
                if let Some(row) = self.cache.get(T::NAME, &identity).await? {
                    debug!(entity = T::NAME, identity = %identity, aspect = aspect.tag(), stage = "cache", "Loaded");
                    return Ok(Outcome::Ready(self.registry.wrap(&self.me, row)?));
                }
                // Marked but absent: treat as never fetched.
                if !mode.allows_origin() {
                    return Ok(self.offline(T::NAME, &identity, &aspect));
                }
                true
            }
            CacheCheck::Offline => return Ok(self.offline(T::NAME, &identity, &aspect)),
            CacheCheck::Fetch { looked_up } => looked_up,
        };

        let row = self
            .origin()?
            .get(T::NAME, &identity)
            .await?
            .ok_or_else(|| not_found(T::NAME, &identity))?;
        debug!(entity = T::NAME, identity = %identity, aspect = aspect.tag(), stage = "origin", "Loaded");
        self.merge_and_mark(vec![row], T::NAME, &identity, &aspect, looked_up)
            .await?;

        let row = self
            .cache
            .get(T::NAME, &identity)
            .await?
            .ok_or_else(|| not_found(T::NAME, &identity))?;
        Ok(Outcome::Ready(self.registry.wrap(&self.me, row)?))
    }

    pub(crate) async fn load_query<T: Entity>(
        &self,
        tag: &str,
        context: &Identity,
        query: &Query,
        limit: Option<Mode>,
    ) -> ViewResult<Outcome<Vec<Handle<T>>>> {
        self.ensure_open("DbView::load_query")?;
        if query.entity != T::NAME {
            return Err(MappingError::TargetMismatch {
                field: tag.to_string(),
                expected: query.entity.clone(),
                requested: T::NAME.to_string(),
            }
            .into());
        }
        let mode = Mode::effective(self.mode, limit);
        let aspect = Aspect::query(tag);

        match self.check_cache(mode, T::NAME, context, &aspect).await? {
            CacheCheck::Hit => {
                debug!(entity = T::NAME, identity = %context, aspect = tag, stage = "cache", "Loaded");
                self.query_cache::<T>(query).await.map(Outcome::Ready)
            }
            CacheCheck::Offline => Ok(self.offline(T::NAME, context, &aspect)),
            CacheCheck::Fetch { looked_up } => {
                let rows = self.origin()?.run_query(query).await?;
                debug!(
                    entity = T::NAME,
                    identity = %context,
                    aspect = tag,
                    stage = "origin",
                    rows = rows.len(),
                    "Loaded"
                );
                self.merge_and_mark(rows, T::NAME, context, &aspect, looked_up)
                    .await?;
                self.query_cache::<T>(query).await.map(Outcome::Ready)
            }
        }
    }

    async fn query_cache<T: Entity>(&self, query: &Query) -> ViewResult<Vec<Handle<T>>> {
        self.cache
            .run_query(query)
            .await?
            .into_iter()
            .map(|row| self.registry.wrap(&self.me, row))
            .collect()
    }

    pub(crate) async fn load_field<C: Entity>(
        &self,
        node: &Arc<Node>,
        field: &str,
        many: bool,
        limit: Option<Mode>,
    ) -> ViewResult<Outcome<Wrapped<C>>> {
        let relation = self.schema.require_relation(&node.entity, field)?;
        check_target::<C>(field, &relation.target)?;
        if relation.is_many() != many {
            let declared = if relation.is_many() { "list" } else { "single" };
            return Err(MappingError::CardinalityMismatch {
                field: field.to_string(),
                declared: declared.to_string(),
            }
            .into());
        }

        let identity = &node.identity;
        let aspect = Aspect::field(field);

        if let FieldSlot::Loaded(loaded) = node.slot(field)? {
            if let Some(wrapped) = self.registry.resolve::<C>(&loaded)? {
                debug!(entity = %node.entity, identity = %identity, aspect = field, stage = "loaded", "Loaded");
                return Ok(Outcome::Ready(wrapped));
            }
        }

        let mode = Mode::effective(self.mode, limit);
        let looked_up = match self.check_cache(mode, &node.entity, identity, &aspect).await? {
            CacheCheck::Hit => {
                if let Some(refreshed) = self.cache.refresh_field(&node.entity, identity, field).await? {
                    debug!(entity = %node.entity, identity = %identity, aspect = field, stage = "cache", "Loaded");
                    return self.wrap_field(node, field, refreshed.value).map(Outcome::Ready);
                }
                if !mode.allows_origin() {
                    return Ok(self.offline(&node.entity, identity, &aspect));
                }
                true
            }
            CacheCheck::Offline => return Ok(self.offline(&node.entity, identity, &aspect)),
            CacheCheck::Fetch { looked_up } => looked_up,
        };

        let fetched = self
            .origin()?
            .refresh_field(&node.entity, identity, field)
            .await?
            .ok_or_else(|| not_found(&node.entity, identity))?;
        debug!(
            entity = %node.entity,
            identity = %identity,
            aspect = field,
            stage = "origin",
            rows = fetched.value.rows().len(),
            "Loaded"
        );
        // Parent targets resolve through the owner's key column; merge the owner too.
        let owns_key = relation.is_parent();
        let mut rows = fetched.value.into_rows();
        if owns_key {
            rows.push(fetched.owner);
        }
        self.merge_and_mark(rows, &node.entity, identity, &aspect, looked_up)
            .await?;

        let refreshed = self
            .cache
            .refresh_field(&node.entity, identity, field)
            .await?
            .ok_or_else(|| not_found(&node.entity, identity))?;
        if owns_key {
            node.refresh(refreshed.owner)?;
        }
        self.wrap_field(node, field, refreshed.value).map(Outcome::Ready)
    }

    fn wrap_field<C: Entity>(&self, node: &Node, field: &str, value: FieldValue) -> ViewResult<Wrapped<C>> {
        let wrapped = self.registry.wrap_many::<C>(&self.me, value)?;
        node.set_slot(field, wrapped.refs())?;
        Ok(wrapped)
    }

    /// Load the row `id_column` points at by delegating to a load by identity.
    ///
    /// Assumes rows are never reparented: the id is read from the cached
    /// snapshot of `node`, so with a cache-allowing mode a reference moved
    /// at the origin keeps resolving to the old target until `node` itself
    /// is reloaded under `Freshen`.
    pub(crate) async fn load_reference<P: Entity>(
        &self,
        node: &Arc<Node>,
        field: &str,
        id_column: &str,
        limit: Option<Mode>,
    ) -> ViewResult<Outcome<Option<Handle<P>>>> {
        let relation = self.schema.require_relation(&node.entity, field)?;
        check_target::<P>(field, &relation.target)?;
        if relation.is_many() {
            return Err(MappingError::CardinalityMismatch {
                field: field.to_string(),
                declared: "list".to_string(),
            }
            .into());
        }

        let target = match node.column(id_column)? {
            None | Some(Value::Null) => {
                node.set_slot(field, FieldRef::One(None))?;
                return Ok(Outcome::Ready(None));
            }
            Some(value) => Identity::single(IdentityValue::from_json(&value).ok_or_else(|| {
                MappingError::InvalidKey {
                    column: id_column.to_string(),
                    value: value.to_string(),
                }
            })?),
        };

        if let FieldSlot::Loaded(FieldRef::One(Some(loaded))) = node.slot(field)? {
            if loaded == target {
                if let Some(handle) = self.registry.lookup::<P>(&target)? {
                    debug!(entity = %node.entity, identity = %node.identity, aspect = field, stage = "loaded", "Loaded");
                    return Ok(Outcome::Ready(Some(handle)));
                }
            }
        }

        let outcome = self.load_entity::<P>(target.clone(), limit).await?;
        if let Outcome::Ready(_) = outcome {
            node.set_slot(field, FieldRef::One(Some(target)))?;
        }
        Ok(outcome.map(Some))
    }

    fn offline<R>(&self, entity: &str, identity: &Identity, aspect: &Aspect) -> Outcome<R> {
        debug!(entity, identity = %identity, aspect = aspect.tag(), stage = "fallback", "Offline and not cached");
        let what = match aspect {
            Aspect::Entity => format!("{}#{}", entity, identity),
            Aspect::Field(name) => format!("{}#{}.{}", entity, identity, name),
            Aspect::Query(tag) => format!("{} using {} query for {}", entity, tag, identity),
        };
        Outcome::Offline(what)
    }
}

fn check_target<C: Entity>(field: &str, target: &str) -> ViewResult<()> {
    if target != C::NAME {
        return Err(MappingError::TargetMismatch {
            field: field.to_string(),
            expected: target.to_string(),
            requested: C::NAME.to_string(),
        }
        .into());
    }
    Ok(())
}

fn not_found(entity: &str, identity: &Identity) -> StorageError {
    StorageError::NotFound {
        entity: entity.to_string(),
        identity: identity.ledger_key(),
    }
}

//! Identity wrapper registry.
//!
//! A side-table from `(entity, identity)` to the node behind every handle
//! the view has given out. Wrapping the same row twice yields the same node,
//! so handles compare reference-equal for the whole open window. The table
//! is owned by the view and emptied on close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use dbview_core::{
    Entity, FieldRef, FieldValue, Identity, MappingError, Row, StorageError, ViewResult,
};
use serde_json::Value;

use crate::handle::{FieldSlot, Handle};
use crate::view::ViewInner;

/// Shared state behind every handle for one row.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) view: Weak<ViewInner>,
    pub(crate) entity: String,
    pub(crate) identity: Identity,
    state: RwLock<NodeState>,
}

#[derive(Debug)]
struct NodeState {
    row: Row,
    slots: HashMap<String, FieldRef>,
}

impl Node {
    fn new(view: Weak<ViewInner>, row: Row) -> Self {
        Self {
            view,
            entity: row.entity.clone(),
            identity: row.identity.clone(),
            state: RwLock::new(NodeState {
                row,
                slots: HashMap::new(),
            }),
        }
    }

    pub(crate) fn row(&self) -> ViewResult<Row> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.row.clone())
    }

    pub(crate) fn column(&self, name: &str) -> ViewResult<Option<Value>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.row.column(name).cloned())
    }

    /// Replace the column snapshot after a cache re-read. Loaded slots stay.
    ///
    /// A row merged earlier than the current snapshot is ignored, so a slow
    /// reader cannot roll back a newer merge.
    pub(crate) fn refresh(&self, row: Row) -> ViewResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if is_older(&row, &state.row) {
            return Ok(());
        }
        state.row = row;
        Ok(())
    }

    pub(crate) fn slot(&self, field: &str) -> ViewResult<FieldSlot> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(match state.slots.get(field) {
            Some(loaded) => FieldSlot::Loaded(loaded.clone()),
            None => FieldSlot::Unloaded,
        })
    }

    pub(crate) fn set_slot(&self, field: &str, loaded: FieldRef) -> ViewResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.slots.insert(field.to_string(), loaded);
        Ok(())
    }
}

fn is_older(candidate: &Row, current: &Row) -> bool {
    match (candidate.merged_at, current.merged_at) {
        (Some(candidate), Some(current)) => candidate < current,
        _ => false,
    }
}

/// Wrapped records, keeping the cardinality of what was read.
#[derive(Debug)]
pub enum Wrapped<T> {
    One(Option<Handle<T>>),
    Many(Vec<Handle<T>>),
}

impl<T: Entity> Wrapped<T> {
    /// Identities behind the handles, for recording a loaded slot.
    pub(crate) fn refs(&self) -> FieldRef {
        match self {
            Wrapped::One(handle) => FieldRef::One(handle.as_ref().map(|h| h.node().identity.clone())),
            Wrapped::Many(handles) => {
                FieldRef::Many(handles.iter().map(|h| h.node().identity.clone()).collect())
            }
        }
    }

    pub fn into_one(self, field: &str) -> ViewResult<Option<Handle<T>>> {
        match self {
            Wrapped::One(handle) => Ok(handle),
            Wrapped::Many(_) => Err(MappingError::CardinalityMismatch {
                field: field.to_string(),
                declared: "list".to_string(),
            }
            .into()),
        }
    }

    pub fn into_many(self, field: &str) -> ViewResult<Vec<Handle<T>>> {
        match self {
            Wrapped::Many(handles) => Ok(handles),
            Wrapped::One(_) => Err(MappingError::CardinalityMismatch {
                field: field.to_string(),
                declared: "single".to_string(),
            }
            .into()),
        }
    }
}

type RegistryKey = (String, Identity);

#[derive(Debug, Default)]
pub(crate) struct Registry {
    nodes: Mutex<HashMap<RegistryKey, Arc<Node>>>,
}

impl Registry {
    /// Return the handle already attached to this row, or attach a new one.
    ///
    /// An existing handle picks up the row's current columns.
    pub(crate) fn wrap<T: Entity>(&self, view: &Weak<ViewInner>, row: Row) -> ViewResult<Handle<T>> {
        if row.entity != T::NAME {
            return Err(MappingError::TargetMismatch {
                field: format!("{}#{}", row.entity, row.identity),
                expected: row.entity.clone(),
                requested: T::NAME.to_string(),
            }
            .into());
        }

        let node = {
            let mut nodes = self.nodes.lock().map_err(|_| StorageError::LockPoisoned)?;
            let key = (row.entity.clone(), row.identity.clone());
            if let Some(node) = nodes.get(&key) {
                Arc::clone(node)
            } else {
                let node = Arc::new(Node::new(view.clone(), row));
                nodes.insert(key, Arc::clone(&node));
                return Ok(Handle::from_node(node));
            }
        };

        node.refresh(row)?;
        Ok(Handle::from_node(node))
    }

    /// Wrap a relation read, keeping its cardinality.
    pub(crate) fn wrap_many<T: Entity>(
        &self,
        view: &Weak<ViewInner>,
        value: FieldValue,
    ) -> ViewResult<Wrapped<T>> {
        match value {
            FieldValue::One(row) => Ok(Wrapped::One(
                row.map(|row| self.wrap(view, row)).transpose()?,
            )),
            FieldValue::Many(rows) => Ok(Wrapped::Many(
                rows.into_iter()
                    .map(|row| self.wrap(view, row))
                    .collect::<ViewResult<_>>()?,
            )),
        }
    }

    pub(crate) fn lookup<T: Entity>(&self, identity: &Identity) -> ViewResult<Option<Handle<T>>> {
        let nodes = self.nodes.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(nodes
            .get(&(T::NAME.to_string(), identity.clone()))
            .map(|node| Handle::from_node(Arc::clone(node))))
    }

    /// Rebuild wrapped handles for a loaded slot without I/O.
    ///
    /// Returns `None` if any referenced node is no longer registered.
    pub(crate) fn resolve<T: Entity>(&self, loaded: &FieldRef) -> ViewResult<Option<Wrapped<T>>> {
        match loaded {
            FieldRef::One(None) => Ok(Some(Wrapped::One(None))),
            FieldRef::One(Some(identity)) => {
                Ok(self.lookup::<T>(identity)?.map(|h| Wrapped::One(Some(h))))
            }
            FieldRef::Many(identities) => {
                let mut handles = Vec::with_capacity(identities.len());
                for identity in identities {
                    match self.lookup::<T>(identity)? {
                        Some(handle) => handles.push(handle),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Wrapped::Many(handles)))
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Disown every node. Returns how many were registered.
    pub(crate) fn clear(&self) -> usize {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        let released = nodes.len();
        nodes.clear();
        released
    }
}

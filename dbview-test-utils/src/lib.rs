//! DBView Test Utilities
//!
//! Shared test infrastructure for the DBView workspace:
//! - A family schema (parent, child, grandchild) plus a one-to-one pair
//! - Seeded origin stores for common scenarios
//! - Proptest generators for modes, identities, and family shapes
//! - Custom assertions for lifecycle and offline validation

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

pub use dbview_core::{
    Entity, Identity, IdentityValue, LmdbConfig, Mode, Query, Relation, Schema, ViewError,
    ViewResult,
};
pub use dbview_storage::{DataStore, LmdbStore, MemoryStore, StoreStats};

// ============================================================================
// FAMILY SCHEMA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent {
    pub id: i64,
    pub name: String,
}

impl Entity for Parent {
    const NAME: &'static str = "parent";

    fn relations() -> Vec<Relation> {
        vec![Relation::children("children", Child::NAME, "parent_id")]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
}

impl Entity for Child {
    const NAME: &'static str = "child";

    fn relations() -> Vec<Relation> {
        vec![
            Relation::parent("parent", Parent::NAME, "parent_id"),
            Relation::children("grandchildren", Grandchild::NAME, "child_id"),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grandchild {
    pub id: i64,
    pub child_id: i64,
    pub name: String,
}

impl Entity for Grandchild {
    const NAME: &'static str = "grandchild";

    fn relations() -> Vec<Relation> {
        vec![Relation::parent("child", Child::NAME, "child_id")]
    }
}

/// One side of a one-to-one pair; a person may have no passport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
}

impl Entity for Person {
    const NAME: &'static str = "person";

    fn relations() -> Vec<Relation> {
        vec![Relation::child("passport", Passport::NAME, "person_id")]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passport {
    pub id: i64,
    pub person_id: i64,
    pub number: String,
}

impl Entity for Passport {
    const NAME: &'static str = "passport";

    fn relations() -> Vec<Relation> {
        vec![Relation::parent("person", Person::NAME, "person_id")]
    }
}

/// Schema holding every fixture entity.
pub fn family_schema() -> Arc<Schema> {
    Schema::builder()
        .entity::<Parent>()
        .entity::<Child>()
        .entity::<Grandchild>()
        .entity::<Person>()
        .entity::<Passport>()
        .build()
}

/// All grandchildren of one parent, across every child.
pub fn grandchildren_of(parent_id: i64) -> Query {
    Query::select(Grandchild::NAME).in_query(
        "child_id",
        Query::select(Child::NAME).eq("parent_id", parent_id),
    )
}

pub fn children_of(parent_id: i64) -> Query {
    Query::select(Child::NAME).eq("parent_id", parent_id)
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// Size of a seeded family. Ids are dense and deterministic.
    ///
    /// Parents are numbered from 1. Children are numbered from 0 across all
    /// parents in order. The last child of every parent has no grandchildren,
    /// so empty relations are always present when a parent has children.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FamilyShape {
        pub parents: i64,
        pub children_per_parent: i64,
        pub grandchildren_per_child: i64,
    }

    impl FamilyShape {
        /// One parent with children c0, c1, c2 and no grandchildren.
        pub fn single_parent() -> Self {
            Self {
                parents: 1,
                children_per_parent: 3,
                grandchildren_per_child: 0,
            }
        }

        /// Two parents of four children each; each child but the last has two grandchildren.
        pub fn three_level() -> Self {
            Self {
                parents: 2,
                children_per_parent: 4,
                grandchildren_per_child: 2,
            }
        }

        pub fn parent_ids(&self) -> Vec<i64> {
            (1..=self.parents).collect()
        }

        pub fn child_ids(&self, parent_id: i64) -> Vec<i64> {
            let first = (parent_id - 1) * self.children_per_parent;
            (first..first + self.children_per_parent).collect()
        }

        pub fn grandchild_ids(&self, child_id: i64) -> Vec<i64> {
            if self.is_last_child(child_id) {
                return Vec::new();
            }
            let first = child_id * self.grandchildren_per_child;
            (first..first + self.grandchildren_per_child).collect()
        }

        /// Grandchildren under one parent.
        pub fn grandchild_count(&self, parent_id: i64) -> usize {
            self.child_ids(parent_id)
                .into_iter()
                .map(|child| self.grandchild_ids(child).len())
                .sum()
        }

        fn is_last_child(&self, child_id: i64) -> bool {
            (child_id + 1) % self.children_per_parent == 0
        }

        pub fn parent(&self, id: i64) -> Parent {
            Parent {
                id,
                name: format!("p{}", id),
            }
        }

        pub fn child(&self, id: i64) -> Child {
            Child {
                id,
                parent_id: id / self.children_per_parent + 1,
                name: format!("c{}", id),
            }
        }

        pub fn grandchild(&self, id: i64) -> Grandchild {
            let child_id = id / self.grandchildren_per_child.max(1);
            Grandchild {
                id,
                child_id,
                name: format!("c{}.g{}", child_id, id % self.grandchildren_per_child.max(1)),
            }
        }
    }

    /// Write every row of `shape` into `store`.
    pub fn seed_family(store: &MemoryStore, shape: &FamilyShape) -> ViewResult<()> {
        for parent_id in shape.parent_ids() {
            store.put_entity(&shape.parent(parent_id))?;
            for child_id in shape.child_ids(parent_id) {
                store.put_entity(&shape.child(child_id))?;
                for grandchild_id in shape.grandchild_ids(child_id) {
                    store.put_entity(&shape.grandchild(grandchild_id))?;
                }
            }
        }
        Ok(())
    }

    /// An origin store seeded with `shape`.
    pub fn family_origin(shape: &FamilyShape) -> ViewResult<MemoryStore> {
        let origin = MemoryStore::new(family_schema());
        seed_family(&origin, shape)?;
        Ok(origin)
    }

    /// An origin with person 1 holding passport 1 and person 2 holding none.
    pub fn passport_origin() -> ViewResult<MemoryStore> {
        let origin = MemoryStore::new(family_schema());
        origin.put_entity(&Person {
            id: 1,
            name: "alice".to_string(),
        })?;
        origin.put_entity(&Person {
            id: 2,
            name: "bob".to_string(),
        })?;
        origin.put_entity(&Passport {
            id: 1,
            person_id: 1,
            number: "X-0001".to_string(),
        })?;
        Ok(origin)
    }

    /// A fresh in-memory cache over the family schema.
    pub fn memory_cache() -> MemoryStore {
        MemoryStore::new(family_schema())
    }

    /// An LMDB cache in a temporary directory. Keep the directory alive.
    pub fn lmdb_cache() -> ViewResult<(TempDir, LmdbStore)> {
        let dir = TempDir::new().map_err(dbview_storage::LmdbStoreError::from)?;
        let config = LmdbConfig::new(dir.path()).with_map_size_mb(16);
        let store = LmdbStore::open(&config, family_schema())?;
        Ok((dir, store))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::fixtures::FamilyShape;
    use super::*;
    use proptest::prelude::*;

    pub fn arb_mode() -> impl Strategy<Value = Mode> {
        prop_oneof![
            Just(Mode::Offline),
            Just(Mode::PreferCache),
            Just(Mode::Freshen),
        ]
    }

    /// A per-call limit: absent, or any mode.
    pub fn arb_limit() -> impl Strategy<Value = Option<Mode>> {
        proptest::option::of(arb_mode())
    }

    pub fn arb_identity_value() -> impl Strategy<Value = IdentityValue> {
        prop_oneof![
            any::<i64>().prop_map(IdentityValue::Int),
            "[a-z0-9'_ -]{1,12}".prop_map(IdentityValue::Text),
        ]
    }

    pub fn arb_identity() -> impl Strategy<Value = Identity> {
        prop::collection::vec(arb_identity_value(), 1..4).prop_map(Identity::composite)
    }

    pub fn arb_family_shape() -> impl Strategy<Value = FamilyShape> {
        (1i64..4, 1i64..5, 0i64..3).prop_map(|(parents, children, grandchildren)| FamilyShape {
            parents,
            children_per_parent: children,
            grandchildren_per_child: grandchildren,
        })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;
    use std::fmt::Debug;

    /// Assert the call failed because the view was not open.
    #[track_caller]
    pub fn assert_not_live<T: Debug>(result: ViewResult<T>) {
        match result {
            Err(err) if err.is_not_live() => {}
            other => panic!("expected NotLive, got {:?}", other),
        }
    }

    /// Assert the call failed with `IsOffline`.
    #[track_caller]
    pub fn assert_offline<T: Debug>(result: ViewResult<T>) {
        match result {
            Err(err) if err.is_offline() => {}
            other => panic!("expected IsOffline, got {:?}", other),
        }
    }

    /// Assert exactly `expected` data fetches reached `store` since `before`.
    #[track_caller]
    pub fn assert_fetches(store: &dyn DataStore, before: &StoreStats, expected: u64) {
        let delta = store.stats().since(before);
        assert_eq!(
            delta.fetches(),
            expected,
            "expected {} fetches, saw {:?}",
            expected,
            delta
        );
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-writer subscriber filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,dbview_engine=debug,dbview_storage=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

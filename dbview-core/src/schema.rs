//! Declarative mapping of domain types to rows.
//!
//! Every cached type implements [`Entity`], which binds it to a row shape
//! (entity name, key columns, relations). A [`Schema`] collects these
//! definitions once and is shared by the stores and the view.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::{StorageError, ViewResult};

/// A domain type that maps 1:1 to a row in both the origin and the cache.
///
/// # Implementation Requirements
///
/// - `NAME` must be unique within a [`Schema`]
/// - every column in `KEY` must serialize to an integer or a string
/// - the type must serialize to a JSON object whose keys are column names
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity type name, used as the table name and in ledger keys.
    const NAME: &'static str;

    /// Primary-key columns in order.
    const KEY: &'static [&'static str] = &["id"];

    /// Lazily-loadable relations of this entity.
    fn relations() -> Vec<Relation> {
        Vec::new()
    }

    /// Build the definition registered in a [`Schema`].
    fn definition() -> EntityDef {
        EntityDef::new(
            Self::NAME,
            Self::KEY.iter().map(|c| c.to_string()).collect(),
            Self::relations(),
        )
    }
}

/// How a relation is resolved against the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Every target row whose `foreign_key` equals the owner's identity.
    Children { foreign_key: String },
    /// At most one target row whose `foreign_key` equals the owner's identity.
    Child { foreign_key: String },
    /// The target row whose identity equals the owner's `local_key` column.
    Parent { local_key: String },
}

/// A named relation from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub target: String,
    pub kind: RelationKind,
}

impl Relation {
    /// One-to-many: `owner.name` lists `target` rows with `target.foreign_key == owner.id`.
    pub fn children(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::Children {
                foreign_key: foreign_key.to_string(),
            },
        }
    }

    /// One-to-one, reverse side: zero or one `target` row pointing back at the owner.
    pub fn child(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::Child {
                foreign_key: foreign_key.to_string(),
            },
        }
    }

    /// Many-to-one: the `target` row referenced by `owner.local_key`.
    pub fn parent(name: &str, target: &str, local_key: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::Parent {
                local_key: local_key.to_string(),
            },
        }
    }

    /// Returns true if this relation yields a list.
    pub fn is_many(&self) -> bool {
        matches!(self.kind, RelationKind::Children { .. })
    }

    /// True when the target is found through this row's own key column.
    pub fn is_parent(&self) -> bool {
        matches!(self.kind, RelationKind::Parent { .. })
    }
}

/// Row shape of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    pub name: String,
    pub key_columns: Vec<String>,
    relations: BTreeMap<String, Relation>,
}

impl EntityDef {
    pub fn new(name: &str, key_columns: Vec<String>, relations: Vec<Relation>) -> Self {
        Self {
            name: name.to_string(),
            key_columns,
            relations: relations
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect(),
        }
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }
}

/// The set of entity definitions shared by stores and views.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: BTreeMap<String, EntityDef>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// Look up an entity definition, failing with `UnknownEntity`.
    pub fn require(&self, name: &str) -> ViewResult<&EntityDef> {
        self.entities.get(name).ok_or_else(|| {
            StorageError::UnknownEntity {
                entity: name.to_string(),
            }
            .into()
        })
    }

    /// Look up a relation, failing with `UnknownField`.
    pub fn require_relation(&self, entity: &str, field: &str) -> ViewResult<&Relation> {
        self.require(entity)?.relation(field).ok_or_else(|| {
            StorageError::UnknownField {
                entity: entity.to_string(),
                field: field.to_string(),
            }
            .into()
        })
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Builder collecting [`Entity`] registrations.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: BTreeMap<String, EntityDef>,
}

impl SchemaBuilder {
    /// Register a domain type.
    pub fn entity<T: Entity>(mut self) -> Self {
        let def = T::definition();
        self.entities.insert(def.name.clone(), def);
        self
    }

    /// Register a hand-written definition.
    pub fn definition(mut self, def: EntityDef) -> Self {
        self.entities.insert(def.name.clone(), def);
        self
    }

    pub fn build(self) -> Arc<Schema> {
        Arc::new(Schema {
            entities: self.entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Shelf {
        id: i64,
    }

    impl Entity for Shelf {
        const NAME: &'static str = "shelf";

        fn relations() -> Vec<Relation> {
            vec![Relation::children("books", "book", "shelf_id")]
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Book {
        isbn: String,
        shelf_id: i64,
    }

    impl Entity for Book {
        const NAME: &'static str = "book";
        const KEY: &'static [&'static str] = &["isbn"];

        fn relations() -> Vec<Relation> {
            vec![Relation::parent("shelf", "shelf", "shelf_id")]
        }
    }

    #[test]
    fn test_builder_registers_entities() {
        let schema = Schema::builder().entity::<Shelf>().entity::<Book>().build();

        assert_eq!(schema.len(), 2);
        assert_eq!(schema.entity_names().collect::<Vec<_>>(), vec!["book", "shelf"]);
        assert_eq!(
            schema.require("book").unwrap().key_columns,
            vec!["isbn".to_string()]
        );
    }

    #[test]
    fn test_relation_lookup() {
        let schema = Schema::builder().entity::<Shelf>().entity::<Book>().build();

        let books = schema.require_relation("shelf", "books").unwrap();
        assert!(books.is_many());
        assert!(!books.is_parent());
        assert_eq!(books.target, "book");

        let shelf = schema.require_relation("book", "shelf").unwrap();
        assert!(!shelf.is_many());
        assert!(shelf.is_parent());
        assert_eq!(
            shelf.kind,
            RelationKind::Parent {
                local_key: "shelf_id".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_lookups_fail() {
        let schema = Schema::builder().entity::<Shelf>().build();

        assert!(matches!(
            schema.require("lamp"),
            Err(crate::ViewError::Storage(StorageError::UnknownEntity { .. }))
        ));
        assert!(matches!(
            schema.require_relation("shelf", "lamps"),
            Err(crate::ViewError::Storage(StorageError::UnknownField { .. }))
        ));
    }
}

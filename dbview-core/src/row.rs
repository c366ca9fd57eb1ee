//! Rows: the unit stores read, merge, and return.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{Entity, EntityDef, Identity, MappingError};

/// A row of one entity type, addressed by its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub entity: String,
    pub identity: Identity,
    pub columns: Map<String, Value>,
    /// When a cache store last merged this row; `None` for rows not read from a cache.
    pub merged_at: Option<DateTime<Utc>>,
}

impl Row {
    /// Build a row from raw columns, extracting the identity from the key columns.
    pub fn from_columns(def: &EntityDef, columns: Map<String, Value>) -> Result<Self, MappingError> {
        let identity = Identity::from_columns(&def.name, &columns, &def.key_columns)?;
        Ok(Self {
            entity: def.name.clone(),
            identity,
            columns,
            merged_at: None,
        })
    }

    /// Serialize a domain value into a row.
    pub fn from_entity<T: Entity>(value: &T) -> Result<Self, MappingError> {
        let columns = match serde_json::to_value(value) {
            Ok(Value::Object(columns)) => columns,
            _ => {
                return Err(MappingError::NotAnObject {
                    entity: T::NAME.to_string(),
                })
            }
        };
        let key_columns: Vec<String> = T::KEY.iter().map(|c| c.to_string()).collect();
        let identity = Identity::from_columns(T::NAME, &columns, &key_columns)?;
        Ok(Self {
            entity: T::NAME.to_string(),
            identity,
            columns,
            merged_at: None,
        })
    }

    /// Decode this row into its domain type.
    pub fn decode<T: Entity>(&self) -> Result<T, MappingError> {
        serde_json::from_value(Value::Object(self.columns.clone())).map_err(|e| {
            MappingError::Decode {
                entity: self.entity.clone(),
                reason: e.to_string(),
            }
        })
    }

    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.get(name)
    }

    /// Stamp this row with the time a cache store merged it.
    pub fn with_merged_at(mut self, merged_at: DateTime<Utc>) -> Self {
        self.merged_at = Some(merged_at);
        self
    }
}

/// A populated relation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Single-valued relation; `None` when nothing is related.
    One(Option<Row>),
    /// List-valued relation, possibly empty.
    Many(Vec<Row>),
}

impl FieldValue {
    /// All related rows, regardless of cardinality.
    pub fn rows(&self) -> Vec<&Row> {
        match self {
            FieldValue::One(row) => row.iter().collect(),
            FieldValue::Many(rows) => rows.iter().collect(),
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            FieldValue::One(row) => row.into_iter().collect(),
            FieldValue::Many(rows) => rows,
        }
    }
}

/// The result of `refresh_field`: the owning row as the store holds it,
/// plus the one relation that was populated on it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRefresh {
    pub owner: Row,
    pub value: FieldValue,
}

/// Identities a loaded relation points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    One(Option<Identity>),
    Many(Vec<Identity>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pair {
        left: i64,
        right: String,
        note: Option<String>,
    }

    impl Entity for Pair {
        const NAME: &'static str = "pair";
        const KEY: &'static [&'static str] = &["left", "right"];
    }

    #[test]
    fn test_entity_roundtrip() {
        let pair = Pair {
            left: 3,
            right: "x".to_string(),
            note: None,
        };
        let row = Row::from_entity(&pair).unwrap();

        assert_eq!(row.entity, "pair");
        assert_eq!(row.identity.ledger_key(), "(3, 'x')");
        assert_eq!(row.column("note"), Some(&Value::Null));
        assert_eq!(row.decode::<Pair>().unwrap(), pair);
    }

    #[test]
    fn test_decode_failure_is_mapping_error() {
        let def = Pair::definition();
        let columns = json!({"left": 1, "right": "y"});
        let mut row = Row::from_columns(&def, columns.as_object().cloned().unwrap()).unwrap();
        row.columns.insert("left".to_string(), json!("not a number"));

        assert!(matches!(
            row.decode::<Pair>(),
            Err(MappingError::Decode { .. })
        ));
    }

    #[test]
    fn test_field_value_rows_keep_every_row() {
        let def = Pair::definition();
        let row = Row::from_columns(&def, json!({"left": 1, "right": "a"}).as_object().cloned().unwrap())
            .unwrap();

        let one = FieldValue::One(Some(row.clone()));
        let none = FieldValue::One(None);
        let many = FieldValue::Many(vec![row.clone(), row]);

        assert_eq!(one.rows().len(), 1);
        assert_eq!(many.into_rows().len(), 2);
        assert_eq!(none.into_rows().len(), 0);
    }
}

//! Identity types for DBView rows
//!
//! An [`Identity`] is the primary-key value(s) of a row. Single-column keys
//! and composite keys share one type so that ledger and registry lookups can
//! treat them uniformly.

use crate::MappingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// One component of a primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityValue {
    Int(i64),
    Text(String),
}

impl IdentityValue {
    /// Read a key component out of a JSON column value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(IdentityValue::Int),
            Value::String(s) => Some(IdentityValue::Text(s.clone())),
            _ => None,
        }
    }

    /// The JSON column value this component was read from.
    pub fn to_json(&self) -> Value {
        match self {
            IdentityValue::Int(i) => Value::from(*i),
            IdentityValue::Text(s) => Value::from(s.as_str()),
        }
    }

    /// Rendering used inside a composite key: text is quoted.
    fn repr(&self) -> String {
        match self {
            IdentityValue::Int(i) => i.to_string(),
            IdentityValue::Text(s) => format!("'{}'", s.replace('\'', "\\'")),
        }
    }
}

impl fmt::Display for IdentityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityValue::Int(i) => write!(f, "{}", i),
            IdentityValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for IdentityValue {
    fn from(value: i64) -> Self {
        IdentityValue::Int(value)
    }
}

impl From<i32> for IdentityValue {
    fn from(value: i32) -> Self {
        IdentityValue::Int(i64::from(value))
    }
}

impl From<&str> for IdentityValue {
    fn from(value: &str) -> Self {
        IdentityValue::Text(value.to_string())
    }
}

impl From<String> for IdentityValue {
    fn from(value: String) -> Self {
        IdentityValue::Text(value)
    }
}

impl From<Uuid> for IdentityValue {
    fn from(value: Uuid) -> Self {
        IdentityValue::Text(value.to_string())
    }
}

/// Primary-key value(s) of a row, in key-column order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Vec<IdentityValue>);

impl Identity {
    /// Create a single-column identity.
    pub fn single(value: impl Into<IdentityValue>) -> Self {
        Self(vec![value.into()])
    }

    /// Create a composite identity from its components in key-column order.
    pub fn composite(values: Vec<IdentityValue>) -> Self {
        Self(values)
    }

    /// Number of key components.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> &[IdentityValue] {
        &self.0
    }

    /// The sole component of a single-column identity.
    pub fn as_single(&self) -> Option<&IdentityValue> {
        match self.0.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Normalized text form used as a ledger key.
    ///
    /// Arity 1 renders the sole component (`1`, `abc`); larger arities render
    /// a tuple (`(1, 'abc')`).
    pub fn ledger_key(&self) -> String {
        match self.as_single() {
            Some(only) => only.to_string(),
            None => {
                let parts: Vec<String> = self.0.iter().map(IdentityValue::repr).collect();
                format!("({})", parts.join(", "))
            }
        }
    }

    /// Unambiguous encoding used as a storage key (`[1]`, `["abc"]`).
    pub fn storage_key(&self) -> String {
        let values: Vec<Value> = self.0.iter().map(IdentityValue::to_json).collect();
        Value::Array(values).to_string()
    }

    /// Parse a [`storage_key`](Self::storage_key) back into an identity.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        serde_json::from_str::<Vec<IdentityValue>>(key)
            .ok()
            .filter(|values| !values.is_empty())
            .map(Self)
    }

    /// Extract the identity of a row from its key columns.
    pub fn from_columns(
        entity: &str,
        columns: &Map<String, Value>,
        key_columns: &[String],
    ) -> Result<Self, MappingError> {
        let mut values = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            let value = match columns.get(column) {
                None | Some(Value::Null) => {
                    return Err(MappingError::MissingKeyColumn {
                        entity: entity.to_string(),
                        column: column.clone(),
                    })
                }
                Some(value) => value,
            };
            let component =
                IdentityValue::from_json(value).ok_or_else(|| MappingError::InvalidKey {
                    column: column.clone(),
                    value: value.to_string(),
                })?;
            values.push(component);
        }
        Ok(Self(values))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ledger_key())
    }
}

macro_rules! identity_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Identity {
                fn from(value: $ty) -> Self {
                    Identity::single(value)
                }
            }
        )*
    };
}

identity_from!(IdentityValue, i64, i32, &str, String, Uuid);

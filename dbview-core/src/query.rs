//! Replayable row selections.
//!
//! A [`Query`] is built by the caller and handed through the view to a store
//! untouched, so the same value can run against the origin and then against
//! the cache. Stores evaluate it; the view never looks inside.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single predicate on a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `column == value`
    Eq { column: String, value: Value },
    /// `column IN (identities selected by subquery)`
    InQuery { column: String, subquery: Box<Query> },
}

/// Select rows of one entity type matching every filter, ordered by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub entity: String,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn select(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            filters: Vec::new(),
        }
    }

    /// Keep rows whose `column` equals `value`.
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Keep rows whose `column` holds the identity of a row selected by `subquery`.
    ///
    /// The subquery's entity must have a single-column key.
    pub fn in_query(mut self, column: &str, subquery: Query) -> Self {
        self.filters.push(Filter::InQuery {
            column: column.to_string(),
            subquery: Box::new(subquery),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_accumulates_filters() {
        let q = Query::select("grandchild")
            .in_query("child_id", Query::select("child").eq("parent_id", 1))
            .eq("name", "x");

        assert_eq!(q.entity, "grandchild");
        assert_eq!(q.filters.len(), 2);
        match &q.filters[0] {
            Filter::InQuery { column, subquery } => {
                assert_eq!(column, "child_id");
                assert_eq!(subquery.filters[0], Filter::Eq {
                    column: "parent_id".to_string(),
                    value: json!(1),
                });
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_same_query_compares_equal() {
        let a = Query::select("child").eq("parent_id", 4);
        let b = Query::select("child").eq("parent_id", 4);
        assert_eq!(a, b);
    }
}

//! Query and relation evaluation shared by every store.
//!
//! Stores expose their tables through [`TableSource`]; evaluation is plain
//! scanning and filtering so the same `Query` value answers identically on
//! the origin and on the cache.

use std::collections::HashSet;

use dbview_core::{
    FieldRefresh, FieldValue, Filter, Identity, IdentityValue, Query, RelationKind, Row, Schema,
    ViewResult,
};
use serde_json::Value;

/// Synchronous table access for evaluation.
pub(crate) trait TableSource {
    fn schema(&self) -> &Schema;

    fn fetch(&self, entity: &str, identity: &Identity) -> ViewResult<Option<Row>>;

    /// Every row of an entity, ordered by identity.
    fn scan(&self, entity: &str) -> ViewResult<Vec<Row>>;
}

/// Evaluate a query against a source.
pub(crate) fn run_query<S: TableSource + ?Sized>(source: &S, query: &Query) -> ViewResult<Vec<Row>> {
    source.schema().require(&query.entity)?;
    let mut rows = source.scan(&query.entity)?;

    for filter in &query.filters {
        match filter {
            Filter::Eq { column, value } => {
                rows.retain(|row| row.column(column) == Some(value));
            }
            Filter::InQuery { column, subquery } => {
                let selected: HashSet<IdentityValue> = run_query(source, subquery)?
                    .into_iter()
                    .filter_map(|row| row.identity.as_single().cloned())
                    .collect();
                rows.retain(|row| column_identity(row, column).is_some_and(|v| selected.contains(&v)));
            }
        }
    }

    Ok(rows)
}

/// Resolve relation `field` of the row `(entity, identity)`.
pub(crate) fn refresh_field<S: TableSource + ?Sized>(
    source: &S,
    entity: &str,
    identity: &Identity,
    field: &str,
) -> ViewResult<Option<FieldRefresh>> {
    let relation = source.schema().require_relation(entity, field)?.clone();
    source.schema().require(&relation.target)?;

    let Some(owner) = source.fetch(entity, identity)? else {
        return Ok(None);
    };

    let value = match &relation.kind {
        RelationKind::Children { foreign_key } => {
            FieldValue::Many(referencing_rows(source, &relation.target, foreign_key, identity)?)
        }
        RelationKind::Child { foreign_key } => FieldValue::One(
            referencing_rows(source, &relation.target, foreign_key, identity)?
                .into_iter()
                .next(),
        ),
        RelationKind::Parent { local_key } => match column_identity(&owner, local_key) {
            Some(parent) => FieldValue::One(source.fetch(&relation.target, &Identity::single(parent))?),
            None => FieldValue::One(None),
        },
    };

    Ok(Some(FieldRefresh { owner, value }))
}

/// Rows of `target` whose `foreign_key` column holds `identity`.
fn referencing_rows<S: TableSource + ?Sized>(
    source: &S,
    target: &str,
    foreign_key: &str,
    identity: &Identity,
) -> ViewResult<Vec<Row>> {
    let Some(owner) = identity.as_single() else {
        return Ok(Vec::new());
    };
    let mut rows = source.scan(target)?;
    rows.retain(|row| column_identity(row, foreign_key).as_ref() == Some(owner));
    Ok(rows)
}

fn column_identity(row: &Row, column: &str) -> Option<IdentityValue> {
    match row.column(column) {
        None | Some(Value::Null) => None,
        Some(value) => IdentityValue::from_json(value),
    }
}

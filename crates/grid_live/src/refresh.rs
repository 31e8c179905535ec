//! Partial refresh of live queries.
//!
//! A change event re-runs only the affected rows: the rewritten query is
//! wrapped as a subquery and filtered on its injected `_pk_*` columns with
//! the changed row's primary key. Results are serialized like the initial
//! read and pushed to every subscriber of the query; failures turn into one
//! `error` frame and never propagate.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::db::DbPool;
use crate::protocol::ServerFrame;
use crate::registry::LiveQuery;
use crate::serialize::{serialize_editable_rows, PkMap};

/// Changed primary keys, grouped by qualified table name.
pub type AffectedKeys = BTreeMap<String, BTreeMap<String, Value>>;

/// WHERE pushdown over injected primary-key columns.
#[derive(Debug, Clone, PartialEq)]
pub struct PkPredicate {
    /// Disjunction of `_pk_* = $n` comparisons.
    pub clause: String,
    /// Positional arguments matching the placeholders in `clause`.
    pub args: Vec<Value>,
}

/// Builds the pushdown predicate for one live query and one change.
///
/// Injected columns are matched against changed key names by `_<col>`
/// suffix, so the alias chunk in `_pk_<alias>_<col>` never needs to be
/// reconstructed. Returns `None` when nothing matches.
pub fn build_pk_predicate(pk_map: &PkMap, affected: &AffectedKeys) -> Option<PkPredicate> {
    let mut parts = Vec::new();
    let mut args = Vec::new();

    for injected_cols in pk_map.values() {
        for injected in injected_cols {
            for changed in affected.values() {
                for (key, value) in changed {
                    if injected.ends_with(&format!("_{key}")) {
                        args.push(value.clone());
                        parts.push(format!("{injected} = ${}", args.len()));
                    }
                }
            }
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(PkPredicate {
        clause: parts.join(" OR "),
        args,
    })
}

/// The filtered re-run statement for a live query.
pub fn partial_refresh_sql(rewritten: &str, predicate: &PkPredicate) -> String {
    format!(
        "SELECT * FROM ({rewritten}) AS _src WHERE {}",
        predicate.clause
    )
}

/// Executes a partial refresh and pushes the outcome to subscribers.
///
/// Exactly one `update` frame is sent per invocation; an empty row array
/// tells clients the changed row no longer matches. Execution errors become
/// one `error` frame.
pub async fn partial_refresh(
    db: &DbPool,
    deadline: Duration,
    query: &LiveQuery,
    affected: &AffectedKeys,
) {
    let Some(predicate) = build_pk_predicate(&query.pk_map, affected) else {
        return;
    };
    let sql = partial_refresh_sql(&query.rewritten, &predicate);

    let result = db.query_json(&sql, &predicate.args, deadline).await;
    match result {
        Ok(json_rows) => {
            let rows = serialize_editable_rows(
                &json_rows.columns,
                &json_rows.rows,
                &query.pk_map,
                &query.prov_orig,
                &query.prov_rewritten,
            );
            query.broadcast(&ServerFrame::Update(rows)).await;
        }
        Err(err) => {
            query.broadcast(&ServerFrame::error(err.to_string())).await;
        }
    }
}

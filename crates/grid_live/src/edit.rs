//! Cell edits through handles.
//!
//! An edit request names a handle, a column and a new value. The handle
//! decodes to one row of one base table; the compiled statement updates
//! exactly that row. All parameters travel as text (primary-key values
//! decode from handles as strings) and are cast back to the column types
//! recorded in the catalog snapshot.

use anyhow::{anyhow, Context, Result};
use grid_lineage::catalog::SchemaSnapshot;
use grid_lineage::handle::{decode_handle, EditTarget};
use serde_json::Value;

use crate::db::DbPool;

/// A ready-to-execute UPDATE with its textual parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUpdate {
    pub sql: String,
    /// Primary-key values in handle order, then the new cell value.
    pub params: Vec<Option<String>>,
}

/// Compiles an UPDATE for one decoded edit target.
pub fn compile_update(
    target: &EditTarget,
    column: &str,
    value: &Value,
    snapshot: &SchemaSnapshot,
) -> Result<CompiledUpdate> {
    if target.keys.is_empty() {
        return Err(anyhow!("edit handle carries no primary key"));
    }
    let qualified = target.qualified();

    let mut params: Vec<Option<String>> = Vec::with_capacity(target.keys.len() + 1);
    let mut conditions = Vec::with_capacity(target.keys.len());
    for (idx, (pk_col, pk_val)) in target.keys.iter().enumerate() {
        let cast = cast_for(snapshot, &qualified, pk_col);
        conditions.push(format!(
            "{} = ${}{cast}",
            quote_ident(pk_col),
            idx + 1
        ));
        params.push(Some(pk_val.clone()));
    }

    let value_placeholder = params.len() + 1;
    let cast = cast_for(snapshot, &qualified, column);
    params.push(render_value(value));

    let sql = format!(
        "UPDATE {}.{} SET {} = ${value_placeholder}{cast} WHERE {}",
        quote_ident(&target.schema),
        quote_ident(&target.table),
        quote_ident(column),
        conditions.join(" AND ")
    );
    Ok(CompiledUpdate { sql, params })
}

/// Decodes the handle, compiles the UPDATE, and executes it under the given
/// deadline. Returns the number of rows updated.
pub async fn apply_edit(
    db: &DbPool,
    deadline: std::time::Duration,
    snapshot: &SchemaSnapshot,
    handle: &str,
    column: &str,
    value: &Value,
) -> Result<u64> {
    let target = decode_handle(handle)?;
    let compiled = compile_update(&target, column, value, snapshot)?;
    db.execute_text(&compiled.sql, &compiled.params, deadline)
        .await
        .with_context(|| format!("update {}", target.qualified()))
}

/// Explicit cast suffix recovering the column's SQL type; text columns and
/// unknown columns need none.
fn cast_for(snapshot: &SchemaSnapshot, qualified: &str, column: &str) -> String {
    match snapshot.column_type(qualified, column) {
        Some("text") | None => String::new(),
        Some(data_type) => format!("::{data_type}"),
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

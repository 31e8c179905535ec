//! Editable-row serialization.
//!
//! Turns raw result rows of a rewritten query into the canonical
//! `{column: {value, editHandle}}` shape: injected `_pk_*` columns are
//! hidden, and every user-visible cell whose provenance resolves to exactly
//! one base table with a complete primary-key tuple in that row gets a
//! handle pointing back at the source row. Cells without such an owner (or
//! with a NULL key part, as under an outer join) stay read-only.

use std::collections::BTreeMap;

use grid_lineage::handle::encode_handle;
use grid_lineage::resolver::{split_source, Provenance};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One user-visible cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    pub value: Value,
    #[serde(rename = "editHandle")]
    pub edit_handle: String,
}

/// One serialized row, keyed by output column name.
pub type EditableRow = BTreeMap<String, Cell>;

/// Injection map produced by the rewriter: display alias → injected names.
pub type PkMap = BTreeMap<String, Vec<String>>;

/// Serializes result rows into editable rows.
///
/// `cols` are the output columns of the executed (rewritten) query in
/// position order; each row in `rows` holds the values by the same
/// positions.
pub fn serialize_editable_rows(
    cols: &[String],
    rows: &[Vec<Value>],
    pk_map: &PkMap,
    prov_orig: &Provenance,
    prov_rewritten: &Provenance,
) -> Vec<EditableRow> {
    // `_pk_*` column → owning (base table, pk column), via the rewritten
    // query's provenance.
    let mut pk_owner: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
    for col in cols {
        if !col.starts_with("_pk_") {
            continue;
        }
        if let Some(sources) = prov_rewritten.get(col) {
            if let Some((table, pk_col)) = sources.first().and_then(|s| split_source(s)) {
                pk_owner.insert(col.as_str(), (table, pk_col));
            }
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let buckets = pk_buckets(cols, row, pk_map, &pk_owner);

        let mut serialized = EditableRow::new();
        for (idx, col) in cols.iter().enumerate() {
            if col.starts_with("_pk_") {
                continue;
            }
            let value = row.get(idx).cloned().unwrap_or(Value::Null);
            let edit_handle =
                compute_edit_handle(col, &buckets, prov_orig, pk_map, prov_rewritten);
            serialized.insert(col.clone(), Cell { value, edit_handle });
        }
        out.push(serialized);
    }
    out
}

/// Primary-key values of one row, grouped by base table.
fn pk_buckets(
    cols: &[String],
    row: &[Value],
    pk_map: &PkMap,
    pk_owner: &BTreeMap<&str, (&str, &str)>,
) -> BTreeMap<String, BTreeMap<String, Value>> {
    let mut buckets: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    for injected in pk_map.values().flatten() {
        let Some((table, pk_col)) = pk_owner.get(injected.as_str()) else {
            continue;
        };
        let Some(idx) = cols.iter().position(|c| c == injected) else {
            continue;
        };
        let value = row.get(idx).cloned().unwrap_or(Value::Null);
        buckets
            .entry((*table).to_string())
            .or_default()
            .insert((*pk_col).to_string(), value);
    }
    buckets
}

/// Sources for an output column: exact label match first, then a unique
/// `.column` suffix match across the provenance map.
fn origins_for_column<'a>(col: &str, prov: &'a Provenance) -> Vec<&'a str> {
    if let Some(sources) = prov.get(col) {
        if !sources.is_empty() {
            return sources.iter().map(String::as_str).collect();
        }
    }
    let suffix = format!(".{col}");
    let mut found = Vec::new();
    for (label, sources) in prov {
        if label.ends_with(&suffix) {
            if let Some(first) = sources.first() {
                found.push(first.as_str());
            }
        }
    }
    if found.len() == 1 {
        found
    } else {
        Vec::new()
    }
}

fn compute_edit_handle(
    col: &str,
    buckets: &BTreeMap<String, BTreeMap<String, Value>>,
    prov_orig: &Provenance,
    pk_map: &PkMap,
    prov_rewritten: &Provenance,
) -> String {
    let sources = origins_for_column(col, prov_orig);
    let Some((table, _)) = sources.first().and_then(|s| split_source(s)) else {
        return String::new();
    };
    let Some(values) = buckets.get(table) else {
        return String::new();
    };
    if values.is_empty() {
        return String::new();
    }

    // Deterministic key order: walk the injection map (alias-sorted, catalog
    // PK order within each alias) filtered to this base table.
    let mut order = pk_order_for_table(table, pk_map, prov_rewritten);
    if order.is_empty() {
        order = values.keys().cloned().collect();
    }

    let mut pk_cols = Vec::with_capacity(order.len());
    let mut pk_vals = Vec::with_capacity(order.len());
    for key in order {
        // A missing or NULL key part leaves the tuple incomplete and the
        // cell read-only.
        let Some(rendered) = values.get(&key).and_then(render_value) else {
            return String::new();
        };
        pk_cols.push(key);
        pk_vals.push(rendered);
    }

    let (schema, bare) = match table.split_once('.') {
        Some((schema, bare)) => (schema, bare),
        None => ("public", table),
    };
    encode_handle(schema, bare, &pk_cols, &pk_vals)
}

/// Reproduces the primary-key column order for a base table by walking the
/// injected columns and mapping them back through the rewritten provenance.
fn pk_order_for_table(table: &str, pk_map: &PkMap, prov_rewritten: &Provenance) -> Vec<String> {
    let mut order = Vec::new();
    for injected in pk_map.values().flatten() {
        let Some(sources) = prov_rewritten.get(injected) else {
            continue;
        };
        let Some((src_table, pk_col)) = sources.first().and_then(|s| split_source(s)) else {
            continue;
        };
        if src_table == table && !order.iter().any(|c| c == pk_col) {
            order.push(pk_col.to_string());
        }
    }
    order
}

/// Renders a primary-key value for handle encoding; NULL renders as absent.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

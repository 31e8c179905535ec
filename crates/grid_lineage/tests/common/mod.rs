//! Shared demo catalog for lineage tests: the actor/film schema.
#![allow(dead_code)]

use std::collections::BTreeMap;

use grid_lineage::catalog::{table_def, SchemaSnapshot};

/// actor/film demo schema with single-column keys plus a composite-key
/// join table and a keyless log table.
pub fn demo_catalog() -> SchemaSnapshot {
    let mut tables = BTreeMap::new();
    tables.insert(
        "public.actor".to_string(),
        table_def(&["id", "name", "first_name", "last_name"], &["id"]),
    );
    tables.insert(
        "public.film".to_string(),
        table_def(&["id", "title", "revenue", "actor_id"], &["id"]),
    );
    tables.insert(
        "public.film_actor".to_string(),
        table_def(&["film_id", "actor_id", "note"], &["film_id", "actor_id"]),
    );
    tables.insert("public.log".to_string(), table_def(&["msg"], &[]));
    SchemaSnapshot::from_tables(tables)
}

/// Variant where both actor and film define a `name` column.
pub fn ambiguous_catalog() -> SchemaSnapshot {
    let mut tables = BTreeMap::new();
    tables.insert(
        "public.actor".to_string(),
        table_def(&["id", "name"], &["id"]),
    );
    tables.insert(
        "public.film".to_string(),
        table_def(&["id", "name", "title"], &["id"]),
    );
    SchemaSnapshot::from_tables(tables)
}

/// Collapses insignificant whitespace for deparsed-SQL comparisons.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn sources(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|s| (*s).to_string()).collect()
}

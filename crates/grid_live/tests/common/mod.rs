//! Shared fixtures for grid_live tests: the actor/film demo schema with
//! typed columns, and provenance/injection maps shaped like the rewriter
//! and resolver produce them.
#![allow(dead_code)]

use std::collections::BTreeMap;

use grid_lineage::catalog::{ColumnDef, SchemaSnapshot, TableDef};
use grid_lineage::resolver::Provenance;

fn typed_table(columns: &[(&str, &str)], primary_key: &[&str]) -> TableDef {
    TableDef {
        columns: columns
            .iter()
            .map(|(name, data_type)| ColumnDef {
                name: (*name).to_string(),
                data_type: (*data_type).to_string(),
            })
            .collect(),
        primary_key: primary_key.iter().map(|c| (*c).to_string()).collect(),
        ..TableDef::default()
    }
}

pub fn demo_catalog() -> SchemaSnapshot {
    let mut tables = BTreeMap::new();
    tables.insert(
        "public.actor".to_string(),
        typed_table(
            &[
                ("id", "integer"),
                ("name", "text"),
                ("first_name", "text"),
                ("last_name", "text"),
            ],
            &["id"],
        ),
    );
    tables.insert(
        "public.film".to_string(),
        typed_table(
            &[
                ("id", "integer"),
                ("title", "text"),
                ("revenue", "numeric"),
                ("actor_id", "integer"),
            ],
            &["id"],
        ),
    );
    SchemaSnapshot::from_tables(tables)
}

pub fn provenance(entries: &[(&str, &[&str])]) -> Provenance {
    let mut out = Provenance::new();
    for (label, sources) in entries {
        out.insert(
            (*label).to_string(),
            sources.iter().map(|s| (*s).to_string()).collect(),
        );
    }
    out
}

pub fn pk_map(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    for (alias, names) in entries {
        out.insert(
            (*alias).to_string(),
            names.iter().map(|n| (*n).to_string()).collect(),
        );
    }
    out
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

//! Schema catalog model.
//!
//! A [`SchemaSnapshot`] is an immutable view of the relations visible to the
//! lineage passes: for each qualified `schema.table`, the ordered column list
//! (with SQL type names) and the index-ordered primary-key columns. Lookup
//! follows the fallback policy shared by every consumer: exact key first,
//! then `public.<name>`, then a unique `.<name>` suffix match.
//!
//! Snapshots expose a content checksum so refresh loops can swap them only
//! when the schema actually changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LineageError, Result};

/// Read interface consumed by the resolver and the rewriter.
pub trait Catalog {
    /// Ordered column names for a qualified relation, if known.
    fn columns(&self, qualified: &str) -> Option<Vec<String>>;

    /// Ordered primary-key column names for a qualified relation, if known.
    /// The order matches the primary-key index definition.
    fn primary_keys(&self, qualified: &str) -> Option<Vec<String>>;

    /// Whether the relation is known and carries the named column.
    fn has_column(&self, qualified: &str, column: &str) -> bool {
        self.columns(qualified)
            .is_some_and(|cols| cols.iter().any(|c| c == column))
    }
}

/// One column of a cataloged relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name, in ordinal position order within [`TableDef::columns`].
    pub name: String,
    /// SQL type name as reported by the database (e.g. `integer`, `text`).
    pub data_type: String,
}

/// One index on a cataloged relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub unique: bool,
    pub primary: bool,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
}

/// One outgoing foreign key of a cataloged relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_schema: String,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

/// One cataloged relation.
///
/// Indexes and foreign keys are optional richer data for tooling and UI;
/// the lineage passes only consume columns and the primary key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Columns in ordinal position order.
    pub columns: Vec<ColumnDef>,
    /// Primary-key columns in index definition order; empty when the
    /// relation has no primary key.
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

/// Immutable catalog snapshot keyed by `schema.table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableDef>,
    #[serde(skip)]
    checksum: String,
}

impl SchemaSnapshot {
    /// Builds a snapshot from relation definitions and stamps its checksum.
    pub fn from_tables(tables: BTreeMap<String, TableDef>) -> Self {
        let checksum = checksum_tables(&tables);
        Self { tables, checksum }
    }

    /// Stable hex checksum over the normalized snapshot content.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Number of cataloged relations.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Qualified names of every cataloged relation, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Full definition of one relation, honoring the lookup fallback.
    pub fn table(&self, qualified: &str) -> Option<&TableDef> {
        self.lookup(qualified)
    }

    /// Declared SQL type of one column, honoring the lookup fallback.
    pub fn column_type(&self, qualified: &str, column: &str) -> Option<&str> {
        let table = self.lookup(qualified)?;
        table
            .columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.data_type.as_str())
    }

    /// Serializes the snapshot to pretty JSON for export.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.tables)
            .map_err(|err| LineageError::Catalog(err.to_string()))
    }

    /// Restores a snapshot previously produced by [`SchemaSnapshot::to_json`].
    /// The checksum is recomputed from the decoded content.
    pub fn from_json(raw: &str) -> Result<Self> {
        let tables: BTreeMap<String, TableDef> =
            serde_json::from_str(raw).map_err(|err| LineageError::Catalog(err.to_string()))?;
        Ok(Self::from_tables(tables))
    }

    fn lookup(&self, qualified: &str) -> Option<&TableDef> {
        if let Some(table) = self.tables.get(qualified) {
            return Some(table);
        }
        // Unqualified names default to the public schema.
        if !qualified.contains('.') {
            if let Some(table) = self.tables.get(&format!("public.{qualified}")) {
                return Some(table);
            }
        }
        // Last resort: a unique `.name` suffix match across schemas.
        let suffix = format!(".{qualified}");
        let mut found = None;
        for (key, table) in &self.tables {
            if key.ends_with(&suffix) {
                if found.is_some() {
                    return None;
                }
                found = Some(table);
            }
        }
        found
    }
}

impl Catalog for SchemaSnapshot {
    fn columns(&self, qualified: &str) -> Option<Vec<String>> {
        self.lookup(qualified)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
    }

    fn primary_keys(&self, qualified: &str) -> Option<Vec<String>> {
        self.lookup(qualified).map(|t| t.primary_key.clone())
    }
}

fn checksum_tables(tables: &BTreeMap<String, TableDef>) -> String {
    // BTreeMap ordering plus canonical JSON keeps the digest deterministic.
    let encoded = serde_json::to_vec(tables).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Convenience constructor used by tests and tooling: columns default to the
/// `text` type when only names are known.
pub fn table_def(columns: &[&str], primary_key: &[&str]) -> TableDef {
    TableDef {
        columns: columns
            .iter()
            .map(|name| ColumnDef {
                name: (*name).to_string(),
                data_type: "text".to_string(),
            })
            .collect(),
        primary_key: primary_key.iter().map(|c| (*c).to_string()).collect(),
        ..TableDef::default()
    }
}

//! Catalog introspection and refresh.
//!
//! Loads ordered column and primary-key metadata from `information_schema`
//! into an immutable [`SchemaSnapshot`], published behind a reader-writer
//! lock. A background loop rebuilds the snapshot periodically and swaps it
//! only when the content checksum changed; refresh failures log and retry
//! without ever surfacing to in-flight queries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use grid_lineage::catalog::{ColumnDef, ForeignKeyDef, IndexDef, SchemaSnapshot, TableDef};
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use crate::db::DbPool;

/// What the introspector loads beyond columns and primary keys.
#[derive(Debug, Clone, Copy)]
pub struct IntrospectOptions {
    /// Load index definitions (slower, richer tooling data).
    pub include_indexes: bool,
    /// Load outgoing foreign keys.
    pub include_foreign_keys: bool,
}

impl Default for IntrospectOptions {
    fn default() -> Self {
        Self {
            include_indexes: true,
            include_foreign_keys: true,
        }
    }
}

const COLUMNS_SQL: &str = "SELECT table_schema, table_name, column_name, data_type \
     FROM information_schema.columns \
     WHERE table_schema = ANY($1) \
     ORDER BY table_schema, table_name, ordinal_position";

const PRIMARY_KEYS_SQL: &str = "SELECT kcu.table_schema, kcu.table_name, kcu.column_name \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name \
      AND tc.table_schema = kcu.table_schema \
     WHERE tc.constraint_type = 'PRIMARY KEY' \
       AND kcu.table_schema = ANY($1) \
     ORDER BY kcu.table_schema, kcu.table_name, kcu.ordinal_position";

const INDEXES_SQL: &str = "SELECT n.nspname, t.relname, ci.relname, i.indisunique, i.indisprimary, \
       (SELECT array_agg(a.attname ORDER BY k.ord) \
          FROM unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) \
          JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum) \
     FROM pg_catalog.pg_index i \
     JOIN pg_catalog.pg_class t ON t.oid = i.indrelid \
     JOIN pg_catalog.pg_class ci ON ci.oid = i.indexrelid \
     JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
     WHERE n.nspname = ANY($1) \
     ORDER BY n.nspname, t.relname, ci.relname";

const FOREIGN_KEYS_SQL: &str = "SELECT sn.nspname, ct.relname, con.conname, \
       (SELECT array_agg(a.attname ORDER BY k.ord) \
          FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord) \
          JOIN pg_catalog.pg_attribute a ON a.attrelid = ct.oid AND a.attnum = k.attnum), \
       dn.nspname, rt.relname, \
       (SELECT array_agg(a.attname ORDER BY k.ord) \
          FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord) \
          JOIN pg_catalog.pg_attribute a ON a.attrelid = rt.oid AND a.attnum = k.attnum) \
     FROM pg_catalog.pg_constraint con \
     JOIN pg_catalog.pg_class ct ON ct.oid = con.conrelid \
     JOIN pg_catalog.pg_namespace sn ON sn.oid = ct.relnamespace \
     JOIN pg_catalog.pg_class rt ON rt.oid = con.confrelid \
     JOIN pg_catalog.pg_namespace dn ON dn.oid = rt.relnamespace \
     WHERE con.contype = 'f' AND sn.nspname = ANY($1) \
     ORDER BY sn.nspname, ct.relname, con.conname";

/// Current catalog snapshot, swapped atomically on refresh.
#[derive(Debug, Default)]
pub struct SharedCatalog {
    inner: RwLock<Arc<SchemaSnapshot>>,
}

impl SharedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently published snapshot.
    pub async fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.inner.read().await.clone()
    }

    /// Publishes a snapshot if its checksum differs from the current one;
    /// returns whether a swap happened.
    pub async fn install(&self, snapshot: SchemaSnapshot) -> bool {
        let mut inner = self.inner.write().await;
        if inner.checksum() == snapshot.checksum() {
            return false;
        }
        *inner = Arc::new(snapshot);
        true
    }
}

/// Introspects the database into a fresh snapshot.
pub async fn load_snapshot(
    db: &DbPool,
    schemas: &[String],
    options: IntrospectOptions,
    deadline: Duration,
) -> Result<SchemaSnapshot> {
    let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();

    let rows = db
        .query_rows(COLUMNS_SQL, &[&schemas], deadline)
        .await
        .context("introspect columns")?;
    for row in rows {
        let schema: String = row.get(0);
        let table: String = row.get(1);
        let column: String = row.get(2);
        let data_type: String = row.get(3);
        tables
            .entry(format!("{schema}.{table}"))
            .or_default()
            .columns
            .push(ColumnDef {
                name: column,
                data_type,
            });
    }

    let rows = db
        .query_rows(PRIMARY_KEYS_SQL, &[&schemas], deadline)
        .await
        .context("introspect primary keys")?;
    for row in rows {
        let schema: String = row.get(0);
        let table: String = row.get(1);
        let column: String = row.get(2);
        tables
            .entry(format!("{schema}.{table}"))
            .or_default()
            .primary_key
            .push(column);
    }

    if options.include_indexes {
        let rows = db
            .query_rows(INDEXES_SQL, &[&schemas], deadline)
            .await
            .context("introspect indexes")?;
        for row in rows {
            let schema: String = row.get(0);
            let table: String = row.get(1);
            let name: String = row.get(2);
            let unique: bool = row.get(3);
            let primary: bool = row.get(4);
            let columns: Option<Vec<String>> = row.get(5);
            tables
                .entry(format!("{schema}.{table}"))
                .or_default()
                .indexes
                .push(IndexDef {
                    name,
                    unique,
                    primary,
                    columns: columns.unwrap_or_default(),
                });
        }
    }

    if options.include_foreign_keys {
        let rows = db
            .query_rows(FOREIGN_KEYS_SQL, &[&schemas], deadline)
            .await
            .context("introspect foreign keys")?;
        for row in rows {
            let schema: String = row.get(0);
            let table: String = row.get(1);
            let name: String = row.get(2);
            let columns: Option<Vec<String>> = row.get(3);
            let ref_schema: String = row.get(4);
            let ref_table: String = row.get(5);
            let ref_columns: Option<Vec<String>> = row.get(6);
            tables
                .entry(format!("{schema}.{table}"))
                .or_default()
                .foreign_keys
                .push(ForeignKeyDef {
                    name,
                    columns: columns.unwrap_or_default(),
                    ref_schema,
                    ref_table,
                    ref_columns: ref_columns.unwrap_or_default(),
                });
        }
    }

    Ok(SchemaSnapshot::from_tables(tables))
}

/// Periodic refresh loop; runs until shutdown.
pub async fn run_refresh_loop(
    catalog: Arc<SharedCatalog>,
    db: Arc<DbPool>,
    schemas: Vec<String>,
    options: IntrospectOptions,
    interval: Duration,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match load_snapshot(&db, &schemas, options, deadline).await {
            Ok(snapshot) => {
                let checksum = snapshot.checksum().to_string();
                let table_count = snapshot.len();
                if catalog.install(snapshot).await {
                    info!(table_count, %checksum, "catalog snapshot refreshed");
                }
            }
            Err(err) => {
                // Keep serving the previous snapshot; retry next tick.
                warn!(error = %err, "catalog refresh failed");
            }
        }
    }
}

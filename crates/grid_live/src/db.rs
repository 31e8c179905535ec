//! Database access: a small round-robin connection pool and the value
//! conversions between SQL results, JSON, and query parameters.
//!
//! Every outbound query carries a deadline; on expiry the caller receives
//! an error and the connection stays usable for the next request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::warn;

/// Columns and rows of one query result, decoded to JSON values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Fixed-size pool of PostgreSQL connections handed out round-robin.
pub struct DbPool {
    clients: Vec<Arc<Client>>,
    next: AtomicUsize,
}

impl DbPool {
    /// Opens `size` connections to the given DSN. Each connection's driver
    /// task runs until the connection closes.
    pub async fn connect(dsn: &str, size: usize) -> Result<Self> {
        let size = size.max(1);
        let mut clients = Vec::with_capacity(size);
        for index in 0..size {
            let (client, connection) = tokio_postgres::connect(dsn, NoTls)
                .await
                .with_context(|| format!("connect pool slot {index}"))?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    warn!(slot = index, error = %err, "database connection terminated");
                }
            });
            clients.push(Arc::new(client));
        }
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    /// Next pooled connection, round-robin.
    pub fn client(&self) -> Arc<Client> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[index].clone()
    }

    /// Runs a query with JSON-typed parameters under a deadline and decodes
    /// the result rows to JSON values.
    pub async fn query_json(
        &self,
        sql: &str,
        params: &[Value],
        deadline: Duration,
    ) -> Result<JsonRows> {
        let client = self.client();
        let bound: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(json_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

        let rows = tokio::time::timeout(deadline, client.query(sql, &refs))
            .await
            .map_err(|_| anyhow!("query timed out after {deadline:?}"))?
            .context("execute query")?;
        Ok(decode_rows(&rows))
    }

    /// Runs a statement with textual parameters (`NULL` as `None`) under a
    /// deadline and returns the affected row count.
    pub async fn execute_text(
        &self,
        sql: &str,
        params: &[Option<String>],
        deadline: Duration,
    ) -> Result<u64> {
        let client = self.client();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        tokio::time::timeout(deadline, client.execute(sql, &refs))
            .await
            .map_err(|_| anyhow!("statement timed out after {deadline:?}"))?
            .context("execute statement")
    }

    /// Runs a query with textual parameters under a deadline, returning raw
    /// rows for callers that decode typed values themselves.
    pub async fn query_rows(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        deadline: Duration,
    ) -> Result<Vec<Row>> {
        let client = self.client();
        tokio::time::timeout(deadline, client.query(sql, params))
            .await
            .map_err(|_| anyhow!("query timed out after {deadline:?}"))?
            .context("execute query")
    }
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbPool")
            .field("size", &self.clients.len())
            .finish()
    }
}

fn decode_rows(rows: &[Row]) -> JsonRows {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        })
        .unwrap_or_default();
    let rows = rows.iter().map(row_values).collect();
    JsonRows { columns, rows }
}

/// Decodes one row to JSON values by column type; values the decoder does
/// not understand become `null`.
fn row_values(row: &Row) -> Vec<Value> {
    let mut out = Vec::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::from(f64::from(v)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<Value>>(idx).ok().flatten()
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<uuid::Uuid>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::from(v.to_string()))
        } else {
            // Text-like types, plus a best-effort fallback for the rest.
            row.try_get::<_, Option<String>>(idx).ok().flatten().map(Value::from)
        };
        out.push(value.unwrap_or(Value::Null));
    }
    out
}

/// Binds a JSON value as a SQL parameter with the matching wire type.
fn json_param(value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

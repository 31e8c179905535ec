//! Subscriber frontline.
//!
//! A TCP listener speaking the subscribe protocol: one JSON object per
//! line in both directions. Each connection runs a reader task (request
//! dispatch) and a writer task draining the connection's frame channel, so
//! a slow socket never blocks broadcasts. Disconnecting unsubscribes the
//! connection from every live query it held and eagerly unregisters
//! records left without subscribers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use grid_lineage::resolver::{resolve_provenance, split_source, Provenance};
use grid_lineage::rewrite::rewrite_inject_pks;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog_loader::SharedCatalog;
use crate::db::DbPool;
use crate::edit::apply_edit;
use crate::protocol::{ClientRequest, ServerFrame, SubscribedData};
use crate::registry::{LiveQuery, Registry};
use crate::serialize::serialize_editable_rows;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Shared server state handed to every connection.
#[derive(Clone)]
pub struct SessionDeps {
    pub registry: Arc<Registry>,
    pub catalog: Arc<SharedCatalog>,
    pub db: Arc<DbPool>,
    pub query_timeout: Duration,
}

/// Accept loop; runs until shutdown.
pub async fn run_frontline(
    listener: TcpListener,
    deps: SessionDeps,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept subscriber connection")?;
                debug!(%peer, "subscriber connected");
                let deps = deps.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, deps).await {
                        debug!(%peer, error = %err, "subscriber connection ended");
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, deps: SessionDeps) -> Result<()> {
    let subscriber_id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Writer: the only task touching the socket's write half.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "failed to encode frame");
                    continue;
                }
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut active: Vec<Arc<LiveQuery>> = Vec::new();
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<ClientRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                let _ = tx.send(ServerFrame::error("invalid JSON"));
                continue;
            }
        };

        match request {
            ClientRequest::Subscribe { sql } => {
                if sql.trim().is_empty() {
                    let _ = tx.send(ServerFrame::error("missing SQL"));
                    continue;
                }
                match register_live_query(&deps, &sql, subscriber_id, &tx).await {
                    Ok(query) => {
                        let _ = tx.send(ServerFrame::Subscribed(SubscribedData {
                            id: query.id.clone(),
                            tables: query.tables.iter().cloned().collect(),
                            pk_cols: query.pk_map.clone(),
                            rewrote: query.rewritten.clone(),
                        }));
                        send_initial_rows(&deps, &query, &tx).await;
                        active.push(query);
                    }
                    Err(message) => {
                        let _ = tx.send(ServerFrame::error(message));
                    }
                }
            }
            ClientRequest::Unsubscribe => {
                drop_subscriptions(&deps, subscriber_id, &mut active).await;
                let _ = tx.send(ServerFrame::Unsubscribed("ok".to_string()));
            }
            ClientRequest::Edit {
                edit_handle,
                column,
                value,
            } => {
                let snapshot = deps.catalog.snapshot().await;
                match apply_edit(
                    &deps.db,
                    deps.query_timeout,
                    &snapshot,
                    &edit_handle,
                    &column,
                    &value,
                )
                .await
                {
                    Ok(_) => {
                        let _ = tx.send(ServerFrame::Edited("ok".to_string()));
                    }
                    Err(err) => {
                        let _ = tx.send(ServerFrame::error(err.to_string()));
                    }
                }
            }
        }
    }

    // Disconnect: release every subscription this connection held.
    drop_subscriptions(&deps, subscriber_id, &mut active).await;
    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Rewrites, analyzes and registers one live query for a subscriber.
/// Provenance and rewrite failures come back as client-facing messages.
async fn register_live_query(
    deps: &SessionDeps,
    sql: &str,
    subscriber_id: u64,
    tx: &mpsc::UnboundedSender<ServerFrame>,
) -> Result<Arc<LiveQuery>, String> {
    let snapshot = deps.catalog.snapshot().await;

    let rewrite = rewrite_inject_pks(sql, snapshot.as_ref()).map_err(|err| err.to_string())?;
    let prov_orig =
        resolve_provenance(sql, snapshot.as_ref()).map_err(|err| err.to_string())?;
    let prov_rewritten = match resolve_provenance(&rewrite.sql, snapshot.as_ref()) {
        Ok(prov) => prov,
        Err(err) => {
            warn!(rewritten = %rewrite.sql, error = %err, "provenance of rewritten query failed");
            Provenance::new()
        }
    };

    let tables = if prov_rewritten.is_empty() {
        dependency_tables(&prov_orig)
    } else {
        dependency_tables(&prov_rewritten)
    };
    if tables.is_empty() {
        return Err("query references no base tables".to_string());
    }

    let query = Arc::new(LiveQuery::new(
        Uuid::new_v4().to_string(),
        sql.to_string(),
        rewrite.sql,
        tables,
        rewrite.injected,
        prov_orig,
        prov_rewritten,
    ));
    query.subscribe(subscriber_id, tx.clone()).await;
    deps.registry.register(query.clone()).await;
    info!(live_query_id = %query.id, tables = ?query.tables, "live query registered");
    Ok(query)
}

/// Executes the rewritten query once and pushes the serialized rows to the
/// new subscriber so it starts from a populated grid.
async fn send_initial_rows(
    deps: &SessionDeps,
    query: &Arc<LiveQuery>,
    tx: &mpsc::UnboundedSender<ServerFrame>,
) {
    match deps
        .db
        .query_json(&query.rewritten, &[], deps.query_timeout)
        .await
    {
        Ok(json_rows) => {
            let rows = serialize_editable_rows(
                &json_rows.columns,
                &json_rows.rows,
                &query.pk_map,
                &query.prov_orig,
                &query.prov_rewritten,
            );
            let _ = tx.send(ServerFrame::Update(rows));
        }
        Err(err) => {
            let _ = tx.send(ServerFrame::error(err.to_string()));
        }
    }
}

async fn drop_subscriptions(
    deps: &SessionDeps,
    subscriber_id: u64,
    active: &mut Vec<Arc<LiveQuery>>,
) {
    for query in active.drain(..) {
        let remaining = query.unsubscribe(subscriber_id).await;
        if remaining == 0 {
            deps.registry.unregister(&query.id).await;
            debug!(live_query_id = %query.id, "live query unregistered");
        }
    }
}

/// Union of the base tables behind a provenance map, as qualified
/// lower-case `schema.table` names matching change-stream identifiers.
pub fn dependency_tables(prov: &Provenance) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for sources in prov.values() {
        for source in sources {
            let Some((table, _)) = split_source(source) else {
                continue;
            };
            let qualified = if table.contains('.') {
                table.to_lowercase()
            } else {
                format!("public.{}", table.to_lowercase())
            };
            out.insert(qualified);
        }
    }
    out
}

//! Live-query registry and subscriber fan-out.
//!
//! The registry map is guarded by a reader-writer lock: lookups and
//! iteration share a read lock, registration and removal take the write
//! lock. Each live-query record guards its subscriber set with its own
//! lock so broadcasts never serialize against unrelated queries, and
//! callers never hold the registry lock while working on a record.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use grid_lineage::resolver::Provenance;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::protocol::ServerFrame;
use crate::serialize::PkMap;

/// Sending half of one subscriber's frame channel; the owning connection
/// task drains the other half into its socket.
pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;

/// One registered live query.
#[derive(Debug)]
pub struct LiveQuery {
    /// Server-assigned opaque identifier.
    pub id: String,
    /// Original SQL as submitted.
    pub sql: String,
    /// Rewritten SQL with injected `_pk_*` projections.
    pub rewritten: String,
    /// Qualified base tables this query depends on (`schema.table`).
    pub tables: BTreeSet<String>,
    /// Display alias → injected column names, from the rewriter.
    pub pk_map: PkMap,
    /// Provenance of the original query.
    pub prov_orig: Provenance,
    /// Provenance of the rewritten query.
    pub prov_rewritten: Provenance,
    subscribers: RwLock<HashMap<u64, FrameSender>>,
}

impl LiveQuery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        sql: String,
        rewritten: String,
        tables: BTreeSet<String>,
        pk_map: PkMap,
        prov_orig: Provenance,
        prov_rewritten: Provenance,
    ) -> Self {
        Self {
            id,
            sql,
            rewritten,
            tables,
            pk_map,
            prov_orig,
            prov_rewritten,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a subscriber sink.
    pub async fn subscribe(&self, subscriber_id: u64, sender: FrameSender) {
        self.subscribers.write().await.insert(subscriber_id, sender);
    }

    /// Removes a subscriber sink; returns how many remain.
    pub async fn unsubscribe(&self, subscriber_id: u64) -> usize {
        let mut subscribers = self.subscribers.write().await;
        subscribers.remove(&subscriber_id);
        subscribers.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Sends one frame to every subscriber under the read lock. Send
    /// failures mean the receiving connection is gone; its own task
    /// unsubscribes it, so they are only logged here.
    pub async fn broadcast(&self, frame: &ServerFrame) {
        let subscribers = self.subscribers.read().await;
        for (subscriber_id, sender) in subscribers.iter() {
            if sender.send(frame.clone()).is_err() {
                debug!(
                    live_query_id = %self.id,
                    subscriber_id,
                    "dropping frame for disconnected subscriber"
                );
            }
        }
    }
}

/// JSON-ready registry snapshot entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LiveQueryView {
    pub id: String,
    pub sql: String,
    pub rewritten: String,
    pub tables: Vec<String>,
    #[serde(rename = "pkCols")]
    pub pk_cols: BTreeMap<String, Vec<String>>,
    pub subscribers: usize,
}

/// In-memory map of live queries keyed by identifier.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<HashMap<String, Arc<LiveQuery>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, query: Arc<LiveQuery>) {
        self.inner.write().await.insert(query.id.clone(), query);
    }

    pub async fn unregister(&self, id: &str) -> Option<Arc<LiveQuery>> {
        self.inner.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<LiveQuery>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Visits every record under the read lock until the visitor returns
    /// `false`. The visitor must not call back into registry mutations.
    pub async fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<LiveQuery>) -> bool,
    {
        let inner = self.inner.read().await;
        for query in inner.values() {
            if !visitor(query) {
                break;
            }
        }
    }

    /// Records depending on the given qualified table, cloned out so the
    /// caller works without holding the registry lock.
    pub async fn matching_table(&self, qualified: &str) -> Vec<Arc<LiveQuery>> {
        let inner = self.inner.read().await;
        inner
            .values()
            .filter(|q| q.tables.contains(qualified))
            .cloned()
            .collect()
    }

    /// Defensive-copy snapshot of every record for inspection endpoints.
    pub async fn snapshot_view(&self) -> Vec<LiveQueryView> {
        let inner = self.inner.read().await;
        let mut out = Vec::with_capacity(inner.len());
        for query in inner.values() {
            out.push(LiveQueryView {
                id: query.id.clone(),
                sql: query.sql.clone(),
                rewritten: query.rewritten.clone(),
                tables: query.tables.iter().cloned().collect(),
                pk_cols: query.pk_map.clone(),
                subscribers: query.subscriber_count().await,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Removes records whose subscriber set is empty; returns the count.
    pub async fn cleanup_orphans(&self) -> usize {
        let mut inner = self.inner.write().await;
        let mut orphaned = Vec::new();
        for (id, query) in inner.iter() {
            if query.subscriber_count().await == 0 {
                orphaned.push(id.clone());
            }
        }
        for id in &orphaned {
            inner.remove(id);
        }
        orphaned.len()
    }
}

//! Change-stream consumer.
//!
//! Connects to the replication sidecar's TCP feed of newline-delimited JSON
//! envelopes, matches each per-row change against registered live queries by
//! table dependency, and dispatches one partial-refresh task per
//! (change, matching query) pair. Stream failures reconnect after a backoff;
//! undecodable lines and empty envelopes are logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::db::DbPool;
use crate::refresh::{partial_refresh, AffectedKeys};
use crate::registry::Registry;

/// One decoded change-stream envelope; may describe several row changes.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default)]
    pub change: Vec<ChangeRecord>,
}

/// One per-row change description.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub schema: String,
    pub table: String,
    /// Change kind as emitted by the plugin; see [`ChangeRecord::kind`].
    #[serde(rename = "kind")]
    pub kind_raw: String,
    #[serde(default)]
    pub oldkeys: Keys,
    #[serde(default)]
    pub newkeys: Keys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Kinds this consumer does not act on (messages, truncates, …).
    Other,
}

/// Parallel name/value arrays as emitted by the logical-decoding plugin.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Keys {
    #[serde(default)]
    pub keynames: Vec<String>,
    #[serde(default)]
    pub keyvalues: Vec<Value>,
}

impl ChangeRecord {
    /// Decoded change kind; anything unrecognized maps to
    /// [`ChangeKind::Other`].
    pub fn kind(&self) -> ChangeKind {
        match self.kind_raw.as_str() {
            "insert" => ChangeKind::Insert,
            "update" => ChangeKind::Update,
            "delete" => ChangeKind::Delete,
            _ => ChangeKind::Other,
        }
    }

    /// Qualified `schema.table` this change touches.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// The primary-key tuple identifying the changed row: the new tuple for
    /// inserts, the old tuple otherwise.
    pub fn key_map(&self) -> BTreeMap<String, Value> {
        let keys = match self.kind() {
            ChangeKind::Insert => &self.newkeys,
            _ => &self.oldkeys,
        };
        keys.keynames
            .iter()
            .cloned()
            .zip(keys.keyvalues.iter().cloned())
            .collect()
    }

    /// The change expressed as an affected-keys map for predicate building.
    pub fn affected(&self) -> AffectedKeys {
        let mut out = AffectedKeys::new();
        out.insert(self.qualified_table(), self.key_map());
        out
    }
}

/// Decodes one stream line into an envelope.
pub fn parse_envelope(line: &str) -> Result<Envelope> {
    serde_json::from_str(line).context("decode change envelope")
}

/// Routes every change of an envelope to the live queries depending on its
/// table. Each dispatch runs in its own task so one slow refresh never
/// blocks the stream.
pub async fn dispatch_envelope(
    envelope: &Envelope,
    registry: &Registry,
    db: &Arc<DbPool>,
    deadline: Duration,
) {
    if envelope.change.is_empty() {
        debug!("change envelope without entries, skipping");
        return;
    }

    for change in &envelope.change {
        if change.kind() == ChangeKind::Other {
            continue;
        }
        let qualified = change.qualified_table();
        let affected = change.affected();
        let matched = registry.matching_table(&qualified).await;

        debug!(
            table = %qualified,
            kind = %change.kind_raw,
            matched = matched.len(),
            "change fan-out"
        );

        for query in matched {
            let db = db.clone();
            let affected = affected.clone();
            tokio::spawn(async move {
                partial_refresh(&db, deadline, &query, &affected).await;
            });
        }
    }
}

/// Runs the consumer until shutdown: connect, drain lines, reconnect with
/// backoff on any stream error. The read loop itself carries no deadline;
/// it blocks on the stream indefinitely.
pub async fn run_consumer(
    addr: String,
    registry: Arc<Registry>,
    db: Arc<DbPool>,
    deadline: Duration,
    retry: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(%addr, "change stream connected");
                if let Err(err) =
                    consume_stream(stream, &registry, &db, deadline, &mut shutdown).await
                {
                    warn!(%addr, error = %err, "change stream failed");
                }
            }
            Err(err) => {
                warn!(%addr, error = %err, "change stream connect failed");
            }
        }
        if *shutdown.borrow() {
            return;
        }
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

async fn consume_stream(
    stream: TcpStream,
    registry: &Registry,
    db: &Arc<DbPool>,
    deadline: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            line = lines.next_line() => line.context("read change stream")?,
        };
        let Some(line) = line else {
            return Err(anyhow::anyhow!("change stream closed"));
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_envelope(&line) {
            Ok(envelope) => dispatch_envelope(&envelope, registry, db, deadline).await,
            Err(err) => warn!(error = %err, "skipping undecodable change line"),
        }
    }
}

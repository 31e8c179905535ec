//! Runtime configuration.
//!
//! Every knob reads from a `GRID_LIVE_*` environment variable with a
//! sensible default, so deployments tune behavior without rebuilding.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Configuration for one grid_live server process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the subscribe-protocol TCP listener.
    pub listen_addr: SocketAddr,
    /// `host:port` of the change-capture sidecar's stream feed.
    pub change_stream_addr: String,
    /// PostgreSQL connection string.
    pub pg_dsn: String,
    /// Schemas visible to catalog introspection.
    pub schemas: Vec<String>,
    /// Whether introspection also loads index definitions.
    pub include_indexes: bool,
    /// Whether introspection also loads foreign keys.
    pub include_foreign_keys: bool,
    /// Number of pooled database connections.
    pub pool_size: usize,
    /// Deadline applied to every outbound database query.
    pub query_timeout: Duration,
    /// Period of the background catalog refresh loop.
    pub catalog_refresh_interval: Duration,
    /// Period of the registry orphan sweep.
    pub orphan_sweep_interval: Duration,
    /// Backoff between change-stream reconnect attempts.
    pub change_stream_retry: Duration,
}

impl Config {
    /// Loads configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let listen_addr = parse_socket_addr(
            std::env::var("GRID_LIVE_LISTEN_ADDR").ok(),
            "127.0.0.1:8080",
        )?;
        let change_stream_addr = std::env::var("GRID_LIVE_CHANGE_STREAM_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9000".to_string());
        let pg_dsn = std::env::var("GRID_LIVE_PG_DSN").unwrap_or_else(|_| {
            "host=127.0.0.1 port=5432 user=postgres password=pass dbname=postgres".to_string()
        });
        let schemas = std::env::var("GRID_LIVE_SCHEMAS")
            .unwrap_or_else(|_| "public".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let include_indexes =
            parse_bool(std::env::var("GRID_LIVE_INCLUDE_INDEXES").ok(), true);
        let include_foreign_keys =
            parse_bool(std::env::var("GRID_LIVE_INCLUDE_FOREIGN_KEYS").ok(), true);
        let pool_size =
            parse_usize(std::env::var("GRID_LIVE_POOL_SIZE").ok(), 4)?.max(1);
        let query_timeout_ms =
            parse_u64(std::env::var("GRID_LIVE_QUERY_TIMEOUT_MS").ok(), 5_000)?.max(1);
        let catalog_refresh_interval_ms = parse_u64(
            std::env::var("GRID_LIVE_CATALOG_REFRESH_INTERVAL_MS").ok(),
            30_000,
        )?
        .max(1);
        let orphan_sweep_interval_ms = parse_u64(
            std::env::var("GRID_LIVE_ORPHAN_SWEEP_INTERVAL_MS").ok(),
            30_000,
        )?
        .max(1);
        let change_stream_retry_ms = parse_u64(
            std::env::var("GRID_LIVE_CHANGE_STREAM_RETRY_MS").ok(),
            5_000,
        )?
        .max(1);

        Ok(Self {
            listen_addr,
            change_stream_addr,
            pg_dsn,
            schemas,
            include_indexes,
            include_foreign_keys,
            pool_size,
            query_timeout: Duration::from_millis(query_timeout_ms),
            catalog_refresh_interval: Duration::from_millis(catalog_refresh_interval_ms),
            orphan_sweep_interval: Duration::from_millis(orphan_sweep_interval_ms),
            change_stream_retry: Duration::from_millis(change_stream_retry_ms),
        })
    }
}

fn parse_socket_addr(value: Option<String>, default: &str) -> Result<SocketAddr> {
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.parse()
        .with_context(|| format!("invalid socket address '{raw}'"))
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u64(value: Option<String>, default: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid integer '{raw}'")),
        None => Ok(default),
    }
}

fn parse_usize(value: Option<String>, default: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid integer '{raw}'")),
        None => Ok(default),
    }
}

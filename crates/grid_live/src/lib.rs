//! grid_live — live editable query views over PostgreSQL.
//!
//! A single grid_live process hosts:
//! - the subscriber frontline (line-delimited JSON subscribe protocol),
//! - the live-query registry with per-query subscriber fan-out,
//! - the change-stream consumer driving partial refreshes,
//! - background catalog refresh and registry sweep loops.
//!
//! This module is the composition root that starts these subsystems and
//! ties their lifetimes to one shutdown signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

pub mod catalog_loader;
pub mod config;
pub mod consumer;
pub mod db;
pub mod edit;
pub mod protocol;
pub mod refresh;
pub mod registry;
pub mod serialize;
pub mod session;

pub use config::Config;

use catalog_loader::SharedCatalog;
use db::DbPool;
use registry::Registry;
use session::SessionDeps;

/// Runs the server until Ctrl-C is received.
pub async fn run(config: Config) -> Result<()> {
    run_with_shutdown(config, tokio::signal::ctrl_c()).await
}

/// Runs the full runtime with an externally supplied shutdown signal.
pub async fn run_with_shutdown<F>(config: Config, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>> + Send,
{
    info!(
        listen_addr = %config.listen_addr,
        change_stream_addr = %config.change_stream_addr,
        schemas = ?config.schemas,
        pool_size = config.pool_size,
        "grid_live starting"
    );

    let db = Arc::new(
        DbPool::connect(&config.pg_dsn, config.pool_size)
            .await
            .context("connect database pool")?,
    );

    // Initial catalog load is blocking: serving subscriptions without a
    // snapshot would fail every provenance pass anyway.
    let catalog = Arc::new(SharedCatalog::new());
    let introspect = catalog_loader::IntrospectOptions {
        include_indexes: config.include_indexes,
        include_foreign_keys: config.include_foreign_keys,
    };
    let snapshot =
        catalog_loader::load_snapshot(&db, &config.schemas, introspect, config.query_timeout)
            .await
            .context("load initial catalog snapshot")?;
    info!(
        table_count = snapshot.len(),
        checksum = %snapshot.checksum(),
        "catalog snapshot loaded"
    );
    catalog.install(snapshot).await;

    let registry = Arc::new(Registry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_task = tokio::spawn(catalog_loader::run_refresh_loop(
        catalog.clone(),
        db.clone(),
        config.schemas.clone(),
        introspect,
        config.catalog_refresh_interval,
        config.query_timeout,
        shutdown_rx.clone(),
    ));

    let consumer_task = tokio::spawn(consumer::run_consumer(
        config.change_stream_addr.clone(),
        registry.clone(),
        db.clone(),
        config.query_timeout,
        config.change_stream_retry,
        shutdown_rx.clone(),
    ));

    let sweep_task = tokio::spawn(run_sweep_loop(
        registry.clone(),
        config.orphan_sweep_interval,
        shutdown_rx.clone(),
    ));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("bind frontline listener {}", config.listen_addr))?;
    let deps = SessionDeps {
        registry: registry.clone(),
        catalog,
        db,
        query_timeout: config.query_timeout,
    };
    let frontline_task = tokio::spawn(session::run_frontline(listener, deps, shutdown_rx));

    info!(listen_addr = %config.listen_addr, "grid_live ready");

    if let Err(err) = shutdown.await {
        warn!(error = %err, "shutdown signal failed, stopping");
    }
    info!("grid_live shutting down");
    let _ = shutdown_tx.send(true);

    let _ = refresh_task.await;
    let _ = consumer_task.await;
    let _ = sweep_task.await;
    let _ = frontline_task.await;
    Ok(())
}

/// Lazily evicts live queries whose subscriber set emptied without an
/// explicit unsubscribe.
async fn run_sweep_loop(
    registry: Arc<Registry>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        let removed = registry.cleanup_orphans().await;
        if removed > 0 {
            info!(removed, "swept orphaned live queries");
        }
    }
}

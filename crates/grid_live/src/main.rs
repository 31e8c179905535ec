//! Binary entrypoint for running a single grid_live server.
//!
//! Startup stays intentionally thin and delegates all runtime orchestration
//! to `grid_live::run`.

use anyhow::Result;
use grid_live::{run, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Env-driven filtering so operators can tune verbosity without
    // rebuilding; keep a practical default if RUST_LOG is absent.
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grid_live=info,warn")),
        )
        .init();
    let config = Config::from_env()?;
    run(config).await
}

//! `sluice serve` -- run the rate-limited HTTP API.
//!
//! # Lifecycle
//!
//! ```text
//! 1. Load config and build the ingestor
//! 2. Spawn the rate-limit window sweeper
//! 3. Serve until Ctrl+C, then stop the sweeper
//! ```

use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sluice_services::{ApiState, build_router};

use super::{build_ingestor, load_config};

/// Arguments for the `sluice serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Provider streaming URL (overrides `provider.url`).
    #[arg(long)]
    pub url: Option<String>,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub addr: String,

    /// Seconds between sweeps of idle rate-limit windows.
    #[arg(long, default_value = "300")]
    pub sweep_interval_secs: u64,

    /// Allowed CORS origin; repeatable. Any origin when omitted.
    #[arg(long = "cors-origin")]
    pub cors_origins: Vec<String>,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let ingestor = build_ingestor(config, args.url)?;
    let state = ApiState::new(ingestor);

    let cancel = CancellationToken::new();
    let sweeper = state.limiter.spawn_sweeper(
        Duration::from_secs(args.sweep_interval_secs.max(1)),
        cancel.clone(),
    );

    let app = build_router(state, &args.cors_origins);
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    info!(addr = %listener.local_addr()?, "sluice API listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = sweeper.await;
    info!("server stopped");
    Ok(())
}

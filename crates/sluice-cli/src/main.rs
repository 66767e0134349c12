//! `sluice` -- CLI binary for the sluice streaming-ingestion layer.
//!
//! Provides the following subcommands:
//!
//! - `sluice ingest` -- Run one generation stream end to end and print it.
//! - `sluice presets` -- Show the resolved rate-limit and breaker presets.
//! - `sluice serve` -- Run the rate-limited HTTP API.

use clap::{Parser, Subcommand};

mod commands;

/// sluice streaming-ingestion CLI.
#[derive(Parser)]
#[command(name = "sluice", about = "Resilient streaming ingestion for generative providers", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Stream one generation from the provider.
    Ingest(commands::ingest::IngestArgs),

    /// Show resolved presets as JSON.
    Presets(commands::presets::PresetsArgs),

    /// Start the HTTP API.
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest(args) => commands::ingest::run(args).await?,
        Commands::Presets(args) => commands::presets::run(args).await?,
        Commands::Serve(args) => commands::serve::run(args).await?,
    }

    Ok(())
}

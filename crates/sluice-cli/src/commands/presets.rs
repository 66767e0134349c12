//! `sluice presets` -- print the effective resilience configuration.

use clap::Args;

use super::load_config;

/// Arguments for the `sluice presets` subcommand.
#[derive(Args)]
pub struct PresetsArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,
}

pub async fn run(args: PresetsArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let resolved = serde_json::json!({
        "rate_limits": config.resolved_rate_limits(),
        "breakers": config.resolved_breakers(),
        "retry": config.retry,
        "stream": config.stream,
    });
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

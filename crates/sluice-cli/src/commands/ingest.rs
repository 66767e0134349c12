//! `sluice ingest` -- run one generation stream and print it as it arrives.
//!
//! Visible text goes to stdout as it is flushed; status markers and the
//! final section summary go to stderr. `--json` replaces the summary with
//! the full outcome on stdout.
//!
//! # Example
//!
//! ```text
//! sluice ingest --url http://localhost:9000/generate --body '{"topic":"launch"}'
//! sluice ingest --stream-id run-7 --checkpoint-dir ./checkpoints
//! sluice ingest --resume --stream-id run-7 --checkpoint-dir ./checkpoints
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sluice_core::{CheckpointRecovery, FileCheckpointStore, IngestOutcome, IngestRequest, StreamIngestor};
use sluice_llm::GenerationRequest;
use sluice_types::StreamEvent;
use sluice_types::config::presets::PERSISTENCE;

use super::{build_ingestor, load_config};

/// Arguments for the `sluice ingest` subcommand.
#[derive(Args)]
pub struct IngestArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Provider streaming URL (overrides `provider.url`).
    #[arg(long)]
    pub url: Option<String>,

    /// JSON request body forwarded to the provider.
    #[arg(long, default_value = "{}")]
    pub body: String,

    /// Stream id used as the checkpoint key (random when omitted).
    #[arg(long)]
    pub stream_id: Option<String>,

    /// Persist checkpoints as files in this directory.
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Rebuild the result from the stream's last checkpoint instead of
    /// contacting the provider.
    #[arg(long, requires = "stream_id")]
    pub resume: bool,

    /// Print the final outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: IngestArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let interval = config.stream.checkpoint_interval;
    let mut ingestor = build_ingestor(config, args.url)?;

    if let Some(dir) = args.checkpoint_dir {
        let checkpoints = CheckpointRecovery::new(Arc::new(FileCheckpointStore::new(dir)))
            .with_interval(interval)
            .with_breaker(ingestor.breakers().breaker(PERSISTENCE));
        ingestor = ingestor.with_checkpoints(checkpoints);
    }

    if args.resume {
        let stream_id = args.stream_id.unwrap_or_default();
        let outcome = ingestor
            .recover(&stream_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("no checkpoint for stream '{stream_id}'"))?;
        println!("{}", outcome.content);
        return report(&outcome, args.json);
    }

    let body: serde_json::Value = serde_json::from_str(&args.body)
        .map_err(|e| anyhow::anyhow!("--body is not valid JSON: {e}"))?;
    let mut request = IngestRequest::new(GenerationRequest::new(body));
    if let Some(id) = args.stream_id {
        request = request.with_stream_id(id);
    }

    let outcome = stream(&ingestor, request).await?;
    report(&outcome, args.json)
}

/// Run the stream, echoing output until it ends or Ctrl+C is pressed.
async fn stream(ingestor: &StreamIngestor, request: IngestRequest) -> anyhow::Result<IngestOutcome> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt, cancelling stream");
                cancel.cancel();
            }
        })
    };

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Status { status } => eprintln!("[status] {status}"),
                StreamEvent::Update(update) => {
                    if let Some(delta) = update.content.get(printed..) {
                        let _ = write!(stdout, "{delta}");
                        let _ = stdout.flush();
                    }
                    printed = update.content.len();
                }
            }
        }
        if printed > 0 {
            println!();
        }
    });

    let result = ingestor.ingest(request, tx, cancel).await;
    ctrl_c.abort();
    let _ = printer.await;
    Ok(result?)
}

fn report(outcome: &IngestOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    eprintln!(
        "\nstream {} finished: {} chunks, {} sections{}",
        outcome.stream_id,
        outcome.chunk_count,
        outcome.sections.len(),
        if outcome.recovered { " (recovered from checkpoint)" } else { "" }
    );
    for section in &outcome.sections {
        eprintln!("  {:>2}. [{}] {}", section.order, section.kind, section.title);
    }
    if !outcome.products.is_empty() {
        eprintln!("products: {}", serde_json::to_string(&outcome.products)?);
    }
    Ok(())
}

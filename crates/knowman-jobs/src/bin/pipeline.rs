//! Knowman pipeline runner
//!
//! Captures local files into an in-memory pipeline, runs every stage, and
//! prints the enriched items.
//!
//! Usage:
//!   cargo run --bin knowman-pipeline -- notes.txt page.html
//!   cargo run --bin knowman-pipeline -- --json --wait-secs 120 docs/*.md

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use knowman_inference::ProviderResolver;
use knowman_jobs::{
    html, CaptureRequest, EventBus, Job, KnowledgeItem, MemoryBroker, Orchestrator, QueueSet,
    Store, WorkerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "knowman-pipeline")]
#[command(author, version, about = "Capture files and run them through the enrichment pipeline")]
#[command(after_help = "Files ending in .html or .htm are captured as web pages and run through \
extraction. Everything else is captured as plain text.

Backends and workers are configured through the environment (AI_PROVIDER, \
EMBEDDING_PROVIDER, PROCESSING_WORKERS, PROCESSING_TIMEOUT); logging through \
LOG_FORMAT, LOG_FILE and RUST_LOG.")]
struct Cli {
    /// Give up waiting for jobs after this many seconds
    #[arg(short, long, default_value_t = 300)]
    wait_secs: u64,

    /// Print results as JSON
    #[arg(short, long)]
    json: bool,

    /// Files to capture
    #[arg(required = true, num_args = 1..)]
    files: Vec<PathBuf>,
}

const PROGRESS_INTERVAL_MS: u64 = 200;

/// Logs go to stderr or a file; stdout carries the results.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI").ok().map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "knowman_jobs=info,knowman_inference=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("knowman-pipeline.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

fn capture_request(path: &Path) -> anyhow::Result<CaptureRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let title = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("untitled")
        .to_string();

    let is_html = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
        .unwrap_or(false);

    let request = if is_html {
        let page = html::extract_page(&raw);
        CaptureRequest::new(title, page.text)
            .with_html(raw)
            .with_url(format!("file://{}", path.display()))
    } else {
        CaptureRequest::new(title, raw)
    };
    Ok(request)
}

#[derive(Serialize)]
struct ItemReport {
    item: KnowledgeItem,
    jobs: Vec<Job>,
}

fn print_report(report: &ItemReport) {
    let item = &report.item;
    println!("== {} ({})", item.title, item.id);
    println!("   status:      {}", item.status);
    println!(
        "   summary:     {}",
        item.summary.as_deref().unwrap_or("(none)")
    );
    println!("   tags:        {}", item.tags.join(", "));
    println!(
        "   embedding:   {}",
        item.embedding
            .as_ref()
            .map(|e| format!("{} dims", e.len()))
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("   readability: {:.1}", item.readability_score);
    for job in &report.jobs {
        match &job.error {
            Some(error) => println!(
                "   - {:<13} {} after {} attempt(s): {}",
                job.job_type, job.status, job.attempts, error
            ),
            None => println!(
                "   - {:<13} {} after {} attempt(s)",
                job.job_type, job.status, job.attempts
            ),
        }
    }
}

/// Resolves once every job is terminal. Returns false on timeout or Ctrl-C.
async fn wait_for_jobs(orchestrator: &Orchestrator, wait: Duration) -> anyhow::Result<bool> {
    let deadline = Instant::now() + wait;
    let mut ticker = interval(Duration::from_millis(PROGRESS_INTERVAL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if orchestrator.outstanding().await? == 0 {
                    return Ok(true);
                }
            }
            _ = sleep_until(deadline) => {
                warn!(wait_secs = wait.as_secs(), "Timed out waiting for jobs");
                return Ok(false);
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                warn!("Interrupted, shutting down");
                return Ok(false);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging();

    let events = EventBus::default();
    let providers = Arc::new(ProviderResolver::from_env().with_events(events.clone()));

    for for_embeddings in [false, true] {
        let status = providers.provider_status(for_embeddings).await;
        info!(
            testing = %status.testing,
            provider = %status.provider,
            model = %status.model,
            health = status.health,
            fallback_reason = status.fallback_reason.as_deref().unwrap_or(""),
            "Provider ready"
        );
    }

    let worker_config = WorkerConfig::from_env();
    let queues = QueueSet::standard(worker_config.workers);
    let orchestrator = Orchestrator::new(
        Store::in_memory(),
        Arc::new(MemoryBroker::from_queues(&queues)),
        queues,
        providers,
        events,
    );
    let handle = orchestrator.worker_builder(worker_config).build().start();

    let mut item_ids = Vec::new();
    for path in &cli.files {
        let request = match capture_request(path) {
            Ok(request) => request,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Skipping file");
                continue;
            }
        };
        match orchestrator.capture(request).await {
            Ok(outcome) => item_ids.push(outcome.item.id),
            Err(e) => error!(path = %path.display(), error = %e, "Capture failed"),
        }
    }

    let finished = if item_ids.is_empty() {
        true
    } else {
        wait_for_jobs(&orchestrator, Duration::from_secs(cli.wait_secs)).await?
    };

    let mut reports = Vec::with_capacity(item_ids.len());
    for item_id in item_ids {
        reports.push(ItemReport {
            item: orchestrator.get_item(item_id).await?,
            jobs: orchestrator.jobs_for_item(item_id).await?,
        });
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    let overview = orchestrator.status_overview().await?;
    info!(
        total = overview.summary.total,
        pending = overview.summary.pending,
        processing = overview.summary.processing,
        failed = overview.summary.failed,
        finished,
        "Pipeline run finished"
    );

    handle.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults_and_flags() {
        let cli = Cli::try_parse_from(["knowman-pipeline", "notes.txt"]).unwrap();
        assert_eq!(cli.wait_secs, 300);
        assert!(!cli.json);
        assert_eq!(cli.files, vec![PathBuf::from("notes.txt")]);

        let cli = Cli::try_parse_from(["knowman-pipeline", "-j", "-w", "5", "a.html", "b.md"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.wait_secs, 5);
        assert_eq!(cli.files.len(), 2);
    }

    #[test]
    fn test_cli_requires_files() {
        assert!(Cli::try_parse_from(["knowman-pipeline", "--json"]).is_err());
        assert!(Cli::try_parse_from(["knowman-pipeline", "--wait-secs", "soon", "a"]).is_err());
    }

    #[test]
    fn test_html_files_captured_as_pages() {
        let dir = std::env::temp_dir().join(format!("knowman-cli-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let page = dir.join("page.HTM");
        std::fs::write(&page, "<html><body><p>Hello page.</p></body></html>").unwrap();
        let note = dir.join("note.txt");
        std::fs::write(&note, "Plain note.").unwrap();

        let request = capture_request(&page).unwrap();
        assert_eq!(request.title, "page.HTM");
        assert_eq!(request.content, "Hello page.");
        assert!(request.html.is_some());

        let request = capture_request(&note).unwrap();
        assert_eq!(request.content, "Plain note.");
        assert!(request.html.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

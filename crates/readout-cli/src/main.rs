//! `readout`: track trial readouts and produce the editors' digest.
//!
//! # Usage
//!
//! ```
//! readout sync                       # every configured topic
//! readout sync --topic oncology-phase3 --max-pages 2
//! readout link-citations --max-trials 50
//! readout digest --format markdown --out digest.md
//! readout runs --limit 10
//! ```
//!
//! Configuration comes from `readout.toml` (or `--config`) and `READOUT__*`
//! environment variables; see [`config::AppConfig`].

mod config;
mod render;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use config::AppConfig;
use readout_core::{store::TrialStore, topic::select_topics};
use readout_pipeline::{
  CancelFlag, DigestBuilder, DigestQuery, SyncOrchestrator, link_citations,
};
use readout_registry::{PubMedClient, RegistryClient};
use readout_scoring::ScoringEngine;
use readout_store_sqlite::SqliteStore;
use render::Format;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "readout", version, about = "Clinical-trial readout tracker")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, env = "READOUT_CONFIG", default_value = "readout.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch every configured topic (or the named ones) into the store.
  Sync {
    /// Only sync this topic; repeatable.
    #[arg(long = "topic", value_name = "ID")]
    topics:    Vec<String>,
    /// Override `registry.max_pages` for this run.
    #[arg(long)]
    max_pages: Option<u32>,
  },

  /// Render the ranked digest.
  Digest {
    /// Write here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    out:    Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = Format::Markdown)]
    format: Format,
    /// Override `digest.days_ahead`.
    #[arg(long)]
    days:   Option<u32>,
    /// Restrict to this topic; repeatable.
    #[arg(long = "topic", value_name = "ID")]
    topics: Vec<String>,
    /// Score as of this date instead of today (YYYY-MM-DD).
    #[arg(long)]
    as_of:  Option<NaiveDate>,
  },

  /// Look up publications for stored trials.
  LinkCitations {
    /// Override `citations.max_trials_per_run`.
    #[arg(long)]
    max_trials: Option<usize>,
  },

  /// List recent sync runs.
  Runs {
    #[arg(long, value_name = "ID")]
    topic: Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = AppConfig::load(&cli.config)?;

  let store_path = cfg.resolved_store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?
    .with_change_detection(cfg.change_detection.clone());
  let store = Arc::new(store);

  match cli.command {
    Command::Sync { topics, max_pages } => sync(&cfg, store, &topics, max_pages).await,
    Command::Digest { out, format, days, topics, as_of } => {
      let query = DigestQuery { days_ahead: days, topics };
      let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
      digest(&cfg, store, &query, as_of, format, out).await
    }
    Command::LinkCitations { max_trials } => {
      let client = PubMedClient::new(cfg.citations.clone())
        .context("failed to build citation client")?;
      let report = link_citations(
        &*store,
        &client,
        &cfg.citations,
        &cfg.digest,
        Utc::now().date_naive(),
        max_trials,
      )
      .await
      .context("citation linking failed")?;
      println!(
        "checked {} trials: {} with citations, {} citations, {} failed",
        report.checked, report.with_citations, report.citations, report.failed
      );
      Ok(())
    }
    Command::Runs { topic, limit } => runs(&*store, topic.as_deref(), limit).await,
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn sync(
  cfg: &AppConfig,
  store: Arc<SqliteStore>,
  names: &[String],
  max_pages: Option<u32>,
) -> anyhow::Result<()> {
  let topics: Vec<_> = select_topics(&cfg.topics, names)?
    .into_iter()
    .cloned()
    .collect();

  let mut settings = cfg.registry.clone();
  if max_pages.is_some() {
    settings.max_pages = max_pages;
  }
  let client =
    RegistryClient::new(settings.clone()).context("failed to build registry client")?;

  let cancel = CancelFlag::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt received; stopping after the current trial");
      on_signal.cancel();
    }
  });

  let orchestrator =
    SyncOrchestrator::new(store, client, settings).with_cancel_flag(cancel);
  let report = orchestrator.sync_all(&topics).await.context("sync failed")?;

  for run in &report.runs {
    println!(
      "{:<24} {:<10} created {:>4}  updated {:>4}  unchanged {:>4}  failed {:>4}  pages {}",
      run.topic_id,
      run.status,
      run.counts.created,
      run.counts.updated,
      run.counts.unchanged,
      run.counts.failed,
      run.pages_fetched,
    );
  }

  let failed = report.failed_topics();
  if !failed.is_empty() {
    bail!("sync failed for topics: {}", failed.join(", "));
  }
  Ok(())
}

async fn digest(
  cfg: &AppConfig,
  store: Arc<SqliteStore>,
  query: &DigestQuery,
  as_of: NaiveDate,
  format: Format,
  out: Option<PathBuf>,
) -> anyhow::Result<()> {
  let engine = ScoringEngine::new(cfg.scoring.clone())?;
  let builder =
    DigestBuilder::new(store, engine, cfg.topics.clone(), cfg.digest.clone())?;
  let entries = builder
    .build(query, as_of)
    .await
    .context("failed to build digest")?;
  tracing::info!(entries = entries.len(), %as_of, "digest built");

  let rendered = render::render(&entries, format, &cfg.topics, Utc::now())?;
  match out {
    Some(path) => {
      tokio::fs::write(&path, rendered)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
      tracing::info!(path = %path.display(), format = format.extension(), "digest written");
    }
    None => print!("{rendered}"),
  }
  Ok(())
}

async fn runs(store: &SqliteStore, topic: Option<&str>, limit: usize) -> anyhow::Result<()> {
  let runs = store
    .list_sync_runs(topic, limit)
    .await
    .context("failed to list sync runs")?;
  for run in runs {
    println!(
      "{}  {}  {:<24} {:<10} seen {:>5}  created {:>4}  updated {:>4}  failed {:>4}{}",
      run.started_at.format("%Y-%m-%d %H:%M:%S"),
      run.sync_run_id,
      run.topic_id,
      run.status,
      run.records_seen,
      run.counts.created,
      run.counts.updated,
      run.counts.failed,
      run
        .failure_reason
        .as_deref()
        .map(|r| format!("  ({r})"))
        .unwrap_or_default(),
    );
  }
  Ok(())
}

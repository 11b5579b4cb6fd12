//! `docdir-sync`: applies scrape batches to the provider directory.
//!
//! # Usage
//!
//! ```text
//! docdir-sync run shard-a.json shard-b.json
//! docdir-sync --config docdir.toml retire --kind doctor --key doc-1
//! ```

use std::{path::{Path, PathBuf}, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use docdir_core::{audit::Auditor, entity::EntityKind};
use docdir_store_sqlite::SqliteStore;
use docdir_sync::{Orchestrator, SourcePayload, SyncConfig};
use tokio::task::JoinSet;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Provider directory reconciliation")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "docdir.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Apply batch files. Each file is one shard; shards run concurrently.
  Run {
    #[arg(required = true, value_name = "BATCH")]
    batches: Vec<PathBuf>,
  },
  /// Soft-deactivate an entity that no longer appears in the source.
  Retire {
    /// `establishment` or `doctor`.
    #[arg(long)]
    kind: EntityKind,
    #[arg(long)]
    key:  String,
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

  let cfg = SyncConfig::load(&cli.config).context("failed to read config")?;
  let store_path = cfg.resolved_store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let engine = Arc::new(Orchestrator::new(Arc::new(store), Auditor::default(), &cfg));

  match cli.command {
    Command::Run { batches } => run(engine, batches).await,
    Command::Retire { kind, key } => {
      let outcome = engine
        .retire(kind, &key)
        .await
        .with_context(|| format!("failed to retire {kind} `{key}`"))?;
      println!("{}", serde_json::to_string(&outcome)?);
      Ok(())
    }
  }
}

async fn run(engine: Arc<Orchestrator<SqliteStore>>, batches: Vec<PathBuf>) -> anyhow::Result<()> {
  let mut shards = JoinSet::new();
  for path in batches {
    let payloads = read_batch(&path).await?;
    let engine = engine.clone();
    shards.spawn(async move {
      let report = engine.run_batch(payloads).await;
      (path, report)
    });
  }

  loop {
    tokio::select! {
      joined = shards.join_next() => {
        let Some(joined) = joined else { break };
        let (path, report) = joined.context("shard task failed")?;
        info!(shard = %path.display(), batch_id = %report.batch_id, "shard done");
        println!("{}", serde_json::to_string(&report)?);
      }
      _ = tokio::signal::ctrl_c() => {
        // Re-running the same batches later converges to the same state.
        warn!(in_flight = shards.len(), "interrupted, aborting in-flight batches");
        shards.abort_all();
        anyhow::bail!("interrupted");
      }
    }
  }

  Ok(())
}

async fn read_batch(path: &Path) -> anyhow::Result<Vec<SourcePayload>> {
  let raw = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read {path:?}"))?;
  serde_json::from_str(&raw).with_context(|| format!("{path:?} is not a batch"))
}

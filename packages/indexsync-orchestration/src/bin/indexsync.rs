//! Indexsync CLI
//!
//! # Usage
//!
//! ```bash
//! # Delta pass for every configured repository
//! indexsync --config indexsync.yaml index
//!
//! # Full pass for one repository
//! indexsync --config indexsync.yaml index --mode full --repository bedroom
//!
//! # Reset tracking state
//! indexsync --config indexsync.yaml init --repository bedroom
//! ```
//!
//! Log level comes from `RUST_LOG` (default `info`).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indexsync_core::{CacheService, SyncConfig};
use indexsync_orchestration::{
    Action, AuthTokenBroker, ChangeTracker, ContentServiceClient, HttpChangeFeed,
    HttpContentSource, HttpTokenRegistrar, RetryPolicy, RunState, SyncOrchestrator, TrackingMode,
};
use indexsync_storage::{
    CursorStore, InMemoryCursorStore, SearchIndexClient, SqliteCursorStore, TantivySearchIndex,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "indexsync")]
#[command(about = "Keep a search index in sync with a document store's change feed", long_about = None)]
struct Cli {
    /// YAML configuration (version 1)
    #[arg(short, long)]
    config: PathBuf,

    /// Print cache metrics in Prometheus text format on exit
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index changes (delta) or everything (full)
    Index {
        #[arg(short, long, default_value = "delta")]
        mode: String,

        /// Repository id, all configured repositories when absent
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// Reset tracking state: drop indexed documents and the cursor
    Init {
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// Re-read one object and update its index document
    Reindex {
        #[arg(short, long)]
        repository: String,

        object_id: String,
    },

    /// Remove one object from the index
    Remove {
        #[arg(short, long)]
        repository: String,

        object_id: String,
    },

    /// Search indexed documents, text taken literally
    Search {
        #[arg(short, long)]
        repository: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,

        text: String,
    },

    /// Show stored cursors
    Cursors,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_yaml(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let registry = Registry::new();
    let caches = Arc::new(CacheService::new(&config.cache).with_metrics(&registry)?);

    let registrar = Arc::new(HttpTokenRegistrar::new(&config.content_service)?);
    let broker = Arc::new(AuthTokenBroker::new(
        registrar,
        config.content_service.token_refresh_margin(),
    ));
    let client = Arc::new(ContentServiceClient::new(
        &config.content_service,
        &config.repositories,
        broker,
    )?);

    let index: Arc<dyn SearchIndexClient> = match &config.index.directory {
        Some(dir) => Arc::new(TantivySearchIndex::open_or_create(
            dir,
            config.index.writer_memory_bytes,
        )?),
        None => {
            warn!("No index directory configured, documents are kept in memory");
            Arc::new(TantivySearchIndex::in_ram()?)
        }
    };
    let cursors: Arc<dyn CursorStore> = match &config.index.cursor_database {
        Some(path) => Arc::new(SqliteCursorStore::open(path)?),
        None => Arc::new(InMemoryCursorStore::new()),
    };

    let tracker = Arc::new(
        ChangeTracker::new(
            Arc::new(HttpChangeFeed::new(client.clone())),
            Arc::new(HttpContentSource::new(client, caches.clone())),
            index,
            cursors.clone(),
            caches.clone(),
            config.tracking.clone(),
        )
        .with_retry(RetryPolicy::from_config(&config.content_service.retry)),
    );
    let orchestrator = Arc::new(SyncOrchestrator::new(
        tracker.clone(),
        config.repository_ids(),
    ));

    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current batch");
                for repository_id in orchestrator.repositories() {
                    orchestrator.cancel(repository_id);
                }
            }
        });
    }

    match cli.command {
        Commands::Index { mode, repository } => {
            let action = Action::Index(TrackingMode::from_str(&mode)?);
            run_action(&orchestrator, action, repository.as_deref()).await?;
        }
        Commands::Init { repository } => {
            run_action(&orchestrator, Action::Init, repository.as_deref()).await?;
        }
        Commands::Reindex {
            repository,
            object_id,
        } => {
            let outcome = tracker.reindex_object(&repository, &object_id).await?;
            println!("{}/{}: {:?}", repository, object_id, outcome);
        }
        Commands::Remove {
            repository,
            object_id,
        } => {
            tracker.remove_object(&repository, &object_id).await?;
            println!("{}/{}: removed", repository, object_id);
        }
        Commands::Search {
            repository,
            limit,
            text,
        } => {
            for doc in tracker.search(&repository, &text, limit).await? {
                println!(
                    "{}\t{}",
                    doc.object_id,
                    doc.text_field("name").unwrap_or_default()
                );
            }
        }
        Commands::Cursors => {
            for cursor in cursors.list().await? {
                println!(
                    "{}\t{}\t{}",
                    cursor.repository_id, cursor.sequence, cursor.updated_at
                );
            }
        }
    }

    info!("{}", caches.stats());
    if cli.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        print!("{}", String::from_utf8_lossy(&buffer));
    }
    Ok(())
}

async fn run_action(
    orchestrator: &SyncOrchestrator,
    action: Action,
    repository: Option<&str>,
) -> anyhow::Result<()> {
    let runs = orchestrator.trigger(action, repository).await?;
    let mut failed = 0;
    for run in &runs {
        let state = run.state.state_name();
        println!(
            "{}\t{}\t{}\tindexed={} removed={} skipped={} failed={} cursor={}",
            run.repository_id,
            run.action,
            state,
            run.stats.indexed,
            run.stats.removed,
            run.stats.skipped,
            run.stats.failed,
            run.stats.cursor_after
        );
        if let RunState::Failed { error, .. } = &run.state {
            warn!(repository_id = %run.repository_id, "{}", error);
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} runs failed", failed, runs.len());
    }
    Ok(())
}

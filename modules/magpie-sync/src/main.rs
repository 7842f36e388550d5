use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use embed_client::EmbeddingClient;
use magpie_common::Config;
use magpie_graph::{migrate, GraphClient};
use magpie_sync::{
    Analyzer, BookmarkStore, EnrichmentController, FileStateStore, GraphStore, JsonFileSource,
    SyncPipeline, SyncState, SyncStateStore,
};
use xapi_client::XApiClient;

#[derive(Parser)]
#[command(name = "magpie-sync", about = "Bookmark knowledge graph sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a bookmark export into the graph.
    Sync {
        /// Path to the export file (JSON array or NDJSON).
        #[arg(long)]
        input: PathBuf,
        /// Ignore the cursor and re-submit the whole export.
        #[arg(long)]
        full: bool,
    },
    /// Repair truncated tweets from the X API.
    Enrich {
        /// Max truncated tweets to attempt this run.
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
    /// Print graph statistics.
    Stats,
    /// Apply schema constraints and indexes.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_redacted();

    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;

    match cli.command {
        Command::Sync { input, full } => run_sync(&config, client, input, full).await,
        Command::Enrich { limit } => run_enrich(&config, client, limit).await,
        Command::Stats => {
            let store = GraphStore::new(client);
            println!("{}", store.stats().await?);
            Ok(())
        }
        Command::Migrate => {
            migrate::migrate(&client, config.embedding.dimensions).await?;
            info!("Migrations applied");
            Ok(())
        }
    }
}

async fn run_sync(config: &Config, client: GraphClient, input: PathBuf, full: bool) -> Result<()> {
    migrate::migrate(&client, config.embedding.dimensions).await?;

    let store = Arc::new(GraphStore::new(client));
    let embedder = Arc::new(
        EmbeddingClient::new(
            &config.embedding.api_key,
            &config.embedding.model,
            config.embedding.dimensions,
        )
        .with_base_url(&config.embedding.api_base)
        .with_request_dimensions(config.embedding.provider == "openai"),
    );

    let state_store = Arc::new(FileStateStore::new(&config.state_file));
    let state = match state_store.load()? {
        Some(state) => state,
        None => {
            // State file lost or first run: rebuild the seen-set from the
            // graph so a full re-sync stays idempotent.
            let seen = store.stored_ids().await?;
            if !seen.is_empty() {
                info!(seen = seen.len(), "Recovered seen-set from graph");
            }
            SyncState::from_seen(seen)
        }
    };

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight work");
                cancelled.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut pipeline = SyncPipeline::new(
        Arc::new(JsonFileSource::new(input)),
        store,
        embedder,
        Analyzer::default(),
        state,
        state_store,
        config.sync_workers,
        cancelled,
    );
    let stats = pipeline.run(full).await?;
    println!("{stats}");
    Ok(())
}

async fn run_enrich(config: &Config, client: GraphClient, limit: usize) -> Result<()> {
    let token = config.require_x_bearer_token()?;
    let store = Arc::new(GraphStore::new(client));
    let hydrator = Arc::new(XApiClient::new(token));

    let controller = EnrichmentController::new(store, hydrator, config.enrich_batch_size);
    let stats = controller.run(limit).await?;
    println!("{stats}");
    Ok(())
}

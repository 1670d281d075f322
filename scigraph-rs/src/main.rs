use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scigraph_rs::documents::{DocumentSource, TextDirectory};
use scigraph_rs::driver::{GraphStore, MemoryStore, PostgresStore};
use scigraph_rs::extract::LlmExtractor;
use scigraph_rs::llm_client::openai::{CacheConfig, OpenAiClient};
use scigraph_rs::query::GraphReader;
use scigraph_rs::validate::ConsistencyValidator;
use scigraph_rs::{Pipeline, ScigraphConfig};

#[derive(Debug, Parser)]
#[command(name = "scigraph", version, about = "Knowledge graph of scientific papers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract entities and relations from every paper in a directory.
    Ingest {
        /// Defaults to PAPERS_DIR.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print node/edge counts and a sample of the graph.
    Status {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Drop and recreate the graph tables.
    Reset,
    /// Write the whole graph as JSON.
    Export {
        /// Defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scigraph_rs=info".parse()?),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ── Config ────────────────────────────────────────────────────────────────
    let config = ScigraphConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    // ── Store ─────────────────────────────────────────────────────────────────
    if config.uses_memory_store() {
        info!("using in-memory store");
        run(cli.command, &config, MemoryStore::new()).await
    } else {
        let store = PostgresStore::connect(&config.database_url, config.max_concurrency as u32 + 1)
            .await
            .context("connecting to DATABASE_URL")?;
        run(cli.command, &config, store).await
    }
}

async fn run<S: GraphStore>(command: Command, config: &ScigraphConfig, store: S) -> anyhow::Result<()> {
    store.ping().await?;

    match command {
        Command::Ingest { dir } => {
            store.ensure_schema().await?;
            let dir = dir.unwrap_or_else(|| config.papers_dir.clone());
            let documents = TextDirectory::new(&dir).load().await?;
            if documents.is_empty() {
                anyhow::bail!("no papers found in {}", dir.display());
            }
            info!(dir = %dir.display(), documents = documents.len(), "papers loaded");

            let client = OpenAiClient::new(config.require_api_key()?, &config.model_name, CacheConfig::default());
            let extractor = LlmExtractor::new(client, config.relation_policy());
            let validator = ConsistencyValidator::new(config.normalizer()?, config.relation_policy());
            let ingestion = config.ingestion();

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    shutdown_signal().await;
                    cancel.cancel();
                }
            });

            let pipeline = Pipeline::new(extractor, store)
                .with_validator(validator)
                .with_max_concurrency(ingestion.max_concurrency)
                .with_extraction_retry(ingestion.extraction_retry)
                .with_commit_retry(ingestion.commit_retry)
                .with_cancellation(cancel);

            let summary = pipeline.run(&documents).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.failed > 0 {
                anyhow::bail!("{} of {} documents failed", summary.failed, summary.documents.len());
            }
        }
        Command::Status { limit } => {
            store.ensure_schema().await?;
            let reader = GraphReader::new(&store);
            let stats = reader.stats().await?;
            println!("Nodes in DB: {}", stats.nodes);
            println!("Edges in DB: {}", stats.edges);
            if stats.nodes == 0 {
                println!("Database is empty. Run `scigraph ingest` first.");
                return Ok(());
            }

            println!("\n--- Sample Nodes ---");
            for node in reader.sample_nodes(limit).await? {
                println!("- {} [{}]", node.display_name(), node.entity_type);
            }
            println!("\n--- Sample Relationships ---");
            let relationships = reader.sample_relationships(limit).await?;
            if relationships.is_empty() {
                println!("No edges found (nodes exist, but they aren't connected).");
            }
            for rel in relationships {
                println!("{} --({})--> {}", rel.source, rel.relation, rel.target);
            }
        }
        Command::Reset => {
            store.reset().await?;
            println!("Graph reset: nodes and edges tables recreated.");
        }
        Command::Export { out } => {
            store.ensure_schema().await?;
            let snapshot = GraphReader::new(&store).snapshot().await?;
            let json = serde_json::to_string_pretty(&snapshot)?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), nodes = snapshot.nodes.len(), edges = snapshot.edges.len(), "graph exported");
                }
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C. Never resolves if no handler can be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl-C, cancelling ingestion"); }
        _ = terminate => { info!("received SIGTERM, cancelling ingestion"); }
    }
}

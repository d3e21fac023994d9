//! `enginectl` — CLI entry point for the ingestion and retrieval engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use uuid::Uuid;

use ingest_engine::answer::AnswerGenerator;
use ingest_engine::bus::{ChannelBus, MessageBus, TaskMessage};
use ingest_engine::classifier::QueryTag;
use ingest_engine::config::{load_config, Config};
use ingest_engine::embedding::create_provider;
use ingest_engine::errors::{CoreError, CoreResult};
use ingest_engine::extract::{HeadlessBrowser, NullHeadlessBrowser, PageExtractionModel};
use ingest_engine::gateway::GcsGateway;
use ingest_engine::models::{CandidateChunk, TaskKind};
use ingest_engine::persistence::PgStore;
use ingest_engine::refinement::RefinementModel;
use ingest_engine::server::{run_server, AppDispatcher, AppState};

#[derive(Parser)]
#[command(name = "enginectl", about = "Ingestion, chunking, embedding, persistence, and retrieval engine")]
struct Cli {
    #[arg(short, long, default_value = "ingest-engine.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the Postgres schema (pgvector extension, tables, indexes).
    Migrate,
    /// Run the HTTP server and bus worker.
    Serve,
    /// Submit a single file ingest (gs:// URI) and print the resulting doc_id.
    IngestFile {
        gcs_uri: String,
        original_filename: String,
    },
    /// Submit one or more URLs for ingestion.
    IngestUrls { urls: Vec<String> },
    /// Re-run the 3D dimensionality reduction over all persisted chunks.
    Reduce,
    /// Print a task's current status.
    TaskStatus { task_id: Uuid },
    /// List all documents.
    Documents,
}

/// No generative-model backend is wired at the CLI boundary; these
/// collaborators sit behind narrow trait seams per the spec's framing and
/// are expected to be supplied by an embedding application.
struct UnconfiguredPageModel;
#[async_trait]
impl PageExtractionModel for UnconfiguredPageModel {
    async fn extract_pages(&self, _pdf_bytes: &[u8]) -> CoreResult<String> {
        Err(CoreError::Unsupported("no PDF page-extraction model configured".to_string()))
    }
}

struct UnconfiguredRefinementModel;
#[async_trait]
impl RefinementModel for UnconfiguredRefinementModel {
    async fn classify_context(&self, _query: &str, _chunk_heads: &[String]) -> CoreResult<String> {
        Ok(r#"{"action":"sufficient_context"}"#.to_string())
    }
}

struct UnconfiguredAnswerGenerator;
#[async_trait]
impl AnswerGenerator for UnconfiguredAnswerGenerator {
    async fn generate(&self, _query: &str, _context_chunks: &[CandidateChunk], _tag: QueryTag) -> Result<String, CoreError> {
        Err(CoreError::Unsupported("no answer generator configured".to_string()))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "enginectl exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Command::Migrate => {
            let pool = ingest_engine::db::connect(&config).await?;
            ingest_engine::migrate::run_migrations(&pool).await?;
            info!("migrations applied");
        }
        Command::Serve => serve(&config).await?,
        Command::IngestFile { gcs_uri, original_filename } => ingest_file(&config, &gcs_uri, &original_filename).await?,
        Command::IngestUrls { urls } => ingest_urls(&config, urls).await?,
        Command::Reduce => {
            let pool = ingest_engine::db::connect(&config).await?;
            let store = PgStore::new(pool);
            let count = ingest_engine::reducer::run_reduction(&store).await?;
            info!(count, "dimensionality reduction complete");
        }
        Command::TaskStatus { task_id } => {
            let pool = ingest_engine::db::connect(&config).await?;
            let store = PgStore::new(pool);
            let task = store.get_task(task_id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::Documents => {
            let pool = ingest_engine::db::connect(&config).await?;
            let store = PgStore::new(pool);
            let docs = store.list_documents().await?;
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }
    }

    Ok(())
}

async fn build_state(config: &Config) -> Result<(AppState, tokio::sync::mpsc::UnboundedReceiver<TaskMessage>)> {
    let pool = ingest_engine::db::connect(config).await?;
    ingest_engine::migrate::run_migrations(&pool).await?;
    let store = Arc::new(PgStore::new(pool));

    let embedding_provider: Arc<dyn ingest_engine::embedding::EmbeddingProvider> =
        Arc::from(create_provider(&config.embedding)?);

    let (bus, receiver) = ChannelBus::new();
    let bus: Arc<dyn MessageBus> = Arc::new(bus);

    let state = AppState {
        store,
        config: Arc::new(config.clone()),
        gateway: Arc::new(GcsGateway::new()),
        page_model: Arc::new(UnconfiguredPageModel),
        headless: Arc::new(NullHeadlessBrowser) as Arc<dyn HeadlessBrowser>,
        embedding_provider,
        refinement_model: Arc::new(UnconfiguredRefinementModel),
        answer_generator: Arc::new(UnconfiguredAnswerGenerator),
        bus,
        http_client: reqwest::Client::new(),
    };

    Ok((state, receiver))
}

async fn serve(config: &Config) -> Result<()> {
    let (state, receiver) = build_state(config).await?;

    let dispatcher = AppDispatcher {
        store: state.store.clone(),
        config: state.config.clone(),
        gateway: state.gateway.clone(),
        page_model: state.page_model.clone(),
        headless: state.headless.clone(),
        embedding_provider: state.embedding_provider.clone(),
        http_client: state.http_client.clone(),
    };

    let store_for_worker = state.store.clone();
    let worker_handle = tokio::spawn(async move {
        let worker = ingest_engine::bus::BusWorker::new(store_for_worker.as_ref(), &dispatcher);
        worker.run(receiver).await;
    });

    run_server(state).await?;
    worker_handle.abort();
    Ok(())
}

async fn ingest_file(config: &Config, gcs_uri: &str, original_filename: &str) -> Result<()> {
    let (state, receiver) = build_state(config).await?;
    let dispatcher = AppDispatcher {
        store: state.store.clone(),
        config: state.config.clone(),
        gateway: state.gateway.clone(),
        page_model: state.page_model.clone(),
        headless: state.headless.clone(),
        embedding_provider: state.embedding_provider.clone(),
        http_client: state.http_client.clone(),
    };

    let (bucket, object) = gcs_uri
        .strip_prefix("gs://")
        .and_then(|rest| rest.split_once('/'))
        .context("gcs_uri must be of the form gs://bucket/object")?;

    use ingest_engine::gateway::ObjectStoreGateway;
    let metadata = state.gateway.stat(bucket, object).await?;
    let generation = metadata.generation;
    let original_gcs = format!("gs://{}/{}", bucket, object);

    let claim = state.store.claim(original_filename, &original_gcs, generation).await?;
    let task_id = state
        .store
        .create_task(
            TaskKind::FileProcessing,
            serde_json::json!({"doc_id": claim.doc_id, "gcs_uri": gcs_uri, "original_filename": original_filename, "generation": generation}),
        )
        .await?;

    drop(receiver);
    use ingest_engine::bus::TaskDispatcher;
    let message = TaskMessage {
        task_id,
        task_type: TaskKind::FileProcessing,
        input_data: serde_json::json!({"doc_id": claim.doc_id, "gcs_uri": gcs_uri, "original_filename": original_filename, "generation": generation}),
        metadata: serde_json::Value::Null,
    };
    let result = dispatcher.dispatch(&message).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn ingest_urls(config: &Config, urls: Vec<String>) -> Result<()> {
    let (state, receiver) = build_state(config).await?;
    let dispatcher = AppDispatcher {
        store: state.store.clone(),
        config: state.config.clone(),
        gateway: state.gateway.clone(),
        page_model: state.page_model.clone(),
        headless: state.headless.clone(),
        embedding_provider: state.embedding_provider.clone(),
        http_client: state.http_client.clone(),
    };

    let task_id = state.store.create_task(TaskKind::UrlProcessing, serde_json::json!({"urls": urls})).await?;

    drop(receiver);
    use ingest_engine::bus::TaskDispatcher;
    let message = TaskMessage {
        task_id,
        task_type: TaskKind::UrlProcessing,
        input_data: serde_json::json!({"urls": urls}),
        metadata: serde_json::Value::Null,
    };
    let result = dispatcher.dispatch(&message).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

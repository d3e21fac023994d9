//! HTTP surface (spec section 6).
//!
//! Exposes the ingestion and retrieval engine via a JSON HTTP API: file and
//! URL ingest (both enqueue onto the bus and return immediately), task
//! polling, document CRUD, query, and the two 3D read paths for the UI.
//!
//! # CORS
//!
//! All origins/methods/headers permitted, matching the teacher's stance
//! that this API serves browser-based clients directly.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::answer::{assemble_answer, AnswerGenerator};
use crate::bus::{MessageBus, TaskDispatcher, TaskMessage};
use crate::classifier::classify;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::errors::CoreError;
use crate::extract::{HeadlessBrowser, PageExtractionModel};
use crate::gateway::ObjectStoreGateway;
use crate::models::{Document, TaskKind};
use crate::orchestrator::Orchestrator;
use crate::persistence::PgStore;
use crate::refinement::{RefinementAgent, RefinementModel};
use crate::retriever::Retriever;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgStore>,
    pub config: Arc<Config>,
    pub gateway: Arc<dyn ObjectStoreGateway>,
    pub page_model: Arc<dyn PageExtractionModel>,
    pub headless: Arc<dyn HeadlessBrowser>,
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub refinement_model: Arc<dyn RefinementModel>,
    pub answer_generator: Arc<dyn AnswerGenerator>,
    pub bus: Arc<dyn MessageBus>,
    pub http_client: reqwest::Client,
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", state.config.server.bind, state.config.server.port);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/ingest/file", post(handle_ingest_file))
        .route("/ingest/urls", post(handle_ingest_urls))
        .route("/tasks/{task_id}", get(handle_get_task))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/query", post(handle_query))
        .route("/documents-3d", get(handle_documents_3d))
        .route("/documents/{id}/chunks-3d", get(handle_chunks_3d))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(%bind_addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ POST /ingest/file ============

#[derive(Deserialize)]
struct IngestFileRequest {
    gcs_uri: String,
    original_filename: String,
}

#[derive(Serialize)]
struct IngestFileResponse {
    doc_id: Uuid,
}

fn parse_gcs_uri(uri: &str) -> Result<(String, String), CoreError> {
    let rest = uri
        .strip_prefix("gs://")
        .ok_or_else(|| CoreError::Validation(format!("'{}' is not a gs:// URI", uri)))?;
    let (bucket, object) = rest
        .split_once('/')
        .ok_or_else(|| CoreError::Validation(format!("'{}' is missing an object path", uri)))?;
    Ok((bucket.to_string(), object.to_string()))
}

async fn handle_ingest_file(
    State(state): State<AppState>,
    Json(req): Json<IngestFileRequest>,
) -> Result<(StatusCode, Json<IngestFileResponse>), CoreError> {
    let (bucket, object) = parse_gcs_uri(&req.gcs_uri)?;
    let metadata = state.gateway.stat(&bucket, &object).await?;
    let generation = metadata.generation;
    let original_gcs = format!("gs://{}/{}", bucket, object);

    let claim = state.store.claim(&req.original_filename, &original_gcs, generation).await?;

    let task_id = state
        .store
        .create_task(
            TaskKind::FileProcessing,
            serde_json::json!({
                "doc_id": claim.doc_id,
                "gcs_uri": req.gcs_uri,
                "original_filename": req.original_filename,
                "generation": generation,
            }),
        )
        .await?;

    state
        .bus
        .publish(TaskMessage {
            task_id,
            task_type: TaskKind::FileProcessing,
            input_data: serde_json::json!({
                "doc_id": claim.doc_id,
                "gcs_uri": req.gcs_uri,
                "original_filename": req.original_filename,
                "generation": generation,
            }),
            metadata: serde_json::Value::Null,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(IngestFileResponse { doc_id: claim.doc_id })))
}

// ============ POST /ingest/urls ============

#[derive(Deserialize)]
struct IngestUrlsRequest {
    urls: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

#[derive(Serialize)]
struct IngestUrlsResponse {
    task_id: Uuid,
    status: &'static str,
}

async fn handle_ingest_urls(
    State(state): State<AppState>,
    Json(req): Json<IngestUrlsRequest>,
) -> Result<(StatusCode, Json<IngestUrlsResponse>), CoreError> {
    if req.urls.is_empty() {
        return Err(CoreError::Validation("urls must not be empty".to_string()));
    }

    let task_id = state
        .store
        .create_task(TaskKind::UrlProcessing, serde_json::json!({"urls": req.urls}))
        .await?;

    state
        .bus
        .publish(TaskMessage {
            task_id,
            task_type: TaskKind::UrlProcessing,
            input_data: serde_json::json!({"urls": req.urls}),
            metadata: serde_json::Value::Null,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestUrlsResponse { task_id, status: "processing" }),
    ))
}

// ============ GET /tasks/{task_id} ============

async fn handle_get_task(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    let task = state.store.get_task(task_id).await?;
    Ok(Json(task))
}

// ============ GET /documents ============

async fn handle_list_documents(State(state): State<AppState>) -> Result<Json<Vec<Document>>, CoreError> {
    let docs = state.store.list_documents().await?;
    Ok(Json(docs))
}

// ============ DELETE /documents/{id} ============

async fn handle_delete_document(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, CoreError> {
    state.store.delete_document(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<crate::models::SourceRef>,
}

async fn handle_query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Json<QueryResponse> {
    let tag = classify(&req.query);
    let retriever = Retriever::new(&state.store, state.embedding_provider.as_ref(), &state.config.embedding);

    let initial = match retriever.search(tag, &req.query, state.config.retrieval.max_context_chunks).await {
        Ok(chunks) => chunks,
        Err(_) => Vec::new(),
    };

    let refinement = RefinementAgent::new(
        &state.store,
        state.embedding_provider.as_ref(),
        &state.config.embedding,
        state.refinement_model.as_ref(),
        &state.config.retrieval,
    );
    let refined = refinement.refine(&req.query, initial).await.unwrap_or_default();

    let keyword_keys: Vec<(Uuid, i64)> = state
        .store
        .keyword_search(&req.query, state.config.retrieval.max_context_chunks as i64)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|c| (c.doc_id, c.chunk_id))
        .collect();
    let vector_keys: Vec<(Uuid, i64)> = refined.iter().map(|c| (c.doc_id, c.chunk_id)).collect();

    let fused = crate::fuser::fuse_rrf(&[keyword_keys, vector_keys], state.config.retrieval.rrf_k);
    let fused_ids: std::collections::HashSet<i64> = fused.iter().map(|((_, id), _)| *id).collect();
    let fused_chunks: Vec<_> = refined.into_iter().filter(|c| fused_ids.contains(&c.chunk_id)).collect();

    let result = assemble_answer(state.answer_generator.as_ref(), &req.query, &fused_chunks, tag).await;

    Json(QueryResponse { answer: result.answer, sources: result.sources })
}

// ============ GET /documents-3d, GET /documents/{id}/chunks-3d ============

#[derive(Serialize)]
struct Document3DSummary {
    id: Uuid,
    filename: String,
}

async fn handle_documents_3d(State(state): State<AppState>) -> Result<Json<Vec<Document3DSummary>>, CoreError> {
    let docs = state.store.documents_3d().await?;
    Ok(Json(
        docs.into_iter().map(|(id, filename)| Document3DSummary { id, filename }).collect(),
    ))
}

async fn handle_chunks_3d(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<crate::models::Chunk3D>>, CoreError> {
    let chunks = state.store.chunks_3d_for_document(id).await?;
    Ok(Json(chunks))
}

/// Dispatches queued bus messages to the orchestrator, used by [`crate::bus::BusWorker`].
pub struct AppDispatcher {
    pub store: Arc<PgStore>,
    pub config: Arc<Config>,
    pub gateway: Arc<dyn ObjectStoreGateway>,
    pub page_model: Arc<dyn PageExtractionModel>,
    pub headless: Arc<dyn HeadlessBrowser>,
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub http_client: reqwest::Client,
}

#[async_trait::async_trait]
impl TaskDispatcher for AppDispatcher {
    async fn dispatch(&self, message: &TaskMessage) -> Result<serde_json::Value, CoreError> {
        let orchestrator = Orchestrator::new(
            self.store.as_ref(),
            self.gateway.as_ref(),
            self.page_model.as_ref(),
            self.headless.as_ref(),
            self.embedding_provider.as_ref(),
            &self.config.embedding,
            &self.config.chunking,
        );

        match message.task_type {
            TaskKind::FileProcessing => {
                let doc_id: Uuid = message
                    .input_data
                    .get("doc_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| CoreError::Validation("file_processing message missing doc_id".to_string()))?;
                let gcs_uri = message
                    .input_data
                    .get("gcs_uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| CoreError::Validation("file_processing message missing gcs_uri".to_string()))?;
                let generation = message.input_data.get("generation").and_then(|v| v.as_i64()).unwrap_or(0);
                let (bucket, object) = parse_gcs_uri(gcs_uri)?;
                let suffix = object.rsplit('.').next().unwrap_or("").to_string();

                let outcome = orchestrator
                    .ingest_file(
                        &bucket,
                        &self.config.buckets.processed_bucket,
                        &object,
                        generation,
                        &suffix,
                        Some(doc_id),
                    )
                    .await?;
                Ok(serde_json::json!({"doc_id": outcome.doc_id, "chunk_count": outcome.chunk_count}))
            }
            TaskKind::UrlProcessing => {
                let urls: Vec<String> = message
                    .input_data
                    .get("urls")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();

                let mut outcomes = Vec::new();
                for url in &urls {
                    let outcome = orchestrator
                        .ingest_url(
                            &self.http_client,
                            url,
                            self.config.retrieval.url_fetch_retries,
                            self.config.retrieval.url_fetch_backoff_base_seconds,
                        )
                        .await?;
                    outcomes.push(serde_json::json!({"url": url, "doc_id": outcome.doc_id}));
                    tokio::time::sleep(std::time::Duration::from_secs(self.config.retrieval.polite_delay_seconds)).await;
                }
                Ok(serde_json::json!({"results": outcomes}))
            }
            TaskKind::TextProcessing => Err(CoreError::Unsupported("text_processing is not handled by the core".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_gcs_uri() {
        let (bucket, object) = parse_gcs_uri("gs://raw-bucket/path/to/file.pdf").unwrap();
        assert_eq!(bucket, "raw-bucket");
        assert_eq!(object, "path/to/file.pdf");
    }

    #[test]
    fn rejects_non_gcs_uri() {
        assert!(parse_gcs_uri("https://example.com/file.pdf").is_err());
    }
}

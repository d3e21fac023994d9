//! Ingest orchestrator (spec section 4.7).
//!
//! State machine per (bucket, object, generation):
//! Absent -> Claimed -> Extracted -> Chunked -> Embedded -> Persisted | Failed.

use tracing::{info, warn};

use crate::chunk::chunk_document;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedder::embed_batch;
use crate::embedding::EmbeddingProvider;
use crate::errors::{CoreError, CoreResult};
use crate::extract::{extract_pdf_via_model, scrape_html, HeadlessBrowser, PageExtractionModel};
use crate::gateway::{ObjectStoreGateway, WorkingArea};
use crate::normalize::normalize;
use crate::persistence::{ClaimOutcome, PgStore};

/// Decodes raw bytes as UTF-8, falling back to latin-1 (every byte maps to
/// the Unicode code point of the same value, so this never fails) when the
/// bytes aren't valid UTF-8.
fn decode_text_with_latin1_fallback(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestOutcome {
    pub doc_id: uuid::Uuid,
    pub skipped: bool,
    pub reason: Option<String>,
    pub chunk_count: usize,
}

pub struct Orchestrator<'a> {
    store: &'a PgStore,
    gateway: &'a dyn ObjectStoreGateway,
    page_model: &'a dyn PageExtractionModel,
    headless: &'a dyn HeadlessBrowser,
    embedding_provider: &'a dyn EmbeddingProvider,
    embedding_config: &'a EmbeddingConfig,
    chunking_config: &'a ChunkingConfig,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a PgStore,
        gateway: &'a dyn ObjectStoreGateway,
        page_model: &'a dyn PageExtractionModel,
        headless: &'a dyn HeadlessBrowser,
        embedding_provider: &'a dyn EmbeddingProvider,
        embedding_config: &'a EmbeddingConfig,
        chunking_config: &'a ChunkingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            page_model,
            headless,
            embedding_provider,
            embedding_config,
            chunking_config,
        }
    }

    /// Ingests a single object from the raw bucket. `name` is the object
    /// path; `suffix` is its authoritative format hint (the object suffix,
    /// not client-asserted content-type). `pre_claimed` carries a `doc_id`
    /// already produced by an earlier [`PgStore::claim`] call (e.g. at the
    /// HTTP boundary, so the response can return `doc_id` immediately) —
    /// when set, claiming is skipped here so the same `(bucket, object,
    /// generation)` isn't claimed twice, which would always observe the
    /// first call's row as already `Processing` and abandon the pipeline.
    pub async fn ingest_file(
        &self,
        raw_bucket: &str,
        processed_bucket: &str,
        name: &str,
        generation: i64,
        suffix: &str,
        pre_claimed: Option<uuid::Uuid>,
    ) -> CoreResult<IngestOutcome> {
        let original_gcs = format!("gs://{}/{}", raw_bucket, name);

        // 1. Absent -> Claimed.
        let doc_id = match pre_claimed {
            Some(doc_id) => doc_id,
            None => {
                let claim = self.store.claim(name, &original_gcs, generation).await?;
                if let ClaimOutcome::Existing(status) = claim.outcome {
                    info!(doc_id = %claim.doc_id, ?status, "document already claimed, skipping ingestion");
                    return Ok(IngestOutcome {
                        doc_id: claim.doc_id,
                        skipped: true,
                        reason: Some(format!("existing status {}", status.as_str())),
                        chunk_count: 0,
                    });
                }
                claim.doc_id
            }
        };

        match self.run_pipeline(raw_bucket, processed_bucket, name, generation, suffix, doc_id).await {
            Ok(chunk_count) => Ok(IngestOutcome {
                doc_id,
                skipped: false,
                reason: None,
                chunk_count,
            }),
            Err(e) => {
                let message = e.stable_message();
                warn!(%doc_id, error = %message, "ingest failed");
                self.store.mark_failed(doc_id, &message).await?;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        raw_bucket: &str,
        processed_bucket: &str,
        name: &str,
        generation: i64,
        suffix: &str,
        doc_id: uuid::Uuid,
    ) -> CoreResult<usize> {
        let working_area = WorkingArea::new()?;

        // 2. Claimed -> Extracted.
        let (bytes, _metadata) = self.gateway.fetch(raw_bucket, name, generation).await?;
        let local_path = working_area.write_file(name, &bytes)?;
        let normalized = normalize(&local_path, suffix)?;

        let text = if normalized.plain_text_mode() {
            let path = normalized.plain_text_path.as_ref().expect("plain_text_mode implies path set");
            let raw = std::fs::read(path).map_err(|e| CoreError::Fatal(format!("failed to read plain text: {}", e)))?;
            decode_text_with_latin1_fallback(&raw)
        } else if let Some(pdf_path) = &normalized.pdf_path {
            let pdf_bytes = std::fs::read(pdf_path).map_err(|e| CoreError::Fatal(format!("failed to read pdf: {}", e)))?;
            extract_pdf_via_model(self.page_model, &pdf_bytes).await?
        } else {
            return Err(CoreError::Fatal("normaliser produced neither a pdf nor a plain text path".to_string()));
        };

        // 3. Extracted -> Chunked.
        let chunks = chunk_document(
            &text,
            name,
            normalized.plain_text_mode(),
            self.chunking_config.max_tokens,
            self.chunking_config.overlap,
            self.chunking_config.whitespace_chunk_size,
            self.chunking_config.whitespace_chunk_overlap,
        )?;

        // 4. Chunked -> Embedded.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batch(self.embedding_provider, self.embedding_config, &texts).await;

        // 5. Embedded -> Persisted.
        let processed_name = format!("{}.processed", name);
        let processed_loc = if normalized.pdf_path.is_some() {
            self.gateway
                .upload(processed_bucket, &processed_name, &bytes, "application/octet-stream")
                .await
                .ok()
                .map(|_| processed_name)
        } else {
            None
        };

        self.store
            .finalise_success(doc_id, processed_loc.as_deref(), &texts, &vectors)
            .await?;

        info!(%doc_id, chunk_count = texts.len(), "ingest succeeded");
        Ok(texts.len())
    }

    /// Ingests text scraped from a URL; the URL's fetched HTML is the raw
    /// object, the extracted body text is chunked and embedded identically
    /// to a file ingest.
    pub async fn ingest_url(&self, client: &reqwest::Client, url: &str, url_fetch_retries: u32, backoff_base: u64) -> CoreResult<IngestOutcome> {
        let claim = self.store.claim(url, url, 0).await?;
        let doc_id = claim.doc_id;
        if let ClaimOutcome::Existing(status) = claim.outcome {
            return Ok(IngestOutcome {
                doc_id,
                skipped: true,
                reason: Some(format!("existing status {}", status.as_str())),
                chunk_count: 0,
            });
        }

        match self.run_url_pipeline(client, url, url_fetch_retries, backoff_base, doc_id).await {
            Ok(chunk_count) => Ok(IngestOutcome {
                doc_id,
                skipped: false,
                reason: None,
                chunk_count,
            }),
            Err(e) => {
                let message = e.stable_message();
                self.store.mark_failed(doc_id, &message).await?;
                Err(e)
            }
        }
    }

    async fn run_url_pipeline(
        &self,
        client: &reqwest::Client,
        url: &str,
        url_fetch_retries: u32,
        backoff_base: u64,
        doc_id: uuid::Uuid,
    ) -> CoreResult<usize> {
        let html = crate::extract::fetch_url(client, url, url_fetch_retries, backoff_base).await?;
        let scraped = scrape_html(&html, url, self.headless).await?;

        let chunks = chunk_document(
            &scraped.content,
            url,
            true,
            self.chunking_config.max_tokens,
            self.chunking_config.overlap,
            self.chunking_config.whitespace_chunk_size,
            self.chunking_config.whitespace_chunk_overlap,
        )?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batch(self.embedding_provider, self.embedding_config, &texts).await;

        self.store.finalise_success(doc_id, None, &texts, &vectors).await?;
        Ok(texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_text_with_latin1_fallback_handles_valid_utf8() {
        let bytes = "hello world".as_bytes();
        assert_eq!(decode_text_with_latin1_fallback(bytes), "hello world");
    }

    #[test]
    fn decode_text_with_latin1_fallback_recovers_non_utf8_bytes() {
        // 0xE9 is not a valid standalone UTF-8 lead byte; in latin-1 it's 'é'.
        let bytes = [b'c', b'a', 0xE9];
        assert_eq!(decode_text_with_latin1_fallback(&bytes), "ca\u{e9}");
    }
}

//! Refinement agent: bounded iterative context enrichment (spec section 4.12).

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::errors::CoreResult;
use crate::models::CandidateChunk;
use crate::persistence::PgStore;
use crate::retriever::has_code_indicators;

/// The generative model's classification of the current context, decided
/// by summarising the top-5 chunk heads. An external collaborator: only
/// the decision-loop shape and per-action retrieval live here.
#[async_trait]
pub trait RefinementModel: Send + Sync {
    /// Returns the raw JSON text of the model's classification response.
    async fn classify_context(&self, query: &str, chunk_heads: &[String]) -> CoreResult<String>;
}

#[derive(Debug, Clone, Deserialize)]
struct RefinementDecision {
    action: String,
    #[serde(default)]
    search_terms: Vec<String>,
}

fn dedupe(chunks: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
    let mut seen = HashSet::new();
    chunks.into_iter().filter(|c| seen.insert(c.chunk_id)).collect()
}

fn chunk_heads(chunks: &[CandidateChunk]) -> Vec<String> {
    chunks
        .iter()
        .take(5)
        .map(|c| c.text.chars().take(120).collect())
        .collect()
}

pub struct RefinementAgent<'a> {
    store: &'a PgStore,
    provider: &'a dyn EmbeddingProvider,
    embed_config: &'a EmbeddingConfig,
    model: &'a dyn RefinementModel,
    config: &'a RetrievalConfig,
}

impl<'a> RefinementAgent<'a> {
    pub fn new(
        store: &'a PgStore,
        provider: &'a dyn EmbeddingProvider,
        embed_config: &'a EmbeddingConfig,
        model: &'a dyn RefinementModel,
        config: &'a RetrievalConfig,
    ) -> Self {
        Self { store, provider, embed_config, model, config }
    }

    /// Runs up to `config.refinement_max_iterations` rounds, merging newly
    /// retrieved chunks into `working_set` by chunk_id-dedup, until the
    /// model reports `sufficient_context`, emits unparsable JSON, or the
    /// iteration budget is exhausted.
    pub async fn refine(&self, query: &str, mut working_set: Vec<CandidateChunk>) -> CoreResult<Vec<CandidateChunk>> {
        for _ in 0..self.config.refinement_max_iterations {
            let heads = chunk_heads(&working_set);
            let raw = self.model.classify_context(query, &heads).await?;

            let decision: RefinementDecision = match serde_json::from_str(&raw) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "refinement agent emitted malformed JSON, treating as sufficient_context");
                    break;
                }
            };

            let additions = match decision.action.as_str() {
                "sufficient_context" => break,
                "search_more" => self.search_more(query).await?,
                "search_specific" => self.search_specific(&decision.search_terms).await?,
                "need_examples" => self.need_examples(query).await?,
                "request_broader_context" => self.request_broader_context(&working_set).await?,
                other => {
                    warn!(action = other, "unrecognised refinement action, treating as sufficient_context");
                    break;
                }
            };

            working_set.extend(additions);
            working_set = dedupe(working_set);
        }

        Ok(working_set)
    }

    async fn search_more(&self, query: &str) -> CoreResult<Vec<CandidateChunk>> {
        let vector = crate::embedding::embed_query(self.provider, self.embed_config, query)
            .await
            .map_err(|e| crate::errors::CoreError::Upstream(e.to_string()))?;
        self.store.vector_search_with_threshold(&vector, 15, 0.4).await
    }

    async fn search_specific(&self, terms: &[String]) -> CoreResult<Vec<CandidateChunk>> {
        let mut out = Vec::new();
        for term in terms.iter().take(3) {
            let vector = crate::embedding::embed_query(self.provider, self.embed_config, term)
                .await
                .map_err(|e| crate::errors::CoreError::Upstream(e.to_string()))?;
            out.extend(self.store.vector_search(&vector, 3).await?);
        }
        Ok(out)
    }

    async fn need_examples(&self, query: &str) -> CoreResult<Vec<CandidateChunk>> {
        let augmented = format!("{} example code configuration", query);
        let vector = crate::embedding::embed_query(self.provider, self.embed_config, &augmented)
            .await
            .map_err(|e| crate::errors::CoreError::Upstream(e.to_string()))?;
        let hits = self.store.vector_search(&vector, 5).await?;
        Ok(hits.into_iter().filter(|c| has_code_indicators(&c.text)).collect())
    }

    async fn request_broader_context(&self, working_set: &[CandidateChunk]) -> CoreResult<Vec<CandidateChunk>> {
        let mut out = Vec::new();
        for chunk in working_set.iter().take(2) {
            let start = (chunk.chunk_index - 1).max(0);
            let end = chunk.chunk_index + 2;
            out.extend(self.store.chunks_range(chunk.doc_id, start, end).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(id: i64) -> CandidateChunk {
        CandidateChunk {
            chunk_id: id,
            doc_id: uuid::Uuid::nil(),
            doc_filename: "a".into(),
            chunk_index: id as i32,
            text: "resource \"aws_instance\" \"x\" {}".into(),
            score: 1.0,
        }
    }

    #[test]
    fn chunk_heads_caps_at_five() {
        let chunks: Vec<CandidateChunk> = (0..10).map(sample_chunk).collect();
        assert_eq!(chunk_heads(&chunks).len(), 5);
    }

    #[test]
    fn dedupe_removes_repeated_chunk_ids() {
        let chunks = vec![sample_chunk(1), sample_chunk(1), sample_chunk(2)];
        assert_eq!(dedupe(chunks).len(), 2);
    }

    #[test]
    fn decision_parses_action_and_terms() {
        let raw = r#"{"action":"search_specific","search_terms":["vpc","subnet"]}"#;
        let decision: RefinementDecision = serde_json::from_str(raw).unwrap();
        assert_eq!(decision.action, "search_specific");
        assert_eq!(decision.search_terms, vec!["vpc", "subnet"]);
    }
}

//! Retriever: strategy-dispatched nearest-neighbour search (spec section 4.11).

use std::collections::HashSet;

use regex::Regex;
use std::sync::OnceLock;

use crate::classifier::QueryTag;
use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::errors::CoreResult;
use crate::models::CandidateChunk;
use crate::persistence::PgStore;

const CODE_INDICATORS: &[&str] = &["resource \"", "provider \"", "```", "{"];

fn resource_ref_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| Regex::new(r"(aws|google|azurerm)_(\w+)").unwrap())
}

fn dedupe_by_chunk_id(chunks: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.chunk_id))
        .collect()
}

pub fn has_code_indicators(text: &str) -> bool {
    CODE_INDICATORS.iter().any(|ind| text.contains(ind))
}

async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> CoreResult<Vec<f32>> {
    crate::embedding::embed_query(provider, config, text)
        .await
        .map_err(|e| crate::errors::CoreError::Upstream(e.to_string()))
}

pub struct Retriever<'a> {
    store: &'a PgStore,
    provider: &'a dyn EmbeddingProvider,
    embed_config: &'a EmbeddingConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a PgStore, provider: &'a dyn EmbeddingProvider, embed_config: &'a EmbeddingConfig) -> Self {
        Self { store, provider, embed_config }
    }

    pub async fn search(&self, tag: QueryTag, query: &str, context_size: usize) -> CoreResult<Vec<CandidateChunk>> {
        match tag {
            QueryTag::InfraCode => self.search_infra_code(query, context_size).await,
            QueryTag::CodeGeneration => self.search_code_generation(query, context_size).await,
            QueryTag::DocLookup => self.search_doc_lookup(query).await,
            QueryTag::General => self.search_general(query, context_size).await,
        }
    }

    async fn search_infra_code(&self, query: &str, context_size: usize) -> CoreResult<Vec<CandidateChunk>> {
        let Some(caps) = resource_ref_pattern().captures(&query.to_lowercase()) else {
            return self.search_general(query, context_size).await;
        };
        let resource_type = format!("{}_{}", &caps[1], &caps[2]);

        let mut hits = Vec::new();
        hits.extend(self.store.keyword_search(&resource_type, context_size as i64).await?);
        hits.extend(
            self.store
                .keyword_search(&format!("resource \"{}\"", resource_type), context_size as i64)
                .await?,
        );
        hits.extend(self.store.keyword_search(&caps[2], context_size as i64).await?);

        let mut hits = dedupe_by_chunk_id(hits);

        if hits.is_empty() {
            return self.search_general(query, context_size).await;
        }

        let mut augmented = Vec::new();
        for hit in &hits {
            let start = (hit.chunk_index - 2).max(0);
            let end = hit.chunk_index + 3 + context_size as i32;
            augmented.extend(self.store.chunks_range(hit.doc_id, start, end).await?);
        }
        hits.extend(augmented);
        let mut hits = dedupe_by_chunk_id(hits);
        hits.truncate(context_size);
        Ok(hits)
    }

    async fn search_code_generation(&self, query: &str, _context_size: usize) -> CoreResult<Vec<CandidateChunk>> {
        let augmented_query = format!("{} example code configuration", query);
        let vector = embed_query(self.provider, self.embed_config, &augmented_query).await?;
        let examples: Vec<CandidateChunk> = self
            .store
            .vector_search(&vector, 10)
            .await?
            .into_iter()
            .filter(|c| has_code_indicators(&c.text))
            .take(3)
            .collect();

        let base_vector = embed_query(self.provider, self.embed_config, query).await?;
        let prioritised: Vec<CandidateChunk> = self.store.vector_search(&base_vector, 4).await?;

        let mut all = examples;
        all.extend(prioritised);
        Ok(dedupe_by_chunk_id(all))
    }

    async fn search_doc_lookup(&self, query: &str) -> CoreResult<Vec<CandidateChunk>> {
        let vector = embed_query(self.provider, self.embed_config, query).await?;
        let top = self.store.vector_search(&vector, 5).await?;

        let mut results = top.clone();
        if let Some(first) = top.first() {
            let start = (first.chunk_index - 2).max(0);
            let end = first.chunk_index + 3;
            results.extend(self.store.chunks_range(first.doc_id, start, end).await?);
        }

        let mut results = dedupe_by_chunk_id(results);
        results.truncate(5);
        Ok(results)
    }

    async fn search_general(&self, query: &str, context_size: usize) -> CoreResult<Vec<CandidateChunk>> {
        let vector = embed_query(self.provider, self.embed_config, query).await?;
        self.store.vector_search(&vector, context_size as i64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_code_indicators() {
        assert!(has_code_indicators("resource \"aws_instance\" \"x\" {}"));
        assert!(!has_code_indicators("plain prose with no code"));
    }

    #[test]
    fn resource_ref_pattern_matches_provider_resource() {
        let caps = resource_ref_pattern().captures("how do I use google_storage_bucket").unwrap();
        assert_eq!(&caps[1], "google");
        assert_eq!(&caps[2], "storage_bucket");
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let a = CandidateChunk {
            chunk_id: 1,
            doc_id: uuid::Uuid::nil(),
            doc_filename: "a".into(),
            chunk_index: 0,
            text: "x".into(),
            score: 1.0,
        };
        let b = CandidateChunk { score: 2.0, ..a.clone() };
        let result = dedupe_by_chunk_id(vec![a.clone(), b]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].score, 1.0);
    }
}

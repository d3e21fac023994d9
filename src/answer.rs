//! Answer assembler (spec section 4.14).

use async_trait::async_trait;

use crate::classifier::QueryTag;
use crate::errors::CoreError;
use crate::models::{CandidateChunk, SourceRef};

/// The final-answer generator. An external collaborator: this crate owns
/// only the context assembly and the decision of whether to call it at
/// all.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, query: &str, context_chunks: &[CandidateChunk], tag: QueryTag) -> Result<String, CoreError>;
}

pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

fn fallback_for(tag: QueryTag) -> &'static str {
    match tag {
        QueryTag::InfraCode => "No matching infrastructure configuration was found for this query.",
        QueryTag::CodeGeneration => "No example configuration was found to generate code from.",
        QueryTag::DocLookup => "No documentation was found covering this query.",
        QueryTag::General => "No relevant context was found for this query.",
    }
}

fn dedupe_sources(chunks: &[CandidateChunk]) -> Vec<SourceRef> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for chunk in chunks {
        if seen.insert(chunk.doc_id) {
            sources.push(SourceRef {
                id: chunk.doc_id,
                name: chunk.doc_filename.clone(),
                uri: chunk.doc_filename.clone(),
            });
        }
    }
    sources
}

/// Assembles an answer from a fused chunk list. Never propagates an error
/// to the caller: generator failures fall back to the same tag-specific
/// string as an empty context.
///
/// Empty context skips the generator entirely for infra-code/code-generation
/// (there's nothing to generate from); doc-lookup/general still call the
/// generator for a general-knowledge answer, with an empty context list.
/// Non-empty context always calls the generator, for every tag.
pub async fn assemble_answer(
    generator: &dyn AnswerGenerator,
    query: &str,
    context_chunks: &[CandidateChunk],
    tag: QueryTag,
) -> Answer {
    if context_chunks.is_empty() && matches!(tag, QueryTag::InfraCode | QueryTag::CodeGeneration) {
        return Answer {
            answer: fallback_for(tag).to_string(),
            sources: Vec::new(),
        };
    }

    let sources = dedupe_sources(context_chunks);

    match generator.generate(query, context_chunks, tag).await {
        Ok(answer) => Answer { answer, sources },
        Err(_) => Answer {
            answer: fallback_for(tag).to_string(),
            sources: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chunk(doc_id: Uuid, filename: &str, text: &str) -> CandidateChunk {
        CandidateChunk {
            chunk_id: 1,
            doc_id,
            doc_filename: filename.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score: 1.0,
        }
    }

    struct StubGenerator;
    #[async_trait]
    impl AnswerGenerator for StubGenerator {
        async fn generate(&self, _query: &str, _chunks: &[CandidateChunk], _tag: QueryTag) -> Result<String, CoreError> {
            Ok("generated answer".to_string())
        }
    }

    struct FailingGenerator;
    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn generate(&self, _query: &str, _chunks: &[CandidateChunk], _tag: QueryTag) -> Result<String, CoreError> {
            Err(CoreError::Upstream("generator unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn empty_context_skips_generator_for_infra_code() {
        let result = assemble_answer(&FailingGenerator, "q", &[], QueryTag::InfraCode).await;
        assert!(result.sources.is_empty());
        assert_eq!(result.answer, fallback_for(QueryTag::InfraCode));
    }

    #[tokio::test]
    async fn empty_context_still_calls_generator_for_doc_lookup() {
        let result = assemble_answer(&StubGenerator, "q", &[], QueryTag::DocLookup).await;
        assert!(result.sources.is_empty());
        assert_eq!(result.answer, "generated answer");
    }

    #[tokio::test]
    async fn empty_context_doc_lookup_falls_back_when_generator_fails() {
        let result = assemble_answer(&FailingGenerator, "q", &[], QueryTag::DocLookup).await;
        assert_eq!(result.answer, fallback_for(QueryTag::DocLookup));
    }

    #[tokio::test]
    async fn infra_code_calls_generator_when_context_present() {
        let chunks = vec![chunk(Uuid::nil(), "a.tf", "resource block text")];
        let result = assemble_answer(&StubGenerator, "q", &chunks, QueryTag::InfraCode).await;
        assert_eq!(result.answer, "generated answer");
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn doc_lookup_calls_generator() {
        let chunks = vec![chunk(Uuid::nil(), "a.tf", "body text")];
        let result = assemble_answer(&StubGenerator, "q", &chunks, QueryTag::DocLookup).await;
        assert_eq!(result.answer, "generated answer");
    }

    #[test]
    fn dedupe_sources_preserves_first_seen_order() {
        let id_a = Uuid::from_u128(1);
        let id_b = Uuid::from_u128(2);
        let chunks = vec![
            chunk(id_b, "b.tf", "x"),
            chunk(id_a, "a.tf", "y"),
            chunk(id_b, "b.tf", "z"),
        ];
        let sources = dedupe_sources(&chunks);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, id_b);
        assert_eq!(sources[1].id, id_a);
    }
}

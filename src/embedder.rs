//! Token-budget batching on top of [`crate::embedding`]'s provider trait.
//!
//! Spec section 4.5: group the input list into batches whose summed token
//! count is at most `token_budget`, embed each batch in order, and on batch
//! failure fill that batch's positions with a zero vector and log instead
//! of aborting the whole operation. Output length always equals input
//! length, and position *i*'s vector corresponds to input *i*.

use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;

fn count_tokens(bpe: &tiktoken_rs::CoreBPE, text: &str) -> usize {
    bpe.encode_with_special_tokens(text).len()
}

/// Split `texts` into batches whose summed token count does not exceed
/// `token_budget`. A single text exceeding the budget alone still forms its
/// own one-item batch (never dropped).
fn batch_by_token_budget(texts: &[String], token_budget: usize) -> Vec<Vec<usize>> {
    let bpe = tiktoken_rs::cl100k_base().expect("cl100k_base encoder ships with tiktoken-rs");
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0usize;

    for (idx, text) in texts.iter().enumerate() {
        let tokens = count_tokens(&bpe, text);
        if !current.is_empty() && current_tokens + tokens > token_budget {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(idx);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Embed every text in `texts`, preserving input order and length.
pub async fn embed_batch(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Vec<Vec<f32>> {
    let dims = provider.dims().max(1);
    let mut out = vec![vec![0.0f32; dims]; texts.len()];

    for batch_indices in batch_by_token_budget(texts, config.token_budget) {
        let batch_texts: Vec<String> = batch_indices.iter().map(|&i| texts[i].clone()).collect();

        match crate::embedding::embed_texts(provider, config, &batch_texts).await {
            Ok(vectors) => {
                for (pos, vector) in batch_indices.iter().zip(vectors.into_iter()) {
                    out[*pos] = vector;
                }
            }
            Err(e) => {
                warn!(error = %e, batch_size = batch_indices.len(), "embedding batch failed, filling zero vectors");
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_respect_token_budget() {
        let texts: Vec<String> = (0..20).map(|i| format!("token number {}", i)).collect();
        let batches = batch_by_token_budget(&texts, 10);
        assert!(batches.len() > 1);
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, texts.len());
    }

    #[test]
    fn oversized_single_text_gets_its_own_batch() {
        let huge = "word ".repeat(5000);
        let texts = vec![huge];
        let batches = batch_by_token_budget(&texts, 10);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }
}

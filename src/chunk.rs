//! Chunker: splits document text into token-bounded, overlapping segments.
//!
//! Three strategies, dispatched by [`chunk_document`]:
//! - [`chunk_default`] — BPE-tokenized sliding window.
//! - [`chunk_whitespace`] — character-window variant biased to whitespace
//!   boundaries, used for plain text.
//! - [`chunk_structure_aware`] — brace-depth block extraction for
//!   infrastructure-as-code documents, falling through to the default
//!   strategy for anything outside a recognized block.

use tiktoken_rs::CoreBPE;

use crate::errors::{CoreError, CoreResult};

/// One chunk of source text prior to embedding, with an optional structural
/// tag set by the structure-aware strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkText {
    pub text: String,
    pub block_kind: Option<String>,
}

impl ChunkText {
    fn plain(text: String) -> Self {
        Self { text, block_kind: None }
    }
}

const IAC_KEYWORDS: &[&str] = &["resource", "data", "provider", "module", "variable", "output"];
const IAC_INDICATORS: &[&str] = &[
    "terraform",
    "provider",
    ".tf",
    "hcl",
    "resource \"",
    "data \"",
    "variable \"",
    "output \"",
    "module \"",
    "terraform {",
];

fn bpe() -> CoreBPE {
    tiktoken_rs::cl100k_base().expect("cl100k_base encoder ships with tiktoken-rs")
}

/// Decide which variant applies and run it. `plain_text_mode` corresponds to
/// the normaliser's `.txt` flag (spec section 4.2) and routes to the
/// whitespace-preferred variant instead of the default tokenizer window.
pub fn chunk_document(
    text: &str,
    filename: &str,
    plain_text_mode: bool,
    max_tokens: usize,
    overlap: usize,
    whitespace_size: usize,
    whitespace_overlap: usize,
) -> CoreResult<Vec<ChunkText>> {
    if is_infrastructure_as_code(filename, text) {
        return chunk_structure_aware(text, max_tokens, overlap);
    }
    if plain_text_mode {
        return chunk_whitespace(text, whitespace_size, whitespace_overlap);
    }
    chunk_default(text, max_tokens, overlap)
}

/// Default strategy: BPE windows of up to `max_tokens` with `overlap`
/// tokens of overlap; the final window may be shorter.
pub fn chunk_default(text: &str, max_tokens: usize, overlap: usize) -> CoreResult<Vec<ChunkText>> {
    if overlap >= max_tokens {
        return Err(CoreError::Validation(
            "chunk overlap must be less than max_tokens".to_string(),
        ));
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let bpe = bpe();
    let tokens = bpe.encode_with_special_tokens(text);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_tokens).min(tokens.len());
        let window = &tokens[start..end];
        let decoded = bpe.decode(window.to_vec()).map_err(|e| {
            CoreError::Fatal(format!("tokenizer decode failure: {}", e))
        })?;
        chunks.push(ChunkText::plain(decoded));

        if end == tokens.len() {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Whitespace-preferred variant for plain text: aim for `window` characters
/// with `overlap` characters of overlap, biasing the split point to the
/// nearest whitespace within the second half of the window.
pub fn chunk_whitespace(text: &str, window: usize, overlap: usize) -> CoreResult<Vec<ChunkText>> {
    if overlap >= window {
        return Err(CoreError::Validation(
            "whitespace chunk overlap must be less than window size".to_string(),
        ));
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let ideal_end = (start + window).min(chars.len());
        let end = if ideal_end == chars.len() {
            ideal_end
        } else {
            find_whitespace_boundary(&chars, start, ideal_end, window)
        };

        let slice: String = chars[start..end].iter().collect();
        if !slice.trim().is_empty() {
            chunks.push(ChunkText::plain(slice));
        }

        if end >= chars.len() {
            break;
        }
        start = if end > overlap { end - overlap } else { end };
    }

    Ok(chunks)
}

/// Search the second half of `[start, ideal_end)` for the last whitespace
/// character, from the end backward; never splits inside a token longer
/// than half the window.
fn find_whitespace_boundary(chars: &[char], start: usize, ideal_end: usize, window: usize) -> usize {
    let half = start + window / 2;
    let search_from = half.max(start);
    for i in (search_from..ideal_end).rev() {
        if chars[i].is_whitespace() {
            return i + 1;
        }
    }
    ideal_end
}

/// Determine whether `filename`/`text` indicates infrastructure-as-code
/// content, per the original Terraform-aware chunker's heuristic.
pub fn is_infrastructure_as_code(filename: &str, text: &str) -> bool {
    let filename_lower = filename.to_lowercase();
    let sample: String = text.chars().take(2000).collect::<String>().to_lowercase();
    IAC_INDICATORS
        .iter()
        .any(|ind| filename_lower.contains(ind) || sample.contains(ind))
}

/// Structure-aware variant: extract top-level `KEYWORD "TYPE" "NAME" { … }`
/// blocks by brace-depth tracking; blocks exceeding `max_tokens` and
/// remaining text between blocks fall through to the default strategy.
/// Emitted chunks preserve source order.
pub fn chunk_structure_aware(text: &str, max_tokens: usize, overlap: usize) -> CoreResult<Vec<ChunkText>> {
    let blocks = extract_blocks(text);
    let bpe = bpe();

    let mut chunks = Vec::new();
    let mut last_end = 0usize;

    for block in &blocks {
        if block.start > last_end {
            let gap = &text[last_end..block.start];
            if !gap.trim().is_empty() {
                chunks.extend(chunk_default(gap, max_tokens, overlap)?);
            }
        }

        let token_count = bpe.encode_with_special_tokens(&block.text).len();
        if token_count <= max_tokens {
            chunks.push(ChunkText {
                text: block.text.clone(),
                block_kind: Some(block.kind.clone()),
            });
        } else {
            chunks.extend(chunk_default(&block.text, max_tokens, overlap)?);
        }

        last_end = block.end;
    }

    if last_end < text.len() {
        let tail = &text[last_end..];
        if !tail.trim().is_empty() {
            chunks.extend(chunk_default(tail, max_tokens, overlap)?);
        }
    }

    if blocks.is_empty() {
        return chunk_default(text, max_tokens, overlap);
    }

    Ok(chunks)
}

struct Block {
    kind: String,
    text: String,
    start: usize,
    end: usize,
}

/// Finds every `KEYWORD "TYPE" "NAME" {` (or `KEYWORD "NAME" {` for
/// provider/module/variable/output) occurrence and extends it to its
/// matching closing brace by depth counting, mirroring the Python
/// reference implementation's `_extract_complete_block`.
fn extract_blocks(text: &str) -> Vec<Block> {
    let mut found = Vec::new();

    for keyword in IAC_KEYWORDS {
        let mut search_from = 0usize;
        while let Some(rel) = text[search_from..].find(keyword) {
            let kw_start = search_from + rel;
            let after_kw = kw_start + keyword.len();

            // keyword must be at a word boundary
            let preceded_ok = kw_start == 0
                || !text[..kw_start].chars().next_back().unwrap().is_alphanumeric();
            if !preceded_ok {
                search_from = after_kw;
                continue;
            }

            if let Some(brace_pos) = header_to_brace(text, after_kw) {
                if let Some(end) = matching_brace_end(text, brace_pos) {
                    found.push(Block {
                        kind: keyword.to_string(),
                        text: text[kw_start..=end].to_string(),
                        start: kw_start,
                        end: end + 1,
                    });
                    search_from = end + 1;
                    continue;
                }
            }
            search_from = after_kw;
        }
    }

    found.sort_by_key(|b| b.start);
    found
}

/// From just after the keyword, verify the header is `"..."` (`"..."`)? `{`
/// allowing one or two quoted strings, and return the position of the
/// opening brace if so.
fn header_to_brace(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    let len = bytes.len();

    let mut quoted_strings = 0;
    loop {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < len && bytes[i] == b'"' {
            i += 1;
            while i < len && bytes[i] != b'"' {
                i += 1;
            }
            if i >= len {
                return None;
            }
            i += 1;
            quoted_strings += 1;
            continue;
        }
        break;
    }

    while i < len && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    if quoted_strings >= 1 && i < len && bytes[i] == b'{' {
        Some(i)
    } else {
        None
    }
}

fn matching_brace_end(text: &str, brace_pos: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut i = brace_pos;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunking_respects_overlap_invariant() {
        assert!(chunk_default("hello", 10, 10).is_err());
    }

    #[test]
    fn default_chunking_produces_final_short_window() {
        let text = "word ".repeat(50);
        let chunks = chunk_default(&text, 20, 5).unwrap();
        assert!(chunks.len() > 1);
    }

    #[test]
    fn whitespace_chunking_never_emits_blank_chunks() {
        let text = "   \n\n   ";
        let chunks = chunk_whitespace(text, 4, 1).unwrap();
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()));
    }

    #[test]
    fn whitespace_chunking_biases_to_boundary() {
        let text = "a".repeat(5) + " " + &"b".repeat(20);
        let chunks = chunk_whitespace(&text, 10, 2).unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn detects_infra_as_code_by_content() {
        let text = r#"Some prose. resource "google_storage_bucket" "b" { name = "x" }"#;
        assert!(is_infrastructure_as_code("notes.md", text));
    }

    #[test]
    fn structure_aware_extracts_resource_block() {
        let text = "Intro prose.\n\nresource \"google_storage_bucket\" \"b\" {\n  name = \"x\"\n}\n\nTrailing prose.";
        let chunks = chunk_structure_aware(text, 800, 200).unwrap();
        assert!(chunks.iter().any(|c| c.block_kind.as_deref() == Some("resource")));
        let block = chunks.iter().find(|c| c.block_kind.is_some()).unwrap();
        assert!(block.text.contains("google_storage_bucket"));
        assert!(block.text.trim_end().ends_with('}'));
    }

    #[test]
    fn structure_aware_handles_nested_braces() {
        let text = "resource \"a\" \"b\" {\n  nested {\n    x = 1\n  }\n}";
        let chunks = chunk_structure_aware(text, 800, 200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("nested"));
    }
}

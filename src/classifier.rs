//! Query classifier (spec section 4.10).
//!
//! Regex-driven tagging against the lowercased query. Order matters:
//! infra-code wins over code-generation wins over doc-lookup.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum QueryTag {
    InfraCode,
    CodeGeneration,
    DocLookup,
    General,
}

struct Patterns {
    infra_code: Vec<Regex>,
    code_generation: Vec<Regex>,
    doc_lookup: Vec<Regex>,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        infra_code: vec![
            Regex::new(r"terraform").unwrap(),
            Regex::new(r"\.tf\b").unwrap(),
            Regex::new(r#"(resource|provider|variable|output|module|data)\s+""#).unwrap(),
            Regex::new(r"(aws|google|azurerm)_\w+").unwrap(),
            Regex::new(r"\bhcl\b").unwrap(),
        ],
        code_generation: vec![
            Regex::new(r"create\s+.*\s*resource").unwrap(),
            Regex::new(r"generate\s+code").unwrap(),
            Regex::new(r"example\s+of\s+.*\s*resource").unwrap(),
            Regex::new(r"how\s+to\s+create").unwrap(),
            Regex::new(r"configuration\s+for").unwrap(),
            Regex::new(r"syntax\s+for").unwrap(),
        ],
        doc_lookup: vec![
            Regex::new(r"what\s+is").unwrap(),
            Regex::new(r"explain").unwrap(),
            Regex::new(r"describe").unwrap(),
            Regex::new(r"definition\s+of").unwrap(),
            Regex::new(r"documentation\s+for").unwrap(),
            Regex::new(r"reference\s+for").unwrap(),
        ],
    })
}

pub fn classify(query: &str) -> QueryTag {
    let lower = query.to_lowercase();
    let p = patterns();

    if p.infra_code.iter().any(|r| r.is_match(&lower)) {
        return QueryTag::InfraCode;
    }
    if p.code_generation.iter().any(|r| r.is_match(&lower)) {
        return QueryTag::CodeGeneration;
    }
    if p.doc_lookup.iter().any(|r| r.is_match(&lower)) {
        return QueryTag::DocLookup;
    }
    QueryTag::General
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_infra_code() {
        assert_eq!(
            classify("How do I create a google_storage_bucket resource?"),
            QueryTag::InfraCode
        );
    }

    #[test]
    fn tags_code_generation() {
        assert_eq!(classify("generate code for a VPC"), QueryTag::CodeGeneration);
    }

    #[test]
    fn tags_doc_lookup() {
        assert_eq!(classify("what is a subnet"), QueryTag::DocLookup);
    }

    #[test]
    fn tags_general_otherwise() {
        assert_eq!(classify("hello there"), QueryTag::General);
    }

    #[test]
    fn infra_code_wins_over_code_generation() {
        // Contains both an infra-code marker and a code-gen verb phrase.
        let tag = classify(r#"how to create a resource "aws_instance" "x""#);
        assert_eq!(tag, QueryTag::InfraCode);
    }
}

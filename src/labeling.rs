use itertools::Itertools;
use std::collections::HashMap;

use crate::models::Bm25Model;
use crate::text::{contains_term, is_content_token, tokenize};

#[derive(Debug, Clone, PartialEq)]
pub struct ConceptLabel {
    pub label: String,
    /// Signature terms, best first.
    pub top_terms: Vec<String>,
}

fn join_label(terms: &[String]) -> String {
    terms.iter().take(2).join(" / ")
}

/// Rank BM25 vocab terms by in-cluster coverage times BM25 score.
fn bm25_terms(member_tokens: &[Vec<String>], bm25: &Bm25Model, top_n: usize) -> Vec<String> {
    let members = member_tokens.len().max(1) as f64;
    bm25.ngram_vocab
        .iter()
        .filter_map(|term| {
            let hits = member_tokens.iter().filter(|t| contains_term(t, term)).count();
            let score = bm25.score(term);
            (hits > 0 && score > 0.0).then(|| (term.clone(), hits as f64 / members * score))
        })
        .sorted_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
        .take(top_n)
        .map(|(t, _)| t)
        .collect()
}

fn frequency_terms(member_tokens: &[Vec<String>], top_n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tokens in member_tokens {
        for t in tokens.iter().filter(|t| is_content_token(t)) {
            *counts.entry(t.as_str()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
        .take(top_n)
        .map(|(t, _)| t.to_string())
        .collect()
}

/// Label a concept from its member sentences. Falls back to plain token
/// frequency when the BM25 vocabulary is empty or matches nothing.
pub fn label_concept(member_texts: &[&str], bm25: &Bm25Model, top_n: usize, index: usize) -> ConceptLabel {
    let member_tokens: Vec<Vec<String>> = member_texts.iter().map(|t| tokenize(t)).collect();
    let mut terms = if bm25.is_empty() {
        Vec::new()
    } else {
        bm25_terms(&member_tokens, bm25, top_n)
    };
    if terms.is_empty() {
        terms = frequency_terms(&member_tokens, top_n);
    }
    let label = if terms.is_empty() {
        format!("Concept {}", index + 1)
    } else {
        join_label(&terms)
    };
    ConceptLabel { label, top_terms: terms }
}

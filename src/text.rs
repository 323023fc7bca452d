use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'\-]*").expect("static word pattern"));

/// NFC, lowercase, word tokens (apostrophes and hyphens kept inside words).
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfc().collect::<String>().to_lowercase();
    WORD_RE
        .find_iter(&normalized)
        .map(|m| m.as_str().trim_end_matches(['\'', '-']).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// True when the term's tokens appear consecutively in `tokens`.
pub fn contains_term(tokens: &[String], term: &str) -> bool {
    let needle = tokenize(term);
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens.windows(needle.len()).any(|w| w == needle.as_slice())
}

pub fn stopwords() -> &'static HashSet<&'static str> {
    static SET: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        [
            "the", "a", "an", "and", "or", "but", "if", "then", "of", "to", "in", "on", "for", "with", "as", "by",
            "is", "are", "was", "were", "be", "been", "being", "that", "this", "it", "its", "at", "from", "into",
            "over", "under", "about", "after", "before", "between", "during", "without", "within", "than", "not",
            "no", "yes", "more", "most", "less", "very", "much", "many", "some", "any", "such", "there", "their",
            "they", "them", "we", "our", "you", "your", "i", "me", "my", "he", "she", "his", "her", "which", "who",
            "what", "would", "could", "should", "can", "will", "also", "just", "so", "too", "has", "have", "had",
            "do", "does", "did", "these", "those", "how", "all", "one", "really", "quite", "think", "feel",
        ]
        .into_iter()
        .collect()
    });
    &SET
}

pub fn is_content_token(t: &str) -> bool {
    t.chars().count() >= 3 && !stopwords().contains(t) && !t.chars().all(|c| c.is_numeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_with_unicode_and_case() {
        assert_eq!(tokenize("Café   DESIGN, well-lit!"), vec!["café", "design", "well-lit"]);
    }

    #[test]
    fn ngram_matches_only_consecutive_tokens() {
        let tokens = tokenize("The public space feels open");
        assert!(contains_term(&tokens, "public space"));
        assert!(!contains_term(&tokens, "space public"));
        assert!(!contains_term(&tokens, "pub"));
    }

    #[test]
    fn stopwords_are_not_content() {
        assert!(!is_content_token("the"));
        assert!(!is_content_token("2024"));
        assert!(is_content_token("facade"));
    }
}

//! Token-set similarity and keyword extraction.
//!
//! All free-text comparison in the matching pipeline goes through one
//! Jaccard score over lower-cased whitespace tokens. Identifier
//! comparison reuses the same score after splitting part numbers on
//! their separators, so `ABC-123-X` and `ABC-123-X-9` overlap on three
//! of four segments (0.75) instead of degenerating to all-or-nothing
//! string equality.

use std::collections::HashSet;

/// Words carrying no signal for product matching.
const STOPWORDS: [&str; 14] = [
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "a", "an",
];

/// Jaccard similarity of the lower-cased word sets of `a` and `b`.
/// Returns 0.0 when either side has no tokens.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let a_tokens: HashSet<&str> = a_lower.split_whitespace().collect();
    let b_tokens: HashSet<&str> = b_lower.split_whitespace().collect();

    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }

    let intersection = a_tokens.intersection(&b_tokens).count();
    let union = a_tokens.union(&b_tokens).count();
    intersection as f64 / union as f64
}

/// Similarity of two part numbers over their separator-delimited
/// segments.
pub fn identifier_similarity(a: &str, b: &str) -> f64 {
    similarity(&segment_form(a), &segment_form(b))
}

fn segment_form(identifier: &str) -> String {
    identifier.replace(['-', '_'], " ")
}

/// Keywords worth matching on: lower-cased tokens minus stopwords and
/// anything two characters or shorter, first occurrence order kept.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in text.to_lowercase().split_whitespace() {
        if token.len() <= 2 || STOPWORDS.contains(&token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_reflexive() {
        assert_eq!(similarity("usb cable adapter", "usb cable adapter"), 1.0);
    }

    #[test]
    fn test_similarity_symmetric() {
        let ab = similarity("red usb cable", "blue usb cable");
        let ba = similarity("blue usb cable", "red usb cable");
        assert_eq!(ab, ba);
        assert!((ab - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_empty_is_zero() {
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("anything", ""), 0.0);
        assert_eq!(similarity("   ", "x"), 0.0);
    }

    #[test]
    fn test_similarity_case_insensitive() {
        assert_eq!(similarity("USB Cable", "usb cable"), 1.0);
    }

    #[test]
    fn test_identifier_similarity_partial_overlap() {
        let sim = identifier_similarity("ABC-123-X-9", "ABC-123-X");
        assert!((sim - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_identifier_similarity_separator_variants() {
        assert_eq!(identifier_similarity("ABC-123", "ABC_123"), 1.0);
        assert_eq!(identifier_similarity("ABC-123", "XYZ-999"), 0.0);
    }

    #[test]
    fn test_extract_keywords_drops_stopwords_and_short_tokens() {
        let kws = extract_keywords("The cable for the HP printer on my desk");
        assert_eq!(kws, vec!["cable", "printer", "desk"]);
    }

    #[test]
    fn test_extract_keywords_dedupes_preserving_order() {
        let kws = extract_keywords("cable adapter cable premium adapter");
        assert_eq!(kws, vec!["cable", "adapter", "premium"]);
    }
}

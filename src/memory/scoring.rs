//! Ranking and importance utilities shared by the tiers and the manager.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::types::{clamp_unit, ScoredMemory};

/// Words that carry no retrieval signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "has",
    "have", "how", "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was",
    "were", "what", "when", "where", "which", "who", "why", "with",
];

/// Keywords that raise the estimated importance of new content.
const IMPORTANCE_KEYWORDS: &[&str] = &[
    "important",
    "critical",
    "must",
    "remember",
    "warning",
    "error",
    "urgent",
    "never forget",
];

/// Importance boost applied on each access, as a fraction of the remaining headroom.
pub const ACCESS_BOOST: f64 = 0.1;

/// Lower-cased alphanumeric terms with stopwords and single characters removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Keyword relevance of `content` for `query`, in [0, 1].
///
/// Term-frequency weighted coverage of the query terms, with a bonus
/// when the whole query appears verbatim.
pub fn keyword_score(query: &str, content: &str) -> f64 {
    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    if query_terms.is_empty() {
        return 0.0;
    }

    let mut frequencies: HashMap<String, usize> = HashMap::new();
    for term in tokenize(content) {
        *frequencies.entry(term).or_insert(0) += 1;
    }

    let mut covered = 0.0;
    for term in &query_terms {
        if let Some(&tf) = frequencies.get(term) {
            // Diminishing returns for repeated terms
            covered += 1.0 - 0.5f64.powi(tf as i32);
        }
    }
    let coverage = covered / query_terms.len() as f64;

    let phrase_bonus = if content
        .to_lowercase()
        .contains(query.trim().to_lowercase().as_str())
    {
        0.5
    } else {
        0.0
    };

    clamp_unit(coverage * 0.5 + phrase_bonus * coverage.max(0.5))
}

/// Cosine similarity of two vectors; 0 when either is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Min-max normalize scores in place to [0, 1].
///
/// A set whose scores are all equal maps to 1.0.
pub fn min_max_normalize(results: &mut [ScoredMemory]) {
    if results.is_empty() {
        return;
    }
    let min = results
        .iter()
        .map(|r| r.score)
        .fold(f64::INFINITY, f64::min);
    let max = results
        .iter()
        .map(|r| r.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    for result in results.iter_mut() {
        result.score = if span.is_finite() && span > f64::EPSILON {
            clamp_unit((result.score - min) / span)
        } else {
            1.0
        };
    }
}

/// Sort by score descending, breaking ties by importance then recency.
pub fn sort_by_score(results: &mut [ScoredMemory]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.item.importance.total_cmp(&a.item.importance))
            .then_with(|| b.item.created_at.cmp(&a.item.created_at))
    });
}

/// Exponential decay: `base * factor^(hours / 24)`.
pub fn decayed_importance(base: f64, hours_elapsed: f64, decay_factor: f64) -> f64 {
    if hours_elapsed <= 0.0 {
        return clamp_unit(base);
    }
    clamp_unit(base * decay_factor.powf(hours_elapsed / 24.0))
}

/// Importance after one access.
pub fn boosted_importance(importance: f64) -> f64 {
    clamp_unit(importance + (1.0 - importance) * ACCESS_BOOST)
}

/// Heuristic importance of new content.
///
/// Base 0.5; long content +0.1; urgency keywords +0.2; metadata
/// `priority` of `high` +0.3 or `low` -0.2.
pub fn estimate_importance(content: &str, metadata: &HashMap<String, Value>) -> f64 {
    let mut importance = 0.5;

    if content.chars().count() > 100 {
        importance += 0.1;
    }

    let lowered = content.to_lowercase();
    if IMPORTANCE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        importance += 0.2;
    }

    match metadata.get("priority").and_then(|v| v.as_str()) {
        Some("high") => importance += 0.3,
        Some("low") => importance -= 0.2,
        _ => {}
    }

    clamp_unit(importance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryItem, Tier};

    fn scored(score: f64) -> ScoredMemory {
        ScoredMemory::new(MemoryItem::new(Tier::Working, "x"), score)
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_punctuation() {
        assert_eq!(
            tokenize("What is the user's name?"),
            vec!["user".to_string(), "name".to_string()]
        );
        assert!(tokenize("the a is").is_empty());
    }

    #[test]
    fn test_keyword_score() {
        let exact = keyword_score("deploy the api", "Deploy the API to staging");
        let partial = keyword_score("deploy database", "Deploy the API to staging");
        let none = keyword_score("weather", "Deploy the API to staging");

        assert!(exact > partial);
        assert!(partial > 0.0);
        assert_eq!(none, 0.0);
        assert!(exact <= 1.0);
        assert_eq!(keyword_score("", "anything"), 0.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_min_max_normalize() {
        let mut results = vec![scored(2.0), scored(4.0), scored(3.0)];
        min_max_normalize(&mut results);
        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.0, 1.0, 0.5]);

        let mut flat = vec![scored(0.3), scored(0.3)];
        min_max_normalize(&mut flat);
        assert!(flat.iter().all(|r| r.score == 1.0));
    }

    #[test]
    fn test_sort_by_score_breaks_ties_on_importance() {
        let mut low = scored(0.5);
        low.item.importance = 0.1;
        let mut high = scored(0.5);
        high.item.importance = 0.9;
        let mut results = vec![low, high, scored(0.9)];
        sort_by_score(&mut results);

        assert_eq!(results[0].score, 0.9);
        assert_eq!(results[1].item.importance, 0.9);
    }

    #[test]
    fn test_decay() {
        assert_eq!(decayed_importance(0.8, 0.0, 0.95), 0.8);
        let one_day = decayed_importance(0.8, 24.0, 0.95);
        assert!((one_day - 0.76).abs() < 1e-9);
        let later = decayed_importance(0.8, 24.0 * 30.0, 0.95);
        assert!(later < one_day);
    }

    #[test]
    fn test_boost_never_exceeds_one() {
        let mut importance = 0.5;
        for _ in 0..100 {
            importance = boosted_importance(importance);
        }
        assert!(importance <= 1.0);
        assert!(importance > 0.99);
    }

    #[test]
    fn test_estimate_importance() {
        let empty = HashMap::new();
        assert_eq!(estimate_importance("hello", &empty), 0.5);
        assert!((estimate_importance("This is important", &empty) - 0.7).abs() < 1e-9);

        let mut high = HashMap::new();
        high.insert("priority".to_string(), Value::from("high"));
        assert!((estimate_importance("remember the deadline", &high) - 1.0).abs() < 1e-9);

        let mut low = HashMap::new();
        low.insert("priority".to_string(), Value::from("low"));
        assert!((estimate_importance("hello", &low) - 0.3).abs() < 1e-9);
    }
}

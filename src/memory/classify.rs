//! Rule-based tier classification for incoming content.
//!
//! Classification looks at:
//! - Explicit metadata (`type` / `tier` override, non-text `modality`)
//! - Content length (very short fragments stay in working memory)
//! - First-person temporal language (events -> episodic)
//! - Declarative and preference language (facts -> semantic)

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::types::{Tier, META_MODALITY};

static FIRST_PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(i|we|me|us|my|our|i'm|i've|we've)\b").unwrap());

static TEMPORAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(yesterday|today|tonight|tomorrow|earlier|recently|ago|last\s+(night|week|month|year|time)|this\s+(morning|afternoon|evening|week)|on\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday))\b",
    )
    .unwrap()
});

static EVENT_VERBS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(happened|remember\s+when|went|met|visited|attended|saw|talked|called|finished|started|deployed|fixed)\b",
    )
    .unwrap()
});

static DECLARATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[\w'\- ]{1,60}?\s+(is|are|was\s+named|is\s+named|means|equals|stands\s+for|consists\s+of)\s+\S+").unwrap()
});

static PREFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(prefers?|likes?|loves?|hates?|dislikes?|favou?rite|always|never|allergic)\b",
    )
    .unwrap()
});

static KNOWLEDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(definition|defined\s+as|concept|rule|principle|fact|known\s+as)\b")
        .unwrap()
});

/// Outcome of classifying a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDecision {
    pub tier: Tier,
    pub reason: String,
}

impl TierDecision {
    fn new(tier: Tier, reason: impl Into<String>) -> Self {
        Self {
            tier,
            reason: reason.into(),
        }
    }
}

/// Pattern-based tier classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierClassifier {
    /// Content with fewer words than this stays in working memory
    pub min_durable_words: usize,
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self {
            min_durable_words: 3,
        }
    }
}

impl TierClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_durable_words(mut self, words: usize) -> Self {
        self.min_durable_words = words;
        self
    }

    /// Pick a tier for content.
    pub fn classify(&self, content: &str, metadata: &HashMap<String, Value>) -> TierDecision {
        for key in ["tier", "type"] {
            if let Some(tier) = metadata
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Tier>().ok())
            {
                return TierDecision::new(tier, format!("metadata `{}` override", key));
            }
        }

        if let Some(modality) = metadata.get(META_MODALITY).and_then(|v| v.as_str()) {
            if !modality.eq_ignore_ascii_case("text") {
                return TierDecision::new(Tier::Perceptual, format!("{} modality", modality));
            }
        }

        if content.split_whitespace().count() < self.min_durable_words {
            return TierDecision::new(Tier::Working, "fragment too short to be durable");
        }

        if self.is_event_like(content) {
            return TierDecision::new(Tier::Episodic, "first-person temporal event");
        }

        if self.is_fact_like(content) {
            return TierDecision::new(Tier::Semantic, "declarative or preference statement");
        }

        TierDecision::new(Tier::Working, "no durable signal")
    }

    /// Content that reads like something that happened.
    pub fn is_event_like(&self, content: &str) -> bool {
        let first_person = FIRST_PERSON.is_match(content);
        let temporal = TEMPORAL.is_match(content);
        let event = EVENT_VERBS.is_match(content);

        (first_person && (temporal || event)) || (temporal && event)
    }

    /// Content that reads like a durable fact or preference.
    pub fn is_fact_like(&self, content: &str) -> bool {
        DECLARATIVE.is_match(content) || PREFERENCE.is_match(content) || KNOWLEDGE.is_match(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(content: &str) -> Tier {
        TierClassifier::default()
            .classify(content, &HashMap::new())
            .tier
    }

    #[test]
    fn test_event_language_goes_episodic() {
        assert_eq!(classify("Yesterday I met Bob at the conference"), Tier::Episodic);
        assert_eq!(classify("We deployed the new release this morning"), Tier::Episodic);
        assert_eq!(classify("The outage happened last night"), Tier::Episodic);
    }

    #[test]
    fn test_fact_language_goes_semantic() {
        assert_eq!(classify("User is named Alice"), Tier::Semantic);
        assert_eq!(classify("Paris is the capital of France"), Tier::Semantic);
        assert_eq!(classify("The user prefers dark mode"), Tier::Semantic);
    }

    #[test]
    fn test_default_and_short_content_stay_working() {
        assert_eq!(classify("current total 42"), Tier::Working);
        assert_eq!(classify("ok"), Tier::Working);
        assert_eq!(classify("intermediate result pending review"), Tier::Working);
    }

    #[test]
    fn test_metadata_overrides() {
        let classifier = TierClassifier::default();

        let mut meta = HashMap::new();
        meta.insert("type".to_string(), Value::from("semantic"));
        assert_eq!(classifier.classify("ok", &meta).tier, Tier::Semantic);

        let mut meta = HashMap::new();
        meta.insert(META_MODALITY.to_string(), Value::from("image"));
        let decision = classifier.classify("a photo of a cat", &meta);
        assert_eq!(decision.tier, Tier::Perceptual);
        assert!(decision.reason.contains("image"));

        let mut meta = HashMap::new();
        meta.insert(META_MODALITY.to_string(), Value::from("text"));
        assert_eq!(classifier.classify("ok", &meta).tier, Tier::Working);
    }
}

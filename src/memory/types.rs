//! Core types for tiered memory: items, tiers, triples and queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Unique identifier for a memory item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Generate a new random memory ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Short-horizon scratchpad with TTL expiry
    Working,
    /// Time-ordered record of concrete events
    Episodic,
    /// Durable facts, preferences and relations
    Semantic,
    /// Descriptions of images, audio and other media
    Perceptual,
}

impl Tier {
    /// All tiers in routing order.
    pub const ALL: [Tier; 4] = [
        Tier::Working,
        Tier::Episodic,
        Tier::Semantic,
        Tier::Perceptual,
    ];

    /// Tiers searched when a caller does not name any.
    pub const DEFAULT_RETRIEVAL: [Tier; 3] = [Tier::Working, Tier::Episodic, Tier::Semantic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::Episodic => "episodic",
            Tier::Semantic => "semantic",
            Tier::Perceptual => "perceptual",
        }
    }

    /// Whether items in this tier are subject to TTL expiry.
    pub fn has_ttl(&self) -> bool {
        matches!(self, Tier::Working)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "working" => Ok(Tier::Working),
            "episodic" => Ok(Tier::Episodic),
            "semantic" => Ok(Tier::Semantic),
            "perceptual" => Ok(Tier::Perceptual),
            other => Err(Error::invalid_item(format!("unknown tier: {}", other))),
        }
    }
}

/// Metadata key naming the tier an item was promoted from.
pub const META_PROMOTED_FROM: &str = "promoted_from";
/// Metadata key holding the id of the source item of a promotion.
pub const META_SOURCE_ID: &str = "source_id";
/// Metadata key for the perceptual modality.
pub const META_MODALITY: &str = "modality";
/// Metadata key pointing at the binary payload of a perceptual item.
pub const META_SOURCE_REF: &str = "source_ref";

/// A unit of stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: MemoryId,
    pub content: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    /// Only working-tier items expire; `None` means not subject to TTL
    pub expires_at: Option<DateTime<Utc>>,
    /// Always within [0, 1]
    pub importance: f64,
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

impl MemoryItem {
    /// Default importance for new items.
    pub const DEFAULT_IMPORTANCE: f64 = 0.5;

    /// Create a new item in a tier.
    pub fn new(tier: Tier, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::new(),
            content: content.into(),
            tier,
            created_at: now,
            expires_at: None,
            importance: Self::DEFAULT_IMPORTANCE,
            metadata: HashMap::new(),
            embedding: None,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Set importance (clamped to [0, 1]).
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.set_importance(importance);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a metadata map.
    pub fn with_metadata_map(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Set the expiry timestamp.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the creation timestamp (used when replaying historical events).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.last_accessed = created_at;
        self
    }

    /// Set importance, clamping NaN to zero and everything else into [0, 1].
    pub fn set_importance(&mut self, importance: f64) {
        self.importance = clamp_unit(importance);
    }

    /// Whether the item has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    /// Whether the item has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Record an access at `now`.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// Metadata value as a string, if present and textual.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Approximate token count (whitespace-delimited words).
    pub fn token_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    /// SHA-256 of the content, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check the structural invariants every tier relies on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.content.trim().is_empty() {
            return Err(Error::invalid_item("content must not be empty"));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at < self.created_at {
                return Err(Error::invalid_item(format!(
                    "expires_at {} precedes created_at {}",
                    expires_at, self.created_at
                )));
            }
        }
        Ok(())
    }

    /// Build the copy of this item that lands in `target` on promotion.
    ///
    /// The copy gets a fresh id and creation time, keeps content and
    /// metadata, drops the TTL and embedding, and receives a small
    /// importance boost.
    pub fn promoted_to(&self, target: Tier) -> MemoryItem {
        let mut promoted = MemoryItem::new(target, self.content.clone())
            .with_metadata_map(self.metadata.clone())
            .with_metadata(META_PROMOTED_FROM, self.tier.as_str())
            .with_metadata(META_SOURCE_ID, self.id.to_string());
        promoted.set_importance(self.importance * 1.1);
        promoted
    }
}

/// Clamp a score into [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A memory item with a tier-local relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub item: MemoryItem,
    pub score: f64,
}

impl ScoredMemory {
    pub fn new(item: MemoryItem, score: f64) -> Self {
        Self { item, score }
    }
}

/// Content-hash identity of a knowledge triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripleId(pub String);

impl fmt::Display for TripleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0[..16.min(self.0.len())])
    }
}

/// A `(subject, predicate, object)` relation in semantic memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    /// Create a triple; parts are trimmed and lower-cased.
    pub fn new(
        subject: impl AsRef<str>,
        predicate: impl AsRef<str>,
        object: impl AsRef<str>,
    ) -> Self {
        Self {
            subject: normalize_concept(subject.as_ref()),
            predicate: normalize_concept(predicate.as_ref()),
            object: normalize_concept(object.as_ref()),
        }
    }

    /// Identity derived from the normalized parts.
    pub fn id(&self) -> TripleId {
        let mut hasher = Sha256::new();
        hasher.update(self.subject.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.predicate.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.object.as_bytes());
        TripleId(format!("{:x}", hasher.finalize()))
    }

    pub fn is_valid(&self) -> bool {
        !self.subject.is_empty() && !self.predicate.is_empty() && !self.object.is_empty()
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// Normalize a graph concept name.
pub fn normalize_concept(concept: &str) -> String {
    concept
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A concept reached while traversing the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedConcept {
    pub concept: String,
    /// Hops from the start concept (1 = direct neighbour)
    pub depth: usize,
    /// Predicate of the edge through which the concept was first reached
    pub via: String,
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range; fails if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, Error> {
        if start > end {
            return Err(Error::invalid_item(format!(
                "time range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// The window ending now and reaching back `duration`.
    pub fn last(duration: chrono::Duration) -> Self {
        let end = Utc::now();
        Self {
            start: end - duration,
            end,
        }
    }

    /// A range covering every representable timestamp.
    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// A tier-level retrieval query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub text: String,
    pub limit: usize,
    pub min_importance: f64,
    pub time_range: Option<TimeRange>,
    /// Perceptual only: restrict to one modality
    pub modality: Option<String>,
}

impl MemoryQuery {
    /// Default result limit.
    pub const DEFAULT_LIMIT: usize = 5;

    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: Self::DEFAULT_LIMIT,
            min_importance: 0.0,
            time_range: None,
            modality: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_importance(mut self, min_importance: f64) -> Self {
        self.min_importance = clamp_unit(min_importance);
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = Some(modality.into());
        self
    }

    /// Whether the query carries search text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Per-tier statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: Tier,
    pub count: usize,
    pub capacity: Option<usize>,
    pub avg_importance: f64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Writes waiting to be retried against a secondary backend
    pub pending_writes: usize,
}

impl TierStats {
    /// Summarize a snapshot of items.
    pub fn from_items(tier: Tier, items: &[MemoryItem], capacity: Option<usize>) -> Self {
        let count = items.len();
        let avg_importance = if count == 0 {
            0.0
        } else {
            items.iter().map(|i| i.importance).sum::<f64>() / count as f64
        };
        Self {
            tier,
            count,
            capacity,
            avg_importance,
            oldest: items.iter().map(|i| i.created_at).min(),
            newest: items.iter().map(|i| i.created_at).max(),
            pending_writes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tier_round_trip_names() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        assert!("procedural".parse::<Tier>().is_err());
        assert_eq!(" Semantic ".parse::<Tier>().unwrap(), Tier::Semantic);
    }

    #[test]
    fn test_importance_is_clamped() {
        let item = MemoryItem::new(Tier::Working, "x").with_importance(3.0);
        assert_eq!(item.importance, 1.0);

        let item = MemoryItem::new(Tier::Working, "x").with_importance(-1.0);
        assert_eq!(item.importance, 0.0);

        let item = MemoryItem::new(Tier::Working, "x").with_importance(f64::NAN);
        assert_eq!(item.importance, 0.0);
    }

    #[test]
    fn test_validate_rejects_expiry_before_creation() {
        let now = Utc::now();
        let item = MemoryItem::new(Tier::Working, "note")
            .with_created_at(now)
            .with_expires_at(now - Duration::seconds(1));
        assert!(matches!(item.validate(), Err(Error::InvalidItem(_))));

        let empty = MemoryItem::new(Tier::Working, "   ");
        assert!(matches!(empty.validate(), Err(Error::InvalidItem(_))));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let item = MemoryItem::new(Tier::Working, "note").with_expires_at(now);
        assert!(item.is_expired_at(now));
        assert!(!item.is_expired_at(now - Duration::milliseconds(1)));

        let durable = MemoryItem::new(Tier::Semantic, "fact");
        assert!(!durable.is_expired_at(now + Duration::days(365)));
    }

    #[test]
    fn test_promotion_creates_new_record() {
        let source = MemoryItem::new(Tier::Working, "I met Bob yesterday")
            .with_importance(0.8)
            .with_expires_at(Utc::now() + Duration::seconds(30))
            .with_metadata("session", "s1");

        let promoted = source.promoted_to(Tier::Episodic);

        assert_ne!(promoted.id, source.id);
        assert_eq!(promoted.content, source.content);
        assert_eq!(promoted.tier, Tier::Episodic);
        assert_eq!(promoted.expires_at, None);
        assert_eq!(promoted.metadata_str("session"), Some("s1"));
        assert_eq!(promoted.metadata_str(META_PROMOTED_FROM), Some("working"));
        let source_id = source.id.to_string();
        assert_eq!(promoted.metadata_str(META_SOURCE_ID), Some(source_id.as_str()));
        assert!((promoted.importance - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_triple_identity_is_normalized() {
        let a = Triple::new("Alice", "likes", "Tea");
        let b = Triple::new("  alice ", "LIKES", "tea");
        let c = Triple::new("alice", "likes", "coffee");

        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert!(a.is_valid());
        assert!(!Triple::new("", "likes", "tea").is_valid());
    }

    #[test]
    fn test_time_range() {
        let now = Utc::now();
        assert!(TimeRange::new(now, now - Duration::seconds(1)).is_err());

        let range = TimeRange::new(now - Duration::hours(1), now).unwrap();
        assert!(range.contains(now - Duration::minutes(30)));
        assert!(!range.contains(now + Duration::minutes(1)));
        assert!(TimeRange::unbounded().contains(now));
    }

    #[test]
    fn test_tier_stats_from_items() {
        let items = vec![
            MemoryItem::new(Tier::Semantic, "a").with_importance(0.2),
            MemoryItem::new(Tier::Semantic, "b").with_importance(0.6),
        ];
        let stats = TierStats::from_items(Tier::Semantic, &items, Some(10));
        assert_eq!(stats.count, 2);
        assert!((stats.avg_importance - 0.4).abs() < 1e-9);
        assert!(stats.oldest.is_some());

        let empty = TierStats::from_items(Tier::Working, &[], None);
        assert_eq!(empty.avg_importance, 0.0);
        assert_eq!(empty.newest, None);
    }
}

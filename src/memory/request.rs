//! Request and report types for the memory manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

use super::types::{MemoryId, MemoryQuery, Tier, TierStats, TimeRange};

/// A request to add content to memory.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub content: String,
    /// Skip classification and store in this tier
    pub tier: Option<Tier>,
    /// Explicit importance; estimated from content when absent
    pub importance: Option<f64>,
    pub metadata: HashMap<String, Value>,
    /// Working tier only; overrides the configured TTL
    pub expires_at: Option<DateTime<Utc>>,
    pub cancel: Option<CancellationToken>,
}

impl AddRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tier: None,
            importance: None,
            metadata: HashMap::new(),
            expires_at: None,
            cancel: None,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata_map(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A request to search memory.
#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    pub query: MemoryQuery,
    /// Tiers to search; `None` means working, episodic and semantic
    pub tiers: Option<Vec<Tier>>,
    pub cancel: Option<CancellationToken>,
}

impl RetrieveRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            query: MemoryQuery::new(text),
            tiers: None,
            cancel: None,
        }
    }

    pub fn with_tiers(mut self, tiers: impl IntoIterator<Item = Tier>) -> Self {
        self.tiers = Some(tiers.into_iter().collect());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.query.limit = limit;
        self
    }

    pub fn with_min_importance(mut self, min_importance: f64) -> Self {
        self.query = self.query.with_min_importance(min_importance);
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.query.time_range = Some(range);
        self
    }

    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.query.modality = Some(modality.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Bulk forgetting strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ForgetPolicy {
    /// Drop items whose importance is below the threshold
    Importance { threshold: f64 },
    /// Drop items created more than `max_age_days` ago
    Time { max_age_days: f64 },
    /// Keep only the `keep` most important items per tier
    Capacity { keep: usize },
}

/// One working item moved to a durable tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub source: MemoryId,
    pub target: MemoryId,
    pub tier: Tier,
}

/// Outcome of a consolidation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub promoted: Vec<Promotion>,
    /// Candidates whose destination write failed; they stay in working memory
    pub failed: usize,
}

/// Outcome of a sweep across tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub removed: BTreeMap<Tier, Vec<MemoryId>>,
    /// Tiers whose sweep errored and will be retried on the next pass
    pub failed: Vec<Tier>,
}

impl SweepReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().map(Vec::len).sum()
    }
}

/// Snapshot of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub tiers: Vec<TierStats>,
    pub total: usize,
    /// Entries in the id-to-tier index
    pub indexed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_forget_policy_wire_format() {
        let policy: ForgetPolicy =
            serde_json::from_value(json!({"strategy": "importance", "threshold": 0.3})).unwrap();
        assert_eq!(policy, ForgetPolicy::Importance { threshold: 0.3 });

        let policy: ForgetPolicy =
            serde_json::from_value(json!({"strategy": "capacity", "keep": 5})).unwrap();
        assert_eq!(policy, ForgetPolicy::Capacity { keep: 5 });

        assert!(serde_json::from_value::<ForgetPolicy>(json!({"strategy": "random"})).is_err());
    }

    #[test]
    fn test_retrieve_request_builder() {
        let request = RetrieveRequest::new("deploy")
            .with_tiers([Tier::Episodic])
            .with_limit(3)
            .with_min_importance(2.0);
        assert_eq!(request.query.limit, 3);
        assert_eq!(request.query.min_importance, 1.0);
        assert_eq!(request.tiers, Some(vec![Tier::Episodic]));
    }
}

//! Configuration for the memory engine.
//!
//! Every field has a default, so a partial JSON document only needs to name
//! what it overrides:
//!
//! ```json
//! { "working": { "ttl_secs": 300 }, "manager": { "promotion_threshold": 0.8 } }
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::memory::Tier;

/// Working memory tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingConfig {
    /// Seconds an untouched item stays alive
    pub ttl_secs: u64,
    /// Maximum item count
    pub capacity: usize,
    /// Maximum total whitespace tokens
    pub max_tokens: usize,
}

impl Default for WorkingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 120 * 60,
            capacity: 10,
            max_tokens: 2000,
        }
    }
}

impl WorkingConfig {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs as i64)
    }
}

/// Episodic memory tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodicConfig {
    /// Vector namespace for episodes
    pub namespace: String,
    /// Importance multiplier per day since last access
    pub decay_factor: f64,
    /// Episodes whose decayed importance drops below this are forgotten
    pub importance_floor: f64,
    /// Maximum vector writes kept for retry while the index is down
    pub retry_queue_limit: usize,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            namespace: "episodic".to_string(),
            decay_factor: 0.95,
            importance_floor: 0.1,
            retry_queue_limit: 1024,
        }
    }
}

/// Semantic memory tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Vector namespace for facts
    pub namespace: String,
    /// Hard cap on stored facts; `None` is unbounded
    pub capacity: Option<usize>,
    /// Ceiling for graph traversal depth
    pub max_traversal_depth: usize,
    /// Derive triples from simple declarative sentences on store
    pub extract_triples: bool,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            namespace: "semantic".to_string(),
            capacity: None,
            max_traversal_depth: 3,
            extract_triples: true,
        }
    }
}

/// Perceptual memory tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptualConfig {
    /// Vector namespace for media descriptions
    pub namespace: String,
    /// Accepted modalities
    pub modalities: Vec<String>,
    /// Hard cap on stored items; `None` is unbounded
    pub capacity: Option<usize>,
}

impl Default for PerceptualConfig {
    fn default() -> Self {
        Self {
            namespace: "perceptual".to_string(),
            modalities: ["text", "image", "audio", "video"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            capacity: None,
        }
    }
}

/// Manager tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Working items at or above this importance are promoted on consolidation
    pub promotion_threshold: f64,
    /// Destination for promoted items that are neither event- nor fact-like
    pub fallback_tier: Tier,
    /// Per-tier budget for a retrieval fan-out
    pub retrieve_timeout_ms: u64,
    /// Default number of merged results
    pub default_limit: usize,
    /// Seconds between background consolidate/sweep passes
    pub maintenance_interval_secs: u64,
    /// Tiers instantiated by the manager
    pub enabled_tiers: Vec<Tier>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 0.7,
            fallback_tier: Tier::Episodic,
            retrieve_timeout_ms: 2_000,
            default_limit: 10,
            maintenance_interval_secs: 60,
            enabled_tiers: vec![Tier::Working, Tier::Episodic, Tier::Semantic],
        }
    }
}

/// Top-level memory configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub working: WorkingConfig,
    pub episodic: EpisodicConfig,
    pub semantic: SemanticConfig,
    pub perceptual: PerceptualConfig,
    pub manager: ManagerConfig,
    /// SQLite file for the episodic document store; in-memory when unset
    pub storage_path: Option<String>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_working_ttl_secs(mut self, secs: u64) -> Self {
        self.working.ttl_secs = secs;
        self
    }

    pub fn with_working_capacity(mut self, capacity: usize) -> Self {
        self.working.capacity = capacity;
        self
    }

    pub fn with_promotion_threshold(mut self, threshold: f64) -> Self {
        self.manager.promotion_threshold = threshold;
        self
    }

    pub fn with_semantic_capacity(mut self, capacity: usize) -> Self {
        self.semantic.capacity = Some(capacity);
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_retrieve_timeout_ms(mut self, ms: u64) -> Self {
        self.manager.retrieve_timeout_ms = ms;
        self
    }

    /// Enable an additional tier (e.g. perceptual).
    pub fn enable_tier(mut self, tier: Tier) -> Self {
        if !self.manager.enabled_tiers.contains(&tier) {
            self.manager.enabled_tiers.push(tier);
        }
        self
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.working.ttl_secs == 0 {
            return Err(Error::Config("working.ttl_secs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.manager.promotion_threshold) {
            return Err(Error::Config(format!(
                "manager.promotion_threshold must be within [0, 1], got {}",
                self.manager.promotion_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.episodic.importance_floor) {
            return Err(Error::Config(format!(
                "episodic.importance_floor must be within [0, 1], got {}",
                self.episodic.importance_floor
            )));
        }
        if !(self.episodic.decay_factor > 0.0 && self.episodic.decay_factor <= 1.0) {
            return Err(Error::Config(format!(
                "episodic.decay_factor must be within (0, 1], got {}",
                self.episodic.decay_factor
            )));
        }
        if self.perceptual.modalities.is_empty() {
            return Err(Error::Config(
                "perceptual.modalities must name at least one modality".into(),
            ));
        }
        if self.manager.retrieve_timeout_ms == 0 {
            return Err(Error::Config(
                "manager.retrieve_timeout_ms must be positive".into(),
            ));
        }
        if !self.manager.enabled_tiers.contains(&Tier::Working) {
            return Err(Error::Config("the working tier cannot be disabled".into()));
        }
        if matches!(self.manager.fallback_tier, Tier::Working | Tier::Perceptual) {
            return Err(Error::Config(format!(
                "manager.fallback_tier must be episodic or semantic, got {}",
                self.manager.fallback_tier
            )));
        }
        Ok(())
    }
}

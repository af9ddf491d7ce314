//! The contract every memory tier implements.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::types::{MemoryId, MemoryItem, MemoryQuery, ScoredMemory, Tier, TierStats};
use crate::error::Result;

/// A storage tier with its own retention policy.
///
/// Scores returned by [`MemoryTier::retrieve`] are only comparable within
/// the tier that produced them; the manager normalizes before merging.
#[async_trait]
pub trait MemoryTier: Send + Sync {
    /// Which tier this is.
    fn tier(&self) -> Tier;

    /// Persist an item, returning its id.
    async fn store(&self, item: MemoryItem) -> Result<MemoryId>;

    /// Items relevant to `query`, best first.
    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>>;

    /// Fetch a single item.
    async fn get(&self, id: &MemoryId) -> Result<Option<MemoryItem>>;

    /// Record an access. Unknown ids and backend failures are ignored.
    async fn touch(&self, id: &MemoryId);

    /// Delete an item; returns whether it existed.
    async fn remove(&self, id: &MemoryId) -> Result<bool>;

    /// Run the tier's expiry/eviction pass and return what was dropped.
    async fn sweep(&self) -> Result<Vec<MemoryId>>;

    /// Snapshot of every live item.
    async fn items(&self) -> Result<Vec<MemoryItem>>;

    /// Change importance and/or merge metadata. Content is immutable.
    async fn update(
        &self,
        id: &MemoryId,
        importance: Option<f64>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool>;

    /// Drop every item, returning how many were removed.
    async fn clear(&self) -> Result<usize>;

    async fn stats(&self) -> Result<TierStats>;
}

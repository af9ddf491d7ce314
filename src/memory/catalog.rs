//! Vector-indexed item catalog shared by the semantic and perceptual tiers.
//!
//! Every vector is upserted with the full item record as its payload, so the
//! backend is the durable copy. The in-process map mirrors it for filtering,
//! access bookkeeping and keyword ranking when the embedder is down, and is
//! reloaded from the backend on first use.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::backend::VectorHit;

use super::scoring::{boosted_importance, keyword_score, sort_by_score};
use super::types::{MemoryId, MemoryItem, MemoryQuery, ScoredMemory, Tier, TierStats};
use crate::backend::{Embedder, VectorBackend};
use crate::error::{Error, Result};

/// Candidates fetched from the vector index per requested result, so that
/// post-filters still leave enough hits.
const OVERFETCH: usize = 4;

pub(crate) struct VectorCatalog {
    tier: Tier,
    namespace: String,
    capacity: Option<usize>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorBackend>,
    items: RwLock<HashMap<MemoryId, MemoryItem>>,
    loaded: OnceCell<()>,
}

impl VectorCatalog {
    pub(crate) fn new(
        tier: Tier,
        namespace: impl Into<String>,
        capacity: Option<usize>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorBackend>,
    ) -> Self {
        Self {
            tier,
            namespace: namespace.into(),
            capacity,
            embedder,
            vectors,
            items: RwLock::new(HashMap::new()),
            loaded: OnceCell::new(),
        }
    }

    /// Embed, index and record an item, evicting the least recently
    /// accessed entry when at capacity.
    pub(crate) async fn insert(&self, mut item: MemoryItem) -> Result<MemoryId> {
        if self.capacity == Some(0) {
            return Err(Error::capacity_exceeded(self.tier, 0));
        }
        self.ensure_loaded().await;

        item.embedding = Some(self.embedder.embed(&item.content).await?);
        self.persist(&item).await?;

        let id = item.id.clone();
        let evicted = {
            let mut items = self.items.write().await;
            items.insert(id.clone(), item);
            Self::evict_over_capacity(&mut items, self.capacity, Some(&id))
        };
        self.drop_vectors(&evicted).await;

        debug!(tier = %self.tier, id = %id, "Indexed item");
        Ok(id)
    }

    /// Write the record to the vector backend, embedding it if the vector
    /// is not cached.
    async fn persist(&self, item: &MemoryItem) -> Result<()> {
        let vector = match &item.embedding {
            Some(vector) => vector.clone(),
            None => self.embedder.embed(&item.content).await?,
        };
        let mut record = item.clone();
        record.embedding = None;
        let payload = json!({
            "tier": self.tier.as_str(),
            "item": serde_json::to_value(&record)?,
        });
        self.vectors
            .upsert(&self.namespace, &item.id.to_string(), vector, payload)
            .await
    }

    fn item_from_hit(hit: &VectorHit) -> Option<MemoryItem> {
        let item: MemoryItem = serde_json::from_value(hit.payload.get("item")?.clone()).ok()?;
        (item.id.to_string() == hit.id).then_some(item)
    }

    /// Load records already in the backend. A failed load is retried on the
    /// next call; until then the tier serves what it holds in process.
    async fn ensure_loaded(&self) {
        let loaded = self
            .loaded
            .get_or_try_init(|| async {
                let hits = self.vectors.scan(&self.namespace).await?;
                let mut items = self.items.write().await;
                let mut restored = 0;
                for item in hits.iter().filter_map(Self::item_from_hit) {
                    if let Entry::Vacant(slot) = items.entry(item.id.clone()) {
                        slot.insert(item);
                        restored += 1;
                    }
                }
                if restored > 0 {
                    info!(tier = %self.tier, count = restored, "Restored items from vector backend");
                }
                Ok::<(), Error>(())
            })
            .await;
        if let Err(e) = loaded {
            warn!(tier = %self.tier, error = %e, "Could not load items from vector backend");
        }
    }

    /// Remove least-recently-accessed items until within capacity.
    /// `keep` is never chosen.
    fn evict_over_capacity(
        items: &mut HashMap<MemoryId, MemoryItem>,
        capacity: Option<usize>,
        keep: Option<&MemoryId>,
    ) -> Vec<MemoryId> {
        let Some(capacity) = capacity else {
            return Vec::new();
        };
        let mut evicted = Vec::new();
        while items.len() > capacity {
            let victim = items
                .values()
                .filter(|item| Some(&item.id) != keep)
                .min_by(|a, b| {
                    a.last_accessed
                        .cmp(&b.last_accessed)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|item| item.id.clone());
            match victim {
                Some(id) => {
                    items.remove(&id);
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }

    async fn drop_vectors(&self, ids: &[MemoryId]) {
        for id in ids {
            if let Err(e) = self.vectors.delete(&self.namespace, &id.to_string()).await {
                warn!(tier = %self.tier, id = %id, error = %e, "Failed to delete evicted vector");
            }
        }
    }

    /// Rank catalog items for `query`, keeping only those accepted by `filter`.
    pub(crate) async fn search<F>(&self, query: &MemoryQuery, filter: F) -> Result<Vec<ScoredMemory>>
    where
        F: Fn(&MemoryItem) -> bool + Send + Sync,
    {
        self.ensure_loaded().await;
        let accept = |item: &MemoryItem| {
            item.importance >= query.min_importance
                && query
                    .time_range
                    .map(|range| range.contains(item.created_at))
                    .unwrap_or(true)
                && filter(item)
        };

        if !query.has_text() {
            let items = self.items.read().await;
            let mut results: Vec<ScoredMemory> = items
                .values()
                .filter(|item| accept(*item))
                .map(|item| ScoredMemory::new(item.clone(), item.importance))
                .collect();
            sort_by_score(&mut results);
            results.truncate(query.limit);
            return Ok(results);
        }

        let vector = match self.embedder.embed(&query.text).await {
            Ok(vector) => vector,
            Err(Error::EmbeddingUnavailable(reason)) => {
                warn!(tier = %self.tier, %reason, "Embedder unavailable, using keyword fallback");
                return Ok(self.keyword_search(query, accept).await);
            }
            Err(e) => return Err(e),
        };

        let k = query.limit.saturating_mul(OVERFETCH).max(query.limit);
        let hits = self.vectors.search(&self.namespace, &vector, k).await?;

        let items = self.items.read().await;
        let mut results: Vec<ScoredMemory> = hits
            .into_iter()
            .filter(|hit| hit.score > 0.0)
            .filter_map(|hit| {
                let id = MemoryId::parse(&hit.id).ok()?;
                let item = match items.get(&id) {
                    Some(item) => item.clone(),
                    None => Self::item_from_hit(&hit)?,
                };
                accept(&item).then(|| ScoredMemory::new(item, hit.score))
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(query.limit);
        Ok(results)
    }

    async fn keyword_search<F>(&self, query: &MemoryQuery, accept: F) -> Vec<ScoredMemory>
    where
        F: Fn(&MemoryItem) -> bool + Send + Sync,
    {
        let items = self.items.read().await;
        let mut results: Vec<ScoredMemory> = items
            .values()
            .filter(|item| accept(*item))
            .filter_map(|item| {
                let score = keyword_score(&query.text, &item.content);
                (score > 0.0).then(|| ScoredMemory::new(item.clone(), score))
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(query.limit);
        results
    }

    pub(crate) async fn get(&self, id: &MemoryId) -> Option<MemoryItem> {
        self.ensure_loaded().await;
        self.items.read().await.get(id).cloned()
    }

    pub(crate) async fn touch(&self, id: &MemoryId) {
        self.ensure_loaded().await;
        let mut items = self.items.write().await;
        if let Some(item) = items.get_mut(id) {
            item.record_access(Utc::now());
            item.set_importance(boosted_importance(item.importance));
        }
    }

    pub(crate) async fn remove(&self, id: &MemoryId) -> Result<bool> {
        self.ensure_loaded().await;
        if !self.items.read().await.contains_key(id) {
            return Ok(false);
        }
        self.vectors.delete(&self.namespace, &id.to_string()).await?;
        Ok(self.items.write().await.remove(id).is_some())
    }

    /// Enforce the capacity bound, returning evicted ids.
    pub(crate) async fn enforce_capacity(&self) -> Vec<MemoryId> {
        self.ensure_loaded().await;
        let evicted = {
            let mut items = self.items.write().await;
            Self::evict_over_capacity(&mut items, self.capacity, None)
        };
        self.drop_vectors(&evicted).await;
        evicted
    }

    pub(crate) async fn items(&self) -> Vec<MemoryItem> {
        self.ensure_loaded().await;
        self.items.read().await.values().cloned().collect()
    }

    pub(crate) async fn update(
        &self,
        id: &MemoryId,
        importance: Option<f64>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool> {
        self.ensure_loaded().await;
        let updated = {
            let mut items = self.items.write().await;
            let Some(item) = items.get_mut(id) else {
                return Ok(false);
            };
            if let Some(importance) = importance {
                item.set_importance(importance);
            }
            if let Some(metadata) = metadata {
                item.metadata.extend(metadata);
            }
            item.clone()
        };
        self.persist(&updated).await?;
        Ok(true)
    }

    pub(crate) async fn clear(&self) -> usize {
        self.ensure_loaded().await;
        let ids: Vec<MemoryId> = {
            let mut items = self.items.write().await;
            items.drain().map(|(id, _)| id).collect()
        };
        self.drop_vectors(&ids).await;
        ids.len()
    }

    pub(crate) async fn stats(&self) -> TierStats {
        let items = self.items().await;
        TierStats::from_items(self.tier, &items, self.capacity)
    }
}

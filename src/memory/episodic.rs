//! Episodic memory: time-ordered events.
//!
//! The document store is the system of record; an episode exists once its
//! document write succeeds. The vector index is secondary: failed index
//! writes are parked in a bounded retry queue and replayed on the next
//! store, on sweep, or through [`EpisodicMemory::flush_pending`].
//!
//! Importance decays with time since last access:
//! `base * decay_factor^(hours / 24)`. The undecayed base is kept on the
//! record so repeated sweeps do not compound.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::scoring::{boosted_importance, decayed_importance, keyword_score, sort_by_score};
use super::tier::MemoryTier;
use super::types::{
    MemoryId, MemoryItem, MemoryQuery, ScoredMemory, Tier, TierStats, TimeRange,
};
use crate::backend::{DocumentBackend, DocumentRecord, Embedder, VectorBackend};
use crate::config::EpisodicConfig;
use crate::error::{Error, Result};

/// Document body persisted for each episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EpisodeRecord {
    item: MemoryItem,
    /// Importance before decay
    base_importance: f64,
}

impl EpisodeRecord {
    fn new(item: MemoryItem) -> Self {
        Self {
            base_importance: item.importance,
            item,
        }
    }

    fn to_document(&self) -> Result<DocumentRecord> {
        Ok(DocumentRecord::new(
            self.item.id.to_string(),
            self.item.created_at,
            serde_json::to_value(self)?,
        ))
    }

    fn from_document(record: DocumentRecord) -> Result<Self> {
        Ok(serde_json::from_value(record.body)?)
    }

    /// Recompute importance from the base at `now`; returns the new value.
    fn decay(&mut self, now: DateTime<Utc>, factor: f64) -> f64 {
        let hours = (now - self.item.last_accessed).num_seconds() as f64 / 3600.0;
        let decayed = decayed_importance(self.base_importance, hours, factor);
        self.item.set_importance(decayed);
        self.item.importance
    }
}

/// Episodic tier over a document store and a vector index.
pub struct EpisodicMemory {
    config: EpisodicConfig,
    documents: Arc<dyn DocumentBackend>,
    vectors: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    pending: Mutex<VecDeque<MemoryId>>,
}

impl EpisodicMemory {
    pub fn new(
        config: EpisodicConfig,
        documents: Arc<dyn DocumentBackend>,
        vectors: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            documents,
            vectors,
            embedder,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of episodes waiting to be indexed.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn load(&self, id: &MemoryId) -> Result<Option<EpisodeRecord>> {
        match self.documents.get(&id.to_string()).await? {
            Some(doc) => Ok(Some(EpisodeRecord::from_document(doc)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &EpisodeRecord) -> Result<()> {
        self.documents.put(record.to_document()?).await
    }

    async fn load_range(&self, range: &TimeRange) -> Result<Vec<EpisodeRecord>> {
        self.documents
            .query_by_time_range(range)
            .await?
            .into_iter()
            .map(EpisodeRecord::from_document)
            .collect()
    }

    async fn index(&self, item: &MemoryItem) -> Result<()> {
        let vector = self.embedder.embed(&item.content).await?;
        self.vectors
            .upsert(
                &self.config.namespace,
                &item.id.to_string(),
                vector,
                json!({ "created_at": item.created_at }),
            )
            .await
    }

    async fn enqueue(&self, id: MemoryId) {
        let mut pending = self.pending.lock().await;
        if pending.contains(&id) {
            return;
        }
        if pending.len() >= self.config.retry_queue_limit {
            if let Some(dropped) = pending.pop_front() {
                warn!(id = %dropped, "Episodic retry queue full, dropping oldest pending index write");
            }
        }
        if self.config.retry_queue_limit > 0 {
            pending.push_back(id);
        }
    }

    /// Replay parked index writes. Stops at the first failure and returns
    /// how many were indexed.
    pub async fn flush_pending(&self) -> Result<usize> {
        let mut flushed = 0;
        loop {
            let Some(id) = self.pending.lock().await.front().cloned() else {
                break;
            };

            match self.load(&id).await? {
                Some(record) => {
                    if let Err(e) = self.index(&record.item).await {
                        warn!(id = %id, error = %e, "Episodic index retry failed");
                        return Err(e);
                    }
                    flushed += 1;
                }
                // Forgotten while parked
                None => debug!(id = %id, "Dropping pending index write for missing episode"),
            }

            let mut pending = self.pending.lock().await;
            if pending.front() == Some(&id) {
                pending.pop_front();
            }
        }

        if flushed > 0 {
            info!(count = flushed, "Flushed pending episodic index writes");
        }
        Ok(flushed)
    }

    async fn time_path(&self, query: &MemoryQuery, range: &TimeRange) -> Result<Vec<ScoredMemory>> {
        let mut records = self.load_range(range).await?;
        records.retain(|r| r.item.importance >= query.min_importance);
        Ok(records
            .into_iter()
            .take(query.limit)
            .enumerate()
            .map(|(rank, r)| ScoredMemory::new(r.item, 1.0 / (1.0 + rank as f64)))
            .collect())
    }

    async fn semantic_path(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>> {
        let vector = match self.embedder.embed(&query.text).await {
            Ok(vector) => vector,
            Err(Error::EmbeddingUnavailable(reason)) => {
                warn!(%reason, "Embedder unavailable, using keyword fallback for episodes");
                return self.keyword_path(query).await;
            }
            Err(e) => return Err(e),
        };

        let k = query.limit.saturating_mul(4).max(query.limit);
        let hits = self.vectors.search(&self.config.namespace, &vector, k).await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits.into_iter().filter(|h| h.score > 0.0) {
            let Ok(id) = MemoryId::parse(&hit.id) else {
                continue;
            };
            // Index entries can outlive their documents after a partial delete
            if let Some(record) = self.load(&id).await? {
                if record.item.importance >= query.min_importance {
                    results.push(ScoredMemory::new(record.item, hit.score));
                }
            }
        }
        sort_by_score(&mut results);
        results.truncate(query.limit);
        Ok(results)
    }

    async fn keyword_path(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>> {
        let records = self.load_range(&TimeRange::unbounded()).await?;
        let mut results: Vec<ScoredMemory> = records
            .into_iter()
            .filter(|r| r.item.importance >= query.min_importance)
            .filter_map(|r| {
                let score = keyword_score(&query.text, &r.item.content);
                (score > 0.0).then(|| ScoredMemory::new(r.item, score))
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(query.limit);
        Ok(results)
    }
}

#[async_trait]
impl MemoryTier for EpisodicMemory {
    fn tier(&self) -> Tier {
        Tier::Episodic
    }

    async fn store(&self, mut item: MemoryItem) -> Result<MemoryId> {
        item.validate()?;
        item.tier = Tier::Episodic;
        item.expires_at = None;
        item.embedding = None;

        if self.pending_count().await > 0 {
            if let Err(e) = self.flush_pending().await {
                debug!(error = %e, "Pending episodic index writes still failing");
            }
        }

        let record = EpisodeRecord::new(item);
        self.save(&record).await?;

        let id = record.item.id.clone();
        if let Err(e) = self.index(&record.item).await {
            warn!(id = %id, error = %e, "Episode stored without index entry, queued for retry");
            self.enqueue(id.clone()).await;
        }

        debug!(id = %id, "Stored episode");
        Ok(id)
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>> {
        match (query.time_range, query.has_text()) {
            (Some(range), false) => self.time_path(query, &range).await,
            (None, false) => self.time_path(query, &TimeRange::unbounded()).await,
            (None, true) => self.semantic_path(query).await,
            (Some(range), true) => {
                let by_time = self.time_path(query, &range).await?;
                let by_meaning = match self.semantic_path(query).await {
                    Ok(results) => results,
                    Err(e @ (Error::BackendUnavailable { .. } | Error::EmbeddingUnavailable(_))) => {
                        warn!(error = %e, "Episodic similarity search unavailable, serving time range only");
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                };

                let mut merged: HashMap<MemoryId, ScoredMemory> = HashMap::new();
                for scored in by_time.into_iter().chain(by_meaning) {
                    let better_known = merged
                        .get(&scored.item.id)
                        .map(|existing| existing.score >= scored.score)
                        .unwrap_or(false);
                    if !better_known {
                        merged.insert(scored.item.id.clone(), scored);
                    }
                }
                let mut results: Vec<ScoredMemory> = merged.into_values().collect();
                sort_by_score(&mut results);
                results.truncate(query.limit);
                Ok(results)
            }
        }
    }

    async fn get(&self, id: &MemoryId) -> Result<Option<MemoryItem>> {
        Ok(self.load(id).await?.map(|r| r.item))
    }

    async fn touch(&self, id: &MemoryId) {
        let mut record = match self.load(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to load episode for touch");
                return;
            }
        };
        record.item.record_access(Utc::now());
        record.base_importance = boosted_importance(record.item.importance);
        record.item.set_importance(record.base_importance);
        if let Err(e) = self.save(&record).await {
            warn!(id = %id, error = %e, "Failed to record episode access");
        }
    }

    async fn remove(&self, id: &MemoryId) -> Result<bool> {
        let existed = self.documents.delete(&id.to_string()).await?;
        if let Err(e) = self.vectors.delete(&self.config.namespace, &id.to_string()).await {
            warn!(id = %id, error = %e, "Failed to delete episode vector");
        }
        Ok(existed)
    }

    async fn sweep(&self) -> Result<Vec<MemoryId>> {
        if let Err(e) = self.flush_pending().await {
            warn!(error = %e, "Episodic sweep could not flush pending index writes");
        }

        let now = Utc::now();
        let mut forgotten = Vec::new();
        let mut decayed = 0usize;

        for mut record in self.load_range(&TimeRange::unbounded()).await? {
            let before = record.item.importance;
            let after = record.decay(now, self.config.decay_factor);

            if after < self.config.importance_floor {
                if self.remove(&record.item.id).await? {
                    forgotten.push(record.item.id.clone());
                }
            } else if (before - after).abs() > f64::EPSILON {
                self.save(&record).await?;
                decayed += 1;
            }
        }

        info!(
            forgotten = forgotten.len(),
            decayed, "Episodic decay sweep complete"
        );
        Ok(forgotten)
    }

    async fn items(&self) -> Result<Vec<MemoryItem>> {
        Ok(self
            .load_range(&TimeRange::unbounded())
            .await?
            .into_iter()
            .map(|r| r.item)
            .collect())
    }

    async fn update(
        &self,
        id: &MemoryId,
        importance: Option<f64>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(false);
        };
        if let Some(importance) = importance {
            record.item.set_importance(importance);
            record.base_importance = record.item.importance;
        }
        if let Some(metadata) = metadata {
            record.item.metadata.extend(metadata);
        }
        self.save(&record).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<usize> {
        let ids: Vec<MemoryId> = self.items().await?.into_iter().map(|i| i.id).collect();
        let mut removed = 0;
        for id in &ids {
            if self.remove(id).await? {
                removed += 1;
            }
        }
        self.pending.lock().await.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<TierStats> {
        let items = self.items().await?;
        let mut stats = TierStats::from_items(Tier::Episodic, &items, None);
        stats.pending_writes = self.pending_count().await;
        Ok(stats)
    }
}

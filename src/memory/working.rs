//! Working memory: a bounded, TTL-governed scratchpad.
//!
//! Items live only in process. Each store purges expired entries and then
//! makes room by evicting the oldest items, first against the item-count
//! cap and then against the token budget.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::scoring::{boosted_importance, keyword_score, sort_by_score};
use super::tier::MemoryTier;
use super::types::{MemoryId, MemoryItem, MemoryQuery, ScoredMemory, Tier, TierStats};
use crate::config::WorkingConfig;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct WorkingState {
    items: HashMap<MemoryId, MemoryItem>,
    tokens: usize,
}

impl WorkingState {
    fn insert(&mut self, item: MemoryItem) {
        self.tokens += item.token_count();
        if let Some(previous) = self.items.insert(item.id.clone(), item) {
            self.tokens = self.tokens.saturating_sub(previous.token_count());
        }
    }

    fn remove(&mut self, id: &MemoryId) -> Option<MemoryItem> {
        let removed = self.items.remove(id)?;
        self.tokens = self.tokens.saturating_sub(removed.token_count());
        Some(removed)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> Vec<MemoryId> {
        let expired: Vec<MemoryId> = self
            .items
            .values()
            .filter(|item| item.is_expired_at(now))
            .map(|item| item.id.clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired
    }

    fn evict_oldest(&mut self) -> Option<MemoryId> {
        let oldest = self
            .items
            .values()
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .map(|item| item.id.clone())?;
        self.remove(&oldest);
        Some(oldest)
    }

    fn live(&self, now: DateTime<Utc>) -> impl Iterator<Item = &MemoryItem> {
        self.items.values().filter(move |item| !item.is_expired_at(now))
    }
}

/// In-process working memory tier.
pub struct WorkingMemory {
    ttl: Duration,
    capacity: usize,
    max_tokens: usize,
    state: RwLock<WorkingState>,
}

impl WorkingMemory {
    pub fn new(config: &WorkingConfig) -> Self {
        Self {
            ttl: config.ttl(),
            capacity: config.capacity,
            max_tokens: config.max_tokens,
            state: RwLock::new(WorkingState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Total tokens currently held.
    pub async fn token_usage(&self) -> usize {
        self.state.read().await.tokens
    }

    /// The `n` most recently created live items, newest first.
    pub async fn recent(&self, n: usize) -> Vec<MemoryItem> {
        let now = Utc::now();
        let state = self.state.read().await;
        let mut items: Vec<MemoryItem> = state.live(now).cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(n);
        items
    }

    /// The `n` most important live items.
    pub async fn important(&self, n: usize) -> Vec<MemoryItem> {
        let now = Utc::now();
        let state = self.state.read().await;
        let mut items: Vec<MemoryItem> = state.live(now).cloned().collect();
        items.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        items.truncate(n);
        items
    }

    /// Compact text view of the scratchpad, most important first, capped at
    /// `max_chars` characters.
    pub async fn context_summary(&self, max_chars: usize) -> String {
        let items = self.important(self.capacity).await;
        if items.is_empty() {
            return String::new();
        }

        let mut summary = String::new();
        for item in items {
            let line = format!("- [{:.2}] {}\n", item.importance, item.content);
            if summary.chars().count() + line.chars().count() > max_chars {
                let remaining = max_chars.saturating_sub(summary.chars().count());
                summary.extend(line.chars().take(remaining));
                break;
            }
            summary.push_str(&line);
        }
        summary.trim_end().to_string()
    }
}

#[async_trait]
impl MemoryTier for WorkingMemory {
    fn tier(&self) -> Tier {
        Tier::Working
    }

    async fn store(&self, mut item: MemoryItem) -> Result<MemoryId> {
        item.validate()?;
        item.tier = Tier::Working;

        let tokens = item.token_count();
        if self.capacity == 0 {
            return Err(Error::capacity_exceeded(Tier::Working, 0));
        }
        if tokens > self.max_tokens {
            return Err(Error::token_budget_exceeded(Tier::Working, self.max_tokens));
        }

        let now = Utc::now();
        if item.expires_at.is_none() {
            item.expires_at = Some(now + self.ttl);
        }

        let mut state = self.state.write().await;
        let expired = state.purge_expired(now);
        if !expired.is_empty() {
            debug!(count = expired.len(), "Purged expired working items");
        }

        // Replacing an item frees its own slot and tokens
        state.remove(&item.id);

        while state.items.len() >= self.capacity {
            match state.evict_oldest() {
                Some(evicted) => debug!(id = %evicted, "Evicted working item at capacity"),
                None => return Err(Error::capacity_exceeded(Tier::Working, self.capacity)),
            }
        }
        while state.tokens + tokens > self.max_tokens {
            match state.evict_oldest() {
                Some(evicted) => debug!(id = %evicted, "Evicted working item over token budget"),
                None => return Err(Error::token_budget_exceeded(Tier::Working, self.max_tokens)),
            }
        }

        let id = item.id.clone();
        state.insert(item);
        Ok(id)
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>> {
        let now = Utc::now();
        let state = self.state.read().await;

        let mut results: Vec<ScoredMemory> = state
            .live(now)
            .filter(|item| item.importance >= query.min_importance)
            .filter(|item| {
                query
                    .time_range
                    .map(|range| range.contains(item.created_at))
                    .unwrap_or(true)
            })
            .filter_map(|item| {
                if query.has_text() {
                    let score = keyword_score(&query.text, &item.content);
                    (score > 0.0).then(|| ScoredMemory::new(item.clone(), score))
                } else {
                    Some(ScoredMemory::new(item.clone(), item.importance))
                }
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(query.limit);
        Ok(results)
    }

    async fn get(&self, id: &MemoryId) -> Result<Option<MemoryItem>> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(state
            .items
            .get(id)
            .filter(|item| !item.is_expired_at(now))
            .cloned())
    }

    async fn touch(&self, id: &MemoryId) {
        let now = Utc::now();
        let ttl = self.ttl;
        let mut state = self.state.write().await;
        if let Some(item) = state.items.get_mut(id) {
            if item.is_expired_at(now) {
                return;
            }
            item.record_access(now);
            item.set_importance(boosted_importance(item.importance));
            item.expires_at = Some(now + ttl);
        }
    }

    async fn remove(&self, id: &MemoryId) -> Result<bool> {
        Ok(self.state.write().await.remove(id).is_some())
    }

    async fn sweep(&self) -> Result<Vec<MemoryId>> {
        let expired = self.state.write().await.purge_expired(Utc::now());
        if !expired.is_empty() {
            info!(count = expired.len(), "Working memory sweep removed expired items");
        }
        Ok(expired)
    }

    async fn items(&self) -> Result<Vec<MemoryItem>> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(state.live(now).cloned().collect())
    }

    async fn update(
        &self,
        id: &MemoryId,
        importance: Option<f64>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let Some(item) = state.items.get_mut(id).filter(|i| !i.is_expired_at(now)) else {
            return Ok(false);
        };
        if let Some(importance) = importance {
            item.set_importance(importance);
        }
        if let Some(metadata) = metadata {
            item.metadata.extend(metadata);
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let count = state.items.len();
        *state = WorkingState::default();
        Ok(count)
    }

    async fn stats(&self) -> Result<TierStats> {
        let items = self.items().await?;
        Ok(TierStats::from_items(
            Tier::Working,
            &items,
            Some(self.capacity),
        ))
    }
}

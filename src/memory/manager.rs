//! The memory manager: one entry point over every tier.
//!
//! Writes are classified and routed to a single tier. Reads fan out to the
//! requested tiers concurrently, each under its own timeout; per-tier
//! scores are min-max normalized before merging so that no tier's scoring
//! scale dominates. A degraded tier contributes nothing instead of failing
//! the read.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiered_memory::{MemoryConfig, MemoryManager};
//!
//! let manager = MemoryManager::builder(MemoryConfig::default()).build()?;
//! manager.add("User is named Alice", None).await?;
//!
//! let results = manager.retrieve("What is the user's name?", None, 5).await?;
//! assert_eq!(results[0].item.content, "User is named Alice");
//! ```

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::classify::TierClassifier;
use super::episodic::EpisodicMemory;
use super::perceptual::PerceptualMemory;
use super::request::{
    AddRequest, ConsolidationReport, ForgetPolicy, ManagerStats, Promotion, RetrieveRequest,
    SweepReport,
};
use super::scoring::{estimate_importance, min_max_normalize, sort_by_score};
use super::semantic::SemanticMemory;
use super::tier::MemoryTier;
use super::types::{MemoryId, MemoryItem, RelatedConcept, ScoredMemory, Tier, META_SOURCE_ID};
use super::working::WorkingMemory;
use crate::backend::{
    DocumentBackend, Embedder, GraphBackend, HashEmbedder, InMemoryDocumentStore,
    InMemoryGraphStore, InMemoryVectorStore, SqliteDocumentStore, VectorBackend,
};
use crate::config::MemoryConfig;
use crate::error::{Error, Result};

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T, F>(cancel: Option<&CancellationToken>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(token) = cancel else {
        return fut.await;
    };
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Builder for [`MemoryManager`].
///
/// Backends not supplied explicitly default to in-process stores and the
/// hash embedder; the document store is SQLite when the config names a
/// `storage_path`.
pub struct MemoryManagerBuilder {
    config: MemoryConfig,
    classifier: TierClassifier,
    embedder: Option<Arc<dyn Embedder>>,
    vectors: Option<Arc<dyn VectorBackend>>,
    graph: Option<Arc<dyn GraphBackend>>,
    documents: Option<Arc<dyn DocumentBackend>>,
}

impl MemoryManagerBuilder {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            classifier: TierClassifier::default(),
            embedder: None,
            vectors: None,
            graph: None,
            documents: None,
        }
    }

    pub fn with_classifier(mut self, classifier: TierClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_backend(mut self, vectors: Arc<dyn VectorBackend>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_graph_backend(mut self, graph: Arc<dyn GraphBackend>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_document_backend(mut self, documents: Arc<dyn DocumentBackend>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Validate the configuration and assemble the enabled tiers.
    pub fn build(self) -> Result<MemoryManager> {
        self.config.validate()?;
        let config = self.config;
        let enabled = |tier: Tier| config.manager.enabled_tiers.contains(&tier);

        let embedder: Arc<dyn Embedder> = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedder::default()));
        let vectors: Arc<dyn VectorBackend> = self
            .vectors
            .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));

        let working = Arc::new(WorkingMemory::new(&config.working));

        let episodic = if enabled(Tier::Episodic) {
            let documents: Arc<dyn DocumentBackend> = match (self.documents, &config.storage_path)
            {
                (Some(documents), _) => documents,
                (None, Some(path)) => Arc::new(SqliteDocumentStore::open_expanded(path)?),
                (None, None) => Arc::new(InMemoryDocumentStore::new()),
            };
            Some(Arc::new(EpisodicMemory::new(
                config.episodic.clone(),
                documents,
                vectors.clone(),
                embedder.clone(),
            )))
        } else {
            None
        };

        let semantic = if enabled(Tier::Semantic) {
            let graph: Arc<dyn GraphBackend> = self
                .graph
                .unwrap_or_else(|| Arc::new(InMemoryGraphStore::new()));
            Some(Arc::new(SemanticMemory::new(
                config.semantic.clone(),
                embedder.clone(),
                vectors.clone(),
                graph,
            )))
        } else {
            None
        };

        let perceptual = if enabled(Tier::Perceptual) {
            Some(Arc::new(PerceptualMemory::new(
                config.perceptual.clone(),
                embedder,
                vectors,
            )))
        } else {
            None
        };

        let mut tiers: BTreeMap<Tier, Arc<dyn MemoryTier>> = BTreeMap::new();
        tiers.insert(Tier::Working, working.clone());
        if let Some(tier) = &episodic {
            tiers.insert(Tier::Episodic, tier.clone());
        }
        if let Some(tier) = &semantic {
            tiers.insert(Tier::Semantic, tier.clone());
        }
        if let Some(tier) = &perceptual {
            tiers.insert(Tier::Perceptual, tier.clone());
        }

        info!(
            tiers = ?tiers.keys().collect::<Vec<_>>(),
            persistent = config.storage_path.is_some(),
            "Memory manager ready"
        );

        Ok(MemoryManager {
            config,
            classifier: self.classifier,
            working,
            episodic,
            semantic,
            tiers,
            index: RwLock::new(HashMap::new()),
        })
    }
}

/// Routes, retrieves, consolidates and forgets across memory tiers.
pub struct MemoryManager {
    config: MemoryConfig,
    classifier: TierClassifier,
    working: Arc<WorkingMemory>,
    episodic: Option<Arc<EpisodicMemory>>,
    semantic: Option<Arc<SemanticMemory>>,
    tiers: BTreeMap<Tier, Arc<dyn MemoryTier>>,
    /// Owner tier of every id written through the manager
    index: RwLock<HashMap<MemoryId, Tier>>,
}

impl MemoryManager {
    pub fn builder(config: MemoryConfig) -> MemoryManagerBuilder {
        MemoryManagerBuilder::new(config)
    }

    /// A manager with default configuration and in-process backends.
    pub fn in_memory() -> Result<Self> {
        Self::builder(MemoryConfig::default()).build()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Enabled tiers in routing order.
    pub fn enabled_tiers(&self) -> Vec<Tier> {
        self.tiers.keys().copied().collect()
    }

    pub fn tier(&self, tier: Tier) -> Option<Arc<dyn MemoryTier>> {
        self.tiers.get(&tier).cloned()
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn episodic(&self) -> Option<&EpisodicMemory> {
        self.episodic.as_deref()
    }

    pub fn semantic(&self) -> Option<&SemanticMemory> {
        self.semantic.as_deref()
    }

    fn semantic_or_err(&self) -> Result<&SemanticMemory> {
        self.semantic
            .as_deref()
            .ok_or_else(|| Error::Config("semantic tier is not enabled".to_string()))
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Add content, letting the classifier pick the tier unless `hint` is given.
    pub async fn add(&self, content: impl Into<String>, hint: Option<Tier>) -> Result<MemoryId> {
        let mut request = AddRequest::new(content);
        request.tier = hint;
        self.add_with(request).await
    }

    /// Add content with full control over routing and metadata.
    #[instrument(skip(self, request), fields(hint = ?request.tier))]
    pub async fn add_with(&self, request: AddRequest) -> Result<MemoryId> {
        let AddRequest {
            content,
            tier: hint,
            importance,
            metadata,
            expires_at,
            cancel,
        } = request;

        let tier = match hint {
            Some(tier) if self.tiers.contains_key(&tier) => tier,
            Some(tier) => {
                return Err(Error::invalid_item(format!("{} tier is not enabled", tier)));
            }
            None => {
                let decision = self.classifier.classify(&content, &metadata);
                if self.tiers.contains_key(&decision.tier) {
                    debug!(tier = %decision.tier, reason = %decision.reason, "Classified content");
                    decision.tier
                } else {
                    debug!(
                        tier = %decision.tier,
                        "Classified tier is disabled, routing to working memory"
                    );
                    Tier::Working
                }
            }
        };

        let importance = importance.unwrap_or_else(|| estimate_importance(&content, &metadata));
        let mut item = MemoryItem::new(tier, content)
            .with_importance(importance)
            .with_metadata_map(metadata);
        if tier == Tier::Working {
            item.expires_at = expires_at;
        }

        let store = self
            .tiers
            .get(&tier)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("{} tier missing", tier)))?;

        let id = cancellable(cancel.as_ref(), store.store(item)).await?;
        self.index.write().await.insert(id.clone(), tier);

        debug!(id = %id, tier = %tier, "Added memory");
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Search the given tiers (working, episodic and semantic by default).
    pub async fn retrieve(
        &self,
        text: impl Into<String>,
        tiers: Option<&[Tier]>,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let mut request = RetrieveRequest::new(text).with_limit(limit);
        if let Some(tiers) = tiers {
            request = request.with_tiers(tiers.iter().copied());
        }
        self.retrieve_with(request).await
    }

    /// Fan out a query, normalize per tier, merge and touch the results.
    #[instrument(skip(self, request), fields(query = %request.query.text, limit = request.query.limit))]
    pub async fn retrieve_with(&self, request: RetrieveRequest) -> Result<Vec<ScoredMemory>> {
        let RetrieveRequest {
            query,
            tiers,
            cancel,
        } = request;

        let mut requested = tiers.unwrap_or_else(|| Tier::DEFAULT_RETRIEVAL.to_vec());
        requested.sort();
        requested.dedup();
        let targets: Vec<(Tier, Arc<dyn MemoryTier>)> = requested
            .iter()
            .filter_map(|tier| self.tiers.get(tier).map(|t| (*tier, t.clone())))
            .collect();
        if targets.is_empty() {
            return Err(Error::RetrievalFailed(format!(
                "none of the requested tiers are enabled: {:?}",
                requested
            )));
        }

        let budget = StdDuration::from_millis(self.config.manager.retrieve_timeout_ms);
        let query_ref = &query;
        let searches = targets.iter().map(move |(tier, store)| async move {
            let outcome = tokio::time::timeout(budget, store.retrieve(query_ref)).await;
            (*tier, outcome)
        });
        let outcomes = cancellable(cancel.as_ref(), async { Ok(join_all(searches).await) }).await?;

        let mut failures = Vec::new();
        let mut merged: HashMap<MemoryId, ScoredMemory> = HashMap::new();
        for (tier, outcome) in outcomes {
            let mut results = match outcome {
                Ok(Ok(results)) => results,
                Ok(Err(e)) => {
                    warn!(tier = %tier, error = %e, "Tier retrieval failed");
                    failures.push(format!("{}: {}", tier, e));
                    continue;
                }
                Err(_) => {
                    warn!(tier = %tier, timeout_ms = budget.as_millis() as u64, "Tier retrieval timed out");
                    failures.push(format!("{}: {}", tier, Error::timeout(budget.as_millis() as u64)));
                    continue;
                }
            };

            min_max_normalize(&mut results);
            for scored in results {
                let key = scored.item.id.clone();
                let better_known = merged
                    .get(&key)
                    .map(|existing| existing.score >= scored.score)
                    .unwrap_or(false);
                if !better_known {
                    merged.insert(key, scored);
                }
            }
        }

        if failures.len() == targets.len() {
            return Err(Error::RetrievalFailed(failures.join("; ")));
        }

        // Mid-promotion an item and its durable copy can both match
        let present: HashSet<String> = merged.keys().map(|id| id.to_string()).collect();
        let mut results: Vec<ScoredMemory> = merged
            .into_values()
            .filter(|scored| {
                !scored
                    .item
                    .metadata_str(META_SOURCE_ID)
                    .map(|source| present.contains(source))
                    .unwrap_or(false)
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(query.limit);

        join_all(results.iter().filter_map(|scored| {
            self.tiers
                .get(&scored.item.tier)
                .map(|tier| tier.touch(&scored.item.id))
        }))
        .await;

        debug!(
            returned = results.len(),
            degraded = failures.len(),
            "Retrieved memories"
        );
        Ok(results)
    }

    /// Fetch an item by id from whichever tier owns it.
    pub async fn get(&self, id: &MemoryId) -> Result<Option<MemoryItem>> {
        match self.locate(id).await? {
            Some(tier) => match self.tiers.get(&tier) {
                Some(store) => store.get(id).await,
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Owner tier of `id`, consulting the index first and probing on a miss.
    async fn locate(&self, id: &MemoryId) -> Result<Option<Tier>> {
        let indexed = self.index.read().await.get(id).copied();
        if let Some(tier) = indexed {
            if let Some(store) = self.tiers.get(&tier) {
                if store.get(id).await?.is_some() {
                    return Ok(Some(tier));
                }
            }
            self.index.write().await.remove(id);
        }

        for (tier, store) in &self.tiers {
            if store.get(id).await?.is_some() {
                self.index.write().await.insert(id.clone(), *tier);
                return Ok(Some(*tier));
            }
        }
        Ok(None)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Promote important working items into durable tiers.
    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        self.consolidate_inner(None).await
    }

    /// Like [`consolidate`](Self::consolidate) but stops between records
    /// once `cancel` fires.
    pub async fn consolidate_with(&self, cancel: &CancellationToken) -> Result<ConsolidationReport> {
        self.consolidate_inner(Some(cancel)).await
    }

    #[instrument(skip(self, cancel))]
    async fn consolidate_inner(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConsolidationReport> {
        let threshold = self.config.manager.promotion_threshold;
        let mut candidates: Vec<MemoryItem> = self
            .working
            .items()
            .await?
            .into_iter()
            .filter(|item| item.importance >= threshold)
            .collect();
        candidates.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let mut report = ConsolidationReport::default();
        for item in candidates {
            if cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
                info!(
                    promoted = report.promoted.len(),
                    "Consolidation cancelled"
                );
                return Err(Error::Cancelled);
            }

            let target = self.promotion_target(&item);
            let Some(store) = self.tiers.get(&target).filter(|_| target != Tier::Working) else {
                continue;
            };

            let target_id = match store.store(item.promoted_to(target)).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(id = %item.id, tier = %target, error = %e, "Promotion failed, keeping working item");
                    report.failed += 1;
                    continue;
                }
            };

            // Destination is durable; only now drop the source
            if let Err(e) = self.working.remove(&item.id).await {
                warn!(id = %item.id, error = %e, "Failed to remove promoted working item");
            }
            {
                let mut index = self.index.write().await;
                index.remove(&item.id);
                index.insert(target_id.clone(), target);
            }

            debug!(source = %item.id, target = %target_id, tier = %target, "Promoted memory");
            report.promoted.push(Promotion {
                source: item.id,
                target: target_id,
                tier: target,
            });
        }

        info!(
            promoted = report.promoted.len(),
            failed = report.failed,
            "Consolidation complete"
        );
        Ok(report)
    }

    fn promotion_target(&self, item: &MemoryItem) -> Tier {
        let decision = self.classifier.classify(&item.content, &item.metadata);
        let preferred = match decision.tier {
            Tier::Working => self.config.manager.fallback_tier,
            tier => tier,
        };

        if self.tiers.contains_key(&preferred) {
            return preferred;
        }
        [self.config.manager.fallback_tier, Tier::Episodic, Tier::Semantic]
            .into_iter()
            .find(|tier| self.tiers.contains_key(tier))
            .unwrap_or(Tier::Working)
    }

    /// Delete an item wherever it lives. Unknown ids return `false`.
    pub async fn forget(&self, id: &MemoryId) -> Result<bool> {
        self.forget_inner(id, None).await
    }

    /// Like [`forget`](Self::forget) but abandons the tier probe once
    /// `cancel` fires.
    pub async fn forget_with(&self, id: &MemoryId, cancel: &CancellationToken) -> Result<bool> {
        self.forget_inner(id, Some(cancel)).await
    }

    #[instrument(skip(self, id, cancel), fields(id = %id))]
    async fn forget_inner(&self, id: &MemoryId, cancel: Option<&CancellationToken>) -> Result<bool> {
        let is_cancelled = || cancel.map(|t| t.is_cancelled()).unwrap_or(false);
        if is_cancelled() {
            return Err(Error::Cancelled);
        }

        let indexed = self.index.write().await.remove(id);
        if let Some(tier) = indexed {
            if let Some(store) = self.tiers.get(&tier) {
                if cancellable(cancel, store.remove(id)).await? {
                    debug!(tier = %tier, "Forgot memory");
                    return Ok(true);
                }
            }
        }

        // Index miss or stale entry
        for (tier, store) in &self.tiers {
            if Some(*tier) == indexed {
                continue;
            }
            if is_cancelled() {
                return Err(Error::Cancelled);
            }
            if cancellable(cancel, store.remove(id)).await? {
                debug!(tier = %tier, "Forgot memory found by probing");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Change importance and/or merge metadata on an existing item.
    pub async fn update(
        &self,
        id: &MemoryId,
        importance: Option<f64>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<bool> {
        let Some(tier) = self.locate(id).await? else {
            return Ok(false);
        };
        match self.tiers.get(&tier) {
            Some(store) => store.update(id, importance, metadata).await,
            None => Ok(false),
        }
    }

    /// Bulk-forget across every tier according to `policy`.
    #[instrument(skip(self))]
    pub async fn forget_where(&self, policy: &ForgetPolicy) -> Result<Vec<MemoryId>> {
        let now = chrono::Utc::now();
        let mut forgotten = Vec::new();

        for (tier, store) in &self.tiers {
            let mut items = store.items().await?;
            let victims: Vec<MemoryId> = match policy {
                ForgetPolicy::Importance { threshold } => items
                    .iter()
                    .filter(|item| item.importance < *threshold)
                    .map(|item| item.id.clone())
                    .collect(),
                ForgetPolicy::Time { max_age_days } => {
                    let max_age_secs = (max_age_days * 86_400.0) as i64;
                    items
                        .iter()
                        .filter(|item| (now - item.created_at).num_seconds() > max_age_secs)
                        .map(|item| item.id.clone())
                        .collect()
                }
                ForgetPolicy::Capacity { keep } => {
                    items.sort_by(|a, b| {
                        b.importance
                            .total_cmp(&a.importance)
                            .then_with(|| b.created_at.cmp(&a.created_at))
                    });
                    items.iter().skip(*keep).map(|item| item.id.clone()).collect()
                }
            };

            for id in victims {
                if store.remove(&id).await? {
                    self.index.write().await.remove(&id);
                    forgotten.push(id);
                }
            }
            debug!(tier = %tier, total = forgotten.len(), "Applied forget policy");
        }

        info!(count = forgotten.len(), "Forget policy applied");
        Ok(forgotten)
    }

    /// Run every tier's expiry/eviction pass. Failing tiers are logged and
    /// reported, not propagated.
    #[instrument(skip(self))]
    pub async fn sweep_all(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for (tier, store) in &self.tiers {
            match store.sweep().await {
                Ok(removed) => {
                    if !removed.is_empty() {
                        let mut index = self.index.write().await;
                        for id in &removed {
                            index.remove(id);
                        }
                    }
                    report.removed.insert(*tier, removed);
                }
                Err(e) => {
                    warn!(tier = %tier, error = %e, "Sweep failed, will retry next pass");
                    report.failed.push(*tier);
                }
            }
        }
        info!(
            removed = report.total_removed(),
            failed = report.failed.len(),
            "Sweep complete"
        );
        report
    }

    /// Recreate the id-to-tier index from the tiers' contents.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let mut rebuilt = HashMap::new();
        for (tier, store) in &self.tiers {
            for item in store.items().await? {
                rebuilt.insert(item.id, *tier);
            }
        }
        let count = rebuilt.len();
        *self.index.write().await = rebuilt;
        info!(count, "Rebuilt memory index");
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub async fn stats(&self) -> Result<ManagerStats> {
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for store in self.tiers.values() {
            tiers.push(store.stats().await?);
        }
        let total = tiers.iter().map(|s| s.count).sum();
        Ok(ManagerStats {
            tiers,
            total,
            indexed: self.index.read().await.len(),
        })
    }

    /// Human-readable overview: per-tier counts and the `limit` most
    /// important items of each tier.
    pub async fn summary(&self, limit: usize) -> Result<String> {
        let mut lines = vec!["Memory summary".to_string()];
        for (tier, store) in &self.tiers {
            let mut items = store.items().await?;
            let stats = store.stats().await?;
            lines.push(format!(
                "{}: {} items (avg importance {:.2})",
                tier, stats.count, stats.avg_importance
            ));

            items.sort_by(|a, b| {
                b.importance
                    .total_cmp(&a.importance)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
            for item in items.iter().take(limit) {
                lines.push(format!("  - [{:.2}] {}", item.importance, item.content));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Drop everything in every tier.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut cleared = 0;
        for store in self.tiers.values() {
            cleared += store.clear().await?;
        }
        self.index.write().await.clear();
        info!(count = cleared, "Cleared all memory");
        Ok(cleared)
    }

    // ---------------------------------------------------------------------
    // Knowledge graph
    // ---------------------------------------------------------------------

    pub async fn store_triple(&self, subject: &str, predicate: &str, object: &str) -> Result<bool> {
        self.semantic_or_err()?
            .store_triple(subject, predicate, object)
            .await
    }

    pub async fn find_related(&self, concept: &str, max_depth: usize) -> Result<Vec<RelatedConcept>> {
        self.semantic_or_err()?.find_related(concept, max_depth).await
    }

    // ---------------------------------------------------------------------
    // Background maintenance
    // ---------------------------------------------------------------------

    /// Consolidate and sweep on a fixed interval until the returned handle
    /// is shut down.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: StdDuration) -> MaintenanceHandle {
        let token = CancellationToken::new();
        let manager = Arc::clone(self);
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        match manager.consolidate_with(&loop_token).await {
                            Ok(_) => {}
                            Err(Error::Cancelled) => break,
                            Err(e) => warn!(error = %e, "Background consolidation failed"),
                        }
                        manager.sweep_all().await;
                    }
                }
            }
            debug!("Memory maintenance stopped");
        });

        MaintenanceHandle { token, handle }
    }

    /// [`spawn_maintenance`](Self::spawn_maintenance) at the configured interval.
    pub fn spawn_default_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let secs = self.config.manager.maintenance_interval_secs.max(1);
        self.spawn_maintenance(StdDuration::from_secs(secs))
    }
}

/// Handle to a background maintenance loop.
pub struct MaintenanceHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Token that stops the loop when cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("Maintenance task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryDocumentStore, InMemoryGraphStore, InMemoryVectorStore};
    use crate::memory::types::TimeRange;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn manager() -> MemoryManager {
        MemoryManager::in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_user_name_scenario() {
        let manager = manager();
        let id = manager.add("User is named Alice", None).await.unwrap();
        assert_eq!(manager.get(&id).await.unwrap().unwrap().tier, Tier::Semantic);

        let results = manager
            .retrieve("What is the user's name?", None, 5)
            .await
            .unwrap();
        assert_eq!(results[0].item.content, "User is named Alice");
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));

        // Retrieval records the access
        let touched = manager.get(&id).await.unwrap().unwrap();
        assert_eq!(touched.access_count, 1);
    }

    #[tokio::test]
    async fn test_routing() {
        let manager = manager();
        let episode = manager
            .add("Yesterday I met Bob at the conference", None)
            .await
            .unwrap();
        let scratch = manager.add("todo", None).await.unwrap();
        let forced = manager
            .add("Yesterday I met Bob again", Some(Tier::Working))
            .await
            .unwrap();

        assert_eq!(manager.get(&episode).await.unwrap().unwrap().tier, Tier::Episodic);
        assert_eq!(manager.get(&scratch).await.unwrap().unwrap().tier, Tier::Working);
        assert_eq!(manager.get(&forced).await.unwrap().unwrap().tier, Tier::Working);

        // Perceptual is not enabled by default
        assert!(matches!(
            manager.add("a photo", Some(Tier::Perceptual)).await,
            Err(Error::InvalidItem(_))
        ));
    }

    #[tokio::test]
    async fn test_importance_is_estimated_unless_given() {
        let manager = manager();
        let urgent = manager
            .add_with(
                AddRequest::new("remember: critical outage in prod")
                    .with_metadata("priority", "high"),
            )
            .await
            .unwrap();
        let explicit = manager
            .add_with(AddRequest::new("ordinary note").with_importance(0.25))
            .await
            .unwrap();

        assert_eq!(manager.get(&urgent).await.unwrap().unwrap().importance, 1.0);
        assert_eq!(manager.get(&explicit).await.unwrap().unwrap().importance, 0.25);
    }

    #[tokio::test]
    async fn test_consolidation_preserves_content() {
        let manager = manager();
        let fact = manager
            .add_with(
                AddRequest::new("Bob prefers tea over coffee")
                    .with_tier(Tier::Working)
                    .with_importance(0.9),
            )
            .await
            .unwrap();
        let event = manager
            .add_with(
                AddRequest::new("I deployed the new release this morning")
                    .with_tier(Tier::Working)
                    .with_importance(0.8),
            )
            .await
            .unwrap();
        let minor = manager
            .add_with(
                AddRequest::new("scratch value for later")
                    .with_tier(Tier::Working)
                    .with_importance(0.2),
            )
            .await
            .unwrap();

        let report = manager.consolidate().await.unwrap();
        assert_eq!(report.promoted.len(), 2);
        assert_eq!(report.failed, 0);

        for promotion in &report.promoted {
            let promoted = manager.get(&promotion.target).await.unwrap().unwrap();
            assert_eq!(promoted.tier, promotion.tier);
            assert!(manager.get(&promotion.source).await.unwrap().is_none());
            assert_eq!(
                promoted.metadata_str("source_id"),
                Some(promotion.source.to_string().as_str())
            );
        }

        let by_source: HashMap<MemoryId, &Promotion> = report
            .promoted
            .iter()
            .map(|p| (p.source.clone(), p))
            .collect();
        assert_eq!(by_source[&fact].tier, Tier::Semantic);
        assert_eq!(by_source[&event].tier, Tier::Episodic);

        let fact_copy = manager.get(&by_source[&fact].target).await.unwrap().unwrap();
        assert_eq!(fact_copy.content, "Bob prefers tea over coffee");
        assert!(fact_copy.expires_at.is_none());
        assert!(manager.get(&minor).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_promotion_honors_metadata_override() {
        let manager = manager();
        let id = manager
            .add_with(
                AddRequest::new("Bob prefers tea over coffee")
                    .with_tier(Tier::Working)
                    .with_importance(0.9)
                    .with_metadata("type", "episodic"),
            )
            .await
            .unwrap();

        let report = manager.consolidate().await.unwrap();
        assert_eq!(report.promoted.len(), 1);
        assert_eq!(report.promoted[0].source, id);
        assert_eq!(report.promoted[0].tier, Tier::Episodic);
    }

    #[tokio::test]
    async fn test_same_text_stored_twice_returns_both_ids() {
        let manager = manager();
        let first = manager
            .add("check the staging logs", Some(Tier::Working))
            .await
            .unwrap();
        let second = manager
            .add("check the staging logs", Some(Tier::Working))
            .await
            .unwrap();

        let results = manager
            .retrieve("check the staging logs", Some(&[Tier::Working]), 10)
            .await
            .unwrap();
        let mut ids: Vec<MemoryId> = results.into_iter().map(|r| r.item.id).collect();
        ids.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_mid_promotion_copy_is_returned_once() {
        let manager = manager();
        let source_id = manager
            .add_with(
                AddRequest::new("Grace prefers aisle seats")
                    .with_tier(Tier::Working)
                    .with_importance(0.9),
            )
            .await
            .unwrap();
        let source = manager.get(&source_id).await.unwrap().unwrap();
        let semantic = manager.tier(Tier::Semantic).unwrap();
        semantic.store(source.promoted_to(Tier::Semantic)).await.unwrap();

        let results = manager
            .retrieve("Grace aisle seats", None, 10)
            .await
            .unwrap();
        let matching: Vec<&ScoredMemory> = results
            .iter()
            .filter(|r| r.item.content == "Grace prefers aisle seats")
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].item.id, source_id);
    }

    #[tokio::test]
    async fn test_semantic_memory_survives_restart() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let id = {
            let manager = MemoryManager::builder(MemoryConfig::default())
                .with_vector_backend(vectors.clone())
                .build()
                .unwrap();
            manager.add("User is named Alice", None).await.unwrap()
        };

        let manager = MemoryManager::builder(MemoryConfig::default())
            .with_vector_backend(vectors.clone())
            .build()
            .unwrap();
        let results = manager
            .retrieve("What is the user's name?", None, 5)
            .await
            .unwrap();
        assert_eq!(results[0].item.id, id);

        assert_eq!(manager.rebuild_index().await.unwrap(), 1);
        assert!(manager.forget(&id).await.unwrap());
        assert_eq!(vectors.len("semantic").await, 0);
    }

    #[tokio::test]
    async fn test_failed_promotion_keeps_source() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let manager = MemoryManager::builder(MemoryConfig::default())
            .with_vector_backend(vectors.clone())
            .build()
            .unwrap();
        let id = manager
            .add_with(
                AddRequest::new("Carol likes long walks")
                    .with_tier(Tier::Working)
                    .with_importance(0.95),
            )
            .await
            .unwrap();

        vectors.set_available(false);
        let report = manager.consolidate().await.unwrap();
        assert!(report.promoted.is_empty());
        assert_eq!(report.failed, 1);
        assert_eq!(manager.get(&id).await.unwrap().unwrap().tier, Tier::Working);
    }

    #[tokio::test]
    async fn test_forget_is_idempotent() {
        let manager = manager();
        let id = manager.add("Dave is a pilot", None).await.unwrap();

        assert!(manager.forget(&id).await.unwrap());
        assert!(!manager.forget(&id).await.unwrap());
        assert!(!manager.forget(&MemoryId::new()).await.unwrap());
        assert!(manager.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forget_probes_on_index_miss() {
        let manager = manager();
        let semantic = manager.tier(Tier::Semantic).unwrap();
        let id = semantic
            .store(MemoryItem::new(Tier::Semantic, "Eve is an auditor"))
            .await
            .unwrap();

        assert!(manager.forget(&id).await.unwrap());
        assert!(semantic.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebuild_index() {
        let manager = manager();
        manager.add("Frank is a chef", None).await.unwrap();
        manager
            .tier(Tier::Working)
            .unwrap()
            .store(MemoryItem::new(Tier::Working, "direct write"))
            .await
            .unwrap();

        assert_eq!(manager.stats().await.unwrap().indexed, 1);
        assert_eq!(manager.rebuild_index().await.unwrap(), 2);
        assert_eq!(manager.stats().await.unwrap().indexed, 2);
    }

    struct FailingTier;

    #[async_trait]
    impl MemoryTier for FailingTier {
        fn tier(&self) -> Tier {
            Tier::Episodic
        }
        async fn store(&self, _item: MemoryItem) -> Result<MemoryId> {
            Err(Error::backend_unavailable("test", "down"))
        }
        async fn retrieve(&self, _query: &crate::memory::MemoryQuery) -> Result<Vec<ScoredMemory>> {
            Err(Error::backend_unavailable("test", "down"))
        }
        async fn get(&self, _id: &MemoryId) -> Result<Option<MemoryItem>> {
            Ok(None)
        }
        async fn touch(&self, _id: &MemoryId) {}
        async fn remove(&self, _id: &MemoryId) -> Result<bool> {
            Ok(false)
        }
        async fn sweep(&self) -> Result<Vec<MemoryId>> {
            Err(Error::backend_unavailable("test", "down"))
        }
        async fn items(&self) -> Result<Vec<MemoryItem>> {
            Ok(Vec::new())
        }
        async fn update(
            &self,
            _id: &MemoryId,
            _importance: Option<f64>,
            _metadata: Option<HashMap<String, Value>>,
        ) -> Result<bool> {
            Ok(false)
        }
        async fn clear(&self) -> Result<usize> {
            Ok(0)
        }
        async fn stats(&self) -> Result<crate::memory::TierStats> {
            Ok(crate::memory::TierStats::from_items(Tier::Episodic, &[], None))
        }
    }

    #[tokio::test]
    async fn test_degraded_tier_does_not_fail_retrieval() {
        let mut manager = manager();
        manager.tiers.insert(Tier::Episodic, Arc::new(FailingTier));
        manager
            .add("release checklist drafted", Some(Tier::Working))
            .await
            .unwrap();

        let results = manager.retrieve("release checklist", None, 5).await.unwrap();
        assert_eq!(results.len(), 1);

        let err = manager
            .retrieve("release", Some(&[Tier::Episodic]), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetrievalFailed(_)));

        let report = manager.sweep_all().await;
        assert_eq!(report.failed, vec![Tier::Episodic]);
    }

    #[tokio::test]
    async fn test_episodic_vector_outage_through_manager() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let manager = MemoryManager::builder(MemoryConfig::default())
            .with_vector_backend(vectors.clone())
            .with_document_backend(documents.clone())
            .with_graph_backend(Arc::new(InMemoryGraphStore::new()))
            .build()
            .unwrap();

        vectors.set_available(false);
        let id = manager
            .add("Yesterday I visited the harbour museum", None)
            .await
            .unwrap();
        assert_eq!(documents.len().await, 1);

        let by_time = manager
            .retrieve_with(
                RetrieveRequest::new("")
                    .with_tiers([Tier::Episodic])
                    .with_time_range(TimeRange::last(Duration::hours(1))),
            )
            .await
            .unwrap();
        assert_eq!(by_time[0].item.id, id);

        vectors.set_available(true);
        assert_eq!(manager.episodic().unwrap().flush_pending().await.unwrap(), 1);
        let results = manager
            .retrieve_with(RetrieveRequest::new("harbour museum").with_tiers([Tier::Episodic]))
            .await
            .unwrap();
        assert_eq!(results[0].item.id, id);
    }

    #[tokio::test]
    async fn test_ttl_sweep_through_manager() {
        let manager = MemoryManager::builder(MemoryConfig::default().with_working_ttl_secs(1))
            .build()
            .unwrap();
        let id = manager.add("ephemeral", Some(Tier::Working)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        let report = manager.sweep_all().await;
        assert_eq!(report.removed[&Tier::Working], vec![id.clone()]);
        assert!(manager.get(&id).await.unwrap().is_none());
        assert_eq!(manager.stats().await.unwrap().indexed, 0);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let manager = manager();
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(
            manager
                .add_with(AddRequest::new("never stored").with_cancellation(token.clone()))
                .await,
            Err(Error::Cancelled)
        ));
        assert!(matches!(
            manager
                .retrieve_with(RetrieveRequest::new("anything").with_cancellation(token.clone()))
                .await,
            Err(Error::Cancelled)
        ));
        assert!(matches!(
            manager.forget_with(&MemoryId::new(), &token).await,
            Err(Error::Cancelled)
        ));

        manager
            .add_with(
                AddRequest::new("Grace is an engineer")
                    .with_tier(Tier::Working)
                    .with_importance(0.9),
            )
            .await
            .unwrap();
        assert!(matches!(
            manager.consolidate_with(&token).await,
            Err(Error::Cancelled)
        ));
        assert_eq!(manager.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_forget_where() {
        let manager = manager();
        let low = manager
            .add_with(AddRequest::new("low value note").with_tier(Tier::Working).with_importance(0.1))
            .await
            .unwrap();
        manager
            .add_with(AddRequest::new("high value note").with_tier(Tier::Working).with_importance(0.9))
            .await
            .unwrap();
        let old = manager
            .tier(Tier::Episodic)
            .unwrap()
            .store(
                MemoryItem::new(Tier::Episodic, "we launched the beta")
                    .with_created_at(Utc::now() - Duration::days(40)),
            )
            .await
            .unwrap();

        let forgotten = manager
            .forget_where(&ForgetPolicy::Importance { threshold: 0.3 })
            .await
            .unwrap();
        assert_eq!(forgotten, vec![low]);

        let forgotten = manager
            .forget_where(&ForgetPolicy::Time { max_age_days: 30.0 })
            .await
            .unwrap();
        assert_eq!(forgotten, vec![old]);

        manager
            .add_with(AddRequest::new("medium value note").with_tier(Tier::Working).with_importance(0.5))
            .await
            .unwrap();
        let forgotten = manager
            .forget_where(&ForgetPolicy::Capacity { keep: 1 })
            .await
            .unwrap();
        assert_eq!(forgotten.len(), 1);
        let remaining = manager.working().items().await.unwrap();
        assert_eq!(remaining[0].content, "high value note");
    }

    #[tokio::test]
    async fn test_update_stats_summary_clear() {
        let manager = manager();
        let id = manager.add("Heidi is a designer", None).await.unwrap();
        manager.add("scratch", Some(Tier::Working)).await.unwrap();

        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), Value::from("onboarding"));
        assert!(manager.update(&id, Some(0.8), Some(metadata)).await.unwrap());
        assert!(!manager.update(&MemoryId::new(), Some(0.8), None).await.unwrap());
        assert_eq!(manager.get(&id).await.unwrap().unwrap().importance, 0.8);

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.tiers.len(), 3);

        let summary = manager.summary(3).await.unwrap();
        assert!(summary.starts_with("Memory summary"));
        assert!(summary.contains("semantic: 1 items"));
        assert!(summary.contains("[0.80] Heidi is a designer"));

        assert_eq!(manager.clear_all().await.unwrap(), 2);
        assert_eq!(manager.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_knowledge_graph_passthrough() {
        let manager = manager();
        assert!(manager.store_triple("Ivan", "manages", "Judy").await.unwrap());
        assert!(!manager.store_triple("ivan", "manages", "judy").await.unwrap());

        let related = manager.find_related("judy", 2).await.unwrap();
        assert_eq!(related[0].concept, "ivan");

        let mut config = MemoryConfig::default();
        config.manager.enabled_tiers = vec![Tier::Working, Tier::Episodic];
        let no_semantic = MemoryManager::builder(config).build().unwrap();
        assert!(matches!(
            no_semantic.store_triple("a", "b", "c").await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_storage_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.db");
        let config = MemoryConfig::default().with_storage_path(path.to_string_lossy());

        let id = {
            let manager = MemoryManager::builder(config.clone()).build().unwrap();
            manager
                .add("Last week we moved to the new office", None)
                .await
                .unwrap()
        };

        let reopened = MemoryManager::builder(config).build().unwrap();
        assert_eq!(reopened.rebuild_index().await.unwrap(), 1);
        let item = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(item.tier, Tier::Episodic);
    }

    #[tokio::test]
    async fn test_maintenance_loop_consolidates() {
        let manager = Arc::new(manager());
        let id = manager
            .add_with(
                AddRequest::new("Mallory is allergic to cats")
                    .with_tier(Tier::Working)
                    .with_importance(0.9),
            )
            .await
            .unwrap();

        let handle = manager.spawn_maintenance(std::time::Duration::from_millis(20));
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.shutdown().await.unwrap();

        assert!(manager.working().get(&id).await.unwrap().is_none());
        assert_eq!(manager.semantic().unwrap().items().await.unwrap().len(), 1);
    }
}

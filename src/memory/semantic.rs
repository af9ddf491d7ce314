//! Semantic memory: durable facts and the relations between concepts.
//!
//! Facts are indexed for similarity search; relations live in the graph
//! backend as `(subject, predicate, object)` triples. Storing a simple
//! declarative sentence also records the triple it states.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use super::catalog::VectorCatalog;
use super::tier::MemoryTier;
use super::types::{
    normalize_concept, MemoryId, MemoryItem, MemoryQuery, RelatedConcept, ScoredMemory, Tier,
    TierStats, Triple,
};
use crate::backend::{Embedder, GraphBackend, VectorBackend};
use crate::config::SemanticConfig;
use crate::error::{Error, Result};

static TRIPLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?P<subject>[\w'\-]+(?:\s+[\w'\-]+){0,3}?)\s+(?P<predicate>is\s+named|is\s+called|is\s+an?|is|are|likes|loves|prefers|hates|dislikes|works\s+at|works\s+for|lives\s+in|uses|owns)\s+(?P<object>[^.!?;]+?)\s*[.!?]?\s*$",
    )
    .unwrap()
});

/// Pull a single triple out of a simple declarative sentence.
///
/// ```
/// use tiered_memory::memory::semantic::extract_triple;
///
/// let triple = extract_triple("User is named Alice").unwrap();
/// assert_eq!(triple.subject, "user");
/// assert_eq!(triple.predicate, "is named");
/// assert_eq!(triple.object, "alice");
/// ```
pub fn extract_triple(content: &str) -> Option<Triple> {
    let captures = TRIPLE_PATTERN.captures(content)?;
    let triple = Triple::new(
        captures.name("subject")?.as_str(),
        captures.name("predicate")?.as_str(),
        captures.name("object")?.as_str(),
    );
    triple.is_valid().then_some(triple)
}

/// Semantic tier over a vector index and a knowledge graph.
pub struct SemanticMemory {
    config: SemanticConfig,
    catalog: VectorCatalog,
    graph: Arc<dyn GraphBackend>,
}

impl SemanticMemory {
    pub fn new(
        config: SemanticConfig,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorBackend>,
        graph: Arc<dyn GraphBackend>,
    ) -> Self {
        let catalog = VectorCatalog::new(
            Tier::Semantic,
            config.namespace.clone(),
            config.capacity,
            embedder,
            vectors,
        );
        Self {
            config,
            catalog,
            graph,
        }
    }

    /// Store a plain fact.
    pub async fn store_fact(&self, text: impl Into<String>) -> Result<MemoryId> {
        self.store(MemoryItem::new(Tier::Semantic, text)).await
    }

    /// Record a relation. Returns `false` if it was already known.
    pub async fn store_triple(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<bool> {
        let triple = Triple::new(subject, predicate, object);
        if !triple.is_valid() {
            return Err(Error::invalid_item(format!(
                "triple parts must be non-empty: {}",
                triple
            )));
        }
        let inserted = self.graph.insert_triple(&triple).await?;
        debug!(triple = %triple, id = %triple.id(), inserted, "Stored triple");
        Ok(inserted)
    }

    /// Concepts within `max_depth` hops of `concept`, nearest first.
    ///
    /// The depth is clamped to the configured traversal ceiling.
    pub async fn find_related(
        &self,
        concept: &str,
        max_depth: usize,
    ) -> Result<Vec<RelatedConcept>> {
        let depth = max_depth.min(self.config.max_traversal_depth);
        let concept = normalize_concept(concept);
        if depth == 0 || concept.is_empty() {
            return Ok(Vec::new());
        }

        let mut related = self.graph.traverse(&concept, depth).await?;
        related.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.concept.cmp(&b.concept)));
        Ok(related)
    }
}

#[async_trait]
impl MemoryTier for SemanticMemory {
    fn tier(&self) -> Tier {
        Tier::Semantic
    }

    async fn store(&self, mut item: MemoryItem) -> Result<MemoryId> {
        item.validate()?;
        item.tier = Tier::Semantic;
        item.expires_at = None;

        let triple = if self.config.extract_triples {
            extract_triple(&item.content)
        } else {
            None
        };

        let id = self.catalog.insert(item).await?;

        if let Some(triple) = triple {
            if let Err(e) = self.graph.insert_triple(&triple).await {
                warn!(id = %id, triple = %triple, error = %e, "Fact stored without its triple");
            }
        }
        Ok(id)
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>> {
        self.catalog.search(query, |_| true).await
    }

    async fn get(&self, id: &MemoryId) -> Result<Option<MemoryItem>> {
        Ok(self.catalog.get(id).await)
    }

    async fn touch(&self, id: &MemoryId) {
        self.catalog.touch(id).await;
    }

    async fn remove(&self, id: &MemoryId) -> Result<bool> {
        self.catalog.remove(id).await
    }

    async fn sweep(&self) -> Result<Vec<MemoryId>> {
        let evicted = self.catalog.enforce_capacity().await;
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Semantic sweep evicted least recently used facts");
        }
        Ok(evicted)
    }

    async fn items(&self) -> Result<Vec<MemoryItem>> {
        Ok(self.catalog.items().await)
    }

    async fn update(
        &self,
        id: &MemoryId,
        importance: Option<f64>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<bool> {
        self.catalog.update(id, importance, metadata).await
    }

    async fn clear(&self) -> Result<usize> {
        Ok(self.catalog.clear().await)
    }

    async fn stats(&self) -> Result<TierStats> {
        Ok(self.catalog.stats().await)
    }
}

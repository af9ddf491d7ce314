//! In-process backends.
//!
//! These satisfy the port contracts without external services. Each store
//! carries an availability switch so callers can exercise degraded paths
//! (a vector index going down, an embedding model timing out).

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{DocumentBackend, DocumentRecord, Embedder, GraphBackend, VectorBackend, VectorHit};
use crate::error::{Error, Result};
use crate::memory::scoring::{cosine_similarity, tokenize};
use crate::memory::{normalize_concept, RelatedConcept, TimeRange, Triple, TripleId};

/// Availability switch shared by the in-memory stores.
#[derive(Debug)]
struct Availability {
    name: &'static str,
    up: AtomicBool,
}

impl Availability {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            up: AtomicBool::new(true),
        }
    }

    fn set(&self, available: bool) {
        self.up.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::backend_unavailable(self.name, "backend is offline"))
        }
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic feature-hashing embedder.
///
/// Hashes word terms and their character trigrams into a fixed number of
/// signed buckets, then L2-normalizes. Texts sharing words or word stems
/// land close together, which is enough for lexical-semantic recall
/// without a model.
#[derive(Debug)]
pub struct HashEmbedder {
    dimension: usize,
    available: AtomicBool,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

impl HashEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the embedding service going up or down.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(bytes);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((hash % self.dimension as u64) as usize, sign)
    }

    /// Embed synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for term in tokenize(text) {
            let (idx, sign) = self.bucket(&format!("w:{}", term));
            vector[idx] += sign;

            let padded: Vec<char> = format!("^{}$", term).chars().collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                let (idx, sign) = self.bucket(&format!("g:{}", gram));
                vector[idx] += 0.5 * sign;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable(
                "hash embedder is offline".to_string(),
            ));
        }
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// InMemoryVectorStore
// ---------------------------------------------------------------------------

type Namespace = HashMap<String, (Vec<f32>, Value)>;

/// Brute-force cosine vector store.
#[derive(Debug)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
    availability: Availability,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            availability: Availability::new("vector"),
        }
    }

    /// Simulate the index going up or down.
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    /// Number of vectors in a namespace.
    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map(|ns| ns.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorStore {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Value,
    ) -> Result<()> {
        self.availability.check()?;
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(id.to_string(), (vector, payload));
        Ok(())
    }

    async fn search(&self, namespace: &str, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.availability.check()?;
        let namespaces = self.namespaces.read().await;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = entries
            .iter()
            .map(|(id, (stored, payload))| VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool> {
        self.availability.check()?;
        let mut namespaces = self.namespaces.write().await;
        Ok(namespaces
            .get_mut(namespace)
            .map(|ns| ns.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn scan(&self, namespace: &str) -> Result<Vec<VectorHit>> {
        self.availability.check()?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, (_, payload))| VectorHit {
                        id: id.clone(),
                        score: 0.0,
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// InMemoryGraphStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GraphState {
    triples: HashMap<TripleId, Triple>,
    /// concept -> (predicate, neighbour), both directions
    adjacency: HashMap<String, Vec<(String, String)>>,
}

/// Adjacency-list knowledge graph.
#[derive(Debug)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
    availability: Availability,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            availability: Availability::new("graph"),
        }
    }

    /// Simulate the graph database going up or down.
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    /// Number of distinct edges.
    pub async fn edge_count(&self) -> usize {
        self.state.read().await.triples.len()
    }

    /// All stored triples.
    pub async fn triples(&self) -> Vec<Triple> {
        self.state.read().await.triples.values().cloned().collect()
    }
}

#[async_trait]
impl GraphBackend for InMemoryGraphStore {
    async fn insert_triple(&self, triple: &Triple) -> Result<bool> {
        self.availability.check()?;
        let id = triple.id();
        let mut state = self.state.write().await;
        if state.triples.contains_key(&id) {
            return Ok(false);
        }

        state.triples.insert(id, triple.clone());
        state
            .adjacency
            .entry(triple.subject.clone())
            .or_default()
            .push((triple.predicate.clone(), triple.object.clone()));
        state
            .adjacency
            .entry(triple.object.clone())
            .or_default()
            .push((triple.predicate.clone(), triple.subject.clone()));
        Ok(true)
    }

    async fn traverse(&self, start: &str, max_depth: usize) -> Result<Vec<RelatedConcept>> {
        self.availability.check()?;
        let start = normalize_concept(start);
        let state = self.state.read().await;

        let mut visited: HashSet<String> = HashSet::from([start.clone()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(start, 0)]);
        let mut related = Vec::new();

        while let Some((concept, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(edges) = state.adjacency.get(&concept) else {
                continue;
            };
            let mut edges: Vec<&(String, String)> = edges.iter().collect();
            edges.sort();
            for (predicate, neighbour) in edges {
                if visited.insert(neighbour.clone()) {
                    related.push(RelatedConcept {
                        concept: neighbour.clone(),
                        depth: depth + 1,
                        via: predicate.clone(),
                    });
                    queue.push_back((neighbour.clone(), depth + 1));
                }
            }
        }

        Ok(related)
    }
}

// ---------------------------------------------------------------------------
// InMemoryDocumentStore
// ---------------------------------------------------------------------------

/// Hash-map document store.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    records: RwLock<HashMap<String, DocumentRecord>>,
    availability: Availability,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            availability: Availability::new("document"),
        }
    }

    /// Simulate the store going up or down.
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl DocumentBackend for InMemoryDocumentStore {
    async fn put(&self, record: DocumentRecord) -> Result<()> {
        self.availability.check()?;
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        self.availability.check()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.availability.check()?;
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn query_by_time_range(&self, range: &TimeRange) -> Result<Vec<DocumentRecord>> {
        self.availability.check()?;
        let records = self.records.read().await;
        let mut matching: Vec<DocumentRecord> = records
            .values()
            .filter(|r| range.contains(r.timestamp))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }
}

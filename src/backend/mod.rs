//! Ports to the external systems the memory tiers persist into.
//!
//! The engine treats embedding models, vector indexes, graph databases and
//! document stores as pluggable collaborators:
//!
//! - [`Embedder`]: text to fixed-length vector
//! - [`VectorBackend`]: namespaced nearest-neighbour search
//! - [`GraphBackend`]: triple insertion and bounded traversal
//! - [`DocumentBackend`]: keyed records with time-range queries
//!
//! In-memory implementations live in [`memory`], a SQLite document store in
//! [`sqlite`], and an OpenAI-compatible embedding client in [`http`].

pub mod http;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::memory::{RelatedConcept, TimeRange, Triple};

pub use http::{EmbedderConfig, OpenAiEmbedder};
pub use memory::{HashEmbedder, InMemoryDocumentStore, InMemoryGraphStore, InMemoryVectorStore};
pub use sqlite::SqliteDocumentStore;

/// Converts text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Failures surface as `Error::EmbeddingUnavailable`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of the vectors this embedder produces.
    fn dimension(&self) -> usize;
}

/// A nearest-neighbour match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub payload: Value,
}

/// Namespaced vector index.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or replace the vector stored under `id`.
    async fn upsert(&self, namespace: &str, id: &str, vector: Vec<f32>, payload: Value)
        -> Result<()>;

    /// The `k` nearest vectors, best first.
    async fn search(&self, namespace: &str, vector: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    /// Delete a vector; returns whether it existed.
    async fn delete(&self, namespace: &str, id: &str) -> Result<bool>;

    /// Every entry in a namespace with its payload, in no particular order.
    /// Hits carry a score of 0.
    async fn scan(&self, namespace: &str) -> Result<Vec<VectorHit>>;
}

/// Knowledge graph of subject-predicate-object triples.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Insert a triple; returns `false` if it was already present.
    async fn insert_triple(&self, triple: &Triple) -> Result<bool>;

    /// Concepts reachable from `start` within `max_depth` hops, excluding `start`.
    async fn traverse(&self, start: &str, max_depth: usize) -> Result<Vec<RelatedConcept>>;
}

/// A record in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub body: Value,
}

impl DocumentRecord {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, body: Value) -> Self {
        Self {
            id: id.into(),
            timestamp,
            body,
        }
    }
}

/// Keyed record store with time-range queries.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, record: DocumentRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>>;

    /// Delete a record; returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Records whose timestamp falls in `range`, newest first.
    async fn query_by_time_range(&self, range: &TimeRange) -> Result<Vec<DocumentRecord>>;
}

//! Error types for tiered-memory.

use crate::memory::Tier;
use thiserror::Error;

/// Result type alias using tiered-memory's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Tier is full and no eviction candidate exists
    #[error("{tier} memory is at capacity ({capacity} {unit}) and nothing can be evicted")]
    CapacityExceeded {
        tier: Tier,
        capacity: usize,
        /// What the capacity counts: `items` or `tokens`
        unit: &'static str,
    },

    /// A storage backend could not be reached or rejected the call
    #[error("Backend unavailable: {backend} - {message}")]
    BackendUnavailable { backend: String, message: String },

    /// The embedding service failed
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Unknown memory id
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// Malformed item (empty content, missing perceptual metadata, bad timestamps)
    #[error("Invalid memory item: {0}")]
    InvalidItem(String),

    /// Every tier requested by a read failed
    #[error("Retrieval failed in every requested tier: {0}")]
    RetrievalFailed(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a backend unavailable error.
    pub fn backend_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a capacity exceeded error.
    pub fn capacity_exceeded(tier: Tier, capacity: usize) -> Self {
        Self::CapacityExceeded {
            tier,
            capacity,
            unit: "items",
        }
    }

    /// Create a capacity exceeded error for a token budget.
    pub fn token_budget_exceeded(tier: Tier, budget: usize) -> Self {
        Self::CapacityExceeded {
            tier,
            capacity: budget,
            unit: "tokens",
        }
    }

    /// Create an invalid item error.
    pub fn invalid_item(message: impl Into<String>) -> Self {
        Self::InvalidItem(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::EmbeddingUnavailable(_) | Self::Timeout { .. }
        )
    }
}

//! # tiered-memory
//!
//! A tiered memory engine for conversational agents.
//!
//! ## Core Components
//!
//! - **Memory**: Working, episodic, semantic and perceptual tiers behind one manager
//! - **Backends**: Pluggable embedding, vector, graph and document stores
//! - **Config**: Serde-loadable tuning for every tier
//! - **Tools**: Named memory operations with JSON Schemas for tool-calling agents
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiered_memory::{MemoryConfig, MemoryManager};
//!
//! let manager = MemoryManager::builder(MemoryConfig::default()).build()?;
//!
//! manager.add("User is named Alice", None).await?;
//! let results = manager.retrieve("What is the user's name?", None, 5).await?;
//! println!("{}", results[0].item.content);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod tools;

// Re-exports for convenience
pub use backend::{
    DocumentBackend, Embedder, EmbedderConfig, GraphBackend, HashEmbedder, InMemoryDocumentStore,
    InMemoryGraphStore, InMemoryVectorStore, OpenAiEmbedder, SqliteDocumentStore, VectorBackend,
};
pub use config::{
    EpisodicConfig, ManagerConfig, MemoryConfig, PerceptualConfig, SemanticConfig, WorkingConfig,
};
pub use error::{Error, Result};
pub use memory::{
    AddRequest, ConsolidationReport, ForgetPolicy, MaintenanceHandle, ManagerStats, MemoryId,
    MemoryItem, MemoryManager, MemoryManagerBuilder, MemoryQuery, MemoryTier, RelatedConcept,
    RetrieveRequest, ScoredMemory, SweepReport, Tier, TierClassifier, TimeRange, Triple,
};
pub use tools::{MemoryTool, MemoryToolRegistry, ToolHandler};

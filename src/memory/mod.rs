//! Tiered agent memory.
//!
//! Content flows through four tiers with different lifetimes and indexes:
//!
//! - **Working**: Short-lived, capacity and token bounded, expires by TTL
//! - **Episodic**: Timestamped experiences with decaying importance
//! - **Semantic**: Durable facts plus a knowledge graph of triples
//! - **Perceptual**: Descriptions of images, audio and video
//!
//! [`MemoryManager`] routes writes to a tier, fans reads out across tiers,
//! and promotes important working items during consolidation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiered_memory::memory::{MemoryManager, RetrieveRequest, Tier};
//!
//! let manager = MemoryManager::in_memory()?;
//! manager.add("I deployed the billing service yesterday", None).await?;
//!
//! let results = manager
//!     .retrieve_with(RetrieveRequest::new("billing deploy").with_tiers([Tier::Episodic]))
//!     .await?;
//!
//! // Move important working items into durable tiers
//! manager.consolidate().await?;
//! ```

mod catalog;
pub mod classify;
pub mod episodic;
pub mod manager;
pub mod perceptual;
mod proptest;
pub mod request;
pub mod scoring;
pub mod semantic;
pub mod tier;
pub mod types;
pub mod working;

pub use classify::{TierClassifier, TierDecision};
pub use episodic::EpisodicMemory;
pub use manager::{MaintenanceHandle, MemoryManager, MemoryManagerBuilder};
pub use perceptual::{infer_modality, PerceptualMemory};
pub use request::{
    AddRequest, ConsolidationReport, ForgetPolicy, ManagerStats, Promotion, RetrieveRequest,
    SweepReport,
};
pub use semantic::{extract_triple, SemanticMemory};
pub use tier::MemoryTier;
pub use types::{
    normalize_concept, MemoryId, MemoryItem, MemoryQuery, RelatedConcept, ScoredMemory, Tier,
    TierStats, TimeRange, Triple, TripleId, META_MODALITY, META_PROMOTED_FROM, META_SOURCE_ID,
    META_SOURCE_REF,
};
pub use working::WorkingMemory;

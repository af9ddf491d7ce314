//! Perceptual memory: text descriptions of images, audio and video.
//!
//! Only the description is embedded; the binary payload stays wherever
//! `source_ref` points.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::catalog::VectorCatalog;
use super::tier::MemoryTier;
use super::types::{
    MemoryId, MemoryItem, MemoryQuery, ScoredMemory, Tier, TierStats, META_MODALITY,
    META_SOURCE_REF,
};
use crate::backend::{Embedder, VectorBackend};
use crate::config::PerceptualConfig;
use crate::error::{Error, Result};

/// Guess a modality from a file extension.
///
/// Unknown or missing extensions are treated as text.
pub fn infer_modality(source_ref: &str) -> &'static str {
    let extension = Path::new(source_ref)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tiff") => "image",
        Some("mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac") => "audio",
        Some("mp4" | "avi" | "mov" | "mkv" | "webm") => "video",
        _ => "text",
    }
}

/// Vector-backed store for multimodal descriptions.
pub struct PerceptualMemory {
    modalities: Vec<String>,
    catalog: VectorCatalog,
}

impl PerceptualMemory {
    pub fn new(
        config: PerceptualConfig,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorBackend>,
    ) -> Self {
        let catalog = VectorCatalog::new(
            Tier::Perceptual,
            config.namespace.clone(),
            config.capacity,
            embedder,
            vectors,
        );
        Self {
            modalities: config
                .modalities
                .iter()
                .map(|m| m.trim().to_lowercase())
                .collect(),
            catalog,
        }
    }

    /// Store a description of the media at `source_ref`, inferring the modality.
    pub async fn store_media(
        &self,
        description: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Result<MemoryId> {
        let item = MemoryItem::new(Tier::Perceptual, description)
            .with_metadata(META_SOURCE_REF, source_ref.into());
        self.store(item).await
    }

    /// Resolve and validate the modality of an incoming item.
    fn resolve_modality(&self, item: &MemoryItem) -> Result<String> {
        let source_ref = item
            .metadata_str(META_SOURCE_REF)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let modality = match (item.metadata_str(META_MODALITY), source_ref) {
            (Some(explicit), _) => explicit.trim().to_lowercase(),
            (None, Some(source)) => infer_modality(source).to_string(),
            (None, None) => {
                return Err(Error::invalid_item(
                    "perceptual items need a modality or a source_ref",
                ))
            }
        };

        if !self.modalities.contains(&modality) {
            return Err(Error::invalid_item(format!(
                "unsupported modality `{}` (expected one of: {})",
                modality,
                self.modalities.join(", ")
            )));
        }
        if modality != "text" && source_ref.is_none() {
            return Err(Error::invalid_item(format!(
                "{} items must carry a source_ref",
                modality
            )));
        }
        Ok(modality)
    }
}

#[async_trait]
impl MemoryTier for PerceptualMemory {
    fn tier(&self) -> Tier {
        Tier::Perceptual
    }

    async fn store(&self, mut item: MemoryItem) -> Result<MemoryId> {
        item.validate()?;
        let modality = self.resolve_modality(&item)?;
        item.tier = Tier::Perceptual;
        item.expires_at = None;
        item.metadata
            .insert(META_MODALITY.to_string(), Value::from(modality));
        self.catalog.insert(item).await
    }

    async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>> {
        let wanted = query.modality.as_deref().map(|m| m.trim().to_lowercase());
        self.catalog
            .search(query, |item| match &wanted {
                Some(modality) => item.metadata_str(META_MODALITY) == Some(modality.as_str()),
                None => true,
            })
            .await
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
            info!(count = evicted.len(), "Perceptual sweep evicted least recently used items");
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

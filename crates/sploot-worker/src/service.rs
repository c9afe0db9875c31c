//! Collaborator contracts consumed by the worker.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use sploot_models::{AssetId, EmbeddingRecord, EmbeddingResult};

use crate::error::EmbedError;

/// Remote embedding provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding for the image at `blob_url`.
    async fn embed_image(&self, blob_url: &str, checksum: &str) -> Result<EmbeddingResult, EmbedError>;
}

/// Durable home for generated embeddings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Insert or replace the embedding for `asset_id`.
    ///
    /// `Ok(None)` means the store accepted the call but wrote nothing; the
    /// worker treats that as a failed attempt.
    async fn upsert_embedding(
        &self,
        asset_id: &AssetId,
        result: &EmbeddingResult,
    ) -> Result<Option<EmbeddingRecord>, EmbedError>;
}

/// Embedding store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryEmbeddingStore {
    embeddings: Mutex<HashMap<AssetId, EmbeddingResult>>,
}

impl MemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset_id: &AssetId) -> Option<EmbeddingResult> {
        self.embeddings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.embeddings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingStore for MemoryEmbeddingStore {
    async fn upsert_embedding(
        &self,
        asset_id: &AssetId,
        result: &EmbeddingResult,
    ) -> Result<Option<EmbeddingRecord>, EmbedError> {
        self.embeddings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(asset_id.clone(), result.clone());
        Ok(Some(EmbeddingRecord::for_result(asset_id.clone(), result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_upsert_replaces() {
        let store = MemoryEmbeddingStore::new();
        let id = AssetId::from("a");

        store
            .upsert_embedding(&id, &EmbeddingResult::new(vec![0.1, 0.2], "clip-v1", 12))
            .await
            .unwrap();
        let record = store
            .upsert_embedding(&id, &EmbeddingResult::new(vec![0.3, 0.4, 0.5], "clip-v2", 9))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.dimension, 3);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).unwrap().model, "clip-v2");
    }
}

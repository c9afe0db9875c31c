//! Embedding provider results.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::AssetId;

/// Output of the embedding provider for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    /// Model identifier
    pub model: String,
    pub dimension: usize,
    /// Provider-side processing time in milliseconds
    pub processing_time: u64,
}

impl EmbeddingResult {
    pub fn new(embedding: Vec<f32>, model: impl Into<String>, processing_time: u64) -> Self {
        let dimension = embedding.len();
        Self {
            embedding,
            model: model.into(),
            dimension,
            processing_time,
        }
    }
}

/// Row written by the embedding store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    pub asset_id: AssetId,
    pub model: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn for_result(asset_id: AssetId, result: &EmbeddingResult) -> Self {
        Self {
            asset_id,
            model: result.model.clone(),
            dimension: result.dimension,
            created_at: Utc::now(),
        }
    }
}

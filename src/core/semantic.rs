//! Boundary to the semantic (vector) storage backend.
//!
//! Hivelog ships no backend and no embedding model. Callers that want
//! similarity search plug in an [`Embedder`] and a [`SemanticStore`].

use crate::core::error::HivelogError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Opaque text-to-vector function.
pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, HivelogError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    pub kind: String,
    pub id: String,
    pub content: String,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
    pub record: SemanticRecord,
    /// Backend-defined similarity; higher is closer.
    pub score: f32,
}

pub trait SemanticStore {
    fn store(
        &mut self,
        kind: &str,
        id: &str,
        content: &str,
        embedding: &[f32],
        metadata: JsonValue,
    ) -> Result<(), HivelogError>;

    /// Records of `kind` whose metadata contains every key/value in `filter`.
    fn query(&self, kind: &str, filter: &JsonValue) -> Result<Vec<SemanticRecord>, HivelogError>;

    fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<SemanticHit>, HivelogError>;
}

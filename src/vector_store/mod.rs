//! Vector index abstraction.
//!
//! The index is scoped per document: every entry belongs to exactly one
//! document, and queries never cross scopes. Merging across documents is the
//! retriever's job.

mod memory;

pub use memory::MemoryVectorIndex;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies a chunk by its document and position in that document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub document: Uuid,
    pub sequence: u32,
}

impl ChunkId {
    pub fn new(document: Uuid, sequence: u32) -> Self {
        Self { document, sequence }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document, self.sequence)
    }
}

/// A query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    /// Cosine similarity, higher is better.
    pub score: f32,
}

/// Trait for vector index implementations.
///
/// Writes to one scope are exclusive with each other and with reads of that
/// scope. Different scopes never contend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for one chunk.
    async fn insert(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()>;

    /// Top-k chunks of `document` by descending similarity. Equal scores are
    /// ordered by lower sequence first. An empty scope yields an empty list.
    async fn query(&self, document: Uuid, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Remove one chunk. Returns whether it was present.
    async fn remove(&self, chunk_id: ChunkId) -> Result<bool>;

    /// Drop a whole scope. Returns the number of entries removed.
    async fn remove_scope(&self, document: Uuid) -> Result<usize>;

    /// Replace a scope's contents with `entries`.
    async fn rebuild(&self, document: Uuid, entries: Vec<(u32, Vec<f32>)>) -> Result<()>;

    /// Number of entries in a scope.
    async fn len(&self, document: Uuid) -> Result<usize>;
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Scale a vector to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Inner product. Equals cosine similarity for unit vectors.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_chunk_id_ordering_and_display() {
        let doc = Uuid::nil();
        assert!(ChunkId::new(doc, 1) < ChunkId::new(doc, 2));
        assert_eq!(
            ChunkId::new(doc, 3).to_string(),
            "00000000-0000-0000-0000-000000000000:3"
        );
    }
}

//! In-memory vector index with one lock per document scope.
//!
//! Vectors are stored unit-normalized, so a query is a dot product per entry.
//! Entries are keyed by sequence in a `BTreeMap`, which makes the final state
//! independent of insertion order.

use super::{dot, l2_normalize, ChunkId, ScoredChunk, VectorIndex};
use crate::error::{BuddyError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Default)]
struct ScopeIndex {
    dimensions: Option<usize>,
    entries: BTreeMap<u32, Vec<f32>>,
}

impl ScopeIndex {
    fn put(&mut self, sequence: u32, mut vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(BuddyError::VectorStore("empty vector".into()));
        }
        match self.dimensions {
            Some(d) if d != vector.len() => {
                return Err(BuddyError::VectorStore(format!(
                    "dimension mismatch: scope has {}, got {}",
                    d,
                    vector.len()
                )));
            }
            _ => self.dimensions = Some(vector.len()),
        }
        l2_normalize(&mut vector);
        self.entries.insert(sequence, vector);
        Ok(())
    }
}

/// In-memory vector index.
pub struct MemoryVectorIndex {
    scopes: RwLock<HashMap<Uuid, Arc<RwLock<ScopeIndex>>>>,
}

impl MemoryVectorIndex {
    /// Create a new in-memory vector index.
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
        }
    }

    fn lock_error<E: std::fmt::Display>(e: E) -> BuddyError {
        BuddyError::VectorStore(format!("Failed to acquire lock: {}", e))
    }

    /// The scope lock, if the scope exists. The registry lock is released on return.
    fn scope(&self, document: Uuid) -> Result<Option<Arc<RwLock<ScopeIndex>>>> {
        let scopes = self.scopes.read().map_err(Self::lock_error)?;
        Ok(scopes.get(&document).cloned())
    }

    fn scope_or_create(&self, document: Uuid) -> Result<Arc<RwLock<ScopeIndex>>> {
        if let Some(scope) = self.scope(document)? {
            return Ok(scope);
        }
        let mut scopes = self.scopes.write().map_err(Self::lock_error)?;
        Ok(scopes.entry(document).or_default().clone())
    }
}

impl Default for MemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn insert(&self, chunk_id: ChunkId, vector: &[f32]) -> Result<()> {
        let scope = self.scope_or_create(chunk_id.document)?;
        let mut index = scope.write().map_err(Self::lock_error)?;
        index.put(chunk_id.sequence, vector.to_vec())
    }

    #[instrument(skip(self, vector))]
    async fn query(&self, document: Uuid, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let Some(scope) = self.scope(document)? else {
            return Ok(Vec::new());
        };
        let index = scope.read().map_err(Self::lock_error)?;
        if k == 0 || index.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(d) = index.dimensions {
            if d != vector.len() {
                return Err(BuddyError::VectorStore(format!(
                    "query has {} dimensions, scope has {}",
                    vector.len(),
                    d
                )));
            }
        }

        let mut query = vector.to_vec();
        l2_normalize(&mut query);

        let mut hits: Vec<ScoredChunk> = index
            .entries
            .iter()
            .map(|(&sequence, v)| ScoredChunk {
                chunk_id: ChunkId::new(document, sequence),
                score: dot(&query, v),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.chunk_id.sequence.cmp(&b.chunk_id.sequence))
        });
        hits.truncate(k);

        debug!("Query over {} entries returned {}", index.entries.len(), hits.len());
        Ok(hits)
    }

    async fn remove(&self, chunk_id: ChunkId) -> Result<bool> {
        let Some(scope) = self.scope(chunk_id.document)? else {
            return Ok(false);
        };
        let mut index = scope.write().map_err(Self::lock_error)?;
        Ok(index.entries.remove(&chunk_id.sequence).is_some())
    }

    async fn remove_scope(&self, document: Uuid) -> Result<usize> {
        let removed = {
            let mut scopes = self.scopes.write().map_err(Self::lock_error)?;
            scopes.remove(&document)
        };
        match removed {
            Some(scope) => {
                let index = scope.read().map_err(Self::lock_error)?;
                Ok(index.entries.len())
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn rebuild(&self, document: Uuid, entries: Vec<(u32, Vec<f32>)>) -> Result<()> {
        let mut fresh = ScopeIndex::default();
        for (sequence, vector) in entries {
            fresh.put(sequence, vector)?;
        }

        let scope = self.scope_or_create(document)?;
        let mut index = scope.write().map_err(Self::lock_error)?;
        *index = fresh;
        Ok(())
    }

    async fn len(&self, document: Uuid) -> Result<usize> {
        match self.scope(document)? {
            Some(scope) => Ok(scope.read().map_err(Self::lock_error)?.entries.len()),
            None => Ok(0),
        }
    }
}

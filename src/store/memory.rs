//! In-memory document store.
//!
//! Useful for testing and throwaway sessions.

use super::{Collection, DocumentStore};
use crate::error::{BuddyError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

type Key = (Collection, String);

/// In-memory document store.
pub struct MemoryDocumentStore {
    records: RwLock<BTreeMap<Key, serde_json::Value>>,
}

impl MemoryDocumentStore {
    /// Create a new in-memory document store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    fn lock_error<E: std::fmt::Display>(e: E) -> BuddyError {
        BuddyError::Store(format!("Failed to acquire lock: {}", e))
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put(&self, collection: Collection, id: &str, value: serde_json::Value) -> Result<()> {
        let mut records = self.records.write().map_err(Self::lock_error)?;
        records.insert((collection, id.to_string()), value);
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<serde_json::Value>> {
        let records = self.records.read().map_err(Self::lock_error)?;
        Ok(records.get(&(collection, id.to_string())).cloned())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(Self::lock_error)?;
        Ok(records.remove(&(collection, id.to_string())).is_some())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<serde_json::Value>> {
        let records = self.records.read().map_err(Self::lock_error)?;
        Ok(records
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_document_store() {
        let store = MemoryDocumentStore::new();

        store.put(Collection::Quizzes, "b", json!({"n": 2})).await.unwrap();
        store.put(Collection::Quizzes, "a", json!({"n": 1})).await.unwrap();
        store.put(Collection::Sessions, "a", json!({"n": 3})).await.unwrap();

        let quizzes = store.list(Collection::Quizzes).await.unwrap();
        assert_eq!(quizzes, vec![json!({"n": 1}), json!({"n": 2})]);

        store.put(Collection::Quizzes, "a", json!({"n": 10})).await.unwrap();
        assert_eq!(
            store.get(Collection::Quizzes, "a").await.unwrap(),
            Some(json!({"n": 10}))
        );

        assert!(store.delete(Collection::Sessions, "a").await.unwrap());
        assert!(store.get(Collection::Sessions, "a").await.unwrap().is_none());
    }
}

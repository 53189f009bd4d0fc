//! Persistence boundary.
//!
//! Records are JSON documents keyed by collection and identifier. The store
//! assumes writes are durable once they return and implements nothing more.

mod memory;
mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use crate::config::Settings;
use crate::error::{BuddyError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Documents,
    Quizzes,
    Attempts,
    Analytics,
    Sessions,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Documents => "documents",
            Collection::Quizzes => "quizzes",
            Collection::Attempts => "attempts",
            Collection::Analytics => "analytics",
            Collection::Sessions => "sessions",
        }
    }
}

/// Trait for document store backends.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, collection: Collection, id: &str, value: serde_json::Value) -> Result<()>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<serde_json::Value>>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, collection: Collection, id: &str) -> Result<bool>;

    /// All records of a collection, ordered by id.
    async fn list(&self, collection: Collection) -> Result<Vec<serde_json::Value>>;
}

/// A type persisted in one collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    /// Identifier within the collection.
    fn key(&self) -> String;
}

/// Typed access to a [`DocumentStore`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Build the configured backend.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match settings.store.provider.as_str() {
            "memory" => Arc::new(MemoryDocumentStore::new()),
            "sqlite" => Arc::new(SqliteDocumentStore::new(&settings.sqlite_path())?),
            other => {
                return Err(BuddyError::Config(format!("Unknown store provider: {}", other)));
            }
        };
        Ok(Self::new(store))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDocumentStore::new()))
    }

    pub async fn save<T: Record>(&self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store.put(T::COLLECTION, &record.key(), value).await
    }

    pub async fn load<T: Record>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(T::COLLECTION, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Like [`Repository::load`], but a missing record is an error.
    pub async fn require<T: Record>(&self, key: &str) -> Result<T> {
        self.load(key).await?.ok_or_else(|| {
            BuddyError::NotFound(format!("{} {}", T::COLLECTION.as_str(), key))
        })
    }

    pub async fn remove<T: Record>(&self, key: &str) -> Result<bool> {
        self.store.delete(T::COLLECTION, key).await
    }

    /// Every record of the type. Records that no longer deserialize are skipped.
    pub async fn all<T: Record>(&self) -> Result<Vec<T>> {
        let values = self.store.list(T::COLLECTION).await?;
        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable {} record: {}", T::COLLECTION.as_str(), e),
            }
        }
        Ok(records)
    }
}

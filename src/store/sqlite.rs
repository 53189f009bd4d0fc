//! SQLite-based document store.
//!
//! One table holds every collection. Bodies are JSON text.

use super::{Collection, DocumentStore};
use crate::error::{BuddyError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );
"#;

/// SQLite-based document store.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Open or create the database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite document store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BuddyError::Store(format!("Failed to acquire lock: {}", e)))
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    #[instrument(skip(self, value))]
    async fn put(&self, collection: Collection, id: &str, value: serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(&value)?;
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO records (collection, id, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![collection.as_str(), id, body, Utc::now().to_rfc3339()],
        )?;

        debug!("Stored {} {}", collection.as_str(), id);
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.lock()?;

        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
        )?;
        Ok(deleted > 0)
    }

    async fn list(&self, collection: Collection) -> Result<Vec<serde_json::Value>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY id")?;
        let bodies = stmt
            .query_map(params![collection.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(BuddyError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_document_store() {
        let store = SqliteDocumentStore::in_memory().unwrap();

        store.put(Collection::Documents, "d1", json!({"title": "Biology"})).await.unwrap();
        store.put(Collection::Documents, "d0", json!({"title": "Chemistry"})).await.unwrap();

        assert_eq!(
            store.get(Collection::Documents, "d1").await.unwrap(),
            Some(json!({"title": "Biology"}))
        );
        assert!(store.get(Collection::Quizzes, "d1").await.unwrap().is_none());

        let docs = store.list(Collection::Documents).await.unwrap();
        assert_eq!(docs[0], json!({"title": "Chemistry"}));

        assert!(store.delete(Collection::Documents, "d1").await.unwrap());
        assert!(!store.delete(Collection::Documents, "d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("buddy.db");

        {
            let store = SqliteDocumentStore::new(&path).unwrap();
            store.put(Collection::Sessions, "s1", json!({"turns": []})).await.unwrap();
        }

        let reopened = SqliteDocumentStore::new(&path).unwrap();
        assert_eq!(
            reopened.get(Collection::Sessions, "s1").await.unwrap(),
            Some(json!({"turns": []}))
        );
    }
}

//! SQLite-backed document store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{DocumentBackend, DocumentRecord};
use crate::error::{Error, Result};
use crate::memory::TimeRange;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // WAL lets readers proceed while a sweep writes
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            timestamp_ms INTEGER NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_timestamp ON documents(timestamp_ms)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Document store persisted in a SQLite database.
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(sqlite_error)?;
        initialize_schema(&conn).map_err(sqlite_error)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a store at a path that may contain `~` or environment variables.
    pub fn open_expanded(path: &str) -> Result<Self> {
        let expanded = shellexpand::full(path)
            .map_err(|e| Error::Config(format!("Cannot expand storage path {}: {}", path, e)))?;
        Self::open(expanded.into_owned())
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_error)?;
        initialize_schema(&conn).map_err(sqlite_error)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(sqlite_error)
    }

    /// Number of stored documents.
    pub fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }

    fn row_to_record(row: &rusqlite::Row) -> SqliteResult<(String, i64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }
}

fn sqlite_error(e: rusqlite::Error) -> Error {
    Error::backend_unavailable("sqlite", e.to_string())
}

fn decode(raw: (String, i64, String)) -> Result<DocumentRecord> {
    let (id, timestamp_ms, body) = raw;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        Error::Internal(format!("Invalid timestamp {} for document {}", timestamp_ms, id))
    })?;
    let body: Value = serde_json::from_str(&body)?;
    Ok(DocumentRecord {
        id,
        timestamp,
        body,
    })
}

#[async_trait]
impl DocumentBackend for SqliteDocumentStore {
    async fn put(&self, record: DocumentRecord) -> Result<()> {
        let body = serde_json::to_string(&record.body)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (id, timestamp_ms, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    timestamp_ms = excluded.timestamp_ms,
                    body = excluded.body,
                    updated_at = datetime('now')",
                params![record.id, record.timestamp.timestamp_millis(), body],
            )?;
            Ok(())
        })
    }

    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let raw = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, timestamp_ms, body FROM documents WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()
        })?;
        raw.map(decode).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    async fn query_by_time_range(&self, range: &TimeRange) -> Result<Vec<DocumentRecord>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp_ms, body FROM documents
                 WHERE timestamp_ms BETWEEN ?1 AND ?2
                 ORDER BY timestamp_ms DESC, id ASC",
            )?;
            let rows = stmt
                .query_map(
                    params![range.start.timestamp_millis(), range.end.timestamp_millis()],
                    Self::row_to_record,
                )?
                .collect::<SqliteResult<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let now = Utc::now();
        let record = DocumentRecord::new("ep-1", now, json!({"content": "met Bob"}));

        store.put(record.clone()).await.unwrap();
        let loaded = store.get("ep-1").await.unwrap().unwrap();
        assert_eq!(loaded.body, record.body);
        assert_eq!(loaded.timestamp.timestamp_millis(), now.timestamp_millis());

        // Upsert replaces the body
        store
            .put(DocumentRecord::new("ep-1", now, json!({"content": "met Carol"})))
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);
        let loaded = store.get("ep-1").await.unwrap().unwrap();
        assert_eq!(loaded.body["content"], "met Carol");

        assert!(store.delete("ep-1").await.unwrap());
        assert!(!store.delete("ep-1").await.unwrap());
        assert!(store.get("ep-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_time_range_query_orders_newest_first() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let now = Utc::now();
        for (id, minutes) in [("a", 30), ("b", 10), ("c", 120)] {
            store
                .put(DocumentRecord::new(
                    id,
                    now - Duration::minutes(minutes),
                    json!({}),
                ))
                .await
                .unwrap();
        }

        let range = TimeRange::new(now - Duration::hours(1), now).unwrap();
        let ids: Vec<String> = store
            .query_by_time_range(&range)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);

        let all = store
            .query_by_time_range(&TimeRange::unbounded())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.db");

        {
            let store = SqliteDocumentStore::open(&path).unwrap();
            store
                .put(DocumentRecord::new("persisted", Utc::now(), json!({"n": 1})))
                .await
                .unwrap();
        }

        let reopened = SqliteDocumentStore::open(&path).unwrap();
        assert!(reopened.get("persisted").await.unwrap().is_some());
    }
}

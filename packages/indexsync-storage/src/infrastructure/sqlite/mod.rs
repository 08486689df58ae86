//! SQLite cursor store
//!
//! One row per repository; writes are upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::domain::{ChangeCursor, CursorStore};
use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS change_cursors (
    repository_id TEXT PRIMARY KEY,
    sequence      INTEGER NOT NULL,
    updated_at    TEXT NOT NULL
);
";

pub struct SqliteCursorStore {
    conn: Mutex<Connection>,
}

impl SqliteCursorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn row_to_cursor(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeCursor> {
    let sequence: i64 = row.get(1)?;
    let updated_at: DateTime<Utc> = row.get(2)?;
    Ok(ChangeCursor {
        repository_id: row.get(0)?,
        sequence: sequence.max(0) as u64,
        updated_at,
    })
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self, repository_id: &str) -> Result<Option<ChangeCursor>> {
        let conn = self.conn.lock();
        let cursor = conn
            .query_row(
                "SELECT repository_id, sequence, updated_at FROM change_cursors WHERE repository_id = ?1",
                params![repository_id],
                row_to_cursor,
            )
            .optional()?;
        Ok(cursor)
    }

    async fn store(&self, cursor: &ChangeCursor) -> Result<()> {
        let sequence = i64::try_from(cursor.sequence).unwrap_or(i64::MAX);
        self.conn.lock().execute(
            "INSERT INTO change_cursors (repository_id, sequence, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(repository_id) DO UPDATE SET sequence = excluded.sequence, updated_at = excluded.updated_at",
            params![cursor.repository_id, sequence, cursor.updated_at],
        )?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ChangeCursor>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT repository_id, sequence, updated_at FROM change_cursors ORDER BY repository_id",
        )?;
        let rows = stmt.query_map([], row_to_cursor)?;
        let mut cursors = Vec::new();
        for row in rows {
            cursors.push(row?);
        }
        Ok(cursors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_and_load() {
        let store = SqliteCursorStore::in_memory().unwrap();
        assert!(store.load("r").await.unwrap().is_none());

        store.store(&ChangeCursor::new("r", 3)).await.unwrap();
        store.store(&ChangeCursor::new("r", 7)).await.unwrap();
        store.store(&ChangeCursor::new("a", 1)).await.unwrap();

        assert_eq!(store.load("r").await.unwrap().unwrap().sequence, 7);
        let all = store.list().await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.repository_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "r"]
        );
    }

    #[tokio::test]
    async fn test_store_overwrites_with_lower_sequence() {
        let store = SqliteCursorStore::in_memory().unwrap();
        store.store(&ChangeCursor::new("r", 9)).await.unwrap();
        store.store(&ChangeCursor::initial("r")).await.unwrap();
        assert_eq!(store.load("r").await.unwrap().unwrap().sequence, 0);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursors.db");
        {
            let store = SqliteCursorStore::open(&path).unwrap();
            store.store(&ChangeCursor::new("bedroom", 42)).await.unwrap();
        }
        let store = SqliteCursorStore::open(&path).unwrap();
        let cursor = store.load("bedroom").await.unwrap().unwrap();
        assert_eq!(cursor.sequence, 42);
    }
}

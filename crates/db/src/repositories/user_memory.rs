use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use analyst_core::domain::memory::MemoryEntry;
use analyst_core::domain::thread::UserId;

use super::{MemoryStore, RepositoryError};
use crate::DbPool;

pub struct SqlMemoryStore {
    pool: DbPool,
}

impl SqlMemoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MemoryStore for SqlMemoryStore {
    async fn search(
        &self,
        namespace: &UserId,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT namespace, memory_key, content, created_at FROM memory_entries
             WHERE namespace = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(&namespace.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(memory_from_row).collect()
    }

    async fn put(&self, entry: &MemoryEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO memory_entries (namespace, memory_key, content, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.namespace.0)
        .bind(&entry.key)
        .bind(&entry.content)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            event_name = "db.memory.put",
            namespace = %entry.namespace,
            memory_key = %entry.key,
            "memory entry stored"
        );
        Ok(())
    }

    async fn clear(&self, namespace: &UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM memory_entries WHERE namespace = ?")
            .bind(&namespace.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn memory_from_row(row: SqliteRow) -> Result<MemoryEntry, RepositoryError> {
    let created_at_raw: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| {
            RepositoryError::Decode(format!(
                "invalid timestamp in `created_at`: `{created_at_raw}` ({error})"
            ))
        })?;

    Ok(MemoryEntry {
        namespace: UserId(row.try_get("namespace")?),
        key: row.try_get("memory_key")?,
        content: row.try_get("content")?,
        created_at,
    })
}

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use analyst_core::domain::thread::{HistoryEntry, ThreadId, ThreadKey, ThreadSummary, UserId};

use super::{RegistryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlRegistryRepository {
    pool: DbPool,
}

impl SqlRegistryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RegistryRepository for SqlRegistryRepository {
    async fn list_users(&self) -> Result<Vec<UserId>, RepositoryError> {
        let rows = sqlx::query("SELECT user_id FROM users ORDER BY created_at ASC, user_id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|row| Ok(UserId(row.try_get("user_id")?))).collect()
    }

    async fn create_user(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO users (user_id, created_at) VALUES (?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(&user_id.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn user_exists(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM users WHERE user_id = ?")
            .bind(&user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn delete_user(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM thread_history WHERE user_id = ?")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM threads WHERE user_id = ?")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_threads(
        &self,
        user_id: Option<&UserId>,
    ) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let rows = if let Some(user_id) = user_id {
            sqlx::query(
                "SELECT thread_id, user_id FROM threads
                 WHERE user_id = ?
                 ORDER BY created_at ASC, thread_id ASC",
            )
            .bind(&user_id.0)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT thread_id, user_id FROM threads
                 ORDER BY user_id ASC, created_at ASC, thread_id ASC",
            )
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(thread_from_row).collect()
    }

    async fn create_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO threads (thread_id, user_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(thread_id, user_id) DO NOTHING",
        )
        .bind(&key.thread_id.0)
        .bind(&key.user_id.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn thread_exists(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM threads WHERE thread_id = ? AND user_id = ?")
            .bind(&key.thread_id.0)
            .bind(&key.user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn thread_id_in_use(&self, thread_id: &ThreadId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM threads WHERE thread_id = ? LIMIT 1")
            .bind(&thread_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn delete_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM thread_history WHERE thread_id = ? AND user_id = ?")
            .bind(&key.thread_id.0)
            .bind(&key.user_id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM threads WHERE thread_id = ? AND user_id = ?")
            .bind(&key.thread_id.0)
            .bind(&key.user_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_history_entry(
        &self,
        key: &ThreadKey,
        user_query: &str,
        response: &str,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let known = sqlx::query("SELECT 1 FROM threads WHERE thread_id = ? AND user_id = ?")
            .bind(&key.thread_id.0)
            .bind(&key.user_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !known {
            return Ok(false);
        }

        let next_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(entry_order), 0) + 1 FROM thread_history
             WHERE thread_id = ? AND user_id = ?",
        )
        .bind(&key.thread_id.0)
        .bind(&key.user_id.0)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO thread_history (
                thread_id,
                user_id,
                user_query,
                analyst_response,
                entry_order,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.thread_id.0)
        .bind(&key.user_id.0)
        .bind(user_query)
        .bind(response)
        .bind(next_order)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn history(&self, key: &ThreadKey) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_query, analyst_response, entry_order FROM thread_history
             WHERE thread_id = ? AND user_id = ?
             ORDER BY entry_order ASC",
        )
        .bind(&key.thread_id.0)
        .bind(&key.user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(history_from_row).collect()
    }

    async fn history_count(&self, key: &ThreadKey) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM thread_history WHERE thread_id = ? AND user_id = ?",
        )
        .bind(&key.thread_id.0)
        .bind(&key.user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn clear_history(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        if !self.thread_exists(key).await? {
            return Ok(false);
        }
        sqlx::query("DELETE FROM thread_history WHERE thread_id = ? AND user_id = ?")
            .bind(&key.thread_id.0)
            .bind(&key.user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }
}

fn thread_from_row(row: SqliteRow) -> Result<ThreadSummary, RepositoryError> {
    Ok(ThreadSummary {
        thread_id: ThreadId(row.try_get("thread_id")?),
        user_id: UserId(row.try_get("user_id")?),
    })
}

fn history_from_row(row: SqliteRow) -> Result<HistoryEntry, RepositoryError> {
    let entry_order: i64 = row.try_get("entry_order")?;
    if entry_order < 1 {
        return Err(RepositoryError::Decode(format!(
            "invalid value for `entry_order` (expected positive): {entry_order}"
        )));
    }
    Ok(HistoryEntry {
        user_query: row.try_get("user_query")?,
        response: row.try_get("analyst_response")?,
        entry_order,
    })
}

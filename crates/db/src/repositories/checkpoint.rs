use chrono::Utc;
use sqlx::Row;

use analyst_core::domain::thread::ThreadKey;
use analyst_core::domain::turn::{TurnCheckpoint, CHECKPOINT_VERSION};

use super::{CheckpointStore, RepositoryError};
use crate::DbPool;

pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn load(&self, key: &ThreadKey) -> Result<Option<TurnCheckpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT version, payload_json FROM thread_checkpoints
             WHERE user_id = ? AND thread_id = ?",
        )
        .bind(&key.user_id.0)
        .bind(&key.thread_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let version: i64 = row.try_get("version")?;
        if version != i64::from(CHECKPOINT_VERSION) {
            return Err(RepositoryError::Decode(format!(
                "unsupported checkpoint version {version} for thread `{key}`"
            )));
        }

        let payload: String = row.try_get("payload_json")?;
        let checkpoint = serde_json::from_str::<TurnCheckpoint>(&payload).map_err(|error| {
            RepositoryError::Decode(format!("invalid checkpoint payload for `{key}`: {error}"))
        })?;
        Ok(Some(checkpoint))
    }

    async fn save(
        &self,
        key: &ThreadKey,
        checkpoint: &TurnCheckpoint,
    ) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(checkpoint).map_err(|error| {
            RepositoryError::Encode(format!("checkpoint for `{key}`: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO thread_checkpoints (user_id, thread_id, version, payload_json, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, thread_id) DO UPDATE SET
                version = excluded.version,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at",
        )
        .bind(&key.user_id.0)
        .bind(&key.thread_id.0)
        .bind(i64::from(checkpoint.version))
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM thread_checkpoints WHERE user_id = ? AND thread_id = ?")
                .bind(&key.user_id.0)
                .bind(&key.thread_id.0)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

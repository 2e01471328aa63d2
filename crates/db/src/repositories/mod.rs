use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use analyst_core::domain::memory::MemoryEntry;
use analyst_core::domain::thread::{HistoryEntry, ThreadId, ThreadKey, ThreadSummary, UserId};
use analyst_core::domain::turn::TurnCheckpoint;

pub mod checkpoint;
pub mod memory;
pub mod registry;
pub mod user_memory;

pub use checkpoint::SqlCheckpointStore;
pub use memory::{InMemoryCheckpointStore, InMemoryMemoryStore, InMemoryRegistryRepository};
pub use registry::SqlRegistryRepository;
pub use user_memory::SqlMemoryStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Users, their threads, and each thread's ordered question/answer history.
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserId>, RepositoryError>;

    /// Returns `false` when the user already exists.
    async fn create_user(&self, user_id: &UserId) -> Result<bool, RepositoryError>;

    async fn user_exists(&self, user_id: &UserId) -> Result<bool, RepositoryError>;

    /// Removes the user together with their threads and history.
    async fn delete_user(&self, user_id: &UserId) -> Result<bool, RepositoryError>;

    async fn list_threads(
        &self,
        user_id: Option<&UserId>,
    ) -> Result<Vec<ThreadSummary>, RepositoryError>;

    /// Returns `false` when the thread already exists for this user.
    async fn create_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError>;

    async fn thread_exists(&self, key: &ThreadKey) -> Result<bool, RepositoryError>;

    /// True if any user owns a thread with this id.
    async fn thread_id_in_use(&self, thread_id: &ThreadId) -> Result<bool, RepositoryError>;

    async fn delete_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError>;

    /// Appends at `max(entry_order) + 1`; `false` if the thread is unknown.
    async fn append_history_entry(
        &self,
        key: &ThreadKey,
        user_query: &str,
        response: &str,
    ) -> Result<bool, RepositoryError>;

    async fn history(&self, key: &ThreadKey) -> Result<Vec<HistoryEntry>, RepositoryError>;

    async fn history_count(&self, key: &ThreadKey) -> Result<i64, RepositoryError>;

    async fn clear_history(&self, key: &ThreadKey) -> Result<bool, RepositoryError>;

    async fn generate_user_id(&self, prefix: &str) -> Result<UserId, RepositoryError> {
        loop {
            let candidate = UserId(short_id(prefix));
            if !self.user_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
    }

    async fn generate_thread_id(&self, prefix: &str) -> Result<ThreadId, RepositoryError> {
        loop {
            let candidate = ThreadId(short_id(prefix));
            if !self.thread_id_in_use(&candidate).await? {
                return Ok(candidate);
            }
        }
    }
}

/// Append-only store of per-user memory entries.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// At most `limit` entries of `namespace`; callers must not rely on order.
    async fn search(
        &self,
        namespace: &UserId,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, RepositoryError>;

    async fn put(&self, entry: &MemoryEntry) -> Result<(), RepositoryError>;

    /// Drops every entry of `namespace`; returns how many were removed.
    async fn clear(&self, namespace: &UserId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, key: &ThreadKey) -> Result<Option<TurnCheckpoint>, RepositoryError>;
    async fn save(&self, key: &ThreadKey, checkpoint: &TurnCheckpoint)
        -> Result<(), RepositoryError>;
    async fn delete(&self, key: &ThreadKey) -> Result<bool, RepositoryError>;
}

fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..8])
}

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use analyst_core::domain::memory::MemoryEntry;
use analyst_core::domain::thread::{HistoryEntry, ThreadId, ThreadKey, ThreadSummary, UserId};
use analyst_core::domain::turn::TurnCheckpoint;

use super::{CheckpointStore, MemoryStore, RegistryRepository, RepositoryError};

#[derive(Default)]
struct RegistryState {
    users: Vec<UserId>,
    threads: BTreeMap<ThreadKey, Vec<HistoryEntry>>,
    thread_order: Vec<ThreadKey>,
}

#[derive(Default)]
pub struct InMemoryRegistryRepository {
    state: RwLock<RegistryState>,
}

#[async_trait::async_trait]
impl RegistryRepository for InMemoryRegistryRepository {
    async fn list_users(&self) -> Result<Vec<UserId>, RepositoryError> {
        Ok(self.state.read().await.users.clone())
    }

    async fn create_user(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        if state.users.contains(user_id) {
            return Ok(false);
        }
        state.users.push(user_id.clone());
        Ok(true)
    }

    async fn user_exists(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.users.contains(user_id))
    }

    async fn delete_user(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.users.len();
        state.users.retain(|user| user != user_id);
        state.threads.retain(|key, _| &key.user_id != user_id);
        state.thread_order.retain(|key| &key.user_id != user_id);
        Ok(state.users.len() != before)
    }

    async fn list_threads(
        &self,
        user_id: Option<&UserId>,
    ) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .thread_order
            .iter()
            .filter(|key| user_id.map_or(true, |user| &key.user_id == user))
            .map(|key| ThreadSummary { thread_id: key.thread_id.clone(), user_id: key.user_id.clone() })
            .collect())
    }

    async fn create_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.users.contains(&key.user_id) {
            return Err(RepositoryError::Conflict(format!(
                "cannot create thread `{}` for unknown user `{}`",
                key.thread_id, key.user_id
            )));
        }
        if state.threads.contains_key(key) {
            return Ok(false);
        }
        state.threads.insert(key.clone(), Vec::new());
        state.thread_order.push(key.clone());
        Ok(true)
    }

    async fn thread_exists(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.threads.contains_key(key))
    }

    async fn thread_id_in_use(&self, thread_id: &ThreadId) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.threads.keys().any(|key| &key.thread_id == thread_id))
    }

    async fn delete_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        state.thread_order.retain(|existing| existing != key);
        Ok(state.threads.remove(key).is_some())
    }

    async fn append_history_entry(
        &self,
        key: &ThreadKey,
        user_query: &str,
        response: &str,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(entries) = state.threads.get_mut(key) else {
            return Ok(false);
        };
        let entry_order = entries.iter().map(|entry| entry.entry_order).max().unwrap_or(0) + 1;
        entries.push(HistoryEntry {
            user_query: user_query.to_string(),
            response: response.to_string(),
            entry_order,
        });
        Ok(true)
    }

    async fn history(&self, key: &ThreadKey) -> Result<Vec<HistoryEntry>, RepositoryError> {
        Ok(self.state.read().await.threads.get(key).cloned().unwrap_or_default())
    }

    async fn history_count(&self, key: &ThreadKey) -> Result<i64, RepositoryError> {
        let state = self.state.read().await;
        let count = state.threads.get(key).map_or(0, Vec::len);
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn clear_history(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.threads.get_mut(key) {
            Some(entries) => {
                entries.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: RwLock<HashMap<UserId, Vec<MemoryEntry>>>,
}

impl InMemoryMemoryStore {
    pub async fn entry_count(&self, namespace: &UserId) -> usize {
        self.entries.read().await.get(namespace).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn search(
        &self,
        namespace: &UserId,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(namespace)
            .map(|stored| stored.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, entry: &MemoryEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        let stored = entries.entry(entry.namespace.clone()).or_default();
        if stored.iter().any(|existing| existing.key == entry.key) {
            return Err(RepositoryError::Conflict(format!(
                "memory key `{}` already exists in `{}`",
                entry.key, entry.namespace
            )));
        }
        stored.push(entry.clone());
        Ok(())
    }

    async fn clear(&self, namespace: &UserId) -> Result<u64, RepositoryError> {
        let removed = self.entries.write().await.remove(namespace).map_or(0, |stored| stored.len());
        Ok(removed as u64)
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<ThreadKey, TurnCheckpoint>>,
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, key: &ThreadKey) -> Result<Option<TurnCheckpoint>, RepositoryError> {
        Ok(self.checkpoints.read().await.get(key).cloned())
    }

    async fn save(
        &self,
        key: &ThreadKey,
        checkpoint: &TurnCheckpoint,
    ) -> Result<(), RepositoryError> {
        self.checkpoints.write().await.insert(key.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        Ok(self.checkpoints.write().await.remove(key).is_some())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::thread::UserId;

pub const NO_MEMORIES_SENTINEL: &str = "No relevant past memories.";

/// A durable fact about a user. Entries are only ever added.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub namespace: UserId,
    pub key: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(namespace: UserId, content: impl Into<String>) -> Self {
        Self {
            namespace,
            key: Uuid::new_v4().to_string(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

pub fn render_memories(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return NO_MEMORIES_SENTINEL.to_string();
    }
    entries.iter().map(|entry| format!("- {}", entry.content)).collect::<Vec<_>>().join("\n")
}

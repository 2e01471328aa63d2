//! Turn entry point: restores thread state, runs the workflow, persists the result.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use analyst_core::audit::AuditSink;
use analyst_core::config::AgentConfig;
use analyst_core::dataset::{BaseTable, DatasetView};
use analyst_core::domain::thread::{HistoryEntry, ThreadKey, UserId};
use analyst_core::domain::turn::{HistoryLine, QueryLabel, TurnState};
use analyst_core::errors::DomainError;
use analyst_db::{
    CheckpointStore, DbPool, InMemoryCheckpointStore, InMemoryMemoryStore, InMemoryRegistryRepository,
    MemoryStore, RegistryRepository, RepositoryError, SqlCheckpointStore, SqlMemoryStore,
    SqlRegistryRepository,
};

use crate::context::TurnContext;
use crate::llm::CompletionService;
use crate::prompts::PromptLibrary;
use crate::workflow::Workflow;

pub use crate::errors::TurnError;

/// Outcome of one store write at the end of a turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum WriteStatus {
    Saved,
    Skipped,
    Failed(String),
}

impl WriteStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceReport {
    pub checkpoint: WriteStatus,
    pub history: WriteStatus,
    pub memory: WriteStatus,
}

impl PersistenceReport {
    pub fn has_failures(&self) -> bool {
        self.checkpoint.is_failed() || self.history.is_failed() || self.memory.is_failed()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub user_query: String,
    pub user_id: String,
    pub thread_id: String,
    /// `None` asks the runtime to look the thread up in the registry.
    #[serde(default)]
    pub has_history: Option<bool>,
    /// Starts the thread over with a full dataset view and an empty message log.
    #[serde(default)]
    pub reset: bool,
}

impl TurnRequest {
    pub fn new(
        user_query: impl Into<String>,
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            user_query: user_query.into(),
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            has_history: None,
            reset: false,
        }
    }

    pub fn with_history(mut self, has_history: bool) -> Self {
        self.has_history = Some(has_history);
        self
    }

    pub fn with_reset(mut self) -> Self {
        self.reset = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply {
    pub response: String,
    pub correlation_id: String,
    pub label: QueryLabel,
    pub iterations: u32,
    pub memory_saved: bool,
    pub persistence: PersistenceReport,
}

/// The stores a runtime reads and writes.
#[derive(Clone)]
pub struct RuntimeStores {
    pub registry: Arc<dyn RegistryRepository>,
    pub memory: Arc<dyn MemoryStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl RuntimeStores {
    /// All three stores backed by one SQLite pool with migrations already applied.
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            registry: Arc::new(SqlRegistryRepository::new(pool.clone())),
            memory: Arc::new(SqlMemoryStore::new(pool.clone())),
            checkpoints: Arc::new(SqlCheckpointStore::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            registry: Arc::new(InMemoryRegistryRepository::default()),
            memory: Arc::new(InMemoryMemoryStore::default()),
            checkpoints: Arc::new(InMemoryCheckpointStore::default()),
        }
    }

    /// Deletes a thread, its history and its checkpoint. A thread later
    /// recreated under the same id starts from the full dataset.
    pub async fn forget_thread(&self, key: &ThreadKey) -> Result<Removal, RepositoryError> {
        let checkpoint = self.checkpoints.delete(key).await?;
        let found = self.registry.delete_thread(key).await?;
        tracing::info!(event_name = "registry.thread.forgotten", thread = %key, found, checkpoint, "thread removed");
        Ok(Removal {
            found,
            threads: usize::from(found),
            checkpoints: usize::from(checkpoint),
            memory_entries: 0,
        })
    }

    /// Deletes a user with every thread, checkpoint and memory entry they own.
    pub async fn forget_user(&self, user_id: &UserId) -> Result<Removal, RepositoryError> {
        let threads = self.registry.list_threads(Some(user_id)).await?;
        let mut checkpoints = 0;
        for thread in &threads {
            let key = ThreadKey { user_id: thread.user_id.clone(), thread_id: thread.thread_id.clone() };
            if self.checkpoints.delete(&key).await? {
                checkpoints += 1;
            }
        }
        let memory_entries = self.memory.clear(user_id).await?;
        let found = self.registry.delete_user(user_id).await?;
        tracing::info!(
            event_name = "registry.user.forgotten",
            user_id = %user_id,
            found,
            threads = threads.len(),
            checkpoints,
            memory_entries,
            "user removed"
        );
        Ok(Removal { found, threads: threads.len(), checkpoints, memory_entries })
    }

    /// Empties a thread's history and drops its checkpoint; the thread stays registered.
    pub async fn clear_thread(&self, key: &ThreadKey) -> Result<Removal, RepositoryError> {
        let found = self.registry.clear_history(key).await?;
        let checkpoint = found && self.checkpoints.delete(key).await?;
        Ok(Removal { found, threads: 0, checkpoints: usize::from(checkpoint), memory_entries: 0 })
    }
}

/// What a cleanup operation removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Removal {
    /// Whether the registry knew the target.
    pub found: bool,
    pub threads: usize,
    pub checkpoints: usize,
    pub memory_entries: u64,
}

pub struct AgentRuntime {
    base: Arc<BaseTable>,
    workflow: Workflow,
    registry: Arc<dyn RegistryRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    history_window: usize,
    log_window: usize,
}

impl AgentRuntime {
    /// Loads prompts and validates the workflow table; fails before serving any turn.
    pub fn new(
        base: Arc<BaseTable>,
        completion: Arc<dyn CompletionService>,
        stores: RuntimeStores,
        audit: Arc<dyn AuditSink>,
        config: &AgentConfig,
    ) -> Result<Self, TurnError> {
        let prompts = Arc::new(PromptLibrary::load(config.prompts_dir.as_deref())?);
        let workflow = Workflow::new(completion, prompts, stores.memory, config)?;
        Ok(Self {
            base,
            workflow,
            registry: stores.registry,
            checkpoints: stores.checkpoints,
            audit,
            history_window: config.history_window,
            log_window: config.log_window,
        })
    }

    pub fn base_table(&self) -> &Arc<BaseTable> {
        &self.base
    }

    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnReply, TurnError> {
        let user_query = request.user_query.trim();
        if user_query.is_empty() {
            return Err(TurnError::EmptyQuery);
        }

        let key = ThreadKey::new(request.user_id.as_str(), request.thread_id.as_str());
        let context = TurnContext::new(key.clone(), Uuid::new_v4().to_string(), self.audit.clone());
        let has_history = match request.has_history {
            Some(flag) => flag,
            None => self.thread_has_history(&context).await,
        };
        tracing::info!(
            event_name = "turn.started",
            correlation_id = %context.correlation_id,
            user_id = %key.user_id,
            thread_id = %key.thread_id,
            has_history,
            reset = request.reset,
            "turn started"
        );

        let condensed = if has_history { self.condensed_history(&context).await } else { Vec::new() };
        let state = self.initial_state(&context, user_query, condensed, has_history && !request.reset).await?;

        let run = match self.workflow.run(&context, state).await {
            Ok(run) => run,
            Err(error) => {
                tracing::error!(
                    event_name = "turn.failed",
                    correlation_id = %context.correlation_id,
                    user_id = %key.user_id,
                    thread_id = %key.thread_id,
                    error = %error,
                    "turn failed; nothing was persisted"
                );
                return Err(error);
            }
        };

        let state = run.state;
        let response = state.final_response.clone().ok_or_else(|| {
            DomainError::InvariantViolation("workflow ended without a final response".to_string())
        })?;
        let label = state.label().ok_or_else(|| {
            DomainError::InvariantViolation("workflow ended without a classification".to_string())
        })?;

        let checkpoint = match self.checkpoints.save(&key, &state.checkpoint()).await {
            Ok(()) => WriteStatus::Saved,
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.checkpoint.save_failed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "checkpoint write failed"
                );
                WriteStatus::Failed(error.to_string())
            }
        };
        let history = match self.record_history(&key, user_query, &response).await {
            Ok(true) => WriteStatus::Saved,
            Ok(false) => WriteStatus::Failed(format!("thread `{key}` is not registered")),
            Err(error) => WriteStatus::Failed(error.to_string()),
        };
        if let WriteStatus::Failed(reason) = &history {
            tracing::warn!(
                event_name = "turn.history.append_failed",
                correlation_id = %context.correlation_id,
                error = %reason,
                "history append failed"
            );
        }

        let persistence = PersistenceReport { checkpoint, history, memory: run.memory };
        tracing::info!(
            event_name = "turn.finished",
            correlation_id = %context.correlation_id,
            user_id = %key.user_id,
            thread_id = %key.thread_id,
            label = label.as_str(),
            iterations = state.iteration_count,
            memory_saved = state.memory_saved,
            persistence_failures = persistence.has_failures(),
            "turn finished"
        );

        Ok(TurnReply {
            response,
            correlation_id: context.correlation_id,
            label,
            iterations: state.iteration_count,
            memory_saved: state.memory_saved,
            persistence,
        })
    }

    async fn thread_has_history(&self, context: &TurnContext) -> bool {
        match self.registry.history_count(&context.key).await {
            Ok(count) => count > 0,
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.history.lookup_failed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "history lookup failed; treating thread as new"
                );
                false
            }
        }
    }

    async fn condensed_history(&self, context: &TurnContext) -> Vec<HistoryLine> {
        match self.registry.history(&context.key).await {
            Ok(entries) => condense(&entries, self.history_window),
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.history.load_failed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "history load failed; continuing without it"
                );
                Vec::new()
            }
        }
    }

    async fn initial_state(
        &self,
        context: &TurnContext,
        user_query: &str,
        condensed: Vec<HistoryLine>,
        resume: bool,
    ) -> Result<TurnState, TurnError> {
        let fresh = || TurnState::new(user_query, DatasetView::full(Arc::clone(&self.base)), condensed.clone());
        if !resume {
            return Ok(fresh());
        }

        match self.checkpoints.load(&context.key).await {
            Ok(Some(checkpoint)) => {
                tracing::debug!(
                    event_name = "turn.checkpoint.restored",
                    correlation_id = %context.correlation_id,
                    messages = checkpoint.message_log.len(),
                    "resuming thread from checkpoint"
                );
                Ok(TurnState::resume(checkpoint, Arc::clone(&self.base), user_query, condensed.clone())
                    .with_log_window(self.log_window))
            }
            Ok(None) => Ok(fresh()),
            Err(source) => Err(TurnError::Checkpoint { key: context.key.clone(), source }),
        }
    }

    /// Registers the user and thread on first use, then appends the exchange.
    async fn record_history(
        &self,
        key: &ThreadKey,
        user_query: &str,
        response: &str,
    ) -> Result<bool, RepositoryError> {
        if !self.registry.user_exists(&key.user_id).await? {
            self.registry.create_user(&key.user_id).await?;
        }
        if !self.registry.thread_exists(key).await? {
            self.registry.create_thread(key).await?;
        }
        self.registry.append_history_entry(key, user_query, response).await
    }
}

/// The last `window` exchanges as alternating user/assistant lines.
pub fn condense(entries: &[HistoryEntry], window: usize) -> Vec<HistoryLine> {
    let start = entries.len().saturating_sub(window);
    entries[start..]
        .iter()
        .flat_map(|entry| {
            [
                HistoryLine::new("user", entry.user_query.clone()),
                HistoryLine::new("assistant", entry.response.clone()),
            ]
        })
        .collect()
}

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use analyst_agent::agent::MAX_ITERATIONS_RESPONSE;
use analyst_agent::{
    AgentRuntime, LlmError, RuntimeStores, ScriptedCompletionService, TurnError, TurnRequest,
    WriteStatus,
};
use analyst_core::audit::InMemoryAuditSink;
use analyst_core::config::AgentConfig;
use analyst_core::dataset::{BaseTable, DatasetRecord};
use analyst_core::domain::memory::MemoryEntry;
use analyst_core::domain::message::{Message, Role};
use analyst_core::domain::thread::{HistoryEntry, ThreadId, ThreadKey, ThreadSummary, UserId};
use analyst_core::domain::turn::{QueryLabel, TurnCheckpoint};
use analyst_db::{
    CheckpointStore, InMemoryCheckpointStore, InMemoryMemoryStore, InMemoryRegistryRepository,
    MemoryStore, RegistryRepository, RepositoryError,
};

const USER: &str = "user_a1b2c3d4";
const THREAD: &str = "thread_e5f6a7b8";

/// 100 rows: 60 `order` (20 of them `cancel_order`), 40 `refund`.
fn base_table() -> Arc<BaseTable> {
    let mut records = Vec::new();
    for index in 0..100 {
        let (category, intent) = match index {
            0..=19 => ("order", "cancel_order"),
            20..=59 => ("order", "track_order"),
            _ => ("refund", "get_refund"),
        };
        records.push(DatasetRecord {
            flags: None,
            instruction: format!("customer message {index}"),
            category: category.to_string(),
            intent: intent.to_string(),
            response: None,
        });
    }
    Arc::new(BaseTable::new(records))
}

struct Harness {
    runtime: AgentRuntime,
    stores: RuntimeStores,
    service: Arc<ScriptedCompletionService>,
    registry: Arc<InMemoryRegistryRepository>,
    memory: Arc<InMemoryMemoryStore>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    sink: Arc<InMemoryAuditSink>,
}

/// Stores or settings that replace the in-memory defaults.
#[derive(Default)]
struct Overrides {
    registry: Option<Arc<dyn RegistryRepository>>,
    memory: Option<Arc<dyn MemoryStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    log_window: Option<usize>,
}

impl Harness {
    fn new(max_iterations: u32) -> Self {
        Self::with(max_iterations, Overrides::default())
    }

    fn with(max_iterations: u32, overrides: Overrides) -> Self {
        let service = Arc::new(ScriptedCompletionService::new());
        let registry = Arc::new(InMemoryRegistryRepository::default());
        let memory = Arc::new(InMemoryMemoryStore::default());
        let checkpoints = Arc::new(InMemoryCheckpointStore::default());
        let sink = Arc::new(InMemoryAuditSink::default());
        let defaults = AgentConfig::default();
        let config = AgentConfig {
            max_iterations,
            log_window: overrides.log_window.unwrap_or(defaults.log_window),
            ..defaults
        };

        let stores = RuntimeStores {
            registry: overrides.registry.unwrap_or_else(|| registry.clone()),
            memory: overrides.memory.unwrap_or_else(|| memory.clone()),
            checkpoints: overrides.checkpoints.unwrap_or_else(|| checkpoints.clone()),
        };
        let runtime = AgentRuntime::new(base_table(), service.clone(), stores.clone(), sink.clone(), &config)
            .expect("runtime");

        Self { runtime, stores, service, registry, memory, checkpoints, sink }
    }

    fn route(&self, label: &str) -> &Self {
        self.service.push_structured(json!({"reasoning": "test routing", "label": label}));
        self
    }

    fn tool(&self, id: &str, name: &str, arguments: serde_json::Value) -> &Self {
        self.service.push_tool_call(id, name, arguments);
        self
    }

    fn decline_memory(&self) -> &Self {
        self.service.push_structured(json!({"reasoning": "nothing durable", "should_save": false, "summary": ""}));
        self
    }

    async fn checkpoint(&self) -> TurnCheckpoint {
        self.checkpoints
            .load(&ThreadKey::new(USER, THREAD))
            .await
            .expect("load checkpoint")
            .expect("checkpoint written")
    }
}

fn tool_result<'a>(log: &'a [Message], call_id: &str) -> &'a str {
    log.iter()
        .rev()
        .find(|message| message.tool_call_id.as_deref() == Some(call_id))
        .map(|message| message.content.as_str())
        .expect("tool result present")
}

fn script_order_filter_turn(harness: &Harness, suffix: &str, answer: &str) {
    harness
        .route("structured")
        .tool(&format!("f{suffix}"), "select_semantic_category_tool", json!({"reasoning": "orders", "category_names": ["order"]}))
        .tool(&format!("c{suffix}"), "count_rows_tool", json!({"reasoning": "count"}))
        .tool(&format!("done{suffix}"), "finish_tool", json!({"reasoning": "answer", "final_response": answer}))
        .decline_memory();
}

#[tokio::test]
async fn structured_turn_filters_counts_and_persists() {
    let harness = Harness::new(10);
    harness
        .route("structured")
        .tool("c1", "select_semantic_category_tool", json!({"reasoning": "orders", "category_names": ["order"]}))
        .tool("c2", "select_semantic_intent_tool", json!({"reasoning": "cancels", "intent_names": ["cancel_order"]}))
        .tool("c3", "count_rows_tool", json!({"reasoning": "count"}))
        .tool("c4", "finish_tool", json!({"reasoning": "done", "final_response": "20 orders were cancelled."}))
        .decline_memory();

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("How many orders were cancelled?", USER, THREAD))
        .await
        .expect("turn");

    assert_eq!(reply.response, "20 orders were cancelled.");
    assert_eq!(reply.label, QueryLabel::Structured);
    assert_eq!(reply.iterations, 4);
    assert!(!reply.memory_saved);
    assert_eq!(reply.persistence.checkpoint, WriteStatus::Saved);
    assert_eq!(reply.persistence.history, WriteStatus::Saved);
    assert_eq!(reply.persistence.memory, WriteStatus::Skipped);
    assert_eq!(harness.service.remaining(), 0);

    let checkpoint = harness.checkpoint().await;
    assert_eq!(tool_result(&checkpoint.message_log, "c1"), r#"{"selected_categories":["order"],"number_of_rows":60}"#);
    assert_eq!(tool_result(&checkpoint.message_log, "c3"), r#"{"number_of_rows":20}"#);
    assert!(checkpoint.is_complete);

    let key = ThreadKey::new(USER, THREAD);
    let history = harness.registry.history(&key).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].response, "20 orders were cancelled.");
    assert!(harness.registry.user_exists(&key.user_id).await.expect("user registered"));
}

#[tokio::test]
async fn iteration_cap_ends_with_apology() {
    let harness = Harness::new(3);
    harness.route("structured");
    for index in 0..3 {
        harness.tool(&format!("loop{index}"), "count_rows_tool", json!({"reasoning": "again"}));
    }
    harness.decline_memory();

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("keep counting", USER, THREAD))
        .await
        .expect("turn");

    assert_eq!(reply.response, MAX_ITERATIONS_RESPONSE);
    assert_eq!(reply.iterations, 3);
    let requests = harness.service.requests();
    assert_eq!(requests.len(), 5, "router + 3 reasoning steps + memory save");
    assert_eq!(requests.iter().filter(|request| !request.tools.is_empty()).count(), 3);
    assert_eq!(harness.service.remaining(), 0);
}

#[tokio::test]
async fn replies_without_tool_calls_still_consume_the_budget() {
    let harness = Harness::new(2);
    harness.route("unstructured");
    harness.service.push_text("Let me think.").push_text("Still thinking.");
    harness.decline_memory();

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("what do customers say?", USER, THREAD))
        .await
        .expect("turn");

    assert_eq!(reply.response, MAX_ITERATIONS_RESPONSE);
    assert_eq!(reply.iterations, 2);
    assert_eq!(harness.service.requests().len(), 4);
}

#[tokio::test]
async fn finish_makes_the_iteration_terminal() {
    let harness = Harness::new(10);
    harness
        .route("unstructured")
        .tool("f1", "finish_tool", json!({"reasoning": "known", "final_response": "Mostly refund delays."}))
        .decline_memory();

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("main complaint?", USER, THREAD))
        .await
        .expect("turn");

    assert_eq!(reply.response, "Mostly refund delays.");
    assert_eq!(reply.iterations, 1);
    let requests = harness.service.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[2].response_schema.as_ref().map(|schema| schema.name.as_str()),
        Some("memory_save_decision")
    );
}

#[tokio::test]
async fn unstructured_agent_summarizes_the_filtered_view() {
    let harness = Harness::new(10);
    harness
        .route("unstructured")
        .tool("f1", "select_semantic_category_tool", json!({"reasoning": "refunds", "category_names": ["refund"]}))
        .tool("s1", "summarize_tool", json!({"reasoning": "read", "request": "why do people ask for refunds"}));
    // 40 refund rows with the default 10 x 5 batching: four batch calls and one combine call.
    for index in 0..4 {
        harness.service.push_text(format!("partial {index}"));
    }
    harness.service.push_text("Customers mostly want late orders refunded.");
    harness
        .tool("d1", "finish_tool", json!({"reasoning": "done", "final_response": "Late orders drive refunds."}))
        .decline_memory();

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("why do people want refunds?", USER, THREAD))
        .await
        .expect("turn");

    assert_eq!(reply.response, "Late orders drive refunds.");
    let checkpoint = harness.checkpoint().await;
    assert_eq!(
        tool_result(&checkpoint.message_log, "s1"),
        r#"{"summary":"Customers mostly want late orders refunded."}"#
    );
    assert_eq!(harness.service.remaining(), 0);
}

#[tokio::test]
async fn out_of_scope_terminates_in_one_step_without_tools() {
    let harness = Harness::new(10);
    harness.route("out-of-scope");
    harness.service.push_structured(json!({"response": "I can only answer questions about the support dataset."}));
    harness.decline_memory();

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("what's the weather in Lisbon?", USER, THREAD))
        .await
        .expect("turn");

    assert_eq!(reply.label, QueryLabel::OutOfScope);
    assert_eq!(reply.iterations, 0);
    assert_eq!(reply.response, "I can only answer questions about the support dataset.");

    let checkpoint = harness.checkpoint().await;
    assert!(checkpoint.message_log.iter().all(|message| !message.has_tool_calls() && message.role != Role::Tool));
    assert_eq!(harness.sink.events_of_type("workflow.transition_applied").len(), 3);
}

#[tokio::test]
async fn memory_label_reads_then_saves() {
    let harness = Harness::new(10);
    let user = UserId(USER.to_string());
    harness.memory.put(&MemoryEntry::new(user.clone(), "Works in the billing team.")).await.expect("seed memory");

    harness.route("memory");
    harness.service.push_structured(json!({"reasoning": "one fact", "relevant_memories": "You work in billing."}));
    harness.service.push_structured(json!({"reasoning": "new fact", "should_save": true, "summary": "Asks about past sessions."}));

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("What do you remember about me?", USER, THREAD))
        .await
        .expect("turn");

    assert_eq!(reply.label, QueryLabel::Memory);
    assert_eq!(reply.response, "You work in billing.");
    assert!(reply.memory_saved);
    assert_eq!(reply.persistence.memory, WriteStatus::Saved);
    assert_eq!(harness.memory.entry_count(&user).await, 2);
    assert_eq!(harness.sink.events_of_type("turn.memory.saved").len(), 1);
}

#[tokio::test]
async fn second_turn_resumes_view_and_log_from_checkpoint() {
    let harness = Harness::new(10);
    script_order_filter_turn(&harness, "1", "There are 60 orders.");
    harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect("first turn");
    let first_log_len = harness.checkpoint().await.message_log.len();

    harness
        .route("structured")
        .tool("c2", "count_rows_tool", json!({"reasoning": "recount"}))
        .tool("d2", "finish_tool", json!({"reasoning": "done", "final_response": "Still 60."}))
        .decline_memory();
    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("And now?", USER, THREAD))
        .await
        .expect("second turn");

    assert_eq!(reply.response, "Still 60.");
    assert_eq!(reply.iterations, 2, "iteration count restarts each turn");
    let checkpoint = harness.checkpoint().await;
    assert_eq!(tool_result(&checkpoint.message_log, "c2"), r#"{"number_of_rows":60}"#);
    assert!(checkpoint.message_log.len() > first_log_len);

    let first_reason = harness
        .service
        .requests()
        .into_iter()
        .filter(|request| !request.tools.is_empty())
        .nth(3)
        .expect("first reasoning request of the second turn");
    assert!(first_reason.messages[0].content.ends_with("user: How many orders?\nassistant: There are 60 orders."));
    assert!(first_reason.messages.len() > first_log_len);
}

#[tokio::test]
async fn reset_starts_from_the_full_table() {
    let harness = Harness::new(10);
    script_order_filter_turn(&harness, "1", "There are 60 orders.");
    harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect("first turn");

    harness
        .route("structured")
        .tool("c2", "count_rows_tool", json!({"reasoning": "recount"}))
        .tool("d2", "finish_tool", json!({"reasoning": "done", "final_response": "100 rows."}))
        .decline_memory();
    harness
        .runtime
        .process_turn(TurnRequest::new("Start over: how many rows?", USER, THREAD).with_reset())
        .await
        .expect("reset turn");

    let checkpoint = harness.checkpoint().await;
    assert_eq!(tool_result(&checkpoint.message_log, "c2"), r#"{"number_of_rows":100}"#);
    assert_eq!(harness.registry.history_count(&ThreadKey::new(USER, THREAD)).await.expect("count"), 2);
}

#[tokio::test]
async fn completion_failure_fails_the_turn_without_persisting() {
    let harness = Harness::new(10);
    harness.route("structured");
    harness.service.push_error(LlmError::Transport("connection reset".to_string()));

    let error = harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect_err("turn fails");

    assert!(matches!(error, TurnError::Completion(LlmError::Transport(_))));
    let key = ThreadKey::new(USER, THREAD);
    assert!(harness.checkpoints.load(&key).await.expect("load").is_none());
    assert_eq!(harness.registry.history_count(&key).await.expect("count"), 0);
}

#[tokio::test]
async fn empty_query_is_rejected_before_any_completion_call() {
    let harness = Harness::new(10);
    let error = harness
        .runtime
        .process_turn(TurnRequest::new("   ", USER, THREAD))
        .await
        .expect_err("empty query");
    assert!(matches!(error, TurnError::EmptyQuery));
    assert!(harness.service.requests().is_empty());
}

struct UnavailableCheckpointStore;

#[async_trait]
impl CheckpointStore for UnavailableCheckpointStore {
    async fn load(&self, _key: &ThreadKey) -> Result<Option<TurnCheckpoint>, RepositoryError> {
        Ok(None)
    }

    async fn save(&self, _key: &ThreadKey, _checkpoint: &TurnCheckpoint) -> Result<(), RepositoryError> {
        Err(RepositoryError::Decode("checkpoint volume is read-only".to_string()))
    }

    async fn delete(&self, _key: &ThreadKey) -> Result<bool, RepositoryError> {
        Ok(false)
    }
}

#[tokio::test]
async fn checkpoint_failure_still_returns_the_answer() {
    let harness = Harness::with(
        10,
        Overrides { checkpoints: Some(Arc::new(UnavailableCheckpointStore)), ..Overrides::default() },
    );
    harness
        .route("structured")
        .tool("d1", "finish_tool", json!({"reasoning": "known", "final_response": "100 rows."}))
        .decline_memory();

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("How many rows?", USER, THREAD))
        .await
        .expect("answer survives persistence failure");

    assert_eq!(reply.response, "100 rows.");
    assert!(matches!(reply.persistence.checkpoint, WriteStatus::Failed(ref reason) if reason.contains("read-only")));
    assert_eq!(reply.persistence.history, WriteStatus::Saved);
    assert!(reply.persistence.has_failures());
}

struct ReadOnlyMemoryStore;

#[async_trait]
impl MemoryStore for ReadOnlyMemoryStore {
    async fn search(&self, _namespace: &UserId, _limit: usize) -> Result<Vec<MemoryEntry>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn put(&self, _entry: &MemoryEntry) -> Result<(), RepositoryError> {
        Err(RepositoryError::Conflict("memory namespace is frozen".to_string()))
    }

    async fn clear(&self, _namespace: &UserId) -> Result<u64, RepositoryError> {
        Ok(0)
    }
}

#[tokio::test]
async fn memory_write_failure_still_returns_the_answer() {
    let harness =
        Harness::with(10, Overrides { memory: Some(Arc::new(ReadOnlyMemoryStore)), ..Overrides::default() });
    harness
        .route("structured")
        .tool("d1", "finish_tool", json!({"reasoning": "known", "final_response": "100 rows."}));
    harness
        .service
        .push_structured(json!({"reasoning": "durable", "should_save": true, "summary": "Counts rows often."}));

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("How many rows?", USER, THREAD))
        .await
        .expect("answer survives memory failure");

    assert_eq!(reply.response, "100 rows.");
    assert!(!reply.memory_saved);
    assert!(matches!(reply.persistence.memory, WriteStatus::Failed(ref reason) if reason.contains("frozen")));
    assert_eq!(reply.persistence.checkpoint, WriteStatus::Saved);
    assert_eq!(reply.persistence.history, WriteStatus::Saved);
    assert!(!harness.checkpoint().await.memory_saved);
}

/// Registry whose history table rejects writes; everything else delegates.
#[derive(Default)]
struct HistoryLockedRegistry {
    inner: InMemoryRegistryRepository,
}

#[async_trait]
impl RegistryRepository for HistoryLockedRegistry {
    async fn list_users(&self) -> Result<Vec<UserId>, RepositoryError> {
        self.inner.list_users().await
    }

    async fn create_user(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        self.inner.create_user(user_id).await
    }

    async fn user_exists(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        self.inner.user_exists(user_id).await
    }

    async fn delete_user(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        self.inner.delete_user(user_id).await
    }

    async fn list_threads(&self, user_id: Option<&UserId>) -> Result<Vec<ThreadSummary>, RepositoryError> {
        self.inner.list_threads(user_id).await
    }

    async fn create_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        self.inner.create_thread(key).await
    }

    async fn thread_exists(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        self.inner.thread_exists(key).await
    }

    async fn thread_id_in_use(&self, thread_id: &ThreadId) -> Result<bool, RepositoryError> {
        self.inner.thread_id_in_use(thread_id).await
    }

    async fn delete_thread(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        self.inner.delete_thread(key).await
    }

    async fn append_history_entry(
        &self,
        _key: &ThreadKey,
        _user_query: &str,
        _response: &str,
    ) -> Result<bool, RepositoryError> {
        Err(RepositoryError::Conflict("history table is locked".to_string()))
    }

    async fn history(&self, key: &ThreadKey) -> Result<Vec<HistoryEntry>, RepositoryError> {
        self.inner.history(key).await
    }

    async fn history_count(&self, key: &ThreadKey) -> Result<i64, RepositoryError> {
        self.inner.history_count(key).await
    }

    async fn clear_history(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
        self.inner.clear_history(key).await
    }
}

#[tokio::test]
async fn history_append_failure_keeps_response_and_checkpoint() {
    let harness = Harness::with(
        10,
        Overrides { registry: Some(Arc::new(HistoryLockedRegistry::default())), ..Overrides::default() },
    );
    script_order_filter_turn(&harness, "1", "There are 60 orders.");

    let reply = harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect("answer survives history failure");

    assert_eq!(reply.response, "There are 60 orders.");
    assert!(matches!(reply.persistence.history, WriteStatus::Failed(ref reason) if reason.contains("locked")));
    assert_eq!(reply.persistence.checkpoint, WriteStatus::Saved);
    assert_eq!(reply.persistence.memory, WriteStatus::Skipped);

    let checkpoint = harness.checkpoint().await;
    assert!(checkpoint.is_complete);
    assert_eq!(checkpoint.final_response.as_deref(), Some("There are 60 orders."));
    assert_eq!(tool_result(&checkpoint.message_log, "c1"), r#"{"number_of_rows":60}"#);
}

#[tokio::test]
async fn forgotten_thread_restarts_from_the_full_table() {
    let harness = Harness::new(10);
    let key = ThreadKey::new(USER, THREAD);
    script_order_filter_turn(&harness, "1", "There are 60 orders.");
    harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect("first turn");

    let removal = harness.stores.forget_thread(&key).await.expect("forget thread");
    assert!(removal.found);
    assert_eq!((removal.threads, removal.checkpoints), (1, 1));
    assert!(!harness.registry.thread_exists(&key).await.expect("thread lookup"));
    assert!(harness.checkpoints.load(&key).await.expect("load").is_none());

    harness
        .route("structured")
        .tool("c2", "count_rows_tool", json!({"reasoning": "count"}))
        .tool("d2", "finish_tool", json!({"reasoning": "done", "final_response": "100 rows."}))
        .decline_memory();
    harness
        .runtime
        .process_turn(TurnRequest::new("How many rows?", USER, THREAD).with_history(true))
        .await
        .expect("turn on recreated thread");

    let checkpoint = harness.checkpoint().await;
    assert_eq!(tool_result(&checkpoint.message_log, "c2"), r#"{"number_of_rows":100}"#);
    assert!(checkpoint.message_log.iter().all(|message| message.tool_call_id.as_deref() != Some("f1")));
    assert_eq!(harness.registry.history_count(&key).await.expect("count"), 1);
}

#[tokio::test]
async fn forgotten_user_loses_threads_checkpoints_and_memories() {
    let harness = Harness::new(10);
    let user = UserId(USER.to_string());
    let key = ThreadKey::new(USER, THREAD);
    harness.memory.put(&MemoryEntry::new(user.clone(), "Works in billing.")).await.expect("seed memory");
    script_order_filter_turn(&harness, "1", "There are 60 orders.");
    harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect("first turn");

    let removal = harness.stores.forget_user(&user).await.expect("forget user");
    assert_eq!(
        (removal.found, removal.threads, removal.checkpoints, removal.memory_entries),
        (true, 1, 1, 1)
    );
    assert!(!harness.registry.user_exists(&user).await.expect("user lookup"));
    assert!(harness.checkpoints.load(&key).await.expect("load").is_none());
    assert_eq!(harness.memory.entry_count(&user).await, 0);

    let again = harness.stores.forget_user(&user).await.expect("second removal");
    assert!(!again.found);
}

#[tokio::test]
async fn cleared_thread_keeps_its_registration_but_not_its_state() {
    let harness = Harness::new(10);
    let key = ThreadKey::new(USER, THREAD);
    script_order_filter_turn(&harness, "1", "There are 60 orders.");
    harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect("first turn");

    let removal = harness.stores.clear_thread(&key).await.expect("clear");
    assert!(removal.found);
    assert_eq!(removal.checkpoints, 1);
    assert!(harness.registry.thread_exists(&key).await.expect("thread lookup"));
    assert_eq!(harness.registry.history_count(&key).await.expect("count"), 0);
    assert!(harness.checkpoints.load(&key).await.expect("load").is_none());

    let unknown = harness.stores.clear_thread(&ThreadKey::new(USER, "thread_missing")).await.expect("clear");
    assert!(!unknown.found);
}

#[tokio::test]
async fn resumed_log_is_capped_by_the_log_window() {
    let harness = Harness::with(10, Overrides { log_window: Some(4), ..Overrides::default() });
    script_order_filter_turn(&harness, "1", "There are 60 orders.");
    harness
        .runtime
        .process_turn(TurnRequest::new("How many orders?", USER, THREAD))
        .await
        .expect("first turn");
    assert!(harness.checkpoint().await.message_log.len() > 4);

    harness
        .route("structured")
        .tool("c2", "count_rows_tool", json!({"reasoning": "recount"}))
        .tool("d2", "finish_tool", json!({"reasoning": "done", "final_response": "Still 60."}))
        .decline_memory();
    harness
        .runtime
        .process_turn(TurnRequest::new("And now?", USER, THREAD))
        .await
        .expect("second turn");

    let checkpoint = harness.checkpoint().await;
    assert!(checkpoint.message_log.iter().all(|message| message.tool_call_id.as_deref() != Some("f1")));
    assert_eq!(tool_result(&checkpoint.message_log, "c2"), r#"{"number_of_rows":60}"#, "view survives trimming");
}

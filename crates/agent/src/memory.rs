//! Memory Subsystem: the read branch answers "what do you remember" questions,
//! the save node runs at the end of every turn and may append one fact.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use analyst_core::audit::{AuditCategory, AuditOutcome};
use analyst_core::domain::memory::{render_memories, MemoryEntry};
use analyst_core::domain::message::Message;
use analyst_core::domain::thread::UserId;
use analyst_core::domain::turn::{TurnState, TurnUpdate};
use analyst_db::MemoryStore;

use crate::context::TurnContext;
use crate::errors::TurnError;
use crate::llm::{complete_structured, CompletionService, ResponseSchema};
use crate::prompts::{PromptLibrary, PromptTemplate};
use crate::runtime::WriteStatus;

#[derive(Debug, Deserialize)]
struct SaveDecision {
    reasoning: String,
    should_save: bool,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct RecallReply {
    reasoning: String,
    relevant_memories: String,
}

fn save_schema() -> ResponseSchema {
    ResponseSchema::new(
        "memory_save_decision",
        json!({
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "should_save": {"type": "boolean"},
                "summary": {"type": "string"}
            },
            "required": ["reasoning", "should_save", "summary"],
            "additionalProperties": false
        }),
    )
}

fn recall_schema() -> ResponseSchema {
    ResponseSchema::new(
        "memory_recall",
        json!({
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "relevant_memories": {"type": "string"}
            },
            "required": ["reasoning", "relevant_memories"],
            "additionalProperties": false
        }),
    )
}

pub struct MemoryNodes {
    completion: Arc<dyn CompletionService>,
    prompts: Arc<PromptLibrary>,
    store: Arc<dyn MemoryStore>,
    save_limit: usize,
    read_limit: usize,
}

impl MemoryNodes {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        prompts: Arc<PromptLibrary>,
        store: Arc<dyn MemoryStore>,
        save_limit: usize,
        read_limit: usize,
    ) -> Self {
        Self { completion, prompts, store, save_limit, read_limit }
    }

    /// A failed read degrades to "no memories" rather than failing the turn.
    async fn recall(&self, context: &TurnContext, limit: usize) -> Vec<MemoryEntry> {
        let namespace: &UserId = &context.key.user_id;
        match self.store.search(namespace, limit).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.memory.search_failed",
                    correlation_id = %context.correlation_id,
                    user_id = %namespace,
                    error = %error,
                    "memory search failed; continuing without memories"
                );
                Vec::new()
            }
        }
    }

    pub async fn read(&self, context: &TurnContext, state: &TurnState) -> Result<TurnUpdate, TurnError> {
        let entries = self.recall(context, self.read_limit).await;
        let prompt = self.prompts.render(
            PromptTemplate::ReadMemory,
            &json!({"memories": render_memories(&entries), "user_query": state.user_query}),
        )?;
        let system = Message::system(prompt);

        let (reply, raw) = complete_structured::<RecallReply, _>(
            self.completion.as_ref(),
            vec![system.clone(), Message::human(state.user_query.clone())],
            recall_schema(),
        )
        .await?;
        tracing::debug!(
            event_name = "turn.memory.read",
            correlation_id = %context.correlation_id,
            memories = entries.len(),
            reasoning = %reply.reasoning,
            "memories recalled"
        );

        Ok(TurnUpdate::new().with_messages([system, Message::ai(raw)]).complete(reply.relevant_memories))
    }

    /// Runs after every terminal path. The store is only written when the model
    /// decides the exchange holds a new durable fact.
    pub async fn save(
        &self,
        context: &TurnContext,
        state: &TurnState,
    ) -> Result<(TurnUpdate, WriteStatus), TurnError> {
        let entries = self.recall(context, self.save_limit).await;
        let prompt = self.prompts.render(
            PromptTemplate::SaveMemory,
            &json!({
                "memories": render_memories(&entries),
                "user_query": state.user_query,
                "final_response": state.final_response.as_deref().unwrap_or_default(),
            }),
        )?;

        let (decision, _) = complete_structured::<SaveDecision, _>(
            self.completion.as_ref(),
            vec![Message::system(prompt)],
            save_schema(),
        )
        .await?;

        let summary = decision.summary.trim();
        if !decision.should_save || summary.is_empty() {
            tracing::debug!(
                event_name = "turn.memory.skipped",
                correlation_id = %context.correlation_id,
                should_save = decision.should_save,
                reasoning = %decision.reasoning,
                "nothing new to remember"
            );
            return Ok((TurnUpdate::new(), WriteStatus::Skipped));
        }

        let entry = MemoryEntry::new(context.key.user_id.clone(), summary);
        match self.store.put(&entry).await {
            Ok(()) => {
                tracing::info!(
                    event_name = "turn.memory.saved",
                    correlation_id = %context.correlation_id,
                    user_id = %context.key.user_id,
                    memory_key = %entry.key,
                    "memory saved"
                );
                context.emit(
                    context
                        .event("save_memory", "turn.memory.saved", AuditCategory::Memory, AuditOutcome::Success)
                        .with_metadata("memory_key", entry.key.clone()),
                );
                Ok((TurnUpdate::new().mark_memory_saved(), WriteStatus::Saved))
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.memory.save_failed",
                    correlation_id = %context.correlation_id,
                    user_id = %context.key.user_id,
                    error = %error,
                    "memory write failed"
                );
                context.emit(
                    context
                        .event("save_memory", "turn.memory.save_failed", AuditCategory::Memory, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                Ok((TurnUpdate::new(), WriteStatus::Failed(error.to_string())))
            }
        }
    }
}

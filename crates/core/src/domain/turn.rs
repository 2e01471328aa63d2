//! Turn State and the deltas nodes return to advance it.
//!
//! Nodes never mutate a shared state. Each node reads the current
//! [`TurnState`] and returns a [`TurnUpdate`]; [`TurnState::apply`] consumes
//! the old state and yields the next one, enforcing the write-once fields.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataset::{BaseTable, DatasetView, Predicate};
use crate::domain::message::{Message, Role};
use crate::errors::DomainError;

pub const NO_HISTORY_SENTINEL: &str = "No relevant conversation history.";
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryLabel {
    Structured,
    Unstructured,
    #[serde(alias = "out-of-scope")]
    OutOfScope,
    Memory,
}

impl QueryLabel {
    pub const ALL: [QueryLabel; 4] =
        [QueryLabel::Structured, QueryLabel::Unstructured, QueryLabel::OutOfScope, QueryLabel::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Unstructured => "unstructured",
            Self::OutOfScope => "out_of_scope",
            Self::Memory => "memory",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub reasoning: String,
    pub label: QueryLabel,
}

/// One `(role, text)` line of the condensed cross-turn history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLine {
    pub role: String,
    pub text: String,
}

impl HistoryLine {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self { role: role.into(), text: text.into() }
    }
}

pub fn render_history(lines: &[HistoryLine]) -> String {
    if lines.is_empty() {
        return NO_HISTORY_SENTINEL.to_string();
    }
    lines.iter().map(|line| format!("{}: {}", line.role, line.text)).collect::<Vec<_>>().join("\n")
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnState {
    pub user_query: String,
    pub classification: Option<Classification>,
    pub message_log: Vec<Message>,
    pub condensed_history: Vec<HistoryLine>,
    pub dataset_view: DatasetView,
    pub is_complete: bool,
    pub final_response: Option<String>,
    pub iteration_count: u32,
    pub memory_saved: bool,
}

/// Changes produced by a single node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnUpdate {
    pub classification: Option<Classification>,
    pub messages: Vec<Message>,
    pub dataset_view: Option<DatasetView>,
    pub completion: Option<String>,
    pub advance_iteration: bool,
    pub memory_saved: bool,
}

impl TurnUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classified(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn with_view(mut self, view: DatasetView) -> Self {
        self.dataset_view = Some(view);
        self
    }

    /// Sets `is_complete` and `final_response` together.
    pub fn complete(mut self, final_response: impl Into<String>) -> Self {
        self.completion = Some(final_response.into());
        self
    }

    pub fn advance_iteration(mut self) -> Self {
        self.advance_iteration = true;
        self
    }

    pub fn mark_memory_saved(mut self) -> Self {
        self.memory_saved = true;
        self
    }
}

impl TurnState {
    pub fn new(
        user_query: impl Into<String>,
        dataset_view: DatasetView,
        condensed_history: Vec<HistoryLine>,
    ) -> Self {
        Self {
            user_query: user_query.into(),
            classification: None,
            message_log: Vec::new(),
            condensed_history,
            dataset_view,
            is_complete: false,
            final_response: None,
            iteration_count: 0,
            memory_saved: false,
        }
    }

    /// Continues a thread: the message log and dataset view carry over, the
    /// per-turn fields start fresh.
    pub fn resume(
        checkpoint: TurnCheckpoint,
        base: Arc<BaseTable>,
        user_query: impl Into<String>,
        condensed_history: Vec<HistoryLine>,
    ) -> Self {
        Self {
            message_log: checkpoint.message_log,
            ..Self::new(user_query, DatasetView::restore(base, checkpoint.predicate), condensed_history)
        }
    }

    /// Keeps at most `window` trailing messages of the log. The cut lands on a
    /// system or human message so a tool result never loses its call.
    pub fn with_log_window(mut self, window: usize) -> Self {
        let excess = self.message_log.len().saturating_sub(window);
        if excess > 0 {
            let start = self.message_log[excess..]
                .iter()
                .position(|message| matches!(message.role, Role::System | Role::Human))
                .map_or(self.message_log.len(), |offset| excess + offset);
            self.message_log.drain(..start);
        }
        self
    }

    pub fn label(&self) -> Option<QueryLabel> {
        self.classification.as_ref().map(|classification| classification.label)
    }

    pub fn apply(mut self, update: TurnUpdate) -> Result<TurnState, DomainError> {
        if let Some(classification) = update.classification {
            if self.classification.is_some() {
                return Err(DomainError::InvariantViolation(
                    "classification is set once per turn".to_string(),
                ));
            }
            self.classification = Some(classification);
        }

        if let Some(final_response) = update.completion {
            if self.is_complete {
                return Err(DomainError::InvariantViolation(
                    "turn is already complete".to_string(),
                ));
            }
            self.is_complete = true;
            self.final_response = Some(final_response);
        }

        self.message_log.extend(update.messages);
        if let Some(view) = update.dataset_view {
            self.dataset_view = view;
        }
        if update.advance_iteration {
            self.iteration_count += 1;
        }
        self.memory_saved |= update.memory_saved;
        Ok(self)
    }

    pub fn checkpoint(&self) -> TurnCheckpoint {
        TurnCheckpoint {
            version: CHECKPOINT_VERSION,
            user_query: self.user_query.clone(),
            classification: self.classification.clone(),
            message_log: self.message_log.clone(),
            condensed_history: self.condensed_history.clone(),
            predicate: self.dataset_view.predicate().clone(),
            is_complete: self.is_complete,
            final_response: self.final_response.clone(),
            iteration_count: self.iteration_count,
            memory_saved: self.memory_saved,
        }
    }
}

/// Serialisable projection of [`TurnState`]; rows are re-attached on resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnCheckpoint {
    pub version: u32,
    pub user_query: String,
    pub classification: Option<Classification>,
    pub message_log: Vec<Message>,
    pub condensed_history: Vec<HistoryLine>,
    pub predicate: Predicate,
    pub is_complete: bool,
    pub final_response: Option<String>,
    pub iteration_count: u32,
    pub memory_saved: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        render_history, Classification, HistoryLine, QueryLabel, TurnState, TurnUpdate,
        NO_HISTORY_SENTINEL,
    };
    use crate::dataset::{BaseTable, Column, DatasetRecord, DatasetView};
    use serde_json::json;

    use crate::domain::message::{Message, ToolInvocation};
    use crate::errors::DomainError;

    fn base() -> Arc<BaseTable> {
        Arc::new(BaseTable::new(vec![
            DatasetRecord {
                flags: None,
                instruction: "cancel my order".to_string(),
                category: "ORDER".to_string(),
                intent: "cancel_order".to_string(),
                response: None,
            },
            DatasetRecord {
                flags: None,
                instruction: "refund please".to_string(),
                category: "REFUND".to_string(),
                intent: "get_refund".to_string(),
                response: None,
            },
        ]))
    }

    fn classification(label: QueryLabel) -> Classification {
        Classification { reasoning: "because".to_string(), label }
    }

    #[test]
    fn label_parses_both_spellings_of_out_of_scope() {
        let snake: QueryLabel = serde_json::from_str("\"out_of_scope\"").expect("snake");
        let kebab: QueryLabel = serde_json::from_str("\"out-of-scope\"").expect("kebab");
        assert_eq!(snake, QueryLabel::OutOfScope);
        assert_eq!(kebab, QueryLabel::OutOfScope);
    }

    #[test]
    fn apply_is_a_pure_transition() {
        let state = TurnState::new("how many?", DatasetView::full(base()), Vec::new());
        let before = state.clone();
        let next = state
            .apply(
                TurnUpdate::new()
                    .classified(classification(QueryLabel::Structured))
                    .with_message(Message::human("how many?"))
                    .advance_iteration(),
            )
            .expect("apply");

        assert_eq!(before.iteration_count, 0);
        assert_eq!(next.iteration_count, 1);
        assert_eq!(next.label(), Some(QueryLabel::Structured));
        assert_eq!(next.message_log.len(), 1);
    }

    #[test]
    fn classification_is_write_once() {
        let state = TurnState::new("q", DatasetView::full(base()), Vec::new())
            .apply(TurnUpdate::new().classified(classification(QueryLabel::Memory)))
            .expect("first classification");
        let error = state
            .apply(TurnUpdate::new().classified(classification(QueryLabel::Structured)))
            .expect_err("second classification");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn completion_sets_flag_and_response_together_once() {
        let state = TurnState::new("q", DatasetView::full(base()), Vec::new())
            .apply(TurnUpdate::new().complete("done"))
            .expect("complete");
        assert!(state.is_complete);
        assert_eq!(state.final_response.as_deref(), Some("done"));
        assert!(state.apply(TurnUpdate::new().complete("again")).is_err());
    }

    #[test]
    fn checkpoint_round_trip_restores_view_and_log_but_resets_turn_fields() {
        let table = base();
        let state = TurnState::new("q1", DatasetView::full(Arc::clone(&table)), Vec::new())
            .apply(
                TurnUpdate::new()
                    .classified(classification(QueryLabel::Structured))
                    .with_message(Message::human("q1"))
                    .with_view(DatasetView::full(Arc::clone(&table)).filter(Column::Category, ["ORDER"]))
                    .advance_iteration()
                    .complete("one order"),
            )
            .expect("apply");

        let encoded = serde_json::to_string(&state.checkpoint()).expect("encode");
        let decoded = serde_json::from_str(&encoded).expect("decode");
        let resumed = TurnState::resume(
            decoded,
            Arc::clone(&table),
            "q2",
            vec![HistoryLine::new("user", "q1")],
        );

        assert_eq!(resumed.user_query, "q2");
        assert_eq!(resumed.dataset_view.count_rows(), 1);
        assert_eq!(resumed.message_log, state.message_log);
        assert!(!resumed.is_complete);
        assert_eq!(resumed.iteration_count, 0);
        assert!(resumed.classification.is_none());
        assert!(resumed.final_response.is_none());
    }

    #[test]
    fn log_window_drops_oldest_exchanges_at_a_human_boundary() {
        let call = ToolInvocation { id: "c1".to_string(), name: "count_rows_tool".to_string(), arguments: json!({}) };
        let log = vec![
            Message::system("route"),
            Message::human("q1"),
            Message::ai_with_tool_calls("", vec![call]),
            Message::tool_result("c1", "{\"number_of_rows\":2}"),
            Message::ai("two"),
            Message::human("q2"),
            Message::ai("done"),
        ];
        let state = TurnState { message_log: log.clone(), ..TurnState::new("q3", DatasetView::full(base()), Vec::new()) };

        let trimmed = state.clone().with_log_window(4);
        assert_eq!(trimmed.message_log, log[5..].to_vec(), "cut moves forward past the tool result");

        let untouched = state.clone().with_log_window(50);
        assert_eq!(untouched.message_log.len(), log.len());

        let tail_without_boundary = TurnState {
            message_log: vec![Message::human("q"), Message::ai("a"), Message::ai("b")],
            ..state
        }
        .with_log_window(2);
        assert!(tail_without_boundary.message_log.is_empty());
    }

    #[test]
    fn history_rendering() {
        assert_eq!(render_history(&[]), NO_HISTORY_SENTINEL);
        let lines = vec![HistoryLine::new("user", "hi"), HistoryLine::new("assistant", "hello")];
        assert_eq!(render_history(&lines), "user: hi\nassistant: hello");
    }
}

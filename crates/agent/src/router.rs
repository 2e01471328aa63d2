use std::sync::Arc;

use serde_json::json;

use analyst_core::domain::message::Message;
use analyst_core::domain::turn::{Classification, TurnState, TurnUpdate};

use crate::errors::TurnError;
use crate::llm::{complete_structured, CompletionService, ResponseSchema};
use crate::prompts::{PromptLibrary, PromptTemplate};

pub const ROUTE_SCHEMA: &str = "query_route";

pub fn route_schema() -> ResponseSchema {
    ResponseSchema::new(
        ROUTE_SCHEMA,
        json!({
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "label": {
                    "type": "string",
                    "enum": ["structured", "unstructured", "out_of_scope", "memory"]
                }
            },
            "required": ["reasoning", "label"],
            "additionalProperties": false
        }),
    )
}

/// Single-shot classifier that picks the branch a turn takes.
pub struct QueryRouter {
    completion: Arc<dyn CompletionService>,
    prompts: Arc<PromptLibrary>,
}

impl QueryRouter {
    pub fn new(completion: Arc<dyn CompletionService>, prompts: Arc<PromptLibrary>) -> Self {
        Self { completion, prompts }
    }

    pub async fn classify(&self, state: &TurnState) -> Result<TurnUpdate, TurnError> {
        let system = Message::system(self.prompts.render(PromptTemplate::Router, &json!({}))?);
        let human = Message::human(state.user_query.clone());

        let (classification, raw) = complete_structured::<Classification, _>(
            self.completion.as_ref(),
            vec![system.clone(), human.clone()],
            route_schema(),
        )
        .await?;

        tracing::debug!(
            event_name = "turn.router.classified",
            label = classification.label.as_str(),
            reasoning = %classification.reasoning,
            "query classified"
        );
        Ok(TurnUpdate::new().classified(classification).with_messages([system, human, Message::ai(raw)]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use analyst_core::dataset::{BaseTable, DatasetView};
    use analyst_core::domain::message::Role;
    use analyst_core::domain::turn::{QueryLabel, TurnState};

    use super::{QueryRouter, ROUTE_SCHEMA};
    use crate::errors::TurnError;
    use crate::llm::{LlmError, ScriptedCompletionService};
    use crate::prompts::PromptLibrary;

    fn state() -> TurnState {
        TurnState::new("how many refunds?", DatasetView::full(Arc::new(BaseTable::default())), Vec::new())
    }

    #[tokio::test]
    async fn classification_appends_prompt_query_and_decision() {
        let service = Arc::new(ScriptedCompletionService::new());
        service.push_structured(json!({"reasoning": "a count", "label": "structured"}));
        let router = QueryRouter::new(service.clone(), Arc::new(PromptLibrary::embedded().expect("prompts")));

        let update = router.classify(&state()).await.expect("classify");
        assert_eq!(update.classification.as_ref().map(|c| c.label), Some(QueryLabel::Structured));
        let roles = update.messages.iter().map(|message| message.role).collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::System, Role::Human, Role::Ai]);
        assert_eq!(update.messages[1].content, "how many refunds?");
        assert!(update.messages[2].content.contains("\"structured\""));

        let request = &service.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.response_schema.as_ref().map(|schema| schema.name.as_str()), Some(ROUTE_SCHEMA));
    }

    #[tokio::test]
    async fn kebab_case_out_of_scope_label_is_accepted() {
        let service = Arc::new(ScriptedCompletionService::new());
        service.push_structured(json!({"reasoning": "weather", "label": "out-of-scope"}));
        let router = QueryRouter::new(service, Arc::new(PromptLibrary::embedded().expect("prompts")));
        let update = router.classify(&state()).await.expect("classify");
        assert_eq!(update.classification.map(|c| c.label), Some(QueryLabel::OutOfScope));
    }

    #[tokio::test]
    async fn malformed_decision_is_a_fatal_completion_error() {
        let service = Arc::new(ScriptedCompletionService::new());
        service.push_structured(json!({"reasoning": "?", "label": "sql"}));
        let router = QueryRouter::new(service, Arc::new(PromptLibrary::embedded().expect("prompts")));
        let error = router.classify(&state()).await.expect_err("unknown label");
        assert!(matches!(error, TurnError::Completion(LlmError::SchemaMismatch { .. })));
    }
}

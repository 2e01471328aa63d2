use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use analyst_core::domain::message::Message;
use analyst_core::domain::turn::{TurnState, TurnUpdate};

use crate::errors::TurnError;
use crate::llm::{complete_structured, CompletionService, ResponseSchema};
use crate::prompts::{PromptLibrary, PromptTemplate};

#[derive(Debug, Deserialize)]
struct OutOfScopeReply {
    response: String,
}

/// Answers requests unrelated to the dataset in a single call.
pub struct OutOfScopeResponder {
    completion: Arc<dyn CompletionService>,
    prompts: Arc<PromptLibrary>,
}

impl OutOfScopeResponder {
    pub fn new(completion: Arc<dyn CompletionService>, prompts: Arc<PromptLibrary>) -> Self {
        Self { completion, prompts }
    }

    pub async fn respond(&self, state: &TurnState) -> Result<TurnUpdate, TurnError> {
        let system = Message::system(self.prompts.render(PromptTemplate::OutOfScope, &json!({}))?);
        let schema = ResponseSchema::new(
            "out_of_scope_reply",
            json!({
                "type": "object",
                "properties": {"response": {"type": "string"}},
                "required": ["response"],
                "additionalProperties": false
            }),
        );
        let (reply, _) = complete_structured::<OutOfScopeReply, _>(
            self.completion.as_ref(),
            vec![system, Message::human(state.user_query.clone())],
            schema,
        )
        .await?;

        Ok(TurnUpdate::new().with_message(Message::ai(reply.response.clone())).complete(reply.response))
    }
}

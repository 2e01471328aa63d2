use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use analyst_core::domain::message::{Message, ToolInvocation};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion transport failure: {0}")]
    Transport(String),
    #[error("completion service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
    #[error("structured output did not match `{schema}`: {reason}")]
    SchemaMismatch { schema: String, reason: String },
}

impl LlmError {
    /// Transport failures, rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::SchemaMismatch { .. } => false,
        }
    }
}

/// A function the model may call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// JSON schema the response content must satisfy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self { name: name.into(), schema }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub response_schema: Option<ResponseSchema>,
    pub parallel_tool_calls: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, tools: Vec::new(), response_schema: None, parallel_tool_calls: false }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn structured(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolInvocation { id: id.into(), name: name.into(), arguments }],
        }
    }

    pub fn into_message(self) -> Message {
        if self.tool_calls.is_empty() {
            Message::ai(self.content)
        } else {
            Message::ai_with_tool_calls(self.content, self.tool_calls)
        }
    }

    pub fn parse_structured<T>(&self, schema: &str) -> Result<T, LlmError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(self.content.trim()).map_err(|error| LlmError::SchemaMismatch {
            schema: schema.to_string(),
            reason: error.to_string(),
        })
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// One structured-output call. Returns the decoded object and the raw response text.
pub async fn complete_structured<T, S>(
    service: &S,
    messages: Vec<Message>,
    schema: ResponseSchema,
) -> Result<(T, String), LlmError>
where
    T: DeserializeOwned,
    S: CompletionService + ?Sized,
{
    let name = schema.name.clone();
    let response =
        service.complete(CompletionRequest::new(messages).with_response_schema(schema)).await?;
    let value = response.parse_structured(&name)?;
    Ok((value, response.content))
}

/// Replays canned responses in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedCompletionService {
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<CompletionResponse, LlmError>) -> &Self {
        match self.responses.lock() {
            Ok(mut responses) => responses.push_back(response),
            Err(poisoned) => poisoned.into_inner().push_back(response),
        }
        self
    }

    pub fn push_structured(&self, value: Value) -> &Self {
        self.push(Ok(CompletionResponse::structured(&value)))
    }

    pub fn push_text(&self, content: impl Into<String>) -> &Self {
        self.push(Ok(CompletionResponse::text(content)))
    }

    pub fn push_tool_call(&self, id: &str, name: &str, arguments: Value) -> &Self {
        self.push(Ok(CompletionResponse::tool_call(id, name, arguments)))
    }

    pub fn push_error(&self, error: LlmError) -> &Self {
        self.push(Err(error))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        match self.responses.lock() {
            Ok(responses) => responses.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletionService {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| {
            Err(LlmError::InvalidResponse("scripted completion service is exhausted".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use analyst_core::domain::message::{Message, Role};

    use super::{
        complete_structured, CompletionResponse, CompletionService, LlmError, ResponseSchema,
        ScriptedCompletionService,
    };

    #[derive(Debug, Deserialize, PartialEq)]
    struct Decision {
        label: String,
    }

    #[tokio::test]
    async fn scripted_service_replays_in_order_and_records_requests() {
        let service = ScriptedCompletionService::new();
        service.push_structured(json!({"label": "memory"})).push_text("done");

        let (decision, raw) = complete_structured::<Decision, _>(
            &service,
            vec![Message::human("what do you remember?")],
            ResponseSchema::new("decision", json!({"type": "object"})),
        )
        .await
        .expect("structured response");
        assert_eq!(decision, Decision { label: "memory".to_string() });
        assert_eq!(raw, r#"{"label":"memory"}"#);

        let second = service
            .complete(super::CompletionRequest::new(vec![Message::human("next")]))
            .await
            .expect("text response");
        assert_eq!(second.into_message().role, Role::Ai);

        let requests = service.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].response_schema.as_ref().map(|schema| schema.name.as_str()),
            Some("decision")
        );
        assert!(!requests[0].parallel_tool_calls);
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let service = ScriptedCompletionService::new();
        let error = service
            .complete(super::CompletionRequest::new(Vec::new()))
            .await
            .expect_err("nothing scripted");
        assert!(matches!(error, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn malformed_structured_output_is_a_schema_mismatch() {
        let response = CompletionResponse::text("not json");
        let error = response.parse_structured::<Decision>("decision").expect_err("mismatch");
        assert!(matches!(error, LlmError::SchemaMismatch { ref schema, .. } if schema == "decision"));
    }

    #[test]
    fn retry_policy_covers_transient_failures_only() {
        assert!(LlmError::Transport("reset".to_string()).is_retryable());
        assert!(LlmError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(LlmError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(!LlmError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!LlmError::InvalidResponse("empty".to_string()).is_retryable());
    }
}

//! OpenAI-compatible chat completions client.
//!
//! Works against the public OpenAI endpoint and any server exposing the same
//! `/chat/completions` contract (for example Ollama's `/v1` surface).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use analyst_core::config::LlmConfig;
use analyst_core::domain::message::{Message, Role, ToolInvocation};

use crate::llm::{CompletionRequest, CompletionResponse, CompletionService, LlmError};

pub struct OpenAiCompletionService {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    top_p: f32,
    max_retries: u32,
}

impl OpenAiCompletionService {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Transport(format!("build http client: {error}")))?;

        Ok(Self {
            client,
            base_url: config.resolved_base_url(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_retries: config.max_retries,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAiRequest {
        let tools = (!request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|tool| OpenAiTool {
                    tool_type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect()
        });
        let parallel_tool_calls = tools.as_ref().map(|_| request.parallel_tool_calls);
        let response_format = request.response_schema.as_ref().map(|schema| {
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                }
            })
        });

        OpenAiRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(to_openai_message).collect(),
            temperature: self.temperature,
            top_p: self.top_p,
            tools,
            parallel_tool_calls,
            response_format,
        }
    }

    async fn send_once(&self, body: &OpenAiRequest) -> Result<CompletionResponse, LlmError> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response =
            builder.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<OpenAiError>(&raw)
                .map(|error| error.error.message)
                .unwrap_or(raw);
            return Err(LlmError::Http { status: status.as_u16(), body });
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(format!("decode response: {error}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolInvocation {
                    id: call.id,
                    name: call.function.name,
                    arguments: serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::String(call.function.arguments)),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionService {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(
                        event_name = "llm.request.retry",
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "retrying completion request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Exponential backoff starting at 250 ms, saturating instead of overflowing.
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(250u64.saturating_mul(2u64.saturating_pow(attempt)))
}

fn to_openai_message(message: &Message) -> OpenAiMessage {
    let role = match message.role {
        Role::System => "system",
        Role::Human => "user",
        Role::Ai => "assistant",
        Role::Tool => "tool",
    };
    let tool_calls = message.has_tool_calls().then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| OpenAiToolCall {
                id: call.id.clone(),
                call_type: "function".to_string(),
                function: OpenAiFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect()
    });

    OpenAiMessage {
        role: role.to_string(),
        content: Some(message.content.clone()),
        tool_call_id: message.tool_call_id.clone(),
        tool_calls,
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use analyst_core::config::AppConfig;
    use analyst_core::domain::message::{Message, ToolInvocation};

    use super::{retry_backoff, to_openai_message, OpenAiCompletionService, OpenAiResponse};
    use crate::llm::{CompletionRequest, ResponseSchema, ToolSpec};

    fn service() -> OpenAiCompletionService {
        let config = AppConfig::default();
        OpenAiCompletionService::from_config(&config.llm).expect("client")
    }

    #[test]
    fn retry_backoff_doubles_and_saturates() {
        assert_eq!(retry_backoff(0).as_millis(), 250);
        assert_eq!(retry_backoff(3).as_millis(), 2_000);
        assert_eq!(retry_backoff(64), std::time::Duration::from_millis(u64::MAX));
    }

    #[test]
    fn tool_requests_disable_parallel_calls() {
        let request = CompletionRequest::new(vec![Message::human("how many rows?")]).with_tools(
            vec![ToolSpec {
                name: "count_rows_tool".to_string(),
                description: "count".to_string(),
                parameters: json!({"type": "object"}),
            }],
        );

        let body = serde_json::to_value(service().build_request(&request)).expect("serialize");
        assert_eq!(body["parallel_tool_calls"], json!(false));
        assert_eq!(body["tools"][0]["function"]["name"], json!("count_rows_tool"));
        assert_eq!(body["model"], json!("gpt-4o-mini"));
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn structured_requests_carry_json_schema_without_tools() {
        let request = CompletionRequest::new(vec![Message::human("classify")])
            .with_response_schema(ResponseSchema::new("route", json!({"type": "object"})));

        let body = serde_json::to_value(service().build_request(&request)).expect("serialize");
        assert_eq!(body["response_format"]["type"], json!("json_schema"));
        assert_eq!(body["response_format"]["json_schema"]["name"], json!("route"));
        assert!(body.get("tools").is_none());
        assert!(body.get("parallel_tool_calls").is_none());
    }

    #[test]
    fn assistant_tool_calls_are_serialized_with_string_arguments() {
        let message = Message::ai_with_tool_calls(
            "",
            vec![ToolInvocation {
                id: "call_1".to_string(),
                name: "sum_tool".to_string(),
                arguments: json!({"a": 1, "b": 2}),
            }],
        );
        let encoded = serde_json::to_value(to_openai_message(&message)).expect("serialize");
        assert_eq!(encoded["role"], json!("assistant"));
        assert_eq!(encoded["tool_calls"][0]["function"]["arguments"], json!(r#"{"a":1,"b":2}"#));

        let tool = serde_json::to_value(to_openai_message(&Message::tool_result("call_1", "3")))
            .expect("serialize");
        assert_eq!(tool["role"], json!("tool"));
        assert_eq!(tool["tool_call_id"], json!("call_1"));
    }

    #[test]
    fn response_payload_decodes_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "finish_tool", "arguments": "{\"final_response\":\"42\"}"}
                    }]
                }
            }]
        });
        let parsed: OpenAiResponse = serde_json::from_value(raw).expect("decode");
        let message = &parsed.choices[0].message;
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls.as_ref().map(Vec::len), Some(1));
    }
}

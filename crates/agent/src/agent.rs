//! Bounded Agent Loop.
//!
//! One loop instance alternates a Reason step (one completion call with the
//! agent's tools bound) and an Act step (execute the requested tools in order).
//! The iteration guard runs before every Reason step, so the loop performs at
//! most `max_iterations` completion calls no matter how the model behaves.

use std::sync::Arc;

use serde_json::json;

use analyst_core::domain::message::Message;
use analyst_core::domain::turn::{render_history, TurnState, TurnUpdate};
use analyst_core::flows::{AgentKind, FlowEvent};

use crate::errors::TurnError;
use crate::llm::{CompletionRequest, CompletionService};
use crate::prompts::{PromptLibrary, PromptTemplate};
use crate::tools::{tool_specs, ToolError, ToolExecutor, ToolOutcome};

pub const MAX_ITERATIONS_MESSAGE: &str = "Maximum iterations reached. Stopping further processing.";
pub const MAX_ITERATIONS_RESPONSE: &str =
    "Sorry, the request caused too many internal steps and could not be completed.";

/// Result of one node: the delta to apply and the event that picks the next node.
#[derive(Debug)]
pub struct NodeResult {
    pub update: TurnUpdate,
    pub event: FlowEvent,
}

pub struct BoundedAgent {
    completion: Arc<dyn CompletionService>,
    prompts: Arc<PromptLibrary>,
    tools: Arc<ToolExecutor>,
    max_iterations: u32,
}

impl BoundedAgent {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        prompts: Arc<PromptLibrary>,
        tools: Arc<ToolExecutor>,
        max_iterations: u32,
    ) -> Self {
        Self { completion, prompts, tools, max_iterations }
    }

    pub async fn reason(&self, agent: AgentKind, state: &TurnState) -> Result<NodeResult, TurnError> {
        if state.iteration_count >= self.max_iterations {
            tracing::warn!(
                event_name = "turn.agent.iteration_cap",
                agent = agent.as_str(),
                iterations = state.iteration_count,
                "iteration cap reached"
            );
            return Ok(NodeResult {
                update: TurnUpdate::new()
                    .with_message(Message::ai(MAX_ITERATIONS_MESSAGE))
                    .complete(MAX_ITERATIONS_RESPONSE),
                event: FlowEvent::Completed,
            });
        }

        let system_prompt = if state.iteration_count == 0 {
            let template = match agent {
                AgentKind::Structured => PromptTemplate::StructuredAgent,
                AgentKind::Unstructured => PromptTemplate::UnstructuredAgent,
            };
            let history = render_history(&state.condensed_history);
            Some(Message::system(self.prompts.render(template, &json!({"history": history}))?))
        } else {
            None
        };

        let mut messages = Vec::with_capacity(state.message_log.len() + 1);
        messages.extend(system_prompt.iter().cloned());
        messages.extend(state.message_log.iter().cloned());

        let response = self
            .completion
            .complete(CompletionRequest::new(messages).with_tools(tool_specs(agent)))
            .await?;
        let event = if response.tool_calls.is_empty() {
            FlowEvent::NoToolCalls
        } else {
            FlowEvent::ToolCallsRequested
        };
        tracing::debug!(
            event_name = "turn.agent.reason",
            agent = agent.as_str(),
            iteration = state.iteration_count + 1,
            tool_calls = response.tool_calls.len(),
            "reasoning step finished"
        );

        let update = TurnUpdate::new()
            .with_messages(system_prompt)
            .with_message(response.into_message())
            .advance_iteration();
        Ok(NodeResult { update, event })
    }

    /// Executes the tool calls of the latest model message in request order.
    pub async fn act(&self, agent: AgentKind, state: &TurnState) -> Result<NodeResult, TurnError> {
        let invocations = state
            .message_log
            .last()
            .filter(|message| message.has_tool_calls())
            .map(|message| message.tool_calls.clone())
            .unwrap_or_default();

        let mut view = state.dataset_view.clone();
        let mut update = TurnUpdate::new();
        let mut completion: Option<String> = None;
        let mut view_changed = false;

        for invocation in &invocations {
            let outcome = if completion.is_some() || state.is_complete {
                ToolOutcome::rejected(ToolError::TurnComplete(invocation.name.clone()))
            } else {
                self.tools.execute(agent, invocation, &view).await?
            };

            match &outcome.rejection {
                Some(error) => tracing::warn!(
                    event_name = "turn.tool.rejected",
                    tool = %invocation.name,
                    tool_call_id = %invocation.id,
                    error_kind = error.kind(),
                    error = %error,
                    "tool input error returned to the agent"
                ),
                None => tracing::debug!(
                    event_name = "turn.tool.executed",
                    tool = %invocation.name,
                    tool_call_id = %invocation.id,
                    "tool executed"
                ),
            }

            if let Some(next) = outcome.view {
                view = next;
                view_changed = true;
            }
            if completion.is_none() {
                completion = outcome.completion;
            }
            update = update
                .with_message(Message::tool_result(invocation.id.clone(), outcome.payload.to_string()));
        }

        if view_changed {
            update = update.with_view(view);
        }
        let event = match completion {
            Some(final_response) => {
                update = update.complete(final_response);
                FlowEvent::Completed
            }
            None => FlowEvent::Continue,
        };
        Ok(NodeResult { update, event })
    }
}

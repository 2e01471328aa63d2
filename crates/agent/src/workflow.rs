//! Drives one turn through the validated transition table.

use std::sync::Arc;

use analyst_core::audit::{AuditCategory, AuditOutcome};
use analyst_core::config::AgentConfig;
use analyst_core::domain::turn::TurnState;
use analyst_core::errors::DomainError;
use analyst_core::flows::{AgentKind, FlowEngine, FlowEvent, FlowTransitionError, TurnFlow, WorkflowNode};
use analyst_db::MemoryStore;

use crate::agent::{BoundedAgent, NodeResult};
use crate::context::TurnContext;
use crate::errors::TurnError;
use crate::llm::CompletionService;
use crate::memory::MemoryNodes;
use crate::out_of_scope::OutOfScopeResponder;
use crate::prompts::PromptLibrary;
use crate::router::QueryRouter;
use crate::runtime::WriteStatus;
use crate::summarize::Summarizer;
use crate::tools::ToolExecutor;

/// Final state of a turn that reached `End`, plus the nodes it visited.
#[derive(Debug)]
pub struct WorkflowRun {
    pub state: TurnState,
    pub memory: WriteStatus,
    pub path: Vec<WorkflowNode>,
}

pub struct Workflow {
    engine: FlowEngine<TurnFlow>,
    router: QueryRouter,
    agent: BoundedAgent,
    out_of_scope: OutOfScopeResponder,
    memory: MemoryNodes,
}

impl Workflow {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        prompts: Arc<PromptLibrary>,
        memory_store: Arc<dyn MemoryStore>,
        config: &AgentConfig,
    ) -> Result<Self, FlowTransitionError> {
        let summarizer = Summarizer::new(config.summary_batch_size, config.summary_batch_count);
        let tools = Arc::new(ToolExecutor::new(completion.clone(), prompts.clone(), summarizer));
        Ok(Self {
            engine: FlowEngine::new(TurnFlow::new()?),
            router: QueryRouter::new(completion.clone(), prompts.clone()),
            agent: BoundedAgent::new(completion.clone(), prompts.clone(), tools, config.max_iterations),
            out_of_scope: OutOfScopeResponder::new(completion.clone(), prompts.clone()),
            memory: MemoryNodes::new(
                completion,
                prompts,
                memory_store,
                config.memory_save_limit,
                config.memory_read_limit,
            ),
        })
    }

    pub async fn run(&self, context: &TurnContext, state: TurnState) -> Result<WorkflowRun, TurnError> {
        let mut state = state;
        let mut node = self.engine.initial_node();
        let mut path = vec![node];
        let mut memory = WriteStatus::Skipped;

        while !node.is_terminal() {
            let NodeResult { update, event } = match node {
                WorkflowNode::Router => {
                    let update = self.router.classify(&state).await?;
                    let label = update.classification.as_ref().map(|c| c.label).ok_or_else(|| {
                        DomainError::InvariantViolation("router produced no classification".to_string())
                    })?;
                    context.emit(
                        context
                            .event("router", "turn.router.classified", AuditCategory::Routing, AuditOutcome::Success)
                            .with_metadata("label", label.as_str()),
                    );
                    NodeResult { update, event: FlowEvent::Classified(label) }
                }
                WorkflowNode::StructuredAgent => self.agent.reason(AgentKind::Structured, &state).await?,
                WorkflowNode::StructuredTools => self.agent.act(AgentKind::Structured, &state).await?,
                WorkflowNode::UnstructuredAgent => self.agent.reason(AgentKind::Unstructured, &state).await?,
                WorkflowNode::UnstructuredTools => self.agent.act(AgentKind::Unstructured, &state).await?,
                WorkflowNode::OutOfScope => {
                    NodeResult { update: self.out_of_scope.respond(&state).await?, event: FlowEvent::Completed }
                }
                WorkflowNode::ReadMemory => {
                    NodeResult { update: self.memory.read(context, &state).await?, event: FlowEvent::Completed }
                }
                WorkflowNode::SaveMemory => {
                    let (update, status) = self.memory.save(context, &state).await?;
                    memory = status;
                    NodeResult { update, event: FlowEvent::MemorySettled }
                }
                WorkflowNode::End => break,
            };

            state = state.apply(update)?;
            let outcome =
                self.engine.apply_with_audit(node, event, context.sink(), context.audit_context())?;
            tracing::debug!(
                event_name = "turn.workflow.transition",
                correlation_id = %context.correlation_id,
                from = outcome.from.as_str(),
                to = outcome.to.as_str(),
                event = ?outcome.event,
                iteration = state.iteration_count,
                "node finished"
            );
            node = outcome.to;
            path.push(node);
        }

        Ok(WorkflowRun { state, memory, path })
    }
}

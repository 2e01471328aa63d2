use std::collections::{BTreeMap, BTreeSet, VecDeque};

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::turn::QueryLabel;
use crate::flows::states::{FlowEvent, TransitionOutcome, WorkflowNode};

pub trait FlowDefinition {
    fn initial_node(&self) -> WorkflowNode;
    fn transition(
        &self,
        current: WorkflowNode,
        event: FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {node:?} using event {event:?}")]
    InvalidTransition { node: WorkflowNode, event: FlowEvent },
    #[error("node {node:?} has no transition for events {events:?}")]
    MissingTransitions { node: WorkflowNode, events: Vec<FlowEvent> },
    #[error("terminal node must not have outgoing transitions (found {event:?})")]
    TerminalHasTransitions { event: FlowEvent },
    #[error("node {node:?} cannot reach the terminal node")]
    TerminalUnreachable { node: WorkflowNode },
}

/// Transition table keyed by `(current node, event)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionTable {
    initial: WorkflowNode,
    entries: BTreeMap<(WorkflowNode, FlowEvent), WorkflowNode>,
}

impl TransitionTable {
    pub fn new(initial: WorkflowNode) -> Self {
        Self { initial, entries: BTreeMap::new() }
    }

    pub fn with(mut self, from: WorkflowNode, event: FlowEvent, to: WorkflowNode) -> Self {
        self.entries.insert((from, event), to);
        self
    }

    /// router -> {agent <-> tools | out_of_scope | read_memory} -> save_memory -> end
    pub fn turn_workflow() -> Self {
        use FlowEvent::{Classified, Completed, Continue, MemorySettled, NoToolCalls, ToolCallsRequested};
        use WorkflowNode::{
            End, OutOfScope, ReadMemory, Router, SaveMemory, StructuredAgent, StructuredTools,
            UnstructuredAgent, UnstructuredTools,
        };

        Self::new(Router)
            .with(Router, Classified(QueryLabel::Structured), StructuredAgent)
            .with(Router, Classified(QueryLabel::Unstructured), UnstructuredAgent)
            .with(Router, Classified(QueryLabel::OutOfScope), OutOfScope)
            .with(Router, Classified(QueryLabel::Memory), ReadMemory)
            .with(StructuredAgent, ToolCallsRequested, StructuredTools)
            .with(StructuredAgent, NoToolCalls, StructuredAgent)
            .with(StructuredAgent, Completed, SaveMemory)
            .with(StructuredTools, Continue, StructuredAgent)
            .with(StructuredTools, Completed, SaveMemory)
            .with(UnstructuredAgent, ToolCallsRequested, UnstructuredTools)
            .with(UnstructuredAgent, NoToolCalls, UnstructuredAgent)
            .with(UnstructuredAgent, Completed, SaveMemory)
            .with(UnstructuredTools, Continue, UnstructuredAgent)
            .with(UnstructuredTools, Completed, SaveMemory)
            .with(OutOfScope, Completed, SaveMemory)
            .with(ReadMemory, Completed, SaveMemory)
            .with(SaveMemory, MemorySettled, End)
    }

    pub fn initial(&self) -> WorkflowNode {
        self.initial
    }

    pub fn next(&self, node: WorkflowNode, event: FlowEvent) -> Option<WorkflowNode> {
        self.entries.get(&(node, event)).copied()
    }

    /// Checks that every reachable node handles all of its discriminants and
    /// that the terminal node is reachable from each of them.
    pub fn validate(&self) -> Result<(), FlowTransitionError> {
        if let Some(((_, event), _)) =
            self.entries.iter().find(|((from, _), _)| from.is_terminal())
        {
            return Err(FlowTransitionError::TerminalHasTransitions { event: *event });
        }

        let reachable = self.reachable_from(self.initial);
        for node in &reachable {
            let missing = node
                .required_events()
                .into_iter()
                .filter(|event| !self.entries.contains_key(&(*node, *event)))
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                return Err(FlowTransitionError::MissingTransitions { node: *node, events: missing });
            }
        }

        for node in &reachable {
            if !self.reachable_from(*node).contains(&WorkflowNode::End) {
                return Err(FlowTransitionError::TerminalUnreachable { node: *node });
            }
        }

        Ok(())
    }

    fn reachable_from(&self, start: WorkflowNode) -> BTreeSet<WorkflowNode> {
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for ((from, _), to) in &self.entries {
                if *from == node && seen.insert(*to) {
                    queue.push_back(*to);
                }
            }
        }
        seen
    }
}

/// The per-turn workflow; construction validates the table.
#[derive(Clone, Debug)]
pub struct TurnFlow {
    table: TransitionTable,
}

impl TurnFlow {
    pub fn new() -> Result<Self, FlowTransitionError> {
        Self::from_table(TransitionTable::turn_workflow())
    }

    pub fn from_table(table: TransitionTable) -> Result<Self, FlowTransitionError> {
        table.validate()?;
        Ok(Self { table })
    }
}

impl FlowDefinition for TurnFlow {
    fn initial_node(&self) -> WorkflowNode {
        self.table.initial()
    }

    fn transition(
        &self,
        current: WorkflowNode,
        event: FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let to = self
            .table
            .next(current, event)
            .ok_or(FlowTransitionError::InvalidTransition { node: current, event })?;
        Ok(TransitionOutcome { from: current, to, event })
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_node(&self) -> WorkflowNode {
        self.flow.initial_node()
    }

    pub fn apply(
        &self,
        current: WorkflowNode,
        event: FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: WorkflowNode,
        event: FlowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(audit, "workflow.transition_applied", AuditCategory::Workflow, AuditOutcome::Success)
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(audit, "workflow.transition_rejected", AuditCategory::Workflow, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

use serde::{Deserialize, Serialize};

use crate::domain::turn::QueryLabel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Structured,
    Unstructured,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Unstructured => "unstructured",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNode {
    Router,
    StructuredAgent,
    StructuredTools,
    UnstructuredAgent,
    UnstructuredTools,
    OutOfScope,
    ReadMemory,
    SaveMemory,
    End,
}

impl WorkflowNode {
    pub const ALL: [WorkflowNode; 9] = [
        WorkflowNode::Router,
        WorkflowNode::StructuredAgent,
        WorkflowNode::StructuredTools,
        WorkflowNode::UnstructuredAgent,
        WorkflowNode::UnstructuredTools,
        WorkflowNode::OutOfScope,
        WorkflowNode::ReadMemory,
        WorkflowNode::SaveMemory,
        WorkflowNode::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::StructuredAgent => "structured_agent",
            Self::StructuredTools => "structured_tools",
            Self::UnstructuredAgent => "unstructured_agent",
            Self::UnstructuredTools => "unstructured_tools",
            Self::OutOfScope => "out_of_scope",
            Self::ReadMemory => "read_memory",
            Self::SaveMemory => "save_memory",
            Self::End => "end",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Discriminants every non-terminal node must handle.
    pub fn required_events(&self) -> Vec<FlowEvent> {
        match self {
            Self::Router => QueryLabel::ALL.iter().copied().map(FlowEvent::Classified).collect(),
            Self::StructuredAgent | Self::UnstructuredAgent => {
                vec![FlowEvent::ToolCallsRequested, FlowEvent::NoToolCalls, FlowEvent::Completed]
            }
            Self::StructuredTools | Self::UnstructuredTools => {
                vec![FlowEvent::Continue, FlowEvent::Completed]
            }
            Self::OutOfScope | Self::ReadMemory => vec![FlowEvent::Completed],
            Self::SaveMemory => vec![FlowEvent::MemorySettled],
            Self::End => Vec::new(),
        }
    }
}

/// The discriminant a node reports after it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    Classified(QueryLabel),
    ToolCallsRequested,
    NoToolCalls,
    Continue,
    Completed,
    MemorySettled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WorkflowNode,
    pub to: WorkflowNode,
    pub event: FlowEvent,
}

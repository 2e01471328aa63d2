pub mod audit;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use dataset::{BaseTable, Column, ColumnFilter, DatasetError, DatasetRecord, DatasetView, Predicate};
pub use domain::memory::{render_memories, MemoryEntry, NO_MEMORIES_SENTINEL};
pub use domain::message::{Message, Role, ToolInvocation};
pub use domain::thread::{HistoryEntry, ThreadId, ThreadKey, ThreadSummary, UserId};
pub use domain::turn::{
    render_history, Classification, HistoryLine, QueryLabel, TurnCheckpoint, TurnState,
    TurnUpdate, NO_HISTORY_SENTINEL,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{AgentKind, FlowDefinition, FlowEngine, FlowEvent, FlowTransitionError, TurnFlow, WorkflowNode};

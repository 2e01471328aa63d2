pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, TransitionTable, TurnFlow};
pub use states::{AgentKind, FlowEvent, TransitionOutcome, WorkflowNode};

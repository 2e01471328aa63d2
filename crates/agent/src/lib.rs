//! Dialogue orchestration for the data analyst.
//!
//! A turn enters through [`runtime::AgentRuntime::process_turn`] and walks the
//! validated workflow table:
//!
//! 1. **Router** (`router`) labels the query with one structured completion call.
//! 2. **Agents** (`agent`) alternate reasoning and tool execution (`tools`,
//!    `summarize`) under an iteration cap, or the out-of-scope responder
//!    (`out_of_scope`) and the memory reader (`memory`) answer directly.
//! 3. **Save memory** (`memory`) runs on every path before the turn ends.
//!
//! Nodes never mutate the turn state; they return `TurnUpdate` deltas that the
//! workflow applies in order. Only the final checkpoint and history entry are
//! persisted.

pub mod agent;
pub mod context;
pub mod errors;
pub mod llm;
pub mod memory;
pub mod openai;
pub mod out_of_scope;
pub mod prompts;
pub mod router;
pub mod runtime;
pub mod summarize;
pub mod tools;
pub mod workflow;

pub use errors::TurnError;
pub use llm::{CompletionService, LlmError, ScriptedCompletionService};
pub use openai::OpenAiCompletionService;
pub use runtime::{
    AgentRuntime, PersistenceReport, Removal, RuntimeStores, TurnReply, TurnRequest, WriteStatus,
};

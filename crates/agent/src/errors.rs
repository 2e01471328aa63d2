use thiserror::Error;

use analyst_core::domain::thread::ThreadKey;
use analyst_core::errors::{ApplicationError, DomainError};
use analyst_core::flows::FlowTransitionError;
use analyst_db::RepositoryError;

use crate::llm::LlmError;
use crate::prompts::PromptError;

/// Failures that abort a turn. Nothing is persisted when one of these is returned.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("user query must not be empty")]
    EmptyQuery,
    #[error(transparent)]
    Completion(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("checkpoint for `{key}` could not be loaded: {source}")]
    Checkpoint { key: ThreadKey, source: RepositoryError },
}

impl From<FlowTransitionError> for TurnError {
    fn from(value: FlowTransitionError) -> Self {
        Self::Domain(DomainError::from(value))
    }
}

impl From<TurnError> for ApplicationError {
    fn from(value: TurnError) -> Self {
        match value {
            error @ TurnError::EmptyQuery => ApplicationError::InvalidRequest(error.to_string()),
            TurnError::Completion(error) => ApplicationError::Integration(error.to_string()),
            TurnError::Prompt(error) => ApplicationError::Configuration(error.to_string()),
            TurnError::Domain(error) => ApplicationError::Domain(error),
            error @ TurnError::Checkpoint { .. } => ApplicationError::Persistence(error.to_string()),
        }
    }
}

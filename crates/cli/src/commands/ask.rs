use std::sync::Arc;

use analyst_agent::{AgentRuntime, OpenAiCompletionService, RuntimeStores, TurnError, TurnRequest};
use analyst_core::audit::TracingAuditSink;
use analyst_core::dataset::BaseTable;
use analyst_core::errors::{ApplicationError, InterfaceError};
use serde_json::json;

use crate::commands::{block_on, init_logging, load_config, open_database, CommandFailure, CommandResult};

#[derive(Debug, Clone)]
pub struct AskArgs {
    pub user: Option<String>,
    pub thread: Option<String>,
    pub reset: bool,
    pub question: String,
}

pub fn run(args: AskArgs) -> CommandResult {
    if args.question.trim().is_empty() {
        return CommandResult::failure("ask", "bad_request", "question must not be empty", 9);
    }

    let config = match load_config("ask") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    init_logging(&config);

    let base = match BaseTable::load(&config.dataset.path) {
        Ok(table) => Arc::new(table),
        Err(error) => return CommandResult::failure("ask", "dataset_load", error.to_string(), 6),
    };
    let completion = match OpenAiCompletionService::from_config(&config.llm) {
        Ok(service) => Arc::new(service),
        Err(error) => return CommandResult::failure("ask", "llm_client", error.to_string(), 7),
    };

    let result = block_on("ask", async move {
        let pool = open_database(&config).await?;
        let stores = RuntimeStores::sqlite(pool.clone());

        let user_id = match args.user {
            Some(user_id) => user_id,
            None => stores
                .registry
                .generate_user_id("user")
                .await
                .map_err(|error| ("registry", error.to_string(), 4u8))?
                .0,
        };
        let thread_id = match args.thread {
            Some(thread_id) => thread_id,
            None => stores
                .registry
                .generate_thread_id("thread")
                .await
                .map_err(|error| ("registry", error.to_string(), 4u8))?
                .0,
        };

        let runtime =
            AgentRuntime::new(base, completion, stores, Arc::new(TracingAuditSink), &config.agent)
                .map_err(|error| ("runtime_init", error.to_string(), 8u8))?;
        let mut request = TurnRequest::new(args.question, user_id.clone(), thread_id.clone());
        if args.reset {
            request = request.with_reset();
        }

        let outcome = runtime.process_turn(request).await;
        pool.close().await;
        let reply = outcome.map_err(turn_failure)?;
        Ok::<_, CommandFailure>((user_id, thread_id, reply))
    });

    match result {
        Ok((user_id, thread_id, reply)) => CommandResult::success_with_data(
            "ask",
            reply.response.clone(),
            Some(json!({
                "user_id": user_id,
                "thread_id": thread_id,
                "correlation_id": reply.correlation_id,
                "label": reply.label,
                "iterations": reply.iterations,
                "memory_saved": reply.memory_saved,
                "persistence": reply.persistence,
            })),
        ),
        Err(failure) => failure,
    }
}

fn turn_failure(error: TurnError) -> CommandFailure {
    let detail = error.to_string();
    let interface = ApplicationError::from(error).into_interface("cli");
    let (error_class, exit_code) = match interface {
        InterfaceError::BadRequest { .. } => ("bad_request", 9),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 10),
        InterfaceError::Internal { .. } => ("internal", 11),
    };
    (error_class, format!("{} ({detail})", interface.user_message()), exit_code)
}

use std::sync::Arc;

use analyst_agent::{AgentRuntime, PersistenceReport, TurnReply, TurnRequest};
use analyst_core::domain::turn::QueryLabel;
use analyst_core::errors::{ApplicationError, InterfaceError};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct TurnsState {
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnResponse {
    pub response: String,
    pub correlation_id: String,
    pub label: QueryLabel,
    pub iterations: u32,
    pub memory_saved: bool,
    pub persistence: PersistenceReport,
}

impl From<TurnReply> for TurnResponse {
    fn from(reply: TurnReply) -> Self {
        Self {
            response: reply.response,
            correlation_id: reply.correlation_id,
            label: reply.label,
            iterations: reply.iterations,
            memory_saved: reply.memory_saved,
            persistence: reply.persistence,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnErrorBody {
    pub error: &'static str,
    pub message: &'static str,
    pub correlation_id: String,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/v1/turns", post(create_turn)).with_state(TurnsState { runtime })
}

pub async fn create_turn(
    State(state): State<TurnsState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, Json<TurnErrorBody>)> {
    let user_id = request.user_id.clone();
    let thread_id = request.thread_id.clone();

    match state.runtime.process_turn(request).await {
        Ok(reply) => {
            if reply.persistence.has_failures() {
                warn!(
                    event_name = "api.turn.persistence_degraded",
                    correlation_id = %reply.correlation_id,
                    user_id = %user_id,
                    thread_id = %thread_id,
                    "turn answered but not every store write succeeded"
                );
            }
            Ok(Json(TurnResponse::from(reply)))
        }
        Err(turn_error) => {
            let correlation_id = Uuid::new_v4().to_string();
            let failure = ApplicationError::from(turn_error);
            error!(
                event_name = "api.turn.failed",
                correlation_id = %correlation_id,
                user_id = %user_id,
                thread_id = %thread_id,
                retryable = failure.is_retryable(),
                error = %failure,
                "turn request failed"
            );
            Err(error_response(&failure.into_interface(correlation_id)))
        }
    }
}

fn error_response(interface: &InterfaceError) -> (StatusCode, Json<TurnErrorBody>) {
    let (status, error) = match interface {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    let body = TurnErrorBody {
        error,
        message: interface.user_message(),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status, Json(body))
}

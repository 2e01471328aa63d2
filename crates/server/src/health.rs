use std::sync::Arc;

use analyst_core::dataset::BaseTable;
use analyst_db::DbPool;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub base: Arc<BaseTable>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: Readiness,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub dataset: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let dataset = dataset_check(&state.base);
    let database = database_check(&state.db_pool).await;
    let ready = dataset.status == Readiness::Ready && database.status == Readiness::Ready;

    let payload = HealthResponse {
        status: if ready { Readiness::Ready } else { Readiness::Degraded },
        dataset,
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn dataset_check(base: &BaseTable) -> HealthCheck {
    if base.is_empty() {
        return HealthCheck { status: Readiness::Degraded, detail: "base table is empty".to_string() };
    }
    HealthCheck { status: Readiness::Ready, detail: format!("{} records loaded", base.len()) }
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: Readiness::Ready, detail: "database query succeeded".to_string() },
        Err(error) => HealthCheck {
            status: Readiness::Degraded,
            detail: format!("database query failed: {error}"),
        },
    }
}

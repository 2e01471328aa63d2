use std::sync::Arc;

use analyst_agent::{
    AgentRuntime, CompletionService, LlmError, OpenAiCompletionService, RuntimeStores, TurnError,
};
use analyst_core::audit::TracingAuditSink;
use analyst_core::config::AppConfig;
use analyst_core::dataset::{BaseTable, DatasetError};
use analyst_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("dataset load failed: {0}")]
    Dataset(#[source] DatasetError),
    #[error("completion client setup failed: {0}")]
    Completion(#[source] LlmError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent runtime setup failed: {0}")]
    Runtime(#[source] TurnError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let completion =
        OpenAiCompletionService::from_config(&config.llm).map_err(BootstrapError::Completion)?;
    bootstrap_with_completion(config, Arc::new(completion)).await
}

/// Brings up storage and the runtime around an already-built completion client.
pub async fn bootstrap_with_completion(
    config: AppConfig,
    completion: Arc<dyn CompletionService>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let base = BaseTable::load(&config.dataset.path).map_err(BootstrapError::Dataset)?;
    info!(
        event_name = "system.bootstrap.dataset_loaded",
        correlation_id = "bootstrap",
        records = base.len(),
        path = %config.dataset.path.display(),
        "base table loaded"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runtime = AgentRuntime::new(
        Arc::new(base),
        completion,
        RuntimeStores::sqlite(db_pool.clone()),
        Arc::new(TracingAuditSink),
        &config.agent,
    )
    .map_err(BootstrapError::Runtime)?;

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hirewire_agent::tools::job_search::{SearchError, SerpApiProvider};
use hirewire_agent::{OpenAiRunner, Orchestrator, OrchestratorDeps, OrchestratorSettings, RunError};
use hirewire_core::config::AppConfig;
use hirewire_db::repositories::{
    SqlAppliedJobRepository, SqlConversationRepository, SqlCrmRepository,
    SqlModelSettingsRepository,
};
use hirewire_db::{connect_from_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::routes;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

impl Application {
    pub fn router(&self) -> Router {
        routes::router(Arc::clone(&self.orchestrator), self.db_pool.clone())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model provider setup failed: {0}")]
    Provider(#[source] RunError),
    #[error("search provider setup failed: {0}")]
    Search(#[source] SearchError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let runner = Arc::new(OpenAiRunner::from_config(&config.llm).map_err(BootstrapError::Provider)?);
    let search_provider = Arc::new(
        SerpApiProvider::new(
            config.search.url.clone(),
            config.search.api_key.clone(),
            Duration::from_secs(config.search.timeout_secs),
        )
        .map_err(BootstrapError::Search)?,
    );

    let deps = OrchestratorDeps {
        runner: runner.clone(),
        judge: runner,
        search_provider,
        conversations: Arc::new(SqlConversationRepository::new(db_pool.clone())),
        applied_jobs: Arc::new(SqlAppliedJobRepository::new(db_pool.clone())),
        model_settings: Arc::new(SqlModelSettingsRepository::new(db_pool.clone())),
        crm: Arc::new(SqlCrmRepository::new(db_pool.clone())),
    };
    let orchestrator = Arc::new(Orchestrator::new(deps, OrchestratorSettings::from_config(&config)));
    info!(
        event_name = "system.bootstrap.orchestrator_ready",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        tiers = config.tiers.len(),
        "orchestrator ready"
    );

    Ok(Application { config, db_pool, orchestrator })
}

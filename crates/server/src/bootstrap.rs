use std::sync::Arc;
use std::time::Duration;

use leadflow_core::config::{AppConfig, ConfigError, LoadOptions};
use leadflow_db::repositories::{
    SqlClientRepository, SqlCommandeRepository, SqlDeliveryRepository, SqlLeadRepository,
    SqlSettingsRepository,
};
use leadflow_db::{connect_with_settings, migrations, DbPool};
use leadflow_routing::{RoutingEngine, RoutingEngineConfig};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<RoutingEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let engine = Arc::new(RoutingEngine::new(
        Arc::new(SqlLeadRepository::new(db_pool.clone())),
        Arc::new(SqlClientRepository::new(db_pool.clone())),
        Arc::new(SqlCommandeRepository::new(db_pool.clone())),
        Arc::new(SqlDeliveryRepository::new(db_pool.clone())),
        Arc::new(SqlSettingsRepository::new(db_pool.clone())),
        RoutingEngineConfig {
            candidate_window: config.routing.backlog_candidate_window,
            overlap_timeout: Duration::from_millis(config.routing.overlap_timeout_ms),
        },
    ));

    Ok(Application { config, db_pool, engine })
}

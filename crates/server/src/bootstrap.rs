use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use citabot_core::config::{AppConfig, ConfigError, LoadOptions};
use citabot_db::{connect_with_settings, migrations, DbPool, RetentionSweeper, SqlAuditSink};
use citabot_orchestrator::Orchestrator;
use citabot_providers::IntegrationHub;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub hub: Arc<IntegrationHub>,
    pub orchestrator: Arc<Orchestrator>,
    pub audit_sink: SqlAuditSink,
    pub sweeper: Arc<RetentionSweeper>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("prompt template compilation failed: {0}")]
    PromptTemplates(#[source] tera::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    // The store is the one hard dependency: without it the orchestrator has
    // no state and startup fails here rather than per-request.
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

    let hub = Arc::new(
        IntegrationHub::from_config(&config, db_pool.clone())
            .map_err(BootstrapError::PromptTemplates)?,
    );
    info!(
        event_name = "system.bootstrap.hub_wired",
        correlation_id = "bootstrap",
        messaging = hub.messaging_configured(),
        ai = hub.ai_configured(),
        scheduling = hub.scheduling_configured(),
        "integration hub wired from configured capabilities"
    );

    let audit_sink = SqlAuditSink::spawn(db_pool.clone());
    let orchestrator = Arc::new(Orchestrator::from_pool(
        Arc::clone(&hub),
        db_pool.clone(),
        Arc::new(audit_sink.clone()),
        &config.conversation,
    ));
    let sweeper = Arc::new(RetentionSweeper::new(db_pool.clone(), &config.retention));

    Ok(Application { config, db_pool, hub, orchestrator, audit_sink, sweeper })
}

#[cfg(test)]
mod tests {
    use citabot_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap, bootstrap_with_config};

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_retention_windows() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                retention_conversation_days: Some(400),
                retention_audit_floor_days: Some(100),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("invalid retention must fail").to_string();
        assert!(message.contains("audit_floor_days"));
    }

    #[tokio::test]
    async fn bootstrap_creates_schema_and_wires_an_unconfigured_hub() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        config.llm.api_key = None;
        config.llm.base_url = None;

        let app = bootstrap_with_config(config).await.expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('clients', 'conversations', 'messages', 'appointments', 'audit_log')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected baseline tables after bootstrap");
        assert_eq!(table_count, 5, "bootstrap should expose the persisted-state layout");

        assert!(!app.hub.messaging_configured());
        assert!(!app.hub.ai_configured());
        assert!(!app.hub.scheduling_configured());

        app.db_pool.close().await;
    }
}

use std::sync::Arc;

use pgben_core::config::{AppConfig, ConfigError};
use pgben_core::notifications::TracingNotificationDispatcher;
use pgben_db::{build_services, connect_with_config, migrations, DbPool, RepositoryError, Services};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Services,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("service wiring failed: {0}")]
    Services(#[source] RepositoryError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        database_url = %config.database.url,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        schema_version = migrations::latest_version().unwrap_or_default(),
        "database migrations applied"
    );

    let services = build_services(&db_pool, &config, Arc::new(TracingNotificationDispatcher))
        .await
        .map_err(BootstrapError::Services)?;

    Ok(Application { config, db_pool, services })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use pgben_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use pgben_core::domain::approval::CriticalActionType;
    use pgben_core::domain::workflow::{RequestId, StageCode, WorkflowDefinitionId};
    use pgben_core::flows::WorkflowDefinition;

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/pgben".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrapped_services_cover_both_engines() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('approval_case', 'workflow_state')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema should be queryable");
        assert_eq!(table_count, 2);

        // No approvers are registered, so the default policy cannot reach quorum.
        let opened = app
            .services
            .approvals
            .open(CriticalActionType::BlockBenefit, "u-1", json!({ "benefit_id": "B-7" }))
            .await;
        assert!(opened.is_err(), "opening without approvers should fail");

        let definition = WorkflowDefinition::standard("wf-boot", "cesta-basica");
        app.services.workflows.register_definition(&definition).await.expect("register");
        let request_id = RequestId("REQ-BOOT-1".to_string());
        let state = app
            .services
            .workflows
            .start(&request_id, &WorkflowDefinitionId("wf-boot".to_string()))
            .await
            .expect("start");
        assert_eq!(state.current_stage, StageCode::Rascunho);

        let report = app.services.scheduler.tick(chrono::Utc::now()).await.expect("tick");
        assert!(report.expired.is_empty());
        assert!(report.overdue_notified.is_empty());

        app.db_pool.close().await;
    }
}

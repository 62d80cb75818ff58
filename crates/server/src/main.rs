mod bootstrap;
mod health;
mod scheduler;

use std::time::Duration;

use anyhow::Result;
use pgben_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

use crate::scheduler::SchedulerStatus;

fn init_logging(config: &AppConfig) {
    use pgben_core::config::LogFormat::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let status = SchedulerStatus::new(app.config.scheduler.enabled);
    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        status.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = if app.config.scheduler.enabled {
        Some(scheduler::spawn(
            app.services.scheduler.clone(),
            Duration::from_secs(app.config.scheduler.tick_interval_secs),
            status,
            shutdown_rx,
        ))
    } else {
        tracing::info!(
            event_name = "system.scheduler.disabled",
            "escalation scheduler disabled by configuration"
        );
        None
    };

    tracing::info!(
        event_name = "system.server.started",
        default_strategy = app.config.approvals.default_strategy.as_str(),
        "pgben-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "pgben-server stopping");

    shutdown_tx.send_replace(true);
    if let Some(task) = scheduler_task {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, task).await.is_err() {
            tracing::warn!(
                event_name = "system.scheduler.shutdown_timeout",
                grace_secs = grace.as_secs(),
                "escalation scheduler did not stop within the grace period"
            );
        }
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

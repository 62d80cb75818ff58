use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use pgben_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

use crate::scheduler::SchedulerStatus;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    scheduler: SchedulerStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub scheduler: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, scheduler: SchedulerStatus) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, scheduler })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    scheduler: SchedulerStatus,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, scheduler)).await {
            error!(
                event_name = "system.health.error",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let scheduler = scheduler_check(&state.scheduler);
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "pgben-server runtime initialized".to_string(),
        },
        database,
        scheduler,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn scheduler_check(status: &SchedulerStatus) -> HealthCheck {
    if !status.enabled() {
        return HealthCheck { status: "disabled", detail: "escalation loop is off".to_string() };
    }
    let last = status.snapshot();
    match (last.last_ran_at, last.last_error) {
        (None, _) => HealthCheck { status: "starting", detail: "no tick has run yet".to_string() },
        (Some(ran_at), None) => HealthCheck {
            status: "ready",
            detail: format!(
                "{} ticks ({} expired, {} overdue), last at {}",
                last.ticks,
                last.expired_total,
                last.overdue_total,
                ran_at.to_rfc3339()
            ),
        },
        (Some(ran_at), Some(error)) => HealthCheck {
            status: "degraded",
            detail: format!("last tick at {} failed: {error}", ran_at.to_rfc3339()),
        },
    }
}

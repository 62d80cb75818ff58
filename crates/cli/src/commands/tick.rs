use std::sync::Arc;

use chrono::{DateTime, Utc};
use pgben_core::notifications::TracingNotificationDispatcher;
use pgben_db::{build_services, connect_with_config, migrations};

use crate::commands::{load_config, runtime, CommandFailure, CommandResult};

/// Runs a single escalation pass, as of `at` (RFC3339) or the current time.
pub fn run(at: Option<String>) -> CommandResult {
    let now = match parse_instant(at.as_deref()) {
        Ok(now) => now,
        Err(message) => return CommandResult::failure("tick", "invalid_input", message, 7),
    };
    let config = match load_config("tick") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("tick") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let services = build_services(&pool, &config, Arc::new(TracingNotificationDispatcher))
            .await
            .map_err(|error| ("runtime_init", error.to_string(), 3u8))?;
        let report = services
            .scheduler
            .tick(now)
            .await
            .map_err(|error| ("tick", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<_, CommandFailure>(report)
    });

    match result {
        Ok(report) => {
            let message = format!(
                "tick complete: {} expired, {} overdue, {} failed",
                report.expired.len(),
                report.overdue_notified.len(),
                report.failures.len()
            );
            CommandResult::success_with("tick", message, serde_json::to_value(&report).ok())
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("tick", error_class, message, exit_code)
        }
    }
}

fn parse_instant(raw: Option<&str>) -> Result<DateTime<Utc>, String> {
    match raw {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|instant| instant.with_timezone(&Utc))
            .map_err(|error| format!("`--at` must be an RFC3339 timestamp: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::parse_instant;

    #[test]
    fn explicit_instant_is_normalized_to_utc() {
        let parsed = parse_instant(Some("2026-05-04T09:00:00-03:00")).expect("parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap());
    }

    #[test]
    fn malformed_instant_is_rejected() {
        let error = parse_instant(Some("yesterday")).expect_err("should fail");
        assert!(error.contains("RFC3339"));
    }
}

//! Background escalation loop.
//!
//! Each interval the loop runs one [`EscalationScheduler::tick`] and records
//! the outcome in a [`SchedulerStatus`] that the health endpoint reads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pgben_core::escalation::EscalationScheduler;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LastTick {
    pub ticks: u64,
    pub last_ran_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub expired_total: u64,
    pub overdue_total: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SchedulerStatus {
    enabled: bool,
    inner: Arc<Mutex<LastTick>>,
}

impl SchedulerStatus {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, inner: Arc::default() }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn snapshot(&self) -> LastTick {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, update: impl FnOnce(&mut LastTick)) {
        match self.inner.lock() {
            Ok(mut guard) => update(&mut guard),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}

/// Runs `scheduler` every `interval` until `shutdown` flips to true.
pub fn spawn(
    scheduler: Arc<EscalationScheduler>,
    interval: Duration,
    status: SchedulerStatus,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!(
        event_name = "system.scheduler.start",
        interval_secs = interval.as_secs(),
        "escalation scheduler started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => run_once(&scheduler, &status).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "system.scheduler.stopped", "escalation scheduler stopped");
    })
}

async fn run_once(scheduler: &EscalationScheduler, status: &SchedulerStatus) {
    let now = Utc::now();
    match scheduler.tick(now).await {
        Ok(report) => {
            if !report.failures.is_empty() {
                warn!(
                    event_name = "system.scheduler.partial_failure",
                    failures = report.failures.len(),
                    "escalation tick finished with failures"
                );
            }
            debug!(
                event_name = "system.scheduler.tick",
                expired = report.expired.len(),
                overdue = report.overdue_notified.len(),
                "escalation tick finished"
            );
            status.record(|last| {
                last.ticks += 1;
                last.last_ran_at = Some(now);
                last.last_error = report.failures.first().map(|f| f.error.clone());
                last.expired_total += report.expired.len() as u64;
                last.overdue_total += report.overdue_notified.len() as u64;
            });
        }
        Err(err) => {
            error!(
                event_name = "system.scheduler.error",
                error = %err,
                "escalation tick failed"
            );
            status.record(|last| {
                last.ticks += 1;
                last.last_ran_at = Some(now);
                last.last_error = Some(err.to_string());
            });
        }
    }
}

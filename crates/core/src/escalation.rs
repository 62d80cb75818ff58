//! Periodic deadline scan.
//!
//! A tick expires approval cases whose deadline has passed and raises an
//! overdue notification for workflow stages past their SLA. Workflow state is
//! only ever read here; an overdue stage stays put until someone acts on it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approvals::{ApprovalEngine, ExpiryOutcome};
use crate::domain::approval::ApprovalCaseId;
use crate::domain::workflow::{RequestId, RequestWorkflowState};
use crate::errors::ApplicationError;
use crate::flows::RequestWorkflowEngine;
use crate::notifications::{dispatch, NotificationDispatcher, NotificationEvent, NotificationKind};

pub const SCHEDULER_ACTOR: &str = "scheduler";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationConfig {
    /// Extra attempts made when an expiry loses an optimistic-lock race.
    pub max_conflict_retries: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { max_conflict_retries: 3 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub ran_at: Option<DateTime<Utc>>,
    pub expired: Vec<ApprovalCaseId>,
    /// Due cases that resolved before the scheduler reached them.
    pub already_resolved: Vec<ApprovalCaseId>,
    pub overdue_notified: Vec<RequestId>,
    pub failures: Vec<TickFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickFailure {
    pub subject_id: String,
    pub error: String,
}

pub struct EscalationScheduler {
    approvals: Arc<ApprovalEngine>,
    workflows: Arc<RequestWorkflowEngine>,
    notifier: Arc<dyn NotificationDispatcher>,
    config: EscalationConfig,
    announced: Mutex<HashMap<RequestId, DateTime<Utc>>>,
}

impl EscalationScheduler {
    pub fn new(
        approvals: Arc<ApprovalEngine>,
        workflows: Arc<RequestWorkflowEngine>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: EscalationConfig,
    ) -> Self {
        Self { approvals, workflows, notifier, config, announced: Mutex::new(HashMap::new()) }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, ApplicationError> {
        let mut report = TickReport { ran_at: Some(now), ..TickReport::default() };

        for case in self.approvals.pending_due(now).await? {
            match self.expire_with_retry(&case.id, now).await {
                Ok(ExpiryOutcome::Expired(_)) => report.expired.push(case.id),
                Ok(ExpiryOutcome::AlreadyTerminal(_)) => report.already_resolved.push(case.id),
                Ok(ExpiryOutcome::NotDue(_)) => {}
                Err(error) => {
                    warn!(
                        event_name = "scheduler.expiry_failed",
                        case_id = %case.id,
                        error = %error,
                        "approval case could not be expired"
                    );
                    report.failures.push(TickFailure {
                        subject_id: case.id.0.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        let overdue = self.workflows.overdue_states(now).await?;
        let still_overdue: HashSet<RequestId> =
            overdue.iter().map(|state| state.request_id.clone()).collect();
        for state in overdue {
            if self.announce_overdue(&state, now) {
                report.overdue_notified.push(state.request_id);
            }
        }
        self.forget_settled(&still_overdue);

        info!(
            event_name = "scheduler.tick_completed",
            expired = report.expired.len(),
            already_resolved = report.already_resolved.len(),
            overdue_notified = report.overdue_notified.len(),
            failures = report.failures.len(),
            "escalation tick completed"
        );
        Ok(report)
    }

    async fn expire_with_retry(
        &self,
        case_id: &ApprovalCaseId,
        now: DateTime<Utc>,
    ) -> Result<ExpiryOutcome, ApplicationError> {
        let retries = self.config.max_conflict_retries;
        let mut attempt = 0;
        loop {
            match self.approvals.expire_at(case_id, now).await {
                Err(error) if error.is_retryable() && attempt < retries => {
                    attempt += 1;
                    debug!(
                        event_name = "scheduler.expiry_retry",
                        case_id = %case_id,
                        attempt,
                        "approval case changed during expiry; reloading"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    /// Drops announcements for requests that left their overdue stage.
    fn forget_settled(&self, still_overdue: &HashSet<RequestId>) {
        let mut announced = match self.announced.lock() {
            Ok(announced) => announced,
            Err(poisoned) => poisoned.into_inner(),
        };
        announced.retain(|request_id, _| still_overdue.contains(request_id));
    }

    #[cfg(test)]
    fn announced_len(&self) -> usize {
        match self.announced.lock() {
            Ok(announced) => announced.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Dispatches a `StageOverdue` event once per request and deadline.
    fn announce_overdue(&self, state: &RequestWorkflowState, now: DateTime<Utc>) -> bool {
        let Some(deadline) = state.stage_deadline else {
            return false;
        };
        {
            let mut announced = match self.announced.lock() {
                Ok(announced) => announced,
                Err(poisoned) => poisoned.into_inner(),
            };
            if announced.get(&state.request_id) == Some(&deadline) {
                return false;
            }
            announced.insert(state.request_id.clone(), deadline);
        }

        warn!(
            event_name = "workflow.stage_overdue",
            request_id = %state.request_id,
            stage = state.current_stage.as_str(),
            stage_deadline = %deadline,
            "workflow stage is past its deadline"
        );
        dispatch(
            self.notifier.as_ref(),
            NotificationEvent::new(
                NotificationKind::StageOverdue,
                state.request_id.0.clone(),
                SCHEDULER_ACTOR,
                now,
            )
            .with_metadata("stage", state.current_stage.as_str())
            .with_metadata("stage_deadline", deadline.to_rfc3339())
            .with_metadata("workflow_definition_id", state.workflow_definition_id.0.clone()),
        );
        true
    }
}

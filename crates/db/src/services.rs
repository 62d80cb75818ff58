//! Engines wired against the SQLite stores, shared by the server and the CLI.

use std::sync::Arc;

use tracing::info;

use pgben_core::approvals::ApprovalEngine;
use pgben_core::calendar::BusinessCalendar;
use pgben_core::config::AppConfig;
use pgben_core::escalation::EscalationScheduler;
use pgben_core::flows::RequestWorkflowEngine;
use pgben_core::notifications::NotificationDispatcher;
use pgben_core::policy::CachedApprovalPolicyStore;

use crate::repositories::{
    RepositoryError, SqlApprovalCaseStore, SqlApprovalPolicyStore, SqlApproverDirectory,
    SqlHolidayRepository, SqlWorkflowDefinitionStore, SqlWorkflowStateStore,
};
use crate::DbPool;

pub struct Services {
    pub approvals: Arc<ApprovalEngine>,
    pub workflows: Arc<RequestWorkflowEngine>,
    pub scheduler: Arc<EscalationScheduler>,
}

/// Builds the engines over `pool`. The holiday table is read once here.
pub async fn build_services(
    pool: &DbPool,
    config: &AppConfig,
    notifier: Arc<dyn NotificationDispatcher>,
) -> Result<Services, RepositoryError> {
    let holidays = SqlHolidayRepository::new(pool.clone()).load_calendar().await?;
    let directory = Arc::new(SqlApproverDirectory::new(pool.clone()));

    let approvals = Arc::new(
        ApprovalEngine::new(
            Arc::new(CachedApprovalPolicyStore::new(SqlApprovalPolicyStore::new(pool.clone()))),
            Arc::new(SqlApprovalCaseStore::new(pool.clone())),
            directory.clone(),
            notifier.clone(),
        )
        .with_config(config.approval_engine()),
    );
    let workflows = Arc::new(
        RequestWorkflowEngine::new(
            Arc::new(SqlWorkflowDefinitionStore::new(pool.clone())),
            Arc::new(SqlWorkflowStateStore::new(pool.clone())),
            directory,
            notifier.clone(),
        )
        .with_calendar(BusinessCalendar::new(Arc::new(holidays))),
    );
    let scheduler = Arc::new(EscalationScheduler::new(
        approvals.clone(),
        workflows.clone(),
        notifier,
        config.escalation(),
    ));

    info!(
        event_name = "system.services.ready",
        default_strategy = config.approvals.default_strategy.as_str(),
        max_conflict_retries = config.scheduler.max_conflict_retries,
        "decision services initialized"
    );
    Ok(Services { approvals, workflows, scheduler })
}

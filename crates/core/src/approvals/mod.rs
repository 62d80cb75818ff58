//! Critical-action approval engine.
//!
//! A case is opened against a snapshot of its action's policy, collects at
//! most one vote per eligible approver, and resolves as soon as the policy's
//! strategy is decided. Every mutation is read, decide, then a versioned
//! write; a stale write surfaces as [`ApplicationError::ConcurrencyConflict`]
//! and is never retried here.

pub mod resolution;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::{Clock, SystemClock};
use crate::directory::ApproverDirectory;
use crate::domain::approval::{
    ApprovalCase, ApprovalCaseId, ApprovalPolicy, ApprovalStatus, ApprovalStrategy,
    CriticalActionType, Vote, VoteDecision,
};
use crate::errors::{ApplicationError, DomainError, ForbiddenReason};
use crate::notifications::{dispatch, NotificationDispatcher, NotificationEvent, NotificationKind};
use crate::policy::{ApprovalPolicyStore, SystemDefaultPolicy};

pub use resolution::{evaluate, Resolution, Tally};
pub use store::{ApprovalCaseStore, InMemoryApprovalCaseStore};

use store::CASE_ENTITY;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApprovalEngineConfig {
    pub default_policy: SystemDefaultPolicy,
}

/// Result of an expiry attempt. Only `Expired` changed anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Expired(ApprovalCase),
    AlreadyTerminal(ApprovalCase),
    NotDue(ApprovalCase),
}

impl ExpiryOutcome {
    pub fn case(&self) -> &ApprovalCase {
        match self {
            Self::Expired(case) | Self::AlreadyTerminal(case) | Self::NotDue(case) => case,
        }
    }

    pub fn into_case(self) -> ApprovalCase {
        match self {
            Self::Expired(case) | Self::AlreadyTerminal(case) | Self::NotDue(case) => case,
        }
    }
}

pub struct ApprovalEngine {
    policies: Arc<dyn ApprovalPolicyStore>,
    cases: Arc<dyn ApprovalCaseStore>,
    directory: Arc<dyn ApproverDirectory>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: ApprovalEngineConfig,
}

impl ApprovalEngine {
    pub fn new(
        policies: Arc<dyn ApprovalPolicyStore>,
        cases: Arc<dyn ApprovalCaseStore>,
        directory: Arc<dyn ApproverDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            policies,
            cases,
            directory,
            notifier,
            clock: Arc::new(SystemClock),
            config: ApprovalEngineConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ApprovalEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn find(&self, case_id: &ApprovalCaseId) -> Result<ApprovalCase, ApplicationError> {
        self.cases
            .find(case_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(CASE_ENTITY, case_id.to_string()))
    }

    /// Opens a case for `action_type`. An inactive policy bypasses voting and
    /// the case is stored already approved.
    pub async fn open(
        &self,
        action_type: CriticalActionType,
        requester_id: &str,
        payload: serde_json::Value,
    ) -> Result<ApprovalCase, ApplicationError> {
        let now = self.clock.now();
        let policy = self.resolve_policy(action_type, now).await?;
        let id = ApprovalCaseId(Uuid::new_v4().to_string());
        let deadline = now + Duration::hours(i64::from(policy.time_limit_hours));

        if !policy.active {
            let case = ApprovalCase {
                id,
                action_type,
                requester_id: requester_id.to_string(),
                payload,
                status: ApprovalStatus::Approved,
                policy,
                eligible_approvers: Default::default(),
                opened_at: now,
                deadline,
                resolved_at: Some(now),
                cancelled_by: None,
                votes: Vec::new(),
                version: 1,
            };
            self.cases.insert(&case).await?;
            info!(
                event_name = "approval.bypassed",
                case_id = %case.id,
                action_type = action_type.as_str(),
                requester_id,
                "approval policy inactive; action approved without votes"
            );
            dispatch(
                self.notifier.as_ref(),
                case_event(NotificationKind::CaseResolved, &case, requester_id, now)
                    .with_metadata("status", case.status.as_str())
                    .with_metadata("bypass", "true"),
            );
            return Ok(case);
        }

        let mut pool = self.directory.eligible_approvers(action_type).await?;
        if !policy.allow_self_approval {
            pool.remove(requester_id);
        }
        let required = match policy.strategy {
            ApprovalStrategy::AnyOne => 1,
            ApprovalStrategy::Majority | ApprovalStrategy::Unanimous => policy.min_approvals.max(1),
        };
        if pool.len() < required as usize {
            return Err(DomainError::UnsatisfiableQuorum {
                action_type,
                required,
                available: pool.len(),
            }
            .into());
        }

        let case = ApprovalCase {
            id,
            action_type,
            requester_id: requester_id.to_string(),
            payload,
            status: ApprovalStatus::Pending,
            policy,
            eligible_approvers: pool,
            opened_at: now,
            deadline,
            resolved_at: None,
            cancelled_by: None,
            votes: Vec::new(),
            version: 1,
        };
        self.cases.insert(&case).await?;

        info!(
            event_name = "approval.case_opened",
            case_id = %case.id,
            action_type = action_type.as_str(),
            strategy = case.policy.strategy.as_str(),
            pool_size = case.eligible_approvers.len(),
            deadline = %case.deadline,
            "approval case opened"
        );
        dispatch(
            self.notifier.as_ref(),
            case_event(NotificationKind::CaseOpened, &case, requester_id, now)
                .with_metadata("strategy", case.policy.strategy.as_str())
                .with_metadata("deadline", case.deadline.to_rfc3339()),
        );
        Ok(case)
    }

    pub async fn cast_vote(
        &self,
        case_id: &ApprovalCaseId,
        approver_id: &str,
        decision: VoteDecision,
        comment: Option<String>,
    ) -> Result<ApprovalCase, ApplicationError> {
        let current = self.find(case_id).await?;
        ensure_pending(&current)?;

        if approver_id == current.requester_id && !current.policy.allow_self_approval {
            return Err(forbidden(approver_id, ForbiddenReason::SelfApproval));
        }
        if !current.eligible_approvers.contains(approver_id) {
            return Err(forbidden(approver_id, ForbiddenReason::NotEligibleApprover));
        }
        if current.vote_of(approver_id).map(|vote| vote.decision) == Some(decision) {
            return Ok(current);
        }

        let now = self.clock.now();
        let expected_version = current.version;
        let mut next = current;
        let vote = Vote { approver_id: approver_id.to_string(), decision, cast_at: now, comment };
        match next.votes.iter_mut().find(|existing| existing.approver_id == approver_id) {
            Some(existing) => *existing = vote,
            None => next.votes.push(vote),
        }

        let outcome = evaluate(
            next.policy.strategy,
            next.policy.min_approvals,
            Tally {
                approvals: next.approvals(),
                rejections: next.rejections(),
                pool_size: next.eligible_approvers.len(),
            },
        );
        match outcome {
            Resolution::Pending => {}
            Resolution::Approved => resolve(&mut next, ApprovalStatus::Approved, now),
            Resolution::Rejected => resolve(&mut next, ApprovalStatus::Rejected, now),
        }
        next.version = expected_version + 1;
        self.cases.update(&next, expected_version).await?;

        info!(
            event_name = "approval.vote_recorded",
            case_id = %next.id,
            approver_id,
            decision = decision.as_str(),
            status = next.status.as_str(),
            "approval vote recorded"
        );
        if next.status.is_terminal() {
            self.announce_resolution(&next, approver_id, now);
        }
        Ok(next)
    }

    /// Withdraws a pending case.
    pub async fn cancel(
        &self,
        case_id: &ApprovalCaseId,
        actor_id: &str,
    ) -> Result<ApprovalCase, ApplicationError> {
        let current = self.find(case_id).await?;
        ensure_pending(&current)?;

        let now = self.clock.now();
        let expected_version = current.version;
        let mut next = current;
        resolve(&mut next, ApprovalStatus::Cancelled, now);
        next.cancelled_by = Some(actor_id.to_string());
        next.version = expected_version + 1;
        self.cases.update(&next, expected_version).await?;

        self.announce_resolution(&next, actor_id, now);
        Ok(next)
    }

    pub async fn expire(
        &self,
        case_id: &ApprovalCaseId,
    ) -> Result<ExpiryOutcome, ApplicationError> {
        self.expire_at(case_id, self.clock.now()).await
    }

    /// Expires the case if it is still pending and `now` is past its deadline.
    pub async fn expire_at(
        &self,
        case_id: &ApprovalCaseId,
        now: DateTime<Utc>,
    ) -> Result<ExpiryOutcome, ApplicationError> {
        let current = self.find(case_id).await?;
        if current.status.is_terminal() {
            return Ok(ExpiryOutcome::AlreadyTerminal(current));
        }
        if !current.is_past_deadline(now) {
            return Ok(ExpiryOutcome::NotDue(current));
        }

        let expected_version = current.version;
        let mut next = current;
        resolve(&mut next, ApprovalStatus::Expired, now);
        next.version = expected_version + 1;
        self.cases.update(&next, expected_version).await?;

        warn!(
            event_name = "approval.case_expired",
            case_id = %next.id,
            action_type = next.action_type.as_str(),
            deadline = %next.deadline,
            votes = next.votes.len(),
            "approval case expired without a decision"
        );
        dispatch(
            self.notifier.as_ref(),
            case_event(NotificationKind::CaseExpired, &next, "scheduler", now)
                .with_metadata("requester_id", next.requester_id.clone())
                .with_metadata("outstanding", next.outstanding_approvers().len().to_string()),
        );
        Ok(ExpiryOutcome::Expired(next))
    }

    /// Pending cases whose deadline passed before `now`.
    pub async fn pending_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalCase>, ApplicationError> {
        Ok(self.cases.list_pending_due(now).await?)
    }

    async fn resolve_policy(
        &self,
        action_type: CriticalActionType,
        now: DateTime<Utc>,
    ) -> Result<ApprovalPolicy, ApplicationError> {
        if let Some(policy) = self.policies.get(action_type).await? {
            return Ok(policy);
        }
        warn!(
            event_name = "approval.policy_missing",
            action_type = action_type.as_str(),
            strategy = self.config.default_policy.strategy.as_str(),
            "no approval policy configured; applying system default"
        );
        Ok(self.config.default_policy.for_action(action_type, now))
    }

    fn announce_resolution(&self, case: &ApprovalCase, actor_id: &str, now: DateTime<Utc>) {
        info!(
            event_name = "approval.case_resolved",
            case_id = %case.id,
            action_type = case.action_type.as_str(),
            status = case.status.as_str(),
            approvals = case.approvals(),
            rejections = case.rejections(),
            "approval case resolved"
        );
        dispatch(
            self.notifier.as_ref(),
            case_event(NotificationKind::CaseResolved, case, actor_id, now)
                .with_metadata("status", case.status.as_str())
                .with_metadata("requester_id", case.requester_id.clone()),
        );
    }
}

fn ensure_pending(case: &ApprovalCase) -> Result<(), ApplicationError> {
    if case.is_pending() {
        return Ok(());
    }
    Err(DomainError::InvalidState { case_id: case.id.to_string(), status: case.status }.into())
}

fn forbidden(actor_id: &str, reason: ForbiddenReason) -> ApplicationError {
    DomainError::Forbidden { actor_id: actor_id.to_string(), reason }.into()
}

fn case_event(
    kind: NotificationKind,
    case: &ApprovalCase,
    actor_id: &str,
    at: DateTime<Utc>,
) -> NotificationEvent {
    NotificationEvent::new(kind, case.id.0.clone(), actor_id, at)
        .with_metadata("action_type", case.action_type.as_str())
}

fn resolve(case: &mut ApprovalCase, status: ApprovalStatus, at: DateTime<Utc>) {
    case.status = status;
    case.resolved_at = Some(at);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{
        ApprovalCaseStore, ApprovalEngine, ApprovalEngineConfig, ExpiryOutcome,
        InMemoryApprovalCaseStore,
    };
    use crate::calendar::ManualClock;
    use crate::directory::InMemoryApproverDirectory;
    use crate::domain::approval::{
        ApprovalCase, ApprovalCaseId, ApprovalPolicy, ApprovalStatus, ApprovalStrategy,
        CriticalActionType, VoteDecision,
    };
    use crate::errors::{ApplicationError, DomainError, ForbiddenReason, StoreError};
    use crate::notifications::{InMemoryNotificationDispatcher, NotificationKind};
    use crate::policy::{InMemoryApprovalPolicyStore, SystemDefaultPolicy};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("timestamp")
    }

    fn policy(
        action_type: CriticalActionType,
        strategy: ApprovalStrategy,
        min_approvals: u32,
    ) -> ApprovalPolicy {
        ApprovalPolicy {
            action_type,
            strategy,
            min_approvals,
            time_limit_hours: 48,
            allow_self_approval: false,
            active: true,
            version: 1,
            updated_at: start(),
        }
    }

    struct Harness {
        engine: ApprovalEngine,
        cases: Arc<InMemoryApprovalCaseStore>,
        notifier: InMemoryNotificationDispatcher,
        clock: ManualClock,
    }

    fn harness(policies: Vec<ApprovalPolicy>, directory: InMemoryApproverDirectory) -> Harness {
        let cases = Arc::new(InMemoryApprovalCaseStore::default());
        let notifier = InMemoryNotificationDispatcher::default();
        let clock = ManualClock::new(start());
        let engine = ApprovalEngine::new(
            Arc::new(InMemoryApprovalPolicyStore::with_policies(policies)),
            cases.clone(),
            Arc::new(directory),
            Arc::new(notifier.clone()),
        )
        .with_clock(Arc::new(clock.clone()));
        Harness { engine, cases, notifier, clock }
    }

    fn directory(action_type: CriticalActionType, approvers: &[&str]) -> InMemoryApproverDirectory {
        InMemoryApproverDirectory::default().with_approvers(action_type, approvers.iter().copied())
    }

    async fn vote(
        engine: &ApprovalEngine,
        case: &ApprovalCase,
        approver: &str,
        decision: VoteDecision,
    ) -> ApprovalCase {
        engine.cast_vote(&case.id, approver, decision, None).await.expect("vote accepted")
    }

    #[tokio::test]
    async fn any_one_single_approval_resolves_case() {
        let action = CriticalActionType::SuspendBenefit;
        let h = harness(
            vec![policy(action, ApprovalStrategy::AnyOne, 1)],
            directory(action, &["u-2", "u-3", "u-4"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");

        let resolved = vote(&h.engine, &case, "u-2", VoteDecision::Approve).await;

        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_at, Some(start()));
        assert_eq!(h.notifier.events_of(NotificationKind::CaseResolved).len(), 1);
    }

    #[tokio::test]
    async fn unanimous_needs_every_approval_and_fails_on_one_reject() {
        let action = CriticalActionType::ChangePermission;
        let approvers = ["u-2", "u-3", "u-4"];
        let h = harness(
            vec![policy(action, ApprovalStrategy::Unanimous, 3)],
            directory(action, &approvers),
        );

        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");
        let mut current = case.clone();
        for approver in approvers {
            current = vote(&h.engine, &case, approver, VoteDecision::Approve).await;
        }
        assert_eq!(current.status, ApprovalStatus::Approved);

        let other = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");
        let rejected = vote(&h.engine, &other, "u-3", VoteDecision::Reject).await;
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
        assert_eq!(rejected.votes.len(), 1);
    }

    #[tokio::test]
    async fn majority_two_of_three_approves() {
        let action = CriticalActionType::ChangeBenefitValue;
        let h = harness(
            vec![policy(action, ApprovalStrategy::Majority, 2)],
            directory(action, &["u-2", "u-3", "u-4"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");

        let after_first = vote(&h.engine, &case, "u-2", VoteDecision::Approve).await;
        assert_eq!(after_first.status, ApprovalStatus::Pending);
        let after_second = vote(&h.engine, &case, "u-3", VoteDecision::Approve).await;
        assert_eq!(after_second.status, ApprovalStatus::Approved);

        let late = h.engine.cast_vote(&case.id, "u-4", VoteDecision::Reject, None).await;
        assert!(matches!(
            late,
            Err(ApplicationError::Domain(DomainError::InvalidState {
                status: ApprovalStatus::Approved,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn identical_revote_is_a_no_op_and_changed_vote_overwrites() {
        let action = CriticalActionType::ChangeBenefitValue;
        let h = harness(
            vec![policy(action, ApprovalStrategy::Majority, 3)],
            directory(action, &["u-2", "u-3", "u-4", "u-5"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");

        let first = vote(&h.engine, &case, "u-2", VoteDecision::Approve).await;
        let repeat = vote(&h.engine, &case, "u-2", VoteDecision::Approve).await;
        assert_eq!(repeat.votes.len(), 1);
        assert_eq!(repeat.version, first.version);

        vote(&h.engine, &case, "u-3", VoteDecision::Approve).await;
        let changed = vote(&h.engine, &case, "u-2", VoteDecision::Reject).await;
        assert_eq!(changed.votes.len(), 2);
        assert_eq!(changed.votes[0].approver_id, "u-2");
        assert_eq!(changed.votes[0].decision, VoteDecision::Reject);
        assert_eq!(changed.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn requester_is_excluded_and_outsiders_are_forbidden() {
        let action = CriticalActionType::BlockBenefit;
        let h = harness(
            vec![policy(action, ApprovalStrategy::AnyOne, 1)],
            directory(action, &["u-1", "u-2"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");
        assert!(!case.eligible_approvers.contains("u-1"));

        let own = h.engine.cast_vote(&case.id, "u-1", VoteDecision::Approve, None).await;
        assert!(matches!(
            own,
            Err(ApplicationError::Domain(DomainError::Forbidden {
                reason: ForbiddenReason::SelfApproval,
                ..
            }))
        ));

        let outsider = h.engine.cast_vote(&case.id, "u-9", VoteDecision::Approve, None).await;
        assert!(matches!(
            outsider,
            Err(ApplicationError::Domain(DomainError::Forbidden {
                reason: ForbiddenReason::NotEligibleApprover,
                ..
            }))
        ));
        let stored = h.engine.find(&case.id).await.expect("find");
        assert!(stored.votes.is_empty());
        assert_eq!(stored.version, case.version);
    }

    #[tokio::test]
    async fn self_approval_allowed_keeps_requester_in_pool() {
        let action = CriticalActionType::UnblockBenefit;
        let mut permissive = policy(action, ApprovalStrategy::AnyOne, 1);
        permissive.allow_self_approval = true;
        let h = harness(vec![permissive], directory(action, &["u-1", "u-2"]));

        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");
        let resolved = vote(&h.engine, &case, "u-1", VoteDecision::Approve).await;

        assert_eq!(resolved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn inactive_policy_bypasses_voting() {
        let action = CriticalActionType::ReopenRequest;
        let mut inactive = policy(action, ApprovalStrategy::Unanimous, 3);
        inactive.active = false;
        let h = harness(vec![inactive], InMemoryApproverDirectory::default());

        let case = h.engine.open(action, "u-1", serde_json::json!({ "request": "R-1" })).await;
        let case = case.expect("bypass open");

        assert_eq!(case.status, ApprovalStatus::Approved);
        assert!(case.votes.is_empty());
        assert_eq!(h.engine.find(&case.id).await.expect("stored").status, ApprovalStatus::Approved);
        let resolved = h.notifier.events_of(NotificationKind::CaseResolved);
        assert_eq!(resolved[0].metadata.get("bypass").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn missing_policy_falls_back_to_configured_default() {
        let action = CriticalActionType::CancelRequest;
        let default_policy = SystemDefaultPolicy {
            strategy: ApprovalStrategy::Majority,
            min_approvals: 2,
            time_limit_hours: 24,
        };
        let h = harness(Vec::new(), directory(action, &["u-2", "u-3"]));
        let engine = h.engine.with_config(ApprovalEngineConfig { default_policy });

        let case = engine.open(action, "u-1", serde_json::json!({})).await.expect("open");

        assert_eq!(case.status, ApprovalStatus::Pending);
        assert_eq!(case.policy.strategy, ApprovalStrategy::Majority);
        assert_eq!(case.deadline, start() + Duration::hours(24));
        assert!(!case.policy.allow_self_approval);
    }

    #[tokio::test]
    async fn unsatisfiable_pool_is_rejected_at_open() {
        let action = CriticalActionType::DeleteDocument;
        let h = harness(
            vec![policy(action, ApprovalStrategy::Unanimous, 3)],
            directory(action, &["u-1", "u-2", "u-3"]),
        );

        let result = h.engine.open(action, "u-1", serde_json::json!({})).await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::UnsatisfiableQuorum {
                required: 3,
                available: 2,
                ..
            }))
        ));
        assert!(h.cases.is_empty());
    }

    #[tokio::test]
    async fn expire_is_a_no_op_on_resolved_case() {
        let action = CriticalActionType::SuspendBenefit;
        let h = harness(
            vec![policy(action, ApprovalStrategy::AnyOne, 1)],
            directory(action, &["u-2"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");
        let approved = vote(&h.engine, &case, "u-2", VoteDecision::Approve).await;

        h.clock.advance(Duration::hours(72));
        let outcome = h.engine.expire(&case.id).await.expect("expire");

        assert_eq!(outcome, ExpiryOutcome::AlreadyTerminal(approved));
        assert!(h.notifier.events_of(NotificationKind::CaseExpired).is_empty());
    }

    #[tokio::test]
    async fn expire_respects_deadline() {
        let action = CriticalActionType::SuspendBenefit;
        let h = harness(
            vec![policy(action, ApprovalStrategy::AnyOne, 1)],
            directory(action, &["u-2"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");

        let early = h.engine.expire_at(&case.id, case.deadline).await.expect("expire");
        assert!(matches!(early, ExpiryOutcome::NotDue(_)));

        let late = h
            .engine
            .expire_at(&case.id, case.deadline + Duration::seconds(1))
            .await
            .expect("expire");
        let ExpiryOutcome::Expired(expired) = late else {
            panic!("expected expiry, got {late:?}");
        };
        assert_eq!(expired.status, ApprovalStatus::Expired);
        assert_eq!(h.notifier.events_of(NotificationKind::CaseExpired).len(), 1);

        let vote = h.engine.cast_vote(&case.id, "u-2", VoteDecision::Approve, None).await;
        assert!(matches!(vote, Err(ApplicationError::Domain(DomainError::InvalidState { .. }))));
    }

    #[tokio::test]
    async fn cancel_records_actor_and_blocks_further_votes() {
        let action = CriticalActionType::DeleteDocument;
        let h = harness(
            vec![policy(action, ApprovalStrategy::Majority, 2)],
            directory(action, &["u-2", "u-3", "u-4"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");

        let cancelled = h.engine.cancel(&case.id, "u-1").await.expect("cancel");
        assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("u-1"));

        assert!(h.engine.cancel(&case.id, "u-1").await.is_err());
    }

    #[tokio::test]
    async fn unknown_case_is_not_found() {
        let h = harness(Vec::new(), InMemoryApproverDirectory::default());
        let missing = ApprovalCaseId("nope".to_string());

        assert!(matches!(
            h.engine.cast_vote(&missing, "u-2", VoteDecision::Approve, None).await,
            Err(ApplicationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stale_write_surfaces_concurrency_conflict() {
        let action = CriticalActionType::DeleteDocument;
        let h = harness(
            vec![policy(action, ApprovalStrategy::Majority, 2)],
            directory(action, &["u-2", "u-3", "u-4"]),
        );
        let case = h.engine.open(action, "u-1", serde_json::json!({})).await.expect("open");

        // A concurrent writer bumps the version behind the engine's back.
        let mut bumped = case.clone();
        bumped.version += 1;
        h.cases.update(&bumped, case.version).await.expect("concurrent write");
        let racing = RacingStore { inner: h.cases.clone(), stale: case.clone() };
        let engine = ApprovalEngine::new(
            Arc::new(InMemoryApprovalPolicyStore::default()),
            Arc::new(racing),
            Arc::new(InMemoryApproverDirectory::default()),
            Arc::new(InMemoryNotificationDispatcher::default()),
        );

        let error = engine
            .cast_vote(&case.id, "u-2", VoteDecision::Approve, None)
            .await
            .expect_err("stale read must not commit");

        assert!(error.is_retryable());
        assert!(h.engine.find(&case.id).await.expect("find").votes.is_empty());
    }

    /// Serves a stale snapshot on read while writing to the real store.
    struct RacingStore {
        inner: Arc<InMemoryApprovalCaseStore>,
        stale: ApprovalCase,
    }

    #[async_trait]
    impl ApprovalCaseStore for RacingStore {
        async fn find(&self, _id: &ApprovalCaseId) -> Result<Option<ApprovalCase>, StoreError> {
            Ok(Some(self.stale.clone()))
        }

        async fn insert(&self, case: &ApprovalCase) -> Result<(), StoreError> {
            self.inner.insert(case).await
        }

        async fn update(
            &self,
            case: &ApprovalCase,
            expected_version: u32,
        ) -> Result<(), StoreError> {
            self.inner.update(case, expected_version).await
        }

        async fn list_pending_due(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<ApprovalCase>, StoreError> {
            self.inner.list_pending_due(now).await
        }
    }

    #[tokio::test]
    async fn delete_document_unanimous_scenario_ends_rejected() {
        let action = CriticalActionType::DeleteDocument;
        let h = harness(
            vec![policy(action, ApprovalStrategy::Unanimous, 3)],
            directory(action, &["u-1", "u-2", "u-3", "u-4"]),
        );

        let case = h
            .engine
            .open(action, "u-1", serde_json::json!({ "document_id": "DOC-42" }))
            .await
            .expect("open");
        assert_eq!(case.eligible_approvers.len(), 3);
        assert_eq!(case.deadline, start() + Duration::hours(48));

        let self_vote = h.engine.cast_vote(&case.id, "u-1", VoteDecision::Approve, None).await;
        assert!(matches!(
            self_vote,
            Err(ApplicationError::Domain(DomainError::Forbidden { .. }))
        ));

        h.clock.advance(Duration::hours(1));
        let first = vote(&h.engine, &case, "u-2", VoteDecision::Approve).await;
        assert_eq!(first.status, ApprovalStatus::Pending);
        h.clock.advance(Duration::hours(1));
        let second = vote(&h.engine, &case, "u-3", VoteDecision::Approve).await;
        assert_eq!(second.status, ApprovalStatus::Pending);
        h.clock.advance(Duration::hours(1));
        let third = vote(&h.engine, &case, "u-4", VoteDecision::Reject).await;

        assert_eq!(third.status, ApprovalStatus::Rejected);
        assert_eq!(third.votes.len(), 3);
        assert_eq!(third.resolved_at, Some(start() + Duration::hours(3)));

        let kinds: Vec<NotificationKind> =
            h.notifier.events().into_iter().map(|event| event.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::CaseOpened, NotificationKind::CaseResolved]);
    }
}

pub mod approvals;
pub mod calendar;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod flows;
pub mod notifications;
pub mod policy;

pub use approvals::{
    ApprovalCaseStore, ApprovalEngine, ApprovalEngineConfig, ExpiryOutcome,
    InMemoryApprovalCaseStore,
};
pub use calendar::{
    BusinessCalendar, Clock, HolidayCalendar, InMemoryHolidayCalendar, ManualClock, SystemClock,
};
pub use directory::{ApproverDirectory, InMemoryApproverDirectory};
pub use domain::approval::{
    ApprovalCase, ApprovalCaseId, ApprovalPolicy, ApprovalStatus, ApprovalStrategy,
    CriticalActionType, Vote, VoteDecision,
};
pub use domain::workflow::{
    BenefitTypeId, HistoryEntry, RequestId, RequestWorkflowState, StageCode, WorkflowAction,
    WorkflowDefinitionId,
};
pub use errors::{ApplicationError, DomainError, ForbiddenReason, InterfaceError, StoreError};
pub use escalation::{EscalationConfig, EscalationScheduler, TickReport};
pub use flows::{
    InMemoryWorkflowDefinitionStore, InMemoryWorkflowStateStore, RequestWorkflowEngine,
    WorkflowDefinition, WorkflowDefinitionStore, WorkflowStateStore,
};
pub use notifications::{
    InMemoryNotificationDispatcher, NotificationDispatcher, NotificationEvent, NotificationKind,
    TracingNotificationDispatcher,
};
pub use policy::{
    ApprovalPolicyStore, CachedApprovalPolicyStore, InMemoryApprovalPolicyStore,
    SystemDefaultPolicy,
};

use thiserror::Error;

use crate::domain::approval::{ApprovalStatus, CriticalActionType};
use crate::domain::workflow::{StageCode, WorkflowAction};
use crate::flows::definition::DefinitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("approval case `{case_id}` is {status:?}; operation requires a pending case")]
    InvalidState { case_id: String, status: ApprovalStatus },
    #[error("workflow for request `{request_id}` is in an invalid state: {reason}")]
    InvalidWorkflowState { request_id: String, reason: String },
    #[error("actor `{actor_id}` is not allowed to perform this operation: {reason}")]
    Forbidden { actor_id: String, reason: ForbiddenReason },
    #[error("no transition from {stage:?} using action {action:?}")]
    IllegalTransition { stage: StageCode, action: WorkflowAction },
    #[error(
        "approval quorum for {action_type:?} cannot be met: {required} required, {available} eligible"
    )]
    UnsatisfiableQuorum { action_type: CriticalActionType, required: u32, available: usize },
    #[error(transparent)]
    InvalidDefinition(#[from] DefinitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForbiddenReason {
    SelfApproval,
    NotEligibleApprover,
    MissingRole { required: Vec<String> },
}

impl std::fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfApproval => write!(f, "requester cannot approve their own action"),
            Self::NotEligibleApprover => write!(f, "actor is not in the eligible approver pool"),
            Self::MissingRole { required } => {
                write!(f, "none of the actor roles match [{}]", required.join(", "))
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} `{id}` was modified concurrently (expected version {expected_version})")]
    ConcurrencyConflict { entity: &'static str, id: String, expected_version: u32 },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Only optimistic-lock failures may be retried, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Failure reported by a persistence or authorization collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} `{id}` version mismatch (expected {expected_version})")]
    Conflict { entity: &'static str, id: String, expected_version: u32 },
    #[error("{entity} `{id}` already exists")]
    Duplicate { entity: &'static str, id: String },
    #[error("{entity} `{id}` does not exist")]
    Missing { entity: &'static str, id: String },
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { entity, id, expected_version } => {
                Self::ConcurrencyConflict { entity, id, expected_version }
            }
            StoreError::Missing { entity, id } => Self::NotFound { entity, id },
            StoreError::Duplicate { entity, id } => Self::Domain(DomainError::InvariantViolation(
                format!("{entity} `{id}` already exists"),
            )),
            StoreError::Backend(message) => Self::Persistence(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this operation.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record was changed by someone else. Reload it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    fn correlation_id_mut(&mut self) -> &mut String {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        *mapped.correlation_id_mut() = correlation_id.into();
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Forbidden { actor_id, reason }) => {
                Self::Forbidden { message: format!("{actor_id}: {reason}"), correlation_id }
            }
            ApplicationError::Domain(DomainError::InvalidState { .. })
            | ApplicationError::Domain(DomainError::InvalidWorkflowState { .. }) => Self::Conflict {
                message: "operation not allowed in current state".to_owned(),
                correlation_id,
            },
            ApplicationError::Domain(DomainError::IllegalTransition { .. })
            | ApplicationError::Domain(DomainError::UnsatisfiableQuorum { .. })
            | ApplicationError::Domain(DomainError::InvalidDefinition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id,
            },
            ApplicationError::NotFound { entity, id } => {
                Self::NotFound { message: format!("{entity} `{id}`"), correlation_id }
            }
            ApplicationError::ConcurrencyConflict { entity, id, .. } => Self::Conflict {
                message: format!("{entity} `{id}` was modified concurrently"),
                correlation_id,
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

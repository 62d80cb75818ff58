use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalCaseId(pub String);

impl std::fmt::Display for ApprovalCaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog of operations that require approval before they are executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriticalActionType {
    CancelRequest,
    SuspendBenefit,
    BlockBenefit,
    UnblockBenefit,
    DeleteDocument,
    ChangePermission,
    ReopenRequest,
    ChangeBenefitValue,
}

impl CriticalActionType {
    pub const ALL: [Self; 8] = [
        Self::CancelRequest,
        Self::SuspendBenefit,
        Self::BlockBenefit,
        Self::UnblockBenefit,
        Self::DeleteDocument,
        Self::ChangePermission,
        Self::ReopenRequest,
        Self::ChangeBenefitValue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CancelRequest => "CANCEL_REQUEST",
            Self::SuspendBenefit => "SUSPEND_BENEFIT",
            Self::BlockBenefit => "BLOCK_BENEFIT",
            Self::UnblockBenefit => "UNBLOCK_BENEFIT",
            Self::DeleteDocument => "DELETE_DOCUMENT",
            Self::ChangePermission => "CHANGE_PERMISSION",
            Self::ReopenRequest => "REOPEN_REQUEST",
            Self::ChangeBenefitValue => "CHANGE_BENEFIT_VALUE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|action| action.as_str() == normalized)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStrategy {
    AnyOne,
    Majority,
    Unanimous,
}

impl ApprovalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnyOne => "ANY_ONE",
            Self::Majority => "MAJORITY",
            Self::Unanimous => "UNANIMOUS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ANY_ONE" => Some(Self::AnyOne),
            "MAJORITY" => Some(Self::Majority),
            "UNANIMOUS" => Some(Self::Unanimous),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub action_type: CriticalActionType,
    pub strategy: ApprovalStrategy,
    pub min_approvals: u32,
    pub time_limit_hours: u32,
    pub allow_self_approval: bool,
    /// An inactive policy lets the action through without collecting votes.
    pub active: bool,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteDecision {
    Approve,
    Reject,
}

impl VoteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub approver_id: String,
    pub decision: VoteDecision,
    pub cast_at: DateTime<Utc>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCase {
    pub id: ApprovalCaseId,
    pub action_type: CriticalActionType,
    pub requester_id: String,
    pub payload: serde_json::Value,
    pub status: ApprovalStatus,
    /// Policy as it was when the case was opened.
    pub policy: ApprovalPolicy,
    pub eligible_approvers: BTreeSet<String>,
    pub opened_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub votes: Vec<Vote>,
    pub version: u32,
}

impl ApprovalCase {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn vote_of(&self, approver_id: &str) -> Option<&Vote> {
        self.votes.iter().find(|vote| vote.approver_id == approver_id)
    }

    pub fn approvals(&self) -> usize {
        self.votes.iter().filter(|vote| vote.decision == VoteDecision::Approve).count()
    }

    pub fn rejections(&self) -> usize {
        self.votes.iter().filter(|vote| vote.decision == VoteDecision::Reject).count()
    }

    /// Pool members that have not voted yet.
    pub fn outstanding_approvers(&self) -> BTreeSet<String> {
        self.eligible_approvers
            .iter()
            .filter(|approver| self.vote_of(approver).is_none())
            .cloned()
            .collect()
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

//! Approval policy configuration.
//!
//! Policies are read-mostly: the approval engine only ever reads them, and
//! every case keeps its own snapshot so later edits never reach open cases.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{ApprovalPolicy, ApprovalStrategy, CriticalActionType};
use crate::errors::StoreError;

#[async_trait]
pub trait ApprovalPolicyStore: Send + Sync {
    async fn get(
        &self,
        action_type: CriticalActionType,
    ) -> Result<Option<ApprovalPolicy>, StoreError>;

    /// Administrative write. Returns the stored policy with its new version.
    async fn upsert(&self, policy: ApprovalPolicy) -> Result<ApprovalPolicy, StoreError>;
}

/// Policy applied when an action type has no configured policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDefaultPolicy {
    pub strategy: ApprovalStrategy,
    pub min_approvals: u32,
    pub time_limit_hours: u32,
}

impl Default for SystemDefaultPolicy {
    fn default() -> Self {
        Self { strategy: ApprovalStrategy::AnyOne, min_approvals: 1, time_limit_hours: 48 }
    }
}

impl SystemDefaultPolicy {
    pub fn for_action(
        &self,
        action_type: CriticalActionType,
        now: DateTime<Utc>,
    ) -> ApprovalPolicy {
        ApprovalPolicy {
            action_type,
            strategy: self.strategy,
            min_approvals: self.min_approvals,
            time_limit_hours: self.time_limit_hours,
            allow_self_approval: false,
            active: true,
            version: 0,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyValidationError {
    #[error("{action_type:?}: min_approvals must be at least 1")]
    ZeroApprovals { action_type: CriticalActionType },
    #[error("{action_type:?}: time_limit_hours must be greater than zero")]
    ZeroTimeLimit { action_type: CriticalActionType },
    #[error(
        "{action_type:?}: min_approvals {min_approvals} exceeds the {pool_size} eligible approvers"
    )]
    QuorumExceedsPool { action_type: CriticalActionType, min_approvals: u32, pool_size: usize },
    #[error(
        "{action_type:?}: unanimous policies must require every eligible approver ({pool_size}), got {min_approvals}"
    )]
    UnanimousMismatch { action_type: CriticalActionType, min_approvals: u32, pool_size: usize },
}

/// Configuration-time check of a policy against the approver pool it will be used with.
pub fn validate_policy(
    policy: &ApprovalPolicy,
    eligible_pool_size: usize,
) -> Result<(), PolicyValidationError> {
    let action_type = policy.action_type;
    if policy.min_approvals == 0 {
        return Err(PolicyValidationError::ZeroApprovals { action_type });
    }
    if policy.time_limit_hours == 0 {
        return Err(PolicyValidationError::ZeroTimeLimit { action_type });
    }
    if policy.min_approvals as usize > eligible_pool_size {
        return Err(PolicyValidationError::QuorumExceedsPool {
            action_type,
            min_approvals: policy.min_approvals,
            pool_size: eligible_pool_size,
        });
    }
    if policy.strategy == ApprovalStrategy::Unanimous
        && policy.min_approvals as usize != eligible_pool_size
    {
        return Err(PolicyValidationError::UnanimousMismatch {
            action_type,
            min_approvals: policy.min_approvals,
            pool_size: eligible_pool_size,
        });
    }
    Ok(())
}

#[derive(Default)]
pub struct InMemoryApprovalPolicyStore {
    policies: Mutex<HashMap<CriticalActionType, ApprovalPolicy>>,
}

impl InMemoryApprovalPolicyStore {
    pub fn with_policies(policies: impl IntoIterator<Item = ApprovalPolicy>) -> Self {
        Self {
            policies: Mutex::new(
                policies.into_iter().map(|policy| (policy.action_type, policy)).collect(),
            ),
        }
    }
}

#[async_trait]
impl ApprovalPolicyStore for InMemoryApprovalPolicyStore {
    async fn get(
        &self,
        action_type: CriticalActionType,
    ) -> Result<Option<ApprovalPolicy>, StoreError> {
        let policies = self.policies.lock().map_err(|_| poisoned())?;
        Ok(policies.get(&action_type).cloned())
    }

    async fn upsert(&self, mut policy: ApprovalPolicy) -> Result<ApprovalPolicy, StoreError> {
        let mut policies = self.policies.lock().map_err(|_| poisoned())?;
        policy.version =
            policies.get(&policy.action_type).map(|current| current.version + 1).unwrap_or(1);
        policies.insert(policy.action_type, policy.clone());
        Ok(policy)
    }
}

/// Read-through cache in front of another policy store.
///
/// Writes through this wrapper drop the cached entry; writes made elsewhere
/// must call [`CachedApprovalPolicyStore::invalidate`].
pub struct CachedApprovalPolicyStore<S> {
    inner: S,
    cache: Mutex<HashMap<CriticalActionType, ApprovalPolicy>>,
}

impl<S> CachedApprovalPolicyStore<S>
where
    S: ApprovalPolicyStore,
{
    pub fn new(inner: S) -> Self {
        Self { inner, cache: Mutex::new(HashMap::new()) }
    }

    pub fn invalidate(&self, action_type: CriticalActionType) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&action_type);
        }
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }
}

#[async_trait]
impl<S> ApprovalPolicyStore for CachedApprovalPolicyStore<S>
where
    S: ApprovalPolicyStore,
{
    async fn get(
        &self,
        action_type: CriticalActionType,
    ) -> Result<Option<ApprovalPolicy>, StoreError> {
        let cached = self.cache.lock().ok().and_then(|cache| cache.get(&action_type).cloned());
        if let Some(policy) = cached {
            return Ok(Some(policy));
        }

        let loaded = self.inner.get(action_type).await?;
        if let Some(policy) = &loaded {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(action_type, policy.clone());
            }
        }
        Ok(loaded)
    }

    async fn upsert(&self, policy: ApprovalPolicy) -> Result<ApprovalPolicy, StoreError> {
        let action_type = policy.action_type;
        let stored = self.inner.upsert(policy).await;
        self.invalidate(action_type);
        stored
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("policy store lock poisoned".to_string())
}

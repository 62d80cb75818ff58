use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::domain::approval::CriticalActionType;
use crate::errors::StoreError;

/// Authorization collaborator: who may approve what, and which roles a user holds.
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    async fn eligible_approvers(
        &self,
        action_type: CriticalActionType,
    ) -> Result<BTreeSet<String>, StoreError>;

    async fn roles_of(&self, user_id: &str) -> Result<BTreeSet<String>, StoreError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryApproverDirectory {
    approvers: HashMap<CriticalActionType, BTreeSet<String>>,
    roles: HashMap<String, BTreeSet<String>>,
}

impl InMemoryApproverDirectory {
    pub fn with_approvers<I, S>(mut self, action_type: CriticalActionType, approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approvers
            .entry(action_type)
            .or_default()
            .extend(approvers.into_iter().map(Into::into));
        self
    }

    pub fn with_roles<I, S>(mut self, user_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.entry(user_id.into()).or_default().extend(roles.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl ApproverDirectory for InMemoryApproverDirectory {
    async fn eligible_approvers(
        &self,
        action_type: CriticalActionType,
    ) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.approvers.get(&action_type).cloned().unwrap_or_default())
    }

    async fn roles_of(&self, user_id: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.roles.get(user_id).cloned().unwrap_or_default())
    }
}

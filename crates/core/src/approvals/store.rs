use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::approval::{ApprovalCase, ApprovalCaseId};
use crate::errors::StoreError;

pub(crate) const CASE_ENTITY: &str = "approval_case";

#[async_trait]
pub trait ApprovalCaseStore: Send + Sync {
    async fn find(&self, id: &ApprovalCaseId) -> Result<Option<ApprovalCase>, StoreError>;

    async fn insert(&self, case: &ApprovalCase) -> Result<(), StoreError>;

    /// Compare-and-swap write: succeeds only while the stored case still has
    /// `expected_version`. The case passed in already carries its next version.
    async fn update(&self, case: &ApprovalCase, expected_version: u32) -> Result<(), StoreError>;

    /// Pending cases whose deadline is strictly before `now`, oldest deadline first.
    async fn list_pending_due(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalCase>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryApprovalCaseStore {
    cases: Mutex<HashMap<ApprovalCaseId, ApprovalCase>>,
}

impl InMemoryApprovalCaseStore {
    pub fn len(&self) -> usize {
        self.cases.lock().map(|cases| cases.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ApprovalCaseStore for InMemoryApprovalCaseStore {
    async fn find(&self, id: &ApprovalCaseId) -> Result<Option<ApprovalCase>, StoreError> {
        let cases = self.cases.lock().map_err(|_| poisoned())?;
        Ok(cases.get(id).cloned())
    }

    async fn insert(&self, case: &ApprovalCase) -> Result<(), StoreError> {
        let mut cases = self.cases.lock().map_err(|_| poisoned())?;
        if cases.contains_key(&case.id) {
            return Err(StoreError::Duplicate { entity: CASE_ENTITY, id: case.id.to_string() });
        }
        cases.insert(case.id.clone(), case.clone());
        Ok(())
    }

    async fn update(&self, case: &ApprovalCase, expected_version: u32) -> Result<(), StoreError> {
        let mut cases = self.cases.lock().map_err(|_| poisoned())?;
        let Some(stored) = cases.get_mut(&case.id) else {
            return Err(StoreError::Missing { entity: CASE_ENTITY, id: case.id.to_string() });
        };
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                entity: CASE_ENTITY,
                id: case.id.to_string(),
                expected_version,
            });
        }
        *stored = case.clone();
        Ok(())
    }

    async fn list_pending_due(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalCase>, StoreError> {
        let cases = self.cases.lock().map_err(|_| poisoned())?;
        let mut due: Vec<ApprovalCase> = cases
            .values()
            .filter(|case| case.is_pending() && case.deadline < now)
            .cloned()
            .collect();
        due.sort_by(|left, right| {
            left.deadline.cmp(&right.deadline).then_with(|| left.id.cmp(&right.id))
        });
        Ok(due)
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("approval case store lock poisoned".to_string())
}

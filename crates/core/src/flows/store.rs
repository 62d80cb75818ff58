use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::workflow::{RequestId, RequestWorkflowState};
use crate::errors::StoreError;

pub(crate) const STATE_ENTITY: &str = "workflow_state";

#[async_trait]
pub trait WorkflowStateStore: Send + Sync {
    async fn find(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<RequestWorkflowState>, StoreError>;

    async fn insert(&self, state: &RequestWorkflowState) -> Result<(), StoreError>;

    /// Versioned write. History entries already stored are never rewritten;
    /// only entries beyond the stored history are appended.
    async fn update(
        &self,
        state: &RequestWorkflowState,
        expected_version: u32,
    ) -> Result<(), StoreError>;

    /// States whose stage deadline is strictly before `now`.
    async fn list_with_deadline_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestWorkflowState>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryWorkflowStateStore {
    states: Mutex<HashMap<RequestId, RequestWorkflowState>>,
}

#[async_trait]
impl WorkflowStateStore for InMemoryWorkflowStateStore {
    async fn find(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<RequestWorkflowState>, StoreError> {
        let states = self.states.lock().map_err(|_| poisoned())?;
        Ok(states.get(request_id).cloned())
    }

    async fn insert(&self, state: &RequestWorkflowState) -> Result<(), StoreError> {
        let mut states = self.states.lock().map_err(|_| poisoned())?;
        if states.contains_key(&state.request_id) {
            return Err(StoreError::Duplicate {
                entity: STATE_ENTITY,
                id: state.request_id.to_string(),
            });
        }
        states.insert(state.request_id.clone(), state.clone());
        Ok(())
    }

    async fn update(
        &self,
        state: &RequestWorkflowState,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let mut states = self.states.lock().map_err(|_| poisoned())?;
        let Some(stored) = states.get_mut(&state.request_id) else {
            return Err(StoreError::Missing {
                entity: STATE_ENTITY,
                id: state.request_id.to_string(),
            });
        };
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                entity: STATE_ENTITY,
                id: state.request_id.to_string(),
                expected_version,
            });
        }
        if !state.history.starts_with(&stored.history) {
            return Err(StoreError::Backend(format!(
                "history of `{}` would be rewritten",
                state.request_id
            )));
        }
        *stored = state.clone();
        Ok(())
    }

    async fn list_with_deadline_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestWorkflowState>, StoreError> {
        let states = self.states.lock().map_err(|_| poisoned())?;
        let mut overdue: Vec<RequestWorkflowState> = states
            .values()
            .filter(|state| state.stage_deadline.map(|deadline| deadline < now).unwrap_or(false))
            .cloned()
            .collect();
        overdue.sort_by(|left, right| {
            left.stage_deadline
                .cmp(&right.stage_deadline)
                .then_with(|| left.request_id.cmp(&right.request_id))
        });
        Ok(overdue)
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("workflow state store lock poisoned".to_string())
}

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CaseOpened,
    CaseResolved,
    CaseExpired,
    StageTransitioned,
    StageOverdue,
}

impl NotificationKind {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CaseOpened => "approval.case_opened",
            Self::CaseResolved => "approval.case_resolved",
            Self::CaseExpired => "approval.case_expired",
            Self::StageTransitioned => "workflow.stage_transitioned",
            Self::StageOverdue => "workflow.stage_overdue",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_id: String,
    pub kind: NotificationKind,
    /// Approval case id or benefit request id, depending on `kind`.
    pub subject_id: String,
    pub actor: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        kind: NotificationKind,
        subject_id: impl Into<String>,
        actor: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            subject_id: subject_id.into(),
            actor: actor.into(),
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Fire-and-forget delivery, invoked only after the state change is committed.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, event: &NotificationEvent) -> Result<(), DispatchError>;
}

/// Delivers `event`, logging instead of failing: a committed transition is
/// never undone because a notification could not be sent.
pub(crate) fn dispatch(dispatcher: &dyn NotificationDispatcher, event: NotificationEvent) {
    if let Err(error) = dispatcher.notify(&event) {
        tracing::warn!(
            event_name = "notification.dispatch_failed",
            notification = event.kind.event_name(),
            subject_id = %event.subject_id,
            event_id = %event.event_id,
            error = %error,
            "notification dispatch failed after commit"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationDispatcher {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl InMemoryNotificationDispatcher {
    pub fn events(&self) -> Vec<NotificationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of(&self, kind: NotificationKind) -> Vec<NotificationEvent> {
        self.events().into_iter().filter(|event| event.kind == kind).collect()
    }
}

impl NotificationDispatcher for InMemoryNotificationDispatcher {
    fn notify(&self, event: &NotificationEvent) -> Result<(), DispatchError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

/// Emits each notification as a structured log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotificationDispatcher;

impl NotificationDispatcher for TracingNotificationDispatcher {
    fn notify(&self, event: &NotificationEvent) -> Result<(), DispatchError> {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|error| DispatchError(error.to_string()))?;
        tracing::info!(
            event_name = event.kind.event_name(),
            event_id = %event.event_id,
            subject_id = %event.subject_id,
            actor = %event.actor,
            metadata = %metadata,
            "notification dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        dispatch, DispatchError, InMemoryNotificationDispatcher, NotificationDispatcher,
        NotificationEvent, NotificationKind,
    };

    struct RefusingDispatcher;

    impl NotificationDispatcher for RefusingDispatcher {
        fn notify(&self, _event: &NotificationEvent) -> Result<(), DispatchError> {
            Err(DispatchError("smtp relay offline".to_string()))
        }
    }

    #[test]
    fn in_memory_dispatcher_records_events_with_metadata() {
        let dispatcher = InMemoryNotificationDispatcher::default();
        dispatch(
            &dispatcher,
            NotificationEvent::new(NotificationKind::CaseOpened, "case-1", "u-1", Utc::now())
                .with_metadata("action_type", "DELETE_DOCUMENT"),
        );

        let events = dispatcher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject_id, "case-1");
        assert_eq!(events[0].kind.event_name(), "approval.case_opened");
        assert_eq!(
            events[0].metadata.get("action_type").map(String::as_str),
            Some("DELETE_DOCUMENT")
        );
    }

    #[test]
    fn dispatch_failures_are_swallowed() {
        dispatch(
            &RefusingDispatcher,
            NotificationEvent::new(
                NotificationKind::StageOverdue,
                "REQ-1",
                "scheduler",
                Utc::now(),
            ),
        );
    }
}

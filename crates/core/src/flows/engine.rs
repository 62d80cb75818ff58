use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::calendar::{BusinessCalendar, Clock, SystemClock};
use crate::directory::ApproverDirectory;
use crate::domain::workflow::{
    RequestId, RequestWorkflowState, StageCode, WorkflowAction, WorkflowDefinitionId,
};
use crate::errors::{ApplicationError, DomainError, ForbiddenReason, StoreError};
use crate::flows::definition::{WorkflowDefinition, WorkflowDefinitionStore, DEFINITION_ENTITY};
use crate::flows::history::{next_entry, verify_history, EntryDraft, HistoryVerification};
use crate::flows::store::{WorkflowStateStore, STATE_ENTITY};
use crate::notifications::{dispatch, NotificationDispatcher, NotificationEvent, NotificationKind};

pub const SYSTEM_ACTOR: &str = "system";

/// Moves benefit requests through the stages of their bound definition.
///
/// Every call loads the current state, decides against the definition and
/// writes back with the version it read. A failed call writes nothing.
pub struct RequestWorkflowEngine {
    definitions: Arc<dyn WorkflowDefinitionStore>,
    states: Arc<dyn WorkflowStateStore>,
    directory: Arc<dyn ApproverDirectory>,
    notifier: Arc<dyn NotificationDispatcher>,
    calendar: BusinessCalendar,
    clock: Arc<dyn Clock>,
}

impl RequestWorkflowEngine {
    pub fn new(
        definitions: Arc<dyn WorkflowDefinitionStore>,
        states: Arc<dyn WorkflowStateStore>,
        directory: Arc<dyn ApproverDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            definitions,
            states,
            directory,
            notifier,
            calendar: BusinessCalendar::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_calendar(mut self, calendar: BusinessCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates and stores a definition so requests can be bound to it.
    pub async fn register_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<(), ApplicationError> {
        definition.validate().map_err(DomainError::from)?;
        self.definitions.register(definition).await?;
        info!(
            event_name = "workflow.definition_registered",
            workflow_definition_id = %definition.id,
            benefit_type = %definition.benefit_type.0,
            stages = definition.stages.len(),
            transitions = definition.transitions.len(),
            "workflow definition registered"
        );
        Ok(())
    }

    pub async fn find(
        &self,
        request_id: &RequestId,
    ) -> Result<RequestWorkflowState, ApplicationError> {
        self.states
            .find(request_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(STATE_ENTITY, request_id.to_string()))
    }

    pub async fn start(
        &self,
        request_id: &RequestId,
        workflow_definition_id: &WorkflowDefinitionId,
    ) -> Result<RequestWorkflowState, ApplicationError> {
        let definition = self.definition(workflow_definition_id).await?;
        if self.states.find(request_id).await?.is_some() {
            return Err(already_started(request_id));
        }

        let now = self.clock.now();
        let stage = definition.initial_stage;
        let initial = next_entry(
            request_id,
            &[],
            EntryDraft {
                from_stage: None,
                to_stage: stage,
                action: None,
                actor_id: SYSTEM_ACTOR.to_string(),
                at: now,
                note: None,
            },
        );
        let state = RequestWorkflowState {
            request_id: request_id.clone(),
            workflow_definition_id: definition.id.clone(),
            current_stage: stage,
            stage_entered_at: now,
            stage_deadline: self.deadline_for(&definition, stage, now),
            history: vec![initial],
            version: 1,
        };

        match self.states.insert(&state).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => return Err(already_started(request_id)),
            Err(error) => return Err(error.into()),
        }

        info!(
            event_name = "workflow.started",
            request_id = %state.request_id,
            workflow_definition_id = %state.workflow_definition_id,
            stage = stage.as_str(),
            stage_deadline = ?state.stage_deadline,
            "workflow started"
        );
        Ok(state)
    }

    pub async fn list_allowed_actions(
        &self,
        request_id: &RequestId,
        actor_roles: &BTreeSet<String>,
    ) -> Result<BTreeSet<WorkflowAction>, ApplicationError> {
        let state = self.find(request_id).await?;
        let definition = self.bound_definition(&state).await?;
        Ok(definition
            .transitions_from(state.current_stage)
            .filter(|rule| rule.permits_any(actor_roles))
            .map(|rule| rule.action)
            .collect())
    }

    /// Same as [`Self::list_allowed_actions`], with roles taken from the directory.
    pub async fn allowed_actions_for(
        &self,
        request_id: &RequestId,
        actor_id: &str,
    ) -> Result<BTreeSet<WorkflowAction>, ApplicationError> {
        let roles = self.directory.roles_of(actor_id).await?;
        self.list_allowed_actions(request_id, &roles).await
    }

    pub async fn apply_action(
        &self,
        request_id: &RequestId,
        action: WorkflowAction,
        actor_id: &str,
        actor_roles: &BTreeSet<String>,
        note: Option<String>,
    ) -> Result<RequestWorkflowState, ApplicationError> {
        let current = self.find(request_id).await?;
        let definition = self.bound_definition(&current).await?;

        let Some(rule) = definition.transition(current.current_stage, action) else {
            return Err(DomainError::IllegalTransition { stage: current.current_stage, action }
                .into());
        };
        if !rule.permits_any(actor_roles) {
            return Err(DomainError::Forbidden {
                actor_id: actor_id.to_string(),
                reason: ForbiddenReason::MissingRole {
                    required: rule.allowed_roles.iter().cloned().collect(),
                },
            }
            .into());
        }

        let now = self.clock.now();
        let from = current.current_stage;
        let to = rule.to;
        let entry = next_entry(
            request_id,
            &current.history,
            EntryDraft {
                from_stage: Some(from),
                to_stage: to,
                action: Some(action),
                actor_id: actor_id.to_string(),
                at: now,
                note,
            },
        );

        let expected_version = current.version;
        let mut next = current;
        next.current_stage = to;
        next.stage_entered_at = now;
        next.stage_deadline = self.deadline_for(&definition, to, now);
        next.history.push(entry);
        next.version = expected_version + 1;
        self.states.update(&next, expected_version).await?;

        info!(
            event_name = "workflow.stage_transitioned",
            request_id = %next.request_id,
            from = from.as_str(),
            to = to.as_str(),
            action = action.as_str(),
            actor_id,
            stage_deadline = ?next.stage_deadline,
            "workflow stage transitioned"
        );
        let mut event = NotificationEvent::new(
            NotificationKind::StageTransitioned,
            next.request_id.0.clone(),
            actor_id,
            now,
        )
        .with_metadata("from", from.as_str())
        .with_metadata("to", to.as_str())
        .with_metadata("action", action.as_str());
        if let Some(deadline) = next.stage_deadline {
            event = event.with_metadata("stage_deadline", deadline.to_rfc3339());
        }
        dispatch(self.notifier.as_ref(), event);
        Ok(next)
    }

    /// Same as [`Self::apply_action`], with roles taken from the directory.
    pub async fn apply_action_as(
        &self,
        request_id: &RequestId,
        action: WorkflowAction,
        actor_id: &str,
        note: Option<String>,
    ) -> Result<RequestWorkflowState, ApplicationError> {
        let roles = self.directory.roles_of(actor_id).await?;
        self.apply_action(request_id, action, actor_id, &roles, note).await
    }

    pub async fn is_overdue(&self, request_id: &RequestId) -> Result<bool, ApplicationError> {
        self.is_overdue_at(request_id, self.clock.now()).await
    }

    pub async fn is_overdue_at(
        &self,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<bool, ApplicationError> {
        let state = self.find(request_id).await?;
        let definition = self.bound_definition(&state).await?;
        Ok(!definition.is_terminal(state.current_stage) && state.is_past_deadline(now))
    }

    /// Non-terminal states whose stage deadline passed before `now`.
    pub async fn overdue_states(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestWorkflowState>, ApplicationError> {
        Ok(self.states.list_with_deadline_before(now).await?)
    }

    pub async fn verify_history(
        &self,
        request_id: &RequestId,
    ) -> Result<HistoryVerification, ApplicationError> {
        let state = self.find(request_id).await?;
        Ok(verify_history(request_id, &state.history))
    }

    async fn definition(
        &self,
        id: &WorkflowDefinitionId,
    ) -> Result<WorkflowDefinition, ApplicationError> {
        self.definitions
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(DEFINITION_ENTITY, id.to_string()))
    }

    async fn bound_definition(
        &self,
        state: &RequestWorkflowState,
    ) -> Result<WorkflowDefinition, ApplicationError> {
        let definition = self.definition(&state.workflow_definition_id).await?;
        if !definition.contains_stage(state.current_stage) {
            return Err(DomainError::InvalidWorkflowState {
                request_id: state.request_id.to_string(),
                reason: format!(
                    "stage {} is not part of definition `{}`",
                    state.current_stage.as_str(),
                    definition.id
                ),
            }
            .into());
        }
        Ok(definition)
    }

    fn deadline_for(
        &self,
        definition: &WorkflowDefinition,
        stage: StageCode,
        entered_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        definition.sla_days(stage).map(|days| self.calendar.add_business_days(entered_at, days))
    }
}

fn already_started(request_id: &RequestId) -> ApplicationError {
    DomainError::InvalidWorkflowState {
        request_id: request_id.to_string(),
        reason: "workflow already started".to_string(),
    }
    .into()
}

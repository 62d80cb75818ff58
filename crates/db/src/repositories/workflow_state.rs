use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};

use pgben_core::domain::workflow::{
    HistoryEntry, RequestId, RequestWorkflowState, StageCode, WorkflowAction,
    WorkflowDefinitionId,
};
use pgben_core::errors::StoreError;
use pgben_core::flows::WorkflowStateStore;

use super::{
    column, column_u32, decode_enum, decode_timestamp, encode_timestamp, insert_error,
    RepositoryError,
};
use crate::DbPool;

const STATE_ENTITY: &str = "workflow_state";

/// Workflow state with its history kept in an append-only table.
///
/// Updates insert only the entries past the stored history; the stored
/// chain head must match the incoming entry at the same position.
pub struct SqlWorkflowStateStore {
    pool: DbPool,
}

impl SqlWorkflowStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<RequestWorkflowState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT request_id, workflow_definition_id, current_stage, stage_entered_at,
                    stage_deadline, version
             FROM workflow_state WHERE request_id = ?",
        )
        .bind(&request_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<RequestWorkflowState, RepositoryError> {
        let mut state = row_to_state(row)?;
        let rows = sqlx::query(
            "SELECT sequence, from_stage, to_stage, action, actor_id, at, note,
                    prev_hash, entry_hash
             FROM workflow_history WHERE request_id = ? ORDER BY sequence ASC",
        )
        .bind(&state.request_id.0)
        .fetch_all(&self.pool)
        .await?;
        state.history = rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()?;
        Ok(state)
    }

    async fn create(&self, state: &RequestWorkflowState) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_state (request_id, workflow_definition_id, current_stage,
                                         stage_entered_at, stage_deadline, version)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.request_id.0)
        .bind(&state.workflow_definition_id.0)
        .bind(state.current_stage.as_str())
        .bind(encode_timestamp(state.stage_entered_at))
        .bind(state.stage_deadline.map(encode_timestamp))
        .bind(i64::from(state.version))
        .execute(&mut *tx)
        .await
        .map_err(|error| insert_error(STATE_ENTITY, &state.request_id.0, error))?;

        append_entries(&mut tx, &state.request_id, &state.history).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace(
        &self,
        state: &RequestWorkflowState,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE workflow_state SET
                 current_stage = ?,
                 stage_entered_at = ?,
                 stage_deadline = ?,
                 version = ?
             WHERE request_id = ? AND version = ?",
        )
        .bind(state.current_stage.as_str())
        .bind(encode_timestamp(state.stage_entered_at))
        .bind(state.stage_deadline.map(encode_timestamp))
        .bind(i64::from(state.version))
        .bind(&state.request_id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        let id = state.request_id.0.clone();
        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM workflow_state WHERE request_id = ?")
                    .bind(&id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let error = if exists.is_some() {
                StoreError::Conflict { entity: STATE_ENTITY, id, expected_version }
            } else {
                StoreError::Missing { entity: STATE_ENTITY, id }
            };
            return Err(error.into());
        }

        let stored: Vec<String> = sqlx::query_scalar(
            "SELECT entry_hash FROM workflow_history WHERE request_id = ? ORDER BY sequence ASC",
        )
        .bind(&id)
        .fetch_all(&mut *tx)
        .await?;
        let preserved = stored.len() <= state.history.len()
            && stored.last().map_or(true, |head| {
                state.history.get(stored.len() - 1).map(|entry| &entry.entry_hash) == Some(head)
            });
        if !preserved {
            return Err(StoreError::Backend(format!("history of `{id}` would be rewritten")).into());
        }

        append_entries(&mut tx, &state.request_id, &state.history[stored.len()..]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestWorkflowState>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT request_id, workflow_definition_id, current_stage, stage_entered_at,
                    stage_deadline, version
             FROM workflow_state
             WHERE stage_deadline IS NOT NULL AND stage_deadline < ?
             ORDER BY stage_deadline ASC, request_id ASC",
        )
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        let mut states = Vec::with_capacity(rows.len());
        for row in &rows {
            states.push(self.hydrate(row).await?);
        }
        Ok(states)
    }
}

async fn append_entries(
    tx: &mut Transaction<'_, Sqlite>,
    request_id: &RequestId,
    entries: &[HistoryEntry],
) -> Result<(), RepositoryError> {
    for entry in entries {
        sqlx::query(
            "INSERT INTO workflow_history (request_id, sequence, from_stage, to_stage, action,
                                           actor_id, at, note, prev_hash, entry_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request_id.0)
        .bind(i64::from(entry.sequence))
        .bind(entry.from_stage.map(|stage| stage.as_str()))
        .bind(entry.to_stage.as_str())
        .bind(entry.action.map(|action| action.as_str()))
        .bind(&entry.actor_id)
        .bind(encode_timestamp(entry.at))
        .bind(&entry.note)
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn row_to_state(row: &SqliteRow) -> Result<RequestWorkflowState, RepositoryError> {
    let stage: String = column(row, "current_stage")?;
    let entered_at: String = column(row, "stage_entered_at")?;
    let deadline: Option<String> = column(row, "stage_deadline")?;

    Ok(RequestWorkflowState {
        request_id: RequestId(column(row, "request_id")?),
        workflow_definition_id: WorkflowDefinitionId(column(row, "workflow_definition_id")?),
        current_stage: decode_enum("stage", &stage, StageCode::parse)?,
        stage_entered_at: decode_timestamp(&entered_at)?,
        stage_deadline: deadline.as_deref().map(decode_timestamp).transpose()?,
        history: Vec::new(),
        version: column_u32(row, "version")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<HistoryEntry, RepositoryError> {
    let from_stage: Option<String> = column(row, "from_stage")?;
    let to_stage: String = column(row, "to_stage")?;
    let action: Option<String> = column(row, "action")?;
    let at: String = column(row, "at")?;

    Ok(HistoryEntry {
        sequence: column_u32(row, "sequence")?,
        from_stage: from_stage
            .as_deref()
            .map(|stage| decode_enum("stage", stage, StageCode::parse))
            .transpose()?,
        to_stage: decode_enum("stage", &to_stage, StageCode::parse)?,
        action: action
            .as_deref()
            .map(|action| decode_enum("action", action, WorkflowAction::parse))
            .transpose()?,
        actor_id: column(row, "actor_id")?,
        at: decode_timestamp(&at)?,
        note: column(row, "note")?,
        prev_hash: column(row, "prev_hash")?,
        entry_hash: column(row, "entry_hash")?,
    })
}

#[async_trait]
impl WorkflowStateStore for SqlWorkflowStateStore {
    async fn find(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<RequestWorkflowState>, StoreError> {
        Ok(self.load(request_id).await?)
    }

    async fn insert(&self, state: &RequestWorkflowState) -> Result<(), StoreError> {
        Ok(self.create(state).await?)
    }

    async fn update(
        &self,
        state: &RequestWorkflowState,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        Ok(self.replace(state, expected_version).await?)
    }

    async fn list_with_deadline_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestWorkflowState>, StoreError> {
        Ok(self.overdue(now).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use pgben_core::domain::workflow::{
        HistoryEntry, RequestId, RequestWorkflowState, StageCode, WorkflowAction,
        WorkflowDefinitionId,
    };
    use pgben_core::errors::StoreError;
    use pgben_core::flows::{WorkflowDefinition, WorkflowDefinitionStore, WorkflowStateStore};

    use super::SqlWorkflowStateStore;
    use crate::repositories::test_support::setup;
    use crate::repositories::SqlWorkflowDefinitionStore;

    fn entry(sequence: u32, from: Option<StageCode>, to: StageCode, hash: &str) -> HistoryEntry {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).single().expect("timestamp");
        HistoryEntry {
            sequence,
            from_stage: from,
            to_stage: to,
            action: from.map(|_| WorkflowAction::Submeter),
            actor_id: "u-t".to_string(),
            at: at + Duration::hours(i64::from(sequence)),
            note: None,
            prev_hash: None,
            entry_hash: hash.to_string(),
        }
    }

    async fn store_with_state(request: &str) -> (SqlWorkflowStateStore, RequestWorkflowState) {
        let pool = setup().await;
        SqlWorkflowDefinitionStore::new(pool.clone())
            .register(&WorkflowDefinition::standard("wf", "aux"))
            .await
            .expect("definition");
        let first = entry(1, None, StageCode::Rascunho, "h1");
        let state = RequestWorkflowState {
            request_id: RequestId(request.to_string()),
            workflow_definition_id: WorkflowDefinitionId("wf".to_string()),
            current_stage: StageCode::Rascunho,
            stage_entered_at: first.at,
            stage_deadline: Some(first.at + Duration::days(5)),
            history: vec![first],
            version: 1,
        };
        let store = SqlWorkflowStateStore::new(pool);
        store.insert(&state).await.expect("insert");
        (store, state)
    }

    #[tokio::test]
    async fn update_appends_history_and_bumps_version() {
        let (store, state) = store_with_state("REQ-1").await;

        let mut next = state.clone();
        next.current_stage = StageCode::Aberta;
        next.history.push(entry(2, Some(StageCode::Rascunho), StageCode::Aberta, "h2"));
        next.stage_entered_at = next.history[1].at;
        next.stage_deadline = None;
        next.version = 2;
        store.update(&next, 1).await.expect("update");

        let stored = store.find(&state.request_id).await.expect("find").expect("exists");
        assert_eq!(stored, next);
        assert!(matches!(store.update(&next, 1).await, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn update_refuses_divergent_history() {
        let (store, state) = store_with_state("REQ-2").await;

        let mut forged = state.clone();
        forged.history[0].entry_hash = "forged".to_string();
        forged.version = 2;

        assert!(matches!(store.update(&forged, 1).await, Err(StoreError::Backend(_))));
        let stored = store.find(&state.request_id).await.expect("find").expect("exists");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn only_states_with_past_deadlines_are_listed() {
        let (store, state) = store_with_state("REQ-3").await;
        let deadline = state.stage_deadline.expect("deadline");

        assert!(store.list_with_deadline_before(deadline).await.expect("list").is_empty());
        let overdue = store
            .list_with_deadline_before(deadline + Duration::seconds(1))
            .await
            .expect("list");
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].history.len(), 1);
    }
}

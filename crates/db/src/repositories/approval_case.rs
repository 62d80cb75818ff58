use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};

use pgben_core::approvals::ApprovalCaseStore;
use pgben_core::domain::approval::{
    ApprovalCase, ApprovalCaseId, ApprovalPolicy, ApprovalStatus, CriticalActionType, Vote,
    VoteDecision,
};
use pgben_core::errors::StoreError;

use super::{
    column, column_u32, decode_enum, decode_timestamp, encode_timestamp, insert_error,
    RepositoryError,
};
use crate::DbPool;

const CASE_ENTITY: &str = "approval_case";

const CASE_COLUMNS: &str = "id, action_type, requester_id, payload_json, status, policy_json,
                            eligible_approvers_json, opened_at, deadline, resolved_at,
                            cancelled_by, version";

pub struct SqlApprovalCaseStore {
    pool: DbPool,
}

impl SqlApprovalCaseStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(&self, id: &ApprovalCaseId) -> Result<Option<ApprovalCase>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CASE_COLUMNS} FROM approval_case WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => {
                let mut case = row_to_case(row)?;
                case.votes = self.load_votes(&case.id).await?;
                Ok(Some(case))
            }
            None => Ok(None),
        }
    }

    async fn load_votes(&self, id: &ApprovalCaseId) -> Result<Vec<Vote>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT approver_id, decision, cast_at, comment
             FROM approval_vote WHERE case_id = ? ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_vote).collect()
    }

    async fn create(&self, case: &ApprovalCase) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO approval_case ({CASE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&case.id.0)
        .bind(case.action_type.as_str())
        .bind(&case.requester_id)
        .bind(serde_json::to_string(&case.payload)?)
        .bind(case.status.as_str())
        .bind(serde_json::to_string(&case.policy)?)
        .bind(serde_json::to_string(&case.eligible_approvers)?)
        .bind(encode_timestamp(case.opened_at))
        .bind(encode_timestamp(case.deadline))
        .bind(case.resolved_at.map(encode_timestamp))
        .bind(&case.cancelled_by)
        .bind(i64::from(case.version))
        .execute(&mut *tx)
        .await
        .map_err(|error| insert_error(CASE_ENTITY, &case.id.0, error))?;

        write_votes(&mut tx, case).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Compare-and-swap on `version`; votes are rewritten in the same transaction.
    async fn replace(
        &self,
        case: &ApprovalCase,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE approval_case SET
                 status = ?,
                 resolved_at = ?,
                 cancelled_by = ?,
                 version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(case.status.as_str())
        .bind(case.resolved_at.map(encode_timestamp))
        .bind(&case.cancelled_by)
        .bind(i64::from(case.version))
        .bind(&case.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM approval_case WHERE id = ?")
                .bind(&case.id.0)
                .fetch_optional(&mut *tx)
                .await?;
            let id = case.id.0.clone();
            let error = if exists.is_some() {
                StoreError::Conflict { entity: CASE_ENTITY, id, expected_version }
            } else {
                StoreError::Missing { entity: CASE_ENTITY, id }
            };
            return Err(error.into());
        }

        sqlx::query("DELETE FROM approval_vote WHERE case_id = ?")
            .bind(&case.id.0)
            .execute(&mut *tx)
            .await?;
        write_votes(&mut tx, case).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalCase>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM approval_case
             WHERE status = 'pending' AND deadline < ?
             ORDER BY deadline ASC, id ASC"
        ))
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        let mut cases = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut case = row_to_case(row)?;
            case.votes = self.load_votes(&case.id).await?;
            cases.push(case);
        }
        Ok(cases)
    }
}

async fn write_votes(
    tx: &mut Transaction<'_, Sqlite>,
    case: &ApprovalCase,
) -> Result<(), RepositoryError> {
    for (position, vote) in case.votes.iter().enumerate() {
        let position = i64::try_from(position)
            .map_err(|_| RepositoryError::Decode(format!("vote position {position}")))?;
        sqlx::query(
            "INSERT INTO approval_vote (case_id, approver_id, position, decision, cast_at, comment)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&case.id.0)
        .bind(&vote.approver_id)
        .bind(position)
        .bind(vote.decision.as_str())
        .bind(encode_timestamp(vote.cast_at))
        .bind(&vote.comment)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn row_to_case(row: &SqliteRow) -> Result<ApprovalCase, RepositoryError> {
    let action_type: String = column(row, "action_type")?;
    let status: String = column(row, "status")?;
    let payload: String = column(row, "payload_json")?;
    let policy: String = column(row, "policy_json")?;
    let eligible: String = column(row, "eligible_approvers_json")?;
    let opened_at: String = column(row, "opened_at")?;
    let deadline: String = column(row, "deadline")?;
    let resolved_at: Option<String> = column(row, "resolved_at")?;

    Ok(ApprovalCase {
        id: ApprovalCaseId(column(row, "id")?),
        action_type: decode_enum("action type", &action_type, CriticalActionType::parse)?,
        requester_id: column(row, "requester_id")?,
        payload: serde_json::from_str(&payload)?,
        status: decode_enum("status", &status, ApprovalStatus::parse)?,
        policy: serde_json::from_str::<ApprovalPolicy>(&policy)?,
        eligible_approvers: serde_json::from_str::<BTreeSet<String>>(&eligible)?,
        opened_at: decode_timestamp(&opened_at)?,
        deadline: decode_timestamp(&deadline)?,
        resolved_at: resolved_at.as_deref().map(decode_timestamp).transpose()?,
        cancelled_by: column(row, "cancelled_by")?,
        votes: Vec::new(),
        version: column_u32(row, "version")?,
    })
}

fn row_to_vote(row: &SqliteRow) -> Result<Vote, RepositoryError> {
    let decision: String = column(row, "decision")?;
    let cast_at: String = column(row, "cast_at")?;

    Ok(Vote {
        approver_id: column(row, "approver_id")?,
        decision: decode_enum("vote decision", &decision, VoteDecision::parse)?,
        cast_at: decode_timestamp(&cast_at)?,
        comment: column(row, "comment")?,
    })
}

#[async_trait]
impl ApprovalCaseStore for SqlApprovalCaseStore {
    async fn find(&self, id: &ApprovalCaseId) -> Result<Option<ApprovalCase>, StoreError> {
        Ok(self.load(id).await?)
    }

    async fn insert(&self, case: &ApprovalCase) -> Result<(), StoreError> {
        Ok(self.create(case).await?)
    }

    async fn update(&self, case: &ApprovalCase, expected_version: u32) -> Result<(), StoreError> {
        Ok(self.replace(case, expected_version).await?)
    }

    async fn list_pending_due(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalCase>, StoreError> {
        Ok(self.due(now).await?)
    }
}

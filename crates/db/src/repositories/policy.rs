use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use pgben_core::domain::approval::{ApprovalPolicy, ApprovalStrategy, CriticalActionType};
use pgben_core::errors::StoreError;
use pgben_core::policy::ApprovalPolicyStore;

use super::{column, column_u32, decode_enum, decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalPolicyStore {
    pool: DbPool,
}

impl SqlApprovalPolicyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<ApprovalPolicy>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT action_type, strategy, min_approvals, time_limit_hours,
                    allow_self_approval, active, version, updated_at
             FROM approval_policy ORDER BY action_type",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_policy).collect()
    }

    async fn load(
        &self,
        action_type: CriticalActionType,
    ) -> Result<Option<ApprovalPolicy>, RepositoryError> {
        let row = sqlx::query(
            "SELECT action_type, strategy, min_approvals, time_limit_hours,
                    allow_self_approval, active, version, updated_at
             FROM approval_policy WHERE action_type = ?",
        )
        .bind(action_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_policy).transpose()
    }

    async fn save(&self, mut policy: ApprovalPolicy) -> Result<ApprovalPolicy, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT version FROM approval_policy WHERE action_type = ?")
                .bind(policy.action_type.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let next_version = current.map(|version| version + 1).unwrap_or(1);
        policy.version = u32::try_from(next_version)
            .map_err(|_| RepositoryError::Decode(format!("policy version {next_version}")))?;

        sqlx::query(
            "INSERT INTO approval_policy (action_type, strategy, min_approvals, time_limit_hours,
                                          allow_self_approval, active, version, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(action_type) DO UPDATE SET
                 strategy = excluded.strategy,
                 min_approvals = excluded.min_approvals,
                 time_limit_hours = excluded.time_limit_hours,
                 allow_self_approval = excluded.allow_self_approval,
                 active = excluded.active,
                 version = excluded.version,
                 updated_at = excluded.updated_at",
        )
        .bind(policy.action_type.as_str())
        .bind(policy.strategy.as_str())
        .bind(i64::from(policy.min_approvals))
        .bind(i64::from(policy.time_limit_hours))
        .bind(policy.allow_self_approval)
        .bind(policy.active)
        .bind(next_version)
        .bind(encode_timestamp(policy.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(policy)
    }
}

fn row_to_policy(row: &SqliteRow) -> Result<ApprovalPolicy, RepositoryError> {
    let action_type: String = column(row, "action_type")?;
    let strategy: String = column(row, "strategy")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(ApprovalPolicy {
        action_type: decode_enum("action type", &action_type, CriticalActionType::parse)?,
        strategy: decode_enum("strategy", &strategy, ApprovalStrategy::parse)?,
        min_approvals: column_u32(row, "min_approvals")?,
        time_limit_hours: column_u32(row, "time_limit_hours")?,
        allow_self_approval: column(row, "allow_self_approval")?,
        active: column(row, "active")?,
        version: column_u32(row, "version")?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl ApprovalPolicyStore for SqlApprovalPolicyStore {
    async fn get(
        &self,
        action_type: CriticalActionType,
    ) -> Result<Option<ApprovalPolicy>, StoreError> {
        Ok(self.load(action_type).await?)
    }

    async fn upsert(&self, policy: ApprovalPolicy) -> Result<ApprovalPolicy, StoreError> {
        Ok(self.save(policy).await?)
    }
}

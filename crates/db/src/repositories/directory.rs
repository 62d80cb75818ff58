use std::collections::BTreeSet;

use async_trait::async_trait;

use pgben_core::directory::ApproverDirectory;
use pgben_core::domain::approval::CriticalActionType;
use pgben_core::errors::StoreError;

use super::RepositoryError;
use crate::DbPool;

/// Approver pools per action type and role grants per user, backed by SQLite.
pub struct SqlApproverDirectory {
    pool: DbPool,
}

impl SqlApproverDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn grant_approver(
        &self,
        action_type: CriticalActionType,
        approver_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO action_approver (action_type, approver_id) VALUES (?, ?)
             ON CONFLICT(action_type, approver_id) DO NOTHING",
        )
        .bind(action_type.as_str())
        .bind(approver_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke_approver(
        &self,
        action_type: CriticalActionType,
        approver_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM action_approver WHERE action_type = ? AND approver_id = ?")
                .bind(action_type.as_str())
                .bind(approver_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn grant_role(&self, user_id: &str, role: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_role (user_id, role) VALUES (?, ?)
             ON CONFLICT(user_id, role) DO NOTHING",
        )
        .bind(user_id)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn approvers(
        &self,
        action_type: CriticalActionType,
    ) -> Result<BTreeSet<String>, RepositoryError> {
        let approvers: Vec<String> = sqlx::query_scalar(
            "SELECT approver_id FROM action_approver WHERE action_type = ? ORDER BY approver_id",
        )
        .bind(action_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(approvers.into_iter().collect())
    }

    async fn roles(&self, user_id: &str) -> Result<BTreeSet<String>, RepositoryError> {
        let roles: Vec<String> =
            sqlx::query_scalar("SELECT role FROM user_role WHERE user_id = ? ORDER BY role")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(roles.into_iter().collect())
    }
}

#[async_trait]
impl ApproverDirectory for SqlApproverDirectory {
    async fn eligible_approvers(
        &self,
        action_type: CriticalActionType,
    ) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.approvers(action_type).await?)
    }

    async fn roles_of(&self, user_id: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.roles(user_id).await?)
    }
}

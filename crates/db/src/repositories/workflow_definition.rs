use async_trait::async_trait;

use pgben_core::domain::workflow::{BenefitTypeId, WorkflowDefinitionId};
use pgben_core::errors::StoreError;
use pgben_core::flows::{WorkflowDefinition, WorkflowDefinitionStore};

use super::{insert_error, RepositoryError};
use crate::DbPool;

const DEFINITION_ENTITY: &str = "workflow_definition";

/// Definitions are stored whole as JSON and never updated after registration.
pub struct SqlWorkflowDefinitionStore {
    pool: DbPool,
}

impl SqlWorkflowDefinitionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn by_id(
        &self,
        id: &WorkflowDefinitionId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT definition_json FROM workflow_definition WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
        json.as_deref().map(decode_definition).transpose()
    }

    async fn latest_for(
        &self,
        benefit_type: &BenefitTypeId,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let json: Option<String> = sqlx::query_scalar(
            "SELECT definition_json FROM workflow_definition
             WHERE benefit_type = ?
             ORDER BY registered_seq DESC
             LIMIT 1",
        )
        .bind(&benefit_type.0)
        .fetch_optional(&self.pool)
        .await?;
        json.as_deref().map(decode_definition).transpose()
    }

    async fn store(&self, definition: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(definition)?;
        sqlx::query(
            "INSERT INTO workflow_definition
                 (id, benefit_type, name, definition_json, registered_seq)
             SELECT ?, ?, ?, ?, COALESCE(MAX(registered_seq), 0) + 1 FROM workflow_definition",
        )
        .bind(&definition.id.0)
        .bind(&definition.benefit_type.0)
        .bind(&definition.name)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|error| insert_error(DEFINITION_ENTITY, &definition.id.0, error))?;
        Ok(())
    }
}

fn decode_definition(json: &str) -> Result<WorkflowDefinition, RepositoryError> {
    Ok(serde_json::from_str(json)?)
}

#[async_trait]
impl WorkflowDefinitionStore for SqlWorkflowDefinitionStore {
    async fn find_by_id(
        &self,
        id: &WorkflowDefinitionId,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.by_id(id).await?)
    }

    async fn find_for_benefit_type(
        &self,
        benefit_type: &BenefitTypeId,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.latest_for(benefit_type).await?)
    }

    async fn register(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
        Ok(self.store(definition).await?)
    }
}

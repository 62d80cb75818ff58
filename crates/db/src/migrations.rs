use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Latest migration version known to this build.
pub fn latest_version() -> Option<i64> {
    MIGRATOR.iter().map(|migration| migration.version).max()
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{latest_version, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "approval_policy",
        "action_approver",
        "approval_case",
        "approval_vote",
        "workflow_definition",
        "workflow_state",
        "workflow_history",
        "user_role",
        "holiday",
        "idx_approval_case_status_deadline",
        "idx_approval_vote_case_id",
        "idx_workflow_definition_benefit_type",
        "idx_workflow_state_stage_deadline",
        "trg_workflow_history_no_update",
    ];

    #[tokio::test]
    async fn migrations_create_managed_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let signature = managed_schema_signature(&pool).await;
        let names: Vec<&str> = signature.iter().map(|(_, name, _)| name.as_str()).collect();

        for object in MANAGED_SCHEMA_OBJECTS {
            assert!(names.contains(object), "missing schema object `{object}`");
        }
        assert_eq!(latest_version(), Some(2));
    }

    #[tokio::test]
    async fn history_rows_cannot_be_updated() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO workflow_definition (id, benefit_type, name, definition_json, registered_seq)
             VALUES ('wf', 'aux', 'Aux', '{}', 1)",
        )
        .execute(&pool)
        .await
        .expect("definition");
        sqlx::query(
            "INSERT INTO workflow_state (request_id, workflow_definition_id, current_stage,
                                         stage_entered_at, stage_deadline, version)
             VALUES ('REQ-1', 'wf', 'RASCUNHO', '2026-05-04T08:00:00.000000Z', NULL, 1)",
        )
        .execute(&pool)
        .await
        .expect("state");
        sqlx::query(
            "INSERT INTO workflow_history (request_id, sequence, from_stage, to_stage, action,
                                           actor_id, at, note, prev_hash, entry_hash)
             VALUES ('REQ-1', 1, NULL, 'RASCUNHO', NULL, 'system',
                     '2026-05-04T08:00:00.000000Z', NULL, NULL, 'abc')",
        )
        .execute(&pool)
        .await
        .expect("history");

        let update =
            sqlx::query("UPDATE workflow_history SET note = 'edited' WHERE request_id = 'REQ-1'")
                .execute(&pool)
                .await;

        assert!(update.is_err(), "history rows must be append-only");
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index', 'trigger')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}

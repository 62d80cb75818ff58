use pgben_core::directory::ApproverDirectory;
use pgben_core::policy::validate_policy;
use pgben_db::{connect_with_config, migrations, SqlApprovalPolicyStore, SqlApproverDirectory};
use serde_json::json;

use crate::commands::{load_config, runtime, CommandFailure, CommandResult};

const COMMAND: &str = "validate-policies";

/// Checks every stored active policy against its current approver pool.
pub fn run() -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let policies = SqlApprovalPolicyStore::new(pool.clone())
            .list()
            .await
            .map_err(|error| ("policy_load", error.to_string(), 6u8))?;
        let directory = SqlApproverDirectory::new(pool.clone());

        let mut checked = 0usize;
        let mut bypassed = Vec::new();
        let mut problems = Vec::new();
        for policy in &policies {
            if !policy.active {
                bypassed.push(policy.action_type.as_str());
                continue;
            }
            let approvers = directory
                .eligible_approvers(policy.action_type)
                .await
                .map_err(|error| ("policy_load", error.to_string(), 6u8))?;
            checked += 1;
            if let Err(error) = validate_policy(policy, approvers.len()) {
                problems.push(error.to_string());
            }
        }
        pool.close().await;
        Ok::<_, CommandFailure>((checked, bypassed, problems))
    });

    match result {
        Ok((checked, _, problems)) if !problems.is_empty() => CommandResult::failure(
            COMMAND,
            "policy_invalid",
            format!(
                "{} of {checked} policies are invalid: {}",
                problems.len(),
                problems.join("; ")
            ),
            7,
        ),
        Ok((checked, bypassed, _)) => CommandResult::success_with(
            COMMAND,
            format!("{checked} active policies satisfy their approver pools"),
            Some(json!({ "checked": checked, "bypassed": bypassed })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

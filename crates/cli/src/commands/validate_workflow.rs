use std::fs;
use std::path::Path;
use std::sync::Arc;

use pgben_core::flows::WorkflowDefinition;
use pgben_core::notifications::TracingNotificationDispatcher;
use pgben_db::{build_services, connect_with_config, migrations};
use serde_json::json;

use crate::commands::{load_config, runtime, CommandFailure, CommandResult};

const COMMAND: &str = "validate-workflow";

/// Checks a TOML workflow definition and, with `register`, stores it.
pub fn run(path: &Path, register: bool) -> CommandResult {
    let definition = match load_definition(path) {
        Ok(definition) => definition,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    };
    let details = json!({
        "id": definition.id.0,
        "benefit_type": definition.benefit_type.0,
        "stages": definition.stages.len(),
        "transitions": definition.transitions.len(),
        "registered": register,
    });

    if !register {
        return CommandResult::success_with(
            COMMAND,
            format!("workflow definition `{}` is valid", definition.id),
            Some(details),
        );
    }

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
        let services = build_services(&pool, &config, Arc::new(TracingNotificationDispatcher))
            .await
            .map_err(|error| ("runtime_init", error.to_string(), 3u8))?;
        services
            .workflows
            .register_definition(&definition)
            .await
            .map_err(|error| ("registration", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<(), CommandFailure>(())
    });

    match result {
        Ok(()) => CommandResult::success_with(
            COMMAND,
            format!("workflow definition `{}` registered", definition.id),
            Some(details),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition, CommandFailure> {
    let raw = fs::read_to_string(path).map_err(|error| {
        ("invalid_input", format!("cannot read `{}`: {error}", path.display()), 7u8)
    })?;
    let definition = WorkflowDefinition::from_toml(&raw)
        .map_err(|error| ("invalid_input", format!("malformed definition: {error}"), 7u8))?;
    definition
        .validate()
        .map_err(|error| ("definition_invalid", error.to_string(), 8u8))?;
    Ok(definition)
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use pgben_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_key) in effective_values(&config) {
        let source = field_source(
            key_path,
            Some(env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    vec![
        ("database.url", config.database.url.clone(), "PGBEN_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "PGBEN_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "PGBEN_DATABASE_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "PGBEN_SERVER_BIND_ADDRESS"),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "PGBEN_SERVER_HEALTH_CHECK_PORT",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "PGBEN_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("scheduler.enabled", config.scheduler.enabled.to_string(), "PGBEN_SCHEDULER_ENABLED"),
        (
            "scheduler.tick_interval_secs",
            config.scheduler.tick_interval_secs.to_string(),
            "PGBEN_SCHEDULER_TICK_INTERVAL_SECS",
        ),
        (
            "scheduler.max_conflict_retries",
            config.scheduler.max_conflict_retries.to_string(),
            "PGBEN_SCHEDULER_MAX_CONFLICT_RETRIES",
        ),
        (
            "approvals.default_strategy",
            config.approvals.default_strategy.as_str().to_string(),
            "PGBEN_APPROVALS_DEFAULT_STRATEGY",
        ),
        (
            "approvals.default_min_approvals",
            config.approvals.default_min_approvals.to_string(),
            "PGBEN_APPROVALS_DEFAULT_MIN_APPROVALS",
        ),
        (
            "approvals.default_time_limit_hours",
            config.approvals.default_time_limit_hours.to_string(),
            "PGBEN_APPROVALS_DEFAULT_TIME_LIMIT_HOURS",
        ),
        ("logging.level", config.logging.level.clone(), "PGBEN_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "PGBEN_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("pgben.toml"), PathBuf::from("config/pgben.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, effective_values, field_source};
    use pgben_core::config::AppConfig;

    #[test]
    fn every_config_section_is_reported() {
        let values = effective_values(&AppConfig::default());
        for section in ["database.", "server.", "scheduler.", "approvals.", "logging."] {
            assert!(
                values.iter().any(|(key, _, _)| key.starts_with(section)),
                "section `{section}` should be listed"
            );
        }
        assert!(values.iter().all(|(_, _, env_key)| env_key.starts_with("PGBEN_")));
    }

    #[test]
    fn file_keys_are_attributed_to_the_file() {
        let doc: toml::Value = "[approvals]\ndefault_strategy = \"MAJORITY\"\n"
            .parse()
            .expect("valid toml");

        assert!(contains_path(&doc, "approvals.default_strategy"));
        assert!(!contains_path(&doc, "approvals.default_min_approvals"));
        assert_eq!(
            field_source("approvals.default_strategy", None, Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(field_source("logging.level", None, Some(&doc), None), "default");
    }
}

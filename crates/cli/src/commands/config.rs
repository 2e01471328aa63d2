use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use analyst_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::{Table, Value};

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_values(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

fn field(key_path: &'static str, env_keys: &'static [&'static str], value: String) -> Field {
    Field { key_path, env_keys, value }
}

fn effective_values(config: &AppConfig) -> Vec<Field> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let prompts_dir = config
        .agent
        .prompts_dir
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<embedded>".to_string());

    vec![
        field("database.url", &["ANALYST_DATABASE_URL"], config.database.url.clone()),
        field(
            "database.max_connections",
            &["ANALYST_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        field(
            "database.timeout_secs",
            &["ANALYST_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        field("llm.provider", &["ANALYST_LLM_PROVIDER"], config.llm.provider.as_str().to_string()),
        field("llm.model", &["ANALYST_LLM_MODEL"], config.llm.model.clone()),
        field("llm.base_url", &["ANALYST_LLM_BASE_URL"], config.llm.resolved_base_url()),
        field("llm.api_key", &["ANALYST_LLM_API_KEY"], api_key),
        field("llm.temperature", &["ANALYST_LLM_TEMPERATURE"], config.llm.temperature.to_string()),
        field("llm.top_p", &["ANALYST_LLM_TOP_P"], config.llm.top_p.to_string()),
        field("llm.timeout_secs", &["ANALYST_LLM_TIMEOUT_SECS"], config.llm.timeout_secs.to_string()),
        field("llm.max_retries", &["ANALYST_LLM_MAX_RETRIES"], config.llm.max_retries.to_string()),
        field("dataset.path", &["ANALYST_DATASET_PATH"], config.dataset.path.display().to_string()),
        field(
            "agent.max_iterations",
            &["ANALYST_AGENT_MAX_ITERATIONS"],
            config.agent.max_iterations.to_string(),
        ),
        field("agent.summary_batch_size", &[], config.agent.summary_batch_size.to_string()),
        field("agent.summary_batch_count", &[], config.agent.summary_batch_count.to_string()),
        field("agent.memory_save_limit", &[], config.agent.memory_save_limit.to_string()),
        field("agent.memory_read_limit", &[], config.agent.memory_read_limit.to_string()),
        field(
            "agent.history_window",
            &["ANALYST_AGENT_HISTORY_WINDOW"],
            config.agent.history_window.to_string(),
        ),
        field("agent.log_window", &["ANALYST_AGENT_LOG_WINDOW"], config.agent.log_window.to_string()),
        field("agent.prompts_dir", &["ANALYST_AGENT_PROMPTS_DIR"], prompts_dir),
        field("server.bind_address", &["ANALYST_SERVER_BIND_ADDRESS"], config.server.bind_address.clone()),
        field("server.port", &["ANALYST_SERVER_PORT"], config.server.port.to_string()),
        field(
            "server.graceful_shutdown_secs",
            &["ANALYST_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        field(
            "logging.level",
            &["ANALYST_LOGGING_LEVEL", "ANALYST_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        field(
            "logging.format",
            &["ANALYST_LOGGING_FORMAT", "ANALYST_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("analyst.toml"), PathBuf::from("config/analyst.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Table>().ok().map(Value::Table)
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
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

/// Keeps a recognisable prefix (`sk-***`) and hides the rest.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

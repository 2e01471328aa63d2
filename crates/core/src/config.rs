use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound accepted for `llm.max_retries`.
pub const MAX_LLM_RETRIES: u32 = 10;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub dataset: DatasetConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct DatasetConfig {
    pub path: PathBuf,
}

/// Turn execution limits and prompt locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub summary_batch_size: usize,
    pub summary_batch_count: usize,
    pub memory_save_limit: usize,
    pub memory_read_limit: usize,
    pub history_window: usize,
    /// Most recent messages a resumed thread carries into its next turn.
    pub log_window: usize,
    pub prompts_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            summary_batch_size: 10,
            summary_batch_count: 5,
            memory_save_limit: 20,
            memory_read_limit: 50,
            history_window: 5,
            log_window: 200,
            prompts_dir: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    /// Base URL of the provider's OpenAI-compatible chat endpoint.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub dataset_path: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("`{path}` is not valid analyst TOML: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("`${{{var}}}` references an unset environment variable")]
    MissingEnvInterpolation { var: String },
    #[error("`${{` without a closing `}}` in config file")]
    UnterminatedInterpolation,
    #[error("{key}=`{value}` could not be parsed")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://analyst.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                temperature: 0.0,
                top_p: 1.0,
                timeout_secs: 60,
                max_retries: 2,
            },
            dataset: DatasetConfig { path: PathBuf::from("data/bitext.jsonl") },
            agent: AgentConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("analyst.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        let ConfigPatch { database, llm, dataset, agent, server, logging } = patch;

        if let Some(db) = database {
            merge(&mut self.database.url, db.url);
            merge(&mut self.database.max_connections, db.max_connections);
            merge(&mut self.database.timeout_secs, db.timeout_secs);
        }

        if let Some(llm) = llm {
            merge(&mut self.llm.provider, llm.provider);
            merge_some(&mut self.llm.api_key, llm.api_key.map(SecretString::from));
            merge_some(&mut self.llm.base_url, llm.base_url);
            merge(&mut self.llm.model, llm.model);
            merge(&mut self.llm.temperature, llm.temperature);
            merge(&mut self.llm.top_p, llm.top_p);
            merge(&mut self.llm.timeout_secs, llm.timeout_secs);
            merge(&mut self.llm.max_retries, llm.max_retries);
        }

        if let Some(data) = dataset {
            merge(&mut self.dataset.path, data.path);
        }

        if let Some(agent) = agent {
            let limits = &mut self.agent;
            merge(&mut limits.max_iterations, agent.max_iterations);
            merge(&mut limits.summary_batch_size, agent.summary_batch_size);
            merge(&mut limits.summary_batch_count, agent.summary_batch_count);
            merge(&mut limits.memory_save_limit, agent.memory_save_limit);
            merge(&mut limits.memory_read_limit, agent.memory_read_limit);
            merge(&mut limits.history_window, agent.history_window);
            merge(&mut limits.log_window, agent.log_window);
            merge_some(&mut limits.prompts_dir, agent.prompts_dir);
        }

        if let Some(http) = server {
            merge(&mut self.server.bind_address, http.bind_address);
            merge(&mut self.server.port, http.port);
            merge(&mut self.server.graceful_shutdown_secs, http.graceful_shutdown_secs);
        }

        if let Some(log) = logging {
            merge(&mut self.logging.level, log.level);
            merge(&mut self.logging.format, log.format);
        }
    }

    /// `ANALYST_*` variables sit above the file and below programmatic overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        merge(&mut self.database.url, read_env("ANALYST_DATABASE_URL"));
        merge(&mut self.database.max_connections, env_value("ANALYST_DATABASE_MAX_CONNECTIONS")?);
        merge(&mut self.database.timeout_secs, env_value("ANALYST_DATABASE_TIMEOUT_SECS")?);

        merge(&mut self.llm.provider, env_value("ANALYST_LLM_PROVIDER")?);
        merge_some(&mut self.llm.api_key, read_env("ANALYST_LLM_API_KEY").map(SecretString::from));
        merge_some(&mut self.llm.base_url, read_env("ANALYST_LLM_BASE_URL"));
        merge(&mut self.llm.model, read_env("ANALYST_LLM_MODEL"));
        merge(&mut self.llm.temperature, env_value("ANALYST_LLM_TEMPERATURE")?);
        merge(&mut self.llm.top_p, env_value("ANALYST_LLM_TOP_P")?);
        merge(&mut self.llm.timeout_secs, env_value("ANALYST_LLM_TIMEOUT_SECS")?);
        merge(&mut self.llm.max_retries, env_value("ANALYST_LLM_MAX_RETRIES")?);

        merge(&mut self.dataset.path, read_env("ANALYST_DATASET_PATH").map(PathBuf::from));

        merge(&mut self.agent.max_iterations, env_value("ANALYST_AGENT_MAX_ITERATIONS")?);
        merge(&mut self.agent.history_window, env_value("ANALYST_AGENT_HISTORY_WINDOW")?);
        merge(&mut self.agent.log_window, env_value("ANALYST_AGENT_LOG_WINDOW")?);
        merge_some(
            &mut self.agent.prompts_dir,
            read_env("ANALYST_AGENT_PROMPTS_DIR").map(PathBuf::from),
        );

        merge(&mut self.server.bind_address, read_env("ANALYST_SERVER_BIND_ADDRESS"));
        merge(&mut self.server.port, env_value("ANALYST_SERVER_PORT")?);
        merge(
            &mut self.server.graceful_shutdown_secs,
            env_value("ANALYST_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );

        // The short ANALYST_LOG_* spellings are accepted as aliases.
        merge(
            &mut self.logging.level,
            read_env("ANALYST_LOGGING_LEVEL").or_else(|| read_env("ANALYST_LOG_LEVEL")),
        );
        let format = read_env("ANALYST_LOGGING_FORMAT").or_else(|| read_env("ANALYST_LOG_FORMAT"));
        merge(&mut self.logging.format, format.map(|raw| raw.parse()).transpose()?);

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        merge(&mut self.database.url, overrides.database_url);
        merge(&mut self.logging.level, overrides.log_level);
        merge(&mut self.llm.provider, overrides.llm_provider);
        merge(&mut self.llm.model, overrides.llm_model);
        merge_some(&mut self.llm.api_key, overrides.llm_api_key.map(SecretString::from));
        merge(&mut self.dataset.path, overrides.dataset_path);
        merge(&mut self.agent.max_iterations, overrides.max_iterations);
        merge(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_database()?;
        self.validate_llm()?;
        self.validate_agent()?;
        self.validate_server()?;

        require(!self.dataset.path.as_os_str().is_empty(), "dataset.path must not be empty")?;
        require(
            matches!(
                self.logging.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "logging.level must be one of trace|debug|info|warn|error",
        )
    }

    fn validate_database(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        let url = db.url.trim();
        require(
            ["sqlite://", "sqlite::"].iter().any(|scheme| url.starts_with(scheme))
                || url == ":memory:",
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
        )?;
        require(db.max_connections > 0, "database.max_connections must be greater than zero")?;
        require((1..=300).contains(&db.timeout_secs), "database.timeout_secs must be in range 1..=300")
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;
        require((1..=300).contains(&llm.timeout_secs), "llm.timeout_secs must be in range 1..=300")?;
        require(llm.max_retries <= MAX_LLM_RETRIES, "llm.max_retries must be in range 0..=10")?;
        require(!llm.model.trim().is_empty(), "llm.model must not be empty")?;
        require((0.0..=2.0).contains(&llm.temperature), "llm.temperature must be in range 0.0..=2.0")?;
        require(llm.top_p > 0.0 && llm.top_p <= 1.0, "llm.top_p must be in range (0.0, 1.0]")?;

        let has_key =
            llm.api_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty());
        let base_url = llm.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty());

        match llm.provider {
            LlmProvider::OpenAi => require(
                has_key,
                "llm.api_key is required for the openai provider (set ANALYST_LLM_API_KEY)",
            )?,
            LlmProvider::Ollama => {
                require(base_url.is_some(), "llm.base_url is required for the ollama provider")?
            }
        }

        require(
            base_url.map_or(true, |url| url.starts_with("http://") || url.starts_with("https://")),
            "llm.base_url must start with http:// or https://",
        )
    }

    fn validate_agent(&self) -> Result<(), ConfigError> {
        let agent = &self.agent;
        require(agent.max_iterations > 0, "agent.max_iterations must be greater than zero")?;
        require(
            agent.summary_batch_size > 0 && agent.summary_batch_count > 0,
            "agent.summary_batch_size and agent.summary_batch_count must be greater than zero",
        )?;
        require(
            agent.memory_save_limit > 0 && agent.memory_read_limit > 0,
            "agent.memory_save_limit and agent.memory_read_limit must be greater than zero",
        )?;
        require(agent.log_window > 0, "agent.log_window must be greater than zero")
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        require(self.server.port > 0, "server.port must be greater than zero")?;
        require(
            self.server.graceful_shutdown_secs > 0,
            "server.graceful_shutdown_secs must be greater than zero",
        )
    }
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn merge_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => Some(path.to_path_buf()).filter(|path| path.exists()),
        None => ["analyst.toml", "config/analyst.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file()),
    }
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str(&expand_env_refs(&raw)?)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${NAME}` in the raw file text with the value of `NAME`.
fn expand_env_refs(input: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        expanded.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after[..close];
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        expanded.push_str(&value);
        rest = &after[close + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw })
        })
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    dataset: Option<DatasetPatch>,
    agent: Option<AgentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DatasetPatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_iterations: Option<u32>,
    summary_batch_size: Option<usize>,
    summary_batch_count: Option<usize>,
    memory_save_limit: Option<usize>,
    memory_read_limit: Option<usize>,
    history_window: Option<usize>,
    log_window: Option<usize>,
    prompts_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat, MAX_LLM_RETRIES,
    };

    /// Runs `body` with exactly `vars` set among the keys it touches, restoring them afterwards.
    fn with_vars<R>(vars: &[(&str, &str)], body: impl FnOnce() -> R) -> R {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let _guard = LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|p| p.into_inner());

        let mut touched: Vec<&str> = vars.iter().map(|(key, _)| *key).collect();
        touched.push("ANALYST_LLM_API_KEY");
        let saved: Vec<_> = touched.iter().map(|key| (*key, env::var(key).ok())).collect();

        for key in &touched {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }

        let outcome = body();

        for (key, value) in saved {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
        outcome
    }

    fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("analyst.toml");
        fs::write(&path, contents).expect("config file should be written");
        path
    }

    #[test]
    fn file_values_expand_environment_references() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
[llm]
provider = "openai"
api_key = "${TEST_ANALYST_OPENAI_KEY}"

[agent]
max_iterations = 4
history_window = 3
log_window = 40
"#,
        );

        let config = with_vars(&[("TEST_ANALYST_OPENAI_KEY", "sk-from-env")], || {
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
        })
        .expect("config should load");

        assert_eq!(config.llm.api_key.as_ref().map(|key| key.expose_secret()), Some("sk-from-env"));
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.history_window, 3);
        assert_eq!(config.agent.log_window, 40);
        assert_eq!(config.agent.memory_read_limit, 50, "unset keys keep their defaults");
    }

    #[test]
    fn unknown_environment_reference_is_reported_by_name() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, "[llm]\napi_key = \"${TEST_ANALYST_NOT_SET}\"\n");

        let error = with_vars(&[], || {
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
        })
        .expect_err("missing variable should fail");

        assert!(matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_ANALYST_NOT_SET"));
    }

    #[test]
    fn short_logging_aliases_are_read() {
        let config = with_vars(
            &[
                ("ANALYST_LLM_API_KEY", "sk-test"),
                ("ANALYST_LOG_LEVEL", "warn"),
                ("ANALYST_LOG_FORMAT", "pretty"),
            ],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect("config should load");

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_beat_environment_which_beats_the_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
[database]
url = "sqlite://from-file.db"

[llm]
provider = "ollama"
base_url = "http://localhost:11434/v1"
model = "llama3.1"

[logging]
level = "warn"
"#,
        );

        let config = with_vars(
            &[("ANALYST_DATABASE_URL", "sqlite://from-env.db"), ("ANALYST_LLM_MODEL", "gpt-4o")],
            || {
                AppConfig::load(LoadOptions {
                    config_path: Some(path),
                    overrides: ConfigOverrides {
                        database_url: Some("sqlite://from-override.db".to_string()),
                        log_level: Some("debug".to_string()),
                        ..ConfigOverrides::default()
                    },
                    ..LoadOptions::default()
                })
            },
        )
        .expect("config should load");

        assert_eq!(config.database.url, "sqlite://from-override.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.resolved_base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn missing_openai_key_fails_validation() {
        let error = with_vars(&[], || AppConfig::load(LoadOptions::default()))
            .expect_err("validation should fail");

        assert!(
            matches!(error, ConfigError::Validation(ref message) if message.contains("llm.api_key")),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn zero_iteration_budget_is_rejected() {
        let error = with_vars(
            &[("ANALYST_LLM_API_KEY", "sk-test"), ("ANALYST_AGENT_MAX_ITERATIONS", "0")],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect_err("zero budget should fail");

        assert!(matches!(error, ConfigError::Validation(ref message) if message.contains("agent.max_iterations")));
    }

    #[test]
    fn retry_budget_is_bounded() {
        let error = with_vars(
            &[("ANALYST_LLM_API_KEY", "sk-test"), ("ANALYST_LLM_MAX_RETRIES", "64")],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect_err("oversized retry budget should fail");
        assert!(matches!(error, ConfigError::Validation(ref message) if message.contains("llm.max_retries")));

        let config = with_vars(
            &[("ANALYST_LLM_API_KEY", "sk-test"), ("ANALYST_LLM_MAX_RETRIES", "10")],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect("upper bound is accepted");
        assert_eq!(config.llm.max_retries, MAX_LLM_RETRIES);
    }

    #[test]
    fn empty_log_window_is_rejected() {
        let error = with_vars(
            &[("ANALYST_LLM_API_KEY", "sk-test"), ("ANALYST_AGENT_LOG_WINDOW", "0")],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect_err("zero window should fail");

        assert!(matches!(error, ConfigError::Validation(ref message) if message.contains("agent.log_window")));
    }

    #[test]
    fn malformed_environment_value_names_the_variable() {
        let error = with_vars(
            &[("ANALYST_LLM_API_KEY", "sk-test"), ("ANALYST_SERVER_PORT", "eighty")],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect_err("malformed port should fail");

        assert!(matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "ANALYST_SERVER_PORT"));
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let config = with_vars(&[("ANALYST_LLM_API_KEY", "sk-secret-value")], || {
            AppConfig::load(LoadOptions::default())
        })
        .expect("config should load");

        assert!(!format!("{config:?}").contains("sk-secret-value"));
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.llm.resolved_base_url(), "https://api.openai.com/v1");
    }
}

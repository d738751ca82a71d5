use crate::error::ConfigError;
use crate::llm::{CircuitPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

const APP_NAME: &str = "askerp";
const DEFAULT_MODEL: &str = "mistral:instruct";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: "ollama".to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            max_tokens: 1536,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub failure_threshold: usize,
    pub failure_window_secs: u64,
    pub burst_window_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 10_000,
            failure_threshold: 3,
            failure_window_secs: 90,
            burst_window_secs: 30,
        }
    }
}

impl ResilienceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    pub fn circuit_policy(&self) -> CircuitPolicy {
        CircuitPolicy {
            threshold: self.failure_threshold.max(1),
            window: Duration::from_secs(self.failure_window_secs),
            burst: Duration::from_secs(self.burst_window_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub top_k: usize,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            top_k: crate::docs::DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub resilience: ResilienceConfig,
    pub store: StoreConfig,
    pub docs: DocsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(crate::tools::store::get_db_path)
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.docs.dir.clone().unwrap_or_else(|| get_data_dir().join("docs"))
    }

    /// Overrides taken from `lookup`, normally the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = read("LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read("LLM_API_KEY") {
            self.llm.api_key = value;
        }
        if let Some(value) = read("LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read("LLM_TEMPERATURE") {
            self.llm.temperature = parse("LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read("LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse("LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read("ASKERP_DB") {
            self.store.path = Some(PathBuf::from(value));
        }
        if let Some(value) = read("ASKERP_DOCS") {
            self.docs.dir = Some(PathBuf::from(value));
        }
        if let Some(value) = read("ASKERP_LOG") {
            self.logging.level = value;
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("config.toml")
}

/// Reads `path` if it exists; a missing file means defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Config file plus environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.apply_env_overrides(|key| env::var(key).ok())?;
    Ok(config)
}

pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = get_config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

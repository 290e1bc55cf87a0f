//! PlanWeaver configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::LlmError;

/// Main PlanWeaver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Default planner/executor models
    pub models: ModelsConfig,

    /// Step execution policy
    pub execution: ExecutionConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Scenario search paths
    pub scenarios: ScenariosConfig,

    /// Log level (overridden by --log-level)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the LLM API key environment variable is set. Call this
    /// before any command that talks to a model.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        if self.execution.max_attempts == 0 {
            return Err(eyre::eyre!("execution.max-attempts must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .planweaver.yml
        let local_config = PathBuf::from(".planweaver.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/planweaver/planweaver.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("planweaver").join("planweaver.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" (any OpenAI-compatible endpoint) or "anthropic"
    pub provider: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL (for openai, including the version segment)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Upper bound on tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String, LlmError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::MissingApiKey(self.api_key_env.clone()))
    }
}

/// Default models for the two roles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model used for intent analysis, proposals and decomposition
    pub planner: String,

    /// Model for steps that carry no assigned model
    pub executor: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            planner: "gemini-2.5-flash".to_string(),
            executor: "gemini-3-flash".to_string(),
        }
    }
}

/// Step execution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// LLM attempts per step before it is marked FAILED
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each later one
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Total step executions allowed per execute call
    #[serde(rename = "max-steps")]
    pub max_steps: usize,

    /// Steps of one ready batch run at the same time (1 = sequential)
    #[serde(rename = "max-concurrent-steps")]
    pub max_concurrent_steps: usize,

    /// max_tokens sent with each step call
    #[serde(rename = "step-max-tokens")]
    pub step_max_tokens: u32,

    /// IN_PROGRESS steps older than this are reported as stuck
    #[serde(rename = "stuck-after-secs")]
    pub stuck_after_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            max_steps: 100,
            max_concurrent_steps: 1,
            step_max_tokens: 8192,
            stuck_after_secs: 3600,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the plan store database
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/planweaver on Linux)
        let store_dir = dirs::data_dir()
            .map(|d| d.join("planweaver"))
            .unwrap_or_else(|| PathBuf::from(".planweaver"))
            .to_string_lossy()
            .into_owned();
        Self { store_dir }
    }
}

impl StorageConfig {
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store_dir)
    }
}

/// Scenario search paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenariosConfig {
    /// Directories searched in order for `*.yaml` scenario files
    pub paths: Vec<String>,
}

impl Default for ScenariosConfig {
    fn default() -> Self {
        Self {
            paths: vec![
                "~/.config/planweaver/scenarios".to_string(),
                "scenarios".to_string(),
            ],
        }
    }
}

impl ScenariosConfig {
    /// Expand paths (resolve ~/ and keep relative paths as-is)
    pub fn expanded_paths(&self) -> Vec<PathBuf> {
        self.paths.iter().map(|p| expand_home(p)).collect()
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

//! Refiner configuration loaded from a TOML file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level configuration.
///
/// Every table is optional; missing fields default to the values the
/// service has always shipped with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefinerConfig {
    /// Refinement rounds after the initial generation.
    pub max_round: u32,

    /// Maximum lines of diagnostics fed back into a refinement prompt.
    pub diagnostic_line_cap: usize,

    /// JUnit major version used until a client changes it.
    pub default_junit_version: u32,

    /// Models to run, in order, for every session.
    pub models: Vec<String>,

    pub llm: LlmConfig,
    pub executor: ExecutorConfig,
    pub project: ProjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root (`.../v1`).
    pub base_url: String,
    /// Environment variable holding the bearer key.
    pub api_key_env: String,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
    pub max_tokens: u32,
    /// Attempts per completion before substituting the placeholder.
    pub max_tries: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub compile_command: Vec<String>,
    /// `{test_class}` is replaced with the generated test's class name.
    pub test_command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: Option<String>,
    pub url: Option<String>,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            max_round: 3,
            diagnostic_line_cap: 20,
            default_junit_version: 4,
            models: vec!["gpt-4o".to_string()],
            llm: LlmConfig::default(),
            executor: ExecutorConfig::default(),
            project: ProjectConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            top_p: 0.1,
            seed: 1203,
            max_tokens: 5120,
            max_tries: 3,
            retry_backoff_ms: 1000,
            request_timeout_secs: 300,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            compile_command: vec![
                "mvn".to_string(),
                "-q".to_string(),
                "test-compile".to_string(),
            ],
            test_command: vec![
                "mvn".to_string(),
                "test".to_string(),
                "-Dtest={test_class}".to_string(),
            ],
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl LlmConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RefinerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.diagnostic_line_cap == 0 {
            return Err(anyhow!("diagnostic_line_cap must be > 0"));
        }
        if self.models.is_empty() || self.models.iter().any(|m| m.trim().is_empty()) {
            return Err(anyhow!("models must be a non-empty array of names"));
        }
        if self.llm.max_tries == 0 {
            return Err(anyhow!("llm.max_tries must be > 0"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow!("llm.base_url must not be empty"));
        }
        if self.executor.compile_command.is_empty()
            || self.executor.compile_command[0].trim().is_empty()
        {
            return Err(anyhow!("executor.compile_command must be a non-empty array"));
        }
        if self.executor.test_command.is_empty() || self.executor.test_command[0].trim().is_empty()
        {
            return Err(anyhow!("executor.test_command must be a non-empty array"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RefinerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RefinerConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = RefinerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RefinerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

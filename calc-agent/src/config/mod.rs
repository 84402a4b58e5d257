use crate::prompts::{
    DEFAULT_INITIAL_PROMPT, DEFAULT_REDUCING_PROMPT, DEFAULT_REDUCING_SYSTEM_PROMPT,
    DEFAULT_STEPWISE_SYSTEM_PROMPT, DEFAULT_SUBSEQUENT_PROMPT, EXPRESSION_PLACEHOLDER,
    STEPS_PLACEHOLDER,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/calculator.yaml";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const API_KEY_ENV_VARS: [&str; 4] =
    ["OPENAI_API_KEY", "OPEN_AI_TOKEN_2", "OPENAI_KEY", "OPEN_AI_KEY"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("API key not found in any of these environment variables: {0}")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepwiseConfig {
    pub system_prompt: String,
    pub initial_prompt: String,
    pub subsequent_prompt: String,
    pub append_messages: bool,
    pub return_tool_call_msgs: bool,
}

impl Default for StepwiseConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_STEPWISE_SYSTEM_PROMPT.to_string(),
            initial_prompt: DEFAULT_INITIAL_PROMPT.to_string(),
            subsequent_prompt: DEFAULT_SUBSEQUENT_PROMPT.to_string(),
            append_messages: true,
            return_tool_call_msgs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducingConfig {
    pub system_prompt: String,
    pub prompt: String,
    /// Fail with `AmbiguousSubstitution` instead of taking the leftmost match
    /// or leaving the expression untouched.
    pub strict_substitution: bool,
}

impl Default for ReducingConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_REDUCING_SYSTEM_PROMPT.to_string(),
            prompt: DEFAULT_REDUCING_PROMPT.to_string(),
            strict_substitution: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_env_var: Option<String>,
    pub max_llm_calls: usize,
    pub max_expression_length: usize,
    pub stepwise: StepwiseConfig,
    pub reducing: ReducingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key_env_var: None,
            max_llm_calls: 10,
            max_expression_length: 200,
            stepwise: StepwiseConfig::default(),
            reducing: ReducingConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads the config from `path`, or from [`DEFAULT_CONFIG_PATH`] when it
    /// exists, or falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return read_config(default_path);
        }
        debug!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
        Ok(Self::default())
    }

    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: AgentConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.max_llm_calls == 0 {
            return Err(ConfigError::Invalid("max_llm_calls must be at least 1".to_string()));
        }
        if self.max_expression_length == 0 {
            return Err(ConfigError::Invalid(
                "max_expression_length must be at least 1".to_string(),
            ));
        }

        let templates = [
            ("stepwise.initial_prompt", &self.stepwise.initial_prompt),
            ("stepwise.subsequent_prompt", &self.stepwise.subsequent_prompt),
            ("reducing.prompt", &self.reducing.prompt),
        ];
        for (name, template) in templates {
            if !template.contains(EXPRESSION_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "{} must contain {}",
                    name, EXPRESSION_PLACEHOLDER
                )));
            }
        }
        if !self.stepwise.subsequent_prompt.contains(STEPS_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "stepwise.subsequent_prompt must contain {}",
                STEPS_PLACEHOLDER
            )));
        }

        Ok(())
    }

    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_api_key_with<F>(&self, lookup: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut tried: Vec<&str> = Vec::new();
        if let Some(var) = self.api_key_env_var.as_deref() {
            tried.push(var);
        }
        let configured = self.api_key_env_var.as_deref();
        tried.extend(
            API_KEY_ENV_VARS
                .iter()
                .copied()
                .filter(|name| Some(*name) != configured),
        );

        for name in &tried {
            if let Some(value) = lookup(*name).filter(|v| !v.trim().is_empty()) {
                debug!("Using API key from environment variable {}", name);
                return Ok(value);
            }
        }

        Err(ConfigError::MissingApiKey(tried.join(", ")))
    }
}

fn read_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = AgentConfig::from_yaml(&content, path)?;
    info!(path = %path.display(), model = config.model.as_str(), "Loaded config");
    Ok(config)
}

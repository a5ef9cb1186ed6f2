use std::env;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "x-ai/grok-4-fast:free";
pub const DEFAULT_SUGGESTION_MAX_TOKENS: u32 = 300;
pub const DEFAULT_ANALYSIS_MAX_TOKENS: u32 = 2000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

/// Settings for talking to the completion API. The key is optional: without
/// it suggestions fall back to defaults and analysis reports an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub suggestion_max_tokens: u32,
    pub analysis_max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            suggestion_max_tokens: DEFAULT_SUGGESTION_MAX_TOKENS,
            analysis_max_tokens: DEFAULT_ANALYSIS_MAX_TOKENS,
        }
    }
}

impl CompletionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let api_key = lookup("OPENROUTER_API_KEY").filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!("OPENROUTER_API_KEY is not set; model calls are disabled");
        }

        Ok(Self {
            api_key,
            base_url: lookup("OPENROUTER_BASE_URL").unwrap_or(defaults.base_url),
            model: lookup("COMPLETION_MODEL").unwrap_or(defaults.model),
            suggestion_max_tokens: parse_tokens(
                "SUGGESTION_MAX_TOKENS",
                lookup("SUGGESTION_MAX_TOKENS"),
                defaults.suggestion_max_tokens,
            )?,
            analysis_max_tokens: parse_tokens(
                "ANALYSIS_MAX_TOKENS",
                lookup("ANALYSIS_MAX_TOKENS"),
                defaults.analysis_max_tokens,
            )?,
        })
    }
}

fn parse_tokens(name: &'static str, value: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::InvalidNumber { name, value: raw }),
        },
    }
}

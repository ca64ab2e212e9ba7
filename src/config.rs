//! Client configuration and credentials

use std::sync::Arc;
use thiserror::Error;

/// Default number of history messages fetched when a session page mounts
pub const DEFAULT_HISTORY_LIMIT: u32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid API URL {url:?}: expected an http or https URL")]
    InvalidUrl { url: String },
    #[error("invalid {name} value {value:?}: expected a positive integer")]
    InvalidNumber { name: &'static str, value: String },
}

/// Connection settings for the chatbot backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL without trailing slash, e.g. `https://bot.example.com/api`
    pub api_url: String,
    pub history_limit: u32,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Result<Self, ConfigError> {
        let api_url = api_url.into();
        let trimmed = api_url.trim().trim_end_matches('/');
        let valid = ["http://", "https://"]
            .iter()
            .any(|scheme| trimmed.len() > scheme.len() && trimmed.starts_with(scheme));
        if !valid {
            return Err(ConfigError::InvalidUrl { url: api_url });
        }
        Ok(Self {
            api_url: trimmed.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("CHATBOT_API_URL").ok_or(ConfigError::Missing("CHATBOT_API_URL"))?;
        let mut config = Self::new(api_url)?;

        if let Some(raw) = lookup("CHATBOT_HISTORY_LIMIT") {
            config.history_limit = raw
                .trim()
                .parse()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or(ConfigError::InvalidNumber {
                    name: "CHATBOT_HISTORY_LIMIT",
                    value: raw,
                })?;
        }
        Ok(config)
    }

    /// REST URL for `path` (which starts with `/`)
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    /// Socket URL for `path`: the API scheme upgraded to ws/wss
    pub fn push_url(&self, path: &str) -> String {
        let url = self.url(path);
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url
        }
    }
}

/// Source of the bearer token attached to every REST call
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed token, or none for unauthenticated deployments
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }

    pub fn from_env() -> Arc<dyn TokenProvider> {
        Arc::new(Self::new(std::env::var("CHATBOT_TOKEN").ok()))
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

//! Client construction for OpenAI-compatible endpoints.
//!
//! Analysis and transcription may point at different providers (OpenAI,
//! OpenRouter, DashScope and other compatible gateways), so each caller passes
//! its own base URL and API key variable.

use crate::error::{KlippError, Result};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for API requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Connection parameters for one endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint<'a> {
    pub base_url: Option<&'a str>,
    pub api_key_env: &'a str,
    pub timeout: Duration,
}

impl<'a> Endpoint<'a> {
    pub fn new(base_url: Option<&'a str>, api_key_env: &'a str) -> Self {
        Self {
            base_url,
            api_key_env,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Read an API key from the environment.
pub fn api_key(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        Ok(_) => Err(KlippError::Config(format!("{} is empty", env_var))),
        Err(_) => Err(KlippError::Config(format!(
            "{} not set. Set it with: export {}='...'",
            env_var, env_var
        ))),
    }
}

/// Create a client for `endpoint` with its timeout applied to every request.
pub fn create_client(endpoint: &Endpoint<'_>) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder().timeout(endpoint.timeout).build()?;

    let mut config = OpenAIConfig::new().with_api_key(api_key(endpoint.api_key_env)?);
    if let Some(base) = endpoint.base_url.filter(|b| !b.is_empty()) {
        config = config.with_api_base(base.trim_end_matches('/'));
    }

    Ok(Client::with_config(config).with_http_client(http_client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_a_config_error() {
        let err = api_key("KLIPP_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, KlippError::Config(_)));
    }
}

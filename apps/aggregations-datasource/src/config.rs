use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::services::aggregations::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT};

pub(crate) fn setup_config_path() -> Option<PathBuf> {
    env_optional_string("AGG_SETUP_CONFIG_PATH").map(PathBuf::from)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    api_base_url: Option<String>,
    #[serde(default)]
    api_token: Option<String>,
    #[serde(default)]
    request_timeout_seconds: Option<u64>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "setup config not found; using env values");
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env values"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env values"
            );
            None
        }
    }
}

fn apply_setup_overrides(config: &mut DatasourceConfig, overrides: &SetupConfigOverrides) {
    if let Some(url) = overrides
        .api_base_url
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        config.api_base_url = url.to_string();
    }
    if let Some(token) = overrides.api_token.as_deref() {
        let trimmed = token.trim();
        config.api_token = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
    if let Some(seconds) = overrides.request_timeout_seconds.filter(|v| *v != 0) {
        config.request_timeout = Duration::from_secs(seconds);
    }
}

#[derive(Debug, Clone)]
pub struct DatasourceConfig {
    pub api_base_url: String,
    /// Used when a request carries no `x-api-token` header of its own.
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl DatasourceConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            api_base_url: env_string("AGG_API_BASE_URL", DEFAULT_API_BASE_URL),
            api_token: env_optional_string("AGG_API_TOKEN"),
            request_timeout: Duration::from_secs(env_u64(
                "AGG_REQUEST_TIMEOUT_SECONDS",
                DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )),
        };
        if let Some(overrides) = setup_config_path()
            .as_deref()
            .and_then(load_setup_config_overrides)
        {
            apply_setup_overrides(&mut config, &overrides);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_base_url)
            .with_context(|| format!("AGG_API_BASE_URL is not a valid url: {}", self.api_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("AGG_API_BASE_URL must be http or https, got {}", url.scheme());
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("AGG_REQUEST_TIMEOUT_SECONDS must be greater than zero");
        }
        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

use std::time::Duration;

use kestrel_core::DEFAULT_SCOPE;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid KESTREL_API_URL {url}: {source}")]
    ApiUrl { url: String, source: url::ParseError },
}

/// Runtime knobs, read from `KESTREL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: Url,
    pub http_timeout: Duration,
    /// Scope used when no cluster is selected.
    pub default_scope: String,
    pub log_buffer_cap: usize,
    pub ws_ping: Duration,
    pub sweep_every: Duration,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> { std::env::var(key).ok().and_then(|s| s.parse().ok()) }

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let raw = std::env::var("KESTREL_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
        let api_url = Url::parse(&raw).map_err(|source| SettingsError::ApiUrl { url: raw.clone(), source })?;
        Ok(Self {
            api_url,
            http_timeout: Duration::from_secs(env_parse("KESTREL_HTTP_TIMEOUT_SECS").unwrap_or(10)),
            default_scope: std::env::var("KESTREL_DEFAULT_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string()),
            log_buffer_cap: env_parse("KESTREL_LOG_BUFFER_CAP").unwrap_or(10_000),
            ws_ping: Duration::from_secs(env_parse("KESTREL_WS_PING_SECS").unwrap_or(30)),
            sweep_every: Duration::from_secs(env_parse("KESTREL_CACHE_SWEEP_SECS").unwrap_or(60)),
        })
    }

    pub fn with_api_url(mut self, url: Url) -> Self {
        self.api_url = url;
        self
    }
}

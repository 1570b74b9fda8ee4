//! Configuration module for client settings and credentials

use crate::error::{RegistryError, Result};
use crate::registry::rate_limit::MIN_RATE;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_DOCKER_HUB_URL: &str = "https://hub.docker.com";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_USER_AGENT: &str = concat!("registry-explorer/", env!("CARGO_PKG_VERSION"));

/// Credentials resolved for one registry host.
///
/// Fields are checked in priority order by the transport: registry token,
/// identity token, then username/password.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub identity_token: Option<String>,
    pub registry_token: Option<String>,
}

impl AuthConfig {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            registry_token: Some(token.into()),
            ..Self::default()
        }
    }

    /// True when no field carries a usable credential
    pub fn is_empty(&self) -> bool {
        fn blank(v: &Option<String>) -> bool {
            v.as_deref().map_or(true, str::is_empty)
        }
        blank(&self.registry_token) && blank(&self.identity_token) && blank(&self.password)
    }

    pub fn has_basic(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Settings shared by every provider client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Per-request timeout in seconds
    pub request_timeout: u64,
    /// Optional deadline for a whole listing operation, in seconds
    pub operation_timeout: Option<u64>,
    pub user_agent: String,
    pub docker_hub_url: String,
    pub github_api_url: String,
    /// Page size requested from paginated APIs
    pub page_size: u32,
    /// DockerHub token bucket refill, tokens per second
    pub docker_hub_rate: f64,
    /// DockerHub token bucket capacity
    pub docker_hub_burst: u32,
    /// Hosts always spoken to over plain HTTP
    pub plain_http: Vec<String>,
    pub skip_tls: bool,
    pub verbose: bool,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            request_timeout: 30,
            operation_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            docker_hub_url: DEFAULT_DOCKER_HUB_URL.to_string(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            page_size: 100,
            docker_hub_rate: 1.0,
            docker_hub_burst: 15,
            plain_http: Vec::new(),
            skip_tls: false,
            verbose: false,
        }
    }
}

impl ExplorerConfig {
    /// Defaults overlaid with `REGISTRY_EXPLORER_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay `REGISTRY_EXPLORER_*` environment variables
    pub fn with_env(mut self) -> Self {
        if let Some(t) = env_parse::<u64>("REGISTRY_EXPLORER_TIMEOUT") {
            self.request_timeout = t;
        }
        if let Some(t) = env_parse::<u64>("REGISTRY_EXPLORER_OPERATION_TIMEOUT") {
            self.operation_timeout = Some(t);
        }
        if let Ok(url) = env::var("REGISTRY_EXPLORER_DOCKER_HUB_URL") {
            self.docker_hub_url = url;
        }
        if let Ok(url) = env::var("REGISTRY_EXPLORER_GITHUB_API_URL") {
            self.github_api_url = url;
        }
        if let Some(n) = env_parse::<u32>("REGISTRY_EXPLORER_PAGE_SIZE") {
            self.page_size = n;
        }
        if let Ok(hosts) = env::var("REGISTRY_EXPLORER_PLAIN_HTTP") {
            self.plain_http.extend(
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string),
            );
        }
        if env::var("REGISTRY_EXPLORER_SKIP_TLS").is_ok() {
            self.skip_tls = true;
        }
        if env::var("REGISTRY_EXPLORER_VERBOSE").is_ok() {
            self.verbose = true;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout == 0 {
            return Err(RegistryError::Validation(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(RegistryError::Validation(
                "Page size must be greater than 0".to_string(),
            ));
        }
        if !(self.docker_hub_rate >= MIN_RATE && self.docker_hub_rate.is_finite()) {
            return Err(RegistryError::Validation(format!(
                "DockerHub rate must be a finite value of at least {}",
                MIN_RATE
            )));
        }
        if self.docker_hub_burst == 0 {
            return Err(RegistryError::Validation(
                "DockerHub burst must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("DockerHub URL", &self.docker_hub_url),
            ("GitHub API URL", &self.github_api_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| RegistryError::Validation(format!("Invalid {}: {}", name, e)))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout.map(Duration::from_secs)
    }

    pub fn is_plain_http(&self, host: &str) -> bool {
        self.plain_http.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    /// Build the HTTP client every provider shares
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(self.user_agent.clone())
            .danger_accept_invalid_certs(self.skip_tls)
            .build()
            .map_err(|e| RegistryError::Network(format!("Failed to create HTTP client: {}", e)))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

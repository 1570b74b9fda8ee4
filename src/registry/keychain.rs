//! Credential lookup per registry host
//!
//! The transport asks a [`Keychain`] for the credentials of a host before
//! every request. The default chain reads explicit environment variables
//! first and then the Docker CLI configuration file, so anything you can
//! `docker pull` with is also usable for listing.

use crate::config::AuthConfig;
use crate::error::{RegistryError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host name the Docker CLI stores Docker Hub credentials under
pub const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Resolves the credentials to use for a registry host
pub trait Keychain: Send + Sync + fmt::Debug {
    /// An empty [`AuthConfig`] means "anonymous", not an error
    fn resolve(&self, host: &str) -> Result<AuthConfig>;
}

/// Never returns credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Keychain for Anonymous {
    fn resolve(&self, _host: &str) -> Result<AuthConfig> {
        Ok(AuthConfig::anonymous())
    }
}

/// Fixed per-host credentials
#[derive(Debug, Clone, Default)]
pub struct StaticKeychain {
    entries: HashMap<String, AuthConfig>,
}

impl StaticKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, auth: AuthConfig) -> Self {
        self.entries.insert(normalize_host(host), auth);
        self
    }
}

impl Keychain for StaticKeychain {
    fn resolve(&self, host: &str) -> Result<AuthConfig> {
        Ok(self
            .entries
            .get(&normalize_host(host))
            .cloned()
            .unwrap_or_default())
    }
}

/// Credentials from `REGISTRY_EXPLORER_USERNAME`, `REGISTRY_EXPLORER_PASSWORD`
/// and `REGISTRY_EXPLORER_TOKEN`, limited to `REGISTRY_EXPLORER_AUTH_HOST`
/// when that is set.
#[derive(Debug, Clone, Default)]
pub struct EnvKeychain {
    auth: AuthConfig,
    host: Option<String>,
}

impl EnvKeychain {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        Self {
            auth: AuthConfig {
                username: var("REGISTRY_EXPLORER_USERNAME"),
                password: var("REGISTRY_EXPLORER_PASSWORD"),
                identity_token: None,
                registry_token: var("REGISTRY_EXPLORER_TOKEN"),
            },
            host: var("REGISTRY_EXPLORER_AUTH_HOST").map(|h| normalize_host(&h)),
        }
    }
}

impl Keychain for EnvKeychain {
    fn resolve(&self, host: &str) -> Result<AuthConfig> {
        match &self.host {
            Some(only) if *only != normalize_host(host) => Ok(AuthConfig::anonymous()),
            _ => Ok(self.auth.clone()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "identitytoken")]
    identity_token: Option<String>,
    #[serde(default, rename = "registrytoken")]
    registry_token: Option<String>,
}

/// Reads the `auths` section of a Docker CLI `config.json`.
///
/// The file is read on every lookup. Credential helpers are not consulted.
#[derive(Debug, Clone)]
pub struct DockerConfigKeychain {
    path: PathBuf,
}

impl DockerConfigKeychain {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`
    pub fn from_default_location() -> Option<Self> {
        if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
            return Some(Self::new(Path::new(&dir).join("config.json")));
        }
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok()?;
        Some(Self::new(Path::new(&home).join(".docker").join("config.json")))
    }

    fn load(&self) -> Result<DockerConfigFile> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DockerConfigFile::default());
            }
            Err(e) => {
                return Err(RegistryError::Keychain(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            RegistryError::Keychain(format!("parsing {}: {}", self.path.display(), e))
        })
    }
}

impl Keychain for DockerConfigKeychain {
    fn resolve(&self, host: &str) -> Result<AuthConfig> {
        let config = self.load()?;
        let wanted = normalize_host(host);

        let Some(entry) = config
            .auths
            .iter()
            .find(|(key, _)| normalize_host(key) == wanted)
            .map(|(_, entry)| entry)
        else {
            return Ok(AuthConfig::anonymous());
        };

        let mut auth = AuthConfig {
            username: entry.username.clone(),
            password: entry.password.clone(),
            identity_token: entry.identity_token.clone().filter(|t| !t.is_empty()),
            registry_token: entry.registry_token.clone().filter(|t| !t.is_empty()),
        };

        if let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
            let decoded = STANDARD.decode(encoded.trim()).map_err(|e| {
                RegistryError::Keychain(format!("decoding auth for {}: {}", host, e))
            })?;
            let decoded = String::from_utf8(decoded).map_err(|e| {
                RegistryError::Keychain(format!("decoding auth for {}: {}", host, e))
            })?;
            let (username, password) = decoded.split_once(':').ok_or_else(|| {
                RegistryError::Keychain(format!("auth for {} is not 'username:password'", host))
            })?;
            auth.username = Some(username.to_string());
            auth.password = Some(password.to_string());
        }

        Ok(auth)
    }
}

/// Tries each keychain in order; the first non-empty answer wins
#[derive(Debug, Clone, Default)]
pub struct MultiKeychain {
    keychains: Vec<Arc<dyn Keychain>>,
}

impl MultiKeychain {
    pub fn new(keychains: Vec<Arc<dyn Keychain>>) -> Self {
        Self { keychains }
    }
}

impl Keychain for MultiKeychain {
    fn resolve(&self, host: &str) -> Result<AuthConfig> {
        for keychain in &self.keychains {
            let auth = keychain.resolve(host)?;
            if !auth.is_empty() {
                return Ok(auth);
            }
        }
        Ok(AuthConfig::anonymous())
    }
}

/// Environment variables, then the Docker CLI configuration
pub fn default_keychain() -> Arc<dyn Keychain> {
    let mut keychains: Vec<Arc<dyn Keychain>> = vec![Arc::new(EnvKeychain::from_env())];
    if let Some(docker) = DockerConfigKeychain::from_default_location() {
        keychains.push(Arc::new(docker));
    }
    Arc::new(MultiKeychain::new(keychains))
}

/// Reduce a registry key (`https://index.docker.io/v1/`, `ghcr.io`, ...) to
/// the bare authority, folding the Docker Hub aliases together.
pub fn normalize_host(key: &str) -> String {
    let key = key.trim();
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = key.split('/').next().unwrap_or(key).to_ascii_lowercase();
    match host.as_str() {
        "docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" | "hub.docker.com" => {
            "index.docker.io".to_string()
        }
        _ => host,
    }
}

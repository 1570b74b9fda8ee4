//! Registry clients and provider dispatch
//!
//! A [`RegistryClient`] lists child repositories and manifests for one
//! registry host. Several providers implement it against very different
//! backend APIs; the [`resolver::Resolver`] picks one per host.

pub mod auth;
pub mod keychain;
pub mod pagination;
pub mod providers;
pub mod rate_limit;
pub mod resolver;
pub mod transport;

pub use keychain::{Keychain, default_keychain};
pub use resolver::{Provider, Resolver};
pub use transport::AuthTransport;

use crate::catalog::{ListOptions, ManifestList, RepositoryList};
use crate::config::ExplorerConfig;
use crate::error::Result;
use crate::logging::Logger;
use crate::reference::Registry;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Backend family a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any registry implementing the distribution `/v2/` API
    Registry,
    Google,
    Github,
    DockerHub,
    Harbor,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Registry => "registry",
            ProviderKind::Google => "google",
            ProviderKind::Github => "github",
            ProviderKind::DockerHub => "dockerhub",
            ProviderKind::Harbor => "harbor",
        };
        f.write_str(name)
    }
}

/// Listing operations every provider implements
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Child repositories of `repository`, relative to it
    async fn list_repositories(
        &self,
        repository: &str,
        options: &ListOptions,
    ) -> Result<RepositoryList>;

    /// Manifests stored directly in `repository`
    async fn list_manifests(&self, repository: &str, options: &ListOptions)
    -> Result<ManifestList>;
}

/// Everything a provider needs to build its client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub config: Arc<ExplorerConfig>,
    pub keychain: Arc<dyn Keychain>,
    pub http: reqwest::Client,
    pub logger: Logger,
}

impl ClientSettings {
    pub fn new(config: ExplorerConfig, keychain: Arc<dyn Keychain>) -> Result<Self> {
        config.validate()?;
        let http = config.http_client()?;
        let logger = Logger::new(config.verbose);
        Ok(Self {
            config: Arc::new(config),
            keychain,
            http,
            logger,
        })
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Validated registry for `host`, honouring the plain-HTTP list
    pub fn registry(&self, host: &str) -> Result<Registry> {
        Ok(Registry::new(host)?.with_plain_http(self.config.is_plain_http(host)))
    }

    /// A fresh transport over the shared HTTP client and keychain
    pub fn transport(&self) -> AuthTransport {
        AuthTransport::new(self.http.clone(), self.keychain.clone()).with_logger(self.logger.clone())
    }
}

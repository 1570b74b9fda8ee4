//! Picks the client for a registry host
//!
//! Specialized providers are tried in a fixed order; the first one that
//! claims the host wins. Anything unclaimed is spoken to as a plain
//! distribution registry.

use crate::error::Result;
use crate::reference::validate_host;
use crate::registry::providers::dockerhub::is_docker_host;
use crate::registry::providers::github::GHCR_HOST;
use crate::registry::providers::google::is_google_host;
use crate::registry::providers::{
    DistributionClient, DockerHubClient, GithubClient, GoogleClient, HarborClient,
};
use crate::registry::{ClientSettings, ProviderKind, RegistryClient};

/// A specialized backend the resolver can dispatch to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Github,
    DockerHub,
    Harbor,
}

/// Dispatch order used by [`Resolver::new`]
pub const DEFAULT_PROVIDERS: [Provider; 4] = [
    Provider::Google,
    Provider::Github,
    Provider::DockerHub,
    Provider::Harbor,
];

impl Provider {
    pub fn kind(self) -> ProviderKind {
        match self {
            Provider::Google => ProviderKind::Google,
            Provider::Github => ProviderKind::Github,
            Provider::DockerHub => ProviderKind::DockerHub,
            Provider::Harbor => ProviderKind::Harbor,
        }
    }

    /// Whether this provider serves `host`. Only Harbor needs the network;
    /// a failed probe means "not mine".
    pub async fn probe(self, host: &str, settings: &ClientSettings) -> bool {
        match self {
            Provider::Google => is_google_host(host),
            Provider::Github => host == GHCR_HOST,
            Provider::DockerHub => is_docker_host(host),
            Provider::Harbor => match HarborClient::connect(host, settings) {
                Ok(client) => client.probe().await,
                Err(_) => false,
            },
        }
    }

    /// Build the client for a host this provider claimed
    pub fn connect(self, host: &str, settings: &ClientSettings) -> Result<Box<dyn RegistryClient>> {
        Ok(match self {
            Provider::Google => Box::new(GoogleClient::connect(host, settings)?),
            Provider::Github => Box::new(GithubClient::connect(host, settings)?),
            Provider::DockerHub => Box::new(DockerHubClient::connect(host, settings)?),
            Provider::Harbor => Box::new(HarborClient::connect(host, settings)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    settings: ClientSettings,
    providers: Vec<Provider>,
}

impl Resolver {
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_providers(settings, DEFAULT_PROVIDERS.to_vec())
    }

    /// Resolver trying exactly `providers`, in order, before the fallback
    pub fn with_providers(settings: ClientSettings, providers: Vec<Provider>) -> Self {
        Self { settings, providers }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// The client for `host`.
    ///
    /// A provider that claims the host but then reports `NotSupported` is
    /// skipped like one that never claimed it. Any other error is returned.
    pub async fn resolve(&self, host: &str) -> Result<Box<dyn RegistryClient>> {
        validate_host(host)?;
        let logger = &self.settings.logger;

        for provider in &self.providers {
            if !provider.probe(host, &self.settings).await {
                continue;
            }
            match provider.connect(host, &self.settings) {
                Ok(client) => {
                    logger.verbose(&format!("Using {} client for {}", client.kind(), host));
                    return Ok(client);
                }
                Err(e) if e.is_not_supported() => {
                    logger.debug(&format!("{} declined {}: {}", provider.kind(), host, e));
                }
                Err(e) => return Err(e),
            }
        }

        logger.verbose(&format!("Using {} client for {}", ProviderKind::Registry, host));
        Ok(Box::new(DistributionClient::connect(host, &self.settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExplorerConfig;
    use crate::registry::keychain::Anonymous;
    use std::sync::Arc;

    fn resolver() -> Resolver {
        let settings = ClientSettings::new(ExplorerConfig::default(), Arc::new(Anonymous)).unwrap();
        Resolver::new(settings)
    }

    #[tokio::test]
    async fn test_known_hosts() {
        let r = resolver();
        for (host, kind) in [
            ("ghcr.io", ProviderKind::Github),
            ("gcr.io", ProviderKind::Google),
            ("us-docker.pkg.dev", ProviderKind::Google),
            ("docker.io", ProviderKind::DockerHub),
            ("index.docker.io", ProviderKind::DockerHub),
        ] {
            assert_eq!(r.resolve(host).await.unwrap().kind(), kind, "{}", host);
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_falls_back() {
        let client = resolver().resolve("127.0.0.1:1").await.unwrap();
        assert_eq!(client.kind(), ProviderKind::Registry);
    }

    #[tokio::test]
    async fn test_explicit_provider_order() {
        let settings = ClientSettings::new(ExplorerConfig::default(), Arc::new(Anonymous)).unwrap();
        let r = Resolver::with_providers(settings, vec![Provider::DockerHub]);
        assert_eq!(r.resolve("ghcr.io").await.unwrap().kind(), ProviderKind::Registry);
    }

    #[tokio::test]
    async fn test_invalid_host() {
        assert!(resolver().resolve("not a host").await.is_err());
        assert!(resolver().resolve("").await.is_err());
    }

    #[tokio::test]
    async fn test_static_probes() {
        let settings = ClientSettings::new(ExplorerConfig::default(), Arc::new(Anonymous)).unwrap();
        assert!(Provider::Github.probe("ghcr.io", &settings).await);
        assert!(!Provider::Github.probe("docker.io", &settings).await);
        assert!(Provider::DockerHub.probe("hub.docker.com", &settings).await);
        assert!(!Provider::Google.probe("quay.io", &settings).await);
        assert_eq!(Provider::Harbor.kind(), ProviderKind::Harbor);
    }
}

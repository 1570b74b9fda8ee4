//! DockerHub, listed through the Hub REST API
//!
//! Hub repositories are exactly `namespace/name`, so the hierarchy is two
//! levels deep. Every request goes through a token bucket to stay under the
//! Hub's rate limits, and carries the credentials configured for
//! `index.docker.io`.

use super::{decode_json, optional_time};
use crate::catalog::{ListOptions, ManifestAggregator, ManifestList, ManifestRecord, RepositoryList};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result, ResultExt};
use crate::logging::Logger;
use crate::registry::keychain::DOCKER_HUB_AUTH_KEY;
use crate::registry::pagination::Page;
use crate::registry::rate_limit::RateLimiter;
use crate::registry::transport::AuthTransport;
use crate::registry::{ClientSettings, ProviderKind, RegistryClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

/// Whether `host` is a DockerHub alias
pub fn is_docker_host(host: &str) -> bool {
    host == "docker.io"
        || host.ends_with(".docker.io")
        || host == "docker.com"
        || host.ends_with(".docker.com")
}

#[derive(Debug, Deserialize)]
struct HubPage<T> {
    #[serde(default)]
    next: Option<String>,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

impl<T> From<HubPage<T>> for Page<T> {
    fn from(page: HubPage<T>) -> Self {
        Page::new(page.results, page.next.filter(|n| !n.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubRepository {
    #[serde(default)]
    pub name: String,
}

/// One tag of a Hub repository with the platform images behind it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubTag {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default, deserialize_with = "optional_time")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<HubImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubImage {
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default, deserialize_with = "optional_time")]
    pub last_pushed: Option<DateTime<Utc>>,
}

impl HubTag {
    /// The tagged manifest, followed by one untagged record per image
    fn into_records(self) -> Vec<ManifestRecord> {
        let mut records = Vec::with_capacity(self.images.len() + 1);
        if let Some(digest) = self.digest {
            records.push(
                ManifestRecord::new(digest)
                    .with_tag(self.name)
                    .with_media_type(self.media_type)
                    .with_updated(self.last_updated),
            );
        }
        records.extend(self.images.into_iter().filter_map(|image| {
            image
                .digest
                .map(|digest| ManifestRecord::new(digest).with_updated(image.last_pushed))
        }));
        records
    }
}

#[async_trait]
pub trait HubApi: Send + Sync {
    async fn repositories_page(&self, namespace: &str, cursor: Option<&str>) -> Result<Page<HubRepository>>;

    /// `Ok` when `namespace/name` exists, `NotFound` when it does not
    async fn repository_exists(&self, namespace: &str, name: &str) -> Result<()>;

    async fn tags_page(&self, namespace: &str, name: &str, cursor: Option<&str>) -> Result<Page<HubTag>>;
}

#[derive(Debug, Clone)]
pub struct HttpHubApi {
    base: Url,
    transport: AuthTransport,
    page_size: u32,
}

impl HttpHubApi {
    pub fn new(hub_url: &str, transport: AuthTransport, limiter: Arc<RateLimiter>, page_size: u32) -> Result<Self> {
        Ok(Self {
            base: Url::parse(hub_url)?,
            transport: transport
                .with_resource(DOCKER_HUB_AUTH_KEY)
                .with_rate_limiter(limiter),
            page_size,
        })
    }

    fn namespace_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::Validation(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(["v2", "namespaces"])
            .extend(segments);
        Ok(url)
    }

    fn first_page(&self, segments: &[&str], cursor: Option<&str>) -> Result<Url> {
        if let Some(next) = cursor {
            return Ok(Url::parse(next)?);
        }
        let mut url = self.namespace_url(segments)?;
        url.query_pairs_mut()
            .append_pair("page_size", &self.page_size.min(100).to_string());
        Ok(url)
    }
}

#[async_trait]
impl HubApi for HttpHubApi {
    async fn repositories_page(&self, namespace: &str, cursor: Option<&str>) -> Result<Page<HubRepository>> {
        let url = self.first_page(&[namespace, "repositories"], cursor)?;
        let response = self.transport.get(&url).await?;
        let page: HubPage<HubRepository> = decode_json(response, "listing repositories").await?;
        Ok(page.into())
    }

    async fn repository_exists(&self, namespace: &str, name: &str) -> Result<()> {
        let url = self.namespace_url(&[namespace, "repositories", name])?;
        let response = self.transport.get(&url).await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            _ => Err(HttpErrorHandler::from_response(response, "checking repository").await),
        }
    }

    async fn tags_page(&self, namespace: &str, name: &str, cursor: Option<&str>) -> Result<Page<HubTag>> {
        let url = self.first_page(&[namespace, "repositories", name, "tags"], cursor)?;
        let response = self.transport.get(&url).await?;
        let page: HubPage<HubTag> = decode_json(response, "listing tags").await?;
        Ok(page.into())
    }
}

pub struct DockerHubClient<A = HttpHubApi> {
    api: A,
    logger: Logger,
}

impl DockerHubClient<HttpHubApi> {
    /// `NotSupported` unless `host` is a DockerHub alias
    pub fn connect(host: &str, settings: &ClientSettings) -> Result<Self> {
        if !is_docker_host(host) {
            return Err(RegistryError::NotSupported(host.to_string()));
        }
        let limiter = Arc::new(RateLimiter::new(
            settings.config.docker_hub_rate,
            settings.config.docker_hub_burst,
        ));
        let api = HttpHubApi::new(
            &settings.config.docker_hub_url,
            settings.transport(),
            limiter,
            settings.config.page_size,
        )?;
        Ok(Self::with_api(api, settings.logger.scoped("dockerhub")))
    }
}

impl<A: HubApi> DockerHubClient<A> {
    pub fn with_api(api: A, logger: Logger) -> Self {
        Self { api, logger }
    }
}

fn split_segments(repository: &str) -> Vec<&str> {
    repository.split('/').collect()
}

#[async_trait]
impl<A: HubApi> RegistryClient for DockerHubClient<A> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DockerHub
    }

    /// A namespace lists its repositories; a repository has no children
    /// but must exist.
    async fn list_repositories(&self, repository: &str, _options: &ListOptions) -> Result<RepositoryList> {
        let segments = split_segments(repository);
        match segments.as_slice() {
            [namespace] => {
                let mut names = Vec::new();
                let mut cursor: Option<String> = None;
                loop {
                    let page = self
                        .api
                        .repositories_page(namespace, cursor.as_deref())
                        .await
                        .context("listing repositories")?;
                    self.logger
                        .detail(&format!("{}: {} repositories", namespace, page.items.len()));
                    names.extend(page.items.into_iter().map(|r| r.name).filter(|n| !n.is_empty()));
                    match page.next {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                names.sort();
                names.dedup();
                Ok(RepositoryList {
                    name: repository.to_string(),
                    repositories: names,
                })
            }
            [namespace, name] => {
                self.api.repository_exists(namespace, name).await?;
                Ok(RepositoryList {
                    name: repository.to_string(),
                    repositories: Vec::new(),
                })
            }
            _ => Err(RegistryError::NotFound(format!("repository {}", repository))),
        }
    }

    async fn list_manifests(&self, repository: &str, _options: &ListOptions) -> Result<ManifestList> {
        let segments = split_segments(repository);
        let (namespace, name) = match segments.as_slice() {
            [_] => return Ok(ManifestList::default()),
            [namespace, name] => (*namespace, *name),
            _ => return Err(RegistryError::NotFound(format!("repository {}", repository))),
        };

        let mut manifests = ManifestAggregator::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .api
                .tags_page(namespace, name, cursor.as_deref())
                .await
                .with_context(|| format!("listing tags for {}", repository))?;
            for tag in page.items {
                manifests.merge_page(tag.into_records());
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(manifests.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHub {
        repositories: Vec<Vec<&'static str>>,
        existing: Vec<&'static str>,
        tags: Vec<Vec<HubTag>>,
        calls: Mutex<Vec<String>>,
    }

    fn next(index: usize, len: usize) -> Option<String> {
        (index + 1 < len).then(|| (index + 1).to_string())
    }

    #[async_trait]
    impl HubApi for FakeHub {
        async fn repositories_page(&self, namespace: &str, cursor: Option<&str>) -> Result<Page<HubRepository>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("repositories {} {:?}", namespace, cursor));
            let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let items = self.repositories[index]
                .iter()
                .map(|n| HubRepository { name: n.to_string() })
                .collect();
            Ok(Page::new(items, next(index, self.repositories.len())))
        }

        async fn repository_exists(&self, namespace: &str, name: &str) -> Result<()> {
            let full = format!("{}/{}", namespace, name);
            self.calls.lock().unwrap().push(format!("exists {}", full));
            if self.existing.contains(&full.as_str()) {
                Ok(())
            } else {
                Err(RegistryError::NotFound(format!("checking repository: {}", full)))
            }
        }

        async fn tags_page(&self, namespace: &str, name: &str, cursor: Option<&str>) -> Result<Page<HubTag>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("tags {}/{} {:?}", namespace, name, cursor));
            let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            Ok(Page::new(self.tags[index].clone(), next(index, self.tags.len())))
        }
    }

    fn client(api: FakeHub) -> DockerHubClient<FakeHub> {
        DockerHubClient::with_api(api, Logger::new_quiet())
    }

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn tag(name: &str, digest: &str, updated: i64, images: &[(&str, i64)]) -> HubTag {
        HubTag {
            name: name.to_string(),
            digest: Some(digest.to_string()),
            media_type: None,
            last_updated: at(updated),
            images: images
                .iter()
                .map(|(d, pushed)| HubImage {
                    digest: Some(d.to_string()),
                    last_pushed: at(*pushed),
                })
                .collect(),
        }
    }

    #[test]
    fn test_is_docker_host() {
        for host in ["docker.io", "index.docker.io", "registry-1.docker.io", "docker.com", "hub.docker.com"] {
            assert!(is_docker_host(host), "{}", host);
        }
        for host in ["notdocker.io", "ghcr.io", "docker.io.example.com"] {
            assert!(!is_docker_host(host), "{}", host);
        }
    }

    #[tokio::test]
    async fn test_list_namespace_across_pages() {
        let api = FakeHub {
            repositories: vec![vec!["nginx", "alpine"], vec!["busybox"]],
            ..FakeHub::default()
        };
        let c = client(api);
        let list = c.list_repositories("library", &ListOptions::default()).await.unwrap();
        assert_eq!(list.name, "library");
        assert_eq!(list.repositories, vec!["alpine", "busybox", "nginx"]);
        assert_eq!(c.api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_repository_has_no_children() {
        let api = FakeHub {
            existing: vec!["library/nginx"],
            ..FakeHub::default()
        };
        let c = client(api);
        let list = c.list_repositories("library/nginx", &ListOptions::recursive()).await.unwrap();
        assert!(list.repositories.is_empty());

        let err = c
            .list_repositories("library/missing", &ListOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_deep_reference_is_not_found() {
        let c = client(FakeHub::default());
        let err = c
            .list_repositories("library/nginx/extra", &ListOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = c
            .list_manifests("library/nginx/extra", &ListOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(c.api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespace_has_no_manifests() {
        let c = client(FakeHub::default());
        let list = c.list_manifests("library", &ListOptions::default()).await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_tags_and_images_merge_by_digest() {
        let api = FakeHub {
            tags: vec![
                vec![
                    tag("latest", "sha256:index", 300, &[("sha256:amd64", 100), ("sha256:arm64", 200)]),
                    tag("1.25", "sha256:index", 250, &[("sha256:amd64", 150)]),
                ],
                vec![tag("1.24", "sha256:old", 50, &[])],
            ],
            ..FakeHub::default()
        };
        let list = client(api)
            .list_manifests("library/nginx", &ListOptions::default())
            .await
            .unwrap();

        assert_eq!(list.len(), 4);
        let by_digest = |d: &str| list.manifests.iter().find(|m| m.digest == d).unwrap();

        let index = by_digest("sha256:index");
        assert_eq!(index.tags.iter().collect::<Vec<_>>(), vec!["1.25", "latest"]);
        assert_eq!(index.updated, at(300));

        let amd64 = by_digest("sha256:amd64");
        assert!(amd64.tags.is_empty());
        assert_eq!(amd64.updated, at(150));

        assert_eq!(by_digest("sha256:old").tags.iter().collect::<Vec<_>>(), vec!["1.24"]);
    }

    #[test]
    fn test_decode_tags_page() {
        let body = r#"{
            "count": 2,
            "next": "https://hub.docker.com/v2/namespaces/library/repositories/nginx/tags?page=2",
            "previous": null,
            "results": [
                {
                    "name": "latest",
                    "digest": "sha256:index",
                    "media_type": "application/vnd.oci.image.index.v1+json",
                    "last_updated": "2024-05-01T10:00:00.123456Z",
                    "images": [
                        {"architecture": "amd64", "digest": "sha256:amd64", "last_pushed": "2024-05-01T09:59:00Z"},
                        {"architecture": "unknown", "digest": null, "last_pushed": null}
                    ]
                },
                {"name": "ancient", "digest": "sha256:x", "last_updated": "0001-01-01T00:00:00Z", "images": []}
            ]
        }"#;
        let page: Page<HubTag> = serde_json::from_str::<HubPage<HubTag>>(body).unwrap().into();
        assert!(page.next.is_some());

        let records: Vec<ManifestRecord> = page.items.into_iter().flat_map(HubTag::into_records).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].tags, vec!["latest"]);
        assert_eq!(
            records[0].media_type.as_deref(),
            Some("application/vnd.oci.image.index.v1+json")
        );
        assert!(records[1].tags.is_empty());
        assert_eq!(records[2].updated, None);
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let body = r#"{"count": 0, "next": null, "results": []}"#;
        let page: Page<HubRepository> = serde_json::from_str::<HubPage<HubRepository>>(body).unwrap().into();
        assert!(page.is_last());
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_hub_urls() {
        let transport = AuthTransport::new(
            reqwest::Client::new(),
            Arc::new(crate::registry::keychain::Anonymous),
        );
        let api = HttpHubApi::new(
            "https://hub.docker.com",
            transport,
            Arc::new(RateLimiter::new(1.0, 15)),
            100,
        )
        .unwrap();
        assert_eq!(
            api.first_page(&["library", "repositories"], None).unwrap().as_str(),
            "https://hub.docker.com/v2/namespaces/library/repositories?page_size=100"
        );
        assert_eq!(
            api.namespace_url(&["library", "repositories", "nginx"]).unwrap().as_str(),
            "https://hub.docker.com/v2/namespaces/library/repositories/nginx"
        );
    }
}

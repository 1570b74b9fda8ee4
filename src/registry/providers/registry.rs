//! Generic client for any registry implementing the distribution `/v2/` API.
//!
//! Only suitable where no more specific provider exists: repositories come
//! from `/v2/_catalog`, which may be slow or disabled on large registries,
//! and every tag costs one `HEAD` request to learn its digest.

use super::decode_json;
use crate::catalog::{
    ChildRepositories, ListOptions, ManifestAggregator, ManifestList, ManifestRecord, RepositoryList,
};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result, ResultExt};
use crate::logging::Logger;
use crate::reference::Registry;
use crate::registry::pagination::{Page, next_link};
use crate::registry::transport::AuthTransport;
use crate::registry::{ClientSettings, ProviderKind, RegistryClient};
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.v1+prettyjws";

const DIGEST_HEADER: &str = "docker-content-digest";

/// Digest and media type of the manifest a tag points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub digest: String,
    pub media_type: Option<String>,
}

/// Distribution API calls the generic client needs
#[async_trait]
pub trait DistributionApi: Send + Sync {
    /// One page of `/v2/_catalog`
    async fn catalog_page(&self, cursor: Option<&str>) -> Result<Page<String>>;

    /// One page of `/v2/<repository>/tags/list`; `NotFound` for unknown
    /// repositories
    async fn tags_page(&self, repository: &str, cursor: Option<&str>) -> Result<Page<String>>;

    /// Resolve a tag to its manifest descriptor
    async fn head_manifest(&self, repository: &str, tag: &str) -> Result<Descriptor>;
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// [`DistributionApi`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpDistributionApi {
    base: Url,
    transport: AuthTransport,
    page_size: u32,
}

impl HttpDistributionApi {
    pub fn new(registry: &Registry, transport: AuthTransport, page_size: u32) -> Result<Self> {
        Ok(Self {
            base: registry.base_url()?,
            transport: transport.with_token_exchange(true),
            page_size,
        })
    }

    fn first_page(&self, path_segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::Validation(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(path_segments);
        url.query_pairs_mut().append_pair("n", &self.page_size.to_string());
        Ok(url)
    }

    fn cursor_or(&self, cursor: Option<&str>, first: impl FnOnce() -> Result<Url>) -> Result<Url> {
        match cursor {
            Some(next) => Ok(Url::parse(next)?),
            None => first(),
        }
    }

    fn repository_segments(repository: &str) -> Vec<&str> {
        let mut segments = vec!["v2"];
        segments.extend(repository.split('/'));
        segments
    }
}

#[async_trait]
impl DistributionApi for HttpDistributionApi {
    async fn catalog_page(&self, cursor: Option<&str>) -> Result<Page<String>> {
        let url = self.cursor_or(cursor, || self.first_page(&["v2", "_catalog"]))?;
        let response = self.transport.get(&url).await?;
        let next = next_link(response.headers(), &url).map(String::from);
        let body: CatalogResponse = decode_json(response, "catalog").await?;
        Ok(Page::new(body.repositories.unwrap_or_default(), next))
    }

    async fn tags_page(&self, repository: &str, cursor: Option<&str>) -> Result<Page<String>> {
        let url = self.cursor_or(cursor, || {
            let mut segments = Self::repository_segments(repository);
            segments.extend(["tags", "list"]);
            self.first_page(&segments)
        })?;
        let response = self.transport.get(&url).await?;
        let next = next_link(response.headers(), &url).map(String::from);
        let body: TagsResponse = decode_json(response, "tag listing").await?;
        Ok(Page::new(body.tags.unwrap_or_default(), next))
    }

    async fn head_manifest(&self, repository: &str, tag: &str) -> Result<Descriptor> {
        let mut url = self.base.clone();
        let mut segments = Self::repository_segments(repository);
        segments.extend(["manifests", tag]);
        url.path_segments_mut()
            .map_err(|_| RegistryError::Validation(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(&segments);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));

        // Some registries omit the digest header on HEAD; GET always has it
        for method in [Method::HEAD, Method::GET] {
            let response = self.transport.send(method, &url, headers.clone()).await?;
            if !response.status().is_success() {
                return Err(HttpErrorHandler::from_response(response, "manifest lookup").await);
            }
            let header = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .filter(|v| !v.is_empty())
            };
            if let Some(digest) = header(DIGEST_HEADER) {
                let media_type = header(CONTENT_TYPE.as_str())
                    .map(|m| m.split(';').next().unwrap_or_default().trim().to_string());
                return Ok(Descriptor { digest, media_type });
            }
        }

        Err(RegistryError::Parse(format!(
            "registry returned no digest for {}:{}",
            repository, tag
        )))
    }
}

/// Client for plain distribution registries
pub struct DistributionClient<A = HttpDistributionApi> {
    api: A,
    logger: Logger,
}

impl DistributionClient<HttpDistributionApi> {
    /// Accepts any syntactically valid host
    pub fn connect(host: &str, settings: &ClientSettings) -> Result<Self> {
        let registry = settings.registry(host)?;
        let api = HttpDistributionApi::new(&registry, settings.transport(), settings.config.page_size)?;
        Ok(Self::with_api(api, settings.logger.scoped("registry")))
    }
}

impl<A: DistributionApi> DistributionClient<A> {
    pub fn with_api(api: A, logger: Logger) -> Self {
        Self { api, logger }
    }
}

#[async_trait]
impl<A: DistributionApi> RegistryClient for DistributionClient<A> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Registry
    }

    /// Needs the upstream registry to support `/v2/_catalog`. `NotFound`
    /// when neither the repository nor anything below it is listed.
    async fn list_repositories(&self, repository: &str, options: &ListOptions) -> Result<RepositoryList> {
        let mut children = ChildRepositories::new(repository, options.recursive);
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .api
                .catalog_page(cursor.as_deref())
                .await
                .context("calling catalog")?;
            self.logger
                .detail(&format!("catalog page: {} repositories", page.items.len()));
            children.extend(&page.items);

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if !children.found() {
            return Err(RegistryError::NotFound(format!("repository {}", repository)));
        }
        Ok(children.into_list(repository))
    }

    async fn list_manifests(&self, repository: &str, _options: &ListOptions) -> Result<ManifestList> {
        let mut manifests = ManifestAggregator::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .api
                .tags_page(repository, cursor.as_deref())
                .await
                .with_context(|| format!("listing tags for {}", repository))?;
            self.logger.detail(&format!("{}: {} tags", repository, page.items.len()));

            for tag in &page.items {
                let descriptor = self
                    .api
                    .head_manifest(repository, tag)
                    .await
                    .with_context(|| format!("fetching descriptor for {}:{}", repository, tag))?;
                manifests.merge(
                    ManifestRecord::new(descriptor.digest)
                        .with_media_type(descriptor.media_type)
                        .with_tag(tag.as_str()),
                );
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
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory registry; pages hold two entries each
    #[derive(Default)]
    struct FakeRegistry {
        catalog: Vec<String>,
        tags: HashMap<String, Vec<(String, String)>>,
        fail_catalog_page: Option<usize>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRegistry {
        fn with_repos(repos: &[&str]) -> Self {
            Self {
                catalog: repos.iter().map(|r| r.to_string()).collect(),
                ..Self::default()
            }
        }

        fn with_tags(mut self, repo: &str, tags: &[(&str, &str)]) -> Self {
            self.tags.insert(
                repo.to_string(),
                tags.iter().map(|(t, d)| (t.to_string(), d.to_string())).collect(),
            );
            self
        }

        fn page<T: Clone>(items: &[T], cursor: Option<&str>) -> Page<T> {
            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (start + 2).min(items.len());
            let next = (end < items.len()).then(|| end.to_string());
            Page::new(items[start..end].to_vec(), next)
        }
    }

    #[async_trait]
    impl DistributionApi for FakeRegistry {
        async fn catalog_page(&self, cursor: Option<&str>) -> Result<Page<String>> {
            self.calls.lock().unwrap().push(format!("catalog {:?}", cursor));
            let page_index = cursor.map(|c| c.parse::<usize>().unwrap() / 2).unwrap_or(0);
            if self.fail_catalog_page == Some(page_index) {
                return Err(RegistryError::Network("connection reset".to_string()));
            }
            Ok(Self::page(&self.catalog, cursor))
        }

        async fn tags_page(&self, repository: &str, cursor: Option<&str>) -> Result<Page<String>> {
            let tags = self
                .tags
                .get(repository)
                .ok_or_else(|| RegistryError::NotFound(format!("tag listing: {}", repository)))?;
            let names: Vec<String> = tags.iter().map(|(t, _)| t.clone()).collect();
            Ok(Self::page(&names, cursor))
        }

        async fn head_manifest(&self, repository: &str, tag: &str) -> Result<Descriptor> {
            self.calls.lock().unwrap().push(format!("head {}:{}", repository, tag));
            let digest = self.tags[repository]
                .iter()
                .find(|(t, _)| t == tag)
                .map(|(_, d)| d.clone())
                .unwrap();
            Ok(Descriptor {
                digest,
                media_type: Some("application/vnd.oci.image.manifest.v1+json".to_string()),
            })
        }
    }

    const REPOS: [&str; 4] = ["foo/bar", "foo/bar/baz", "foo/baz", "foo/baz/bar/foo"];

    fn client(api: FakeRegistry) -> DistributionClient<FakeRegistry> {
        DistributionClient::with_api(api, Logger::new_quiet())
    }

    #[tokio::test]
    async fn test_list_top_level_repository() {
        let c = client(FakeRegistry::with_repos(&REPOS));
        let list = c.list_repositories("foo", &ListOptions::default()).await.unwrap();
        assert_eq!(list.name, "foo");
        assert_eq!(list.repositories, vec!["bar", "baz"]);

        // all pages were read
        let calls = c.api.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["catalog None", "catalog Some(\"2\")"]);
    }

    #[tokio::test]
    async fn test_list_recursive() {
        let c = client(FakeRegistry::with_repos(&REPOS));
        let list = c.list_repositories("foo", &ListOptions::recursive()).await.unwrap();
        assert_eq!(list.repositories, vec!["bar", "bar/baz", "baz", "baz/bar/foo"]);
    }

    #[tokio::test]
    async fn test_list_sub_repository() {
        let c = client(FakeRegistry::with_repos(&REPOS));
        let list = c.list_repositories("foo/bar", &ListOptions::default()).await.unwrap();
        assert_eq!(list.repositories, vec!["baz"]);
    }

    #[tokio::test]
    async fn test_leaf_repository_has_no_children() {
        let c = client(FakeRegistry::with_repos(&REPOS));
        let list = c.list_repositories("foo/bar/baz", &ListOptions::default()).await.unwrap();
        assert!(list.repositories.is_empty());
    }

    #[tokio::test]
    async fn test_missing_repository_is_not_found() {
        let c = client(FakeRegistry::with_repos(&REPOS));
        let err = c.list_repositories("foo/qux", &ListOptions::default()).await.unwrap_err();
        assert!(err.is_not_found(), "{:?}", err);
    }

    #[tokio::test]
    async fn test_failure_midway_fails_whole_listing() {
        let mut api = FakeRegistry::with_repos(&REPOS);
        api.fail_catalog_page = Some(1);
        let err = client(api)
            .list_repositories("foo", &ListOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Network("calling catalog: connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_list_manifests_merges_tags_by_digest() {
        let api = FakeRegistry::with_repos(&["foo"]).with_tags(
            "foo",
            &[("latest", "sha256:b"), ("v1", "sha256:a"), ("v2", "sha256:b")],
        );
        let list = client(api).list_manifests("foo", &ListOptions::default()).await.unwrap();

        assert_eq!(list.len(), 2);
        let a = &list.manifests[0];
        assert_eq!(a.digest, "sha256:a");
        assert_eq!(a.tags.iter().collect::<Vec<_>>(), vec!["v1"]);
        assert_eq!(
            a.media_type.as_deref(),
            Some("application/vnd.oci.image.manifest.v1+json")
        );
        let b = &list.manifests[1];
        assert_eq!(b.tags.iter().collect::<Vec<_>>(), vec!["latest", "v2"]);
        assert_eq!(b.uploaded, None);
    }

    #[tokio::test]
    async fn test_list_manifests_unknown_repository() {
        let err = client(FakeRegistry::default())
            .list_manifests("nope", &ListOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("listing tags for nope"));
    }

    #[tokio::test]
    async fn test_first_page_urls() {
        let registry = Registry::new("localhost:5000").unwrap();
        let transport = AuthTransport::new(
            reqwest::Client::new(),
            std::sync::Arc::new(crate::registry::keychain::Anonymous),
        );
        let api = HttpDistributionApi::new(&registry, transport, 50).unwrap();
        assert_eq!(
            api.first_page(&["v2", "_catalog"]).unwrap().as_str(),
            "http://localhost:5000/v2/_catalog?n=50"
        );
        let mut segments = HttpDistributionApi::repository_segments("foo/bar");
        segments.extend(["tags", "list"]);
        assert_eq!(
            api.first_page(&segments).unwrap().as_str(),
            "http://localhost:5000/v2/foo/bar/tags/list?n=50"
        );
    }
}

//! Google Container Registry and Artifact Registry
//!
//! Google extends the distribution `tags/list` response with the child
//! repositories and a digest-keyed manifest map, so one call answers both
//! listing operations without a catalog.

use super::decode_json;
use crate::catalog::{
    ChildRepositories, ListOptions, ManifestAggregator, ManifestList, ManifestRecord, RepositoryList,
};
use crate::error::{RegistryError, Result, ResultExt};
use crate::logging::Logger;
use crate::reference::Registry;
use crate::registry::pagination::next_link;
use crate::registry::transport::AuthTransport;
use crate::registry::{ClientSettings, ProviderKind, RegistryClient};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use url::Url;

/// Whether `host` is served by Google's registries
pub fn is_google_host(host: &str) -> bool {
    host == "gcr.io"
        || host.ends_with(".gcr.io")
        || host.ends_with(".pkg.dev")
        || host == "k8s.io"
        || host.ends_with(".k8s.io")
}

/// Google's extended `tags/list` body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleTags {
    #[serde(default)]
    pub child: Vec<String>,
    #[serde(default)]
    pub manifest: BTreeMap<String, GoogleManifest>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleManifest {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub tag: Vec<String>,
    /// Milliseconds since the epoch, as a decimal string
    #[serde(default)]
    pub time_created_ms: Option<String>,
    #[serde(default)]
    pub time_uploaded_ms: Option<String>,
}

impl GoogleManifest {
    fn into_record(self, digest: String) -> Result<ManifestRecord> {
        Ok(ManifestRecord::new(digest)
            .with_media_type(self.media_type)
            .with_tags(self.tag)
            .with_created(parse_millis(self.time_created_ms.as_deref())?)
            .with_uploaded(parse_millis(self.time_uploaded_ms.as_deref())?))
    }
}

fn parse_millis(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let millis: i64 = value
        .parse()
        .map_err(|_| RegistryError::Parse(format!("invalid millisecond timestamp {:?}", value)))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Some)
        .ok_or_else(|| RegistryError::Parse(format!("timestamp out of range: {}", millis)))
}

/// One response of the extended tag listing plus its continuation
#[derive(Debug, Clone, Default)]
pub struct TagsPage {
    pub body: GoogleTags,
    pub next: Option<String>,
}

#[async_trait]
pub trait GoogleApi: Send + Sync {
    /// One page of `/v2/<repository>/tags/list`
    async fn tags_list(&self, repository: &str, cursor: Option<&str>) -> Result<TagsPage>;
}

#[derive(Debug, Clone)]
pub struct HttpGoogleApi {
    base: Url,
    transport: AuthTransport,
    page_size: u32,
}

impl HttpGoogleApi {
    pub fn new(registry: &Registry, transport: AuthTransport, page_size: u32) -> Result<Self> {
        Ok(Self {
            base: registry.base_url()?,
            transport: transport.with_token_exchange(true),
            page_size,
        })
    }

    fn tags_url(&self, repository: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::Validation(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .push("v2")
            .extend(repository.split('/').filter(|s| !s.is_empty()))
            .extend(["tags", "list"]);
        url.query_pairs_mut().append_pair("n", &self.page_size.to_string());
        Ok(url)
    }
}

#[async_trait]
impl GoogleApi for HttpGoogleApi {
    async fn tags_list(&self, repository: &str, cursor: Option<&str>) -> Result<TagsPage> {
        let url = match cursor {
            Some(next) => Url::parse(next)?,
            None => self.tags_url(repository)?,
        };
        let response = self.transport.get(&url).await?;
        let next = next_link(response.headers(), &url).map(String::from);
        let body = decode_json(response, "tag listing").await?;
        Ok(TagsPage { body, next })
    }
}

pub struct GoogleClient<A = HttpGoogleApi> {
    api: A,
    logger: Logger,
}

impl GoogleClient<HttpGoogleApi> {
    /// `NotSupported` unless `host` belongs to Google
    pub fn connect(host: &str, settings: &ClientSettings) -> Result<Self> {
        if !is_google_host(host) {
            return Err(RegistryError::NotSupported(host.to_string()));
        }
        let registry = settings.registry(host)?;
        let api = HttpGoogleApi::new(&registry, settings.transport(), settings.config.page_size)?;
        Ok(Self::with_api(api, settings.logger.scoped("google")))
    }
}

impl<A: GoogleApi> GoogleClient<A> {
    pub fn with_api(api: A, logger: Logger) -> Self {
        Self { api, logger }
    }

    /// Direct children of `repository` across every page
    async fn children(&self, repository: &str) -> Result<Vec<String>> {
        let mut children = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .api
                .tags_list(repository, cursor.as_deref())
                .await
                .with_context(|| format!("listing {}", repository))?;
            children.extend(page.body.child);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(children),
            }
        }
    }
}

fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

#[async_trait]
impl<A: GoogleApi> RegistryClient for GoogleClient<A> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    /// Recursive listing walks the tree breadth-first, one call per
    /// repository.
    async fn list_repositories(&self, repository: &str, options: &ListOptions) -> Result<RepositoryList> {
        let mut children = ChildRepositories::new(repository, options.recursive);
        if !options.recursive {
            let direct = self.children(repository).await?;
            children.extend(direct.iter().map(|c| join(repository, c)));
            return Ok(children.into_list(repository));
        }

        let mut visited = HashSet::from([repository.to_string()]);
        let mut queue = VecDeque::from([repository.to_string()]);
        while let Some(current) = queue.pop_front() {
            let direct = self.children(&current).await?;
            self.logger
                .detail(&format!("{}: {} children", current, direct.len()));
            for child in direct {
                let path = join(&current, &child);
                if visited.insert(path.clone()) {
                    children.push(&path);
                    queue.push_back(path);
                }
            }
        }
        Ok(children.into_list(repository))
    }

    /// A digest repeated across pages is folded by the aggregator, so
    /// page order does not change the result.
    async fn list_manifests(&self, repository: &str, _options: &ListOptions) -> Result<ManifestList> {
        let mut manifests = ManifestAggregator::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .api
                .tags_list(repository, cursor.as_deref())
                .await
                .with_context(|| format!("listing {}", repository))?;
            for (digest, manifest) in page.body.manifest {
                manifests.merge(
                    manifest
                        .into_record(digest)
                        .with_context(|| format!("decoding manifests of {}", repository))?,
                );
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(manifests.finish()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGoogle {
        listings: HashMap<String, Vec<GoogleTags>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeGoogle {
        fn with_children(mut self, repo: &str, children: &[&str]) -> Self {
            self.listings.insert(
                repo.to_string(),
                vec![GoogleTags {
                    child: children.iter().map(|c| c.to_string()).collect(),
                    ..GoogleTags::default()
                }],
            );
            self
        }

        fn with_pages(mut self, repo: &str, pages: Vec<GoogleTags>) -> Self {
            self.listings.insert(repo.to_string(), pages);
            self
        }
    }

    #[async_trait]
    impl GoogleApi for FakeGoogle {
        async fn tags_list(&self, repository: &str, cursor: Option<&str>) -> Result<TagsPage> {
            self.calls.lock().unwrap().push(repository.to_string());
            let pages = self
                .listings
                .get(repository)
                .ok_or_else(|| RegistryError::NotFound(repository.to_string()))?;
            let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let next = (index + 1 < pages.len()).then(|| (index + 1).to_string());
            Ok(TagsPage {
                body: pages[index].clone(),
                next,
            })
        }
    }

    fn tree() -> FakeGoogle {
        FakeGoogle::default()
            .with_children("proj", &["a", "b"])
            .with_children("proj/a", &["x"])
            .with_children("proj/a/x", &[])
            .with_children("proj/b", &[])
    }

    fn client(api: FakeGoogle) -> GoogleClient<FakeGoogle> {
        GoogleClient::with_api(api, Logger::new_quiet())
    }

    #[test]
    fn test_is_google_host() {
        for host in ["gcr.io", "eu.gcr.io", "europe-docker.pkg.dev", "k8s.io", "registry.k8s.io"] {
            assert!(is_google_host(host), "{}", host);
        }
        for host in ["ghcr.io", "notgcr.io", "pkg.dev.example.com", "docker.io"] {
            assert!(!is_google_host(host), "{}", host);
        }
    }

    #[tokio::test]
    async fn test_direct_children() {
        let list = client(tree())
            .list_repositories("proj", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(list.name, "proj");
        assert_eq!(list.repositories, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_recursive_walk_excludes_root() {
        let c = client(tree());
        let list = c.list_repositories("proj", &ListOptions::recursive()).await.unwrap();
        assert_eq!(list.repositories, vec!["a", "a/x", "b"]);

        let calls = c.api.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["proj", "proj/a", "proj/b", "proj/a/x"]);
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let err = client(tree())
            .list_repositories("other", &ListOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_manifests_across_pages() {
        let page = |digest: &str, tags: &[&str], created: &str, uploaded: &str| {
            let mut manifest = BTreeMap::new();
            manifest.insert(
                digest.to_string(),
                GoogleManifest {
                    media_type: Some("application/vnd.docker.distribution.manifest.v2+json".to_string()),
                    tag: tags.iter().map(|t| t.to_string()).collect(),
                    time_created_ms: Some(created.to_string()),
                    time_uploaded_ms: Some(uploaded.to_string()),
                },
            );
            GoogleTags {
                manifest,
                ..GoogleTags::default()
            }
        };
        let api = FakeGoogle::default().with_pages(
            "proj/app",
            vec![
                page("sha256:1", &["latest"], "0", "1700000000000"),
                page("sha256:2", &[], "1600000000000", "1600000001000"),
            ],
        );

        let list = client(api)
            .list_manifests("proj/app", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(list.len(), 2);
        let first = &list.manifests[0];
        assert_eq!(first.digest, "sha256:1");
        assert_eq!(first.created, Some(Utc.timestamp_opt(0, 0).unwrap()));
        assert_eq!(first.uploaded, Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()));
        assert!(list.manifests[1].tags.is_empty());
    }

    #[tokio::test]
    async fn test_same_digest_on_two_pages_merges_by_latest() {
        let page = |tag: &str, uploaded: &str| {
            let mut manifest = BTreeMap::new();
            manifest.insert(
                "sha256:d1".to_string(),
                GoogleManifest {
                    tag: vec![tag.to_string()],
                    time_uploaded_ms: Some(uploaded.to_string()),
                    ..GoogleManifest::default()
                },
            );
            GoogleTags {
                manifest,
                ..GoogleTags::default()
            }
        };
        let listed = |pages: Vec<GoogleTags>| async move {
            client(FakeGoogle::default().with_pages("proj/app", pages))
                .list_manifests("proj/app", &ListOptions::default())
                .await
                .unwrap()
        };

        let forward = listed(vec![page("v1", "1000"), page("v2", "2000")]).await;
        let backward = listed(vec![page("v2", "2000"), page("v1", "1000")]).await;

        assert_eq!(forward.len(), 1);
        let record = &forward.manifests[0];
        assert_eq!(record.digest, "sha256:d1");
        assert_eq!(record.tags.iter().collect::<Vec<_>>(), vec!["v1", "v2"]);
        assert_eq!(record.uploaded, Some(Utc.timestamp_millis_opt(2000).unwrap()));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_decode_extended_listing() {
        let body = r#"{
            "child": ["sub"],
            "manifest": {
                "sha256:abc": {
                    "imageSizeBytes": "1234",
                    "layerId": "",
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "tag": ["v1", "v2"],
                    "timeCreatedMs": "1700000000000",
                    "timeUploadedMs": "1700000005000"
                }
            },
            "name": "proj/app",
            "tags": ["v1", "v2"]
        }"#;
        let tags: GoogleTags = serde_json::from_str(body).unwrap();
        assert_eq!(tags.child, vec!["sub"]);
        let record = tags.manifest["sha256:abc"].clone().into_record("sha256:abc".to_string()).unwrap();
        assert_eq!(record.tags, vec!["v1", "v2"]);
        assert_eq!(record.uploaded, Some(Utc.timestamp_millis_opt(1_700_000_005_000).unwrap()));
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis(None).unwrap(), None);
        assert_eq!(parse_millis(Some("")).unwrap(), None);
        assert!(parse_millis(Some("soon")).is_err());
    }
}

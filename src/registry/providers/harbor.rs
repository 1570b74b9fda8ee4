//! Harbor, listed through its v2.0 REST API
//!
//! Harbor runs on arbitrary hosts, so it is recognised by asking for
//! `/api/v2.0/systeminfo`. Repository names are project-qualified and may
//! be nested below the project.

use super::{decode_json, optional_time, split_first};
use crate::catalog::{
    ChildRepositories, ListOptions, ManifestAggregator, ManifestList, ManifestRecord, RepositoryList,
};
use crate::error::{RegistryError, Result, ResultExt};
use crate::logging::Logger;
use crate::reference::Registry;
use crate::registry::transport::AuthTransport;
use crate::registry::{ClientSettings, ProviderKind, RegistryClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// How long the systeminfo probe may take before the host is assumed not
/// to be Harbor
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// One page of a Harbor listing with the total the server reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarborPage<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
}

impl<T> HarborPage<T> {
    pub fn new(items: Vec<T>, total: Option<u64>) -> Self {
        Self { items, total }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarborRepository {
    /// Project-qualified name, e.g. `library/team/app`
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub manifest_media_type: Option<String>,
    #[serde(default, deserialize_with = "optional_time")]
    pub push_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Option<Vec<ArtifactTag>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactTag {
    #[serde(default)]
    pub name: String,
}

impl Artifact {
    fn into_record(self) -> ManifestRecord {
        ManifestRecord::new(self.digest)
            .with_media_type(self.manifest_media_type)
            .with_tags(self.tags.unwrap_or_default().into_iter().map(|t| t.name))
            .with_uploaded(self.push_time)
    }
}

#[async_trait]
pub trait HarborApi: Send + Sync {
    /// Succeeds only against a Harbor instance
    async fn system_info(&self) -> Result<()>;

    /// Repositories of `project`; pages start at 1
    async fn repositories_page(&self, project: &str, page: u64) -> Result<HarborPage<HarborRepository>>;

    /// Artifacts of `project/repository`; pages start at 1
    async fn artifacts_page(&self, project: &str, repository: &str, page: u64) -> Result<HarborPage<Artifact>>;
}

#[derive(Debug, Clone)]
pub struct HttpHarborApi {
    base: Url,
    transport: AuthTransport,
    page_size: u32,
}

impl HttpHarborApi {
    pub fn new(registry: &Registry, transport: AuthTransport, page_size: u32) -> Result<Self> {
        Ok(Self {
            base: registry.base_url()?,
            transport,
            page_size,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::Validation(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(["api", "v2.0"])
            .extend(segments);
        Ok(url)
    }

    fn paged(&self, mut url: Url, page: u64) -> Url {
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("page_size", &self.page_size.to_string());
        url
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, url: &Url, operation: &str) -> Result<HarborPage<T>> {
        let response = self.transport.get(url).await?;
        let total = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let items: Option<Vec<T>> = decode_json(response, operation).await?;
        Ok(HarborPage::new(items.unwrap_or_default(), total))
    }
}

#[async_trait]
impl HarborApi for HttpHarborApi {
    async fn system_info(&self) -> Result<()> {
        let url = self.endpoint(&["systeminfo"])?;
        let _: serde_json::Value = decode_json(self.transport.get(&url).await?, "fetching systeminfo").await?;
        Ok(())
    }

    async fn repositories_page(&self, project: &str, page: u64) -> Result<HarborPage<HarborRepository>> {
        let url = self.paged(self.endpoint(&["projects", project, "repositories"])?, page);
        self.fetch(&url, "listing repositories").await
    }

    async fn artifacts_page(&self, project: &str, repository: &str, page: u64) -> Result<HarborPage<Artifact>> {
        // Harbor wants the repository escaped once more on top of the
        // segment encoding
        let escaped = repository.replace('/', "%2F");
        let mut url = self.paged(
            self.endpoint(&["projects", project, "repositories", &escaped, "artifacts"])?,
            page,
        );
        url.query_pairs_mut().append_pair("with_tag", "true");
        self.fetch(&url, "listing artifacts").await
    }
}

pub struct HarborClient<A = HttpHarborApi> {
    api: A,
    logger: Logger,
}

impl HarborClient<HttpHarborApi> {
    /// Client for `host`, without checking that it is Harbor
    pub fn connect(host: &str, settings: &ClientSettings) -> Result<Self> {
        let registry = settings.registry(host)?;
        let api = HttpHarborApi::new(&registry, settings.transport(), settings.config.page_size)?;
        Ok(Self::with_api(api, settings.logger.scoped("harbor")))
    }
}

impl<A: HarborApi> HarborClient<A> {
    pub fn with_api(api: A, logger: Logger) -> Self {
        Self { api, logger }
    }

    /// Whether the host answers like Harbor within [`PROBE_TIMEOUT`]
    pub async fn probe(&self) -> bool {
        match tokio::time::timeout(PROBE_TIMEOUT, self.api.system_info()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.logger.debug(&format!("not a Harbor instance: {}", e));
                false
            }
            Err(_) => {
                self.logger.debug("systeminfo probe timed out");
                false
            }
        }
    }
}

/// Keep fetching pages until one is empty or the reported total is reached
fn exhausted<T>(page: &HarborPage<T>, seen: u64) -> bool {
    page.items.is_empty() || page.total.is_none_or(|total| seen >= total)
}

#[async_trait]
impl<A: HarborApi> RegistryClient for HarborClient<A> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Harbor
    }

    async fn list_repositories(&self, repository: &str, options: &ListOptions) -> Result<RepositoryList> {
        let (project, name) = split_first(repository);
        if project.is_empty() {
            return Err(RegistryError::Validation(format!(
                "can't get project from {:?}",
                repository
            )));
        }

        let mut children = ChildRepositories::new(repository, options.recursive);
        let mut seen = 0;
        let mut page_number = 1;
        loop {
            let page = self
                .api
                .repositories_page(project, page_number)
                .await
                .context("listing repositories")?;
            seen += page.items.len() as u64;
            self.logger
                .detail(&format!("{} page {}: {} repositories", project, page_number, page.items.len()));
            children.extend(page.items.iter().map(|r| r.name.as_str()));
            if exhausted(&page, seen) {
                break;
            }
            page_number += 1;
        }

        // The project itself always exists once Harbor listed it
        if !name.is_empty() && !children.found() {
            return Err(RegistryError::NotFound(format!("repository {}", repository)));
        }
        Ok(children.into_list(repository))
    }

    async fn list_manifests(&self, repository: &str, _options: &ListOptions) -> Result<ManifestList> {
        let (project, name) = split_first(repository);
        if project.is_empty() {
            return Err(RegistryError::Validation(format!(
                "can't get project from {:?}",
                repository
            )));
        }
        if name.is_empty() {
            return Ok(ManifestList::default());
        }

        let mut manifests = ManifestAggregator::new();
        let mut seen = 0;
        let mut page_number = 1;
        loop {
            let page = self
                .api
                .artifacts_page(project, name, page_number)
                .await
                .context("listing artifacts")?;
            seen += page.items.len() as u64;
            let done = exhausted(&page, seen);
            manifests.merge_page(page.items.into_iter().map(Artifact::into_record));
            if done {
                break;
            }
            page_number += 1;
        }
        Ok(manifests.finish())
    }
}

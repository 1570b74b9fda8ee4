//! GitHub Container Registry, listed through the GitHub packages REST API
//!
//! `ghcr.io/<owner>/<package>` maps onto the container packages of a user
//! or organization. Package names may contain `/`, which is how nested
//! repositories appear. Requests carry the credentials configured for
//! `ghcr.io`, so pull credentials are enough to list.

use super::{decode_json, optional_time, split_first};
use crate::catalog::{
    ChildRepositories, ListOptions, ManifestAggregator, ManifestList, ManifestRecord, RepositoryList,
};
use crate::error::{RegistryError, Result, ResultExt};
use crate::logging::Logger;
use crate::registry::pagination::{Page, next_link};
use crate::registry::transport::AuthTransport;
use crate::registry::{ClientSettings, ProviderKind, RegistryClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::fmt;
use url::Url;

pub const GHCR_HOST: &str = "ghcr.io";

const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

/// Kind of account owning the packages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerType {
    User,
    Organization,
}

impl OwnerType {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "User" => Ok(OwnerType::User),
            "Organization" => Ok(OwnerType::Organization),
            other => Err(RegistryError::Registry(format!("unsupported owner type: {}", other))),
        }
    }

    /// Path prefix of the packages API for this owner type
    fn collection(self) -> &'static str {
        match self {
            OwnerType::User => "users",
            OwnerType::Organization => "orgs",
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerType::User => f.write_str("User"),
            OwnerType::Organization => f.write_str("Organization"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageVersion {
    /// The manifest digest
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "optional_time")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_time")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<VersionMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionMetadata {
    #[serde(default)]
    pub container: Option<ContainerMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PackageVersion {
    fn into_record(self) -> ManifestRecord {
        let tags = self
            .metadata
            .and_then(|m| m.container)
            .map(|c| c.tags)
            .unwrap_or_default();
        ManifestRecord::new(self.name)
            .with_tags(tags)
            .with_uploaded(self.created_at)
            .with_updated(self.updated_at)
    }
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(rename = "type", default)]
    kind: String,
}

#[async_trait]
pub trait GithubApi: Send + Sync {
    async fn owner_type(&self, owner: &str) -> Result<OwnerType>;

    /// One page of the owner's active container packages
    async fn packages_page(
        &self,
        owner_type: OwnerType,
        owner: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Package>>;

    /// One page of a package's versions
    async fn versions_page(
        &self,
        owner_type: OwnerType,
        owner: &str,
        package: &str,
        cursor: Option<&str>,
    ) -> Result<Page<PackageVersion>>;
}

#[derive(Debug, Clone)]
pub struct HttpGithubApi {
    base: Url,
    transport: AuthTransport,
    page_size: u32,
}

impl HttpGithubApi {
    pub fn new(api_url: &str, transport: AuthTransport, page_size: u32) -> Result<Self> {
        Ok(Self {
            base: Url::parse(api_url)?,
            transport: transport.with_resource(GHCR_HOST),
            page_size,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::Validation(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn paged(&self, mut url: Url, with_type: bool) -> Url {
        {
            let mut query = url.query_pairs_mut();
            if with_type {
                query.append_pair("package_type", "container");
            }
            query
                .append_pair("state", "active")
                .append_pair("per_page", &self.page_size.min(100).to_string());
        }
        url
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, url: &Url, operation: &str) -> Result<(T, Option<String>)> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        let response = self.transport.send(Method::GET, url, headers).await?;
        let next = next_link(response.headers(), url).map(String::from);
        Ok((decode_json(response, operation).await?, next))
    }
}

#[async_trait]
impl GithubApi for HttpGithubApi {
    async fn owner_type(&self, owner: &str) -> Result<OwnerType> {
        let url = self.endpoint(&["users", owner])?;
        let (account, _): (Account, _) = self.fetch(&url, "fetching user").await?;
        OwnerType::parse(&account.kind)
    }

    async fn packages_page(
        &self,
        owner_type: OwnerType,
        owner: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Package>> {
        let url = match cursor {
            Some(next) => Url::parse(next)?,
            None => self.paged(self.endpoint(&[owner_type.collection(), owner, "packages"])?, true),
        };
        let (items, next) = self.fetch(&url, "listing packages").await?;
        Ok(Page::new(items, next))
    }

    async fn versions_page(
        &self,
        owner_type: OwnerType,
        owner: &str,
        package: &str,
        cursor: Option<&str>,
    ) -> Result<Page<PackageVersion>> {
        // `push` escapes the `/` of nested package names
        let url = match cursor {
            Some(next) => Url::parse(next)?,
            None => self.paged(
                self.endpoint(&[
                    owner_type.collection(),
                    owner,
                    "packages",
                    "container",
                    package,
                    "versions",
                ])?,
                false,
            ),
        };
        let (items, next) = self.fetch(&url, "listing package versions").await?;
        Ok(Page::new(items, next))
    }
}

pub struct GithubClient<A = HttpGithubApi> {
    api: A,
    logger: Logger,
}

impl GithubClient<HttpGithubApi> {
    /// `NotSupported` for anything but `ghcr.io`
    pub fn connect(host: &str, settings: &ClientSettings) -> Result<Self> {
        if host != GHCR_HOST {
            return Err(RegistryError::NotSupported(host.to_string()));
        }
        let api = HttpGithubApi::new(
            &settings.config.github_api_url,
            settings.transport(),
            settings.config.page_size,
        )?;
        Ok(Self::with_api(api, settings.logger.scoped("github")))
    }
}

impl<A: GithubApi> GithubClient<A> {
    pub fn with_api(api: A, logger: Logger) -> Self {
        Self { api, logger }
    }

    async fn owner_type(&self, owner: &str) -> Result<OwnerType> {
        let owner_type = self
            .api
            .owner_type(owner)
            .await
            .context("checking if entity is a user or organization")?;
        self.logger.detail(&format!("{} is a {}", owner, owner_type));
        Ok(owner_type)
    }
}

#[async_trait]
impl<A: GithubApi> RegistryClient for GithubClient<A> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Github
    }

    async fn list_repositories(&self, repository: &str, options: &ListOptions) -> Result<RepositoryList> {
        let (owner, package) = split_first(repository);
        let owner_type = self.owner_type(owner).await?;

        // Package names are relative to the owner
        let mut children = ChildRepositories::new(package, options.recursive);
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .api
                .packages_page(owner_type, owner, cursor.as_deref())
                .await
                .context("listing packages")?;
            children.extend(page.items.iter().map(|p| p.name.as_str()));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(children.into_list(repository))
    }

    async fn list_manifests(&self, repository: &str, _options: &ListOptions) -> Result<ManifestList> {
        let (owner, package) = split_first(repository);
        if package.is_empty() {
            return Ok(ManifestList::default());
        }
        let owner_type = self.owner_type(owner).await?;

        let mut manifests = ManifestAggregator::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .api
                .versions_page(owner_type, owner, package, cursor.as_deref())
                .await
                .context("getting package versions")?;
            manifests.merge_page(page.items.into_iter().map(PackageVersion::into_record));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(manifests.finish())
    }
}

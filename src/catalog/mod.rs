//! Provider-independent listing model
//!
//! Every provider produces the same [`RepositoryList`] and [`ManifestList`]
//! values. The two folds that build them, [`ChildRepositories`] for the
//! repository hierarchy and [`ManifestAggregator`] for digest/tag merging,
//! live in the submodules and carry no network code.

pub mod aggregate;
pub mod flatten;

pub use aggregate::{ManifestAggregator, aggregate};
pub use flatten::{ChildRepositories, flatten};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Options accepted by every listing operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// List every descendant instead of only the direct children
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// Child repositories of a repository, relative to it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryList {
    /// Full name of the parent repository
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub name: String,

    /// Relative paths, sorted and without duplicates
    pub repositories: Vec<String>,
}

/// One pushed artifact, identified by its digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub digest: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,

    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub tags: BTreeSet<String>,

    /// Taken from the image config. Builder-controlled, so it may be the
    /// Unix epoch for reproducible builds.
    #[serde(rename = "timeCreated", skip_serializing_if = "Option::is_none", default)]
    pub created: Option<DateTime<Utc>>,

    /// When the registry received the manifest
    #[serde(rename = "timeUploaded", skip_serializing_if = "Option::is_none", default)]
    pub uploaded: Option<DateTime<Utc>>,

    /// Registry-defined "last modified", often a tag move
    #[serde(rename = "timeUpdated", skip_serializing_if = "Option::is_none", default)]
    pub updated: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn new(digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            media_type: None,
            tags: BTreeSet::new(),
            created: None,
            uploaded: None,
            updated: None,
        }
    }
}

/// Manifests of one repository, one entry per digest, sorted by digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestList {
    pub manifests: Vec<Manifest>,
}

impl ManifestList {
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Every (tag, digest) pair, ordered by digest then tag
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.manifests
            .iter()
            .flat_map(|m| m.tags.iter().map(move |t| (t.as_str(), m.digest.as_str())))
    }
}

/// One backend record describing a manifest, as a provider decoded it.
///
/// Several records may describe the same digest; the aggregator merges them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRecord {
    pub digest: String,
    pub media_type: Option<String>,
    pub tags: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub uploaded: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl ManifestRecord {
    pub fn new(digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_media_type(mut self, media_type: Option<String>) -> Self {
        self.media_type = media_type.filter(|m| !m.is_empty());
        self
    }

    pub fn with_created(mut self, created: Option<DateTime<Utc>>) -> Self {
        self.created = created;
        self
    }

    pub fn with_uploaded(mut self, uploaded: Option<DateTime<Utc>>) -> Self {
        self.uploaded = uploaded;
        self
    }

    pub fn with_updated(mut self, updated: Option<DateTime<Utc>>) -> Self {
        self.updated = updated;
        self
    }
}

//! Manifest aggregation across paginated backend records
//!
//! Backends report the same manifest several times: once per tag, or once
//! from a tag listing and again from an image listing. The aggregator keys
//! everything on the digest and merges records so that the result does not
//! depend on page order or on seeing a page twice.

use super::{Manifest, ManifestList, ManifestRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Digest-keyed accumulator for [`ManifestRecord`]s
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestAggregator {
    manifests: BTreeMap<String, Manifest>,
}

impl ManifestAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one record. Records without a digest are dropped.
    pub fn merge(&mut self, record: ManifestRecord) {
        let digest = record.digest.trim();
        if digest.is_empty() {
            return;
        }

        let manifest = self
            .manifests
            .entry(digest.to_string())
            .or_insert_with(|| Manifest::new(digest));

        manifest
            .tags
            .extend(record.tags.into_iter().filter(|t| !t.is_empty()));
        manifest.media_type = pick_media_type(manifest.media_type.take(), record.media_type);
        manifest.created = earliest(manifest.created, record.created);
        manifest.uploaded = latest(manifest.uploaded, record.uploaded);
        manifest.updated = latest(manifest.updated, record.updated);
    }

    /// Merge every record of one page
    pub fn merge_page<I>(&mut self, page: I)
    where
        I: IntoIterator<Item = ManifestRecord>,
    {
        for record in page {
            self.merge(record);
        }
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn get(&self, digest: &str) -> Option<&Manifest> {
        self.manifests.get(digest)
    }

    /// One manifest per digest, sorted by digest
    pub fn finish(self) -> ManifestList {
        ManifestList {
            manifests: self.manifests.into_values().collect(),
        }
    }
}

/// Fold a sequence of pages into a manifest list
pub fn aggregate<I, P>(pages: I) -> ManifestList
where
    I: IntoIterator<Item = P>,
    P: IntoIterator<Item = ManifestRecord>,
{
    pages
        .into_iter()
        .fold(ManifestAggregator::new(), |mut acc, page| {
            acc.merge_page(page);
            acc
        })
        .finish()
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

// Disagreeing media types for one digest should not happen; the smaller one
// wins so that merge order cannot change the result.
fn pick_media_type(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

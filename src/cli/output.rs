//! Rendering listings for standard output

use crate::catalog::{Manifest, ManifestList, RepositoryList};
use crate::cli::args::OutputFormat;
use crate::error::Result;
use crate::reference::RegistryReference;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct RepositoriesDocument<'a> {
    reference: String,
    #[serde(flatten)]
    list: &'a RepositoryList,
}

#[derive(Serialize)]
struct ManifestsDocument<'a> {
    reference: String,
    manifests: &'a [Manifest],
}

#[derive(Serialize)]
struct TagEntry<'a> {
    tag: &'a str,
    digest: &'a str,
}

#[derive(Serialize)]
struct TagsDocument<'a> {
    reference: String,
    tags: Vec<TagEntry<'a>>,
}

/// Writes listings in one [`OutputFormat`]
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: OutputFormat,
}

impl Printer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// `host/repo/child` per child
    pub fn repositories<W: Write>(&self, out: &mut W, reference: &RegistryReference, list: &RepositoryList) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                for child in &list.repositories {
                    writeln!(out, "{}/{}", reference, child)?;
                }
            }
            OutputFormat::Json => {
                let document = RepositoriesDocument {
                    reference: reference.to_string(),
                    list,
                };
                self.json(out, &document)?;
            }
        }
        Ok(())
    }

    /// `host/repo@digest` per manifest
    pub fn manifests<W: Write>(&self, out: &mut W, reference: &RegistryReference, list: &ManifestList) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                for manifest in &list.manifests {
                    writeln!(out, "{}@{}", reference, manifest.digest)?;
                }
            }
            OutputFormat::Json => {
                let document = ManifestsDocument {
                    reference: reference.to_string(),
                    manifests: &list.manifests,
                };
                self.json(out, &document)?;
            }
        }
        Ok(())
    }

    /// `host/repo:tag` per tag
    pub fn tags<W: Write>(&self, out: &mut W, reference: &RegistryReference, list: &ManifestList) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                for (tag, _) in list.tags() {
                    writeln!(out, "{}:{}", reference, tag)?;
                }
            }
            OutputFormat::Json => {
                let document = TagsDocument {
                    reference: reference.to_string(),
                    tags: list.tags().map(|(tag, digest)| TagEntry { tag, digest }).collect(),
                };
                self.json(out, &document)?;
            }
        }
        Ok(())
    }

    fn json<W: Write, T: Serialize>(&self, out: &mut W, document: &T) -> Result<()> {
        serde_json::to_writer(&mut *out, document)?;
        writeln!(out)?;
        Ok(())
    }
}

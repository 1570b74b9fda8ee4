//! Repository hierarchy flattening
//!
//! Backends expose a flat namespace of repository paths. [`ChildRepositories`]
//! folds those paths into the children of one reference path, either every
//! descendant (recursive) or the unique first segments below it.

use super::RepositoryList;
use std::collections::BTreeSet;

/// Accumulates the children of `base` from raw backend paths, page by page.
///
/// An empty `base` stands for the root of a namespace (for example a GitHub
/// owner whose packages are named relative to it).
#[derive(Debug, Clone)]
pub struct ChildRepositories {
    base: String,
    prefix: String,
    recursive: bool,
    children: BTreeSet<String>,
    found: bool,
}

impl ChildRepositories {
    pub fn new(base: &str, recursive: bool) -> Self {
        let base = base.trim_end_matches('/').to_string();
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        };
        Self {
            base,
            prefix,
            recursive,
            children: BTreeSet::new(),
            found: false,
        }
    }

    /// Feed one raw path. Returns true when it is `base` or below it.
    pub fn push(&mut self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return false;
        }
        if path == self.base {
            self.found = true;
            return true;
        }
        let Some(relative) = path.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        if relative.is_empty() {
            return false;
        }
        self.found = true;

        let child = if self.recursive {
            relative
        } else {
            relative.split('/').next().unwrap_or(relative)
        };
        self.children.insert(child.to_string());
        true
    }

    /// Feed a whole page of raw paths
    pub fn extend<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            self.push(path.as_ref());
        }
    }

    /// Whether the base itself or any descendant was seen
    pub fn found(&self) -> bool {
        self.found
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Finish into a list named `name`
    pub fn into_list(self, name: &str) -> RepositoryList {
        RepositoryList {
            name: name.to_string(),
            repositories: self.children.into_iter().collect(),
        }
    }
}

/// Children of `base` among `paths`, as one list named `base`
pub fn flatten<I, S>(base: &str, paths: I, recursive: bool) -> RepositoryList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut children = ChildRepositories::new(base, recursive);
    children.extend(paths);
    children.into_list(base)
}

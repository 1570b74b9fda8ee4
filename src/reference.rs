//! Registry hosts and `<host>/<repository>` references

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Host, Url};

/// A validated registry host, optionally with a port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Registry {
    host: String,
    plain_http: bool,
}

impl Registry {
    pub fn new(host: &str) -> Result<Self> {
        validate_host(host)?;
        Ok(Self {
            host: host.to_string(),
            plain_http: false,
        })
    }

    /// Force plain HTTP regardless of what the host looks like
    pub fn with_plain_http(mut self, plain_http: bool) -> Self {
        self.plain_http = plain_http;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `http` for local and private hosts, `https` for everything else
    pub fn scheme(&self) -> &'static str {
        if self.plain_http || is_insecure_host(&self.host) {
            "http"
        } else {
            "https"
        }
    }

    /// `<scheme>://<host>/`
    pub fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{}://{}/", self.scheme(), self.host))?)
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// `<host>/<repository>` as given on the command line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryReference {
    pub host: String,
    pub repository: String,
}

impl RegistryReference {
    /// Parse a reference, splitting once on the first `/`.
    ///
    /// Trailing slashes on the repository are dropped. Fails without any
    /// network activity when the host or repository part is missing.
    pub fn parse(reference: &str) -> Result<Self> {
        let (host, repository) = reference.split_once('/').ok_or_else(|| {
            RegistryError::Validation(format!(
                "parsing reference '{}'; must be strictly of the form '<host>/<repository>'",
                reference
            ))
        })?;

        let repository = repository.trim_end_matches('/');
        if host.is_empty() || repository.is_empty() {
            return Err(RegistryError::Validation(format!(
                "parsing reference '{}'; host and repository must not be empty",
                reference
            )));
        }

        validate_host(host)?;
        validate_repository(repository)?;

        Ok(Self {
            host: host.to_string(),
            repository: repository.to_string(),
        })
    }

    /// Reference to `relative` below this repository
    pub fn child(&self, relative: &str) -> Self {
        Self {
            host: self.host.clone(),
            repository: format!("{}/{}", self.repository, relative),
        }
    }
}

impl fmt::Display for RegistryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.repository)
    }
}

impl std::str::FromStr for RegistryReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

pub fn validate_host(host: &str) -> Result<()> {
    let invalid = |why: &str| RegistryError::Validation(format!("invalid registry host '{}': {}", host, why));

    if host.is_empty() {
        return Err(invalid("empty"));
    }
    if host
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | '?' | '#' | '\\'))
    {
        return Err(invalid("unexpected character"));
    }

    let url = Url::parse(&format!("https://{}/", host)).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().is_none() || url.path() != "/" {
        return Err(invalid("not a host"));
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<()> {
    if repository.split('/').any(str::is_empty) {
        return Err(RegistryError::Validation(format!(
            "invalid repository '{}': empty path segment",
            repository
        )));
    }
    if repository.chars().any(|c| c.is_whitespace() || matches!(c, '@' | ':')) {
        return Err(RegistryError::Validation(format!(
            "invalid repository '{}': unexpected character",
            repository
        )));
    }
    Ok(())
}

fn is_insecure_host(host: &str) -> bool {
    let Ok(url) = Url::parse(&format!("https://{}/", host)) else {
        return false;
    };
    match url.host() {
        Some(Host::Domain(domain)) => {
            domain == "localhost" || domain.ends_with(".localhost") || domain.ends_with(".local")
        }
        Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_private(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

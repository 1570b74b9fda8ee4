//! Provider-specific clients
//!
//! Each provider talks to its backend through a small API trait with one
//! HTTP implementation, and folds the pages it gets back with the shared
//! [`crate::catalog`] algorithms.

pub mod dockerhub;
pub mod github;
pub mod google;
pub mod harbor;
pub mod registry;

pub use dockerhub::DockerHubClient;
pub use github::GithubClient;
pub use google::GoogleClient;
pub use harbor::HarborClient;
pub use registry::DistributionClient;

use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Split `first/rest`; `rest` is empty when there is no `/`
pub(crate) fn split_first(repository: &str) -> (&str, &str) {
    repository.split_once('/').unwrap_or((repository, ""))
}

/// Fail with a mapped error unless the response is a success, then decode it
pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T> {
    if !response.status().is_success() {
        return Err(HttpErrorHandler::from_response(response, operation).await);
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| RegistryError::Network(format!("{}: reading body: {}", operation, e)))?;
    serde_json::from_slice(&body)
        .map_err(|e| RegistryError::Parse(format!("{}: decoding body: {}", operation, e)))
}

/// Optional RFC 3339 timestamp where `0001-01-01T00:00:00Z` means "unknown".
///
/// Some APIs serialize an unset time as year one instead of omitting it.
/// That sentinel is dropped; every other value, the Unix epoch included,
/// is kept.
pub(crate) fn optional_time<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(&value)
        .map_err(serde::de::Error::custom)?
        .with_timezone(&Utc);
    if parsed.year() <= 1 {
        return Ok(None);
    }
    Ok(Some(parsed))
}

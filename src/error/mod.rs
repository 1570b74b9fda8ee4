//! Error types and handlers for registry operations

pub mod handlers;

use std::fmt::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The host is not handled by this provider. Only meaningful inside the
    /// dispatch chain.
    #[error("Not supported: {0}")]
    NotSupported(String),
    /// Repository or manifest namespace does not exist upstream
    #[error("Not found: {0}")]
    NotFound(String),
    /// Network related errors
    #[error("Network error: {0}")]
    Network(String),
    /// Unexpected upstream responses
    #[error("Registry error: {0}")]
    Registry(String),
    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Response decoding errors
    #[error("Parse error: {0}")]
    Parse(String),
    /// Malformed references, hosts or configuration
    #[error("Validation error: {0}")]
    Validation(String),
    /// Credential lookup failures
    #[error("Keychain error: {0}")]
    Keychain(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl RegistryError {
    /// Prefix the message with `context` while keeping the error kind.
    pub fn context(self, context: impl Display) -> Self {
        let wrap = |msg: String| format!("{}: {}", context, msg);
        match self {
            RegistryError::NotSupported(msg) => RegistryError::NotSupported(wrap(msg)),
            RegistryError::NotFound(msg) => RegistryError::NotFound(wrap(msg)),
            RegistryError::Network(msg) => RegistryError::Network(wrap(msg)),
            RegistryError::Registry(msg) => RegistryError::Registry(wrap(msg)),
            RegistryError::Auth(msg) => RegistryError::Auth(wrap(msg)),
            RegistryError::Parse(msg) => RegistryError::Parse(wrap(msg)),
            RegistryError::Validation(msg) => RegistryError::Validation(wrap(msg)),
            RegistryError::Keychain(msg) => RegistryError::Keychain(wrap(msg)),
            RegistryError::Timeout(msg) => RegistryError::Timeout(wrap(msg)),
            RegistryError::Cancelled => RegistryError::Cancelled,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, RegistryError::NotSupported(_))
    }
}

/// Attach context to the error side of a result
pub trait ResultExt<T> {
    fn context(self, context: impl Display) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Display) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.context(f()))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegistryError::Timeout(err.to_string())
        } else if err.is_decode() {
            RegistryError::Parse(err.to_string())
        } else {
            RegistryError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RegistryError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        RegistryError::Timeout(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_kind() {
        let err = RegistryError::NotFound("foo/bar".to_string()).context("listing tags");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: listing tags: foo/bar");
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(RegistryError::Network("connection refused".to_string()));
        let err = result.with_context(|| format!("listing repositories for {}", "foo")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Network("listing repositories for foo: connection refused".to_string())
        );
    }

    #[test]
    fn test_cancelled_has_no_context() {
        assert_eq!(RegistryError::Cancelled.context("anything"), RegistryError::Cancelled);
    }
}

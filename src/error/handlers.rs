//! Standardized mapping of upstream HTTP failures onto registry errors

use crate::error::RegistryError;
use reqwest::StatusCode;

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Map a non-success status and its body onto an error for `operation`
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        operation: &str,
    ) -> RegistryError {
        let error_text = Self::truncate(error_text);
        match status.as_u16() {
            401 => RegistryError::Auth(format!(
                "Unauthorized to perform {} operation: {}",
                operation, error_text
            )),
            403 => RegistryError::Auth(format!(
                "Forbidden: insufficient permissions for {}: {}",
                operation, error_text
            )),
            404 => RegistryError::NotFound(format!("{}: {}", operation, error_text)),
            429 => RegistryError::Registry(format!("Rate limited during {}: {}", operation, error_text)),
            500 => RegistryError::Registry(format!(
                "Registry server error during {}: {}",
                operation, error_text
            )),
            502 | 503 => RegistryError::Registry(format!(
                "Registry unavailable for {}: {}",
                operation, error_text
            )),
            _ => RegistryError::Registry(format!(
                "{} failed (status {}): {}",
                operation, status, error_text
            )),
        }
    }

    /// Read the body of a failed response and map it
    pub async fn from_response(response: reqwest::Response, operation: &str) -> RegistryError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Self::handle_registry_error(status, &error_text, operation)
    }

    /// Error bodies can be entire HTML pages
    fn truncate(text: &str) -> &str {
        const MAX: usize = 256;
        let text = text.trim();
        if text.len() <= MAX {
            return text;
        }
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}

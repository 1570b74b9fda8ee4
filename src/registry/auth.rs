//! Bearer token exchange for registries speaking the distribution protocol

use crate::config::AuthConfig;
use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Auth {
    client: Client,
    output: Logger,
}

impl Auth {
    pub fn new(client: Client, output: Logger) -> Self {
        Self { client, output }
    }

    /// Parse a Bearer challenge: `Bearer realm="...",service="...",scope="..."`
    pub fn parse_challenge(auth_header: &str) -> Option<AuthChallenge> {
        let (scheme, params_str) = auth_header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = HashMap::new();
        let mut rest = params_str.trim();
        while !rest.is_empty() {
            let Some(eq_pos) = rest.find('=') else { break };
            let key = rest[..eq_pos].trim().trim_start_matches(',').trim().to_ascii_lowercase();
            rest = rest[eq_pos + 1..].trim_start();

            // scope values contain commas, so quoted values are read to the closing quote
            let value;
            if let Some(quoted) = rest.strip_prefix('"') {
                let end = quoted.find('"').unwrap_or(quoted.len());
                value = quoted[..end].to_string();
                rest = quoted.get(end + 1..).unwrap_or("");
            } else {
                let end = rest.find(',').unwrap_or(rest.len());
                value = rest[..end].trim().to_string();
                rest = &rest[end..];
            }
            rest = rest.trim_start().trim_start_matches(',').trim_start();
            params.insert(key, value);
        }

        let realm = params.remove("realm")?;
        Some(AuthChallenge {
            realm,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }

    /// Exchange credentials for a bearer token at the challenge realm
    pub async fn fetch_token(&self, challenge: &AuthChallenge, creds: &AuthConfig) -> Result<String> {
        let mut url = Url::parse(&challenge.realm)
            .map_err(|e| RegistryError::Auth(format!("Invalid token realm '{}': {}", challenge.realm, e)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }

        self.output.detail(&format!("Requesting token from: {}", url));

        let mut request = self.client.get(url);
        if creds.has_basic() {
            request = request.basic_auth(creds.username.clone().unwrap_or_default(), creds.password.clone());
        } else if let Some(token) = creds.identity_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Network(format!("Failed to get auth token: {}", e)))?;

        if !response.status().is_success() {
            let err = HttpErrorHandler::from_response(response, "token request").await;
            return Err(RegistryError::Auth(err.to_string()));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Parse(format!("Failed to parse token response: {}", e)))?;

        token_response
            .token
            .or(token_response.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Auth("Token response carried no token".to_string()))
    }
}

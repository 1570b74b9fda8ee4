//! Authenticated transport for provider HTTP calls
//!
//! Every request resolves credentials for its host through the keychain and
//! attaches them, so the registry-specific APIs (GitHub, DockerHub, Harbor)
//! work with the same credentials used to pull from the registry itself.

use crate::config::AuthConfig;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::auth::Auth;
use crate::registry::keychain::Keychain;
use crate::registry::rate_limit::RateLimiter;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use url::{Position, Url};

#[derive(Debug, Clone)]
pub struct AuthTransport {
    client: Client,
    keychain: Arc<dyn Keychain>,
    resource: Option<String>,
    limiter: Option<Arc<RateLimiter>>,
    token_exchange: bool,
    logger: Logger,
}

impl AuthTransport {
    pub fn new(client: Client, keychain: Arc<dyn Keychain>) -> Self {
        Self {
            client,
            keychain,
            resource: None,
            limiter: None,
            token_exchange: false,
            logger: Logger::default(),
        }
    }

    /// Look up credentials for `host` instead of the request host
    pub fn with_resource(mut self, host: impl Into<String>) -> Self {
        self.resource = Some(host.into());
        self
    }

    /// Pass every outbound call through `limiter` first
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Answer `401` Bearer challenges with a token exchange and one retry
    pub fn with_token_exchange(mut self, enabled: bool) -> Self {
        self.token_exchange = enabled;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Credentials for the host `url` points at (or the fixed resource)
    pub fn credentials_for(&self, url: &Url) -> Result<AuthConfig> {
        let host = match &self.resource {
            Some(resource) => resource.as_str(),
            None => &url[Position::BeforeHost..Position::AfterPort],
        };
        self.keychain
            .resolve(host)
            .map_err(|e| e.context(format!("resolving credentials for {}", host)))
    }

    /// Attach `auth` to a request: registry token, identity token, then
    /// basic auth. Anonymous when none is usable.
    pub fn authorize(request: RequestBuilder, auth: &AuthConfig) -> RequestBuilder {
        fn usable(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.is_empty())
        }

        if let Some(token) = usable(&auth.registry_token) {
            request.bearer_auth(token)
        } else if let Some(token) = usable(&auth.identity_token) {
            request.bearer_auth(token)
        } else if let Some(password) = usable(&auth.password) {
            request.basic_auth(auth.username.clone().unwrap_or_default(), Some(password))
        } else {
            request
        }
    }

    pub async fn get(&self, url: &Url) -> Result<Response> {
        self.send(Method::GET, url, HeaderMap::new()).await
    }

    /// Send one request with credentials attached.
    ///
    /// Waits on the rate limiter first when one is configured. The response
    /// is returned whatever its status; callers map failures.
    pub async fn send(&self, method: Method, url: &Url, headers: HeaderMap) -> Result<Response> {
        let auth = self.credentials_for(url)?;

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        self.logger.detail(&format!("{} {}", method, url));
        let request = self
            .client
            .request(method.clone(), url.clone())
            .headers(headers.clone());
        let response = Self::authorize(request, &auth)
            .send()
            .await
            .map_err(|e| network_error(e, &method, url))?;

        if response.status() != StatusCode::UNAUTHORIZED || !self.token_exchange {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(Auth::parse_challenge)
        else {
            return Ok(response);
        };

        self.logger.detail(&format!(
            "Bearer challenge from {} (service={:?}, scope={:?})",
            url, challenge.service, challenge.scope
        ));
        let token = Auth::new(self.client.clone(), self.logger.clone())
            .fetch_token(&challenge, &auth)
            .await?;

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        self.client
            .request(method.clone(), url.clone())
            .headers(headers)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| network_error(e, &method, url))
    }
}

fn network_error(err: reqwest::Error, method: &Method, url: &Url) -> RegistryError {
    RegistryError::from(err).context(format!("{} {}", method, url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::keychain::{Anonymous, StaticKeychain};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use reqwest::header::AUTHORIZATION;

    fn header_for(auth: &AuthConfig) -> Option<String> {
        let client = Client::new();
        let request = AuthTransport::authorize(client.get("https://ghcr.io/v2/"), auth)
            .build()
            .unwrap();
        request
            .headers()
            .get(AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[test]
    fn test_registry_token_first() {
        let auth = AuthConfig {
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            identity_token: Some("identity".to_string()),
            registry_token: Some("registry".to_string()),
        };
        assert_eq!(header_for(&auth).as_deref(), Some("Bearer registry"));
    }

    #[test]
    fn test_identity_token_before_basic() {
        let auth = AuthConfig {
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            identity_token: Some("identity".to_string()),
            registry_token: Some(String::new()),
        };
        assert_eq!(header_for(&auth).as_deref(), Some("Bearer identity"));
    }

    #[test]
    fn test_basic_auth() {
        let auth = AuthConfig::basic("user", "pass");
        let expected = format!("Basic {}", STANDARD.encode("user:pass"));
        assert_eq!(header_for(&auth), Some(expected));
    }

    #[test]
    fn test_anonymous_without_credentials() {
        assert_eq!(header_for(&AuthConfig::anonymous()), None);
        let user_only = AuthConfig {
            username: Some("user".to_string()),
            ..AuthConfig::default()
        };
        assert_eq!(header_for(&user_only), None);
    }

    #[test]
    fn test_credentials_for_request_host() {
        let keychain = StaticKeychain::new()
            .with("localhost:5000", AuthConfig::bearer("local"))
            .with("ghcr.io", AuthConfig::bearer("ghcr"));
        let transport = AuthTransport::new(Client::new(), Arc::new(keychain));

        let url = Url::parse("http://localhost:5000/v2/_catalog").unwrap();
        assert_eq!(
            transport.credentials_for(&url).unwrap().registry_token.as_deref(),
            Some("local")
        );

        let transport = transport.with_resource("ghcr.io");
        let url = Url::parse("https://api.github.com/users/foo").unwrap();
        assert_eq!(
            transport.credentials_for(&url).unwrap().registry_token.as_deref(),
            Some("ghcr")
        );
    }

    #[tokio::test]
    async fn test_connection_errors_carry_context() {
        let transport = AuthTransport::new(Client::new(), Arc::new(Anonymous));
        let url = Url::parse("http://127.0.0.1:1/v2/").unwrap();
        let err = transport.get(&url).await.unwrap_err();
        assert!(err.to_string().contains("GET http://127.0.0.1:1/v2/"), "{}", err);
    }
}

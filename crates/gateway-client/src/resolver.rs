//! Gateway endpoint discovery

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Public gateway endpoint used when discovery is not configured
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Resolver errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Gateway lookup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway lookup returned an empty url")]
    EmptyUrl,
}

/// Produces the base gateway URL; called once per `connect()`
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self) -> Result<String, ResolveError>;
}

/// Always returns the same URL
#[derive(Debug, Clone)]
pub struct StaticResolver {
    url: String,
}

impl StaticResolver {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new(DEFAULT_GATEWAY_URL)
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self) -> Result<String, ResolveError> {
        Ok(self.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: String,
}

/// Looks the endpoint up with `GET {api_base}/gateway`
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    api_base: String,
}

impl HttpResolver {
    #[must_use]
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    fn lookup_url(&self) -> String {
        format!("{}/gateway", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl EndpointResolver for HttpResolver {
    async fn resolve(&self) -> Result<String, ResolveError> {
        let response: GatewayResponse = self
            .client
            .get(self.lookup_url())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.url.trim().is_empty() {
            return Err(ResolveError::EmptyUrl);
        }

        tracing::debug!(url = %response.url, "Resolved gateway endpoint");
        Ok(response.url)
    }
}

/// Append the version and encoding query to a base gateway URL
#[must_use]
pub fn gateway_url(base: &str, version: u8, encoding: &str) -> String {
    let query = format!("v={version}&encoding={encoding}");
    if base.contains('?') {
        format!("{}&{query}", base.trim_end_matches('&'))
    } else {
        format!("{}/?{query}", base.trim_end_matches('/'))
    }
}

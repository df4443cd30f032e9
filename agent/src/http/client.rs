//! HTTP client implementation

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::AgentError;

/// HTTP client for trainer communication
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            AgentError::ConfigError(format!("invalid trainer url {}: {}", base_url, e))
        })?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Absolute URL for `path` with the given query pairs
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, AgentError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AgentError::ConfigError(format!("{} cannot be a base", self.base_url)))?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET the base URL and report the status
    pub async fn probe(&self) -> Result<StatusCode, AgentError> {
        let response = self.client.get(self.base_url.clone()).send().await?;
        Ok(response.status())
    }

    /// POST `body` as JSON and decode the JSON response
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T, AgentError> {
        let response = self.send_json(path, query, body).await?;
        let body = response.json().await?;
        Ok(body)
    }

    /// POST `body` as JSON, ignoring the response body
    pub async fn post_no_content<B: Serialize>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<(), AgentError> {
        self.send_json(path, query, body).await?;
        Ok(())
    }

    async fn send_json<B: Serialize>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<reqwest::Response, AgentError> {
        let url = self.url(path, query)?;
        debug!("POST {}", url);

        let response = self.client.post(url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST {} failed: {} - {}", path, status, body);
            return Err(AgentError::ChannelFailure(format!("{}: {}", status, body)));
        }
        Ok(response)
    }
}

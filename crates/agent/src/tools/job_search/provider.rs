use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct OrganicResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("missing search API credentials")]
    MissingCredentials,
    #[error("could not build search request: {0}")]
    Request(String),
    #[error("search request failed: {0}")]
    Transport(String),
    #[error("search provider returned status {0}")]
    Status(u16),
    #[error("could not read search response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<OrganicResult>, SearchError>;
}

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

/// Client for SerpAPI-style endpoints returning `organic_results`.
pub struct SerpApiProvider {
    client: Client,
    url: String,
    api_key: Option<SecretString>,
}

impl SerpApiProvider {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SearchError::Request(error.to_string()))?;
        Ok(Self { client, url: url.into(), api_key })
    }
}

#[async_trait]
impl SearchProvider for SerpApiProvider {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn search(&self, query: &str) -> Result<Vec<OrganicResult>, SearchError> {
        let api_key = self
            .api_key
            .as_ref()
            .map(|key| key.expose_secret().trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(SearchError::MissingCredentials)?;

        let request = self
            .client
            .get(&self.url)
            .query(&[("engine", "google"), ("q", query), ("api_key", api_key.as_str())])
            .build()
            .map_err(|error| SearchError::Request(error.to_string()))?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|error| SearchError::Transport(error.without_url().to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(SearchError::Status(response.status().as_u16()));
        }

        let body: SerpResponse =
            response.json().await.map_err(|error| SearchError::Decode(error.to_string()))?;

        debug!(
            event_name = "job_search.provider.results",
            results = body.organic_results.len(),
            "search provider returned organic results"
        );

        Ok(body.organic_results)
    }
}

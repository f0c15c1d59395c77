//! # Web Search Service
//!
//! Search backends return raw hits; filtering incomplete records is the
//! caller's job (see [`crate::state::records::SearchResultSet::from_hits`]).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SearchBackend, SearchConfig};
use crate::error::{ResearchError, ResearchResult};
use crate::state::records::RawSearchHit;

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> ResearchResult<Vec<RawSearchHit>>;
}

/// Build the configured backend.
pub fn build_search(config: &SearchConfig) -> ResearchResult<Arc<dyn WebSearch>> {
    match config.backend {
        SearchBackend::Tavily => Ok(Arc::new(TavilySearch::from_env()?)),
        SearchBackend::Searxng => Ok(Arc::new(SearxngSearch::new(config.searxng_url.clone())?)),
    }
}

fn search_failure(query: &str, reason: impl ToString) -> ResearchError {
    ResearchError::SearchFailure {
        query: query.to_string(),
        reason: reason.to_string(),
    }
}

/// Tavily search API with raw page content
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Deserialize)]
struct TavilyHit {
    url: Option<String>,
    title: Option<String>,
    raw_content: Option<String>,
}

impl From<TavilyHit> for RawSearchHit {
    fn from(hit: TavilyHit) -> Self {
        RawSearchHit {
            url: hit.url,
            title: hit.title,
            content: hit.raw_content,
        }
    }
}

impl TavilySearch {
    pub const ENDPOINT: &'static str = "https://api.tavily.com/search";

    /// Reads `TAVILY_API_KEY`.
    pub fn from_env() -> ResearchResult<Self> {
        let api_key = std::env::var("TAVILY_API_KEY")
            .map_err(|_| ResearchError::invalid_config("TAVILY_API_KEY is not set"))?;
        Self::new(api_key, Self::ENDPOINT)
    }

    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> ResearchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ResearchError::invalid_config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> ResearchResult<Vec<RawSearchHit>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "topic": "general",
                "max_results": max_results,
                "include_raw_content": true,
            }))
            .send()
            .await
            .map_err(|e| search_failure(query, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(search_failure(query, format!("HTTP {}: {}", status, body)));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| search_failure(query, e))?;
        Ok(parsed
            .results
            .into_iter()
            .take(max_results)
            .map(RawSearchHit::from)
            .collect())
    }
}

/// SearXNG JSON API, trying a configured instance first and then known ones
pub struct SearxngSearch {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngSearch {
    pub fn new(custom_url: Option<String>) -> ResearchResult<Self> {
        let mut endpoints: Vec<String> = Vec::new();

        if let Some(url) = custom_url.or_else(|| std::env::var("SEARXNG_URL").ok()) {
            endpoints.push(format!("{}/search", url.trim_end_matches('/')));
        }

        // Public instances, full list at https://searx.space/
        endpoints.extend([
            "https://searx.be/search".to_string(),
            "https://search.sapti.me/search".to_string(),
            "https://searx.tiekoetter.com/search".to_string(),
        ]);
        endpoints.push("http://localhost:8888/search".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ResearchError::invalid_config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn try_endpoint(
        &self,
        endpoint: &str,
        query: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<RawSearchHit>> {
        let url = format!("{}?q={}&format=json", endpoint, urlencoding::encode(query));
        let json: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let results = json
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| anyhow::anyhow!("no results array"))?;

        let field = |r: &serde_json::Value, key: &str| {
            r.get(key).and_then(|v| v.as_str()).map(str::to_string)
        };

        Ok(results
            .iter()
            .take(max_results)
            .map(|r| RawSearchHit {
                url: field(r, "url"),
                title: field(r, "title"),
                content: field(r, "content"),
            })
            .collect())
    }
}

#[async_trait]
impl WebSearch for SearxngSearch {
    async fn search(&self, query: &str, max_results: usize) -> ResearchResult<Vec<RawSearchHit>> {
        let mut last_error = String::from("no endpoints configured");
        for endpoint in &self.endpoints {
            match self.try_endpoint(endpoint, query, max_results).await {
                Ok(hits) => return Ok(hits),
                Err(e) => {
                    tracing::debug!("SearXNG endpoint {} failed: {}", endpoint, e);
                    last_error = format!("{}: {}", endpoint, e);
                }
            }
        }
        Err(search_failure(query, last_error))
    }
}

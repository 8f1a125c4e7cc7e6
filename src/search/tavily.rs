//! Web-search adapter grounded in the original's Tavily-backed search
//! service — a thin reqwest client plus the shared rate limiter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{RateLimiter, SearchAdapter, SearchHit};
use crate::domain::{Image, Source};
use crate::errors::SearchAdapterError;

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
    #[serde(default)]
    images: Vec<TavilyImage>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    published_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TavilyImage {
    url: String,
    #[serde(default)]
    description: Option<String>,
}

pub struct TavilySearchAdapter {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
    rate_limiter: RateLimiter,
}

impl TavilySearchAdapter {
    pub fn new(api_key: impl Into<String>, timeout: Duration, requests_per_minute: u32) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.tavily.com".to_string(),
            http: reqwest::Client::new(),
            timeout,
            rate_limiter: RateLimiter::per_minute(requests_per_minute),
        }
    }
}

#[async_trait]
impl SearchAdapter for TavilySearchAdapter {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchHit, SearchAdapterError> {
        self.rate_limiter.acquire().await;

        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .timeout(self.timeout)
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results,
                "include_raw_content": true,
                "include_images": true,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchAdapterError::Timeout
                } else {
                    SearchAdapterError::Upstream(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(SearchAdapterError::Upstream(format!(
                "search provider returned status {}",
                response.status()
            )));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchAdapterError::Upstream(e.to_string()))?;

        let sources = parsed
            .results
            .into_iter()
            .map(|r| {
                // Prefer raw_content over the trimmed snippet the provider
                // also returns, since the Aggregator needs the full page
                // text to run its own truncation over.
                let content = r.raw_content.filter(|c| !c.is_empty()).unwrap_or(r.content);
                Source {
                    title: r.title,
                    url: r.url,
                    content,
                    score: r.score,
                    published_date: r
                        .published_date
                        .and_then(|d| chrono::DateTime::parse_from_rfc3339(&d).ok())
                        .map(|d| d.with_timezone(&chrono::Utc)),
                }
            })
            .collect();

        let images = parsed
            .images
            .into_iter()
            .map(|i| Image {
                url: i.url,
                description: i.description,
            })
            .collect();

        Ok(SearchHit { sources, images })
    }
}

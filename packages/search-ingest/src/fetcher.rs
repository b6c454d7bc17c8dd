//! Upstream page fetching.
//!
//! A fetcher performs exactly one upstream call per page and does no retrying
//! of its own; retry policy is layered on top with [`RetryingFetcher`] so the
//! orchestrator's failure semantics stay simple.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::{extract_records, extract_total};

/// HTTP method used for upstream page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
}

/// One page request against the upstream search API.
#[derive(Debug, Clone, Copy)]
pub struct PageQuery<'a> {
    pub endpoint: &'a str,
    pub method: HttpMethod,
    pub filters: &'a Value,
    pub page: i64,
    pub limit: i64,
    pub page_param: &'a str,
    pub limit_param: &'a str,
}

/// Records and total extracted from one upstream page response.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub records: Vec<Value>,
    pub total: i64,
}

/// Trait for upstream page clients (to allow mocking).
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, query: PageQuery<'_>) -> Result<FetchedPage>;
}

#[async_trait]
impl<F: PageFetcher + ?Sized> PageFetcher for Arc<F> {
    async fn fetch_page(&self, query: PageQuery<'_>) -> Result<FetchedPage> {
        (**self).fetch_page(query).await
    }
}

/// Non-2xx response from the upstream search API.
#[derive(Debug, thiserror::Error)]
#[error("Upstream API error {status}: {body}")]
pub struct UpstreamError {
    pub status: u16,
    pub body: String,
}

/// reqwest-based page fetcher for the upstream search API.
pub struct HttpPageFetcher {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

/// Merge the caller's filters with page/limit under the configured parameter
/// names. Non-object filters cannot be merged into a parameter map and are
/// ignored for request shaping (they still participate in fingerprinting).
fn merge_params(query: &PageQuery<'_>) -> serde_json::Map<String, Value> {
    let mut params = match query.filters {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            tracing::warn!(filters = %other, "Ignoring non-object filters for request shaping");
            serde_json::Map::new()
        }
    };
    params.insert(query.page_param.to_string(), Value::from(query.page));
    params.insert(query.limit_param.to_string(), Value::from(query.limit));
    params
}

/// Flatten a parameter map into query-string pairs. Scalars keep their
/// literal form; arrays and objects are passed through as JSON text.
fn query_pairs(params: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, query: PageQuery<'_>) -> Result<FetchedPage> {
        let url = self.url_for(query.endpoint);
        let params = merge_params(&query);

        let mut request = match query.method {
            HttpMethod::Get => self.client.get(&url).query(&query_pairs(&params)),
            HttpMethod::Post => self.client.post(&url).json(&Value::Object(params)),
        };
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send upstream search request")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError { status, body }.into());
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse upstream response as JSON")?;

        let records = extract_records(&body);
        let total = extract_total(&body, records.len());

        tracing::debug!(
            endpoint = query.endpoint,
            page = query.page,
            limit = query.limit,
            records = records.len(),
            total,
            "Fetched upstream page"
        );

        Ok(FetchedPage { records, total })
    }
}

/// Decorator adding bounded exponential backoff around an inner fetcher.
///
/// Kept outside the run state machine: the orchestrator still sees a single
/// fetch that either succeeds or fails.
pub struct RetryingFetcher<F> {
    inner: F,
    max_attempts: u32,
    base_delay: Duration,
}

impl<F> RetryingFetcher<F> {
    pub fn new(inner: F, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for RetryingFetcher<F> {
    async fn fetch_page(&self, query: PageQuery<'_>) -> Result<FetchedPage> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let exponent = (attempt - 2).min(10);
                let delay = self
                    .base_delay
                    .saturating_mul(2u32.pow(exponent))
                    .min(Duration::from_secs(60));
                tokio::time::sleep(delay).await;
            }

            match self.inner.fetch_page(query).await {
                Ok(page) => return Ok(page),
                Err(err) => {
                    tracing::warn!(
                        endpoint = query.endpoint,
                        page = query.page,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Upstream page fetch failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No fetch attempts were made")))
    }
}

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::fetcher::HttpMethod;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub search_api_base_url: String,
    pub search_api_key: Option<String>,
    /// Label identifying the upstream API in run dedup keys.
    pub search_api_source: String,
    pub block_store_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            search_api_base_url: env::var("SEARCH_API_BASE_URL")
                .context("SEARCH_API_BASE_URL must be set")?,
            search_api_key: env::var("SEARCH_API_KEY").ok(),
            search_api_source: env::var("SEARCH_API_SOURCE")
                .unwrap_or_else(|_| "search-api".to_string()),
            block_store_dir: env::var("BLOCK_STORE_DIR")
                .unwrap_or_else(|_| "./blocks".to_string())
                .into(),
        })
    }
}

/// Per-run tunables, used when a [`crate::types::SearchRequest`] leaves the
/// corresponding field unset.
#[derive(Debug, Clone)]
pub struct RunDefaults {
    pub method: HttpMethod,
    pub page_param: String,
    pub limit_param: String,
    /// Ceiling on records fetched per run, applied to the upstream total.
    pub max_records: i64,
    pub page_size: i64,
    pub block_size: usize,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            page_param: "page".to_string(),
            limit_param: "limit".to_string(),
            max_records: 1_000,
            page_size: 100,
            block_size: 500,
        }
    }
}

impl RunDefaults {
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_max_records(mut self, max_records: i64) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}

//! Fetches candidate pages and reduces them to visible text.

use crate::config::Config;
use crate::domain::parse_target;
use crate::error::{AppError, Result};
use crate::extract::flatten_text;
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};

/// Retrieves the visible text of a page. Any failure yields an empty string.
#[async_trait]
pub(crate) trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> String;
}

/// `PageFetcher` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub(crate) struct HttpPageFetcher {
    http_client: Client,
    timeout: Duration,
}

impl HttpPageFetcher {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let user_agent = config
            .user_agents
            .first()
            .cloned()
            .unwrap_or_default();

        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                AppError::Generic(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            timeout: config.request_timeout,
        })
    }

    /// Fetches `url` and returns its flattened text, surfacing every failure.
    pub(crate) async fn try_fetch(&self, url: &str) -> Result<String> {
        let target = parse_target(url)?;

        let response = self
            .http_client
            .get(target.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(target: "fetch_task", "GET {} status: {}", target, status);
        if !status.is_success() {
            return Err(AppError::Fetch(format!("HTTP {} for {}", status, target)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let body = response.text().await?;

        // Missing content type: sniff for markup.
        let looks_like_html = if content_type.is_empty() {
            body.trim_start().starts_with('<')
        } else {
            content_type.contains("html")
        };

        if !looks_like_html {
            return Err(AppError::Fetch(format!(
                "Skipping non-HTML content at {} ({})",
                target, content_type
            )));
        }

        Ok(flatten_text(&body))
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> String {
        let start_time = Instant::now();
        match self.try_fetch(url).await {
            Ok(text) => {
                tracing::debug!(target: "fetch_task",
                    "Fetched {} ({} chars) in {:.2?}", url, text.len(), start_time.elapsed()
                );
                text
            }
            Err(AppError::Request(e)) => {
                if e.is_timeout() {
                    tracing::warn!(target: "fetch_task", "Timeout fetching {}: {}", url, e);
                } else if e.is_connect() || e.is_request() {
                    tracing::warn!(target: "fetch_task", "Request/Connection error fetching {}: {}", url, e);
                } else {
                    tracing::warn!(target: "fetch_task", "Unexpected error fetching {}: {}", url, e);
                }
                String::new()
            }
            Err(e) => {
                tracing::debug!(target: "fetch_task", "No text from {}: {}", url, e);
                String::new()
            }
        }
    }
}

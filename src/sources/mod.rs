// src/sources/mod.rs
//! Source adapters that turn feeds and crawled sites into harvest calls.

pub mod crawl;
pub mod feed_store;
pub mod rss;

use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP client used for fetching feeds and crawled pages directly.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent.to_string())
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()
        .context("building source HTTP client")
}

/// GETs `url` and returns the body plus the final URL after redirects.
pub async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<(String, String)> {
    let resp = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()
        .with_context(|| format!("GET {url}"))?;
    let final_url = resp.url().to_string();
    let body = resp
        .text()
        .await
        .with_context(|| format!("reading body of {url}"))?;
    Ok((body, final_url))
}

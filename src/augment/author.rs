// src/augment/author.rs
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

use crate::error::{HarvestError, Result};

pub const DEFAULT_ID_PATTERN: &str = r"<SMALL>PPN</SMALL>.*<div><SMALL>([0-9X]+)";

/// Resolves an author given as "Last, First" to a catalog identifier.
#[async_trait]
pub trait AuthorLookup: Send + Sync {
    /// `Ok(None)` is a miss. `Err` is a network failure and fails the item.
    async fn lookup(&self, name: &str) -> Result<Option<String>>;
}

/// Used when no lookup service is configured.
pub struct NoAuthorLookup;

#[async_trait]
impl AuthorLookup for NoAuthorLookup {
    async fn lookup(&self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Fills `{name}` in a URL template and scrapes the id from the page body.
pub struct HttpAuthorLookup {
    http: reqwest::Client,
    url_template: String,
    id_pattern: Regex,
}

impl HttpAuthorLookup {
    pub fn new(url_template: &str, id_pattern: Option<&str>, user_agent: &str) -> Result<Self> {
        if !url_template.contains("{name}") {
            return Err(HarvestError::config(format!(
                "author lookup template \"{url_template}\" lacks a {{name}} placeholder"
            )));
        }
        let pattern = id_pattern.unwrap_or(DEFAULT_ID_PATTERN);
        let id_pattern = Regex::new(&format!("(?s){pattern}"))
            .map_err(|e| HarvestError::config(format!("author id pattern: {e}")))?;
        let http = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HarvestError::config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            url_template: url_template.to_string(),
            id_pattern,
        })
    }

    fn lookup_url(&self, name: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        self.url_template.replace("{name}", &encoded)
    }

    fn extract_id(&self, body: &str) -> Option<String> {
        self.id_pattern
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl AuthorLookup for HttpAuthorLookup {
    async fn lookup(&self, name: &str) -> Result<Option<String>> {
        let url = self.lookup_url(name);
        let fail = |reason: String| HarvestError::AuthorLookup {
            author: name.to_string(),
            reason,
        };
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fail(format!("HTTP {}", resp.status().as_u16())));
        }
        let body = resp.text().await.map_err(|e| fail(e.to_string()))?;
        Ok(self.extract_id(&body))
    }
}

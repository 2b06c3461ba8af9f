// src/translation.rs
//! Client for the remote translation service (`/web`, `/import`, `/export`).

use reqwest::{header, StatusCode};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{HarvestError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Formats the `/export` endpoint can produce.
pub const EXPORT_FORMATS: &[&str] = &[
    "bibtex",
    "biblatex",
    "bookmarks",
    "coins",
    "csljson",
    "mods",
    "refer",
    "rdf_bibliontology",
    "rdf_dc",
    "rdf_zotero",
    "ris",
    "wikipedia",
    "tei",
];

#[derive(Debug, Clone, PartialEq)]
pub enum WebResponse {
    /// 2xx: the normalized records for the URL.
    Records(Vec<Value>),
    /// 300: keys are child URLs (or bare DOIs) to harvest individually.
    MultipleChoices(Map<String, Value>),
    /// 501: no translator handles this URL.
    NoTranslator,
    ServerError { status: u16, body: String },
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub conversion_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: concat!("journal-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: DEFAULT_TIMEOUT,
            conversion_timeout: DEFAULT_CONVERSION_TIMEOUT,
        }
    }
}

pub struct TranslationClient {
    http: reqwest::Client,
    base: String,
    opts: ClientOptions,
    session_prefix: String,
    session_counter: AtomicU64,
}

impl TranslationClient {
    pub fn new(base_url: &str, opts: ClientOptions) -> Result<Self> {
        url::Url::parse(base_url).map_err(|e| {
            HarvestError::config(format!("invalid translation server URL \"{base_url}\": {e}"))
        })?;
        let http = reqwest::Client::builder()
            .user_agent(opts.user_agent.clone())
            .connect_timeout(Duration::from_secs(4))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HarvestError::config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
            opts,
            session_prefix: format!("journal_harvester_{}", uuid::Uuid::new_v4().simple()),
            session_counter: AtomicU64::new(0),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn next_session_id(&self) -> String {
        let n = self.session_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{n}", self.session_prefix)
    }

    /// Transport failures and timeouts come back as `Err(Transport)`.
    pub async fn web(&self, url: &str) -> Result<WebResponse> {
        let body = serde_json::json!({ "url": url, "sessionid": self.next_session_id() });
        let resp = self
            .http
            .post(format!("{}/web", self.base))
            .timeout(self.opts.timeout)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        match status {
            StatusCode::MULTIPLE_CHOICES => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(WebResponse::MultipleChoices(map)),
                Ok(_) => Err(HarvestError::MalformedResponse(
                    "300 response is not a JSON object".into(),
                )),
                Err(e) => Err(HarvestError::MalformedResponse(e.to_string())),
            },
            StatusCode::NOT_IMPLEMENTED => Ok(WebResponse::NoTranslator),
            s if s.is_client_error() || s.is_server_error() => Ok(WebResponse::ServerError {
                status: s.as_u16(),
                body: text,
            }),
            _ => parse_record_array(&text).map(WebResponse::Records),
        }
    }

    pub async fn import(&self, content: &str) -> Result<Vec<Value>> {
        let resp = self
            .http
            .post(format!("{}/import", self.base))
            .timeout(self.opts.timeout)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;
        let text = checked_body(resp).await?;
        parse_record_array(&text)
    }

    pub async fn export(&self, records: &[Value], format: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/export", self.base))
            .query(&[("format", format)])
            .timeout(self.opts.conversion_timeout)
            .json(records)
            .send()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;
        checked_body(resp).await
    }
}

async fn checked_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| HarvestError::Transport(e.to_string()))?;
    if status.is_client_error() || status.is_server_error() {
        return Err(HarvestError::Server {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

fn parse_record_array(text: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(HarvestError::MalformedResponse(format!(
            "expected a JSON array, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(HarvestError::MalformedResponse(e.to_string())),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

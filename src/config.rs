// src/config.rs
//! Run configuration (TOML).
//!
//! Lookup order: explicit path, then `$HARVESTER_CONFIG_PATH`, then
//! `config/harvester.toml` relative to the working directory.

use anyhow::{anyhow, Context};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::augment::issn::normalize_issn;
use crate::catalog::record::{parse_field_spec, EditInstruction};
use crate::error::{HarvestError, Result};
use crate::harvest::HarvestParams;
use crate::site::{DeliveryMode, SiteParams};
use crate::sources::crawl::DEFAULT_MAX_CRAWL_DEPTH;
use crate::translation::ClientOptions;

pub const ENV_PATH: &str = "HARVESTER_CONFIG_PATH";
pub const DEFAULT_PATH: &str = "config/harvester.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub translation_server_url: String,
    #[serde(default = "default_map_dir")]
    pub map_dir: PathBuf,
    #[serde(default = "default_tracker_db")]
    pub tracker_db: PathBuf,
    #[serde(default = "default_feed_store_db")]
    pub feed_store_db: PathBuf,
    #[serde(default = "default_min_url_processing_time_ms")]
    pub min_url_processing_time_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_conversion_timeout_ms")]
    pub conversion_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_fanout_depth")]
    pub max_fanout_depth: usize,
    #[serde(default)]
    pub crawl_progress_file: Option<PathBuf>,
    #[serde(default)]
    pub author_lookup: Option<AuthorLookupConfig>,
    pub output: OutputConfig,
    #[serde(default)]
    pub journals: Vec<JournalConfig>,
}

fn default_map_dir() -> PathBuf {
    PathBuf::from("maps")
}
fn default_tracker_db() -> PathBuf {
    PathBuf::from("data/download_tracker.db")
}
fn default_feed_store_db() -> PathBuf {
    PathBuf::from("data/feeds.db")
}
fn default_min_url_processing_time_ms() -> u64 {
    crate::harvest::DEFAULT_MIN_URL_PROCESSING_TIME.as_millis() as u64
}
fn default_request_timeout_ms() -> u64 {
    crate::translation::DEFAULT_TIMEOUT.as_millis() as u64
}
fn default_conversion_timeout_ms() -> u64 {
    crate::translation::DEFAULT_CONVERSION_TIMEOUT.as_millis() as u64
}
fn default_user_agent() -> String {
    ClientOptions::default().user_agent
}
fn default_max_fanout_depth() -> usize {
    crate::harvest::DEFAULT_MAX_FANOUT_DEPTH
}
fn default_max_crawl_depth() -> usize {
    DEFAULT_MAX_CRAWL_DEPTH
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorLookupConfig {
    /// Must contain `{name}`.
    pub url_template: String,
    #[serde(default)]
    pub id_pattern: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub format: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Direct,
    Rss,
    Crawl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub feed: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub issn_print: Option<String>,
    #[serde(default)]
    pub issn_online: Option<String>,
    #[serde(default)]
    pub ppn: Option<String>,
    #[serde(default)]
    pub strptime_format: Option<String>,
    #[serde(default)]
    pub extraction_regex: Option<String>,
    #[serde(default = "default_max_crawl_depth")]
    pub max_crawl_depth: usize,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub additional_fields: Vec<String>,
    #[serde(default)]
    pub edits: Vec<EditInstruction>,
}

/// Where a journal's records come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalSource<'a> {
    Direct(&'a str),
    Rss(&'a str),
    Crawl { base_url: &'a str, max_depth: usize },
}

impl JournalConfig {
    fn required<'a>(&self, value: &'a Option<String>, key: &str) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| HarvestError::config(format!("journal \"{}\" needs \"{key}\"", self.name)))
    }

    pub fn source(&self) -> Result<JournalSource<'_>> {
        Ok(match self.kind {
            SourceKind::Direct => JournalSource::Direct(self.required(&self.url, "url")?),
            SourceKind::Rss => JournalSource::Rss(self.required(&self.feed, "feed")?),
            SourceKind::Crawl => JournalSource::Crawl {
                base_url: self.required(&self.base_url, "base_url")?,
                max_depth: self.max_crawl_depth,
            },
        })
    }

    pub fn to_site_params(&self) -> Result<SiteParams> {
        let issn = |raw: &Option<String>| -> Result<Option<String>> {
            match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => normalize_issn(s).map(Some).ok_or_else(|| {
                    HarvestError::config(format!("journal \"{}\": invalid ISSN \"{s}\"", self.name))
                }),
            }
        };

        let extraction_regex = self
            .extraction_regex
            .as_deref()
            .map(|re| {
                Regex::new(re).map_err(|e| {
                    HarvestError::config(format!(
                        "journal \"{}\": bad extraction_regex: {e}",
                        self.name
                    ))
                })
            })
            .transpose()?;

        for spec in &self.additional_fields {
            parse_field_spec(spec).map_err(|e| {
                HarvestError::config(format!("journal \"{}\": {e}", self.name))
            })?;
        }

        Ok(SiteParams {
            journal_name: self.name.clone(),
            parent_issn_print: issn(&self.issn_print)?,
            parent_issn_online: issn(&self.issn_online)?,
            parent_ppn: self.ppn.clone().filter(|p| !p.is_empty()),
            strptime_format: self.strptime_format.clone(),
            extraction_regex,
            edits: self.edits.clone(),
            delivery_mode: self.delivery_mode,
            additional_fields: self.additional_fields.clone(),
        })
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(s).context("parsing harvester config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("in {}", path.display()))
    }

    pub fn load_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let p = PathBuf::from(DEFAULT_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Err(anyhow!(
            "no config found: pass --config, set {ENV_PATH} or create {DEFAULT_PATH}"
        ))
    }

    fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.translation_server_url).context("translation_server_url")?;
        if !crate::format::is_supported_format(&self.output.format) {
            return Err(anyhow!("unknown output format \"{}\"", self.output.format));
        }
        if let Some(a) = &self.author_lookup {
            if !a.url_template.contains("{name}") {
                return Err(anyhow!("author_lookup.url_template must contain {{name}}"));
            }
        }
        for j in &self.journals {
            j.source()?;
            j.to_site_params()?;
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_millis(self.request_timeout_ms),
            conversion_timeout: Duration::from_millis(self.conversion_timeout_ms),
        }
    }

    pub fn harvest_params(&self) -> HarvestParams {
        HarvestParams {
            min_url_processing_time: Duration::from_millis(self.min_url_processing_time_ms),
            max_fanout_depth: self.max_fanout_depth,
        }
    }

    pub fn journal(&self, name: &str) -> Option<&JournalConfig> {
        self.journals.iter().find(|j| j.name == name)
    }
}

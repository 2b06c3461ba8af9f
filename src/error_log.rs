// src/error_log.rs
//! Collects harvesting errors per journal for the end-of-run report.
//!
//! URL-scoped errors keep only the latest diagnosis per (journal, URL).
//! Errors without a URL accumulate in order.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{ErrorKind, HarvestError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvesterError {
    pub kind: ErrorKind,
    #[serde(skip)]
    pub journal: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
struct JournalErrors {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    url_errors: BTreeMap<String, HarvesterError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<HarvesterError>,
}

#[derive(Debug, Default, Serialize)]
pub struct ErrorLogger {
    journal: BTreeMap<String, JournalErrors>,
}

impl ErrorLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty `url` makes the context non-URL-scoped.
    pub fn new_context<'a>(&'a mut self, journal: &str, url: &str) -> ErrorContext<'a> {
        ErrorContext {
            logger: self,
            journal: journal.to_string(),
            url: url.to_string(),
        }
    }

    pub fn log(&mut self, kind: ErrorKind, journal: &str, url: &str, message: impl Into<String>) {
        let entry = HarvesterError {
            kind,
            journal: journal.to_string(),
            url: url.to_string(),
            message: message.into(),
        };
        tracing::debug!(journal = %journal, url = %url, kind = %kind, "error logged");
        let bucket = self.journal.entry(journal.to_string()).or_default();
        if url.is_empty() {
            bucket.errors.push(entry);
        } else {
            bucket.url_errors.insert(url.to_string(), entry);
        }
    }

    /// Errors for one journal: URL-scoped ones (ordered by URL) then the rest.
    pub fn errors_for(&self, journal: &str) -> Vec<&HarvesterError> {
        self.journal
            .get(journal)
            .map(|j| j.url_errors.values().chain(j.errors.iter()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.journal
            .values()
            .map(|j| j.url_errors.len() + j.errors.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render_report(&self) -> anyhow::Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn write_report(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let body = self.render_report()?;
        let tmp = path.with_extension("toml.tmp");
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating report {}", tmp.display()))?;
        f.write_all(body.as_bytes())?;
        fs::rename(&tmp, path).with_context(|| format!("writing report {}", path.display()))?;
        Ok(())
    }
}

/// Guess the error kind of a free-text message raised far from its origin.
pub fn classify(message: &str) -> ErrorKind {
    static TABLE: OnceCell<Vec<(Regex, ErrorKind)>> = OnceCell::new();
    let table = TABLE.get_or_init(|| {
        [
            (r"(?i)\bISSN\b", ErrorKind::InvalidIssn),
            (r"(?i)date format", ErrorKind::DateFormatConfig),
            (r"(?i)\bdate\b", ErrorKind::InvalidDate),
            (r"(?i)unknown key", ErrorKind::UnknownField),
            (r"(?i)unknown item ?type", ErrorKind::UnknownItemType),
            (r"\bHTTP (5\d\d)\b", ErrorKind::ServerError),
            (r"(?i)export|convert", ErrorKind::ExportConversion),
        ]
        .into_iter()
        .filter_map(|(re, kind)| Regex::new(re).ok().map(|r| (r, kind)))
        .collect()
    });
    table
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

pub struct ErrorContext<'a> {
    logger: &'a mut ErrorLogger,
    journal: String,
    url: String,
}

impl ErrorContext<'_> {
    pub fn log(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.logger.log(kind, &self.journal, &self.url, message);
    }

    pub fn log_error(&mut self, err: &HarvestError) {
        self.log(err.kind(), err.to_string());
    }

    pub fn auto_log(&mut self, message: impl Into<String>) {
        let message = message.into();
        let kind = classify(&message);
        self.log(kind, message);
    }

    pub fn journal(&self) -> &str {
        &self.journal
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

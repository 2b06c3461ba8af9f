// src/site.rs
use regex::Regex;
use serde::Deserialize;

use crate::catalog::record::EditInstruction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Harvest only; nothing is recorded in the download tracker.
    None,
    Test,
    #[default]
    Live,
}

/// Per-source augmentation settings. Built once per journal and never
/// mutated while that journal is harvested.
#[derive(Debug, Clone, Default)]
pub struct SiteParams {
    pub journal_name: String,
    pub parent_issn_print: Option<String>,
    pub parent_issn_online: Option<String>,
    pub parent_ppn: Option<String>,
    pub strptime_format: Option<String>,
    pub extraction_regex: Option<Regex>,
    pub edits: Vec<EditInstruction>,
    pub delivery_mode: DeliveryMode,
    /// Raw field specs such as `935  $aixzs`.
    pub additional_fields: Vec<String>,
}

impl SiteParams {
    pub fn named(journal_name: impl Into<String>) -> Self {
        Self {
            journal_name: journal_name.into(),
            ..Self::default()
        }
    }

    /// Online ISSN beats print.
    pub fn parent_issn(&self) -> Option<(&'static str, &str)> {
        if let Some(i) = self.parent_issn_online.as_deref().filter(|s| !s.is_empty()) {
            return Some(("online", i));
        }
        self.parent_issn_print
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|i| ("print", i))
    }
}

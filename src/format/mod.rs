// src/format/mod.rs
//! Output sinks. Exactly one is bound to a run; each consumes augmented
//! records one at a time and reports `(records, previously_downloaded)`.

pub mod catalog;
pub mod json;
pub mod passthrough;

use serde_json::{Map, Value};
use std::path::Path;

use crate::catalog::writer::OutputKind;
use crate::error::{HarvestError, Result};
use crate::harvest::HarvestCounts;
use crate::maps::{AugmentMaps, PreviouslyDownloaded};
use crate::site::SiteParams;
use crate::tracker::DownloadTracker;
use crate::translation::{TranslationClient, EXPORT_FORMATS};

pub use catalog::CatalogHandler;
pub use json::JsonHandler;
pub use passthrough::PassthroughHandler;

/// Formats produced locally rather than by the translation service.
pub const LOCAL_FORMATS: &[&str] = &["json", "marc21", "marcxml"];

pub fn is_supported_format(format: &str) -> bool {
    LOCAL_FORMATS.contains(&format) || EXPORT_FORMATS.contains(&format)
}

/// Everything a handler may consult for one record.
pub struct RecordContext<'a> {
    pub site: &'a SiteParams,
    pub maps: &'a AugmentMaps,
    pub previously_downloaded: &'a mut PreviouslyDownloaded,
}

pub enum FormatHandler {
    Json(JsonHandler),
    Passthrough(PassthroughHandler),
    Catalog(CatalogHandler),
}

impl FormatHandler {
    /// `tracker` is only used by the catalog handler, for provenance.
    pub fn create(format: &str, output: &Path, tracker: Option<DownloadTracker>) -> Result<Self> {
        match format {
            "json" => Ok(FormatHandler::Json(JsonHandler::create(output)?)),
            "marc21" | "marcxml" => {
                let kind = OutputKind::guess(output)?;
                if kind.format_name() != format {
                    return Err(HarvestError::config(format!(
                        "output format \"{format}\" does not match file \"{}\"",
                        output.display()
                    )));
                }
                Ok(FormatHandler::Catalog(CatalogHandler::create(output, tracker)?))
            }
            f if EXPORT_FORMATS.contains(&f) => Ok(FormatHandler::Passthrough(
                PassthroughHandler::new(f, output),
            )),
            other => Err(HarvestError::config(format!(
                "unknown output format \"{other}\"; expected one of {}",
                LOCAL_FORMATS
                    .iter()
                    .chain(EXPORT_FORMATS)
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FormatHandler::Json(_) => "json",
            FormatHandler::Passthrough(_) => "passthrough",
            FormatHandler::Catalog(_) => "catalog",
        }
    }

    pub fn process_record(
        &mut self,
        record: &Map<String, Value>,
        ctx: RecordContext<'_>,
    ) -> Result<HarvestCounts> {
        match self {
            FormatHandler::Json(h) => h.process_record(record),
            FormatHandler::Passthrough(h) => h.process_record(record),
            FormatHandler::Catalog(h) => h.process_record(record, ctx),
        }
    }

    /// Flushes buffered output. Any failure here leaves an unusable file
    /// and is reported as a fatal export error.
    pub async fn close(self, client: &TranslationClient) -> Result<()> {
        match self {
            FormatHandler::Json(h) => h.close(),
            FormatHandler::Passthrough(h) => h.close(client).await,
            FormatHandler::Catalog(h) => h.close(),
        }
    }
}

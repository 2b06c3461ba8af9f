// src/format/passthrough.rs
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::augment::strip_derived;
use crate::error::{HarvestError, Result};
use crate::harvest::HarvestCounts;
use crate::translation::TranslationClient;

/// Buffers every record and has the translation service convert the whole
/// batch on close.
pub struct PassthroughHandler {
    format: String,
    output: PathBuf,
    buffer: Vec<Value>,
}

impl PassthroughHandler {
    pub fn new(format: &str, output: &Path) -> Self {
        Self {
            format: format.to_string(),
            output: output.to_path_buf(),
            buffer: Vec::new(),
        }
    }

    pub fn process_record(&mut self, record: &Map<String, Value>) -> Result<HarvestCounts> {
        self.buffer.push(Value::Object(strip_derived(record)));
        Ok(HarvestCounts::new(1, 0))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub async fn close(self, client: &TranslationClient) -> Result<()> {
        let payload = client
            .export(&self.buffer, &self.format)
            .await
            .map_err(|e| {
                HarvestError::ExportConversion(format!("converting to {}: {e}", self.format))
            })?;
        std::fs::write(&self.output, payload).map_err(|e| {
            HarvestError::ExportConversion(format!("writing {}: {e}", self.output.display()))
        })?;
        tracing::info!(
            format = %self.format,
            records = self.buffer.len(),
            output = %self.output.display(),
            "export written"
        );
        Ok(())
    }
}

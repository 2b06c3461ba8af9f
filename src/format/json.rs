// src/format/json.rs
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::augment::strip_derived;
use crate::error::{HarvestError, Result};
use crate::harvest::HarvestCounts;

/// Streams records into a single JSON array. No dedup.
pub struct JsonHandler {
    out: BufWriter<File>,
    written: usize,
}

fn write_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::ExportConversion(format!("writing JSON output: {e}"))
}

impl JsonHandler {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(write_err)?;
        let mut out = BufWriter::new(file);
        out.write_all(b"[").map_err(write_err)?;
        Ok(Self { out, written: 0 })
    }

    pub fn process_record(&mut self, record: &Map<String, Value>) -> Result<HarvestCounts> {
        if self.written > 0 {
            self.out.write_all(b",").map_err(write_err)?;
        }
        serde_json::to_writer(&mut self.out, &strip_derived(record)).map_err(write_err)?;
        self.written += 1;
        Ok(HarvestCounts::new(1, 0))
    }

    pub fn close(mut self) -> Result<()> {
        self.out.write_all(b"]").map_err(write_err)?;
        self.out.flush().map_err(write_err)
    }
}

// src/maps.rs
//! Rule maps loaded once per process from the map directory, plus the
//! previously-downloaded content hash set.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{HarvestError, Result};

pub const LANGUAGE_MAP: &str = "language_to_language_code.map";
pub const ISSN_LANGUAGE_MAP: &str = "ISSN_to_language_code.map";
pub const ISSN_LICENCE_MAP: &str = "ISSN_to_licence.map";
pub const ISSN_KEYWORD_FIELD_MAP: &str = "ISSN_to_keyword_field.map";
pub const ISSN_PHYSICAL_FORM_MAP: &str = "ISSN_to_physical_form.map";
pub const ISSN_VOLUME_MAP: &str = "ISSN_to_volume.map";
pub const ISSN_SSG_MAP: &str = "ISSN_to_SSG.map";
pub const ISSN_SUPERIOR_MAP: &str = "ISSN_to_superior_ppn.map";
pub const PREVIOUSLY_DOWNLOADED_FILE: &str = "previously_downloaded.hashes";
pub const TARGETS_REGEX_FILE: &str = "targets.regex";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperiorRecord {
    pub ppn: String,
    pub title: String,
}

/// Read-only lookup tables keyed by language name or normalized ISSN.
#[derive(Debug, Clone, Default)]
pub struct AugmentMaps {
    pub language_to_language_code: HashMap<String, String>,
    pub issn_to_language_code: HashMap<String, String>,
    pub issn_to_licence: HashMap<String, String>,
    pub issn_to_keyword_field: HashMap<String, String>,
    pub issn_to_physical_form: HashMap<String, String>,
    pub issn_to_volume: HashMap<String, String>,
    pub issn_to_ssg: HashMap<String, String>,
    pub issn_to_superior: HashMap<String, SuperiorRecord>,
}

impl AugmentMaps {
    pub fn load(dir: &Path) -> Result<Self> {
        let maps = Self {
            language_to_language_code: load_map_file(&dir.join(LANGUAGE_MAP))?,
            issn_to_language_code: load_map_file(&dir.join(ISSN_LANGUAGE_MAP))?,
            issn_to_licence: load_map_file(&dir.join(ISSN_LICENCE_MAP))?,
            issn_to_keyword_field: load_map_file(&dir.join(ISSN_KEYWORD_FIELD_MAP))?,
            issn_to_physical_form: load_map_file(&dir.join(ISSN_PHYSICAL_FORM_MAP))?,
            issn_to_volume: load_map_file(&dir.join(ISSN_VOLUME_MAP))?,
            issn_to_ssg: load_map_file(&dir.join(ISSN_SSG_MAP))?,
            issn_to_superior: load_superior_map(&dir.join(ISSN_SUPERIOR_MAP))?,
        };
        tracing::info!(
            dir = %dir.display(),
            languages = maps.language_to_language_code.len(),
            superior = maps.issn_to_superior.len(),
            "augment maps loaded"
        );
        Ok(maps)
    }

    /// Language name mapped to its code, or the input unchanged.
    pub fn language_code<'a>(&'a self, language: &'a str) -> &'a str {
        self.language_to_language_code
            .get(language)
            .map(String::as_str)
            .unwrap_or(language)
    }
}

fn read_map_lines(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| HarvestError::config(format!("reading map file {}: {e}", path.display())))
}

fn content_lines(s: &str) -> impl Iterator<Item = (usize, &str)> {
    s.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

/// `key|value` per line. A non-empty line without `|` is a configuration error.
pub fn load_map_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = read_map_lines(path)?;
    let mut map = HashMap::new();
    for (line_no, line) in content_lines(&content) {
        let Some((key, value)) = line.split_once('|') else {
            return Err(HarvestError::config(format!(
                "malformed line #{line_no} in \"{}\": missing '|'",
                path.display()
            )));
        };
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

/// `ISSN,PPN,title` per line; the title may contain commas.
fn load_superior_map(path: &Path) -> Result<HashMap<String, SuperiorRecord>> {
    let content = read_map_lines(path)?;
    let mut map = HashMap::new();
    for (line_no, line) in content_lines(&content) {
        let mut parts = line.splitn(3, ',');
        let (Some(issn), Some(ppn), Some(title)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(HarvestError::config(format!(
                "malformed line #{line_no} in \"{}\": expected ISSN,PPN,title",
                path.display()
            )));
        };
        map.insert(
            issn.trim().to_string(),
            SuperiorRecord {
                ppn: ppn.trim().to_string(),
                title: title.trim().to_string(),
            },
        );
    }
    Ok(map)
}

/// One regex per line, combined into a single alternation.
pub fn load_supported_urls_regex(dir: &Path) -> Result<Regex> {
    let path = dir.join(TARGETS_REGEX_FILE);
    let content = read_map_lines(&path)?;
    let combined = content_lines(&content)
        .map(|(_, l)| format!("(?:{l})"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&combined).map_err(|e| {
        HarvestError::config(format!("compiling combined regex from {}: {e}", path.display()))
    })
}

/// Base64 content checksums of every record emitted so far. Grows during a
/// run and is written back with [`flush`](Self::flush).
#[derive(Debug)]
pub struct PreviouslyDownloaded {
    path: PathBuf,
    hashes: HashSet<String>,
    dirty: bool,
}

impl PreviouslyDownloaded {
    /// A missing file means a first run and yields an empty set.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let hashes = match fs::read_to_string(&path) {
            Ok(s) => s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(HarvestError::StoreIo(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };
        Ok(Self {
            path,
            hashes,
            dirty: false,
        })
    }

    pub fn contains(&self, checksum: &str) -> bool {
        self.hashes.contains(checksum)
    }

    /// Returns false if the checksum was already present.
    pub fn insert(&mut self, checksum: String) -> bool {
        let added = self.hashes.insert(checksum);
        self.dirty |= added;
        added
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut sorted: Vec<&String> = self.hashes.iter().collect();
        sorted.sort();
        let tmp = self.path.with_extension("hashes.tmp");
        let mut f = fs::File::create(&tmp)?;
        for h in sorted {
            writeln!(f, "{h}")?;
        }
        f.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), count = self.hashes.len(), "previously-downloaded set flushed");
        Ok(())
    }
}

// src/tracker.rs
//! Persistent record of which URLs were delivered and when.
//!
//! Key: the URL bytes. Value: 8-byte big-endian signed seconds since the Unix
//! epoch, optionally followed by `:` and a free-text UTF-8 message.
//! Writes overwrite, so there is at most one live entry per URL.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::path::Path;

use crate::error::{HarvestError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEntry {
    pub url: String,
    pub recorded_at: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct DownloadTracker {
    db: sled::Db,
}

impl DownloadTracker {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            HarvestError::StoreIo(format!("opening tracker at {}: {e}", path.display()))
        })?;
        Ok(Self { db })
    }

    /// A miss is `Ok(None)`: the URL was never delivered.
    pub fn lookup(&self, url: &str) -> Result<Option<TrackerEntry>> {
        match self.db.get(url.as_bytes())? {
            Some(raw) => Ok(Some(decode_entry(url.to_string(), &raw)?)),
            None => Ok(None),
        }
    }

    pub fn record_download(&self, url: &str, message: Option<&str>) -> Result<()> {
        self.record_download_at(url, message, Utc::now())
    }

    pub fn record_download_at(
        &self,
        url: &str,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .insert(url.as_bytes(), encode_value(at, message))?;
        tracing::debug!(url = %url, "tracker: recorded download");
        Ok(())
    }

    /// Returns whether an entry existed.
    pub fn clear_entry(&self, url: &str) -> Result<bool> {
        Ok(self.db.remove(url.as_bytes())?.is_some())
    }

    /// Without a cutoff the whole store is emptied. With one, only entries
    /// recorded at or before it are deleted. Returns the number deleted.
    pub fn clear(&self, cutoff: Option<DateTime<Utc>>) -> Result<usize> {
        let Some(cutoff) = cutoff else {
            let n = self.db.len();
            self.db.clear()?;
            return Ok(n);
        };

        let mut deleted = 0usize;
        for item in self.db.iter() {
            let (key, value) = item?;
            let url = key_to_url(&key)?;
            let entry = decode_entry(url, &value)?;
            if entry.recorded_at <= cutoff {
                self.db.remove(&key)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// All entries ordered by URL.
    pub fn iter(&self) -> impl Iterator<Item = Result<TrackerEntry>> + '_ {
        self.db.iter().map(|item| {
            let (key, value) = item?;
            decode_entry(key_to_url(&key)?, &value)
        })
    }

    pub fn list_matches(&self, pattern: &Regex) -> Result<Vec<TrackerEntry>> {
        let mut out = Vec::new();
        for entry in self.iter() {
            let entry = entry?;
            if pattern.is_match(&entry.url) {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn delete_matches(&self, pattern: &Regex) -> Result<usize> {
        let mut deleted = 0usize;
        for item in self.db.iter() {
            let (key, _) = item?;
            if pattern.is_match(&key_to_url(&key)?) {
                self.db.remove(&key)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn key_to_url(key: &[u8]) -> Result<String> {
    String::from_utf8(key.to_vec())
        .map_err(|_| HarvestError::StoreIo("tracker key is not valid UTF-8".into()))
}

fn encode_value(at: DateTime<Utc>, message: Option<&str>) -> Vec<u8> {
    let mut buf = at.timestamp().to_be_bytes().to_vec();
    if let Some(msg) = message {
        buf.push(b':');
        buf.extend_from_slice(msg.as_bytes());
    }
    buf
}

fn decode_entry(url: String, raw: &[u8]) -> Result<TrackerEntry> {
    if raw.len() < 8 {
        return Err(HarvestError::StoreIo(format!(
            "tracker value for {url} is {} bytes, expected at least 8",
            raw.len()
        )));
    }
    let (ts_bytes, rest) = raw.split_at(8);
    let mut ts = [0u8; 8];
    ts.copy_from_slice(ts_bytes);
    let secs = i64::from_be_bytes(ts);
    let recorded_at = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| HarvestError::StoreIo(format!("bad tracker timestamp for {url}")))?;

    let message = match rest.split_first() {
        None => None,
        Some((b':', msg)) => Some(
            String::from_utf8(msg.to_vec())
                .map_err(|_| HarvestError::StoreIo(format!("bad tracker message for {url}")))?,
        ),
        Some(_) => {
            return Err(HarvestError::StoreIo(format!(
                "tracker value for {url} lacks the ':' separator"
            )))
        }
    };

    Ok(TrackerEntry {
        url,
        recorded_at,
        message,
    })
}

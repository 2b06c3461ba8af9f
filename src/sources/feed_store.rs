// src/sources/feed_store.rs
//! Remembers per feed the last build date seen and which items were
//! already processed.

use std::path::Path;

use crate::error::{HarvestError, Result};

/// Stored when a feed carries no usable build date.
const UNKNOWN_BUILD_DATE: i64 = i64::MIN;

#[derive(Clone)]
pub struct FeedStore {
    feeds: sled::Tree,
    items: sled::Tree,
}

fn item_key(feed_url: &str, item_id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(feed_url.len() + item_id.len() + 1);
    k.extend_from_slice(feed_url.as_bytes());
    k.push(b'\n');
    k.extend_from_slice(item_id.as_bytes());
    k
}

fn decode_ts(raw: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| HarvestError::StoreIo("feed store value is not 8 bytes".into()))?;
    Ok(i64::from_be_bytes(bytes))
}

impl FeedStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            HarvestError::StoreIo(format!("opening feed store at {}: {e}", path.display()))
        })?;
        Ok(Self {
            feeds: db.open_tree("feeds")?,
            items: db.open_tree("items")?,
        })
    }

    pub fn last_build_date(&self, feed_url: &str) -> Result<Option<i64>> {
        match self.feeds.get(feed_url.as_bytes())? {
            Some(raw) => decode_ts(&raw).map(|t| Some(t).filter(|t| *t != UNKNOWN_BUILD_DATE)),
            None => Ok(None),
        }
    }

    pub fn is_known(&self, feed_url: &str) -> Result<bool> {
        Ok(self.feeds.contains_key(feed_url.as_bytes())?)
    }

    pub fn set_last_build_date(&self, feed_url: &str, ts: Option<i64>) -> Result<()> {
        let v = ts.unwrap_or(UNKNOWN_BUILD_DATE).to_be_bytes();
        self.feeds.insert(feed_url.as_bytes(), &v)?;
        Ok(())
    }

    /// True when the stored build date is at least `last_build`. An unknown
    /// feed is registered and reported as having new items.
    pub fn feed_has_no_new_items(&self, feed_url: &str, last_build: Option<i64>) -> Result<bool> {
        if !self.is_known(feed_url)? {
            tracing::info!(feed = %feed_url, "new feed registered");
            self.set_last_build_date(feed_url, last_build)?;
            return Ok(false);
        }
        Ok(match (self.last_build_date(feed_url)?, last_build) {
            (Some(stored), Some(new)) => stored >= new,
            _ => false,
        })
    }

    pub fn item_processed(&self, feed_url: &str, item_id: &str) -> Result<bool> {
        Ok(self.items.contains_key(item_key(feed_url, item_id))?)
    }

    pub fn record_item(&self, feed_url: &str, item_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp().to_be_bytes();
        self.items.insert(item_key(feed_url, item_id), &now)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.feeds.flush()?;
        self.items.flush()?;
        Ok(())
    }
}

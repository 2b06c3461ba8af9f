// src/augment/date.rs
//! Date normalization to `YYYY-MM-DD`.
//!
//! A journal may configure a strftime-style pattern. Otherwise a list of
//! common web date shapes is tried. Missing month or day default to `01`.

use chrono::format::{parse, Item, Parsed, StrftimeItems};
use chrono::{DateTime, NaiveDate};

use crate::error::{HarvestError, Result};

const GENERIC_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %Y",
    "%b %Y",
    "%Y-%m",
    "%Y",
];

/// Rejects patterns chrono cannot interpret.
pub fn validate_format(format: &str) -> Result<()> {
    if format.trim().is_empty() || StrftimeItems::new(format).any(|i| matches!(i, Item::Error)) {
        return Err(HarvestError::DateFormatConfig(format.to_string()));
    }
    Ok(())
}

pub fn parse_with_format(raw: &str, format: &str) -> Option<NaiveDate> {
    let mut parsed = Parsed::new();
    parse(&mut parsed, raw.trim(), StrftimeItems::new(format)).ok()?;
    date_from_parsed(parsed)
}

pub fn parse_generic(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.date_naive());
    }
    GENERIC_FORMATS
        .iter()
        .find_map(|fmt| parse_with_format(raw, fmt))
}

/// With a `format`, only that pattern is tried.
pub fn normalize_date(raw: &str, format: Option<&str>) -> Result<String> {
    let date = match format {
        Some(fmt) => parse_with_format(raw, fmt),
        None => parse_generic(raw),
    };
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| HarvestError::InvalidDate {
            raw: raw.to_string(),
            reason: match format {
                Some(fmt) => format!("does not match \"{fmt}\""),
                None => "no known date shape matched".to_string(),
            },
        })
}

fn date_from_parsed(mut p: Parsed) -> Option<NaiveDate> {
    if let Ok(d) = p.to_naive_date() {
        return Some(d);
    }
    let _ = p.set_day(1);
    if let Ok(d) = p.to_naive_date() {
        return Some(d);
    }
    let _ = p.set_month(1);
    p.to_naive_date().ok()
}

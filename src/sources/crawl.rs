// src/sources/crawl.rs
//! Breadth-first site crawl restricted to the start host.
//!
//! Pages whose URL matches both the supported-URL regex and the journal's
//! extraction regex are handed to the harvester with the fetched body.

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use super::fetch_text;
use crate::error::{ErrorKind, HarvestError, Result};
use crate::error_log::ErrorLogger;
use crate::harvest::{HarvestCounts, Harvester};
use crate::rate_limit::MinIntervalTimer;
use crate::site::SiteParams;

pub const DEFAULT_MAX_CRAWL_DEPTH: usize = 1;

#[derive(Debug, Clone)]
pub struct CrawlParams {
    pub max_depth: usize,
    pub min_interval: Duration,
    /// Combined `targets.regex`; `None` accepts every URL.
    pub supported_urls: Option<Regex>,
    pub progress_file: Option<PathBuf>,
}

impl Default for CrawlParams {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_CRAWL_DEPTH,
            min_interval: crate::harvest::DEFAULT_MIN_URL_PROCESSING_TIME,
            supported_urls: None,
            progress_file: None,
        }
    }
}

fn href_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)"#).unwrap())
}

/// Absolute same-host links found in `html`, in document order and without
/// fragments or duplicates.
pub fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cap in href_regex().captures_iter(html) {
        let href = html_escape::decode_html_entities(cap[1].trim());
        let Some(mut candidate) = base
            .join(&href)
            .ok()
            .filter(|c| matches!(c.scheme(), "http" | "https"))
            .filter(|c| c.host_str() == base.host_str())
        else {
            continue;
        };
        candidate.set_fragment(None);
        if seen.insert(candidate.as_str().to_string()) {
            out.push(candidate);
        }
    }
    out
}

fn wants_harvest(url: &str, params: &CrawlParams, site: &SiteParams) -> bool {
    params.supported_urls.as_ref().map_or(true, |re| re.is_match(url))
        && site.extraction_regex.as_ref().map_or(true, |re| re.is_match(url))
}

fn write_progress(path: &Path, processed: usize, remaining_depth: usize, url: &str) -> Result<()> {
    std::fs::write(path, format!("{processed};{remaining_depth};{url}"))
        .map_err(|e| HarvestError::StoreIo(format!("writing progress file {}: {e}", path.display())))
}

pub async fn harvest_site(
    start_url: &str,
    harvester: &mut Harvester,
    site: &SiteParams,
    errors: &mut ErrorLogger,
    http: &reqwest::Client,
    params: &CrawlParams,
) -> Result<HarvestCounts> {
    let start = match Url::parse(start_url) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(url = %start_url, error = %e, "invalid crawl start URL");
            errors
                .new_context(&site.journal_name, start_url)
                .log(ErrorKind::Transport, format!("invalid crawl start URL: {e}"));
            return Ok(HarvestCounts::ZERO);
        }
    };

    let mut timer = MinIntervalTimer::new(params.min_interval);
    let mut queue: VecDeque<(Url, usize)> = VecDeque::from([(start.clone(), 0)]);
    let mut visited: HashSet<String> = HashSet::from([start.as_str().to_string()]);
    let mut totals = HarvestCounts::ZERO;
    let mut processed = 0usize;

    while let Some((page, depth)) = queue.pop_front() {
        let page_url = page.as_str().to_string();
        tracing::debug!(url = %page_url, depth, "crawling");

        timer.wait_until_expired().await;
        let fetched = fetch_text(http, &page_url).await;
        timer.restart();
        processed += 1;

        let body = match fetched {
            Ok((body, _)) => body,
            Err(e) => {
                counter!("harvest_fetch_failures_total").increment(1);
                tracing::warn!(url = %page_url, error = ?e, "page unavailable");
                // an unreachable start page aborts the site
                if depth == 0 {
                    errors
                        .new_context(&site.journal_name, &page_url)
                        .log(ErrorKind::Transport, format!("{e:#}"));
                }
                continue;
            }
        };

        if wants_harvest(&page_url, params, site) && !harvester.already_harvested(&page_url) {
            totals += harvester
                .harvest(&page_url, site, errors, Some(&body))
                .await?;
        }

        if depth < params.max_depth {
            for link in extract_links(&page, &body) {
                if visited.insert(link.as_str().to_string()) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        if let Some(path) = &params.progress_file {
            write_progress(path, processed, params.max_depth - depth, &page_url)?;
        }
    }

    tracing::info!(
        url = %start_url,
        pages = processed,
        total = totals.total,
        previously_downloaded = totals.previously_downloaded,
        "crawl done"
    );
    Ok(totals)
}

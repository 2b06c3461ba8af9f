// src/harvest.rs
//! The harvest orchestrator.
//!
//! One [`Harvester`] owns all run-wide state: the set of URLs already
//! harvested, the request timer, the rule maps, the previously-downloaded
//! set and the bound format handler. Execution is strictly sequential.
//!
//! Multi-match responses are expanded through an explicit depth-first work
//! list whose depth is capped by [`HarvestParams::max_fanout_depth`].

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::ops::{Add, AddAssign};
use std::time::Duration;

use crate::augment::author::AuthorLookup;
use crate::augment::Augmenter;
use crate::error::{ErrorKind, HarvestError, Result};
use crate::error_log::ErrorLogger;
use crate::format::{FormatHandler, RecordContext};
use crate::maps::{AugmentMaps, PreviouslyDownloaded};
use crate::rate_limit::MinIntervalTimer;
use crate::site::SiteParams;
use crate::translation::{TranslationClient, WebResponse};

pub const DEFAULT_MIN_URL_PROCESSING_TIME: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_FANOUT_DEPTH: usize = 3;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_urls_total", "URLs whose records were fetched.");
        describe_counter!("harvest_records_total", "Records handed to the format handler.");
        describe_counter!(
            "harvest_previously_downloaded_total",
            "Records dropped because their content was already delivered."
        );
        describe_counter!("harvest_item_errors_total", "Records skipped due to item errors.");
        describe_counter!(
            "harvest_fetch_failures_total",
            "Translation calls that failed or returned an error status."
        );
    });
}

/// `(records, previously_downloaded)` for one harvest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestCounts {
    pub total: u32,
    pub previously_downloaded: u32,
}

impl HarvestCounts {
    pub const ZERO: HarvestCounts = HarvestCounts {
        total: 0,
        previously_downloaded: 0,
    };

    pub fn new(total: u32, previously_downloaded: u32) -> Self {
        Self {
            total,
            previously_downloaded,
        }
    }
}

impl Add for HarvestCounts {
    type Output = HarvestCounts;

    fn add(self, rhs: HarvestCounts) -> HarvestCounts {
        HarvestCounts::new(
            self.total + rhs.total,
            self.previously_downloaded + rhs.previously_downloaded,
        )
    }
}

impl AddAssign for HarvestCounts {
    fn add_assign(&mut self, rhs: HarvestCounts) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone)]
pub struct HarvestParams {
    pub min_url_processing_time: Duration,
    pub max_fanout_depth: usize,
}

impl Default for HarvestParams {
    fn default() -> Self {
        Self {
            min_url_processing_time: DEFAULT_MIN_URL_PROCESSING_TIME,
            max_fanout_depth: DEFAULT_MAX_FANOUT_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub harvested_urls: usize,
    pub known_checksums: usize,
}

/// Bare DOIs among multi-match keys become resolver URLs.
pub fn child_url(key: &str) -> String {
    static DOI: OnceCell<Regex> = OnceCell::new();
    let re = DOI.get_or_init(|| Regex::new(r"^10\.\d{4,9}/\S+$").unwrap());
    if re.is_match(key) {
        format!("https://doi.org/{key}")
    } else {
        key.to_string()
    }
}

pub struct Harvester {
    client: TranslationClient,
    params: HarvestParams,
    maps: AugmentMaps,
    previously_downloaded: PreviouslyDownloaded,
    handler: FormatHandler,
    authors: Box<dyn AuthorLookup>,
    harvested_urls: HashSet<String>,
    timer: MinIntervalTimer,
    harvested_url_count: usize,
}

impl Harvester {
    pub fn new(
        client: TranslationClient,
        params: HarvestParams,
        maps: AugmentMaps,
        previously_downloaded: PreviouslyDownloaded,
        handler: FormatHandler,
        authors: Box<dyn AuthorLookup>,
    ) -> Self {
        ensure_metrics_described();
        let timer = MinIntervalTimer::new(params.min_url_processing_time);
        Self {
            client,
            params,
            maps,
            previously_downloaded,
            handler,
            authors,
            harvested_urls: HashSet::new(),
            timer,
            harvested_url_count: 0,
        }
    }

    pub fn harvested_url_count(&self) -> usize {
        self.harvested_url_count
    }

    pub fn already_harvested(&self, url: &str) -> bool {
        self.harvested_urls.contains(url)
    }

    pub fn maps(&self) -> &AugmentMaps {
        &self.maps
    }

    /// Harvests `url` and every multi-match child below it.
    ///
    /// Only fatal error kinds come back as `Err`; everything else is logged
    /// against `(journal, url)` and contributes zero counts. `cached` page
    /// content is accepted for source adapters that already fetched the page;
    /// the translation service always fetches by URL.
    pub async fn harvest(
        &mut self,
        url: &str,
        site: &SiteParams,
        errors: &mut ErrorLogger,
        cached: Option<&str>,
    ) -> Result<HarvestCounts> {
        if let Some(body) = cached {
            tracing::debug!(url = %url, bytes = body.len(), "cached page content not forwarded");
        }

        let mut totals = HarvestCounts::ZERO;
        let mut work: Vec<(String, usize)> = vec![(url.to_string(), 0)];

        while let Some((current, depth)) = work.pop() {
            if !self.harvested_urls.insert(current.clone()) {
                tracing::debug!(url = %current, "already harvested in this run");
                continue;
            }

            tracing::info!(url = %current, depth, journal = %site.journal_name, "harvesting");
            self.timer.wait_until_expired().await;
            let response = self.client.web(&current).await;
            self.timer.restart();

            match response {
                Err(e) => {
                    counter!("harvest_fetch_failures_total").increment(1);
                    tracing::warn!(url = %current, error = %e, "translation request failed");
                    errors.new_context(&site.journal_name, &current).log_error(&e);
                }
                Ok(WebResponse::ServerError { status, body }) => {
                    counter!("harvest_fetch_failures_total").increment(1);
                    tracing::warn!(url = %current, status, body = %body, "translation server error");
                    errors
                        .new_context(&site.journal_name, &current)
                        .log_error(&HarvestError::Server { status, body });
                }
                Ok(WebResponse::NoTranslator) => {
                    tracing::debug!(url = %current, "no translator, skipping");
                }
                Ok(WebResponse::MultipleChoices(children)) => {
                    if depth >= self.params.max_fanout_depth {
                        let msg = format!(
                            "multi-match fan-out depth {} reached, {} children skipped",
                            self.params.max_fanout_depth,
                            children.len()
                        );
                        tracing::warn!(url = %current, "{msg}");
                        errors
                            .new_context(&site.journal_name, &current)
                            .log(ErrorKind::FanoutLimit, msg);
                        continue;
                    }
                    tracing::debug!(url = %current, children = children.len(), "multiple matches");
                    // reversed so the first child is harvested first
                    for key in children.keys().rev() {
                        work.push((child_url(key), depth + 1));
                    }
                }
                Ok(WebResponse::Records(records)) => {
                    self.harvested_url_count += 1;
                    counter!("harvest_urls_total").increment(1);
                    totals += self.process_records(&current, records, site, errors).await?;
                }
            }
        }

        tracing::info!(
            url = %url,
            total = totals.total,
            previously_downloaded = totals.previously_downloaded,
            "harvest done"
        );
        Ok(totals)
    }

    /// Converts local bibliographic text through the translation service and
    /// emits the resulting records.
    pub async fn harvest_content(
        &mut self,
        label: &str,
        content: &str,
        site: &SiteParams,
        errors: &mut ErrorLogger,
    ) -> Result<HarvestCounts> {
        self.timer.wait_until_expired().await;
        let response = self.client.import(content).await;
        self.timer.restart();

        match response {
            Ok(records) => self.process_records(label, records, site, errors).await,
            Err(e) => {
                counter!("harvest_fetch_failures_total").increment(1);
                tracing::warn!(source = %label, error = %e, "import failed");
                errors.new_context(&site.journal_name, label).log_error(&e);
                Ok(HarvestCounts::ZERO)
            }
        }
    }

    async fn process_records(
        &mut self,
        url: &str,
        records: Vec<Value>,
        site: &SiteParams,
        errors: &mut ErrorLogger,
    ) -> Result<HarvestCounts> {
        let mut totals = HarvestCounts::ZERO;
        for record in records {
            match self.process_one(record, site, errors).await {
                Ok(counts) => {
                    counter!("harvest_records_total").increment(u64::from(counts.total));
                    counter!("harvest_previously_downloaded_total")
                        .increment(u64::from(counts.previously_downloaded));
                    totals += counts;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    counter!("harvest_item_errors_total").increment(1);
                    tracing::warn!(url = %url, kind = %e.kind(), error = %e, "skipping item");
                    errors.new_context(&site.journal_name, url).log_error(&e);
                }
            }
        }
        Ok(totals)
    }

    async fn process_one(
        &mut self,
        record: Value,
        site: &SiteParams,
        errors: &mut ErrorLogger,
    ) -> Result<HarvestCounts> {
        let Value::Object(mut record) = record else {
            return Err(HarvestError::MalformedResponse(
                "record is not a JSON object".into(),
            ));
        };
        Augmenter::new(&self.maps, self.authors.as_ref())
            .augment(&mut record, site, errors)
            .await?;
        self.emit(&record, site)
    }

    fn emit(&mut self, record: &Map<String, Value>, site: &SiteParams) -> Result<HarvestCounts> {
        let ctx = RecordContext {
            site,
            maps: &self.maps,
            previously_downloaded: &mut self.previously_downloaded,
        };
        self.handler.process_record(record, ctx)
    }

    /// Closes the format handler and persists the previously-downloaded set.
    pub async fn finish(mut self) -> Result<RunSummary> {
        self.handler.close(&self.client).await?;
        self.previously_downloaded.flush()?;
        let summary = RunSummary {
            harvested_urls: self.harvested_url_count,
            known_checksums: self.previously_downloaded.len(),
        };
        tracing::info!(
            harvested_urls = summary.harvested_urls,
            known_checksums = summary.known_checksums,
            "run finished"
        );
        Ok(summary)
    }
}

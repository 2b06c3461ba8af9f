// src/sources/rss.rs
//! RSS 2.0 / Atom feeds. Every new item link is handed to the harvester.

use anyhow::{bail, Context};
use metrics::counter;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use serde::Deserialize;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use super::feed_store::FeedStore;
use super::fetch_text;
use crate::error::{ErrorKind, Result};
use crate::error_log::ErrorLogger;
use crate::harvest::{HarvestCounts, Harvester};
use crate::site::SiteParams;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RssHarvestMode {
    /// Log feed details while harvesting.
    Verbose,
    /// Harvest without touching the feed store.
    Test,
    #[default]
    Normal,
}

#[derive(Debug, Clone, Default)]
pub struct RssOptions {
    pub mode: RssHarvestMode,
    /// Items published longer ago than this are skipped.
    pub window: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub title: Option<String>,
    pub link: Option<String>,
    /// Unix seconds.
    pub published: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub title: Option<String>,
    /// Unix seconds.
    pub last_build: Option<i64>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "lastBuildDate")]
    last_build_date: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date")]
    dc_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<Text>,
    updated: Option<String>,
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl Entry {
    fn alternate_link(&self) -> Option<String> {
        self.link
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.link.first())
            .and_then(|l| l.href.clone())
    }
}

fn parse_rfc2822(ts: &str) -> Option<i64> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.unix_timestamp())
}

fn parse_rfc3339(ts: &str) -> Option<i64> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn root_element(xml: &str) -> anyhow::Result<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event().context("reading feed XML")? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Eof => bail!("feed XML has no root element"),
            _ => {}
        }
    }
}

pub fn parse_feed(xml: &str) -> anyhow::Result<ParsedFeed> {
    match root_element(xml)?.as_str() {
        "rss" => parse_rss(xml),
        "feed" => parse_atom(xml),
        other => bail!("unsupported feed root element <{other}>"),
    }
}

fn parse_rss(xml: &str) -> anyhow::Result<ParsedFeed> {
    let rss: Rss = from_str(xml).context("parsing RSS xml")?;
    let ch = rss.channel;
    let last_build = ch
        .last_build_date
        .as_deref()
        .or(ch.pub_date.as_deref())
        .and_then(parse_rfc2822);

    let items = ch
        .item
        .into_iter()
        .filter_map(|it| {
            let link = non_empty(it.link);
            let title = non_empty(it.title);
            let id = non_empty(it.guid.map(|g| g.value))
                .or_else(|| link.clone())
                .or_else(|| title.clone())?;
            let published = it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .or_else(|| it.dc_date.as_deref().and_then(parse_rfc3339));
            Some(FeedItem {
                id,
                title,
                link,
                published,
            })
        })
        .collect();

    Ok(ParsedFeed {
        format: FeedFormat::Rss,
        title: non_empty(ch.title),
        last_build,
        items,
    })
}

fn parse_atom(xml: &str) -> anyhow::Result<ParsedFeed> {
    let feed: AtomFeed = from_str(xml).context("parsing Atom xml")?;
    let items = feed
        .entry
        .into_iter()
        .filter_map(|e| {
            let link = non_empty(e.alternate_link());
            let title = non_empty(e.title.as_ref().map(|t| t.value.clone()));
            let id = non_empty(e.id.clone()).or_else(|| link.clone())?;
            let published = e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_rfc3339);
            Some(FeedItem {
                id,
                title,
                link,
                published,
            })
        })
        .collect();

    Ok(ParsedFeed {
        format: FeedFormat::Atom,
        title: non_empty(feed.title.map(|t| t.value)),
        last_build: feed.updated.as_deref().and_then(parse_rfc3339),
        items,
    })
}

/// Harvests the new items of one feed.
///
/// A feed that cannot be fetched or parsed only aborts this source: the
/// failure is logged against the feed URL and zero counts are returned.
pub async fn harvest_feed(
    feed_url: &str,
    harvester: &mut Harvester,
    site: &SiteParams,
    errors: &mut ErrorLogger,
    store: Option<&FeedStore>,
    http: &reqwest::Client,
    opts: &RssOptions,
) -> Result<HarvestCounts> {
    let feed = match fetch_text(http, feed_url)
        .await
        .and_then(|(body, _)| parse_feed(&body))
    {
        Ok(feed) => feed,
        Err(e) => {
            counter!("harvest_fetch_failures_total").increment(1);
            tracing::warn!(feed = %feed_url, error = ?e, "feed unavailable");
            errors
                .new_context(&site.journal_name, feed_url)
                .log(ErrorKind::Transport, format!("{e:#}"));
            return Ok(HarvestCounts::ZERO);
        }
    };

    if opts.mode != RssHarvestMode::Normal {
        tracing::info!(
            feed = %feed_url,
            format = ?feed.format,
            title = feed.title.as_deref().unwrap_or(""),
            last_build = ?feed.last_build,
            items = feed.items.len(),
            "feed info"
        );
    }

    let store = store.filter(|_| opts.mode != RssHarvestMode::Test);
    if let Some(store) = store {
        if store.feed_has_no_new_items(feed_url, feed.last_build)? {
            tracing::info!(feed = %feed_url, "no new items");
            return Ok(HarvestCounts::ZERO);
        }
    }

    let cutoff = opts
        .window
        .map(|w| chrono::Utc::now().timestamp() - w.as_secs() as i64);

    let mut totals = HarvestCounts::ZERO;
    for item in &feed.items {
        if let (Some(cutoff), Some(published)) = (cutoff, item.published) {
            if published < cutoff {
                tracing::debug!(item = %item.id, "outside harvest window");
                continue;
            }
        }
        if let Some(store) = store {
            if store.item_processed(feed_url, &item.id)? {
                tracing::debug!(item = %item.id, "already processed");
                continue;
            }
        }
        let Some(link) = item.link.as_deref() else {
            tracing::debug!(item = %item.id, "item has no link");
            continue;
        };

        totals += harvester.harvest(link, site, errors, None).await?;

        if let Some(store) = store {
            store.record_item(feed_url, &item.id)?;
        }
    }

    if let Some(store) = store {
        store.set_last_build_date(feed_url, feed.last_build)?;
        store.flush()?;
    }
    Ok(totals)
}

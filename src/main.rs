// src/main.rs
//! journal-harvester: command-line entrypoint.
//!
//! Loads the run configuration, builds one harvester per run and drives the
//! configured journals through it one after another.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use journal_harvester::augment::author::{AuthorLookup, HttpAuthorLookup, NoAuthorLookup};
use journal_harvester::config::{Config, JournalConfig, JournalSource};
use journal_harvester::error_log::ErrorLogger;
use journal_harvester::format::FormatHandler;
use journal_harvester::harvest::{HarvestCounts, Harvester};
use journal_harvester::maps::{
    load_supported_urls_regex, AugmentMaps, PreviouslyDownloaded, PREVIOUSLY_DOWNLOADED_FILE,
    TARGETS_REGEX_FILE,
};
use journal_harvester::site::SiteParams;
use journal_harvester::sources::crawl::{self, CrawlParams};
use journal_harvester::sources::feed_store::FeedStore;
use journal_harvester::sources::rss::{self, RssHarvestMode, RssOptions};
use journal_harvester::sources::{build_http_client, DEFAULT_PAGE_TIMEOUT};
use journal_harvester::tracker::DownloadTracker;
use journal_harvester::translation::TranslationClient;

const AD_HOC_JOURNAL: &str = "ad-hoc";

#[derive(Parser, Debug)]
#[command(
    name = "journal-harvester",
    version,
    about = "Harvest, augment, deduplicate and emit journal article metadata"
)]
struct Cli {
    /// Run configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write collected errors as a TOML report
    #[arg(long, global = true, env = "HARVESTER_ERROR_REPORT")]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest every configured journal
    Run {
        #[arg(long)]
        journal: Option<String>,
        #[arg(long, value_enum, default_value_t = RssHarvestMode::Normal)]
        mode: RssHarvestMode,
        /// Skip feed items published more than N days ago
        #[arg(long)]
        window_days: Option<u64>,
    },
    /// Harvest a single URL
    Url {
        url: String,
        #[arg(long)]
        journal: Option<String>,
    },
    /// Convert a local bibliographic file and emit its records
    Import {
        file: PathBuf,
        #[arg(long)]
        journal: Option<String>,
    },
    /// Inspect or edit the download tracker
    #[command(subcommand)]
    Tracker(TrackerCommand),
}

#[derive(Subcommand, Debug)]
enum TrackerCommand {
    Lookup {
        url: String,
    },
    List {
        #[arg(long)]
        regex: Option<String>,
    },
    /// Remove entries recorded at or before the cutoff (all when omitted)
    Clear {
        #[arg(long)]
        cutoff: Option<String>,
    },
    ClearUrl {
        url: String,
    },
    DeleteMatches {
        regex: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("journal_harvester=info,warn"));
    let json = std::env::var("HARVESTER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = Config::load_default(cli.config.as_deref())?;

    let mut errors = ErrorLogger::new();
    let outcome = match cli.command {
        // tracker maintenance produces no harvest errors to report
        Command::Tracker(cmd) => return run_tracker(&cfg, cmd),
        command => run_command(&cfg, command, &mut errors).await,
    };
    report_and_return(outcome, cli.report.as_deref(), &errors)
}

async fn run_command(cfg: &Config, command: Command, errors: &mut ErrorLogger) -> Result<()> {
    match command {
        Command::Run {
            journal,
            mode,
            window_days,
        } => {
            let opts = RssOptions {
                mode,
                window: window_days.map(|d| Duration::from_secs(d * 86_400)),
            };
            run_journals(cfg, journal.as_deref(), &opts, errors).await
        }
        Command::Url { url, journal } => {
            let site = site_for(cfg, journal.as_deref())?;
            let mut harvester = build_harvester(cfg)?;
            let counts = harvester.harvest(&url, &site, errors, None).await?;
            finish(harvester, counts).await
        }
        Command::Import { file, journal } => {
            let site = site_for(cfg, journal.as_deref())?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut harvester = build_harvester(cfg)?;
            let label = file.display().to_string();
            let counts = harvester
                .harvest_content(&label, &content, &site, errors)
                .await?;
            finish(harvester, counts).await
        }
        Command::Tracker(cmd) => run_tracker(cfg, cmd),
    }
}

/// Writes the error report whether or not the run failed, then hands back
/// the run's own result.
fn report_and_return(outcome: Result<()>, report: Option<&Path>, errors: &ErrorLogger) -> Result<()> {
    if let Some(path) = report {
        let written = errors.write_report(path);
        match (&outcome, written) {
            (_, Ok(())) => {
                tracing::info!(path = %path.display(), errors = errors.len(), "error report written")
            }
            (Ok(()), Err(e)) => return Err(e),
            (Err(_), Err(e)) => tracing::warn!(path = %path.display(), error = %e, "error report not written"),
        }
    } else if !errors.is_empty() {
        tracing::warn!(errors = errors.len(), "harvest finished with errors");
    }
    outcome
}

fn site_for(cfg: &Config, journal: Option<&str>) -> Result<SiteParams> {
    match journal {
        Some(name) => {
            let j = cfg
                .journal(name)
                .with_context(|| format!("no journal named \"{name}\" in config"))?;
            Ok(j.to_site_params()?)
        }
        None => Ok(SiteParams::named(AD_HOC_JOURNAL)),
    }
}

fn build_harvester(cfg: &Config) -> Result<Harvester> {
    let maps = AugmentMaps::load(&cfg.map_dir).context("loading rule maps")?;
    let previously_downloaded =
        PreviouslyDownloaded::load(cfg.map_dir.join(PREVIOUSLY_DOWNLOADED_FILE))?;
    if let Some(parent) = cfg.tracker_db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tracker = DownloadTracker::open(&cfg.tracker_db)?;
    let handler = FormatHandler::create(&cfg.output.format, &cfg.output.path, Some(tracker))?;
    let client = TranslationClient::new(&cfg.translation_server_url, cfg.client_options())?;
    let authors: Box<dyn AuthorLookup> = match &cfg.author_lookup {
        Some(a) => Box::new(HttpAuthorLookup::new(
            &a.url_template,
            a.id_pattern.as_deref(),
            &cfg.user_agent,
        )?),
        None => Box::new(NoAuthorLookup),
    };
    tracing::info!(
        format = handler.name(),
        output = %cfg.output.path.display(),
        known_checksums = previously_downloaded.len(),
        "harvester ready"
    );
    Ok(Harvester::new(
        client,
        cfg.harvest_params(),
        maps,
        previously_downloaded,
        handler,
        authors,
    ))
}

async fn finish(harvester: Harvester, counts: HarvestCounts) -> Result<()> {
    let summary = harvester.finish().await?;
    println!(
        "harvested {} URL(s), {} record(s), {} previously downloaded, {} known checksum(s)",
        summary.harvested_urls, counts.total, counts.previously_downloaded, summary.known_checksums
    );
    Ok(())
}

async fn run_journals(
    cfg: &Config,
    only: Option<&str>,
    opts: &RssOptions,
    errors: &mut ErrorLogger,
) -> Result<()> {
    let journals: Vec<&JournalConfig> = cfg
        .journals
        .iter()
        .filter(|j| only.map_or(true, |name| j.name == name))
        .collect();
    if journals.is_empty() {
        anyhow::bail!("no journals to harvest");
    }

    let mut harvester = build_harvester(cfg)?;
    let http = build_http_client(&cfg.user_agent, DEFAULT_PAGE_TIMEOUT)?;
    let supported_urls = load_targets(&cfg.map_dir)?;
    let mut feed_store: Option<FeedStore> = None;
    let mut totals = HarvestCounts::ZERO;

    for journal in journals {
        let site = journal.to_site_params()?;
        let counts = match journal.source()? {
            JournalSource::Direct(url) => harvester.harvest(url, &site, errors, None).await?,
            JournalSource::Rss(feed) => {
                if feed_store.is_none() && opts.mode != RssHarvestMode::Test {
                    feed_store = Some(open_feed_store(&cfg.feed_store_db)?);
                }
                rss::harvest_feed(
                    feed,
                    &mut harvester,
                    &site,
                    errors,
                    feed_store.as_ref(),
                    &http,
                    opts,
                )
                .await?
            }
            JournalSource::Crawl { base_url, max_depth } => {
                let params = CrawlParams {
                    max_depth,
                    min_interval: Duration::from_millis(cfg.min_url_processing_time_ms),
                    supported_urls: supported_urls.clone(),
                    progress_file: cfg.crawl_progress_file.clone(),
                };
                crawl::harvest_site(base_url, &mut harvester, &site, errors, &http, &params).await?
            }
        };
        tracing::info!(
            journal = %journal.name,
            total = counts.total,
            previously_downloaded = counts.previously_downloaded,
            "journal done"
        );
        totals += counts;
    }

    finish(harvester, totals).await
}

fn load_targets(map_dir: &Path) -> Result<Option<Regex>> {
    if !map_dir.join(TARGETS_REGEX_FILE).exists() {
        return Ok(None);
    }
    Ok(Some(load_supported_urls_regex(map_dir)?))
}

fn open_feed_store(path: &Path) -> Result<FeedStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(FeedStore::open(path)?)
}

fn parse_cutoff(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc())
        })
        .with_context(|| format!("cutoff \"{raw}\" is neither RFC 3339 nor YYYY-MM-DD"))
}

fn run_tracker(cfg: &Config, cmd: TrackerCommand) -> Result<()> {
    let tracker = DownloadTracker::open(&cfg.tracker_db)?;
    match cmd {
        TrackerCommand::Lookup { url } => match tracker.lookup(&url)? {
            Some(e) => println!("{}\t{}\t{}", e.url, e.recorded_at.to_rfc3339(), e.message.unwrap_or_default()),
            None => println!("not recorded: {url}"),
        },
        TrackerCommand::List { regex } => {
            let re = Regex::new(regex.as_deref().unwrap_or(".*")).context("--regex")?;
            for e in tracker.list_matches(&re)? {
                println!("{}\t{}\t{}", e.url, e.recorded_at.to_rfc3339(), e.message.unwrap_or_default());
            }
        }
        TrackerCommand::Clear { cutoff } => {
            let cutoff = cutoff.as_deref().map(parse_cutoff).transpose()?;
            println!("removed {} entries", tracker.clear(cutoff)?);
        }
        TrackerCommand::ClearUrl { url } => {
            if tracker.clear_entry(&url)? {
                println!("removed {url}");
            } else {
                println!("not recorded: {url}");
            }
        }
        TrackerCommand::DeleteMatches { regex } => {
            let re = Regex::new(&regex).context("regex")?;
            println!("removed {} entries", tracker.delete_matches(&re)?);
        }
    }
    tracker.flush()?;
    Ok(())
}

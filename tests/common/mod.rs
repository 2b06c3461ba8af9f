// tests/common/mod.rs
//
// In-process fake translation service plus harvester fixtures.
#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::{StatusCode, Uri},
    routing::post,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use journal_harvester::augment::author::NoAuthorLookup;
use journal_harvester::format::FormatHandler;
use journal_harvester::harvest::{HarvestParams, Harvester};
use journal_harvester::maps::{self, AugmentMaps, PreviouslyDownloaded};
use journal_harvester::tracker::DownloadTracker;
use journal_harvester::translation::{ClientOptions, TranslationClient};

/// Canned replies keyed by request. Anything unscripted answers 501 on
/// `/web` and 404 on plain GETs.
#[derive(Default, Clone)]
pub struct Script {
    pub web: HashMap<String, (u16, String)>,
    pub import: Option<(u16, String)>,
    pub export: Option<(u16, String)>,
    pub pages: HashMap<String, String>,
}

impl Script {
    pub fn web(mut self, url: &str, status: u16, body: impl Into<String>) -> Self {
        self.web.insert(url.to_string(), (status, body.into()));
        self
    }

    pub fn records(self, url: &str, records: Value) -> Self {
        self.web(url, 200, records.to_string())
    }

    pub fn page(mut self, path: &str, body: impl Into<String>) -> Self {
        self.pages.insert(path.to_string(), body.into());
        self
    }
}

struct Shared {
    script: Script,
    seen: Mutex<Vec<String>>,
}

pub struct FakeTranslator {
    pub base_url: String,
    shared: Arc<Shared>,
}

impl FakeTranslator {
    /// Requests in arrival order, e.g. `web https://j.example/a`.
    pub fn seen(&self) -> Vec<String> {
        self.shared.seen.lock().clone()
    }

    pub fn web_calls(&self) -> usize {
        self.seen().iter().filter(|s| s.starts_with("web ")).count()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn web(State(st): State<Arc<Shared>>, Json(body): Json<Value>) -> (StatusCode, String) {
    let url = body["url"].as_str().unwrap_or_default().to_string();
    st.seen.lock().push(format!("web {url}"));
    match st.script.web.get(&url) {
        Some((code, body)) => (status(*code), body.clone()),
        None => (StatusCode::NOT_IMPLEMENTED, "No translators available".into()),
    }
}

async fn import(State(st): State<Arc<Shared>>, body: String) -> (StatusCode, String) {
    st.seen.lock().push(format!("import {}", body.len()));
    match &st.script.import {
        Some((code, body)) => (status(*code), body.clone()),
        None => (StatusCode::OK, "[]".into()),
    }
}

async fn export(
    State(st): State<Arc<Shared>>,
    Query(q): Query<HashMap<String, String>>,
    body: String,
) -> (StatusCode, String) {
    let format = q.get("format").cloned().unwrap_or_default();
    let records = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.as_array().map(Vec::len))
        .unwrap_or(0);
    st.seen.lock().push(format!("export {format} {records}"));
    match &st.script.export {
        Some((code, body)) => (status(*code), body.clone()),
        None => (StatusCode::OK, format!("{format}:{records}")),
    }
}

async fn page(State(st): State<Arc<Shared>>, uri: Uri) -> (StatusCode, String) {
    let path = uri.path().to_string();
    st.seen.lock().push(format!("get {path}"));
    match st.script.pages.get(&path) {
        Some(body) => (StatusCode::OK, body.clone()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

pub async fn spawn_translator(script: Script) -> FakeTranslator {
    let shared = Arc::new(Shared {
        script,
        seen: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/web", post(web))
        .route("/import", post(import))
        .route("/export", post(export))
        .fallback(page)
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    FakeTranslator {
        base_url: format!("http://{addr}"),
        shared,
    }
}

/// Writes every map file empty, then the given `(file, content)` overrides.
pub fn write_maps(dir: &Path, overrides: &[(&str, &str)]) {
    for name in [
        maps::LANGUAGE_MAP,
        maps::ISSN_LANGUAGE_MAP,
        maps::ISSN_LICENCE_MAP,
        maps::ISSN_KEYWORD_FIELD_MAP,
        maps::ISSN_PHYSICAL_FORM_MAP,
        maps::ISSN_VOLUME_MAP,
        maps::ISSN_SSG_MAP,
        maps::ISSN_SUPERIOR_MAP,
    ] {
        std::fs::write(dir.join(name), "").unwrap();
    }
    for (name, content) in overrides {
        std::fs::write(dir.join(name), content).unwrap();
    }
}

pub fn params() -> HarvestParams {
    HarvestParams {
        min_url_processing_time: Duration::ZERO,
        ..HarvestParams::default()
    }
}

pub fn harvester(
    map_dir: &Path,
    server: &FakeTranslator,
    format: &str,
    output: &Path,
    tracker: Option<DownloadTracker>,
) -> Harvester {
    harvester_with(map_dir, server, format, output, tracker, params())
}

pub fn harvester_with(
    map_dir: &Path,
    server: &FakeTranslator,
    format: &str,
    output: &Path,
    tracker: Option<DownloadTracker>,
    params: HarvestParams,
) -> Harvester {
    let maps = AugmentMaps::load(map_dir).unwrap();
    let previously =
        PreviouslyDownloaded::load(map_dir.join(maps::PREVIOUSLY_DOWNLOADED_FILE)).unwrap();
    let handler = FormatHandler::create(format, output, tracker).unwrap();
    let client = TranslationClient::new(&server.base_url, ClientOptions::default()).unwrap();
    Harvester::new(client, params, maps, previously, handler, Box::new(NoAuthorLookup))
}

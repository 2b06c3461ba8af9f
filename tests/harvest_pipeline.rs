// tests/harvest_pipeline.rs
//
// Harvest -> augment -> dedup -> emit against an in-process fake
// translation service.

mod common;

use serde_json::{json, Value};
use std::fs;

use common::{harvester, harvester_with, params, spawn_translator, write_maps, Script};
use journal_harvester::error::ErrorKind;
use journal_harvester::error_log::ErrorLogger;
use journal_harvester::harvest::{HarvestCounts, HarvestParams};
use journal_harvester::maps::PREVIOUSLY_DOWNLOADED_FILE;
use journal_harvester::site::{DeliveryMode, SiteParams};
use journal_harvester::tracker::DownloadTracker;

const ARTICLE: &str = "https://j.example/a/1";

fn nature_article() -> Value {
    json!({
        "itemType": "journalArticle",
        "title": "On examples",
        "url": ARTICLE,
        "ISSN": "0028-0836",
        "date": "2020-05-01",
        "creators": [
            {"creatorType": "author", "firstName": "J", "lastName": "Smith"}
        ]
    })
}

fn article(n: u32) -> Value {
    json!({
        "itemType": "journalArticle",
        "title": format!("Article {n}"),
        "url": format!("https://j.example/a/{n}")
    })
}

#[tokio::test]
async fn end_to_end_record_is_written_once_across_runs() {
    let server = spawn_translator(Script::default().records(ARTICLE, json!([nature_article()]))).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let tracker = DownloadTracker::open(dir.path().join("tracker.db")).unwrap();
    let site = SiteParams::named("Nature");

    let out1 = dir.path().join("run1.xml");
    let mut h = harvester(dir.path(), &server, "marcxml", &out1, Some(tracker.clone()));
    let mut errors = ErrorLogger::new();
    let counts = h.harvest(ARTICLE, &site, &mut errors, None).await.unwrap();
    assert_eq!(counts, HarvestCounts::new(1, 0));
    let summary = h.finish().await.unwrap();
    assert_eq!(summary.harvested_urls, 1);
    assert_eq!(summary.known_checksums, 1);
    assert!(errors.is_empty(), "{:?}", errors.errors_for("Nature"));

    let xml = fs::read_to_string(&out1).unwrap();
    assert_eq!(xml.matches("<record>").count(), 1);
    assert!(xml.contains(r#"<controlfield tag="001">ZTS0000001</controlfield>"#));
    assert!(xml.contains(r#"<subfield code="a">eng</subfield>"#));
    assert!(xml.contains(r#"<datafield tag="936""#));
    assert!(xml.contains(r#"<subfield code="j">2020</subfield>"#));
    assert!(xml.contains(r#"<subfield code="a">2020-05-01</subfield>"#));
    assert!(xml.contains(r#"<subfield code="a">Smith, J</subfield>"#));
    assert!(!xml.contains("_derived"));

    let hashes = fs::read_to_string(dir.path().join(PREVIOUSLY_DOWNLOADED_FILE)).unwrap();
    assert_eq!(hashes.lines().filter(|l| !l.is_empty()).count(), 1);
    assert!(tracker.lookup(ARTICLE).unwrap().is_some());

    let out2 = dir.path().join("run2.xml");
    let mut h = harvester(dir.path(), &server, "marcxml", &out2, Some(tracker));
    let counts = h.harvest(ARTICLE, &site, &mut errors, None).await.unwrap();
    assert_eq!(counts, HarvestCounts::new(1, 1));
    h.finish().await.unwrap();
    assert_eq!(fs::read_to_string(&out2).unwrap().matches("<record>").count(), 0);
}

#[tokio::test]
async fn multiple_matches_sum_their_children() {
    let server = spawn_translator(
        Script::default()
            .web(
                "https://j.example/toc",
                300,
                json!({"https://j.example/a/1": "One", "https://j.example/a/2": "Two"}).to_string(),
            )
            .records("https://j.example/a/1", json!([article(1)]))
            .records("https://j.example/a/2", json!([article(2), article(3)])),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let out = dir.path().join("out.xml");
    let mut h = harvester(dir.path(), &server, "marcxml", &out, None);
    let mut errors = ErrorLogger::new();

    let counts = h
        .harvest("https://j.example/toc", &SiteParams::named("J"), &mut errors, None)
        .await
        .unwrap();
    assert_eq!(counts, HarvestCounts::new(3, 0));
    assert_eq!(h.harvested_url_count(), 2);
    assert_eq!(
        server.seen(),
        vec![
            "web https://j.example/toc",
            "web https://j.example/a/1",
            "web https://j.example/a/2",
        ]
    );
}

#[tokio::test]
async fn a_url_is_fetched_once_per_run() {
    let server = spawn_translator(Script::default().records(ARTICLE, json!([article(1)]))).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let mut h = harvester(dir.path(), &server, "json", &dir.path().join("o.json"), None);
    let mut errors = ErrorLogger::new();
    let site = SiteParams::named("J");

    assert_eq!(
        h.harvest(ARTICLE, &site, &mut errors, None).await.unwrap(),
        HarvestCounts::new(1, 0)
    );
    assert_eq!(
        h.harvest(ARTICLE, &site, &mut errors, None).await.unwrap(),
        HarvestCounts::ZERO
    );
    assert_eq!(server.web_calls(), 1);
    assert!(h.already_harvested(ARTICLE));
}

#[tokio::test]
async fn unknown_field_skips_only_that_item() {
    let mut bad = article(2);
    bad["mysteryField"] = json!("?");
    let server = spawn_translator(Script::default().records(ARTICLE, json!([article(1), bad]))).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let out = dir.path().join("out.xml");
    let mut h = harvester(dir.path(), &server, "marcxml", &out, None);
    let mut errors = ErrorLogger::new();

    let counts = h
        .harvest(ARTICLE, &SiteParams::named("J"), &mut errors, None)
        .await
        .unwrap();
    assert_eq!(counts, HarvestCounts::new(1, 0));
    let logged = errors.errors_for("J");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].kind, ErrorKind::UnknownField);
    assert_eq!(logged[0].url, ARTICLE);
    assert!(logged[0].message.contains("mysteryField"));

    h.finish().await.unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap().matches("<record>").count(), 1);
}

#[tokio::test]
async fn oversized_record_skips_only_that_item() {
    let page = |n: u32, abstract_note: String| {
        json!({
            "itemType": "webpage",
            "title": format!("Page {n}"),
            "url": format!("https://j.example/p/{n}"),
            "abstractNote": abstract_note
        })
    };
    let records = json!([page(1, "x".repeat(12_000)), page(2, "short".into())]);
    let server = spawn_translator(Script::default().records(ARTICLE, records)).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let out = dir.path().join("out.mrc");
    let mut h = harvester(dir.path(), &server, "marc21", &out, None);
    let mut errors = ErrorLogger::new();

    let counts = h
        .harvest(ARTICLE, &SiteParams::named("J"), &mut errors, None)
        .await
        .unwrap();
    assert_eq!(counts, HarvestCounts::new(1, 0));
    let logged = errors.errors_for("J");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].kind, ErrorKind::RecordTooLarge);
    assert!(logged[0].message.contains("520"));

    let summary = h.finish().await.unwrap();
    assert_eq!(summary.known_checksums, 1);
    let raw = fs::read(&out).unwrap();
    // one record terminator per written record
    assert_eq!(raw.iter().filter(|&&b| b == 0x1D).count(), 1);
    let text = String::from_utf8_lossy(&raw);
    assert!(text.contains("Page 2"));
    assert!(!text.contains("Page 1"));
}

#[tokio::test]
async fn server_errors_and_bad_json_are_logged_per_url() {
    let server = spawn_translator(
        Script::default()
            .web("https://j.example/down", 500, "boom")
            .web("https://j.example/garbled", 200, "{not json"),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let mut h = harvester(dir.path(), &server, "json", &dir.path().join("o.json"), None);
    let mut errors = ErrorLogger::new();
    let site = SiteParams::named("J");

    for url in ["https://j.example/down", "https://j.example/garbled", "https://j.example/none"] {
        let counts = h.harvest(url, &site, &mut errors, None).await.unwrap();
        assert_eq!(counts, HarvestCounts::ZERO, "{url}");
    }
    let kinds: Vec<ErrorKind> = errors.errors_for("J").iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ErrorKind::ServerError, ErrorKind::MalformedResponse]);
}

#[tokio::test]
async fn fanout_stops_at_the_depth_cap() {
    let server = spawn_translator(
        Script::default()
            .web("https://j.example/toc", 300, json!({"https://j.example/a/1": "One"}).to_string())
            .records("https://j.example/a/1", json!([article(1)])),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let p = HarvestParams {
        max_fanout_depth: 0,
        ..params()
    };
    let mut h = harvester_with(dir.path(), &server, "json", &dir.path().join("o.json"), None, p);
    let mut errors = ErrorLogger::new();

    let counts = h
        .harvest("https://j.example/toc", &SiteParams::named("J"), &mut errors, None)
        .await
        .unwrap();
    assert_eq!(counts, HarvestCounts::ZERO);
    assert_eq!(server.web_calls(), 1);
    assert_eq!(errors.errors_for("J")[0].kind, ErrorKind::FanoutLimit);
}

#[tokio::test]
async fn json_output_never_contains_the_side_channel() {
    let server = spawn_translator(Script::default().records(ARTICLE, json!([nature_article()]))).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let out = dir.path().join("out.json");
    let mut h = harvester(dir.path(), &server, "json", &out, None);
    let mut errors = ErrorLogger::new();

    h.harvest(ARTICLE, &SiteParams::named("J"), &mut errors, None)
        .await
        .unwrap();
    h.finish().await.unwrap();

    let v: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    let records = v.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].get("_derived").is_none());
    assert_eq!(records[0]["title"], "On examples");
}

#[tokio::test]
async fn passthrough_formats_are_converted_on_finish() {
    let server = spawn_translator(
        Script::default().records(ARTICLE, json!([article(1), article(2)])),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let out = dir.path().join("out.ris");
    let mut h = harvester(dir.path(), &server, "ris", &out, None);
    let mut errors = ErrorLogger::new();

    let counts = h
        .harvest(ARTICLE, &SiteParams::named("J"), &mut errors, None)
        .await
        .unwrap();
    assert_eq!(counts, HarvestCounts::new(2, 0));
    h.finish().await.unwrap();

    assert_eq!(fs::read_to_string(&out).unwrap(), "ris:2");
    assert!(server.seen().contains(&"export ris 2".to_string()));
}

#[tokio::test]
async fn failed_export_is_fatal() {
    let mut script = Script::default().records(ARTICLE, json!([article(1)]));
    script.export = Some((500, "conversion failed".into()));
    let server = spawn_translator(script).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let mut h = harvester(dir.path(), &server, "bibtex", &dir.path().join("o.bib"), None);
    let mut errors = ErrorLogger::new();

    h.harvest(ARTICLE, &SiteParams::named("J"), &mut errors, None)
        .await
        .unwrap();
    let err = h.finish().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExportConversion);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn imported_content_goes_through_the_pipeline() {
    let mut script = Script::default();
    script.import = Some((200, json!([article(7)]).to_string()));
    let server = spawn_translator(script).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let out = dir.path().join("out.xml");
    let mut h = harvester(dir.path(), &server, "marcxml", &out, None);
    let mut errors = ErrorLogger::new();

    let counts = h
        .harvest_content("refs.ris", "TY  - JOUR\nER  -\n", &SiteParams::named("J"), &mut errors)
        .await
        .unwrap();
    assert_eq!(counts, HarvestCounts::new(1, 0));
    h.finish().await.unwrap();
    assert!(fs::read_to_string(&out).unwrap().contains("Article 7"));
}

#[tokio::test]
async fn delivery_mode_none_leaves_the_tracker_alone() {
    let server = spawn_translator(Script::default().records(ARTICLE, json!([article(1)]))).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(dir.path(), &[]);
    let tracker = DownloadTracker::open(dir.path().join("tracker.db")).unwrap();
    let mut h = harvester(
        dir.path(),
        &server,
        "marc21",
        &dir.path().join("out.mrc"),
        Some(tracker.clone()),
    );
    let mut site = SiteParams::named("J");
    site.delivery_mode = DeliveryMode::None;
    let mut errors = ErrorLogger::new();

    let counts = h.harvest(ARTICLE, &site, &mut errors, None).await.unwrap();
    assert_eq!(counts, HarvestCounts::new(1, 0));
    h.finish().await.unwrap();
    assert!(tracker.is_empty());
}

#[tokio::test]
async fn issn_maps_drive_catalog_fields() {
    let server = spawn_translator(Script::default().records(ARTICLE, json!([nature_article()]))).await;
    let dir = tempfile::tempdir().unwrap();
    write_maps(
        dir.path(),
        &[
            ("ISSN_to_physical_form.map", "0028-0836|O\n"),
            ("ISSN_to_licence.map", "0028-0836|l\n"),
            ("ISSN_to_SSG.map", "0028-0836|7,24\n"),
            ("ISSN_to_superior_ppn.map", "0028-0836,012345,Nature, London\n"),
        ],
    );
    let out = dir.path().join("out.xml");
    let mut h = harvester(dir.path(), &server, "marcxml", &out, None);
    let mut errors = ErrorLogger::new();

    h.harvest(ARTICLE, &SiteParams::named("Nature"), &mut errors, None)
        .await
        .unwrap();
    h.finish().await.unwrap();

    let xml = fs::read_to_string(&out).unwrap();
    assert!(xml.contains(r#"<controlfield tag="007">cr uuu---uuuuu</controlfield>"#));
    assert!(xml.contains(r#"<subfield code="z">Kostenfrei</subfield>"#));
    assert!(xml.contains(r#"<subfield code="a">7,24</subfield>"#));
    assert!(xml.contains(r#"<subfield code="w">(DE-576)012345</subfield>"#));
    assert!(xml.contains(r#"<subfield code="a">Nature, London</subfield>"#));
}

// src/format/catalog.rs
//! Maps normalized records onto catalog records and drops content that was
//! already emitted in this or an earlier run.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::Path;

use super::RecordContext;
use crate::augment::{Derived, PhysicalForm, DERIVED_KEY, FREE_ACCESS_LICENSE};
use crate::catalog::record::{Record, Subfield};
use crate::catalog::writer::RecordWriter;
use crate::error::{HarvestError, Result};
use crate::harvest::HarvestCounts;
use crate::maps::AugmentMaps;
use crate::site::DeliveryMode;
use crate::tracker::DownloadTracker;

pub const DEFAULT_LANGUAGE_CODE: &str = "eng";
pub const CONTROL_NUMBER_PREFIX: &str = "ZTS";
pub const AUTHORITY_PREFIX: &str = "(DE-576)";

/// Keys consumed while handling other keys, or carrying nothing the catalog
/// needs.
const CONSUMED_KEYS: &[&str] = &[
    "issue",
    "pages",
    "publicationTitle",
    "volume",
    "version",
    "tags",
    "libraryCatalog",
    "itemVersion",
    "accessDate",
    "key",
    "websiteType",
    "ISSN",
    DERIVED_KEY,
];

pub struct CatalogHandler {
    writer: Option<RecordWriter>,
    tracker: Option<DownloadTracker>,
    next_control_number: u32,
}

fn text<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        HarvestError::MalformedResponse(format!("\"{key}\" should be a string, got {value}"))
    })
}

fn optional_text<'a>(record: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => text(key, v).map(|s| Some(s).filter(|s| !s.is_empty())),
    }
}

fn doi_in_extra(extra: &str) -> Option<&str> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"^DOI:\s*([0-9a-zA-Z./]+)$").unwrap());
    re.captures(extra.trim()).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn is_web_url(s: &str) -> bool {
    url::Url::parse(s).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

fn insert_doi(record: &mut Record, doi: &str) {
    record.insert_field(
        "024",
        '7',
        ' ',
        vec![Subfield::new('a', doi), Subfield::new('2', "doi")],
    );
}

fn summarize(v: &Value) -> String {
    let s = v.to_string();
    if s.chars().count() > 80 {
        format!("{}...", s.chars().take(80).collect::<String>())
    } else {
        s
    }
}

impl CatalogHandler {
    pub fn create(output: &Path, tracker: Option<DownloadTracker>) -> Result<Self> {
        Ok(Self {
            writer: Some(RecordWriter::create(output)?),
            tracker,
            next_control_number: 1,
        })
    }

    fn control_number(&mut self) -> String {
        let n = self.next_control_number;
        self.next_control_number += 1;
        format!("{CONTROL_NUMBER_PREFIX}{n:07}")
    }

    /// Builds the catalog record without writing it.
    pub fn build_record(
        &mut self,
        record: &Map<String, Value>,
        ctx: &RecordContext<'_>,
    ) -> Result<(Record, Option<String>)> {
        let derived = Derived::from_record(record)?.unwrap_or_default();
        let mut out = Record::with_control_number(&self.control_number());
        let mut url = None;
        let mut website_title = None;
        let mut is_journal_article = false;

        for (key, value) in record {
            if CONSUMED_KEYS.contains(&key.as_str()) {
                continue;
            }
            match key.as_str() {
                "language" => out.insert("041", vec![Subfield::new('a', text(key, value)?)]),
                "url" => {
                    let u = text(key, value)?;
                    out.insert("856", vec![Subfield::new('u', u)]);
                    url = Some(u.to_string());
                }
                "title" => out.insert("245", vec![Subfield::new('a', text(key, value)?)]),
                "abstractNote" => out.insert_field(
                    "520",
                    '3',
                    ' ',
                    vec![Subfield::new('a', text(key, value)?)],
                ),
                "date" => {
                    let raw = text(key, value)?;
                    let shown = derived.date_normalized.as_deref().unwrap_or(raw);
                    out.insert_field("362", '0', ' ', vec![Subfield::new('a', shown)]);
                }
                "DOI" => insert_doi(&mut out, text(key, value)?),
                "shortTitle" => out.insert("246", vec![Subfield::new('a', text(key, value)?)]),
                "creators" => add_creators(&mut out, value)?,
                "itemType" => match text(key, value)? {
                    "journalArticle" => {
                        is_journal_article = true;
                        add_volume_year_issue_pages(&mut out, record, &derived)?;
                    }
                    "magazineArticle" => add_volume_year_issue_pages(&mut out, record, &derived)?,
                    "webpage" => out.insert("935", vec![Subfield::new('c', "website")]),
                    other => return Err(HarvestError::UnknownItemType(other.to_string())),
                },
                "rights" => {
                    let rights = text(key, value)?;
                    let code = if is_web_url(rights) { 'u' } else { 'f' };
                    out.insert("542", vec![Subfield::new(code, rights)]);
                }
                "journalAbbreviation" => {
                    out.insert("773", vec![Subfield::new('p', text(key, value)?)])
                }
                "extra" => {
                    if let Some(doi) = doi_in_extra(text(key, value)?) {
                        insert_doi(&mut out, doi);
                    }
                }
                "websiteTitle" => website_title = Some(text(key, value)?.to_string()),
                _ => {
                    return Err(HarvestError::UnknownField {
                        key: key.clone(),
                        value: summarize(value),
                    })
                }
            }
        }

        match derived.physical_form {
            Some(PhysicalForm::A) => out.insert_control_field("007", "tu"),
            Some(PhysicalForm::O) => out.insert_control_field("007", "cr uuu---uuuuu"),
            None => {}
        }
        if derived.license_code.as_deref() == Some(FREE_ACCESS_LICENSE) {
            if let Some(f) = out.first_field_mut("936") {
                f.add_subfield('z', "Kostenfrei");
            }
        }
        if let Some(ssg) = derived.ssg_numbers.as_deref() {
            out.add_subfield("084", 'a', ssg);
        }

        if let Some(t) = website_title {
            if !out.has_tag("245") {
                out.insert("245", vec![Subfield::new('a', t)]);
            }
        }

        let issn = derived.issn();
        if let Some(tags) = record.get("tags") {
            add_keywords(&mut out, tags, issn, ctx.maps)?;
        }

        if is_journal_article {
            add_superior_link(&mut out, record, issn, ctx)?;
        }

        if !out.has_tag("041") {
            out.insert("041", vec![Subfield::new('a', DEFAULT_LANGUAGE_CODE)]);
        }

        for spec in &ctx.site.additional_fields {
            out.insert_field_spec(spec)?;
        }
        out.apply_edits(&ctx.site.edits)?;

        Ok((out, url))
    }

    pub fn process_record(
        &mut self,
        record: &Map<String, Value>,
        mut ctx: RecordContext<'_>,
    ) -> Result<HarvestCounts> {
        let (built, url) = self.build_record(record, &ctx)?;
        let checksum = BASE64.encode(built.checksum());
        if ctx.previously_downloaded.contains(&checksum) {
            tracing::debug!(url = ?url, "record already delivered, skipping");
            return Ok(HarvestCounts::new(1, 1));
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| HarvestError::ExportConversion("catalog writer already closed".into()))?;
        // a record the output format can't hold is dropped before it counts as delivered
        let encoded = writer.encode(&built)?;
        writer.write_encoded(encoded)?;
        ctx.previously_downloaded.insert(checksum);

        if ctx.site.delivery_mode != DeliveryMode::None {
            match (&self.tracker, url.as_deref()) {
                (Some(tracker), Some(u)) => tracker.record_download(u, None)?,
                (Some(_), None) => tracing::warn!(
                    journal = %ctx.site.journal_name,
                    "record has no \"url\", download not tracked"
                ),
                (None, _) => {}
            }
        }
        Ok(HarvestCounts::new(1, 0))
    }

    pub fn close(mut self) -> Result<()> {
        if let Some(w) = self.writer.take() {
            w.finish()?;
        }
        if let Some(t) = &self.tracker {
            t.flush()?;
        }
        Ok(())
    }
}

fn add_creators(out: &mut Record, creators: &Value) -> Result<()> {
    let list = creators
        .as_array()
        .ok_or_else(|| HarvestError::MalformedResponse("\"creators\" is not an array".into()))?;
    for (i, creator) in list.iter().enumerate() {
        let obj = creator
            .as_object()
            .ok_or_else(|| HarvestError::MalformedResponse("creator is not an object".into()))?;
        let last = optional_text(obj, "lastName")?.ok_or_else(|| {
            HarvestError::MalformedResponse("creator is missing a last name".into())
        })?;
        let name = match optional_text(obj, "firstName")? {
            Some(first) => format!("{last}, {first}"),
            None => last.to_string(),
        };
        let mut subfields = vec![Subfield::new('a', name)];
        if let Some(ppn) = optional_text(obj, "ppn")? {
            subfields.push(Subfield::new('0', format!("{AUTHORITY_PREFIX}{ppn}")));
        }
        if let Some(role) = optional_text(obj, "creatorType")? {
            subfields.push(Subfield::new('e', role));
        }
        out.insert(if i == 0 { "100" } else { "700" }, subfields);
    }
    Ok(())
}

fn add_volume_year_issue_pages(
    out: &mut Record,
    record: &Map<String, Value>,
    derived: &Derived,
) -> Result<()> {
    let mut subfields = Vec::new();
    let year = derived
        .date_normalized
        .as_deref()
        .or(derived.date_raw.as_deref())
        .map(|d| d.chars().take(4).collect::<String>())
        .filter(|y| y.len() == 4 && y.chars().all(|c| c.is_ascii_digit()));
    if let Some(y) = year {
        subfields.push(Subfield::new('j', y));
    }
    if let Some(issue) = optional_text(record, "issue")? {
        subfields.push(Subfield::new('e', issue));
    }
    if let Some(pages) = optional_text(record, "pages")? {
        subfields.push(Subfield::new('h', pages));
    }
    if let Some(volume) = optional_text(record, "volume")? {
        subfields.push(Subfield::new('d', volume));
    }
    if !subfields.is_empty() {
        out.insert("936", subfields);
    }
    Ok(())
}

fn add_keywords(out: &mut Record, tags: &Value, issn: Option<&str>, maps: &AugmentMaps) -> Result<()> {
    let (tag, code) = match issn.and_then(|i| maps.issn_to_keyword_field.get(i)) {
        Some(spec) => {
            let chars: Vec<char> = spec.chars().collect();
            if chars.len() != 4 {
                return Err(HarvestError::config(format!(
                    "\"{spec}\" is not a valid tag + subfield code (ISSN_to_keyword_field.map)"
                )));
            }
            (chars[..3].iter().collect::<String>(), chars[3])
        }
        None => ("653".to_string(), 'a'),
    };

    let list = tags
        .as_array()
        .ok_or_else(|| HarvestError::MalformedResponse("\"tags\" is not an array".into()))?;
    for t in list {
        let keyword = t
            .get("tag")
            .ok_or_else(|| HarvestError::MalformedResponse("tag object lacks \"tag\"".into()))
            .and_then(|v| text("tag", v))?;
        out.insert(&tag, vec![Subfield::new(code, keyword)]);
    }
    Ok(())
}

fn add_superior_link(
    out: &mut Record,
    record: &Map<String, Value>,
    issn: Option<&str>,
    ctx: &RecordContext<'_>,
) -> Result<()> {
    let superior = issn.and_then(|i| ctx.maps.issn_to_superior.get(i));
    let ppn = superior
        .map(|s| s.ppn.as_str())
        .or(ctx.site.parent_ppn.as_deref())
        .filter(|p| !p.is_empty());
    if superior.is_none() && ppn.is_none() {
        return Ok(());
    }

    let title = optional_text(record, "publicationTitle")?
        .or(superior.map(|s| s.title.as_str()))
        .filter(|t| !t.is_empty());

    let mut subfields = Vec::new();
    if let Some(t) = title {
        subfields.push(Subfield::new('a', t));
    }
    if let Some(i) = issn {
        subfields.push(Subfield::new('x', i));
    }
    if let Some(p) = ppn {
        subfields.push(Subfield::new('w', format!("{AUTHORITY_PREFIX}{p}")));
    }
    if !subfields.is_empty() {
        out.insert("773", subfields);
    }
    Ok(())
}

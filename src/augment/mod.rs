// src/augment/mod.rs
//! Enrichment of normalized records using the rule maps.
//!
//! Derived values land in a reserved side-channel object under
//! [`DERIVED_KEY`]. Format handlers read it; no output ever contains it.

pub mod author;
pub mod date;
pub mod issn;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, HarvestError, Result};
use crate::error_log::ErrorLogger;
use crate::maps::AugmentMaps;
use crate::site::SiteParams;
use author::AuthorLookup;

pub const DERIVED_KEY: &str = "_derived";

/// The only license code the catalog knows how to express.
pub const FREE_ACCESS_LICENSE: &str = "l";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhysicalForm {
    /// Print.
    A,
    /// Online.
    O,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derived {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_untagged: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_online: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_print: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_normalized: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superior_ppn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_form: Option<PhysicalForm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssg_numbers: Option<String>,
}

impl Derived {
    pub fn is_empty(&self) -> bool {
        *self == Derived::default()
    }

    /// Record ISSN first, then the journal's online and print ISSNs.
    pub fn issn(&self) -> Option<&str> {
        self.issn_untagged
            .as_deref()
            .or(self.issn_online.as_deref())
            .or(self.issn_print.as_deref())
    }

    pub fn from_record(record: &Map<String, Value>) -> Result<Option<Self>> {
        match record.get(DERIVED_KEY) {
            None => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| HarvestError::MalformedResponse(format!("side-channel: {e}"))),
        }
    }
}

/// Drops the side-channel object before a record leaves the process.
pub fn strip_derived(record: &Map<String, Value>) -> Map<String, Value> {
    let mut out = record.clone();
    out.remove(DERIVED_KEY);
    out
}

fn string_field<'a>(record: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(HarvestError::MalformedResponse(format!(
            "\"{key}\" should be a string, got {other}"
        ))),
    }
}

pub struct Augmenter<'a> {
    maps: &'a AugmentMaps,
    authors: &'a dyn AuthorLookup,
}

impl<'a> Augmenter<'a> {
    pub fn new(maps: &'a AugmentMaps, authors: &'a dyn AuthorLookup) -> Self {
        Self { maps, authors }
    }

    /// Rewrites `record` in place. An `Err` means the item must be skipped,
    /// unless its kind is fatal.
    pub async fn augment(
        &self,
        record: &mut Map<String, Value>,
        site: &SiteParams,
        errors: &mut ErrorLogger,
    ) -> Result<()> {
        let mut d = Derived::default();

        if let Some(lang) = string_field(record, "language")?.map(str::to_string) {
            let mapped = self.maps.language_code(&lang).to_string();
            if mapped != lang {
                d.comments
                    .push(format!("changed \"language\" from \"{lang}\" to \"{mapped}\""));
                record.insert("language".into(), Value::String(mapped));
            }
        }

        if let Some(creators) = record.get_mut("creators") {
            self.augment_creators(creators, &mut d.comments).await?;
        }

        if site.parent_issn().is_none() {
            if let Some(raw) = string_field(record, "ISSN")? {
                let normalized =
                    issn::normalize_issn(raw).ok_or_else(|| HarvestError::InvalidIssn(raw.to_string()))?;
                d.issn_raw = Some(raw.to_string());
                d.issn_untagged = Some(normalized);
            }
        }

        if let Some(raw) = string_field(record, "date")? {
            let format = match site.strptime_format.as_deref() {
                Some(fmt) => match date::validate_format(fmt) {
                    Ok(()) => Some(fmt),
                    Err(e) => {
                        tracing::warn!(journal = %site.journal_name, error = %e, "ignoring date format");
                        errors.log(ErrorKind::DateFormatConfig, &site.journal_name, "", e.to_string());
                        None
                    }
                },
                None => None,
            };
            let normalized = date::normalize_date(raw, format)?;
            d.comments.push(format!("normalized date to: {normalized}"));
            d.date_raw = Some(raw.to_string());
            d.date_normalized = Some(normalized);
        }

        match site.parent_issn() {
            Some(("online", issn)) => d.issn_online = Some(issn.to_string()),
            Some((_, issn)) => d.issn_print = Some(issn.to_string()),
            None => {}
        }

        match d.issn().map(str::to_string) {
            Some(issn) => self.apply_issn_overrides(&issn, record, &mut d)?,
            None => tracing::debug!(journal = %site.journal_name, "no suitable ISSN found"),
        }

        if !d.is_empty() {
            let v = serde_json::to_value(&d)
                .map_err(|e| HarvestError::MalformedResponse(e.to_string()))?;
            record.insert(DERIVED_KEY.into(), v);
        }
        Ok(())
    }

    async fn augment_creators(&self, creators: &mut Value, comments: &mut Vec<String>) -> Result<()> {
        let Value::Array(list) = creators else {
            return Err(HarvestError::MalformedResponse("\"creators\" is not an array".into()));
        };
        for creator in list.iter_mut() {
            let Value::Object(obj) = creator else {
                return Err(HarvestError::MalformedResponse("creator is not an object".into()));
            };
            let Some(last) = string_field(obj, "lastName")? else {
                continue;
            };
            let name = match string_field(obj, "firstName")? {
                Some(first) => format!("{last}, {first}"),
                None => last.to_string(),
            };
            if let Some(id) = self.authors.lookup(&name).await? {
                comments.push(format!("Added author PPN {id} for author {name}"));
                obj.insert("ppn".into(), Value::String(id));
            }
        }
        Ok(())
    }

    fn apply_issn_overrides(
        &self,
        issn: &str,
        record: &mut Map<String, Value>,
        d: &mut Derived,
    ) -> Result<()> {
        let maps = self.maps;

        if let Some(sup) = maps.issn_to_superior.get(issn) {
            d.superior_ppn = Some(sup.ppn.clone());
        }

        if let Some(form) = maps.issn_to_physical_form.get(issn) {
            d.physical_form = Some(match form.as_str() {
                "A" => PhysicalForm::A,
                "O" => PhysicalForm::O,
                other => {
                    return Err(HarvestError::config(format!(
                        "unhandled entry in physical form map for {issn}: \"{other}\""
                    )))
                }
            });
        }

        if let Some(lang) = maps.issn_to_language_code.get(issn) {
            match string_field(record, "language")? {
                Some(old) if old == lang => {}
                Some(old) => d.comments.push(format!(
                    "changed \"language\" from \"{old}\" to \"{lang}\" due to ISSN map"
                )),
                None => d
                    .comments
                    .push(format!("added \"language\" \"{lang}\" due to ISSN map")),
            }
            record.insert("language".into(), Value::String(lang.clone()));
        }

        let has_volume = string_field(record, "volume")?.is_some_and(|v| !v.is_empty());
        if !has_volume {
            if let Some(vol) = maps.issn_to_volume.get(issn) {
                record.insert("volume".into(), Value::String(vol.clone()));
            }
        }

        if let Some(code) = maps.issn_to_licence.get(issn) {
            if code != FREE_ACCESS_LICENSE {
                return Err(HarvestError::config(format!(
                    "ISSN_to_licence.map maps {issn} to \"{code}\", only \"{FREE_ACCESS_LICENSE}\" is supported"
                )));
            }
            d.license_code = Some(code.clone());
        }

        if let Some(ssg) = maps.issn_to_ssg.get(issn) {
            d.ssg_numbers = Some(ssg.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::SuperiorRecord;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedLookup;

    #[async_trait]
    impl AuthorLookup for FixedLookup {
        async fn lookup(&self, name: &str) -> Result<Option<String>> {
            Ok((name == "Smith, J").then(|| "123456789".to_string()))
        }
    }

    struct FailingLookup;

    #[async_trait]
    impl AuthorLookup for FailingLookup {
        async fn lookup(&self, name: &str) -> Result<Option<String>> {
            Err(HarvestError::AuthorLookup {
                author: name.into(),
                reason: "connection refused".into(),
            })
        }
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn maps() -> AugmentMaps {
        let mut m = AugmentMaps::default();
        m.language_to_language_code.insert("English".into(), "eng".into());
        m.issn_to_language_code.insert("1234-5678".into(), "ger".into());
        m.issn_to_physical_form.insert("1234-5678".into(), "O".into());
        m.issn_to_volume.insert("1234-5678".into(), "42".into());
        m.issn_to_licence.insert("1234-5678".into(), "l".into());
        m.issn_to_ssg.insert("1234-5678".into(), "0;1".into());
        m.issn_to_superior.insert(
            "1234-5678".into(),
            SuperiorRecord {
                ppn: "99999999X".into(),
                title: "Parent".into(),
            },
        );
        m
    }

    #[tokio::test]
    async fn issn_language_override_wins_and_is_commented() {
        let maps = maps();
        let aug = Augmenter::new(&maps, &author::NoAuthorLookup);
        let mut rec = obj(json!({"language": "English", "ISSN": "1234-5678"}));
        let mut log = ErrorLogger::new();
        aug.augment(&mut rec, &SiteParams::named("J"), &mut log)
            .await
            .unwrap();

        assert_eq!(rec["language"], "ger");
        let d = Derived::from_record(&rec).unwrap().unwrap();
        assert!(d
            .comments
            .iter()
            .any(|c| c == "changed \"language\" from \"eng\" to \"ger\" due to ISSN map"));
        assert_eq!(d.issn_untagged.as_deref(), Some("1234-5678"));
        assert_eq!(d.physical_form, Some(PhysicalForm::O));
        assert_eq!(d.license_code.as_deref(), Some("l"));
        assert_eq!(d.ssg_numbers.as_deref(), Some("0;1"));
        assert_eq!(d.superior_ppn.as_deref(), Some("99999999X"));
        assert_eq!(rec["volume"], "42");
    }

    #[tokio::test]
    async fn existing_volume_is_kept() {
        let maps = maps();
        let aug = Augmenter::new(&maps, &author::NoAuthorLookup);
        let mut rec = obj(json!({"ISSN": "1234-5678", "volume": "7"}));
        aug.augment(&mut rec, &SiteParams::named("J"), &mut ErrorLogger::new())
            .await
            .unwrap();
        assert_eq!(rec["volume"], "7");
    }

    #[tokio::test]
    async fn nothing_derived_means_no_side_channel() {
        let maps = AugmentMaps::default();
        let aug = Augmenter::new(&maps, &author::NoAuthorLookup);
        let mut rec = obj(json!({"title": "T"}));
        aug.augment(&mut rec, &SiteParams::named("J"), &mut ErrorLogger::new())
            .await
            .unwrap();
        assert!(!rec.contains_key(DERIVED_KEY));
    }

    #[tokio::test]
    async fn invalid_issn_fails_item_but_site_issn_skips_it() {
        let maps = AugmentMaps::default();
        let aug = Augmenter::new(&maps, &author::NoAuthorLookup);
        let mut rec = obj(json!({"ISSN": "0028-0836 1476-4687"}));
        let err = aug
            .augment(&mut rec, &SiteParams::named("J"), &mut ErrorLogger::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIssn);
        assert!(!err.is_fatal());

        let mut site = SiteParams::named("J");
        site.parent_issn_print = Some("0028-0836".into());
        site.parent_issn_online = Some("1476-4687".into());
        let mut rec = obj(json!({"ISSN": "0028-0836 1476-4687"}));
        aug.augment(&mut rec, &site, &mut ErrorLogger::new())
            .await
            .unwrap();
        let d = Derived::from_record(&rec).unwrap().unwrap();
        assert_eq!(d.issn(), Some("1476-4687"));
        assert_eq!(d.issn_print, None);
    }

    #[tokio::test]
    async fn date_is_normalized_and_bad_format_is_logged() {
        let maps = AugmentMaps::default();
        let aug = Augmenter::new(&maps, &author::NoAuthorLookup);
        let mut site = SiteParams::named("J");
        site.strptime_format = Some("%Q".into());
        let mut log = ErrorLogger::new();
        let mut rec = obj(json!({"date": "2020-05-01"}));
        aug.augment(&mut rec, &site, &mut log).await.unwrap();

        let d = Derived::from_record(&rec).unwrap().unwrap();
        assert_eq!(d.date_normalized.as_deref(), Some("2020-05-01"));
        assert_eq!(d.date_raw.as_deref(), Some("2020-05-01"));
        assert!(d.comments.contains(&"normalized date to: 2020-05-01".to_string()));

        let logged = log.errors_for("J");
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].kind, ErrorKind::DateFormatConfig);
        assert!(logged[0].url.is_empty());
    }

    #[tokio::test]
    async fn creators_get_ids_and_lookup_failure_fails_item() {
        let maps = AugmentMaps::default();
        let aug = Augmenter::new(&maps, &FixedLookup);
        let mut rec = obj(json!({"creators": [
            {"lastName": "Smith", "firstName": "J"},
            {"lastName": "Doe"},
            {"name": "Institution"}
        ]}));
        aug.augment(&mut rec, &SiteParams::named("J"), &mut ErrorLogger::new())
            .await
            .unwrap();
        assert_eq!(rec["creators"][0]["ppn"], "123456789");
        assert!(rec["creators"][1].get("ppn").is_none());
        let d = Derived::from_record(&rec).unwrap().unwrap();
        assert_eq!(d.comments, vec!["Added author PPN 123456789 for author Smith, J"]);

        let failing = Augmenter::new(&maps, &FailingLookup);
        let mut rec = obj(json!({"creators": [{"lastName": "Smith"}]}));
        let err = failing
            .augment(&mut rec, &SiteParams::named("J"), &mut ErrorLogger::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorLookup);
    }

    #[tokio::test]
    async fn unsupported_license_code_is_fatal() {
        let mut m = AugmentMaps::default();
        m.issn_to_licence.insert("0028-0836".into(), "x".into());
        let aug = Augmenter::new(&m, &author::NoAuthorLookup);
        let mut rec = obj(json!({"ISSN": "0028-0836"}));
        let err = aug
            .augment(&mut rec, &SiteParams::named("J"), &mut ErrorLogger::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}

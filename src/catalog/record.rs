// src/catalog/record.rs
//! Minimal bibliographic record: leader, control fields and data fields
//! with ordered subfields. Fields are kept sorted by tag on insertion.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{HarvestError, Result};

/// Language material, serial component part.
pub const DEFAULT_LEADER: &str = "00000nab a2200000   4500";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    pub code: char,
    pub value: String,
}

impl Subfield {
    pub fn new(code: char, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataField {
    pub tag: String,
    pub ind1: char,
    pub ind2: char,
    pub subfields: Vec<Subfield>,
}

impl DataField {
    pub fn add_subfield(&mut self, code: char, value: impl Into<String>) {
        self.subfields.push(Subfield::new(code, value));
    }

    pub fn first_subfield(&self, code: char) -> Option<&str> {
        self.subfields
            .iter()
            .find(|s| s.code == code)
            .map(|s| s.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Control { tag: String, value: String },
    Data(DataField),
}

impl Field {
    pub fn tag(&self) -> &str {
        match self {
            Field::Control { tag, .. } => tag,
            Field::Data(d) => &d.tag,
        }
    }
}

/// Control fields are tags `001`-`009`.
pub fn is_control_tag(tag: &str) -> bool {
    tag.len() == 3 && tag.starts_with("00")
}

fn check_tag(tag: &str) -> Result<()> {
    if tag.len() != 3 || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(HarvestError::RecordEdit(format!("\"{tag}\" is not a valid tag")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    leader: String,
    fields: Vec<Field>,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    pub fn new() -> Self {
        Self {
            leader: DEFAULT_LEADER.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_control_number(control_number: &str) -> Self {
        let mut r = Self::new();
        r.insert_control_field("001", control_number);
        r
    }

    pub fn leader(&self) -> &str {
        &self.leader
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn control_number(&self) -> Option<&str> {
        self.fields.iter().find_map(|f| match f {
            Field::Control { tag, value } if tag == "001" => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.fields.iter().any(|f| f.tag() == tag)
    }

    pub fn data_fields<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a DataField> + 'a {
        self.fields.iter().filter_map(move |f| match f {
            Field::Data(d) if d.tag == tag => Some(d),
            _ => None,
        })
    }

    pub fn first_field_mut(&mut self, tag: &str) -> Option<&mut DataField> {
        self.fields.iter_mut().find_map(|f| match f {
            Field::Data(d) if d.tag == tag => Some(d),
            _ => None,
        })
    }

    /// Position after the last field whose tag sorts at or before `tag`.
    fn insertion_point(&self, tag: &str) -> usize {
        self.fields
            .iter()
            .rposition(|f| f.tag() <= tag)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    /// Replaces an existing control field with the same tag.
    pub fn insert_control_field(&mut self, tag: &str, value: impl Into<String>) {
        let value = value.into();
        for f in self.fields.iter_mut() {
            if let Field::Control { tag: t, value: v } = f {
                if t == tag {
                    *v = value;
                    return;
                }
            }
        }
        let at = self.insertion_point(tag);
        self.fields.insert(
            at,
            Field::Control {
                tag: tag.to_string(),
                value,
            },
        );
    }

    pub fn insert_field(&mut self, tag: &str, ind1: char, ind2: char, subfields: Vec<Subfield>) {
        let at = self.insertion_point(tag);
        self.fields.insert(
            at,
            Field::Data(DataField {
                tag: tag.to_string(),
                ind1,
                ind2,
                subfields,
            }),
        );
    }

    /// Shorthand for a field with blank indicators.
    pub fn insert(&mut self, tag: &str, subfields: Vec<Subfield>) {
        self.insert_field(tag, ' ', ' ', subfields);
    }

    /// Appends to the first field with `tag`, creating it if absent.
    pub fn add_subfield(&mut self, tag: &str, code: char, value: impl Into<String>) {
        match self.first_field_mut(tag) {
            Some(field) => field.add_subfield(code, value),
            None => self.insert(tag, vec![Subfield::new(code, value)]),
        }
    }

    /// Inserts a field described as `TTTii$aValue$bValue`.
    pub fn insert_field_spec(&mut self, spec: &str) -> Result<()> {
        match parse_field_spec(spec)? {
            Field::Control { tag, value } => self.insert_control_field(&tag, value),
            Field::Data(d) => self.insert_field(&d.tag, d.ind1, d.ind2, d.subfields),
        }
        Ok(())
    }

    pub fn apply_edits(&mut self, edits: &[EditInstruction]) -> Result<()> {
        for edit in edits {
            edit.apply(self)?;
        }
        Ok(())
    }

    /// SHA-256 over every field except `001`, so re-harvested content with a
    /// fresh control number hashes the same.
    pub fn checksum(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.leader.as_bytes());
        for f in &self.fields {
            match f {
                Field::Control { tag, .. } if tag == "001" => continue,
                Field::Control { tag, value } => {
                    hasher.update(tag.as_bytes());
                    hasher.update(value.as_bytes());
                }
                Field::Data(d) => {
                    hasher.update(d.tag.as_bytes());
                    let mut ind = [0u8; 8];
                    hasher.update(d.ind1.encode_utf8(&mut ind).as_bytes());
                    hasher.update(d.ind2.encode_utf8(&mut ind).as_bytes());
                    for s in &d.subfields {
                        hasher.update([0x1Fu8]);
                        hasher.update(s.code.encode_utf8(&mut ind).as_bytes());
                        hasher.update(s.value.as_bytes());
                    }
                }
            }
            hasher.update([0x1Eu8]);
        }
        hasher.finalize().into()
    }
}

/// `TTT` + two indicator characters + `$`-delimited subfields for data
/// fields, or `00X` + the raw value for control fields.
pub fn parse_field_spec(spec: &str) -> Result<Field> {
    let bad = |why: &str| HarvestError::config(format!("bad field spec \"{spec}\": {why}"));
    let tag: String = spec.chars().take(3).collect();
    if tag.chars().count() != 3 {
        return Err(bad("too short"));
    }
    check_tag(&tag).map_err(|_| bad("invalid tag"))?;
    let rest: String = spec.chars().skip(3).collect();

    if is_control_tag(&tag) {
        return Ok(Field::Control {
            tag,
            value: rest.trim().to_string(),
        });
    }

    let mut chars = rest.chars();
    let (Some(ind1), Some(ind2)) = (chars.next(), chars.next()) else {
        return Err(bad("missing indicators"));
    };
    let body: String = chars.collect();
    if !body.starts_with('$') {
        return Err(bad("subfields must start with '$'"));
    }
    let mut subfields = Vec::new();
    for chunk in body.split('$').skip(1) {
        let mut cs = chunk.chars();
        let code = cs.next().ok_or_else(|| bad("empty subfield"))?;
        subfields.push(Subfield::new(code, cs.as_str()));
    }
    Ok(Field::Data(DataField {
        tag,
        ind1,
        ind2,
        subfields,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    /// New field; fails if the tag is already present.
    InsertField,
    /// New single-subfield field; fails if the tag is already present.
    InsertSubfield,
    /// New field, always.
    AddField,
    /// Subfield appended to an existing field; fails if the tag is absent.
    AddSubfield,
}

/// Structural edit applied to each freshly mapped record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditInstruction {
    pub kind: EditKind,
    pub tag: String,
    #[serde(default)]
    pub subfield: Option<char>,
    #[serde(default = "blank_indicators")]
    pub indicators: String,
    pub contents: String,
}

fn blank_indicators() -> String {
    "  ".to_string()
}

impl EditInstruction {
    fn indicators(&self) -> (char, char) {
        let mut it = self.indicators.chars();
        (it.next().unwrap_or(' '), it.next().unwrap_or(' '))
    }

    fn subfield_code(&self) -> Result<char> {
        self.subfield.ok_or_else(|| {
            HarvestError::RecordEdit(format!("{:?} on {} needs a subfield code", self.kind, self.tag))
        })
    }

    fn field_from_contents(&self) -> Result<Field> {
        let (i1, i2) = self.indicators();
        let spec = if is_control_tag(&self.tag) {
            format!("{}{}", self.tag, self.contents)
        } else {
            format!("{}{i1}{i2}{}", self.tag, self.contents)
        };
        parse_field_spec(&spec).map_err(|e| HarvestError::RecordEdit(e.to_string()))
    }

    pub fn apply(&self, record: &mut Record) -> Result<()> {
        check_tag(&self.tag)?;
        match self.kind {
            EditKind::InsertField | EditKind::InsertSubfield if record.has_tag(&self.tag) => {
                Err(HarvestError::RecordEdit(format!(
                    "failed to insert a {} field: tag already present",
                    self.tag
                )))
            }
            EditKind::InsertField | EditKind::AddField => {
                match self.field_from_contents()? {
                    Field::Control { tag, value } => record.insert_control_field(&tag, value),
                    Field::Data(d) => record.insert_field(&d.tag, d.ind1, d.ind2, d.subfields),
                }
                Ok(())
            }
            EditKind::InsertSubfield => {
                let (i1, i2) = self.indicators();
                let code = self.subfield_code()?;
                record.insert_field(&self.tag, i1, i2, vec![Subfield::new(code, &self.contents)]);
                Ok(())
            }
            EditKind::AddSubfield => {
                let code = self.subfield_code()?;
                match record.first_field_mut(&self.tag) {
                    Some(f) => {
                        f.add_subfield(code, &self.contents);
                        Ok(())
                    }
                    None => Err(HarvestError::RecordEdit(format!(
                        "failed to add a {}{code} subfield: no such field",
                        self.tag
                    ))),
                }
            }
        }
    }
}

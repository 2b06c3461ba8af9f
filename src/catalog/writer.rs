// src/catalog/writer.rs
//! Record serialisation: ISO 2709 binary and MARC-XML.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::record::{Field, Record};
use crate::error::{HarvestError, Result};

const FIELD_TERMINATOR: u8 = 0x1E;
const RECORD_TERMINATOR: u8 = 0x1D;
const SUBFIELD_DELIMITER: u8 = 0x1F;
const MARCXML_NS: &str = "http://www.loc.gov/MARC21/slim";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Binary,
    Xml,
}

impl OutputKind {
    /// `.mrc`/`.marc` is binary, `.xml` is MARC-XML.
    pub fn guess(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "mrc" | "marc" => Ok(OutputKind::Binary),
            "xml" => Ok(OutputKind::Xml),
            _ => Err(HarvestError::config(format!(
                "can't guess catalog output type from \"{}\"",
                path.display()
            ))),
        }
    }

    pub fn format_name(self) -> &'static str {
        match self {
            OutputKind::Binary => "marc21",
            OutputKind::Xml => "marcxml",
        }
    }
}

fn io_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::ExportConversion(e.to_string())
}

/// A record ready to be appended to the output.
pub enum Encoded<'r> {
    Binary(Vec<u8>),
    Xml(&'r Record),
}

pub enum RecordWriter {
    Binary(BufWriter<File>),
    Xml(quick_xml::Writer<BufWriter<File>>),
}

impl RecordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let kind = OutputKind::guess(path)?;
        let file = File::create(path)
            .map_err(|e| HarvestError::ExportConversion(format!("creating {}: {e}", path.display())))?;
        let out = BufWriter::new(file);
        match kind {
            OutputKind::Binary => Ok(RecordWriter::Binary(out)),
            OutputKind::Xml => {
                let mut w = quick_xml::Writer::new_with_indent(out, b' ', 2);
                w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
                    .map_err(io_err)?;
                let collection = BytesStart::new("collection").with_attributes([("xmlns", MARCXML_NS)]);
                w.write_event(Event::Start(collection)).map_err(io_err)?;
                Ok(RecordWriter::Xml(w))
            }
        }
    }

    /// Serialises `record` for this writer without touching the file. Fails
    /// with a per-item error when the record doesn't fit the format.
    pub fn encode<'r>(&self, record: &'r Record) -> Result<Encoded<'r>> {
        match self {
            RecordWriter::Binary(_) => to_iso2709(record).map(Encoded::Binary),
            RecordWriter::Xml(_) => Ok(Encoded::Xml(record)),
        }
    }

    pub fn write_encoded(&mut self, encoded: Encoded<'_>) -> Result<()> {
        match (self, encoded) {
            (RecordWriter::Binary(out), Encoded::Binary(raw)) => out.write_all(&raw).map_err(io_err),
            (RecordWriter::Xml(w), Encoded::Xml(record)) => write_xml_record(w, record),
            _ => Err(HarvestError::ExportConversion(
                "record encoded for a different output type".into(),
            )),
        }
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        let encoded = self.encode(record)?;
        self.write_encoded(encoded)
    }

    /// Closes the XML collection and flushes.
    pub fn finish(self) -> Result<()> {
        match self {
            RecordWriter::Binary(mut out) => out.flush().map_err(io_err),
            RecordWriter::Xml(mut w) => {
                w.write_event(Event::End(BytesEnd::new("collection")))
                    .map_err(io_err)?;
                let mut out = w.into_inner();
                out.write_all(b"\n").map_err(io_err)?;
                out.flush().map_err(io_err)
            }
        }
    }
}

pub fn to_iso2709(record: &Record) -> Result<Vec<u8>> {
    let mut directory = Vec::new();
    let mut data = Vec::new();
    for field in record.fields() {
        let start = data.len();
        match field {
            Field::Control { value, .. } => data.extend_from_slice(value.as_bytes()),
            Field::Data(d) => {
                let mut buf = [0u8; 4];
                data.extend_from_slice(d.ind1.encode_utf8(&mut buf).as_bytes());
                data.extend_from_slice(d.ind2.encode_utf8(&mut buf).as_bytes());
                for s in &d.subfields {
                    data.push(SUBFIELD_DELIMITER);
                    data.extend_from_slice(s.code.encode_utf8(&mut buf).as_bytes());
                    data.extend_from_slice(s.value.as_bytes());
                }
            }
        }
        data.push(FIELD_TERMINATOR);
        let len = data.len() - start;
        if len > 9_999 || start > 99_999 {
            return Err(HarvestError::RecordTooLarge(format!(
                "field {} too large for ISO 2709 ({len} bytes)",
                field.tag()
            )));
        }
        directory.extend_from_slice(format!("{}{len:04}{start:05}", field.tag()).as_bytes());
    }
    directory.push(FIELD_TERMINATOR);

    let base = 24 + directory.len();
    let total = base + data.len() + 1;
    if total > 99_999 {
        return Err(HarvestError::RecordTooLarge(format!(
            "record too large for ISO 2709 ({total} bytes)"
        )));
    }

    let mut leader = record.leader().as_bytes().to_vec();
    leader.resize(24, b' ');
    leader[0..5].copy_from_slice(format!("{total:05}").as_bytes());
    leader[12..17].copy_from_slice(format!("{base:05}").as_bytes());

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&leader);
    out.extend_from_slice(&directory);
    out.extend_from_slice(&data);
    out.push(RECORD_TERMINATOR);
    Ok(out)
}

fn write_xml_record<W: Write>(w: &mut quick_xml::Writer<W>, record: &Record) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new("record")))
        .map_err(io_err)?;
    write_text_element(w, BytesStart::new("leader"), record.leader())?;
    for field in record.fields() {
        match field {
            Field::Control { tag, value } => {
                let el = BytesStart::new("controlfield").with_attributes([("tag", tag.as_str())]);
                write_text_element(w, el, value)?;
            }
            Field::Data(d) => {
                let (i1, i2) = (d.ind1.to_string(), d.ind2.to_string());
                let el = BytesStart::new("datafield").with_attributes([
                    ("tag", d.tag.as_str()),
                    ("ind1", i1.as_str()),
                    ("ind2", i2.as_str()),
                ]);
                w.write_event(Event::Start(el)).map_err(io_err)?;
                for s in &d.subfields {
                    let code = s.code.to_string();
                    let sub = BytesStart::new("subfield").with_attributes([("code", code.as_str())]);
                    write_text_element(w, sub, &s.value)?;
                }
                w.write_event(Event::End(BytesEnd::new("datafield")))
                    .map_err(io_err)?;
            }
        }
    }
    w.write_event(Event::End(BytesEnd::new("record")))
        .map_err(io_err)
}

fn write_text_element<W: Write>(
    w: &mut quick_xml::Writer<W>,
    start: BytesStart<'_>,
    text: &str,
) -> Result<()> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    w.write_event(Event::Start(start)).map_err(io_err)?;
    w.write_event(Event::Text(BytesText::new(text)))
        .map_err(io_err)?;
    w.write_event(Event::End(BytesEnd::new(name))).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::record::Subfield;

    fn sample() -> Record {
        let mut r = Record::with_control_number("ZTS0000001");
        r.insert("245", vec![Subfield::new('a', "A & B")]);
        r
    }

    #[test]
    fn iso2709_layout() {
        let raw = to_iso2709(&sample()).unwrap();
        let total: usize = std::str::from_utf8(&raw[0..5]).unwrap().parse().unwrap();
        assert_eq!(total, raw.len());
        let base: usize = std::str::from_utf8(&raw[12..17]).unwrap().parse().unwrap();
        // two directory entries + terminator
        assert_eq!(base, 24 + 2 * 12 + 1);
        assert_eq!(&raw[24..27], b"001");
        assert_eq!(*raw.last().unwrap(), RECORD_TERMINATOR);
    }

    #[test]
    fn xml_output_is_escaped_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.xml");
        let mut w = RecordWriter::create(&p).unwrap();
        w.write(&sample()).unwrap();
        w.finish().unwrap();

        let s = std::fs::read_to_string(&p).unwrap();
        assert!(s.contains("<controlfield tag=\"001\">ZTS0000001</controlfield>"));
        assert!(s.contains("A &amp; B"));
        assert!(s.trim_end().ends_with("</collection>"));
    }

    #[test]
    fn oversized_field_is_an_item_error() {
        let mut r = Record::with_control_number("ZTS0000002");
        r.insert("520", vec![Subfield::new('a', "x".repeat(12_000))]);
        let err = to_iso2709(&r).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RecordTooLarge);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("field 520"));
    }

    #[test]
    fn encode_leaves_the_file_untouched_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.mrc");
        let mut w = RecordWriter::create(&p).unwrap();
        let mut big = Record::with_control_number("ZTS0000002");
        big.insert("520", vec![Subfield::new('a', "x".repeat(12_000))]);
        assert!(w.encode(&big).is_err());
        w.write(&sample()).unwrap();
        w.finish().unwrap();

        let raw = std::fs::read(&p).unwrap();
        assert_eq!(raw, to_iso2709(&sample()).unwrap());
    }

    #[test]
    fn unknown_extension_is_configuration_error() {
        let err = OutputKind::guess(Path::new("out.csv")).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(OutputKind::guess(Path::new("x.MRC")).unwrap(), OutputKind::Binary);
    }
}

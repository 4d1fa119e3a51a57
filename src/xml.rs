/// XML import and export
///
/// Import reads every `<record>` element (the tag is configurable) at any
/// depth and turns each of its child elements into a field, named by the
/// child's tag. Files without record elements are read as one record per
/// child of the root. Fields a record lacks are left blank, and column types
/// are inferred from the text the same way CSV import does it.
///
/// Export writes `<data>` holding one `<record>` per row, with a child per
/// column named after the column in lower case. Missing cells are written
/// as empty elements.
///
/// # Examples
///
/// ```
/// use dbf_commander::xml::{XmlImportOptions, XmlSource};
/// use dbf_commander::{CellValue, Table};
///
/// let xml = "<clients><record><name>Ana</name><age>34</age></record>\
///            <record><name>Bruno</name></record></clients>";
/// let mut source = XmlSource::from_text("clients", xml, &XmlImportOptions::default()).unwrap();
/// let table = Table::load(&mut source).unwrap();
///
/// assert_eq!(table.schema().get_column_names(), vec!["NAME", "AGE"]);
/// assert_eq!(table.get_value(0, "AGE").unwrap(), &CellValue::Integer(34));
/// assert_eq!(table.get_value(1, "AGE").unwrap(), &CellValue::Missing);
/// ```

use crate::backup::write_atomically;
use crate::codepage::detect_codepage;
use crate::error::LoadError;
use crate::import::{infer_schema, sanitize_field_name, typed_row};
use crate::table::{RecordSource, Row, Schema, Table};
use log::{debug, info};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::{self, Write};
use std::path::Path;

/// Element that wraps one record, on import and export
pub const DEFAULT_RECORD_TAG: &str = "record";

/// Root element written on export
pub const EXPORT_ROOT_TAG: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlImportOptions {
    pub record_tag: String,
}

impl Default for XmlImportOptions {
    fn default() -> Self {
        XmlImportOptions {
            record_tag: DEFAULT_RECORD_TAG.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn named(start: &BytesStart<'_>) -> Element {
        Element {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Element::default()
        }
    }

    /// This element and its descendants in document order
    fn walk<'a>(&'a self, out: &mut Vec<&'a Element>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

fn xml_error<R>(reader: &Reader<R>, message: impl Into<String>) -> LoadError {
    LoadError::Xml {
        position: reader.buffer_position(),
        message: message.into(),
    }
}

/// Parses `text` into an element tree and returns its root
fn parse_tree(text: &str) -> Result<Element, LoadError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(Element::named(&e)),

            Ok(Event::Empty(e)) => {
                let element = Element::named(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }

            Ok(Event::End(_)) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| xml_error(&reader, "closing tag without an open element"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => root = Some(done),
                }
            }

            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| xml_error(&reader, err.to_string()))?;
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&text);
                }
            }

            Ok(Event::CData(e)) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }

            Ok(Event::Eof) => break,

            Err(e) => return Err(xml_error(&reader, e.to_string())),

            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(&reader, format!("element <{}> is not closed", open.name)));
    }
    root.ok_or_else(|| xml_error(&reader, "no root element"))
}

/// Field name for an element tag: `-` reads as `_`, then the DBF rules apply
fn field_name(tag: &str) -> String {
    sanitize_field_name(&tag.replace('-', "_"))
}

/// Collects records as (field, text) pairs, each field named at most once
fn collect_records<'a>(root: &'a Element, record_tag: &str) -> Vec<Vec<(String, &'a str)>> {
    let fields_of = |record: &'a Element| -> Vec<(String, &'a str)> {
        let mut fields: Vec<(String, &'a str)> = Vec::new();
        for child in &record.children {
            let name = field_name(&child.name);
            // A repeated field keeps the last value
            match fields.iter_mut().find(|(n, _)| *n == name) {
                Some(existing) => existing.1 = child.text.as_str(),
                None => fields.push((name, child.text.as_str())),
            }
        }
        fields
    };

    let mut all = Vec::new();
    root.walk(&mut all);
    let tagged: Vec<_> = all
        .into_iter()
        .filter(|e| e.name == record_tag)
        .map(fields_of)
        .filter(|f| !f.is_empty())
        .collect();
    if !tagged.is_empty() {
        return tagged;
    }

    debug!("No <{}> elements; reading children of <{}> as records", record_tag, root.name);
    root.children.iter().map(fields_of).filter(|f| !f.is_empty()).collect()
}

/// Record source over an XML document
#[derive(Debug)]
pub struct XmlSource {
    name: String,
    schema: Schema,
    rows: std::vec::IntoIter<Vec<String>>,
}

impl XmlSource {
    pub fn from_text(name: impl Into<String>, text: &str, options: &XmlImportOptions) -> Result<XmlSource, LoadError> {
        let root = parse_tree(text)?;
        let records = collect_records(&root, &options.record_tag);
        if records.is_empty() {
            return Err(LoadError::Xml {
                position: 0,
                message: "no records found".to_string(),
            });
        }

        // Columns in order of first appearance
        let mut names: Vec<String> = Vec::new();
        for record in &records {
            for (field, _) in record {
                if !names.contains(field) {
                    names.push(field.clone());
                }
            }
        }
        let rows: Vec<Vec<String>> = records
            .iter()
            .map(|record| {
                names
                    .iter()
                    .map(|name| {
                        record
                            .iter()
                            .find(|(field, _)| field == name)
                            .map(|(_, text)| text.to_string())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        let schema = infer_schema(names, &rows)?;
        debug!("Parsed XML: {} columns, {} records", schema.len(), rows.len());
        Ok(XmlSource {
            name: name.into(),
            schema,
            rows: rows.into_iter(),
        })
    }

    /// Reads an XML file; bytes that are not UTF-8 are decoded with the
    /// first code page that fits
    pub fn open(path: &Path, options: &XmlImportOptions) -> Result<XmlSource, LoadError> {
        if !path.exists() {
            return Err(LoadError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                let bytes = e.into_bytes();
                detect_codepage(&bytes).decode_lossy(&bytes)
            }
        };
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        XmlSource::from_text(name, text.trim_start_matches('\u{feff}'), options)
    }
}

impl RecordSource for XmlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_record(&mut self) -> Option<Result<Row, LoadError>> {
        let fields = self.rows.next()?;
        Some(Ok(typed_row(&self.schema, &fields)))
    }
}

/// Reads and loads an XML file in one step
pub fn import_xml(path: &Path, options: &XmlImportOptions) -> Result<Table, LoadError> {
    let mut source = XmlSource::open(path, options)?;
    let table = Table::load(&mut source)?;
    info!("Imported {} records from {}", table.len(), path.display());
    Ok(table)
}

/// Element name for a column: lower case, anything outside `[a-z0-9_.-]`
/// becomes `_`, and a leading digit, `.` or `-` gets a `_` in front
fn element_name(column: &str) -> String {
    let mut name: String = column
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

/// Writes `table` as an indented XML document
pub fn write_xml<W: Write>(table: &Table, dest: W) -> io::Result<W> {
    let names: Vec<String> = table.columns().iter().map(|c| element_name(c.name())).collect();
    let mut writer = Writer::new_with_indent(dest, b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(EXPORT_ROOT_TAG)))?;
    for row in table.iter_rows() {
        writer.write_event(Event::Start(BytesStart::new(DEFAULT_RECORD_TAG)))?;
        for (name, cell) in names.iter().zip(row.iter()) {
            if cell.is_missing() {
                writer.write_event(Event::Empty(BytesStart::new(name.as_str())))?;
                continue;
            }
            let text = cell.to_string();
            writer.write_event(Event::Start(BytesStart::new(name.as_str())))?;
            writer.write_event(Event::Text(BytesText::new(&text)))?;
            writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
        }
        writer.write_event(Event::End(BytesEnd::new(DEFAULT_RECORD_TAG)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(EXPORT_ROOT_TAG)))?;
    Ok(writer.into_inner())
}

/// `table` as an XML document
pub fn to_xml(table: &Table) -> io::Result<String> {
    let bytes = write_xml(table, Vec::new())?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes `table` to `path` as XML, replacing any existing file atomically
pub fn export_xml(table: &Table, path: &Path) -> io::Result<()> {
    write_atomically(path, |file| {
        write_xml(table, io::BufWriter::new(file))?.flush()
    })?;
    info!("Exported {} records to {}", table.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{CellValue, Column, ColumnType};
    use chrono::NaiveDate;

    fn load(xml: &str) -> Table {
        let mut source = XmlSource::from_text("t", xml, &XmlImportOptions::default()).unwrap();
        Table::load(&mut source).unwrap()
    }

    #[test]
    fn test_records_at_any_depth() {
        let table = load(
            r#"<?xml version="1.0"?>
            <export>
              <batch>
                <record><client-name>Ana &amp; Co</client-name><balance>10.5</balance></record>
                <record><balance>-3</balance><vip>true</vip></record>
              </batch>
              <record/>
            </export>"#,
        );
        assert_eq!(table.schema().get_column_names(), vec!["CLIENT_NAM", "BALANCE", "VIP"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.schema().get_column_type("BALANCE"), Some(ColumnType::Decimal));
        assert_eq!(table.get_value(0, "CLIENT_NAM").unwrap(), &CellValue::from("Ana & Co"));
        // Absent fields read as blank, like empty CSV fields
        assert_eq!(table.get_value(1, "CLIENT_NAM").unwrap(), &CellValue::from(""));
        assert_eq!(table.get_value(1, "VIP").unwrap(), &CellValue::Boolean(true));
    }

    #[test]
    fn test_children_of_root_when_no_record_tag() {
        let table = load("<people><person><name>Ana</name></person><person><name><![CDATA[<Bo>]]></name></person></people>");
        assert_eq!(table.schema().get_column_names(), vec!["NAME"]);
        assert_eq!(table.get_value(1, "NAME").unwrap(), &CellValue::from("<Bo>"));
    }

    #[test]
    fn test_custom_record_tag() {
        let options = XmlImportOptions {
            record_tag: "row".to_string(),
        };
        let xml = "<rows><row><id>1</id></row><row><id>2</id></row><record><id>x</id></record></rows>";
        let mut source = XmlSource::from_text("t", xml, &options).unwrap();
        let table = Table::load(&mut source).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_value(1, "ID").unwrap(), &CellValue::Integer(2));
    }

    #[test]
    fn test_malformed_and_empty_documents() {
        let options = XmlImportOptions::default();
        assert!(matches!(
            XmlSource::from_text("t", "<a><record><x>1</x></a>", &options),
            Err(LoadError::Xml { .. })
        ));
        assert!(matches!(
            XmlSource::from_text("t", "<a><record><x>1</x></record>", &options),
            Err(LoadError::Xml { .. })
        ));
        match XmlSource::from_text("t", "<a><b/></a>", &options) {
            Err(LoadError::Xml { message, .. }) => assert_eq!(message, "no records found"),
            other => panic!("expected no records, got {:?}", other.map(|s| s.schema().len())),
        }
    }

    #[test]
    fn test_export() {
        let schema = Schema::try_new(vec![
            Column::with_width("NAME", ColumnType::Text, 10, 0),
            Column::new("SINCE", ColumnType::Date),
            Column::new("COUNT(*)", ColumnType::Integer),
        ])
        .unwrap();
        let table = Table::with_rows(
            "t",
            schema,
            vec![vec![
                CellValue::from("A<B & C"),
                CellValue::Date(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()),
                CellValue::Missing,
            ]],
        )
        .unwrap();

        let xml = to_xml(&table).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<name>A&lt;B &amp; C</name>"));
        assert!(xml.contains("<since>2024-05-17</since>"));
        assert!(xml.contains("<count___/>"));

        // What export writes, import reads back
        let back = load(&xml);
        assert_eq!(back.get_value(0, "NAME").unwrap(), &CellValue::from("A<B & C"));
        assert_eq!(back.schema().get_column_type("SINCE"), Some(ColumnType::Date));
    }

    #[test]
    fn test_import_and_export_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.xml");
        // cp1252 "José", not valid UTF-8
        std::fs::write(&path, b"<data><record><name>Jos\xe9</name></record></data>").unwrap();

        let table = import_xml(&path, &XmlImportOptions::default()).unwrap();
        assert_eq!(table.name(), "clients");
        assert_eq!(table.get_value(0, "NAME").unwrap(), &CellValue::from("José"));

        let out = dir.path().join("out.xml");
        export_xml(&table, &out).unwrap();
        assert!(std::fs::read_to_string(&out).unwrap().contains("<name>José</name>"));

        assert!(matches!(
            import_xml(&dir.path().join("absent.xml"), &XmlImportOptions::default()),
            Err(LoadError::FileNotFound(_))
        ));
    }
}

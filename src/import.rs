/// CSV import
///
/// Turns delimited text into a Table whose columns can be saved as DBF
/// fields: names are sanitized to the xBase rules and each column gets a
/// type and width inferred from its values.
///
/// # Examples
///
/// ```
/// use dbf_commander::import::{CsvImportOptions, CsvSource};
/// use dbf_commander::{CellValue, ColumnType, Table};
///
/// let csv = "first name;age\nAna;34\nBruno;19\n";
/// let mut source = CsvSource::from_text("people", csv, &CsvImportOptions::default()).unwrap();
/// let table = Table::load(&mut source).unwrap();
///
/// assert_eq!(table.schema().get_column_names(), vec!["FIRST_NAME", "AGE"]);
/// assert_eq!(table.schema().get_column_type("AGE"), Some(ColumnType::Integer));
/// assert_eq!(table.get_value(1, "AGE").unwrap(), &CellValue::Integer(19));
/// ```

use crate::codepage::detect_codepage;
use crate::column::{infer_column_type, parse_as, CellValue, Column, ColumnType};
use crate::error::LoadError;
use crate::persist::{MAX_CHARACTER_LENGTH, MAX_FIELD_NAME_LENGTH};
use crate::table::{RecordSource, Row, Schema, Table};
use log::{debug, info};
use std::collections::HashSet;
use std::path::Path;

/// Delimiters tried when none is given
pub const CANDIDATE_DELIMITERS: [char; 4] = [',', ';', '\t', '|'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvImportOptions {
    /// Detected from the first line when None
    pub delimiter: Option<char>,
    /// First row holds column names
    pub has_header: bool,
}

impl Default for CsvImportOptions {
    fn default() -> Self {
        CsvImportOptions {
            delimiter: None,
            has_header: true,
        }
    }
}

/// Split CSV text into rows, handling quoted fields with embedded newlines
pub fn parse_csv_rows(csv: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut current_row = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = csv.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current_field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            c if c == delimiter && !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
            }
            '\n' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
                if !(current_row.len() == 1 && current_row[0].is_empty()) {
                    rows.push(std::mem::take(&mut current_row));
                } else {
                    current_row.clear();
                }
            }
            // \r\n line endings
            '\r' if !in_quotes => {}
            _ => current_field.push(c),
        }
    }

    if !current_field.is_empty() || !current_row.is_empty() {
        current_row.push(current_field);
        rows.push(current_row);
    }

    rows
}

/// Picks the candidate delimiter that occurs most often, outside quotes, on
/// the first line. Falls back to a comma.
pub fn detect_delimiter(csv: &str) -> char {
    let first_line = {
        let mut in_quotes = false;
        let end = csv
            .char_indices()
            .find(|&(_, c)| {
                if c == '"' {
                    in_quotes = !in_quotes;
                }
                c == '\n' && !in_quotes
            })
            .map_or(csv.len(), |(i, _)| i);
        &csv[..end]
    };

    let mut best = (',', 0);
    for candidate in CANDIDATE_DELIMITERS {
        let mut in_quotes = false;
        let count = first_line
            .chars()
            .filter(|&c| {
                if c == '"' {
                    in_quotes = !in_quotes;
                }
                c == candidate && !in_quotes
            })
            .count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// Makes `name` a legal DBF field name: upper case, `_` for spaces,
/// alphanumerics and `_` only, at most ten characters, `FIELD` when nothing
/// is left.
///
/// ```
/// use dbf_commander::import::sanitize_field_name;
///
/// assert_eq!(sanitize_field_name("first name"), "FIRST_NAME");
/// assert_eq!(sanitize_field_name("Preço (€)"), "PREO_");
/// assert_eq!(sanitize_field_name("customer_identifier"), "CUSTOMER_I");
/// assert_eq!(sanitize_field_name("?!"), "FIELD");
/// ```
pub fn sanitize_field_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(MAX_FIELD_NAME_LENGTH)
        .collect();
    if cleaned.is_empty() {
        "FIELD".to_string()
    } else {
        cleaned
    }
}

/// Sanitizes every name and suffixes repeats (`NAME`, `NAME_2`, ...) so the
/// result stays unique and within the length limit
pub fn unique_field_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for name in names {
        let base = sanitize_field_name(name);
        let mut candidate = base.clone();
        let mut n = 2;
        while !seen.insert(candidate.clone()) {
            let suffix = format!("_{}", n);
            let keep = MAX_FIELD_NAME_LENGTH.saturating_sub(suffix.len()).min(base.len());
            candidate = format!("{}{}", &base[..keep], suffix);
            n += 1;
        }
        result.push(candidate);
    }
    result
}

fn column_for(name: String, column_type: ColumnType, values: &[&str]) -> Column {
    match column_type {
        ColumnType::Integer => Column::with_width(name, column_type, 12, 0),
        ColumnType::Decimal => Column::with_width(name, column_type, 12, 2),
        ColumnType::Text => {
            let longest = values.iter().map(|v| v.chars().count()).max().unwrap_or(0);
            let length = longest.clamp(1, MAX_CHARACTER_LENGTH as usize) as u8;
            Column::with_width(name, column_type, length, 0)
        }
        ColumnType::Boolean | ColumnType::Date => Column::new(name, column_type),
    }
}

/// One column per name, typed and sized from the text values below it
pub(crate) fn infer_schema(names: Vec<String>, rows: &[Vec<String>]) -> Result<Schema, LoadError> {
    let columns = names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<&str> = rows
                .iter()
                .map(|r| r.get(idx).map(|s| s.as_str()).unwrap_or(""))
                .collect();
            let column_type = infer_column_type(values.iter().copied());
            column_for(name, column_type, &values)
        })
        .collect();
    Ok(Schema::try_new(columns)?)
}

/// Parses text fields as their columns' types. Text that does not parse is
/// kept as text; absent trailing fields are Missing.
pub(crate) fn typed_row(schema: &Schema, fields: &[String]) -> Row {
    schema
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| match fields.get(idx) {
            Some(text) => parse_as(text, column.column_type()).unwrap_or_else(|_| CellValue::Text(text.clone())),
            None => CellValue::Missing,
        })
        .collect()
}

/// Record source over parsed CSV text
#[derive(Debug)]
pub struct CsvSource {
    name: String,
    schema: Schema,
    rows: std::vec::IntoIter<Vec<String>>,
    record: usize,
}

impl CsvSource {
    pub fn from_text(name: impl Into<String>, text: &str, options: &CsvImportOptions) -> Result<CsvSource, LoadError> {
        let delimiter = options.delimiter.unwrap_or_else(|| detect_delimiter(text));
        let mut rows = parse_csv_rows(text, delimiter);
        if rows.is_empty() {
            return Err(LoadError::Csv("no rows found".to_string()));
        }

        let header = if options.has_header {
            rows.remove(0)
        } else {
            let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
            (1..=width).map(|i| format!("FIELD{}", i)).collect()
        };
        let names = unique_field_names(header.iter().map(|s| s.as_str()));
        let schema = infer_schema(names, &rows)?;
        debug!(
            "Parsed CSV with delimiter {:?}: {} columns, {} rows",
            delimiter,
            schema.len(),
            rows.len()
        );

        Ok(CsvSource {
            name: name.into(),
            schema,
            rows: rows.into_iter(),
            record: 0,
        })
    }

    /// Reads a CSV file, decoding it with the first code page that fits
    pub fn open(path: &Path, options: &CsvImportOptions) -> Result<CsvSource, LoadError> {
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
        CsvSource::from_text(name, text.trim_start_matches('\u{feff}'), options)
    }
}

impl RecordSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_record(&mut self) -> Option<Result<Row, LoadError>> {
        let fields = self.rows.next()?;
        let record = self.record;
        self.record += 1;

        let width = self.schema.len();
        if fields.len() > width {
            return Some(Err(LoadError::RowArity {
                record,
                expected: width,
                got: fields.len(),
            }));
        }

        Some(Ok(typed_row(&self.schema, &fields)))
    }
}

/// Reads and loads a CSV file in one step
pub fn import_csv(path: &Path, options: &CsvImportOptions) -> Result<Table, LoadError> {
    let mut source = CsvSource::open(path, options)?;
    let table = Table::load(&mut source)?;
    info!("Imported {} rows from {}", table.len(), path.display());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_csv_rows_quotes_and_newlines() {
        let rows = parse_csv_rows("a,b\r\n\"x, \"\"y\"\"\",\"multi\nline\"\n\n1,2", ',');
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["x, \"y\"".to_string(), "multi\nline".to_string()],
                vec!["1".to_string(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a\tb\n1\t2"), '\t');
        assert_eq!(detect_delimiter("\"x;y\",b|c|d\n"), '|');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_unique_field_names() {
        let names = unique_field_names(["Name", "name", "NAME ", "", "?"]);
        assert_eq!(names, vec!["NAME", "NAME_2", "NAME_3", "FIELD", "FIELD_2"]);

        let long = unique_field_names(["description1", "description2"]);
        assert_eq!(long, vec!["DESCRIPTIO", "DESCRIPT_2"]);
    }

    #[test]
    fn test_type_inference_and_widths() {
        let csv = "id,price,active,joined,note\n1,2.5,true,2024-01-31,short\n2,3,false,,a longer note\n";
        let mut source = CsvSource::from_text("t", csv, &CsvImportOptions::default()).unwrap();
        let table = Table::load(&mut source).unwrap();

        let cols = table.columns();
        assert_eq!((cols[0].column_type(), cols[0].length(), cols[0].decimals()), (ColumnType::Integer, 12, 0));
        assert_eq!((cols[1].column_type(), cols[1].length(), cols[1].decimals()), (ColumnType::Decimal, 12, 2));
        assert_eq!(cols[2].column_type(), ColumnType::Boolean);
        assert_eq!(cols[3].column_type(), ColumnType::Date);
        assert_eq!((cols[4].column_type(), cols[4].length()), (ColumnType::Text, 13));

        assert_eq!(table.get_value(1, "PRICE").unwrap(), &CellValue::Decimal(3.0));
        assert_eq!(
            table.get_value(0, "JOINED").unwrap(),
            &CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );
        assert_eq!(table.get_value(1, "JOINED").unwrap(), &CellValue::Missing);
        assert!(!table.is_modified());
    }

    #[test]
    fn test_without_header() {
        let options = CsvImportOptions {
            delimiter: Some(','),
            has_header: false,
        };
        let mut source = CsvSource::from_text("t", "a,1\nb\n", &options).unwrap();
        let table = Table::load(&mut source).unwrap();

        assert_eq!(table.schema().get_column_names(), vec!["FIELD1", "FIELD2"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_value(1, "FIELD2").unwrap(), &CellValue::Missing);
    }

    #[test]
    fn test_too_many_fields() {
        let mut source = CsvSource::from_text("t", "a,b\n1,2,3\n", &CsvImportOptions::default()).unwrap();
        assert!(matches!(
            Table::load(&mut source),
            Err(LoadError::RowArity { record: 0, expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            CsvSource::from_text("t", "\n\n", &CsvImportOptions::default()),
            Err(LoadError::Csv(_))
        ));
    }

    #[test]
    fn test_import_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.csv");
        // Latin-1 encoded "José"
        std::fs::write(&path, b"NAME,QTY\nJos\xe9,4\n").unwrap();

        let table = import_csv(&path, &CsvImportOptions::default()).unwrap();
        assert_eq!(table.name(), "clients");
        assert_eq!(table.get_value(0, "NAME").unwrap(), &CellValue::from("José"));

        assert!(matches!(
            import_csv(&dir.path().join("absent.csv"), &CsvImportOptions::default()),
            Err(LoadError::FileNotFound(_))
        ));
    }
}

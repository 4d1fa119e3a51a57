/// DBF file access
///
/// Header inspection is done here directly (the field descriptor table
/// carries decimal counts that the record reader does not expose). Reading
/// and writing records goes through the `dbase` crate.
///
/// Layout of the parts touched directly:
///
/// | offset | size | meaning                               |
/// |--------|------|---------------------------------------|
/// | 0      | 1    | version                               |
/// | 1      | 3    | last update (YY since 1900, MM, DD)   |
/// | 4      | 4    | record count, LE u32                  |
/// | 8      | 2    | header length, LE u16                 |
/// | 10     | 2    | record length, LE u16                 |
/// | 29     | 1    | language driver (code page mark)      |
/// | 32     | 32*n | field descriptors, then 0x0D          |
///
/// Text is decoded and encoded in the table's code page, never as UTF-8
/// unless the file says so.

use crate::codepage::{detect_codepage, Codepage};
use crate::column::{CellValue, Column, ColumnType};
use crate::error::{LoadError, SaveError};
use crate::persist::{FieldData, FieldKind, FieldSpec, TableFileWriter};
use crate::table::{RecordSource, Row, Schema};
use chrono::{Datelike, NaiveDate};
use dbase::encoding::LossyCodePage;
use dbase::yore::code_pages::{CP1252, CP437};
use dbase::{FieldName, FieldValue, TableWriterBuilder, Unicode, UnicodeLossy};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Size of the fixed file header and of each field descriptor
pub const DBF_BLOCK_SIZE: usize = 32;

/// Byte that terminates the field descriptor table
pub const FIELD_TERMINATOR: u8 = 0x0D;

/// Offset of the language driver byte
pub const LANGUAGE_DRIVER_OFFSET: usize = 29;

/// Declared header length of a DBF image.
///
/// Fails if the image is shorter than the fixed header, or if the declared
/// length is smaller than the fixed header or larger than the image.
pub fn header_length(bytes: &[u8]) -> Result<usize, String> {
    if bytes.len() < DBF_BLOCK_SIZE {
        return Err("too short".to_string());
    }
    let declared = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    if declared < DBF_BLOCK_SIZE {
        return Err(format!("header length {} is smaller than {}", declared, DBF_BLOCK_SIZE));
    }
    if declared > bytes.len() {
        return Err(format!(
            "header length {} exceeds file size {}",
            declared,
            bytes.len()
        ));
    }
    Ok(declared)
}

/// Returns true if `path` has a `.dbf` extension (any case)
pub fn is_dbf_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("dbf"))
        .unwrap_or(false)
}

/// One entry of the field descriptor table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Type tag: C, N, F, L, D, M, I, B, O, Y, T, ...
    pub field_type: char,
    pub length: u8,
    pub decimals: u8,
}

impl FieldDescriptor {
    /// Semantic column type for this field
    pub fn column_type(&self) -> ColumnType {
        match self.field_type.to_ascii_uppercase() {
            'N' | 'F' if self.decimals == 0 => ColumnType::Integer,
            'N' | 'F' | 'B' | 'O' | 'Y' => ColumnType::Decimal,
            'I' | '+' => ColumnType::Integer,
            'L' => ColumnType::Boolean,
            'D' => ColumnType::Date,
            _ => ColumnType::Text,
        }
    }

    pub fn to_column(&self) -> Column {
        Column::with_width(self.name.clone(), self.column_type(), self.length, self.decimals)
    }
}

/// Parsed DBF file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfHeader {
    pub version: u8,
    pub last_update: Option<NaiveDate>,
    pub record_count: u32,
    pub header_length: u16,
    pub record_length: u16,
    pub language_driver: u8,
    pub fields: Vec<FieldDescriptor>,
}

impl DbfHeader {
    /// Parses the header at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<DbfHeader, String> {
        let header_len = header_length(bytes)?;
        let last_update = NaiveDate::from_ymd_opt(1900 + bytes[1] as i32, bytes[2] as u32, bytes[3] as u32);

        let mut fields = Vec::new();
        let mut offset = DBF_BLOCK_SIZE;
        while offset + DBF_BLOCK_SIZE <= header_len && bytes[offset] != FIELD_TERMINATOR {
            let raw = &bytes[offset..offset + DBF_BLOCK_SIZE];
            let name_end = raw[..11].iter().position(|&b| b == 0).unwrap_or(11);
            // Field names are ASCII in practice; map bytes 1:1 so nothing is lost
            let name: String = raw[..name_end].iter().map(|&b| b as char).collect::<String>().trim().to_string();
            fields.push(FieldDescriptor {
                name,
                field_type: raw[11] as char,
                length: raw[16],
                decimals: raw[17],
            });
            offset += DBF_BLOCK_SIZE;
        }

        Ok(DbfHeader {
            version: bytes[0],
            last_update,
            record_count: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            header_length: header_len as u16,
            record_length: u16::from_le_bytes([bytes[10], bytes[11]]),
            language_driver: bytes[LANGUAGE_DRIVER_OFFSET],
            fields,
        })
    }

    /// Code page named by the language driver byte, if it names one we handle
    pub fn codepage(&self) -> Option<Codepage> {
        Codepage::from_language_driver(self.language_driver)
    }

    /// Reads only the header portion of the file at `path`
    pub fn read(path: &Path) -> Result<DbfHeader, LoadError> {
        if !path.exists() {
            return Err(LoadError::FileNotFound(path.to_path_buf()));
        }
        let mut file = File::open(path)?;
        let mut fixed = [0u8; DBF_BLOCK_SIZE];
        file.read_exact(&mut fixed)
            .map_err(|_| LoadError::InvalidHeader("too short".to_string()))?;

        let declared = u16::from_le_bytes([fixed[8], fixed[9]]) as usize;
        let mut bytes = fixed.to_vec();
        if declared > DBF_BLOCK_SIZE {
            let mut rest = vec![0u8; declared - DBF_BLOCK_SIZE];
            file.read_exact(&mut rest).map_err(|_| {
                LoadError::InvalidHeader(format!("header length {} exceeds file size", declared))
            })?;
            bytes.extend_from_slice(&rest);
        }
        DbfHeader::parse(&bytes).map_err(LoadError::InvalidHeader)
    }

    /// Schema described by the field descriptors
    pub fn schema(&self) -> Result<Schema, LoadError> {
        Ok(Schema::try_new(self.fields.iter().map(|f| f.to_column()).collect())?)
    }

    /// Plain-text structure listing of the file
    pub fn structure_report(&self, title: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("Structure of {}\n", title));
        out.push_str(&format!(
            "Version: 0x{:02X}  Records: {}  Header: {} bytes  Record: {} bytes\n",
            self.version, self.record_count, self.header_length, self.record_length
        ));
        if let Some(date) = self.last_update {
            out.push_str(&format!("Last update: {}\n", date.format("%Y-%m-%d")));
        }
        match self.codepage() {
            Some(cp) => out.push_str(&format!("Code page: {} (0x{:02X})\n", cp, self.language_driver)),
            None => out.push_str(&format!("Code page: unmarked (0x{:02X})\n", self.language_driver)),
        }
        out.push('\n');
        out.push_str(&format!("{:<11} {:<4} {:>6} {:>8}\n", "Name", "Type", "Length", "Decimals"));
        for field in &self.fields {
            out.push_str(&format!(
                "{:<11} {:<4} {:>6} {:>8}\n",
                field.name, field.field_type, field.length, field.decimals
            ));
        }
        out.push_str(&format!("\nTotal fields: {}\n", self.fields.len()));
        out
    }
}

/// Picks the code page for the records of a DBF image.
///
/// A recognised language driver byte wins. Otherwise pure ASCII data takes
/// `fallback`, and anything else is detected from the bytes.
pub fn resolve_codepage(header: &DbfHeader, bytes: &[u8], fallback: Codepage) -> Codepage {
    if let Some(cp) = header.codepage() {
        return cp;
    }
    let data = bytes.get(header.header_length as usize..).unwrap_or(&[]);
    if data.is_ascii() {
        fallback
    } else {
        detect_codepage(data)
    }
}

/// Record source over a DBF file
pub struct DbfSource {
    name: String,
    header: DbfHeader,
    schema: Schema,
    codepage: Codepage,
    records: std::vec::IntoIter<dbase::Record>,
}

impl DbfSource {
    /// Opens `path` and reads all of its records.
    ///
    /// `fallback` is the code page for unmarked files whose text is plain ASCII.
    pub fn open(path: &Path, fallback: Codepage) -> Result<DbfSource, LoadError> {
        if !path.exists() {
            return Err(LoadError::FileNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let header = DbfHeader::parse(&bytes).map_err(LoadError::InvalidHeader)?;
        let schema = header.schema()?;

        let codepage = resolve_codepage(&header, &bytes, fallback).for_records();
        let data = bytes.get(header.header_length as usize..).unwrap_or(&[]);
        if let Err(e) = codepage.decode(data) {
            warn!("{} is not clean {}: {}; unmappable bytes read as U+FFFD", path.display(), codepage, e);
        }

        let mut reader = match codepage {
            Codepage::Utf8 => dbase::Reader::from_path_with_encoding(path, UnicodeLossy)?,
            Codepage::Cp437 => dbase::Reader::from_path_with_encoding(path, LossyCodePage(CP437))?,
            Codepage::Cp1252 | Codepage::Latin1 => {
                dbase::Reader::from_path_with_encoding(path, LossyCodePage(CP1252))?
            }
        };
        let records = reader.iter_records().collect::<Result<Vec<_>, _>>()?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string());
        info!(
            "Opened {} ({} records, {} fields, {})",
            path.display(),
            records.len(),
            schema.len(),
            codepage
        );

        Ok(DbfSource {
            name,
            header,
            schema,
            codepage,
            records: records.into_iter(),
        })
    }

    pub fn header(&self) -> &DbfHeader {
        &self.header
    }
}

impl RecordSource for DbfSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn codepage(&self) -> Option<Codepage> {
        Some(self.codepage)
    }

    fn next_record(&mut self) -> Option<Result<Row, LoadError>> {
        let record = self.records.next()?;
        let mut values: HashMap<String, FieldValue> = record.into_iter().collect();
        let row = self
            .schema
            .columns()
            .iter()
            .map(|column| {
                values
                    .remove(column.name())
                    .map(|v| cell_from_field_value(v, column.column_type()))
                    .unwrap_or(CellValue::Missing)
            })
            .collect();
        Some(Ok(row))
    }
}

/// Map a value read by `dbase` onto the column's type
fn cell_from_field_value(value: FieldValue, column_type: ColumnType) -> CellValue {
    let number = |n: f64| {
        if column_type == ColumnType::Integer && n.fract() == 0.0 {
            CellValue::Integer(n as i64)
        } else {
            CellValue::Decimal(n)
        }
    };

    match value {
        FieldValue::Character(Some(s)) => CellValue::Text(s.trim_end().to_string()),
        FieldValue::Character(None) => CellValue::Missing,
        FieldValue::Numeric(Some(n)) => number(n),
        FieldValue::Numeric(None) => CellValue::Missing,
        FieldValue::Float(Some(f)) => number(f as f64),
        FieldValue::Float(None) => CellValue::Missing,
        FieldValue::Logical(Some(b)) => CellValue::Boolean(b),
        FieldValue::Logical(None) => CellValue::Missing,
        FieldValue::Date(Some(d)) => NaiveDate::from_ymd_opt(d.year() as i32, d.month() as u32, d.day() as u32)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Missing),
        FieldValue::Date(None) => CellValue::Missing,
        FieldValue::Integer(i) => CellValue::Integer(i as i64),
        FieldValue::Double(f) => CellValue::Decimal(f),
        FieldValue::Currency(f) => CellValue::Decimal(f),
        FieldValue::Memo(s) => CellValue::Text(s),
        FieldValue::DateTime(_) => {
            debug!("DateTime fields are not supported; reading as missing");
            CellValue::Missing
        }
    }
}

/// Writes tables as DBF files through `dbase`
#[derive(Debug, Default, Clone, Copy)]
pub struct DbfFileWriter;

impl TableFileWriter for DbfFileWriter {
    fn write_records(
        &self,
        fields: &[FieldSpec],
        records: &[Vec<FieldData>],
        codepage: Codepage,
        dest: &mut File,
    ) -> Result<(), SaveError> {
        // Strict encodings: persist has already checked every value encodes
        let mut builder = match codepage {
            Codepage::Utf8 => TableWriterBuilder::with_encoding(Unicode),
            Codepage::Cp437 => TableWriterBuilder::with_encoding(CP437),
            Codepage::Cp1252 | Codepage::Latin1 => TableWriterBuilder::with_encoding(CP1252),
        };
        for spec in fields {
            let name = FieldName::try_from(spec.name.as_str()).map_err(|e| SaveError::SchemaDerivationError {
                column: spec.name.clone(),
                reason: format!("{:?}", e),
            })?;
            builder = match spec.kind {
                FieldKind::Character => builder.add_character_field(name, spec.length),
                FieldKind::Numeric => builder.add_numeric_field(name, spec.length, spec.decimals),
                FieldKind::Logical => builder.add_logical_field(name),
                FieldKind::Date => builder.add_date_field(name),
            };
        }

        let dbase_records: Vec<dbase::Record> = records
            .iter()
            .map(|values| {
                let mut record = dbase::Record::default();
                for (spec, value) in fields.iter().zip(values) {
                    record.insert(spec.name.clone(), to_field_value(value));
                }
                record
            })
            .collect();

        let mut out = BufWriter::new(dest);
        let mut writer = builder.build_with_dest(&mut out);
        for record in &dbase_records {
            writer.write_record(record)?;
        }
        // Closing rewrites the header; dropping would swallow its error
        writer.close()?;
        drop(writer);
        out.flush()?;
        debug!(
            "Wrote {} records with {} fields in {}",
            dbase_records.len(),
            fields.len(),
            codepage
        );
        Ok(())
    }
}

fn to_field_value(value: &FieldData) -> FieldValue {
    match value {
        FieldData::Character(s) => FieldValue::Character(Some(s.clone())),
        FieldData::Numeric(n) => FieldValue::Numeric(*n),
        FieldData::Logical(b) => FieldValue::Logical(*b),
        FieldData::Date(d) => FieldValue::Date(d.map(|d| dbase::Date::new(d.day(), d.month(), d.year() as u32))),
    }
}

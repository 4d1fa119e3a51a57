/// Column and cell value types
///
/// A Column describes one field of a table: its name, its semantic type and,
/// for the fixed-width DBF layout, its length and decimal count. Cell values
/// are a tagged union that carries its own type through sort, compare and
/// serialize paths.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
}

impl ColumnType {
    /// Default DBF field length for a column of this type.
    pub fn default_length(&self) -> u8 {
        match self {
            ColumnType::Text => 254,
            ColumnType::Integer => 12,
            ColumnType::Decimal => 12,
            ColumnType::Boolean => 1,
            ColumnType::Date => 8,
        }
    }

    /// Default decimal count for a column of this type.
    pub fn default_decimals(&self) -> u8 {
        match self {
            ColumnType::Decimal => 2,
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    Missing,
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(v) => Some(*v as f64),
            CellValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the type this value naturally belongs to, or None for Missing.
    pub fn value_type(&self) -> Option<ColumnType> {
        match self {
            CellValue::Text(_) => Some(ColumnType::Text),
            CellValue::Integer(_) => Some(ColumnType::Integer),
            CellValue::Decimal(_) => Some(ColumnType::Decimal),
            CellValue::Boolean(_) => Some(ColumnType::Boolean),
            CellValue::Date(_) => Some(ColumnType::Date),
            CellValue::Missing => None,
        }
    }

    /// Converts to a JSON value. Missing and non-finite decimals become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
            CellValue::Integer(n) => serde_json::Value::Number((*n).into()),
            CellValue::Decimal(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Boolean(b) => serde_json::Value::Bool(*b),
            CellValue::Date(d) => serde_json::Value::String(format_date(*d)),
            CellValue::Missing => serde_json::Value::Null,
        }
    }
}

/// Cells render the way the grid shows them; Missing renders empty.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Integer(n) => write!(f, "{}", n),
            CellValue::Decimal(v) => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            CellValue::Boolean(b) => f.write_str(if *b { "True" } else { "False" }),
            CellValue::Date(d) => f.write_str(&format_date(*d)),
            CellValue::Missing => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Decimal(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

/// Column metadata
///
/// `length` and `decimals` describe the DBF field the column was read from
/// (or will be written to). For text columns `length` is the maximum width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    length: u8,
    decimals: u8,
}

impl Column {
    /// Creates a column with the type's default width.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Column {
            name: name.into(),
            column_type,
            length: column_type.default_length(),
            decimals: column_type.default_decimals(),
        }
    }

    pub fn with_width(name: impl Into<String>, column_type: ColumnType, length: u8, decimals: u8) -> Self {
        Column {
            name: name.into(),
            column_type,
            length,
            decimals,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

/// Format a date as ISO 8601 (YYYY-MM-DD)
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a date in ISO form (YYYY-MM-DD) or DBF storage form (YYYYMMDD)
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .ok()
}

/// Parse a boolean in any of the spellings DBF logical fields use
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_uppercase().as_str() {
        "T" | "TRUE" | "Y" | "YES" | "1" => Some(true),
        "F" | "FALSE" | "N" | "NO" | "0" => Some(false),
        _ => None,
    }
}

/// Parse text into a value of the given column type.
///
/// Blank text becomes Missing for every type except Text.
pub fn parse_as(text: &str, column_type: ColumnType) -> Result<CellValue, String> {
    let trimmed = text.trim();
    if column_type == ColumnType::Text {
        return Ok(CellValue::Text(text.to_string()));
    }
    if trimmed.is_empty() {
        return Ok(CellValue::Missing);
    }

    match column_type {
        ColumnType::Integer => trimmed
            .parse::<i64>()
            .map(CellValue::Integer)
            .or_else(|_| {
                // "12.0" is still an integer
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| CellValue::Integer(f as i64))
                    .ok_or(())
            })
            .map_err(|_| format!("Cannot parse '{}' as integer", trimmed)),
        ColumnType::Decimal => trimmed
            .parse::<f64>()
            .map(CellValue::Decimal)
            .map_err(|_| format!("Cannot parse '{}' as decimal", trimmed)),
        ColumnType::Boolean => parse_bool(trimmed)
            .map(CellValue::Boolean)
            .ok_or_else(|| format!("Cannot parse '{}' as boolean", trimmed)),
        ColumnType::Date => parse_date(trimmed)
            .map(CellValue::Date)
            .ok_or_else(|| format!("Cannot parse '{}' as date (expected YYYY-MM-DD)", trimmed)),
        ColumnType::Text => Ok(CellValue::Text(text.to_string())),
    }
}

/// Coerce a value to the column type, parsing text if needed.
///
/// Values that already have the right type pass through; integers widen
/// into decimal columns.
pub fn coerce(value: &CellValue, column_type: ColumnType) -> Result<CellValue, String> {
    match (value, column_type) {
        (CellValue::Missing, _) => Ok(CellValue::Missing),
        (CellValue::Text(s), ColumnType::Text) => Ok(CellValue::Text(s.clone())),
        (CellValue::Text(s), t) => parse_as(s, t),
        (CellValue::Integer(n), ColumnType::Decimal) => Ok(CellValue::Decimal(*n as f64)),
        (CellValue::Decimal(f), ColumnType::Integer) if f.fract() == 0.0 => Ok(CellValue::Integer(*f as i64)),
        (v, ColumnType::Text) => Ok(CellValue::Text(v.to_string())),
        (v, t) if v.value_type() == Some(t) => Ok(v.clone()),
        (v, t) => Err(format!("Cannot store {} value '{}' in a {} column", v.value_type().map(|vt| vt.name()).unwrap_or("missing"), v, t)),
    }
}

/// Infer the type of a single text value
pub fn infer_type(value: &str) -> Option<ColumnType> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return None;
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return Some(ColumnType::Boolean);
    }
    if trimmed.len() == 10 && trimmed.chars().nth(4) == Some('-') && parse_date(trimmed).is_some() {
        return Some(ColumnType::Date);
    }
    if trimmed.parse::<i64>().is_ok() {
        return Some(ColumnType::Integer);
    }
    if trimmed.parse::<f64>().is_ok() {
        return Some(ColumnType::Decimal);
    }
    Some(ColumnType::Text)
}

/// Infer one type for a whole column of text values.
///
/// Blank values are ignored. Integers and decimals widen to decimal; any
/// other disagreement falls back to text.
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut inferred: Option<ColumnType> = None;
    for value in values {
        let Some(t) = infer_type(value) else { continue };
        inferred = Some(match (inferred, t) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::Integer), ColumnType::Decimal)
            | (Some(ColumnType::Decimal), ColumnType::Integer) => ColumnType::Decimal,
            _ => return ColumnType::Text,
        });
    }
    inferred.unwrap_or(ColumnType::Text)
}

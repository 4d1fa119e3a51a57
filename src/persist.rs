/// Persistence Writer
///
/// Saving re-derives a DBF field layout from the table's columns and the
/// values they currently hold, converts every cell to its field's storage
/// form, and hands the result to a `TableFileWriter`. The target is backed
/// up first and replaced atomically, so a failed save never leaves a
/// half-written file behind.
///
/// Edits are permissive (any value can be stored in any cell) and saving is
/// strict: text that does not parse as the column's type, or that the
/// table's code page cannot represent, fails the save with
/// `SaveError::InvalidValue` before anything is touched on disk. Character
/// widths are byte counts in that code page.

use crate::backup::{create_backup, write_atomically};
use crate::codepage::Codepage;
use crate::column::{coerce, CellValue, Column, ColumnType};
use crate::error::SaveError;
use crate::table::Table;
use chrono::NaiveDate;
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Longest character field a DBF can hold
pub const MAX_CHARACTER_LENGTH: u8 = 254;

/// Longest numeric field, in characters
pub const MAX_NUMERIC_LENGTH: u8 = 20;

/// Longest field name, in bytes
pub const MAX_FIELD_NAME_LENGTH: usize = 10;

/// DBF field kinds the writer produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Character,
    Numeric,
    Logical,
    Date,
}

impl FieldKind {
    pub fn tag(&self) -> char {
        match self {
            FieldKind::Character => 'C',
            FieldKind::Numeric => 'N',
            FieldKind::Logical => 'L',
            FieldKind::Date => 'D',
        }
    }
}

/// A derived field descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub length: u8,
    pub decimals: u8,
}

impl std::fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FieldKind::Character => write!(f, "{} C({})", self.name, self.length),
            FieldKind::Numeric => write!(f, "{} N({},{})", self.name, self.length, self.decimals),
            FieldKind::Logical | FieldKind::Date => write!(f, "{} {}", self.name, self.kind.tag()),
        }
    }
}

impl FieldSpec {
    /// Column that saves back as this field
    pub fn to_column(&self) -> Column {
        match self.kind {
            FieldKind::Character => Column::with_width(self.name.clone(), ColumnType::Text, self.length, 0),
            FieldKind::Numeric if self.decimals == 0 => {
                Column::with_width(self.name.clone(), ColumnType::Integer, self.length, 0)
            }
            FieldKind::Numeric => Column::with_width(self.name.clone(), ColumnType::Decimal, self.length, self.decimals),
            FieldKind::Logical => Column::new(self.name.clone(), ColumnType::Boolean),
            FieldKind::Date => Column::new(self.name.clone(), ColumnType::Date),
        }
    }

    /// Parses a `;`-separated list such as `"ID N(10,0); NAME C(30)"`
    pub fn parse_list(text: &str) -> Result<Vec<FieldSpec>, SaveError> {
        text.split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<FieldSpec>())
            .collect()
    }
}

impl std::str::FromStr for FieldSpec {
    type Err = SaveError;

    /// Accepts the form `Display` writes: `NAME C(30)`, `QTY N(4,0)`,
    /// `QTY N(4)`, `ACTIVE L`, `SINCE D`. Names are upper-cased.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (name, def) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(def), None) => (name.to_uppercase(), def.to_uppercase()),
            _ => {
                return Err(SaveError::SchemaDerivationError {
                    column: s.trim().to_string(),
                    reason: "expected '<NAME> <TYPE>(<LENGTH>[,<DECIMALS>])'".to_string(),
                })
            }
        };
        let bad = |reason: &str| SaveError::SchemaDerivationError {
            column: name.clone(),
            reason: format!("{} in '{}'", reason, def),
        };

        let (tag, args) = match def.find('(') {
            Some(open) if def.ends_with(')') => (&def[..open], Some(&def[open + 1..def.len() - 1])),
            Some(_) => return Err(bad("unbalanced parentheses")),
            None => (def.as_str(), None),
        };
        let numbers = match args {
            Some(args) => args
                .split(',')
                .map(|n| n.trim().parse::<u8>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| bad("bad width"))?,
            None => Vec::new(),
        };

        let (kind, length, decimals) = match (tag, numbers.as_slice()) {
            ("C", [length]) => (FieldKind::Character, *length, 0),
            ("N", [length]) => (FieldKind::Numeric, *length, 0),
            ("N", [length, decimals]) => (FieldKind::Numeric, *length, *decimals),
            ("L", []) => (FieldKind::Logical, 1, 0),
            ("D", []) => (FieldKind::Date, 8, 0),
            ("C" | "N" | "L" | "D", _) => return Err(bad("wrong number of widths")),
            _ => return Err(bad("unknown field type")),
        };
        Ok(FieldSpec {
            name,
            kind,
            length,
            decimals,
        })
    }
}

/// A cell in its storage form
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Character(String),
    Numeric(Option<f64>),
    Logical(Option<bool>),
    Date(Option<NaiveDate>),
}

/// Serializes prepared records into a file.
///
/// `dest` is a fresh temporary file; implementations only write to it. Text
/// is stored in `codepage`.
pub trait TableFileWriter {
    fn write_records(
        &self,
        fields: &[FieldSpec],
        records: &[Vec<FieldData>],
        codepage: Codepage,
        dest: &mut File,
    ) -> Result<(), SaveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub backup: bool,
    /// Code page for tables that did not come from a DBF file
    pub codepage: Codepage,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            backup: true,
            codepage: Codepage::Cp1252,
        }
    }
}

/// Outcome of a successful save
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub records: usize,
    pub fields: Vec<FieldSpec>,
    pub codepage: Codepage,
}

fn derivation_error(column: &Column, reason: impl Into<String>) -> SaveError {
    SaveError::SchemaDerivationError {
        column: column.name().to_string(),
        reason: reason.into(),
    }
}

fn validate_field_name(column: &Column) -> Result<(), SaveError> {
    let name = column.name();
    if name.is_empty() {
        return Err(derivation_error(column, "empty field name"));
    }
    if name.len() > MAX_FIELD_NAME_LENGTH {
        return Err(derivation_error(
            column,
            format!("field name longer than {} characters", MAX_FIELD_NAME_LENGTH),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(derivation_error(column, "field name must be ASCII letters, digits or '_'"));
    }
    Ok(())
}

/// Converts every cell to its column's storage form.
///
/// Missing becomes the type's empty value: an empty string for character
/// fields and a blank for the others. Text must be representable in
/// `codepage`.
pub fn prepare_records(table: &Table, codepage: Codepage) -> Result<Vec<Vec<FieldData>>, SaveError> {
    let columns = table.columns();
    table
        .iter_rows()
        .enumerate()
        .map(|(row_idx, row)| {
            columns
                .iter()
                .zip(row.iter())
                .map(|(column, value)| to_field_data(row_idx, column, value, codepage))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect()
}

fn to_field_data(row: usize, column: &Column, value: &CellValue, codepage: Codepage) -> Result<FieldData, SaveError> {
    let invalid = |reason: String| SaveError::InvalidValue {
        row,
        column: column.name().to_string(),
        value: value.to_string(),
        reason,
    };
    let typed = coerce(value, column.column_type()).map_err(invalid)?;

    Ok(match (column.column_type(), typed) {
        (ColumnType::Text, CellValue::Missing) => FieldData::Character(String::new()),
        (ColumnType::Text, v) => {
            let text = v.to_string();
            codepage
                .encoded_len(&text)
                .map_err(|e| invalid(format!("not representable in {}: {}", codepage, e)))?;
            FieldData::Character(text)
        }
        (ColumnType::Integer | ColumnType::Decimal, v) => FieldData::Numeric(v.as_f64()),
        (ColumnType::Boolean, v) => FieldData::Logical(v.as_bool()),
        (ColumnType::Date, v) => FieldData::Date(v.as_date()),
    })
}

/// Derives one field descriptor per column.
///
/// Text maps to C(len), integer to N(len,0), decimal to N(len,dec), boolean
/// to L and date to D. Declared widths grow to fit the longest value held,
/// measured in bytes of `codepage`; a width the format cannot represent is
/// an error.
pub fn derive_field_specs(
    columns: &[Column],
    records: &[Vec<FieldData>],
    codepage: Codepage,
) -> Result<Vec<FieldSpec>, SaveError> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| -> Result<FieldSpec, SaveError> {
            validate_field_name(column)?;
            let values = records.iter().filter_map(|r| r.get(idx));

            match column.column_type() {
                ColumnType::Text => {
                    let observed = values
                        .filter_map(|v| match v {
                            FieldData::Character(s) => Some(codepage.encoded_len(s).unwrap_or(s.len())),
                            _ => None,
                        })
                        .max()
                        .unwrap_or(0);
                    let length = observed.max(column.length() as usize).max(1);
                    if length > MAX_CHARACTER_LENGTH as usize {
                        return Err(derivation_error(
                            column,
                            format!("text length {} bytes exceeds {}", length, MAX_CHARACTER_LENGTH),
                        ));
                    }
                    Ok(FieldSpec {
                        name: column.name().to_string(),
                        kind: FieldKind::Character,
                        length: length as u8,
                        decimals: 0,
                    })
                }
                ColumnType::Integer | ColumnType::Decimal => {
                    let decimals = if column.column_type() == ColumnType::Integer {
                        0
                    } else {
                        column.decimals()
                    };
                    let observed = values
                        .filter_map(|v| match v {
                            FieldData::Numeric(Some(n)) => Some(format!("{:.*}", decimals as usize, n).len()),
                            _ => None,
                        })
                        .max()
                        .unwrap_or(0);
                    let length = observed.max(column.length() as usize);
                    if length == 0 {
                        return Err(derivation_error(column, "numeric length must be positive"));
                    }
                    if length > MAX_NUMERIC_LENGTH as usize {
                        return Err(derivation_error(
                            column,
                            format!("numeric length {} exceeds {}", length, MAX_NUMERIC_LENGTH),
                        ));
                    }
                    if decimals > 0 && decimals as usize + 2 > length {
                        return Err(derivation_error(
                            column,
                            format!("{} decimals do not fit in length {}", decimals, length),
                        ));
                    }
                    Ok(FieldSpec {
                        name: column.name().to_string(),
                        kind: FieldKind::Numeric,
                        length: length as u8,
                        decimals,
                    })
                }
                ColumnType::Boolean => Ok(FieldSpec {
                    name: column.name().to_string(),
                    kind: FieldKind::Logical,
                    length: 1,
                    decimals: 0,
                }),
                ColumnType::Date => Ok(FieldSpec {
                    name: column.name().to_string(),
                    kind: FieldKind::Date,
                    length: 8,
                    decimals: 0,
                }),
            }
        })
        .collect()
}

/// Saves `table` to `path`.
///
/// Order of events: values are converted and the layout derived (nothing on
/// disk changes if either fails), the existing file is backed up, the new
/// file is written to a temporary file and renamed over `path`, and finally
/// the table's modified flag is cleared.
///
/// Text is written in the table's own code page, or `options.codepage` for
/// a table that has none yet; the table keeps it afterwards.
pub fn save_table(
    table: &mut Table,
    path: &Path,
    options: &SaveOptions,
    writer: &dyn TableFileWriter,
) -> Result<SaveReport, SaveError> {
    if table.is_read_only() {
        return Err(SaveError::ReadOnly(table.name().to_string()));
    }

    let codepage = table.codepage().unwrap_or(options.codepage).for_records();
    let records = prepare_records(table, codepage)?;
    let fields = derive_field_specs(table.columns(), &records, codepage)?;

    let backup = if options.backup && path.exists() {
        Some(create_backup(path).map_err(SaveError::Backup)?)
    } else {
        None
    };

    write_atomically(path, |file| writer.write_records(&fields, &records, codepage, file))?;
    table.set_codepage(Some(codepage));
    table.mark_saved();
    info!("Saved {} records to {} ({})", records.len(), path.display(), codepage);

    Ok(SaveReport {
        path: path.to_path_buf(),
        backup,
        records: records.len(),
        fields,
        codepage,
    })
}

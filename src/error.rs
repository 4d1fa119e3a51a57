/// Error types for every component of the crate.
///
/// Each component reports its own enum so callers can match on the failure
/// they care about; `SessionError` folds them together for the session API.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the encoding converter.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid DBF file: {0}")]
    InvalidHeader(String),

    #[error("Unknown code page '{0}'")]
    UnknownCodepage(String),

    #[error("Backup failed: {0}")]
    Backup(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of cell-level and row-level table operations.
#[derive(Debug, Error, PartialEq)]
pub enum CellError {
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Row index {index} out of range [0, {len})")]
    RowIndexOutOfRange { index: usize, len: usize },

    #[error("Row has {got} values, table has {expected} columns")]
    ArityMismatch { expected: usize, got: usize },

    #[error("Table '{0}' is read-only")]
    ReadOnly(String),
}

/// Failures while building a schema.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("Column name must not be empty")]
    EmptyColumnName,
}

/// Failures while loading a table from a record source.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid DBF header: {0}")]
    InvalidHeader(String),

    #[error("Record {record} has {got} values, schema has {expected} columns")]
    RowArity {
        record: usize,
        expected: usize,
        got: usize,
    },

    #[error("DBF read error: {0}")]
    Dbf(String),

    #[error("CSV import error: {0}")]
    Csv(String),

    #[error("XML import error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<dbase::Error> for LoadError {
    fn from(err: dbase::Error) -> Self {
        LoadError::Dbf(err.to_string())
    }
}

/// Failures of the query adapter.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Query does not reference the table '{0}'")]
    MissingTableReference(String),

    #[error("SQL error: {0}")]
    QuerySyntaxError(String),

    #[error("Statement returns no result set")]
    NoResultSet,

    #[error("Query backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Failures of the find/replace engine.
#[derive(Debug, Error, PartialEq)]
pub enum FindError {
    #[error("Find text is empty")]
    EmptyFindText,

    #[error("No active match")]
    NoActiveMatch,

    #[error("Cannot replace in a read-only table")]
    ReadOnlyTarget,

    #[error("Invalid find pattern: {0}")]
    Pattern(String),

    #[error(transparent)]
    Cell(#[from] CellError),
}

/// Failures of the persistence writer.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Cannot derive field for column '{column}': {reason}")]
    SchemaDerivationError { column: String, reason: String },

    #[error("Invalid value '{value}' in column '{column}' at row {row}: {reason}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
        reason: String,
    },

    #[error("Backup failed: {0}")]
    Backup(#[source] std::io::Error),

    #[error("Write failed: {0}")]
    WriteError(String),

    #[error("Table '{0}' is read-only")]
    ReadOnly(String),
}

impl From<dbase::Error> for SaveError {
    fn from(err: dbase::Error) -> Self {
        SaveError::WriteError(err.to_string())
    }
}

impl From<std::io::Error> for SaveError {
    fn from(err: std::io::Error) -> Self {
        SaveError::WriteError(err.to_string())
    }
}

/// Failures while reading or writing settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// Any failure surfaced through a `Session`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Cell(#[from] CellError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error(transparent)]
    Find(#[from] FindError),

    #[error("Session for '{0}' is read-only")]
    ReadOnly(String),

    #[error("'{0}' is not a DBF file; save it under a .dbf name")]
    NotDbf(PathBuf),

    #[error("'{0}' already exists")]
    AlreadyExists(PathBuf),

    #[error("XML export failed: {0}")]
    Export(#[source] std::io::Error),
}

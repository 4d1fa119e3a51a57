/// Table Implementation
///
/// A Table is an ordered list of typed columns and an ordered list of rows.
/// It provides paging, in-place sorting, cell edits, row inserts and batch
/// deletes, and records every mutation in its changeset.
///
/// # Examples
///
/// ```
/// use dbf_commander::{CellValue, Column, ColumnType, Schema, Table};
///
/// let schema = Schema::try_new(vec![
///     Column::new("ID", ColumnType::Integer),
///     Column::with_width("NAME", ColumnType::Text, 20, 0),
/// ]).unwrap();
///
/// let mut table = Table::new("users", schema);
/// table.insert_row(Some(vec![CellValue::Integer(1), CellValue::from("Alice")])).unwrap();
///
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.get_value(0, "NAME").unwrap().as_text(), Some("Alice"));
/// ```

use crate::changeset::{ChangeCursor, Changeset, TableChange};
use crate::codepage::Codepage;
use crate::column::{CellValue, Column, ColumnType};
use crate::error::{CellError, LoadError, SchemaError};
use crate::view::{compare_cells, page_range, total_pages};
use log::debug;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// One row: a value per column, in column order
pub type Row = Vec<CellValue>;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Schema definition: the ordered columns of a table.
///
/// Column names are unique ignoring case, since DBF field names are.
///
/// # Examples
///
/// ```
/// use dbf_commander::{Column, ColumnType, Schema};
///
/// let schema = Schema::try_new(vec![
///     Column::new("ID", ColumnType::Integer),
///     Column::new("EMAIL", ColumnType::Text),
/// ]).unwrap();
///
/// assert_eq!(schema.len(), 2);
/// assert_eq!(schema.get_column_index("email"), Some(1));
/// assert!(Schema::try_new(vec![
///     Column::new("A", ColumnType::Text),
///     Column::new("a", ColumnType::Text),
/// ]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn try_new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.name().trim().is_empty() {
                return Err(SchemaError::EmptyColumnName);
            }
            if !seen.insert(column.name().to_uppercase()) {
                return Err(SchemaError::DuplicateColumn(column.name().to_string()));
            }
        }
        Ok(Schema { columns })
    }

    /// Returns the number of columns in the schema.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Returns a list of all column names.
    pub fn get_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    /// Index of a column by name. An exact match wins over a case-insensitive one.
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name() == name)
            .or_else(|| self.columns.iter().position(|c| c.name().eq_ignore_ascii_case(name)))
    }

    pub fn get_column_type(&self, name: &str) -> Option<ColumnType> {
        self.get_column_index(name).map(|i| self.columns[i].column_type())
    }
}

/// One page of rows
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    pub rows: &'a [Row],
    /// Page actually returned, after clamping
    pub page_index: usize,
    pub total_pages: usize,
    /// Table index of `rows[0]`
    pub first_row: usize,
}

/// Something that yields a schema and then typed rows.
///
/// DBF files, in-memory data and CSV imports implement this; a Stata reader
/// plugs in the same way.
pub trait RecordSource {
    fn name(&self) -> &str;

    fn schema(&self) -> &Schema;

    /// Next row, or None when the source is exhausted
    fn next_record(&mut self) -> Option<Result<Row, LoadError>>;

    /// Whether tables loaded from this source may be edited
    fn read_only(&self) -> bool {
        false
    }

    /// Code page the records were stored in, for sources that have one
    fn codepage(&self) -> Option<Codepage> {
        None
    }
}

/// A record source over rows already in memory
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    schema: Schema,
    rows: std::vec::IntoIter<Row>,
    read_only: bool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, schema: Schema, rows: Vec<Row>) -> Self {
        MemorySource {
            name: name.into(),
            schema,
            rows: rows.into_iter(),
            read_only: false,
        }
    }

    /// Marks tables loaded from this source read-only
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_record(&mut self) -> Option<Result<Row, LoadError>> {
        self.rows.next().map(Ok)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

/// Options for CSV export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: char,
    pub include_header: bool,
    /// Quote every text field, not only those that need it
    pub quote_text: bool,
    pub skip_empty_rows: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: ',',
            include_header: true,
            quote_text: false,
            skip_empty_rows: false,
        }
    }
}

/// In-memory table
pub struct Table {
    id: u64,
    name: String,
    schema: Schema,
    rows: Vec<Row>,
    modified: bool,
    read_only: bool,
    /// Code page of the DBF file the rows came from or were last saved to
    codepage: Option<Codepage>,
    changeset: Changeset,
}

impl Table {
    /// Creates an empty table
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Table {
            id: NEXT_TABLE_ID.fetch_add(1, AtomicOrdering::Relaxed),
            name: name.into(),
            schema,
            rows: Vec::new(),
            modified: false,
            read_only: false,
            codepage: None,
            changeset: Changeset::new(),
        }
    }

    /// Creates a table from rows, checking that every row has one value per column
    pub fn with_rows(name: impl Into<String>, schema: Schema, rows: Vec<Row>) -> Result<Self, CellError> {
        let width = schema.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(CellError::ArityMismatch {
                expected: width,
                got: bad.len(),
            });
        }
        let mut table = Table::new(name, schema);
        table.rows = rows;
        Ok(table)
    }

    /// Eagerly pulls every row from `source`
    pub fn load<S: RecordSource + ?Sized>(source: &mut S) -> Result<Table, LoadError> {
        let schema = source.schema().clone();
        let width = schema.len();
        let mut rows = Vec::new();

        while let Some(record) = source.next_record() {
            let row = record?;
            if row.len() != width {
                return Err(LoadError::RowArity {
                    record: rows.len(),
                    expected: width,
                    got: row.len(),
                });
            }
            rows.push(row);
        }

        let mut table = Table::new(source.name(), schema);
        table.rows = rows;
        table.read_only = source.read_only();
        table.codepage = source.codepage();
        debug!("Loaded table '{}' with {} rows", table.name, table.rows.len());
        Ok(table)
    }

    /// Process-unique identity; tables built from the same data still differ
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn columns(&self) -> &[Column] {
        self.schema.columns()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn iter_rows(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn row(&self, index: usize) -> Result<&[CellValue], CellError> {
        self.rows
            .get(index)
            .map(|r| r.as_slice())
            .ok_or(CellError::RowIndexOutOfRange {
                index,
                len: self.rows.len(),
            })
    }

    pub fn get_value(&self, row: usize, column: &str) -> Result<&CellValue, CellError> {
        let col_idx = self.column_index(column)?;
        Ok(&self.row(row)?[col_idx])
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Clears the modified flag and the change history after a successful save
    pub fn mark_saved(&mut self) {
        self.modified = false;
        self.changeset.clear();
    }

    pub fn codepage(&self) -> Option<Codepage> {
        self.codepage
    }

    pub fn set_codepage(&mut self, codepage: Option<Codepage>) {
        self.codepage = codepage;
    }

    pub fn changeset(&self) -> &Changeset {
        &self.changeset
    }

    /// Drops change history before `cursor`, once whoever tracks this table has read it
    pub fn release_changes(&mut self, cursor: ChangeCursor) {
        self.changeset.release(cursor);
    }

    fn column_index(&self, column: &str) -> Result<usize, CellError> {
        self.schema
            .get_column_index(column)
            .ok_or_else(|| CellError::ColumnNotFound(column.to_string()))
    }

    fn ensure_writable(&self) -> Result<(), CellError> {
        if self.read_only {
            Err(CellError::ReadOnly(self.name.clone()))
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Paging and Sorting
    // ========================================================================

    /// Rows `[p*s, min((p+1)*s, len))`.
    ///
    /// A page index past the end clamps to the last page. An empty table has
    /// one empty page.
    pub fn page(&self, page_index: usize, page_size: usize) -> Page<'_> {
        let total = total_pages(self.rows.len(), page_size);
        let range = page_range(page_index, page_size, self.rows.len());
        Page {
            first_row: range.start,
            rows: &self.rows[range],
            page_index: page_index.min(total - 1),
            total_pages: total,
        }
    }

    /// Reorders rows in place by one column.
    ///
    /// Missing cells sort as the minimum. The sort is stable within a
    /// direction, so equal keys keep their relative order.
    pub fn sort(&mut self, column: &str, ascending: bool) -> Result<(), CellError> {
        let col_idx = self.column_index(column)?;
        self.rows.sort_by(|a, b| {
            let ord = compare_cells(&a[col_idx], &b[col_idx]);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        self.changeset.push(TableChange::Reordered);
        debug!(
            "Sorted '{}' by {} {}",
            self.name,
            column,
            if ascending { "ascending" } else { "descending" }
        );
        Ok(())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Stores `value` verbatim and returns the previous value.
    ///
    /// No type coercion happens here; text typed into a numeric column is
    /// kept as text and checked when the table is saved.
    pub fn set_cell(&mut self, row: usize, column: &str, value: CellValue) -> Result<CellValue, CellError> {
        self.ensure_writable()?;
        let col_idx = self.column_index(column)?;
        let len = self.rows.len();
        let cell = self
            .rows
            .get_mut(row)
            .map(|r| &mut r[col_idx])
            .ok_or(CellError::RowIndexOutOfRange { index: row, len })?;

        let old_value = std::mem::replace(cell, value.clone());
        self.modified = true;
        self.changeset.push(TableChange::CellUpdated {
            row,
            column: self.schema.columns()[col_idx].name().to_string(),
            new_value: value,
        });
        Ok(old_value)
    }

    /// Appends a row and returns its index. `None` appends a row of Missing.
    pub fn insert_row(&mut self, values: Option<Row>) -> Result<usize, CellError> {
        let index = self.rows.len();
        self.insert_row_at(index, values)?;
        Ok(index)
    }

    /// Inserts a row before `index` (`index == len` appends)
    pub fn insert_row_at(&mut self, index: usize, values: Option<Row>) -> Result<(), CellError> {
        self.ensure_writable()?;
        let width = self.schema.len();
        let row = values.unwrap_or_else(|| vec![CellValue::Missing; width]);
        if row.len() != width {
            return Err(CellError::ArityMismatch {
                expected: width,
                got: row.len(),
            });
        }
        if index > self.rows.len() {
            return Err(CellError::RowIndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }

        self.rows.insert(index, row.clone());
        self.modified = true;
        self.changeset.push(TableChange::RowInserted { index, data: row });
        Ok(())
    }

    /// Deletes every row named in `indices`.
    ///
    /// Indices refer to the table as it was before the call; duplicates are
    /// ignored. Nothing is deleted if any index is out of range. Returns the
    /// removed rows in ascending index order.
    pub fn delete_rows(&mut self, indices: &[usize]) -> Result<Vec<Row>, CellError> {
        self.ensure_writable()?;
        let len = self.rows.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(CellError::RowIndexOutOfRange { index: bad, len });
        }

        let mut targets: Vec<usize> = indices.to_vec();
        targets.sort_unstable();
        targets.dedup();

        // Descending, so each recorded index is valid at the time it is applied
        let mut removed = Vec::with_capacity(targets.len());
        for &index in targets.iter().rev() {
            removed.push(self.rows.remove(index));
            self.changeset.push(TableChange::RowDeleted { index });
        }
        removed.reverse();

        if !removed.is_empty() {
            self.modified = true;
            debug!("Deleted {} rows from '{}'", removed.len(), self.name);
        }
        Ok(removed)
    }

    // ========================================================================
    // Serialization Methods
    // ========================================================================

    /// Export table to CSV.
    ///
    /// Missing values become empty strings. Fields containing the delimiter,
    /// quotes or newlines are quoted and escaped.
    ///
    /// # Example
    ///
    /// ```
    /// use dbf_commander::{CellValue, Column, ColumnType, CsvOptions, Schema, Table};
    ///
    /// let schema = Schema::try_new(vec![
    ///     Column::new("ID", ColumnType::Integer),
    ///     Column::new("NAME", ColumnType::Text),
    /// ]).unwrap();
    /// let table = Table::with_rows("t", schema, vec![
    ///     vec![CellValue::Integer(1), CellValue::from("Smith, Alice")],
    /// ]).unwrap();
    ///
    /// let csv = table.to_csv(&CsvOptions::default());
    /// assert_eq!(csv, "ID,NAME\n1,\"Smith, Alice\"\n");
    /// ```
    pub fn to_csv(&self, options: &CsvOptions) -> String {
        let mut result = String::new();
        let separator = options.delimiter.to_string();

        if options.include_header {
            let header: Vec<String> = self
                .schema
                .get_column_names()
                .iter()
                .map(|name| escape_csv_field(name, options.delimiter, false))
                .collect();
            result.push_str(&header.join(&separator));
            result.push('\n');
        }

        for row in &self.rows {
            if options.skip_empty_rows && row.iter().all(|v| v.to_string().trim().is_empty()) {
                continue;
            }
            let values: Vec<String> = row
                .iter()
                .map(|value| match value {
                    CellValue::Text(s) => escape_csv_field(s, options.delimiter, options.quote_text),
                    other => escape_csv_field(&other.to_string(), options.delimiter, false),
                })
                .collect();
            result.push_str(&values.join(&separator));
            result.push('\n');
        }
        result
    }

    /// Export table to JSON (array of objects keyed by column name).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let column_names = self.schema.get_column_names();
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = column_names
                    .iter()
                    .zip(row.iter())
                    .map(|(name, value)| (name.to_string(), value.to_json()))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();

        serde_json::to_string_pretty(&rows)
    }
}

fn escape_csv_field(value: &str, delimiter: char, always_quote: bool) -> String {
    if always_quote || value.contains(delimiter) || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("columns", &self.schema.get_column_names())
            .field("rows", &self.rows.len())
            .field("modified", &self.modified)
            .field("read_only", &self.read_only)
            .finish()
    }
}

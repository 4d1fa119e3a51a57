/// Session - one open file
///
/// A session owns the base table loaded from a file, an optional query
/// result shown in its place (the View), the page cursor, the sort state and
/// a find/replace engine. Everything the user does to an open file goes
/// through here; the engines themselves only ever see the tables they are
/// handed.
///
/// Edits always target the base table. While a View is shown the session
/// refuses edits, since View rows do not map back to base rows.
///
/// After every operation the session lets go of table history the find
/// engine has already seen, so a long editing session does not accumulate
/// change records.

use crate::column::{coerce, CellValue};
use crate::config::Settings;
use crate::dbf::{is_dbf_path, DbfFileWriter, DbfSource};
use crate::error::{CellError, LoadError, SessionError};
use crate::find::{FindEngine, FindOptions, Match, ReplaceAllPlan};
use crate::import::{import_csv, CsvImportOptions};
use crate::persist::{save_table, FieldSpec, SaveOptions, SaveReport};
use crate::query::{QueryBackend, SqliteBackend};
use crate::table::{Page, RecordSource, Row, Schema, Table};
use crate::view::{Pagination, SortState};
use crate::xml::{self, import_xml, XmlImportOptions};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Field layout of a new DBF file when none is given
pub const DEFAULT_NEW_FIELDS: &str = "ID N(10,0)";

/// What kind of file a session was opened from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Dbf,
    Stata,
    Other,
}

impl FileKind {
    pub fn from_path(path: &Path) -> FileKind {
        if is_dbf_path(path) {
            return FileKind::Dbf;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("dta") => FileKind::Stata,
            _ => FileKind::Other,
        }
    }
}

/// Result of `Session::save`
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(SaveReport),
    NothingToSave,
}

/// Result of `Session::append_table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReport {
    pub appended: usize,
    /// Base columns that received values
    pub matched: Vec<String>,
    /// Incoming columns with no counterpart in the base table
    pub ignored: Vec<String>,
}

/// Result of `import_to_dbf`
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Created(SaveReport),
    /// `save` is None when there was nothing to append
    Appended { append: AppendReport, save: Option<SaveReport> },
}

pub struct Session {
    path: PathBuf,
    kind: FileKind,
    read_only: bool,
    base: Table,
    view: Option<Table>,
    pagination: Pagination,
    sort: Option<SortState>,
    find: FindEngine,
    settings: Settings,
}

impl Session {
    /// Opens a DBF file for editing
    pub fn open_dbf(path: &Path, settings: Settings) -> Result<Session, SessionError> {
        let mut source = DbfSource::open(path, settings.dbf_codepage)?;
        let base = Table::load(&mut source)?;
        info!("Opened {} ({} records)", path.display(), base.len());
        Ok(Session::with_table(path.to_path_buf(), base, false, settings))
    }

    /// Creates an empty DBF file with `fields` and opens it.
    ///
    /// No fields means `DEFAULT_NEW_FIELDS`. An existing file is never
    /// replaced.
    pub fn create_dbf(path: &Path, fields: &[FieldSpec], settings: Settings) -> Result<Session, SessionError> {
        if !is_dbf_path(path) {
            return Err(SessionError::NotDbf(path.to_path_buf()));
        }
        if path.exists() {
            return Err(SessionError::AlreadyExists(path.to_path_buf()));
        }
        let fields = if fields.is_empty() {
            FieldSpec::parse_list(DEFAULT_NEW_FIELDS)?
        } else {
            fields.to_vec()
        };
        let schema = Schema::try_new(fields.iter().map(|f| f.to_column()).collect()).map_err(LoadError::from)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string());

        let mut table = Table::new(name, schema);
        let options = SaveOptions {
            backup: false,
            codepage: settings.dbf_codepage,
        };
        save_table(&mut table, path, &options, &DbfFileWriter)?;
        info!("Created {} with {} fields", path.display(), fields.len());
        Session::open_dbf(path, settings)
    }

    /// Loads any record source. `name` doubles as the session path.
    pub fn from_source<S: RecordSource + ?Sized>(
        name: &str,
        source: &mut S,
        read_only: bool,
        settings: Settings,
    ) -> Result<Session, SessionError> {
        let base = Table::load(source)?;
        let read_only = read_only || source.read_only();
        Ok(Session::with_table(PathBuf::from(name), base, read_only, settings))
    }

    fn with_table(path: PathBuf, mut base: Table, read_only: bool, settings: Settings) -> Session {
        if read_only {
            base.set_read_only(true);
        }
        Session {
            kind: FileKind::from_path(&path),
            path,
            read_only,
            base,
            view: None,
            pagination: Pagination::new(settings.rows_per_page),
            sort: None,
            find: FindEngine::new(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn base(&self) -> &Table {
        &self.base
    }

    pub fn view(&self) -> Option<&Table> {
        self.view.as_ref()
    }

    /// The View if a query is applied, else the base table
    pub fn active(&self) -> &Table {
        self.view.as_ref().unwrap_or(&self.base)
    }

    pub fn active_mut(&mut self) -> &mut Table {
        self.view.as_mut().unwrap_or(&mut self.base)
    }

    pub fn is_modified(&self) -> bool {
        self.base.is_modified()
    }

    pub fn sort_state(&self) -> Option<&SortState> {
        self.sort.as_ref()
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    // ========================================================================
    // Paging
    // ========================================================================

    pub fn current_page(&self) -> Page<'_> {
        self.active()
            .page(self.pagination.current_page(), self.pagination.rows_per_page())
    }

    pub fn page_label(&self) -> String {
        self.pagination.label(self.active().len())
    }

    pub fn first_page(&mut self) {
        self.pagination.first();
    }

    pub fn prev_page(&mut self) {
        self.pagination.prev();
    }

    pub fn next_page(&mut self) {
        let rows = self.active().len();
        self.pagination.next(rows);
    }

    pub fn last_page(&mut self) {
        let rows = self.active().len();
        self.pagination.last(rows);
    }

    pub fn go_to_page(&mut self, page: usize) {
        let rows = self.active().len();
        self.pagination.go_to(page, rows);
    }

    // ========================================================================
    // Query and Sort
    // ========================================================================

    /// Runs `text` against the base table and shows the result.
    ///
    /// The sort state is kept so the header arrows still describe the last
    /// sort the user asked for; the result itself comes back in query order.
    pub fn execute_query(&mut self, text: &str) -> Result<&Table, SessionError> {
        let backend = SqliteBackend::new(self.settings.query_table_name.clone());
        let result = backend.run(&self.base, text)?;
        debug!("Query view has {} rows", result.len());
        self.pagination.reset();
        let view = self.view.insert(result);
        Ok(&*view)
    }

    /// Drops the View and goes back to the first page of the base table
    pub fn clear_filter(&mut self) {
        self.view = None;
        self.pagination.reset();
    }

    /// Sorts the active table by `column`, flipping direction when it is
    /// already the sort column
    pub fn toggle_sort(&mut self, column: &str) -> Result<&SortState, SessionError> {
        let active = self.active();
        let name = active
            .schema()
            .get_column_index(column)
            .and_then(|i| active.schema().column(i))
            .map(|c| c.name().to_string())
            .ok_or_else(|| CellError::ColumnNotFound(column.to_string()))?;

        let next = SortState::toggle(self.sort.as_ref(), &name);
        self.active_mut().sort(&name, next.order.is_ascending())?;
        self.release_history();
        let state = self.sort.insert(next);
        Ok(&*state)
    }

    // ========================================================================
    // Editing
    // ========================================================================

    fn ensure_editable(&self) -> Result<(), SessionError> {
        if self.read_only || self.active().is_read_only() {
            return Err(SessionError::ReadOnly(self.path.display().to_string()));
        }
        Ok(())
    }

    /// Stores `value` in the base table and returns the previous value
    pub fn set_cell(&mut self, row: usize, column: &str, value: CellValue) -> Result<CellValue, SessionError> {
        self.ensure_editable()?;
        let old = self.base.set_cell(row, column, value)?;
        self.release_history();
        Ok(old)
    }

    /// Appends an empty record and jumps to the page showing it
    pub fn add_record(&mut self) -> Result<usize, SessionError> {
        self.ensure_editable()?;
        let index = self.base.insert_row(None)?;
        self.release_history();
        self.pagination.last(self.base.len());
        Ok(index)
    }

    /// Deletes the given base rows, all indices taken before any removal
    pub fn delete_records(&mut self, indices: &[usize]) -> Result<Vec<Row>, SessionError> {
        self.ensure_editable()?;
        let removed = self.base.delete_rows(indices)?;
        self.release_history();
        let page = self.pagination.current_page();
        self.pagination.go_to(page, self.base.len());
        Ok(removed)
    }

    /// Appends every row of `incoming` to the base table.
    ///
    /// Columns are matched by name, ignoring case. Base columns without a
    /// match are left Missing and incoming columns without one are dropped.
    /// Values are converted to the base column's type where possible; the
    /// rest are kept as they are and reported when saving.
    pub fn append_table(&mut self, incoming: &Table) -> Result<AppendReport, SessionError> {
        self.ensure_editable()?;
        let sources: Vec<Option<usize>> = self
            .base
            .columns()
            .iter()
            .map(|c| incoming.schema().get_column_index(c.name()))
            .collect();
        let matched: Vec<String> = self
            .base
            .columns()
            .iter()
            .zip(&sources)
            .filter(|(_, src)| src.is_some())
            .map(|(c, _)| c.name().to_string())
            .collect();
        let ignored: Vec<String> = incoming
            .columns()
            .iter()
            .enumerate()
            .filter(|(idx, _)| !sources.contains(&Some(*idx)))
            .map(|(_, c)| c.name().to_string())
            .collect();
        if !ignored.is_empty() {
            warn!("Columns not in {}: {}", self.path.display(), ignored.join(", "));
        }

        let types: Vec<_> = self.base.columns().iter().map(|c| c.column_type()).collect();
        for row in incoming.iter_rows() {
            let values: Row = sources
                .iter()
                .zip(&types)
                .map(|(src, &column_type)| match src.and_then(|i| row.get(i)) {
                    Some(value) => coerce(value, column_type).unwrap_or_else(|_| value.clone()),
                    None => CellValue::Missing,
                })
                .collect();
            self.base.insert_row(Some(values))?;
        }
        self.release_history();
        info!("Appended {} records to {}", incoming.len(), self.path.display());

        Ok(AppendReport {
            appended: incoming.len(),
            matched,
            ignored,
        })
    }

    /// Drops table history the find engine no longer needs
    fn release_history(&mut self) {
        for table in std::iter::once(&mut self.base).chain(self.view.as_mut()) {
            if self.find.is_tracking(table) {
                self.find.sync(table);
            }
            let cursor = table.changeset().cursor();
            table.release_changes(cursor);
        }
    }

    // ========================================================================
    // Find / Replace
    // ========================================================================

    /// Searches the active table; `None` uses the configured find options
    pub fn find(&mut self, text: &str, options: Option<FindOptions>) -> Result<usize, SessionError> {
        let options = options.unwrap_or(self.settings.find);
        let active = self.view.as_ref().unwrap_or(&self.base);
        let count = self.find.search(active, text, options)?;
        self.release_history();
        Ok(count)
    }

    /// Moves to the next match and to the page that shows it
    pub fn find_next(&mut self) -> Option<Match> {
        let active = self.view.as_ref().unwrap_or(&self.base);
        let found = self.find.find_next(active).cloned()?;
        let page = found.row / self.pagination.rows_per_page();
        self.pagination.go_to(page, active.len());
        Some(found)
    }

    pub fn replace_current(&mut self, replacement: &str) -> Result<Match, SessionError> {
        self.ensure_editable()?;
        let replaced = self.find.replace_current(&mut self.base, replacement)?;
        self.release_history();
        Ok(replaced)
    }

    /// Searches the base table and reports how many cells a replace-all would change
    pub fn plan_replace_all(
        &mut self,
        find: &str,
        replacement: &str,
        options: Option<FindOptions>,
    ) -> Result<ReplaceAllPlan, SessionError> {
        let options = options.unwrap_or(self.settings.find);
        Ok(self.find.plan_replace_all(&self.base, find, replacement, options)?)
    }

    pub fn commit_replace_all(&mut self, plan: &ReplaceAllPlan) -> Result<usize, SessionError> {
        self.ensure_editable()?;
        let count = self.find.commit_replace_all(&mut self.base, plan)?;
        self.release_history();
        Ok(count)
    }

    pub fn find_engine(&self) -> &FindEngine {
        &self.find
    }

    pub fn clear_find(&mut self) {
        self.find.clear();
    }

    // ========================================================================
    // Saving
    // ========================================================================

    /// Writes the base table back to the session's DBF file
    pub fn save(&mut self) -> Result<SaveOutcome, SessionError> {
        if self.read_only {
            return Err(SessionError::ReadOnly(self.path.display().to_string()));
        }
        if self.kind != FileKind::Dbf {
            return Err(SessionError::NotDbf(self.path.clone()));
        }
        if !self.base.is_modified() {
            debug!("Nothing to save for {}", self.path.display());
            return Ok(SaveOutcome::NothingToSave);
        }
        let options = self.save_options();
        let report = save_table(&mut self.base, &self.path, &options, &DbfFileWriter)?;
        Ok(SaveOutcome::Saved(report))
    }

    /// Writes the base table to a new DBF file, which becomes the session path
    pub fn save_as(&mut self, path: &Path) -> Result<SaveReport, SessionError> {
        if self.read_only {
            return Err(SessionError::ReadOnly(self.path.display().to_string()));
        }
        if !is_dbf_path(path) {
            return Err(SessionError::NotDbf(path.to_path_buf()));
        }
        let options = self.save_options();
        let report = save_table(&mut self.base, path, &options, &DbfFileWriter)?;
        self.path = path.to_path_buf();
        self.kind = FileKind::Dbf;
        Ok(report)
    }

    /// Writes the active table, View included, to `path` as XML
    pub fn export_xml(&self, path: &Path) -> Result<(), SessionError> {
        xml::export_xml(self.active(), path).map_err(SessionError::Export)
    }

    fn save_options(&self) -> SaveOptions {
        SaveOptions {
            backup: self.settings.backup_on_save,
            codepage: self.settings.dbf_codepage,
        }
    }
}

/// Writes `incoming` to the DBF file at `path`.
///
/// An existing file gets the rows appended (see `Session::append_table`)
/// and is saved with the usual backup. Otherwise a new file is created with
/// a layout derived from `incoming`.
pub fn import_to_dbf(mut incoming: Table, path: &Path, settings: Settings) -> Result<ImportOutcome, SessionError> {
    if !is_dbf_path(path) {
        return Err(SessionError::NotDbf(path.to_path_buf()));
    }
    if path.exists() {
        let mut session = Session::open_dbf(path, settings)?;
        let append = session.append_table(&incoming)?;
        let save = match session.save()? {
            SaveOutcome::Saved(report) => Some(report),
            SaveOutcome::NothingToSave => {
                debug!("Nothing appended to {}", path.display());
                None
            }
        };
        return Ok(ImportOutcome::Appended { append, save });
    }

    let options = SaveOptions {
        backup: false,
        codepage: settings.dbf_codepage,
    };
    let report = save_table(&mut incoming, path, &options, &DbfFileWriter)?;
    Ok(ImportOutcome::Created(report))
}

/// Imports a CSV file into a new or existing DBF file
pub fn import_csv_to_dbf(
    csv_path: &Path,
    dbf_path: &Path,
    options: &CsvImportOptions,
    settings: Settings,
) -> Result<ImportOutcome, SessionError> {
    let table = import_csv(csv_path, options)?;
    import_to_dbf(table, dbf_path, settings)
}

/// Imports an XML file into a new or existing DBF file
pub fn import_xml_to_dbf(
    xml_path: &Path,
    dbf_path: &Path,
    options: &XmlImportOptions,
    settings: Settings,
) -> Result<ImportOutcome, SessionError> {
    let table = import_xml(xml_path, options)?;
    import_to_dbf(table, dbf_path, settings)
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("read_only", &self.read_only)
            .field("rows", &self.base.len())
            .field("view_rows", &self.view.as_ref().map(|v| v.len()))
            .field("page", &self.pagination.current_page())
            .field("sort", &self.sort)
            .finish()
    }
}

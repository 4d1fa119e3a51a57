/// Find/Replace Engine
///
/// Searches the display text of every cell, walks the matches one at a time
/// and rewrites them. The match list is kept in step with the table through
/// its changeset: row inserts and deletes shift indices, cell updates
/// re-evaluate the one cell, and anything the engine cannot follow (a sort,
/// a cleared history, a different table) triggers a fresh scan.
///
/// # States
///
/// - `Idle`: no search, or cleared
/// - `HasMatches`: a search found at least one match that is still live
/// - `Exhausted`: the last search found nothing, or every match was consumed

use crate::changeset::{ChangeCursor, IndexAdjuster, TableChange};
use crate::column::CellValue;
use crate::error::FindError;
use crate::table::Table;
use log::debug;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

/// How cell text is compared against the find text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    pub case_sensitive: bool,
    /// Substring match when true, whole-cell equality otherwise
    pub partial_match: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            case_sensitive: false,
            partial_match: true,
        }
    }
}

/// One matching cell
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub row: usize,
    pub column: String,
    pub column_index: usize,
    /// Cell value at the time the match was found or last re-evaluated
    pub original: CellValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindState {
    Idle,
    HasMatches,
    Exhausted,
}

/// A replace-all that has been searched but not yet applied
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceAllPlan {
    pub find: String,
    pub replacement: String,
    pub options: FindOptions,
    /// Number of cells that will be rewritten
    pub count: usize,
}

/// Replaces every occurrence of `find` in `text`.
///
/// The case-insensitive form keeps the casing of the text around each
/// occurrence.
///
/// ```
/// use dbf_commander::find::replace_in;
///
/// assert_eq!(replace_in("FooBAR foo", "foo", "x", false), "xBAR x");
/// assert_eq!(replace_in("FooBAR foo", "foo", "x", true), "FooBAR x");
/// ```
pub fn replace_in(text: &str, find: &str, replacement: &str, case_sensitive: bool) -> String {
    let options = FindOptions {
        case_sensitive,
        partial_match: true,
    };
    match find_pattern(find, options) {
        Ok(re) => re.replace_all(text, NoExpand(replacement)).into_owned(),
        Err(_) => text.replace(find, replacement),
    }
}

/// The one pattern both matching and replacing use, so they agree on case folding
fn find_pattern(find: &str, options: FindOptions) -> Result<Regex, FindError> {
    let literal = regex::escape(find);
    let body = if options.partial_match {
        literal
    } else {
        format!("^(?:{})$", literal)
    };
    let flags = if options.case_sensitive { "" } else { "(?i)" };
    Regex::new(&format!("{}{}", flags, body)).map_err(|e| FindError::Pattern(e.to_string()))
}

fn cell_matches(cell: &CellValue, pattern: &Regex) -> bool {
    !cell.is_missing() && pattern.is_match(&cell.to_string())
}

#[derive(Debug)]
pub struct FindEngine {
    text: String,
    pattern: Option<Regex>,
    options: FindOptions,
    matches: Vec<Match>,
    cursor: Option<usize>,
    state: FindState,
    table_id: Option<u64>,
    synced: ChangeCursor,
}

impl Default for FindEngine {
    fn default() -> Self {
        FindEngine::new()
    }
}

impl FindEngine {
    pub fn new() -> Self {
        FindEngine {
            text: String::new(),
            pattern: None,
            options: FindOptions::default(),
            matches: Vec::new(),
            cursor: None,
            state: FindState::Idle,
            table_id: None,
            synced: ChangeCursor::default(),
        }
    }

    pub fn state(&self) -> FindState {
        self.state
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// The match the cursor is on, if any
    pub fn current(&self) -> Option<&Match> {
        self.cursor.and_then(|c| self.matches.get(c))
    }

    pub fn find_text(&self) -> &str {
        &self.text
    }

    /// Scans `table` row by row, left to right, and returns the match count.
    ///
    /// The cursor is reset to sit before the first match.
    pub fn search(&mut self, table: &Table, text: &str, options: FindOptions) -> Result<usize, FindError> {
        if text.trim().is_empty() {
            return Err(FindError::EmptyFindText);
        }
        let pattern = find_pattern(text, options)?;
        self.text = text.to_string();
        self.pattern = Some(pattern);
        self.options = options;
        self.rescan(table);
        self.cursor = None;
        debug!("Found {} matches for '{}' in '{}'", self.matches.len(), text, table.name());
        Ok(self.matches.len())
    }

    /// Moves to the next match, wrapping around after the last one
    pub fn find_next(&mut self, table: &Table) -> Option<&Match> {
        self.sync(table);
        if self.matches.is_empty() {
            return None;
        }
        let next = match self.cursor {
            None => 0,
            Some(c) => (c + 1) % self.matches.len(),
        };
        self.cursor = Some(next);
        self.matches.get(next)
    }

    /// Rewrites the current match and drops it from the list.
    ///
    /// The cursor then rests on the match that followed, wrapping to the
    /// first. Returns the match that was replaced.
    pub fn replace_current(&mut self, table: &mut Table, replacement: &str) -> Result<Match, FindError> {
        self.sync(table);
        let current = match self.cursor {
            Some(c) if c < self.matches.len() => c,
            _ => return Err(FindError::NoActiveMatch),
        };
        if table.is_read_only() {
            return Err(FindError::ReadOnlyTarget);
        }

        let target = self.matches[current].clone();
        self.rewrite(table, &target, replacement)?;
        self.synced = table.changeset().cursor();

        self.matches.remove(current);
        if self.matches.is_empty() {
            self.cursor = None;
            self.state = FindState::Exhausted;
        } else {
            self.cursor = Some(current % self.matches.len());
        }
        Ok(target)
    }

    /// Runs a fresh search and reports how many cells a replace-all would touch
    pub fn plan_replace_all(
        &mut self,
        table: &Table,
        find: &str,
        replacement: &str,
        options: FindOptions,
    ) -> Result<ReplaceAllPlan, FindError> {
        let count = self.search(table, find, options)?;
        Ok(ReplaceAllPlan {
            find: find.to_string(),
            replacement: replacement.to_string(),
            options,
            count,
        })
    }

    /// Applies a plan, then returns to `Idle`. Returns the number of cells rewritten.
    ///
    /// Edits made after planning are honored: the match list is re-synced
    /// first, so the number applied can differ from `plan.count`.
    pub fn commit_replace_all(&mut self, table: &mut Table, plan: &ReplaceAllPlan) -> Result<usize, FindError> {
        if table.is_read_only() {
            return Err(FindError::ReadOnlyTarget);
        }
        if self.state == FindState::Idle || self.text != plan.find || self.options != plan.options {
            self.search(table, &plan.find, plan.options)?;
        } else {
            self.sync(table);
        }

        let targets = std::mem::take(&mut self.matches);
        for target in &targets {
            self.rewrite(table, target, &plan.replacement)?;
        }
        debug!("Replaced {} cells in '{}'", targets.len(), table.name());
        self.clear();
        Ok(targets.len())
    }

    /// Plans and commits in one step
    pub fn replace_all(
        &mut self,
        table: &mut Table,
        find: &str,
        replacement: &str,
        options: FindOptions,
    ) -> Result<usize, FindError> {
        let plan = self.plan_replace_all(table, find, replacement, options)?;
        self.commit_replace_all(table, &plan)
    }

    pub fn clear(&mut self) {
        self.matches.clear();
        self.cursor = None;
        self.state = FindState::Idle;
        self.table_id = None;
    }

    /// True when the match list follows `table`
    pub fn is_tracking(&self, table: &Table) -> bool {
        self.state != FindState::Idle && self.table_id == Some(table.id())
    }

    fn rewrite(&self, table: &mut Table, target: &Match, replacement: &str) -> Result<(), FindError> {
        let current = table.get_value(target.row, &target.column)?.to_string();
        let new_text = match &self.pattern {
            Some(pattern) if self.options.partial_match => {
                pattern.replace_all(&current, NoExpand(replacement)).into_owned()
            }
            _ => replacement.to_string(),
        };
        if new_text != current {
            table.set_cell(target.row, &target.column, CellValue::Text(new_text))?;
        }
        Ok(())
    }

    fn rescan(&mut self, table: &Table) {
        self.matches.clear();
        let pattern = match &self.pattern {
            Some(pattern) => pattern,
            None => return,
        };
        let columns = table.columns();
        for (row_idx, row) in table.iter_rows().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                if cell_matches(cell, pattern) {
                    self.matches.push(Match {
                        row: row_idx,
                        column: columns[col_idx].name().to_string(),
                        column_index: col_idx,
                        original: cell.clone(),
                    });
                }
            }
        }
        self.table_id = Some(table.id());
        self.synced = table.changeset().cursor();
        self.state = if self.matches.is_empty() {
            FindState::Exhausted
        } else {
            FindState::HasMatches
        };
    }

    /// Brings the match list up to date with edits made since the last look.
    ///
    /// Afterwards the engine needs none of `table`'s earlier history, so its
    /// owner may release it.
    pub fn sync(&mut self, table: &Table) {
        if self.state == FindState::Idle {
            return;
        }
        if self.table_id != Some(table.id()) {
            self.rescan(table);
            self.cursor = None;
            return;
        }
        let changes = match table.changeset().since(self.synced) {
            Some(changes) => changes,
            None => {
                self.rescan(table);
                self.cursor = None;
                return;
            }
        };
        if changes.is_empty() {
            return;
        }

        for change in changes {
            match change {
                TableChange::Reordered => {
                    self.rescan(table);
                    self.cursor = None;
                    return;
                }
                TableChange::RowInserted { index, data } => {
                    for m in self.matches.iter_mut() {
                        m.row = IndexAdjuster::adjust_for_insert(m.row, *index);
                    }
                    for (col_idx, cell) in data.iter().enumerate() {
                        self.update_cell(table, *index, col_idx, cell);
                    }
                }
                TableChange::RowDeleted { index } => {
                    let mut pos = 0;
                    while pos < self.matches.len() {
                        match IndexAdjuster::adjust_for_delete(self.matches[pos].row, *index) {
                            Some(row) => {
                                self.matches[pos].row = row;
                                pos += 1;
                            }
                            None => self.remove_at(pos),
                        }
                    }
                }
                TableChange::CellUpdated { row, column, new_value } => {
                    if let Some(col_idx) = table.schema().get_column_index(column) {
                        self.update_cell(table, *row, col_idx, new_value);
                    }
                }
            }
        }

        self.synced = table.changeset().cursor();
        if self.matches.is_empty() {
            self.cursor = None;
            self.state = FindState::Exhausted;
        } else {
            self.state = FindState::HasMatches;
        }
    }

    /// Adds, refreshes or drops the match for one cell, keeping discovery order
    fn update_cell(&mut self, table: &Table, row: usize, col_idx: usize, value: &CellValue) {
        let key = (row, col_idx);
        let pos = self.matches.partition_point(|m| (m.row, m.column_index) < key);
        let present = self
            .matches
            .get(pos)
            .map_or(false, |m| (m.row, m.column_index) == key);

        let hit = self.pattern.as_ref().map_or(false, |p| cell_matches(value, p));
        if hit {
            if present {
                self.matches[pos].original = value.clone();
            } else {
                let column = table
                    .schema()
                    .column(col_idx)
                    .map(|c| c.name().to_string())
                    .unwrap_or_default();
                self.matches.insert(
                    pos,
                    Match {
                        row,
                        column,
                        column_index: col_idx,
                        original: value.clone(),
                    },
                );
                if let Some(c) = self.cursor {
                    if pos <= c {
                        self.cursor = Some(c + 1);
                    }
                }
            }
        } else if present {
            self.remove_at(pos);
        }
    }

    fn remove_at(&mut self, pos: usize) {
        self.matches.remove(pos);
        self.cursor = match self.cursor {
            _ if self.matches.is_empty() => None,
            Some(c) if pos < c => Some(c - 1),
            Some(c) => Some(c % self.matches.len()),
            None => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, ColumnType};
    use crate::table::Schema;

    fn text_table(values: &[&str]) -> Table {
        let schema = Schema::try_new(vec![Column::new("a", ColumnType::Text)]).unwrap();
        let rows = values.iter().map(|v| vec![CellValue::from(*v)]).collect();
        Table::with_rows("t", schema, rows).unwrap()
    }

    fn grid() -> Table {
        let schema = Schema::try_new(vec![
            Column::new("NAME", ColumnType::Text),
            Column::new("CITY", ColumnType::Text),
            Column::new("QTY", ColumnType::Integer),
        ])
        .unwrap();
        Table::with_rows(
            "grid",
            schema,
            vec![
                vec![CellValue::from("Porto"), CellValue::from("Lisbon"), CellValue::Integer(10)],
                vec![CellValue::from("Ana"), CellValue::from("Porto"), CellValue::Integer(110)],
                vec![CellValue::from("port"), CellValue::Missing, CellValue::Integer(7)],
            ],
        )
        .unwrap()
    }

    fn positions(engine: &FindEngine) -> Vec<(usize, &str)> {
        engine.matches().iter().map(|m| (m.row, m.column.as_str())).collect()
    }

    #[test]
    fn test_search_is_row_major() {
        let table = grid();
        let mut engine = FindEngine::new();
        let count = engine.search(&table, "port", FindOptions::default()).unwrap();

        assert_eq!(count, 3);
        assert_eq!(positions(&engine), vec![(0, "NAME"), (1, "CITY"), (2, "NAME")]);
        assert_eq!(engine.state(), FindState::HasMatches);
        assert!(engine.current().is_none());
    }

    #[test]
    fn test_search_options() {
        let table = grid();
        let mut engine = FindEngine::new();

        let sensitive = FindOptions { case_sensitive: true, partial_match: true };
        assert_eq!(engine.search(&table, "Port", sensitive).unwrap(), 2);

        let whole = FindOptions { case_sensitive: false, partial_match: false };
        assert_eq!(engine.search(&table, "PORT", whole).unwrap(), 1);
        assert_eq!(positions(&engine), vec![(2, "NAME")]);

        // numbers are matched on their display text
        assert_eq!(engine.search(&table, "10", FindOptions::default()).unwrap(), 2);
    }

    #[test]
    fn test_empty_find_text() {
        let mut engine = FindEngine::new();
        assert_eq!(
            engine.search(&grid(), "  ", FindOptions::default()),
            Err(FindError::EmptyFindText)
        );
        assert_eq!(engine.state(), FindState::Idle);
    }

    #[test]
    fn test_no_matches_is_exhausted() {
        let mut engine = FindEngine::new();
        assert_eq!(engine.search(&grid(), "zzz", FindOptions::default()).unwrap(), 0);
        assert_eq!(engine.state(), FindState::Exhausted);
        assert!(engine.find_next(&grid()).is_none());
    }

    #[test]
    fn test_find_next_wraps() {
        let table = grid();
        let mut engine = FindEngine::new();
        engine.search(&table, "port", FindOptions::default()).unwrap();

        let rows: Vec<usize> = (0..4).map(|_| engine.find_next(&table).unwrap().row).collect();
        assert_eq!(rows, vec![0, 1, 2, 0]);

        // a new search starts from the top again
        engine.search(&table, "port", FindOptions::default()).unwrap();
        assert_eq!(engine.find_next(&table).unwrap().row, 0);
    }

    #[test]
    fn test_replace_without_active_match() {
        let mut table = text_table(&["foo"]);
        let mut engine = FindEngine::new();
        assert_eq!(engine.replace_current(&mut table, "x"), Err(FindError::NoActiveMatch));

        engine.search(&table, "foo", FindOptions::default()).unwrap();
        assert_eq!(engine.replace_current(&mut table, "x"), Err(FindError::NoActiveMatch));
    }

    #[test]
    fn test_replace_until_exhausted() {
        let mut table = text_table(&["foo", "bar", "foo"]);
        let mut engine = FindEngine::new();
        assert_eq!(engine.search(&table, "foo", FindOptions::default()).unwrap(), 2);

        engine.find_next(&table).unwrap();
        let first = engine.replace_current(&mut table, "baz").unwrap();
        assert_eq!(first.row, 0);
        assert_eq!(engine.match_count(), 1);
        assert_eq!(engine.current().unwrap().row, 2);

        engine.replace_current(&mut table, "baz").unwrap();
        assert_eq!(engine.match_count(), 0);
        assert_eq!(engine.state(), FindState::Exhausted);
        assert_eq!(engine.replace_current(&mut table, "baz"), Err(FindError::NoActiveMatch));

        let values: Vec<String> = table.iter_rows().map(|r| r[0].to_string()).collect();
        assert_eq!(values, vec!["baz", "bar", "baz"]);
        assert!(table.is_modified());
    }

    #[test]
    fn test_case_insensitive_replace_keeps_other_text() {
        let mut table = text_table(&["FooBAR foo"]);
        let mut engine = FindEngine::new();
        engine.search(&table, "foo", FindOptions::default()).unwrap();
        engine.find_next(&table).unwrap();
        engine.replace_current(&mut table, "x").unwrap();

        assert_eq!(table.get_value(0, "a").unwrap(), &CellValue::from("xBAR x"));
    }

    #[test]
    fn test_match_and_replace_agree_on_case_folding() {
        // 'İ' lowercases to "i\u{307}" but has no simple case fold
        let mut table = text_table(&["\u{130}stanbul", "i\u{307}zmir"]);
        let mut engine = FindEngine::new();
        assert_eq!(engine.search(&table, "i\u{307}", FindOptions::default()).unwrap(), 1);
        assert_eq!(positions(&engine), vec![(1, "a")]);

        assert_eq!(engine.replace_all(&mut table, "i\u{307}", "I", FindOptions::default()).unwrap(), 1);
        assert_eq!(table.get_value(0, "a").unwrap(), &CellValue::from("\u{130}stanbul"));
        assert_eq!(table.get_value(1, "a").unwrap(), &CellValue::from("Izmir"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let mut table = text_table(&["a.b", "axb", "(1+1)"]);
        let mut engine = FindEngine::new();
        assert_eq!(engine.search(&table, ".", FindOptions::default()).unwrap(), 1);
        let whole = FindOptions { case_sensitive: true, partial_match: false };
        assert_eq!(engine.replace_all(&mut table, "(1+1)", "2", whole).unwrap(), 1);
        assert_eq!(table.get_value(2, "a").unwrap(), &CellValue::from("2"));
    }

    #[test]
    fn test_is_tracking() {
        let table = text_table(&["foo"]);
        let other = text_table(&["foo"]);
        let mut engine = FindEngine::new();
        assert!(!engine.is_tracking(&table));
        engine.search(&table, "foo", FindOptions::default()).unwrap();
        assert!(engine.is_tracking(&table));
        assert!(!engine.is_tracking(&other));
        engine.clear();
        assert!(!engine.is_tracking(&table));
    }

    #[test]
    fn test_replacement_is_literal() {
        assert_eq!(replace_in("a.b", ".", "$0", false), "a$0b");
    }

    #[test]
    fn test_replace_read_only_target() {
        let mut table = text_table(&["foo"]);
        table.set_read_only(true);
        let mut engine = FindEngine::new();
        engine.search(&table, "foo", FindOptions::default()).unwrap();
        engine.find_next(&table).unwrap();

        assert_eq!(engine.replace_current(&mut table, "x"), Err(FindError::ReadOnlyTarget));
        assert_eq!(engine.match_count(), 1);
    }

    #[test]
    fn test_sync_after_delete() {
        let mut table = text_table(&["foo", "bar", "foo", "food"]);
        let mut engine = FindEngine::new();
        engine.search(&table, "foo", FindOptions::default()).unwrap();
        engine.find_next(&table).unwrap();
        engine.find_next(&table).unwrap();
        assert_eq!(engine.current().unwrap().row, 2);

        table.delete_rows(&[0, 1]).unwrap();
        let next = engine.find_next(&table).unwrap();
        assert_eq!(next.row, 1);
        assert_eq!(next.original, CellValue::from("food"));
        assert_eq!(positions(&engine), vec![(0, "a"), (1, "a")]);
    }

    #[test]
    fn test_sync_after_insert_and_update() {
        let mut table = text_table(&["foo", "bar"]);
        let mut engine = FindEngine::new();
        engine.search(&table, "foo", FindOptions::default()).unwrap();

        table.insert_row_at(0, Some(vec![CellValue::from("xfoo")])).unwrap();
        table.set_cell(2, "a", CellValue::from("foobar")).unwrap();
        table.set_cell(1, "a", CellValue::from("gone")).unwrap();

        assert_eq!(engine.find_next(&table).unwrap().row, 0);
        assert_eq!(positions(&engine), vec![(0, "a"), (2, "a")]);
        assert_eq!(engine.matches()[1].original, CellValue::from("foobar"));
    }

    #[test]
    fn test_sync_after_sort_rescans() {
        let mut table = text_table(&["foo b", "bar", "foo a"]);
        let mut engine = FindEngine::new();
        engine.search(&table, "foo", FindOptions::default()).unwrap();
        engine.find_next(&table).unwrap();

        table.sort("a", true).unwrap();
        let first = engine.find_next(&table).unwrap();
        assert_eq!(first.row, 1);
        assert_eq!(first.original, CellValue::from("foo a"));
    }

    #[test]
    fn test_sync_after_history_cleared() {
        let mut table = text_table(&["foo", "bar"]);
        let mut engine = FindEngine::new();
        engine.search(&table, "foo", FindOptions::default()).unwrap();

        table.set_cell(1, "a", CellValue::from("foo too")).unwrap();
        table.mark_saved();
        assert_eq!(engine.find_next(&table).unwrap().row, 0);
        assert_eq!(engine.match_count(), 2);
    }

    #[test]
    fn test_sync_against_other_table() {
        let first = text_table(&["foo"]);
        let second = text_table(&["bar", "foo", "foo"]);
        let mut engine = FindEngine::new();
        engine.search(&first, "foo", FindOptions::default()).unwrap();

        assert_eq!(engine.find_next(&second).unwrap().row, 1);
        assert_eq!(engine.match_count(), 2);
    }

    #[test]
    fn test_replace_all_plan_then_commit() {
        let mut table = grid();
        let mut engine = FindEngine::new();
        let plan = engine
            .plan_replace_all(&table, "port", "Braga", FindOptions::default())
            .unwrap();
        assert_eq!(plan.count, 3);
        assert_eq!(table.get_value(0, "NAME").unwrap(), &CellValue::from("Porto"));

        let applied = engine.commit_replace_all(&mut table, &plan).unwrap();
        assert_eq!(applied, 3);
        assert_eq!(table.get_value(0, "NAME").unwrap(), &CellValue::from("Bragao"));
        assert_eq!(table.get_value(1, "CITY").unwrap(), &CellValue::from("Bragao"));
        assert_eq!(table.get_value(2, "NAME").unwrap(), &CellValue::from("Braga"));
        assert_eq!(engine.state(), FindState::Idle);
        assert!(engine.current().is_none());
    }

    #[test]
    fn test_replace_all_whole_cell() {
        let mut table = text_table(&["foo", "foo foo", "FOO"]);
        let mut engine = FindEngine::new();
        let whole = FindOptions { case_sensitive: false, partial_match: false };
        assert_eq!(engine.replace_all(&mut table, "foo", "x", whole).unwrap(), 2);

        let values: Vec<String> = table.iter_rows().map(|r| r[0].to_string()).collect();
        assert_eq!(values, vec!["x", "foo foo", "x"]);
    }

    #[test]
    fn test_replace_all_read_only() {
        let mut table = text_table(&["foo"]);
        table.set_read_only(true);
        let mut engine = FindEngine::new();
        assert_eq!(
            engine.replace_all(&mut table, "foo", "x", FindOptions::default()),
            Err(FindError::ReadOnlyTarget)
        );
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: FindOptions = serde_json::from_str(r#"{"case_sensitive": true}"#).unwrap();
        assert!(options.case_sensitive);
        assert!(options.partial_match);
    }
}

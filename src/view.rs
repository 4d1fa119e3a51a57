/// Display state for the active table: sort order and pagination.
///
/// Neither piece of state lives on the Table. A session owns one
/// `Pagination` and at most one `SortState` and applies them to whichever
/// table is currently displayed.

use crate::column::CellValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Range;

/// Default number of rows shown per page
pub const DEFAULT_ROWS_PER_PAGE: usize = 100;

/// Sort order for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn is_ascending(&self) -> bool {
        matches!(self, SortOrder::Ascending)
    }

    pub fn reversed(&self) -> SortOrder {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// The column the active table is sorted by, and in which direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub column: String,
    pub order: SortOrder,
}

impl SortState {
    pub fn ascending(column: impl Into<String>) -> Self {
        SortState {
            column: column.into(),
            order: SortOrder::Ascending,
        }
    }

    /// Next sort state after the user picks `column`.
    ///
    /// Picking the column already sorted on flips its direction; any other
    /// column starts ascending.
    ///
    /// # Examples
    ///
    /// ```
    /// use dbf_commander::{SortOrder, SortState};
    ///
    /// let first = SortState::toggle(None, "NAME");
    /// assert_eq!(first.order, SortOrder::Ascending);
    ///
    /// let second = SortState::toggle(Some(&first), "NAME");
    /// assert_eq!(second.order, SortOrder::Descending);
    ///
    /// let third = SortState::toggle(Some(&second), "CITY");
    /// assert_eq!(third.order, SortOrder::Ascending);
    /// ```
    pub fn toggle(current: Option<&SortState>, column: &str) -> SortState {
        match current {
            Some(state) if state.column == column => SortState {
                column: state.column.clone(),
                order: state.order.reversed(),
            },
            _ => SortState::ascending(column),
        }
    }
}

/// Compare two cells for sorting.
///
/// Missing sorts below every value. Integers and decimals compare
/// numerically; other same-typed values use their natural order. Mixed
/// types (text typed into a numeric column) compare by rendered text so the
/// order stays deterministic.
pub fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Missing, CellValue::Missing) => Ordering::Equal,
        (CellValue::Missing, _) => Ordering::Less,
        (_, CellValue::Missing) => Ordering::Greater,
        (CellValue::Integer(x), CellValue::Integer(y)) => x.cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.cmp(y),
        (CellValue::Boolean(x), CellValue::Boolean(y)) => x.cmp(y),
        (CellValue::Date(x), CellValue::Date(y)) => x.cmp(y),
        (x, y) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy).unwrap_or(Ordering::Equal),
            _ => x.to_string().cmp(&y.to_string()),
        },
    }
}

/// Page cursor over the active table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    current_page: usize,
    rows_per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::new(DEFAULT_ROWS_PER_PAGE)
    }
}

impl Pagination {
    /// Creates a pagination cursor on page 0. A page size of 0 is treated as 1.
    pub fn new(rows_per_page: usize) -> Self {
        Pagination {
            current_page: 0,
            rows_per_page: rows_per_page.max(1),
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn rows_per_page(&self) -> usize {
        self.rows_per_page
    }

    /// Number of pages for `row_count` rows; never less than 1
    pub fn total_pages(&self, row_count: usize) -> usize {
        total_pages(row_count, self.rows_per_page)
    }

    /// Row range of the current page, clamped to the last page
    pub fn range(&self, row_count: usize) -> Range<usize> {
        page_range(self.current_page, self.rows_per_page, row_count)
    }

    pub fn reset(&mut self) {
        self.current_page = 0;
    }

    pub fn first(&mut self) {
        self.current_page = 0;
    }

    pub fn prev(&mut self) {
        self.current_page = self.current_page.saturating_sub(1);
    }

    pub fn next(&mut self, row_count: usize) {
        let last = self.total_pages(row_count) - 1;
        self.current_page = (self.current_page + 1).min(last);
    }

    pub fn last(&mut self, row_count: usize) {
        self.current_page = self.total_pages(row_count) - 1;
    }

    /// Jump to `page`, clamped to the valid range
    pub fn go_to(&mut self, page: usize, row_count: usize) {
        self.current_page = page.min(self.total_pages(row_count) - 1);
    }

    /// Human readable position, e.g. "Page 2 of 5"
    pub fn label(&self, row_count: usize) -> String {
        let total = self.total_pages(row_count);
        format!("Page {} of {}", self.current_page.min(total - 1) + 1, total)
    }
}

/// `max(1, ceil(row_count / page_size))`
pub fn total_pages(row_count: usize, page_size: usize) -> usize {
    let page_size = page_size.max(1);
    row_count.div_ceil(page_size).max(1)
}

/// Rows `[p*s, min((p+1)*s, n))` with `p` clamped to the last page
pub fn page_range(page_index: usize, page_size: usize, row_count: usize) -> Range<usize> {
    let page_size = page_size.max(1);
    let page = page_index.min(total_pages(row_count, page_size) - 1);
    let start = (page * page_size).min(row_count);
    let end = (start + page_size).min(row_count);
    start..end
}

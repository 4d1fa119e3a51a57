/// Changeset - change tracking for tables
///
/// Every mutation of a table is recorded as a `TableChange`. Components that
/// hold row indices into a table (the find/replace engine's match list) read
/// the changes made since they last looked and fix their indices up instead
/// of trusting a stale snapshot.
///
/// # Change Types
///
/// - `RowInserted`: a new row was added at a specific index
/// - `RowDeleted`: a row was removed from a specific index
/// - `CellUpdated`: a single cell value changed
/// - `Reordered`: every row may have moved (sort)
///
/// # Usage Pattern
///
/// 1. Table operations push `TableChange` events
/// 2. A consumer remembers a `ChangeCursor` (generation + position)
/// 3. `Changeset::since` returns the changes after that cursor, or None when
///    the buffer was cleared in between and the consumer must rebuild
/// 4. Once every consumer has caught up, the owner calls `release`

use crate::column::CellValue;

/// Changes kept before the history is dropped and consumers must rescan
pub const MAX_RETAINED_CHANGES: usize = 10_000;

/// Represents a single change to a table
#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    /// A row was inserted at the given index
    RowInserted { index: usize, data: Vec<CellValue> },

    /// A row was deleted from the given index
    RowDeleted { index: usize },

    /// A cell value was updated
    CellUpdated {
        row: usize,
        column: String,
        new_value: CellValue,
    },

    /// Rows were reordered in place
    Reordered,
}

/// Position in a changeset's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeCursor {
    pub generation: u64,
    /// Absolute position, counting changes already released
    pub position: usize,
}

/// Buffer of changes since the last clear.
///
/// Consumers release what they have read with `release`; the buffer is also
/// cleared outright once it holds `MAX_RETAINED_CHANGES`, so a table nobody
/// watches does not grow its history forever.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    changes: Vec<TableChange>,
    /// Absolute position of `changes[0]`
    offset: usize,
    /// Generation counter - incremented each time the changeset is cleared
    generation: u64,
}

impl Changeset {
    pub fn new() -> Self {
        Changeset {
            changes: Vec::new(),
            offset: 0,
            generation: 0,
        }
    }

    /// Add a change to the changeset
    pub fn push(&mut self, change: TableChange) {
        if self.changes.len() >= MAX_RETAINED_CHANGES {
            self.clear();
        }
        self.changes.push(change);
    }

    /// Returns the retained changes
    pub fn changes(&self) -> &[TableChange] {
        &self.changes
    }

    /// Returns the current generation number
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cursor pointing just past the newest change
    pub fn cursor(&self) -> ChangeCursor {
        ChangeCursor {
            generation: self.generation,
            position: self.offset + self.changes.len(),
        }
    }

    /// Changes recorded after `cursor`.
    ///
    /// Returns None when the changeset was cleared since the cursor was taken,
    /// or when changes after it have already been released.
    pub fn since(&self, cursor: ChangeCursor) -> Option<&[TableChange]> {
        if cursor.generation != self.generation
            || cursor.position < self.offset
            || cursor.position > self.offset + self.changes.len()
        {
            return None;
        }
        Some(&self.changes[cursor.position - self.offset..])
    }

    /// Drops every change before `cursor`. Cursors at or after it stay valid.
    pub fn release(&mut self, cursor: ChangeCursor) {
        if cursor.generation != self.generation || cursor.position <= self.offset {
            return;
        }
        let count = (cursor.position - self.offset).min(self.changes.len());
        self.changes.drain(..count);
        self.offset += count;
    }

    /// Clear all changes and increment generation
    pub fn clear(&mut self) {
        self.changes.clear();
        self.offset = 0;
        self.generation += 1;
    }

    /// Returns true if there are no retained changes
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of retained changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Helper to adjust row indices after an insert or delete
///
/// When a row is inserted at index I, all indices >= I need to be incremented.
/// When a row is deleted at index I, all indices > I need to be decremented,
/// and any index == I is gone.
pub struct IndexAdjuster;

impl IndexAdjuster {
    /// Adjust a row index after a row insertion
    pub fn adjust_for_insert(row_index: usize, insert_index: usize) -> usize {
        if row_index >= insert_index {
            row_index + 1
        } else {
            row_index
        }
    }

    /// Adjust a row index after a row deletion
    /// Returns Some(new_index) or None if the index was the deleted row
    pub fn adjust_for_delete(row_index: usize, delete_index: usize) -> Option<usize> {
        if row_index == delete_index {
            None
        } else if row_index > delete_index {
            Some(row_index - 1)
        } else {
            Some(row_index)
        }
    }
}

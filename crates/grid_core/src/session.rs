use shared::domain::{CellValue, Row};

/// Where the row under edit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// The row was already in the collection.
    Existing,
    /// The row was inserted by a copy and is removed again on cancel.
    Copied,
}

/// The working copy of the single row being edited.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEditSession {
    row_index: usize,
    working: Row,
    provenance: Provenance,
}

impl RowEditSession {
    pub fn existing(row_index: usize, row: &Row) -> Self {
        Self {
            row_index,
            working: row.clone(),
            provenance: Provenance::Existing,
        }
    }

    pub fn copied(row_index: usize, row: Row) -> Self {
        Self {
            row_index,
            working: row,
            provenance: Provenance::Copied,
        }
    }

    pub fn row_index(&self) -> usize {
        self.row_index
    }

    pub fn working(&self) -> &Row {
        &self.working
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn value(&self, column: &str) -> Option<&CellValue> {
        self.working.get(column)
    }

    /// Updates the working copy only; returns the previous value.
    pub fn set(&mut self, column: &str, value: CellValue) -> Option<CellValue> {
        self.working.set(column, value)
    }

    pub fn into_working(self) -> Row {
        self.working
    }
}

use serde::{Deserialize, Serialize};

use crate::{
    domain::{CellValue, Row},
    error::Notice,
};

/// A user action against the grid, as replayed from a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GridCommand {
    EditRow {
        row_index: usize,
    },
    CopyRow {
        row_index: usize,
    },
    UpdateCell {
        column: String,
        value: CellValue,
    },
    Search {
        column: String,
        query: String,
    },
    SaveRow,
    CancelEdit,
    AddRow,
    DeleteRow {
        row_index: usize,
    },
    SaveAll,
    SyncRows {
        rows: Vec<Row>,
    },
    /// Wait for every in-flight option fetch to resolve.
    Settle,
}

/// What the grid reports back to its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GridNotification {
    Saved { rows: Vec<Row> },
    Deleted { row_index: usize },
    Added { rows: Vec<Row> },
    Copied { rows: Vec<Row>, source_index: usize },
    Notice(Notice),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;

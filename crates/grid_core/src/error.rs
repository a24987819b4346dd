use std::fmt;

use shared::error::{ErrorCode, Notice};
use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridActionKind {
    Add,
    Delete,
    Copy,
}

impl fmt::Display for GridActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GridActionKind::Add => "adding rows",
            GridActionKind::Delete => "deleting rows",
            GridActionKind::Copy => "copying rows",
        };
        f.write_str(name)
    }
}

/// Why a grid transition was rejected. The grid state is unchanged whenever
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("select {dependency} before editing {column}")]
    DependencyNotSatisfied { column: String, dependency: String },
    #[error("options for {column} are still loading from {dependency}")]
    OptionsPending { column: String, dependency: String },
    #[error("row {editing} is already being edited")]
    SessionOpen { editing: usize },
    #[error("no row is being edited")]
    NoSession,
    #[error("row {index} does not exist ({len} rows)")]
    RowOutOfRange { index: usize, len: usize },
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("column {0} is not editable")]
    ColumnNotEditable(String),
    #[error("column {0} does not support search")]
    NotSearchable(String),
    #[error("{0} is disabled for this grid")]
    ActionDisabled(GridActionKind),
}

impl GridError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GridError::Validation(_) => ErrorCode::Validation,
            GridError::DependencyNotSatisfied { .. } | GridError::OptionsPending { .. } => {
                ErrorCode::DependencyNotSatisfied
            }
            GridError::SessionOpen { .. } | GridError::NoSession => ErrorCode::SessionConflict,
            GridError::RowOutOfRange { .. }
            | GridError::UnknownColumn(_)
            | GridError::NotSearchable(_) => ErrorCode::NotFound,
            GridError::ColumnNotEditable(_) | GridError::ActionDisabled(_) => ErrorCode::Disabled,
        }
    }

    /// The user-facing message for this rejection.
    pub fn notice(&self) -> Notice {
        match self {
            GridError::DependencyNotSatisfied { .. }
            | GridError::OptionsPending { .. }
            | GridError::SessionOpen { .. } => Notice::warning(self.code(), self.to_string()),
            _ => Notice::error(self.code(), self.to_string()),
        }
    }
}

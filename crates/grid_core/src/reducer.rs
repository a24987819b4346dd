//! The grid state machine.
//!
//! `reduce` is a pure transition function: it takes a state snapshot and an
//! action and returns the next snapshot plus the effects the host must carry
//! out (callbacks, notices, option fetches). A rejected action returns an
//! error and leaves the snapshot untouched.

use std::sync::Arc;

use shared::{
    domain::{CellValue, Row, SelectOption},
    error::Notice,
};
use tracing::{debug, info};

use crate::{
    column::{CopyPlacement, GridConfig},
    error::{GridActionKind, GridError},
    options::{OptionCache, OptionQuery, OptionRequest, Resolution},
    session::{Provenance, RowEditSession},
    validation::validate_row,
};

#[derive(Debug, Clone, Default)]
pub struct GridState {
    rows: Arc<Vec<Row>>,
    session: Option<RowEditSession>,
    options: OptionCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridMode {
    Idle,
    Editing(usize),
}

impl GridState {
    pub fn new(config: &GridConfig, rows: Vec<Row>) -> Self {
        Self {
            rows: Arc::new(normalized(config, rows)),
            session: None,
            options: OptionCache::default(),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// A cheap handle on the committed collection; never mutated in place.
    pub fn rows_snapshot(&self) -> Arc<Vec<Row>> {
        Arc::clone(&self.rows)
    }

    pub fn session(&self) -> Option<&RowEditSession> {
        self.session.as_ref()
    }

    pub fn options(&self) -> &OptionCache {
        &self.options
    }

    pub fn mode(&self) -> GridMode {
        match &self.session {
            Some(session) => GridMode::Editing(session.row_index()),
            None => GridMode::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridAction {
    /// The host supplied a new collection.
    SyncRows(Vec<Row>),
    EditRow(usize),
    CopyRow(usize),
    UpdateCell { column: String, value: CellValue },
    Search { column: String, query: String },
    SaveRow,
    CancelEdit,
    AddRow,
    DeleteRow(usize),
    SaveAll,
    OptionsResolved {
        request: OptionRequest,
        result: Result<Vec<SelectOption>, String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridEffect {
    Saved(Arc<Vec<Row>>),
    Deleted(usize),
    Added(Arc<Vec<Row>>),
    Copied {
        rows: Arc<Vec<Row>>,
        source_index: usize,
    },
    Notice(Notice),
    Fetch(OptionRequest),
    OptionsSettled {
        request: OptionRequest,
        resolution: Resolution,
    },
}

#[derive(Debug, Clone)]
pub struct Reduction {
    pub state: GridState,
    pub effects: Vec<GridEffect>,
}

impl Reduction {
    fn quiet(state: GridState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }
}

pub fn reduce(
    state: &GridState,
    action: GridAction,
    config: &GridConfig,
) -> Result<Reduction, GridError> {
    let mut next = state.clone();
    match action {
        GridAction::SyncRows(rows) => {
            // Any open session is dropped without cancel cleanup.
            if let Some(session) = &next.session {
                debug!(row = session.row_index(), "sync discarded open edit session");
            }
            next.rows = Arc::new(normalized(config, rows));
            next.session = None;
            Ok(Reduction::quiet(next))
        }

        GridAction::EditRow(index) => {
            ensure_idle(&next)?;
            let row = row_at(&next, index)?;
            next.session = Some(RowEditSession::existing(index, row));
            next.options.clear_search();
            let effects = prime_options(config, &mut next);
            debug!(row = index, "edit session opened");
            Ok(Reduction {
                state: next,
                effects,
            })
        }

        GridAction::CopyRow(index) => {
            if !config.options.enable_copy {
                return Err(GridError::ActionDisabled(GridActionKind::Copy));
            }
            ensure_idle(&next)?;
            let source = row_at(&next, index)?;
            let mut copy = source.clone();
            copy.set(
                config.row_key.field(),
                config.row_key.fresh_key(source, &next.rows),
            );

            let before = next.rows_snapshot();
            let mut rows = next.rows.as_ref().clone();
            let copy_index = match config.options.copy_placement {
                CopyPlacement::Tail => {
                    rows.push(copy.clone());
                    rows.len() - 1
                }
                CopyPlacement::Head => {
                    rows.insert(0, copy.clone());
                    0
                }
            };
            next.rows = Arc::new(rows);
            next.session = Some(RowEditSession::copied(copy_index, copy));
            next.options.clear_search();

            let mut effects = vec![
                GridEffect::Copied {
                    rows: before,
                    source_index: index,
                },
                GridEffect::Notice(Notice::success("Row copied")),
            ];
            effects.extend(prime_options(config, &mut next));
            info!(source = index, copy = copy_index, "row copied into edit session");
            Ok(Reduction {
                state: next,
                effects,
            })
        }

        GridAction::UpdateCell { column, value } => update_cell(next, config, &column, value),

        GridAction::Search { column, query } => {
            if next.session.is_none() {
                return Err(GridError::NoSession);
            }
            let col = config
                .column(&column)
                .ok_or_else(|| GridError::UnknownColumn(column.clone()))?;
            if !col.is_searchable() {
                return Err(GridError::NotSearchable(column));
            }
            let request = next.options.issue(&column, OptionQuery::Search(query));
            Ok(Reduction {
                state: next,
                effects: vec![GridEffect::Fetch(request)],
            })
        }

        GridAction::SaveRow => {
            let session = next.session.as_ref().ok_or(GridError::NoSession)?;
            validate_row(config, session.working(), &next.options)?;

            let Some(session) = next.session.take() else {
                return Err(GridError::NoSession);
            };
            let index = session.row_index();
            let mut rows = next.rows.as_ref().clone();
            match rows.get_mut(index) {
                Some(slot) => *slot = session.into_working(),
                None => {
                    return Err(GridError::RowOutOfRange {
                        index,
                        len: rows.len(),
                    })
                }
            }
            next.rows = Arc::new(rows);
            next.options.clear_search();
            info!(row = index, "row committed");

            let mut effects = Vec::new();
            if config.options.auto_save {
                effects.push(GridEffect::Saved(next.rows_snapshot()));
            }
            Ok(Reduction {
                state: next,
                effects,
            })
        }

        GridAction::CancelEdit => {
            let session = next.session.take().ok_or(GridError::NoSession)?;
            next.options.clear_search();
            let mut effects = Vec::new();
            if session.provenance() == Provenance::Copied {
                let mut rows = next.rows.as_ref().clone();
                if session.row_index() < rows.len() {
                    rows.remove(session.row_index());
                }
                next.rows = Arc::new(rows);
                if config.options.auto_save {
                    effects.push(GridEffect::Saved(next.rows_snapshot()));
                }
                info!(row = session.row_index(), "copied row discarded");
            } else {
                debug!(row = session.row_index(), "edit cancelled");
            }
            Ok(Reduction {
                state: next,
                effects,
            })
        }

        GridAction::AddRow => {
            if !config.options.enable_add {
                return Err(GridError::ActionDisabled(GridActionKind::Add));
            }
            let mut row: Row = config
                .columns
                .iter()
                .map(|col| (col.key().to_string(), col.spec.initial_value()))
                .collect();
            let has_key = row
                .get(config.row_key.field())
                .is_some_and(|key| !key.is_empty());
            if !has_key {
                row.set(
                    config.row_key.field(),
                    config.row_key.fresh_key(&row, &next.rows),
                );
            }
            let mut rows = next.rows.as_ref().clone();
            rows.push(row);
            next.rows = Arc::new(rows);
            info!(rows = next.rows.len(), "row added");
            Ok(Reduction {
                effects: vec![GridEffect::Added(next.rows_snapshot())],
                state: next,
            })
        }

        GridAction::DeleteRow(index) => {
            if !config.options.enable_delete {
                return Err(GridError::ActionDisabled(GridActionKind::Delete));
            }
            ensure_idle(&next)?;
            row_at(&next, index)?;
            let mut rows = next.rows.as_ref().clone();
            rows.remove(index);
            next.rows = Arc::new(rows);
            info!(row = index, "row deleted");
            Ok(Reduction {
                effects: vec![
                    GridEffect::Deleted(index),
                    GridEffect::Saved(next.rows_snapshot()),
                ],
                state: next,
            })
        }

        GridAction::SaveAll => Ok(Reduction {
            effects: vec![GridEffect::Saved(next.rows_snapshot())],
            state: next,
        }),

        GridAction::OptionsResolved { request, result } => {
            let resolution =
                next.options
                    .resolve(&request, result, config.options.stale_responses);
            Ok(Reduction {
                state: next,
                effects: vec![GridEffect::OptionsSettled {
                    request,
                    resolution,
                }],
            })
        }
    }
}

fn update_cell(
    mut next: GridState,
    config: &GridConfig,
    column: &str,
    value: CellValue,
) -> Result<Reduction, GridError> {
    let col = config
        .column(column)
        .ok_or_else(|| GridError::UnknownColumn(column.to_string()))?;
    let session = next.session.as_mut().ok_or(GridError::NoSession)?;
    if !col.spec.editable {
        return Err(GridError::ColumnNotEditable(column.to_string()));
    }

    if let Some(dependency) = col.depends_on() {
        let dependency_title = config
            .column(dependency)
            .map_or(dependency, |dep| dep.title())
            .to_string();
        let Some(trigger) = session.value(dependency).filter(|value| !value.is_empty()) else {
            return Err(GridError::DependencyNotSatisfied {
                column: col.title().to_string(),
                dependency: dependency_title,
            });
        };
        // Options resolved for an earlier prerequisite value do not count.
        if col.dependent_source().is_some() && !next.options.is_resolved(column, trigger) {
            return Err(GridError::OptionsPending {
                column: col.title().to_string(),
                dependency: dependency_title,
            });
        }
    }

    let previous = session.set(column, value.clone());
    let mut effects = Vec::new();
    if previous.as_ref() != Some(&value) {
        if config.options.clear_stale_dependents {
            clear_dependents(config, session, column);
        }
        if !value.is_empty() {
            for dependent in config.dependents_of(column) {
                if dependent.dependent_source().is_some() {
                    let request = next
                        .options
                        .issue(dependent.key(), OptionQuery::Dependent(value.clone()));
                    effects.push(GridEffect::Fetch(request));
                }
            }
        }
    }
    Ok(Reduction {
        state: next,
        effects,
    })
}

/// Resets every column downstream of `column` in the working copy.
fn clear_dependents(config: &GridConfig, session: &mut RowEditSession, column: &str) {
    let mut pending = vec![column.to_string()];
    let mut visited = Vec::new();
    while let Some(key) = pending.pop() {
        if visited.contains(&key) {
            continue;
        }
        for dependent in config.dependents_of(&key) {
            let is_set = session
                .value(dependent.key())
                .is_some_and(|value| !value.is_empty());
            if is_set {
                debug!(column = dependent.key(), "cleared stale dependent value");
                session.set(dependent.key(), dependent.kind().empty_value());
            }
            pending.push(dependent.key().to_string());
        }
        visited.push(key);
    }
}

/// Issues the initial fetches for a freshly opened session.
fn prime_options(config: &GridConfig, state: &mut GridState) -> Vec<GridEffect> {
    let Some(session) = &state.session else {
        return Vec::new();
    };
    let mut effects = Vec::new();
    for col in &config.columns {
        if let (Some(dependency), Some(_)) = (col.depends_on(), col.dependent_source()) {
            if let Some(value) = session.value(dependency).filter(|v| !v.is_empty()) {
                let request = state
                    .options
                    .issue(col.key(), OptionQuery::Dependent(value.clone()));
                effects.push(GridEffect::Fetch(request));
            }
        } else if col.is_searchable() {
            let request = state
                .options
                .issue(col.key(), OptionQuery::Search(String::new()));
            effects.push(GridEffect::Fetch(request));
        }
    }
    effects
}

fn ensure_idle(state: &GridState) -> Result<(), GridError> {
    match &state.session {
        Some(session) => Err(GridError::SessionOpen {
            editing: session.row_index(),
        }),
        None => Ok(()),
    }
}

fn row_at(state: &GridState, index: usize) -> Result<&Row, GridError> {
    state.rows.get(index).ok_or(GridError::RowOutOfRange {
        index,
        len: state.rows.len(),
    })
}

fn normalized(config: &GridConfig, mut rows: Vec<Row>) -> Vec<Row> {
    for row in &mut rows {
        config.normalize_row(row);
    }
    rows
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;

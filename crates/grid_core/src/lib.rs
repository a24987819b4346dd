//! Editable grid engine: single-row edit sessions over a row collection,
//! commit-time validation, and dependent/autocomplete option resolution.
//!
//! [`reducer::reduce`] holds every state transition. [`EditableGrid`] owns a
//! state snapshot, runs the resulting effects against a [`GridObserver`], and
//! drives option fetches on the Tokio runtime.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use shared::{
    domain::{CellValue, Row, SelectOption},
    error::Notice,
};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, info, warn};

pub mod column;
pub mod display;
pub mod error;
pub mod options;
pub mod reducer;
pub mod session;
pub mod validation;

pub use column::{
    ColumnDef, CopyPlacement, DependentOptionSource, GridConfig, GridOptions, RowKey,
    SearchOptionSource,
};
pub use error::{GridActionKind, GridError};
pub use options::{OptionQuery, OptionRequest, Resolution, StaleResponsePolicy};
pub use reducer::{reduce, GridAction, GridEffect, GridMode, GridState};
pub use session::{Provenance, RowEditSession};
pub use validation::ValidationError;

/// Host callbacks. Every collection handed out is the post-mutation state.
pub trait GridObserver: Send + Sync {
    /// After a commit, a delete, a cancelled copy, or a save-all.
    fn on_save(&self, rows: &[Row]);

    /// Before `on_save` when a row is deleted.
    fn on_delete(&self, _row_index: usize) {}

    fn on_add(&self, _rows: &[Row]) {}

    /// With the collection as it was before the copy was inserted.
    fn on_copy(&self, _rows: &[Row], _source_index: usize) {}

    fn on_notice(&self, _notice: &Notice) {}

    /// Confirmation step for deletes. Declining makes the delete a no-op.
    fn confirm_delete(&self, _row_index: usize, _row: &Row) -> bool {
        true
    }
}

pub struct NoopObserver;

impl GridObserver for NoopObserver {
    fn on_save(&self, _rows: &[Row]) {}
}

struct ResolvedOptions {
    request: OptionRequest,
    result: Result<Vec<SelectOption>, String>,
}

pub struct EditableGrid {
    config: Arc<GridConfig>,
    state: GridState,
    observer: Arc<dyn GridObserver>,
    resolved_tx: mpsc::UnboundedSender<ResolvedOptions>,
    resolved_rx: mpsc::UnboundedReceiver<ResolvedOptions>,
    in_flight: usize,
}

impl EditableGrid {
    pub fn new(config: GridConfig, rows: Vec<Row>, observer: Arc<dyn GridObserver>) -> Self {
        let state = GridState::new(&config, rows);
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            state,
            observer,
            resolved_tx,
            resolved_rx,
            in_flight: 0,
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn state(&self) -> &GridState {
        &self.state
    }

    pub fn rows(&self) -> &[Row] {
        self.state.rows()
    }

    pub fn rows_snapshot(&self) -> Arc<Vec<Row>> {
        self.state.rows_snapshot()
    }

    pub fn mode(&self) -> GridMode {
        self.state.mode()
    }

    pub fn session(&self) -> Option<&RowEditSession> {
        self.state.session()
    }

    /// Replaces the collection with one supplied by the host. Any open
    /// session is dropped without cancel-side cleanup.
    pub fn sync_rows(&mut self, rows: Vec<Row>) {
        if let Err(err) = self.dispatch(GridAction::SyncRows(rows)) {
            warn!(error = %err, "row sync rejected");
        }
    }

    pub fn edit_row(&mut self, row_index: usize) -> Result<(), GridError> {
        self.dispatch(GridAction::EditRow(row_index))
    }

    pub fn copy_row(&mut self, row_index: usize) -> Result<(), GridError> {
        self.dispatch(GridAction::CopyRow(row_index))
    }

    pub fn update_cell(
        &mut self,
        column: &str,
        value: impl Into<CellValue>,
    ) -> Result<(), GridError> {
        self.dispatch(GridAction::UpdateCell {
            column: column.to_string(),
            value: value.into(),
        })
    }

    pub fn search(&mut self, column: &str, query: &str) -> Result<(), GridError> {
        self.dispatch(GridAction::Search {
            column: column.to_string(),
            query: query.to_string(),
        })
    }

    pub fn save_row(&mut self) -> Result<(), GridError> {
        self.dispatch(GridAction::SaveRow)
    }

    pub fn cancel_edit(&mut self) -> Result<(), GridError> {
        self.dispatch(GridAction::CancelEdit)
    }

    pub fn add_row(&mut self) -> Result<(), GridError> {
        self.dispatch(GridAction::AddRow)
    }

    /// Returns `Ok(false)` when the observer declined the confirmation.
    pub fn delete_row(&mut self, row_index: usize) -> Result<bool, GridError> {
        if self.state.session().is_none() {
            if let Some(row) = self.state.rows().get(row_index) {
                if !self.observer.confirm_delete(row_index, row) {
                    info!(row = row_index, "delete not confirmed");
                    return Ok(false);
                }
            }
        }
        self.dispatch(GridAction::DeleteRow(row_index))?;
        Ok(true)
    }

    pub fn save_all(&mut self) {
        if let Err(err) = self.dispatch(GridAction::SaveAll) {
            warn!(error = %err, "save all rejected");
        }
    }

    /// The options a column offers right now, for the row under edit.
    pub fn options_for(&self, column: &str) -> &[SelectOption] {
        let working = self.state.session().map(RowEditSession::working);
        self.config
            .column(column)
            .and_then(|col| self.state.options().options_for(col, working))
            .unwrap_or_default()
    }

    pub fn is_loading(&self, column: &str) -> bool {
        self.state.options().is_loading(column)
    }

    pub fn any_loading(&self) -> bool {
        self.state.options().any_loading()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Whether the cell would accept input: the row is under edit, the column
    /// is editable, and any dependency has a value and resolved options.
    pub fn is_cell_editable(&self, row_index: usize, column: &str) -> bool {
        let Some(session) = self.state.session() else {
            return false;
        };
        let Some(col) = self.config.column(column) else {
            return false;
        };
        if session.row_index() != row_index || !col.spec.editable {
            return false;
        }
        match col.depends_on() {
            None => true,
            Some(dependency) => match session.value(dependency) {
                Some(value) if !value.is_empty() => {
                    col.dependent_source().is_none()
                        || self.state.options().is_resolved(column, value)
                }
                _ => false,
            },
        }
    }

    /// Read-only rendering of a cell, using the working copy for the row under edit.
    pub fn display(&self, row_index: usize, column: &str) -> String {
        let row = match self.state.session() {
            Some(session) if session.row_index() == row_index => Some(session.working()),
            _ => self.state.rows().get(row_index),
        };
        let options = self
            .config
            .column(column)
            .and_then(|col| self.state.options().options_for(col, row));
        display::display_value(row.and_then(|row| row.get(column)), options)
    }

    /// Applies every option response that has already arrived.
    pub fn apply_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(resolved) = self.resolved_rx.try_recv() {
            self.absorb(resolved);
            applied += 1;
        }
        applied
    }

    /// Waits for the next option response and applies it. `None` when
    /// nothing is in flight.
    pub async fn next_resolution(&mut self) -> Option<Resolution> {
        if self.in_flight == 0 {
            return None;
        }
        let resolved = self.resolved_rx.recv().await?;
        Some(self.absorb(resolved))
    }

    /// Waits until every in-flight option fetch has resolved.
    pub async fn settle(&mut self) {
        while self.next_resolution().await.is_some() {}
    }

    fn dispatch(&mut self, action: GridAction) -> Result<(), GridError> {
        self.apply(action).map(|_| ())
    }

    fn apply(&mut self, action: GridAction) -> Result<Option<Resolution>, GridError> {
        match reduce(&self.state, action, &self.config) {
            Ok(reduction) => {
                self.state = reduction.state;
                Ok(self.run_effects(reduction.effects))
            }
            Err(err) => {
                warn!(error = %err, "grid action rejected");
                self.observer.on_notice(&err.notice());
                Err(err)
            }
        }
    }

    fn absorb(&mut self, resolved: ResolvedOptions) -> Resolution {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Err(err) = &resolved.result {
            warn!(
                column = %resolved.request.ticket.column,
                error = %err,
                "option fetch failed; keeping previous options"
            );
        }
        self.apply(GridAction::OptionsResolved {
            request: resolved.request,
            result: resolved.result,
        })
        .ok()
        .flatten()
        .unwrap_or(Resolution::Failed)
    }

    fn run_effects(&mut self, effects: Vec<GridEffect>) -> Option<Resolution> {
        let mut settled = None;
        for effect in effects {
            match effect {
                GridEffect::Saved(rows) => self.observer.on_save(&rows),
                GridEffect::Deleted(row_index) => self.observer.on_delete(row_index),
                GridEffect::Added(rows) => self.observer.on_add(&rows),
                GridEffect::Copied { rows, source_index } => {
                    self.observer.on_copy(&rows, source_index)
                }
                GridEffect::Notice(notice) => self.observer.on_notice(&notice),
                GridEffect::Fetch(request) => self.spawn_fetch(request),
                GridEffect::OptionsSettled {
                    request,
                    resolution,
                } => {
                    debug!(
                        column = %request.ticket.column,
                        seq = request.ticket.seq,
                        ?resolution,
                        "option response settled"
                    );
                    settled = Some(resolution);
                }
            }
        }
        settled
    }

    fn spawn_fetch(&mut self, request: OptionRequest) {
        let fetch = self
            .config
            .column(&request.ticket.column)
            .and_then(|col| option_fetch(col, &request.query));
        let tx = self.resolved_tx.clone();
        self.in_flight += 1;

        let Some(fetch) = fetch else {
            let _ = tx.send(ResolvedOptions {
                request,
                result: Err("column has no option source".into()),
            });
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // Every spawned fetch reports back, panics included.
                    let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                        Ok(result) => result.map_err(|err| format!("{err:#}")),
                        Err(_) => Err("option source panicked".to_string()),
                    };
                    let _ = tx.send(ResolvedOptions { request, result });
                });
            }
            Err(_) => {
                let _ = tx.send(ResolvedOptions {
                    request,
                    result: Err("no async runtime available for option fetch".into()),
                });
            }
        }
    }
}

type OptionFetch = BoxFuture<'static, anyhow::Result<Vec<SelectOption>>>;

fn option_fetch(column: &ColumnDef, query: &OptionQuery) -> Option<OptionFetch> {
    match query {
        OptionQuery::Dependent(value) => column.dependent_source().map(|source| {
            let source = Arc::clone(source);
            let value = value.clone();
            async move { source.options_for(&value).await }.boxed()
        }),
        OptionQuery::Search(query) => column.search_source().map(|source| {
            let source = Arc::clone(source);
            let query = query.clone();
            async move { source.search(&query).await }.boxed()
        }),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

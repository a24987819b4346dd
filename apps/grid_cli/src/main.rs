use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::Parser;
use grid_core::{CopyPlacement, EditableGrid, GridObserver};
use shared::{
    domain::Row,
    error::Notice,
    protocol::{GridCommand, GridNotification},
};
use tracing::{debug, info, warn};

mod config;
mod fixture;

use config::load_settings;
use fixture::{build_config, GridDefinition};

/// Replays a scripted editing session against a grid definition and prints
/// every notification as a JSON line.
#[derive(Parser, Debug)]
struct Args {
    /// Grid definition (TOML): columns, rows, validation, option tables.
    #[arg(long)]
    grid: PathBuf,
    /// JSON array of grid commands.
    #[arg(long)]
    script: PathBuf,
    /// Settings file; defaults to an optional ./grid_cli.toml.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Commits wait for an explicit save_all.
    #[arg(long)]
    manual_save: bool,
    /// Insert copied rows at the top.
    #[arg(long)]
    copy_to_head: bool,
}

/// Writes each notification as one JSON line.
struct JsonLines<W> {
    out: Mutex<W>,
}

impl<W: Write> JsonLines<W> {
    fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, notification: &GridNotification) {
        let line = match serde_json::to_string(notification) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to encode notification");
                return;
            }
        };
        let Ok(mut out) = self.out.lock() else {
            warn!("notification writer poisoned");
            return;
        };
        if let Err(err) = writeln!(out, "{line}") {
            warn!(error = %err, "failed to write notification");
        }
    }
}

impl<W: Write + Send> GridObserver for JsonLines<W> {
    fn on_save(&self, rows: &[Row]) {
        self.emit(&GridNotification::Saved {
            rows: rows.to_vec(),
        });
    }

    fn on_delete(&self, row_index: usize) {
        self.emit(&GridNotification::Deleted { row_index });
    }

    fn on_add(&self, rows: &[Row]) {
        self.emit(&GridNotification::Added {
            rows: rows.to_vec(),
        });
    }

    fn on_copy(&self, rows: &[Row], source_index: usize) {
        self.emit(&GridNotification::Copied {
            rows: rows.to_vec(),
            source_index,
        });
    }

    fn on_notice(&self, notice: &Notice) {
        self.emit(&GridNotification::Notice(notice.clone()));
    }
}

fn load_script(path: &Path) -> Result<Vec<GridCommand>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read script '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid script '{}'", path.display()))
}

/// Runs every command in order. Rejected commands are reported through the
/// observer and do not stop the replay.
async fn run_script(grid: &mut EditableGrid, script: Vec<GridCommand>) {
    for (step, command) in script.into_iter().enumerate() {
        debug!(step, ?command, "replaying command");
        let outcome = match command {
            GridCommand::EditRow { row_index } => grid.edit_row(row_index),
            GridCommand::CopyRow { row_index } => grid.copy_row(row_index),
            GridCommand::UpdateCell { column, value } => grid.update_cell(&column, value),
            GridCommand::Search { column, query } => grid.search(&column, &query),
            GridCommand::SaveRow => grid.save_row(),
            GridCommand::CancelEdit => grid.cancel_edit(),
            GridCommand::AddRow => grid.add_row(),
            GridCommand::DeleteRow { row_index } => grid.delete_row(row_index).map(|_| ()),
            GridCommand::SaveAll => {
                grid.save_all();
                Ok(())
            }
            GridCommand::SyncRows { rows } => {
                grid.sync_rows(rows);
                Ok(())
            }
            GridCommand::Settle => {
                grid.settle().await;
                Ok(())
            }
        };
        if let Err(err) = outcome {
            info!(step, error = %err, "command rejected");
        }
    }
    grid.settle().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = load_settings(args.settings.as_deref())?;
    if args.manual_save {
        settings.auto_save = false;
    }
    if args.copy_to_head {
        settings.copy_placement = CopyPlacement::Head;
    }

    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .with_writer(std::io::stderr)
        .init();

    let definition = GridDefinition::load(&args.grid)?;
    let script = load_script(&args.script)?;
    let config = build_config(&definition, &settings)?;
    info!(
        columns = config.columns.len(),
        rows = definition.rows.len(),
        commands = script.len(),
        "replaying grid script"
    );

    let observer = Arc::new(JsonLines::new(std::io::stdout()));
    let mut grid = EditableGrid::new(config, definition.rows, observer);
    run_script(&mut grid, script).await;

    println!(
        "{}",
        serde_json::to_string(&serde_json::json!({ "rows": grid.rows() }))?
    );
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

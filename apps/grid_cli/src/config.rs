use std::path::Path;

use anyhow::Context;
use config::{Config, Environment, File};
use grid_core::{CopyPlacement, GridOptions, StaleResponsePolicy};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_filter: String,
    pub auto_save: bool,
    pub copy_placement: CopyPlacement,
    pub stale_responses: StaleResponsePolicy,
    /// Simulated latency for the fixture option sources.
    pub fetch_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            auto_save: true,
            copy_placement: CopyPlacement::Tail,
            stale_responses: StaleResponsePolicy::Discard,
            fetch_delay_ms: 0,
        }
    }
}

impl Settings {
    pub fn apply(&self, options: &mut GridOptions) {
        options.auto_save = self.auto_save;
        options.copy_placement = self.copy_placement;
        options.stale_responses = self.stale_responses;
    }
}

/// Defaults, then `grid_cli.toml` (or the given file, which must exist),
/// then `APP__*` environment variables.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("grid_cli").required(false),
    };

    Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read grid_cli settings")?
        .try_deserialize()
        .context("invalid grid_cli settings")
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

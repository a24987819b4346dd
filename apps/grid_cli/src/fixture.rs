//! Grid definitions loaded from TOML, with in-memory option sources backing
//! the dependent and autocomplete columns.

use std::{collections::HashMap, fs, path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use grid_core::{
    ColumnDef, DependentOptionSource, GridConfig, GridOptions, RowKey, SearchOptionSource,
};
use serde::Deserialize;
use shared::domain::{CellValue, ColumnKind, ColumnSpec, Row, SelectOption, ValidationRule};

use crate::config::Settings;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridDefinition {
    pub row_key: String,
    /// Mint UUIDs instead of sequential keys for new and copied rows.
    pub uuid_keys: bool,
    pub options: GridOptions,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Row>,
    pub validation: HashMap<String, ValidationRule>,
    /// Dependent column -> prerequisite value -> options.
    pub lookups: HashMap<String, HashMap<String, Vec<SelectOption>>>,
    /// Autocomplete column -> searchable options.
    pub searches: HashMap<String, Vec<SelectOption>>,
}

impl Default for GridDefinition {
    fn default() -> Self {
        Self {
            row_key: "id".into(),
            uuid_keys: false,
            options: GridOptions::default(),
            columns: Vec::new(),
            rows: Vec::new(),
            validation: HashMap::new(),
            lookups: HashMap::new(),
            searches: HashMap::new(),
        }
    }
}

impl GridDefinition {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read grid definition '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("invalid grid definition '{}'", path.display()))
    }
}

pub struct LookupOptionSource {
    table: HashMap<String, Vec<SelectOption>>,
    delay: Duration,
}

impl LookupOptionSource {
    pub fn new(table: HashMap<String, Vec<SelectOption>>, delay: Duration) -> Self {
        Self { table, delay }
    }
}

#[async_trait]
impl DependentOptionSource for LookupOptionSource {
    async fn options_for(&self, dependent_value: &CellValue) -> anyhow::Result<Vec<SelectOption>> {
        tokio::time::sleep(self.delay).await;
        self.table
            .get(&dependent_value.to_string())
            .cloned()
            .ok_or_else(|| anyhow!("no lookup entry for '{dependent_value}'"))
    }
}

pub struct StaticSearchSource {
    options: Vec<SelectOption>,
    delay: Duration,
}

impl StaticSearchSource {
    pub fn new(options: Vec<SelectOption>, delay: Duration) -> Self {
        Self { options, delay }
    }
}

#[async_trait]
impl SearchOptionSource for StaticSearchSource {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SelectOption>> {
        tokio::time::sleep(self.delay).await;
        let needle = query.to_lowercase();
        Ok(self
            .options
            .iter()
            .filter(|opt| opt.label.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

/// Builds the engine configuration, wiring lookup tables and search lists to
/// the columns that name them.
pub fn build_config(definition: &GridDefinition, settings: &Settings) -> anyhow::Result<GridConfig> {
    let delay = Duration::from_millis(settings.fetch_delay_ms);
    let known = |key: &str| definition.columns.iter().any(|spec| spec.key == key);

    for key in definition
        .lookups
        .keys()
        .chain(definition.searches.keys())
        .chain(definition.validation.keys())
    {
        if !known(key) {
            bail!("definition references unknown column '{key}'");
        }
    }

    let mut columns = Vec::with_capacity(definition.columns.len());
    for spec in &definition.columns {
        let mut column = ColumnDef::from(spec.clone());

        if let Some(dependency) = &spec.depends_on {
            if !known(dependency) {
                bail!("column '{}' depends on unknown column '{dependency}'", spec.key);
            }
        }

        if let Some(table) = definition.lookups.get(&spec.key) {
            let Some(dependency) = spec.depends_on.clone() else {
                bail!("lookup table for '{}' needs a depends_on column", spec.key);
            };
            column = column.with_dependent_source(
                dependency,
                Arc::new(LookupOptionSource::new(table.clone(), delay)),
            );
        }

        if let Some(options) = definition.searches.get(&spec.key) {
            if spec.kind != ColumnKind::AutocompleteSelect {
                bail!("search list for '{}' needs an autocomplete_select column", spec.key);
            }
            column = column.with_search_source(Arc::new(StaticSearchSource::new(
                options.clone(),
                delay,
            )));
        }

        columns.push(column);
    }

    let row_key = if definition.uuid_keys {
        RowKey::uuid(definition.row_key.clone())
    } else {
        RowKey::Field(definition.row_key.clone())
    };

    let mut options = definition.options.clone();
    settings.apply(&mut options);

    let mut config = GridConfig::new(columns)
        .with_row_key(row_key)
        .with_options(options);
    for (column, rule) in &definition.validation {
        config = config.with_rule(column.clone(), rule.clone());
    }
    Ok(config)
}

#[cfg(test)]
#[path = "tests/fixture_tests.rs"]
mod tests;

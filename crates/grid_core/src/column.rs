use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{CellValue, ColumnKind, ColumnSpec, Row, SelectOption, ValidationRule};

use crate::options::StaleResponsePolicy;

/// Supplies options for a column whose choices depend on another column's value.
#[async_trait]
pub trait DependentOptionSource: Send + Sync {
    async fn options_for(&self, dependent_value: &CellValue) -> anyhow::Result<Vec<SelectOption>>;
}

/// Supplies options for an autocomplete column from free-text input.
#[async_trait]
pub trait SearchOptionSource: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SelectOption>>;
}

#[derive(Clone)]
pub struct ColumnDef {
    pub spec: ColumnSpec,
    dependent_source: Option<Arc<dyn DependentOptionSource>>,
    search_source: Option<Arc<dyn SearchOptionSource>>,
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("spec", &self.spec)
            .field("dependent_source", &self.dependent_source.is_some())
            .field("search_source", &self.search_source.is_some())
            .finish()
    }
}

impl From<ColumnSpec> for ColumnDef {
    fn from(spec: ColumnSpec) -> Self {
        Self {
            spec,
            dependent_source: None,
            search_source: None,
        }
    }
}

impl ColumnDef {
    pub fn new(key: impl Into<String>, title: impl Into<String>, kind: ColumnKind) -> Self {
        ColumnSpec::new(key, title, kind).into()
    }

    pub fn text(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(key, title, ColumnKind::Text)
    }

    pub fn number(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(key, title, ColumnKind::Number)
    }

    pub fn key(&self) -> &str {
        &self.spec.key
    }

    pub fn title(&self) -> &str {
        &self.spec.title
    }

    pub fn kind(&self) -> ColumnKind {
        self.spec.kind
    }

    pub fn depends_on(&self) -> Option<&str> {
        self.spec.depends_on.as_deref()
    }

    pub fn static_options(&self) -> Option<&[SelectOption]> {
        self.spec.options.as_deref()
    }

    pub fn dependent_source(&self) -> Option<&Arc<dyn DependentOptionSource>> {
        self.dependent_source.as_ref()
    }

    pub fn search_source(&self) -> Option<&Arc<dyn SearchOptionSource>> {
        self.search_source.as_ref()
    }

    /// Free-text search only applies to autocomplete columns that do not
    /// depend on another column.
    pub fn is_searchable(&self) -> bool {
        self.spec.kind == ColumnKind::AutocompleteSelect
            && self.spec.depends_on.is_none()
            && self.search_source.is_some()
    }

    pub fn editable(mut self) -> Self {
        self.spec.editable = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.spec.required = true;
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.spec.min = Some(min);
        self
    }

    pub fn with_default(mut self, value: impl Into<CellValue>) -> Self {
        self.spec.default_value = Some(value.into());
        self
    }

    pub fn with_options(mut self, options: Vec<SelectOption>) -> Self {
        self.spec.options = Some(options);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.spec.format = Some(format.into());
        self
    }

    pub fn with_dependent_source(
        mut self,
        depends_on: impl Into<String>,
        source: Arc<dyn DependentOptionSource>,
    ) -> Self {
        self.spec.depends_on = Some(depends_on.into());
        self.dependent_source = Some(source);
        self
    }

    pub fn with_search_source(mut self, source: Arc<dyn SearchOptionSource>) -> Self {
        self.search_source = Some(source);
        self
    }
}

type KeyGenerator = Arc<dyn Fn(&Row, &[Row]) -> String + Send + Sync>;

/// How rows are identified and how fresh keys are minted for copied and added rows.
#[derive(Clone)]
pub enum RowKey {
    /// Sequential numeric keys stored as text, starting at `len + 1`.
    Field(String),
    Generated {
        field: String,
        generate: KeyGenerator,
    },
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Field(field) => f.debug_tuple("Field").field(field).finish(),
            RowKey::Generated { field, .. } => {
                f.debug_struct("Generated").field("field", field).finish()
            }
        }
    }
}

impl Default for RowKey {
    fn default() -> Self {
        RowKey::Field("id".into())
    }
}

impl RowKey {
    pub fn generated(
        field: impl Into<String>,
        generate: impl Fn(&Row, &[Row]) -> String + Send + Sync + 'static,
    ) -> Self {
        RowKey::Generated {
            field: field.into(),
            generate: Arc::new(generate),
        }
    }

    pub fn uuid(field: impl Into<String>) -> Self {
        Self::generated(field, |_, _| uuid::Uuid::new_v4().to_string())
    }

    pub fn field(&self) -> &str {
        match self {
            RowKey::Field(field) | RowKey::Generated { field, .. } => field,
        }
    }

    pub fn key_of(&self, row: &Row) -> Option<String> {
        row.get(self.field()).map(ToString::to_string)
    }

    pub(crate) fn fresh_key(&self, source: &Row, rows: &[Row]) -> CellValue {
        match self {
            RowKey::Field(field) => {
                let mut candidate = rows.len() + 1;
                while rows.iter().any(|row| {
                    row.get(field)
                        .is_some_and(|key| key.to_string() == candidate.to_string())
                }) {
                    candidate += 1;
                }
                CellValue::Text(candidate.to_string())
            }
            RowKey::Generated { generate, .. } => CellValue::Text(generate(source, rows)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyPlacement {
    Head,
    #[default]
    Tail,
}

/// Behaviour flags for one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOptions {
    pub enable_add: bool,
    pub enable_delete: bool,
    pub enable_copy: bool,
    pub copy_placement: CopyPlacement,
    /// When false, commits only reach `on_save` through an explicit save-all.
    pub auto_save: bool,
    pub stale_responses: StaleResponsePolicy,
    /// Reset dependent columns when the column they depend on changes.
    pub clear_stale_dependents: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            enable_add: true,
            enable_delete: true,
            enable_copy: true,
            copy_placement: CopyPlacement::Tail,
            auto_save: true,
            stale_responses: StaleResponsePolicy::Discard,
            clear_stale_dependents: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveRule {
    pub required: bool,
    pub min: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct GridConfig {
    pub columns: Vec<ColumnDef>,
    pub row_key: RowKey,
    pub options: GridOptions,
    pub validation: HashMap<String, ValidationRule>,
}

impl GridConfig {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub fn with_row_key(mut self, row_key: RowKey) -> Self {
        self.row_key = row_key;
        self
    }

    pub fn with_options(mut self, options: GridOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_rule(mut self, column: impl Into<String>, rule: ValidationRule) -> Self {
        self.validation.insert(column.into(), rule);
        self
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|col| col.key() == key)
    }

    pub fn dependents_of<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a ColumnDef> + 'a {
        self.columns
            .iter()
            .filter(move |col| col.depends_on() == Some(key))
    }

    /// Column flags merged with the validation map; the map's `min` wins.
    pub fn effective_rule(&self, column: &ColumnDef) -> EffectiveRule {
        let rule = self.validation.get(column.key());
        EffectiveRule {
            required: column.spec.required || rule.is_some_and(|r| r.required),
            min: rule.and_then(|r| r.min).or(column.spec.min),
        }
    }

    /// Fills in every declared column missing from `row`.
    pub fn normalize_row(&self, row: &mut Row) {
        for col in &self.columns {
            if !row.contains(col.key()) {
                row.set(col.key(), col.spec.initial_value());
            }
        }
    }
}

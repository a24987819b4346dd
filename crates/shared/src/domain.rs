use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// A single option value or list element: either text or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => f.write_str(&format_number(*n)),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value as f64)
    }
}

/// The value held by one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    List(Vec<Scalar>),
}

impl CellValue {
    pub fn empty_text() -> Self {
        CellValue::Text(String::new())
    }

    /// Blank text, NaN and empty lists all count as "no value".
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(n) => n.is_nan(),
            CellValue::List(items) => items.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Scalar]> {
        match self {
            CellValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Single-valued cells as a scalar; `None` for lists.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            CellValue::Number(n) => Some(Scalar::Number(*n)),
            CellValue::Text(s) => Some(Scalar::Text(s.clone())),
            CellValue::List(_) => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::List(items) => {
                let joined = items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                f.write_str(&joined)
            }
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<Vec<Scalar>> for CellValue {
    fn from(value: Vec<Scalar>) -> Self {
        CellValue::List(value)
    }
}

/// Renders whole numbers without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: Scalar,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<Scalar>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// One grid row: column key to cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, CellValue>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<CellValue>) -> Option<CellValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CellValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<CellValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Text,
    Number,
    Email,
    Select,
    MultipleSelect,
    AutocompleteSelect,
    Date,
}

impl ColumnKind {
    pub fn is_select(self) -> bool {
        matches!(
            self,
            ColumnKind::Select | ColumnKind::MultipleSelect | ColumnKind::AutocompleteSelect
        )
    }

    /// The value a fresh cell of this kind starts with when no default is declared.
    pub fn empty_value(self) -> CellValue {
        match self {
            ColumnKind::MultipleSelect => CellValue::List(Vec::new()),
            _ => CellValue::empty_text(),
        }
    }
}

/// The declarative half of a column definition. Option sources are attached
/// separately by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub key: String,
    pub title: String,
    #[serde(default, rename = "type")]
    pub kind: ColumnKind,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<CellValue>,
    #[serde(default)]
    pub options: Option<Vec<SelectOption>>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub format: Option<String>,
}

impl ColumnSpec {
    pub fn new(key: impl Into<String>, title: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            kind,
            editable: false,
            required: false,
            default_value: None,
            options: None,
            depends_on: None,
            min: None,
            format: None,
        }
    }

    pub fn initial_value(&self) -> CellValue {
        self.default_value
            .clone()
            .unwrap_or_else(|| self.kind.empty_value())
    }
}

/// Per-column validation overrides, merged with the column's own flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;

//! Option resolution state: static, dependent and autocomplete option lists,
//! per-column loading flags, and request sequencing.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared::domain::{CellValue, ColumnKind, Row, SelectOption};
use tracing::debug;

use crate::column::ColumnDef;

/// What to do with a response that resolves after a newer request for the
/// same column was issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleResponsePolicy {
    /// Apply only the response to the latest request for the column.
    #[default]
    Discard,
    /// Apply every response in arrival order.
    LastResolvedWins,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionQuery {
    Dependent(CellValue),
    Search(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionTicket {
    pub column: String,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionRequest {
    pub ticket: OptionTicket,
    pub query: OptionQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Discarded,
    Failed,
}

/// Options resolved for one value of the column a dependent column depends on.
#[derive(Debug, Clone)]
struct DependentOptions {
    trigger: CellValue,
    options: Vec<SelectOption>,
}

#[derive(Debug, Clone, Default)]
pub struct OptionCache {
    dynamic: HashMap<String, DependentOptions>,
    search: HashMap<String, Vec<SelectOption>>,
    latest: HashMap<String, u64>,
    latest_trigger: HashMap<String, CellValue>,
    loading: HashSet<String>,
    next_seq: u64,
}

impl OptionCache {
    /// Registers a new request for `column` and marks the column loading.
    pub fn issue(&mut self, column: &str, query: OptionQuery) -> OptionRequest {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.latest.insert(column.to_string(), seq);
        if let OptionQuery::Dependent(value) = &query {
            self.latest_trigger.insert(column.to_string(), value.clone());
        }
        self.loading.insert(column.to_string());
        debug!(column, seq, ?query, "option request issued");
        OptionRequest {
            ticket: OptionTicket {
                column: column.to_string(),
                seq,
            },
            query,
        }
    }

    pub fn resolve(
        &mut self,
        request: &OptionRequest,
        result: Result<Vec<SelectOption>, String>,
        policy: StaleResponsePolicy,
    ) -> Resolution {
        let column = request.ticket.column.as_str();
        let is_latest = self.latest.get(column) == Some(&request.ticket.seq);

        if policy == StaleResponsePolicy::Discard && !is_latest {
            debug!(column, seq = request.ticket.seq, "stale option response discarded");
            return Resolution::Discarded;
        }

        // Only the latest request settles the loading flag.
        if is_latest {
            self.loading.remove(column);
        }
        match result {
            Ok(options) => {
                match &request.query {
                    OptionQuery::Dependent(trigger) => {
                        // Under last-resolved-wins whatever arrives last is
                        // what the column offers for its current prerequisite.
                        let trigger = match policy {
                            StaleResponsePolicy::Discard => trigger,
                            StaleResponsePolicy::LastResolvedWins => {
                                self.latest_trigger.get(column).unwrap_or(trigger)
                            }
                        };
                        let trigger = trigger.clone();
                        self.dynamic.insert(
                            column.to_string(),
                            DependentOptions { trigger, options },
                        );
                    }
                    OptionQuery::Search(_) => {
                        self.search.insert(column.to_string(), options);
                    }
                }
                Resolution::Applied
            }
            Err(_) => Resolution::Failed,
        }
    }

    /// The options a column currently offers for `row`.
    ///
    /// Dependent columns use the list resolved for the row's current
    /// prerequisite value and otherwise fall back to the static list;
    /// autocomplete columns prefer the latest search results.
    pub fn options_for<'a>(
        &'a self,
        column: &'a ColumnDef,
        row: Option<&Row>,
    ) -> Option<&'a [SelectOption]> {
        if let Some(dependency) = column.depends_on() {
            let current = row.and_then(|row| row.get(dependency));
            return self
                .dynamic
                .get(column.key())
                .filter(|resolved| Some(&resolved.trigger) == current)
                .map(|resolved| resolved.options.as_slice())
                .or_else(|| column.static_options());
        }
        if column.kind() == ColumnKind::AutocompleteSelect {
            if let Some(results) = self.search.get(column.key()) {
                return Some(results.as_slice());
            }
        }
        column.static_options()
    }

    /// The options a committed value must belong to.
    ///
    /// Search results only narrow what is offered, so autocomplete columns
    /// check their declared list. A column with a dependent source must match
    /// options resolved for the row's current prerequisite value; with none
    /// resolved and no static list, no non-empty value is accepted.
    pub fn allowed_for<'a>(
        &'a self,
        column: &'a ColumnDef,
        row: Option<&Row>,
    ) -> Option<&'a [SelectOption]> {
        if column.dependent_source().is_some() {
            return Some(self.options_for(column, row).unwrap_or_default());
        }
        if column.kind() == ColumnKind::AutocompleteSelect {
            return column.static_options();
        }
        self.options_for(column, row)
    }

    /// Whether a dependent column holds a successful response for `trigger`.
    pub fn is_resolved(&self, column: &str, trigger: &CellValue) -> bool {
        self.dynamic
            .get(column)
            .is_some_and(|resolved| &resolved.trigger == trigger)
    }

    pub fn is_loading(&self, column: &str) -> bool {
        self.loading.contains(column)
    }

    pub fn any_loading(&self) -> bool {
        !self.loading.is_empty()
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
    }
}

#[cfg(test)]
#[path = "tests/options_tests.rs"]
mod tests;

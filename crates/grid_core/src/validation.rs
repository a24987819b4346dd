//! Commit-time validation of a working row.
//!
//! Each column is checked in declaration order and validation stops at the
//! first failing column. Within a column the checks run as: required-ness,
//! minimum (length, value or count depending on the value), date format,
//! then option membership.

use chrono::{NaiveDate, NaiveDateTime};
use shared::domain::{CellValue, ColumnKind, Row, Scalar, SelectOption};
use thiserror::Error;

use crate::{
    column::{ColumnDef, EffectiveRule, GridConfig},
    options::OptionCache,
};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{title} must not be empty")]
    Required { column: String, title: String },
    #[error("{title} must be a valid number")]
    InvalidNumber { column: String, title: String },
    #[error("{title} needs at least one selection")]
    NothingSelected { column: String, title: String },
    #[error("{title} must be at least {min} characters long")]
    TooShort {
        column: String,
        title: String,
        min: usize,
    },
    #[error("{title} must be greater than or equal to {min}")]
    BelowMinimum {
        column: String,
        title: String,
        min: f64,
    },
    #[error("{title} needs at least {min} selections")]
    TooFewSelections {
        column: String,
        title: String,
        min: usize,
    },
    #[error("{title} must be a valid date ({format})")]
    InvalidDate {
        column: String,
        title: String,
        format: String,
    },
    #[error("{title} must be one of the available options")]
    NotAnOption { column: String, title: String },
}

impl ValidationError {
    pub fn column(&self) -> &str {
        match self {
            ValidationError::Required { column, .. }
            | ValidationError::InvalidNumber { column, .. }
            | ValidationError::NothingSelected { column, .. }
            | ValidationError::TooShort { column, .. }
            | ValidationError::BelowMinimum { column, .. }
            | ValidationError::TooFewSelections { column, .. }
            | ValidationError::InvalidDate { column, .. }
            | ValidationError::NotAnOption { column, .. } => column,
        }
    }
}

/// Validates every column of `row`, stopping at the first failure.
pub fn validate_row(
    config: &GridConfig,
    row: &Row,
    options: &OptionCache,
) -> Result<(), ValidationError> {
    for column in &config.columns {
        let rule = config.effective_rule(column);
        let fallback;
        let value = match row.get(column.key()) {
            Some(value) => value,
            None => {
                fallback = column.kind().empty_value();
                &fallback
            }
        };
        validate_cell(column, rule, value, options.allowed_for(column, Some(row)))?;
    }
    Ok(())
}

pub fn validate_cell(
    column: &ColumnDef,
    rule: EffectiveRule,
    value: &CellValue,
    options: Option<&[SelectOption]>,
) -> Result<(), ValidationError> {
    let column_key = || column.key().to_string();
    let title = || column.title().to_string();

    if rule.required {
        match value {
            CellValue::Text(s) if s.trim().is_empty() => {
                return Err(ValidationError::Required {
                    column: column_key(),
                    title: title(),
                })
            }
            CellValue::Number(n) if n.is_nan() => {
                return Err(ValidationError::InvalidNumber {
                    column: column_key(),
                    title: title(),
                })
            }
            CellValue::List(items) if items.is_empty() => {
                return Err(ValidationError::NothingSelected {
                    column: column_key(),
                    title: title(),
                })
            }
            _ => {}
        }
    }

    // Number columns accept numeric text; the floor applies to the parsed value.
    let number = match (column.kind(), value) {
        (ColumnKind::Number, _) if value.is_empty() => None,
        (ColumnKind::Number, CellValue::Number(n)) if n.is_finite() => Some(*n),
        (ColumnKind::Number, CellValue::Text(s)) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Some(n),
            _ => return Err(invalid_number(column)),
        },
        (ColumnKind::Number, _) => return Err(invalid_number(column)),
        _ => None,
    };

    // A zero minimum is treated as "no minimum".
    if let Some(min) = rule.min.filter(|min| *min > 0.0) {
        match (number, value) {
            (Some(n), _) if n < min => {
                return Err(ValidationError::BelowMinimum {
                    column: column_key(),
                    title: title(),
                    min,
                })
            }
            (Some(_), _) => {}
            // An empty number cell is covered by `required`.
            (None, _) if column.kind() == ColumnKind::Number => {}
            (None, CellValue::Text(s)) if (s.chars().count() as f64) < min => {
                return Err(ValidationError::TooShort {
                    column: column_key(),
                    title: title(),
                    min: min.ceil() as usize,
                })
            }
            (None, CellValue::Number(n)) if *n < min => {
                return Err(ValidationError::BelowMinimum {
                    column: column_key(),
                    title: title(),
                    min,
                })
            }
            (None, CellValue::List(items)) if (items.len() as f64) < min => {
                return Err(ValidationError::TooFewSelections {
                    column: column_key(),
                    title: title(),
                    min: min.ceil() as usize,
                })
            }
            _ => {}
        }
    }

    if column.kind() == ColumnKind::Date {
        let format = column.spec.format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
        let parsed = value
            .as_text()
            .filter(|s| !s.trim().is_empty())
            .is_some_and(|s| parses_as_date(s, format));
        if !parsed {
            return Err(ValidationError::InvalidDate {
                column: column_key(),
                title: title(),
                format: format.to_string(),
            });
        }
    }

    if column.kind().is_select() && !value.is_empty() {
        if let Some(options) = options {
            let valid = match value {
                CellValue::List(items) => items.iter().all(|item| is_option(options, item)),
                other => other
                    .as_scalar()
                    .is_some_and(|scalar| is_option(options, &scalar)),
            };
            if !valid {
                return Err(ValidationError::NotAnOption {
                    column: column_key(),
                    title: title(),
                });
            }
        }
    }

    Ok(())
}

/// Strict parse: the whole string must match `format` and formatting the
/// parsed value must give the input back, so unpadded fields are rejected.
pub fn parses_as_date(value: &str, format: &str) -> bool {
    if let Ok(date) = NaiveDate::parse_from_str(value, format) {
        return date.format(format).to_string() == value;
    }
    NaiveDateTime::parse_from_str(value, format)
        .is_ok_and(|datetime| datetime.format(format).to_string() == value)
}

fn invalid_number(column: &ColumnDef) -> ValidationError {
    ValidationError::InvalidNumber {
        column: column.key().to_string(),
        title: column.title().to_string(),
    }
}

fn is_option(options: &[SelectOption], value: &Scalar) -> bool {
    options.iter().any(|opt| &opt.value == value)
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;

use shared::domain::{CellValue, Scalar, SelectOption};

/// Shown for absent or empty cells.
pub const PLACEHOLDER: &str = "--";

/// Read-only rendering of a cell: option values show their label, lists are
/// joined with ", ".
pub fn display_value(value: Option<&CellValue>, options: Option<&[SelectOption]>) -> String {
    let Some(value) = value else {
        return PLACEHOLDER.to_string();
    };
    if value.is_empty() {
        return PLACEHOLDER.to_string();
    }

    let options = options.unwrap_or_default();
    match value {
        CellValue::List(items) => items
            .iter()
            .map(|item| label_for(options, item))
            .collect::<Vec<_>>()
            .join(", "),
        other => match other.as_scalar() {
            Some(scalar) => label_for(options, &scalar),
            None => PLACEHOLDER.to_string(),
        },
    }
}

fn label_for(options: &[SelectOption], value: &Scalar) -> String {
    options
        .iter()
        .find(|opt| &opt.value == value)
        .map(|opt| opt.label.clone())
        .unwrap_or_else(|| value.to_string())
}

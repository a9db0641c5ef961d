use serde_json::Value;

use crate::model::{Cell, PickedField, ProjectionMode, RowData};

const EACH: &str = "*";

/// Walks `object` by `path`. A numeric segment on an array selects one
/// element, `*` or a field name fans out across every element. Missing keys,
/// nulls and walks into scalars yield `None`.
pub fn value(object: &Value, path: &[String]) -> Option<Value> {
    let Some((segment, rest)) = path.split_first() else {
        return (!object.is_null()).then(|| object.clone());
    };

    match object {
        Value::Object(map) => value(map.get(segment)?, rest),
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                return value(items.get(index)?, rest);
            }
            let remainder = if segment == EACH { rest } else { path };
            let values = items
                .iter()
                .filter_map(|item| value(item, remainder))
                .collect::<Vec<_>>();
            (!values.is_empty()).then_some(Value::Array(values))
        }
        _ => None,
    }
}

/// What a path yields under enumeration: one value when it never crosses an
/// array, one entry per element of the first array it fans out over otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Single(Option<Value>),
    Fanned(Vec<Option<Value>>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Fanned(entries) => entries.len(),
        }
    }

    /// Entry for sub-row `index`. Single values repeat on every sub-row.
    fn entry(&self, index: usize) -> Option<&Value> {
        match self {
            Self::Single(value) => value.as_ref(),
            Self::Fanned(entries) => entries.get(index).and_then(Option::as_ref),
        }
    }
}

pub fn enumerate(object: &Value, path: &[String]) -> Column {
    let Some((segment, rest)) = path.split_first() else {
        return Column::Single(value(object, path));
    };

    match object {
        Value::Object(map) => match map.get(segment) {
            Some(child) => enumerate(child, rest),
            None => Column::Single(None),
        },
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                return items
                    .get(index)
                    .map(|item| enumerate(item, rest))
                    .unwrap_or(Column::Single(None));
            }
            let remainder = if segment == EACH { rest } else { path };
            Column::Fanned(items.iter().map(|item| value(item, remainder)).collect())
        }
        _ => Column::Single(None),
    }
}

pub fn render(value: Option<&Value>) -> Cell {
    match value {
        None | Some(Value::Null) => Cell::Absent,
        Some(value) => Cell::Value(render_value(value)),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(render_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

pub fn project_rows(
    objects: &[(String, Value)],
    picked: &[PickedField],
    mode: ProjectionMode,
) -> Vec<RowData> {
    let mut rows = Vec::with_capacity(objects.len());
    for (context, object) in objects {
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);

        match mode {
            ProjectionMode::Scalar => rows.push(RowData {
                context: context.clone(),
                namespace,
                name,
                cells: picked
                    .iter()
                    .map(|field| render(value(object, &field.path).as_ref()))
                    .collect(),
            }),
            ProjectionMode::Enumerate => {
                let columns = picked
                    .iter()
                    .map(|field| enumerate(object, &field.path))
                    .collect::<Vec<_>>();
                let height = columns
                    .iter()
                    .filter(|column| matches!(column, Column::Fanned(_)))
                    .map(Column::len)
                    .max()
                    .unwrap_or(1)
                    .max(1);
                for index in 0..height {
                    let cells = columns
                        .iter()
                        .map(|column| render(column.entry(index)))
                        .collect();
                    rows.push(RowData {
                        context: context.clone(),
                        namespace: namespace.clone(),
                        name: if height > 1 {
                            format!("{name}[{index}]")
                        } else {
                            name.clone()
                        },
                        cells,
                    });
                }
            }
        }
    }
    rows
}

//! Prediction request bodies and their conversion to a feature table

use super::error::{Result, ServerError};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};

static NULL: Value = Value::Null;

/// Body of `POST /api/predict`.
///
/// Either `data` (one object per row) or `columns` + `rows` (one array per
/// row, in column order).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub data: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub rows: Option<Vec<Vec<Value>>>,
}

impl PredictRequest {
    pub fn into_frame(self) -> Result<DataFrame> {
        match (self.data, self.columns, self.rows) {
            (Some(records), _, _) => records_to_frame(records),
            (None, Some(columns), Some(rows)) => rows_to_frame(columns, rows),
            (None, None, Some(_)) => Err(ServerError::BadRequest(
                "'rows' requires 'columns' naming each position".to_string(),
            )),
            _ => Err(ServerError::BadRequest(
                "provide 'data' (list of objects) or 'columns' + 'rows' (list of lists)".to_string(),
            )),
        }
    }
}

fn records_to_frame(records: Vec<Map<String, Value>>) -> Result<DataFrame> {
    if records.is_empty() {
        return Err(ServerError::BadRequest("'data' is empty".to_string()));
    }
    let mut names: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    let columns = names
        .iter()
        .map(|name| {
            let values: Vec<&Value> = records
                .iter()
                .map(|r| r.get(name).unwrap_or(&NULL))
                .collect();
            build_column(name, &values)
        })
        .collect::<Result<Vec<_>>>()?;
    frame(columns)
}

fn rows_to_frame(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<DataFrame> {
    if rows.is_empty() {
        return Err(ServerError::BadRequest("'rows' is empty".to_string()));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != names.len()) {
        return Err(ServerError::BadRequest(format!(
            "row {} has {} values but {} columns were named",
            i,
            row.len(),
            names.len()
        )));
    }
    let columns = names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let values: Vec<&Value> = rows.iter().map(|r| &r[j]).collect();
            build_column(name, &values)
        })
        .collect::<Result<Vec<_>>>()?;
    frame(columns)
}

fn frame(columns: Vec<Column>) -> Result<DataFrame> {
    DataFrame::new(columns).map_err(|e| ServerError::BadRequest(e.to_string()))
}

/// Numbers become Float64, strings become String, an all-null column is
/// Float64. Anything else is rejected.
fn build_column(name: &str, values: &[&Value]) -> Result<Column> {
    let has_number = values.iter().any(|v| v.is_number());
    let has_string = values.iter().any(|v| v.is_string());
    if let Some(other) = values
        .iter()
        .find(|v| !(v.is_null() || v.is_number() || v.is_string()))
    {
        return Err(ServerError::BadRequest(format!(
            "column '{}' holds an unsupported value: {}",
            name, other
        )));
    }

    match (has_number, has_string) {
        (true, true) => Err(ServerError::BadRequest(format!(
            "column '{}' mixes numbers and strings",
            name
        ))),
        (false, true) => {
            let strings: Vec<Option<&str>> = values.iter().map(|v| v.as_str()).collect();
            Ok(Column::new(name.into(), strings))
        }
        _ => {
            let numbers: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
            Ok(Column::new(name.into(), numbers))
        }
    }
}

//! Data loading utilities

use crate::error::{EnsembleError, Result};
use ndarray::Array1;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// Column name of the prediction output
pub const PREDICTION_COLUMN: &str = "SalePrice";

/// CSV loader for feature tables
#[derive(Debug, Clone)]
pub struct DataLoader {
    /// Cell values read as missing
    null_values: Vec<String>,
    /// Rows scanned to infer column types
    infer_schema_length: usize,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            null_values: vec!["NA".to_string(), String::new()],
            infer_schema_length: 10_000,
        }
    }

    pub fn with_null_values(mut self, values: Vec<String>) -> Self {
        self.null_values = values;
        self
    }

    pub fn with_infer_schema_length(mut self, n: usize) -> Self {
        self.infer_schema_length = n;
        self
    }

    /// Load a CSV file with a header row
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| EnsembleError::DataError(format!("{}: {}", path.display(), e)))?;

        let nulls: Vec<PlSmallStr> = self.null_values.iter().map(|v| v.as_str().into()).collect();
        let parse_opts = CsvParseOptions::default().with_null_values(Some(NullValues::AllColumns(nulls)));

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| EnsembleError::DataError(format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), rows = df.height(), cols = df.width(), "CSV loaded");
        Ok(df)
    }
}

/// Features, target and optional row identifiers of a training table
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub features: DataFrame,
    pub target: Array1<f64>,
    pub ids: Option<Column>,
}

/// Split `target` off a table and drop the `drop` columns.
///
/// The first dropped column that exists is kept as the row identifier.
pub fn split_target(df: DataFrame, target: &str, drop: &[String]) -> Result<TrainingData> {
    let column = df
        .column(target)
        .map_err(|_| EnsembleError::SchemaMismatch(format!("target column '{}' not found", target)))?;
    let values = column
        .as_materialized_series()
        .cast(&DataType::Float64)
        .map_err(|e| EnsembleError::DataError(format!("target '{}' is not numeric: {}", target, e)))?;
    let values = values.f64()?;
    let target_values = values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| EnsembleError::DataError(format!("target '{}' is missing at row {}", target, i)))
        })
        .collect::<Result<Vec<f64>>>()?;

    let mut features = df.drop(target)?;
    let mut ids = None;
    for name in drop {
        if features.column(name).is_ok() {
            if ids.is_none() {
                ids = Some(features.column(name)?.clone());
            }
            features = features.drop(name)?;
        }
    }

    Ok(TrainingData {
        features,
        target: Array1::from_vec(target_values),
        ids,
    })
}

/// Remove the identifier column from a scoring table, if present
pub fn split_ids(df: DataFrame, id_column: &str) -> Result<(DataFrame, Option<Column>)> {
    match df.column(id_column) {
        Ok(ids) => {
            let ids = ids.clone();
            Ok((df.drop(id_column)?, Some(ids)))
        }
        Err(_) => Ok((df, None)),
    }
}

/// Write `Id,SalePrice` rows. Without identifiers rows are numbered from 1.
pub fn save_predictions(path: impl AsRef<Path>, ids: Option<&Column>, predictions: &Array1<f64>) -> Result<()> {
    let id_column = match ids {
        Some(ids) => {
            if ids.len() != predictions.len() {
                return Err(EnsembleError::ShapeError {
                    expected: format!("{} ids", predictions.len()),
                    actual: format!("{} ids", ids.len()),
                });
            }
            ids.clone().with_name("Id".into())
        }
        None => {
            warn!("No id column, numbering prediction rows from 1");
            let numbers: Vec<i64> = (1..=predictions.len() as i64).collect();
            Column::new("Id".into(), numbers)
        }
    };
    let mut df = DataFrame::new(vec![
        id_column,
        Column::new(PREDICTION_COLUMN.into(), predictions.to_vec()),
    ])?;

    let mut file = File::create(path.as_ref())?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

//! Out-of-fold cross-fitting
//!
//! For every fold a fresh preprocessor is built and fit on the training
//! rows only, cloned into one pipeline per base model, and used to
//! predict the validation rows. Those predictions fill the out-of-fold
//! matrix, which is the only input of the weight search.

use crate::error::{EnsembleError, Result};
use crate::preprocessing::{FeatureTransformer, PreprocessorFactory};
use crate::training::metrics::{mean, r2_score, rmse, std_dev};
use crate::training::{CrossValidator, ModelPipeline, Regressor};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Number of base models in the blend
pub const N_MODELS: usize = 2;

/// Select rows of a feature table by position
pub fn take_rows(df: &DataFrame, indices: &[usize]) -> Result<DataFrame> {
    let idx: Vec<IdxSize> = indices.iter().map(|&i| i as IdxSize).collect();
    Ok(df.take(&IdxCa::from_vec("idx".into(), idx))?)
}

/// Out-of-fold predictions, one column per base model.
///
/// Each cell is written exactly once, by the fold that held its row out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OofPredictions {
    values: Array2<f64>,
    filled: Array2<bool>,
}

impl OofPredictions {
    pub fn new(n_rows: usize) -> Self {
        Self {
            values: Array2::zeros((n_rows, N_MODELS)),
            filled: Array2::from_elem((n_rows, N_MODELS), false),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    /// Write predictions of `model` for the given rows
    pub fn write(&mut self, model: usize, rows: &[usize], predictions: &Array1<f64>) -> Result<()> {
        if model >= N_MODELS {
            return Err(EnsembleError::ValidationError(format!("no base model {}", model)));
        }
        if rows.len() != predictions.len() {
            return Err(EnsembleError::ShapeError {
                expected: format!("{} predictions", rows.len()),
                actual: format!("{} predictions", predictions.len()),
            });
        }
        for (&row, &pred) in rows.iter().zip(predictions.iter()) {
            if row >= self.n_rows() {
                return Err(EnsembleError::ValidationError(format!("row {} out of range", row)));
            }
            if self.filled[[row, model]] {
                return Err(EnsembleError::TrainingError(format!(
                    "out-of-fold cell ({}, {}) written twice",
                    row, model
                )));
            }
            self.values[[row, model]] = pred;
            self.filled[[row, model]] = true;
        }
        Ok(())
    }

    /// Rows that still miss a prediction from at least one model
    pub fn unset_rows(&self) -> Vec<usize> {
        self.filled
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|f| !f))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.filled.iter().all(|f| *f)
    }

    /// Predictions of one model for all rows
    pub fn column(&self, model: usize) -> Array1<f64> {
        self.values.column(model).to_owned()
    }

    pub fn model_a(&self) -> Array1<f64> {
        self.column(0)
    }

    pub fn model_b(&self) -> Array1<f64> {
        self.column(1)
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }
}

/// Metrics of one validation fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    /// 1-based fold number
    pub fold: usize,
    pub n_train: usize,
    pub n_validation: usize,
    /// RMSE of the unweighted mean of both models
    pub rmse: f64,
    /// R² of the unweighted mean of both models
    pub r2: f64,
    pub rmse_a: f64,
    pub rmse_b: f64,
    pub validation_indices: Vec<usize>,
    pub fit_time_secs: f64,
}

/// Mean/std aggregation of fold metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoldSummary {
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub r2_mean: f64,
}

impl FoldSummary {
    pub fn from_reports(folds: &[FoldReport]) -> Self {
        let rmses: Vec<f64> = folds.iter().map(|f| f.rmse).collect();
        let r2s: Vec<f64> = folds.iter().map(|f| f.r2).collect();
        Self {
            rmse_mean: mean(&rmses),
            rmse_std: std_dev(&rmses),
            r2_mean: mean(&r2s),
        }
    }
}

/// Everything produced by a cross-fit run
#[derive(Debug, Clone)]
pub struct CrossFitResult<T> {
    pub oof: OofPredictions,
    pub folds: Vec<FoldReport>,
    /// Fitted preprocessor of each fold, in fold order
    pub fold_preprocessors: Vec<T>,
}

impl<T> CrossFitResult<T> {
    pub fn summary(&self) -> FoldSummary {
        FoldSummary::from_reports(&self.folds)
    }
}

/// K-fold out-of-fold engine
#[derive(Debug, Clone)]
pub struct CrossFitEngine {
    cv: CrossValidator,
}

impl CrossFitEngine {
    pub fn new(n_folds: usize, seed: u64) -> Self {
        Self {
            cv: CrossValidator::k_fold(n_folds).with_random_state(seed),
        }
    }

    pub fn from_validator(cv: CrossValidator) -> Self {
        Self { cv }
    }

    /// Run all folds sequentially.
    ///
    /// Inputs are validated before any model is fit. Any fold failure
    /// aborts the whole run.
    pub fn run<F, A, B>(
        &self,
        factory: &F,
        model_a: &A,
        model_b: &B,
        x: &DataFrame,
        y: &Array1<f64>,
    ) -> Result<CrossFitResult<F::Transformer>>
    where
        F: PreprocessorFactory,
        A: Regressor,
        B: Regressor,
    {
        let n_rows = x.height();
        if n_rows != y.len() {
            return Err(EnsembleError::ConfigError(format!(
                "feature table has {} rows but target has {}",
                n_rows,
                y.len()
            )));
        }
        if x.width() == 0 {
            return Err(EnsembleError::ConfigError("feature table has no columns".to_string()));
        }
        if let Some(pos) = y.iter().position(|v| !v.is_finite()) {
            return Err(EnsembleError::ValidationError(format!(
                "target contains a non-finite value at row {}",
                pos
            )));
        }
        let splits = self.cv.split(n_rows)?;

        info!(
            folds = splits.len(),
            rows = n_rows,
            model_a = model_a.name(),
            model_b = model_b.name(),
            "Starting cross-fit"
        );

        let mut oof = OofPredictions::new(n_rows);
        let mut folds = Vec::with_capacity(splits.len());
        let mut fold_preprocessors = Vec::with_capacity(splits.len());

        for split in &splits {
            let start = Instant::now();
            let x_train = take_rows(x, &split.train_indices)?;
            let y_train = y.select(Axis(0), &split.train_indices);
            let x_val = take_rows(x, &split.validation_indices)?;
            let y_val = y.select(Axis(0), &split.validation_indices);

            // Built from the training rows only
            let template = factory.build(&x_train)?;
            let mut pipeline_a = ModelPipeline::new(template.unfitted(), model_a.unfitted());
            let mut pipeline_b = ModelPipeline::new(template.unfitted(), model_b.unfitted());

            pipeline_a.fit(&x_train, &y_train)?;
            pipeline_b.fit(&x_train, &y_train)?;

            let pred_a = pipeline_a.predict(&x_val)?;
            let pred_b = pipeline_b.predict(&x_val)?;
            oof.write(0, &split.validation_indices, &pred_a)?;
            oof.write(1, &split.validation_indices, &pred_b)?;

            let mean_pred = (&pred_a + &pred_b) * 0.5;
            let report = FoldReport {
                fold: split.fold_idx + 1,
                n_train: split.train_indices.len(),
                n_validation: split.validation_indices.len(),
                rmse: rmse(&y_val, &mean_pred)?,
                r2: r2_score(&y_val, &mean_pred)?,
                rmse_a: rmse(&y_val, &pred_a)?,
                rmse_b: rmse(&y_val, &pred_b)?,
                validation_indices: split.validation_indices.clone(),
                fit_time_secs: start.elapsed().as_secs_f64(),
            };
            info!(
                fold = report.fold,
                rmse = report.rmse,
                r2 = report.r2,
                rmse_a = report.rmse_a,
                rmse_b = report.rmse_b,
                "Fold complete"
            );

            fold_preprocessors.push(pipeline_a.preprocessor().clone());
            folds.push(report);
        }

        let unset = oof.unset_rows();
        if !unset.is_empty() {
            return Err(EnsembleError::TrainingError(format!(
                "{} rows have no out-of-fold prediction: {:?}",
                unset.len(),
                unset
            )));
        }

        let result = CrossFitResult {
            oof,
            folds,
            fold_preprocessors,
        };
        let summary = result.summary();
        info!(
            rmse_mean = summary.rmse_mean,
            rmse_std = summary.rmse_std,
            r2_mean = summary.r2_mean,
            "Cross-fit complete"
        );
        Ok(result)
    }
}

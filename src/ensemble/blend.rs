//! Final fit and weighted two-model prediction

use super::cross_fit::{CrossFitEngine, CrossFitResult, FoldReport, FoldSummary};
use super::weights::{BlendWeights, LeastSquaresOptimizer, WeightFit, WeightOptimizer, WeightStrategy};
use crate::error::{EnsembleError, Result};
use crate::preprocessing::{
    DataPreprocessor, DefaultPreprocessorFactory, FeatureTransformer, PreprocessingConfig,
    PreprocessorFactory,
};
use crate::training::metrics::{mean, r2_score, rmse, std_dev};
use crate::training::{
    ElasticNetConfig, ElasticNetRegression, GradientBoostingConfig, GradientBoostingRegressor,
    ModelPipeline, Regressor,
};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Axis};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Transform applied to the target before fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTransform {
    /// Fit on the raw target
    Identity,
    /// Fit on `ln(1 + y)`, predict with `exp(p) - 1`
    #[default]
    Log1p,
}

impl TargetTransform {
    pub fn forward(&self, y: &Array1<f64>) -> Result<Array1<f64>> {
        match self {
            TargetTransform::Identity => Ok(y.clone()),
            TargetTransform::Log1p => {
                if let Some(bad) = y.iter().find(|v| **v <= -1.0) {
                    return Err(EnsembleError::ValidationError(format!(
                        "log1p target requires values > -1, got {}",
                        bad
                    )));
                }
                Ok(y.mapv(f64::ln_1p))
            }
        }
    }

    pub fn inverse(&self, y: &Array1<f64>) -> Array1<f64> {
        match self {
            TargetTransform::Identity => y.clone(),
            TargetTransform::Log1p => y.mapv(f64::exp_m1),
        }
    }
}

/// Where the final blend weights come from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightSource {
    /// Keep weights chosen earlier, typically from out-of-fold predictions
    Fixed(BlendWeights),
    /// Recompute from full-data predictions of the refit pipelines
    RefitLeastSquares(LeastSquaresOptimizer),
}

/// Training report stored with a fitted ensemble.
///
/// `rmse_mean`/`rmse_std`/`r2_mean` describe the unweighted mean of the
/// base models per fold. The `blend_*` fields describe the blend that is
/// actually deployed, evaluated on out-of-fold predictions. All values
/// are in the training target space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    pub n_samples: usize,
    pub n_folds: usize,
    pub weight_strategy: String,
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub r2_mean: f64,
    pub blend_oof_rmse: f64,
    pub blend_oof_r2: f64,
    pub blend_rmse_mean: f64,
    pub blend_rmse_std: f64,
    /// RMSE reported by the weight optimizer on its fitting data
    pub weight_search_rmse: f64,
    pub folds: Vec<FoldReport>,
    pub training_time_secs: f64,
}

impl EnsembleSummary {
    fn from_cross_fit<T>(
        result: &CrossFitResult<T>,
        y: &Array1<f64>,
        fit: &WeightFit,
        strategy: &str,
    ) -> Result<Self> {
        let oof_a = result.oof.model_a();
        let oof_b = result.oof.model_b();
        let blended = fit.weights.blend(&oof_a, &oof_b)?;

        let mut blend_fold_rmse = Vec::with_capacity(result.folds.len());
        for fold in &result.folds {
            let y_val = y.select(Axis(0), &fold.validation_indices);
            let p_val = blended.select(Axis(0), &fold.validation_indices);
            blend_fold_rmse.push(rmse(&y_val, &p_val)?);
        }

        let FoldSummary { rmse_mean, rmse_std, r2_mean } = result.summary();
        Ok(Self {
            n_samples: y.len(),
            n_folds: result.folds.len(),
            weight_strategy: strategy.to_string(),
            rmse_mean,
            rmse_std,
            r2_mean,
            blend_oof_rmse: rmse(y, &blended)?,
            blend_oof_r2: r2_score(y, &blended)?,
            blend_rmse_mean: mean(&blend_fold_rmse),
            blend_rmse_std: std_dev(&blend_fold_rmse),
            weight_search_rmse: fit.rmse,
            folds: result.folds.clone(),
            training_time_secs: 0.0,
        })
    }
}

/// Plain record of a fitted ensemble, handed to the model registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleRecord {
    pub model_a: String,
    pub model_b: String,
    pub params_a: BTreeMap<String, serde_json::Value>,
    pub params_b: BTreeMap<String, serde_json::Value>,
    pub weights: BlendWeights,
    pub target_transform: TargetTransform,
    pub feature_names: Vec<String>,
    pub summary: Option<EnsembleSummary>,
    pub fitted_at: DateTime<Utc>,
}

impl EnsembleRecord {
    /// Flat numeric metrics for run logging
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::from([
            ("weight_a".to_string(), self.weights.weight_a),
            ("weight_b".to_string(), self.weights.weight_b),
        ]);
        if let Some(s) = &self.summary {
            metrics.insert("cv_rmse_mean".to_string(), s.rmse_mean);
            metrics.insert("cv_rmse_std".to_string(), s.rmse_std);
            metrics.insert("cv_r2_mean".to_string(), s.r2_mean);
            metrics.insert("blend_oof_rmse".to_string(), s.blend_oof_rmse);
            metrics.insert("blend_oof_r2".to_string(), s.blend_oof_r2);
        }
        metrics
    }
}

/// Two fitted pipelines, their blend weights and the target transform.
///
/// Immutable once built; `predict` is a pure function of its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedEnsemble<T, A, B> {
    pipeline_a: ModelPipeline<T, A>,
    pipeline_b: ModelPipeline<T, B>,
    weights: BlendWeights,
    target_transform: TargetTransform,
    summary: Option<EnsembleSummary>,
    fitted_at: DateTime<Utc>,
}

impl<T, A, B> TrainedEnsemble<T, A, B>
where
    T: FeatureTransformer,
    A: Regressor,
    B: Regressor,
{
    /// Refit both base pipelines on the full table.
    ///
    /// One fresh preprocessor is built from all rows; it is the one that
    /// ships with the ensemble.
    pub fn fit_full<F>(
        factory: &F,
        model_a: &A,
        model_b: &B,
        x: &DataFrame,
        y: &Array1<f64>,
        weights_source: WeightSource,
        target_transform: TargetTransform,
    ) -> Result<Self>
    where
        F: PreprocessorFactory<Transformer = T>,
    {
        if x.height() != y.len() {
            return Err(EnsembleError::ConfigError(format!(
                "feature table has {} rows but target has {}",
                x.height(),
                y.len()
            )));
        }
        if x.height() == 0 || x.width() == 0 {
            return Err(EnsembleError::ConfigError("feature table is empty".to_string()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(EnsembleError::ValidationError("target contains non-finite values".to_string()));
        }
        let y_fit = target_transform.forward(y)?;

        let template = factory.build(x)?;
        let mut pipeline_a = ModelPipeline::new(template.unfitted(), model_a.unfitted());
        let mut pipeline_b = ModelPipeline::new(template.unfitted(), model_b.unfitted());
        pipeline_a.fit(x, &y_fit)?;
        pipeline_b.fit(x, &y_fit)?;

        let weights = match weights_source {
            WeightSource::Fixed(weights) => weights,
            WeightSource::RefitLeastSquares(optimizer) => {
                let pred_a = pipeline_a.predict(x)?;
                let pred_b = pipeline_b.predict(x)?;
                let fit = optimizer.fit(&pred_a, &pred_b, &y_fit)?;
                info!(
                    weight_a = fit.weights.weight_a,
                    rmse = fit.rmse,
                    "Recomputed weights from full-data predictions"
                );
                fit.weights
            }
        };

        info!(
            rows = x.height(),
            weight_a = weights.weight_a,
            weight_b = weights.weight_b,
            target = ?target_transform,
            "Final ensemble fitted"
        );

        Ok(Self {
            pipeline_a,
            pipeline_b,
            weights,
            target_transform,
            summary: None,
            fitted_at: Utc::now(),
        })
    }

    /// Blend the base model predictions and map them back to the
    /// original target scale
    pub fn predict(&self, x: &DataFrame) -> Result<Array1<f64>> {
        let (pred_a, pred_b) = self.predict_components(x)?;
        let blended = self.weights.blend(&pred_a, &pred_b)?;
        Ok(self.target_transform.inverse(&blended))
    }

    /// Raw base model predictions in training target space
    pub fn predict_components(&self, x: &DataFrame) -> Result<(Array1<f64>, Array1<f64>)> {
        if !self.pipeline_a.is_fitted() || !self.pipeline_b.is_fitted() {
            return Err(EnsembleError::ModelNotFitted);
        }
        if x.height() == 0 {
            return Err(EnsembleError::ValidationError("feature table has no rows".to_string()));
        }
        Ok((self.pipeline_a.predict(x)?, self.pipeline_b.predict(x)?))
    }

    pub fn weights(&self) -> BlendWeights {
        self.weights
    }

    pub fn target_transform(&self) -> TargetTransform {
        self.target_transform
    }

    pub fn summary(&self) -> Option<&EnsembleSummary> {
        self.summary.as_ref()
    }

    pub fn with_summary(mut self, summary: EnsembleSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn pipeline_a(&self) -> &ModelPipeline<T, A> {
        &self.pipeline_a
    }

    pub fn pipeline_b(&self) -> &ModelPipeline<T, B> {
        &self.pipeline_b
    }

    pub fn fitted_at(&self) -> DateTime<Utc> {
        self.fitted_at
    }

    pub fn record(&self) -> EnsembleRecord {
        EnsembleRecord {
            model_a: self.pipeline_a.estimator().name().to_string(),
            model_b: self.pipeline_b.estimator().name().to_string(),
            params_a: self.pipeline_a.estimator().params(),
            params_b: self.pipeline_b.estimator().params(),
            weights: self.weights,
            target_transform: self.target_transform,
            feature_names: self.pipeline_a.preprocessor().feature_names(),
            summary: self.summary.clone(),
            fitted_at: self.fitted_at,
        }
    }
}

/// Settings of the cross-fit, weight search and final fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub n_folds: usize,
    pub seed: u64,
    pub weight_strategy: WeightStrategy,
    pub target_transform: TargetTransform,
    /// Recompute weights by least squares on the full data instead of
    /// keeping the out-of-fold weights
    pub refit_weights: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_folds: 10,
            seed: 42,
            weight_strategy: WeightStrategy::default(),
            target_transform: TargetTransform::Log1p,
            refit_weights: false,
        }
    }
}

impl EnsembleConfig {
    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_weight_strategy(mut self, strategy: WeightStrategy) -> Self {
        self.weight_strategy = strategy;
        self
    }

    pub fn with_target_transform(mut self, transform: TargetTransform) -> Self {
        self.target_transform = transform;
        self
    }

    pub fn with_refit_weights(mut self, refit: bool) -> Self {
        self.refit_weights = refit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_folds < 2 {
            return Err(EnsembleError::ConfigError(format!(
                "number of folds must be at least 2, got {}",
                self.n_folds
            )));
        }
        self.weight_strategy.validate()
    }

    /// Optimizer used when `refit_weights` is set: the configured least
    /// squares settings, or the defaults when the grid was chosen
    fn refit_optimizer(&self) -> LeastSquaresOptimizer {
        match self.weight_strategy {
            WeightStrategy::LeastSquares(ls) => ls,
            WeightStrategy::Grid(_) => LeastSquaresOptimizer::default(),
        }
    }
}

/// Cross-fit, weight search and final fit for two base models
pub struct BlendedEnsemble<F: PreprocessorFactory, A, B> {
    factory: F,
    model_a: A,
    model_b: B,
    config: EnsembleConfig,
    trained: Option<TrainedEnsemble<F::Transformer, A, B>>,
    cross_fit: Option<CrossFitResult<F::Transformer>>,
}

impl<F, A, B> BlendedEnsemble<F, A, B>
where
    F: PreprocessorFactory,
    A: Regressor,
    B: Regressor,
{
    pub fn new(factory: F, model_a: A, model_b: B, config: EnsembleConfig) -> Self {
        Self {
            factory,
            model_a,
            model_b,
            config,
            trained: None,
            cross_fit: None,
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Run the full training flow and keep the result
    pub fn fit(&mut self, x: &DataFrame, y: &Array1<f64>) -> Result<&TrainedEnsemble<F::Transformer, A, B>> {
        self.config.validate()?;
        let start = Instant::now();

        // Validated up front so a bad target fails before any fold runs
        if y.iter().any(|v| !v.is_finite()) {
            return Err(EnsembleError::ValidationError("target contains non-finite values".to_string()));
        }
        let y_fit = self.config.target_transform.forward(y)?;

        let engine = CrossFitEngine::new(self.config.n_folds, self.config.seed);
        let result = engine.run(&self.factory, &self.model_a, &self.model_b, x, &y_fit)?;

        let optimizer = self.config.weight_strategy.optimizer();
        let fit = optimizer.fit(&result.oof.model_a(), &result.oof.model_b(), &y_fit)?;
        info!(
            strategy = optimizer.name(),
            weight_a = fit.weights.weight_a,
            weight_b = fit.weights.weight_b,
            rmse = fit.rmse,
            "Blend weights selected"
        );

        let mut summary = EnsembleSummary::from_cross_fit(&result, &y_fit, &fit, optimizer.name())?;

        let source = if self.config.refit_weights {
            WeightSource::RefitLeastSquares(self.config.refit_optimizer())
        } else {
            WeightSource::Fixed(fit.weights)
        };
        let trained = TrainedEnsemble::fit_full(
            &self.factory,
            &self.model_a,
            &self.model_b,
            x,
            y,
            source,
            self.config.target_transform,
        )?;

        summary.training_time_secs = start.elapsed().as_secs_f64();
        info!(
            cv_rmse_mean = summary.rmse_mean,
            cv_rmse_std = summary.rmse_std,
            cv_r2_mean = summary.r2_mean,
            blend_oof_rmse = summary.blend_oof_rmse,
            secs = summary.training_time_secs,
            "Ensemble training complete"
        );

        self.cross_fit = Some(result);
        Ok(self.trained.insert(trained.with_summary(summary)))
    }

    pub fn predict(&self, x: &DataFrame) -> Result<Array1<f64>> {
        self.trained
            .as_ref()
            .ok_or(EnsembleError::ModelNotFitted)?
            .predict(x)
    }

    pub fn is_fitted(&self) -> bool {
        self.trained.is_some()
    }

    pub fn trained(&self) -> Option<&TrainedEnsemble<F::Transformer, A, B>> {
        self.trained.as_ref()
    }

    pub fn into_trained(self) -> Option<TrainedEnsemble<F::Transformer, A, B>> {
        self.trained
    }

    /// Out-of-fold predictions and fold reports of the last fit
    pub fn cross_fit_result(&self) -> Option<&CrossFitResult<F::Transformer>> {
        self.cross_fit.as_ref()
    }
}

/// The served model: ElasticNet and gradient boosting behind the default preprocessor
pub type PriceEnsemble = TrainedEnsemble<DataPreprocessor, ElasticNetRegression, GradientBoostingRegressor>;

/// Trainer producing a [`PriceEnsemble`]
pub type PriceEnsembleTrainer =
    BlendedEnsemble<DefaultPreprocessorFactory, ElasticNetRegression, GradientBoostingRegressor>;

/// Complete training configuration of a [`PriceEnsemble`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceEnsembleConfig {
    pub ensemble: EnsembleConfig,
    pub preprocessing: PreprocessingConfig,
    pub elastic_net: ElasticNetConfig,
    pub gradient_boosting: GradientBoostingConfig,
}

impl PriceEnsembleConfig {
    pub fn validate(&self) -> Result<()> {
        self.ensemble.validate()?;
        self.preprocessing.validate()?;
        self.elastic_net.validate()?;
        self.gradient_boosting.validate()
    }

    pub fn trainer(&self) -> PriceEnsembleTrainer {
        BlendedEnsemble::new(
            DefaultPreprocessorFactory::new(self.preprocessing.clone()),
            ElasticNetRegression::new(self.elastic_net.clone()),
            GradientBoostingRegressor::new(self.gradient_boosting.clone()),
            self.ensemble.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_log_round_trip() {
        let y = array![0.0, 1.0, 129_500.0, 755_000.0];
        let t = TargetTransform::Log1p;
        let back = t.inverse(&t.forward(&y).unwrap());
        for (a, b) in y.iter().zip(back.iter()) {
            assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0));
        }
    }

    #[test]
    fn test_log_rejects_out_of_domain() {
        let err = TargetTransform::Log1p.forward(&array![-1.0]).unwrap_err();
        assert!(matches!(err, EnsembleError::ValidationError(_)));
        assert!(TargetTransform::Identity.forward(&array![-1.0]).is_ok());
    }

    #[test]
    fn test_config_validate() {
        assert!(EnsembleConfig::default().validate().is_ok());
        assert!(EnsembleConfig::default().with_n_folds(1).validate().is_err());
        assert!(PriceEnsembleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config = PriceEnsembleConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PriceEnsembleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_refit_optimizer_follows_strategy() {
        let ls = LeastSquaresOptimizer::default().with_clip(false);
        let config = EnsembleConfig::default().with_weight_strategy(WeightStrategy::LeastSquares(ls));
        assert_eq!(config.refit_optimizer(), ls);
    }
}

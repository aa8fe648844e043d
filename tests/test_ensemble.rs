//! Integration test: cross-fit, weight search, final fit and predict

use ndarray::{array, Array1, Array2};
use polars::prelude::*;
use price_ensemble::ensemble::{
    BlendWeights, BlendedEnsemble, CrossFitEngine, EnsembleConfig, GridSearchOptimizer,
    LeastSquaresOptimizer, PriceEnsembleConfig, TargetTransform, TrainedEnsemble, WeightOptimizer,
    WeightSource, WeightStrategy,
};
use price_ensemble::error::{EnsembleError, Result};
use price_ensemble::preprocessing::{
    DefaultPreprocessorFactory, FeatureTransformer, PreprocessorFactory,
};
use price_ensemble::training::{GradientBoostingConfig, Regressor};
use std::collections::BTreeMap;

// ─── Stubs ─────────────────────────────────────────────────────────────────────

/// Copies numeric columns into the matrix unchanged
#[derive(Debug, Clone, Default)]
struct Passthrough {
    columns: Vec<String>,
    fitted: bool,
}

impl FeatureTransformer for Passthrough {
    fn fit(&mut self, x: &DataFrame) -> Result<()> {
        self.columns = x.get_column_names().iter().map(|s| s.to_string()).collect();
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, x: &DataFrame) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(EnsembleError::ModelNotFitted);
        }
        let mut out = Array2::zeros((x.height(), self.columns.len()));
        for (j, name) in self.columns.iter().enumerate() {
            let column = x
                .column(name)
                .map_err(|_| EnsembleError::SchemaMismatch(name.clone()))?;
            let values = column.as_materialized_series().cast(&DataType::Float64)?;
            for (i, v) in values.f64()?.into_iter().enumerate() {
                out[[i, j]] = v.unwrap_or(0.0);
            }
        }
        Ok(out)
    }

    fn unfitted(&self) -> Self {
        Self::default()
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn feature_names(&self) -> Vec<String> {
        self.columns.clone()
    }
}

struct PassthroughFactory;

impl PreprocessorFactory for PassthroughFactory {
    type Transformer = Passthrough;

    fn build(&self, _x_train: &DataFrame) -> Result<Passthrough> {
        Ok(Passthrough::default())
    }
}

/// Predicts the same value for every row
#[derive(Debug, Clone)]
struct Constant {
    value: f64,
    fitted: bool,
}

impl Constant {
    fn new(value: f64) -> Self {
        Self { value, fitted: false }
    }
}

impl Regressor for Constant {
    fn name(&self) -> &str {
        "constant"
    }

    fn fit(&mut self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<()> {
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.fitted {
            return Err(EnsembleError::ModelNotFitted);
        }
        Ok(Array1::from_elem(x.nrows(), self.value))
    }

    fn unfitted(&self) -> Self {
        Self::new(self.value)
    }

    fn params(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([("value".to_string(), serde_json::json!(self.value))])
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}

/// Predicts the first feature, which the tests set to the row index
#[derive(Debug, Clone, Default)]
struct RowIndex {
    fitted: bool,
}

impl Regressor for RowIndex {
    fn name(&self) -> &str {
        "row_index"
    }

    fn fit(&mut self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<()> {
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(x.column(0).to_owned())
    }

    fn unfitted(&self) -> Self {
        Self::default()
    }

    fn params(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }
}

// ─── Fixtures ──────────────────────────────────────────────────────────────────

fn row_frame(n: usize) -> DataFrame {
    let rows: Vec<f64> = (0..n).map(|i| i as f64).collect();
    df!("row" => &rows).unwrap()
}

/// Small synthetic housing table with a log-linear price
fn house_data(n: usize) -> (DataFrame, Array1<f64>) {
    let neighborhoods = ["CollgCr", "Veenker", "Crawfor", "NoRidge"];
    let mut area = Vec::with_capacity(n);
    let mut quality = Vec::with_capacity(n);
    let mut frontage = Vec::with_capacity(n);
    let mut neighborhood = Vec::with_capacity(n);
    let mut price = Vec::with_capacity(n);

    for i in 0..n {
        let a = 800.0 + ((i * 137) % 1900) as f64;
        let q = (1 + (i * 7) % 10) as f64;
        let nb = (i * 3) % neighborhoods.len();
        area.push(a);
        quality.push(q);
        frontage.push(if i % 7 == 0 { None } else { Some(50.0 + (i % 40) as f64) });
        neighborhood.push(neighborhoods[nb]);
        let log_price = 10.5 + 0.0004 * a + 0.08 * q + 0.05 * nb as f64;
        price.push(log_price.exp());
    }

    let df = df!(
        "GrLivArea" => &area,
        "OverallQual" => &quality,
        "LotFrontage" => &frontage,
        "Neighborhood" => &neighborhood,
    )
    .unwrap();
    (df, Array1::from_vec(price))
}

fn small_price_config(n_folds: usize) -> PriceEnsembleConfig {
    PriceEnsembleConfig {
        ensemble: EnsembleConfig::default().with_n_folds(n_folds),
        gradient_boosting: GradientBoostingConfig::default()
            .with_n_estimators(30)
            .with_learning_rate(0.1)
            .with_max_depth(3),
        ..Default::default()
    }
}

// ─── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn test_least_squares_constant_models() {
    let x = row_frame(2);
    let y = array![15.0, 15.0];
    let config = EnsembleConfig::default()
        .with_n_folds(2)
        .with_weight_strategy(WeightStrategy::LeastSquares(LeastSquaresOptimizer::default()))
        .with_target_transform(TargetTransform::Identity);

    let mut ensemble = BlendedEnsemble::new(PassthroughFactory, Constant::new(10.0), Constant::new(20.0), config);
    let trained = ensemble.fit(&x, &y).unwrap();

    assert_eq!(trained.weights().weight_a, 0.5);
    assert_eq!(trained.weights().weight_b, 0.5);
    assert_eq!(ensemble.predict(&x).unwrap(), array![15.0, 15.0]);
}

#[test]
fn test_grid_search_midpoint() {
    let fit = GridSearchOptimizer::default()
        .fit(&array![1.0, 2.0, 3.0], &array![3.0, 2.0, 1.0], &array![2.0, 2.0, 2.0])
        .unwrap();
    assert!((fit.weights.weight_a - 0.5).abs() < 1e-12);
    assert!(fit.rmse < 1e-12);
}

#[test]
fn test_cross_fit_covers_every_row() {
    let x = row_frame(9);
    let y = Array1::from_elem(9, 1.0);
    let result = CrossFitEngine::new(3, 42)
        .run(&PassthroughFactory, &RowIndex::default(), &RowIndex::default(), &x, &y)
        .unwrap();

    assert!(result.oof.is_complete());
    assert!(result.oof.unset_rows().is_empty());
    let expected: Vec<f64> = (0..9).map(|i| i as f64).collect();
    assert_eq!(result.oof.model_a().to_vec(), expected);
    assert_eq!(result.oof.model_b().to_vec(), expected);

    let mut seen: Vec<usize> = result
        .folds
        .iter()
        .flat_map(|f| f.validation_indices.iter().copied())
        .collect();
    assert_eq!(seen.len(), 9);
    seen.sort_unstable();
    assert_eq!(seen, (0..9).collect::<Vec<_>>());
    assert_eq!(result.folds.iter().map(|f| f.fold).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn test_cross_fit_is_reproducible() {
    let x = row_frame(12);
    let y = Array1::from_elem(12, 1.0);
    let engine = CrossFitEngine::new(4, 7);
    let a = engine.run(&PassthroughFactory, &RowIndex::default(), &Constant::new(1.0), &x, &y).unwrap();
    let b = engine.run(&PassthroughFactory, &RowIndex::default(), &Constant::new(1.0), &x, &y).unwrap();
    let folds = |r: &price_ensemble::ensemble::CrossFitResult<Passthrough>| {
        r.folds.iter().map(|f| f.validation_indices.clone()).collect::<Vec<_>>()
    };
    assert_eq!(folds(&a), folds(&b));
}

// ─── Properties ────────────────────────────────────────────────────────────────

#[test]
fn test_blend_is_exact() {
    let x = row_frame(3);
    let y = array![100.0, 200.0, 300.0];
    let trained = TrainedEnsemble::fit_full(
        &PassthroughFactory,
        &Constant::new(10.0),
        &Constant::new(12.0),
        &x,
        &y,
        WeightSource::Fixed(BlendWeights::new(0.3)),
        TargetTransform::Log1p,
    )
    .unwrap();

    let w = trained.weights();
    let expected = (w.weight_a * 10.0 + w.weight_b * 12.0).exp_m1();
    let predictions = trained.predict(&x).unwrap();
    assert_eq!(predictions.len(), 3);
    for p in predictions.iter() {
        assert_eq!(*p, expected);
    }

    let (a, b) = trained.predict_components(&x).unwrap();
    assert_eq!(a, array![10.0, 10.0, 10.0]);
    assert_eq!(b, array![12.0, 12.0, 12.0]);
}

#[test]
fn test_identity_target_skips_inverse() {
    let x = row_frame(2);
    let trained = TrainedEnsemble::fit_full(
        &PassthroughFactory,
        &Constant::new(10.0),
        &Constant::new(20.0),
        &x,
        &array![1.0, 2.0],
        WeightSource::Fixed(BlendWeights::new(0.25)),
        TargetTransform::Identity,
    )
    .unwrap();
    assert_eq!(trained.predict(&x).unwrap(), array![17.5, 17.5]);
}

#[test]
fn test_refit_weights_by_least_squares() {
    let x = row_frame(4);
    let trained = TrainedEnsemble::fit_full(
        &PassthroughFactory,
        &Constant::new(10.0),
        &Constant::new(20.0),
        &x,
        &Array1::from_elem(4, 12.0),
        WeightSource::RefitLeastSquares(LeastSquaresOptimizer::default()),
        TargetTransform::Identity,
    )
    .unwrap();
    assert!((trained.weights().weight_a - 0.8).abs() < 1e-12);
}

#[test]
fn test_log_round_trip_constant_target() {
    let y = Array1::from_elem(5, 181_500.0);
    let transform = TargetTransform::Log1p;
    let back = transform.inverse(&transform.forward(&y).unwrap());
    for v in back.iter() {
        assert!((v - 181_500.0).abs() <= 1e-9 * 181_500.0);
    }
}

#[test]
fn test_weight_bounds() {
    let pred_a = array![1.0, 2.0, 3.0];
    let pred_b = array![0.0, 0.0, 0.0];
    let y = array![2.0, 4.0, 6.0];

    let clipped = LeastSquaresOptimizer::default().fit(&pred_a, &pred_b, &y).unwrap();
    assert_eq!(clipped.weights.weight_a, 1.0);

    let unclipped = LeastSquaresOptimizer::default()
        .with_clip(false)
        .fit(&pred_a, &pred_b, &y)
        .unwrap();
    assert!((unclipped.weights.weight_a - 2.0).abs() < 1e-12);
    assert!((unclipped.weights.weight_b + 1.0).abs() < 1e-12);

    let grid = GridSearchOptimizer::default().fit(&pred_a, &pred_b, &y).unwrap();
    assert!((0.0..=1.0).contains(&grid.weights.weight_a));
    assert_eq!(grid.weights.weight_a, 1.0);
}

#[test]
fn test_no_leakage_between_folds() {
    let n = 20;
    let values: Vec<Option<f64>> = (0..n)
        .map(|i| if i % 5 == 0 { None } else { Some((i * i) as f64) })
        .collect();
    let x = df!("LotFrontage" => &values).unwrap();
    let y = Array1::from_elem(n, 1.0);
    let factory = DefaultPreprocessorFactory::default();

    let result = CrossFitEngine::new(4, 42)
        .run(&factory, &Constant::new(0.0), &Constant::new(0.0), &x, &y)
        .unwrap();

    let mut full = factory.build(&x).unwrap();
    full.fit(&x).unwrap();
    let full_median = full.numeric_fill_values()["LotFrontage"];

    let mut any_differs = false;
    for (report, preprocessor) in result.folds.iter().zip(result.fold_preprocessors.iter()) {
        assert_eq!(preprocessor.n_samples_fitted(), report.n_train);

        let mut train: Vec<f64> = (0..n)
            .filter(|i| !report.validation_indices.contains(i))
            .filter_map(|i| values[i])
            .collect();
        train.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = train.len() / 2;
        let expected = if train.len() % 2 == 1 {
            train[mid]
        } else {
            (train[mid - 1] + train[mid]) / 2.0
        };

        let fold_median = preprocessor.numeric_fill_values()["LotFrontage"];
        assert!((fold_median - expected).abs() < 1e-9);
        any_differs |= (fold_median - full_median).abs() > 1e-9;
    }
    assert!(any_differs);
}

// ─── End to end ────────────────────────────────────────────────────────────────

#[test]
fn test_price_ensemble_end_to_end() {
    let (x, y) = house_data(60);
    let mut trainer = small_price_config(5).trainer();
    trainer.fit(&x, &y).unwrap();
    let trained = trainer.trained().unwrap();

    let w = trained.weights();
    assert!((0.0..=1.0).contains(&w.weight_a));
    assert!((w.weight_a + w.weight_b - 1.0).abs() < 1e-12);

    let summary = trained.summary().unwrap();
    assert_eq!(summary.n_folds, 5);
    assert_eq!(summary.folds.len(), 5);
    assert!(summary.rmse_mean.is_finite() && summary.rmse_std >= 0.0);
    assert!(summary.blend_oof_rmse.is_finite());

    let predictions = trained.predict(&x).unwrap();
    assert_eq!(predictions.len(), 60);
    let mape = predictions
        .iter()
        .zip(y.iter())
        .map(|(p, t)| ((p - t) / t).abs())
        .sum::<f64>()
        / 60.0;
    assert!(mape < 0.5, "mean absolute percentage error {}", mape);

    // Deterministic and reentrant
    assert_eq!(predictions, trained.predict(&x).unwrap());

    // Single row
    let one = trained.predict(&x.head(Some(1))).unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0], predictions[0]);

    let record = trained.record();
    assert_eq!(record.model_a, "elasticnet");
    assert_eq!(record.model_b, "gradient_boosting");
    assert!(record.feature_names.iter().any(|f| f.starts_with("Neighborhood=")));
    assert!(record.metrics().contains_key("blend_oof_rmse"));
}

#[test]
fn test_trained_ensemble_serde() {
    let (x, y) = house_data(40);
    let mut trainer = small_price_config(4).trainer();
    trainer.fit(&x, &y).unwrap();
    let trained = trainer.into_trained().unwrap();

    let json = serde_json::to_string(&trained).unwrap();
    let restored: price_ensemble::ensemble::PriceEnsemble = serde_json::from_str(&json).unwrap();

    let before = trained.predict(&x).unwrap();
    let after = restored.predict(&x).unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert!((a - b).abs() <= 1e-6 * a.abs());
    }
    assert_eq!(restored.target_transform(), TargetTransform::Log1p);
}

// ─── Errors ────────────────────────────────────────────────────────────────────

#[test]
fn test_configuration_errors() {
    let x = row_frame(3);
    let engine = CrossFitEngine::new(4, 42);
    let err = engine
        .run(&PassthroughFactory, &Constant::new(1.0), &Constant::new(1.0), &x, &array![1.0, 2.0, 3.0])
        .unwrap_err();
    assert!(matches!(err, EnsembleError::ConfigError(_)));

    let err = CrossFitEngine::new(1, 42)
        .run(&PassthroughFactory, &Constant::new(1.0), &Constant::new(1.0), &x, &array![1.0, 2.0, 3.0])
        .unwrap_err();
    assert!(matches!(err, EnsembleError::ConfigError(_)));

    let err = CrossFitEngine::new(2, 42)
        .run(&PassthroughFactory, &Constant::new(1.0), &Constant::new(1.0), &x, &array![1.0, 2.0])
        .unwrap_err();
    assert!(matches!(err, EnsembleError::ConfigError(_)));

    let err = CrossFitEngine::new(2, 42)
        .run(&PassthroughFactory, &Constant::new(1.0), &Constant::new(1.0), &x, &array![1.0, f64::NAN, 3.0])
        .unwrap_err();
    assert!(matches!(err, EnsembleError::ValidationError(_)));
}

#[test]
fn test_predict_before_fit() {
    let trainer = small_price_config(3).trainer();
    let (x, _) = house_data(5);
    assert!(!trainer.is_fitted());
    assert!(matches!(trainer.predict(&x), Err(EnsembleError::ModelNotFitted)));
}

#[test]
fn test_schema_mismatch_at_predict() {
    let (x, y) = house_data(30);
    let mut trainer = small_price_config(3).trainer();
    trainer.fit(&x, &y).unwrap();

    let missing = x.drop("GrLivArea").unwrap();
    assert!(matches!(trainer.predict(&missing), Err(EnsembleError::SchemaMismatch(_))));

    let mut extra = x.clone();
    extra
        .with_column(Column::new("PoolQC".into(), vec![1.0; 30]))
        .unwrap();
    assert!(matches!(trainer.predict(&extra), Err(EnsembleError::SchemaMismatch(_))));
}

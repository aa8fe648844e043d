use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array1;
use polars::prelude::*;
use price_ensemble::ensemble::{CrossFitEngine, EnsembleConfig, PriceEnsembleConfig};
use price_ensemble::preprocessing::DefaultPreprocessorFactory;
use price_ensemble::training::{
    ElasticNetConfig, ElasticNetRegression, GradientBoostingConfig, GradientBoostingRegressor,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_house_data(n_rows: usize, n_features: usize) -> (DataFrame, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let neighborhoods = ["CollgCr", "Veenker", "Crawfor", "NoRidge", "Mitchel"];

    let mut columns: Vec<Column> = (0..n_features)
        .map(|i| {
            let values: Vec<f64> = (0..n_rows).map(|_| rng.gen::<f64>() * 10.0).collect();
            Column::new(format!("feature_{}", i).into(), values)
        })
        .collect();
    let nb: Vec<&str> = (0..n_rows)
        .map(|_| neighborhoods[rng.gen_range(0..neighborhoods.len())])
        .collect();
    columns.push(Column::new("Neighborhood".into(), nb));

    let df = DataFrame::new(columns).unwrap();
    let target: Vec<f64> = (0..n_rows)
        .map(|i| {
            let mut sum = 0.0;
            for j in 0..n_features {
                let col = df.column(&format!("feature_{}", j)).unwrap();
                sum += col.as_materialized_series().f64().unwrap().get(i).unwrap_or(0.0);
            }
            (11.0 + 0.02 * sum + rng.gen::<f64>() * 0.1).exp()
        })
        .collect();

    (df, Array1::from_vec(target))
}

fn gb_config() -> GradientBoostingConfig {
    GradientBoostingConfig::default().with_n_estimators(50)
}

fn bench_cross_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_fit");
    group.sample_size(10);

    for n_rows in [500, 1500].iter() {
        let (x, y) = create_house_data(*n_rows, 10);
        let y = y.mapv(f64::ln_1p);
        let factory = DefaultPreprocessorFactory::default();
        let enet = ElasticNetRegression::new(ElasticNetConfig::default());
        let gbt = GradientBoostingRegressor::new(gb_config());

        group.bench_with_input(BenchmarkId::new("5_folds", n_rows), &x, |b, x| {
            b.iter(|| {
                CrossFitEngine::new(5, 42)
                    .run(&factory, &enet, &gbt, black_box(x), &y)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_fit_and_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("ensemble");
    group.sample_size(10);

    let (x, y) = create_house_data(1000, 10);
    let config = PriceEnsembleConfig {
        ensemble: EnsembleConfig::default().with_n_folds(5),
        gradient_boosting: gb_config(),
        ..Default::default()
    };

    group.bench_function("fit", |b| {
        b.iter(|| {
            let mut trainer = config.trainer();
            trainer.fit(black_box(&x), &y).unwrap();
        })
    });

    let mut trainer = config.trainer();
    trainer.fit(&x, &y).unwrap();
    for n_rows in [1, 100, 1000].iter() {
        let batch = x.head(Some(*n_rows));
        group.bench_with_input(BenchmarkId::new("predict", n_rows), &batch, |b, batch| {
            b.iter(|| trainer.predict(black_box(batch)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cross_fit, bench_fit_and_predict);
criterion_main!(benches);

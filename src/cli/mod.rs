//! Command-line interface
//!
//! `train`, `predict`, `promote` and `serve` over the library API.

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::ensemble::{
    EnsembleConfig, GridSearchOptimizer, LeastSquaresOptimizer, PriceEnsemble, PriceEnsembleConfig,
    TargetTransform, WeightStrategy,
};
use crate::server::{run_server, ServerConfig, DEFAULT_MODEL_NAME};
use crate::tracking::{LocalRegistry, RunMetadata, CHAMPION};
use crate::utils::{save_predictions, split_ids, split_target, DataLoader};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<22} {}", muted(key), val.white());
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "price-ensemble")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-validated ElasticNet + gradient boosting blend for sale prices")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cross-fit, choose blend weights and refit on the full data
    Train(TrainArgs),

    /// Score a CSV with a trained ensemble
    Predict(PredictArgs),

    /// Point the champion alias at a registered version
    Promote {
        #[arg(long, env = "REGISTRY_DIR", default_value = "./registry")]
        registry: PathBuf,

        #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL_NAME)]
        model_name: String,

        #[arg(long)]
        version: u32,
    },

    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Grid,
    LeastSquares,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Training CSV
    #[arg(short, long)]
    pub data: PathBuf,

    /// Target column
    #[arg(short, long, default_value = "SalePrice")]
    pub target: String,

    /// Columns removed before training; the first one present is the row id
    #[arg(long, value_delimiter = ',', default_value = "Id")]
    pub drop: Vec<String>,

    #[arg(long, default_value_t = 10)]
    pub folds: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = StrategyArg::Grid)]
    pub strategy: StrategyArg,

    /// Grid spacing of the weight search
    #[arg(long, default_value_t = 0.05)]
    pub grid_step: f64,

    /// Keep the unclipped least-squares weight
    #[arg(long)]
    pub no_clip: bool,

    /// Grid spacing of the refinement after the least-squares estimate
    #[arg(long)]
    pub refine_step: Option<f64>,

    /// Train on the raw target instead of log1p
    #[arg(long)]
    pub raw_target: bool,

    /// Recompute least-squares weights on the full data after refitting
    #[arg(long)]
    pub refit_weights: bool,

    /// JSON file receiving the trained ensemble
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Log and register the run in this registry
    #[arg(long, env = "REGISTRY_DIR")]
    pub registry: Option<PathBuf>,

    #[arg(long, default_value = "house-prices")]
    pub experiment: String,

    #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL_NAME)]
    pub model_name: String,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// CSV to score
    #[arg(short, long)]
    pub data: PathBuf,

    /// Ensemble JSON written by `train --output`
    #[arg(short, long, conflicts_with = "registry")]
    pub model: Option<PathBuf>,

    #[arg(long, env = "REGISTRY_DIR")]
    pub registry: Option<PathBuf>,

    #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL_NAME)]
    pub model_name: String,

    #[arg(long, env = "MODEL_ALIAS", default_value = CHAMPION)]
    pub alias: String,

    #[arg(long, default_value = "Id")]
    pub id_column: String,

    /// Output CSV (`Id,SalePrice`); printed to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl TrainArgs {
    pub fn to_config(&self) -> PriceEnsembleConfig {
        let strategy = match self.strategy {
            StrategyArg::Grid => WeightStrategy::Grid(GridSearchOptimizer::new(self.grid_step)),
            StrategyArg::LeastSquares => WeightStrategy::LeastSquares(
                LeastSquaresOptimizer::default()
                    .with_clip(!self.no_clip)
                    .with_refine_step(self.refine_step),
            ),
        };
        let transform = if self.raw_target {
            TargetTransform::Identity
        } else {
            TargetTransform::Log1p
        };
        PriceEnsembleConfig {
            ensemble: EnsembleConfig::default()
                .with_n_folds(self.folds)
                .with_seed(self.seed)
                .with_weight_strategy(strategy)
                .with_target_transform(transform)
                .with_refit_weights(self.refit_weights),
            ..Default::default()
        }
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(args: &TrainArgs) -> anyhow::Result<()> {
    section("Train");

    step_run("Loading data");
    let start = Instant::now();
    let df = DataLoader::new().load_csv(&args.data)?;
    let data = split_target(df, &args.target, &args.drop)?;
    step_done(&format!(
        "{} rows × {} features in {:.2?}",
        data.features.height(),
        data.features.width(),
        start.elapsed()
    ));

    let config = args.to_config();
    config.validate()?;

    step_run(&format!("Cross-fitting {} folds", args.folds));
    let start = Instant::now();
    let mut trainer = config.trainer();
    trainer.fit(&data.features, &data.target)?;
    step_done(&format!("{:.2?}", start.elapsed()));

    let trained = trainer
        .into_trained()
        .ok_or_else(|| anyhow::anyhow!("training finished without a fitted ensemble"))?;
    let record = trained.record();

    println!();
    let weights = trained.weights();
    kv("Weights (enet / gbt)", &format!("{:.4} / {:.4}", weights.weight_a, weights.weight_b));
    if let Some(summary) = trained.summary() {
        kv("CV RMSE", &format!("{:.5} ± {:.5}", summary.rmse_mean, summary.rmse_std));
        kv("CV R²", &format!("{:.5}", summary.r2_mean));
        kv("Blend OOF RMSE", &format!("{:.5}", summary.blend_oof_rmse));
        kv("Blend OOF R²", &format!("{:.5}", summary.blend_oof_r2));
    }

    if let Some(path) = &args.output {
        step_run(&format!("Saving → {}", path.display()));
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &trained)?;
        step_done("");
    }

    if let Some(root) = &args.registry {
        let registry = LocalRegistry::open(root);
        let mut params = BTreeMap::new();
        for (key, value) in &record.params_a {
            params.insert(format!("{}.{}", record.model_a, key), value.clone());
        }
        for (key, value) in &record.params_b {
            params.insert(format!("{}.{}", record.model_b, key), value.clone());
        }
        let metadata = RunMetadata::default()
            .with_params(params)
            .with_metrics(record.metrics())
            .with_tag("model_a", record.model_a.clone())
            .with_tag("model_b", record.model_b.clone())
            .with_config(json!({
                "config": config,
                "n_rows": data.features.height(),
                "n_features": data.features.width(),
            }));
        let run_name = format!("{}+{}", record.model_a, record.model_b);
        let (logged, version) =
            registry.log_and_register(&args.experiment, &run_name, &args.model_name, &trained, metadata)?;

        kv("Run", &logged.run_id);
        kv(
            "Registered",
            &format!("{} v{}{}", args.model_name, version, if logged.deduped { " (existing run)" } else { "" }),
        );
    }
    println!();
    Ok(())
}

fn load_model(args: &PredictArgs) -> anyhow::Result<PriceEnsemble> {
    match (&args.model, &args.registry) {
        (Some(path), _) => {
            let reader = BufReader::new(File::open(path)?);
            Ok(serde_json::from_reader(reader)?)
        }
        (None, Some(root)) => Ok(LocalRegistry::open(root).load(&args.model_name, &args.alias)?),
        (None, None) => anyhow::bail!("provide --model or --registry"),
    }
}

pub fn cmd_predict(args: &PredictArgs) -> anyhow::Result<()> {
    let ensemble = load_model(args)?;
    let df = DataLoader::new().load_csv(&args.data)?;
    let (features, ids) = split_ids(df, &args.id_column)?;
    let predictions = ensemble.predict(&features)?;

    match &args.output {
        Some(path) => {
            save_predictions(path, ids.as_ref(), &predictions)?;
            println!("  {} {} predictions → {}", ok("✓"), predictions.len(), path.display());
        }
        None => print_predictions(ids.as_ref(), &predictions)?,
    }
    Ok(())
}

fn print_predictions(ids: Option<&polars::prelude::Column>, predictions: &ndarray::Array1<f64>) -> anyhow::Result<()> {
    let ids: Vec<String> = match ids {
        Some(ids) => {
            let ids = ids.as_materialized_series().cast(&polars::prelude::DataType::String)?;
            ids.str()?
                .into_iter()
                .map(|v| v.unwrap_or_default().to_string())
                .collect()
        }
        None => (1..=predictions.len()).map(|i| i.to_string()).collect(),
    };
    println!("Id,SalePrice");
    for (id, pred) in ids.iter().zip(predictions.iter()) {
        println!("{},{}", id, pred);
    }
    Ok(())
}

pub fn cmd_promote(registry: &Path, model_name: &str, version: u32) -> anyhow::Result<()> {
    LocalRegistry::open(registry).promote(model_name, version)?;
    println!("  {} {} v{} is now {}", ok("✓"), model_name, version, CHAMPION);
    Ok(())
}

pub async fn cmd_serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = ServerConfig::default();
    if let Some(host) = host {
        config = config.with_host(host);
    }
    if let Some(port) = port {
        config = config.with_port(port);
    }
    run_server(config).await
}

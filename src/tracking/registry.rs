//! Local file-based model registry
//!
//! Layout under the registry root:
//!
//! ```text
//! registry.json               experiments, runs, registered models, aliases
//! artifacts/<run_id>.json     serialized model of each run
//! ```

use crate::error::{EnsembleError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Alias given to freshly registered versions
pub const CHALLENGER: &str = "challenger";
/// Alias of the version that serves traffic
pub const CHAMPION: &str = "champion";

/// Registry location and run deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub root: PathBuf,
    /// Return the existing run when a run with the same config hash exists
    pub dedupe: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./registry"),
            dedupe: true,
        }
    }
}

impl RegistryConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }
}

/// Metadata logged with a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub params: BTreeMap<String, serde_json::Value>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    /// Configuration whose hash identifies equivalent runs
    pub config: Option<serde_json::Value>,
}

impl RunMetadata {
    pub fn with_params(mut self, params: BTreeMap<String, serde_json::Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_metrics(mut self, metrics: BTreeMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// A logged training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub run_name: String,
    pub experiment_id: String,
    pub created_at: DateTime<Utc>,
    pub params: BTreeMap<String, serde_json::Value>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    pub config_hash: Option<String>,
    /// Artifact path relative to the registry root
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub runs: Vec<RunRecord>,
}

/// Outcome of [`LocalRegistry::log_run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedRun {
    pub experiment_id: String,
    pub run_id: String,
    pub artifact_uri: String,
    /// The run already existed and nothing new was written
    pub deduped: bool,
    pub config_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: u32,
    pub run_id: String,
    pub config_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub versions: Vec<ModelVersion>,
    pub aliases: BTreeMap<String, u32>,
}

impl RegisteredModel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            versions: Vec::new(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn version(&self, version: u32) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn latest_version(&self) -> Option<&ModelVersion> {
        self.versions.iter().max_by_key(|v| v.version)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryIndex {
    experiments: BTreeMap<String, Experiment>,
    models: BTreeMap<String, RegisteredModel>,
}

impl RegistryIndex {
    fn find_run(&self, run_id: &str) -> Option<&RunRecord> {
        self.experiments
            .values()
            .flat_map(|e| e.runs.iter())
            .find(|r| r.run_id == run_id)
    }
}

/// SHA-256 of the canonical JSON form of a configuration.
///
/// Object keys are serialized in sorted order, so equal configurations
/// hash equally regardless of construction order.
pub fn hash_config(config: &serde_json::Value) -> Result<String> {
    let canonical = serde_json::to_string(config)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{:x}", digest))
}

/// Registry stored as JSON files under one directory
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    config: RegistryConfig,
}

impl LocalRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(RegistryConfig::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn index_file(&self) -> PathBuf {
        self.config.root.join("registry.json")
    }

    fn artifact_dir(&self) -> PathBuf {
        self.config.root.join("artifacts")
    }

    fn load_index(&self) -> Result<RegistryIndex> {
        let path = self.index_file();
        if !path.exists() {
            return Ok(RegistryIndex::default());
        }
        let contents = fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|e| {
            EnsembleError::RegistryError(format!("corrupt registry index {}: {}", path.display(), e))
        })
    }

    fn save_index(&self, index: &RegistryIndex) -> Result<()> {
        fs::create_dir_all(&self.config.root)?;
        let path = self.index_file();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(index)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// All experiments, keyed by name
    pub fn experiments(&self) -> Result<BTreeMap<String, Experiment>> {
        Ok(self.load_index()?.experiments)
    }

    pub fn run(&self, run_id: &str) -> Result<RunRecord> {
        self.load_index()?
            .find_run(run_id)
            .cloned()
            .ok_or_else(|| EnsembleError::NotFound(format!("run '{}'", run_id)))
    }

    pub fn model(&self, model_name: &str) -> Result<RegisteredModel> {
        self.load_index()?
            .models
            .remove(model_name)
            .ok_or_else(|| EnsembleError::NotFound(format!("model '{}'", model_name)))
    }

    /// Log a run and its artifact under `experiment`, creating the
    /// experiment if needed.
    pub fn log_run<M: Serialize>(
        &self,
        experiment: &str,
        run_name: &str,
        artifact: &M,
        metadata: RunMetadata,
    ) -> Result<LoggedRun> {
        if experiment.trim().is_empty() {
            return Err(EnsembleError::ConfigError("experiment name is empty".to_string()));
        }
        let mut index = self.load_index()?;
        let config_hash = metadata.config.as_ref().map(hash_config).transpose()?;

        let exp = index
            .experiments
            .entry(experiment.to_string())
            .or_insert_with(|| Experiment {
                experiment_id: Uuid::new_v4().to_string(),
                name: experiment.to_string(),
                created_at: Utc::now(),
                runs: Vec::new(),
            });

        if self.config.dedupe {
            if let Some(hash) = &config_hash {
                let existing = exp
                    .runs
                    .iter()
                    .filter(|r| r.config_hash.as_ref() == Some(hash))
                    .max_by_key(|r| r.created_at);
                if let Some(run) = existing {
                    info!(experiment, run_id = %run.run_id, "Run with identical config exists, skipping");
                    return Ok(LoggedRun {
                        experiment_id: exp.experiment_id.clone(),
                        run_id: run.run_id.clone(),
                        artifact_uri: run.artifact.display().to_string(),
                        deduped: true,
                        config_hash,
                    });
                }
            }
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let artifact_rel = PathBuf::from("artifacts").join(format!("{}.json", run_id));
        fs::create_dir_all(self.artifact_dir())?;
        fs::write(self.config.root.join(&artifact_rel), serde_json::to_vec(artifact)?)?;

        let mut tags = metadata.tags;
        if let Some(hash) = &config_hash {
            tags.insert("config_hash".to_string(), hash.clone());
        }
        exp.runs.push(RunRecord {
            run_id: run_id.clone(),
            run_name: run_name.to_string(),
            experiment_id: exp.experiment_id.clone(),
            created_at: Utc::now(),
            params: metadata.params,
            metrics: metadata.metrics,
            tags,
            config_hash: config_hash.clone(),
            artifact: artifact_rel.clone(),
        });
        let experiment_id = exp.experiment_id.clone();
        self.save_index(&index)?;

        info!(experiment, run_id = %run_id, run_name, "Run logged");
        Ok(LoggedRun {
            experiment_id,
            run_id,
            artifact_uri: artifact_rel.display().to_string(),
            deduped: false,
            config_hash,
        })
    }

    /// Register a run as a new version of `model_name`.
    ///
    /// A run that is already registered, or a run whose config hash
    /// matches a registered version, returns the existing version.
    pub fn register(&self, model_name: &str, run_id: &str) -> Result<u32> {
        let mut index = self.load_index()?;
        let run = index
            .find_run(run_id)
            .cloned()
            .ok_or_else(|| EnsembleError::NotFound(format!("run '{}'", run_id)))?;

        let model = index
            .models
            .entry(model_name.to_string())
            .or_insert_with(|| RegisteredModel::new(model_name));

        if let Some(v) = model.versions.iter().find(|v| v.run_id == run.run_id) {
            return Ok(v.version);
        }
        if let Some(hash) = &run.config_hash {
            if let Some(v) = model.versions.iter().find(|v| v.config_hash.as_ref() == Some(hash)) {
                return Ok(v.version);
            }
        }

        let version = model.latest_version().map_or(1, |v| v.version + 1);
        model.versions.push(ModelVersion {
            version,
            run_id: run.run_id.clone(),
            config_hash: run.config_hash.clone(),
            created_at: Utc::now(),
        });
        self.save_index(&index)?;

        info!(model = model_name, version, run_id, "Model version registered");
        Ok(version)
    }

    /// Point `alias` of `model_name` at an existing version
    pub fn set_alias(&self, model_name: &str, alias: &str, version: u32) -> Result<()> {
        if alias.trim().is_empty() {
            return Err(EnsembleError::ConfigError("alias is empty".to_string()));
        }
        let mut index = self.load_index()?;
        let model = index
            .models
            .get_mut(model_name)
            .ok_or_else(|| EnsembleError::NotFound(format!("model '{}'", model_name)))?;
        if model.version(version).is_none() {
            return Err(EnsembleError::NotFound(format!(
                "version {} of model '{}'",
                version, model_name
            )));
        }
        model.aliases.insert(alias.to_string(), version);
        self.save_index(&index)?;

        info!(model = model_name, alias, version, "Alias set");
        Ok(())
    }

    /// Version currently behind `alias`
    pub fn resolve(&self, model_name: &str, alias: &str) -> Result<ModelVersion> {
        let model = self.model(model_name)?;
        let version = model.aliases.get(alias).copied().ok_or_else(|| {
            EnsembleError::NotFound(format!("alias '{}' of model '{}'", alias, model_name))
        })?;
        model.version(version).cloned().ok_or_else(|| {
            EnsembleError::NotFound(format!("version {} of model '{}'", version, model_name))
        })
    }

    /// Log, register and mark the new version as challenger
    pub fn log_and_register<M: Serialize>(
        &self,
        experiment: &str,
        run_name: &str,
        model_name: &str,
        artifact: &M,
        metadata: RunMetadata,
    ) -> Result<(LoggedRun, u32)> {
        let logged = self.log_run(experiment, run_name, artifact, metadata)?;
        let version = self.register(model_name, &logged.run_id)?;
        self.set_alias(model_name, CHALLENGER, version)?;
        Ok((logged, version))
    }

    /// Mark `version` as champion
    pub fn promote(&self, model_name: &str, version: u32) -> Result<()> {
        self.set_alias(model_name, CHAMPION, version)
    }

    /// Deserialize the artifact of a given version
    pub fn load_version<M: DeserializeOwned>(&self, model_name: &str, version: u32) -> Result<M> {
        let index = self.load_index()?;
        let model = index
            .models
            .get(model_name)
            .ok_or_else(|| EnsembleError::NotFound(format!("model '{}'", model_name)))?;
        let entry = model.version(version).ok_or_else(|| {
            EnsembleError::NotFound(format!("version {} of model '{}'", version, model_name))
        })?;
        let run = index
            .find_run(&entry.run_id)
            .ok_or_else(|| EnsembleError::NotFound(format!("run '{}'", entry.run_id)))?;

        let path = self.config.root.join(&run.artifact);
        if !path.exists() {
            return Err(EnsembleError::NotFound(format!("artifact {}", path.display())));
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Resolve `model_name@alias` and deserialize its artifact
    pub fn load<M: DeserializeOwned>(&self, model_name: &str, alias: &str) -> Result<M> {
        let version = self.resolve(model_name, alias)?;
        self.load_version(model_name, version.version)
    }
}

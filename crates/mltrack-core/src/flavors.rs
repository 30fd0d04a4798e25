//! Model flavors: saving MLmodel directories and loading them back by alias.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ActiveRun, TrackingClient};
use crate::error::{Result, TrackingError};
use crate::native::{LinearModel, Predict, SequentialModel};
use crate::registry::resolve_alias;

/// Descriptor file at the root of every model directory.
pub const MLMODEL_FILE: &str = "MLmodel";
const DATA_FILE: &str = "model.json";
const JSON_FORMAT: &str = "json";
const PYFUNC_KEY: &str = "python_function";

/// Format a model is loaded as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// Generic wrapper delegating to the loader named by `python_function.loader_module`.
    #[default]
    PythonModel,
    Sklearn,
    Pytorch,
}

impl Flavor {
    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::PythonModel => "python_model",
            Flavor::Sklearn => "sklearn",
            Flavor::Pytorch => "pytorch",
        }
    }

    /// Key of this flavor in an MLmodel descriptor.
    pub fn descriptor_key(self) -> &'static str {
        match self {
            Flavor::PythonModel => PYFUNC_KEY,
            Flavor::Sklearn => "sklearn",
            Flavor::Pytorch => "pytorch",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "python_model" => Ok(Flavor::PythonModel),
            "sklearn" => Ok(Flavor::Sklearn),
            "pytorch" => Ok(Flavor::Pytorch),
            other => Err(TrackingError::UnsupportedFlavor(other.to_string())),
        }
    }
}

// ─── MLmodel descriptor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlavorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization_format: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    pub flavors: BTreeMap<String, FlavorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_time_created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<serde_yaml::Value>,
}

impl ModelDescriptor {
    pub fn read(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(MLMODEL_FILE);
        if !path.exists() {
            return Err(TrackingError::ResourceDoesNotExist(format!(
                "{} in {}",
                MLMODEL_FILE,
                model_dir.display()
            )));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn write(&self, model_dir: &Path) -> Result<()> {
        fs::write(model_dir.join(MLMODEL_FILE), serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

// ─── Saving ──────────────────────────────────────────────────────────────────

/// A model this crate can serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NativeModel {
    Linear(LinearModel),
    Sequential(SequentialModel),
}

impl NativeModel {
    pub fn flavor(&self) -> Flavor {
        match self {
            NativeModel::Linear(_) => Flavor::Sklearn,
            NativeModel::Sequential(_) => Flavor::Pytorch,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            NativeModel::Linear(m) => m.validate(),
            NativeModel::Sequential(m) => m.validate(),
        }
    }

    fn write_data(&self, path: &Path) -> Result<()> {
        let json = match self {
            NativeModel::Linear(m) => serde_json::to_string_pretty(m)?,
            NativeModel::Sequential(m) => serde_json::to_string_pretty(m)?,
        };
        fs::write(path, json)?;
        Ok(())
    }
}

impl From<LinearModel> for NativeModel {
    fn from(m: LinearModel) -> Self {
        NativeModel::Linear(m)
    }
}

impl From<SequentialModel> for NativeModel {
    fn from(m: SequentialModel) -> Self {
        NativeModel::Sequential(m)
    }
}

/// Write `model` as an MLmodel directory with its native flavor and a `python_function` entry.
pub fn save_model(
    model: &NativeModel,
    model_dir: &Path,
    artifact_path: Option<&str>,
    run_id: Option<&str>,
) -> Result<ModelDescriptor> {
    model.validate()?;
    fs::create_dir_all(model_dir)?;
    model.write_data(&model_dir.join(DATA_FILE))?;

    let native_key = model.flavor().descriptor_key();
    let native = FlavorConfig {
        data: Some(DATA_FILE.to_string()),
        serialization_format: Some(JSON_FORMAT.to_string()),
        ..Default::default()
    };
    let pyfunc = FlavorConfig {
        loader_module: Some(format!("mltrack.{native_key}")),
        ..native.clone()
    };

    let descriptor = ModelDescriptor {
        artifact_path: artifact_path.map(str::to_string),
        flavors: BTreeMap::from([
            (native_key.to_string(), native),
            (PYFUNC_KEY.to_string(), pyfunc),
        ]),
        run_id: run_id.map(str::to_string),
        model_uuid: Some(Uuid::new_v4().simple().to_string()),
        utc_time_created: Some(Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        signature: None,
    };
    descriptor.write(model_dir)?;
    Ok(descriptor)
}

/// Where [`log_model`] put a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Storage location, suitable for [`crate::registry::register_model_with_alias`]
    pub artifact_uri: String,
    /// `runs:/<run_id>/<artifact_path>`
    pub model_uri: String,
    pub descriptor: ModelDescriptor,
}

/// Save `model` into the artifacts of `run` under `artifact_path`.
pub fn log_model(
    client: &TrackingClient,
    run: &ActiveRun,
    artifact_path: &str,
    model: &NativeModel,
) -> Result<ModelInfo> {
    let staging = tempfile::Builder::new().prefix("mltrack-model-").tempdir()?;
    let model_dir = staging.path().join("model");
    let descriptor = save_model(model, &model_dir, Some(artifact_path), Some(run.run_id()))?;
    let artifact_uri = client.log_artifacts(run, &model_dir, artifact_path)?;
    if let Err(e) = staging.close() {
        warn!("failed to remove staging directory: {}", e);
    }
    info!(run_id = %run.run_id(), uri = %artifact_uri, flavor = %model.flavor(), "model logged");
    Ok(ModelInfo {
        artifact_uri,
        model_uri: format!("runs:/{}/{}", run.run_id(), artifact_path.trim_matches('/')),
        descriptor,
    })
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// A model loaded from a model directory.
pub struct LoadedModel {
    pub flavor: Flavor,
    pub descriptor: ModelDescriptor,
    inner: Box<dyn Predict>,
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("flavor", &self.flavor)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl Predict for LoadedModel {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        self.inner.predict(rows)
    }
}

/// Load the model directory at `model_dir` with the loader for `flavor`.
pub fn load_model(model_dir: &Path, flavor: Flavor) -> Result<LoadedModel> {
    let descriptor = ModelDescriptor::read(model_dir)?;
    let key = flavor.descriptor_key();
    let config = descriptor
        .flavors
        .get(key)
        .ok_or_else(|| TrackingError::FlavorNotFound {
            flavor: key.to_string(),
            location: model_dir.display().to_string(),
        })?;

    let inner = match flavor {
        Flavor::Sklearn => load_linear(model_dir, config)?,
        Flavor::Pytorch => load_sequential(model_dir, config)?,
        Flavor::PythonModel => {
            let module = config.loader_module.as_deref().ok_or_else(|| {
                TrackingError::UnsupportedSerialization(format!(
                    "{PYFUNC_KEY} flavor without loader_module"
                ))
            })?;
            let target: Flavor = module.rsplit('.').next().unwrap_or(module).parse()?;
            // Prefer the delegate's own entry; fall back to the pyfunc entry's data.
            let delegate = descriptor.flavors.get(target.descriptor_key()).unwrap_or(config);
            match target {
                Flavor::Sklearn => load_linear(model_dir, delegate)?,
                Flavor::Pytorch => load_sequential(model_dir, delegate)?,
                Flavor::PythonModel => {
                    return Err(TrackingError::UnsupportedFlavor(module.to_string()))
                }
            }
        }
    };

    debug!(dir = %model_dir.display(), flavor = %flavor, "model loaded");
    Ok(LoadedModel {
        flavor,
        descriptor,
        inner,
    })
}

fn data_path(model_dir: &Path, config: &FlavorConfig) -> Result<PathBuf> {
    match (config.serialization_format.as_deref(), config.data.as_deref()) {
        (Some(JSON_FORMAT), Some(data)) => Ok(model_dir.join(data)),
        (None, Some(data)) if data.ends_with(".json") => Ok(model_dir.join(data)),
        (Some(format), _) => Err(TrackingError::UnsupportedSerialization(format.to_string())),
        (None, _) => Err(TrackingError::UnsupportedSerialization(
            "model data is not stored as JSON".to_string(),
        )),
    }
}

fn load_linear(model_dir: &Path, config: &FlavorConfig) -> Result<Box<dyn Predict>> {
    let content = fs::read_to_string(data_path(model_dir, config)?)?;
    let model: LinearModel = serde_json::from_str(&content)?;
    model.validate()?;
    Ok(Box::new(model))
}

fn load_sequential(model_dir: &Path, config: &FlavorConfig) -> Result<Box<dyn Predict>> {
    let content = fs::read_to_string(data_path(model_dir, config)?)?;
    let model: SequentialModel = serde_json::from_str(&content)?;
    model.validate()?;
    Ok(Box::new(model))
}

/// Resolve `alias` of `model_name` in the registry and load that version as `flavor`.
pub fn load_model_by_alias(
    client: &TrackingClient,
    model_name: &str,
    alias: &str,
    flavor: Flavor,
) -> Result<LoadedModel> {
    let version = resolve_alias(client, model_name, alias)?;
    info!(
        model = %model_name,
        alias = %alias,
        version = version.version,
        flavor = %flavor,
        "loading model"
    );
    let artifacts = client.download_artifacts(&version.model_uri())?;
    load_model(artifacts.path(), flavor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_flavors_only() {
        assert_eq!("sklearn".parse::<Flavor>().unwrap(), Flavor::Sklearn);
        assert_eq!("python_model".parse::<Flavor>().unwrap(), Flavor::PythonModel);
        let err = "tensorflow".parse::<Flavor>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported model flavor: tensorflow");
    }

    #[test]
    fn pickled_models_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MLMODEL_FILE),
            "flavors:\n  sklearn:\n    pickled_model: model.pkl\n    serialization_format: cloudpickle\n",
        )
        .unwrap();
        let err = load_model(dir.path(), Flavor::Sklearn).unwrap_err();
        assert!(matches!(err, TrackingError::UnsupportedSerialization(f) if f == "cloudpickle"));
    }

    #[test]
    fn missing_flavor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        save_model(
            &LinearModel::regressor(vec![1.0], 0.0).into(),
            dir.path(),
            None,
            None,
        )
        .unwrap();
        let err = load_model(dir.path(), Flavor::Pytorch).unwrap_err();
        assert!(matches!(err, TrackingError::FlavorNotFound { ref flavor, .. } if flavor == "pytorch"));
    }

    #[test]
    fn python_model_delegates_to_loader_module() {
        let dir = tempfile::tempdir().unwrap();
        save_model(
            &LinearModel::regressor(vec![2.0], 1.0).into(),
            dir.path(),
            Some("model"),
            None,
        )
        .unwrap();
        let model = load_model(dir.path(), Flavor::PythonModel).unwrap();
        assert_eq!(model.predict(&[vec![3.0]]).unwrap(), vec![7.0]);
    }
}

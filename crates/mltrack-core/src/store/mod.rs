//! The `TrackingStore` seam and its two backends.

mod file;
mod rest;

use std::path::{Path, PathBuf};

pub use file::FileStore;
pub use rest::RestStore;

use crate::artifacts::{self, ArtifactLocation};
use crate::config::TrackingConfig;
use crate::error::{Result, TrackingError};
use crate::models::{
    Experiment, Metric, ModelVersion, Param, RegisteredModel, Run, RunFilter, RunInfo, RunStatus,
    RunTag,
};

/// Persistence for experiments, runs and the model registry.
///
/// Every call is a blocking round-trip to the backing store.
pub trait TrackingStore: Send + Sync {
    /// URI this store was opened from.
    fn tracking_uri(&self) -> &str;

    // experiments
    fn get_experiment(&self, experiment_id: &str) -> Result<Experiment>;
    fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>>;
    fn create_experiment(&self, name: &str) -> Result<String>;

    // runs
    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        tags: &[RunTag],
    ) -> Result<RunInfo>;
    fn update_run(&self, run_id: &str, status: RunStatus, end_time: Option<i64>)
        -> Result<RunInfo>;
    fn get_run(&self, run_id: &str) -> Result<Run>;
    fn search_runs(&self, experiment_ids: &[String], filter: &RunFilter) -> Result<Vec<Run>>;
    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()>;
    fn log_param(&self, run_id: &str, param: &Param) -> Result<()>;
    fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<()>;
    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>>;

    // model registry
    fn get_registered_model(&self, name: &str) -> Result<RegisteredModel>;
    fn create_registered_model(&self, name: &str) -> Result<RegisteredModel>;
    fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> Result<ModelVersion>;
    fn set_registered_model_alias(&self, name: &str, alias: &str, version: u64) -> Result<()>;
    fn get_model_version_by_alias(&self, name: &str, alias: &str) -> Result<ModelVersion>;
    fn get_model_version_download_uri(&self, name: &str, version: u64) -> Result<String>;

    // artifacts

    /// Copy `local` (file or directory) to `artifact_uri`.
    fn upload_artifacts(&self, local: &Path, artifact_uri: &str) -> Result<()> {
        match ArtifactLocation::parse(artifact_uri)? {
            ArtifactLocation::Local(dest) => {
                artifacts::copy_tree(local, &dest)?;
                Ok(())
            }
            ArtifactLocation::Proxied { .. } => {
                Err(TrackingError::UnsupportedUri(artifact_uri.to_string()))
            }
        }
    }

    /// Make the artifacts at `artifact_uri` available on the local filesystem.
    ///
    /// Local artifacts are returned in place; remote ones are copied under `scratch`.
    fn download_artifacts(&self, artifact_uri: &str, _scratch: &Path) -> Result<PathBuf> {
        match ArtifactLocation::parse(artifact_uri)? {
            ArtifactLocation::Local(path) if path.exists() => Ok(path),
            ArtifactLocation::Local(path) => Err(TrackingError::ResourceDoesNotExist(format!(
                "artifact path {}",
                path.display()
            ))),
            ArtifactLocation::Proxied { .. } => {
                Err(TrackingError::UnsupportedUri(artifact_uri.to_string()))
            }
        }
    }
}

/// Open the store addressed by `config.tracking_uri`.
///
/// `http(s)://` selects the REST store; `file:` URIs and bare paths the file store.
pub fn open_store(config: &TrackingConfig) -> Result<Box<dyn TrackingStore>> {
    let uri = config.tracking_uri.as_str();
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Box::new(RestStore::new(uri, config.request_timeout)?));
    }
    match artifacts::local_path_from_uri(uri) {
        Some(root) => Ok(Box::new(FileStore::open(uri, root)?)),
        None => Err(TrackingError::UnsupportedUri(uri.to_string())),
    }
}

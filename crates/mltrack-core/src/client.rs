//! Tracking client: configuration, active experiment and the stack of active runs.
//!
//! Where the fluent MLflow API keeps the active run in process-wide state,
//! `TrackingClient` owns it explicitly and hands out [`ActiveRun`] handles.
//! Logging takes a handle, so "a run must be active" is visible in the types.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, warn};

use crate::artifacts::ArtifactLocation;
use crate::config::{TrackingConfig, DEFAULT_EXPERIMENT_NAME};
use crate::error::{Result, TrackingError};
use crate::models::{
    now_millis, Experiment, Metric, Param, RunInfo, RunStatus, RunTag, PARENT_RUN_ID_TAG,
};
use crate::store::{open_store, TrackingStore};

/// Handle to a run started through a [`TrackingClient`].
///
/// Consumed by [`TrackingClient::end_run`].
#[derive(Debug)]
pub struct ActiveRun {
    info: RunInfo,
}

impl ActiveRun {
    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    /// Artifact URI of `path` inside this run (`runs:/`-style resolution done locally).
    pub fn artifact_uri(&self, path: &str) -> Result<String> {
        Ok(ArtifactLocation::parse(&self.info.artifact_uri)?
            .join(path)
            .to_uri())
    }
}

/// Options for [`TrackingClient::start_run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_name: Option<String>,
    /// Allow starting while another run is active, nesting under it.
    pub nested: bool,
    /// Explicit parent; overrides the innermost active run.
    pub parent_run_id: Option<String>,
    pub tags: Vec<RunTag>,
}

impl RunOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            run_name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Result of [`start_nested_run`]: the nested run, plus the top-level run
/// started on the caller's behalf when none was active. The caller ends both.
#[derive(Debug)]
pub struct NestedRun {
    pub run: ActiveRun,
    pub implicit_parent: Option<ActiveRun>,
}

pub struct TrackingClient {
    config: TrackingConfig,
    store: Box<dyn TrackingStore>,
    experiment_id: String,
    active_runs: Vec<RunInfo>,
}

impl TrackingClient {
    /// Open the store named by `config` and select its experiment (created if missing).
    pub fn new(config: TrackingConfig) -> Result<Self> {
        let store = open_store(&config)?;
        Self::with_store(config, store)
    }

    pub fn from_env() -> Result<Self> {
        Self::new(TrackingConfig::from_env())
    }

    /// Use an already opened store, e.g. a custom [`TrackingStore`] implementation.
    pub fn with_store(config: TrackingConfig, store: Box<dyn TrackingStore>) -> Result<Self> {
        let experiment_id = match &config.experiment_name {
            Some(name) => get_or_create_experiment(store.as_ref(), name)?.experiment_id,
            None => "0".to_string(),
        };
        Ok(Self {
            config,
            store,
            experiment_id,
            active_runs: vec![],
        })
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn tracking_uri(&self) -> &str {
        self.store.tracking_uri()
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn experiment_name(&self) -> &str {
        self.config
            .experiment_name
            .as_deref()
            .unwrap_or(DEFAULT_EXPERIMENT_NAME)
    }

    pub fn store(&self) -> &dyn TrackingStore {
        self.store.as_ref()
    }

    /// Point the client at another store. Fails while runs are active.
    pub fn set_tracking_uri(&mut self, uri: &str) -> Result<()> {
        if let Some(run) = self.active_runs.last() {
            return Err(TrackingError::InvalidParameter(format!(
                "cannot switch tracking URI while run {} is active",
                run.run_id
            )));
        }
        let mut config = TrackingConfig {
            tracking_uri: uri.to_string(),
            ..self.config.clone()
        };
        let store = open_store(&config)?;
        // Keep the active experiment if the new store knows it; never create it there.
        let existing = match &config.experiment_name {
            Some(name) => store.get_experiment_by_name(name)?,
            None => None,
        };
        let experiment_id = match existing {
            Some(experiment) => experiment.experiment_id,
            None => {
                if let Some(name) = config.experiment_name.take() {
                    warn!(experiment = %name, uri = %uri, "experiment unknown to new store, using default");
                }
                "0".to_string()
            }
        };
        info!(uri = %uri, "tracking URI set");
        self.config = config;
        self.store = store;
        self.experiment_id = experiment_id;
        Ok(())
    }

    /// Make `name` the experiment new runs go to, creating it if needed.
    pub fn set_experiment(&mut self, name: &str) -> Result<Experiment> {
        let experiment = get_or_create_experiment(self.store.as_ref(), name)?;
        info!(experiment = %name, id = %experiment.experiment_id, "active experiment set");
        self.experiment_id = experiment.experiment_id.clone();
        self.config.experiment_name = Some(name.to_string());
        Ok(experiment)
    }

    // ─── Runs ────────────────────────────────────────────────────────────────

    /// Innermost active run, if any.
    pub fn active_run(&self) -> Option<&RunInfo> {
        self.active_runs.last()
    }

    pub fn start_run(&mut self, options: RunOptions) -> Result<ActiveRun> {
        if let Some(current) = self.active_runs.last() {
            if !options.nested {
                return Err(TrackingError::InvalidParameter(format!(
                    "run {} is already active; start the new run as nested",
                    current.run_id
                )));
            }
        }

        let parent = match (&options.parent_run_id, options.nested) {
            (Some(parent), _) => Some(parent.clone()),
            (None, true) => self.active_runs.last().map(|r| r.run_id.clone()),
            (None, false) => None,
        };

        let mut tags = options.tags;
        if let Some(parent) = &parent {
            tags.retain(|t| t.key != PARENT_RUN_ID_TAG);
            tags.push(RunTag {
                key: PARENT_RUN_ID_TAG.to_string(),
                value: parent.clone(),
            });
        }

        let info = self
            .store
            .create_run(&self.experiment_id, options.run_name.as_deref(), &tags)?;
        info!(
            run_id = %info.run_id,
            experiment_id = %info.experiment_id,
            parent = parent.as_deref().unwrap_or("-"),
            "run started"
        );
        self.active_runs.push(info.clone());
        Ok(ActiveRun { info })
    }

    /// Mark `run` as terminated with `status` and drop it from the active stack.
    ///
    /// If the store call fails the run is left on the active stack.
    pub fn end_run(&mut self, run: ActiveRun, status: RunStatus) -> Result<RunInfo> {
        self.ensure_active(&run)?;
        let run_id = run.info.run_id;
        let info = self.store.update_run(&run_id, status, Some(now_millis()))?;
        self.active_runs.retain(|r| r.run_id != run_id);
        info!(run_id = %run_id, status = %status, "run ended");
        Ok(info)
    }

    /// Run `f` inside a fresh run, ending it as finished on success and failed on error.
    pub fn with_run<T, F>(&mut self, options: RunOptions, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self, &ActiveRun) -> Result<T>,
    {
        let run = self.start_run(options)?;
        match f(self, &run) {
            Ok(value) => {
                self.end_run(run, RunStatus::Finished)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(end_err) = self.end_run(run, RunStatus::Failed) {
                    warn!("failed to mark run as failed: {}", end_err);
                }
                Err(e)
            }
        }
    }

    fn ensure_active(&self, run: &ActiveRun) -> Result<()> {
        if self.active_runs.iter().any(|r| r.run_id == run.info.run_id) {
            Ok(())
        } else {
            Err(TrackingError::RunNotActive(run.info.run_id.clone()))
        }
    }

    pub fn log_metric(&self, run: &ActiveRun, key: &str, value: f64, step: i64) -> Result<()> {
        self.ensure_active(run)?;
        let metric = Metric {
            key: key.to_string(),
            value,
            timestamp: now_millis(),
            step,
        };
        self.store.log_metric(run.run_id(), &metric)
    }

    pub fn log_param(&self, run: &ActiveRun, key: &str, value: &str) -> Result<()> {
        self.ensure_active(run)?;
        let param = Param {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.store.log_param(run.run_id(), &param)
    }

    pub fn set_tag(&self, run: &ActiveRun, key: &str, value: &str) -> Result<()> {
        self.ensure_active(run)?;
        let tag = RunTag {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.store.set_tag(run.run_id(), &tag)
    }

    // ─── Artifacts ───────────────────────────────────────────────────────────

    /// Upload `local` (file or directory) to `artifact_path` inside `run`.
    pub fn log_artifacts(&self, run: &ActiveRun, local: &Path, artifact_path: &str) -> Result<String> {
        self.ensure_active(run)?;
        let uri = run.artifact_uri(artifact_path)?;
        self.store.upload_artifacts(local, &uri)?;
        Ok(uri)
    }

    /// Resolve `runs:/` and `models:/` URIs to a storage location.
    pub fn resolve_artifact_uri(&self, uri: &str) -> Result<String> {
        if let Some(rest) = uri.strip_prefix("runs:/") {
            let rest = rest.trim_start_matches('/');
            let (run_id, path) = rest.split_once('/').unwrap_or((rest, ""));
            let run = self.store.get_run(run_id)?;
            return Ok(ArtifactLocation::parse(&run.info.artifact_uri)?
                .join(path)
                .to_uri());
        }
        if let Some(rest) = uri.strip_prefix("models:/") {
            let rest = rest.trim_start_matches('/').trim_end_matches('/');
            let version = match rest.split_once('@') {
                Some((name, alias)) => self.store.get_model_version_by_alias(name, alias)?,
                None => {
                    let (name, version) = rest
                        .rsplit_once('/')
                        .ok_or_else(|| TrackingError::UnsupportedUri(uri.to_string()))?;
                    let version: u64 = version
                        .parse()
                        .map_err(|_| TrackingError::UnsupportedUri(uri.to_string()))?;
                    let source = self.store.get_model_version_download_uri(name, version)?;
                    return self.resolve_artifact_uri(&source);
                }
            };
            let source = self
                .store
                .get_model_version_download_uri(&version.name, version.version)?;
            return self.resolve_artifact_uri(&source);
        }
        Ok(uri.to_string())
    }

    /// Local copy of the artifacts behind `uri`, downloading remote ones.
    ///
    /// Downloads land in a scratch directory that is removed when the
    /// returned [`LocalArtifacts`] is dropped. Artifacts already on local
    /// disk are handed out in place and never removed.
    pub fn download_artifacts(&self, uri: &str) -> Result<LocalArtifacts> {
        let resolved = self.resolve_artifact_uri(uri)?;
        let scratch = tempfile::Builder::new().prefix("mltrack-").tempdir()?;
        let path = self.store.download_artifacts(&resolved, scratch.path())?;
        let scratch = path.starts_with(scratch.path()).then_some(scratch);
        Ok(LocalArtifacts { path, scratch })
    }
}

/// Artifacts on local disk, see [`TrackingClient::download_artifacts`].
#[derive(Debug)]
pub struct LocalArtifacts {
    path: PathBuf,
    scratch: Option<TempDir>,
}

impl LocalArtifacts {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the files are a downloaded copy that goes away on drop.
    pub fn is_temporary(&self) -> bool {
        self.scratch.is_some()
    }
}

fn get_or_create_experiment(store: &dyn TrackingStore, name: &str) -> Result<Experiment> {
    if let Some(experiment) = store.get_experiment_by_name(name)? {
        return Ok(experiment);
    }
    let id = store.create_experiment(name)?;
    store.get_experiment(&id)
}

/// Start a run nested under `parent_run_id`, or under the active run.
///
/// With neither, a top-level run is started first and returned in
/// [`NestedRun::implicit_parent`].
pub fn start_nested_run(
    client: &mut TrackingClient,
    parent_run_id: Option<&str>,
    nested_run_name: Option<&str>,
) -> Result<NestedRun> {
    let implicit_parent = if client.active_run().is_none() && parent_run_id.is_none() {
        Some(client.start_run(RunOptions::default())?)
    } else {
        None
    };

    let run = client.start_run(RunOptions {
        run_name: nested_run_name.map(str::to_string),
        nested: true,
        parent_run_id: parent_run_id.map(str::to_string),
        tags: vec![],
    })?;

    Ok(NestedRun {
        run,
        implicit_parent,
    })
}

/// Set the tracking URI and/or the active experiment. Omitting both is a no-op.
pub fn setup_tracking(
    client: &mut TrackingClient,
    tracking_uri: Option<&str>,
    experiment_name: Option<&str>,
) -> Result<()> {
    if let Some(uri) = tracking_uri.filter(|u| !u.is_empty()) {
        client.set_tracking_uri(uri)?;
    }
    if let Some(name) = experiment_name.filter(|n| !n.is_empty()) {
        client.set_experiment(name)?;
    }
    Ok(())
}

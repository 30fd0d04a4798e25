//! Local file store: YAML metadata, Parquet metric history, plain artifact directories.
//!
//! Layout below the root:
//!
//! ```text
//! <experiment_id>/meta.yaml
//! <experiment_id>/<run_id>/{meta.yaml, params.yaml, tags.yaml, metrics.parquet, artifacts/}
//! models/<name>/meta.yaml
//! models/<name>/version-<n>/meta.yaml
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use tracing::{debug, info};
use uuid::Uuid;

use super::TrackingStore;
use crate::artifacts::path_to_uri;
use crate::config::DEFAULT_EXPERIMENT_NAME;
use crate::error::{Result, TrackingError};
use crate::models::{
    now_millis, Experiment, Metric, ModelVersion, Param, RegisteredModel, RegisteredModelAlias,
    Run, RunData, RunFilter, RunInfo, RunStatus, RunTag, RUN_NAME_TAG,
};

const MODELS_DIR: &str = "models";
const META_FILE: &str = "meta.yaml";
const PARAMS_FILE: &str = "params.yaml";
const TAGS_FILE: &str = "tags.yaml";
const METRICS_FILE: &str = "metrics.parquet";
const ARTIFACTS_DIR: &str = "artifacts";

pub struct FileStore {
    uri: String,
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `root`, with a `Default` experiment `0`.
    pub fn open(uri: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            uri: uri.into(),
            root: root.into(),
        };
        ensure_dir(&store.root)?;
        let default_dir = store.root.join("0");
        if !default_dir.join(META_FILE).exists() {
            store.write_experiment("0", DEFAULT_EXPERIMENT_NAME)?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─── Experiments ─────────────────────────────────────────────────────────

    fn experiment_ids(&self) -> Result<Vec<String>> {
        let mut ids = vec![];
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name != MODELS_DIR && entry.path().join(META_FILE).exists() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        Ok(ids)
    }

    fn write_experiment(&self, id: &str, name: &str) -> Result<Experiment> {
        let dir = self.root.join(id);
        ensure_dir(&dir)?;
        let now = now_millis();
        let experiment = Experiment {
            experiment_id: id.to_string(),
            name: name.to_string(),
            artifact_location: path_to_uri(&dir),
            lifecycle_stage: "active".to_string(),
            creation_time: Some(now),
            last_update_time: Some(now),
        };
        save_yaml(&dir.join(META_FILE), &experiment)?;
        Ok(experiment)
    }

    // ─── Runs ────────────────────────────────────────────────────────────────

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if !is_safe_name(run_id) {
            return Err(TrackingError::InvalidParameter(format!("run id '{run_id}'")));
        }
        for exp_id in self.experiment_ids()? {
            let dir = self.root.join(&exp_id).join(run_id);
            if dir.join(META_FILE).exists() {
                return Ok(dir);
            }
        }
        Err(TrackingError::ResourceDoesNotExist(format!("run '{run_id}'")))
    }

    fn active_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        let info: RunInfo = read_yaml(&dir.join(META_FILE), || format!("run '{run_id}'"))?;
        if info.lifecycle_stage != "active" {
            return Err(TrackingError::RunNotActive(run_id.to_string()));
        }
        Ok(dir)
    }

    fn load_run(&self, dir: &Path) -> Result<Run> {
        let info: RunInfo = read_yaml(&dir.join(META_FILE), || dir.display().to_string())?;
        let params: BTreeMap<String, String> = load_yaml(&dir.join(PARAMS_FILE))?;
        let tags: BTreeMap<String, String> = load_yaml(&dir.join(TAGS_FILE))?;
        let history = read_metrics(&dir.join(METRICS_FILE))?;

        Ok(Run {
            info,
            data: RunData {
                metrics: latest_metrics(history),
                params: params
                    .into_iter()
                    .map(|(key, value)| Param { key, value })
                    .collect(),
                tags: tags
                    .into_iter()
                    .map(|(key, value)| RunTag { key, value })
                    .collect(),
            },
        })
    }

    // ─── Registry ────────────────────────────────────────────────────────────

    fn model_dir(&self, name: &str) -> Result<PathBuf> {
        if !is_safe_name(name) {
            return Err(TrackingError::InvalidParameter(format!(
                "registered model name '{name}'"
            )));
        }
        Ok(self.root.join(MODELS_DIR).join(name))
    }

    fn version_path(&self, name: &str, version: u64) -> Result<PathBuf> {
        Ok(self
            .model_dir(name)?
            .join(format!("version-{version}"))
            .join(META_FILE))
    }

    fn load_version(&self, model: &RegisteredModel, version: u64) -> Result<ModelVersion> {
        let path = self.version_path(&model.name, version)?;
        let mut mv: ModelVersion = read_yaml(&path, || {
            format!("model version {} of '{}'", version, model.name)
        })?;
        mv.aliases = model
            .aliases
            .iter()
            .filter(|a| a.version == version)
            .map(|a| a.alias.clone())
            .collect();
        Ok(mv)
    }

    fn latest_version(&self, name: &str) -> Result<u64> {
        let dir = self.model_dir(name)?;
        let mut latest = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("version-"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                latest = latest.max(n);
            }
        }
        Ok(latest)
    }
}

impl TrackingStore for FileStore {
    fn tracking_uri(&self) -> &str {
        &self.uri
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        if !is_safe_name(experiment_id) {
            return Err(TrackingError::InvalidParameter(format!(
                "experiment id '{experiment_id}'"
            )));
        }
        read_yaml(&self.root.join(experiment_id).join(META_FILE), || {
            format!("experiment '{experiment_id}'")
        })
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        for id in self.experiment_ids()? {
            let experiment = self.get_experiment(&id)?;
            if experiment.name == name {
                return Ok(Some(experiment));
            }
        }
        Ok(None)
    }

    fn create_experiment(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(TrackingError::InvalidParameter(
                "experiment name must not be empty".to_string(),
            ));
        }
        if self.get_experiment_by_name(name)?.is_some() {
            return Err(TrackingError::ResourceAlreadyExists(format!(
                "experiment '{name}'"
            )));
        }
        let next_id = self
            .experiment_ids()?
            .iter()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1);
        let id = next_id.to_string();
        self.write_experiment(&id, name)?;
        info!(experiment = %name, id = %id, "created experiment");
        Ok(id)
    }

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        tags: &[RunTag],
    ) -> Result<RunInfo> {
        let experiment = self.get_experiment(experiment_id)?;
        let run_id = Uuid::new_v4().simple().to_string();
        let run_dir = self.root.join(&experiment.experiment_id).join(&run_id);
        ensure_dir(&run_dir.join(ARTIFACTS_DIR))?;

        let run_name = run_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("run-{}", &run_id[..8]));
        let info = RunInfo {
            run_id: run_id.clone(),
            run_name: Some(run_name.clone()),
            experiment_id: experiment.experiment_id.clone(),
            status: RunStatus::Running,
            start_time: now_millis(),
            end_time: None,
            artifact_uri: path_to_uri(&run_dir.join(ARTIFACTS_DIR)),
            lifecycle_stage: "active".to_string(),
        };
        save_yaml(&run_dir.join(META_FILE), &info)?;

        let mut all_tags: BTreeMap<String, String> = tags
            .iter()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect();
        all_tags.insert(RUN_NAME_TAG.to_string(), run_name);
        save_yaml(&run_dir.join(TAGS_FILE), &all_tags)?;

        debug!(run_id = %run_id, experiment_id = %experiment_id, "created run");
        Ok(info)
    }

    fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<i64>,
    ) -> Result<RunInfo> {
        let dir = self.active_run_dir(run_id)?;
        let path = dir.join(META_FILE);
        let mut info: RunInfo = read_yaml(&path, || format!("run '{run_id}'"))?;
        info.status = status;
        if end_time.is_some() {
            info.end_time = end_time;
        }
        save_yaml(&path, &info)?;
        Ok(info)
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        let dir = self.run_dir(run_id)?;
        self.load_run(&dir)
    }

    fn search_runs(&self, experiment_ids: &[String], filter: &RunFilter) -> Result<Vec<Run>> {
        let mut runs = vec![];
        for exp_id in experiment_ids {
            let exp_dir = self.root.join(exp_id);
            if !exp_dir.join(META_FILE).exists() {
                continue;
            }
            for entry in fs::read_dir(&exp_dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.join(META_FILE).exists() {
                    continue;
                }
                let run = self.load_run(&path)?;
                if filter.matches(&run.data) {
                    runs.push(run);
                }
            }
        }
        runs.sort_by(|a, b| b.info.start_time.cmp(&a.info.start_time));
        Ok(runs)
    }

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()> {
        let dir = self.active_run_dir(run_id)?;
        append_metrics(&dir.join(METRICS_FILE), std::slice::from_ref(metric))
    }

    fn log_param(&self, run_id: &str, param: &Param) -> Result<()> {
        let dir = self.active_run_dir(run_id)?;
        let path = dir.join(PARAMS_FILE);
        let mut params: BTreeMap<String, String> = load_yaml(&path)?;
        match params.get(&param.key) {
            Some(existing) if existing != &param.value => {
                return Err(TrackingError::InvalidParameter(format!(
                    "param '{}' already logged with value '{}', cannot change it to '{}'",
                    param.key, existing, param.value
                )));
            }
            Some(_) => return Ok(()),
            None => {}
        }
        params.insert(param.key.clone(), param.value.clone());
        save_yaml(&path, &params)
    }

    fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<()> {
        let dir = self.active_run_dir(run_id)?;
        let path = dir.join(TAGS_FILE);
        let mut tags: BTreeMap<String, String> = load_yaml(&path)?;
        tags.insert(tag.key.clone(), tag.value.clone());
        save_yaml(&path, &tags)
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>> {
        let dir = self.run_dir(run_id)?;
        Ok(read_metrics(&dir.join(METRICS_FILE))?
            .into_iter()
            .filter(|m| m.key == key)
            .collect())
    }

    fn get_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        read_yaml(&self.model_dir(name)?.join(META_FILE), || {
            format!("registered model '{name}'")
        })
    }

    fn create_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        let dir = self.model_dir(name)?;
        if dir.join(META_FILE).exists() {
            return Err(TrackingError::ResourceAlreadyExists(format!(
                "registered model '{name}'"
            )));
        }
        ensure_dir(&dir)?;
        let now = now_millis();
        let model = RegisteredModel {
            name: name.to_string(),
            creation_timestamp: Some(now),
            last_updated_timestamp: Some(now),
            description: None,
            aliases: vec![],
        };
        save_yaml(&dir.join(META_FILE), &model)?;
        info!(model = %name, "created registered model");
        Ok(model)
    }

    fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> Result<ModelVersion> {
        let mut model = self.get_registered_model(name)?;
        let version = self.latest_version(name)? + 1;
        let now = now_millis();
        let mv = ModelVersion {
            name: name.to_string(),
            version,
            source: source.to_string(),
            run_id: run_id.map(str::to_string),
            creation_timestamp: Some(now),
            last_updated_timestamp: Some(now),
            status: Some("READY".to_string()),
            aliases: vec![],
        };
        let path = self.version_path(name, version)?;
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        save_yaml(&path, &mv)?;

        model.last_updated_timestamp = Some(now);
        save_yaml(&self.model_dir(name)?.join(META_FILE), &model)?;
        Ok(mv)
    }

    fn set_registered_model_alias(&self, name: &str, alias: &str, version: u64) -> Result<()> {
        let mut model = self.get_registered_model(name)?;
        if !self.version_path(name, version)?.exists() {
            return Err(TrackingError::ResourceDoesNotExist(format!(
                "model version {version} of '{name}'"
            )));
        }
        model.aliases.retain(|a| a.alias != alias);
        model.aliases.push(RegisteredModelAlias {
            alias: alias.to_string(),
            version,
        });
        model.last_updated_timestamp = Some(now_millis());
        save_yaml(&self.model_dir(name)?.join(META_FILE), &model)
    }

    fn get_model_version_by_alias(&self, name: &str, alias: &str) -> Result<ModelVersion> {
        let model = self.get_registered_model(name)?;
        let version = model.alias_version(alias).ok_or_else(|| {
            TrackingError::ResourceDoesNotExist(format!(
                "alias '{alias}' of registered model '{name}'"
            ))
        })?;
        self.load_version(&model, version)
    }

    fn get_model_version_download_uri(&self, name: &str, version: u64) -> Result<String> {
        let model = self.get_registered_model(name)?;
        Ok(self.load_version(&model, version)?.source)
    }
}

// ─── YAML I/O ────────────────────────────────────────────────────────────────

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

fn save_yaml<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let content = serde_yaml::to_string(data)?;
    fs::write(path, content)?;
    Ok(())
}

/// Load YAML, falling back to `T::default()` when the file does not exist.
fn load_yaml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Load YAML that must exist; a missing file is reported as `what` not existing.
fn read_yaml<T, F>(path: &Path, what: F) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce() -> String,
{
    if !path.exists() {
        return Err(TrackingError::ResourceDoesNotExist(what()));
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Names used as single path components.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

// ─── Parquet metric history ──────────────────────────────────────────────────

fn metrics_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
        Field::new("step", DataType::Int64, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
    ]))
}

/// Append metrics to a Parquet file.
/// Strategy: read existing → concat → write back.
fn append_metrics(path: &Path, metrics: &[Metric]) -> Result<()> {
    if metrics.is_empty() {
        return Ok(());
    }
    let new_batch = metrics_to_record_batch(metrics)?;
    let final_batch = if path.exists() {
        let existing = read_parquet(path)?;
        arrow::compute::concat_batches(&metrics_schema(), &[existing, new_batch])?
    } else {
        new_batch
    };
    write_parquet(path, &final_batch)
}

/// Every logged metric, in logging order.
fn read_metrics(path: &Path) -> Result<Vec<Metric>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let batch = read_parquet(path)?;
    record_batch_to_metrics(&batch)
}

/// Latest value per key: highest step, then latest timestamp, then last logged.
fn latest_metrics(history: Vec<Metric>) -> Vec<Metric> {
    let mut latest: BTreeMap<String, Metric> = BTreeMap::new();
    for metric in history {
        let replace = match latest.get(&metric.key) {
            Some(current) => {
                (metric.step, metric.timestamp) >= (current.step, current.timestamp)
            }
            None => true,
        };
        if replace {
            latest.insert(metric.key.clone(), metric);
        }
    }
    latest.into_values().collect()
}

fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;
    let mut batches = vec![];
    for batch in reader {
        batches.push(batch?);
    }
    let schema = metrics_schema();
    match batches.len() {
        0 => Ok(RecordBatch::new_empty(schema)),
        1 => Ok(batches.remove(0)),
        _ => Ok(arrow::compute::concat_batches(&schema, &batches)?),
    }
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = fs::File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn metrics_to_record_batch(metrics: &[Metric]) -> Result<RecordBatch> {
    let keys: ArrayRef = Arc::new(StringArray::from_iter_values(
        metrics.iter().map(|m| m.key.as_str()),
    ));
    let values: ArrayRef = Arc::new(Float64Array::from_iter_values(
        metrics.iter().map(|m| m.value),
    ));
    let steps: ArrayRef = Arc::new(Int64Array::from_iter_values(metrics.iter().map(|m| m.step)));
    let timestamps: ArrayRef = Arc::new(
        TimestampMillisecondArray::from_iter_values(metrics.iter().map(|m| m.timestamp))
            .with_timezone("UTC"),
    );
    Ok(RecordBatch::try_new(
        metrics_schema(),
        vec![keys, values, steps, timestamps],
    )?)
}

fn record_batch_to_metrics(batch: &RecordBatch) -> Result<Vec<Metric>> {
    let keys = column::<StringArray>(batch, "key")?;
    let values = column::<Float64Array>(batch, "value")?;
    let steps = column::<Int64Array>(batch, "step")?;
    let timestamps = column::<TimestampMillisecondArray>(batch, "timestamp")?;

    Ok((0..batch.num_rows())
        .map(|i| Metric {
            key: keys.value(i).to_string(),
            value: values.value(i),
            step: steps.value(i),
            timestamp: timestamps.value(i),
        })
        .collect())
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| TrackingError::Other(format!("metrics file has no usable '{name}' column")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(key: &str, value: f64, step: i64, timestamp: i64) -> Metric {
        Metric { key: key.into(), value, step, timestamp }
    }

    #[test]
    fn latest_prefers_highest_step() {
        let latest = latest_metrics(vec![
            metric("loss", 0.9, 0, 10),
            metric("loss", 0.5, 2, 5),
            metric("loss", 0.7, 1, 20),
            metric("acc", 0.1, 0, 1),
        ]);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.iter().find(|m| m.key == "loss").unwrap().value, 0.5);
    }

    #[test]
    fn metrics_survive_parquet_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(METRICS_FILE);
        append_metrics(&path, &[metric("loss", 1.0, 0, 1)]).unwrap();
        append_metrics(&path, &[metric("loss", 0.5, 1, 2), metric("acc", 0.8, 1, 2)]).unwrap();

        let all = read_metrics(&path).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1], metric("loss", 0.5, 1, 2));
    }

    #[test]
    fn rejects_path_like_names() {
        assert!(!is_safe_name("../etc"));
        assert!(!is_safe_name("a/b"));
        assert!(is_safe_name("test_model"));
    }
}

//! Data models for mltrack.
//!
//! Field names follow the MLflow REST API so the same types deserialize
//! from server responses and from the file store's YAML metadata.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

/// Milliseconds since the Unix epoch, the timestamp unit of the tracking API.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ─── Metrics tree ────────────────────────────────────────────────────────────

/// A nested metrics mapping as handed to [`crate::metrics::save_training_metrics`].
pub type MetricsTree = BTreeMap<String, MetricValue>;

/// A single leaf or subtree of a [`MetricsTree`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<MetricValue>),
    Nested(MetricsTree),
    Null,
}

impl MetricValue {
    /// Numeric value of integer and float leaves. Booleans are not numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Int(i) => Some(*i as f64),
            MetricValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::Null => f.write_str("null"),
            MetricValue::List(_) | MetricValue::Nested(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}
impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Float(v as f64)
    }
}
impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}
impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(v as i64)
    }
}
impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Int(v as i64)
    }
}
impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}
impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}
impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}
impl From<MetricsTree> for MetricValue {
    fn from(v: MetricsTree) -> Self {
        MetricValue::Nested(v)
    }
}

// ─── Experiments and runs ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    #[serde(default)]
    pub artifact_location: String,
    #[serde(default = "active_stage")]
    pub lifecycle_stage: String,
    #[serde(default)]
    pub creation_time: Option<i64>,
    #[serde(default)]
    pub last_update_time: Option<i64>,
}

fn active_stage() -> String {
    "active".to_string()
}

/// Status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Scheduled => write!(f, "SCHEDULED"),
            RunStatus::Finished => write!(f, "FINISHED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Killed => write!(f, "KILLED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(default)]
    pub run_name: Option<String>,
    pub experiment_id: String,
    pub status: RunStatus,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub artifact_uri: String,
    #[serde(default = "active_stage")]
    pub lifecycle_stage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub step: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

/// Logged contents of a run. `metrics` holds the latest value per key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunData {
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub tags: Vec<RunTag>,
}

impl RunData {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.key == key).map(|m| m.value)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub info: RunInfo,
    #[serde(default)]
    pub data: RunData,
}

/// Tag linking a nested run to its parent.
pub const PARENT_RUN_ID_TAG: &str = "mlflow.parentRunId";
/// Tag carrying the human-readable run name.
pub const RUN_NAME_TAG: &str = "mlflow.runName";

/// Conjunction of tag equality clauses used to search runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub tags: Vec<(String, String)>,
}

impl RunFilter {
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, data: &RunData) -> bool {
        self.tags
            .iter()
            .all(|(k, v)| data.tag(k) == Some(v.as_str()))
    }

    /// Render as an MLflow search filter string.
    pub fn to_filter_string(&self) -> String {
        self.tags
            .iter()
            .map(|(k, v)| format!("tags.`{}` = '{}'", k, v.replace('\'', "\\'")))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

// ─── Model registry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredModelAlias {
    pub alias: String,
    #[serde(deserialize_with = "de_version")]
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisteredModel {
    pub name: String,
    #[serde(default)]
    pub creation_timestamp: Option<i64>,
    #[serde(default)]
    pub last_updated_timestamp: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<RegisteredModelAlias>,
}

impl RegisteredModel {
    pub fn alias_version(&self, alias: &str) -> Option<u64> {
        self.aliases
            .iter()
            .find(|a| a.alias == alias)
            .map(|a| a.version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelVersion {
    pub name: String,
    #[serde(deserialize_with = "de_version")]
    pub version: u64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub creation_timestamp: Option<i64>,
    #[serde(default)]
    pub last_updated_timestamp: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ModelVersion {
    /// `models:/<name>/<version>` URI of this version.
    pub fn model_uri(&self) -> String {
        format!("models:/{}/{}", self.name, self.version)
    }
}

/// Versions travel as strings over the REST API and as integers in YAML.
fn de_version<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

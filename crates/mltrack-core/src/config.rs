//! Tracking configuration: where the store lives and which experiment is active.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable holding the tracking URI.
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";
/// Environment variable holding the active experiment name.
pub const EXPERIMENT_NAME_ENV: &str = "MLFLOW_EXPERIMENT_NAME";

/// Store used when no tracking URI is configured: a local file store.
pub const DEFAULT_TRACKING_URI: &str = "./mlruns";
/// Well-known address of a locally running tracking server.
pub const DEFAULT_SERVER_URI: &str = "http://localhost:5000";
/// Name of the experiment that every store starts out with.
pub const DEFAULT_EXPERIMENT_NAME: &str = "Default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// `file:` URI, bare path, or `http(s)://` server address
    pub tracking_uri: String,
    /// Experiment new runs are created in (created on demand)
    pub experiment_name: Option<String>,
    /// Timeout for every request made by the HTTP store
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    /// Timeout of the liveness probe
    #[serde(with = "secs")]
    pub probe_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_uri: DEFAULT_TRACKING_URI.to_string(),
            experiment_name: None,
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl TrackingConfig {
    pub fn new(tracking_uri: impl Into<String>) -> Self {
        Self {
            tracking_uri: tracking_uri.into(),
            ..Default::default()
        }
    }

    pub fn with_experiment(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = Some(name.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Defaults overridden by `MLFLOW_TRACKING_URI` and `MLFLOW_EXPERIMENT_NAME`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Replace the URI and experiment with `MLFLOW_TRACKING_URI` and
    /// `MLFLOW_EXPERIMENT_NAME` where those are set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(uri) = non_empty_env(TRACKING_URI_ENV) {
            self.tracking_uri = uri;
        }
        if let Some(name) = non_empty_env(EXPERIMENT_NAME_ENV) {
            self.experiment_name = Some(name);
        }
        self
    }

    /// Load from a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.yaml");
        fs::write(&path, "tracking_uri: http://tracking:5000\nprobe_timeout: 1.5\n").unwrap();

        let config = TrackingConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.tracking_uri, "http://tracking:5000");
        assert_eq!(config.probe_timeout, Duration::from_millis(1500));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.experiment_name.is_none());
    }
}

//! MLflow REST API 2.0 client over blocking `reqwest`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::TrackingStore;
use crate::artifacts::{self, join_slash, ArtifactLocation};
use crate::error::{Result, TrackingError};
use crate::models::{
    now_millis, Experiment, Metric, ModelVersion, Param, RegisteredModel, Run, RunFilter, RunInfo,
    RunStatus, RunTag,
};

const API: &str = "/api/2.0/mlflow";
const ARTIFACTS_API: &str = "/api/2.0/mlflow-artifacts/artifacts";
const SEARCH_PAGE_SIZE: u32 = 1000;

pub struct RestStore {
    uri: String,
    base_url: String,
    client: Client,
}

/// Error envelope of the tracking server.
#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: String,
    #[serde(default)]
    message: String,
}

impl RestStore {
    pub fn new(uri: impl Into<String>, timeout: Duration) -> Result<Self> {
        let uri = uri.into();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: uri.trim_end_matches('/').to_string(),
            uri,
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}{}", self.base_url, API, endpoint)
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!(endpoint, "GET");
        send(self.client.get(self.url(endpoint)).query(query))
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<T> {
        debug!(endpoint, "POST");
        send(self.client.post(self.url(endpoint)).json(body))
    }

    fn artifacts_base(&self, host: &Option<String>) -> String {
        match host {
            Some(host) => {
                let scheme = self.base_url.split_once("://").map_or("http", |(s, _)| s);
                format!("{scheme}://{host}{ARTIFACTS_API}")
            }
            None => format!("{}{}", self.base_url, ARTIFACTS_API),
        }
    }

    fn download_proxied(&self, base: &str, path: &str, dest: &Path) -> Result<usize> {
        #[derive(Deserialize)]
        struct FileInfo {
            path: String,
            #[serde(default)]
            is_dir: bool,
        }
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            files: Vec<FileInfo>,
        }

        let listing: Listing = send(self.client.get(base).query(&[("path", path)]))?;
        if listing.files.is_empty() {
            // Either a single file or an empty directory.
            let name = path.rsplit('/').next().unwrap_or(path);
            return match self.fetch_file(base, path, &dest.join(name)) {
                Ok(()) => Ok(1),
                Err(e) if e.is_not_found() => Ok(0),
                Err(e) => Err(e),
            };
        }

        let mut count = 0;
        for file in listing.files {
            let name = file.path.rsplit('/').next().unwrap_or(&file.path).to_string();
            let remote = join_slash(path, &name);
            if file.is_dir {
                fs::create_dir_all(dest.join(&name))?;
                count += self.download_proxied(base, &remote, &dest.join(&name))?;
            } else {
                self.fetch_file(base, &remote, &dest.join(&name))?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn fetch_file(&self, base: &str, path: &str, dest: &Path) -> Result<()> {
        let response = self.client.get(format!("{base}/{path}")).send()?;
        let response = check(response)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, response.bytes()?)?;
        Ok(())
    }

    fn put_file(&self, base: &str, path: &str, local: &Path) -> Result<()> {
        debug!(path, "PUT artifact");
        let body = fs::read(local)?;
        let response = self.client.put(format!("{base}/{path}")).body(body).send()?;
        check(response)?;
        Ok(())
    }
}

fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = check(request.send()?)?;
    Ok(response.json()?)
}

/// Map non-success responses to typed errors.
fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let error = match serde_json::from_str::<ApiError>(&body) {
        Ok(api) => api,
        Err(_) if status == reqwest::StatusCode::NOT_FOUND => ApiError {
            error_code: "RESOURCE_DOES_NOT_EXIST".to_string(),
            message: body,
        },
        Err(_) => ApiError {
            error_code: status.to_string(),
            message: body,
        },
    };
    Err(match error.error_code.as_str() {
        "RESOURCE_DOES_NOT_EXIST" => TrackingError::ResourceDoesNotExist(error.message),
        "RESOURCE_ALREADY_EXISTS" => TrackingError::ResourceAlreadyExists(error.message),
        "INVALID_PARAMETER_VALUE" => TrackingError::InvalidParameter(error.message),
        _ => TrackingError::Api {
            code: error.error_code,
            message: error.message,
        },
    })
}

fn tags_json(tags: &[RunTag]) -> Vec<serde_json::Value> {
    tags.iter()
        .map(|t| json!({ "key": t.key, "value": t.value }))
        .collect()
}

impl TrackingStore for RestStore {
    fn tracking_uri(&self) -> &str {
        &self.uri
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        #[derive(Deserialize)]
        struct Response {
            experiment: Experiment,
        }
        let r: Response = self.get("/experiments/get", &[("experiment_id", experiment_id)])?;
        Ok(r.experiment)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        #[derive(Deserialize)]
        struct Response {
            experiment: Experiment,
        }
        match self.get::<Response>("/experiments/get-by-name", &[("experiment_name", name)]) {
            Ok(r) => Ok(Some(r.experiment)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_experiment(&self, name: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Response {
            experiment_id: String,
        }
        let r: Response = self.post("/experiments/create", &json!({ "name": name }))?;
        Ok(r.experiment_id)
    }

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        tags: &[RunTag],
    ) -> Result<RunInfo> {
        #[derive(Deserialize)]
        struct Response {
            run: Run,
        }
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": now_millis(),
            "tags": tags_json(tags),
        });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
        }
        let r: Response = self.post("/runs/create", &body)?;
        Ok(r.run.info)
    }

    fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<i64>,
    ) -> Result<RunInfo> {
        #[derive(Deserialize)]
        struct Response {
            run_info: RunInfo,
        }
        let mut body = json!({ "run_id": run_id, "status": status });
        if let Some(end_time) = end_time {
            body["end_time"] = json!(end_time);
        }
        let r: Response = self.post("/runs/update", &body)?;
        Ok(r.run_info)
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        #[derive(Deserialize)]
        struct Response {
            run: Run,
        }
        let r: Response = self.get("/runs/get", &[("run_id", run_id)])?;
        Ok(r.run)
    }

    fn search_runs(&self, experiment_ids: &[String], filter: &RunFilter) -> Result<Vec<Run>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            runs: Vec<Run>,
            #[serde(default)]
            next_page_token: Option<String>,
        }
        let mut runs = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut body = json!({
                "experiment_ids": experiment_ids,
                "filter": filter.to_filter_string(),
                "max_results": SEARCH_PAGE_SIZE,
            });
            if let Some(token) = &page_token {
                body["page_token"] = json!(token);
            }
            let r: Response = self.post("/runs/search", &body)?;
            runs.extend(r.runs);
            match r.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(runs),
            }
        }
    }

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()> {
        let _: IgnoredAny = self.post(
            "/runs/log-metric",
            &json!({
                "run_id": run_id,
                "key": metric.key,
                "value": metric.value,
                "timestamp": metric.timestamp,
                "step": metric.step,
            }),
        )?;
        Ok(())
    }

    fn log_param(&self, run_id: &str, param: &Param) -> Result<()> {
        let _: IgnoredAny = self.post(
            "/runs/log-parameter",
            &json!({ "run_id": run_id, "key": param.key, "value": param.value }),
        )?;
        Ok(())
    }

    fn set_tag(&self, run_id: &str, tag: &RunTag) -> Result<()> {
        let _: IgnoredAny = self.post(
            "/runs/set-tag",
            &json!({ "run_id": run_id, "key": tag.key, "value": tag.value }),
        )?;
        Ok(())
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<Metric>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            metrics: Vec<Metric>,
            #[serde(default)]
            next_page_token: Option<String>,
        }
        let mut metrics = vec![];
        let mut page_token = String::new();
        loop {
            let r: Response = {
                let mut query = vec![("run_id", run_id), ("metric_key", key)];
                if !page_token.is_empty() {
                    query.push(("page_token", page_token.as_str()));
                }
                self.get("/metrics/get-history", &query)?
            };
            metrics.extend(r.metrics);
            match r.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = token,
                None => return Ok(metrics),
            }
        }
    }

    fn get_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        #[derive(Deserialize)]
        struct Response {
            registered_model: RegisteredModel,
        }
        let r: Response = self.get("/registered-models/get", &[("name", name)])?;
        Ok(r.registered_model)
    }

    fn create_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        #[derive(Deserialize)]
        struct Response {
            registered_model: RegisteredModel,
        }
        let r: Response = self.post("/registered-models/create", &json!({ "name": name }))?;
        Ok(r.registered_model)
    }

    fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> Result<ModelVersion> {
        #[derive(Deserialize)]
        struct Response {
            model_version: ModelVersion,
        }
        let mut body = json!({ "name": name, "source": source });
        if let Some(run_id) = run_id {
            body["run_id"] = json!(run_id);
        }
        let r: Response = self.post("/model-versions/create", &body)?;
        Ok(r.model_version)
    }

    fn set_registered_model_alias(&self, name: &str, alias: &str, version: u64) -> Result<()> {
        let _: IgnoredAny = self.post(
            "/registered-models/alias",
            &json!({ "name": name, "alias": alias, "version": version.to_string() }),
        )?;
        Ok(())
    }

    fn get_model_version_by_alias(&self, name: &str, alias: &str) -> Result<ModelVersion> {
        #[derive(Deserialize)]
        struct Response {
            model_version: ModelVersion,
        }
        let r: Response = self.get(
            "/registered-models/alias",
            &[("name", name), ("alias", alias)],
        )?;
        Ok(r.model_version)
    }

    fn get_model_version_download_uri(&self, name: &str, version: u64) -> Result<String> {
        #[derive(Deserialize)]
        struct Response {
            artifact_uri: String,
        }
        let version = version.to_string();
        let r: Response = self.get(
            "/model-versions/get-download-uri",
            &[("name", name), ("version", version.as_str())],
        )?;
        Ok(r.artifact_uri)
    }

    fn upload_artifacts(&self, local: &Path, artifact_uri: &str) -> Result<()> {
        match ArtifactLocation::parse(artifact_uri)? {
            ArtifactLocation::Local(dest) => {
                artifacts::copy_tree(local, &dest)?;
                Ok(())
            }
            ArtifactLocation::Proxied { host, path } => {
                let base = self.artifacts_base(&host);
                if local.is_file() {
                    return self.put_file(&base, &path, local);
                }
                for rel in artifacts::list_files(local)? {
                    self.put_file(&base, &join_slash(&path, &rel), &local.join(&rel))?;
                }
                Ok(())
            }
        }
    }

    fn download_artifacts(&self, artifact_uri: &str, scratch: &Path) -> Result<PathBuf> {
        match ArtifactLocation::parse(artifact_uri)? {
            ArtifactLocation::Local(path) if path.exists() => Ok(path),
            ArtifactLocation::Local(path) => Err(TrackingError::ResourceDoesNotExist(format!(
                "artifact path {}",
                path.display()
            ))),
            ArtifactLocation::Proxied { host, path } => {
                let base = self.artifacts_base(&host);
                fs::create_dir_all(scratch)?;
                let count = self.download_proxied(&base, &path, scratch)?;
                if count == 0 {
                    return Err(TrackingError::ResourceDoesNotExist(format!(
                        "artifacts at {artifact_uri}"
                    )));
                }
                debug!(count, uri = %artifact_uri, "downloaded artifacts");
                Ok(scratch.to_path_buf())
            }
        }
    }
}

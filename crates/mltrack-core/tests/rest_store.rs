//! REST store and liveness probe against a mock tracking server.

use std::collections::BTreeMap;
use std::time::Duration;

use mltrack_core::flavors::save_model;
use mltrack_core::liveness::is_server_running_within;
use mltrack_core::{
    is_server_running, load_model_by_alias, register_model_with_alias, save_training_metrics,
    Flavor, LinearModel, MetricValue, NativeModel, Predict, RunOptions, RunStatus,
    TrackingClient, TrackingConfig, TrackingError,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API: &str = "/api/2.0/mlflow";

/// Blocking clients must be built off the async runtime, inside `spawn_blocking`.
fn client_for(uri: &str) -> TrackingClient {
    let config = TrackingConfig::new(uri).with_request_timeout(Duration::from_secs(5));
    TrackingClient::new(config).unwrap()
}

fn not_found(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error_code": "RESOURCE_DOES_NOT_EXIST",
        "message": message,
    }))
}

#[tokio::test]
async fn liveness_follows_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let up = server.uri();

    let down = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&down)
        .await;
    let unhealthy = down.uri();

    let (up, unhealthy) = tokio::task::spawn_blocking(move || {
        (is_server_running(&format!("{up}/")), is_server_running(&unhealthy))
    })
    .await
    .unwrap();
    assert!(up);
    assert!(!unhealthy);
}

#[tokio::test]
async fn liveness_times_out_to_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let uri = server.uri();

    let running = tokio::task::spawn_blocking(move || {
        is_server_running_within(&uri, Duration::from_millis(200))
    })
    .await
    .unwrap();
    assert!(!running);
}

#[test]
fn liveness_never_fails_on_bad_targets() {
    assert!(!is_server_running("http://127.0.0.1:1"));
    assert!(!is_server_running("not a uri"));
    assert!(!is_server_running("ftp://localhost"));
}

#[tokio::test]
async fn registration_creates_unknown_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/registered-models/get")))
        .respond_with(not_found("Registered Model with name=clf not found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/registered-models/create")))
        .and(body_partial_json(json!({ "name": "clf" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "registered_model": { "name": "clf" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/model-versions/create")))
        .and(body_partial_json(json!({ "source": "runs:/abc/model", "run_id": "abc" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model_version": { "name": "clf", "version": "1", "source": "runs:/abc/model" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/registered-models/alias")))
        .and(body_partial_json(json!({ "name": "clf", "alias": "champion", "version": "1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let version = tokio::task::spawn_blocking(move || {
        let client = client_for(&uri);
        register_model_with_alias(&client, "runs:/abc/model", "clf", "champion")
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(version, 1);
}

#[tokio::test]
async fn registration_propagates_other_lookup_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/registered-models/get")))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error_code": "PERMISSION_DENIED",
            "message": "no access",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/registered-models/create")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let uri = server.uri();
    let result = tokio::task::spawn_blocking(move || {
        let client = client_for(&uri);
        register_model_with_alias(&client, "runs:/abc/model", "clf", "champion")
    })
    .await
    .unwrap();
    assert!(matches!(
        result,
        Err(TrackingError::Api { ref code, .. }) if code == "PERMISSION_DENIED"
    ));
}

#[tokio::test]
async fn training_metrics_are_posted_per_leaf() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/runs/create")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run": {
                "info": {
                    "run_id": "r1",
                    "experiment_id": "0",
                    "status": "RUNNING",
                    "start_time": 1700000000000i64,
                    "artifact_uri": "mlflow-artifacts:/0/r1/artifacts",
                    "lifecycle_stage": "active"
                },
                "data": {}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/runs/log-metric")))
        .and(body_partial_json(json!({ "run_id": "r1", "step": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/runs/log-parameter")))
        .and(body_partial_json(json!({ "key": "train/optimizer", "value": "adam" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/runs/update")))
        .and(body_partial_json(json!({ "run_id": "r1", "status": "FINISHED" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run_info": {
                "run_id": "r1",
                "experiment_id": "0",
                "status": "FINISHED",
                "start_time": 1700000000000i64,
                "end_time": 1700000001000i64
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let status = tokio::task::spawn_blocking(move || {
        let mut client = client_for(&uri);
        let metrics = BTreeMap::from([(
            "train".to_string(),
            MetricValue::Nested(BTreeMap::from([
                ("loss".to_string(), MetricValue::from(0.5)),
                ("epochs".to_string(), MetricValue::from(3i64)),
                ("optimizer".to_string(), MetricValue::from("adam")),
            ])),
        )]);
        let run = client.start_run(RunOptions::default())?;
        save_training_metrics(&client, &run, &metrics)?;
        client.end_run(run, RunStatus::Finished).map(|info| info.status)
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(status, RunStatus::Finished);
}

/// Serve `lin@prod` (version 4) as a proxied sklearn model: y = 3x - 1.
async fn mount_proxied_model(server: &MockServer) {
    let tmp = TempDir::new().unwrap();
    let model = NativeModel::from(LinearModel::regressor(vec![3.0], -1.0));
    save_model(&model, tmp.path(), Some("model"), Some("r1")).unwrap();
    let mlmodel = std::fs::read(tmp.path().join("MLmodel")).unwrap();
    let data = std::fs::read(tmp.path().join("model.json")).unwrap();

    let source = "mlflow-artifacts:/0/r1/artifacts/model";
    Mock::given(method("GET"))
        .and(path(format!("{API}/registered-models/alias")))
        .and(query_param("name", "lin"))
        .and(query_param("alias", "prod"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model_version": { "name": "lin", "version": "4", "source": source, "aliases": ["prod"] }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/model-versions/get-download-uri")))
        .and(query_param("version", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "artifact_uri": source })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/mlflow-artifacts/artifacts"))
        .and(query_param("path", "0/r1/artifacts/model"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                { "path": "MLmodel", "is_dir": false, "file_size": mlmodel.len() },
                { "path": "model.json", "is_dir": false, "file_size": data.len() }
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/mlflow-artifacts/artifacts/0/r1/artifacts/model/MLmodel"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(mlmodel))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/mlflow-artifacts/artifacts/0/r1/artifacts/model/model.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data))
        .mount(server)
        .await;
}

#[tokio::test]
async fn load_by_alias_downloads_proxied_artifacts() {
    let server = MockServer::start().await;
    mount_proxied_model(&server).await;

    let uri = server.uri();
    let predictions = tokio::task::spawn_blocking(move || {
        let client = client_for(&uri);
        let loaded = load_model_by_alias(&client, "lin", "prod", Flavor::Sklearn)?;
        loaded.predict(&[vec![1.0], vec![2.0]])
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(predictions, vec![2.0, 5.0]);
}

#[tokio::test]
async fn downloaded_artifacts_are_removed_on_drop() {
    let server = MockServer::start().await;
    mount_proxied_model(&server).await;

    let uri = server.uri();
    tokio::task::spawn_blocking(move || {
        let client = client_for(&uri);
        let artifacts = client.download_artifacts("models:/lin@prod").unwrap();
        assert!(artifacts.is_temporary());
        assert!(artifacts.path().join("MLmodel").is_file());
        assert!(artifacts.path().join("model.json").is_file());

        let dir = artifacts.path().to_path_buf();
        drop(artifacts);
        assert!(!dir.exists(), "{} left behind", dir.display());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn failed_end_run_keeps_run_active() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/runs/create")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run": {
                "info": {
                    "run_id": "r1",
                    "experiment_id": "0",
                    "status": "RUNNING",
                    "start_time": 1700000000000i64,
                    "artifact_uri": "mlflow-artifacts:/0/r1/artifacts",
                    "lifecycle_stage": "active"
                },
                "data": {}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/runs/update")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error_code": "INTERNAL_ERROR",
            "message": "database is locked",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let (ended, active) = tokio::task::spawn_blocking(move || {
        let mut client = client_for(&uri);
        let run = client.start_run(RunOptions::default()).unwrap();
        let ended = client.end_run(run, RunStatus::Finished);
        let active = client.active_run().map(|info| info.run_id.clone());
        (ended.is_err(), active)
    })
    .await
    .unwrap();
    assert!(ended);
    assert_eq!(active.as_deref(), Some("r1"));
}

#[tokio::test]
async fn unknown_alias_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/registered-models/alias")))
        .respond_with(not_found("alias missing"))
        .mount(&server)
        .await;

    let uri = server.uri();
    let result = tokio::task::spawn_blocking(move || {
        let client = client_for(&uri);
        load_model_by_alias(&client, "lin", "missing", Flavor::PythonModel)
    })
    .await
    .unwrap();
    assert!(matches!(result, Err(e) if e.is_not_found()));
}

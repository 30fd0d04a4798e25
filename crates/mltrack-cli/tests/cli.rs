//! End-to-end tests of the `mltrack` binary against a file store.

use std::path::Path;

use assert_cmd::Command;
use mltrack_core::flavors::save_model;
use mltrack_core::{LinearModel, NativeModel};
use predicates::prelude::*;
use tempfile::TempDir;

fn mltrack(store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mltrack").unwrap();
    cmd.env_remove("MLFLOW_TRACKING_URI")
        .env_remove("MLFLOW_EXPERIMENT_NAME")
        .env("RUST_LOG", "warn")
        .arg("--tracking-uri")
        .arg(store);
    cmd
}

#[test]
fn gpu_report_is_separated_by_dashes() {
    Command::cargo_bin("mltrack")
        .unwrap()
        .arg("gpu")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("---\n"))
        .stdout(predicate::str::contains("nvidia-smi"));
}

#[test]
fn ping_closed_port_fails() {
    Command::cargo_bin("mltrack")
        .unwrap()
        .args(["ping", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not reachable"));
}

#[test]
fn ping_uses_configured_timeout() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("tracking.yaml");
    std::fs::write(&config, "probe_timeout: 0.25\n").unwrap();

    Command::cargo_bin("mltrack")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["ping", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not reachable within 250ms"));
}

#[test]
fn log_metrics_flattens_nested_document() {
    let tmp = TempDir::new().unwrap();
    let doc = tmp.path().join("metrics.json");
    std::fs::write(
        &doc,
        r#"{"train": {"loss": 0.123, "accuracy": 0.95, "details": {"epochs": 10, "optimizer": "adam"}},
            "eval": {"precision": 0.88}}"#,
    )
    .unwrap();

    mltrack(&tmp.path().join("mlruns"))
        .args(["--experiment", "cli-test", "log-metrics"])
        .arg(&doc)
        .assert()
        .success()
        .stdout(predicate::str::contains("train/details/epochs"))
        .stdout(predicate::str::contains("eval/precision"))
        .stdout(predicate::str::contains("Experiment: cli-test"))
        .stdout(predicate::str::contains("param"));
}

#[test]
fn register_resolve_and_predict() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().join("mlruns");
    let model_dir = tmp.path().join("model");
    let model = NativeModel::from(LinearModel::regressor(vec![2.0, 1.0], 1.0));
    save_model(&model, &model_dir, Some("model"), None).unwrap();
    let model_uri = model_dir.to_str().unwrap();

    for expected in ["version 1", "version 2"] {
        mltrack(&store)
            .args(["register", model_uri, "linear", "champion"])
            .assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }

    mltrack(&store)
        .args(["resolve", "linear", "champion"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2"));

    let input = tmp.path().join("rows.json");
    std::fs::write(&input, "[[1.0, 1.0], [0.0, 2.0]]").unwrap();
    mltrack(&store)
        .args(["predict", "linear", "champion", "--flavor", "sklearn", "--input"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("[4.0,3.0]"));
}

#[test]
fn predict_rejects_unknown_flavor() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("rows.json");
    std::fs::write(&input, "[[1.0]]").unwrap();

    mltrack(&tmp.path().join("mlruns"))
        .args(["predict", "m", "a", "--flavor", "tensorflow", "--input"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("tensorflow"));
}

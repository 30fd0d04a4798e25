//! Log a toy training run, register the model under an alias and load it back.
//!
//! Runs against `./mlruns` unless `MLFLOW_TRACKING_URI` points elsewhere.

use std::collections::BTreeMap;

use mltrack::{
    is_server_running, load_model_by_alias, log_model, register_model_with_alias,
    save_training_metrics, start_nested_run, Flavor, LinearModel, MetricValue, NativeModel,
    Predict, RunStatus, TrackingClient, TrackingConfig,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let config = TrackingConfig::from_env().with_experiment("demo-training");
    if config.tracking_uri.starts_with("http") && !is_server_running(&config.tracking_uri) {
        return Err(format!("no tracking server at {}", config.tracking_uri).into());
    }
    let mut client = TrackingClient::new(config)?;

    // One nested run per "fold", under an implicit parent.
    let mut parent = None;
    for fold in 0..3 {
        let nested = start_nested_run(
            &mut client,
            parent.as_ref().map(|p: &mltrack::ActiveRun| p.run_id()),
            Some(format!("fold-{fold}").as_str()),
        )?;
        if nested.implicit_parent.is_some() {
            parent = nested.implicit_parent;
        }

        let loss = 1.0 / (fold as f64 + 1.0);
        let metrics = BTreeMap::from([
            (
                "train".to_string(),
                MetricValue::Nested(BTreeMap::from([
                    ("loss".to_string(), MetricValue::from(loss)),
                    ("optimizer".to_string(), MetricValue::from("sgd")),
                ])),
            ),
            ("fold".to_string(), MetricValue::from(fold)),
        ]);
        save_training_metrics(&client, &nested.run, &metrics)?;
        client.end_run(nested.run, RunStatus::Finished)?;
    }

    let Some(parent) = parent else {
        return Err("no parent run was started".into());
    };
    let model = NativeModel::from(LinearModel::regressor(vec![0.5, -0.25], 2.0));
    let info = log_model(&client, &parent, "model", &model)?;
    let version = register_model_with_alias(&client, &info.model_uri, "demo-linear", "champion")?;
    client.end_run(parent, RunStatus::Finished)?;
    println!("registered demo-linear version {version} as @champion");

    let loaded = load_model_by_alias(&client, "demo-linear", "champion", Flavor::PythonModel)?;
    println!("prediction: {:?}", loaded.predict(&[vec![4.0, 4.0]])?);
    Ok(())
}

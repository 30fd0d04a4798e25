//! mltrack CLI: GPU probe, tracking-server check and model registry helpers.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::layer, prelude::*, registry};

use mltrack_core::liveness::{is_server_running_within, DEFAULT_SERVER_URI};
use mltrack_core::metrics::{flatten, FlatEntry};
use mltrack_core::registry::resolve_alias;
use mltrack_core::{
    load_model_by_alias, register_model_with_alias, save_training_metrics, Flavor, MetricsTree,
    Predict, RunOptions, TrackingClient, TrackingConfig,
};
use mltrack_gpu::{default_backends, run_probes, ProbeMode};

#[derive(Parser)]
#[command(
    name = "mltrack",
    about = "mltrack: MLflow tracking helpers and GPU probe",
    version,
    author
)]
struct Cli {
    /// Tracking URI (overrides MLFLOW_TRACKING_URI)
    #[arg(long, global = true)]
    tracking_uri: Option<String>,
    /// Experiment to log to (overrides MLFLOW_EXPERIMENT_NAME)
    #[arg(long, short, global = true)]
    experiment: Option<String>,
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// YAML tracking config (tracking_uri, experiment_name, request_timeout, probe_timeout)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report GPU availability through every known backend
    Gpu {
        /// Fail on the first backend that is not installed (backends compiled out are skipped)
        #[arg(long)]
        strict: bool,
    },
    /// Check whether a tracking server answers
    Ping {
        /// Server URI (default: --tracking-uri, then http://localhost:5000)
        uri: Option<String>,
    },
    /// Log a nested metrics document (YAML or JSON) to a new run
    LogMetrics {
        file: PathBuf,
        /// Name of the run to create
        #[arg(long)]
        run_name: Option<String>,
    },
    /// Register a model version and point an alias at it
    Register {
        model_uri: String,
        name: String,
        alias: String,
    },
    /// Show the version an alias points to
    Resolve { name: String, alias: String },
    /// Load a model by alias and predict on rows from a JSON file
    Predict {
        name: String,
        alias: String,
        /// Loader: python_model, sklearn or pytorch
        #[arg(long, short, default_value = "python_model")]
        flavor: String,
        /// JSON array of feature rows, e.g. [[1.0, 2.0]]
        #[arg(long, short)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    match &cli.command {
        Commands::Gpu { strict } => cmd_gpu(*strict)?,
        Commands::Ping { uri } => cmd_ping(&cli, uri.as_deref())?,
        Commands::LogMetrics { file, run_name } => {
            cmd_log_metrics(&cli, file, run_name.as_deref())?
        }
        Commands::Register {
            model_uri,
            name,
            alias,
        } => cmd_register(&cli, model_uri, name, alias)?,
        Commands::Resolve { name, alias } => cmd_resolve(&cli, name, alias)?,
        Commands::Predict {
            name,
            alias,
            flavor,
            input,
        } => cmd_predict(&cli, name, alias, flavor, input)?,
    }

    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .with_filter(filter());

    let Some(path) = log_file else {
        registry().with(stderr).init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("--log-file needs a file name: {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let file = layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter());

    registry().with(stderr).with(file).init();
    Ok(Some(guard))
}

/// Config file, then environment, then command-line flags.
fn config(cli: &Cli) -> Result<TrackingConfig> {
    let base = match &cli.config {
        Some(path) => TrackingConfig::from_yaml_file(path)
            .with_context(|| format!("cannot read config {}", path.display()))?,
        None => TrackingConfig::default(),
    };
    let mut config = base.with_env_overrides();
    if let Some(uri) = &cli.tracking_uri {
        config.tracking_uri = uri.clone();
    }
    if let Some(name) = &cli.experiment {
        config.experiment_name = Some(name.clone());
    }
    Ok(config)
}

fn client(cli: &Cli) -> Result<TrackingClient> {
    let config = config(cli)?;
    let uri = config.tracking_uri.clone();
    TrackingClient::new(config).with_context(|| format!("cannot open tracking store at {}", uri))
}

// ─── Command implementations ──────────────────────────────────────────────────

fn cmd_gpu(strict: bool) -> Result<()> {
    let mode = if strict {
        ProbeMode::Strict
    } else {
        ProbeMode::Tolerant
    };
    let backends = default_backends();
    run_probes(&backends, mode, &mut io::stdout().lock())?;
    Ok(())
}

fn cmd_ping(cli: &Cli, uri: Option<&str>) -> Result<()> {
    let uri = uri
        .or(cli.tracking_uri.as_deref())
        .unwrap_or(DEFAULT_SERVER_URI);
    let timeout = config(cli)?.probe_timeout;
    if !is_server_running_within(uri, timeout) {
        anyhow::bail!("Tracking server at {} is not reachable within {:?}", uri, timeout);
    }
    println!("Tracking server at {} is running", uri);
    Ok(())
}

fn cmd_log_metrics(cli: &Cli, file: &Path, run_name: Option<&str>) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    // YAML is a superset of JSON, so one parser covers both.
    let tree: MetricsTree = serde_yaml::from_str(&content)
        .with_context(|| format!("{} is not a metrics document", file.display()))?;

    let mut client = client(cli)?;
    let options = RunOptions {
        run_name: run_name.map(str::to_string),
        ..Default::default()
    };
    let run_id = client.with_run(options, |client, run| {
        save_training_metrics(client, run, &tree)?;
        Ok(run.run_id().to_string())
    })?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Key", "Value", "Logged as"]);
    for entry in flatten(&tree) {
        match entry {
            FlatEntry::Metric { key, value } => {
                table.add_row([key, value.to_string(), "metric".to_string()])
            }
            FlatEntry::Param { key, value } => {
                table.add_row([key, value, "param".to_string()])
            }
        };
    }

    println!("Run: {}", run_id);
    println!("Experiment: {}", client.experiment_name());
    println!("{}", table);
    Ok(())
}

fn cmd_register(cli: &Cli, model_uri: &str, name: &str, alias: &str) -> Result<()> {
    let client = client(cli)?;
    let version = register_model_with_alias(&client, model_uri, name, alias)?;
    println!("Registered {} version {} as @{}", name, version, alias);
    Ok(())
}

fn cmd_resolve(cli: &Cli, name: &str, alias: &str) -> Result<()> {
    let client = client(cli)?;
    let version = resolve_alias(&client, name, alias)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Model", "Alias", "Version", "Source", "Run"]);
    table.add_row([
        version.name.clone(),
        alias.to_string(),
        version.version.to_string(),
        version.source.clone(),
        version.run_id.clone().unwrap_or_else(|| "-".to_string()),
    ]);
    println!("{}", table);
    Ok(())
}

fn cmd_predict(cli: &Cli, name: &str, alias: &str, flavor: &str, input: &Path) -> Result<()> {
    // Reject unknown flavors before touching the store.
    let flavor: Flavor = flavor.parse()?;
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("cannot read {}", input.display()))?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of rows", input.display()))?;

    let client = client(cli)?;
    let model = load_model_by_alias(&client, name, alias, flavor)?;
    let predictions = model.predict(&rows)?;
    info!(rows = rows.len(), "prediction done");
    println!("{}", serde_json::to_string(&predictions)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn config_file_sets_ping_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.yaml");
        std::fs::write(&path, "probe_timeout: 0.25\nrequest_timeout: 2\n").unwrap();

        let cli = Cli::parse_from([
            "mltrack",
            "--config",
            path.to_str().unwrap(),
            "--experiment",
            "exp1",
            "ping",
        ]);
        let config = config(&cli).unwrap();
        assert_eq!(config.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.experiment_name.as_deref(), Some("exp1"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["mltrack", "--config", "/nonexistent/tracking.yaml", "ping"]);
        let err = config(&cli).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}

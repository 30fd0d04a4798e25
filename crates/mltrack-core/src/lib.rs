//! mltrack-core: client-side helpers for an MLflow-compatible tracking service.
//!
//! Everything is synchronous. A [`TrackingClient`] owns the store connection,
//! the active experiment and the stack of active runs; the helpers in
//! [`metrics`], [`registry`], [`flavors`] and [`liveness`] operate on it.

pub mod artifacts;
pub mod client;
pub mod config;
pub mod error;
pub mod flavors;
pub mod liveness;
pub mod metrics;
pub mod models;
pub mod native;
pub mod registry;
pub mod store;

pub use client::{
    setup_tracking, start_nested_run, ActiveRun, LocalArtifacts, NestedRun, RunOptions, TrackingClient,
};
pub use config::TrackingConfig;
pub use error::{Result, TrackingError};
pub use flavors::{load_model_by_alias, log_model, Flavor, LoadedModel, NativeModel};
pub use liveness::is_server_running;
pub use metrics::save_training_metrics;
pub use models::{MetricValue, MetricsTree, RunStatus};
pub use native::{LinearModel, Predict, SequentialModel};
pub use registry::register_model_with_alias;
pub use store::TrackingStore;

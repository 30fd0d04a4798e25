//! Model registry helpers: register under an alias, resolve an alias.

use tracing::{info, warn};

use crate::client::TrackingClient;
use crate::error::Result;
use crate::models::ModelVersion;

/// Register `model_uri` as a new version of `model_name` and point `alias` at it.
///
/// The registered model is created when the registry does not know it yet;
/// any other lookup failure is returned. Every call creates a new version.
pub fn register_model_with_alias(
    client: &TrackingClient,
    model_uri: &str,
    model_name: &str,
    alias: &str,
) -> Result<u64> {
    let store = client.store();

    match store.get_registered_model(model_name) {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            warn!(model = %model_name, "registered model not found, creating it");
            store.create_registered_model(model_name)?;
        }
        Err(e) => return Err(e),
    }

    let run_id = source_run_id(model_uri);
    let version = store.create_model_version(model_name, model_uri, run_id)?;
    store.set_registered_model_alias(model_name, alias, version.version)?;

    info!(
        model = %model_name,
        version = version.version,
        alias = %alias,
        "registered model version"
    );
    Ok(version.version)
}

/// Current version behind `alias`. Never cached.
pub fn resolve_alias(client: &TrackingClient, model_name: &str, alias: &str) -> Result<ModelVersion> {
    client.store().get_model_version_by_alias(model_name, alias)
}

/// Run id embedded in a `runs:/<run_id>/...` URI.
fn source_run_id(model_uri: &str) -> Option<&str> {
    let rest = model_uri.strip_prefix("runs:/")?.trim_start_matches('/');
    let run_id = rest.split('/').next()?;
    (!run_id.is_empty()).then_some(run_id)
}

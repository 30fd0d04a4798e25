//! Tracking-server liveness probe.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

pub use crate::config::DEFAULT_SERVER_URI;

/// Timeout of [`is_server_running`].
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET <tracking_uri>/` and report whether the server answered 200.
///
/// Never fails: unreachable hosts, closed ports, timeouts and malformed URIs all yield `false`.
pub fn is_server_running(tracking_uri: &str) -> bool {
    is_server_running_within(tracking_uri, PROBE_TIMEOUT)
}

pub fn is_server_running_within(tracking_uri: &str, timeout: Duration) -> bool {
    let url = format!("{}/", tracking_uri.trim_end_matches('/'));
    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            debug!("cannot build probe client: {}", e);
            return false;
        }
    };
    match client.get(&url).send() {
        Ok(response) => response.status() == StatusCode::OK,
        Err(e) => {
            debug!(url = %url, "liveness probe failed: {}", e);
            false
        }
    }
}

//! CUDA availability as reported by the `nvidia-smi` tool.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::{BackendReport, GpuBackend, ProbeError};

const NAME: &str = "nvidia-smi";

#[derive(Debug, Clone)]
pub struct NvidiaSmiBackend {
    program: PathBuf,
}

impl Default for NvidiaSmiBackend {
    fn default() -> Self {
        Self::with_program("nvidia-smi")
    }
}

impl NvidiaSmiBackend {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl GpuBackend for NvidiaSmiBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn probe(&self) -> Result<BackendReport, ProbeError> {
        let output = Command::new(&self.program)
            .args(["--query-gpu=name,driver_version", "--format=csv,noheader"])
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProbeError::NotInstalled {
                    backend: NAME.to_string(),
                    reason: format!("{} not found", self.program.display()),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let reason = if stderr.trim().is_empty() { stdout } else { stderr };
            debug!(status = ?output.status, "nvidia-smi failed");
            return Ok(BackendReport {
                detail: Some(format!("CUDA is not available: {}", reason.trim())),
                ..Default::default()
            });
        }

        Ok(parse_query_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `name, driver_version` CSV lines.
fn parse_query_output(stdout: &str) -> BackendReport {
    let mut devices = vec![];
    let mut driver = None;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (name, version) = match line.rsplit_once(',') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (line, None),
        };
        devices.push(name.to_string());
        if driver.is_none() {
            driver = version.map(|v| format!("driver {v}"));
        }
    }
    let available = !devices.is_empty();
    BackendReport {
        available,
        device_count: devices.len(),
        version: driver,
        devices,
        detail: Some(
            if available {
                "CUDA is available!"
            } else {
                "CUDA is not available: no devices listed"
            }
            .to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_line_per_gpu() {
        let report = parse_query_output(
            "NVIDIA GeForce RTX 4090, 550.54.14\nNVIDIA A100-SXM4-80GB, 550.54.14\n",
        );
        assert!(report.available);
        assert_eq!(report.device_count, 2);
        assert_eq!(report.version.as_deref(), Some("driver 550.54.14"));
        assert_eq!(report.devices[1], "NVIDIA A100-SXM4-80GB");
    }

    #[test]
    fn empty_output_means_unavailable() {
        let report = parse_query_output("\n");
        assert!(!report.available);
        assert_eq!(report.device_count, 0);
    }

    #[test]
    fn missing_binary_is_not_installed() {
        let backend = NvidiaSmiBackend::with_program("/nonexistent/nvidia-smi-probe");
        assert!(matches!(backend.probe(), Err(ProbeError::NotInstalled { .. })));
    }
}

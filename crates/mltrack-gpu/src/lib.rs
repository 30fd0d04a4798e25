//! mltrack-gpu: probe a machine for GPU acceleration and print a plain-text report.
//!
//! Each [`GpuBackend`] answers independently. [`ProbeMode::Strict`] aborts on
//! the first backend that cannot be probed; [`ProbeMode::Tolerant`] reports
//! it and moves on to the next.

pub mod backends;

use std::io::{self, Write};

use thiserror::Error;
use tracing::debug;

pub use backends::{default_backends, NvidiaSmiBackend, NvmlBackend, WgpuBackend};

#[derive(Error, Debug)]
pub enum ProbeError {
    /// The library or tool behind the backend is absent.
    #[error("{backend} is not installed: {reason}")]
    NotInstalled { backend: String, reason: String },

    #[error("{backend} probe failed: {message}")]
    Query { backend: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What a backend found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendReport {
    pub available: bool,
    pub device_count: usize,
    /// Runtime or driver version, when the backend exposes one
    pub version: Option<String>,
    pub devices: Vec<String>,
    /// Free-form closing line, e.g. why acceleration is unavailable
    pub detail: Option<String>,
}

pub trait GpuBackend {
    fn name(&self) -> &'static str;
    fn probe(&self) -> Result<BackendReport, ProbeError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeMode {
    /// Every backend must be installed and answer.
    Strict,
    /// Report failures per backend and keep going.
    #[default]
    Tolerant,
}

const SEPARATOR: &str = "---";

/// Probe `backends` in order and write the report to `out`.
pub fn run_probes<W: Write>(
    backends: &[Box<dyn GpuBackend>],
    mode: ProbeMode,
    out: &mut W,
) -> Result<(), ProbeError> {
    for backend in backends {
        writeln!(out, "{SEPARATOR}")?;
        writeln!(out, "{}", backend.name())?;
        debug!(backend = backend.name(), "probing");

        match backend.probe() {
            Ok(report) => write_report(&report, out)?,
            Err(e @ ProbeError::Io(_)) => return Err(e),
            Err(e) if mode == ProbeMode::Strict => return Err(e),
            Err(ProbeError::NotInstalled { backend, .. }) => {
                writeln!(out, "{backend} is not installed")?;
            }
            Err(e) => writeln!(out, "{e}")?,
        }
    }
    writeln!(out, "{SEPARATOR}")?;
    Ok(())
}

fn write_report<W: Write>(report: &BackendReport, out: &mut W) -> io::Result<()> {
    writeln!(out, "gpu available: {}", report.available)?;
    writeln!(out, "amount of devices: {}", report.device_count)?;
    if report.available {
        if let Some(version) = &report.version {
            writeln!(out, "version: {version}")?;
        }
        for device in &report.devices {
            writeln!(out, "device name: {device}")?;
        }
    }
    if let Some(detail) = &report.detail {
        writeln!(out, "{detail}")?;
    }
    Ok(())
}

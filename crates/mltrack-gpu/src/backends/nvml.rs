//! Driver-level CUDA view through the NVIDIA management library.

use crate::{BackendReport, GpuBackend, ProbeError};

const NAME: &str = "nvml";

/// Probes CUDA devices through NVML, loaded at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct NvmlBackend;

impl GpuBackend for NvmlBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    #[cfg(feature = "nvml")]
    fn probe(&self) -> Result<BackendReport, ProbeError> {
        use nvml_wrapper::error::NvmlError;
        use nvml_wrapper::Nvml;

        let nvml = match Nvml::init() {
            Ok(nvml) => nvml,
            Err(e @ (NvmlError::LibloadingError(_) | NvmlError::LibraryNotFound)) => {
                return Err(ProbeError::NotInstalled {
                    backend: NAME.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e @ (NvmlError::DriverNotLoaded | NvmlError::NoPermission)) => {
                return Ok(BackendReport {
                    detail: Some(format!("CUDA is not available: {e}")),
                    ..Default::default()
                });
            }
            Err(e) => return Err(query_error(e)),
        };

        let count = nvml.device_count().map_err(query_error)?;
        let version = nvml.sys_cuda_driver_version().ok().map(|v| {
            // Encoded as 1000 * major + 10 * minor.
            format!("{}.{}", v / 1000, (v % 1000) / 10)
        });
        let mut devices = Vec::with_capacity(count as usize);
        for i in 0..count {
            let device = nvml.device_by_index(i).map_err(query_error)?;
            devices.push(device.name().map_err(query_error)?);
        }

        Ok(BackendReport {
            available: count > 0,
            device_count: count as usize,
            version,
            devices,
            detail: None,
        })
    }

    #[cfg(not(feature = "nvml"))]
    fn probe(&self) -> Result<BackendReport, ProbeError> {
        Err(ProbeError::NotInstalled {
            backend: NAME.to_string(),
            reason: "built without the `nvml` feature".to_string(),
        })
    }
}

#[cfg(feature = "nvml")]
fn query_error(e: nvml_wrapper::error::NvmlError) -> ProbeError {
    ProbeError::Query {
        backend: NAME.to_string(),
        message: e.to_string(),
    }
}

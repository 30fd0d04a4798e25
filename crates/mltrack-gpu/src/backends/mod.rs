//! The three probes: NVML, wgpu adapters and `nvidia-smi`.

mod adapters;
mod nvml;
mod smi;

pub use adapters::WgpuBackend;
pub use nvml::NvmlBackend;
pub use smi::NvidiaSmiBackend;

use crate::GpuBackend;

/// NVML, wgpu and `nvidia-smi`, in report order.
///
/// Backends whose cargo feature is off are left out, so strict mode only
/// fails on backends that could actually have answered.
pub fn default_backends() -> Vec<Box<dyn GpuBackend>> {
    let mut backends: Vec<Box<dyn GpuBackend>> = Vec::new();
    #[cfg(feature = "nvml")]
    backends.push(Box::new(NvmlBackend));
    #[cfg(feature = "wgpu")]
    backends.push(Box::new(WgpuBackend));
    backends.push(Box::new(NvidiaSmiBackend::default()));
    backends
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backends_follow_enabled_features() {
        let names: Vec<_> = default_backends().iter().map(|b| b.name()).collect();
        assert_eq!(names.contains(&"nvml"), cfg!(feature = "nvml"));
        assert_eq!(names.contains(&"wgpu"), cfg!(feature = "wgpu"));
        assert_eq!(names.last(), Some(&"nvidia-smi"));
    }
}

//! Physical GPU adapters visible to wgpu (Vulkan, Metal, DX12, GL).

use crate::{BackendReport, GpuBackend, ProbeError};

const NAME: &str = "wgpu";

/// Lists hardware adapters; software rasterizers are not counted.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgpuBackend;

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    #[cfg(feature = "wgpu")]
    fn probe(&self) -> Result<BackendReport, ProbeError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let devices: Vec<String> = instance
            .enumerate_adapters(wgpu::Backends::all())
            .iter()
            .map(|adapter| adapter.get_info())
            .filter(|info| info.device_type != wgpu::DeviceType::Cpu)
            .map(|info| format!("{} ({:?}, {:?})", info.name, info.backend, info.device_type))
            .collect();

        Ok(BackendReport {
            available: !devices.is_empty(),
            device_count: devices.len(),
            version: None,
            detail: Some(format!("Num GPUs Available: {}", devices.len())),
            devices,
        })
    }

    #[cfg(not(feature = "wgpu"))]
    fn probe(&self) -> Result<BackendReport, ProbeError> {
        Err(ProbeError::NotInstalled {
            backend: NAME.to_string(),
            reason: "built without the `wgpu` feature".to_string(),
        })
    }
}

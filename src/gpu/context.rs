//! Headless adapter and device setup.

use crate::error::{SplatError, SplatResult};

/// Device request options.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub power_preference: wgpu::PowerPreference,
    /// Require `TIMESTAMP_QUERY` for the GPU pass timer.
    pub timestamps: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            timestamps: false,
        }
    }
}

/// An adapter's device and queue, plus what was negotiated for them.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub timestamps: bool,
}

impl GpuContext {
    pub async fn new(config: &ContextConfig) -> SplatResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None, // Headless
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SplatError::device("No adapter found"))?;

        let adapter_info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", adapter_info.name, adapter_info.backend);

        let mut required_features = wgpu::Features::empty();
        if config.timestamps {
            if !adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
                return Err(SplatError::device(format!(
                    "adapter {} does not support timestamp queries",
                    adapter_info.name
                )));
            }
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("splat device"),
                    required_features,
                    // Large scenes need the adapter's full storage binding size.
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| SplatError::device(format!("request_device failed: {}", e)))?;

        Ok(Self {
            device,
            queue,
            adapter_info,
            timestamps: config.timestamps,
        })
    }
}

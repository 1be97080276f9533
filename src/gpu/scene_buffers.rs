//! Device buffers owned by one loaded scene.

use wgpu::util::DeviceExt;

use crate::error::{SplatError, SplatResult};
use crate::gpu::layout::{PackedScene, RecordLayout, PROCESSED_GAUSSIAN};

/// Raw records, the processed scratch buffer and, for compressed scenes, the
/// SH codebook. Created once per load and never resized.
pub struct SceneBuffers {
    pub raw: wgpu::Buffer,
    pub processed: wgpu::Buffer,
    pub sh: Option<wgpu::Buffer>,
    pub count: u32,
    pub layout: &'static RecordLayout,
}

impl SceneBuffers {
    pub async fn create(device: &wgpu::Device, packed: &PackedScene) -> SplatResult<Self> {
        let count = u32::try_from(packed.count)
            .map_err(|_| SplatError::device(format!("{} splats exceed u32 indexing", packed.count)))?;

        let max_binding = device.limits().max_storage_buffer_binding_size as u64;
        let processed_size = PROCESSED_GAUSSIAN.buffer_size(packed.count);
        let sizes = [
            ("raw gaussians", packed.raw.len() as u64),
            ("processed gaussians", processed_size),
            ("sh coefficients", packed.sh.as_ref().map_or(0, |sh| sh.len() as u64)),
        ];
        for (label, size) in sizes {
            if size > max_binding {
                return Err(SplatError::device(format!(
                    "{} buffer of {} bytes exceeds max storage binding of {} bytes",
                    label, size, max_binding
                )));
            }
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let raw = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("raw gaussians"),
            contents: &packed.raw,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });
        let processed = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("processed gaussians"),
            size: processed_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let sh = packed.sh.as_ref().map(|bytes| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("sh coefficients"),
                contents: bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            })
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(SplatError::device(format!("scene allocation failed: {}", err)));
        }

        Ok(Self {
            raw,
            processed,
            sh,
            count,
            layout: packed.layout,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.sh.is_some()
    }

    /// Preprocess workgroups covering every splat.
    pub fn preprocess_workgroups(&self) -> u32 {
        preprocess_workgroups(self.count)
    }
}

pub const PREPROCESS_WORKGROUP_SIZE: u32 = 256;

pub fn preprocess_workgroups(count: u32) -> u32 {
    count.div_ceil(PREPROCESS_WORKGROUP_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_workgroups() {
        assert_eq!(preprocess_workgroups(0), 0);
        assert_eq!(preprocess_workgroups(1), 1);
        assert_eq!(preprocess_workgroups(256), 1);
        assert_eq!(preprocess_workgroups(257), 2);
    }
}

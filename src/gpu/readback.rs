//! Blocking buffer readback for diagnostics, probing and tests.
//!
//! Never called from the per-frame path.

use futures::channel::oneshot;

use crate::error::{SplatError, SplatResult};

/// Copy `count` u32s from the start of `source` (which needs `COPY_SRC`) and
/// wait for them.
pub async fn read_buffer_u32s(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    count: usize,
) -> SplatResult<Vec<u32>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let size = (count * std::mem::size_of::<u32>()) as wgpu::BufferAddress;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback encoder"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    device.poll(wgpu::Maintain::Wait);

    rx.await
        .map_err(|_| SplatError::device("readback callback dropped"))?
        .map_err(|e| SplatError::device(format!("readback map failed: {}", e)))?;

    let values = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, u32>(&data).to_vec()
    };
    staging.unmap();
    Ok(values)
}

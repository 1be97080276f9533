//! Bind group layouts and pipelines for preprocessing and drawing.

use std::borrow::Cow;

/// Entry point of both preprocess programs.
pub const PREPROCESS_ENTRY: &str = "preprocess";

fn buffer_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    ty: wgpu::BufferBindingType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

const UNIFORM: wgpu::BufferBindingType = wgpu::BufferBindingType::Uniform;
const READ_ONLY: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: true };
const READ_WRITE: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: false };

// ============================================================================
// Bind group layouts
// ============================================================================

/// Group 0 of preprocessing: uniforms, raw splats, processed splats, and the
/// SH codebook when `compressed`.
pub fn create_preprocess_bind_group_layout(device: &wgpu::Device, compressed: bool) -> wgpu::BindGroupLayout {
    let compute = wgpu::ShaderStages::COMPUTE;
    let mut entries = vec![
        buffer_entry(0, compute, UNIFORM),
        buffer_entry(1, compute, READ_ONLY),
        buffer_entry(2, compute, READ_WRITE),
    ];
    if compressed {
        entries.push(buffer_entry(3, compute, READ_ONLY));
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("preprocess bind group layout"),
        entries: &entries,
    })
}

/// Group 1 of preprocessing: sort keys, values, dispatch and state, all written.
pub fn create_sort_input_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let compute = wgpu::ShaderStages::COMPUTE;
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("sort input bind group layout"),
        entries: &[
            buffer_entry(0, compute, READ_WRITE),
            buffer_entry(1, compute, READ_WRITE),
            buffer_entry(2, compute, READ_WRITE),
            buffer_entry(3, compute, READ_WRITE),
        ],
    })
}

/// Uniforms, processed splats and sorted indices, read by the draw.
pub fn create_render_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let vertex = wgpu::ShaderStages::VERTEX;
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("render bind group layout"),
        entries: &[
            buffer_entry(0, vertex, UNIFORM),
            buffer_entry(1, vertex, READ_ONLY),
            buffer_entry(2, vertex, READ_ONLY),
        ],
    })
}

// ============================================================================
// Pipelines
// ============================================================================

/// WGSL for one preprocess variant, with the sort tile size injected.
pub fn preprocess_source(compressed: bool, sort_tile_size: u32) -> String {
    let variant = if compressed {
        include_str!("preprocess_compressed.wgsl")
    } else {
        include_str!("preprocess.wgsl")
    };
    format!(
        "const SORT_TILE_SIZE: u32 = {}u;\n{}\n{}",
        sort_tile_size,
        include_str!("preprocess_common.wgsl"),
        variant
    )
}

pub fn create_preprocess_pipeline(
    device: &wgpu::Device,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    compressed: bool,
    sort_tile_size: u32,
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(if compressed { "preprocess compressed" } else { "preprocess" }),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(preprocess_source(compressed, sort_tile_size))),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("preprocess pipeline layout"),
        bind_group_layouts,
        push_constant_ranges: &[],
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("Preprocess Pipeline"),
        layout: Some(&layout),
        module: &shader,
        entry_point: Some(PREPROCESS_ENTRY),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

/// Front-to-back "under" compositing: the destination alpha accumulated by
/// nearer splats attenuates every later one.
pub const UNDER_BLENDING: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::OneMinusDstAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::OneMinusDstAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

pub fn create_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::include_wgsl!("render.wgsl"));

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Splat Render Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            // Everything comes from storage buffers.
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(UNDER_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_source_injects_tile_size() {
        let src = preprocess_source(false, 1024);
        assert!(src.starts_with("const SORT_TILE_SIZE: u32 = 1024u;"));
        assert!(src.contains("fn project("));
        assert!(src.contains("array<RawGaussian>"));
        assert!(!src.contains("sh_coefficients"));

        let src = preprocess_source(true, 256);
        assert!(src.contains("array<CompressedGaussian>"));
        assert!(src.contains("@group(0) @binding(3)"));
    }
}

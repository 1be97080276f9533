//! GPU radix sort of (depth key, splat index) pairs.
//!
//! The element count lives on the GPU in [`SortState`] and the per-pass
//! workgroup count in an indirect dispatch buffer, both written by whoever
//! produces the keys. The host never needs to know how many keys are sorted.

use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::{SplatError, SplatResult};
use crate::gpu::readback::read_buffer_u32s;
use crate::gpu::timer::GpuTimer;

pub const RADIX_BITS: u32 = 8;
pub const RADIX: u32 = 1 << RADIX_BITS;
pub const KEY_BITS: u32 = 32;
pub const PASS_COUNT: u32 = KEY_BITS / RADIX_BITS;
pub const ELEMENTS_PER_THREAD: u32 = 4;

/// Workgroup sizes tried by [`guess_workgroup_size`], largest first.
pub const WORKGROUP_SIZE_CANDIDATES: [u32; 5] = [256, 128, 64, 32, 16];

/// Timer subscriptions spanning the four histogram and scatter passes.
pub const HISTOGRAM_TIMER: &str = "sort_histogram";
pub const SCATTER_TIMER: &str = "sort_scatter";

/// GPU-side sort bookkeeping. `num_keys` is incremented atomically by the
/// key producer and read by every sort sub-pass.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortState {
    pub num_keys: u32,
    _padding: [u32; 3],
}

impl SortState {
    pub fn new(num_keys: u32) -> Self {
        Self { num_keys, _padding: [0; 3] }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct PassInfo {
    shift: u32,
    _padding: [u32; 3],
}

/// Dispatches encoded by one sort, for frame statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub direct: u32,
    pub indirect: u32,
}

/// Workgroups needed to cover `count` keys with tiles of `tile_size`.
pub fn dispatch_size(count: u32, tile_size: u32) -> u32 {
    count.div_ceil(tile_size)
}

/// Shared memory used by the sort programs at a given workgroup size.
pub fn workgroup_storage_bytes(workgroup_size: u32) -> u32 {
    // shared count + digit counts + digit bases + chunk digits + scan partials
    4 + RADIX * 4 * 2 + workgroup_size * 4 * 2
}

pub fn fits_limits(workgroup_size: u32, limits: &wgpu::Limits) -> bool {
    workgroup_size <= limits.max_compute_invocations_per_workgroup
        && workgroup_size <= limits.max_compute_workgroup_size_x
        && workgroup_storage_bytes(workgroup_size) <= limits.max_compute_workgroup_storage_size
}

/// Indirect dispatch buffer preset to `[0, 1, 1]`.
pub fn create_dispatch_buffer(device: &wgpu::Device) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("sort dispatch"),
        contents: wgpu::util::DispatchIndirectArgs { x: 0, y: 1, z: 1 }.as_bytes(),
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::INDIRECT
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
    })
}

// ============================================================================
// Sort buffers
// ============================================================================

/// Keys, values and state for up to `capacity` elements, with the ping-pong
/// partners and per-pass bind groups. Sorted output is in [`Self::keys`] and
/// [`Self::values`].
pub struct SortBuffers {
    keys: [wgpu::Buffer; 2],
    values: [wgpu::Buffer; 2],
    state: wgpu::Buffer,
    _tile_offsets: wgpu::Buffer,
    pass_bind_groups: Vec<wgpu::BindGroup>,
    capacity: u32,
}

impl SortBuffers {
    pub fn keys(&self) -> &wgpu::Buffer {
        &self.keys[0]
    }

    pub fn values(&self) -> &wgpu::Buffer {
        &self.values[0]
    }

    pub fn state(&self) -> &wgpu::Buffer {
        &self.state
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

// ============================================================================
// Sorter
// ============================================================================

pub struct GpuSorter {
    workgroup_size: u32,
    bind_group_layout: wgpu::BindGroupLayout,
    count_pipeline: wgpu::ComputePipeline,
    scan_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
    pass_info: wgpu::Buffer,
    pass_info_stride: u64,
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuSorter {
    pub fn new(device: &wgpu::Device, workgroup_size: u32) -> Self {
        let source = format!(
            "const WORKGROUP_SIZE: u32 = {}u;\nconst ELEMENTS_PER_THREAD: u32 = {}u;\n{}",
            workgroup_size,
            ELEMENTS_PER_THREAD,
            include_str!("radix_sort.wgsl")
        );
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("radix sort"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix sort bind group layout"),
            entries: &[
                storage_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<PassInfo>() as u64),
                    },
                    count: None,
                },
                storage_entry(2),
                storage_entry(3),
                storage_entry(4),
                storage_entry(5),
                storage_entry(6),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("radix sort pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let count_pipeline = make_pipeline("count_digits");
        let scan_pipeline = make_pipeline("scan_offsets");
        let scatter_pipeline = make_pipeline("scatter_keys");

        // One uniform slot per pass, each at the device's offset alignment.
        let pass_info_stride = device.limits().min_uniform_buffer_offset_alignment as u64;
        let mut contents = vec![0u8; (pass_info_stride * PASS_COUNT as u64) as usize];
        for pass in 0..PASS_COUNT {
            let info = PassInfo { shift: pass * RADIX_BITS, _padding: [0; 3] };
            let at = (pass as u64 * pass_info_stride) as usize;
            contents[at..at + std::mem::size_of::<PassInfo>()].copy_from_slice(bytemuck::bytes_of(&info));
        }
        let pass_info = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("radix sort pass info"),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        Self {
            workgroup_size,
            bind_group_layout,
            count_pipeline,
            scan_pipeline,
            scatter_pipeline,
            pass_info,
            pass_info_stride,
        }
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// Keys handled by one workgroup of the histogram and scatter passes.
    pub fn tile_size(&self) -> u32 {
        self.workgroup_size * ELEMENTS_PER_THREAD
    }

    pub fn dispatch_size(&self, count: u32) -> u32 {
        dispatch_size(count, self.tile_size())
    }

    /// Allocate sort buffers for up to `n` elements. Zero is allowed.
    pub fn create_sort_buffers(&self, device: &wgpu::Device, n: u32) -> SortBuffers {
        let elements = n.max(1) as u64;
        let array = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: elements * 4,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let keys = [array("sort keys a"), array("sort keys b")];
        let values = [array("sort values a"), array("sort values b")];

        let state = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort state"),
            contents: bytemuck::bytes_of(&SortState::default()),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        let max_tiles = self.dispatch_size(n).max(1) as u64;
        let tile_offsets = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sort tile offsets"),
            size: max_tiles * RADIX as u64 * 4,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let pass_bind_groups = (0..PASS_COUNT as usize)
            .map(|pass| {
                let (src, dst) = (pass % 2, (pass + 1) % 2);
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("radix sort pass bind group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: state.as_entire_binding() },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: &self.pass_info,
                                offset: pass as u64 * self.pass_info_stride,
                                size: wgpu::BufferSize::new(std::mem::size_of::<PassInfo>() as u64),
                            }),
                        },
                        wgpu::BindGroupEntry { binding: 2, resource: keys[src].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: values[src].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 4, resource: keys[dst].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 5, resource: values[dst].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 6, resource: tile_offsets.as_entire_binding() },
                    ],
                })
            })
            .collect();

        SortBuffers {
            keys,
            values,
            state,
            _tile_offsets: tile_offsets,
            pass_bind_groups,
            capacity: n,
        }
    }

    /// Encode a full sort whose element count is read from `buffers.state()`
    /// and whose tile dispatch comes from `dispatch` (x = tile count).
    pub fn sort_indirect(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &SortBuffers,
        dispatch: &wgpu::Buffer,
        timer: Option<&GpuTimer>,
    ) -> DispatchCounts {
        let mut counts = DispatchCounts::default();
        let last = PASS_COUNT as usize - 1;

        for (pass, bind_group) in buffers.pass_bind_groups.iter().enumerate() {
            let (first, final_pass) = (pass == 0, pass == last);
            {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("radix histogram"),
                    timestamp_writes: timer.and_then(|t| t.compute_pass_writes(HISTOGRAM_TIMER, first, final_pass)),
                });
                cpass.set_bind_group(0, bind_group, &[]);
                cpass.set_pipeline(&self.count_pipeline);
                cpass.dispatch_workgroups_indirect(dispatch, 0);
                cpass.set_pipeline(&self.scan_pipeline);
                cpass.dispatch_workgroups(1, 1, 1);
            }
            {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("radix scatter"),
                    timestamp_writes: timer.and_then(|t| t.compute_pass_writes(SCATTER_TIMER, first, final_pass)),
                });
                cpass.set_bind_group(0, bind_group, &[]);
                cpass.set_pipeline(&self.scatter_pipeline);
                cpass.dispatch_workgroups_indirect(dispatch, 0);
            }
            counts.indirect += 2;
            counts.direct += 1;
        }
        counts
    }

    /// Sort the first `count` elements with a host-provided count.
    ///
    /// Writes the state and dispatch buffers through `queue`, so the encoder
    /// must be submitted after this call.
    pub fn sort(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        buffers: &SortBuffers,
        dispatch: &wgpu::Buffer,
        count: u32,
    ) -> DispatchCounts {
        let count = if count > buffers.capacity {
            log::warn!("Sort of {} keys clamped to capacity {}", count, buffers.capacity);
            buffers.capacity
        } else {
            count
        };
        queue.write_buffer(&buffers.state, 0, bytemuck::bytes_of(&SortState::new(count)));
        queue.write_buffer(
            dispatch,
            0,
            wgpu::util::DispatchIndirectArgs { x: self.dispatch_size(count), y: 1, z: 1 }.as_bytes(),
        );
        self.sort_indirect(encoder, buffers, dispatch, None)
    }

    /// Sort a pseudo-random key set spanning several tiles and check the
    /// result is a stable ascending permutation.
    pub async fn self_test(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> SplatResult<bool> {
        let count = self.tile_size() * 3 + 17;
        let keys = probe_keys(count as usize);
        let identity: Vec<u32> = (0..count).collect();

        let buffers = self.create_sort_buffers(device, count);
        let dispatch = create_dispatch_buffer(device);
        queue.write_buffer(&buffers.keys[0], 0, bytemuck::cast_slice(&keys));
        queue.write_buffer(&buffers.values[0], 0, bytemuck::cast_slice(&identity));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sort self test"),
        });
        self.sort(&mut encoder, queue, &buffers, &dispatch, count);
        queue.submit(Some(encoder.finish()));

        let values = read_buffer_u32s(device, queue, buffers.values(), count as usize).await?;
        Ok(is_stable_sort(&keys, &values))
    }
}

// ============================================================================
// Workgroup size probing
// ============================================================================

/// Deterministic keys with plenty of duplicates in every digit position.
pub fn probe_keys(count: usize) -> Vec<u32> {
    let mut x: u32 = 0x9e37_79b9;
    (0..count)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x & 0xf00f_0f00) | (x % 7)
        })
        .collect()
}

/// `permutation` lists every index of `keys` exactly once, in ascending key
/// order, with equal keys kept in index order.
pub fn is_stable_sort(keys: &[u32], permutation: &[u32]) -> bool {
    if keys.len() != permutation.len() {
        return false;
    }
    let mut seen = vec![false; keys.len()];
    for &i in permutation {
        match seen.get_mut(i as usize) {
            Some(s) if !*s => *s = true,
            _ => return false,
        }
    }
    permutation.windows(2).all(|w| {
        let (a, b) = (keys[w[0] as usize], keys[w[1] as usize]);
        a < b || (a == b && w[0] < w[1])
    })
}

/// Pick the largest workgroup size that both fits the device limits and
/// sorts a diagnostic key set correctly.
pub async fn guess_workgroup_size(device: &wgpu::Device, queue: &wgpu::Queue) -> SplatResult<u32> {
    let limits = device.limits();
    for workgroup_size in WORKGROUP_SIZE_CANDIDATES {
        if !fits_limits(workgroup_size, &limits) {
            log::debug!("Sort workgroup size {} exceeds device limits", workgroup_size);
            continue;
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let sorter = GpuSorter::new(device, workgroup_size);
        let outcome = sorter.self_test(device, queue).await;
        if let Some(err) = device.pop_error_scope().await {
            log::warn!("Sort workgroup size {} rejected: {}", workgroup_size, err);
            continue;
        }

        match outcome {
            Ok(true) => {
                log::info!("Sort workgroup size: {}", workgroup_size);
                return Ok(workgroup_size);
            }
            Ok(false) => log::warn!("Sort workgroup size {} produced an unsorted result", workgroup_size),
            Err(e) => log::warn!("Sort workgroup size {} failed: {}", workgroup_size, e),
        }
    }
    Err(SplatError::device("no sort workgroup size produced a correct sort"))
}

//! Frame orchestration: preprocess, sort and draw for one loaded scene.
//!
//! A frame is one command buffer walked from a validated [`FramePlan`]. The
//! visible splat count never leaves the GPU: preprocessing counts it into the
//! sort state and dispatch buffers, the sort consumes those indirectly and a
//! buffer copy moves it into the draw's instance count.

use std::path::Path;

use wgpu::util::DeviceExt;

use crate::camera::{Camera, FrameUniforms};
use crate::error::{SplatError, SplatResult};
use crate::gaussian::GaussianSet;
use crate::gpu::context::GpuContext;
use crate::gpu::layout;
use crate::gpu::pass_graph::{FramePlan, PassKind};
use crate::gpu::pipeline;
use crate::gpu::readback::read_buffer_u32s;
use crate::gpu::scene_buffers::SceneBuffers;
use crate::gpu::sort::{self, GpuSorter, SortBuffers, HISTOGRAM_TIMER, SCATTER_TIMER};
use crate::gpu::target::TARGET_FORMAT;
use crate::gpu::timer::{GpuTimer, DEFAULT_CAPACITY};
use crate::loader;
use crate::settings::FrameSettings;

pub const PREPROCESS_TIMER: &str = "preprocess";
pub const RENDER_TIMER: &str = "render";

/// Vertices per splat quad, drawn as a triangle strip.
const QUAD_VERTICES: u32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub color_format: wgpu::TextureFormat,
    /// Time passes with timestamp queries. Needs a context created with timestamps.
    pub profiling: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            color_format: TARGET_FORMAT,
            profiling: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    Unloaded,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No scene is ready; nothing was encoded.
    NotReady,
    /// Camera and settings unchanged since the last rendered frame.
    Skipped,
    Rendered,
}

/// Running totals of frame work, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub frames_ignored: u64,
    pub dispatches: u64,
    pub indirect_dispatches: u64,
    pub indirect_draws: u64,
    pub submissions: u64,
}

/// Most recent GPU pass timings, lagging the GPU by a frame or more.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimings {
    pub preprocess_ms: f64,
    pub sort_ms: f64,
    pub render_ms: f64,
}

/// Summary of the loaded scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneInfo {
    pub splat_count: u32,
    pub compressed: bool,
}

struct LoadedScene {
    buffers: SceneBuffers,
    sort_buffers: SortBuffers,
    preprocess_pipeline: wgpu::ComputePipeline,
    preprocess_bind_group: wgpu::BindGroup,
    sort_input_bind_group: wgpu::BindGroup,
    render_bind_group: wgpu::BindGroup,
    plan: FramePlan,
}

pub struct Renderer {
    context: GpuContext,
    sorter: GpuSorter,
    camera: Camera,
    display_size: (u32, u32),

    uniform_buffer: wgpu::Buffer,
    sort_dispatch: wgpu::Buffer,
    render_indirect: wgpu::Buffer,

    sort_input_layout: wgpu::BindGroupLayout,
    render_layout: wgpu::BindGroupLayout,
    render_pipeline: wgpu::RenderPipeline,

    state: SceneState,
    scene: Option<LoadedScene>,
    previous_scene: Option<LoadedScene>,
    last_settings: Option<FrameSettings>,

    timer: Option<GpuTimer>,
    stats: FrameStats,
    timings: FrameTimings,
}

impl Renderer {
    /// Probe the sort workgroup size, then build the renderer.
    pub async fn new(context: GpuContext, config: RendererConfig) -> SplatResult<Self> {
        let workgroup_size = sort::guess_workgroup_size(&context.device, &context.queue).await?;
        Self::with_workgroup_size(context, config, workgroup_size)
    }

    pub fn with_workgroup_size(
        context: GpuContext,
        config: RendererConfig,
        workgroup_size: u32,
    ) -> SplatResult<Self> {
        let device = &context.device;

        // === Frame buffers ===

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sort_dispatch = sort::create_dispatch_buffer(device);
        let render_indirect = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("render indirect"),
            contents: wgpu::util::DrawIndirectArgs {
                vertex_count: QUAD_VERTICES,
                instance_count: 0,
                first_vertex: 0,
                first_instance: 0,
            }
            .as_bytes(),
            usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        });

        // === Pipelines shared by every scene ===

        let sort_input_layout = pipeline::create_sort_input_bind_group_layout(device);
        let render_layout = pipeline::create_render_bind_group_layout(device);
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("render pipeline layout"),
            bind_group_layouts: &[&render_layout],
            push_constant_ranges: &[],
        });
        let render_pipeline = pipeline::create_render_pipeline(device, &render_pipeline_layout, config.color_format);

        let timer = if config.profiling {
            let mut timer = GpuTimer::new(device, &context.queue, DEFAULT_CAPACITY)?;
            for name in [PREPROCESS_TIMER, HISTOGRAM_TIMER, SCATTER_TIMER, RENDER_TIMER] {
                timer.subscribe(name)?;
            }
            Some(timer)
        } else {
            None
        };

        let sorter = GpuSorter::new(device, workgroup_size);

        Ok(Self {
            sorter,
            camera: Camera::new(config.width, config.height),
            display_size: (config.width, config.height),
            uniform_buffer,
            sort_dispatch,
            render_indirect,
            sort_input_layout,
            render_layout,
            render_pipeline,
            state: SceneState::Unloaded,
            scene: None,
            previous_scene: None,
            last_settings: None,
            timer,
            stats: FrameStats::default(),
            timings: FrameTimings::default(),
            context,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn timings(&self) -> FrameTimings {
        self.timings
    }

    pub fn sort_workgroup_size(&self) -> u32 {
        self.sorter.workgroup_size()
    }

    pub fn scene_info(&self) -> Option<SceneInfo> {
        self.scene.as_ref().map(|scene| SceneInfo {
            splat_count: scene.buffers.count,
            compressed: scene.buffers.is_compressed(),
        })
    }

    /// Takes effect at the start of the next frame.
    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display_size = (width, height);
    }

    // ========================================================================
    // Scene loading
    // ========================================================================

    /// Enter `Loading`. The current scene is kept aside until the load finishes.
    pub fn begin_load(&mut self) {
        if self.state != SceneState::Loading {
            self.previous_scene = self.scene.take();
        }
        self.state = SceneState::Loading;
    }

    /// Finish a load started with [`Self::begin_load`]. On failure the previous
    /// scene, if any, becomes current again.
    pub async fn finish_load(&mut self, decoded: SplatResult<GaussianSet>) -> SplatResult<()> {
        if self.state != SceneState::Loading {
            self.begin_load();
        }
        let built = match decoded {
            Ok(set) => self.build_scene(&set).await,
            Err(e) => Err(e),
        };

        match built {
            Ok(scene) => {
                log::info!(
                    "Scene ready: {} splats{}",
                    scene.buffers.count,
                    if scene.buffers.is_compressed() { " (compressed)" } else { "" }
                );
                self.scene = Some(scene);
                self.previous_scene = None;
                self.state = SceneState::Ready;
                self.camera.invalidate();
                Ok(())
            }
            Err(e) => {
                self.scene = self.previous_scene.take();
                self.state = if self.scene.is_some() {
                    SceneState::Ready
                } else {
                    SceneState::Unloaded
                };
                Err(e)
            }
        }
    }

    pub async fn load_scene_file(&mut self, path: &Path) -> SplatResult<()> {
        self.begin_load();
        let decoded = loader::decode_file_async(path).await;
        self.finish_load(decoded).await
    }

    async fn build_scene(&self, set: &GaussianSet) -> SplatResult<LoadedScene> {
        let device = &self.context.device;
        let packed = layout::pack(set)?;
        let buffers = SceneBuffers::create(device, &packed).await?;
        let compressed = buffers.is_compressed();
        let sort_buffers = self.sorter.create_sort_buffers(device, buffers.count);

        let plan = FramePlan::standard(compressed);
        plan.validate()?;

        let preprocess_layout = pipeline::create_preprocess_bind_group_layout(device, compressed);
        let preprocess_pipeline = pipeline::create_preprocess_pipeline(
            device,
            &[&preprocess_layout, &self.sort_input_layout],
            compressed,
            self.sorter.tile_size(),
        );

        let mut entries = vec![
            wgpu::BindGroupEntry { binding: 0, resource: self.uniform_buffer.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: buffers.raw.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 2, resource: buffers.processed.as_entire_binding() },
        ];
        if let Some(sh) = &buffers.sh {
            entries.push(wgpu::BindGroupEntry { binding: 3, resource: sh.as_entire_binding() });
        }
        let preprocess_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preprocess bind group"),
            layout: &preprocess_layout,
            entries: &entries,
        });

        let sort_input_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sort input bind group"),
            layout: &self.sort_input_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: sort_buffers.keys().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sort_buffers.values().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: self.sort_dispatch.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: sort_buffers.state().as_entire_binding() },
            ],
        });

        let render_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("render bind group"),
            layout: &self.render_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.uniform_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: buffers.processed.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: sort_buffers.values().as_entire_binding() },
            ],
        });

        Ok(LoadedScene {
            buffers,
            sort_buffers,
            preprocess_pipeline,
            preprocess_bind_group,
            sort_input_bind_group,
            render_bind_group,
            plan,
        })
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Run one frame into `target`. Never blocks on the GPU.
    pub fn frame(&mut self, target: &wgpu::TextureView, settings: FrameSettings) -> FrameOutcome {
        if self.state != SceneState::Ready || self.scene.is_none() {
            self.stats.frames_ignored += 1;
            return FrameOutcome::NotReady;
        }

        // 1. Resize
        let (width, height) = self.display_size;
        if self.camera.viewport() != (width.max(1), height.max(1)) {
            self.camera.set_viewport(width, height);
        }

        // 2. Camera, with skip on no change
        let camera_changed = self.camera.update();
        let settings_changed = self.last_settings != Some(settings);
        if !camera_changed && !settings_changed {
            self.stats.frames_skipped += 1;
            log::debug!("Frame skipped, view unchanged");
            return FrameOutcome::Skipped;
        }
        self.last_settings = Some(settings);

        // 3. Uniform snapshot
        let uniforms = self.camera.uniforms(settings);
        self.context
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        // 4-7. Passes
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame encoder") });
        let work = match &self.scene {
            Some(scene) => self.encode_frame(&mut encoder, scene, target),
            None => FrameStats::default(),
        };

        // 8. Resolve timestamps and submit
        if let Some(timer) = self.timer.as_mut() {
            timer.encode_resolve(&mut encoder);
        }
        self.context.queue.submit(Some(encoder.finish()));

        self.stats.dispatches += work.dispatches;
        self.stats.indirect_dispatches += work.indirect_dispatches;
        self.stats.indirect_draws += work.indirect_draws;
        self.stats.submissions += 1;
        self.stats.frames_rendered += 1;

        self.update_timings();
        FrameOutcome::Rendered
    }

    fn encode_frame(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &LoadedScene,
        target: &wgpu::TextureView,
    ) -> FrameStats {
        let mut work = FrameStats::default();
        let timer = self.timer.as_ref();

        for kind in scene.plan.kinds() {
            match kind {
                PassKind::ResetSortState => {
                    // num_keys and the dispatch x count
                    encoder.clear_buffer(scene.sort_buffers.state(), 0, Some(4));
                    encoder.clear_buffer(&self.sort_dispatch, 0, Some(4));
                }
                PassKind::Preprocess => {
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("preprocess"),
                        timestamp_writes: timer.and_then(|t| t.compute_pass_writes(PREPROCESS_TIMER, true, true)),
                    });
                    cpass.set_pipeline(&scene.preprocess_pipeline);
                    cpass.set_bind_group(0, &scene.preprocess_bind_group, &[]);
                    cpass.set_bind_group(1, &scene.sort_input_bind_group, &[]);
                    cpass.dispatch_workgroups(scene.buffers.preprocess_workgroups(), 1, 1);
                    work.dispatches += 1;
                }
                PassKind::Sort => {
                    let counts = self
                        .sorter
                        .sort_indirect(encoder, &scene.sort_buffers, &self.sort_dispatch, timer);
                    work.dispatches += counts.direct as u64;
                    work.indirect_dispatches += counts.indirect as u64;
                }
                PassKind::CopyVisibleCount => {
                    // state.num_keys -> instance_count
                    encoder.copy_buffer_to_buffer(scene.sort_buffers.state(), 0, &self.render_indirect, 4, 4);
                }
                PassKind::Draw => {
                    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("splat render pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: target,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: timer.and_then(|t| t.render_pass_writes(RENDER_TIMER)),
                        occlusion_query_set: None,
                    });
                    rpass.set_pipeline(&self.render_pipeline);
                    rpass.set_bind_group(0, &scene.render_bind_group, &[]);
                    rpass.draw_indirect(&self.render_indirect, 0);
                    work.indirect_draws += 1;
                }
            }
        }
        work
    }

    fn update_timings(&mut self) {
        let Some(timer) = self.timer.as_mut() else {
            return;
        };
        timer.resolve_results();
        self.context.device.poll(wgpu::Maintain::Poll);

        if let Ok(ms) = timer.result_by_name(PREPROCESS_TIMER) {
            self.timings.preprocess_ms = ms;
        }
        if let Ok(ms) = timer.result_between(SCATTER_TIMER, HISTOGRAM_TIMER) {
            self.timings.sort_ms = ms;
        }
        if let Ok(ms) = timer.result_by_name(RENDER_TIMER) {
            self.timings.render_ms = ms;
        }
        log::debug!(
            "GPU timings: preprocess {:.3}ms, sort {:.3}ms, render {:.3}ms",
            self.timings.preprocess_ms,
            self.timings.sort_ms,
            self.timings.render_ms
        );
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Instance count of the last draw. Waits for the GPU.
    pub async fn read_visible_count(&self) -> SplatResult<u32> {
        let args = read_buffer_u32s(&self.context.device, &self.context.queue, &self.render_indirect, 4).await?;
        args.get(1)
            .copied()
            .ok_or_else(|| SplatError::device("render indirect readback too short"))
    }

    /// Sorted (depth key, splat index) pairs of the last frame. Waits for the GPU.
    pub async fn read_sorted_splats(&self) -> SplatResult<Vec<(u32, u32)>> {
        let Some(scene) = &self.scene else {
            return Ok(Vec::new());
        };
        let device = &self.context.device;
        let queue = &self.context.queue;
        let visible = self.read_visible_count().await? as usize;
        let keys = read_buffer_u32s(device, queue, scene.sort_buffers.keys(), visible).await?;
        let values = read_buffer_u32s(device, queue, scene.sort_buffers.values(), visible).await?;
        Ok(keys.into_iter().zip(values).collect())
    }
}

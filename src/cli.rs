use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::gpu::context::{ContextConfig, GpuContext};
use crate::gpu::renderer::{FrameOutcome, Renderer, RendererConfig};
use crate::gpu::sort;
use crate::gpu::target::{OffscreenTarget, TARGET_FORMAT};
use crate::loader::{self, SceneFormat};
use crate::render_job::{image_file_name, RenderJobSpec};
use crate::viewpoints::{load_viewpoints, ViewPoint};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a scene to PNG images, one per viewpoint
    Render {
        /// JSON job file. Replaces every other render flag.
        #[arg(long, conflicts_with_all = ["scene", "viewpoints", "out"])]
        job: Option<PathBuf>,

        /// Scene file (.ply or .npz)
        #[arg(long, required_unless_present = "job")]
        scene: Option<PathBuf>,

        /// Viewpoints JSON file
        #[arg(long)]
        viewpoints: Option<PathBuf>,

        /// Output directory for images
        #[arg(long, required_unless_present = "job")]
        out: Option<PathBuf>,

        /// Output width
        #[arg(long, default_value_t = 1280)]
        width: u32,

        /// Output height
        #[arg(long, default_value_t = 720)]
        height: u32,

        /// Splat extent multiplier in (0, 1]
        #[arg(long, default_value_t = 1.0)]
        scaling_modifier: f32,

        /// Time GPU passes and log them per image
        #[arg(long)]
        profile: bool,
    },
    /// Decode a scene and print what it contains
    Inspect {
        /// Scene file (.ply or .npz)
        #[arg(long)]
        scene: PathBuf,
    },
    /// Report the adapter and the sort workgroup size it supports
    Probe,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { job, scene, viewpoints, out, width, height, scaling_modifier, profile } => {
            let spec = match job {
                Some(path) => RenderJobSpec::from_file(&path).map_err(anyhow::Error::msg)?,
                None => {
                    // clap enforces both when no job file is given
                    let (Some(scene), Some(out)) = (scene, out) else {
                        anyhow::bail!("--scene and --out are required without --job");
                    };
                    let mut spec = RenderJobSpec::new(scene, out);
                    spec.viewpoints_path = viewpoints;
                    spec.width = width;
                    spec.height = height;
                    spec.scaling_modifier = scaling_modifier;
                    spec.profile = profile;
                    spec
                }
            };
            spec.validate().map_err(anyhow::Error::msg)?;
            pollster::block_on(render_offline(&spec))?;
        }
        Commands::Inspect { scene } => inspect(&scene)?,
        Commands::Probe => pollster::block_on(probe())?,
    }
    Ok(())
}

async fn render_offline(spec: &RenderJobSpec) -> Result<()> {
    let view_points: Vec<ViewPoint> = match &spec.viewpoints_path {
        Some(path) => load_viewpoints(path)?,
        None => Vec::new(),
    };

    std::fs::create_dir_all(&spec.output_dir)?;

    let context = GpuContext::new(&ContextConfig {
        timestamps: spec.profile,
        ..Default::default()
    })
    .await?;
    let config = RendererConfig {
        width: spec.width,
        height: spec.height,
        color_format: TARGET_FORMAT,
        profiling: spec.profile,
    };
    let mut renderer = Renderer::new(context, config).await?;
    renderer.load_scene_file(&spec.scene_path).await?;

    let target = OffscreenTarget::new(renderer.device(), spec.width, spec.height);
    let settings = spec.frame_settings();

    // No viewpoints: one image from the default camera.
    let shots: Vec<Option<&ViewPoint>> = if view_points.is_empty() {
        vec![None]
    } else {
        view_points.iter().map(Some).collect()
    };

    println!("Rendering {} images to {:?}...", shots.len(), spec.output_dir);

    for (i, view_point) in shots.into_iter().enumerate() {
        if let Some(view_point) = view_point {
            renderer.camera_mut().set_view_point(view_point);
        }
        // Every image is written, even when two viewpoints coincide.
        renderer.camera_mut().invalidate();
        match renderer.frame(target.view(), settings) {
            FrameOutcome::Rendered => {}
            outcome => anyhow::bail!("frame {} was not rendered: {:?}", i, outcome),
        }

        let data = target.read_rgba(renderer.device(), renderer.queue()).await?;
        let image_path = spec.output_dir.join(image_file_name(view_point.map(|v| v.name.as_str()), i));
        image::save_buffer(&image_path, &data, target.width(), target.height(), image::ColorType::Rgba8)?;

        if spec.profile {
            let t = renderer.timings();
            log::info!(
                "{:?}: preprocess {:.3}ms, sort {:.3}ms, render {:.3}ms",
                image_path.file_name().unwrap_or_default(),
                t.preprocess_ms,
                t.sort_ms,
                t.render_ms
            );
        }

        if i % 10 == 0 {
            print!(".");
            use std::io::Write;
            std::io::stdout().flush()?;
        }
    }
    println!("\nDone.");

    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let format = SceneFormat::from_path(path)?;
    let set = loader::decode_file(path)?;

    println!("Scene:       {}", path.display());
    println!("Format:      {}", format.name());
    println!("Splats:      {}", set.len());
    match &set.codebook {
        Some(codebook) => println!("SH clusters: {}", codebook.len()),
        None => println!("SH clusters: none (uncompressed)"),
    }
    Ok(())
}

async fn probe() -> Result<()> {
    let context = GpuContext::new(&ContextConfig::default()).await?;
    println!("Adapter:     {} ({:?})", context.adapter_info.name, context.adapter_info.backend);
    let workgroup_size = sort::guess_workgroup_size(&context.device, &context.queue).await?;
    println!("Sort workgroup size: {}", workgroup_size);
    Ok(())
}

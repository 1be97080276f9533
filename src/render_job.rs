//! Render job specification.
//!
//! A job file describes one headless render: which scene to load, which
//! viewpoints to render it from and where the images go.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::loader::SceneFormat;
use crate::settings::FrameSettings;

/// Default output width.
fn default_width() -> u32 {
    1280
}

/// Default output height.
fn default_height() -> u32 {
    720
}

fn default_scaling_modifier() -> f32 {
    1.0
}

/// Specification for a single render job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJobSpec {
    /// Path to a `.ply` or `.npz` scene.
    pub scene_path: PathBuf,

    /// Optional `cameras.json` style viewpoint file. Without one, a single
    /// image is rendered from the default camera.
    #[serde(default)]
    pub viewpoints_path: Option<PathBuf>,

    /// Output directory for images.
    pub output_dir: PathBuf,

    /// Output width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,

    /// Splat extent multiplier in (0, 1].
    #[serde(default = "default_scaling_modifier")]
    pub scaling_modifier: f32,

    /// Time GPU passes and log the results per image.
    #[serde(default)]
    pub profile: bool,
}

impl RenderJobSpec {
    /// Create a new render job spec with required fields only.
    pub fn new(scene_path: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            scene_path,
            viewpoints_path: None,
            output_dir,
            width: default_width(),
            height: default_height(),
            scaling_modifier: default_scaling_modifier(),
            profile: false,
        }
    }

    /// Load a job spec from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read job file {:?}: {}", path, e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse job file {:?}: {}", path, e))
    }

    /// Validate the job specification.
    pub fn validate(&self) -> Result<(), String> {
        SceneFormat::from_path(&self.scene_path).map_err(|e| e.to_string())?;
        if !self.scene_path.exists() {
            return Err(format!("Scene file not found: {:?}", self.scene_path));
        }
        if let Some(path) = &self.viewpoints_path {
            if !path.exists() {
                return Err(format!("Viewpoints file not found: {:?}", path));
            }
        }
        if self.width == 0 || self.height == 0 {
            return Err("Width and height must be positive".to_string());
        }
        if !(self.scaling_modifier > 0.0 && self.scaling_modifier <= 1.0) {
            return Err(format!("Scaling modifier {} must be in (0, 1]", self.scaling_modifier));
        }
        Ok(())
    }

    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings::with_scaling_modifier(self.scaling_modifier)
    }
}

/// File name for a rendered viewpoint. Anything outside `[A-Za-z0-9._-]`
/// becomes `_`; an empty or dot-only name falls back to the index form.
pub fn image_file_name(name: Option<&str>, index: usize) -> String {
    let sanitized: String = name
        .unwrap_or("")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if sanitized.trim_matches('.').is_empty() {
        format!("view_{:05}.png", index)
    } else {
        format!("{}.png", sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_job_spec_defaults() {
        let json = r#"{"scenePath": "scene.ply", "outputDir": "out"}"#;
        let spec: RenderJobSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.scene_path, PathBuf::from("scene.ply"));
        assert_eq!(spec.viewpoints_path, None);
        assert_eq!(spec.width, 1280);
        assert_eq!(spec.height, 720);
        assert_eq!(spec.scaling_modifier, 1.0);
        assert!(!spec.profile);
    }

    #[test]
    fn test_render_job_spec_camel_case() {
        let json = r#"{"scenePath": "a.npz", "viewpointsPath": "cameras.json", "outputDir": "out",
                       "width": 64, "height": 32, "scalingModifier": 0.5, "profile": true}"#;
        let spec: RenderJobSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.viewpoints_path, Some(PathBuf::from("cameras.json")));
        assert_eq!(spec.frame_settings().scaling_modifier, 0.5);
        assert!(spec.profile);
    }

    #[test]
    fn test_render_job_spec_validation() {
        let missing = RenderJobSpec::new(PathBuf::from("/nonexistent/scene.ply"), PathBuf::from("/output"));
        assert!(missing.validate().is_err());

        let unknown = RenderJobSpec::new(PathBuf::from("scene.obj"), PathBuf::from("/output"));
        assert!(unknown.validate().unwrap_err().contains("unsupported"));

        let dir = std::env::temp_dir().join("splat_viewer_job_validation");
        std::fs::create_dir_all(&dir).unwrap();
        let scene = dir.join("scene.ply");
        std::fs::write(&scene, b"ply\n").unwrap();

        let mut spec = RenderJobSpec::new(scene, dir.join("out"));
        assert!(spec.validate().is_ok());

        spec.scaling_modifier = 0.0;
        assert!(spec.validate().is_err());
        spec.scaling_modifier = 1.5;
        assert!(spec.validate().is_err());
        spec.scaling_modifier = 1.0;
        spec.width = 0;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_image_file_name() {
        assert_eq!(image_file_name(Some("00012"), 3), "00012.png");
        assert_eq!(image_file_name(Some("a/b c"), 0), "a_b_c.png");
        assert_eq!(image_file_name(Some(".."), 7), "view_00007.png");
        assert_eq!(image_file_name(None, 2), "view_00002.png");
    }
}

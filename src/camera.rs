//! Perspective camera and the per-frame uniform snapshot.
//!
//! Matrices follow the splat training convention: view space looks down +z,
//! so the view matrix is the right-handed look-at with rows 0-2 negated and
//! the view-projection has rows 0-1 negated.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::settings::FrameSettings;
use crate::viewpoints::ViewPoint;

/// Vertical field of view in radians.
pub const FOV_Y: f32 = 0.820176;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 100.0;

const VIEW_FLIP: Vec4 = Vec4::new(-1.0, -1.0, -1.0, 1.0);
const CLIP_FLIP: Vec4 = Vec4::new(-1.0, -1.0, 1.0, 1.0);

// ============================================================================
// Camera
// ============================================================================

#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub front: Vec3,
    pub up: Vec3,
    width: u32,
    height: u32,
    projection: Mat4,
    view: Mat4,
    last_view_projection: Option<Mat4>,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Self {
            position: Vec3::ZERO,
            front: Vec3::Z,
            up: Vec3::Y,
            width: 1,
            height: 1,
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            last_view_projection: None,
        };
        camera.set_viewport(width, height);
        camera.view = camera.look_at();
        camera
    }

    /// Recompute the projection for a new display size. Zero sizes clamp to 1.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.projection = Mat4::perspective_rh(FOV_Y, self.aspect(), Z_NEAR, Z_FAR);
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    fn look_at(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up)
    }

    /// Recompute the view. Returns false when the view-projection is exactly
    /// the one seen by the previous call.
    pub fn update(&mut self) -> bool {
        self.view = self.look_at();
        let view_projection = self.projection * self.view;
        if self.last_view_projection == Some(view_projection) {
            return false;
        }
        self.last_view_projection = Some(view_projection);
        true
    }

    /// Forget the previous view-projection so the next [`Self::update`] reports a change.
    pub fn invalidate(&mut self) {
        self.last_view_projection = None;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_diagonal(VIEW_FLIP) * self.view
    }

    pub fn view_projection(&self) -> Mat4 {
        Mat4::from_diagonal(CLIP_FLIP) * self.projection * self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Half-angle tangents, horizontal first.
    pub fn tan_fov(&self) -> Vec2 {
        let tan_y = (FOV_Y * 0.5).tan();
        Vec2::new(tan_y * self.aspect(), tan_y)
    }

    /// Focal lengths in pixels.
    pub fn focal(&self) -> Vec2 {
        let tan = self.tan_fov();
        Vec2::new(
            self.width as f32 / (2.0 * tan.x),
            self.height as f32 / (2.0 * tan.y),
        )
    }

    /// Jump to a stored camera. Front and up come from the third and second
    /// columns of the camera-to-world rotation.
    pub fn set_view_point(&mut self, view_point: &ViewPoint) {
        let r = &view_point.rotation;
        self.position = Vec3::from(view_point.position);
        self.front = Vec3::new(r[0][2], r[1][2], r[2][2]).try_normalize().unwrap_or(Vec3::Z);
        self.up = Vec3::new(r[0][1], r[1][1], r[2][1]).try_normalize().unwrap_or(Vec3::Y);
    }

    pub fn uniforms(&self, settings: FrameSettings) -> FrameUniforms {
        FrameUniforms {
            viewport: [self.width as f32, self.height as f32],
            focal: self.focal().to_array(),
            tan_fov: self.tan_fov().to_array(),
            scaling_modifier: settings.scaling_modifier,
            _pad0: 0.0,
            camera_position: self.position.to_array(),
            _pad1: 0.0,
            view: self.view_matrix().to_cols_array_2d(),
            view_projection: self.view_projection().to_cols_array_2d(),
        }
    }
}

// ============================================================================
// Frame Uniforms
// ============================================================================

/// One frame's camera snapshot, laid out like `Uniforms` in the WGSL programs.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub viewport: [f32; 2],
    pub focal: [f32; 2],
    pub tan_fov: [f32; 2],
    pub scaling_modifier: f32,
    pub _pad0: f32,
    pub camera_position: [f32; 3],
    pub _pad1: f32,
    /// Column-major.
    pub view: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 176);
        assert_eq!(std::mem::offset_of!(FrameUniforms, camera_position), 32);
        assert_eq!(std::mem::offset_of!(FrameUniforms, view), 48);
        assert_eq!(std::mem::offset_of!(FrameUniforms, view_projection), 112);
    }

    #[test]
    fn test_unchanged_camera_skips() {
        let mut camera = Camera::new(640, 480);
        assert!(camera.update());
        assert!(!camera.update());

        camera.position.x += 0.5;
        assert!(camera.update());
        assert!(!camera.update());

        camera.invalidate();
        assert!(camera.update());
    }

    #[test]
    fn test_resize_changes_projection() {
        let mut camera = Camera::new(640, 480);
        camera.update();
        camera.set_viewport(800, 480);
        assert!(camera.update());
    }

    #[test]
    fn test_focal_and_tan_fov() {
        let camera = Camera::new(200, 100);
        let tan = camera.tan_fov();
        let tan_y = (FOV_Y * 0.5).tan();
        assert!((tan.y - tan_y).abs() < EPS);
        assert!((tan.x - 2.0 * tan_y).abs() < EPS);

        let focal = camera.focal();
        assert!((focal.y - 100.0 / (2.0 * tan_y)).abs() < 1e-3);
        // Square pixels
        assert!((focal.x - focal.y).abs() < 1e-3);
    }

    #[test]
    fn test_view_space_looks_down_positive_z() {
        let mut camera = Camera::new(100, 100);
        camera.update();
        let ahead = camera.view_matrix().transform_point3(Vec3::new(0.0, 0.0, 5.0));
        assert!((ahead.z - 5.0).abs() < EPS);

        let clip = camera.view_projection() * Vec4::new(0.0, 0.0, 5.0, 1.0);
        assert!(clip.w > 0.0);
        let ndc_z = clip.z / clip.w;
        assert!(ndc_z > 0.0 && ndc_z < 1.0);
    }

    #[test]
    fn test_set_view_point_uses_rotation_columns() {
        let mut camera = Camera::new(100, 100);
        let vp = ViewPoint {
            name: "a".into(),
            rotation: [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, -1.0, 0.0]],
            position: [1.0, 2.0, 3.0],
        };
        camera.set_view_point(&vp);
        assert_eq!(camera.position, Vec3::new(1.0, 2.0, 3.0));
        assert!((camera.front - Vec3::new(0.0, 1.0, 0.0)).length() < EPS);
        assert!((camera.up - Vec3::new(0.0, 0.0, -1.0)).length() < EPS);
    }

    #[test]
    fn test_uniforms_carry_settings() {
        let camera = Camera::new(320, 240);
        let u = camera.uniforms(FrameSettings { scaling_modifier: 0.5 });
        assert_eq!(u.viewport, [320.0, 240.0]);
        assert_eq!(u.scaling_modifier, 0.5);
    }
}

//! Per-frame camera parameters and the derived view/projection.
//!
//! World space is right-handed with +Z up. An unrotated engine camera looks
//! north along +Y; the projection convention looks down -Z with +Y up, so
//! every orientation is corrected by a quarter turn about X.

use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::device::ColourMask;

/// Everything a single `GfxPipeline::render` call needs to know about the view.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraOpts {
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub pos: Vec3,
    /// Engine orientation; identity looks along +Y with +Z up.
    pub dir: Quat,
    /// Horizontal frustum shift in tangent units (stereo).
    pub frustum_offset: f32,
    pub mask: ColourMask,
    pub bloom_and_tone_map: bool,
    pub particles: bool,
    pub point_lights: bool,
    pub sky: bool,
    pub first_person: bool,
    pub decals: bool,
    pub tracers: bool,
    pub debug_mode: u32,
}

impl Default for CameraOpts {
    fn default() -> Self {
        Self {
            fov_y: 55.0,
            near_clip: 0.355,
            far_clip: 1000.0,
            pos: Vec3::ZERO,
            dir: Quat::IDENTITY,
            frustum_offset: 0.0,
            mask: ColourMask::ALL,
            bloom_and_tone_map: true,
            particles: true,
            point_lights: true,
            sky: true,
            first_person: true,
            decals: true,
            tracers: true,
            debug_mode: 0,
        }
    }
}

/// Convert an engine orientation to the projection convention.
pub fn engine_to_api_orientation(dir: Quat) -> Quat {
    dir * Quat::from_rotation_x(FRAC_PI_2)
}

/// Right-handed perspective with [0, 1] depth whose frustum is shifted
/// horizontally by `offset` tangent units.
pub fn off_centre_perspective(fov_y: f32, aspect: f32, near: f32, far: f32, offset: f32) -> Mat4 {
    let t = (fov_y * 0.5).tan();
    let (left, right) = (near * (-t * aspect + offset), near * (t * aspect + offset));
    let (bottom, top) = (-near * t, near * t);
    let depth = far / (near - far);
    Mat4::from_cols(
        Vec4::new(2.0 * near / (right - left), 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near / (top - bottom), 0.0, 0.0),
        Vec4::new(
            (right + left) / (right - left),
            (top + bottom) / (top - bottom),
            depth,
            -1.0,
        ),
        Vec4::new(0.0, 0.0, depth * near, 0.0),
    )
}

#[derive(Clone, Debug)]
pub struct Camera {
    position: Vec3,
    orientation: Quat,
    fov_y: f32,
    near: f32,
    far: f32,
    aspect: f32,
    frustum_offset: f32,
    view: Mat4,
    proj: Mat4,
}

impl Camera {
    pub fn new(aspect: f32) -> Self {
        let mut camera = Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            fov_y: 0.0,
            near: 0.0,
            far: 0.0,
            aspect,
            frustum_offset: 0.0,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        };
        camera.apply(&CameraOpts::default(), aspect);
        camera
    }

    pub fn apply(&mut self, opts: &CameraOpts, aspect: f32) {
        self.position = opts.pos;
        self.orientation = engine_to_api_orientation(opts.dir).normalize();
        self.fov_y = opts.fov_y.to_radians();
        self.near = opts.near_clip;
        self.far = opts.far_clip;
        self.aspect = aspect;
        self.frustum_offset = opts.frustum_offset;
        self.view = Mat4::from_rotation_translation(self.orientation, self.position).inverse();
        self.proj = off_centre_perspective(
            self.fov_y,
            aspect,
            self.near,
            self.far,
            self.frustum_offset,
        );
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.orientation * Vec3::X
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    /// Vertical field of view in radians.
    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn proj(&self) -> Mat4 {
        self.proj
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }

    /// World-space vectors from the camera to the far-plane corners in the
    /// order top-left, top-right, bottom-left, bottom-right.
    pub fn frustum_corner_rays(&self) -> [Vec3; 4] {
        let inv = self.view_proj().inverse();
        [(-1.0, 1.0), (1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)]
            .map(|(x, y)| inv.project_point3(Vec3::new(x, y, 1.0)) - self.position)
    }

    /// Inward-facing planes `(n, d)` with `n.dot(p) + d >= 0` inside:
    /// left, right, bottom, top, near, far.
    pub fn frustum_planes(&self) -> [Vec4; 6] {
        let m = self.view_proj();
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2]
    }

    pub fn sphere_visible(&self, centre: Vec3, radius: f32) -> bool {
        self.frustum_planes().iter().all(|plane| {
            let n = plane.truncate();
            n.dot(centre) + plane.w >= -radius * n.length()
        })
    }
}

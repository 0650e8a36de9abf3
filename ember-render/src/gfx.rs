//! The per-frame driver: owns the device, the eye pipelines and the shared
//! scene state, and turns one engine tick into a presented frame.

use std::path::Path;
use std::time::{Duration, Instant};

use glam::{Mat3, Quat, Vec3};
use image::RgbaImage;
use log::{error, info, warn};

use crate::camera::{Camera, CameraOpts};
use crate::device::{
    ColourMask, PassDesc, RenderDevice, ShaderDesc, TargetDesc, TargetFormat, TargetId,
};
use crate::error::{GfxError, Result};
use crate::invocations::{NullSubsystems, SceneStage, SceneSubsystems, StageFrame};
use crate::options::{GfxBoolOption, GfxFloatOption, GfxIntOption, GfxOptions};
use crate::pipeline::{FrameContext, GfxPipeline};
use crate::scene::{SceneEnvironment, SceneGraph};
use crate::screen_quad::ScreenQuad;
use crate::shader_db::{ShaderDatabase, ShaderPurpose};
use crate::shadow::SunShadows;
use crate::stats::{GfxLastFrameStats, PassStats};
use crate::stereo::{eye_params, Eye, EyeParams, StereoMode};

/// How long an inactive window waits instead of drawing.
pub const INACTIVE_SLEEP: Duration = Duration::from_millis(10);

/// Forward and up axes of the six cube faces, in +X, -X, +Y, -Y, +Z, -Z order.
const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Z),
    (Vec3::NEG_X, Vec3::Z),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::Y),
];

struct EyePipeline {
    pipeline: GfxPipeline,
    /// Private half-width target in side-by-side stereo.
    target: Option<TargetId>,
}

/// Engine orientation whose forward (+Y) and up (+Z) are the given axes.
pub fn look_orientation(forward: Vec3, up: Vec3) -> Quat {
    let right = forward.cross(up);
    Quat::from_mat3(&Mat3::from_cols(right, forward, up))
}

/// Camera parameters of one eye for an engine camera at `pos`/`dir`.
pub fn camera_opts(options: &GfxOptions, pos: Vec3, dir: Quat, eye: EyeParams) -> CameraOpts {
    CameraOpts {
        fov_y: options.float(GfxFloatOption::Fov),
        near_clip: options.float(GfxFloatOption::NearClip),
        far_clip: options.float(GfxFloatOption::FarClip),
        pos: pos + dir * Vec3::X * eye.camera_offset,
        dir,
        frustum_offset: eye.frustum_offset,
        mask: eye.mask,
        bloom_and_tone_map: options.bool(GfxBoolOption::PostProcessing),
        particles: options.bool(GfxBoolOption::Particles),
        point_lights: options.bool(GfxBoolOption::PointLights),
        sky: options.bool(GfxBoolOption::Sky),
        first_person: options.bool(GfxBoolOption::FirstPerson),
        decals: options.bool(GfxBoolOption::Decals),
        tracers: options.bool(GfxBoolOption::Tracers),
        debug_mode: options.int(GfxIntOption::DebugMode).max(0) as u32,
    }
}

pub struct Gfx<D: RenderDevice> {
    device: D,
    options: GfxOptions,
    env: SceneEnvironment,
    scene: SceneGraph,
    shaders: ShaderDatabase,
    screen_quad: ScreenQuad,
    shadows: SunShadows,
    eyes: Vec<EyePipeline>,
    subsystems: Box<dyn SceneSubsystems>,
    last_frame_stats: GfxLastFrameStats,
    window_active: bool,
}

impl<D: RenderDevice> Gfx<D> {
    /// Build the system shaders and the pipelines for the device's viewport.
    pub fn init(mut device: D, options: GfxOptions) -> Result<Self> {
        // A logger installed by the host takes precedence.
        let _ = env_logger::try_init();

        let shaders = ShaderDatabase::with_system_shaders();
        shaders.build_all(&mut device)?;
        let screen_quad = ScreenQuad::new(&mut device)?;
        let (width, height) = device.target_size(device.viewport_target())?;
        let mut gfx = Self {
            device,
            options,
            env: SceneEnvironment::default(),
            scene: SceneGraph::new(),
            shaders,
            screen_quad,
            shadows: SunShadows::new(),
            eyes: Vec::new(),
            subsystems: Box::new(NullSubsystems),
            last_frame_stats: GfxLastFrameStats::default(),
            window_active: true,
        };
        gfx.reset_framebuffer(width, height)?;
        info!("Gfx initialised at {width}x{height}");
        Ok(gfx)
    }

    /// Release every GPU resource and hand the device back.
    pub fn shutdown(mut self) -> D {
        self.destroy_eyes();
        self.shadows.release(&mut self.device);
        self.scene.release_meshes(&mut self.device);
        self.screen_quad.release(&mut self.device);
        info!("Gfx shut down");
        self.device
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn options(&self) -> &GfxOptions {
        &self.options
    }

    pub fn env(&self) -> &SceneEnvironment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut SceneEnvironment {
        &mut self.env
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    /// The scene together with the device, for attaching meshes.
    pub fn scene_mut(&mut self) -> (&mut SceneGraph, &mut D) {
        (&mut self.scene, &mut self.device)
    }

    pub fn set_subsystems(&mut self, subsystems: Box<dyn SceneSubsystems>) {
        self.subsystems = subsystems;
    }

    pub fn set_window_active(&mut self, active: bool) {
        self.window_active = active;
    }

    pub fn shaders(&self) -> &ShaderDatabase {
        &self.shaders
    }

    /// Register a material program with the device.
    pub fn add_material_shader(&mut self, desc: ShaderDesc) -> Result<()> {
        self.shaders
            .add(&mut self.device, ShaderPurpose::Material, desc)
    }

    /// Recompile every program; returns how many failed.
    pub fn reload_shaders(&mut self) -> usize {
        self.shaders.reload(&mut self.device)
    }

    pub fn last_frame_stats(&self) -> &GfxLastFrameStats {
        &self.last_frame_stats
    }

    /// Number of eye pipelines currently rendering.
    pub fn eye_count(&self) -> usize {
        self.eyes.len()
    }

    pub fn pipeline(&self, eye: usize) -> Option<&GfxPipeline> {
        self.eyes.get(eye).map(|e| &e.pipeline)
    }

    fn destroy_eyes(&mut self) {
        for eye in self.eyes.drain(..) {
            eye.pipeline.destroy(&mut self.device);
            if let Some(target) = eye.target {
                self.device.destroy_target(target);
            }
        }
    }

    /// Recreate the eye pipelines for a `width` x `height` viewport and the
    /// current stereo mode.
    pub fn reset_framebuffer(&mut self, width: u32, height: u32) -> Result<()> {
        self.destroy_eyes();
        self.device.resize_viewport(width, height)?;
        let viewport = self.device.viewport_target();
        let mode = StereoMode::from_options(&self.options);
        let names: &[&str] = match mode {
            StereoMode::Mono => &["mono"],
            _ => &["left", "right"],
        };
        for &name in names {
            let target = match mode {
                StereoMode::SideBySide { .. } => Some(self.device.create_target(&TargetDesc::new(
                    format!("{name} eye"),
                    (width / 2).max(1),
                    height.max(1),
                    TargetFormat::Display,
                ))?),
                _ => None,
            };
            match GfxPipeline::new(&mut self.device, name, target.unwrap_or(viewport)) {
                Ok(pipeline) => self.eyes.push(EyePipeline { pipeline, target }),
                Err(e) => {
                    if let Some(target) = target {
                        self.device.destroy_target(target);
                    }
                    return Err(e);
                }
            }
        }
        info!("Framebuffer reset to {width}x{height} ({mode:?})");
        Ok(())
    }

    fn viewport_size(&self) -> Result<(u32, u32)> {
        self.device.target_size(self.device.viewport_target())
    }

    /// Set an option. Stereo toggles rebuild the eye pipelines.
    pub fn set_bool_option(&mut self, option: GfxBoolOption, value: bool) -> Result<()> {
        if self.options.set_bool(option, value) && option.resets_framebuffer() {
            let (width, height) = self.viewport_size()?;
            self.reset_framebuffer(width, height)?;
        }
        Ok(())
    }

    pub fn set_int_option(&mut self, option: GfxIntOption, value: i32) -> Result<()> {
        self.options.set_int(option, value).map(|_| ())
    }

    pub fn set_float_option(&mut self, option: GfxFloatOption, value: f32) -> Result<()> {
        self.options.set_float(option, value).map(|_| ())
    }

    /// One engine tick. Errors are logged; the next frame starts afresh.
    pub fn render(&mut self, elapsed: f32, cam_pos: Vec3, cam_dir: Quat) {
        if !self.window_active {
            std::thread::sleep(INACTIVE_SLEEP);
            return;
        }
        if let Err(e) = self.render_frame(elapsed, cam_pos, cam_dir) {
            error!("Frame failed: {e}");
        }
    }

    fn render_frame(&mut self, elapsed: f32, cam_pos: Vec3, cam_dir: Quat) -> Result<()> {
        self.env.advance_anim_time(elapsed);
        self.scene.update();

        let mut stats = GfxLastFrameStats::default();
        let viewport = self.device.viewport_target();
        let (width, height) = self.viewport_size()?;
        let mode = StereoMode::from_options(&self.options);

        // Cascades follow the mono camera so both eyes share one set.
        let mono = camera_opts(&self.options, cam_pos, cam_dir, EyeParams::MONO);
        let eye_aspect = match mode {
            StereoMode::SideBySide { .. } => (width / 2).max(1) as f32 / height.max(1) as f32,
            _ => width.max(1) as f32 / height.max(1) as f32,
        };
        let mut camera = Camera::new(eye_aspect);
        camera.apply(&mono, eye_aspect);
        let started = Instant::now();
        match self.shadows.render(
            &mut self.device,
            &self.scene,
            &camera,
            self.env.sun.direction,
            &self.options,
        ) {
            Ok(drawn) => stats.shadow = PassStats::from_draws(drawn, started),
            Err(e) => error!("Shadow pass failed: {e}"),
        }

        for (i, eye) in self.eyes.iter_mut().enumerate() {
            let side = if i == 0 { Eye::Left } else { Eye::Right };
            let params = match mode {
                StereoMode::Mono => EyeParams::MONO,
                _ => eye_params(&self.options, side),
            };
            let opts = camera_opts(&self.options, cam_pos, cam_dir, params);
            let additive = mode == StereoMode::Anaglyph && i > 0;
            let mut ctx = FrameContext {
                device: &mut self.device,
                scene: &self.scene,
                env: &self.env,
                options: &self.options,
                shadows: &self.shadows,
                screen_quad: &self.screen_quad,
                subsystems: self.subsystems.as_mut(),
            };
            eye.pipeline.render(&mut ctx, &opts, additive)?;
            stats.gbuffer.push(eye.pipeline.gbuffer_stats());
            stats.deferred.push(eye.pipeline.deferred_stats());
            stats.point_lights.push(eye.pipeline.point_light_stats());
        }

        if let StereoMode::SideBySide { swapped } = mode {
            for (i, eye) in self.eyes.iter().enumerate() {
                let Some(target) = eye.target else { continue };
                let on_left = (i == 0) != swapped;
                let x = if on_left { 0 } else { width / 2 };
                self.device.copy_target(target, viewport, [x, 0])?;
            }
        }

        stats.hud = self.render_hud(viewport, width, height)?;
        self.device.present()?;
        self.last_frame_stats = stats;
        Ok(())
    }

    fn render_hud(&mut self, viewport: TargetId, width: u32, height: u32) -> Result<PassStats> {
        let Some(first) = self.eyes.first() else {
            return Ok(PassStats::default());
        };
        let pipeline = &first.pipeline;
        let gbuffer = [0, 1, 2].map(|i| pipeline.gbuffer_texture(i).unwrap_or(viewport));
        let started = Instant::now();
        self.device
            .begin_pass(&PassDesc::new("hud").colour(viewport, None))?;
        let mut frame = StageFrame {
            device: &mut self.device,
            camera: pipeline.camera(),
            opts: pipeline.camera_opts(),
            env: &self.env,
            options: &self.options,
            gbuffer,
            width,
            height,
            colour_mask: ColourMask::ALL,
            stats: Default::default(),
        };
        let result = self.subsystems.render_stage(SceneStage::Hud, &mut frame);
        let drawn = frame.stats;
        self.device.end_pass()?;
        result?;
        Ok(PassStats::from_draws(drawn, started))
    }

    /// Write the last presented frame to `path` as a PNG.
    pub fn screenshot(&mut self, path: &Path) -> Result<()> {
        let pixels = self.device.read_target(self.device.viewport_target())?;
        let image = RgbaImage::from_raw(pixels.width, pixels.height, pixels.rgba)
            .ok_or_else(|| GfxError::Engine("screenshot size mismatch".into()))?;
        image.save(path)?;
        info!("Saved screenshot to {}", path.display());
        Ok(())
    }

    /// Render the six 90 degree views around `pos` into one
    /// `6 * size` x `size` strip, faces in +X, -X, +Y, -Y, +Z, -Z order.
    pub fn bake_env_cube(&mut self, pos: Vec3, size: u32) -> Result<RgbaImage> {
        if size == 0 {
            return Err(GfxError::Engine("env cube size must be positive".into()));
        }
        let target = self.device.create_target(&TargetDesc::new(
            "env cube face",
            size,
            size,
            TargetFormat::Display,
        ))?;
        let mut pipeline = match GfxPipeline::new(&mut self.device, "env cube", target) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.device.destroy_target(target);
                return Err(e);
            }
        };
        let baked = self.bake_faces(&mut pipeline, target, pos, size);
        pipeline.destroy(&mut self.device);
        self.device.destroy_target(target);
        baked
    }

    fn bake_faces(
        &mut self,
        pipeline: &mut GfxPipeline,
        target: TargetId,
        pos: Vec3,
        size: u32,
    ) -> Result<RgbaImage> {
        let mut strip = RgbaImage::new(size * 6, size);
        for (face, (forward, up)) in CUBE_FACES.into_iter().enumerate() {
            let mut opts = camera_opts(
                &self.options,
                pos,
                look_orientation(forward, up),
                EyeParams::MONO,
            );
            opts.fov_y = 90.0;
            opts.bloom_and_tone_map = false;
            opts.first_person = false;
            opts.debug_mode = 0;
            let mut ctx = FrameContext {
                device: &mut self.device,
                scene: &self.scene,
                env: &self.env,
                options: &self.options,
                shadows: &self.shadows,
                screen_quad: &self.screen_quad,
                subsystems: self.subsystems.as_mut(),
            };
            pipeline.render(&mut ctx, &opts, false)?;
            let pixels = self.device.read_target(target)?;
            if pixels.width != size || pixels.height != size {
                warn!(
                    "Env cube face {face} read back as {}x{}",
                    pixels.width, pixels.height
                );
                return Err(GfxError::Engine("env cube face size mismatch".into()));
            }
            let face_image = RgbaImage::from_raw(size, size, pixels.rgba)
                .ok_or_else(|| GfxError::Engine("env cube face size mismatch".into()))?;
            image::imageops::replace(&mut strip, &face_image, (face as u32 * size) as i64, 0);
        }
        info!("Baked env cube at {pos} ({size}px faces)");
        Ok(strip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BlendMode;
    use crate::recording::RecordingDevice;
    use crate::shader_db;

    fn gfx() -> Gfx<RecordingDevice> {
        Gfx::init(RecordingDevice::new(64, 32), GfxOptions::default()).unwrap()
    }

    #[test]
    fn test_mono_frame_presents_once() {
        let mut gfx = gfx();
        gfx.render(0.016, Vec3::ZERO, Quat::IDENTITY);
        let device = gfx.device();
        assert_eq!(device.presents, 1);
        assert_eq!(device.passes.last().unwrap().desc.label, "hud");
        assert!(device.pass("mono gbuffer").is_some());
        let stats = gfx.last_frame_stats();
        assert_eq!(stats.gbuffer.len(), 1);
        assert_eq!(stats.deferred.len(), 1);
        assert!((gfx.env().anim_time() - 0.016).abs() < 1e-6);
    }

    #[test]
    fn test_inactive_window_skips_frame() {
        let mut gfx = gfx();
        gfx.set_window_active(false);
        gfx.render(1.0, Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(gfx.device().presents, 0);
        assert!(gfx.device().passes.is_empty());
        assert_eq!(gfx.env().anim_time(), 0.0);
    }

    #[test]
    fn test_stereo_toggle_rebuilds_eyes() {
        let mut gfx = gfx();
        assert_eq!(gfx.eye_count(), 1);
        gfx.set_bool_option(GfxBoolOption::Stereoscopic, true).unwrap();
        assert_eq!(gfx.eye_count(), 2);
        assert_eq!(gfx.pipeline(0).unwrap().size(), (32, 32));
        gfx.set_bool_option(GfxBoolOption::Stereoscopic, false).unwrap();
        assert_eq!(gfx.eye_count(), 1);
        assert_eq!(gfx.pipeline(0).unwrap().size(), (64, 32));
    }

    #[test]
    fn test_side_by_side_copies_halves() {
        let mut gfx = gfx();
        gfx.set_bool_option(GfxBoolOption::Stereoscopic, true).unwrap();
        gfx.render(0.0, Vec3::ZERO, Quat::IDENTITY);
        let viewport = gfx.device().viewport_target();
        let origins: Vec<_> = gfx.device().copies.iter().map(|c| (c.1, c.2)).collect();
        assert_eq!(origins, vec![(viewport, [0, 0]), (viewport, [32, 0])]);

        gfx.device_mut().clear_log();
        gfx.set_bool_option(GfxBoolOption::CrossEye, true).unwrap();
        gfx.render(0.0, Vec3::ZERO, Quat::IDENTITY);
        let origins: Vec<_> = gfx.device().copies.iter().map(|c| c.2).collect();
        assert_eq!(origins, vec![[32, 0], [0, 0]]);
    }

    #[test]
    fn test_anaglyph_second_eye_is_additive() {
        let mut gfx = gfx();
        gfx.set_bool_option(GfxBoolOption::Anaglyph, true).unwrap();
        gfx.set_bool_option(GfxBoolOption::Stereoscopic, true).unwrap();
        gfx.render(0.0, Vec3::ZERO, Quat::IDENTITY);
        let finals: Vec<_> = gfx
            .device()
            .passes
            .iter()
            .filter(|p| {
                p.draws
                    .first()
                    .is_some_and(|d| d.shader == shader_db::VERT_BLUR_COMBINE_TONEMAP)
            })
            .collect();
        assert_eq!(finals.len(), 2);
        assert_eq!(finals[0].draws[0].state.blend, BlendMode::Replace);
        assert_eq!(finals[1].draws[0].state.blend, BlendMode::Add);
        assert!(finals[0].draws[0].state.colour_mask.red);
        assert!(!finals[1].draws[0].state.colour_mask.red);
        assert!(gfx.device().copies.is_empty());
    }

    #[test]
    fn test_failed_frame_is_not_presented() {
        let mut gfx = gfx();
        gfx.set_subsystems(Box::new(FailingHud));
        gfx.render(0.0, Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(gfx.device().presents, 0);
        // The next frame still runs.
        gfx.set_subsystems(Box::new(NullSubsystems));
        gfx.render(0.0, Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(gfx.device().presents, 1);
    }

    struct FailingHud;

    impl SceneSubsystems for FailingHud {
        fn render_stage(&mut self, stage: SceneStage, _frame: &mut StageFrame<'_>) -> Result<()> {
            match stage {
                SceneStage::Hud => Err(GfxError::Api("hud lost".into())),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_screenshot_writes_png() {
        let mut gfx = gfx();
        gfx.render(0.0, Vec3::ZERO, Quat::IDENTITY);
        let path = std::env::temp_dir().join(format!("ember-shot-{}.png", std::process::id()));
        gfx.screenshot(&path).unwrap();
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (64, 32));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bake_env_cube_renders_six_faces() {
        let mut gfx = gfx();
        let targets = gfx.device().targets.len();
        let strip = gfx.bake_env_cube(Vec3::new(0.0, 0.0, 2.0), 8).unwrap();
        assert_eq!(strip.dimensions(), (48, 8));
        let gbuffer_passes = gfx
            .device()
            .passes
            .iter()
            .filter(|p| p.desc.label == "env cube gbuffer")
            .count();
        assert_eq!(gbuffer_passes, 6);
        assert_eq!(gfx.device().targets.len(), targets);
    }

    #[test]
    fn test_face_orientations_are_right_handed() {
        for (forward, up) in CUBE_FACES {
            let q = look_orientation(forward, up);
            assert!((q * Vec3::Y).abs_diff_eq(forward, 1e-5));
            assert!((q * Vec3::Z).abs_diff_eq(up, 1e-5));
        }
    }

    #[test]
    fn test_eye_offset_moves_along_right_axis() {
        let options = GfxOptions::default();
        let eye = EyeParams {
            frustum_offset: 0.1,
            camera_offset: -0.5,
            mask: ColourMask::ALL,
        };
        let dir = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let opts = camera_opts(&options, Vec3::ZERO, dir, eye);
        // Turned to face -X, the right axis is +Y.
        assert!(opts.pos.abs_diff_eq(Vec3::new(0.0, -0.5, 0.0), 1e-5));
        assert_eq!(opts.frustum_offset, 0.1);
    }

    #[test]
    fn test_invalid_option_rejected() {
        let mut gfx = gfx();
        assert!(matches!(
            gfx.set_int_option(GfxIntOption::BloomIterations, -1),
            Err(GfxError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let gfx = gfx();
        let device = gfx.shutdown();
        assert!(device.buffers.is_empty());
        assert_eq!(device.targets.len(), 1);
    }
}

//! One eye of the renderer: G-buffer, lighting and compositing into a
//! viewport target.

use std::time::Instant;

use log::info;

use crate::camera::{Camera, CameraOpts};
use crate::compositor::{self, CompositeParams, HDR_BUFFERS};
use crate::deferred::{DeferredLightingPasses, LightingInputs};
use crate::device::{
    ColourMask, DrawStats, PassDesc, RenderDevice, TargetDesc, TargetFormat, TargetId,
};
use crate::error::Result;
use crate::invocations::{InvocationTable, Invoker, SceneSubsystems, StageFrame};
use crate::options::GfxOptions;
use crate::scene::{SceneEnvironment, SceneGraph};
use crate::screen_quad::ScreenQuad;
use crate::shadow::SunShadows;
use crate::stats::PassStats;

/// Cleared G-buffer value: packed depth 1 reads as "nothing here".
const GBUFFER_CLEAR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Shared state a pipeline renders from.
pub struct FrameContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub scene: &'a SceneGraph,
    pub env: &'a SceneEnvironment,
    pub options: &'a GfxOptions,
    pub shadows: &'a SunShadows,
    pub screen_quad: &'a ScreenQuad,
    pub subsystems: &'a mut dyn SceneSubsystems,
}

fn create_targets(
    device: &mut dyn RenderDevice,
    descs: &[TargetDesc],
) -> Result<Vec<TargetId>> {
    let mut ids = Vec::with_capacity(descs.len());
    for desc in descs {
        match device.create_target(desc) {
            Ok(id) => ids.push(id),
            Err(e) => {
                for id in ids {
                    device.destroy_target(id);
                }
                return Err(e);
            }
        }
    }
    Ok(ids)
}

pub struct GfxPipeline {
    name: String,
    viewport: TargetId,
    width: u32,
    height: u32,
    gbuffer: [TargetId; 3],
    gbuffer_depth: TargetId,
    hdr: [TargetId; HDR_BUFFERS],
    camera: Camera,
    opts: CameraOpts,
    lighting: DeferredLightingPasses,
    gbuffer_stats: PassStats,
    deferred_stats: PassStats,
}

impl GfxPipeline {
    /// Create the G-buffer and HDR targets at the size of `viewport`.
    pub fn new(device: &mut dyn RenderDevice, name: &str, viewport: TargetId) -> Result<Self> {
        let (width, height) = device.target_size(viewport)?;
        let (w, h) = (width.max(1), height.max(1));
        let descs = [
            TargetDesc::new(format!("{name} gbuffer0"), w, h, TargetFormat::Rgba32Float),
            TargetDesc::new(format!("{name} gbuffer1"), w, h, TargetFormat::Rgba32Float),
            TargetDesc::new(format!("{name} gbuffer2"), w, h, TargetFormat::Rgba32Float),
            TargetDesc::new(format!("{name} gbuffer depth"), w, h, TargetFormat::Depth32Float),
            TargetDesc::new(format!("{name} hdr0"), w, h, TargetFormat::Rgba16Float),
            TargetDesc::new(format!("{name} hdr1"), w, h, TargetFormat::Rgba16Float),
            TargetDesc::new(format!("{name} hdr2"), w, h, TargetFormat::Rgba16Float),
        ];
        let ids = create_targets(device, &descs)?;
        info!("Created pipeline {name} ({width}x{height})");
        Ok(Self {
            name: name.to_string(),
            viewport,
            width: w,
            height: h,
            gbuffer: [ids[0], ids[1], ids[2]],
            gbuffer_depth: ids[3],
            hdr: [ids[4], ids[5], ids[6]],
            camera: Camera::new(w as f32 / h as f32),
            opts: CameraOpts::default(),
            lighting: DeferredLightingPasses::new(),
            gbuffer_stats: PassStats::default(),
            deferred_stats: PassStats::default(),
        })
    }

    /// Release every target and buffer this pipeline owns.
    pub fn destroy(mut self, device: &mut dyn RenderDevice) {
        for id in self
            .gbuffer
            .into_iter()
            .chain([self.gbuffer_depth])
            .chain(self.hdr)
        {
            device.destroy_target(id);
        }
        self.lighting.release(device);
        info!("Destroyed pipeline {}", self.name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn viewport(&self) -> TargetId {
        self.viewport
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn gbuffer_texture(&self, i: usize) -> Option<TargetId> {
        self.gbuffer.get(i).copied()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_opts(&self) -> &CameraOpts {
        &self.opts
    }

    pub fn gbuffer_stats(&self) -> PassStats {
        self.gbuffer_stats
    }

    pub fn deferred_stats(&self) -> PassStats {
        self.deferred_stats
    }

    pub fn point_light_stats(&self) -> DrawStats {
        self.lighting.point_light_stats()
    }

    pub fn lighting(&self) -> &DeferredLightingPasses {
        &self.lighting
    }

    /// Render one view into the viewport. With `additive` the result is
    /// accumulated onto what the viewport already holds.
    pub fn render(
        &mut self,
        ctx: &mut FrameContext<'_>,
        opts: &CameraOpts,
        additive: bool,
    ) -> Result<()> {
        let aspect = self.width as f32 / self.height as f32;
        self.camera.apply(opts, aspect);
        self.opts = opts.clone();

        let inputs = LightingInputs {
            screen_quad: ctx.screen_quad.geometry(),
            shadow_maps: ctx.shadows.is_valid().then(|| ctx.shadows.maps()).flatten(),
            shadow_view_proj: ctx.shadows.view_proj(),
        };

        let started = Instant::now();
        ctx.device.begin_pass(
            &PassDesc::new(format!("{} gbuffer", self.name))
                .colour(self.gbuffer[0], Some(GBUFFER_CLEAR))
                .colour(self.gbuffer[1], Some(GBUFFER_CLEAR))
                .colour(self.gbuffer[2], Some(GBUFFER_CLEAR))
                .depth(self.gbuffer_depth, Some(1.0), false),
        )?;
        let (result, drawn) =
            self.run_table(ctx, &inputs, &InvocationTable::GBUFFER, ColourMask::ALL);
        ctx.device.end_pass()?;
        self.gbuffer_stats = PassStats::from_draws(drawn, started);
        result?;

        let hdr = opts.bloom_and_tone_map && opts.debug_mode == 0;
        let (dest, mask) = if hdr {
            (self.hdr[0], ColourMask::ALL)
        } else {
            (self.viewport, opts.mask)
        };
        let clear = (hdr || !additive).then_some(BLACK);
        let table = if opts.debug_mode > 0 {
            InvocationTable::DEBUG
        } else {
            InvocationTable::DEFERRED
        };

        let started = Instant::now();
        ctx.device.begin_pass(
            &PassDesc::new(format!("{} deferred", self.name))
                .colour(dest, clear)
                .depth(self.gbuffer_depth, None, false),
        )?;
        let (result, mut drawn) = self.run_table(ctx, &inputs, &table, mask);
        ctx.device.end_pass()?;
        self.deferred_stats = PassStats::from_draws(drawn, started);
        result?;

        if hdr {
            drawn += compositor::composite(
                &mut *ctx.device,
                ctx.screen_quad.geometry(),
                self.hdr,
                ctx.env,
                ctx.options,
                CompositeParams {
                    target: self.viewport,
                    additive,
                    mask: opts.mask,
                },
            )?;
            self.deferred_stats = PassStats::from_draws(drawn, started);
        }
        Ok(())
    }

    fn run_table(
        &mut self,
        ctx: &mut FrameContext<'_>,
        inputs: &LightingInputs,
        table: &InvocationTable,
        colour_mask: ColourMask,
    ) -> (Result<()>, DrawStats) {
        let mut frame = StageFrame {
            device: &mut *ctx.device,
            camera: &self.camera,
            opts: &self.opts,
            env: ctx.env,
            options: ctx.options,
            gbuffer: self.gbuffer,
            width: self.width,
            height: self.height,
            colour_mask,
            stats: DrawStats::default(),
        };
        let mut invoker = Invoker {
            scene: ctx.scene,
            subsystems: &mut *ctx.subsystems,
            lighting: &mut self.lighting,
            lighting_inputs: inputs,
        };
        let result = invoker.run(table, &mut frame);
        (result, frame.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BlendMode, CullMode, DepthTest};
    use crate::error::GfxError;
    use crate::invocations::NullSubsystems;
    use crate::options::GfxIntOption;
    use crate::recording::RecordingDevice;
    use crate::scene::{Body, Light, Parent};
    use crate::shader_db::{self, ShaderDatabase};
    use ember_gpu_shared::uniforms::{DeferredUniforms, MeshVertex};
    use glam::{Affine3A, Vec3};

    struct Harness {
        device: RecordingDevice,
        scene: SceneGraph,
        env: SceneEnvironment,
        options: GfxOptions,
        shadows: SunShadows,
        quad: ScreenQuad,
        subsystems: NullSubsystems,
    }

    impl Harness {
        fn new() -> Self {
            let mut device = RecordingDevice::new(64, 48);
            ShaderDatabase::with_system_shaders()
                .build_all(&mut device)
                .unwrap();
            let quad = ScreenQuad::new(&mut device).unwrap();
            Self {
                device,
                scene: SceneGraph::new(),
                env: SceneEnvironment::default(),
                options: GfxOptions::default(),
                shadows: SunShadows::new(),
                quad,
                subsystems: NullSubsystems,
            }
        }

        fn pipeline(&mut self) -> GfxPipeline {
            let viewport = self.device.viewport_target();
            GfxPipeline::new(&mut self.device, "eye", viewport).unwrap()
        }

        fn render(&mut self, pipeline: &mut GfxPipeline, opts: &CameraOpts) -> Result<()> {
            let mut ctx = FrameContext {
                device: &mut self.device,
                scene: &self.scene,
                env: &self.env,
                options: &self.options,
                shadows: &self.shadows,
                screen_quad: &self.quad,
                subsystems: &mut self.subsystems,
            };
            pipeline.render(&mut ctx, opts, false)
        }
    }

    fn direct() -> CameraOpts {
        CameraOpts {
            bloom_and_tone_map: false,
            ..CameraOpts::default()
        }
    }

    #[test]
    fn test_no_lights_direct_is_two_passes() {
        let mut h = Harness::new();
        let mut pipeline = h.pipeline();
        h.render(&mut pipeline, &direct()).unwrap();

        let labels: Vec<_> = h.device.passes.iter().map(|p| p.desc.label.as_str()).collect();
        assert_eq!(labels, vec!["eye gbuffer", "eye deferred"]);
        let gbuffer = &h.device.passes[0];
        assert_eq!(gbuffer.desc.colour.len(), 3);
        assert!(gbuffer
            .desc
            .colour
            .iter()
            .all(|c| c.clear == Some(GBUFFER_CLEAR)));
        let deferred = &h.device.passes[1];
        assert_eq!(deferred.desc.colour[0].target, h.device.viewport_target());
        assert_eq!(deferred.draws_of(shader_db::DEFERRED_LIGHTS).len(), 0);
        assert_eq!(pipeline.point_light_stats(), DrawStats::default());
        assert_eq!(pipeline.lighting().outside().vertexes_used(), 0);
        assert_eq!(pipeline.lighting().inside().indexes_used(), 0);
        assert_eq!(pipeline.deferred_stats().batches, 1);
    }

    #[test]
    fn test_camera_inside_wide_light() {
        let mut h = Harness::new();
        let node = h
            .scene
            .add_node(Affine3A::from_translation(Vec3::new(0.0, -3.0, 0.0)), Parent::Root)
            .unwrap();
        h.scene
            .add_light(Light::spot(node, Vec3::ONE, 10.0, 80.0, 90.0))
            .unwrap();
        h.scene.update();
        let mut pipeline = h.pipeline();
        h.render(&mut pipeline, &direct()).unwrap();

        let lighting = pipeline.lighting();
        assert_eq!(lighting.inside().vertexes_used(), 8);
        assert_eq!(lighting.inside().indexes_used(), 36);
        assert_eq!(lighting.outside().vertexes_used(), 0);

        let deferred = h.device.pass("eye deferred").unwrap();
        let lights = deferred.draws_of(shader_db::DEFERRED_LIGHTS);
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].state.cull, CullMode::Back);
        assert_eq!(lights[0].state.depth_test, DepthTest::GreaterEqual);
        assert_eq!(lights[0].state.blend, BlendMode::Add);
        assert!(!lights[0].state.depth_write);
        assert_eq!(pipeline.point_light_stats().triangles, 12);
    }

    #[test]
    fn test_bloom_two_iterations() {
        let mut h = Harness::new();
        h.options.set_int(GfxIntOption::BloomIterations, 2).unwrap();
        let mut pipeline = h.pipeline();
        h.render(&mut pipeline, &CameraOpts::default()).unwrap();

        let shaders: Vec<_> = h.device.passes[2..]
            .iter()
            .map(|p| p.draws[0].shader.as_str())
            .collect();
        assert_eq!(
            shaders,
            vec![
                shader_db::EXPOSURE_FILTER_THEN_HORZ_BLUR,
                shader_db::VERT_BLUR,
                shader_db::HORZ_BLUR,
                shader_db::VERT_BLUR_COMBINE_TONEMAP,
            ]
        );
        let viewports: Vec<_> = h.device.passes[2..]
            .iter()
            .map(|p| p.draws[0].viewport.map(|v| (v.width, v.height)))
            .collect();
        assert_eq!(
            viewports,
            vec![Some((64, 48)), Some((64, 48)), Some((32, 24)), Some((64, 48))]
        );
        // The scene goes to HDR 0, the combine pass to the viewport.
        let deferred = h.device.pass("eye deferred").unwrap();
        assert_eq!(h.device.label_of(deferred.desc.colour[0].target), "eye hdr0");
        let last = h.device.passes.last().unwrap();
        assert_eq!(last.desc.colour[0].target, h.device.viewport_target());
        assert_eq!(last.desc.colour[0].clear, Some(BLACK));
    }

    #[test]
    fn test_ambient_quad_covers_projected_surface() {
        // The quad is drawn at the far plane, clip z = 1.
        let quad_z = 1.0;
        for debug_mode in [0, 7] {
            let mut h = Harness::new();
            let mut pipeline = h.pipeline();
            let opts = CameraOpts {
                debug_mode,
                ..direct()
            };
            h.render(&mut pipeline, &opts).unwrap();

            let camera = pipeline.camera();
            let surface = camera.position() + camera.forward() * 10.0;
            let stored = camera.view_proj().project_point3(surface).z;
            assert!(stored > 0.0 && stored < 1.0, "surface depth {stored}");

            let deferred = h.device.pass("eye deferred").unwrap();
            let ambient = deferred.draws_of(shader_db::DEFERRED_AMBIENT_SUN);
            assert_eq!(ambient.len(), 1);
            let passes = match ambient[0].state.depth_test {
                DepthTest::Always => true,
                DepthTest::LessEqual => quad_z <= stored,
                DepthTest::GreaterEqual => quad_z >= stored,
            };
            assert!(passes, "debug mode {debug_mode} rejects depth {stored}");
        }
    }

    #[test]
    fn test_shadow_debug_view() {
        let mut h = Harness::new();
        h.options.set_int(GfxIntOption::ShadowRes, 32).unwrap();
        let camera = Camera::new(64.0 / 48.0);
        h.shadows
            .render(&mut h.device, &h.scene, &camera, Vec3::NEG_Z, &h.options)
            .unwrap();
        let mut pipeline = h.pipeline();
        let opts = CameraOpts {
            debug_mode: 7,
            ..CameraOpts::default()
        };
        h.render(&mut pipeline, &opts).unwrap();

        let deferred = h.device.pass("eye deferred").unwrap();
        assert_eq!(deferred.desc.colour[0].target, h.device.viewport_target());
        let ambient = deferred.draws_of(shader_db::DEFERRED_AMBIENT_SUN);
        assert_eq!(ambient.len(), 1);
        let uniforms: DeferredUniforms = ambient[0].uniforms_as();
        assert_eq!(uniforms.flags[0], 7);
        assert_eq!(uniforms.debug_rect, [16.0, 8.0, 48.0, 40.0]);
        let maps = h.shadows.maps().unwrap();
        assert_eq!(
            ambient[0].textures[4],
            Some(crate::device::TextureBinding::Target(maps[1]))
        );
        assert!(deferred.draws_of(shader_db::DEFERRED_LIGHTS).is_empty());
        // No compositor in debug views.
        assert_eq!(h.device.passes.last().unwrap().desc.label, "eye deferred");
    }

    #[test]
    fn test_lighting_failure_is_absorbed() {
        let mut h = Harness::new();
        h.device.failing_shader = Some(shader_db::DEFERRED_AMBIENT_SUN.to_string());
        let mut pipeline = h.pipeline();
        h.render(&mut pipeline, &CameraOpts::default()).unwrap();
        let deferred = h.device.pass("eye deferred").unwrap();
        assert!(deferred.draws.is_empty());
        let last = h.device.passes.last().unwrap();
        assert_eq!(last.draws[0].shader, shader_db::VERT_BLUR_COMBINE_TONEMAP);
        assert_eq!(last.desc.colour[0].target, h.device.viewport_target());
    }

    #[test]
    fn test_gbuffer_failure_propagates_after_closing_pass() {
        let mut h = Harness::new();
        let vertices = [
            MeshVertex { position: [0.0, 0.0, 0.0], normal: [0.0, -1.0, 0.0], uv: [0.0, 0.0] },
            MeshVertex { position: [1.0, 0.0, 0.0], normal: [0.0, -1.0, 0.0], uv: [1.0, 0.0] },
            MeshVertex { position: [0.0, 0.0, 1.0], normal: [0.0, -1.0, 0.0], uv: [0.0, 1.0] },
        ];
        let mesh = h.scene.add_mesh(&mut h.device, &vertices, &[0, 1, 2]).unwrap();
        let node = h
            .scene
            .add_node(Affine3A::from_translation(Vec3::new(0.0, 5.0, 0.0)), Parent::Root)
            .unwrap();
        h.scene.add_body(Body::new(node, mesh)).unwrap();
        h.scene.update();
        h.device.failing_shader = Some(shader_db::GBUFFER_STATIC.to_string());
        let mut pipeline = h.pipeline();
        let result = h.render(&mut pipeline, &direct());
        assert!(matches!(result, Err(GfxError::Api(_))));
        assert_eq!(h.device.passes.len(), 1);
        // The failed pass was closed, so the device accepts new passes.
        h.device.failing_shader = None;
        h.render(&mut pipeline, &direct()).unwrap();
        assert_eq!(pipeline.gbuffer_stats().batches, 1);
    }

    #[test]
    fn test_anaglyph_second_eye_accumulates() {
        let mut h = Harness::new();
        let mut pipeline = h.pipeline();
        let opts = CameraOpts {
            mask: ColourMask {
                red: false,
                green: true,
                blue: true,
                alpha: true,
            },
            ..CameraOpts::default()
        };
        let mut ctx = FrameContext {
            device: &mut h.device,
            scene: &h.scene,
            env: &h.env,
            options: &h.options,
            shadows: &h.shadows,
            screen_quad: &h.quad,
            subsystems: &mut h.subsystems,
        };
        pipeline.render(&mut ctx, &opts, true).unwrap();
        let last = h.device.passes.last().unwrap();
        assert_eq!(last.desc.colour[0].clear, None);
        assert_eq!(last.draws[0].state.blend, BlendMode::Add);
        assert!(!last.draws[0].state.colour_mask.red);
    }

    #[test]
    fn test_destroy_releases_targets() {
        let mut h = Harness::new();
        let before = h.device.targets.len();
        let pipeline = h.pipeline();
        assert_eq!(h.device.targets.len(), before + 7);
        assert_eq!(pipeline.gbuffer_texture(3), None);
        pipeline.destroy(&mut h.device);
        assert_eq!(h.device.targets.len(), before);
    }
}

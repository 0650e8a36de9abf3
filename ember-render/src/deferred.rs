//! Deferred lighting: a full-screen ambient + sun pass followed by additive
//! light volumes for every other light in view.

use ember_gpu_shared::uniforms::{DeferredUniforms, SHADOW_CASCADES};
use glam::{Mat4, Vec3};
use log::{debug, error, warn};

use crate::device::{
    BlendMode, CullMode, DepthTest, DrawCall, DrawState, DrawStats, Geometry, TargetId,
    TextureBinding,
};
use crate::error::Result;
use crate::invocations::StageFrame;
use crate::options::{GfxBoolOption, GfxFloatOption, GfxIntOption};
use crate::point_lights::{LightVolume, PointLightsGeometry, MAX_LIGHTS};
use crate::scene::{LightInstance, SceneGraph};
use crate::shader_db::{DEFERRED_AMBIENT_SUN, DEFERRED_LIGHTS};

/// First debug mode that shows a raw shadow map.
pub const SHADOW_DEBUG_MODE: u32 = 6;

/// Per-frame inputs of the lighting pass owned by someone else.
#[derive(Clone, Debug)]
pub struct LightingInputs {
    pub screen_quad: Geometry,
    pub shadow_maps: Option<[TargetId; SHADOW_CASCADES]>,
    pub shadow_view_proj: [Mat4; SHADOW_CASCADES],
}

impl LightingInputs {
    pub fn unshadowed(screen_quad: Geometry) -> Self {
        Self {
            screen_quad,
            shadow_maps: None,
            shadow_view_proj: [Mat4::IDENTITY; SHADOW_CASCADES],
        }
    }
}

fn vec4(v: Vec3, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}

/// Centred square of `size` pixels inside a `width` x `height` viewport.
pub fn shadow_debug_rect(width: u32, height: u32, size: u32) -> [f32; 4] {
    let x0 = (width as f32 - size as f32) * 0.5;
    let y0 = (height as f32 - size as f32) * 0.5;
    [x0, y0, x0 + size as f32, y0 + size as f32]
}

/// Depth test of the full-screen ambient quad, which sits on the far plane.
///
/// Scene depth never exceeds the far plane, so the quad covers every pixel
/// and background pixels are discarded in the shader by their cleared depth.
/// Shadow-map views ignore the scene entirely.
pub fn ambient_depth_test(debug_mode: u32) -> DepthTest {
    if debug_mode >= SHADOW_DEBUG_MODE {
        DepthTest::Always
    } else {
        DepthTest::GreaterEqual
    }
}

pub fn deferred_uniforms(frame: &StageFrame<'_>, inputs: &LightingInputs) -> DeferredUniforms {
    let camera = frame.camera;
    let env = frame.env;
    let options = frame.options;
    let rays = camera.frustum_corner_rays();
    let (w, h) = (frame.width.max(1) as f32, frame.height.max(1) as f32);
    let shadow_res = options.int(GfxIntOption::ShadowRes) as u32;
    let receive = options.bool(GfxBoolOption::ShadowReceive) && inputs.shadow_maps.is_some();
    let env_mask = env
        .env_cubes
        .iter()
        .enumerate()
        .filter(|(_, cube)| cube.is_loaded())
        .fold(0u32, |mask, (i, _)| mask | (1 << i));

    DeferredUniforms {
        view_proj: camera.view_proj().to_cols_array_2d(),
        frustum_rays: rays.map(|r| vec4(r, 0.0)),
        shadow_view_proj: inputs.shadow_view_proj.map(|m| m.to_cols_array_2d()),
        camera_pos: vec4(camera.position(), camera.far()),
        viewport_size: [w, h, 1.0 / w, 1.0 / h],
        sun_direction: vec4(env.sun.direction.normalize_or(Vec3::NEG_Z), 0.0),
        sun_diffuse: vec4(env.sun.diffuse, 1.0),
        sun_specular: vec4(env.sun.specular, 1.0),
        ambient: vec4(env.ambient, env.env_cube_cross_fade.clamp(0.0, 1.0)),
        fog: vec4(env.fog.colour, env.fog.density),
        shadow_params: [
            options.float(GfxFloatOption::ShadowFactor),
            options.float(GfxFloatOption::ShadowFadeStart),
            shadow_res as f32,
            if receive { 1.0 } else { 0.0 },
        ],
        shadow_splits: [
            options.float(GfxFloatOption::ShadowEnd0),
            options.float(GfxFloatOption::ShadowEnd1),
            options.float(GfxFloatOption::ShadowEnd2),
            if env.shadow_noise.is_loaded() { 1.0 } else { 0.0 },
        ],
        debug_rect: shadow_debug_rect(frame.width, frame.height, shadow_res),
        flags: [frame.opts.debug_mode, env_mask, 1, 0],
        time: [env.anim_time(), 0.0, 0.0, 0.0],
    }
}

/// Owner of the two light-volume meshes, reused frame to frame.
#[derive(Debug)]
pub struct DeferredLightingPasses {
    outside: PointLightsGeometry,
    inside: PointLightsGeometry,
    point_light_stats: DrawStats,
}

impl Default for DeferredLightingPasses {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredLightingPasses {
    pub fn new() -> Self {
        Self {
            outside: PointLightsGeometry::new("outside lights"),
            inside: PointLightsGeometry::new("inside lights"),
            point_light_stats: DrawStats::default(),
        }
    }

    /// Lights the camera is outside of.
    pub fn outside(&self) -> &PointLightsGeometry {
        &self.outside
    }

    /// Lights whose volume contains the camera.
    pub fn inside(&self) -> &PointLightsGeometry {
        &self.inside
    }

    /// Work of the light-volume draws in the last render.
    pub fn point_light_stats(&self) -> DrawStats {
        self.point_light_stats
    }

    /// Both sub-passes into the open pass. Each sub-pass failure is logged
    /// and leaves the rest of the frame intact.
    pub fn render(
        &mut self,
        frame: &mut StageFrame<'_>,
        scene: &SceneGraph,
        inputs: &LightingInputs,
    ) -> Result<()> {
        self.point_light_stats = DrawStats::default();
        let uniforms = deferred_uniforms(frame, inputs);

        if let Err(e) = self.ambient_sun(frame, &uniforms, inputs) {
            error!("Deferred ambient/sun pass failed: {e}");
        }
        if frame.opts.debug_mode != 0 || !frame.opts.point_lights {
            return Ok(());
        }
        if let Err(e) = self.point_lights(frame, scene, &uniforms) {
            error!("Deferred point light pass failed: {e}");
        }
        Ok(())
    }

    fn ambient_sun(
        &mut self,
        frame: &mut StageFrame<'_>,
        uniforms: &DeferredUniforms,
        inputs: &LightingInputs,
    ) -> Result<()> {
        let receive = frame.options.bool(GfxBoolOption::ShadowReceive)
            || frame.opts.debug_mode >= SHADOW_DEBUG_MODE;
        let shadow = |i: usize| {
            inputs
                .shadow_maps
                .filter(|_| receive)
                .map(|maps| TextureBinding::Target(maps[i]))
        };
        let env = frame.env;
        let [g0, g1, g2] = frame.gbuffer;
        let textures = [
            Some(TextureBinding::Target(g0)),
            Some(TextureBinding::Target(g1)),
            Some(TextureBinding::Target(g2)),
            shadow(0),
            shadow(1),
            shadow(2),
            env.shadow_noise.texture().map(TextureBinding::Texture),
            env.env_cubes[0].texture().map(TextureBinding::Texture),
            env.env_cubes[1].texture().map(TextureBinding::Texture),
        ];
        let state = DrawState {
            cull: CullMode::None,
            depth_test: ambient_depth_test(frame.opts.debug_mode),
            depth_write: false,
            blend: BlendMode::Replace,
            colour_mask: frame.colour_mask,
        };
        frame.draw(&DrawCall {
            shader: DEFERRED_AMBIENT_SUN,
            state,
            uniforms: bytemuck::bytes_of(uniforms),
            textures: &textures,
            geometry: inputs.screen_quad,
            viewport: None,
        })?;
        Ok(())
    }

    fn point_lights(
        &mut self,
        frame: &mut StageFrame<'_>,
        scene: &SceneGraph,
        uniforms: &DeferredUniforms,
    ) -> Result<()> {
        let camera_pos = frame.camera.position();
        let mut outside: Vec<(LightInstance, LightVolume)> = Vec::new();
        let mut inside: Vec<(LightInstance, LightVolume)> = Vec::new();
        for light in scene.lights_in_frustum(frame.camera) {
            let volume = LightVolume::new(&light);
            if volume.contains_camera(camera_pos) {
                inside.push((light, volume));
            } else {
                outside.push((light, volume));
            }
        }
        for (group, lights) in [("outside", &mut outside), ("inside", &mut inside)] {
            if lights.len() > MAX_LIGHTS {
                warn!("{} {group} lights in view, drawing {MAX_LIGHTS}", lights.len());
                lights.truncate(MAX_LIGHTS);
            }
        }
        debug!(
            "Point lights: {} outside, {} inside",
            outside.len(),
            inside.len()
        );

        fill(&mut self.outside, frame, &outside)?;
        fill(&mut self.inside, frame, &inside)?;

        let [g0, g1, g2] = frame.gbuffer;
        let textures = [
            Some(TextureBinding::Target(g0)),
            Some(TextureBinding::Target(g1)),
            Some(TextureBinding::Target(g2)),
        ];
        let mask = frame.colour_mask;
        let additive = |cull, depth_test| DrawState {
            cull,
            depth_test,
            depth_write: false,
            blend: BlendMode::Add,
            colour_mask: mask,
        };
        // Outside: the near faces, lit where the surface is behind them.
        // Inside: the far faces, lit where the surface is in front of them.
        let groups = [
            (
                self.outside.geometry(),
                additive(CullMode::Front, DepthTest::LessEqual),
            ),
            (
                self.inside.geometry(),
                additive(CullMode::Back, DepthTest::GreaterEqual),
            ),
        ];
        for (geometry, state) in groups {
            let Some(geometry) = geometry else { continue };
            self.point_light_stats += frame.draw(&DrawCall {
                shader: DEFERRED_LIGHTS,
                state,
                uniforms: bytemuck::bytes_of(uniforms),
                textures: &textures,
                geometry,
                viewport: None,
            })?;
        }
        Ok(())
    }

    pub fn release(&mut self, device: &mut dyn crate::device::RenderDevice) {
        self.outside.release(device);
        self.inside.release(device);
    }
}

fn fill(
    geometry: &mut PointLightsGeometry,
    frame: &mut StageFrame<'_>,
    lights: &[(LightInstance, LightVolume)],
) -> Result<()> {
    geometry.begin_lights(&mut *frame.device, lights.len())?;
    let written = lights.iter().try_for_each(|(light, volume)| {
        if volume.pyramid {
            geometry.pyramid_light(light, volume)
        } else {
            geometry.cube_light(light, volume)
        }
    });
    let uploaded = geometry.end_lights(&mut *frame.device);
    written.and(uploaded)
}

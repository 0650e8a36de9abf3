//! Cascaded sun shadows.
//!
//! Three depth maps cover consecutive slices of the view frustum, split at
//! `ShadowEnd0..2`. Cascades are fitted with a bounding sphere so their size
//! does not change as the camera turns, and snapped to the shadow-map texel
//! grid so edges do not shimmer as it moves.

use ember_gpu_shared::uniforms::SHADOW_CASCADES;
use glam::{Mat4, Vec3};
use log::{debug, info};

use crate::camera::Camera;
use crate::device::{DrawStats, PassDesc, RenderDevice, TargetDesc, TargetFormat, TargetId};
use crate::error::{GfxError, Result};
use crate::options::{GfxBoolOption, GfxFloatOption, GfxIntOption, GfxOptions};
use crate::scene::{LightId, SceneGraph};

/// Space behind a cascade in which casters still land in the map.
pub const CASTER_MARGIN: f32 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowCaster {
    Sun,
    Light(LightId),
}

/// Captures the light-space matrix of each cascade as it is rendered.
#[derive(Clone, Debug)]
pub struct ShadowCasterListener {
    view_proj: [Mat4; SHADOW_CASCADES],
}

impl Default for ShadowCasterListener {
    fn default() -> Self {
        Self {
            view_proj: [Mat4::IDENTITY; SHADOW_CASCADES],
        }
    }
}

impl ShadowCasterListener {
    /// Called before each cascade of a shadow-casting light is drawn.
    ///
    /// Only the sun's cascades are kept; other lights are ignored because
    /// the lighting pass has nowhere to bind their maps.
    pub fn shadow_texture_caster_pre_view_proj(
        &mut self,
        caster: ShadowCaster,
        iteration: usize,
        view_proj: Mat4,
    ) -> Result<()> {
        if iteration >= SHADOW_CASCADES {
            return Err(GfxError::Engine(format!(
                "shadow cascade {iteration} out of range"
            )));
        }
        if caster == ShadowCaster::Sun {
            self.view_proj[iteration] = view_proj;
        }
        Ok(())
    }

    pub fn view_proj(&self) -> [Mat4; SHADOW_CASCADES] {
        self.view_proj
    }
}

/// View-depth ranges of the three cascades.
pub fn cascade_ranges(options: &GfxOptions) -> [(f32, f32); SHADOW_CASCADES] {
    let near = options.float(GfxFloatOption::NearClip);
    let e0 = options.float(GfxFloatOption::ShadowEnd0).max(near);
    let e1 = options.float(GfxFloatOption::ShadowEnd1).max(e0);
    let e2 = options.float(GfxFloatOption::ShadowEnd2).max(e1);
    [(near, e0), (e0, e1), (e1, e2)]
}

/// Light-space view-projection of the slice `[start, end]` of the camera.
pub fn cascade_view_proj(
    camera: &Camera,
    sun_direction: Vec3,
    start: f32,
    end: f32,
    resolution: u32,
) -> Mat4 {
    let rays = camera.frustum_corner_rays();
    let far = camera.far();
    let pos = camera.position();
    let corners: Vec<Vec3> = [start, end]
        .iter()
        .flat_map(|d| rays.iter().map(move |r| pos + *r * (d / far)))
        .collect();
    let centre = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let radius = corners
        .iter()
        .map(|c| c.distance(centre))
        .fold(0.0f32, f32::max);
    // Quantised so small camera moves do not rescale the cascade.
    let radius = ((radius * 16.0).ceil() / 16.0).max(1.0 / 16.0);

    let dir = sun_direction.normalize_or(Vec3::NEG_Z);
    let up = if dir.z.abs() > 0.99 { Vec3::Y } else { Vec3::Z };
    let eye = centre - dir * (radius + CASTER_MARGIN);
    let view = Mat4::look_at_rh(eye, centre, up);
    let mut proj = Mat4::orthographic_rh(
        -radius,
        radius,
        -radius,
        radius,
        0.0,
        2.0 * radius + CASTER_MARGIN,
    );

    let half_res = resolution as f32 * 0.5;
    let origin = (proj * view).project_point3(Vec3::ZERO);
    let texel = glam::Vec2::new(origin.x, origin.y) * half_res;
    let offset = (texel.round() - texel) / half_res;
    proj.w_axis.x += offset.x;
    proj.w_axis.y += offset.y;
    proj * view
}

/// The three sun shadow maps shared by every pipeline instance.
#[derive(Debug, Default)]
pub struct SunShadows {
    maps: Option<[TargetId; SHADOW_CASCADES]>,
    resolution: u32,
    listener: ShadowCasterListener,
    valid: bool,
}

impl SunShadows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maps(&self) -> Option<[TargetId; SHADOW_CASCADES]> {
        self.maps
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Whether the maps hold casters for the current frame.
    pub fn is_valid(&self) -> bool {
        self.valid && self.maps.is_some()
    }

    pub fn view_proj(&self) -> [Mat4; SHADOW_CASCADES] {
        self.listener.view_proj()
    }

    pub fn listener_mut(&mut self) -> &mut ShadowCasterListener {
        &mut self.listener
    }

    fn ensure_maps(&mut self, device: &mut dyn RenderDevice, resolution: u32) -> Result<()> {
        if self.maps.is_some() && self.resolution == resolution {
            return Ok(());
        }
        self.release(device);
        let mut maps = [TargetId(0); SHADOW_CASCADES];
        for i in 0..SHADOW_CASCADES {
            let desc = TargetDesc::new(
                format!("shadow map {i}"),
                resolution,
                resolution,
                TargetFormat::Depth32Float,
            );
            match device.create_target(&desc) {
                Ok(id) => maps[i] = id,
                Err(e) => {
                    for &id in &maps[..i] {
                        device.destroy_target(id);
                    }
                    return Err(e);
                }
            }
        }
        info!("Created {SHADOW_CASCADES} shadow maps at {resolution}x{resolution}");
        self.maps = Some(maps);
        self.resolution = resolution;
        Ok(())
    }

    /// Draw the sun's casters into each cascade.
    pub fn render(
        &mut self,
        device: &mut dyn RenderDevice,
        scene: &SceneGraph,
        camera: &Camera,
        sun_direction: Vec3,
        options: &GfxOptions,
    ) -> Result<DrawStats> {
        self.valid = false;
        let mut stats = DrawStats::default();
        if !options.bool(GfxBoolOption::ShadowCast) {
            return Ok(stats);
        }
        let resolution = options.int(GfxIntOption::ShadowRes) as u32;
        self.ensure_maps(device, resolution)?;
        let Some(maps) = self.maps else {
            return Ok(stats);
        };
        for (i, (start, end)) in cascade_ranges(options).into_iter().enumerate() {
            let view_proj = cascade_view_proj(camera, sun_direction, start, end, resolution);
            self.listener
                .shadow_texture_caster_pre_view_proj(ShadowCaster::Sun, i, view_proj)?;
            device.begin_pass(
                &PassDesc::new(format!("shadow cascade {i}")).depth(maps[i], Some(1.0), false),
            )?;
            let drawn = scene.draw_shadow_casters(device, view_proj);
            device.end_pass()?;
            stats += drawn?;
        }
        debug!("Shadow casters: {} batches", stats.batches);
        self.valid = true;
        Ok(stats)
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(maps) = self.maps.take() {
            for map in maps {
                device.destroy_target(map);
            }
        }
        self.valid = false;
    }
}

//! HDR bloom and tonemap.
//!
//! The HDR scene sits in buffer 0. Bloom ping-pongs between buffers 1 and 2,
//! halving the active viewport after every vertical blur, and the last pass
//! adds the blurred bright regions back onto buffer 0 while tonemapping into
//! the destination.

use ember_gpu_shared::tonemap::blur_weights_packed;
use ember_gpu_shared::uniforms::CompositeUniforms;
use log::debug;

use crate::device::{
    BlendMode, ColourMask, DrawCall, DrawState, DrawStats, Geometry, PassDesc, PixelRect,
    RenderDevice, TargetId, TextureBinding,
};
use crate::error::Result;
use crate::options::{GfxFloatOption, GfxIntOption, GfxOptions};
use crate::scene::SceneEnvironment;
use crate::shader_db::{
    EXPOSURE_FILTER_THEN_HORZ_BLUR, HORZ_BLUR, TONEMAP_ONLY, VERT_BLUR, VERT_BLUR_COMBINE_TONEMAP,
};

pub const HDR_BUFFERS: usize = 3;

/// Where a compositor step writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeDest {
    Hdr(usize),
    Target,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeStep {
    pub shader: &'static str,
    /// HDR buffer sampled.
    pub source: usize,
    /// Region of the source holding valid texels.
    pub source_dim: [u32; 2],
    pub dest: CompositeDest,
    pub dest_dim: [u32; 2],
}

fn halve(dim: [u32; 2]) -> [u32; 2] {
    dim.map(|d| (d / 2).max(1))
}

/// The passes for `iterations` bloom iterations over a `size` HDR scene.
pub fn plan(iterations: u32, size: [u32; 2]) -> Vec<CompositeStep> {
    let size = size.map(|d| d.max(1));
    if iterations == 0 {
        return vec![CompositeStep {
            shader: TONEMAP_ONLY,
            source: 0,
            source_dim: size,
            dest: CompositeDest::Target,
            dest_dim: size,
        }];
    }
    let mut steps = vec![CompositeStep {
        shader: EXPOSURE_FILTER_THEN_HORZ_BLUR,
        source: 0,
        source_dim: size,
        dest: CompositeDest::Hdr(1),
        dest_dim: size,
    }];
    let mut dim = size;
    for _ in 1..iterations {
        steps.push(CompositeStep {
            shader: VERT_BLUR,
            source: 1,
            source_dim: dim,
            dest: CompositeDest::Hdr(2),
            dest_dim: dim,
        });
        let half = halve(dim);
        steps.push(CompositeStep {
            shader: HORZ_BLUR,
            source: 2,
            source_dim: dim,
            dest: CompositeDest::Hdr(1),
            dest_dim: half,
        });
        dim = half;
    }
    steps.push(CompositeStep {
        shader: VERT_BLUR_COMBINE_TONEMAP,
        source: 1,
        source_dim: dim,
        dest: CompositeDest::Target,
        dest_dim: size,
    });
    steps
}

/// Per-call parameters of [`composite`].
#[derive(Clone, Copy, Debug)]
pub struct CompositeParams {
    pub target: TargetId,
    /// Accumulate onto the target instead of replacing it.
    pub additive: bool,
    pub mask: ColourMask,
}

fn uniforms(
    step: &CompositeStep,
    texture_size: (u32, u32),
    env: &SceneEnvironment,
    options: &GfxOptions,
    has_lut: bool,
) -> CompositeUniforms {
    let tex = [texture_size.0.max(1) as f32, texture_size.1.max(1) as f32];
    let exposure = env.exposure.max(f32::EPSILON);
    CompositeUniforms {
        blur_weights: blur_weights_packed(),
        src_uv_scale: [
            step.source_dim[0] as f32 / tex[0],
            step.source_dim[1] as f32 / tex[1],
        ],
        src_texel: [1.0 / tex[0], 1.0 / tex[1]],
        exposure,
        saturation: env.saturation,
        bloom_threshold: options.float(GfxFloatOption::BloomThreshold) / exposure,
        has_lut: has_lut as u32,
    }
}

/// Run every compositor step from `hdr[0]` into `params.target`.
pub fn composite(
    device: &mut dyn RenderDevice,
    screen_quad: Geometry,
    hdr: [TargetId; HDR_BUFFERS],
    env: &SceneEnvironment,
    options: &GfxOptions,
    params: CompositeParams,
) -> Result<DrawStats> {
    let texture_size = device.target_size(hdr[0])?;
    let iterations = options.int(GfxIntOption::BloomIterations).max(0) as u32;
    let steps = plan(iterations, [texture_size.0, texture_size.1]);
    let lut = env.colour_grade_lut.texture();
    let mut stats = DrawStats::default();
    debug!("Compositing {} passes", steps.len());

    for step in &steps {
        let (target, clear, state) = match step.dest {
            CompositeDest::Hdr(i) => (hdr[i], Some([0.0, 0.0, 0.0, 1.0]), DrawState::FULLSCREEN),
            CompositeDest::Target => {
                let blend = if params.additive {
                    BlendMode::Add
                } else {
                    BlendMode::Replace
                };
                let clear = (!params.additive).then_some([0.0, 0.0, 0.0, 1.0]);
                let state = DrawState::FULLSCREEN
                    .with_blend(blend)
                    .with_mask(params.mask);
                (params.target, clear, state)
            }
        };
        let block = uniforms(step, texture_size, env, options, lut.is_some());
        let textures = [
            Some(TextureBinding::Target(hdr[step.source])),
            Some(TextureBinding::Target(hdr[0])),
            lut.map(TextureBinding::Texture),
        ];
        device.begin_pass(&PassDesc::new(step.shader).colour(target, clear))?;
        let drawn = device.draw(&DrawCall {
            shader: step.shader,
            state,
            uniforms: bytemuck::bytes_of(&block),
            textures: &textures,
            geometry: screen_quad,
            viewport: Some(PixelRect::sized(step.dest_dim[0], step.dest_dim[1])),
        });
        device.end_pass()?;
        stats += drawn?;
    }
    Ok(stats)
}

//! Dual-eye camera parameters.
//!
//! Depth perception is mapped from the viewer's physical setup: a point at
//! `MaxPerceivedDepth` metres (world infinity) and one at `MinPerceivedDepth`
//! metres (the near clip) produce the on-screen parallax a real object at
//! that distance behind the display would.

use crate::device::ColourMask;
use crate::options::{GfxBoolOption, GfxFloatOption, GfxOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

/// How the two eyes reach the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StereoMode {
    Mono,
    /// Both eyes over the full viewport, separated by colour masks.
    Anaglyph,
    /// Eyes side by side; `swapped` puts the right eye on the left half.
    SideBySide { swapped: bool },
}

impl StereoMode {
    pub fn from_options(options: &GfxOptions) -> Self {
        if !options.bool(GfxBoolOption::Stereoscopic) {
            StereoMode::Mono
        } else if options.bool(GfxBoolOption::Anaglyph) {
            StereoMode::Anaglyph
        } else {
            StereoMode::SideBySide {
                swapped: options.bool(GfxBoolOption::CrossEye),
            }
        }
    }

    pub fn eye_count(self) -> usize {
        match self {
            StereoMode::Mono => 1,
            _ => 2,
        }
    }
}

/// Offsets of one eye relative to the mono camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeParams {
    /// Horizontal frustum shift in tangent units.
    pub frustum_offset: f32,
    /// Camera displacement along its right axis, world units.
    pub camera_offset: f32,
    pub mask: ColourMask,
}

impl EyeParams {
    pub const MONO: EyeParams = EyeParams {
        frustum_offset: 0.0,
        camera_offset: 0.0,
        mask: ColourMask::ALL,
    };
}

/// Frustum offset (tangent units) and camera separation (world units)
/// shared by both eyes.
pub fn stereo_separation(options: &GfxOptions) -> (f32, f32) {
    let fov = options.float(GfxFloatOption::Fov).to_radians();
    let monitor_height = options.float(GfxFloatOption::MonitorHeight);
    let distance = options.float(GfxFloatOption::MonitorEyeDistance);
    let eye_separation = options.float(GfxFloatOption::EyeSeparation);
    let min_depth = options.float(GfxFloatOption::MinPerceivedDepth);
    let max_depth = options.float(GfxFloatOption::MaxPerceivedDepth);
    let near = options.float(GfxFloatOption::NearClip);

    // Physical parallax on the display, then converted to tangent units.
    let parallax_max = eye_separation * (1.0 - distance / max_depth);
    let parallax_min = eye_separation * (1.0 - distance / min_depth);
    let to_tangent = 2.0 * (fov * 0.5).tan() / monitor_height;
    let s_inf = parallax_max * to_tangent;
    let s_min = parallax_min * to_tangent;

    (s_inf * 0.5, (s_inf - s_min) * near)
}

fn anaglyph_mask(options: &GfxOptions, eye: Eye) -> ColourMask {
    let (r, g, b) = match eye {
        Eye::Left => (
            GfxBoolOption::AnaglyphLeftRedMask,
            GfxBoolOption::AnaglyphLeftGreenMask,
            GfxBoolOption::AnaglyphLeftBlueMask,
        ),
        Eye::Right => (
            GfxBoolOption::AnaglyphRightRedMask,
            GfxBoolOption::AnaglyphRightGreenMask,
            GfxBoolOption::AnaglyphRightBlueMask,
        ),
    };
    ColourMask {
        red: options.bool(r),
        green: options.bool(g),
        blue: options.bool(b),
        alpha: true,
    }
}

pub fn eye_params(options: &GfxOptions, eye: Eye) -> EyeParams {
    let mode = StereoMode::from_options(options);
    if mode == StereoMode::Mono {
        return EyeParams::MONO;
    }
    let (frustum, separation) = stereo_separation(options);
    let sign = match eye {
        Eye::Left => 1.0,
        Eye::Right => -1.0,
    };
    EyeParams {
        frustum_offset: sign * frustum,
        camera_offset: -sign * separation * 0.5,
        mask: match mode {
            StereoMode::Anaglyph => anaglyph_mask(options, eye),
            _ => ColourMask::ALL,
        },
    }
}

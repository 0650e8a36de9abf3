//! Typed option store.
//!
//! Every tunable the pipeline reads is keyed by one of the three option
//! enums. Setters validate against the key's range; getters never fail.

use crate::error::{GfxError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxBoolOption {
    Stereoscopic,
    Anaglyph,
    /// Swap the eyes of side-by-side stereo.
    CrossEye,
    /// Bloom and tonemap through the HDR buffers.
    PostProcessing,
    Particles,
    PointLights,
    Sky,
    FirstPerson,
    Decals,
    Tracers,
    ShadowReceive,
    ShadowCast,
    AnaglyphLeftRedMask,
    AnaglyphLeftGreenMask,
    AnaglyphLeftBlueMask,
    AnaglyphRightRedMask,
    AnaglyphRightGreenMask,
    AnaglyphRightBlueMask,
}

impl GfxBoolOption {
    pub const ALL: [GfxBoolOption; 18] = [
        GfxBoolOption::Stereoscopic,
        GfxBoolOption::Anaglyph,
        GfxBoolOption::CrossEye,
        GfxBoolOption::PostProcessing,
        GfxBoolOption::Particles,
        GfxBoolOption::PointLights,
        GfxBoolOption::Sky,
        GfxBoolOption::FirstPerson,
        GfxBoolOption::Decals,
        GfxBoolOption::Tracers,
        GfxBoolOption::ShadowReceive,
        GfxBoolOption::ShadowCast,
        GfxBoolOption::AnaglyphLeftRedMask,
        GfxBoolOption::AnaglyphLeftGreenMask,
        GfxBoolOption::AnaglyphLeftBlueMask,
        GfxBoolOption::AnaglyphRightRedMask,
        GfxBoolOption::AnaglyphRightGreenMask,
        GfxBoolOption::AnaglyphRightBlueMask,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GfxBoolOption::Stereoscopic => "STEREOSCOPIC",
            GfxBoolOption::Anaglyph => "ANAGLYPH",
            GfxBoolOption::CrossEye => "CROSS_EYE",
            GfxBoolOption::PostProcessing => "POST_PROCESSING",
            GfxBoolOption::Particles => "RENDER_PARTICLES",
            GfxBoolOption::PointLights => "POINT_LIGHTS",
            GfxBoolOption::Sky => "RENDER_SKY",
            GfxBoolOption::FirstPerson => "RENDER_FIRST_PERSON",
            GfxBoolOption::Decals => "RENDER_DECALS",
            GfxBoolOption::Tracers => "RENDER_TRACERS",
            GfxBoolOption::ShadowReceive => "SHADOW_RECEIVE",
            GfxBoolOption::ShadowCast => "SHADOW_CAST",
            GfxBoolOption::AnaglyphLeftRedMask => "ANAGLYPH_LEFT_RED_MASK",
            GfxBoolOption::AnaglyphLeftGreenMask => "ANAGLYPH_LEFT_GREEN_MASK",
            GfxBoolOption::AnaglyphLeftBlueMask => "ANAGLYPH_LEFT_BLUE_MASK",
            GfxBoolOption::AnaglyphRightRedMask => "ANAGLYPH_RIGHT_RED_MASK",
            GfxBoolOption::AnaglyphRightGreenMask => "ANAGLYPH_RIGHT_GREEN_MASK",
            GfxBoolOption::AnaglyphRightBlueMask => "ANAGLYPH_RIGHT_BLUE_MASK",
        }
    }

    fn default_value(self) -> bool {
        match self {
            GfxBoolOption::Stereoscopic | GfxBoolOption::Anaglyph | GfxBoolOption::CrossEye => {
                false
            }
            GfxBoolOption::AnaglyphLeftRedMask => true,
            GfxBoolOption::AnaglyphLeftGreenMask | GfxBoolOption::AnaglyphLeftBlueMask => false,
            GfxBoolOption::AnaglyphRightRedMask => false,
            GfxBoolOption::AnaglyphRightGreenMask | GfxBoolOption::AnaglyphRightBlueMask => true,
            _ => true,
        }
    }

    /// Options whose change invalidates the eye pipelines.
    pub fn resets_framebuffer(self) -> bool {
        matches!(
            self,
            GfxBoolOption::Stereoscopic | GfxBoolOption::Anaglyph | GfxBoolOption::CrossEye
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxIntOption {
    BloomIterations,
    ShadowRes,
    DebugMode,
}

impl GfxIntOption {
    pub const ALL: [GfxIntOption; 3] = [
        GfxIntOption::BloomIterations,
        GfxIntOption::ShadowRes,
        GfxIntOption::DebugMode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GfxIntOption::BloomIterations => "BLOOM_ITERATIONS",
            GfxIntOption::ShadowRes => "SHADOW_RES",
            GfxIntOption::DebugMode => "DEBUG_MODE",
        }
    }

    fn default_value(self) -> i32 {
        match self {
            GfxIntOption::BloomIterations => 1,
            GfxIntOption::ShadowRes => 1024,
            GfxIntOption::DebugMode => 0,
        }
    }

    fn range(self) -> (i32, i32) {
        match self {
            GfxIntOption::BloomIterations => (0, 16),
            GfxIntOption::ShadowRes => (64, 8192),
            GfxIntOption::DebugMode => (0, 8),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxFloatOption {
    /// Vertical field of view in degrees.
    Fov,
    NearClip,
    FarClip,
    BloomThreshold,
    /// Shadow filter spread in shadow-map texels.
    ShadowFactor,
    ShadowEnd0,
    ShadowEnd1,
    ShadowEnd2,
    ShadowFadeStart,
    /// Distance between the viewer's eyes, metres.
    EyeSeparation,
    /// Physical height of the display, metres.
    MonitorHeight,
    /// Distance from the viewer to the display, metres.
    MonitorEyeDistance,
    MinPerceivedDepth,
    MaxPerceivedDepth,
}

impl GfxFloatOption {
    pub const ALL: [GfxFloatOption; 14] = [
        GfxFloatOption::Fov,
        GfxFloatOption::NearClip,
        GfxFloatOption::FarClip,
        GfxFloatOption::BloomThreshold,
        GfxFloatOption::ShadowFactor,
        GfxFloatOption::ShadowEnd0,
        GfxFloatOption::ShadowEnd1,
        GfxFloatOption::ShadowEnd2,
        GfxFloatOption::ShadowFadeStart,
        GfxFloatOption::EyeSeparation,
        GfxFloatOption::MonitorHeight,
        GfxFloatOption::MonitorEyeDistance,
        GfxFloatOption::MinPerceivedDepth,
        GfxFloatOption::MaxPerceivedDepth,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GfxFloatOption::Fov => "FOV",
            GfxFloatOption::NearClip => "NEAR_CLIP",
            GfxFloatOption::FarClip => "FAR_CLIP",
            GfxFloatOption::BloomThreshold => "BLOOM_THRESHOLD",
            GfxFloatOption::ShadowFactor => "SHADOW_FACTOR",
            GfxFloatOption::ShadowEnd0 => "SHADOW_END0",
            GfxFloatOption::ShadowEnd1 => "SHADOW_END1",
            GfxFloatOption::ShadowEnd2 => "SHADOW_END2",
            GfxFloatOption::ShadowFadeStart => "SHADOW_FADE_START",
            GfxFloatOption::EyeSeparation => "EYE_SEPARATION",
            GfxFloatOption::MonitorHeight => "MONITOR_HEIGHT",
            GfxFloatOption::MonitorEyeDistance => "MONITOR_EYE_DISTANCE",
            GfxFloatOption::MinPerceivedDepth => "MIN_PERCEIVED_DEPTH",
            GfxFloatOption::MaxPerceivedDepth => "MAX_PERCEIVED_DEPTH",
        }
    }

    fn default_value(self) -> f32 {
        match self {
            GfxFloatOption::Fov => 55.0,
            GfxFloatOption::NearClip => 0.355,
            GfxFloatOption::FarClip => 1000.0,
            GfxFloatOption::BloomThreshold => 1.0,
            GfxFloatOption::ShadowFactor => 1.5,
            GfxFloatOption::ShadowEnd0 => 15.0,
            GfxFloatOption::ShadowEnd1 => 50.0,
            GfxFloatOption::ShadowEnd2 => 200.0,
            GfxFloatOption::ShadowFadeStart => 150.0,
            GfxFloatOption::EyeSeparation => 0.06,
            GfxFloatOption::MonitorHeight => 0.27,
            GfxFloatOption::MonitorEyeDistance => 0.6,
            GfxFloatOption::MinPerceivedDepth => 0.3,
            GfxFloatOption::MaxPerceivedDepth => 2.0,
        }
    }

    fn range(self) -> (f32, f32) {
        match self {
            GfxFloatOption::Fov => (1.0, 179.0),
            GfxFloatOption::NearClip => (0.0001, 10_000.0),
            GfxFloatOption::FarClip => (0.01, 100_000.0),
            GfxFloatOption::BloomThreshold => (0.0, 1000.0),
            GfxFloatOption::ShadowFactor => (0.0, 100.0),
            GfxFloatOption::ShadowEnd0
            | GfxFloatOption::ShadowEnd1
            | GfxFloatOption::ShadowEnd2
            | GfxFloatOption::ShadowFadeStart => (0.0, 100_000.0),
            GfxFloatOption::EyeSeparation => (0.0, 1.0),
            GfxFloatOption::MonitorHeight | GfxFloatOption::MonitorEyeDistance => (0.01, 100.0),
            GfxFloatOption::MinPerceivedDepth | GfxFloatOption::MaxPerceivedDepth => {
                (0.01, 1000.0)
            }
        }
    }
}

/// Current value of every option.
#[derive(Clone, Debug, PartialEq)]
pub struct GfxOptions {
    bools: [bool; GfxBoolOption::ALL.len()],
    ints: [i32; GfxIntOption::ALL.len()],
    floats: [f32; GfxFloatOption::ALL.len()],
}

impl Default for GfxOptions {
    fn default() -> Self {
        Self {
            bools: GfxBoolOption::ALL.map(GfxBoolOption::default_value),
            ints: GfxIntOption::ALL.map(GfxIntOption::default_value),
            floats: GfxFloatOption::ALL.map(GfxFloatOption::default_value),
        }
    }
}

impl GfxOptions {
    pub fn bool(&self, o: GfxBoolOption) -> bool {
        self.bools[o as usize]
    }

    pub fn int(&self, o: GfxIntOption) -> i32 {
        self.ints[o as usize]
    }

    pub fn float(&self, o: GfxFloatOption) -> f32 {
        self.floats[o as usize]
    }

    /// Returns whether the value changed.
    pub fn set_bool(&mut self, o: GfxBoolOption, v: bool) -> bool {
        let old = std::mem::replace(&mut self.bools[o as usize], v);
        old != v
    }

    pub fn set_int(&mut self, o: GfxIntOption, v: i32) -> Result<bool> {
        let (min, max) = o.range();
        if v < min || v > max {
            return Err(GfxError::InvalidOption {
                option: o.name(),
                value: v.to_string(),
            });
        }
        let old = std::mem::replace(&mut self.ints[o as usize], v);
        Ok(old != v)
    }

    pub fn set_float(&mut self, o: GfxFloatOption, v: f32) -> Result<bool> {
        let (min, max) = o.range();
        let invalid = || GfxError::InvalidOption {
            option: o.name(),
            value: v.to_string(),
        };
        if !v.is_finite() || v < min || v > max {
            return Err(invalid());
        }
        let clip_order_broken = match o {
            GfxFloatOption::NearClip => v >= self.float(GfxFloatOption::FarClip),
            GfxFloatOption::FarClip => v <= self.float(GfxFloatOption::NearClip),
            _ => false,
        };
        if clip_order_broken {
            return Err(invalid());
        }
        let old = std::mem::replace(&mut self.floats[o as usize], v);
        Ok(old != v)
    }

    pub fn find_bool(name: &str) -> Option<GfxBoolOption> {
        GfxBoolOption::ALL.into_iter().find(|o| o.name() == name)
    }

    pub fn find_int(name: &str) -> Option<GfxIntOption> {
        GfxIntOption::ALL.into_iter().find(|o| o.name() == name)
    }

    pub fn find_float(name: &str) -> Option<GfxFloatOption> {
        GfxFloatOption::ALL.into_iter().find(|o| o.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_discriminants_index_tables() {
        for (i, o) in GfxBoolOption::ALL.iter().enumerate() {
            assert_eq!(*o as usize, i);
        }
        for (i, o) in GfxIntOption::ALL.iter().enumerate() {
            assert_eq!(*o as usize, i);
        }
        for (i, o) in GfxFloatOption::ALL.iter().enumerate() {
            assert_eq!(*o as usize, i);
        }
    }

    #[test]
    fn test_defaults_within_range() {
        let opts = GfxOptions::default();
        for o in GfxIntOption::ALL {
            let (min, max) = o.range();
            assert!((min..=max).contains(&opts.int(o)), "{}", o.name());
        }
        for o in GfxFloatOption::ALL {
            let (min, max) = o.range();
            assert!((min..=max).contains(&opts.float(o)), "{}", o.name());
        }
        assert!(opts.bool(GfxBoolOption::PostProcessing));
        assert!(!opts.bool(GfxBoolOption::Stereoscopic));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut opts = GfxOptions::default();
        assert!(opts.set_int(GfxIntOption::DebugMode, 9).is_err());
        assert!(opts.set_int(GfxIntOption::BloomIterations, -1).is_err());
        assert!(opts.set_float(GfxFloatOption::Fov, f32::NAN).is_err());
        assert_eq!(opts.int(GfxIntOption::DebugMode), 0);
    }

    #[test]
    fn test_clip_planes_stay_ordered() {
        let mut opts = GfxOptions::default();
        assert!(opts.set_float(GfxFloatOption::NearClip, 2000.0).is_err());
        assert!(opts.set_float(GfxFloatOption::FarClip, 0.1).is_err());
        assert!(opts.set_float(GfxFloatOption::FarClip, 500.0).unwrap());
    }

    #[test]
    fn test_set_reports_change() {
        let mut opts = GfxOptions::default();
        assert!(!opts.set_bool(GfxBoolOption::Sky, true));
        assert!(opts.set_bool(GfxBoolOption::Sky, false));
        assert!(opts.set_int(GfxIntOption::BloomIterations, 3).unwrap());
        assert!(!opts.set_int(GfxIntOption::BloomIterations, 3).unwrap());
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(GfxOptions::find_int("SHADOW_RES"), Some(GfxIntOption::ShadowRes));
        assert_eq!(GfxOptions::find_float("FOV"), Some(GfxFloatOption::Fov));
        assert_eq!(GfxOptions::find_bool("NOPE"), None);
    }
}

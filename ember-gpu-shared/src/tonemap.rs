//! CPU reference of the compositor colour math.
//!
//! `shaders/compositor.wgsl` implements the same functions; the constants
//! here are uploaded through [`CompositeUniforms`](crate::uniforms::CompositeUniforms)
//! so the kernel has a single source of truth.

/// Display gamma used by [`gamma_encode`].
pub const GAMMA: f32 = 2.2;

/// Edge length of the colour-grade lookup cube.
pub const LUT_SIZE: usize = 32;

/// Pascal's triangle row (centre outwards) the bloom kernel is built from.
pub const BLUR_ROW: [f32; 6] = [252.0, 210.0, 120.0, 45.0, 10.0, 1.0];

/// One-sided sum of [`BLUR_ROW`].
pub const BLUR_ROW_TOTAL: f32 = 638.0;

/// Taps either side of the centre; the kernel covers offsets -4..=4.
pub const BLUR_TAPS: i32 = 4;

/// Sum of the row weights the 9-tap kernel actually covers.
pub fn blur_kernel_total() -> f32 {
    let side: f32 = BLUR_ROW[1..=BLUR_TAPS as usize].iter().sum();
    BLUR_ROW[0] + 2.0 * side
}

/// Normalised weight of the tap at `offset` pixels from the centre.
pub fn blur_weight(offset: i32) -> f32 {
    if offset.abs() > BLUR_TAPS {
        return 0.0;
    }
    BLUR_ROW[offset.unsigned_abs() as usize] / blur_kernel_total()
}

/// Kernel weights packed for the `blur_weights` uniform (index = |offset|).
pub fn blur_weights_packed() -> [[f32; 4]; 2] {
    let mut packed = [[0.0; 4]; 2];
    for i in 0..=BLUR_TAPS {
        packed[i as usize / 4][i as usize % 4] = blur_weight(i);
    }
    packed
}

/// `c / (1 + c)` per channel.
pub fn tonemap(c: [f32; 3]) -> [f32; 3] {
    c.map(|x| x / (1.0 + x))
}

pub fn gamma_encode(c: [f32; 3]) -> [f32; 3] {
    c.map(|x| x.max(0.0).powf(1.0 / GAMMA))
}

/// Texel-centre-correct lookup coordinate for a colour channel in [0, 1].
pub fn lut_coordinate(c: f32) -> f32 {
    (c * (LUT_SIZE as f32 - 1.0) + 0.5) / LUT_SIZE as f32
}

/// Lerp towards the channel mean; `saturation` 1 leaves the colour unchanged.
pub fn desaturate(c: [f32; 3], saturation: f32) -> [f32; 3] {
    let grey = (c[0] + c[1] + c[2]) / 3.0;
    c.map(|x| grey + (x - grey) * saturation)
}

/// Thresholded bright-pass: keeps the part of each channel above `threshold`.
pub fn bloom_filter(c: [f32; 3], threshold: f32) -> [f32; 3] {
    c.map(|x| x * (x - threshold).clamp(0.0, 1.0))
}

/// A 32x32x32 colour-grade cube, red fastest, then green, then blue.
#[derive(Clone, Debug, PartialEq)]
pub struct ColourGradeLut {
    texels: Vec<[f32; 3]>,
}

impl ColourGradeLut {
    /// The cube that maps every colour onto itself.
    pub fn identity() -> Self {
        let n = LUT_SIZE;
        let scale = 1.0 / (n as f32 - 1.0);
        let mut texels = Vec::with_capacity(n * n * n);
        for b in 0..n {
            for g in 0..n {
                for r in 0..n {
                    texels.push([r as f32 * scale, g as f32 * scale, b as f32 * scale]);
                }
            }
        }
        Self { texels }
    }

    /// Build from an RGB8 strip of 32 slices (blue) of 32x32 (red across,
    /// green down), i.e. a 1024x32 image.
    pub fn from_rgb8_strip(width: u32, height: u32, rgb: &[u8]) -> Option<Self> {
        let n = LUT_SIZE;
        if width as usize != n * n || height as usize != n || rgb.len() != n * n * n * 3 {
            return None;
        }
        let mut texels = vec![[0.0; 3]; n * n * n];
        for y in 0..n {
            for x in 0..n * n {
                let (b, r, g) = (x / n, x % n, y);
                let src = (y * n * n + x) * 3;
                texels[(b * n + g) * n + r] = [
                    rgb[src] as f32 / 255.0,
                    rgb[src + 1] as f32 / 255.0,
                    rgb[src + 2] as f32 / 255.0,
                ];
            }
        }
        Some(Self { texels })
    }

    /// RGBA8 texels in upload order (x = red, y = green, z = blue).
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.texels.len() * 4);
        for t in &self.texels {
            for c in t {
                out.push((c.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
            out.push(255);
        }
        out
    }

    fn texel(&self, r: usize, g: usize, b: usize) -> [f32; 3] {
        self.texels[(b * LUT_SIZE + g) * LUT_SIZE + r]
    }

    /// Trilinear sample at `c` using the same texel-centre addressing as the shader.
    pub fn sample(&self, c: [f32; 3]) -> [f32; 3] {
        let max = LUT_SIZE as f32 - 1.0;
        // lut_coordinate(x) * LUT_SIZE - 0.5 == x * (LUT_SIZE - 1)
        let pos = c.map(|x| {
            (lut_coordinate(x.clamp(0.0, 1.0)) * LUT_SIZE as f32 - 0.5).clamp(0.0, max)
        });
        let lo = pos.map(|p| p.floor() as usize);
        let hi = lo.map(|i| (i + 1).min(LUT_SIZE - 1));
        let f = [pos[0] - lo[0] as f32, pos[1] - lo[1] as f32, pos[2] - lo[2] as f32];

        let lerp = |a: [f32; 3], b: [f32; 3], t: f32| -> [f32; 3] {
            [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t, a[2] + (b[2] - a[2]) * t]
        };
        let c00 = lerp(self.texel(lo[0], lo[1], lo[2]), self.texel(hi[0], lo[1], lo[2]), f[0]);
        let c10 = lerp(self.texel(lo[0], hi[1], lo[2]), self.texel(hi[0], hi[1], lo[2]), f[0]);
        let c01 = lerp(self.texel(lo[0], lo[1], hi[2]), self.texel(hi[0], lo[1], hi[2]), f[0]);
        let c11 = lerp(self.texel(lo[0], hi[1], hi[2]), self.texel(hi[0], hi[1], hi[2]), f[0]);
        lerp(lerp(c00, c10, f[1]), lerp(c01, c11, f[1]), f[2])
    }
}

/// Colour grading; the identity when no lookup cube is bound.
pub fn colour_grade_look_up(c: [f32; 3], lut: Option<&ColourGradeLut>) -> [f32; 3] {
    match lut {
        Some(lut) => lut.sample(c),
        None => c,
    }
}

/// Exposure, tonemap, gamma, colour grade and desaturation, in that order.
pub fn tonemap_pixel(
    hdr: [f32; 3],
    exposure: f32,
    saturation: f32,
    lut: Option<&ColourGradeLut>,
) -> [f32; 3] {
    let exposed = hdr.map(|x| x * exposure);
    let graded = colour_grade_look_up(gamma_encode(tonemap(exposed)), lut);
    desaturate(graded, saturation)
}

use bytemuck::{Pod, Zeroable};

/// Number of sun shadow cascades bound by the deferred lighting pass.
pub const SHADOW_CASCADES: usize = 3;

/// Per-frame uniforms of the deferred lighting programs, binding 0 of both
/// `DeferredAmbientSun` and `DeferredLights`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DeferredUniforms {
    /// Used by the light-volume vertex stage.
    pub view_proj: [[f32; 4]; 4],
    /// World-space vectors from the camera to the far-plane corners:
    /// top-left, top-right, bottom-left, bottom-right.
    pub frustum_rays: [[f32; 4]; 4],
    pub shadow_view_proj: [[[f32; 4]; 4]; SHADOW_CASCADES],
    /// xyz = camera position, w = far clip distance.
    pub camera_pos: [f32; 4],
    /// width, height, 1/width, 1/height of the lit viewport.
    pub viewport_size: [f32; 4],
    pub sun_direction: [f32; 4],
    pub sun_diffuse: [f32; 4],
    pub sun_specular: [f32; 4],
    /// rgb = ambient colour, w = env cube cross-fade (0 = cube 0, 1 = cube 1).
    pub ambient: [f32; 4],
    /// rgb = fog colour, w = fog density.
    pub fog: [f32; 4],
    /// x = shadow factor, y = fade start, z = shadow map resolution, w = receive (0/1).
    pub shadow_params: [f32; 4],
    /// xyz = cascade end distances, w = shadow noise bound (0/1).
    pub shadow_splits: [f32; 4],
    /// Pixel rectangle (x0, y0, x1, y1) of the shadow-map debug views.
    pub debug_rect: [f32; 4],
    /// x = debug mode, y = env cube mask (bit 0 = cube 0, bit 1 = cube 1),
    /// z = env cube mip count, w = unused.
    pub flags: [u32; 4],
    /// x = animation time, yzw = unused.
    pub time: [f32; 4],
}

/// Screen-quad vertex, clip-space xy.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ScreenQuadVertex {
    pub position: [f32; 2],
}

/// One vertex of a light bounding volume. Every field except `position` is
/// identical across the vertices of a light.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PointLightVertex {
    pub position: [f32; 3],
    pub light_direction: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub light_position: [f32; 3],
    /// inner cone cosine, outer cone cosine, range.
    pub light_params: [f32; 3],
}

/// Interleaved vertex of the reference G-buffer material.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Uniforms of the reference `GBufferStatic` material.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GBufferObjectUniforms {
    pub world: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    /// xyz = camera position, w = far clip distance.
    pub camera_pos: [f32; 4],
    /// xyz = camera forward axis.
    pub camera_forward: [f32; 4],
    /// rgb = diffuse, a unused.
    pub diffuse: [f32; 4],
    /// x = specular, y = gloss, z = shadow oblique cutoff.
    pub surface: [f32; 4],
}

/// Uniforms of the depth-only `ShadowCaster` program.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadowCasterUniforms {
    pub world_view_proj: [[f32; 4]; 4],
}

/// Uniforms shared by every compositor program.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CompositeUniforms {
    /// Blur weights for tap offsets 0..=7 (only 0..=4 are used).
    pub blur_weights: [[f32; 4]; 2],
    /// Fraction of the source texture covered by the active source viewport.
    pub src_uv_scale: [f32; 2],
    /// Size of one source texel in uv units.
    pub src_texel: [f32; 2],
    pub exposure: f32,
    pub saturation: f32,
    /// Bloom threshold already divided by the exposure.
    pub bloom_threshold: f32,
    pub has_lut: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<DeferredUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<GBufferObjectUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<CompositeUniforms>(), 64);
        assert_eq!(std::mem::size_of::<ShadowCasterUniforms>(), 64);
    }

    #[test]
    fn test_vertex_strides() {
        assert_eq!(std::mem::size_of::<ScreenQuadVertex>(), 8);
        assert_eq!(std::mem::size_of::<PointLightVertex>(), 72);
        assert_eq!(std::mem::size_of::<MeshVertex>(), 32);
    }
}

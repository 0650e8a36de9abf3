//! Embedded WGSL sources of the system programs.
//!
//! WGSL has no include mechanism, so programs that share declarations are
//! concatenated at compile time.

pub const SCREEN_QUAD_VERT: &str = include_str!("../shaders/screen_quad.wgsl");

pub const DEFERRED_AMBIENT_SUN_FRAG: &str = concat!(
    include_str!("../shaders/deferred_common.wgsl"),
    include_str!("../shaders/deferred_ambient_sun.wgsl"),
);

pub const DEFERRED_LIGHTS: &str = concat!(
    include_str!("../shaders/deferred_common.wgsl"),
    include_str!("../shaders/deferred_lights.wgsl"),
);

pub const COMPOSITOR_FRAG: &str = include_str!("../shaders/compositor.wgsl");

pub const GBUFFER_STATIC: &str = include_str!("../shaders/gbuffer_static.wgsl");

pub const SHADOW_CASTER: &str = include_str!("../shaders/shadow_caster.wgsl");

/// Swapchain blit used by windowed backends.
pub const PRESENT: &str = include_str!("../shaders/present.wgsl");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compositor_entry_points_present() {
        for entry in [
            "fs_tonemap_only",
            "fs_filter_then_horz_blur",
            "fs_vert_blur",
            "fs_horz_blur",
            "fs_vert_blur_combine_tonemap",
        ] {
            assert!(COMPOSITOR_FRAG.contains(&format!("fn {entry}(")), "{entry}");
        }
    }

    #[test]
    fn test_present_blit_needs_no_vertex_buffer() {
        assert!(PRESENT.contains("@builtin(vertex_index)"));
        assert!(PRESENT.contains("fn fs_main("));
    }

    #[test]
    fn test_deferred_programs_share_uniform_block() {
        assert!(DEFERRED_AMBIENT_SUN_FRAG.contains("struct DeferredUniforms"));
        assert!(DEFERRED_LIGHTS.contains("struct DeferredUniforms"));
        assert!(DEFERRED_LIGHTS.contains("fn vs_main("));
    }
}

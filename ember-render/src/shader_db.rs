//! Name-indexed database of GPU programs.

use std::collections::BTreeMap;

use ember_gpu_shared::shaders;
use ember_gpu_shared::uniforms::{
    CompositeUniforms, DeferredUniforms, GBufferObjectUniforms, ShadowCasterUniforms,
};
use log::{info, warn};

use crate::device::{RenderDevice, ShaderDesc, TextureKind, TextureSlot, VertexLayout};
use crate::error::{GfxError, Result};

pub const DEFERRED_AMBIENT_SUN: &str = "DeferredAmbientSun";
pub const DEFERRED_LIGHTS: &str = "DeferredLights";
pub const TONEMAP_ONLY: &str = "TonemapOnly";
pub const EXPOSURE_FILTER_THEN_HORZ_BLUR: &str = "ExposureFilterThenHorzBlur";
pub const VERT_BLUR: &str = "VertBlur";
pub const HORZ_BLUR: &str = "HorzBlur";
pub const VERT_BLUR_COMBINE_TONEMAP: &str = "VertBlurCombineTonemap";
pub const GBUFFER_STATIC: &str = "GBufferStatic";
pub const SHADOW_CASTER: &str = "ShadowCaster";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderPurpose {
    GBuffer,
    DeferredAmbientSun,
    DeferredLights,
    Compositor,
    ShadowCaster,
    /// Programs supplied by the material system.
    Material,
}

const fn gbuffer_slot(name: &'static str) -> TextureSlot {
    TextureSlot {
        name,
        kind: TextureKind::Float2d { filterable: false },
    }
}

fn ambient_sun_desc() -> ShaderDesc {
    let mut textures = vec![
        gbuffer_slot("gbuffer0"),
        gbuffer_slot("gbuffer1"),
        gbuffer_slot("gbuffer2"),
    ];
    for name in ["shadow_map0", "shadow_map1", "shadow_map2"] {
        textures.push(TextureSlot {
            name,
            kind: TextureKind::Depth2d,
        });
    }
    textures.push(TextureSlot {
        name: "shadow_noise",
        kind: TextureKind::Float2d { filterable: true },
    });
    for name in ["env_cube0", "env_cube1"] {
        textures.push(TextureSlot {
            name,
            kind: TextureKind::Cube,
        });
    }
    ShaderDesc {
        name: DEFERRED_AMBIENT_SUN.to_string(),
        vertex_source: shaders::SCREEN_QUAD_VERT,
        vertex_entry: "vs_main",
        fragment_source: Some(shaders::DEFERRED_AMBIENT_SUN_FRAG),
        fragment_entry: "fs_main",
        uniform_size: std::mem::size_of::<DeferredUniforms>() as u64,
        textures,
        linear_sampler: true,
        comparison_sampler: true,
        vertex_layout: VertexLayout::ScreenQuad,
    }
}

fn lights_desc() -> ShaderDesc {
    ShaderDesc {
        name: DEFERRED_LIGHTS.to_string(),
        vertex_source: shaders::DEFERRED_LIGHTS,
        vertex_entry: "vs_main",
        fragment_source: Some(shaders::DEFERRED_LIGHTS),
        fragment_entry: "fs_main",
        uniform_size: std::mem::size_of::<DeferredUniforms>() as u64,
        textures: vec![
            gbuffer_slot("gbuffer0"),
            gbuffer_slot("gbuffer1"),
            gbuffer_slot("gbuffer2"),
        ],
        linear_sampler: false,
        comparison_sampler: false,
        vertex_layout: VertexLayout::PointLight,
    }
}

fn compositor_desc(name: &str, entry: &'static str) -> ShaderDesc {
    ShaderDesc {
        name: name.to_string(),
        vertex_source: shaders::SCREEN_QUAD_VERT,
        vertex_entry: "vs_main",
        fragment_source: Some(shaders::COMPOSITOR_FRAG),
        fragment_entry: entry,
        uniform_size: std::mem::size_of::<CompositeUniforms>() as u64,
        textures: vec![
            TextureSlot {
                name: "source",
                kind: TextureKind::Float2d { filterable: true },
            },
            TextureSlot {
                name: "original",
                kind: TextureKind::Float2d { filterable: true },
            },
            TextureSlot {
                name: "colour_grade_lut",
                kind: TextureKind::D3,
            },
        ],
        linear_sampler: true,
        comparison_sampler: false,
        vertex_layout: VertexLayout::ScreenQuad,
    }
}

fn gbuffer_static_desc() -> ShaderDesc {
    ShaderDesc {
        name: GBUFFER_STATIC.to_string(),
        vertex_source: shaders::GBUFFER_STATIC,
        vertex_entry: "vs_main",
        fragment_source: Some(shaders::GBUFFER_STATIC),
        fragment_entry: "fs_main",
        uniform_size: std::mem::size_of::<GBufferObjectUniforms>() as u64,
        textures: Vec::new(),
        linear_sampler: false,
        comparison_sampler: false,
        vertex_layout: VertexLayout::Mesh,
    }
}

fn shadow_caster_desc() -> ShaderDesc {
    ShaderDesc {
        name: SHADOW_CASTER.to_string(),
        vertex_source: shaders::SHADOW_CASTER,
        vertex_entry: "vs_main",
        fragment_source: None,
        fragment_entry: "",
        uniform_size: std::mem::size_of::<ShadowCasterUniforms>() as u64,
        textures: Vec::new(),
        linear_sampler: false,
        comparison_sampler: false,
        vertex_layout: VertexLayout::Mesh,
    }
}

#[derive(Clone, Debug)]
struct ShaderEntry {
    purpose: ShaderPurpose,
    desc: ShaderDesc,
}

#[derive(Clone, Debug, Default)]
pub struct ShaderDatabase {
    shaders: BTreeMap<String, ShaderEntry>,
}

impl ShaderDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database holding every program the pipeline draws with.
    pub fn with_system_shaders() -> Self {
        let mut db = Self::new();
        db.insert(ShaderPurpose::DeferredAmbientSun, ambient_sun_desc());
        db.insert(ShaderPurpose::DeferredLights, lights_desc());
        for (name, entry) in [
            (TONEMAP_ONLY, "fs_tonemap_only"),
            (EXPOSURE_FILTER_THEN_HORZ_BLUR, "fs_filter_then_horz_blur"),
            (VERT_BLUR, "fs_vert_blur"),
            (HORZ_BLUR, "fs_horz_blur"),
            (VERT_BLUR_COMBINE_TONEMAP, "fs_vert_blur_combine_tonemap"),
        ] {
            db.insert(ShaderPurpose::Compositor, compositor_desc(name, entry));
        }
        db.insert(ShaderPurpose::GBuffer, gbuffer_static_desc());
        db.insert(ShaderPurpose::ShadowCaster, shadow_caster_desc());
        db
    }

    fn insert(&mut self, purpose: ShaderPurpose, desc: ShaderDesc) -> Option<ShaderDesc> {
        self.shaders
            .insert(desc.name.clone(), ShaderEntry { purpose, desc })
            .map(|old| old.desc)
    }

    /// Add or replace a program and build it on the device.
    pub fn add(
        &mut self,
        device: &mut dyn RenderDevice,
        purpose: ShaderPurpose,
        desc: ShaderDesc,
    ) -> Result<()> {
        device.register_shader(&desc)?;
        let name = desc.name.clone();
        if self.insert(purpose, desc).is_some() {
            info!("Replaced shader {name}");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ShaderDesc> {
        self.shaders
            .get(name)
            .map(|e| &e.desc)
            .ok_or_else(|| GfxError::UnknownShader(name.to_string()))
    }

    pub fn purpose(&self, name: &str) -> Option<ShaderPurpose> {
        self.shaders.get(name).map(|e| e.purpose)
    }

    pub fn names_with_purpose(&self, purpose: ShaderPurpose) -> Vec<&str> {
        self.shaders
            .iter()
            .filter(|(_, e)| e.purpose == purpose)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    /// Build every program on the device.
    pub fn build_all(&self, device: &mut dyn RenderDevice) -> Result<()> {
        for entry in self.shaders.values() {
            device.register_shader(&entry.desc)?;
        }
        info!("Built {} shaders", self.shaders.len());
        Ok(())
    }

    /// Rebuild every program; failures are logged and the old program kept.
    /// Returns the number that failed.
    pub fn reload(&self, device: &mut dyn RenderDevice) -> usize {
        let mut failed = 0;
        for (name, entry) in &self.shaders {
            if let Err(e) = device.register_shader(&entry.desc) {
                warn!("Reloading shader {name} failed: {e}");
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDevice;

    #[test]
    fn test_system_shaders_registered() {
        let db = ShaderDatabase::with_system_shaders();
        for name in [
            DEFERRED_AMBIENT_SUN,
            DEFERRED_LIGHTS,
            TONEMAP_ONLY,
            EXPOSURE_FILTER_THEN_HORZ_BLUR,
            VERT_BLUR,
            HORZ_BLUR,
            VERT_BLUR_COMBINE_TONEMAP,
            GBUFFER_STATIC,
            SHADOW_CASTER,
        ] {
            assert!(db.get(name).is_ok(), "{name}");
        }
        assert_eq!(db.names_with_purpose(ShaderPurpose::Compositor).len(), 5);
        assert!(matches!(db.get("Nope"), Err(GfxError::UnknownShader(_))));
    }

    #[test]
    fn test_schema_matches_bindings() {
        let db = ShaderDatabase::with_system_shaders();
        // 3 G-buffer layers, 3 cascades, noise, 2 env cubes.
        assert_eq!(db.get(DEFERRED_AMBIENT_SUN).unwrap().textures.len(), 9);
        assert_eq!(db.get(DEFERRED_LIGHTS).unwrap().textures.len(), 3);
        assert_eq!(db.get(TONEMAP_ONLY).unwrap().textures.len(), 3);
        assert!(db.get(SHADOW_CASTER).unwrap().fragment_source.is_none());
    }

    #[test]
    fn test_build_and_reload() {
        let db = ShaderDatabase::with_system_shaders();
        let mut device = RecordingDevice::new(4, 4);
        db.build_all(&mut device).unwrap();
        assert_eq!(device.shaders.len(), db.len());
        assert_eq!(db.reload(&mut device), 0);
    }

    #[test]
    fn test_add_material_replaces() {
        let mut db = ShaderDatabase::with_system_shaders();
        let mut device = RecordingDevice::new(4, 4);
        let mut desc = db.get(GBUFFER_STATIC).unwrap().clone();
        desc.name = "Rock".into();
        db.add(&mut device, ShaderPurpose::Material, desc.clone()).unwrap();
        db.add(&mut device, ShaderPurpose::Material, desc).unwrap();
        assert_eq!(db.purpose("Rock"), Some(ShaderPurpose::Material));
        assert!(device.shaders.contains_key("Rock"));
    }
}

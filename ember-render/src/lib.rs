//! Ember deferred renderer.
//!
//! Platform-independent frame logic: G-buffer fill, deferred sun and
//! point-light volumes, sun shadow cascades, bloom and tonemapping, and
//! stereo output. GPU work goes through the [`device::RenderDevice`] trait;
//! `ember-wgpu` provides the wgpu implementation.

pub mod camera;
pub mod compositor;
pub mod deferred;
pub mod device;
pub mod error;
pub mod gfx;
pub mod invocations;
pub mod options;
pub mod pipeline;
pub mod point_lights;
pub mod resources;
pub mod scene;
pub mod screen_quad;
pub mod shader_db;
pub mod shadow;
pub mod stats;
pub mod stereo;

#[cfg(test)]
mod recording;

pub use camera::{Camera, CameraOpts};
pub use device::RenderDevice;
pub use error::{GfxError, Result};
pub use gfx::Gfx;
pub use invocations::{SceneStage, SceneSubsystems, StageFrame};
pub use options::{GfxBoolOption, GfxFloatOption, GfxIntOption, GfxOptions};
pub use pipeline::GfxPipeline;
pub use scene::{SceneEnvironment, SceneGraph};
pub use stats::GfxLastFrameStats;

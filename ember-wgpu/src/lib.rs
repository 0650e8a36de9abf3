//! wgpu backend for the Ember deferred renderer.
//!
//! [`WgpuDevice`] implements [`ember_render::RenderDevice`], either on a
//! native window surface or headless for offscreen rendering and tests.

mod backend;
mod handle;
mod passes;
mod pipeline;
mod render_targets;

pub use backend::WgpuDevice;

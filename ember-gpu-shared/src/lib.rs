//! Data shared between the CPU side of the Ember pipeline and its WGSL programs.
//!
//! Every `#[repr(C)]` struct in [`uniforms`] mirrors a WGSL struct in
//! `shaders/`; [`tonemap`] is the CPU reference of the compositor math.

pub mod shaders;
pub mod tonemap;
pub mod uniforms;

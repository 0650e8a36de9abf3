//! Command encoding for recorded passes.

pub mod scene;

//! Error taxonomy of the pipeline.
//!
//! Engine-internal failures and graphics-API failures are kept apart so the
//! per-pass boundaries can report which layer broke. Only device creation is
//! fatal; everything else is absorbed at a pass or frame boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GfxError {
    /// Engine invariant violation (a binding that could not be resolved, a
    /// buffer written past its reservation, ...).
    #[error("engine error: {0}")]
    Engine(String),

    /// Failure reported by the underlying graphics API.
    #[error("graphics API error: {0}")]
    Api(String),

    /// The rendering device could not be created.
    #[error("failed to initialise rendering device: {0}")]
    DeviceInit(String),

    #[error("unknown shader: {0}")]
    UnknownShader(String),

    #[error("unknown render target: {0}")]
    UnknownTarget(u64),

    #[error("invalid value for option {option}: {value}")]
    InvalidOption { option: &'static str, value: String },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GfxError {
    /// Fatal errors end the application; all others are logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GfxError::DeviceInit(_))
    }
}

pub type Result<T> = std::result::Result<T, GfxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_device_init_is_fatal() {
        assert!(GfxError::DeviceInit("no adapter".into()).is_fatal());
        assert!(!GfxError::Api("lost".into()).is_fatal());
        assert!(!GfxError::Engine("bad bind".into()).is_fatal());
    }

    #[test]
    fn test_messages_name_the_layer() {
        assert_eq!(GfxError::Api("oom".into()).to_string(), "graphics API error: oom");
        assert_eq!(GfxError::Engine("x".into()).to_string(), "engine error: x");
    }
}

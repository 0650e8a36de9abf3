//! Disk-resource handles: environment cubes, the colour-grade LUT and the
//! shadow noise map.
//!
//! A handle may be empty or point at a resource that has not finished
//! loading. Use sites treat both as "feature off".

use std::path::Path;
use std::sync::Arc;

use ember_gpu_shared::tonemap::{ColourGradeLut, LUT_SIZE};
use image::{DynamicImage, GenericImageView};
use log::info;

use crate::device::{RenderDevice, TextureId, TextureUpload, UploadKind};
use crate::error::{GfxError, Result};

#[derive(Debug)]
pub struct DiskTexture {
    pub name: String,
    pub kind: UploadKind,
    pub width: u32,
    pub height: u32,
    texture: Option<TextureId>,
}

impl DiskTexture {
    /// A registered resource whose texels have not arrived yet.
    pub fn pending(name: impl Into<String>, kind: UploadKind) -> Self {
        Self {
            name: name.into(),
            kind,
            width: 0,
            height: 0,
            texture: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.texture.is_some()
    }
}

/// Shared, nullable reference to a disk texture.
#[derive(Clone, Debug, Default)]
pub struct TextureHandle(Option<Arc<DiskTexture>>);

impl TextureHandle {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(texture: DiskTexture) -> Self {
        Self(Some(Arc::new(texture)))
    }

    /// The GPU texture, if the handle is set and loaded.
    pub fn texture(&self) -> Option<TextureId> {
        self.0.as_ref().and_then(|t| t.texture)
    }

    pub fn is_loaded(&self) -> bool {
        self.texture().is_some()
    }

    pub fn get(&self) -> Option<&DiskTexture> {
        self.0.as_deref()
    }

    /// Release the GPU texture if this is the last reference.
    pub fn release(self, device: &mut dyn RenderDevice) {
        if let Some(arc) = self.0 {
            if let Ok(texture) = Arc::try_unwrap(arc) {
                if let Some(id) = texture.texture {
                    device.destroy_texture(id);
                }
            }
        }
    }
}

fn upload(device: &mut dyn RenderDevice, upload: TextureUpload) -> Result<TextureHandle> {
    let id = device.create_texture(&upload)?;
    info!(
        "Loaded {} ({}x{}, {:?})",
        upload.label, upload.width, upload.height, upload.kind
    );
    Ok(TextureHandle::new(DiskTexture {
        name: upload.label,
        kind: upload.kind,
        width: upload.width,
        height: upload.height,
        texture: Some(id),
    }))
}

/// Colour-grade cube from a 1024x32 strip of 32 blue slices.
pub fn colour_grade_lut_from_image(name: &str, image: &DynamicImage) -> Result<ColourGradeLut> {
    let rgb = image.to_rgb8();
    ColourGradeLut::from_rgb8_strip(rgb.width(), rgb.height(), rgb.as_raw()).ok_or_else(|| {
        GfxError::Engine(format!(
            "{name}: colour grade LUT must be {}x{}, got {}x{}",
            LUT_SIZE * LUT_SIZE,
            LUT_SIZE,
            rgb.width(),
            rgb.height()
        ))
    })
}

pub fn upload_colour_grade_lut(
    device: &mut dyn RenderDevice,
    name: &str,
    lut: &ColourGradeLut,
) -> Result<TextureHandle> {
    let n = LUT_SIZE as u32;
    upload(
        device,
        TextureUpload {
            label: name.to_string(),
            kind: UploadKind::D3 { depth: n },
            width: n,
            height: n,
            rgba: lut.to_rgba8(),
        },
    )
}

pub fn load_colour_grade_lut(device: &mut dyn RenderDevice, path: &Path) -> Result<TextureHandle> {
    let name = path.display().to_string();
    let image = image::open(path)?;
    let lut = colour_grade_lut_from_image(&name, &image)?;
    upload_colour_grade_lut(device, &name, &lut)
}

/// Rearrange a horizontal strip of six square faces into face-major order.
pub fn env_cube_faces(name: &str, image: &DynamicImage) -> Result<TextureUpload> {
    let (width, height) = image.dimensions();
    if width != height * 6 || height == 0 {
        return Err(GfxError::Engine(format!(
            "{name}: environment cube strip must be 6:1, got {width}x{height}"
        )));
    }
    let rgba = image.to_rgba8();
    let size = height as usize;
    let row = size * 4;
    let mut faces = Vec::with_capacity(rgba.as_raw().len());
    for face in 0..6 {
        for y in 0..size {
            let start = (y * width as usize + face * size) * 4;
            faces.extend_from_slice(&rgba.as_raw()[start..start + row]);
        }
    }
    Ok(TextureUpload {
        label: name.to_string(),
        kind: UploadKind::Cube,
        width: height,
        height,
        rgba: faces,
    })
}

pub fn load_env_cube(device: &mut dyn RenderDevice, path: &Path) -> Result<TextureHandle> {
    let name = path.display().to_string();
    let image = image::open(path)?;
    let faces = env_cube_faces(&name, &image)?;
    upload(device, faces)
}

pub fn load_texture(device: &mut dyn RenderDevice, path: &Path) -> Result<TextureHandle> {
    let image = image::open(path)?;
    let rgba = image.to_rgba8();
    upload(
        device,
        TextureUpload {
            label: path.display().to_string(),
            kind: UploadKind::D2,
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDevice;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_pending_handle_is_not_loaded() {
        assert!(!TextureHandle::none().is_loaded());
        let pending = TextureHandle::new(DiskTexture::pending("noise.png", UploadKind::D2));
        assert!(!pending.is_loaded());
        assert!(pending.texture().is_none());
        assert_eq!(pending.get().map(|t| t.name.as_str()), Some("noise.png"));
    }

    #[test]
    fn test_lut_wrong_size_rejected() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        assert!(colour_grade_lut_from_image("bad", &image).is_err());
    }

    #[test]
    fn test_lut_upload_is_3d() {
        let mut strip = RgbImage::new(1024, 32);
        for (x, y, px) in strip.enumerate_pixels_mut() {
            *px = Rgb([((x % 32) * 8) as u8, (y * 8) as u8, ((x / 32) * 8) as u8]);
        }
        let lut = colour_grade_lut_from_image("grade", &DynamicImage::ImageRgb8(strip)).unwrap();
        let mut device = RecordingDevice::new(64, 64);
        let handle = upload_colour_grade_lut(&mut device, "grade", &lut).unwrap();
        let id = handle.texture().unwrap();
        let upload = &device.textures[&id];
        assert_eq!(upload.kind, UploadKind::D3 { depth: 32 });
        assert_eq!(upload.rgba.len(), 32 * 32 * 32 * 4);
        handle.release(&mut device);
        assert!(device.textures.is_empty());
    }

    #[test]
    fn test_env_cube_strip_is_split_into_faces() {
        let mut strip = RgbaImage::new(12, 2);
        for (x, _, px) in strip.enumerate_pixels_mut() {
            *px = Rgba([(x / 2) as u8, 0, 0, 255]);
        }
        let upload = env_cube_faces("sky", &DynamicImage::ImageRgba8(strip)).unwrap();
        assert_eq!((upload.width, upload.height), (2, 2));
        for face in 0..6 {
            let texels = &upload.rgba[face * 16..(face + 1) * 16];
            assert!(texels.chunks(4).all(|t| t[0] == face as u8));
        }
    }

    #[test]
    fn test_env_cube_needs_six_to_one() {
        let image = DynamicImage::ImageRgba8(RgbaImage::new(8, 2));
        assert!(env_cube_faces("sky", &image).is_err());
    }
}

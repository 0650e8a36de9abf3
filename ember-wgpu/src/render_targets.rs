//! Render target and texture creation.
//! Pipeline targets, uploaded disk textures and the 1x1 fallbacks bound to
//! empty texture slots.

use ember_render::device::{TargetDesc, TargetFormat, TextureKind, TextureUpload, UploadKind};
use ember_render::error::{GfxError, Result};

/// Format of the presentable viewport and of read-backs.
pub const DISPLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// HDR ping-pong format.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// G-buffer layer format.
pub const GBUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
/// Depth format.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

pub fn texture_format(format: TargetFormat) -> wgpu::TextureFormat {
    match format {
        TargetFormat::Display => DISPLAY_FORMAT,
        TargetFormat::Rgba16Float => HDR_FORMAT,
        TargetFormat::Rgba32Float => GBUFFER_FORMAT,
        TargetFormat::Depth32Float => DEPTH_FORMAT,
    }
}

/// A pipeline render target.
pub struct GpuTarget {
    pub desc: TargetDesc,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

pub fn create_target(device: &wgpu::Device, desc: &TargetDesc) -> GpuTarget {
    let size = wgpu::Extent3d {
        width: desc.width.max(1),
        height: desc.height.max(1),
        depth_or_array_layers: 1,
    };
    let usage = if desc.format.is_depth() {
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
    } else {
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&desc.label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(desc.format),
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTarget {
        desc: desc.clone(),
        texture,
        view,
    }
}

/// A texture loaded from disk.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

fn upload_layout(kind: UploadKind) -> (wgpu::TextureDimension, u32, wgpu::TextureViewDimension) {
    match kind {
        UploadKind::D2 => (wgpu::TextureDimension::D2, 1, wgpu::TextureViewDimension::D2),
        UploadKind::Cube => (wgpu::TextureDimension::D2, 6, wgpu::TextureViewDimension::Cube),
        UploadKind::D3 { depth } => (
            wgpu::TextureDimension::D3,
            depth,
            wgpu::TextureViewDimension::D3,
        ),
    }
}

/// Expected byte length of an upload.
pub fn upload_len(upload: &TextureUpload) -> usize {
    let (_, layers, _) = upload_layout(upload.kind);
    upload.width as usize * upload.height as usize * layers as usize * 4
}

pub fn create_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    upload: &TextureUpload,
) -> Result<GpuTexture> {
    if upload.width == 0 || upload.height == 0 {
        return Err(GfxError::Engine(format!("texture {} is empty", upload.label)));
    }
    if upload.rgba.len() != upload_len(upload) {
        return Err(GfxError::Engine(format!(
            "texture {} has {} bytes, expected {}",
            upload.label,
            upload.rgba.len(),
            upload_len(upload)
        )));
    }
    let (dimension, layers, view_dimension) = upload_layout(upload.kind);
    let size = wgpu::Extent3d {
        width: upload.width,
        height: upload.height,
        depth_or_array_layers: layers,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&upload.label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension,
        format: DISPLAY_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &upload.rgba,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * upload.width),
            rows_per_image: Some(upload.height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(view_dimension),
        ..Default::default()
    });
    Ok(GpuTexture { texture, view })
}

/// 1x1 textures bound where a slot has nothing.
pub struct DefaultTextures {
    pub white: GpuTexture,
    pub cube: GpuTexture,
    pub volume: GpuTexture,
    pub depth: GpuTarget,
}

impl DefaultTextures {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Self> {
        let white = |label: &str, kind: UploadKind| TextureUpload {
            label: label.to_string(),
            kind,
            width: 1,
            height: 1,
            rgba: Vec::new(),
        };
        let filled = |mut upload: TextureUpload| {
            upload.rgba = vec![255; upload_len(&upload)];
            upload
        };
        let depth = create_target(
            device,
            &TargetDesc::new("default depth", 1, 1, TargetFormat::Depth32Float),
        );
        // Far plane, so comparisons against the fallback never shadow.
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Default Depth Clear"),
        });
        drop(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Default Depth Clear"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        }));
        queue.submit(Some(encoder.finish()));

        Ok(Self {
            white: create_texture(device, queue, &filled(white("default white", UploadKind::D2)))?,
            cube: create_texture(device, queue, &filled(white("default cube", UploadKind::Cube)))?,
            volume: create_texture(
                device,
                queue,
                &filled(white("default volume", UploadKind::D3 { depth: 1 })),
            )?,
            depth,
        })
    }

    pub fn for_kind(&self, kind: TextureKind) -> &wgpu::TextureView {
        match kind {
            TextureKind::Float2d { .. } => &self.white.view,
            TextureKind::Depth2d => &self.depth.view,
            TextureKind::Cube => &self.cube.view,
            TextureKind::D3 => &self.volume.view,
        }
    }
}

/// Row pitch of a texture-to-buffer copy of `width` RGBA8 texels.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Drop the row padding of a read-back buffer.
pub fn unpad_rows(padded: &[u8], width: u32, height: u32) -> Vec<u8> {
    let row = (width * 4) as usize;
    let pitch = padded_bytes_per_row(width) as usize;
    let mut rgba = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        rgba.extend_from_slice(&padded[y * pitch..y * pitch + row]);
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_unpad_rows_keeps_pixels_only() {
        let mut padded = vec![0u8; 256 * 2];
        padded[0..4].copy_from_slice(&[1, 2, 3, 4]);
        padded[256..260].copy_from_slice(&[5, 6, 7, 8]);
        assert_eq!(unpad_rows(&padded, 1, 2), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_cube_upload_needs_six_faces() {
        let upload = TextureUpload {
            label: "sky".into(),
            kind: UploadKind::Cube,
            width: 4,
            height: 4,
            rgba: Vec::new(),
        };
        assert_eq!(upload_len(&upload), 4 * 4 * 6 * 4);
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(texture_format(TargetFormat::Display), DISPLAY_FORMAT);
        assert_eq!(texture_format(TargetFormat::Depth32Float), DEPTH_FORMAT);
        assert_eq!(texture_format(TargetFormat::Rgba32Float), GBUFFER_FORMAT);
    }
}

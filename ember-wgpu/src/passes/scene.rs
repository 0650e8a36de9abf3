//! Replay of one recorded [`PassDesc`] into a wgpu render pass.

use ember_render::device::PixelRect;

/// A colour attachment resolved to its view.
pub struct ColourView<'a> {
    pub view: &'a wgpu::TextureView,
    pub clear: Option<[f32; 4]>,
}

pub struct DepthView<'a> {
    pub view: &'a wgpu::TextureView,
    pub clear: Option<f32>,
    pub read_only: bool,
}

pub enum DrawRange<'a> {
    Vertices(u32),
    Indexed { indices: &'a wgpu::Buffer, count: u32 },
}

/// A draw with every GPU object it references already created.
pub struct PreparedDraw<'a> {
    pub pipeline: &'a wgpu::RenderPipeline,
    pub bind_group: &'a wgpu::BindGroup,
    /// `None` for programs that generate their vertices.
    pub vertices: Option<&'a wgpu::Buffer>,
    pub range: DrawRange<'a>,
    pub viewport: Option<PixelRect>,
}

fn load_op(clear: Option<[f32; 4]>) -> wgpu::LoadOp<wgpu::Color> {
    match clear {
        Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }),
        None => wgpu::LoadOp::Load,
    }
}

pub fn encode_scene_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    colour: &[ColourView<'_>],
    depth: Option<DepthView<'_>>,
    draws: &[PreparedDraw<'_>],
) {
    let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colour
        .iter()
        .map(|c| {
            Some(wgpu::RenderPassColorAttachment {
                view: c.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: load_op(c.clear),
                    store: wgpu::StoreOp::Store,
                },
            })
        })
        .collect();
    let depth_stencil_attachment = depth.map(|d| wgpu::RenderPassDepthStencilAttachment {
        view: d.view,
        depth_ops: (!d.read_only).then_some(wgpu::Operations {
            load: d.clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: None,
    });

    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &color_attachments,
        depth_stencil_attachment,
        ..Default::default()
    });

    for draw in draws {
        pass.set_pipeline(draw.pipeline);
        pass.set_bind_group(0, draw.bind_group, &[]);
        if let Some(rect) = draw.viewport {
            pass.set_viewport(
                rect.x as f32,
                rect.y as f32,
                rect.width.max(1) as f32,
                rect.height.max(1) as f32,
                0.0,
                1.0,
            );
        }
        if let Some(vertices) = draw.vertices {
            pass.set_vertex_buffer(0, vertices.slice(..));
        }
        match draw.range {
            DrawRange::Vertices(count) => pass.draw(0..count, 0..1),
            DrawRange::Indexed { indices, count } => {
                pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
                pass.draw_indexed(0..count, 0, 0..1);
            }
        }
    }
}

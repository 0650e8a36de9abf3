//! Static full-screen triangle pair shared by every compositing pass.

use ember_gpu_shared::uniforms::ScreenQuadVertex;

use crate::device::{BufferId, BufferKind, Geometry, RenderDevice};
use crate::error::Result;

const VERTICES: [ScreenQuadVertex; 6] = [
    ScreenQuadVertex { position: [-1.0, -1.0] },
    ScreenQuadVertex { position: [1.0, -1.0] },
    ScreenQuadVertex { position: [1.0, 1.0] },
    ScreenQuadVertex { position: [-1.0, -1.0] },
    ScreenQuadVertex { position: [1.0, 1.0] },
    ScreenQuadVertex { position: [-1.0, 1.0] },
];

#[derive(Debug)]
pub struct ScreenQuad {
    buffer: BufferId,
}

impl ScreenQuad {
    pub fn new(device: &mut dyn RenderDevice) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(&VERTICES);
        let buffer = device.create_buffer(BufferKind::Vertex, bytes.len() as u64)?;
        device.write_buffer(buffer, 0, bytes)?;
        Ok(Self { buffer })
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::Vertices {
            vertices: self.buffer,
            vertex_count: VERTICES.len() as u32,
        }
    }

    pub fn release(self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDevice;

    #[test]
    fn test_quad_is_two_triangles_over_clip_space() {
        let mut device = RecordingDevice::new(4, 4);
        let quad = ScreenQuad::new(&mut device).unwrap();
        assert_eq!(quad.geometry().triangles(), 2);
        let Geometry::Vertices { vertices, .. } = quad.geometry() else {
            panic!("screen quad is not indexed");
        };
        let (_, bytes) = &device.buffers[&vertices];
        let verts: Vec<ScreenQuadVertex> = bytes
            .chunks(std::mem::size_of::<ScreenQuadVertex>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert!(verts.iter().all(|v| v.position[0].abs() == 1.0 && v.position[1].abs() == 1.0));
        quad.release(&mut device);
        assert!(device.buffers.is_empty());
    }
}

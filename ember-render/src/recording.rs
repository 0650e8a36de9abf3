//! In-memory [`RenderDevice`] that records every pass and draw.

use std::collections::HashMap;

use crate::device::{
    BufferId, BufferKind, DrawCall, DrawState, DrawStats, Geometry, PassDesc, PixelRect,
    RenderDevice, ShaderDesc, TargetDesc, TargetFormat, TargetId, TargetPixels, TextureBinding,
    TextureId, TextureUpload,
};
use crate::error::{GfxError, Result};

#[derive(Clone, Debug)]
pub struct RecordedDraw {
    pub shader: String,
    pub state: DrawState,
    pub uniforms: Vec<u8>,
    pub textures: Vec<Option<TextureBinding>>,
    pub geometry: Geometry,
    pub viewport: Option<PixelRect>,
}

impl RecordedDraw {
    pub fn uniforms_as<T: bytemuck::Pod>(&self) -> T {
        bytemuck::pod_read_unaligned(&self.uniforms)
    }
}

#[derive(Clone, Debug)]
pub struct RecordedPass {
    pub desc: PassDesc,
    pub draws: Vec<RecordedDraw>,
}

impl RecordedPass {
    pub fn draws_of(&self, shader: &str) -> Vec<&RecordedDraw> {
        self.draws.iter().filter(|d| d.shader == shader).collect()
    }
}

pub struct RecordingDevice {
    next_id: u64,
    viewport: TargetId,
    pub targets: HashMap<TargetId, TargetDesc>,
    pub buffers: HashMap<BufferId, (BufferKind, Vec<u8>)>,
    pub textures: HashMap<TextureId, TextureUpload>,
    pub shaders: HashMap<String, ShaderDesc>,
    pub passes: Vec<RecordedPass>,
    pub copies: Vec<(TargetId, TargetId, [u32; 2])>,
    pub presents: u32,
    open: Option<RecordedPass>,
    /// Draws with this shader fail with an API error.
    pub failing_shader: Option<String>,
    /// Targets with this label fail to be created.
    pub failing_target: Option<String>,
}

impl RecordingDevice {
    pub fn new(width: u32, height: u32) -> Self {
        let viewport = TargetId(1);
        let mut targets = HashMap::new();
        targets.insert(
            viewport,
            TargetDesc::new("viewport", width, height, TargetFormat::Display),
        );
        Self {
            next_id: 2,
            viewport,
            targets,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            shaders: HashMap::new(),
            passes: Vec::new(),
            copies: Vec::new(),
            presents: 0,
            open: None,
            failing_shader: None,
            failing_target: None,
        }
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn clear_log(&mut self) {
        self.passes.clear();
        self.copies.clear();
    }

    pub fn pass(&self, label: &str) -> Option<&RecordedPass> {
        self.passes.iter().find(|p| p.desc.label == label)
    }

    pub fn all_draws(&self) -> impl Iterator<Item = &RecordedDraw> {
        self.passes.iter().flat_map(|p| p.draws.iter())
    }

    pub fn label_of(&self, id: TargetId) -> &str {
        self.targets.get(&id).map(|t| t.label.as_str()).unwrap_or("")
    }
}

impl RenderDevice for RecordingDevice {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId> {
        if self.failing_target.as_deref() == Some(desc.label.as_str()) {
            return Err(GfxError::Api(format!("{} allocation failed", desc.label)));
        }
        let id = TargetId(self.next());
        self.targets.insert(id, desc.clone());
        Ok(id)
    }

    fn destroy_target(&mut self, id: TargetId) {
        self.targets.remove(&id);
    }

    fn target_size(&self, id: TargetId) -> Result<(u32, u32)> {
        self.targets
            .get(&id)
            .map(|t| (t.width, t.height))
            .ok_or(GfxError::UnknownTarget(id.0))
    }

    fn viewport_target(&self) -> TargetId {
        self.viewport
    }

    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        let target = self
            .targets
            .get_mut(&self.viewport)
            .ok_or(GfxError::UnknownTarget(self.viewport.0))?;
        target.width = width;
        target.height = height;
        Ok(())
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<BufferId> {
        let id = BufferId(self.next());
        self.buffers.insert(id, (kind, vec![0; size as usize]));
        Ok(id)
    }

    fn buffer_size(&self, id: BufferId) -> Result<u64> {
        self.buffers
            .get(&id)
            .map(|(_, data)| data.len() as u64)
            .ok_or_else(|| GfxError::Engine(format!("unknown buffer {}", id.0)))
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let (_, contents) = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| GfxError::Engine(format!("unknown buffer {}", id.0)))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(GfxError::Engine(format!(
                "write of {end} bytes past buffer of {}",
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn create_texture(&mut self, upload: &TextureUpload) -> Result<TextureId> {
        let id = TextureId(self.next());
        self.textures.insert(id, upload.clone());
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn register_shader(&mut self, desc: &ShaderDesc) -> Result<()> {
        self.shaders.insert(desc.name.clone(), desc.clone());
        Ok(())
    }

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()> {
        if let Some(open) = &self.open {
            return Err(GfxError::Engine(format!(
                "pass {} begun while {} is open",
                pass.label, open.desc.label
            )));
        }
        for attachment in &pass.colour {
            self.target_size(attachment.target)?;
        }
        self.open = Some(RecordedPass {
            desc: pass.clone(),
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<DrawStats> {
        let desc = self
            .shaders
            .get(call.shader)
            .ok_or_else(|| GfxError::UnknownShader(call.shader.to_string()))?;
        if desc.textures.len() != call.textures.len() {
            return Err(GfxError::Engine(format!(
                "{} declares {} textures, {} bound",
                call.shader,
                desc.textures.len(),
                call.textures.len()
            )));
        }
        if desc.uniform_size != call.uniforms.len() as u64 {
            return Err(GfxError::Engine(format!(
                "{} uniform block is {} bytes, got {}",
                call.shader,
                desc.uniform_size,
                call.uniforms.len()
            )));
        }
        if self.failing_shader.as_deref() == Some(call.shader) {
            return Err(GfxError::Api(format!("{} rejected by driver", call.shader)));
        }
        let pass = self
            .open
            .as_mut()
            .ok_or_else(|| GfxError::Engine("draw outside a pass".into()))?;
        pass.draws.push(RecordedDraw {
            shader: call.shader.to_string(),
            state: call.state,
            uniforms: call.uniforms.to_vec(),
            textures: call.textures.to_vec(),
            geometry: call.geometry,
            viewport: call.viewport,
        });
        Ok(DrawStats {
            batches: 1,
            triangles: call.geometry.triangles(),
        })
    }

    fn end_pass(&mut self) -> Result<()> {
        let pass = self
            .open
            .take()
            .ok_or_else(|| GfxError::Engine("end_pass without begin_pass".into()))?;
        self.passes.push(pass);
        Ok(())
    }

    fn copy_target(&mut self, src: TargetId, dst: TargetId, origin: [u32; 2]) -> Result<()> {
        self.target_size(src)?;
        self.target_size(dst)?;
        self.copies.push((src, dst, origin));
        Ok(())
    }

    fn read_target(&mut self, id: TargetId) -> Result<TargetPixels> {
        let (width, height) = self.target_size(id)?;
        Ok(TargetPixels {
            width,
            height,
            rgba: vec![0; (width * height * 4) as usize],
        })
    }

    fn present(&mut self) -> Result<()> {
        self.presents += 1;
        Ok(())
    }
}

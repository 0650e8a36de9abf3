use std::collections::HashMap;

use ember_render::device::{
    BufferId, BufferKind, DrawCall, DrawState, DrawStats, Geometry, PassDesc, PixelRect,
    RenderDevice, ShaderDesc, TargetDesc, TargetFormat, TargetId, TargetPixels, TextureBinding,
    TextureId, TextureUpload,
};
use ember_render::error::{GfxError, Result};
use log::{debug, error, info, warn};
use wgpu::util::DeviceExt;

use crate::handle::HandleStore;
use crate::passes::scene::{encode_scene_pass, ColourView, DepthView, DrawRange, PreparedDraw};
use crate::pipeline::{self, CompiledShader, PipelineKey};
use crate::render_targets::{self, DefaultTextures, GpuTarget, GpuTexture};

/// Surface colour outside the blitted viewport.
const PRESENT_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// GPU buffer and the size the pipeline asked for.
struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

/// A draw recorded between `begin_pass` and `end_pass`.
struct RecordedDraw {
    shader: String,
    state: DrawState,
    uniforms: Vec<u8>,
    textures: Vec<Option<TextureBinding>>,
    geometry: Geometry,
    viewport: Option<PixelRect>,
}

struct OpenPass {
    desc: PassDesc,
    draws: Vec<RecordedDraw>,
}

/// Swapchain state of a windowed device.
struct Presenter {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bgl: wgpu::BindGroupLayout,
}

/// [`RenderDevice`] over wgpu. Passes are recorded and submitted as one
/// command buffer when they end.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    presenter: Option<Presenter>,

    targets: HandleStore<GpuTarget>,
    buffers: HandleStore<GpuBuffer>,
    textures: HandleStore<GpuTexture>,
    viewport: TargetId,

    shaders: HashMap<String, CompiledShader>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    defaults: DefaultTextures,
    linear_sampler: wgpu::Sampler,
    shadow_comparison_sampler: wgpu::Sampler,

    open: Option<OpenPass>,
}

fn request_adapter(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> Result<wgpu::Adapter> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: surface,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| GfxError::DeviceInit("Failed to find suitable GPU adapter".into()))
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Ember WebGPU Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
        },
        None,
    ))
    .map_err(|e| GfxError::DeviceInit(format!("Failed to create device: {e}")))
}

impl WgpuDevice {
    /// Create a device presenting to a native window.
    pub fn new(
        window: impl raw_window_handle::HasWindowHandle
            + raw_window_handle::HasDisplayHandle
            + Send
            + Sync
            + 'static,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| GfxError::DeviceInit(format!("Failed to create surface: {e}")))?;
        let adapter = request_adapter(&instance, Some(&surface))?;
        let (device, queue) = request_device(&adapter)?;

        let caps = surface.get_capabilities(&adapter);
        // The viewport already holds display values; avoid a second encode.
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or(caps.formats.first())
            .copied()
            .ok_or_else(|| GfxError::DeviceInit("Surface reports no formats".into()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        let bgl = pipeline::create_present_bgl(&device);
        let present_pipeline = pipeline::create_present_pipeline(&device, &bgl, format);
        log_adapter(&adapter);
        Self::from_parts(
            device,
            queue,
            Some(Presenter {
                surface,
                config,
                pipeline: present_pipeline,
                bgl,
            }),
            width,
            height,
        )
    }

    /// Create an offscreen device; `present` only flushes.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = request_adapter(&instance, None)?;
        let (device, queue) = request_device(&adapter)?;
        log_adapter(&adapter);
        Self::from_parts(device, queue, None, width, height)
    }

    fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        presenter: Option<Presenter>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        // Errors outside an error scope are logged rather than aborting.
        device.on_uncaptured_error(Box::new(|e| error!("wgpu: {e}")));

        let defaults = DefaultTextures::new(&device, &queue)?;
        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Clamp Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let shadow_comparison_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Comparison Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let mut targets = HandleStore::new();
        let viewport = TargetId(targets.insert(render_targets::create_target(
            &device,
            &TargetDesc::new("viewport", width, height, TargetFormat::Display),
        )));

        Ok(Self {
            device,
            queue,
            presenter,
            targets,
            buffers: HandleStore::new(),
            textures: HandleStore::new(),
            viewport,
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            defaults,
            linear_sampler,
            shadow_comparison_sampler,
            open: None,
        })
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    fn target(&self, id: TargetId) -> Result<&GpuTarget> {
        self.targets.get(id.0).ok_or(GfxError::UnknownTarget(id.0))
    }

    fn buffer(&self, id: BufferId) -> Result<&GpuBuffer> {
        self.buffers
            .get(id.0)
            .ok_or_else(|| GfxError::Engine(format!("unknown buffer {}", id.0)))
    }

    fn compiled(&self, name: &str) -> Result<&CompiledShader> {
        self.shaders
            .get(name)
            .ok_or_else(|| GfxError::UnknownShader(name.to_string()))
    }

    fn binding_view<'a>(
        &'a self,
        binding: Option<TextureBinding>,
        kind: ember_render::device::TextureKind,
    ) -> Result<&'a wgpu::TextureView> {
        match binding {
            Some(TextureBinding::Target(id)) => Ok(&self.target(id)?.view),
            Some(TextureBinding::Texture(id)) => self
                .textures
                .get(id.0)
                .map(|t| &t.view)
                .ok_or_else(|| GfxError::Engine(format!("unknown texture {}", id.0))),
            None => Ok(self.defaults.for_kind(kind)),
        }
    }

    fn create_bind_group(&self, draw: &RecordedDraw) -> Result<(wgpu::BindGroup, wgpu::Buffer)> {
        let shader = self.compiled(&draw.shader)?;
        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} Uniforms", draw.shader)),
                contents: &draw.uniforms,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let mut views = Vec::with_capacity(draw.textures.len());
        for (binding, slot) in draw.textures.iter().zip(&shader.desc.textures) {
            views.push(self.binding_view(*binding, slot.kind)?);
        }
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        }];
        for view in views {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        if shader.desc.linear_sampler {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
            });
        }
        if shader.desc.comparison_sampler {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: wgpu::BindingResource::Sampler(&self.shadow_comparison_sampler),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", draw.shader)),
            layout: &shader.bind_group_layout,
            entries: &entries,
        });
        Ok((bind_group, uniforms))
    }

    fn pipeline_key(&self, pass: &PassDesc, draw: &RecordedDraw) -> Result<PipelineKey> {
        let colour_formats = pass
            .colour
            .iter()
            .map(|c| self.target(c.target).map(|t| t.desc.format))
            .collect::<Result<Vec<_>>>()?;
        Ok(PipelineKey {
            shader: draw.shader.clone(),
            state: draw.state,
            colour_formats,
            depth: pass.depth.map(|d| d.read_only),
        })
    }

    fn encode_pass(&mut self, pass: &OpenPass) -> Result<()> {
        let keys = pass
            .draws
            .iter()
            .map(|d| self.pipeline_key(&pass.desc, d))
            .collect::<Result<Vec<_>>>()?;
        for key in &keys {
            if !self.pipelines.contains_key(key) {
                let shader = self.compiled(&key.shader)?;
                debug!("Creating pipeline for {} ({:?})", key.shader, key.state);
                let created = pipeline::create_render_pipeline(&self.device, shader, key);
                self.pipelines.insert(key.clone(), created);
            }
        }

        let mut bound = Vec::with_capacity(pass.draws.len());
        for draw in &pass.draws {
            bound.push(self.create_bind_group(draw)?);
        }

        let colour = pass
            .desc
            .colour
            .iter()
            .map(|c| {
                Ok(ColourView {
                    view: &self.target(c.target)?.view,
                    clear: c.clear,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let depth = match pass.desc.depth {
            Some(d) => Some(DepthView {
                view: &self.target(d.target)?.view,
                clear: d.clear,
                read_only: d.read_only,
            }),
            None => None,
        };
        let mut prepared = Vec::with_capacity(pass.draws.len());
        for ((draw, key), (bind_group, _)) in pass.draws.iter().zip(&keys).zip(&bound) {
            let pipeline = self
                .pipelines
                .get(key)
                .ok_or_else(|| GfxError::Engine(format!("pipeline for {} missing", key.shader)))?;
            let (vertices, range) = match draw.geometry {
                Geometry::Vertices {
                    vertices,
                    vertex_count,
                } => (vertices, DrawRange::Vertices(vertex_count)),
                Geometry::Indexed {
                    vertices,
                    indices,
                    index_count,
                } => (
                    vertices,
                    DrawRange::Indexed {
                        indices: &self.buffer(indices)?.buffer,
                        count: index_count,
                    },
                ),
            };
            prepared.push(PreparedDraw {
                pipeline,
                bind_group,
                vertices: Some(&self.buffer(vertices)?.buffer),
                range,
                viewport: draw.viewport,
            });
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&pass.desc.label),
            });
        encode_scene_pass(&mut encoder, &pass.desc.label, &colour, depth, &prepared);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn present_to_surface(&self) -> Result<()> {
        let Some(presenter) = &self.presenter else {
            return Ok(());
        };
        let frame = match presenter.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                warn!("Surface lost; reconfiguring");
                presenter.surface.configure(&self.device, &presenter.config);
                return Ok(());
            }
            Err(e) => return Err(GfxError::Api(format!("Surface texture error: {e}"))),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.blit_viewport(&view, &presenter.pipeline, &presenter.bgl)?;
        frame.present();
        Ok(())
    }

    /// Draw the viewport target over `view` with the present program.
    fn blit_viewport(
        &self,
        view: &wgpu::TextureView,
        pipeline: &wgpu::RenderPipeline,
        bgl: &wgpu::BindGroupLayout,
    ) -> Result<()> {
        let source = self.target(self.viewport)?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Bind Group"),
            layout: bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
            ],
        });
        let blit = PreparedDraw {
            pipeline,
            bind_group: &bind_group,
            vertices: None,
            range: DrawRange::Vertices(3),
            viewport: None,
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present Encoder"),
            });
        encode_scene_pass(
            &mut encoder,
            "Present",
            &[ColourView {
                view,
                clear: Some(PRESENT_CLEAR),
            }],
            None,
            &[blit],
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

fn log_adapter(adapter: &wgpu::Adapter) {
    let info = adapter.get_info();
    info!(
        "WebGPU backend initialized: {} ({})",
        info.name,
        info.backend.to_str()
    );
}

impl RenderDevice for WgpuDevice {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId> {
        let target = render_targets::create_target(&self.device, desc);
        Ok(TargetId(self.targets.insert(target)))
    }

    fn destroy_target(&mut self, id: TargetId) {
        if id == self.viewport {
            warn!("Refusing to destroy the viewport target");
            return;
        }
        if let Some(target) = self.targets.remove(id.0) {
            target.texture.destroy();
        }
    }

    fn target_size(&self, id: TargetId) -> Result<(u32, u32)> {
        self.target(id).map(|t| (t.desc.width, t.desc.height))
    }

    fn viewport_target(&self) -> TargetId {
        self.viewport
    }

    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        let desc = TargetDesc::new("viewport", width, height, TargetFormat::Display);
        let replacement = render_targets::create_target(&self.device, &desc);
        let target = self
            .targets
            .get_mut(self.viewport.0)
            .ok_or(GfxError::UnknownTarget(self.viewport.0))?;
        let old = std::mem::replace(target, replacement);
        old.texture.destroy();
        if let Some(presenter) = &mut self.presenter {
            if width > 0 && height > 0 {
                presenter.config.width = width;
                presenter.config.height = height;
                presenter.surface.configure(&self.device, &presenter.config);
            }
        }
        Ok(())
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<BufferId> {
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;
        let padded = size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match kind {
                BufferKind::Vertex => "Vertex Buffer",
                BufferKind::Index => "Index Buffer",
            }),
            size: padded,
            usage,
            mapped_at_creation: false,
        });
        Ok(BufferId(self.buffers.insert(GpuBuffer { buffer, size })))
    }

    fn buffer_size(&self, id: BufferId) -> Result<u64> {
        self.buffer(id).map(|b| b.size)
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.buffer(id)?;
        if offset + data.len() as u64 > buffer.size {
            return Err(GfxError::Engine(format!(
                "write of {} bytes at {offset} past buffer of {}",
                data.len(),
                buffer.size
            )));
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(GfxError::Engine(format!("unaligned buffer write at {offset}")));
        }
        // Queue writes are whole words; the buffer is allocated rounded up.
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&buffer.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(
                (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT) as usize,
                0,
            );
            self.queue.write_buffer(&buffer.buffer, offset, &padded);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(id.0) {
            buffer.buffer.destroy();
        }
    }

    fn create_texture(&mut self, upload: &TextureUpload) -> Result<TextureId> {
        let texture = render_targets::create_texture(&self.device, &self.queue, upload)?;
        Ok(TextureId(self.textures.insert(texture)))
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(id.0) {
            texture.texture.destroy();
        }
    }

    fn register_shader(&mut self, desc: &ShaderDesc) -> Result<()> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let compiled = pipeline::compile_shader(&self.device, desc);
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GfxError::Api(format!("shader {} failed: {e}", desc.name)));
        }
        self.pipelines.retain(|key, _| key.shader != desc.name);
        self.shaders.insert(desc.name.clone(), compiled);
        debug!("Registered shader {}", desc.name);
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
            self.target(attachment.target)?;
        }
        self.open = Some(OpenPass {
            desc: pass.clone(),
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<DrawStats> {
        let shader = self.compiled(call.shader)?;
        if shader.desc.textures.len() != call.textures.len() {
            return Err(GfxError::Engine(format!(
                "{} declares {} textures, {} bound",
                call.shader,
                shader.desc.textures.len(),
                call.textures.len()
            )));
        }
        if shader.desc.uniform_size != call.uniforms.len() as u64 {
            return Err(GfxError::Engine(format!(
                "{} uniform block is {} bytes, got {}",
                call.shader,
                shader.desc.uniform_size,
                call.uniforms.len()
            )));
        }
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| GfxError::Engine("draw outside a pass".into()))?;
        open.draws.push(RecordedDraw {
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
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoded = self.encode_pass(&pass);
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GfxError::Api(format!("pass {} failed: {e}", pass.desc.label)));
        }
        encoded
    }

    fn copy_target(&mut self, src: TargetId, dst: TargetId, origin: [u32; 2]) -> Result<()> {
        let source = self.target(src)?;
        let dest = self.target(dst)?;
        if source.desc.format != dest.desc.format || source.desc.format.is_depth() {
            return Err(GfxError::Engine(format!(
                "cannot copy {} into {}",
                source.desc.label, dest.desc.label
            )));
        }
        let width = source.desc.width.min(dest.desc.width.saturating_sub(origin[0]));
        let height = source.desc.height.min(dest.desc.height.saturating_sub(origin[1]));
        if width == 0 || height == 0 {
            return Ok(());
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Copy Target"),
            });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &dest.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin[0],
                    y: origin[1],
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_target(&mut self, id: TargetId) -> Result<TargetPixels> {
        let target = self.target(id)?;
        if target.desc.format != TargetFormat::Display {
            return Err(GfxError::Engine(format!(
                "{} is not a display target",
                target.desc.label
            )));
        }
        let (width, height) = (target.desc.width.max(1), target.desc.height.max(1));
        let pitch = render_targets::padded_bytes_per_row(width);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: pitch as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(pitch),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| GfxError::Api(format!("readback abandoned: {e}")))?
            .map_err(|e| GfxError::Api(format!("readback failed: {e}")))?;
        let rgba = {
            let mapped = slice.get_mapped_range();
            render_targets::unpad_rows(&mapped, width, height)
        };
        readback.unmap();
        Ok(TargetPixels {
            width,
            height,
            rgba,
        })
    }

    fn present(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(GfxError::Engine("present with a pass open".into()));
        }
        self.present_to_surface()
    }
}

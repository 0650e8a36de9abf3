//! Render pipeline creation.
//! Bind group layouts are derived from a program's [`ShaderDesc`]; render
//! pipelines are built lazily per program, draw state and attachment formats.

use ember_gpu_shared::shaders;
use ember_render::device::{
    BlendMode, ColourMask, CullMode, DepthTest, DrawState, ShaderDesc, TargetFormat, TextureKind,
    VertexLayout,
};

use crate::render_targets::{texture_format, DEPTH_FORMAT};

const SCREEN_QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
const POINT_LIGHT_ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x3,
    3 => Float32x3,
    4 => Float32x3,
    5 => Float32x3
];
const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

pub fn vertex_buffer_layout(layout: VertexLayout) -> wgpu::VertexBufferLayout<'static> {
    let (array_stride, attributes): (u64, &'static [wgpu::VertexAttribute]) = match layout {
        VertexLayout::ScreenQuad => (8, &SCREEN_QUAD_ATTRIBUTES),
        VertexLayout::PointLight => (72, &POINT_LIGHT_ATTRIBUTES),
        VertexLayout::Mesh => (32, &MESH_ATTRIBUTES),
    };
    wgpu::VertexBufferLayout {
        array_stride,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    }
}

fn texture_binding_type(kind: TextureKind) -> wgpu::BindingType {
    let (sample_type, view_dimension) = match kind {
        TextureKind::Float2d { filterable } => (
            wgpu::TextureSampleType::Float { filterable },
            wgpu::TextureViewDimension::D2,
        ),
        TextureKind::Depth2d => (wgpu::TextureSampleType::Depth, wgpu::TextureViewDimension::D2),
        TextureKind::Cube => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::TextureViewDimension::Cube,
        ),
        TextureKind::D3 => (
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::TextureViewDimension::D3,
        ),
    };
    wgpu::BindingType::Texture {
        sample_type,
        view_dimension,
        multisampled: false,
    }
}

/// Layout entries: the uniform block at 0, one binding per texture slot,
/// then the samplers the program asks for.
pub fn layout_entries(desc: &ShaderDesc) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(desc.uniform_size),
        },
        count: None,
    }];
    for slot in &desc.textures {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: entries.len() as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: texture_binding_type(slot.kind),
            count: None,
        });
    }
    if desc.linear_sampler {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: entries.len() as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    if desc.comparison_sampler {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: entries.len() as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
            count: None,
        });
    }
    entries
}

/// Everything a compiled program needs to build pipelines.
pub struct CompiledShader {
    pub desc: ShaderDesc,
    pub vertex_module: wgpu::ShaderModule,
    pub fragment_module: Option<wgpu::ShaderModule>,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
}

pub fn compile_shader(device: &wgpu::Device, desc: &ShaderDesc) -> CompiledShader {
    let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{} Vertex", desc.name)),
        source: wgpu::ShaderSource::Wgsl(desc.vertex_source.into()),
    });
    let fragment_module = desc.fragment_source.map(|source| {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} Fragment", desc.name)),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    });
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{} BGL", desc.name)),
        entries: &layout_entries(desc),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{} Pipeline Layout", desc.name)),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    CompiledShader {
        desc: desc.clone(),
        vertex_module,
        fragment_module,
        bind_group_layout,
        pipeline_layout,
    }
}

/// Identity of a render pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: String,
    pub state: DrawState,
    pub colour_formats: Vec<TargetFormat>,
    /// Present when the pass has a depth attachment; `true` when read-only.
    pub depth: Option<bool>,
}

pub fn cull_face(cull: CullMode) -> Option<wgpu::Face> {
    match cull {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub fn depth_compare(test: DepthTest) -> wgpu::CompareFunction {
    match test {
        DepthTest::Always => wgpu::CompareFunction::Always,
        DepthTest::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthTest::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
    }
}

/// `None` for replace: 32-bit float G-buffer layers are not blendable.
pub fn blend_state(blend: BlendMode) -> Option<wgpu::BlendState> {
    match blend {
        BlendMode::Replace => None,
        BlendMode::Add => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            Some(wgpu::BlendState {
                color: add,
                alpha: add,
            })
        }
    }
}

pub fn colour_writes(mask: ColourMask) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    for (on, bit) in [
        (mask.red, wgpu::ColorWrites::RED),
        (mask.green, wgpu::ColorWrites::GREEN),
        (mask.blue, wgpu::ColorWrites::BLUE),
        (mask.alpha, wgpu::ColorWrites::ALPHA),
    ] {
        if on {
            writes |= bit;
        }
    }
    writes
}

fn depth_stencil(key: &PipelineKey, depth_only: bool) -> Option<wgpu::DepthStencilState> {
    let read_only = key.depth?;
    // Depth-only programs render shadow maps; bias them against acne.
    let bias = if depth_only {
        wgpu::DepthBiasState {
            constant: 2,
            slope_scale: 2.0,
            clamp: 0.0,
        }
    } else {
        wgpu::DepthBiasState::default()
    };
    Some(wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: key.state.depth_write && !read_only,
        depth_compare: depth_compare(key.state.depth_test),
        stencil: wgpu::StencilState::default(),
        bias,
    })
}

pub fn create_render_pipeline(
    device: &wgpu::Device,
    shader: &CompiledShader,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .colour_formats
        .iter()
        .map(|&format| {
            Some(wgpu::ColorTargetState {
                format: texture_format(format),
                blend: blend_state(key.state.blend),
                write_mask: colour_writes(key.state.colour_mask),
            })
        })
        .collect();
    let fragment = shader
        .fragment_module
        .as_ref()
        .map(|module| wgpu::FragmentState {
            module,
            entry_point: Some(shader.desc.fragment_entry),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &targets,
        });
    let depth_only = fragment.is_none();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&shader.desc.name),
        layout: Some(&shader.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader.vertex_module,
            entry_point: Some(shader.desc.vertex_entry),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[vertex_buffer_layout(shader.desc.vertex_layout)],
        },
        fragment,
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: cull_face(key.state.cull),
            ..Default::default()
        },
        depth_stencil: depth_stencil(key, depth_only),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

// ============================================================
// Present Pipeline
// ============================================================

pub fn create_present_bgl(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Present BGL"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

pub fn create_present_pipeline(
    device: &wgpu::Device,
    present_bgl: &wgpu::BindGroupLayout,
    surface_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Present"),
        source: wgpu::ShaderSource::Wgsl(shaders::PRESENT.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Present Pipeline Layout"),
        bind_group_layouts: &[present_bgl],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Present Pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

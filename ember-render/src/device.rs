//! The backend seam.
//!
//! The pipeline records immediate-mode work through [`RenderDevice`]. Passes
//! are explicit: `begin_pass` opens a set of attachments, `draw` issues into
//! it, `end_pass` closes it. Resources are addressed by opaque ids so the
//! pipeline never holds a backend type.

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Render target formats used by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    /// 8-bit unorm RGBA, the format of the presentable viewport.
    Display,
    /// 16-bit float RGBA (HDR ping-pong buffers).
    Rgba16Float,
    /// 32-bit float RGBA (G-buffer layers).
    Rgba32Float,
    Depth32Float,
}

impl TargetFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TargetFormat::Depth32Float)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TargetFormat,
}

impl TargetDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: TargetFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Pixel rectangle, origin top-left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthTest {
    Always,
    LessEqual,
    GreaterEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Source replaces destination (one, zero).
    Replace,
    /// Source is added onto destination (one, one).
    Add,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColourMask {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
    pub alpha: bool,
}

impl ColourMask {
    pub const ALL: ColourMask = ColourMask {
        red: true,
        green: true,
        blue: true,
        alpha: true,
    };
}

impl Default for ColourMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Fixed-function state of one draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DrawState {
    pub cull: CullMode,
    pub depth_test: DepthTest,
    pub depth_write: bool,
    pub blend: BlendMode,
    pub colour_mask: ColourMask,
}

impl DrawState {
    /// Full-screen compositing: no culling, no depth, replace.
    pub const FULLSCREEN: DrawState = DrawState {
        cull: CullMode::None,
        depth_test: DepthTest::Always,
        depth_write: false,
        blend: BlendMode::Replace,
        colour_mask: ColourMask::ALL,
    };

    /// Opaque geometry: back-face culled, depth tested and written.
    pub const OPAQUE: DrawState = DrawState {
        cull: CullMode::Back,
        depth_test: DepthTest::LessEqual,
        depth_write: true,
        blend: BlendMode::Replace,
        colour_mask: ColourMask::ALL,
    };

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_mask(mut self, mask: ColourMask) -> Self {
        self.colour_mask = mask;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColourAttachment {
    pub target: TargetId,
    /// `None` loads the existing contents.
    pub clear: Option<[f32; 4]>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthAttachment {
    pub target: TargetId,
    pub clear: Option<f32>,
    /// Attached for testing only; draws cannot write it.
    pub read_only: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PassDesc {
    pub label: String,
    pub colour: Vec<ColourAttachment>,
    pub depth: Option<DepthAttachment>,
}

impl PassDesc {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            colour: Vec::new(),
            depth: None,
        }
    }

    pub fn colour(mut self, target: TargetId, clear: Option<[f32; 4]>) -> Self {
        self.colour.push(ColourAttachment { target, clear });
        self
    }

    pub fn depth(mut self, target: TargetId, clear: Option<f32>, read_only: bool) -> Self {
        self.depth = Some(DepthAttachment {
            target,
            clear,
            read_only,
        });
        self
    }
}

/// A texture bound to a shader slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureBinding {
    Target(TargetId),
    Texture(TextureId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Geometry {
    Vertices {
        vertices: BufferId,
        vertex_count: u32,
    },
    Indexed {
        vertices: BufferId,
        indices: BufferId,
        index_count: u32,
    },
}

impl Geometry {
    pub fn triangles(&self) -> u32 {
        match *self {
            Geometry::Vertices { vertex_count, .. } => vertex_count / 3,
            Geometry::Indexed { index_count, .. } => index_count / 3,
        }
    }
}

pub struct DrawCall<'a> {
    pub shader: &'a str,
    pub state: DrawState,
    /// Raw bytes of the uniform block at binding 0.
    pub uniforms: &'a [u8],
    /// One entry per declared texture slot; `None` binds the default texture.
    pub textures: &'a [Option<TextureBinding>],
    pub geometry: Geometry,
    /// Pixel viewport inside the pass attachments; `None` covers them fully.
    pub viewport: Option<PixelRect>,
}

/// Work accounted to one draw call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub batches: u32,
    pub triangles: u32,
}

impl std::ops::AddAssign for DrawStats {
    fn add_assign(&mut self, rhs: Self) {
        self.batches += rhs.batches;
        self.triangles += rhs.triangles;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    Float2d { filterable: bool },
    Depth2d,
    Cube,
    D3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureSlot {
    pub name: &'static str,
    pub kind: TextureKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexLayout {
    /// `ScreenQuadVertex`
    ScreenQuad,
    /// `PointLightVertex`
    PointLight,
    /// `MeshVertex`
    Mesh,
}

/// A compiled program and its parameter schema.
///
/// Bind group layout: binding 0 is the uniform block, bindings `1..=n` are
/// `textures` in order, followed by a filtering sampler when `linear_sampler`
/// is set and a comparison sampler when `comparison_sampler` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderDesc {
    pub name: String,
    pub vertex_source: &'static str,
    pub vertex_entry: &'static str,
    /// `None` for depth-only programs.
    pub fragment_source: Option<&'static str>,
    pub fragment_entry: &'static str,
    pub uniform_size: u64,
    pub textures: Vec<TextureSlot>,
    pub linear_sampler: bool,
    pub comparison_sampler: bool,
    pub vertex_layout: VertexLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    D2,
    /// Six square faces in +X, -X, +Y, -Y, +Z, -Z order.
    Cube,
    /// `depth` slices of `width` x `height`.
    D3 { depth: u32 },
}

/// RGBA8 texel data for a disk resource.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureUpload {
    pub label: String,
    pub kind: UploadKind,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Read-back contents of a colour target.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetPixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Everything the pipeline needs from a GPU.
pub trait RenderDevice {
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetId>;
    fn destroy_target(&mut self, id: TargetId);
    fn target_size(&self, id: TargetId) -> Result<(u32, u32)>;
    /// The presentable back buffer.
    fn viewport_target(&self) -> TargetId;
    /// Resize the presentable back buffer.
    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()>;

    fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<BufferId>;
    fn buffer_size(&self, id: BufferId) -> Result<u64>;
    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&mut self, id: BufferId);

    fn create_texture(&mut self, upload: &TextureUpload) -> Result<TextureId>;
    fn destroy_texture(&mut self, id: TextureId);

    /// Compile (or recompile) a named program.
    fn register_shader(&mut self, desc: &ShaderDesc) -> Result<()>;

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()>;
    fn draw(&mut self, call: &DrawCall<'_>) -> Result<DrawStats>;
    fn end_pass(&mut self) -> Result<()>;

    /// Copy the whole of `src` into `dst` at `origin`. Both must be colour
    /// targets of the same format.
    fn copy_target(&mut self, src: TargetId, dst: TargetId, origin: [u32; 2]) -> Result<()>;
    fn read_target(&mut self, id: TargetId) -> Result<TargetPixels>;
    fn present(&mut self) -> Result<()>;
}

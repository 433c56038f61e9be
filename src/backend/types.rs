//! Common types shared between backends

use serde::Deserialize;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Rg32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture usage flags.
///
/// Each flag enables one derived view; `STAGING` marks a CPU-accessible
/// texture that can only take part in copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const RENDER_TARGET: Self = Self(1 << 0);
    pub const DEPTH_STENCIL: Self = Self(1 << 1);
    pub const SHADER_RESOURCE: Self = Self(1 << 2);
    pub const UNORDERED_ACCESS: Self = Self(1 << 3);
    pub const STAGING: Self = Self(1 << 4);

    /// Color target that is also sampled and written by compute passes
    pub const RENDER_NODE: Self = Self((1 << 0) | (1 << 2) | (1 << 3));
    /// Sampled texture whose mip chain is generated on the GPU
    pub const MIPPED_TEXTURE: Self = Self((1 << 0) | (1 << 2));

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    TwoD,
    /// Six square faces stored as array layers
    Cube,
}

impl TextureKind {
    pub fn layers(&self) -> u32 {
        match self {
            TextureKind::TwoD => 1,
            TextureKind::Cube => 6,
        }
    }
}

/// Typed access descriptor derived from a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil,
    ShaderResource,
    UnorderedAccess,
}

impl ViewKind {
    /// Usage flag a texture must carry before this view can be derived
    pub fn required_usage(&self) -> TextureUsage {
        match self {
            ViewKind::RenderTarget => TextureUsage::RENDER_TARGET,
            ViewKind::DepthStencil => TextureUsage::DEPTH_STENCIL,
            ViewKind::ShaderResource => TextureUsage::SHADER_RESOURCE,
            ViewKind::UnorderedAccess => TextureUsage::UNORDERED_ACCESS,
        }
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    pub fn layers(&self) -> u32 {
        self.kind.layers()
    }

    /// Tightly packed size of one mip-0 layer in bytes
    pub fn layer_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }

    /// Bytes allocated for the whole texture including every mip and layer
    pub fn allocation_size(&self) -> u64 {
        let bpp = self.format.bytes_per_pixel() as u64;
        let per_layer: u64 = (0..self.mip_levels)
            .map(|level| {
                let (w, h) = mip_extent(self.width, self.height, level);
                w as u64 * h as u64 * bpp
            })
            .sum();
        per_layer * self.layers() as u64
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            kind: TextureKind::TwoD,
            width: 1,
            height: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SHADER_RESOURCE,
        }
    }
}

/// Number of levels in a full mip chain for the given size
pub fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Size of a mip level, never smaller than one texel
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// Buffer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
    Staging,
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub stride: u32,
    pub kind: BufferKind,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
    Sint32,
    Sint32x2,
    Sint32x3,
    Sint32x4,
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        4 * self.components() as u64
    }

    pub fn components(&self) -> u32 {
        match self {
            VertexFormat::Uint32 | VertexFormat::Sint32 | VertexFormat::Float32 => 1,
            VertexFormat::Uint32x2 | VertexFormat::Sint32x2 | VertexFormat::Float32x2 => 2,
            VertexFormat::Uint32x3 | VertexFormat::Sint32x3 | VertexFormat::Float32x3 => 3,
            VertexFormat::Uint32x4 | VertexFormat::Sint32x4 | VertexFormat::Float32x4 => 4,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout bound at slot 0
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Polygon fill mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Compare function for depth tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
    Anisotropic,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub address: AddressMode,
    pub filter: FilterMode,
    pub anisotropy: u16,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            address: AddressMode::Wrap,
            filter: FilterMode::Linear,
            anisotropy: 1,
        }
    }
}

/// Device creation tier, tried in configuration order at init
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTier {
    /// GPU adapter
    Hardware,
    /// Software rasterizer adapter exposed by the driver
    Software,
    /// CPU reference device
    Reference,
}

/// Rendering viewport in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

//! Core backend abstraction traits
//!
//! The device context talks to a backend only through [`GraphicsBackend`].
//! Binding state lives in the context; by the time a draw or dispatch
//! reaches a backend every slot has been resolved to a `(group, binding)`
//! pair and a concrete resource.

use crate::backend::types::*;
use std::sync::Arc;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Unknown handle {0}")]
    UnknownHandle(u64),
    #[error("Readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderPipelineHandle(pub(crate) u64);

/// Handle to a compute pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputePipelineHandle(pub(crate) u64);

macro_rules! handle_id {
    ($($ty:ident),*) => {
        $(impl $ty {
            /// Raw arena id, stable for the lifetime of the device
            pub fn id(&self) -> u64 {
                self.0
            }
        })*
    };
}

handle_id!(
    BufferHandle,
    TextureHandle,
    TextureViewHandle,
    SamplerHandle,
    RenderPipelineHandle,
    ComputePipelineHandle
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const COMPUTE: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn from_stage(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Fragment => Self::FRAGMENT,
            ShaderStage::Compute => Self::COMPUTE,
        }
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ShaderStageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
    Sint,
    Uint,
}

/// Binding type as declared by a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    Texture {
        sample_type: TextureSampleType,
        cube: bool,
    },
    StorageTexture {
        format: TextureFormat,
        read: bool,
    },
    Sampler {
        comparison: bool,
    },
}

/// One reflected resource binding of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingLayoutEntry {
    pub group: u32,
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

/// Resource attached to a resolved binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    ConstantBuffer(BufferHandle),
    ShaderResource(TextureViewHandle),
    Sampler(SamplerHandle),
    UnorderedAccess(TextureViewHandle),
}

/// Binding resolved from a context slot to a shader location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub group: u32,
    pub binding: u32,
    pub resource: BoundResource,
}

/// Render pipeline descriptor
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    /// SPIR-V words of the vertex stage
    pub vertex_shader: Vec<u32>,
    /// SPIR-V words of the pixel stage
    pub fragment_shader: Vec<u32>,
    pub entry_point: String,
    pub vertex_layout: VertexBufferLayout,
    pub bindings: Vec<BindingLayoutEntry>,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
    pub depth_compare: CompareFunction,
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub shader: Vec<u32>,
    pub entry_point: String,
    pub bindings: Vec<BindingLayoutEntry>,
}

/// A fully resolved draw submission
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub pipeline: RenderPipelineHandle,
    pub color_target: Option<TextureViewHandle>,
    pub depth_target: Option<TextureViewHandle>,
    pub viewport: Viewport,
    pub bindings: Vec<ResolvedBinding>,
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    pub count: u32,
    pub indexed: bool,
}

/// A fully resolved compute dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCall {
    pub pipeline: ComputePipelineHandle,
    pub bindings: Vec<ResolvedBinding>,
    pub groups: [u32; 3],
}

/// Where the presentation surface comes from
#[derive(Clone)]
pub enum WindowSource {
    Native(Arc<winit::window::Window>),
    /// Offscreen back buffer, used by tools and tests
    Headless { width: u32, height: u32 },
}

impl std::fmt::Debug for WindowSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowSource::Native(window) => f.debug_tuple("Native").field(&window.id()).finish(),
            WindowSource::Headless { width, height } => f
                .debug_struct("Headless")
                .field("width", width)
                .field("height", height)
                .finish(),
        }
    }
}

impl WindowSource {
    /// Current size of the window, never zero
    pub fn size(&self) -> (u32, u32) {
        match self {
            WindowSource::Native(window) => {
                let size = window.inner_size();
                (size.width.max(1), size.height.max(1))
            }
            WindowSource::Headless { width, height } => ((*width).max(1), (*height).max(1)),
        }
    }
}

/// Presentation surface description returned by `attach_surface`
#[derive(Debug, Clone, Copy)]
pub struct SurfaceInfo {
    pub back_buffer: TextureHandle,
    pub back_buffer_view: TextureViewHandle,
    /// Back buffer format
    pub format: TextureFormat,
    /// Back buffer size
    pub width: u32,
    pub height: u32,
    /// Size of the window the surface presents to
    pub surface_width: u32,
    pub surface_height: u32,
}

/// Main graphics backend trait
///
/// Every method is issued from one thread in program order. Work recorded
/// here becomes visible to later calls on the same backend without any
/// explicit synchronization from the caller.
pub trait GraphicsBackend {
    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    // Presentation

    /// Create the presentation surface and a `width` x `height` back buffer
    fn attach_surface(
        &mut self,
        window: WindowSource,
        width: u32,
        height: u32,
    ) -> BackendResult<SurfaceInfo>;

    /// Reconfigure the surface to a new window size; the back buffer keeps
    /// its size and handle
    fn resize_surface(&mut self, width: u32, height: u32) -> BackendResult<(u32, u32)>;

    /// Submit outstanding work and flip the surface
    fn present(&mut self, vsync: bool) -> BackendResult<()>;

    /// Release the presentation surface
    fn detach_surface(&mut self);

    // Resource creation

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Derive a typed view from a texture
    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        kind: ViewKind,
    ) -> BackendResult<TextureViewHandle>;

    /// Replace mip 0 of every layer with tightly packed bytes
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Read mip 0 of every layer as tightly packed bytes
    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>>;

    /// Fill mips 1.. from mip 0
    fn generate_mips(&mut self, texture: TextureHandle) -> BackendResult<()>;

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    /// Read the whole buffer back to the CPU
    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>>;

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    // Pipeline creation

    /// Create a render pipeline
    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle>;

    // Transfers

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> BackendResult<()>;

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> BackendResult<()>;

    fn copy_buffer_to_texture(&mut self, src: BufferHandle, dst: TextureHandle)
        -> BackendResult<()>;

    fn copy_texture_to_buffer(&mut self, src: TextureHandle, dst: BufferHandle)
        -> BackendResult<()>;

    // Command recording and execution

    /// Clear a render-target view
    fn clear_color(&mut self, view: TextureViewHandle, color: [f32; 4]) -> BackendResult<()>;

    /// Clear a depth-stencil view
    fn clear_depth(&mut self, view: TextureViewHandle, depth: f32, stencil: u8)
        -> BackendResult<()>;

    /// Draw primitives
    fn draw(&mut self, call: &DrawCall) -> BackendResult<()>;

    /// Dispatch compute work
    fn dispatch(&mut self, call: &DispatchCall) -> BackendResult<()>;

    /// Submit everything recorded so far
    fn flush(&mut self);

    // Resource cleanup

    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);
}

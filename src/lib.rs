//! render-core - the GPU-facing core of an interactive renderer
//!
//! A [`DeviceContext`] owns the device and a D3D11-style register file of
//! bound resources. Render nodes record draws and dispatches through it,
//! and a [`RenderGraph`] runs the nodes in order and copies the last node's
//! output to the back buffer.
//!
//! Devices:
//! - **wgpu**: hardware adapters and the driver's software rasterizer
//! - **Reference**: a CPU device that stores real bytes and records draws,
//!   used for tests and machines without a GPU
//!
//! Shaders are written in WGSL and compiled to SPIR-V with naga; vertex
//! layouts and resource bindings are reflected from the compiled bytecode.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod shader;

pub use backend::{BackendTier, TextureHandle, WindowSource};
pub use config::RendererConfig;
pub use context::DeviceContext;
pub use error::{RenderError, RenderResult};
pub use memory::{MemoryDomain, MemoryTracker};
pub use pipeline::{ComputePipeline, ComputePipelineDesc, GraphicsPipeline, GraphicsPipelineDesc};
pub use render_graph::{
    AntiAliasNode, CompositeNode, ForwardNode, ForwardVertex, RenderGraph, RenderNode,
};
pub use resources::{Buffer, Sampler, Texture};
pub use scene::{Camera, GpuMesh, RenderObject, Scene};
pub use shader::{ShaderBytecode, ShaderCompiler, ShaderLibrary};

/// Install `env_logger` with an `info` default filter.
///
/// `RUST_LOG` overrides the default. Calling it more than once is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

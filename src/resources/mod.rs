//! Resource objects
//!
//! Thin owners of GPU memory: textures with their derived views, buffers
//! and samplers. Each is created through the device context and must be
//! destroyed through it.

mod buffer;
mod sampler;
mod texture;

pub use buffer::*;
pub use sampler::*;
pub use texture::*;

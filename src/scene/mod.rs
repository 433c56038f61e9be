//! Scene interface consumed by render nodes
//!
//! Scene traversal and visibility belong to the application; nodes only
//! read the camera and the flat list of objects handed to them each frame.

mod camera;

pub use camera::*;

use crate::backend::{BufferHandle, TextureHandle};
use glam::Mat4;

/// Geometry already resident on the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    /// 32-bit indices
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

/// A renderable object in the scene
#[derive(Debug, Clone, PartialEq)]
pub struct RenderObject {
    pub transform: Mat4,
    pub meshes: Vec<GpuMesh>,
    /// Falls back to the error texture when missing
    pub albedo: Option<TextureHandle>,
}

impl RenderObject {
    pub fn new(meshes: Vec<GpuMesh>) -> Self {
        Self {
            transform: Mat4::IDENTITY,
            meshes,
            albedo: None,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_albedo(mut self, albedo: TextureHandle) -> Self {
        self.albedo = Some(albedo);
        self
    }
}

/// The per-frame view of the scene
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub camera: Camera,
    pub objects: Vec<RenderObject>,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            objects: Vec::new(),
        }
    }

    pub fn add_object(&mut self, object: RenderObject) {
        self.objects.push(object);
    }
}

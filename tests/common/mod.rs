//! Common utilities for device integration tests.
//!
//! Every test builds a [`TestContext`] for one backend tier and skips itself
//! when that tier cannot create a device on the current machine.

use std::any::Any;

use render_core::backend::{BackendTier, TextureFormat, TextureHandle, TextureKind, TextureUsage};
use render_core::{
    Camera, DeviceContext, RenderNode, RenderResult, RendererConfig, Scene, Texture, WindowSource,
};

/// Render resolution used by every test
pub const TEST_SIZE: u32 = 64;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Device tiers exercised by the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU reference device, always available.
    Reference,
    /// wgpu on a hardware adapter.
    Hardware,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Reference => true,
            #[cfg(feature = "wgpu-backend")]
            Backend::Hardware => true,
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::Hardware => false,
        }
    }

    /// Get the backend name for display.
    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Reference => "reference",
            Backend::Hardware => "hardware",
        }
    }

    pub fn tier(self) -> BackendTier {
        match self {
            Backend::Reference => BackendTier::Reference,
            Backend::Hardware => BackendTier::Hardware,
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A device context with a headless surface attached.
pub struct TestContext {
    pub ctx: DeviceContext,
    #[allow(dead_code)]
    pub backend: Backend,
}

impl TestContext {
    /// Create a test context, or `None` when the tier has no device here.
    pub fn new(backend: Backend) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        if !backend.is_available() {
            return None;
        }
        let config = RendererConfig::default()
            .with_size(TEST_SIZE, TEST_SIZE)
            .with_tiers(vec![backend.tier()]);
        let mut ctx = match DeviceContext::init(&config) {
            Ok(ctx) => ctx,
            Err(e) => {
                eprintln!("Failed to create {} device: {}", backend.name(), e);
                return None;
            }
        };
        ctx.attach_surface(WindowSource::Headless {
            width: TEST_SIZE,
            height: TEST_SIZE,
        })
        .ok()?;
        Some(Self { ctx, backend })
    }

    /// A scene with a default camera and no objects
    #[allow(dead_code)]
    pub fn empty_scene() -> Scene {
        Scene::new(Camera::default().with_aspect(TEST_SIZE, TEST_SIZE))
    }

    /// Read one RGBA8 pixel of a texture.
    #[allow(dead_code)]
    pub fn read_pixel(&mut self, texture: TextureHandle, x: u32, y: u32) -> [u8; 4] {
        let width = self.ctx.texture_desc(texture).expect("texture").width;
        let data = self.ctx.read_back_texture(texture).expect("readback");
        let offset = ((y * width + x) * 4) as usize;
        [
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]
    }
}

// ============================================================================
// Test Nodes
// ============================================================================

/// Convert a unit color to the RGBA8 bytes a clear leaves behind.
#[allow(dead_code)]
pub fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Node that clears its own RGBA8 target to a fixed color.
#[allow(dead_code)]
pub struct ClearNode {
    name: String,
    enabled: bool,
    color: [f32; 4],
    target: Option<Texture>,
}

#[allow(dead_code)]
impl ClearNode {
    pub fn new(ctx: &mut DeviceContext, name: &str, color: [f32; 4]) -> RenderResult<Self> {
        let (width, height) = ctx.resolution();
        let target = Texture::new(
            ctx,
            TextureKind::TwoD,
            TextureUsage::RENDER_TARGET,
            width,
            height,
            TextureFormat::Rgba8Unorm,
            false,
        )?;
        target.make_render_target(ctx)?;
        Ok(Self {
            name: name.to_string(),
            enabled: true,
            color,
            target: Some(target),
        })
    }

    pub fn target(&self) -> Option<TextureHandle> {
        self.target.as_ref().map(|t| t.handle())
    }
}

impl RenderNode for ClearNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, ctx: &mut DeviceContext, _scene: &Scene) -> RenderResult<()> {
        if let Some(target) = &self.target {
            ctx.clear_render_target(target.handle(), self.color)?;
        }
        Ok(())
    }

    fn final_output(&self) -> Option<TextureHandle> {
        self.target()
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn release(&mut self, ctx: &mut DeviceContext) -> RenderResult<()> {
        if let Some(target) = self.target.take() {
            target.destroy(ctx)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

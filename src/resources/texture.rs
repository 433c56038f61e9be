//! Texture objects

use crate::backend::{
    full_mip_count, TextureDescriptor, TextureFormat, TextureHandle, TextureKind, TextureUsage,
    TextureViewHandle, ViewKind,
};
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use image::RgbaImage;
use std::path::Path;

/// Tile edge of the error checkerboard in texels
const CHECKER_TILE: u32 = 8;

/// GPU texture owned by its creator.
///
/// Other nodes only ever see the [`TextureHandle`]; views are derived on
/// demand and released together with the texture.
#[derive(Debug)]
pub struct Texture {
    handle: TextureHandle,
    desc: TextureDescriptor,
}

impl Texture {
    /// Allocate a texture; `mips` allocates the full chain
    pub fn new(
        ctx: &mut DeviceContext,
        kind: TextureKind,
        usage: TextureUsage,
        width: u32,
        height: u32,
        format: TextureFormat,
        mips: bool,
    ) -> RenderResult<Self> {
        Self::from_descriptor(
            ctx,
            TextureDescriptor {
                label: None,
                kind,
                width,
                height,
                mip_levels: if mips { full_mip_count(width, height) } else { 1 },
                format,
                usage,
            },
        )
    }

    pub fn from_descriptor(ctx: &mut DeviceContext, desc: TextureDescriptor) -> RenderResult<Self> {
        let handle = ctx.create_texture(&desc)?;
        Ok(Self { handle, desc })
    }

    /// Upload an RGBA8 image through a staging texture into a mipped,
    /// shader-readable texture
    pub fn create_from_image(
        ctx: &mut DeviceContext,
        image: &RgbaImage,
        label: &str,
    ) -> RenderResult<Self> {
        let (width, height) = image.dimensions();

        let staging = Self::from_descriptor(
            ctx,
            TextureDescriptor {
                label: Some(format!("{label} (staging)")),
                width,
                height,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::STAGING,
                ..Default::default()
            },
        )?;
        ctx.write_texture(staging.handle, image.as_raw())?;

        let texture = Self::from_descriptor(
            ctx,
            TextureDescriptor {
                label: Some(label.to_string()),
                width,
                height,
                mip_levels: full_mip_count(width, height),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::MIPPED_TEXTURE,
                ..Default::default()
            },
        )?;
        ctx.copy_texture_to_texture(staging.handle, texture.handle)?;
        texture.make_shader_resource(ctx)?;

        staging.destroy(ctx)?;
        Ok(texture)
    }

    /// Decode an image file and upload it
    pub fn from_file(ctx: &mut DeviceContext, path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let image = image::open(path)
            .map_err(|e| {
                log::error!("Failed to load texture {}: {}", label, e);
                RenderError::ResourceCreation {
                    label: label.clone(),
                    reason: e.to_string(),
                }
            })?
            .to_rgba8();
        Self::create_from_image(ctx, &image, &label)
    }

    /// Magenta and black checkerboard used where a texture is missing
    pub fn error_texture(ctx: &mut DeviceContext, size: u32) -> RenderResult<Self> {
        Self::create_from_image(ctx, &checkerboard(size), "Error Texture")
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn desc(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn make_render_target(&self, ctx: &mut DeviceContext) -> RenderResult<TextureViewHandle> {
        ctx.create_view(self.handle, ViewKind::RenderTarget)
    }

    pub fn make_depth_stencil(&self, ctx: &mut DeviceContext) -> RenderResult<TextureViewHandle> {
        ctx.create_view(self.handle, ViewKind::DepthStencil)
    }

    /// Derive the shader-readable view, filling the mip chain the first time
    pub fn make_shader_resource(&self, ctx: &mut DeviceContext) -> RenderResult<TextureViewHandle> {
        if let Some(view) = ctx.view(self.handle, ViewKind::ShaderResource) {
            return Ok(view);
        }
        let view = ctx.create_view(self.handle, ViewKind::ShaderResource)?;
        ctx.generate_mips(self.handle)?;
        Ok(view)
    }

    pub fn make_unordered_access(
        &self,
        ctx: &mut DeviceContext,
    ) -> RenderResult<TextureViewHandle> {
        ctx.create_view(self.handle, ViewKind::UnorderedAccess)
    }

    /// Release views, then memory
    pub fn destroy(self, ctx: &mut DeviceContext) -> RenderResult<()> {
        ctx.destroy_texture(self.handle)
    }
}

/// RGBA8 checkerboard of magenta and black tiles
pub fn checkerboard(size: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        if ((x / CHECKER_TILE) + (y / CHECKER_TILE)) % 2 == 0 {
            image::Rgba([255, 0, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 255])
        }
    })
}

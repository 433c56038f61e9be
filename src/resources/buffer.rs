//! Buffer objects

use crate::backend::{BufferDescriptor, BufferHandle, BufferKind};
use crate::context::DeviceContext;
use crate::error::RenderResult;
use bytemuck::Pod;

/// GPU buffer with its element stride and kind
#[derive(Debug)]
pub struct Buffer {
    handle: BufferHandle,
    desc: BufferDescriptor,
}

impl Buffer {
    /// Allocate a zero-filled buffer
    pub fn new(
        ctx: &mut DeviceContext,
        size: u64,
        stride: u32,
        kind: BufferKind,
        label: &str,
    ) -> RenderResult<Self> {
        let desc = BufferDescriptor {
            label: Some(label.to_string()),
            size,
            stride,
            kind,
        };
        let handle = ctx.create_buffer(&desc)?;
        Ok(Self { handle, desc })
    }

    /// Two-step upload: write a staging buffer, then copy it into a resident one
    pub fn create_from_data(
        ctx: &mut DeviceContext,
        data: &[u8],
        stride: u32,
        kind: BufferKind,
        label: &str,
    ) -> RenderResult<Self> {
        let size = data.len() as u64;
        if kind == BufferKind::Staging {
            let buffer = Self::new(ctx, size, stride, kind, label)?;
            buffer.upload(ctx, data)?;
            return Ok(buffer);
        }

        let staging = Self::new(
            ctx,
            size,
            stride,
            BufferKind::Staging,
            &format!("{label} (staging)"),
        )?;
        staging.upload(ctx, data)?;

        let buffer = Self::new(ctx, size, stride, kind, label)?;
        ctx.copy_buffer_to_buffer(staging.handle, buffer.handle)?;
        staging.destroy(ctx)?;
        Ok(buffer)
    }

    /// Upload a slice of plain values; the stride is the element size
    pub fn create_from_slice<T: Pod>(
        ctx: &mut DeviceContext,
        values: &[T],
        kind: BufferKind,
        label: &str,
    ) -> RenderResult<Self> {
        Self::create_from_data(
            ctx,
            bytemuck::cast_slice(values),
            std::mem::size_of::<T>() as u32,
            kind,
            label,
        )
    }

    /// Overwrite the contents; constant buffers are discarded and rewritten
    pub fn upload(&self, ctx: &mut DeviceContext, data: &[u8]) -> RenderResult<()> {
        ctx.upload_buffer(self.handle, data)
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn stride(&self) -> u32 {
        self.desc.stride
    }

    pub fn kind(&self) -> BufferKind {
        self.desc.kind
    }

    /// Number of `stride`-sized elements
    pub fn len(&self) -> u32 {
        if self.desc.stride == 0 {
            return 0;
        }
        (self.desc.size / self.desc.stride as u64) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn destroy(self, ctx: &mut DeviceContext) -> RenderResult<()> {
        ctx.destroy_buffer(self.handle)
    }
}

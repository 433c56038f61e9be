//! Device context
//!
//! Owns the device, the presentation surface, every live GPU object and the
//! register file of current bindings. Render nodes mutate the registers with
//! the `bind_*` family; `draw`, `draw_indexed` and `dispatch` snapshot them,
//! resolve every slot the bound pipeline reflects, and hand a fully resolved
//! call to the backend.

use std::collections::HashMap;

use crate::backend::{
    Backend, BackendResult, BackendTier, BoundResource, BufferDescriptor, BufferHandle,
    BufferKind, ComputePipelineDescriptor, ComputePipelineHandle, DispatchCall, DrawCall,
    GraphicsBackend, RenderPipelineDescriptor, RenderPipelineHandle, ResolvedBinding,
    SamplerDescriptor, SamplerHandle, SurfaceInfo, TextureDescriptor, TextureHandle,
    TextureUsage, TextureViewHandle, ViewKind, Viewport, WindowSource,
};
use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};
use crate::memory::{MemoryDomain, MemoryTracker};
use crate::pipeline::{slot_for, ComputePipeline, GraphicsPipeline, Slot, MAX_SLOTS};
use crate::shader::ShaderLibrary;

const SLOTS: usize = MAX_SLOTS as usize;

/// Log a failure at the point it is detected and hand it back
fn fail(err: RenderError) -> RenderError {
    err.logged()
}

fn report<T>(result: BackendResult<T>) -> RenderResult<T> {
    result.map_err(|e| fail(e.into()))
}

struct TextureEntry {
    desc: TextureDescriptor,
    views: HashMap<ViewKind, TextureViewHandle>,
    /// Back buffer owned by the surface
    surface: bool,
}

impl TextureEntry {
    fn name(&self, handle: TextureHandle) -> String {
        self.desc
            .label
            .clone()
            .unwrap_or_else(|| format!("#{}", handle.id()))
    }
}

/// Reflected binding of a pipeline and the register feeding it
#[derive(Debug, Clone, Copy)]
struct PipelineSlot {
    slot: Slot,
    group: u32,
    binding: u32,
}

struct RenderPipelineEntry {
    slots: Vec<PipelineSlot>,
    needs_vertex_buffer: bool,
}

/// Current binding state, cleared slot by slot with `unbind_*`
#[derive(Default)]
struct Registers {
    viewport: Option<Viewport>,
    color_target: Option<TextureHandle>,
    depth_target: Option<TextureHandle>,
    graphics_pipeline: Option<RenderPipelineHandle>,
    compute_pipeline: Option<ComputePipelineHandle>,
    vertex_constants: [Option<BufferHandle>; SLOTS],
    pixel_constants: [Option<BufferHandle>; SLOTS],
    compute_constants: [Option<BufferHandle>; SLOTS],
    shader_resources: [Option<TextureHandle>; SLOTS],
    compute_resources: [Option<TextureHandle>; SLOTS],
    samplers: [Option<SamplerHandle>; SLOTS],
    unordered_access: [Option<TextureHandle>; SLOTS],
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
}

impl Registers {
    fn texture_bound(&self, texture: TextureHandle) -> bool {
        let t = Some(texture);
        self.color_target == t
            || self.depth_target == t
            || self.shader_resources.contains(&t)
            || self.compute_resources.contains(&t)
            || self.unordered_access.contains(&t)
    }

    fn buffer_bound(&self, buffer: BufferHandle) -> bool {
        let b = Some(buffer);
        self.vertex_buffer == b
            || self.index_buffer == b
            || self.vertex_constants.contains(&b)
            || self.pixel_constants.contains(&b)
            || self.compute_constants.contains(&b)
    }
}

fn check_slot(slot: u32) -> RenderResult<usize> {
    if slot >= MAX_SLOTS {
        return Err(fail(RenderError::SlotOutOfRange {
            slot,
            max: MAX_SLOTS - 1,
        }));
    }
    Ok(slot as usize)
}

/// Immediate-mode device context
pub struct DeviceContext {
    backend: Backend,
    tier: BackendTier,
    width: u32,
    height: u32,
    surface: Option<SurfaceInfo>,
    textures: HashMap<TextureHandle, TextureEntry>,
    buffers: HashMap<BufferHandle, BufferDescriptor>,
    samplers: HashMap<SamplerHandle, SamplerDescriptor>,
    render_pipelines: HashMap<RenderPipelineHandle, RenderPipelineEntry>,
    compute_pipelines: HashMap<ComputePipelineHandle, Vec<PipelineSlot>>,
    registers: Registers,
    memory: MemoryTracker,
    shaders: ShaderLibrary,
}

impl DeviceContext {
    /// Create a device on the first tier of `config.tiers` that works
    pub fn init(config: &RendererConfig) -> RenderResult<Self> {
        let mut tried = Vec::new();
        for &tier in &config.tiers {
            tried.push(tier);
            match Backend::new(tier) {
                Ok(backend) => {
                    log::info!("Device created on {:?} tier ({})", tier, backend.name());
                    return Ok(Self::from_backend(backend, tier, config));
                }
                Err(e) => log::warn!("{:?} tier unavailable: {}", tier, e),
            }
        }
        Err(fail(RenderError::DeviceCreation { tried }))
    }

    fn from_backend(backend: Backend, tier: BackendTier, config: &RendererConfig) -> Self {
        Self {
            backend,
            tier,
            width: config.width,
            height: config.height,
            surface: None,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            samplers: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            registers: Registers::default(),
            memory: MemoryTracker::new(),
            shaders: ShaderLibrary::new(),
        }
    }

    fn device(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.device()
    }

    /// Tier the device was created on
    pub fn tier(&self) -> BackendTier {
        self.tier
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Render resolution node targets are allocated at
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    pub fn shaders(&mut self) -> &mut ShaderLibrary {
        &mut self.shaders
    }

    /// Live textures, excluding the back buffer
    pub fn live_textures(&self) -> usize {
        self.textures.values().filter(|t| !t.surface).count()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    // Presentation

    /// Bind the presentation surface; only one surface may be attached.
    ///
    /// The back buffer is allocated at the render resolution and scaled onto
    /// the window at present.
    pub fn attach_surface(&mut self, window: WindowSource) -> RenderResult<()> {
        if self.surface.is_some() {
            return Err(fail(RenderError::SurfaceAlreadyAttached));
        }
        let (width, height) = (self.width, self.height);
        let info = report(self.device().attach_surface(window, width, height))?;
        log::info!(
            "Surface attached: {}x{} back buffer ({:?}) on {}x{} window",
            info.width,
            info.height,
            info.format,
            info.surface_width,
            info.surface_height
        );

        let mut views = HashMap::new();
        views.insert(ViewKind::RenderTarget, info.back_buffer_view);
        self.textures.insert(
            info.back_buffer,
            TextureEntry {
                desc: TextureDescriptor {
                    label: Some("Back Buffer".into()),
                    width: info.width,
                    height: info.height,
                    format: info.format,
                    usage: TextureUsage::RENDER_TARGET,
                    ..Default::default()
                },
                views,
                surface: true,
            },
        );
        self.surface = Some(info);
        Ok(())
    }

    /// Reconfigure the surface to a new window size; zero sizes are ignored
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let Some(mut info) = self.surface else {
            return Err(fail(RenderError::SurfaceNotAttached));
        };
        let (width, height) = report(self.device().resize_surface(width, height))?;
        info.surface_width = width;
        info.surface_height = height;
        self.surface = Some(info);
        log::debug!("Surface resized to {}x{}", width, height);
        Ok(())
    }

    /// Presentable texture of the attached surface
    pub fn back_buffer(&self) -> RenderResult<TextureHandle> {
        self.surface
            .map(|s| s.back_buffer)
            .ok_or_else(|| fail(RenderError::SurfaceNotAttached))
    }

    /// Size of the window the surface presents to
    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.surface.map(|s| (s.surface_width, s.surface_height))
    }

    /// Flush outstanding work and flip the surface
    pub fn present(&mut self, vsync: bool) -> RenderResult<()> {
        if self.surface.is_none() {
            return Err(fail(RenderError::SurfaceNotAttached));
        }
        report(self.device().present(vsync))
    }

    // Textures

    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        let name = desc.label.clone().unwrap_or_else(|| "texture".into());
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(fail(RenderError::ResourceCreation {
                label: name,
                reason: format!(
                    "invalid extent {}x{} with {} mips",
                    desc.width, desc.height, desc.mip_levels
                ),
            }));
        }
        let handle = self
            .device()
            .create_texture(desc)
            .map_err(|e| {
                fail(RenderError::ResourceCreation {
                    label: name,
                    reason: e.to_string(),
                })
            })?;
        self.memory
            .push(MemoryDomain::Textures, desc.allocation_size());
        self.textures.insert(
            handle,
            TextureEntry {
                desc: desc.clone(),
                views: HashMap::new(),
                surface: false,
            },
        );
        Ok(handle)
    }

    fn texture_entry(&self, texture: TextureHandle) -> RenderResult<&TextureEntry> {
        self.textures
            .get(&texture)
            .ok_or_else(|| fail(RenderError::InvalidHandle(texture.id())))
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> RenderResult<&TextureDescriptor> {
        Ok(&self.texture_entry(texture)?.desc)
    }

    /// Derive a view, reusing an existing one of the same kind
    pub fn create_view(
        &mut self,
        texture: TextureHandle,
        kind: ViewKind,
    ) -> RenderResult<TextureViewHandle> {
        let entry = self.texture_entry(texture)?;
        if let Some(view) = entry.views.get(&kind) {
            return Ok(*view);
        }
        let depth = entry.desc.format.is_depth();
        let format_ok = match kind {
            ViewKind::DepthStencil => depth,
            ViewKind::RenderTarget | ViewKind::UnorderedAccess => !depth,
            ViewKind::ShaderResource => true,
        };
        if !entry.desc.usage.contains(kind.required_usage()) || !format_ok {
            return Err(fail(RenderError::UnsupportedView {
                view: kind,
                texture: entry.name(texture),
            }));
        }

        let view = report(self.device().create_texture_view(texture, kind))?;
        if let Some(entry) = self.textures.get_mut(&texture) {
            entry.views.insert(kind, view);
        }
        Ok(view)
    }

    /// Existing view of a texture, if one was derived
    pub fn view(&self, texture: TextureHandle, kind: ViewKind) -> Option<TextureViewHandle> {
        self.textures
            .get(&texture)
            .and_then(|entry| entry.views.get(&kind).copied())
    }

    fn require_view(
        &self,
        texture: TextureHandle,
        kind: ViewKind,
    ) -> RenderResult<TextureViewHandle> {
        let entry = self.texture_entry(texture)?;
        entry.views.get(&kind).copied().ok_or_else(|| {
            fail(RenderError::MissingView {
                view: kind,
                texture: entry.name(texture),
            })
        })
    }

    /// Replace mip 0 of every layer with tightly packed texels
    pub fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> RenderResult<()> {
        let desc = self.texture_desc(texture)?;
        let expected = desc.layer_size() * desc.layers() as u64;
        if data.len() as u64 != expected {
            return Err(fail(RenderError::CopyMismatch(format!(
                "{} bytes written to a texture holding {} bytes",
                data.len(),
                expected
            ))));
        }
        report(self.device().write_texture(texture, data))
    }

    /// Rebuild mips 1.. from mip 0
    pub fn generate_mips(&mut self, texture: TextureHandle) -> RenderResult<()> {
        if self.texture_desc(texture)?.mip_levels > 1 {
            report(self.device().generate_mips(texture))?;
        }
        Ok(())
    }

    /// Release views, then memory
    pub fn destroy_texture(&mut self, texture: TextureHandle) -> RenderResult<()> {
        let entry = self.texture_entry(texture)?;
        if entry.surface || self.registers.texture_bound(texture) {
            return Err(fail(RenderError::ResourceInUse(texture.id())));
        }
        let Some(entry) = self.textures.remove(&texture) else {
            return Err(RenderError::InvalidHandle(texture.id()));
        };
        for view in entry.views.into_values() {
            self.device().destroy_texture_view(view);
        }
        self.device().destroy_texture(texture);
        self.memory
            .pop(MemoryDomain::Textures, entry.desc.allocation_size());
        Ok(())
    }

    // Buffers

    pub fn create_buffer(&mut self, desc: &BufferDescriptor) -> RenderResult<BufferHandle> {
        let name = desc.label.clone().unwrap_or_else(|| "buffer".into());
        if desc.size == 0 {
            return Err(fail(RenderError::ResourceCreation {
                label: name,
                reason: "zero-sized buffer".into(),
            }));
        }
        let handle = self.device().create_buffer(desc).map_err(|e| {
            fail(RenderError::ResourceCreation {
                label: name,
                reason: e.to_string(),
            })
        })?;
        self.memory.push(MemoryDomain::Buffers, desc.size);
        self.buffers.insert(handle, desc.clone());
        Ok(handle)
    }

    pub fn buffer_desc(&self, buffer: BufferHandle) -> RenderResult<&BufferDescriptor> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| fail(RenderError::InvalidHandle(buffer.id())))
    }

    /// Write `data` from the start of the buffer.
    ///
    /// Constant buffers are discarded and rewritten whole, so bytes past
    /// `data` read as zero afterwards.
    pub fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()> {
        let desc = self.buffer_desc(buffer)?;
        if data.len() as u64 > desc.size {
            return Err(fail(RenderError::CopyMismatch(format!(
                "{} bytes uploaded to {:?} of {} bytes",
                data.len(),
                desc.label,
                desc.size
            ))));
        }
        if desc.kind == BufferKind::Constant && (data.len() as u64) < desc.size {
            let mut whole = vec![0u8; desc.size as usize];
            whole[..data.len()].copy_from_slice(data);
            return report(self.device().write_buffer(buffer, 0, &whole));
        }
        report(self.device().write_buffer(buffer, 0, data))
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> RenderResult<()> {
        self.buffer_desc(buffer)?;
        if self.registers.buffer_bound(buffer) {
            return Err(fail(RenderError::ResourceInUse(buffer.id())));
        }
        if let Some(desc) = self.buffers.remove(&buffer) {
            self.device().destroy_buffer(buffer);
            self.memory.pop(MemoryDomain::Buffers, desc.size);
        }
        Ok(())
    }

    // Samplers

    pub fn create_sampler(&mut self, desc: &SamplerDescriptor) -> RenderResult<SamplerHandle> {
        let handle = report(self.device().create_sampler(desc))?;
        self.samplers.insert(handle, desc.clone());
        Ok(handle)
    }

    pub fn destroy_sampler(&mut self, sampler: SamplerHandle) -> RenderResult<()> {
        if !self.samplers.contains_key(&sampler) {
            return Err(fail(RenderError::InvalidHandle(sampler.id())));
        }
        if self.registers.samplers.contains(&Some(sampler)) {
            return Err(fail(RenderError::ResourceInUse(sampler.id())));
        }
        self.samplers.remove(&sampler);
        self.device().destroy_sampler(sampler);
        Ok(())
    }

    // Pipelines

    pub fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> RenderResult<RenderPipelineHandle> {
        let slots = desc
            .bindings
            .iter()
            .map(|entry| {
                Ok(PipelineSlot {
                    slot: slot_for(entry, false).map_err(fail)?,
                    group: entry.group,
                    binding: entry.binding,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let handle = report(self.device().create_render_pipeline(desc))?;
        self.render_pipelines.insert(
            handle,
            RenderPipelineEntry {
                slots,
                needs_vertex_buffer: !desc.vertex_layout.attributes.is_empty(),
            },
        );
        Ok(handle)
    }

    pub fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> RenderResult<ComputePipelineHandle> {
        let slots = desc
            .bindings
            .iter()
            .map(|entry| {
                Ok(PipelineSlot {
                    slot: slot_for(entry, true).map_err(fail)?,
                    group: entry.group,
                    binding: entry.binding,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let handle = report(self.device().create_compute_pipeline(desc))?;
        self.compute_pipelines.insert(handle, slots);
        Ok(handle)
    }

    /// Destroying the bound pipeline also clears the pipeline register
    pub fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) -> RenderResult<()> {
        if self.render_pipelines.remove(&pipeline).is_none() {
            return Err(fail(RenderError::InvalidHandle(pipeline.id())));
        }
        if self.registers.graphics_pipeline == Some(pipeline) {
            self.registers.graphics_pipeline = None;
        }
        self.device().destroy_render_pipeline(pipeline);
        Ok(())
    }

    pub fn destroy_compute_pipeline(
        &mut self,
        pipeline: ComputePipelineHandle,
    ) -> RenderResult<()> {
        if self.compute_pipelines.remove(&pipeline).is_none() {
            return Err(fail(RenderError::InvalidHandle(pipeline.id())));
        }
        if self.registers.compute_pipeline == Some(pipeline) {
            self.registers.compute_pipeline = None;
        }
        self.device().destroy_compute_pipeline(pipeline);
        Ok(())
    }

    // Fixed-function state

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.registers.viewport = Some(Viewport { width, height });
    }

    /// Bind a color target and optional depth target for later draws
    pub fn bind_render_target(
        &mut self,
        color: TextureHandle,
        depth: Option<TextureHandle>,
    ) -> RenderResult<()> {
        self.require_view(color, ViewKind::RenderTarget)?;
        if let Some(depth) = depth {
            self.require_view(depth, ViewKind::DepthStencil)?;
        }
        self.registers.color_target = Some(color);
        self.registers.depth_target = depth;
        Ok(())
    }

    pub fn unbind_render_target(&mut self) {
        self.registers.color_target = None;
        self.registers.depth_target = None;
    }

    pub fn clear_render_target(
        &mut self,
        texture: TextureHandle,
        rgba: [f32; 4],
    ) -> RenderResult<()> {
        let view = self.require_view(texture, ViewKind::RenderTarget)?;
        report(self.device().clear_color(view, rgba))
    }

    pub fn clear_depth_target(
        &mut self,
        texture: TextureHandle,
        depth: f32,
        stencil: u8,
    ) -> RenderResult<()> {
        let view = self.require_view(texture, ViewKind::DepthStencil)?;
        report(self.device().clear_depth(view, depth, stencil))
    }

    // Copies

    /// Copy every mip level the two textures share
    pub fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> RenderResult<()> {
        let s = self.texture_desc(src)?;
        let d = self.texture_desc(dst)?;
        if s.format != d.format || s.width != d.width || s.height != d.height || s.kind != d.kind {
            return Err(fail(RenderError::CopyMismatch(format!(
                "texture {}x{} {:?} {:?} into {}x{} {:?} {:?}",
                s.width, s.height, s.format, s.kind, d.width, d.height, d.format, d.kind
            ))));
        }
        report(self.device().copy_texture_to_texture(src, dst))
    }

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
    ) -> RenderResult<()> {
        let size = self.buffer_desc(src)?.size;
        let dst_size = self.buffer_desc(dst)?.size;
        if size != dst_size {
            return Err(fail(RenderError::CopyMismatch(format!(
                "buffer of {size} bytes into buffer of {dst_size} bytes"
            ))));
        }
        report(self.device().copy_buffer_to_buffer(src, dst, size))
    }

    fn packed_texture_size(&self, texture: TextureHandle) -> RenderResult<u64> {
        let desc = self.texture_desc(texture)?;
        Ok(desc.layer_size() * desc.layers() as u64)
    }

    /// Fill mip 0 of a texture from tightly packed buffer bytes
    pub fn copy_buffer_to_texture(
        &mut self,
        src: BufferHandle,
        dst: TextureHandle,
    ) -> RenderResult<()> {
        let size = self.buffer_desc(src)?.size;
        let expected = self.packed_texture_size(dst)?;
        if size != expected {
            return Err(fail(RenderError::CopyMismatch(format!(
                "buffer of {size} bytes into texture of {expected} bytes"
            ))));
        }
        report(self.device().copy_buffer_to_texture(src, dst))
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: TextureHandle,
        dst: BufferHandle,
    ) -> RenderResult<()> {
        let expected = self.packed_texture_size(src)?;
        let size = self.buffer_desc(dst)?.size;
        if size != expected {
            return Err(fail(RenderError::CopyMismatch(format!(
                "texture of {expected} bytes into buffer of {size} bytes"
            ))));
        }
        report(self.device().copy_texture_to_buffer(src, dst))
    }

    // Readback

    /// Tightly packed mip-0 bytes of every layer
    pub fn read_back_texture(&mut self, texture: TextureHandle) -> RenderResult<Vec<u8>> {
        self.texture_entry(texture)?;
        self.device().flush();
        report(self.device().read_texture(texture))
    }

    pub fn read_back_buffer(&mut self, buffer: BufferHandle) -> RenderResult<Vec<u8>> {
        self.buffer_desc(buffer)?;
        self.device().flush();
        report(self.device().read_buffer(buffer))
    }

    // Bindings

    pub fn bind_graphics_pipeline(&mut self, pipeline: &GraphicsPipeline) -> RenderResult<()> {
        if !self.render_pipelines.contains_key(&pipeline.handle()) {
            return Err(fail(RenderError::InvalidHandle(pipeline.handle().id())));
        }
        self.registers.graphics_pipeline = Some(pipeline.handle());
        Ok(())
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) -> RenderResult<()> {
        if !self.compute_pipelines.contains_key(&pipeline.handle()) {
            return Err(fail(RenderError::InvalidHandle(pipeline.handle().id())));
        }
        self.registers.compute_pipeline = Some(pipeline.handle());
        Ok(())
    }

    fn constant_buffer(&self, buffer: BufferHandle) -> RenderResult<BufferHandle> {
        let desc = self.buffer_desc(buffer)?;
        if desc.kind != BufferKind::Constant {
            return Err(fail(RenderError::InvalidBinding(format!(
                "{:?} buffer {:?} bound as a constant buffer",
                desc.kind, desc.label
            ))));
        }
        Ok(buffer)
    }

    fn texture_with_view(
        &self,
        texture: TextureHandle,
        kind: ViewKind,
    ) -> RenderResult<TextureHandle> {
        self.require_view(texture, kind)?;
        Ok(texture)
    }

    pub fn bind_vertex_constant_buffer(
        &mut self,
        buffer: BufferHandle,
        slot: u32,
    ) -> RenderResult<()> {
        let s = check_slot(slot)?;
        self.registers.vertex_constants[s] = Some(self.constant_buffer(buffer)?);
        Ok(())
    }

    pub fn unbind_vertex_constant_buffer(&mut self, slot: u32) -> RenderResult<()> {
        self.registers.vertex_constants[check_slot(slot)?] = None;
        Ok(())
    }

    pub fn bind_pixel_constant_buffer(
        &mut self,
        buffer: BufferHandle,
        slot: u32,
    ) -> RenderResult<()> {
        let s = check_slot(slot)?;
        self.registers.pixel_constants[s] = Some(self.constant_buffer(buffer)?);
        Ok(())
    }

    pub fn unbind_pixel_constant_buffer(&mut self, slot: u32) -> RenderResult<()> {
        self.registers.pixel_constants[check_slot(slot)?] = None;
        Ok(())
    }

    pub fn bind_compute_constant_buffer(
        &mut self,
        buffer: BufferHandle,
        slot: u32,
    ) -> RenderResult<()> {
        let s = check_slot(slot)?;
        self.registers.compute_constants[s] = Some(self.constant_buffer(buffer)?);
        Ok(())
    }

    pub fn unbind_compute_constant_buffer(&mut self, slot: u32) -> RenderResult<()> {
        self.registers.compute_constants[check_slot(slot)?] = None;
        Ok(())
    }

    pub fn bind_shader_resource(&mut self, texture: TextureHandle, slot: u32) -> RenderResult<()> {
        let s = check_slot(slot)?;
        self.registers.shader_resources[s] =
            Some(self.texture_with_view(texture, ViewKind::ShaderResource)?);
        Ok(())
    }

    pub fn unbind_shader_resource(&mut self, slot: u32) -> RenderResult<()> {
        self.registers.shader_resources[check_slot(slot)?] = None;
        Ok(())
    }

    pub fn bind_compute_shader_resource(
        &mut self,
        texture: TextureHandle,
        slot: u32,
    ) -> RenderResult<()> {
        let s = check_slot(slot)?;
        self.registers.compute_resources[s] =
            Some(self.texture_with_view(texture, ViewKind::ShaderResource)?);
        Ok(())
    }

    pub fn unbind_compute_shader_resource(&mut self, slot: u32) -> RenderResult<()> {
        self.registers.compute_resources[check_slot(slot)?] = None;
        Ok(())
    }

    pub fn bind_compute_unordered_access(
        &mut self,
        texture: TextureHandle,
        slot: u32,
    ) -> RenderResult<()> {
        let s = check_slot(slot)?;
        self.registers.unordered_access[s] =
            Some(self.texture_with_view(texture, ViewKind::UnorderedAccess)?);
        Ok(())
    }

    pub fn unbind_compute_unordered_access(&mut self, slot: u32) -> RenderResult<()> {
        self.registers.unordered_access[check_slot(slot)?] = None;
        Ok(())
    }

    pub fn bind_sampler(&mut self, sampler: SamplerHandle, slot: u32) -> RenderResult<()> {
        let s = check_slot(slot)?;
        if !self.samplers.contains_key(&sampler) {
            return Err(fail(RenderError::InvalidHandle(sampler.id())));
        }
        self.registers.samplers[s] = Some(sampler);
        Ok(())
    }

    pub fn unbind_sampler(&mut self, slot: u32) -> RenderResult<()> {
        self.registers.samplers[check_slot(slot)?] = None;
        Ok(())
    }

    /// Bind a vertex buffer at slot 0 or an index buffer of 32-bit indices
    pub fn bind_buffer(&mut self, buffer: BufferHandle) -> RenderResult<()> {
        let desc = self.buffer_desc(buffer)?;
        match desc.kind {
            BufferKind::Vertex => self.registers.vertex_buffer = Some(buffer),
            BufferKind::Index => self.registers.index_buffer = Some(buffer),
            kind => {
                return Err(fail(RenderError::InvalidBinding(format!(
                    "{kind:?} buffer {:?} bound as geometry",
                    desc.label
                ))))
            }
        }
        Ok(())
    }

    pub fn unbind_vertex_buffer(&mut self) {
        self.registers.vertex_buffer = None;
    }

    pub fn unbind_index_buffer(&mut self) {
        self.registers.index_buffer = None;
    }

    // Submission

    fn resolve(&self, slots: &[PipelineSlot]) -> RenderResult<Vec<ResolvedBinding>> {
        let r = &self.registers;
        let unbound = |slot: Slot| {
            fail(RenderError::UnboundSlot {
                what: slot.bank(),
                slot: slot.index(),
            })
        };

        slots
            .iter()
            .map(|ps| {
                let i = ps.slot.index() as usize;
                let resource = match ps.slot {
                    Slot::VertexConstant(_) => {
                        r.vertex_constants[i].map(BoundResource::ConstantBuffer)
                    }
                    Slot::PixelConstant(_) => {
                        r.pixel_constants[i].map(BoundResource::ConstantBuffer)
                    }
                    Slot::ComputeConstant(_) => {
                        r.compute_constants[i].map(BoundResource::ConstantBuffer)
                    }
                    Slot::Sampler(_) => r.samplers[i].map(BoundResource::Sampler),
                    Slot::ShaderResource(_) => r.shader_resources[i]
                        .map(|t| self.require_view(t, ViewKind::ShaderResource))
                        .transpose()?
                        .map(BoundResource::ShaderResource),
                    Slot::ComputeShaderResource(_) => r.compute_resources[i]
                        .map(|t| self.require_view(t, ViewKind::ShaderResource))
                        .transpose()?
                        .map(BoundResource::ShaderResource),
                    Slot::UnorderedAccess(_) => r.unordered_access[i]
                        .map(|t| self.require_view(t, ViewKind::UnorderedAccess))
                        .transpose()?
                        .map(BoundResource::UnorderedAccess),
                };
                let resource = resource.ok_or_else(|| unbound(ps.slot))?;
                Ok(ResolvedBinding {
                    group: ps.group,
                    binding: ps.binding,
                    resource,
                })
            })
            .collect()
    }

    fn draw_call(&self, count: u32, indexed: bool) -> RenderResult<DrawCall> {
        let pipeline = self
            .registers
            .graphics_pipeline
            .ok_or_else(|| fail(RenderError::NoPipeline))?;
        let entry = self
            .render_pipelines
            .get(&pipeline)
            .ok_or_else(|| fail(RenderError::InvalidHandle(pipeline.id())))?;

        let color = self.registers.color_target.ok_or_else(|| {
            fail(RenderError::UnboundSlot {
                what: "render target",
                slot: 0,
            })
        })?;
        let color_target = self.require_view(color, ViewKind::RenderTarget)?;
        let depth_target = self
            .registers
            .depth_target
            .map(|d| self.require_view(d, ViewKind::DepthStencil))
            .transpose()?;

        if entry.needs_vertex_buffer && self.registers.vertex_buffer.is_none() {
            return Err(fail(RenderError::UnboundSlot {
                what: "vertex buffer",
                slot: 0,
            }));
        }
        if indexed && self.registers.index_buffer.is_none() {
            return Err(fail(RenderError::UnboundSlot {
                what: "index buffer",
                slot: 0,
            }));
        }

        let viewport = match self.registers.viewport {
            Some(viewport) => viewport,
            None => {
                let desc = self.texture_desc(color)?;
                Viewport {
                    width: desc.width,
                    height: desc.height,
                }
            }
        };

        Ok(DrawCall {
            pipeline,
            color_target: Some(color_target),
            depth_target,
            viewport,
            bindings: self.resolve(&entry.slots)?,
            vertex_buffer: self.registers.vertex_buffer,
            index_buffer: if indexed { self.registers.index_buffer } else { None },
            count,
            indexed,
        })
    }

    /// Draw `count` vertices from the bound vertex buffer
    pub fn draw(&mut self, count: u32) -> RenderResult<()> {
        let call = self.draw_call(count, false)?;
        report(self.device().draw(&call))
    }

    /// Draw `count` indices from the bound index buffer
    pub fn draw_indexed(&mut self, count: u32) -> RenderResult<()> {
        let call = self.draw_call(count, true)?;
        report(self.device().draw(&call))
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> RenderResult<()> {
        let pipeline = self
            .registers
            .compute_pipeline
            .ok_or_else(|| fail(RenderError::NoPipeline))?;
        let slots = self
            .compute_pipelines
            .get(&pipeline)
            .ok_or_else(|| fail(RenderError::InvalidHandle(pipeline.id())))?;
        let call = DispatchCall {
            pipeline,
            bindings: self.resolve(slots)?,
            groups: [x, y, z],
        };
        report(self.device().dispatch(&call))
    }

    /// Release the surface, then the device
    pub fn shutdown(mut self) {
        self.registers = Registers::default();
        if let Some(info) = self.surface.take() {
            self.textures.remove(&info.back_buffer);
            self.device().detach_surface();
        }

        let leaked_textures = self.textures.len();
        let leaked_buffers = self.buffers.len();
        if leaked_textures > 0 || leaked_buffers > 0 {
            log::warn!(
                "Shutting down with {} textures and {} buffers alive ({} bytes)",
                leaked_textures,
                leaked_buffers,
                self.memory.total()
            );
        }
        self.device().flush();
        log::info!("Device context shut down");
    }
}

//! CPU reference device.
//!
//! Stores every texture and buffer as real bytes so uploads, copies, clears,
//! mip generation and readback behave exactly like a GPU would. Shader code
//! is never executed: draws and dispatches are recorded with their resolved
//! bindings and can be inspected through [`ReferenceBackend::commands`].

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;

/// Work recorded by the reference device
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Draw(DrawCall),
    Dispatch(DispatchCall),
    Present { vsync: bool },
}

struct CpuTexture {
    desc: TextureDescriptor,
    /// Indexed by `[layer][level]`
    subresources: Vec<Vec<Vec<u8>>>,
}

impl CpuTexture {
    fn new(desc: TextureDescriptor) -> Self {
        let bpp = desc.format.bytes_per_pixel() as usize;
        let subresources = (0..desc.layers())
            .map(|_| {
                (0..desc.mip_levels)
                    .map(|level| {
                        let (w, h) = mip_extent(desc.width, desc.height, level);
                        vec![0u8; w as usize * h as usize * bpp]
                    })
                    .collect()
            })
            .collect();
        Self { desc, subresources }
    }
}

struct CpuView {
    texture: u64,
    kind: ViewKind,
}

struct CpuBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

/// CPU reference backend implementation
pub struct ReferenceBackend {
    textures: HashMap<u64, CpuTexture>,
    texture_views: HashMap<u64, CpuView>,
    buffers: HashMap<u64, CpuBuffer>,
    samplers: HashMap<u64, SamplerDescriptor>,
    render_pipelines: HashMap<u64, RenderPipelineDescriptor>,
    compute_pipelines: HashMap<u64, ComputePipelineDescriptor>,
    commands: Vec<RecordedCommand>,
    back_buffer: Option<(TextureHandle, TextureViewHandle)>,

    // Handle counters
    next_texture_id: u64,
    next_view_id: u64,
    next_buffer_id: u64,
    next_sampler_id: u64,
    next_render_pipeline_id: u64,
    next_compute_pipeline_id: u64,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        log::info!("Reference device created (CPU emulation)");
        Self {
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            buffers: HashMap::new(),
            samplers: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            commands: Vec::new(),
            back_buffer: None,
            next_texture_id: 1,
            next_view_id: 1,
            next_buffer_id: 1,
            next_sampler_id: 1,
            next_render_pipeline_id: 1,
            next_compute_pipeline_id: 1,
        }
    }

    /// Draws, dispatches and presents recorded so far, in submission order
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Drain the recorded command list
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of live textures, including the back buffer
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Texels of one mip level of one layer
    pub fn subresource(&self, texture: TextureHandle, layer: u32, level: u32) -> Option<&[u8]> {
        self.textures
            .get(&texture.0)?
            .subresources
            .get(layer as usize)?
            .get(level as usize)
            .map(Vec::as_slice)
    }

    /// Texture a view was derived from
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.texture_views.get(&view.0).map(|v| TextureHandle(v.texture))
    }

    fn texture(&self, handle: TextureHandle) -> BackendResult<&CpuTexture> {
        self.textures
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))
    }

    fn texture_mut(&mut self, handle: TextureHandle) -> BackendResult<&mut CpuTexture> {
        self.textures
            .get_mut(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<&CpuBuffer> {
        self.buffers
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))
    }

    fn view(&self, handle: TextureViewHandle, kind: ViewKind) -> BackendResult<&CpuView> {
        let view = self
            .texture_views
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))?;
        if view.kind != kind {
            return Err(BackendError::Unsupported(format!(
                "view {} is a {:?} view, expected {:?}",
                handle.0, view.kind, kind
            )));
        }
        Ok(view)
    }

    fn insert_texture(&mut self, desc: TextureDescriptor) -> TextureHandle {
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, CpuTexture::new(desc));
        TextureHandle(id)
    }

    fn insert_view(&mut self, texture: TextureHandle, kind: ViewKind) -> TextureViewHandle {
        let id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(
            id,
            CpuView {
                texture: texture.0,
                kind,
            },
        );
        TextureViewHandle(id)
    }

    fn check_bindings(&self, bindings: &[ResolvedBinding]) -> BackendResult<()> {
        for b in bindings {
            let known = match b.resource {
                BoundResource::ConstantBuffer(h) => self.buffers.contains_key(&h.0),
                BoundResource::ShaderResource(h) | BoundResource::UnorderedAccess(h) => {
                    self.texture_views.contains_key(&h.0)
                }
                BoundResource::Sampler(h) => self.samplers.contains_key(&h.0),
            };
            if !known {
                return Err(BackendError::Unsupported(format!(
                    "binding ({}, {}) refers to a released resource",
                    b.group, b.binding
                )));
            }
        }
        Ok(())
    }
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a linear RGBA color into one texel of `format`
pub fn encode_texel(format: TextureFormat, rgba: [f32; 4]) -> BackendResult<Vec<u8>> {
    let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    let srgb = |c: f32| {
        let c = c.clamp(0.0, 1.0);
        let encoded = if c <= 0.003_130_8 {
            c * 12.92
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        };
        unorm(encoded)
    };
    let floats =
        |values: &[f32]| -> Vec<u8> { values.iter().flat_map(|v| v.to_le_bytes()).collect() };

    let [r, g, b, a] = rgba;
    Ok(match format {
        TextureFormat::Rgba8Unorm => vec![unorm(r), unorm(g), unorm(b), unorm(a)],
        TextureFormat::Rgba8UnormSrgb => vec![srgb(r), srgb(g), srgb(b), unorm(a)],
        TextureFormat::Bgra8Unorm => vec![unorm(b), unorm(g), unorm(r), unorm(a)],
        TextureFormat::Bgra8UnormSrgb => vec![srgb(b), srgb(g), srgb(r), unorm(a)],
        TextureFormat::Rgba32Float => floats(&rgba),
        TextureFormat::R32Float | TextureFormat::Depth32Float => floats(&[r]),
        TextureFormat::Rg32Float => floats(&[r, g]),
        TextureFormat::Rgba16Float => {
            return Err(BackendError::Unsupported(
                "half-float texels are not emulated by the reference device".into(),
            ))
        }
    })
}

/// Decode one texel of `format` into RGBA, filling missing channels with 0 and alpha with 1
///
/// sRGB texels are returned in their encoded space.
fn decode_texel(format: TextureFormat, bytes: &[u8]) -> [f32; 4] {
    let unorm = |b: u8| b as f32 / 255.0;
    let float = |i: usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
        f32::from_le_bytes(raw)
    };
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => [
            unorm(bytes[0]),
            unorm(bytes[1]),
            unorm(bytes[2]),
            unorm(bytes[3]),
        ],
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => [
            unorm(bytes[2]),
            unorm(bytes[1]),
            unorm(bytes[0]),
            unorm(bytes[3]),
        ],
        TextureFormat::Rgba32Float => [float(0), float(1), float(2), float(3)],
        TextureFormat::R32Float | TextureFormat::Depth32Float => [float(0), 0.0, 0.0, 1.0],
        TextureFormat::Rg32Float => [float(0), float(1), 0.0, 1.0],
        TextureFormat::Rgba16Float => [0.0, 0.0, 0.0, 1.0],
    }
}

/// 2x2 box filter from one mip level to the next
fn downsample(
    format: TextureFormat,
    src: &[u8],
    width: u32,
    height: u32,
) -> BackendResult<Vec<u8>> {
    let bpp = format.bytes_per_pixel() as usize;
    let (dst_w, dst_h) = mip_extent(width, height, 1);
    let encoded_space = matches!(
        format,
        TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
    );
    let mut dst = Vec::with_capacity(dst_w as usize * dst_h as usize * bpp);

    for y in 0..dst_h {
        for x in 0..dst_w {
            let mut sum = [0.0f32; 4];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let sx = (x * 2 + dx).min(width - 1) as usize;
                let sy = (y * 2 + dy).min(height - 1) as usize;
                let offset = (sy * width as usize + sx) * bpp;
                let texel = decode_texel(format, &src[offset..offset + bpp]);
                for (acc, v) in sum.iter_mut().zip(texel) {
                    *acc += v * 0.25;
                }
            }
            // Filtered 8-bit values stay in the stored encoding
            let texel = if encoded_space {
                let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
                let [r, g, b, a] = sum.map(unorm);
                match format {
                    TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => vec![b, g, r, a],
                    _ => vec![r, g, b, a],
                }
            } else {
                encode_texel(format, sum)?
            };
            dst.extend_from_slice(&texel);
        }
    }
    Ok(dst)
}

impl GraphicsBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "Reference"
    }

    fn attach_surface(
        &mut self,
        window: WindowSource,
        width: u32,
        height: u32,
    ) -> BackendResult<SurfaceInfo> {
        let (surface_width, surface_height) = window.size();

        let desc = TextureDescriptor {
            label: Some("Back Buffer".into()),
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_TARGET,
            ..Default::default()
        };
        let texture = self.insert_texture(desc);
        let view = self.insert_view(texture, ViewKind::RenderTarget);
        self.back_buffer = Some((texture, view));

        log::trace!(
            "ReferenceBackend: back buffer {}x{} attached to {}x{} surface",
            width,
            height,
            surface_width,
            surface_height
        );

        Ok(SurfaceInfo {
            back_buffer: texture,
            back_buffer_view: view,
            format: TextureFormat::Rgba8Unorm,
            width,
            height,
            surface_width,
            surface_height,
        })
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> BackendResult<(u32, u32)> {
        if self.back_buffer.is_none() {
            return Err(BackendError::SurfaceCreationFailed("no surface attached".into()));
        }
        Ok((width, height))
    }

    fn present(&mut self, vsync: bool) -> BackendResult<()> {
        if self.back_buffer.is_none() {
            return Err(BackendError::SurfaceCreationFailed("no surface attached".into()));
        }
        self.commands.push(RecordedCommand::Present { vsync });
        Ok(())
    }

    fn detach_surface(&mut self) {
        if let Some((texture, view)) = self.back_buffer.take() {
            self.texture_views.remove(&view.0);
            self.textures.remove(&texture.0);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "zero-sized texture {:?}",
                desc.label
            )));
        }
        log::trace!(
            "ReferenceBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        Ok(self.insert_texture(desc.clone()))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        kind: ViewKind,
    ) -> BackendResult<TextureViewHandle> {
        self.texture(texture)?;
        Ok(self.insert_view(texture, kind))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let tex = self.texture_mut(texture)?;
        let layer_size = tex.desc.layer_size() as usize;
        if data.len() != layer_size * tex.desc.layers() as usize {
            return Err(BackendError::Unsupported(format!(
                "texture write of {} bytes, expected {}",
                data.len(),
                layer_size * tex.desc.layers() as usize
            )));
        }
        for (layer, chunk) in tex.subresources.iter_mut().zip(data.chunks(layer_size)) {
            layer[0].copy_from_slice(chunk);
        }
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        let tex = self.texture(texture)?;
        Ok(tex
            .subresources
            .iter()
            .flat_map(|layer| layer[0].iter().copied())
            .collect())
    }

    fn generate_mips(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let tex = self.texture_mut(texture)?;
        let desc = tex.desc.clone();
        for layer in tex.subresources.iter_mut() {
            for level in 1..desc.mip_levels as usize {
                let (w, h) = mip_extent(desc.width, desc.height, level as u32 - 1);
                layer[level] = downsample(desc.format, &layer[level - 1], w, h)?;
            }
        }
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "ReferenceBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(
            id,
            CpuBuffer {
                desc: desc.clone(),
                data: vec![0u8; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let buf = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownHandle(buffer.0))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            return Err(BackendError::Unsupported(format!(
                "write of {} bytes at {} overflows buffer {:?}",
                data.len(),
                offset,
                buf.desc.label
            )));
        }
        buf.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        Ok(self.buffer(buffer)?.data.clone())
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("ReferenceBackend: creating sampler {:?}", desc.label);
        let id = self.next_sampler_id;
        self.next_sampler_id += 1;
        self.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        log::trace!("ReferenceBackend: creating render pipeline {:?}", desc.label);
        let id = self.next_render_pipeline_id;
        self.next_render_pipeline_id += 1;
        self.render_pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        log::trace!("ReferenceBackend: creating compute pipeline {:?}", desc.label);
        let id = self.next_compute_pipeline_id;
        self.next_compute_pipeline_id += 1;
        self.compute_pipelines.insert(id, desc.clone());
        Ok(ComputePipelineHandle(id))
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> BackendResult<()> {
        let data = self.buffer(src)?.data[..size as usize].to_vec();
        self.write_buffer(dst, 0, &data)
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> BackendResult<()> {
        let source = self.texture(src)?;
        let levels = source.desc.mip_levels;
        let layers = source.subresources.clone();
        let target = self.texture_mut(dst)?;
        let levels = levels.min(target.desc.mip_levels) as usize;
        for (dst_layer, src_layer) in target.subresources.iter_mut().zip(layers) {
            for level in 0..levels {
                dst_layer[level].copy_from_slice(&src_layer[level]);
            }
        }
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: BufferHandle,
        dst: TextureHandle,
    ) -> BackendResult<()> {
        let data = self.buffer(src)?.data.clone();
        self.write_texture(dst, &data)
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: TextureHandle,
        dst: BufferHandle,
    ) -> BackendResult<()> {
        let data = self.read_texture(src)?;
        self.write_buffer(dst, 0, &data)
    }

    fn clear_color(&mut self, view: TextureViewHandle, color: [f32; 4]) -> BackendResult<()> {
        let texture = TextureHandle(self.view(view, ViewKind::RenderTarget)?.texture);
        let tex = self.texture_mut(texture)?;
        let texel = encode_texel(tex.desc.format, color)?;
        for layer in tex.subresources.iter_mut() {
            for chunk in layer[0].chunks_mut(texel.len()) {
                chunk.copy_from_slice(&texel);
            }
        }
        Ok(())
    }

    fn clear_depth(
        &mut self,
        view: TextureViewHandle,
        depth: f32,
        _stencil: u8,
    ) -> BackendResult<()> {
        let texture = TextureHandle(self.view(view, ViewKind::DepthStencil)?.texture);
        let tex = self.texture_mut(texture)?;
        let texel = encode_texel(tex.desc.format, [depth, 0.0, 0.0, 0.0])?;
        for layer in tex.subresources.iter_mut() {
            for chunk in layer[0].chunks_mut(texel.len()) {
                chunk.copy_from_slice(&texel);
            }
        }
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> BackendResult<()> {
        if !self.render_pipelines.contains_key(&call.pipeline.0) {
            return Err(BackendError::UnknownHandle(call.pipeline.0));
        }
        self.check_bindings(&call.bindings)?;
        log::trace!(
            "ReferenceBackend: draw{} {} with {} bindings",
            if call.indexed { "_indexed" } else { "" },
            call.count,
            call.bindings.len()
        );
        self.commands.push(RecordedCommand::Draw(call.clone()));
        Ok(())
    }

    fn dispatch(&mut self, call: &DispatchCall) -> BackendResult<()> {
        if !self.compute_pipelines.contains_key(&call.pipeline.0) {
            return Err(BackendError::UnknownHandle(call.pipeline.0));
        }
        self.check_bindings(&call.bindings)?;
        log::trace!("ReferenceBackend: dispatch {:?}", call.groups);
        self.commands.push(RecordedCommand::Dispatch(call.clone()));
        Ok(())
    }

    fn flush(&mut self) {}

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(&pipeline.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8(width: u32, height: u32, mips: u32) -> TextureDescriptor {
        TextureDescriptor {
            label: Some("test".into()),
            width,
            height,
            mip_levels: mips,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::MIPPED_TEXTURE,
            ..Default::default()
        }
    }

    #[test]
    fn clear_fills_every_texel() {
        let mut device = ReferenceBackend::new();
        let tex = device.create_texture(&rgba8(3, 2, 1)).unwrap();
        let rtv = device.create_texture_view(tex, ViewKind::RenderTarget).unwrap();
        device.clear_color(rtv, [1.0, 0.0, 0.5, 1.0]).unwrap();

        let bytes = device.read_texture(tex).unwrap();
        assert_eq!(bytes.len(), 3 * 2 * 4);
        for texel in bytes.chunks(4) {
            assert_eq!(texel, &[255, 0, 128, 255]);
        }
    }

    #[test]
    fn clear_rejects_wrong_view_kind() {
        let mut device = ReferenceBackend::new();
        let tex = device.create_texture(&rgba8(2, 2, 1)).unwrap();
        let srv = device.create_texture_view(tex, ViewKind::ShaderResource).unwrap();
        assert!(device.clear_color(srv, [0.0; 4]).is_err());
    }

    #[test]
    fn mip_generation_averages_texels() {
        let mut device = ReferenceBackend::new();
        let tex = device.create_texture(&rgba8(2, 2, 2)).unwrap();
        #[rustfmt::skip]
        let pixels = [
            0, 0, 0, 255,     255, 255, 255, 255,
            255, 255, 255, 255, 0, 0, 0, 255,
        ];
        device.write_texture(tex, &pixels).unwrap();
        device.generate_mips(tex).unwrap();

        let level1 = &device.textures[&tex.0].subresources[0][1];
        assert_eq!(level1, &vec![128, 128, 128, 255]);
    }

    #[test]
    fn float_texels_encode_little_endian() {
        let bytes = encode_texel(TextureFormat::Rgba32Float, [0.1, 0.2, 0.3, 1.0]).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[12..16], &1.0f32.to_le_bytes());
        assert!(encode_texel(TextureFormat::Rgba16Float, [0.0; 4]).is_err());
    }

    #[test]
    fn draw_with_released_binding_fails() {
        let mut device = ReferenceBackend::new();
        let pipeline = device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: None,
                vertex_shader: Vec::new(),
                fragment_shader: Vec::new(),
                entry_point: "main".into(),
                vertex_layout: VertexBufferLayout::default(),
                bindings: Vec::new(),
                front_face: FrontFace::Cw,
                cull_mode: CullMode::Back,
                fill_mode: FillMode::Solid,
                depth_compare: CompareFunction::Less,
            })
            .unwrap();
        let call = DrawCall {
            pipeline,
            color_target: None,
            depth_target: None,
            viewport: Viewport { width: 1, height: 1 },
            bindings: vec![ResolvedBinding {
                group: 0,
                binding: 0,
                resource: BoundResource::ConstantBuffer(BufferHandle(99)),
            }],
            vertex_buffer: None,
            index_buffer: None,
            count: 3,
            indexed: false,
        };
        assert!(device.draw(&call).is_err());
        assert!(device.commands().is_empty());
    }
}

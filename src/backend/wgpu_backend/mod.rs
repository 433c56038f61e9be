//! wgpu backend implementation
//!
//! Serves both the hardware and software tiers. Work is recorded into one
//! command encoder that is submitted on `flush`, before any queue write and
//! before every readback, so operations land in program order.

mod convert;

use crate::backend::traits::*;
use crate::backend::types::*;
use convert::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// Optional features used when the adapter offers them
const WANTED_FEATURES: wgpu::Features = wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES
    .union(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER)
    .union(wgpu::Features::POLYGON_MODE_LINE);

const MIP_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let last = vec2<i32>(textureDimensions(source)) - vec2<i32>(1);
    let base = vec2<i32>(position.xy) * 2;
    let a = textureLoad(source, min(base, last), 0);
    let b = textureLoad(source, min(base + vec2<i32>(1, 0), last), 0);
    let c = textureLoad(source, min(base + vec2<i32>(0, 1), last), 0);
    let d = textureLoad(source, min(base + vec2<i32>(1, 1), last), 0);
    return (a + b + c + d) * 0.25;
}
"#;

const PRESENT_SHADER: &str = r#"
@group(0) @binding(0) var back_buffer: texture_2d<f32>;
@group(0) @binding(1) var back_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(back_buffer, back_sampler, in.uv);
}
"#;

struct TextureEntry {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

struct ViewEntry {
    view: wgpu::TextureView,
    texture: u64,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

struct BufferEntry {
    buffer: wgpu::Buffer,
    desc: BufferDescriptor,
}

/// Variant key: color format and optional depth format
type TargetFormats = (wgpu::TextureFormat, Option<wgpu::TextureFormat>);

/// Render pipeline state; concrete pipelines are built per target format
struct RenderPipelineEntry {
    label: Option<String>,
    entry_point: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    layout: wgpu::PipelineLayout,
    vertex_layout: VertexBufferLayout,
    front_face: FrontFace,
    cull_mode: CullMode,
    fill_mode: FillMode,
    depth_compare: CompareFunction,
    variants: HashMap<TargetFormats, wgpu::RenderPipeline>,
}

struct ComputePipelineEntry {
    label: Option<String>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
}

/// Window surface plus the blit that scales the back buffer onto it
struct Presentation {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
}

struct SurfaceState {
    back_buffer: TextureHandle,
    back_buffer_view: TextureViewHandle,
    /// `None` for headless surfaces
    presentation: Option<Presentation>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    name: String,
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    features: wgpu::Features,
    surface: Option<SurfaceState>,

    // Resource storage
    buffers: HashMap<u64, BufferEntry>,
    textures: HashMap<u64, TextureEntry>,
    texture_views: HashMap<u64, ViewEntry>,
    samplers: HashMap<u64, wgpu::Sampler>,
    render_pipelines: HashMap<u64, RenderPipelineEntry>,
    compute_pipelines: HashMap<u64, ComputePipelineEntry>,

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_view_id: u64,
    next_sampler_id: u64,
    next_render_pipeline_id: u64,
    next_compute_pipeline_id: u64,

    // Mip generation
    mip_shader: wgpu::ShaderModule,
    mip_layout: wgpu::BindGroupLayout,
    mip_pipeline_layout: wgpu::PipelineLayout,
    mip_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,
    /// Scratch buffers referenced by the pending encoder
    transient: Vec<wgpu::Buffer>,
}

impl WgpuBackend {
    /// Create a device on the best adapter; `force_fallback` requests the
    /// driver's software rasterizer instead of a GPU
    pub fn new(force_fallback: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(force_fallback))
    }

    pub async fn new_async(force_fallback: bool) -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed(if force_fallback {
                    "No software adapter found".into()
                } else {
                    "No suitable adapter found".into()
                })
            })?;

        let adapter_info = adapter.get_info();
        if !force_fallback && adapter_info.device_type == wgpu::DeviceType::Cpu {
            return Err(BackendError::InitializationFailed(format!(
                "Only a software adapter is available ({})",
                adapter_info.name
            )));
        }
        log::info!(
            "Selected adapter: {} ({:?} backend, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );

        let features = adapter.features() & WANTED_FEATURES;
        if !features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES) {
            log::warn!(
                "Adapter lacks format-specific features, read-write float storage is unavailable"
            );
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Render Device"),
                    required_features: features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu: {}", error);
        }));

        let mip_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mip Generation"),
            source: wgpu::ShaderSource::Wgsl(MIP_SHADER.into()),
        });
        let mip_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mip Generation"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let mip_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mip Generation"),
            bind_group_layouts: &[&mip_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            name: format!("wgpu {:?} ({})", adapter_info.backend, adapter_info.name),
            instance,
            adapter,
            device,
            queue,
            features,
            surface: None,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_view_id: 1,
            next_sampler_id: 1,
            next_render_pipeline_id: 1,
            next_compute_pipeline_id: 1,
            mip_shader,
            mip_layout,
            mip_pipeline_layout,
            mip_pipelines: HashMap::new(),
            encoder: None,
            transient: Vec::new(),
        })
    }

    fn texture_entry(&self, handle: TextureHandle) -> BackendResult<&TextureEntry> {
        self.textures
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))
    }

    fn view_entry(&self, handle: TextureViewHandle) -> BackendResult<&ViewEntry> {
        self.texture_views
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))
    }

    fn buffer_entry(&self, handle: BufferHandle) -> BackendResult<&BufferEntry> {
        self.buffers
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        match self.encoder.take() {
            Some(encoder) => encoder,
            None => self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        }
    }

    /// Run `f` inside a validation scope and turn a captured error into `wrap`
    fn validated<T>(
        &self,
        wrap: fn(String) -> BackendError,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(wrap(error.to_string())),
            None => Ok(value),
        }
    }

    fn insert_texture(
        &mut self,
        desc: &TextureDescriptor,
        extra: wgpu::TextureUsages,
    ) -> BackendResult<TextureHandle> {
        let texture = self.validated(BackendError::TextureCreationFailed, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: desc.label.as_deref(),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: desc.layers(),
                },
                mip_level_count: desc.mip_levels,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(desc.format),
                usage: texture_usage(desc.usage) | extra,
                view_formats: &[],
            })
        })?;

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    /// Bind group layouts for groups `0..=max`, empty where a group has no entries
    fn create_bind_group_layouts(
        &self,
        label: Option<&str>,
        bindings: &[BindingLayoutEntry],
    ) -> Vec<wgpu::BindGroupLayout> {
        let groups = bindings.iter().map(|b| b.group + 1).max().unwrap_or(0);
        (0..groups)
            .map(|group| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
                    .iter()
                    .filter(|b| b.group == group)
                    .map(|b| wgpu::BindGroupLayoutEntry {
                        binding: b.binding,
                        visibility: shader_stages(b.visibility),
                        ty: binding_type(&b.ty),
                        count: None,
                    })
                    .collect();
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label,
                        entries: &entries,
                    })
            })
            .collect()
    }

    fn binding_resource(
        &self,
        resource: BoundResource,
    ) -> BackendResult<wgpu::BindingResource<'_>> {
        match resource {
            BoundResource::ConstantBuffer(buffer) => {
                Ok(self.buffer_entry(buffer)?.buffer.as_entire_binding())
            }
            BoundResource::ShaderResource(view) | BoundResource::UnorderedAccess(view) => {
                Ok(wgpu::BindingResource::TextureView(&self.view_entry(view)?.view))
            }
            BoundResource::Sampler(sampler) => Ok(wgpu::BindingResource::Sampler(
                self.samplers
                    .get(&sampler.0)
                    .ok_or(BackendError::UnknownHandle(sampler.0))?,
            )),
        }
    }

    fn create_bind_groups(
        &self,
        label: Option<&str>,
        layouts: &[wgpu::BindGroupLayout],
        bindings: &[ResolvedBinding],
    ) -> BackendResult<Vec<wgpu::BindGroup>> {
        layouts
            .iter()
            .enumerate()
            .map(|(group, layout)| {
                let entries = bindings
                    .iter()
                    .filter(|b| b.group == group as u32)
                    .map(|b| {
                        Ok(wgpu::BindGroupEntry {
                            binding: b.binding,
                            resource: self.binding_resource(b.resource)?,
                        })
                    })
                    .collect::<BackendResult<Vec<_>>>()?;
                Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label,
                    layout,
                    entries: &entries,
                }))
            })
            .collect()
    }

    /// Build the concrete pipeline for a target format pair if missing
    fn ensure_render_variant(
        &mut self,
        handle: RenderPipelineHandle,
        formats: TargetFormats,
    ) -> BackendResult<()> {
        let polygon_line = self.features.contains(wgpu::Features::POLYGON_MODE_LINE);
        let entry = self
            .render_pipelines
            .get_mut(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))?;
        if entry.variants.contains_key(&formats) {
            return Ok(());
        }

        if entry.fill_mode == FillMode::Wireframe && !polygon_line {
            log::warn!("Wireframe fill is unsupported on this adapter, drawing solid");
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = build_render_pipeline(&self.device, entry, formats, polygon_line);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::PipelineCreationFailed(error.to_string()));
        }
        log::trace!(
            "WgpuBackend: built {:?} for {:?}",
            entry.label,
            formats
        );
        entry.variants.insert(formats, pipeline);
        Ok(())
    }

    fn record_draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        call: &DrawCall,
        color: TextureViewHandle,
        formats: TargetFormats,
        bind_groups: &[wgpu::BindGroup],
    ) -> BackendResult<()> {
        let entry = self
            .render_pipelines
            .get(&call.pipeline.0)
            .ok_or(BackendError::UnknownHandle(call.pipeline.0))?;
        let pipeline = entry
            .variants
            .get(&formats)
            .ok_or(BackendError::UnknownHandle(call.pipeline.0))?;
        let color = self.view_entry(color)?;
        let depth = call.depth_target.map(|v| self.view_entry(v)).transpose()?;
        let vertex = call.vertex_buffer.map(|b| self.buffer_entry(b)).transpose()?;
        let index = if call.indexed {
            let buffer = call.index_buffer.ok_or_else(|| {
                BackendError::Unsupported("indexed draw without an index buffer".into())
            })?;
            Some(self.buffer_entry(buffer)?)
        } else {
            None
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: entry.label.as_deref(),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth.map(|d| wgpu::RenderPassDepthStencilAttachment {
                view: &d.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(pipeline);
        for (group, bind_group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(group as u32, bind_group, &[]);
        }
        pass.set_viewport(
            0.0,
            0.0,
            call.viewport.width.min(color.width) as f32,
            call.viewport.height.min(color.height) as f32,
            0.0,
            1.0,
        );
        if let Some(vertex) = vertex {
            pass.set_vertex_buffer(0, vertex.buffer.slice(..));
        }
        match index {
            Some(index) => {
                let format = if index.desc.stride == 2 {
                    wgpu::IndexFormat::Uint16
                } else {
                    wgpu::IndexFormat::Uint32
                };
                pass.set_index_buffer(index.buffer.slice(..), format);
                pass.draw_indexed(0..call.count, 0, 0..1);
            }
            None => pass.draw(0..call.count, 0..1),
        }
        Ok(())
    }

    fn record_dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        call: &DispatchCall,
        bind_groups: &[wgpu::BindGroup],
    ) -> BackendResult<()> {
        let entry = self
            .compute_pipelines
            .get(&call.pipeline.0)
            .ok_or(BackendError::UnknownHandle(call.pipeline.0))?;

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: entry.label.as_deref(),
            timestamp_writes: None,
        });
        pass.set_pipeline(&entry.pipeline);
        for (group, bind_group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(group as u32, bind_group, &[]);
        }
        let [x, y, z] = call.groups;
        pass.dispatch_workgroups(x, y, z);
        Ok(())
    }

    /// Views over one mip of one layer, used for clears and mip generation
    fn subresource_views(texture: &TextureEntry, level: u32) -> Vec<wgpu::TextureView> {
        (0..texture.desc.layers())
            .map(|layer| {
                texture.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: texture.desc.label.as_deref(),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect()
    }

    fn mip_pipeline(&mut self, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let device = &self.device;
        let shader = &self.mip_shader;
        let layout = &self.mip_pipeline_layout;
        self.mip_pipelines.entry(format).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Mip Generation"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: "fs_main",
                    targets: &[Some(format.into())],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })
    }

    /// Row pitch pair for buffer/texture copies: tightly packed and 256-byte aligned
    fn row_pitch(desc: &TextureDescriptor) -> (u64, u64) {
        let tight = desc.width as u64 * desc.format.bytes_per_pixel() as u64;
        let padded = wgpu::util::align_to(tight, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64);
        (tight, padded)
    }

    fn image_copy_texture(texture: &TextureEntry) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: if texture.desc.format.is_depth() {
                wgpu::TextureAspect::DepthOnly
            } else {
                wgpu::TextureAspect::All
            },
        }
    }

    fn layer_extent(desc: &TextureDescriptor) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.layers(),
        }
    }

    fn map_read(&self, buffer: &wgpu::Buffer) -> BackendResult<Vec<u8>> {
        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;
        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }

    fn configure_window(
        &self,
        window: Arc<winit::window::Window>,
        width: u32,
        height: u32,
    ) -> BackendResult<(wgpu::Surface<'static>, wgpu::SurfaceConfiguration)> {
        let surface = self
            .instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let caps = surface.get_capabilities(&self.adapter);
        // The back buffer already holds display-ready values
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed(
                    "surface is not supported by the adapter".into(),
                )
            })?;

        let (width, height) = self.clamp_to_limits(width, height);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&self.device, &config);
        Ok((surface, config))
    }

    /// Clamp to device limits while maintaining aspect ratio
    fn clamp_to_limits(&self, width: u32, height: u32) -> (u32, u32) {
        let max_size = self.device.limits().max_texture_dimension_2d;
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width.max(1), height.max(1))
        }
    }

    fn create_presentation(
        &self,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        back_buffer: TextureHandle,
    ) -> BackendResult<Presentation> {
        let texture = self.texture_entry(back_buffer)?;
        let sampled = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Present"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Present"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&sampled),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let pipeline = self.validated(BackendError::PipelineCreationFailed, |device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Present"),
                source: wgpu::ShaderSource::Wgsl(PRESENT_SHADER.into()),
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Present"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Present"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &[Some(config.format.into())],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })?;

        Ok(Presentation {
            surface,
            config,
            pipeline,
            bind_group,
        })
    }
}

fn build_render_pipeline(
    device: &wgpu::Device,
    entry: &RenderPipelineEntry,
    (color, depth): TargetFormats,
    polygon_line: bool,
) -> wgpu::RenderPipeline {
    let attributes: Vec<wgpu::VertexAttribute> = entry
        .vertex_layout
        .attributes
        .iter()
        .map(|a| wgpu::VertexAttribute {
            format: vertex_format(a.format),
            offset: a.offset,
            shader_location: a.location,
        })
        .collect();
    let buffers = if attributes.is_empty() {
        Vec::new()
    } else {
        vec![wgpu::VertexBufferLayout {
            array_stride: entry.vertex_layout.array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }]
    };

    let polygon_mode = match entry.fill_mode {
        FillMode::Wireframe if polygon_line => wgpu::PolygonMode::Line,
        _ => wgpu::PolygonMode::Fill,
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: entry.label.as_deref(),
        layout: Some(&entry.layout),
        vertex: wgpu::VertexState {
            module: &entry.vertex,
            entry_point: &entry.entry_point,
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &entry.fragment,
            entry_point: &entry.entry_point,
            targets: &[Some(wgpu::ColorTargetState {
                format: color,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: front_face(entry.front_face),
            cull_mode: cull_mode(entry.cull_mode),
            polygon_mode,
            ..Default::default()
        },
        depth_stencil: depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: true,
            depth_compare: compare_function(entry.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach_surface(
        &mut self,
        window: WindowSource,
        width: u32,
        height: u32,
    ) -> BackendResult<SurfaceInfo> {
        if self.surface.is_some() {
            return Err(BackendError::SurfaceCreationFailed(
                "a surface is already attached".into(),
            ));
        }
        let (surface_width, surface_height) = window.size();
        let window_surface = match window {
            WindowSource::Native(window) => {
                Some(self.configure_window(window, surface_width, surface_height)?)
            }
            WindowSource::Headless { .. } => None,
        };

        let desc = TextureDescriptor {
            label: Some("Back Buffer".into()),
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_TARGET,
            ..Default::default()
        };
        let back_buffer = self.insert_texture(&desc, wgpu::TextureUsages::TEXTURE_BINDING)?;
        let back_buffer_view = self.create_texture_view(back_buffer, ViewKind::RenderTarget)?;

        let presentation = match window_surface {
            Some((surface, config)) => {
                Some(self.create_presentation(surface, config, back_buffer)?)
            }
            None => None,
        };
        let (surface_width, surface_height) = presentation
            .as_ref()
            .map(|p| (p.config.width, p.config.height))
            .unwrap_or((surface_width, surface_height));

        log::info!(
            "WgpuBackend: {}x{} back buffer on {}x{} {} surface",
            width,
            height,
            surface_width,
            surface_height,
            if presentation.is_some() { "window" } else { "headless" }
        );

        self.surface = Some(SurfaceState {
            back_buffer,
            back_buffer_view,
            presentation,
        });

        Ok(SurfaceInfo {
            back_buffer,
            back_buffer_view,
            format: TextureFormat::Rgba8Unorm,
            width,
            height,
            surface_width,
            surface_height,
        })
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> BackendResult<(u32, u32)> {
        let (width, height) = self.clamp_to_limits(width, height);
        let state = self
            .surface
            .as_mut()
            .ok_or_else(|| BackendError::SurfaceCreationFailed("no surface attached".into()))?;
        if let Some(presentation) = state.presentation.as_mut() {
            presentation.config.width = width;
            presentation.config.height = height;
            presentation.surface.configure(&self.device, &presentation.config);
        }
        Ok((width, height))
    }

    fn present(&mut self, vsync: bool) -> BackendResult<()> {
        self.flush();

        let state = self
            .surface
            .as_mut()
            .ok_or_else(|| BackendError::SurfaceCreationFailed("no surface attached".into()))?;
        let Some(presentation) = state.presentation.as_mut() else {
            log::trace!("WgpuBackend: headless present");
            return Ok(());
        };

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        if presentation.config.present_mode != present_mode {
            presentation.config.present_mode = present_mode;
            presentation.surface.configure(&self.device, &presentation.config);
        }

        let frame = match presentation.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost, reconfiguring and skipping the frame");
                presentation.surface.configure(&self.device, &presentation.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
            Err(e) => {
                log::warn!("Skipping frame: {}", e);
                return Ok(());
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&presentation.pipeline);
            pass.set_bind_group(0, &presentation.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn detach_surface(&mut self) {
        if let Some(state) = self.surface.take() {
            self.flush();
            self.texture_views.remove(&state.back_buffer_view.0);
            self.textures.remove(&state.back_buffer.0);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "WgpuBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        self.insert_texture(desc, wgpu::TextureUsages::empty())
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        kind: ViewKind,
    ) -> BackendResult<TextureViewHandle> {
        let entry = self.texture_entry(texture)?;
        let cube = entry.desc.kind == TextureKind::Cube && kind == ViewKind::ShaderResource;
        let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: entry.desc.label.as_deref(),
            dimension: Some(if cube {
                wgpu::TextureViewDimension::Cube
            } else {
                wgpu::TextureViewDimension::D2
            }),
            base_mip_level: 0,
            // Attachments and storage bind a single mip
            mip_level_count: if kind == ViewKind::ShaderResource {
                None
            } else {
                Some(1)
            },
            base_array_layer: 0,
            array_layer_count: Some(if cube { 6 } else { 1 }),
            ..Default::default()
        });
        let view = ViewEntry {
            view,
            texture: texture.0,
            format: texture_format(entry.desc.format),
            width: entry.desc.width,
            height: entry.desc.height,
        };

        let id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(id, view);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        self.flush();
        let entry = self.texture_entry(texture)?;
        let expected = entry.desc.layer_size() * entry.desc.layers() as u64;
        if data.len() as u64 != expected {
            return Err(BackendError::Unsupported(format!(
                "texture write of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        let (tight, _) = Self::row_pitch(&entry.desc);
        self.queue.write_texture(
            Self::image_copy_texture(entry),
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(tight as u32),
                rows_per_image: Some(entry.desc.height),
            },
            Self::layer_extent(&entry.desc),
        );
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        self.flush();
        let entry = self.texture_entry(texture)?;
        let desc = &entry.desc;
        let (tight, padded) = Self::row_pitch(desc);
        let rows = desc.height as u64 * desc.layers() as u64;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback"),
            size: padded * rows,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Readback"),
            });
        encoder.copy_texture_to_buffer(
            Self::image_copy_texture(entry),
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(desc.height),
                },
            },
            Self::layer_extent(desc),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let raw = self.map_read(&readback)?;
        Ok(raw
            .chunks(padded as usize)
            .flat_map(|row| row[..tight as usize].iter().copied())
            .collect())
    }

    fn generate_mips(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let (desc, format) = {
            let entry = self.texture_entry(texture)?;
            (entry.desc.clone(), texture_format(entry.desc.format))
        };
        if desc.format.is_depth()
            || !desc.usage.contains(TextureUsage::RENDER_TARGET)
            || !desc.usage.contains(TextureUsage::SHADER_RESOURCE)
        {
            return Err(BackendError::Unsupported(format!(
                "cannot generate mips for {:?} ({:?})",
                desc.label, desc.format
            )));
        }

        self.mip_pipeline(format);
        let mut encoder = self.take_encoder();
        let result = (|| -> BackendResult<()> {
            let entry = self.texture_entry(texture)?;
            let pipeline = self
                .mip_pipelines
                .get(&format)
                .ok_or(BackendError::UnknownHandle(texture.0))?;
            let mut sources = Self::subresource_views(entry, 0);
            for level in 1..desc.mip_levels {
                let targets = Self::subresource_views(entry, level);
                for (source, target) in sources.iter().zip(&targets) {
                    let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Mip Generation"),
                        layout: &self.mip_layout,
                        entries: &[wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(source),
                        }],
                    });
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Mip Generation"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: target,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.draw(0..3, 0..1);
                }
                sources = targets;
            }
            Ok(())
        })();
        self.encoder = Some(encoder);
        result
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "WgpuBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let buffer = self.validated(BackendError::BufferCreationFailed, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: desc.label.as_deref(),
                size: wgpu::util::align_to(desc.size, wgpu::COPY_BUFFER_ALIGNMENT),
                usage: buffer_usage(desc.kind),
                mapped_at_creation: false,
            })
        })?;

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(
            id,
            BufferEntry {
                buffer,
                desc: desc.clone(),
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
        // Queue writes land before the pending encoder, so submit it first
        self.flush();
        let entry = self.buffer_entry(buffer)?;
        if offset + data.len() as u64 > entry.desc.size {
            return Err(BackendError::Unsupported(format!(
                "write of {} bytes at {} overflows buffer {:?}",
                data.len(),
                offset,
                entry.desc.label
            )));
        }
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&entry.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(
                wgpu::util::align_to(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize,
                0,
            );
            self.queue.write_buffer(&entry.buffer, offset, &padded);
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.flush();
        let entry = self.buffer_entry(buffer)?;
        let size = entry.buffer.size();
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Buffer Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Buffer Readback"),
            });
        encoder.copy_buffer_to_buffer(&entry.buffer, 0, &readback, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let mut data = self.map_read(&readback)?;
        data.truncate(entry.desc.size as usize);
        Ok(data)
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let border = self
            .features
            .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        if desc.address == AddressMode::Border && !border {
            log::warn!("Border addressing is unsupported on this adapter, clamping to edge");
        }
        let address = address_mode(desc.address, border);
        let (filter, anisotropy) = match desc.filter {
            FilterMode::Nearest => (wgpu::FilterMode::Nearest, 1),
            FilterMode::Linear => (wgpu::FilterMode::Linear, 1),
            // Anisotropy requires linear filtering on every axis
            FilterMode::Anisotropic => (wgpu::FilterMode::Linear, desc.anisotropy.clamp(1, 16)),
        };

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: anisotropy,
            border_color: (address == wgpu::AddressMode::ClampToBorder)
                .then_some(wgpu::SamplerBorderColor::TransparentBlack),
        });

        let id = self.next_sampler_id;
        self.next_sampler_id += 1;
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        log::trace!("WgpuBackend: creating render pipeline {:?}", desc.label);
        let bind_group_layouts =
            self.create_bind_group_layouts(desc.label.as_deref(), &desc.bindings);
        let (vertex, fragment, layout) =
            self.validated(BackendError::PipelineCreationFailed, |device| {
                let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: desc.label.as_deref(),
                    source: wgpu::ShaderSource::SpirV(Cow::Borrowed(&desc.vertex_shader)),
                });
                let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: desc.label.as_deref(),
                    source: wgpu::ShaderSource::SpirV(Cow::Borrowed(&desc.fragment_shader)),
                });
                let layouts: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();
                let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: desc.label.as_deref(),
                    bind_group_layouts: &layouts,
                    push_constant_ranges: &[],
                });
                (vertex, fragment, layout)
            })?;

        let id = self.next_render_pipeline_id;
        self.next_render_pipeline_id += 1;
        self.render_pipelines.insert(
            id,
            RenderPipelineEntry {
                label: desc.label.clone(),
                entry_point: desc.entry_point.clone(),
                vertex,
                fragment,
                bind_group_layouts,
                layout,
                vertex_layout: desc.vertex_layout.clone(),
                front_face: desc.front_face,
                cull_mode: desc.cull_mode,
                fill_mode: desc.fill_mode,
                depth_compare: desc.depth_compare,
                variants: HashMap::new(),
            },
        );
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        log::trace!("WgpuBackend: creating compute pipeline {:?}", desc.label);
        let bind_group_layouts =
            self.create_bind_group_layouts(desc.label.as_deref(), &desc.bindings);
        let pipeline = self.validated(BackendError::PipelineCreationFailed, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::SpirV(Cow::Borrowed(&desc.shader)),
            });
            let layouts: Vec<&wgpu::BindGroupLayout> = bind_group_layouts.iter().collect();
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: desc.label.as_deref(),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&layout),
                module: &module,
                entry_point: &desc.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        })?;

        let id = self.next_compute_pipeline_id;
        self.next_compute_pipeline_id += 1;
        self.compute_pipelines.insert(
            id,
            ComputePipelineEntry {
                label: desc.label.clone(),
                pipeline,
                bind_group_layouts,
            },
        );
        Ok(ComputePipelineHandle(id))
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> BackendResult<()> {
        let mut encoder = self.take_encoder();
        let result = (|| -> BackendResult<_> {
            let source = self.buffer_entry(src)?;
            let target = self.buffer_entry(dst)?;
            let size = wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT)
                .min(source.buffer.size())
                .min(target.buffer.size());
            encoder.copy_buffer_to_buffer(&source.buffer, 0, &target.buffer, 0, size);
            Ok(())
        })();
        self.encoder = Some(encoder);
        result
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> BackendResult<()> {
        let mut encoder = self.take_encoder();
        let result = (|| -> BackendResult<_> {
            let source = self.texture_entry(src)?;
            let target = self.texture_entry(dst)?;
            let levels = source.desc.mip_levels.min(target.desc.mip_levels);
            for level in 0..levels {
                let (width, height) = mip_extent(source.desc.width, source.desc.height, level);
                let mut from = Self::image_copy_texture(source);
                from.mip_level = level;
                let mut to = Self::image_copy_texture(target);
                to.mip_level = level;
                encoder.copy_texture_to_texture(
                    from,
                    to,
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: source.desc.layers(),
                    },
                );
            }
            Ok(())
        })();
        self.encoder = Some(encoder);
        result
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: BufferHandle,
        dst: TextureHandle,
    ) -> BackendResult<()> {
        let mut encoder = self.take_encoder();
        let result = (|| -> BackendResult<_> {
            let source = self.buffer_entry(src)?;
            let target = self.texture_entry(dst)?;
            let (tight, padded) = Self::row_pitch(&target.desc);
            let rows = target.desc.height as u64 * target.desc.layers() as u64;

            // Texture copies need 256-byte rows; re-pitch through a scratch buffer
            let scratch = (tight != padded).then(|| {
                let scratch = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Copy Scratch"),
                    size: padded * rows,
                    usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                for row in 0..rows {
                    encoder.copy_buffer_to_buffer(
                        &source.buffer,
                        row * tight,
                        &scratch,
                        row * padded,
                        tight,
                    );
                }
                scratch
            });

            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: scratch.as_ref().unwrap_or(&source.buffer),
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded as u32),
                        rows_per_image: Some(target.desc.height),
                    },
                },
                Self::image_copy_texture(target),
                Self::layer_extent(&target.desc),
            );
            Ok(scratch)
        })();
        self.encoder = Some(encoder);
        self.transient.extend(result?);
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: TextureHandle,
        dst: BufferHandle,
    ) -> BackendResult<()> {
        let mut encoder = self.take_encoder();
        let result = (|| -> BackendResult<_> {
            let source = self.texture_entry(src)?;
            let target = self.buffer_entry(dst)?;
            let (tight, padded) = Self::row_pitch(&source.desc);
            let rows = source.desc.height as u64 * source.desc.layers() as u64;

            let scratch = (tight != padded).then(|| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Copy Scratch"),
                    size: padded * rows,
                    usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            });

            encoder.copy_texture_to_buffer(
                Self::image_copy_texture(source),
                wgpu::ImageCopyBuffer {
                    buffer: scratch.as_ref().unwrap_or(&target.buffer),
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded as u32),
                        rows_per_image: Some(source.desc.height),
                    },
                },
                Self::layer_extent(&source.desc),
            );
            if let Some(scratch) = scratch.as_ref() {
                for row in 0..rows {
                    encoder.copy_buffer_to_buffer(
                        scratch,
                        row * padded,
                        &target.buffer,
                        row * tight,
                        tight,
                    );
                }
            }
            Ok(scratch)
        })();
        self.encoder = Some(encoder);
        self.transient.extend(result?);
        Ok(())
    }

    fn clear_color(&mut self, view: TextureViewHandle, color: [f32; 4]) -> BackendResult<()> {
        let mut encoder = self.take_encoder();
        let result = (|| -> BackendResult<_> {
            let view = self.view_entry(view)?;
            let texture = self
                .textures
                .get(&view.texture)
                .ok_or(BackendError::UnknownHandle(view.texture))?;
            for layer in Self::subresource_views(texture, 0) {
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &layer,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: color[0] as f64,
                                g: color[1] as f64,
                                b: color[2] as f64,
                                a: color[3] as f64,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            Ok(())
        })();
        self.encoder = Some(encoder);
        result
    }

    fn clear_depth(
        &mut self,
        view: TextureViewHandle,
        depth: f32,
        _stencil: u8,
    ) -> BackendResult<()> {
        let mut encoder = self.take_encoder();
        let result = (|| -> BackendResult<_> {
            let view = self.view_entry(view)?;
            let texture = self
                .textures
                .get(&view.texture)
                .ok_or(BackendError::UnknownHandle(view.texture))?;
            for layer in Self::subresource_views(texture, 0) {
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Depth"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &layer,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(depth),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            Ok(())
        })();
        self.encoder = Some(encoder);
        result
    }

    fn draw(&mut self, call: &DrawCall) -> BackendResult<()> {
        let color = call.color_target.ok_or_else(|| {
            BackendError::Unsupported("draw without a render target".into())
        })?;
        let formats = (
            self.view_entry(color)?.format,
            call.depth_target
                .map(|v| self.view_entry(v).map(|e| e.format))
                .transpose()?,
        );
        self.ensure_render_variant(call.pipeline, formats)?;

        let bind_groups = {
            let entry = self
                .render_pipelines
                .get(&call.pipeline.0)
                .ok_or(BackendError::UnknownHandle(call.pipeline.0))?;
            self.create_bind_groups(
                entry.label.as_deref(),
                &entry.bind_group_layouts,
                &call.bindings,
            )?
        };

        let mut encoder = self.take_encoder();
        let result = self.record_draw(&mut encoder, call, color, formats, &bind_groups);
        self.encoder = Some(encoder);
        result
    }

    fn dispatch(&mut self, call: &DispatchCall) -> BackendResult<()> {
        let bind_groups = {
            let entry = self
                .compute_pipelines
                .get(&call.pipeline.0)
                .ok_or(BackendError::UnknownHandle(call.pipeline.0))?;
            self.create_bind_groups(
                entry.label.as_deref(),
                &entry.bind_group_layouts,
                &call.bindings,
            )?
        };

        let mut encoder = self.take_encoder();
        let result = self.record_dispatch(&mut encoder, call, &bind_groups);
        self.encoder = Some(encoder);
        result
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.transient.clear();
    }

    // Dropping defers destruction until pending GPU work is done

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

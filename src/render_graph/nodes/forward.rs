//! Forward node
//!
//! Draws every scene object with its albedo texture into a float color
//! target with depth testing.

use std::any::Any;

use glam::Mat4;

use crate::backend::{
    AddressMode, BufferKind, CompareFunction, CullMode, FillMode, FilterMode, FrontFace,
    TextureFormat, TextureHandle, TextureKind, TextureUsage, ViewKind,
};
use crate::context::DeviceContext;
use crate::error::RenderResult;
use crate::pipeline::{GraphicsPipeline, GraphicsPipelineDesc};
use crate::render_graph::RenderNode;
use crate::resources::{Buffer, Sampler, Texture};
use crate::scene::{CameraUniform, Scene};

pub const FORWARD_VERTEX_SHADER: &str = r#"
struct Camera {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
}

struct Model {
    transform: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> model: Model;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) texcoord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) texcoord: vec2<f32>,
}

@vertex
fn main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world = model.transform * vec4<f32>(in.position, 1.0);
    out.clip_position = camera.projection * camera.view * world;
    out.texcoord = in.texcoord;
    return out;
}
"#;

pub const FORWARD_PIXEL_SHADER: &str = r#"
@group(1) @binding(0) var albedo: texture_2d<f32>;
@group(2) @binding(0) var albedo_sampler: sampler;

@fragment
fn main(@location(0) texcoord: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(albedo, albedo_sampler, texcoord);
}
"#;

/// Vertex layout the forward shaders consume
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ForwardVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
}

const ERROR_TEXTURE_SIZE: u32 = 64;

pub struct ForwardNode {
    name: String,
    enabled: bool,
    clear_color: [f32; 4],
    resources: Option<ForwardResources>,
}

struct ForwardResources {
    error_texture: Texture,
    pipeline: GraphicsPipeline,
    color: Texture,
    depth: Texture,
    camera_buffer: Buffer,
    model_buffer: Buffer,
    sampler: Sampler,
}

impl ForwardNode {
    pub const NAME: &'static str = "Forward";

    pub fn new(ctx: &mut DeviceContext, clear_color: [f32; 4]) -> RenderResult<Self> {
        let (width, height) = ctx.resolution();

        let error_texture = Texture::error_texture(ctx, ERROR_TEXTURE_SIZE)?;

        let vertex = ctx
            .shaders()
            .load_embedded("shaders/forward.wgsl", FORWARD_VERTEX_SHADER, "vs_5_0")?;
        let pixel = ctx
            .shaders()
            .load_embedded("shaders/forward.wgsl", FORWARD_PIXEL_SHADER, "ps_5_0")?;
        let pipeline = GraphicsPipeline::new(
            ctx,
            &GraphicsPipelineDesc::new(vertex, pixel)
                .with_label("Forward")
                .with_cull_mode(CullMode::Back)
                .with_fill_mode(FillMode::Solid)
                .with_front_face(FrontFace::Cw)
                .with_depth_compare(CompareFunction::Less),
        )?;

        let color = Texture::new(
            ctx,
            TextureKind::TwoD,
            TextureUsage::RENDER_NODE,
            width,
            height,
            TextureFormat::Rgba32Float,
            false,
        )?;
        color.make_render_target(ctx)?;
        color.make_unordered_access(ctx)?;
        color.make_shader_resource(ctx)?;

        let depth = Texture::new(
            ctx,
            TextureKind::TwoD,
            TextureUsage::DEPTH_STENCIL,
            width,
            height,
            TextureFormat::Depth32Float,
            false,
        )?;
        depth.make_depth_stencil(ctx)?;

        let matrix = std::mem::size_of::<Mat4>() as u64;
        let camera_buffer = Buffer::new(
            ctx,
            matrix * 2,
            matrix as u32,
            BufferKind::Constant,
            "Forward Camera",
        )?;
        let model_buffer = Buffer::new(
            ctx,
            matrix,
            matrix as u32,
            BufferKind::Constant,
            "Forward Model",
        )?;

        let sampler = Sampler::new(ctx, AddressMode::Wrap, FilterMode::Anisotropic, 4)?;

        Ok(Self {
            name: Self::NAME.to_string(),
            enabled: true,
            clear_color,
            resources: Some(ForwardResources {
                error_texture,
                pipeline,
                color,
                depth,
                camera_buffer,
                model_buffer,
                sampler,
            }),
        })
    }

    /// Texture drawn for objects without an albedo
    pub fn error_texture(&self) -> Option<TextureHandle> {
        self.resources.as_ref().map(|r| r.error_texture.handle())
    }
}

/// Albedo to sample for an object, falling back to the error texture when
/// the object has none or its texture can no longer be sampled
fn resolve_albedo(
    ctx: &DeviceContext,
    albedo: Option<TextureHandle>,
    error: TextureHandle,
) -> TextureHandle {
    match albedo {
        Some(texture) if ctx.view(texture, ViewKind::ShaderResource).is_some() => texture,
        Some(texture) => {
            log::warn!(
                "albedo texture {} is not sampleable, drawing the error texture",
                texture.id()
            );
            error
        }
        None => error,
    }
}

fn draw_scene(
    ctx: &mut DeviceContext,
    r: &ForwardResources,
    scene: &Scene,
    clear_color: [f32; 4],
) -> RenderResult<()> {
    let (width, height) = ctx.resolution();

    let camera = scene.camera.uniform();
    r.camera_buffer
        .upload(ctx, bytemuck::bytes_of::<CameraUniform>(&camera))?;

    ctx.set_viewport(width, height);
    ctx.bind_render_target(r.color.handle(), Some(r.depth.handle()))?;
    ctx.clear_render_target(r.color.handle(), clear_color)?;
    ctx.clear_depth_target(r.depth.handle(), 1.0, 0)?;
    ctx.bind_graphics_pipeline(&r.pipeline)?;
    ctx.bind_vertex_constant_buffer(r.camera_buffer.handle(), 0)?;
    ctx.bind_sampler(r.sampler.handle(), 0)?;

    for object in &scene.objects {
        let albedo = resolve_albedo(ctx, object.albedo, r.error_texture.handle());
        for mesh in &object.meshes {
            r.model_buffer
                .upload(ctx, bytemuck::bytes_of(&object.transform))?;
            ctx.bind_vertex_constant_buffer(r.model_buffer.handle(), 1)?;
            ctx.bind_shader_resource(albedo, 0)?;
            ctx.bind_buffer(mesh.vertex_buffer)?;
            ctx.bind_buffer(mesh.index_buffer)?;

            ctx.draw_indexed(mesh.index_count)?;
        }
    }
    Ok(())
}

impl RenderNode for ForwardNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, ctx: &mut DeviceContext, scene: &Scene) -> RenderResult<()> {
        let Some(r) = self.resources.as_ref() else {
            return Ok(());
        };

        let drawn = draw_scene(ctx, r, scene, self.clear_color);

        // Unbind even when a draw failed
        let unbound = [
            ctx.unbind_vertex_constant_buffer(0),
            ctx.unbind_vertex_constant_buffer(1),
            ctx.unbind_sampler(0),
            ctx.unbind_shader_resource(0),
        ]
        .into_iter()
        .collect::<RenderResult<()>>();
        ctx.unbind_vertex_buffer();
        ctx.unbind_index_buffer();
        ctx.unbind_render_target();

        drawn.and(unbound)
    }

    fn final_output(&self) -> Option<TextureHandle> {
        self.resources.as_ref().map(|r| r.color.handle())
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn release(&mut self, ctx: &mut DeviceContext) -> RenderResult<()> {
        let Some(r) = self.resources.take() else {
            return Ok(());
        };
        [
            r.pipeline.destroy(ctx),
            r.sampler.destroy(ctx),
            r.model_buffer.destroy(ctx),
            r.camera_buffer.destroy(ctx),
            r.depth.destroy(ctx),
            r.color.destroy(ctx),
            r.error_texture.destroy(ctx),
        ]
        .into_iter()
        .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

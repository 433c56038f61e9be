//! Composite node
//!
//! Resolves the float scene color into a presentable RGBA8 texture.

use std::any::Any;

use crate::backend::{TextureFormat, TextureHandle, TextureKind, TextureUsage};
use crate::context::DeviceContext;
use crate::error::RenderResult;
use crate::pipeline::{ComputePipeline, ComputePipelineDesc};
use crate::render_graph::nodes::dispatch_groups;
use crate::render_graph::RenderNode;
use crate::resources::Texture;
use crate::scene::Scene;

pub const COMPOSITE_SHADER: &str = r#"
const TILE_SIZE: u32 = 31u;
const THREADS: u32 = 16u;

@group(1) @binding(0) var scene_color: texture_2d<f32>;
@group(3) @binding(1) var output: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(workgroup_id) tile: vec3<u32>, @builtin(local_invocation_id) local: vec3<u32>) {
    let size = vec2<i32>(textureDimensions(output));
    let origin = tile.xy * TILE_SIZE;

    for (var y = local.y; y < TILE_SIZE; y += THREADS) {
        for (var x = local.x; x < TILE_SIZE; x += THREADS) {
            let p = vec2<i32>(origin + vec2<u32>(x, y));
            if (p.x >= size.x || p.y >= size.y) {
                continue;
            }
            let rgb = clamp(textureLoad(scene_color, p, 0).rgb, vec3<f32>(0.0), vec3<f32>(1.0));
            textureStore(output, p, vec4<f32>(rgb, 1.0));
        }
    }
}
"#;

pub struct CompositeNode {
    name: String,
    enabled: bool,
    input: TextureHandle,
    resources: Option<(ComputePipeline, Texture)>,
}

impl CompositeNode {
    pub const NAME: &'static str = "Composite";

    /// `input` must carry a shader-resource view
    pub fn new(ctx: &mut DeviceContext, input: TextureHandle) -> RenderResult<Self> {
        let (width, height) = ctx.resolution();

        let output = Texture::new(
            ctx,
            TextureKind::TwoD,
            TextureUsage::RENDER_NODE,
            width,
            height,
            TextureFormat::Rgba8Unorm,
            false,
        )?;
        output.make_render_target(ctx)?;
        output.make_unordered_access(ctx)?;

        let shader = ctx
            .shaders()
            .load_embedded("shaders/composite.wgsl", COMPOSITE_SHADER, "cs_5_0")?;
        let pipeline =
            ComputePipeline::new(ctx, &ComputePipelineDesc::new(shader).with_label("Composite"))?;

        Ok(Self {
            name: Self::NAME.to_string(),
            enabled: true,
            input,
            resources: Some((pipeline, output)),
        })
    }
}

impl RenderNode for CompositeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, ctx: &mut DeviceContext, _scene: &Scene) -> RenderResult<()> {
        let Some((pipeline, output)) = self.resources.as_ref() else {
            return Ok(());
        };
        let (width, height) = ctx.resolution();
        let (x, y) = dispatch_groups(width, height);

        let dispatched = ctx
            .bind_compute_pipeline(pipeline)
            .and_then(|()| ctx.bind_compute_shader_resource(self.input, 0))
            .and_then(|()| ctx.bind_compute_unordered_access(output.handle(), 1))
            .and_then(|()| ctx.dispatch(x, y, 1));
        let unbound = ctx
            .unbind_compute_shader_resource(0)
            .and(ctx.unbind_compute_unordered_access(1));
        dispatched.and(unbound)
    }

    fn final_output(&self) -> Option<TextureHandle> {
        self.resources.as_ref().map(|(_, output)| output.handle())
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn release(&mut self, ctx: &mut DeviceContext) -> RenderResult<()> {
        let Some((pipeline, output)) = self.resources.take() else {
            return Ok(());
        };
        let destroyed = pipeline.destroy(ctx);
        destroyed.and(output.destroy(ctx))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

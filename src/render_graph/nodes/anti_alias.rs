//! FXAA node
//!
//! Runs in place on the texture it is given. Only whole 31x31 tiles are
//! dispatched, so a border narrower than one tile keeps its input.

use std::any::Any;

use crate::backend::TextureHandle;
use crate::context::DeviceContext;
use crate::error::RenderResult;
use crate::pipeline::{ComputePipeline, ComputePipelineDesc};
use crate::render_graph::nodes::dispatch_groups;
use crate::render_graph::RenderNode;
use crate::scene::Scene;

pub const FXAA_SHADER: &str = r#"
const TILE_SIZE: u32 = 31u;
const THREADS: u32 = 16u;
const EDGE_THRESHOLD: f32 = 0.125;
const EDGE_THRESHOLD_MIN: f32 = 0.0312;

@group(3) @binding(0) var color: texture_storage_2d<rgba32float, read_write>;

fn luma(rgb: vec3<f32>) -> f32 {
    return dot(rgb, vec3<f32>(0.299, 0.587, 0.114));
}

fn fetch(p: vec2<i32>, size: vec2<i32>) -> vec3<f32> {
    return textureLoad(color, clamp(p, vec2<i32>(0), size - vec2<i32>(1))).rgb;
}

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(workgroup_id) tile: vec3<u32>, @builtin(local_invocation_id) local: vec3<u32>) {
    let size = vec2<i32>(textureDimensions(color));
    let origin = tile.xy * TILE_SIZE;

    for (var y = local.y; y < TILE_SIZE; y += THREADS) {
        for (var x = local.x; x < TILE_SIZE; x += THREADS) {
            let p = vec2<i32>(origin + vec2<u32>(x, y));
            if (p.x >= size.x || p.y >= size.y) {
                continue;
            }

            let center = textureLoad(color, p);
            let n = fetch(p + vec2<i32>(0, -1), size);
            let s = fetch(p + vec2<i32>(0, 1), size);
            let e = fetch(p + vec2<i32>(1, 0), size);
            let w = fetch(p + vec2<i32>(-1, 0), size);

            let luma_c = luma(center.rgb);
            let luma_n = luma(n);
            let luma_s = luma(s);
            let luma_e = luma(e);
            let luma_w = luma(w);

            let luma_min = min(luma_c, min(min(luma_n, luma_s), min(luma_e, luma_w)));
            let luma_max = max(luma_c, max(max(luma_n, luma_s), max(luma_e, luma_w)));
            let range = luma_max - luma_min;
            if (range < max(EDGE_THRESHOLD_MIN, luma_max * EDGE_THRESHOLD)) {
                continue;
            }

            // Blend across the edge, along the axis with the larger gradient
            let vertical_edge = abs(luma_e + luma_w - 2.0 * luma_c);
            let horizontal_edge = abs(luma_n + luma_s - 2.0 * luma_c);
            var across = (e + w) * 0.5;
            if (horizontal_edge >= vertical_edge) {
                across = (n + s) * 0.5;
            }
            let amount = clamp(range / max(luma_max, 0.0001), 0.0, 0.75);
            textureStore(color, p, vec4<f32>(mix(center.rgb, across, amount), center.a));
        }
    }
}
"#;

pub struct AntiAliasNode {
    name: String,
    enabled: bool,
    color: TextureHandle,
    pipeline: Option<ComputePipeline>,
}

impl AntiAliasNode {
    pub const NAME: &'static str = "AntiAlias";

    /// `color` must carry an unordered-access view
    pub fn new(ctx: &mut DeviceContext, color: TextureHandle) -> RenderResult<Self> {
        let shader = ctx
            .shaders()
            .load_embedded("shaders/fxaa.wgsl", FXAA_SHADER, "cs_5_0")?;
        let pipeline =
            ComputePipeline::new(ctx, &ComputePipelineDesc::new(shader).with_label("FXAA"))?;

        Ok(Self {
            name: Self::NAME.to_string(),
            enabled: true,
            color,
            pipeline: Some(pipeline),
        })
    }
}

impl RenderNode for AntiAliasNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, ctx: &mut DeviceContext, _scene: &Scene) -> RenderResult<()> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Ok(());
        };
        let (width, height) = ctx.resolution();
        let (x, y) = dispatch_groups(width, height);

        let dispatched = ctx
            .bind_compute_pipeline(pipeline)
            .and_then(|()| ctx.bind_compute_unordered_access(self.color, 0))
            .and_then(|()| ctx.dispatch(x, y, 1));
        let unbound = ctx.unbind_compute_unordered_access(0);
        dispatched.and(unbound)
    }

    fn final_output(&self) -> Option<TextureHandle> {
        Some(self.color)
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn release(&mut self, ctx: &mut DeviceContext) -> RenderResult<()> {
        match self.pipeline.take() {
            Some(pipeline) => pipeline.destroy(ctx),
            None => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

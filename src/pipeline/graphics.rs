//! Graphics pipeline

use crate::backend::{
    BindingLayoutEntry, CompareFunction, CullMode, FillMode, FrontFace, RenderPipelineDescriptor,
    RenderPipelineHandle, ShaderStage, VertexBufferLayout,
};
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{layout::derive_vertex_layout, merge_bindings, slot_for};
use crate::shader::{ShaderBytecode, ShaderReflection, ENTRY_POINT};

/// Graphics pipeline creation info
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub label: Option<String>,
    pub vertex: ShaderBytecode,
    pub pixel: ShaderBytecode,
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
    pub front_face: FrontFace,
    pub depth_compare: CompareFunction,
}

impl GraphicsPipelineDesc {
    /// Back-face culled, solid, counter-clockwise, depth less
    pub fn new(vertex: ShaderBytecode, pixel: ShaderBytecode) -> Self {
        Self {
            label: None,
            vertex,
            pixel,
            cull_mode: CullMode::Back,
            fill_mode: FillMode::Solid,
            front_face: FrontFace::Ccw,
            depth_compare: CompareFunction::Less,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.fill_mode = fill_mode;
        self
    }

    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn with_depth_compare(mut self, depth_compare: CompareFunction) -> Self {
        self.depth_compare = depth_compare;
        self
    }
}

fn reflect_stage(
    bytecode: &ShaderBytecode,
    expected: ShaderStage,
) -> RenderResult<ShaderReflection> {
    let reflection = bytecode.reflect()?;
    if reflection.stage != expected {
        return Err(RenderError::Reflection(format!(
            "expected a {:?} stage, bytecode contains {:?}",
            expected, reflection.stage
        ))
        .logged());
    }
    Ok(reflection)
}

/// Immutable vertex + pixel pipeline with its reflected interface
#[derive(Debug, Clone)]
pub struct GraphicsPipeline {
    handle: RenderPipelineHandle,
    vertex_layout: VertexBufferLayout,
    bindings: Vec<BindingLayoutEntry>,
}

impl GraphicsPipeline {
    pub fn new(ctx: &mut DeviceContext, desc: &GraphicsPipelineDesc) -> RenderResult<Self> {
        let vertex = reflect_stage(&desc.vertex, ShaderStage::Vertex)?;
        let pixel = reflect_stage(&desc.pixel, ShaderStage::Fragment)?;

        let vertex_layout = derive_vertex_layout(&vertex.inputs).map_err(RenderError::logged)?;
        let bindings =
            merge_bindings(&[&vertex.bindings, &pixel.bindings]).map_err(RenderError::logged)?;
        for entry in &bindings {
            slot_for(entry, false).map_err(RenderError::logged)?;
        }

        let handle = ctx.create_render_pipeline(&RenderPipelineDescriptor {
            label: desc.label.clone(),
            vertex_shader: desc.vertex.words.clone(),
            fragment_shader: desc.pixel.words.clone(),
            entry_point: ENTRY_POINT.to_string(),
            vertex_layout: vertex_layout.clone(),
            bindings: bindings.clone(),
            front_face: desc.front_face,
            cull_mode: desc.cull_mode,
            fill_mode: desc.fill_mode,
            depth_compare: desc.depth_compare,
        })?;

        log::debug!(
            "Created graphics pipeline {:?}: {} vertex attributes, stride {}, {} bindings",
            desc.label,
            vertex_layout.attributes.len(),
            vertex_layout.array_stride,
            bindings.len()
        );

        Ok(Self {
            handle,
            vertex_layout,
            bindings,
        })
    }

    pub fn handle(&self) -> RenderPipelineHandle {
        self.handle
    }

    pub fn vertex_layout(&self) -> &VertexBufferLayout {
        &self.vertex_layout
    }

    pub fn bindings(&self) -> &[BindingLayoutEntry] {
        &self.bindings
    }

    pub fn destroy(self, ctx: &mut DeviceContext) -> RenderResult<()> {
        ctx.destroy_render_pipeline(self.handle)
    }
}

//! Compute pipeline

use crate::backend::{
    BindingLayoutEntry, ComputePipelineDescriptor, ComputePipelineHandle, ShaderStage,
};
use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::slot_for;
use crate::shader::{ShaderBytecode, ENTRY_POINT};

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub label: Option<String>,
    pub shader: ShaderBytecode,
}

impl ComputePipelineDesc {
    pub fn new(shader: ShaderBytecode) -> Self {
        Self { label: None, shader }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Immutable compute pipeline
#[derive(Debug, Clone)]
pub struct ComputePipeline {
    handle: ComputePipelineHandle,
    bindings: Vec<BindingLayoutEntry>,
    workgroup_size: [u32; 3],
}

impl ComputePipeline {
    pub fn new(ctx: &mut DeviceContext, desc: &ComputePipelineDesc) -> RenderResult<Self> {
        let reflection = desc.shader.reflect()?;
        if reflection.stage != ShaderStage::Compute {
            return Err(RenderError::Reflection(format!(
                "expected a Compute stage, bytecode contains {:?}",
                reflection.stage
            ))
            .logged());
        }
        for entry in &reflection.bindings {
            slot_for(entry, true).map_err(RenderError::logged)?;
        }

        let handle = ctx.create_compute_pipeline(&ComputePipelineDescriptor {
            label: desc.label.clone(),
            shader: desc.shader.words.clone(),
            entry_point: ENTRY_POINT.to_string(),
            bindings: reflection.bindings.clone(),
        })?;

        Ok(Self {
            handle,
            bindings: reflection.bindings,
            workgroup_size: reflection.workgroup_size,
        })
    }

    pub fn handle(&self) -> ComputePipelineHandle {
        self.handle
    }

    pub fn bindings(&self) -> &[BindingLayoutEntry] {
        &self.bindings
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    pub fn destroy(self, ctx: &mut DeviceContext) -> RenderResult<()> {
        ctx.destroy_compute_pipeline(self.handle)
    }
}

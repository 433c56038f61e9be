//! Pipeline objects
//!
//! Graphics and compute pipelines are built from compiled shader stages.
//! Their vertex layout and resource bindings come from reflection, and
//! every reflected binding is mapped onto a context slot:
//!
//! | group | resource           | slot mapping                                  |
//! |-------|--------------------|-----------------------------------------------|
//! | 0     | constant buffers   | vertex `s` = `s`, pixel `s` = `16 + s`, compute `s` = `s` |
//! | 1     | shader resources   | slot = binding                                |
//! | 2     | samplers           | slot = binding                                |
//! | 3     | writable textures  | slot = binding (compute only)                 |

pub mod compute;
pub mod graphics;
pub mod layout;

pub use compute::{ComputePipeline, ComputePipelineDesc};
pub use graphics::{GraphicsPipeline, GraphicsPipelineDesc};
pub use layout::{derive_vertex_layout, vertex_format};

use crate::backend::{BindingLayoutEntry, BindingType};
use crate::error::{RenderError, RenderResult};

/// Number of slots in every binding register bank
pub const MAX_SLOTS: u32 = 16;

pub const CONSTANT_GROUP: u32 = 0;
pub const SHADER_RESOURCE_GROUP: u32 = 1;
pub const SAMPLER_GROUP: u32 = 2;
pub const UNORDERED_ACCESS_GROUP: u32 = 3;

/// First group-0 binding used by pixel-stage constant buffers
pub const PIXEL_CONSTANT_BASE: u32 = 16;

/// Context register a reflected binding reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    VertexConstant(u32),
    PixelConstant(u32),
    ComputeConstant(u32),
    ShaderResource(u32),
    ComputeShaderResource(u32),
    Sampler(u32),
    UnorderedAccess(u32),
}

impl Slot {
    /// Register bank name used in error messages
    pub fn bank(&self) -> &'static str {
        match self {
            Slot::VertexConstant(_) => "vertex constant buffer",
            Slot::PixelConstant(_) => "pixel constant buffer",
            Slot::ComputeConstant(_) => "compute constant buffer",
            Slot::ShaderResource(_) => "shader resource",
            Slot::ComputeShaderResource(_) => "compute shader resource",
            Slot::Sampler(_) => "sampler",
            Slot::UnorderedAccess(_) => "unordered access view",
        }
    }

    pub fn index(&self) -> u32 {
        match *self {
            Slot::VertexConstant(s)
            | Slot::PixelConstant(s)
            | Slot::ComputeConstant(s)
            | Slot::ShaderResource(s)
            | Slot::ComputeShaderResource(s)
            | Slot::Sampler(s)
            | Slot::UnorderedAccess(s) => s,
        }
    }
}

/// Map a reflected binding to the register it is fed from
pub fn slot_for(entry: &BindingLayoutEntry, compute: bool) -> RenderResult<Slot> {
    let bad = |what: &str| {
        RenderError::Reflection(format!(
            "binding ({}, {}) of type {:?} {}",
            entry.group, entry.binding, entry.ty, what
        ))
    };
    let b = entry.binding;

    let slot = match (entry.group, entry.ty) {
        (CONSTANT_GROUP, BindingType::UniformBuffer) => {
            if compute {
                Slot::ComputeConstant(b)
            } else if b < PIXEL_CONSTANT_BASE {
                Slot::VertexConstant(b)
            } else {
                Slot::PixelConstant(b - PIXEL_CONSTANT_BASE)
            }
        }
        (SHADER_RESOURCE_GROUP, BindingType::Texture { .. }) => {
            if compute {
                Slot::ComputeShaderResource(b)
            } else {
                Slot::ShaderResource(b)
            }
        }
        (SAMPLER_GROUP, BindingType::Sampler { .. }) => Slot::Sampler(b),
        (UNORDERED_ACCESS_GROUP, BindingType::StorageTexture { .. }) => {
            if !compute {
                return Err(bad("is only available to compute pipelines"));
            }
            Slot::UnorderedAccess(b)
        }
        _ => return Err(bad("does not match its bind group")),
    };

    if slot.index() >= MAX_SLOTS {
        return Err(bad("is outside the slot range"));
    }
    Ok(slot)
}

/// Merge the bindings of several stages, or-ing visibility of shared entries
pub fn merge_bindings(stages: &[&[BindingLayoutEntry]]) -> RenderResult<Vec<BindingLayoutEntry>> {
    let mut merged: Vec<BindingLayoutEntry> = Vec::new();
    for entry in stages.iter().flat_map(|s| s.iter()) {
        match merged
            .iter_mut()
            .find(|m| m.group == entry.group && m.binding == entry.binding)
        {
            Some(existing) if existing.ty == entry.ty => existing.visibility |= entry.visibility,
            Some(existing) => {
                return Err(RenderError::Reflection(format!(
                    "binding ({}, {}) declared as {:?} and {:?}",
                    entry.group, entry.binding, existing.ty, entry.ty
                )))
            }
            None => merged.push(entry.clone()),
        }
    }
    merged.sort_by_key(|b| (b.group, b.binding));
    Ok(merged)
}

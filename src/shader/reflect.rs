//! SPIR-V reflection
//!
//! Pulls the entry point's vertex inputs and resource bindings back out of a
//! compiled module so pipelines never need a hand-written layout.

use crate::backend::{
    BindingLayoutEntry, BindingType, ShaderStage, ShaderStageFlags, TextureFormat,
    TextureSampleType,
};
use crate::error::{RenderError, RenderResult};

/// Scalar kind of a stage input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Uint,
    Sint,
    Float,
}

/// One location-bound input of an entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInput {
    pub location: u32,
    /// Only present when the module carries debug names
    pub name: Option<String>,
    pub kind: ComponentKind,
    pub components: u32,
}

/// Interface of a compiled entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    /// Sorted by location; built-ins are skipped
    pub inputs: Vec<VertexInput>,
    /// Sorted by `(group, binding)`
    pub bindings: Vec<BindingLayoutEntry>,
    pub workgroup_size: [u32; 3],
}

impl ShaderReflection {
    /// Reflect the first entry point of a SPIR-V module
    pub fn from_spirv(words: &[u32]) -> RenderResult<Self> {
        Self::parse(words).map_err(RenderError::logged)
    }

    fn parse(words: &[u32]) -> RenderResult<Self> {
        let options = naga::front::spv::Options {
            adjust_coordinate_space: false,
            strict_capabilities: false,
            block_ctx_dump_prefix: None,
        };
        let module = naga::front::spv::parse_u8_slice(bytemuck::cast_slice(words), &options)
            .map_err(|e| RenderError::Reflection(format!("invalid SPIR-V: {e}")))?;

        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == super::ENTRY_POINT)
            .or_else(|| module.entry_points.first())
            .ok_or_else(|| RenderError::Reflection("module has no entry point".into()))?;

        let stage = match entry.stage {
            naga::ShaderStage::Vertex => ShaderStage::Vertex,
            naga::ShaderStage::Fragment => ShaderStage::Fragment,
            naga::ShaderStage::Compute => ShaderStage::Compute,
        };

        let mut inputs = Vec::new();
        for arg in &entry.function.arguments {
            match &arg.binding {
                Some(binding) => {
                    if let Some(input) = stage_input(&module, arg.ty, binding, arg.name.clone())? {
                        inputs.push(input);
                    }
                }
                None => {
                    // Inputs grouped in a struct carry the bindings on members
                    if let naga::TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                        for member in members {
                            if let Some(binding) = &member.binding {
                                if let Some(input) =
                                    stage_input(&module, member.ty, binding, member.name.clone())?
                                {
                                    inputs.push(input);
                                }
                            }
                        }
                    }
                }
            }
        }
        inputs.sort_by_key(|input| input.location);

        let visibility = ShaderStageFlags::from_stage(stage);
        let has_sampler = module.global_variables.iter().any(|(_, var)| {
            matches!(
                module.types[var.ty].inner,
                naga::TypeInner::Sampler { comparison: false }
            )
        });

        let mut bindings = Vec::new();
        for (_, var) in module.global_variables.iter() {
            let Some(rb) = &var.binding else {
                continue;
            };
            let name = var.name.as_deref().unwrap_or("<unnamed>");
            let ty = match var.space {
                naga::AddressSpace::Uniform => BindingType::UniformBuffer,
                naga::AddressSpace::Handle => {
                    resource_type(&module.types[var.ty].inner, has_sampler)
                        .map_err(|e| RenderError::Reflection(format!("{name}: {e}")))?
                }
                other => {
                    return Err(RenderError::Reflection(format!(
                        "{name}: unsupported address space {other:?}"
                    )))
                }
            };
            bindings.push(BindingLayoutEntry {
                group: rb.group,
                binding: rb.binding,
                visibility,
                ty,
            });
        }
        bindings.sort_by_key(|b| (b.group, b.binding));

        Ok(Self {
            stage,
            inputs,
            bindings,
            workgroup_size: entry.workgroup_size,
        })
    }
}

fn stage_input(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: &naga::Binding,
    name: Option<String>,
) -> RenderResult<Option<VertexInput>> {
    let location = match binding {
        naga::Binding::Location { location, .. } => *location,
        naga::Binding::BuiltIn(_) => return Ok(None),
    };
    let (scalar, components) = match module.types[ty].inner {
        naga::TypeInner::Scalar(scalar) => (scalar, 1),
        naga::TypeInner::Vector { size, scalar } => (scalar, size as u32),
        ref other => {
            return Err(RenderError::Reflection(format!(
                "input at location {location} has unsupported type {other:?}"
            )))
        }
    };
    if scalar.width != 4 {
        return Err(RenderError::Reflection(format!(
            "input at location {location} is {} bytes wide, only 32-bit components are supported",
            scalar.width
        )));
    }
    let kind = match scalar.kind {
        naga::ScalarKind::Uint => ComponentKind::Uint,
        naga::ScalarKind::Sint => ComponentKind::Sint,
        naga::ScalarKind::Float => ComponentKind::Float,
        other => {
            return Err(RenderError::Reflection(format!(
                "input at location {location} has unsupported scalar kind {other:?}"
            )))
        }
    };
    Ok(Some(VertexInput {
        location,
        name,
        kind,
        components,
    }))
}

fn resource_type(inner: &naga::TypeInner, has_sampler: bool) -> Result<BindingType, String> {
    match *inner {
        naga::TypeInner::Sampler { comparison } => Ok(BindingType::Sampler { comparison }),
        naga::TypeInner::Image {
            dim,
            arrayed,
            class,
        } => {
            if arrayed {
                return Err("texture arrays are not supported".into());
            }
            let cube = match dim {
                naga::ImageDimension::D2 => false,
                naga::ImageDimension::Cube => true,
                other => return Err(format!("unsupported texture dimension {other:?}")),
            };
            match class {
                naga::ImageClass::Sampled { kind, multi: false } => {
                    let sample_type = match kind {
                        naga::ScalarKind::Float => TextureSampleType::Float {
                            filterable: has_sampler,
                        },
                        naga::ScalarKind::Sint => TextureSampleType::Sint,
                        naga::ScalarKind::Uint => TextureSampleType::Uint,
                        other => return Err(format!("unsupported sample kind {other:?}")),
                    };
                    Ok(BindingType::Texture { sample_type, cube })
                }
                naga::ImageClass::Depth { multi: false } => Ok(BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    cube,
                }),
                naga::ImageClass::Storage { format, access } => {
                    if cube {
                        return Err("cube storage textures are not supported".into());
                    }
                    let format = match format {
                        naga::StorageFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
                        naga::StorageFormat::Rgba16Float => TextureFormat::Rgba16Float,
                        naga::StorageFormat::Rgba32Float => TextureFormat::Rgba32Float,
                        naga::StorageFormat::R32Float => TextureFormat::R32Float,
                        naga::StorageFormat::Rg32Float => TextureFormat::Rg32Float,
                        other => return Err(format!("unsupported storage format {other:?}")),
                    };
                    Ok(BindingType::StorageTexture {
                        format,
                        read: access.contains(naga::StorageAccess::LOAD),
                    })
                }
                _ => Err("multisampled textures are not supported".into()),
            }
        }
        ref other => Err(format!("unsupported resource type {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderCompiler;

    const MESH_VS: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> camera: Camera;

struct VertexInput {
    @location(1) uv: vec2<f32>,
    @location(0) position: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn main(in: VertexInput, @builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}
"#;

    const SAMPLED_PS: &str = r#"
@group(1) @binding(0) var albedo: texture_2d<f32>;
@group(2) @binding(0) var albedo_sampler: sampler;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(albedo, albedo_sampler, uv);
}
"#;

    const LOAD_PS: &str = r#"
@group(1) @binding(0) var source: texture_2d<f32>;

@fragment
fn main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(source, vec2<i32>(pos.xy), 0);
}
"#;

    const INVERT_CS: &str = r#"
@group(3) @binding(0) var image: texture_storage_2d<rgba32float, read_write>;

@compute @workgroup_size(8, 4, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let texel = textureLoad(image, vec2<i32>(id.xy));
    textureStore(image, vec2<i32>(id.xy), vec4<f32>(1.0) - texel);
}
"#;

    #[test]
    fn vertex_inputs_are_sorted_and_builtins_skipped() {
        let reflection = ShaderCompiler::compile(MESH_VS, "vs_5_0")
            .unwrap()
            .reflect()
            .unwrap();
        assert_eq!(reflection.stage, ShaderStage::Vertex);
        let locations: Vec<_> = reflection
            .inputs
            .iter()
            .map(|i| (i.location, i.kind, i.components))
            .collect();
        assert_eq!(
            locations,
            vec![(0, ComponentKind::Float, 3), (1, ComponentKind::Float, 2)]
        );
        assert_eq!(reflection.bindings.len(), 1);
        assert_eq!(reflection.bindings[0].ty, BindingType::UniformBuffer);
        assert_eq!(reflection.bindings[0].visibility, ShaderStageFlags::VERTEX);
    }

    #[test]
    fn sampled_textures_are_filterable() {
        let reflection = ShaderCompiler::compile(SAMPLED_PS, "ps_5_0")
            .unwrap()
            .reflect()
            .unwrap();
        let tys: Vec<_> = reflection.bindings.iter().map(|b| (b.group, b.ty)).collect();
        assert_eq!(
            tys,
            vec![
                (
                    1,
                    BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        cube: false
                    }
                ),
                (2, BindingType::Sampler { comparison: false }),
            ]
        );
    }

    #[test]
    fn loaded_textures_are_not_filterable() {
        let reflection = ShaderCompiler::compile(LOAD_PS, "ps_5_0")
            .unwrap()
            .reflect()
            .unwrap();
        assert_eq!(
            reflection.bindings[0].ty,
            BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: false },
                cube: false
            }
        );
        assert!(reflection.inputs.is_empty());
    }

    #[test]
    fn compute_reflects_storage_texture_and_workgroup() {
        let reflection = ShaderCompiler::compile(INVERT_CS, "cs_5_0")
            .unwrap()
            .reflect()
            .unwrap();
        assert_eq!(reflection.stage, ShaderStage::Compute);
        assert_eq!(reflection.workgroup_size, [8, 4, 1]);
        assert_eq!(
            reflection.bindings[0].ty,
            BindingType::StorageTexture {
                format: TextureFormat::Rgba32Float,
                read: true
            }
        );
    }
}

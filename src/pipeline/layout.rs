//! Vertex layout derivation from reflected stage inputs

use crate::backend::{VertexAttribute, VertexBufferLayout, VertexFormat};
use crate::error::{RenderError, RenderResult};
use crate::shader::{ComponentKind, VertexInput};

/// Pick the attribute format for `components` 32-bit values of `kind`
pub fn vertex_format(kind: ComponentKind, components: u32) -> RenderResult<VertexFormat> {
    use VertexFormat::*;
    let format = match (kind, components) {
        (ComponentKind::Uint, 1) => Uint32,
        (ComponentKind::Uint, 2) => Uint32x2,
        (ComponentKind::Uint, 3) => Uint32x3,
        (ComponentKind::Uint, 4) => Uint32x4,
        (ComponentKind::Sint, 1) => Sint32,
        (ComponentKind::Sint, 2) => Sint32x2,
        (ComponentKind::Sint, 3) => Sint32x3,
        (ComponentKind::Sint, 4) => Sint32x4,
        (ComponentKind::Float, 1) => Float32,
        (ComponentKind::Float, 2) => Float32x2,
        (ComponentKind::Float, 3) => Float32x3,
        (ComponentKind::Float, 4) => Float32x4,
        _ => {
            return Err(RenderError::Reflection(format!(
                "{components} components of {kind:?} do not form a vertex format"
            )))
        }
    };
    Ok(format)
}

/// Pack the inputs tightly into one buffer at slot 0, in location order
pub fn derive_vertex_layout(inputs: &[VertexInput]) -> RenderResult<VertexBufferLayout> {
    let mut sorted: Vec<&VertexInput> = inputs.iter().collect();
    sorted.sort_by_key(|input| input.location);

    let mut offset = 0;
    let mut attributes = Vec::with_capacity(sorted.len());
    for input in sorted {
        let format = vertex_format(input.kind, input.components)?;
        attributes.push(VertexAttribute {
            location: input.location,
            format,
            offset,
        });
        offset += format.size();
    }

    Ok(VertexBufferLayout {
        array_stride: offset,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn input(location: u32, kind: ComponentKind, components: u32) -> VertexInput {
        VertexInput {
            location,
            name: None,
            kind,
            components,
        }
    }

    #[test]
    fn position_and_texcoord_pack_tightly() {
        let layout = derive_vertex_layout(&[
            input(0, ComponentKind::Float, 3),
            input(1, ComponentKind::Float, 2),
        ])
        .unwrap();

        assert_eq!(layout.array_stride, 20);
        assert_eq!(
            layout.attributes,
            vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x2,
                    offset: 12
                },
            ]
        );
    }

    #[test]
    fn inputs_are_ordered_by_location() {
        let layout = derive_vertex_layout(&[
            input(2, ComponentKind::Uint, 1),
            input(0, ComponentKind::Float, 4),
        ])
        .unwrap();
        assert_eq!(layout.attributes[0].location, 0);
        assert_eq!(layout.attributes[1].offset, 16);
        assert_eq!(layout.array_stride, 20);
    }

    #[test]
    fn empty_inputs_give_empty_layout() {
        assert_eq!(derive_vertex_layout(&[]).unwrap(), VertexBufferLayout::default());
    }

    #[rstest]
    #[case::uint(ComponentKind::Uint, 2, VertexFormat::Uint32x2)]
    #[case::sint(ComponentKind::Sint, 4, VertexFormat::Sint32x4)]
    #[case::float(ComponentKind::Float, 1, VertexFormat::Float32)]
    fn formats_follow_kind_and_count(
        #[case] kind: ComponentKind,
        #[case] components: u32,
        #[case] expected: VertexFormat,
    ) {
        assert_eq!(vertex_format(kind, components).unwrap(), expected);
    }

    #[test]
    fn five_components_are_rejected() {
        assert!(vertex_format(ComponentKind::Float, 5).is_err());
    }
}

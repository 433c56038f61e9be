//! Render graph integration tests.
//!
//! Graphs are built from small clear nodes so every backend can run them;
//! the forward node is checked against the draw stream the reference
//! device records.

mod common;

use glam::{Mat4, Vec3};
use rstest::rstest;

use common::{to_rgba8, Backend, ClearNode, TestContext, TEST_SIZE};
use render_core::backend::reference::RecordedCommand;
use render_core::backend::{BoundResource, BufferKind, ViewKind};
use render_core::render_graph::nodes::TILE_SIZE;
use render_core::resources::checkerboard;
use render_core::{
    AntiAliasNode, Buffer, Camera, CompositeNode, ForwardNode, ForwardVertex, GpuMesh,
    RenderError, RenderGraph, RenderNode, RenderObject, Scene, Texture,
};

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

// ============================================================================
// Presentation
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_last_node_is_presented_even_when_disabled(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut graph = RenderGraph::new();
    let a = ClearNode::new(&mut tc.ctx, "A", RED).unwrap();
    let mut b = ClearNode::new(&mut tc.ctx, "B", BLUE).unwrap();
    let tex_b = b.target().unwrap();
    b.set_enabled(false);

    // B's target holds a known color even though B never runs
    tc.ctx.clear_render_target(tex_b, BLUE).unwrap();

    graph.push_node(a);
    graph.push_node(b);
    graph
        .render(&mut tc.ctx, &TestContext::empty_scene())
        .unwrap();

    let back_buffer = tc.ctx.back_buffer().unwrap();
    assert_eq!(tc.read_pixel(back_buffer, 0, 0), to_rgba8(BLUE));
    assert_eq!(
        tc.read_pixel(back_buffer, TEST_SIZE - 1, TEST_SIZE - 1),
        to_rgba8(BLUE)
    );

    graph.shutdown(&mut tc.ctx).unwrap();
    assert!(graph.is_empty());
}

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_enabled_last_node_overwrites_back_buffer(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut graph = RenderGraph::new();
    let node = ClearNode::new(&mut tc.ctx, "Solid", RED).unwrap();
    graph.push_node(node);

    let back_buffer = tc.ctx.back_buffer().unwrap();
    tc.ctx.clear_render_target(back_buffer, BLUE).unwrap();
    graph
        .render(&mut tc.ctx, &TestContext::empty_scene())
        .unwrap();
    tc.ctx.present(false).unwrap();

    assert_eq!(tc.read_pixel(back_buffer, 5, 7), to_rgba8(RED));

    graph.shutdown(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_empty_graph_renders_nothing(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut graph = RenderGraph::new();
    assert!(graph
        .render(&mut tc.ctx, &TestContext::empty_scene())
        .is_ok());
}

// ============================================================================
// Lookup
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
fn test_get_node_is_idempotent(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut graph = RenderGraph::new();
    graph.push_node(ClearNode::new(&mut tc.ctx, "First", RED).unwrap());
    graph.push_node(ClearNode::new(&mut tc.ctx, "Second", BLUE).unwrap());

    let first = graph.get_node("Second").unwrap() as *const dyn RenderNode as *const u8;
    let second = graph.get_node("Second").unwrap() as *const dyn RenderNode as *const u8;
    assert_eq!(first, second);
    assert_eq!(graph.get_node("Second").unwrap().name(), "Second");

    assert!(graph.get_node("Missing").is_none());
    assert!(graph.get_node_mut("Missing").is_none());
    assert!(graph.get_node_as::<ForwardNode>("First").is_none());

    graph
        .get_node_as_mut::<ClearNode>("First")
        .unwrap()
        .set_enabled(false);
    assert!(!graph.get_node("First").unwrap().enabled());

    let names: Vec<_> = graph.node_names().collect();
    assert_eq!(names, ["First", "Second"]);

    graph.shutdown(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_duplicate_names_resolve_to_first(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut graph = RenderGraph::new();
    let first = ClearNode::new(&mut tc.ctx, "Same", RED).unwrap();
    let first_target = first.target();
    graph.push_node(first);
    graph.push_node(ClearNode::new(&mut tc.ctx, "Same", BLUE).unwrap());

    assert_eq!(graph.len(), 2);
    let found = graph.get_node_as::<ClearNode>("Same").unwrap();
    assert_eq!(found.target(), first_target);

    graph.shutdown(&mut tc.ctx).unwrap();
}

// ============================================================================
// Forward Node
// ============================================================================

const QUAD_VERTICES: [ForwardVertex; 4] = [
    ForwardVertex {
        position: [-0.5, 0.5, 0.0],
        texcoord: [0.0, 0.0],
    },
    ForwardVertex {
        position: [0.5, 0.5, 0.0],
        texcoord: [1.0, 0.0],
    },
    ForwardVertex {
        position: [0.5, -0.5, 0.0],
        texcoord: [1.0, 1.0],
    },
    ForwardVertex {
        position: [-0.5, -0.5, 0.0],
        texcoord: [0.0, 1.0],
    },
];

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

fn create_quad(tc: &mut TestContext) -> (Buffer, Buffer, GpuMesh) {
    let vertices =
        Buffer::create_from_slice(&mut tc.ctx, &QUAD_VERTICES, BufferKind::Vertex, "Quad").unwrap();
    let indices =
        Buffer::create_from_slice(&mut tc.ctx, &QUAD_INDICES, BufferKind::Index, "Quad Indices")
            .unwrap();
    let mesh = GpuMesh {
        vertex_buffer: vertices.handle(),
        index_buffer: indices.handle(),
        index_count: QUAD_INDICES.len() as u32,
    };
    (vertices, indices, mesh)
}

fn bound_shader_resources(tc: &TestContext) -> Vec<BoundResource> {
    let reference = tc.ctx.backend().as_reference().unwrap();
    reference
        .commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::Draw(call) => Some(call),
            _ => None,
        })
        .flat_map(|call| call.bindings.iter().map(|b| b.resource))
        .filter(|resource| matches!(resource, BoundResource::ShaderResource(_)))
        .collect()
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_forward_uses_error_texture_without_albedo(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut node = ForwardNode::new(&mut tc.ctx, [0.1, 0.1, 0.1, 1.0]).unwrap();
    let (vertices, indices, mesh) = create_quad(&mut tc);

    let mut scene = Scene::new(Camera::new(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO));
    scene.add_object(RenderObject::new(vec![mesh]));
    node.render(&mut tc.ctx, &scene).unwrap();

    let error_texture = node.error_texture().unwrap();
    let error_view = tc
        .ctx
        .view(error_texture, ViewKind::ShaderResource)
        .unwrap();
    assert_eq!(
        bound_shader_resources(&tc),
        vec![BoundResource::ShaderResource(error_view)]
    );

    vertices.destroy(&mut tc.ctx).unwrap();
    indices.destroy(&mut tc.ctx).unwrap();
    node.release(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_forward_draws_every_mesh_with_its_albedo(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut node = ForwardNode::new(&mut tc.ctx, [0.1, 0.1, 0.1, 1.0]).unwrap();
    let (vertices, indices, mesh) = create_quad(&mut tc);
    let albedo = Texture::create_from_image(&mut tc.ctx, &checkerboard(16), "Albedo").unwrap();

    let mut scene = Scene::new(Camera::default().with_aspect(TEST_SIZE, TEST_SIZE));
    scene.add_object(
        RenderObject::new(vec![mesh, mesh])
            .with_transform(Mat4::from_rotation_z(0.5))
            .with_albedo(albedo.handle()),
    );
    node.render(&mut tc.ctx, &scene).unwrap();

    let albedo_view = tc
        .ctx
        .view(albedo.handle(), ViewKind::ShaderResource)
        .unwrap();
    assert_eq!(
        bound_shader_resources(&tc),
        vec![BoundResource::ShaderResource(albedo_view); 2]
    );

    let reference = tc.ctx.backend().as_reference().unwrap();
    for command in reference.commands() {
        if let RecordedCommand::Draw(call) = command {
            assert!(call.indexed);
            assert_eq!(call.count, 6);
            assert_eq!(call.vertex_buffer, Some(vertices.handle()));
            assert_eq!(call.index_buffer, Some(indices.handle()));
            assert!(call.depth_target.is_some());
            assert_eq!((call.viewport.width, call.viewport.height), (TEST_SIZE, TEST_SIZE));
        }
    }

    albedo.destroy(&mut tc.ctx).unwrap();
    vertices.destroy(&mut tc.ctx).unwrap();
    indices.destroy(&mut tc.ctx).unwrap();
    node.release(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_forward_leaves_no_slots_bound(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut node = ForwardNode::new(&mut tc.ctx, [0.1, 0.1, 0.1, 1.0]).unwrap();
    let (vertices, indices, mesh) = create_quad(&mut tc);
    let albedo = Texture::create_from_image(&mut tc.ctx, &checkerboard(8), "Albedo").unwrap();

    let mut scene = Scene::new(Camera::default());
    scene.add_object(RenderObject::new(vec![mesh]).with_albedo(albedo.handle()));
    node.render(&mut tc.ctx, &scene).unwrap();

    // The render target was released, so nothing can be drawn
    assert!(matches!(
        tc.ctx.draw_indexed(6),
        Err(RenderError::UnboundSlot { .. })
    ));

    // Nothing the node bound per draw is still referenced
    albedo.destroy(&mut tc.ctx).unwrap();
    vertices.destroy(&mut tc.ctx).unwrap();
    indices.destroy(&mut tc.ctx).unwrap();
    node.release(&mut tc.ctx).unwrap();

    assert_eq!(tc.ctx.live_textures(), 0);
    assert_eq!(tc.ctx.live_buffers(), 0);
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_forward_replaces_destroyed_albedo_with_error_texture(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut node = ForwardNode::new(&mut tc.ctx, [0.1, 0.1, 0.1, 1.0]).unwrap();
    let (vertices, indices, mesh) = create_quad(&mut tc);
    let albedo = Texture::create_from_image(&mut tc.ctx, &checkerboard(8), "Albedo").unwrap();
    let stale = albedo.handle();
    albedo.destroy(&mut tc.ctx).unwrap();

    let mut scene = Scene::new(Camera::default());
    scene.add_object(RenderObject::new(vec![mesh]).with_albedo(stale));
    node.render(&mut tc.ctx, &scene).unwrap();

    let error_view = tc
        .ctx
        .view(node.error_texture().unwrap(), ViewKind::ShaderResource)
        .unwrap();
    assert_eq!(
        bound_shader_resources(&tc),
        vec![BoundResource::ShaderResource(error_view)]
    );

    vertices.destroy(&mut tc.ctx).unwrap();
    indices.destroy(&mut tc.ctx).unwrap();
    node.release(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_failed_forward_draw_unbinds_and_releases(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut node = ForwardNode::new(&mut tc.ctx, [0.1, 0.1, 0.1, 1.0]).unwrap();
    let (vertices, indices, mesh) = create_quad(&mut tc);
    let albedo = Texture::create_from_image(&mut tc.ctx, &checkerboard(8), "Albedo").unwrap();
    vertices.destroy(&mut tc.ctx).unwrap();

    let mut scene = Scene::new(Camera::default());
    scene.add_object(RenderObject::new(vec![mesh]).with_albedo(albedo.handle()));
    assert!(matches!(
        node.render(&mut tc.ctx, &scene),
        Err(RenderError::InvalidHandle(_))
    ));

    // The aborted pass left its target and per-draw bindings released
    assert!(matches!(
        tc.ctx.draw_indexed(6),
        Err(RenderError::UnboundSlot { .. })
    ));
    albedo.destroy(&mut tc.ctx).unwrap();
    indices.destroy(&mut tc.ctx).unwrap();
    node.release(&mut tc.ctx).unwrap();

    assert_eq!(tc.ctx.live_textures(), 0);
    assert_eq!(tc.ctx.live_buffers(), 0);
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_failed_composite_dispatch_still_releases(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let input = Texture::create_from_image(&mut tc.ctx, &checkerboard(8), "Input").unwrap();
    let mut node = CompositeNode::new(&mut tc.ctx, input.handle()).unwrap();
    input.destroy(&mut tc.ctx).unwrap();

    assert!(matches!(
        node.render(&mut tc.ctx, &TestContext::empty_scene()),
        Err(RenderError::InvalidHandle(_))
    ));
    node.release(&mut tc.ctx).unwrap();
    assert_eq!(tc.ctx.live_textures(), 0);
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_forward_clears_color_target(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let clear = [0.25, 0.5, 0.75, 1.0];
    let mut node = ForwardNode::new(&mut tc.ctx, clear).unwrap();
    node.render(&mut tc.ctx, &TestContext::empty_scene()).unwrap();

    let color = node.final_output().unwrap();
    let data = tc.ctx.read_back_texture(color).unwrap();
    let texel: Vec<f32> = data[..16]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_eq!(texel, clear);

    node.release(&mut tc.ctx).unwrap();
}

// ============================================================================
// Post-processing Chain
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
fn test_forward_anti_alias_composite_chain(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let forward = ForwardNode::new(&mut tc.ctx, [0.1, 0.1, 0.1, 1.0]).unwrap();
    let color = forward.final_output().unwrap();
    let anti_alias = AntiAliasNode::new(&mut tc.ctx, color).unwrap();
    let composite = CompositeNode::new(&mut tc.ctx, color).unwrap();
    let output = composite.final_output().unwrap();

    let mut graph = RenderGraph::new();
    graph.push_node(forward);
    graph.push_node(anti_alias);
    graph.push_node(composite);
    graph
        .render(&mut tc.ctx, &TestContext::empty_scene())
        .unwrap();

    let reference = tc.ctx.backend().as_reference().unwrap();
    let dispatches: Vec<_> = reference
        .commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::Dispatch(call) => Some(call),
            _ => None,
        })
        .collect();
    assert_eq!(dispatches.len(), 2);
    let groups = TEST_SIZE / TILE_SIZE;
    for call in &dispatches {
        assert_eq!(call.groups, [groups, groups, 1]);
    }

    // Anti-aliasing writes the forward target in place
    let color_uav = tc.ctx.view(color, ViewKind::UnorderedAccess).unwrap();
    assert_eq!(
        dispatches[0].bindings[0].resource,
        BoundResource::UnorderedAccess(color_uav)
    );

    // Composite reads the forward target and writes its own output
    let output_uav = tc.ctx.view(output, ViewKind::UnorderedAccess).unwrap();
    assert!(dispatches[1]
        .bindings
        .iter()
        .any(|b| b.resource == BoundResource::UnorderedAccess(output_uav)));
    assert!(!dispatches[1]
        .bindings
        .iter()
        .any(|b| b.resource == BoundResource::UnorderedAccess(color_uav)));

    graph.shutdown(&mut tc.ctx).unwrap();
    assert_eq!(tc.ctx.live_textures(), 0);
    assert_eq!(tc.ctx.memory().total(), 0);
}

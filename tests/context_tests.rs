//! Device context integration tests.
//!
//! Covers uploads, copies and readback, binding validation and resource
//! lifetime rules on every available backend.

mod common;

use rstest::rstest;

use common::{to_rgba8, Backend, TestContext, TEST_SIZE};
use render_core::backend::{BufferKind, TextureFormat, TextureKind, TextureUsage, WindowSource};
use render_core::resources::checkerboard;
use render_core::{
    Buffer, GraphicsPipeline, GraphicsPipelineDesc, MemoryDomain, RenderError, ShaderCompiler,
    Texture,
};

const FULLSCREEN_VERTEX: &str = r#"
@vertex
fn main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}
"#;

const TINT_PIXEL: &str = r#"
struct Tint {
    color: vec4<f32>,
}

@group(0) @binding(16) var<uniform> tint: Tint;

@fragment
fn main() -> @location(0) vec4<f32> {
    return tint.color;
}
"#;

/// Deterministic byte pattern of `len` bytes
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn color_target(tc: &mut TestContext) -> Texture {
    let texture = Texture::new(
        &mut tc.ctx,
        TextureKind::TwoD,
        TextureUsage::RENDER_TARGET,
        TEST_SIZE,
        TEST_SIZE,
        TextureFormat::Rgba8Unorm,
        false,
    )
    .unwrap();
    texture.make_render_target(&mut tc.ctx).unwrap();
    texture
}

fn tint_pipeline(tc: &mut TestContext) -> GraphicsPipeline {
    let vertex = ShaderCompiler::compile(FULLSCREEN_VERTEX, "vs_5_0").unwrap();
    let pixel = ShaderCompiler::compile(TINT_PIXEL, "ps_5_0").unwrap();
    GraphicsPipeline::new(
        &mut tc.ctx,
        &GraphicsPipelineDesc::new(vertex, pixel)
            .with_label("Tint")
            .with_cull_mode(render_core::backend::CullMode::None),
    )
    .unwrap()
}

// ============================================================================
// Staging Round Trips
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_buffer_staging_roundtrip(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data = pattern(256);
    let resident =
        Buffer::create_from_data(&mut tc.ctx, &data, 4, BufferKind::Vertex, "Resident").unwrap();
    let readback =
        Buffer::new(&mut tc.ctx, 256, 4, BufferKind::Staging, "Readback").unwrap();
    tc.ctx
        .copy_buffer_to_buffer(resident.handle(), readback.handle())
        .unwrap();

    assert_eq!(tc.ctx.read_back_buffer(readback.handle()).unwrap(), data);

    resident.destroy(&mut tc.ctx).unwrap();
    readback.destroy(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_texture_staging_roundtrip(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (width, height) = (20, 12);
    let new_texture = |tc: &mut TestContext, usage| {
        Texture::new(
            &mut tc.ctx,
            TextureKind::TwoD,
            usage,
            width,
            height,
            TextureFormat::Rgba8Unorm,
            false,
        )
        .unwrap()
    };
    let upload = new_texture(&mut tc, TextureUsage::STAGING);
    let resident = new_texture(&mut tc, TextureUsage::SHADER_RESOURCE);
    let download = new_texture(&mut tc, TextureUsage::STAGING);

    let data = pattern((width * height * 4) as usize);
    tc.ctx.write_texture(upload.handle(), &data).unwrap();
    tc.ctx
        .copy_texture_to_texture(upload.handle(), resident.handle())
        .unwrap();
    tc.ctx
        .copy_texture_to_texture(resident.handle(), download.handle())
        .unwrap();

    assert_eq!(tc.ctx.read_back_texture(download.handle()).unwrap(), data);

    upload.destroy(&mut tc.ctx).unwrap();
    resident.destroy(&mut tc.ctx).unwrap();
    download.destroy(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_cube_texture_roundtrip_covers_every_face(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let size = 8;
    let new_cube = |tc: &mut TestContext, usage| {
        Texture::new(
            &mut tc.ctx,
            TextureKind::Cube,
            usage,
            size,
            size,
            TextureFormat::Rgba8Unorm,
            false,
        )
        .unwrap()
    };
    let upload = new_cube(&mut tc, TextureUsage::STAGING);
    let resident = new_cube(&mut tc, TextureUsage::SHADER_RESOURCE);
    let download = new_cube(&mut tc, TextureUsage::STAGING);
    assert_eq!(resident.desc().layers(), 6);

    let face_bytes = (size * size * 4) as u64;
    assert_eq!(
        tc.ctx.memory().usage(MemoryDomain::Textures),
        3 * 6 * face_bytes
    );

    // A single face is not a whole cube
    assert!(matches!(
        tc.ctx
            .write_texture(upload.handle(), &pattern(face_bytes as usize)),
        Err(RenderError::CopyMismatch(_))
    ));

    let data = pattern(6 * face_bytes as usize);
    tc.ctx.write_texture(upload.handle(), &data).unwrap();
    tc.ctx
        .copy_texture_to_texture(upload.handle(), resident.handle())
        .unwrap();
    tc.ctx
        .copy_texture_to_texture(resident.handle(), download.handle())
        .unwrap();
    assert_eq!(tc.ctx.read_back_texture(download.handle()).unwrap(), data);

    upload.destroy(&mut tc.ctx).unwrap();
    resident.destroy(&mut tc.ctx).unwrap();
    download.destroy(&mut tc.ctx).unwrap();
    assert_eq!(tc.ctx.memory().total(), 0);
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_image_upload_fills_mip_chain(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    // 8x8 tiles, so every texel of mip 3 covers exactly one tile
    let texture = Texture::create_from_image(&mut tc.ctx, &checkerboard(16), "Mipped").unwrap();
    assert_eq!(texture.desc().mip_levels, 5);

    let reference = tc.ctx.backend().as_reference().unwrap();
    let level3 = reference.subresource(texture.handle(), 0, 3).unwrap();
    #[rustfmt::skip]
    let expected = [
        255, 0, 255, 255,   0, 0, 0, 255,
        0, 0, 0, 255,       255, 0, 255, 255,
    ];
    assert_eq!(level3, &expected);

    let level4 = reference.subresource(texture.handle(), 0, 4).unwrap();
    assert_eq!(level4.len(), 4);
    assert_eq!((level4[1], level4[3]), (0, 255));
    assert!(level4[0] > 0 && level4[0] == level4[2]);

    texture.destroy(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_buffer_texture_roundtrip(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    // 10 texels per row is not a multiple of the hardware row alignment
    let (width, height) = (10, 6);
    let size = (width * height * 4) as u64;
    let data = pattern(size as usize);

    let source =
        Buffer::create_from_data(&mut tc.ctx, &data, 4, BufferKind::Staging, "Source").unwrap();
    let texture = Texture::new(
        &mut tc.ctx,
        TextureKind::TwoD,
        TextureUsage::SHADER_RESOURCE,
        width,
        height,
        TextureFormat::Rgba8Unorm,
        false,
    )
    .unwrap();
    let target = Buffer::new(&mut tc.ctx, size, 4, BufferKind::Staging, "Target").unwrap();

    tc.ctx
        .copy_buffer_to_texture(source.handle(), texture.handle())
        .unwrap();
    tc.ctx
        .copy_texture_to_buffer(texture.handle(), target.handle())
        .unwrap();

    assert_eq!(tc.ctx.read_back_buffer(target.handle()).unwrap(), data);

    source.destroy(&mut tc.ctx).unwrap();
    texture.destroy(&mut tc.ctx).unwrap();
    target.destroy(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_constant_upload_discards_previous_contents(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let constants = Buffer::new(&mut tc.ctx, 64, 16, BufferKind::Constant, "Constants").unwrap();
    constants.upload(&mut tc.ctx, &[0xff; 64]).unwrap();
    constants.upload(&mut tc.ctx, &[1; 16]).unwrap();

    let data = tc.ctx.read_back_buffer(constants.handle()).unwrap();
    assert_eq!(&data[..16], &[1; 16]);
    assert!(data[16..].iter().all(|&b| b == 0));

    assert!(matches!(
        constants.upload(&mut tc.ctx, &[0; 65]),
        Err(RenderError::CopyMismatch(_))
    ));

    constants.destroy(&mut tc.ctx).unwrap();
}

// ============================================================================
// Copy Validation
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_mismatched_copies_fail(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let small = Buffer::new(&mut tc.ctx, 64, 4, BufferKind::Staging, "Small").unwrap();
    let large = Buffer::new(&mut tc.ctx, 128, 4, BufferKind::Staging, "Large").unwrap();
    assert!(matches!(
        tc.ctx.copy_buffer_to_buffer(small.handle(), large.handle()),
        Err(RenderError::CopyMismatch(_))
    ));

    let rgba = Texture::new(
        &mut tc.ctx,
        TextureKind::TwoD,
        TextureUsage::STAGING,
        4,
        4,
        TextureFormat::Rgba8Unorm,
        false,
    )
    .unwrap();
    let float = Texture::new(
        &mut tc.ctx,
        TextureKind::TwoD,
        TextureUsage::STAGING,
        4,
        4,
        TextureFormat::Rgba32Float,
        false,
    )
    .unwrap();
    assert!(matches!(
        tc.ctx.copy_texture_to_texture(rgba.handle(), float.handle()),
        Err(RenderError::CopyMismatch(_))
    ));
    // 4x4 RGBA8 is 64 bytes, not 128
    assert!(matches!(
        tc.ctx.copy_buffer_to_texture(large.handle(), rgba.handle()),
        Err(RenderError::CopyMismatch(_))
    ));
    assert!(tc.ctx.copy_buffer_to_texture(small.handle(), rgba.handle()).is_ok());

    for buffer in [small, large] {
        buffer.destroy(&mut tc.ctx).unwrap();
    }
    rgba.destroy(&mut tc.ctx).unwrap();
    float.destroy(&mut tc.ctx).unwrap();
}

// ============================================================================
// Views and Lifetime
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_unsupported_view_fails(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let texture = Texture::new(
        &mut tc.ctx,
        TextureKind::TwoD,
        TextureUsage::SHADER_RESOURCE,
        16,
        16,
        TextureFormat::Rgba8Unorm,
        false,
    )
    .unwrap();

    assert!(matches!(
        texture.make_render_target(&mut tc.ctx),
        Err(RenderError::UnsupportedView { .. })
    ));
    assert!(matches!(
        texture.make_depth_stencil(&mut tc.ctx),
        Err(RenderError::UnsupportedView { .. })
    ));

    // Repeated calls hand back the same view
    let first = texture.make_shader_resource(&mut tc.ctx).unwrap();
    let second = texture.make_shader_resource(&mut tc.ctx).unwrap();
    assert_eq!(first, second);

    texture.destroy(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_destroying_bound_resources_fails(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let target = color_target(&mut tc);
    tc.ctx.bind_render_target(target.handle(), None).unwrap();
    assert!(matches!(
        tc.ctx.destroy_texture(target.handle()),
        Err(RenderError::ResourceInUse(_))
    ));
    tc.ctx.unbind_render_target();

    let vertices =
        Buffer::create_from_data(&mut tc.ctx, &[0; 48], 12, BufferKind::Vertex, "Vertices")
            .unwrap();
    tc.ctx.bind_buffer(vertices.handle()).unwrap();
    assert!(matches!(
        tc.ctx.destroy_buffer(vertices.handle()),
        Err(RenderError::ResourceInUse(_))
    ));
    tc.ctx.unbind_vertex_buffer();

    let back_buffer = tc.ctx.back_buffer().unwrap();
    assert!(matches!(
        tc.ctx.destroy_texture(back_buffer),
        Err(RenderError::ResourceInUse(_))
    ));

    let stale = target.handle();
    target.destroy(&mut tc.ctx).unwrap();
    vertices.destroy(&mut tc.ctx).unwrap();
    assert!(matches!(
        tc.ctx.destroy_texture(stale),
        Err(RenderError::InvalidHandle(_))
    ));
}

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_memory_returns_to_zero_after_teardown(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    assert_eq!(tc.ctx.memory().total(), 0);

    let texture = Texture::new(
        &mut tc.ctx,
        TextureKind::TwoD,
        TextureUsage::MIPPED_TEXTURE,
        32,
        32,
        TextureFormat::Rgba8Unorm,
        true,
    )
    .unwrap();
    let buffer = Buffer::new(&mut tc.ctx, 256, 16, BufferKind::Constant, "Constants").unwrap();

    // 32x32 RGBA8 with mips down to 1x1
    let texture_bytes: u64 = [32u64, 16, 8, 4, 2, 1].iter().map(|s| s * s * 4).sum();
    assert_eq!(tc.ctx.memory().usage(MemoryDomain::Textures), texture_bytes);
    assert_eq!(tc.ctx.memory().usage(MemoryDomain::Buffers), 256);

    texture.destroy(&mut tc.ctx).unwrap();
    buffer.destroy(&mut tc.ctx).unwrap();
    assert_eq!(tc.ctx.memory().total(), 0);
    assert_eq!(tc.ctx.live_textures(), 0);
    assert_eq!(tc.ctx.live_buffers(), 0);
}

// ============================================================================
// Binding Validation
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_unbound_constant_slot_fails_draw(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let target = color_target(&mut tc);
    let pipeline = tint_pipeline(&mut tc);
    assert!(pipeline.vertex_layout().attributes.is_empty());

    assert!(matches!(tc.ctx.draw(3), Err(RenderError::NoPipeline)));

    tc.ctx.bind_graphics_pipeline(&pipeline).unwrap();
    tc.ctx.bind_render_target(target.handle(), None).unwrap();
    assert!(matches!(
        tc.ctx.draw(3),
        Err(RenderError::UnboundSlot {
            what: "pixel constant buffer",
            slot: 0
        })
    ));

    let green = [0.0f32, 1.0, 0.0, 1.0];
    let tint =
        Buffer::create_from_slice(&mut tc.ctx, &green, BufferKind::Constant, "Tint").unwrap();
    tc.ctx.bind_pixel_constant_buffer(tint.handle(), 0).unwrap();
    tc.ctx.clear_render_target(target.handle(), [0.0; 4]).unwrap();
    tc.ctx.draw(3).unwrap();

    if backend == Backend::Hardware {
        let center = TEST_SIZE / 2;
        assert_eq!(tc.read_pixel(target.handle(), center, center), to_rgba8(green));
    }

    tc.ctx.unbind_pixel_constant_buffer(0).unwrap();
    tc.ctx.unbind_render_target();
    pipeline.destroy(&mut tc.ctx).unwrap();
    tint.destroy(&mut tc.ctx).unwrap();
    target.destroy(&mut tc.ctx).unwrap();
}

#[rstest]
#[case::reference(Backend::Reference)]
fn test_slots_out_of_range_fail(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let constants = Buffer::new(&mut tc.ctx, 16, 16, BufferKind::Constant, "Constants").unwrap();
    assert!(tc.ctx.bind_vertex_constant_buffer(constants.handle(), 15).is_ok());
    assert!(matches!(
        tc.ctx.bind_vertex_constant_buffer(constants.handle(), 16),
        Err(RenderError::SlotOutOfRange { slot: 16, max: 15 })
    ));
    assert!(matches!(
        tc.ctx.unbind_sampler(16),
        Err(RenderError::SlotOutOfRange { .. })
    ));

    // Constant buffers cannot feed geometry, and vice versa
    assert!(matches!(
        tc.ctx.bind_buffer(constants.handle()),
        Err(RenderError::InvalidBinding(_))
    ));

    // A compute binding pins the buffer just like a graphics one
    tc.ctx.unbind_vertex_constant_buffer(15).unwrap();
    tc.ctx
        .bind_compute_constant_buffer(constants.handle(), 3)
        .unwrap();
    assert!(matches!(
        tc.ctx.destroy_buffer(constants.handle()),
        Err(RenderError::ResourceInUse(_))
    ));
    assert!(matches!(
        tc.ctx.unbind_compute_constant_buffer(16),
        Err(RenderError::SlotOutOfRange { .. })
    ));
    tc.ctx.unbind_compute_constant_buffer(3).unwrap();
    constants.destroy(&mut tc.ctx).unwrap();
}

// ============================================================================
// Surface
// ============================================================================

#[rstest]
#[case::reference(Backend::Reference)]
#[case::hardware(Backend::Hardware)]
fn test_surface_attaches_once(#[case] backend: Backend) {
    let Some(mut tc) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    assert!(matches!(
        tc.ctx.attach_surface(WindowSource::Headless {
            width: 8,
            height: 8
        }),
        Err(RenderError::SurfaceAlreadyAttached)
    ));

    tc.ctx.resize(128, 96).unwrap();
    assert_eq!(tc.ctx.surface_size(), Some((128, 96)));

    // The back buffer stays at render resolution
    let back_buffer = tc.ctx.back_buffer().unwrap();
    let desc = tc.ctx.texture_desc(back_buffer).unwrap();
    assert_eq!((desc.width, desc.height), (TEST_SIZE, TEST_SIZE));

    tc.ctx.present(true).unwrap();
    tc.ctx.shutdown();
}

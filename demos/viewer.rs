//! # Viewer
//!
//! Opens a window and renders a spinning textured quad through the
//! Forward, AntiAlias and Composite nodes.
//!
//! ```bash
//! cargo run --example viewer -- --width 1280 --height 720
//! cargo run --example viewer -- --config viewer.toml --tier software
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use glam::{Mat4, Vec3};
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::WindowBuilder,
};

use render_core::backend::{BackendTier, BufferKind};
use render_core::resources::checkerboard;
use render_core::{
    AntiAliasNode, Buffer, Camera, CompositeNode, DeviceContext, ForwardNode, ForwardVertex,
    GpuMesh, RenderError, RenderGraph, RenderNode, RenderObject, RenderResult, RendererConfig,
    Scene, Texture, WindowSource,
};

/// Device tier selection for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliTier {
    /// wgpu on a hardware adapter.
    Hardware,
    /// wgpu on the driver's software rasterizer.
    Software,
    /// CPU reference device; nothing reaches the window.
    Reference,
}

impl From<CliTier> for BackendTier {
    fn from(tier: CliTier) -> Self {
        match tier {
            CliTier::Hardware => BackendTier::Hardware,
            CliTier::Software => BackendTier::Software,
            CliTier::Reference => BackendTier::Reference,
        }
    }
}

/// Render core viewer arguments.
#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Spinning quad through the forward and post-process nodes")]
struct Args {
    /// Renderer config in TOML; missing keys use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render width in pixels, overriding the config.
    #[arg(long)]
    width: Option<u32>,

    /// Render height in pixels, overriding the config.
    #[arg(long)]
    height: Option<u32>,

    /// Use only this device tier.
    #[arg(long, value_enum)]
    tier: Option<CliTier>,

    /// Albedo image for the quad; a checkerboard when missing.
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Disable vertical sync.
    #[arg(long)]
    no_vsync: bool,
}

impl Args {
    fn renderer_config(&self) -> RenderResult<RendererConfig> {
        let mut config = match &self.config {
            Some(path) => RendererConfig::load(path)?,
            None => RendererConfig::default(),
        };
        let width = self.width.unwrap_or(config.width);
        let height = self.height.unwrap_or(config.height);
        config = config.with_size(width, height);
        if let Some(tier) = self.tier {
            config = config.with_tiers(vec![tier.into()]);
        }
        if self.no_vsync {
            config = config.with_vsync(false);
        }
        Ok(config)
    }
}

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

// Clockwise as seen from the camera
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Everything the frame loop owns
struct Viewer {
    ctx: DeviceContext,
    graph: RenderGraph,
    scene: Scene,
    vertices: Buffer,
    indices: Buffer,
    albedo: Texture,
    vsync: bool,
    started: Instant,
}

impl Viewer {
    fn new(
        mut ctx: DeviceContext,
        config: &RendererConfig,
        texture: Option<PathBuf>,
    ) -> RenderResult<Self> {
        let (width, height) = ctx.resolution();

        let forward = ForwardNode::new(&mut ctx, config.clear_color)?;
        let color = forward
            .final_output()
            .ok_or_else(|| RenderError::Config("forward node has no output".into()))?;
        let anti_alias = AntiAliasNode::new(&mut ctx, color)?;
        let composite = CompositeNode::new(&mut ctx, color)?;

        let mut graph = RenderGraph::new();
        graph.push_node(forward);
        graph.push_node(anti_alias);
        graph.push_node(composite);

        let albedo = match texture {
            Some(path) => Texture::from_file(&mut ctx, path)?,
            None => Texture::create_from_image(&mut ctx, &checkerboard(256), "Checkerboard")?,
        };
        let vertices =
            Buffer::create_from_slice(&mut ctx, &QUAD_VERTICES, BufferKind::Vertex, "Quad")?;
        let indices =
            Buffer::create_from_slice(&mut ctx, &QUAD_INDICES, BufferKind::Index, "Quad Indices")?;

        let camera = Camera::new(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO).with_aspect(width, height);
        let mut scene = Scene::new(camera);
        scene.add_object(
            RenderObject::new(vec![GpuMesh {
                vertex_buffer: vertices.handle(),
                index_buffer: indices.handle(),
                index_count: QUAD_INDICES.len() as u32,
            }])
            .with_albedo(albedo.handle()),
        );

        Ok(Self {
            ctx,
            graph,
            scene,
            vertices,
            indices,
            albedo,
            vsync: config.vsync,
            started: Instant::now(),
        })
    }

    fn frame(&mut self) -> RenderResult<()> {
        let angle = self.started.elapsed().as_secs_f32();
        if let Some(quad) = self.scene.objects.first_mut() {
            quad.transform = Mat4::from_rotation_z(angle);
        }
        self.graph.render(&mut self.ctx, &self.scene)?;
        self.ctx.present(self.vsync)
    }

    fn shutdown(mut self) -> RenderResult<()> {
        self.graph.shutdown(&mut self.ctx)?;
        self.albedo.destroy(&mut self.ctx)?;
        self.vertices.destroy(&mut self.ctx)?;
        self.indices.destroy(&mut self.ctx)?;
        self.ctx.shutdown();
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    render_core::init_logging();

    let args = Args::parse();
    let config = args.renderer_config()?;
    log::info!(
        "Rendering at {}x{} (vsync: {})",
        config.width,
        config.height,
        config.vsync
    );

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("render-core viewer")
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(&event_loop)?,
    );

    let mut ctx = DeviceContext::init(&config)?;
    ctx.attach_surface(WindowSource::Native(Arc::clone(&window)))?;
    let mut viewer = Some(Viewer::new(ctx, &config, args.texture.clone())?);

    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::Resized(size) => {
                    if let Some(viewer) = viewer.as_mut() {
                        if let Err(e) = viewer.ctx.resize(size.width, size.height) {
                            log::error!("Resize failed: {e}");
                            elwt.exit();
                        }
                    }
                }
                WindowEvent::RedrawRequested => {
                    if let Some(viewer) = viewer.as_mut() {
                        if let Err(e) = viewer.frame() {
                            log::error!("Frame failed: {e}");
                            elwt.exit();
                        }
                    }
                }
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            Event::LoopExiting => {
                if let Some(viewer) = viewer.take() {
                    if let Err(e) = viewer.shutdown() {
                        log::error!("Shutdown failed: {e}");
                    }
                }
            }
            _ => {}
        }
    })?;

    Ok(())
}

//! Ordered render graph

use crate::context::DeviceContext;
use crate::error::RenderResult;
use crate::render_graph::node::RenderNode;
use crate::scene::Scene;

/// Nodes executed in insertion order.
///
/// The presented image is the final output of the last node pushed, whether
/// or not that node ran this frame.
#[derive(Default)]
pub struct RenderGraph {
    nodes: Vec<Box<dyn RenderNode>>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node; names are not checked for duplicates
    pub fn push_node<N: RenderNode>(&mut self, node: N) {
        log::info!("Pushed node {}", node.name());
        self.nodes.push(Box::new(node));
    }

    /// First node with the given name
    pub fn get_node(&self, name: &str) -> Option<&dyn RenderNode> {
        self.nodes
            .iter()
            .find(|node| node.name() == name)
            .map(|node| node.as_ref())
    }

    pub fn get_node_mut(&mut self, name: &str) -> Option<&mut dyn RenderNode> {
        for node in self.nodes.iter_mut() {
            if node.name() == name {
                return Some(node.as_mut());
            }
        }
        None
    }

    /// Typed access to a node
    pub fn get_node_as<N: RenderNode>(&self, name: &str) -> Option<&N> {
        self.get_node(name)?.as_any().downcast_ref::<N>()
    }

    pub fn get_node_as_mut<N: RenderNode>(&mut self, name: &str) -> Option<&mut N> {
        self.get_node_mut(name)?.as_any_mut().downcast_mut::<N>()
    }

    /// Run every enabled node, then copy the last node's output to the back buffer
    pub fn render(&mut self, ctx: &mut DeviceContext, scene: &Scene) -> RenderResult<()> {
        for node in self.nodes.iter_mut() {
            if node.enabled() {
                node.render(ctx, scene)?;
            }
        }

        let Some(last) = self.nodes.last() else {
            log::warn!("Rendering an empty graph");
            return Ok(());
        };
        match last.final_output() {
            Some(output) => {
                let back_buffer = ctx.back_buffer()?;
                ctx.copy_texture_to_texture(output, back_buffer)
            }
            None => {
                log::warn!("Node {} has no output to present", last.name());
                Ok(())
            }
        }
    }

    /// Release every node's resources, last node first
    pub fn shutdown(&mut self, ctx: &mut DeviceContext) -> RenderResult<()> {
        while let Some(mut node) = self.nodes.pop() {
            log::debug!("Releasing node {}", node.name());
            node.release(ctx)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in execution order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.name())
    }
}

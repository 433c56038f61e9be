//! Render node trait

use crate::backend::TextureHandle;
use crate::context::DeviceContext;
use crate::error::RenderResult;
use crate::scene::Scene;
use std::any::Any;

/// A unit of GPU work that turns scene data into one output texture
pub trait RenderNode: Any {
    /// Lookup key inside the graph
    fn name(&self) -> &str;

    /// Bind resources and submit work through the context
    fn render(&mut self, ctx: &mut DeviceContext, scene: &Scene) -> RenderResult<()>;

    /// Texture this node leaves its result in, if any
    fn final_output(&self) -> Option<TextureHandle>;

    fn enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Destroy every resource the node owns
    fn release(&mut self, ctx: &mut DeviceContext) -> RenderResult<()>;

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

//! Render Graph System
//!
//! An ordered list of render nodes. Each frame runs the enabled nodes in
//! insertion order and copies the last node's output to the back buffer.

pub mod graph;
pub mod node;
pub mod nodes;

pub use graph::*;
pub use node::*;
pub use nodes::{AntiAliasNode, CompositeNode, ForwardNode, ForwardVertex};

//! Built-in render nodes

mod anti_alias;
mod composite;
mod forward;

pub use anti_alias::*;
pub use composite::*;
pub use forward::*;

/// Edge of the square pixel tile one compute workgroup covers
pub const TILE_SIZE: u32 = 31;

/// Workgroups covering whole tiles of a `width` x `height` image.
///
/// Division truncates, so up to `TILE_SIZE - 1` pixels on the right and
/// bottom edges are not covered.
pub fn dispatch_groups(width: u32, height: u32) -> (u32, u32) {
    (width / TILE_SIZE, height / TILE_SIZE)
}

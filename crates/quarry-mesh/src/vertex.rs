//! The packed vertex format handed to the renderer.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// A single mesh vertex.
///
/// The field order and sizes are a contract with the renderer's vertex
/// input layout: 40 bytes, packed, no padding.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Position in world space
    pub position: Vec3,
    /// Per-face tint
    pub color: Vec3,
    /// Texture coordinates
    pub uv: Vec2,
    /// Texture atlas layer
    pub texture_index: i32,
    /// Render layer, redundant with the stream but carried for debugging
    pub render_layer: i32,
}

impl Vertex {
    /// Byte size of one vertex as laid out for the GPU.
    pub const STRIDE: usize = std::mem::size_of::<Self>();

    /// Create a new vertex
    pub const fn new(
        position: Vec3,
        color: Vec3,
        uv: Vec2,
        texture_index: i32,
        render_layer: i32,
    ) -> Self {
        Self {
            position,
            color,
            uv,
            texture_index,
            render_layer,
        }
    }
}

//! Block identifiers, render-layer classification, and face directions.

use crate::coords::WorldPos;
use bytemuck::{Pod, Zeroable};
use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Unique identifier for a block type.
///
/// Block ID 0 is reserved for air (empty space). IDs are assigned densely
/// at table-build time; any value below the table's declared count is valid.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct BlockId(pub u16);

impl BlockId {
    /// Air block (empty space)
    pub const AIR: Self = Self(0);

    /// Returns true if this block is air (empty)
    #[inline]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }

    /// Returns true if this block is solid (not air)
    #[inline]
    pub const fn is_solid(self) -> bool {
        self.0 != 0
    }
}

/// Render layer a block's faces are emitted into.
///
/// Layers are drawn in declaration order: opaque with depth-write, cutout
/// with alpha-test, translucent depth-read-only and alpha-blended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RenderLayer {
    /// Fully opaque geometry
    #[default]
    Opaque = 0,
    /// Alpha-tested geometry (fences, foliage)
    Cutout = 1,
    /// Alpha-blended geometry (glass, water)
    Translucent = 2,
}

impl RenderLayer {
    /// Number of render layers
    pub const COUNT: usize = 3;
    /// All layers in draw order
    pub const ALL: [RenderLayer; Self::COUNT] =
        [Self::Opaque, Self::Cutout, Self::Translucent];

    /// Index into per-layer arrays
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Per-face culling policy of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullPolicy {
    /// Face spans the whole block side and may be culled against neighbors
    #[default]
    Full,
    /// Face never culls (and is never culled by this block)
    None,
    /// Face covers part of the side; culling depends on model geometry
    Partial,
}

/// One of the six axis-aligned face directions.
///
/// +Z is up. North/south run along −Y/+Y, east/west along +X/−X.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Face {
    East = 0,
    West = 1,
    South = 2,
    North = 3,
    Up = 4,
    Down = 5,
}

impl Face {
    /// Number of faces
    pub const COUNT: usize = 6;
    /// All six faces
    pub const ALL: [Face; Self::COUNT] = [
        Self::East,
        Self::West,
        Self::South,
        Self::North,
        Self::Up,
        Self::Down,
    ];

    /// Index into per-face arrays
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Unit offset towards the neighboring block
    #[inline]
    pub const fn offset(self) -> IVec3 {
        match self {
            Self::East => IVec3::new(1, 0, 0),
            Self::West => IVec3::new(-1, 0, 0),
            Self::South => IVec3::new(0, 1, 0),
            Self::North => IVec3::new(0, -1, 0),
            Self::Up => IVec3::new(0, 0, 1),
            Self::Down => IVec3::new(0, 0, -1),
        }
    }

    /// The face on the opposite side of the block
    #[inline]
    pub const fn opposite(self) -> Face {
        match self {
            Self::East => Self::West,
            Self::West => Self::East,
            Self::South => Self::North,
            Self::North => Self::South,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

/// Read-only capability for looking up blocks anywhere in the world.
///
/// The chunk manager implements this over its loaded chunk set; the mesher
/// uses it for neighbor lookups across chunk boundaries. Positions in
/// unloaded chunks read as [`BlockId::AIR`].
pub trait BlockProbe {
    /// Get the block at a world position
    fn block_at(&self, pos: WorldPos) -> BlockId;
}

/// Probe over empty space; every position reads as air.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyProbe;

impl BlockProbe for EmptyProbe {
    #[inline]
    fn block_at(&self, _pos: WorldPos) -> BlockId {
        BlockId::AIR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_air() {
        assert!(BlockId::AIR.is_air());
        assert!(!BlockId::AIR.is_solid());
        assert!(BlockId(1).is_solid());
    }

    #[test]
    fn face_offsets_are_units() {
        for face in Face::ALL {
            let offset = face.offset();
            assert_eq!(offset.abs().element_sum(), 1);
            assert_eq!(face.opposite().offset(), -offset);
        }
    }

    #[test]
    fn layer_indices_match_draw_order() {
        assert_eq!(RenderLayer::Opaque.index(), 0);
        assert_eq!(RenderLayer::Cutout.index(), 1);
        assert_eq!(RenderLayer::Translucent.index(), 2);
    }
}

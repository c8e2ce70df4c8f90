//! Core types, math, and traits for the Quarry engine.
//!
//! This crate provides the foundational types used throughout the engine:
//! - Block identifiers and render-layer classification
//! - Coordinate systems (world, chunk, local)
//! - AABB/ray math used by meshing and spatial queries
//! - The `BlockProbe` capability for cross-chunk lookups
//! - Common error types

pub mod coords;
pub mod error;
pub mod math;
pub mod types;

pub use coords::{ChunkPos, LocalPos, WorldPos};
pub use error::{Error, Result};
pub use math::{Aabb, Ray};
pub use types::{BlockId, BlockProbe, CullPolicy, Face, RenderLayer};

/// Engine-wide constants
pub mod constants {
    /// Size of a chunk in blocks per axis
    pub const CHUNK_SIZE: usize = 16;
    /// Total blocks in a chunk (16^3)
    pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;
    /// Bits needed to represent position within a chunk (4 bits for 0-15)
    pub const CHUNK_BITS: u32 = 4;
}

//! Terrain sources: anything that can populate a chunk's block array.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use quarry_core::constants::CHUNK_SIZE;
use quarry_core::coords::{ChunkPos, LocalPos};
use quarry_core::types::BlockId;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;

/// Fills a chunk's 4096-cell block array for a given coordinate.
///
/// `populate` is called exactly once per chunk, before its first mesh
/// generation, on a worker thread.
pub trait TerrainSource: Send + Sync {
    /// Fill the chunk's block array
    fn populate(&self, pos: ChunkPos, chunk: &mut Chunk);
}

/// Fills every cell with one block type. Used by tests and benchmarks.
#[derive(Clone, Copy, Debug)]
pub struct SolidTerrain {
    /// The block to fill with
    pub block: BlockId,
}

impl TerrainSource for SolidTerrain {
    fn populate(&self, _pos: ChunkPos, chunk: &mut Chunk) {
        chunk.fill(self.block);
    }
}

/// A flat world: one block type at and below a surface height.
#[derive(Clone, Copy, Debug)]
pub struct FlatTerrain {
    /// World Z of the surface
    pub surface_z: i64,
    /// The block to fill with
    pub block: BlockId,
}

impl TerrainSource for FlatTerrain {
    fn populate(&self, pos: ChunkPos, chunk: &mut Chunk) {
        let base = pos.to_world_pos();
        for z in 0..CHUNK_SIZE {
            if base.z + z as i64 > self.surface_z {
                break;
            }
            for y in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    chunk.set_local(LocalPos::new(x as u8, y as u8, z as u8), self.block);
                }
            }
        }
    }
}

/// Block ids the noise terrain writes, resolved against the block table.
#[derive(Clone, Copy, Debug)]
pub struct TerrainBlocks {
    /// Deep ground
    pub stone: BlockId,
    /// Subsurface strata
    pub dirt: BlockId,
    /// Surface above sea level
    pub grass: BlockId,
    /// Surface at or below sea level
    pub sand: BlockId,
    /// Fills air below sea level
    pub water: BlockId,
}

/// Noise terrain configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Noise seed
    pub seed: u32,
    /// World Z of the water surface
    pub sea_level: i32,
    /// Horizontal scale of terrain features
    pub terrain_scale: f64,
    /// Maximum height variation above zero
    pub terrain_height: f64,
    /// Number of noise octaves
    pub octaves: usize,
    /// Frequency multiplier between octaves
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves
    pub persistence: f64,
    /// Depth of the dirt layer below the surface
    pub dirt_depth: u32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            sea_level: 8,
            terrain_scale: 100.0,
            terrain_height: 32.0,
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            dirt_depth: 4,
        }
    }
}

/// Procedural terrain from fractal noise: a height map over the XY plane
/// with grass/dirt/stone strata and water below sea level.
pub struct NoiseTerrain {
    config: TerrainConfig,
    blocks: TerrainBlocks,
    height_noise: Fbm<Perlin>,
}

impl NoiseTerrain {
    /// Create a generator from a configuration and the block ids to write.
    pub fn new(config: TerrainConfig, blocks: TerrainBlocks) -> Self {
        let height_noise = Fbm::<Perlin>::new(config.seed)
            .set_octaves(config.octaves)
            .set_lacunarity(config.lacunarity)
            .set_persistence(config.persistence);
        Self {
            config,
            blocks,
            height_noise,
        }
    }

    /// The generator configuration
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Surface height at world XY.
    pub fn height_at(&self, world_x: i64, world_y: i64) -> i32 {
        let nx = world_x as f64 / self.config.terrain_scale;
        let ny = world_y as f64 / self.config.terrain_scale;

        // Noise returns [-1, 1], map to [0, terrain_height]
        let value = self.height_noise.get([nx, ny]);
        ((value + 1.0) * 0.5 * self.config.terrain_height) as i32
    }

    fn block_for(&self, world_z: i32, surface: i32) -> BlockId {
        if world_z > surface {
            if world_z <= self.config.sea_level {
                self.blocks.water
            } else {
                BlockId::AIR
            }
        } else if world_z == surface {
            if surface <= self.config.sea_level {
                self.blocks.sand
            } else {
                self.blocks.grass
            }
        } else if world_z > surface - self.config.dirt_depth as i32 {
            self.blocks.dirt
        } else {
            self.blocks.stone
        }
    }
}

impl TerrainSource for NoiseTerrain {
    fn populate(&self, pos: ChunkPos, chunk: &mut Chunk) {
        let base = pos.to_world_pos();

        for y in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let surface = self.height_at(base.x + x as i64, base.y + y as i64);

                for z in 0..CHUNK_SIZE {
                    let world_z = (base.z + z as i64) as i32;
                    let block = self.block_for(world_z, surface);
                    if block.is_solid() {
                        chunk.set_local(LocalPos::new(x as u8, y as u8, z as u8), block);
                    }
                }
            }
        }
    }
}

//! Block table, chunks, terrain sources, and the chunk lifecycle manager.

pub mod block_table;
pub mod chunk;
pub mod manager;
pub mod terrain;

pub use block_table::{standard_blocks, BlockEntry, BlockSettings, BlockTable, BlockTableBuilder};
pub use chunk::Chunk;
pub use manager::{ChunkManager, ChunkManagerConfig};
pub use terrain::{FlatTerrain, NoiseTerrain, SolidTerrain, TerrainBlocks, TerrainConfig, TerrainSource};

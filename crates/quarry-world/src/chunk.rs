//! A 16x16x16 block of voxels with per-render-layer mesh streams.

use glam::Vec3;
use quarry_core::constants::{CHUNK_SIZE, CHUNK_VOLUME};
use quarry_core::coords::{ChunkPos, LocalPos};
use quarry_core::math::Aabb;
use quarry_core::types::{BlockId, RenderLayer};
use quarry_mesh::mesher::MeshData;

/// One render layer's installed mesh plus its dirty flag.
#[derive(Clone, Debug, Default)]
struct LayerMesh {
    data: MeshData,
    dirty: bool,
}

/// A chunk: fixed block array plus per-layer meshes.
///
/// Block storage is boxed so the chunk itself stays cheap to move around;
/// mesh vectors are owned here and only replaced wholesale by
/// [`install_meshes`](Chunk::install_meshes).
pub struct Chunk {
    pos: ChunkPos,
    blocks: Box<[BlockId; CHUNK_VOLUME]>,
    meshes: [LayerMesh; RenderLayer::COUNT],
    /// Bumped on every block mutation; lets a mesh installer detect that
    /// its snapshot went stale while it was meshing.
    revision: u64,
    /// Set once the terrain source has filled the block array.
    populated: bool,
}

impl Chunk {
    /// Create an all-air chunk at the given position, with every layer
    /// marked dirty.
    pub fn new(pos: ChunkPos) -> Self {
        let mut meshes: [LayerMesh; RenderLayer::COUNT] = Default::default();
        for mesh in &mut meshes {
            mesh.dirty = true;
        }
        Self {
            pos,
            blocks: vec![BlockId::AIR; CHUNK_VOLUME]
                .into_boxed_slice()
                .try_into()
                .expect("chunk volume mismatch"),
            meshes,
            revision: 0,
            populated: false,
        }
    }

    /// The chunk's position in chunk space
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Get a block by local coordinates.
    ///
    /// Out-of-range reads are a programming error; they debug-assert and
    /// read as air in release.
    #[inline]
    pub fn get(&self, x: i32, y: i32, z: i32) -> BlockId {
        debug_assert!(Self::in_bounds(x, y, z), "chunk read out of bounds");
        if !Self::in_bounds(x, y, z) {
            return BlockId::AIR;
        }
        self.blocks[LocalPos::new(x as u8, y as u8, z as u8).to_index()]
    }

    /// Set a block by local coordinates, marking every layer dirty.
    ///
    /// Out-of-range writes debug-assert and are ignored in release.
    pub fn set(&mut self, x: i32, y: i32, z: i32, id: BlockId) {
        debug_assert!(Self::in_bounds(x, y, z), "chunk write out of bounds");
        if !Self::in_bounds(x, y, z) {
            return;
        }
        self.blocks[LocalPos::new(x as u8, y as u8, z as u8).to_index()] = id;
        self.mark_all_dirty();
    }

    /// Get a block by local position
    #[inline]
    pub fn get_local(&self, local: LocalPos) -> BlockId {
        self.blocks[local.to_index()]
    }

    /// Set a block by local position, marking every layer dirty
    pub fn set_local(&mut self, local: LocalPos, id: BlockId) {
        self.blocks[local.to_index()] = id;
        self.mark_all_dirty();
    }

    /// Fill the whole chunk with one block type
    pub fn fill(&mut self, id: BlockId) {
        self.blocks.fill(id);
        self.mark_all_dirty();
    }

    /// The raw block array
    pub fn blocks(&self) -> &[BlockId; CHUNK_VOLUME] {
        &self.blocks
    }

    /// Copy the block array, for meshing off a snapshot
    pub fn snapshot_blocks(&self) -> Box<[BlockId; CHUNK_VOLUME]> {
        self.blocks.clone()
    }

    /// Mutation counter; see [`install_meshes`](Chunk::install_meshes)
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the terrain source has run for this chunk
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Record that terrain population completed
    pub fn mark_populated(&mut self) {
        self.populated = true;
    }

    /// The installed mesh for one layer
    pub fn layer_mesh(&self, layer: RenderLayer) -> &MeshData {
        &self.meshes[layer.index()].data
    }

    /// Whether one layer needs remeshing
    pub fn is_dirty(&self, layer: RenderLayer) -> bool {
        self.meshes[layer.index()].dirty
    }

    /// Whether any layer needs remeshing
    pub fn is_any_dirty(&self) -> bool {
        self.meshes.iter().any(|mesh| mesh.dirty)
    }

    /// Mark every layer dirty
    pub fn mark_all_dirty(&mut self) {
        self.revision += 1;
        for mesh in &mut self.meshes {
            mesh.dirty = true;
        }
    }

    /// Install freshly generated meshes by move.
    ///
    /// `snapshot_revision` is the revision the mesher saw when it copied
    /// the blocks. If the chunk changed since, the dirty flags stay set so
    /// the stale result is replaced on the next pass.
    pub fn install_meshes(
        &mut self,
        meshes: [MeshData; RenderLayer::COUNT],
        snapshot_revision: u64,
    ) {
        let clean = self.revision == snapshot_revision;
        for (slot, data) in self.meshes.iter_mut().zip(meshes) {
            slot.data = data;
            slot.dirty = !clean;
        }
    }

    /// World-space bounding box of the chunk
    pub fn world_aabb(&self) -> Aabb {
        let min = self.pos.to_world_pos().to_vec3();
        Aabb::new(min, min + Vec3::splat(CHUNK_SIZE as f32))
    }

    #[inline]
    fn in_bounds(x: i32, y: i32, z: i32) -> bool {
        let size = CHUNK_SIZE as i32;
        x >= 0 && x < size && y >= 0 && y < size && z >= 0 && z < size
    }
}

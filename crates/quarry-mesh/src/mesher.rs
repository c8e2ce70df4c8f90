//! Per-chunk mesh generation.
//!
//! Visits every block, computes face visibility against the six neighbors
//! (crossing chunk boundaries through a [`BlockProbe`]), and emits quads
//! into one stream per render layer. Translucent blocks are deferred and
//! appended back-to-front so painter's order holds within a chunk.

use glam::{IVec3, Vec3};
use hashbrown::HashMap;
use quarry_core::constants::{CHUNK_SIZE, CHUNK_VOLUME};
use quarry_core::coords::{ChunkPos, LocalPos, WorldPos};
use quarry_core::types::{BlockId, BlockProbe, CullPolicy, Face, RenderLayer};
use quarry_task::CancelToken;

use crate::atlas::TextureAtlas;
use crate::model::{BlockModel, Element, ModelId, ModelStore};
use crate::vertex::Vertex;

/// Static block properties the mesher needs on its hot path.
///
/// The block table implements this; tests inject small synthetic catalogs.
pub trait BlockCatalog {
    /// Whether the id is known to the table
    fn is_valid(&self, id: BlockId) -> bool;
    /// The layer the block's faces are emitted into
    fn render_layer(&self, id: BlockId) -> RenderLayer;
    /// The block's culling policy for one of its faces
    fn face_culling(&self, id: BlockId, face: Face) -> CullPolicy;
    /// The block's baked model
    fn model_of(&self, id: BlockId) -> ModelId;
}

/// Tunables for mesh generation.
#[derive(Clone, Copy, Debug)]
pub struct MesherConfig {
    /// Tolerance for the cutout full-face test against the 0..1 element box.
    pub full_face_epsilon: f32,
}

impl Default for MesherConfig {
    fn default() -> Self {
        Self {
            full_face_epsilon: 0.01,
        }
    }
}

/// One render layer's vertex/index streams.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    /// Vertex stream
    pub vertices: Vec<Vertex>,
    /// Index stream, two triangles per quad
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Whether the stream holds no geometry
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of quads in the stream
    pub fn quad_count(&self) -> usize {
        self.indices.len() / 6
    }
}

/// A translucent block deferred for back-to-front emission.
struct DeferredBlock {
    model: ModelId,
    world: Vec3,
    visible: [bool; Face::COUNT],
}

/// Generate per-layer meshes for one chunk.
///
/// `blocks` is the chunk's block array in `x + y*16 + z*256` order. The
/// probe answers neighbor lookups outside the chunk; unloaded neighbors
/// read as air, so boundary faces against them are emitted.
///
/// Returns `None` if the cancellation token fires; partial output is
/// discarded.
#[allow(clippy::too_many_arguments)]
pub fn mesh_chunk(
    chunk_pos: ChunkPos,
    blocks: &[BlockId; CHUNK_VOLUME],
    catalog: &dyn BlockCatalog,
    models: &ModelStore,
    atlas: &TextureAtlas,
    probe: &dyn BlockProbe,
    config: &MesherConfig,
    cancel: &CancelToken,
) -> Option<[MeshData; RenderLayer::COUNT]> {
    if cancel.is_cancelled() {
        return None;
    }

    // Resolve each distinct block id to its model once per invocation
    let mut resolved: HashMap<BlockId, &BlockModel> = HashMap::new();
    for &id in blocks.iter() {
        if id.is_solid() && catalog.is_valid(id) {
            resolved
                .entry(id)
                .or_insert_with(|| models.get(catalog.model_of(id)));
        }
    }

    let mut layers: [MeshData; RenderLayer::COUNT] = Default::default();
    let mut deferred: Vec<DeferredBlock> = Vec::new();

    for z in 0..CHUNK_SIZE {
        // Cancellation is checked once per slice, cheap enough to abandon
        // doomed work promptly
        if cancel.is_cancelled() {
            return None;
        }

        for y in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let local = LocalPos::new(x as u8, y as u8, z as u8);
                let id = blocks[local.to_index()];
                if id.is_air() || !catalog.is_valid(id) {
                    continue;
                }

                let layer = catalog.render_layer(id);
                let model = resolved[&id];

                let mut visible = [false; Face::COUNT];
                let mut any_visible = false;
                for face in Face::ALL {
                    let show = should_render_face(
                        chunk_pos, blocks, probe, catalog, config, local, id, layer, model, face,
                    );
                    visible[face.index()] = show;
                    any_visible |= show;
                }
                if !any_visible {
                    continue;
                }

                let world = WorldPos::from_chunk_local(chunk_pos, local).to_vec3();

                if layer == RenderLayer::Translucent {
                    deferred.push(DeferredBlock {
                        model: catalog.model_of(id),
                        world,
                        visible,
                    });
                } else {
                    emit_block(
                        &mut layers[layer.index()],
                        model,
                        world,
                        &visible,
                        atlas,
                        layer,
                    );
                }
            }
        }
    }

    // Painter's order within the chunk: approximate back-to-front by
    // decreasing world Z
    deferred.sort_by(|a, b| b.world.z.total_cmp(&a.world.z));
    for block in &deferred {
        emit_block(
            &mut layers[RenderLayer::Translucent.index()],
            models.get(block.model),
            block.world,
            &block.visible,
            atlas,
            RenderLayer::Translucent,
        );
    }

    if cancel.is_cancelled() {
        return None;
    }
    Some(layers)
}

/// Decide whether one face of a block should be emitted.
#[allow(clippy::too_many_arguments)]
fn should_render_face(
    chunk_pos: ChunkPos,
    blocks: &[BlockId; CHUNK_VOLUME],
    probe: &dyn BlockProbe,
    catalog: &dyn BlockCatalog,
    config: &MesherConfig,
    local: LocalPos,
    id: BlockId,
    layer: RenderLayer,
    model: &BlockModel,
    face: Face,
) -> bool {
    let offset = face.offset();
    let neighbor_local = IVec3::new(
        local.x as i32 + offset.x,
        local.y as i32 + offset.y,
        local.z as i32 + offset.z,
    );

    let neighbor = if in_chunk_bounds(neighbor_local) {
        let local = LocalPos::new(
            neighbor_local.x as u8,
            neighbor_local.y as u8,
            neighbor_local.z as u8,
        );
        blocks[local.to_index()]
    } else {
        // Neighbor lives in another chunk; unloaded chunks read as air
        let world = WorldPos::from_chunk_local(chunk_pos, local).offset(
            offset.x as i64,
            offset.y as i64,
            offset.z as i64,
        );
        probe.block_at(world)
    };

    if neighbor.is_air() {
        return true;
    }

    // A face the table marks non-culling is always emitted (liquid tops)
    if catalog.face_culling(id, face) == CullPolicy::None {
        return true;
    }

    let neighbor_layer = catalog.render_layer(neighbor);
    match (layer, neighbor_layer) {
        (RenderLayer::Opaque, RenderLayer::Opaque) => false,
        (RenderLayer::Translucent, RenderLayer::Translucent) => id != neighbor,
        (RenderLayer::Translucent, RenderLayer::Opaque) => false,
        (RenderLayer::Cutout, RenderLayer::Opaque) => match catalog.face_culling(id, face) {
            CullPolicy::Full => false,
            // Partial geometry culls only where the model face actually
            // spans the whole block side
            CullPolicy::Partial => !model.has_full_face(face, config.full_face_epsilon),
            CullPolicy::None => true,
        },
        _ => true,
    }
}

#[inline]
fn in_chunk_bounds(pos: IVec3) -> bool {
    let size = CHUNK_SIZE as i32;
    pos.x >= 0 && pos.x < size && pos.y >= 0 && pos.y < size && pos.z >= 0 && pos.z < size
}

/// Append every visible face of a block's model to the mesh.
fn emit_block(
    mesh: &mut MeshData,
    model: &BlockModel,
    world: Vec3,
    visible: &[bool; Face::COUNT],
    atlas: &TextureAtlas,
    layer: RenderLayer,
) {
    for element in &model.elements {
        for face in Face::ALL {
            if !visible[face.index()] {
                continue;
            }
            let Some(model_face) = element.face(face) else {
                continue;
            };

            emit_quad(
                mesh,
                element,
                face,
                world,
                &model_face.uv,
                atlas.layer_index_or_missing(&model_face.texture),
                element.tint,
                layer,
            );

            // Overlay quads are proper appended geometry with their own
            // indices, never index-aliased onto the base face
            if let Some(overlay) = &model_face.overlay {
                emit_quad(
                    mesh,
                    element,
                    face,
                    world,
                    &model_face.uv,
                    atlas.layer_index_or_missing(overlay),
                    element.tint,
                    layer,
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_quad(
    mesh: &mut MeshData,
    element: &Element,
    face: Face,
    world: Vec3,
    uv: &[glam::Vec2; 4],
    texture_index: u32,
    tint: Vec3,
    layer: RenderLayer,
) {
    let base = mesh.vertices.len() as u32;
    let corners = face_corners(element, face);

    for (corner, &corner_uv) in corners.iter().zip(uv.iter()) {
        mesh.vertices.push(Vertex::new(
            world + *corner,
            tint,
            corner_uv,
            texture_index as i32,
            layer.index() as i32,
        ));
    }

    mesh.indices
        .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
}

/// The four corners of a face, counter-clockwise when viewed from outside
/// the block.
fn face_corners(element: &Element, face: Face) -> [Vec3; 4] {
    let lo = element.from;
    let hi = element.to;
    match face {
        Face::East => [
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ],
        Face::West => [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(lo.x, lo.y, hi.z),
        ],
        Face::South => [
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
        ],
        Face::North => [
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
        ],
        Face::Up => [
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, lo.y, hi.z),
        ],
        Face::Down => [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::TextureRegion;
    use crate::model::ModelFace;
    use quarry_core::types::EmptyProbe;

    const STONE: BlockId = BlockId(1);
    const GLASS: BlockId = BlockId(2);
    const FENCE: BlockId = BlockId(3);
    const LEAVES: BlockId = BlockId(4);

    /// A synthetic catalog over a handful of fixed block types.
    struct TestCatalog {
        stone_model: ModelId,
        glass_model: ModelId,
        fence_model: ModelId,
        leaves_model: ModelId,
    }

    impl BlockCatalog for TestCatalog {
        fn is_valid(&self, id: BlockId) -> bool {
            id.0 <= 4
        }

        fn render_layer(&self, id: BlockId) -> RenderLayer {
            match id {
                GLASS => RenderLayer::Translucent,
                FENCE | LEAVES => RenderLayer::Cutout,
                _ => RenderLayer::Opaque,
            }
        }

        fn face_culling(&self, id: BlockId, _face: Face) -> CullPolicy {
            match id {
                FENCE | LEAVES => CullPolicy::Partial,
                _ => CullPolicy::Full,
            }
        }

        fn model_of(&self, id: BlockId) -> ModelId {
            match id {
                GLASS => self.glass_model,
                FENCE => self.fence_model,
                LEAVES => self.leaves_model,
                _ => self.stone_model,
            }
        }
    }

    struct Fixture {
        catalog: TestCatalog,
        models: ModelStore,
        atlas: TextureAtlas,
        config: MesherConfig,
    }

    fn fixture() -> Fixture {
        let mut models = ModelStore::new();
        let stone_model = models.register("block/stone", BlockModel::full_cube("stone"));
        let glass_model = models.register("block/glass", BlockModel::full_cube("glass"));
        let leaves_model = models.register("block/leaves", BlockModel::full_cube("leaves"));

        // Thin post: never a full face
        let mut post = Element::new(
            Vec3::new(0.375, 0.375, 0.0),
            Vec3::new(0.625, 0.625, 1.0),
        );
        for face in Face::ALL {
            post = post.with_face(face, ModelFace::new("oak"));
        }
        let fence_model = models.register(
            "block/fence_post",
            BlockModel {
                elements: vec![post],
            },
        );

        let mut atlas = TextureAtlas::new();
        for name in ["stone", "glass", "oak", "leaves"] {
            atlas.register(name, TextureRegion::default());
        }

        Fixture {
            catalog: TestCatalog {
                stone_model,
                glass_model,
                fence_model,
                leaves_model,
            },
            models,
            atlas,
            config: MesherConfig::default(),
        }
    }

    fn empty_blocks() -> Box<[BlockId; CHUNK_VOLUME]> {
        vec![BlockId::AIR; CHUNK_VOLUME]
            .into_boxed_slice()
            .try_into()
            .unwrap()
    }

    fn set(blocks: &mut [BlockId; CHUNK_VOLUME], x: u8, y: u8, z: u8, id: BlockId) {
        blocks[LocalPos::new(x, y, z).to_index()] = id;
    }

    fn mesh(
        fixture: &Fixture,
        blocks: &[BlockId; CHUNK_VOLUME],
        probe: &dyn BlockProbe,
    ) -> [MeshData; RenderLayer::COUNT] {
        mesh_chunk(
            ChunkPos::new(0, 0, 0),
            blocks,
            &fixture.catalog,
            &fixture.models,
            &fixture.atlas,
            probe,
            &fixture.config,
            &CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn single_block_emits_six_quads() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 8, 8, 8, STONE);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        let opaque = &layers[RenderLayer::Opaque.index()];

        assert_eq!(opaque.vertices.len(), 24);
        assert_eq!(opaque.indices.len(), 36);

        for vertex in &opaque.vertices {
            assert!(vertex.position.cmpge(Vec3::splat(8.0)).all());
            assert!(vertex.position.cmple(Vec3::splat(9.0)).all());
        }
        assert!(layers[RenderLayer::Cutout.index()].is_empty());
        assert!(layers[RenderLayer::Translucent.index()].is_empty());
    }

    #[test]
    fn shared_face_between_opaque_blocks_is_culled() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 4, 4, 4, STONE);
        set(&mut blocks, 5, 4, 4, STONE);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        let opaque = &layers[RenderLayer::Opaque.index()];

        // Ten faces remain of the twelve
        assert_eq!(opaque.quad_count(), 10);
        assert_eq!(opaque.vertices.len(), 40);
        assert_eq!(opaque.indices.len(), 60);
    }

    #[test]
    fn filled_chunk_emits_only_boundary_faces() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        blocks.fill(STONE);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        let opaque = &layers[RenderLayer::Opaque.index()];

        // Interior fully culled: 6 sides of 16x16 quads
        assert_eq!(opaque.quad_count(), 6 * 16 * 16);
        assert_eq!(opaque.vertices.len(), 6144);
        assert_eq!(opaque.indices.len(), 9216);
    }

    #[test]
    fn translucent_face_against_opaque_is_culled() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 0, 0, 0, GLASS);
        set(&mut blocks, 0, 0, 1, STONE);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        let translucent = &layers[RenderLayer::Translucent.index()];

        // The +Z face is culled; five remain
        assert_eq!(translucent.quad_count(), 5);

        // The opaque block above still has all six faces: an opaque face
        // against translucent emits
        let opaque = &layers[RenderLayer::Opaque.index()];
        assert_eq!(opaque.quad_count(), 6);
    }

    #[test]
    fn adjacent_same_translucent_culls_shared_faces() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 2, 2, 2, GLASS);
        set(&mut blocks, 3, 2, 2, GLASS);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        assert_eq!(layers[RenderLayer::Translucent.index()].quad_count(), 10);
    }

    #[test]
    fn cutout_full_face_culled_against_opaque() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 2, 2, 2, LEAVES);
        set(&mut blocks, 3, 2, 2, STONE);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        // Leaves are a full cube: the face against stone culls
        assert_eq!(layers[RenderLayer::Cutout.index()].quad_count(), 5);
    }

    #[test]
    fn cutout_partial_face_survives_opaque_neighbor() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 2, 2, 2, FENCE);
        set(&mut blocks, 3, 2, 2, STONE);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        // The post face does not span the block side, so it emits
        assert_eq!(layers[RenderLayer::Cutout.index()].quad_count(), 6);
    }

    #[test]
    fn boundary_faces_cull_against_loaded_neighbor_chunk() {
        struct StoneWorld;
        impl BlockProbe for StoneWorld {
            fn block_at(&self, _pos: WorldPos) -> BlockId {
                STONE
            }
        }

        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 0, 8, 8, STONE);

        let layers = mesh(&fixture, &blocks, &StoneWorld);
        let opaque = &layers[RenderLayer::Opaque.index()];

        // The west face at x=0 sees the neighbor chunk's stone and culls;
        // in-chunk neighbors are air so the other five emit
        assert_eq!(opaque.quad_count(), 5);
        let west_plane_quads = opaque
            .vertices
            .chunks_exact(4)
            .filter(|quad| quad.iter().all(|vertex| vertex.position.x == 0.0))
            .count();
        assert_eq!(west_plane_quads, 0);
    }

    #[test]
    fn translucent_blocks_sort_back_to_front() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        set(&mut blocks, 1, 1, 1, GLASS);
        set(&mut blocks, 1, 1, 10, GLASS);

        let layers = mesh(&fixture, &blocks, &EmptyProbe);
        let translucent = &layers[RenderLayer::Translucent.index()];

        // The higher block's quads come first (decreasing Z)
        assert!(translucent.vertices[0].position.z >= 10.0);
        let last = translucent.vertices.last().unwrap();
        assert!(last.position.z <= 2.0);
    }

    #[test]
    fn cancelled_meshing_returns_none() {
        let fixture = fixture();
        let mut blocks = empty_blocks();
        blocks.fill(STONE);

        let cancel = CancelToken::new();
        cancel.cancel();

        let result = mesh_chunk(
            ChunkPos::new(0, 0, 0),
            &blocks,
            &fixture.catalog,
            &fixture.models,
            &fixture.atlas,
            &EmptyProbe,
            &fixture.config,
            &cancel,
        );
        assert!(result.is_none());
    }

    #[test]
    fn overlay_faces_append_proper_quads() {
        let mut models = ModelStore::new();
        let mut element = Element::new(Vec3::ZERO, Vec3::ONE);
        for face in Face::ALL {
            let model_face = if face == Face::Up || face == Face::Down {
                ModelFace::new("grass_top")
            } else {
                ModelFace::new("grass_side").with_overlay("grass_overlay")
            };
            element = element.with_face(face, model_face);
        }
        let grass_model = models.register(
            "block/grass",
            BlockModel {
                elements: vec![element],
            },
        );

        struct GrassCatalog(ModelId);
        impl BlockCatalog for GrassCatalog {
            fn is_valid(&self, id: BlockId) -> bool {
                id.0 == 1
            }
            fn render_layer(&self, _id: BlockId) -> RenderLayer {
                RenderLayer::Opaque
            }
            fn face_culling(&self, _id: BlockId, _face: Face) -> CullPolicy {
                CullPolicy::Full
            }
            fn model_of(&self, _id: BlockId) -> ModelId {
                self.0
            }
        }

        let mut atlas = TextureAtlas::new();
        for name in ["grass_top", "grass_side", "grass_overlay"] {
            atlas.register(name, TextureRegion::default());
        }

        let mut blocks = empty_blocks();
        set(&mut blocks, 5, 5, 5, BlockId(1));

        let layers = mesh_chunk(
            ChunkPos::new(0, 0, 0),
            &blocks,
            &GrassCatalog(grass_model),
            &models,
            &atlas,
            &EmptyProbe,
            &MesherConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();

        let opaque = &layers[RenderLayer::Opaque.index()];
        // Six base faces plus four side overlays
        assert_eq!(opaque.quad_count(), 10);
        // Indices never alias vertices across quads
        assert_eq!(opaque.vertices.len(), 40);
        assert_eq!(*opaque.indices.iter().max().unwrap(), 39);
    }
}

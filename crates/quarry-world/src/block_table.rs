//! The immutable block table: numeric id to static render properties.

use hashbrown::HashMap;
use quarry_core::types::{BlockId, CullPolicy, Face, RenderLayer};
use quarry_mesh::mesher::BlockCatalog;
use quarry_mesh::model::{BlockModel, Element, ModelFace, ModelId, ModelStore, VariantKey};
use tracing::info;

/// Fluent settings for registering a block.
///
/// Starts from a solid full-cube preset; the material helpers adjust the
/// layer, transparency, and per-face culling the way common block families
/// need them.
#[derive(Clone, Debug)]
pub struct BlockSettings {
    model_path: String,
    render_layer: RenderLayer,
    transparent: bool,
    face_culling: [CullPolicy; Face::COUNT],
    rot_x: i32,
    rot_y: i32,
    mirrored: bool,
    uvlock: bool,
}

impl BlockSettings {
    /// Solid opaque block using the model at `model_path`.
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            render_layer: RenderLayer::Opaque,
            transparent: false,
            face_culling: [CullPolicy::Full; Face::COUNT],
            rot_x: 0,
            rot_y: 0,
            mirrored: false,
            uvlock: false,
        }
    }

    /// Set the render layer directly
    #[must_use]
    pub fn layer(mut self, layer: RenderLayer) -> Self {
        self.render_layer = layer;
        self
    }

    /// Mark the block transparent
    #[must_use]
    pub fn transparent(mut self) -> Self {
        self.transparent = true;
        self
    }

    /// Override the culling policy for a single face
    #[must_use]
    pub fn cull_face(mut self, face: Face, policy: CullPolicy) -> Self {
        self.face_culling[face.index()] = policy;
        self
    }

    /// Alpha-tested preset: cutout layer, partial-geometry culling
    #[must_use]
    pub fn cutout(mut self) -> Self {
        self.render_layer = RenderLayer::Cutout;
        self.transparent = true;
        self.face_culling = [CullPolicy::Partial; Face::COUNT];
        self
    }

    /// Alpha-blended preset: translucent layer
    #[must_use]
    pub fn translucent(mut self) -> Self {
        self.render_layer = RenderLayer::Translucent;
        self.transparent = true;
        self
    }

    /// Liquid preset: translucent, and the top surface never culls
    #[must_use]
    pub fn liquid(self) -> Self {
        self.translucent().cull_face(Face::Up, CullPolicy::None)
    }

    /// Bottom-half slab preset: the flush bottom face culls normally, the
    /// recessed top never does
    #[must_use]
    pub fn slab(self) -> Self {
        self.cull_face(Face::Up, CullPolicy::None)
    }

    /// Bake a blockstate rotation into the model (degrees, multiples of 90)
    #[must_use]
    pub fn rotated(mut self, rot_x: i32, rot_y: i32) -> Self {
        self.rot_x = rot_x;
        self.rot_y = rot_y;
        self
    }

    /// Bake an X mirror into the model
    #[must_use]
    pub fn mirrored(mut self) -> Self {
        self.mirrored = true;
        self
    }

    /// Keep UVs world-locked when the model is rotated
    #[must_use]
    pub fn uvlock(mut self) -> Self {
        self.uvlock = true;
        self
    }

    fn variant_key(&self) -> VariantKey {
        VariantKey {
            path: self.model_path.clone(),
            rot_x: self.rot_x,
            rot_y: self.rot_y,
            mirrored: self.mirrored,
            uvlock: self.uvlock,
        }
    }
}

/// Static properties of one block type.
#[derive(Clone, Debug)]
pub struct BlockEntry {
    /// Registry name, e.g. `stone`
    pub name: String,
    /// Layer the block's faces render into
    pub render_layer: RenderLayer,
    /// Whether light passes through the block
    pub transparent: bool,
    /// Per-face culling policy
    pub face_culling: [CullPolicy; Face::COUNT],
    /// The block's baked model
    pub model: ModelId,
}

/// Builder accumulating block registrations.
pub struct BlockTableBuilder {
    entries: Vec<BlockEntry>,
    by_name: HashMap<String, BlockId>,
}

impl BlockTableBuilder {
    /// Create a builder with air pre-registered as id 0.
    pub fn new(models: &ModelStore) -> Self {
        let air = BlockEntry {
            name: "air".to_string(),
            render_layer: RenderLayer::Cutout,
            transparent: true,
            face_culling: [CullPolicy::None; Face::COUNT],
            model: models.missing(),
        };
        let mut by_name = HashMap::new();
        by_name.insert("air".to_string(), BlockId::AIR);
        Self {
            entries: vec![air],
            by_name,
        }
    }

    /// Register a block; ids are assigned densely in registration order.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        settings: BlockSettings,
        models: &mut ModelStore,
    ) -> BlockId {
        let name = name.into();
        debug_assert!(
            !self.by_name.contains_key(&name),
            "duplicate block name {name}"
        );

        let model = models.resolve_variant(&settings.variant_key());
        let id = BlockId(self.entries.len() as u16);
        self.entries.push(BlockEntry {
            name: name.clone(),
            render_layer: settings.render_layer,
            transparent: settings.transparent,
            face_culling: settings.face_culling,
            model,
        });
        self.by_name.insert(name, id);
        id
    }

    /// Freeze the table.
    pub fn build(self) -> BlockTable {
        info!(block_count = self.entries.len(), "block table built");
        BlockTable {
            entries: self.entries,
            by_name: self.by_name,
        }
    }
}

/// Immutable id-to-properties table, shared by reference once built.
///
/// Lookups are plain array indexing; an out-of-range id is a programming
/// error caught by a debug assertion and resolved to air in release.
pub struct BlockTable {
    entries: Vec<BlockEntry>,
    by_name: HashMap<String, BlockId>,
}

impl BlockTable {
    /// Look up a block's entry.
    #[inline]
    pub fn lookup(&self, id: BlockId) -> &BlockEntry {
        debug_assert!(
            (id.0 as usize) < self.entries.len(),
            "block id {} out of range",
            id.0
        );
        self.entries.get(id.0 as usize).unwrap_or(&self.entries[0])
    }

    /// The block's render layer
    #[inline]
    pub fn render_layer(&self, id: BlockId) -> RenderLayer {
        self.lookup(id).render_layer
    }

    /// Whether the block is transparent
    #[inline]
    pub fn is_transparent(&self, id: BlockId) -> bool {
        self.lookup(id).transparent
    }

    /// The block's culling policy for one face
    #[inline]
    pub fn face_culling(&self, id: BlockId, face: Face) -> CullPolicy {
        self.lookup(id).face_culling[face.index()]
    }

    /// Resolve a block by registry name
    pub fn id_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    /// Number of registered blocks, air included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A table always contains at least air
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl BlockCatalog for BlockTable {
    fn is_valid(&self, id: BlockId) -> bool {
        (id.0 as usize) < self.entries.len()
    }

    fn render_layer(&self, id: BlockId) -> RenderLayer {
        BlockTable::render_layer(self, id)
    }

    fn face_culling(&self, id: BlockId, face: Face) -> CullPolicy {
        BlockTable::face_culling(self, id, face)
    }

    fn model_of(&self, id: BlockId) -> ModelId {
        self.lookup(id).model
    }
}

/// Register the stock block set used by the bundled terrain sources and
/// the examples: stone/dirt/grass strata, wood, foliage, glass, water.
pub fn standard_blocks(models: &mut ModelStore) -> BlockTable {
    use glam::Vec3;

    models.register("block/stone", BlockModel::full_cube("stone"));
    models.register("block/dirt", BlockModel::full_cube("dirt"));
    models.register("block/sand", BlockModel::full_cube("sand"));
    models.register("block/cobblestone", BlockModel::full_cube("cobblestone"));
    models.register("block/stone_bricks", BlockModel::full_cube("stone_bricks"));
    models.register("block/oak_planks", BlockModel::full_cube("oak_planks"));
    models.register("block/oak_log", BlockModel::full_cube("oak_log"));
    models.register("block/oak_leaves", BlockModel::full_cube("oak_leaves"));
    models.register("block/glass", BlockModel::full_cube("glass"));
    models.register("block/water", BlockModel::full_cube("water"));

    // Bottom-half slab
    let mut slab = Element::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.5));
    for face in Face::ALL {
        slab = slab.with_face(face, ModelFace::new("oak_planks"));
    }
    models.register(
        "block/oak_slab",
        BlockModel {
            elements: vec![slab],
        },
    );

    // Grass: dirt below, grass on top, sides with a tinted overlay
    let mut grass = Element::new(Vec3::ZERO, Vec3::ONE)
        .with_face(Face::Up, ModelFace::new("grass_top"))
        .with_face(Face::Down, ModelFace::new("dirt"));
    for face in [Face::East, Face::West, Face::South, Face::North] {
        grass = grass.with_face(
            face,
            ModelFace::new("grass_side").with_overlay("grass_side_overlay"),
        );
    }
    models.register(
        "block/grass_block",
        BlockModel {
            elements: vec![grass],
        },
    );

    // Fence post: a thin full-height column
    let mut post = Element::new(Vec3::new(0.375, 0.375, 0.0), Vec3::new(0.625, 0.625, 1.0));
    for face in Face::ALL {
        post = post.with_face(face, ModelFace::new("oak_planks"));
    }
    models.register(
        "block/oak_fence_post",
        BlockModel {
            elements: vec![post],
        },
    );

    let mut builder = BlockTableBuilder::new(models);
    builder.register("stone", BlockSettings::new("block/stone"), models);
    builder.register("dirt", BlockSettings::new("block/dirt"), models);
    builder.register(
        "grass_block",
        BlockSettings::new("block/grass_block"),
        models,
    );
    builder.register("sand", BlockSettings::new("block/sand"), models);
    builder.register(
        "cobblestone",
        BlockSettings::new("block/cobblestone"),
        models,
    );
    builder.register(
        "stone_bricks",
        BlockSettings::new("block/stone_bricks"),
        models,
    );
    builder.register(
        "oak_planks",
        BlockSettings::new("block/oak_planks"),
        models,
    );
    builder.register("oak_log", BlockSettings::new("block/oak_log"), models);
    // Sideways log: the same base model baked with a 90-degree roll
    builder.register(
        "oak_log_horizontal",
        BlockSettings::new("block/oak_log").rotated(90, 0),
        models,
    );
    builder.register(
        "oak_slab",
        BlockSettings::new("block/oak_slab").slab(),
        models,
    );
    builder.register(
        "oak_leaves",
        BlockSettings::new("block/oak_leaves").cutout(),
        models,
    );
    builder.register(
        "oak_fence_post",
        BlockSettings::new("block/oak_fence_post").cutout(),
        models,
    );
    builder.register(
        "glass",
        BlockSettings::new("block/glass").translucent(),
        models,
    );
    builder.register(
        "water",
        BlockSettings::new("block/water").liquid(),
        models,
    );
    builder.build()
}

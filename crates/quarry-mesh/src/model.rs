//! Block models and the baked-variant store.
//!
//! Models arrive already parsed; the store's job is variant baking
//! (blockstate rotation and mirroring pre-applied into distinct cached
//! records) and a visible placeholder for anything that fails to resolve.

use glam::{Vec2, Vec3};
use hashbrown::{HashMap, HashSet};
use quarry_core::Face;
use tracing::warn;

/// Default UV corners for a face with no explicit mapping.
const DEFAULT_UVS: [Vec2; 4] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(1.0, 0.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(0.0, 1.0),
];

/// One textured face of an element.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelFace {
    /// Texture name resolved through the atlas at mesh time
    pub texture: String,
    /// Four UV corners in vertex-winding order
    pub uv: [Vec2; 4],
    /// Optional second texture drawn over this face (e.g. grass side overlay)
    pub overlay: Option<String>,
}

impl ModelFace {
    /// Create a face with default UVs
    pub fn new(texture: impl Into<String>) -> Self {
        Self {
            texture: texture.into(),
            uv: DEFAULT_UVS,
            overlay: None,
        }
    }

    /// Replace the UV corners
    #[must_use]
    pub fn with_uv(mut self, uv: [Vec2; 4]) -> Self {
        self.uv = uv;
        self
    }

    /// Add an overlay texture
    #[must_use]
    pub fn with_overlay(mut self, texture: impl Into<String>) -> Self {
        self.overlay = Some(texture.into());
        self
    }
}

/// An axis-aligned box within the unit cube, with a map of textured faces.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    /// Minimum corner, in 0..1 block space
    pub from: Vec3,
    /// Maximum corner, in 0..1 block space
    pub to: Vec3,
    /// Tint applied to every face of this element
    pub tint: Vec3,
    faces: [Option<ModelFace>; Face::COUNT],
}

impl Element {
    /// Create an element with no faces
    pub fn new(from: Vec3, to: Vec3) -> Self {
        Self {
            from,
            to,
            tint: Vec3::ONE,
            faces: Default::default(),
        }
    }

    /// Attach a face
    #[must_use]
    pub fn with_face(mut self, face: Face, model_face: ModelFace) -> Self {
        self.faces[face.index()] = Some(model_face);
        self
    }

    /// Set the element tint
    #[must_use]
    pub fn with_tint(mut self, tint: Vec3) -> Self {
        self.tint = tint;
        self
    }

    /// Get the face in a direction, if any
    pub fn face(&self, face: Face) -> Option<&ModelFace> {
        self.faces[face.index()].as_ref()
    }

    /// Whether the face in this direction spans the full extent of its two
    /// perpendicular axes, within `epsilon`.
    pub fn is_full_face(&self, face: Face, epsilon: f32) -> bool {
        let lo = epsilon;
        let hi = 1.0 - epsilon;
        match face {
            Face::East | Face::West => {
                self.from.y <= lo && self.to.y >= hi && self.from.z <= lo && self.to.z >= hi
            }
            Face::South | Face::North => {
                self.from.x <= lo && self.to.x >= hi && self.from.z <= lo && self.to.z >= hi
            }
            Face::Up | Face::Down => {
                self.from.x <= lo && self.to.x >= hi && self.from.y <= lo && self.to.y >= hi
            }
        }
    }
}

/// An immutable block model: a list of elements.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockModel {
    /// The model's elements
    pub elements: Vec<Element>,
}

impl BlockModel {
    /// A unit cube with the same texture on all six faces.
    pub fn full_cube(texture: &str) -> Self {
        let mut element = Element::new(Vec3::ZERO, Vec3::ONE);
        for face in Face::ALL {
            element = element.with_face(face, ModelFace::new(texture));
        }
        Self {
            elements: vec![element],
        }
    }

    /// The placeholder shown for unresolvable models: a magenta-tinted cube
    /// with the missing texture.
    pub fn missing_placeholder() -> Self {
        let mut model = Self::full_cube("missing");
        model.elements[0].tint = Vec3::new(1.0, 0.0, 1.0);
        model
    }

    /// Whether any element presents a full face in this direction.
    pub fn has_full_face(&self, face: Face, epsilon: f32) -> bool {
        self.elements
            .iter()
            .any(|element| element.face(face).is_some() && element.is_full_face(face, epsilon))
    }
}

/// Cache key for a baked model variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariantKey {
    /// Path of the source model
    pub path: String,
    /// Rotation about the X axis, degrees in multiples of 90
    pub rot_x: i32,
    /// Rotation about the vertical axis, degrees in multiples of 90
    pub rot_y: i32,
    /// Mirror along X
    pub mirrored: bool,
    /// Keep UVs world-locked instead of rotating with the model
    pub uvlock: bool,
}

impl VariantKey {
    /// An untransformed variant of the model at `path`
    pub fn base(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rot_x: 0,
            rot_y: 0,
            mirrored: false,
            uvlock: false,
        }
    }

    fn is_identity(&self) -> bool {
        self.rot_x.rem_euclid(360) == 0 && self.rot_y.rem_euclid(360) == 0 && !self.mirrored
    }
}

/// Handle to a model in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelId(pub u32);

/// The model store: registered base models plus baked variants.
///
/// Mutable while the block table is being built; immutable (and shared by
/// reference) afterwards.
pub struct ModelStore {
    models: Vec<BlockModel>,
    by_path: HashMap<String, ModelId>,
    variants: HashMap<VariantKey, ModelId>,
    missing_logged: HashSet<String>,
}

impl ModelStore {
    /// Create a store seeded with the missing-model placeholder at id 0.
    pub fn new() -> Self {
        Self {
            models: vec![BlockModel::missing_placeholder()],
            by_path: HashMap::new(),
            variants: HashMap::new(),
            missing_logged: HashSet::new(),
        }
    }

    /// The placeholder model id.
    pub fn missing(&self) -> ModelId {
        ModelId(0)
    }

    /// Register a parsed base model under a path. Re-registration returns
    /// the existing id.
    pub fn register(&mut self, path: impl Into<String>, model: BlockModel) -> ModelId {
        let path = path.into();
        if let Some(&id) = self.by_path.get(&path) {
            return id;
        }
        let id = ModelId(self.models.len() as u32);
        self.models.push(model);
        self.by_path.insert(path, id);
        id
    }

    /// Fetch a model by id. Out-of-range ids resolve to the placeholder.
    pub fn get(&self, id: ModelId) -> &BlockModel {
        self.models.get(id.0 as usize).unwrap_or(&self.models[0])
    }

    /// Resolve an untransformed model path.
    pub fn resolve(&mut self, path: &str) -> ModelId {
        self.resolve_variant(&VariantKey::base(path))
    }

    /// Resolve a model variant, baking and caching it on first use.
    ///
    /// A path carrying a `_mirrored` suffix resolves to the registered
    /// model under the literal path when one exists; otherwise the suffix
    /// is stripped and the mirror flag forced on.
    pub fn resolve_variant(&mut self, key: &VariantKey) -> ModelId {
        if let Some(&id) = self.variants.get(key) {
            return id;
        }

        let (source, mirrored) = match self.by_path.get(&key.path) {
            Some(&id) => (id, key.mirrored),
            None => match key.path.strip_suffix("_mirrored") {
                Some(base) if self.by_path.contains_key(base) => (self.by_path[base], true),
                _ => {
                    if self.missing_logged.insert(key.path.clone()) {
                        warn!(path = %key.path, "model not found, using placeholder");
                    }
                    self.variants.insert(key.clone(), self.missing());
                    return self.missing();
                }
            },
        };

        let id = if key.is_identity() && !mirrored {
            source
        } else {
            let mut model = self.get(source).clone();
            if mirrored {
                mirror_x(&mut model);
            }
            for _ in 0..key.rot_x.rem_euclid(360) / 90 {
                rotate_x_90(&mut model, key.uvlock);
            }
            for _ in 0..key.rot_y.rem_euclid(360) / 90 {
                rotate_vertical_90(&mut model, key.uvlock);
            }
            let id = ModelId(self.models.len() as u32);
            self.models.push(model);
            id
        };

        self.variants.insert(key.clone(), id);
        id
    }

    /// Number of stored models (placeholder included).
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether only the placeholder is stored.
    pub fn is_empty(&self) -> bool {
        self.models.len() <= 1
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}

fn remap_faces(element: &mut Element, map: impl Fn(Face) -> Face) {
    let mut remapped: [Option<ModelFace>; Face::COUNT] = Default::default();
    for face in Face::ALL {
        remapped[map(face).index()] = element.faces[face.index()].take();
    }
    element.faces = remapped;
}

/// Cycle the UV corner order by one quarter turn.
fn cycle_uv(face: &mut ModelFace) {
    face.uv.rotate_right(1);
}

fn mirror_x(model: &mut BlockModel) {
    for element in &mut model.elements {
        let from_x = element.from.x;
        element.from.x = 1.0 - element.to.x;
        element.to.x = 1.0 - from_x;

        remap_faces(element, |face| match face {
            Face::East => Face::West,
            Face::West => Face::East,
            other => other,
        });

        // Flip the horizontal UV order on faces that show the mirroring
        for face in [Face::South, Face::North, Face::Up, Face::Down] {
            if let Some(model_face) = &mut element.faces[face.index()] {
                model_face.uv.swap(0, 1);
                model_face.uv.swap(2, 3);
            }
        }
    }
}

/// Rotate 90 degrees about the X axis: up -> north -> down -> south -> up.
fn rotate_x_90(model: &mut BlockModel, uvlock: bool) {
    for element in &mut model.elements {
        let (from, to) = (element.from, element.to);
        let a = Vec3::new(from.x, 1.0 - from.z, from.y);
        let b = Vec3::new(to.x, 1.0 - to.z, to.y);
        element.from = a.min(b);
        element.to = a.max(b);

        remap_faces(element, |face| match face {
            Face::Up => Face::North,
            Face::North => Face::Down,
            Face::Down => Face::South,
            Face::South => Face::Up,
            other => other,
        });

        if !uvlock {
            // Faces on the rotation axis spin in place
            for face in [Face::East, Face::West] {
                if let Some(model_face) = &mut element.faces[face.index()] {
                    cycle_uv(model_face);
                }
            }
        }
    }
}

/// Rotate 90 degrees about the vertical (Z) axis: east -> south -> west ->
/// north -> east.
fn rotate_vertical_90(model: &mut BlockModel, uvlock: bool) {
    for element in &mut model.elements {
        let (from, to) = (element.from, element.to);
        let a = Vec3::new(1.0 - from.y, from.x, from.z);
        let b = Vec3::new(1.0 - to.y, to.x, to.z);
        element.from = a.min(b);
        element.to = a.max(b);

        remap_faces(element, |face| match face {
            Face::East => Face::South,
            Face::South => Face::West,
            Face::West => Face::North,
            Face::North => Face::East,
            other => other,
        });

        if !uvlock {
            for face in [Face::Up, Face::Down] {
                if let Some(model_face) = &mut element.faces[face.index()] {
                    cycle_uv(model_face);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cube_has_full_faces() {
        let model = BlockModel::full_cube("stone");
        for face in Face::ALL {
            assert!(model.has_full_face(face, 0.01));
        }
    }

    #[test]
    fn post_is_not_full_face() {
        // A fence-post-like element: thin in X and Y, full in Z
        let element = Element::new(Vec3::new(0.375, 0.375, 0.0), Vec3::new(0.625, 0.625, 1.0));
        let mut element = element;
        for face in Face::ALL {
            element = element.with_face(face, ModelFace::new("oak"));
        }
        let model = BlockModel {
            elements: vec![element],
        };

        assert!(!model.has_full_face(Face::East, 0.01));
        assert!(!model.has_full_face(Face::Up, 0.01));
    }

    #[test]
    fn epsilon_tolerates_near_full_faces() {
        let element = Element::new(Vec3::new(0.005, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.995))
            .with_face(Face::South, ModelFace::new("stone"));
        assert!(element.is_full_face(Face::South, 0.01));
        assert!(!element.is_full_face(Face::South, 0.001));
    }

    #[test]
    fn unknown_path_resolves_to_placeholder() {
        let mut store = ModelStore::new();
        let id = store.resolve("block/nonexistent");
        assert_eq!(id, store.missing());
        // Cached: second resolution takes the fast path
        assert_eq!(store.resolve("block/nonexistent"), store.missing());
    }

    #[test]
    fn identity_variant_reuses_base_model() {
        let mut store = ModelStore::new();
        let base = store.register("block/stone", BlockModel::full_cube("stone"));
        let resolved = store.resolve("block/stone");
        assert_eq!(base, resolved);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn rotated_variant_is_cached_separately() {
        let mut store = ModelStore::new();
        store.register("block/log", BlockModel::full_cube("log"));

        let key = VariantKey {
            rot_x: 90,
            ..VariantKey::base("block/log")
        };
        let rotated = store.resolve_variant(&key);
        assert_ne!(rotated, store.resolve("block/log"));
        assert_eq!(store.resolve_variant(&key), rotated);
    }

    #[test]
    fn rotation_remaps_faces() {
        let element = Element::new(Vec3::ZERO, Vec3::ONE)
            .with_face(Face::Up, ModelFace::new("top"))
            .with_face(Face::North, ModelFace::new("side"));
        let mut model = BlockModel {
            elements: vec![element],
        };

        rotate_x_90(&mut model, false);

        let rotated = &model.elements[0];
        assert_eq!(rotated.face(Face::North).unwrap().texture, "top");
        assert_eq!(rotated.face(Face::Down).unwrap().texture, "side");
        assert!(rotated.face(Face::Up).is_none());
    }

    #[test]
    fn rotation_keeps_unit_cube_bounds() {
        let mut model = BlockModel::full_cube("stone");
        rotate_x_90(&mut model, false);
        rotate_vertical_90(&mut model, false);

        let element = &model.elements[0];
        assert_eq!(element.from, Vec3::ZERO);
        assert_eq!(element.to, Vec3::ONE);
    }

    #[test]
    fn mirrored_suffix_falls_back_to_base() {
        let mut store = ModelStore::new();
        store.register("block/stairs", BlockModel::full_cube("stairs"));

        // No literal "_mirrored" model registered: bakes a mirrored variant
        let mirrored = store.resolve("block/stairs_mirrored");
        assert_ne!(mirrored, store.missing());
        assert_ne!(mirrored, store.resolve("block/stairs"));
    }

    #[test]
    fn literal_mirrored_model_wins_when_registered() {
        let mut store = ModelStore::new();
        store.register("block/stairs", BlockModel::full_cube("stairs"));
        let literal = store.register("block/stairs_mirrored", BlockModel::full_cube("special"));

        assert_eq!(store.resolve("block/stairs_mirrored"), literal);
    }

    #[test]
    fn mirroring_swaps_east_and_west() {
        let element = Element::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.5, 1.0, 1.0))
            .with_face(Face::East, ModelFace::new("east"))
            .with_face(Face::West, ModelFace::new("west"));
        let mut model = BlockModel {
            elements: vec![element],
        };

        mirror_x(&mut model);

        let mirrored = &model.elements[0];
        assert_eq!(mirrored.face(Face::East).unwrap().texture, "west");
        assert_eq!(mirrored.face(Face::West).unwrap().texture, "east");
        assert_eq!(mirrored.from.x, 0.5);
        assert_eq!(mirrored.to.x, 1.0);
    }
}

//! Texture atlas lookup.
//!
//! The engine consumes an already-built atlas: named textures resolve to
//! an array layer index plus a UV sub-region. Slot 0 is reserved for the
//! "missing" placeholder so unresolved references stay visible.

use glam::Vec2;
use hashbrown::HashMap;

/// UV region of one texture within its atlas layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureRegion {
    /// Top-left UV corner
    pub uv_min: Vec2,
    /// Bottom-right UV corner
    pub uv_max: Vec2,
}

impl Default for TextureRegion {
    fn default() -> Self {
        Self {
            uv_min: Vec2::ZERO,
            uv_max: Vec2::ONE,
        }
    }
}

impl TextureRegion {
    /// Create a region from corner coordinates
    pub const fn new(min_u: f32, min_v: f32, max_u: f32, max_v: f32) -> Self {
        Self {
            uv_min: Vec2::new(min_u, min_v),
            uv_max: Vec2::new(max_u, max_v),
        }
    }
}

/// Immutable name-to-layer texture lookup.
pub struct TextureAtlas {
    indices: HashMap<String, u32>,
    regions: Vec<TextureRegion>,
}

impl TextureAtlas {
    /// Atlas layer of the reserved "missing texture" placeholder.
    pub const MISSING: u32 = 0;

    /// Create an atlas containing only the missing-texture slot.
    pub fn new() -> Self {
        let mut atlas = Self {
            indices: HashMap::new(),
            regions: Vec::new(),
        };
        atlas.register("missing", TextureRegion::default());
        atlas
    }

    /// Register a texture; returns its layer index.
    ///
    /// Registering the same name twice returns the existing index.
    pub fn register(&mut self, name: impl Into<String>, region: TextureRegion) -> u32 {
        let name = name.into();
        if let Some(&index) = self.indices.get(&name) {
            return index;
        }
        let index = self.regions.len() as u32;
        self.regions.push(region);
        self.indices.insert(name, index);
        index
    }

    /// Look up a texture's layer index by name.
    pub fn layer_index(&self, name: &str) -> Option<u32> {
        self.indices.get(name).copied()
    }

    /// Look up a layer index, falling back to the missing slot.
    pub fn layer_index_or_missing(&self, name: &str) -> u32 {
        self.layer_index(name).unwrap_or(Self::MISSING)
    }

    /// UV region of a layer index.
    pub fn region(&self, index: u32) -> TextureRegion {
        self.regions
            .get(index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Number of registered textures (including the missing slot).
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether only the missing slot is registered.
    pub fn is_empty(&self) -> bool {
        self.regions.len() <= 1
    }
}

impl Default for TextureAtlas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_slot_is_zero() {
        let atlas = TextureAtlas::new();
        assert_eq!(atlas.layer_index("missing"), Some(TextureAtlas::MISSING));
        assert_eq!(atlas.layer_index_or_missing("no_such_texture"), 0);
    }

    #[test]
    fn registration_is_idempotent() {
        let mut atlas = TextureAtlas::new();
        let a = atlas.register("stone", TextureRegion::new(0.0, 0.0, 0.5, 0.5));
        let b = atlas.register("stone", TextureRegion::default());
        assert_eq!(a, b);
        assert_eq!(atlas.len(), 2);
    }

    #[test]
    fn regions_roundtrip() {
        let mut atlas = TextureAtlas::new();
        let region = TextureRegion::new(0.25, 0.25, 0.5, 0.5);
        let index = atlas.register("dirt", region);
        assert_eq!(atlas.region(index), region);
    }
}
